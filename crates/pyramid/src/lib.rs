//! Multi-resolution decimation pyramids over audio trails.
//!
//! A [`Pyramid`] keeps a stack of progressively coarser summaries of an
//! [`AudioTrail`](chisel_trail::AudioTrail) so a view of any width can be
//! drawn from roughly one summary frame per pixel. Edits invalidate the
//! smallest covering frame ranges and background workers rebuild them;
//! [`Pyramid::poll`] publishes finished work to the querying thread.
//!
//! Two [`Summary`] flavors ship here: [`WaveSummary`] (min/max/RMS) and
//! [`SpectralSummary`] (banded FFT magnitudes).

mod dirty;
mod error;
mod level;
mod pyramid;
mod scheduler;
mod summary;
mod view;

pub use error::PyramidError;
pub use pyramid::{AsyncListener, ListenerId, Pyramid, PyramidConfig};
pub use summary::{SpectralFrame, SpectralSummary, Summary, WaveFrame, WaveSummary};
pub use view::{PixelSurface, RenderReport, RenderTarget, View};
