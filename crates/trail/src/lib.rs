//! Editable, span-addressed sample storage.
//!
//! A [`Trail`] is an ordered partition of [`Stake`]s covering `[0, length)`
//! with no gaps and no overlaps. [`AudioTrail`] is the concrete multichannel
//! trail backing audio content; [`MarkerTrail`] is the same partition
//! machinery carrying navigation markers. Every mutation emits one
//! [`TrailEvent`] with the minimal affected span, which downstream caches
//! (the decimation pyramid) use for invalidation.

mod audio;
mod error;
mod fade;
mod marker;
mod span;
mod stake;
mod trail;

pub use audio::AudioTrail;
pub use error::TrailError;
pub use fade::{Blend, FadeCurve};
pub use marker::{Marker, MarkerStake, MarkerTrail};
pub use span::Span;
pub use stake::{AudioStake, FileSource, SampleFormat, Stake};
pub use trail::{CutPolicy, Trail, TrailEvent};
