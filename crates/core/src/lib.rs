//! Document-level glue over the trail and pyramid crates.

pub mod document;

pub use document::Document;

pub use chisel_pyramid::{
    AsyncListener, ListenerId, PixelSurface, Pyramid, PyramidConfig, PyramidError, RenderReport,
    RenderTarget, SpectralSummary, Summary, View, WaveFrame, WaveSummary,
};
pub use chisel_trail::{
    AudioTrail, Blend, CutPolicy, FadeCurve, Marker, MarkerTrail, Span, TrailError, TrailEvent,
};
