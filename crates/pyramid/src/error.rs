use chisel_trail::{Span, TrailError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PyramidError {
    #[error("span {span} out of range for length {length}")]
    OutOfRange { span: Span, length: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Trail(#[from] TrailError),

    #[error("recompute failed: {0}")]
    Recompute(String),
}
