use crate::span::Span;

#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error("span {span} outside trail bounds [0, {length})")]
    OutOfRange { span: Span, length: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Debug-only invariant violation; unreachable when the partition
    /// algorithms are correct.
    #[error("trail inconsistent: {0}")]
    Inconsistent(String),
}
