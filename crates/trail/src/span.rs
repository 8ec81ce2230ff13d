/// Half-open interval `[start, stop)` over the frame index axis.
///
/// Spans are immutable values; operations return new spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: i64,
    pub stop: i64,
}

impl Span {
    /// Create a span. `stop` is clamped so that `stop >= start` always holds.
    pub fn new(start: i64, stop: i64) -> Self {
        Self {
            start,
            stop: stop.max(start),
        }
    }

    /// The empty span at position zero.
    pub fn empty() -> Self {
        Self { start: 0, stop: 0 }
    }

    /// A span of `length` frames starting at `start`.
    pub fn from_start_len(start: i64, length: i64) -> Self {
        Self::new(start, start + length.max(0))
    }

    pub fn length(&self) -> i64 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }

    /// Whether `pos` lies inside the span (`start <= pos < stop`).
    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.start && pos < self.stop
    }

    /// Whether `other` is fully inside this span. Empty spans are contained
    /// if their position is within `[start, stop]`.
    pub fn contains_span(&self, other: &Span) -> bool {
        other.start >= self.start && other.stop <= self.stop
    }

    /// Whether the two spans share at least one frame.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// The shared region of two spans; empty (at `self.start.max(other.start)`)
    /// when they are disjoint.
    pub fn intersect(&self, other: &Span) -> Span {
        Span::new(self.start.max(other.start), self.stop.min(other.stop))
    }

    /// The smallest span covering both inputs. An empty input contributes
    /// nothing.
    pub fn union(&self, other: &Span) -> Span {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Span::new(self.start.min(other.start), self.stop.max(other.stop))
    }

    /// The span moved by `delta` frames.
    pub fn shift(&self, delta: i64) -> Span {
        Span {
            start: self.start + delta,
            stop: self.stop + delta,
        }
    }

    /// Clamp a position into `[start, stop]`.
    pub fn clip(&self, pos: i64) -> i64 {
        pos.clamp(self.start, self.stop)
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}
