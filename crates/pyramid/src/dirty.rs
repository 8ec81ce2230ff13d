use chisel_trail::Span;

/// Why a frame range is not valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// A recompute job covering the range is queued or running.
    Recomputing,
    /// The last job covering the range failed; frames hold stale or silent
    /// placeholder content until the range is dirtied again.
    Errored,
}

/// Disjoint, sorted set of not-yet-valid frame ranges for one level.
/// Positions are level frame indices, not raw frames.
#[derive(Debug, Clone, Default)]
pub(crate) struct DirtyMap {
    ranges: Vec<(Span, PendingState)>,
}

impl DirtyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Mark `span` as recomputing. Overwrites any errored overlap, since a
    /// new job is about to cover it.
    pub fn mark(&mut self, span: Span) {
        self.set_state(span, PendingState::Recomputing);
    }

    /// Downgrade the not-yet-valid parts of `span` to errored. Frames that
    /// were already cleared stay valid.
    pub fn mark_errored(&mut self, span: Span) {
        let hits: Vec<Span> = self
            .ranges
            .iter()
            .map(|(r, _)| r.intersect(&span))
            .filter(|r| !r.is_empty())
            .collect();
        for hit in hits {
            self.set_state(hit, PendingState::Errored);
        }
    }

    /// Mark `span` valid.
    pub fn clear(&mut self, span: Span) {
        self.subtract(span);
    }

    /// The not-yet-valid intersections with `span`, in order.
    pub fn pending_in(&self, span: Span) -> Vec<(Span, PendingState)> {
        self.ranges
            .iter()
            .filter_map(|(r, state)| {
                let hit = r.intersect(&span);
                (!hit.is_empty()).then_some((hit, *state))
            })
            .collect()
    }

    /// Mirror an insertion of `count` frame slots at `at`: ranges at or after
    /// the insertion point shift right, ranges straddling it split.
    pub fn insert_frames(&mut self, at: i64, count: i64) {
        if count <= 0 {
            return;
        }
        let mut shifted = Vec::with_capacity(self.ranges.len() + 1);
        for (r, state) in self.ranges.drain(..) {
            if r.stop <= at {
                shifted.push((r, state));
            } else if r.start >= at {
                shifted.push((r.shift(count), state));
            } else {
                shifted.push((Span::new(r.start, at), state));
                shifted.push((Span::new(at + count, r.stop + count), state));
            }
        }
        self.ranges = shifted;
    }

    /// Mirror a removal of frame slots `[at, at + count)`: covered parts
    /// vanish, later ranges shift left.
    pub fn remove_frames(&mut self, at: i64, count: i64) {
        if count <= 0 {
            return;
        }
        self.subtract(Span::new(at, at + count));
        for (r, _) in &mut self.ranges {
            if r.start >= at + count {
                *r = r.shift(-count);
            }
        }
    }

    /// Drop everything at or after frame `count` (level shrank).
    pub fn truncate(&mut self, count: i64) {
        self.subtract(Span::new(count, i64::MAX));
    }

    fn set_state(&mut self, span: Span, state: PendingState) {
        if span.is_empty() {
            return;
        }
        self.subtract(span);
        self.ranges.push((span, state));
        self.ranges.sort_by_key(|(r, _)| r.start);
        self.coalesce();
    }

    fn subtract(&mut self, span: Span) {
        if span.is_empty() {
            return;
        }
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for (r, state) in self.ranges.drain(..) {
            if !r.overlaps(&span) {
                kept.push((r, state));
                continue;
            }
            let left = Span::new(r.start, span.start.min(r.stop));
            let right = Span::new(span.stop.max(r.start), r.stop);
            if !left.is_empty() {
                kept.push((left, state));
            }
            if !right.is_empty() {
                kept.push((right, state));
            }
        }
        self.ranges = kept;
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<(Span, PendingState)> = Vec::with_capacity(self.ranges.len());
        for (r, state) in self.ranges.drain(..) {
            match merged.last_mut() {
                Some((prev, prev_state)) if prev.stop == r.start && *prev_state == state => {
                    prev.stop = r.stop;
                }
                _ => merged.push((r, state)),
            }
        }
        self.ranges = merged;
    }
}
