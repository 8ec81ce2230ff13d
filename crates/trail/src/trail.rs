use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::TrailError;
use crate::span::Span;
use crate::stake::Stake;

/// Notification fired after every successful mutation.
///
/// `span` is deliberately expressed in post-mutation coordinates, not the
/// edited region's pre-mutation extent: the inserted span for insertions,
/// the new content's span for replacements, and the empty span at the seam
/// for deletions (no surviving frame changed content, everything after
/// merely shifted). A pre-mutation span could not tell "replace [10, 15)
/// with 10 frames" apart from "insert 5 frames at 10", which need different
/// invalidation. The replaced extent is recoverable as `span.length() -
/// length_delta` frames from the same start; downstream caches derive their
/// invalidation range from the pair, so `span` must never be
/// over-approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailEvent {
    pub span: Span,
    /// Change in trail length caused by the mutation.
    pub length_delta: i64,
}

/// How `cut` treats stakes straddling the requested span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutPolicy {
    /// Split boundary stakes so the returned trail aligns exactly with the
    /// span; the source trail is left untouched.
    TouchSplit,
    /// As `TouchSplit`, but also delete the span from the source trail.
    TouchSplitRemove,
}

/// An ordered, non-overlapping partition of stakes covering `[0, length)`.
///
/// The coverage invariant (no gaps, no overlaps, monotonically increasing
/// offsets) may be violated only transiently inside a single mutating
/// operation; every public mutation restores it before returning.
pub struct Trail<S: Stake> {
    stakes: Vec<S>,
    length: i64,
    subscribers: Vec<Sender<TrailEvent>>,
}

impl<S: Stake> Trail<S> {
    pub fn new() -> Self {
        Self {
            stakes: Vec::new(),
            length: 0,
            subscribers: Vec::new(),
        }
    }

    /// Build a trail from stakes that must already form a gap-free partition
    /// starting at zero.
    pub fn from_stakes(stakes: Vec<S>) -> Result<Self, TrailError> {
        let length = contiguous_length(&stakes)?;
        Ok(Self {
            stakes,
            length,
            subscribers: Vec::new(),
        })
    }

    pub fn len(&self) -> i64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn span(&self) -> Span {
        Span::new(0, self.length)
    }

    pub fn stakes(&self) -> &[S] {
        &self.stakes
    }

    /// The contiguous run of stakes intersecting `span` (which must be a
    /// non-empty span inside the trail).
    pub fn stakes_in(&self, span: Span) -> &[S] {
        if span.is_empty() || self.stakes.is_empty() {
            return &[];
        }
        let first = self.index_at(span.start);
        let last = self.index_at(span.stop - 1);
        &self.stakes[first..=last]
    }

    /// Subscribe to mutation events. The receiver sees every event emitted
    /// after this call; dropped receivers are pruned lazily.
    pub fn subscribe(&mut self) -> Receiver<TrailEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Insert a gap-free run of stakes (spanning `[0, d)` in their own
    /// coordinates) at position `at`. All stake offsets after `at` shift by
    /// `d`.
    pub fn insert(&mut self, at: i64, incoming: Vec<S>) -> Result<(), TrailError> {
        if at < 0 || at > self.length {
            return Err(TrailError::OutOfRange {
                span: Span::new(at, at),
                length: self.length,
            });
        }
        let added = contiguous_length(&incoming)?;
        if added == 0 {
            return Ok(());
        }

        let idx = self.ensure_boundary(at);
        for stake in &mut self.stakes[idx..] {
            *stake = stake.shifted(added);
        }
        self.stakes
            .splice(idx..idx, incoming.into_iter().map(|s| s.shifted(at)));
        self.length += added;

        self.debug_verify();
        self.emit(TrailEvent {
            span: Span::from_start_len(at, added),
            length_delta: added,
        });
        Ok(())
    }

    /// Remove `span` from the trail; subsequent stake offsets shift back by
    /// `span.length()`.
    pub fn delete(&mut self, span: Span) -> Result<(), TrailError> {
        self.check_bounds(span)?;
        if span.is_empty() {
            return Ok(());
        }

        let removed = span.length();
        let first = self.ensure_boundary(span.start);
        let last = self.ensure_boundary(span.stop);
        self.stakes.drain(first..last);
        for stake in &mut self.stakes[first..] {
            *stake = stake.shifted(-removed);
        }
        self.length -= removed;

        self.debug_verify();
        self.emit(TrailEvent {
            span: Span::new(span.start, span.start),
            length_delta: -removed,
        });
        Ok(())
    }

    /// Replace `span` with a gap-free run of stakes, as one atomic mutation
    /// emitting a single event. This is the overwrite primitive.
    pub fn replace(&mut self, span: Span, incoming: Vec<S>) -> Result<(), TrailError> {
        self.check_bounds(span)?;
        let added = contiguous_length(&incoming)?;
        if span.is_empty() && added == 0 {
            return Ok(());
        }

        let first = self.ensure_boundary(span.start);
        let last = self.ensure_boundary(span.stop);
        let delta = added - span.length();
        self.stakes.drain(first..last);
        if delta != 0 {
            for stake in &mut self.stakes[first..] {
                *stake = stake.shifted(delta);
            }
        }
        self.stakes
            .splice(first..first, incoming.into_iter().map(|s| s.shifted(span.start)));
        self.length += delta;

        self.debug_verify();
        self.emit(TrailEvent {
            span: Span::from_start_len(span.start, added),
            length_delta: delta,
        });
        Ok(())
    }

    /// Extract `span` as a new, independent trail rebased to
    /// `[0, span.length())`. Boundary stakes are split (cheap views) so the
    /// result aligns exactly with the span. With
    /// [`CutPolicy::TouchSplitRemove`] the span is also deleted from `self`.
    pub fn cut(&mut self, span: Span, policy: CutPolicy) -> Result<Trail<S>, TrailError> {
        self.check_bounds(span)?;

        let mut copied = Vec::new();
        for stake in self.stakes_in(span) {
            let mut piece = stake.clone();
            if piece.span().start < span.start {
                piece = piece.split_at(span.start).1;
            }
            if piece.span().stop > span.stop {
                piece = piece.split_at(span.stop).0;
            }
            copied.push(piece.shifted(-span.start));
        }
        let cut = Trail {
            stakes: copied,
            length: span.length(),
            subscribers: Vec::new(),
        };
        debug_assert!(cut.verify_contiguity().is_ok());

        if matches!(policy, CutPolicy::TouchSplitRemove) {
            self.delete(span)?;
        }
        Ok(cut)
    }

    /// Check the coverage invariant: stakes partition `[0, length)` exactly
    /// once, no gaps, no overlaps, offsets monotonically increasing.
    /// Diagnostic only, not on the hot path.
    pub fn verify_contiguity(&self) -> Result<(), TrailError> {
        let mut expected = 0i64;
        for (i, stake) in self.stakes.iter().enumerate() {
            let span = stake.span();
            if span.start != expected {
                return Err(TrailError::Inconsistent(format!(
                    "stake {i} starts at {} but previous stake stops at {expected}",
                    span.start
                )));
            }
            if span.is_empty() {
                return Err(TrailError::Inconsistent(format!("stake {i} is empty")));
            }
            expected = span.stop;
        }
        if expected != self.length {
            return Err(TrailError::Inconsistent(format!(
                "stakes cover [0, {expected}) but trail length is {}",
                self.length
            )));
        }
        Ok(())
    }

    fn check_bounds(&self, span: Span) -> Result<(), TrailError> {
        if self.span().contains_span(&span) {
            Ok(())
        } else {
            Err(TrailError::OutOfRange {
                span,
                length: self.length,
            })
        }
    }

    /// Index of the stake whose span contains `pos`; requires
    /// `0 <= pos < length`.
    fn index_at(&self, pos: i64) -> usize {
        self.stakes.partition_point(|s| s.span().stop <= pos)
    }

    /// Make `pos` a stake boundary, splitting the containing stake if
    /// necessary, and return the index of the first stake starting at `pos`
    /// (or `stakes.len()` when `pos == length`).
    fn ensure_boundary(&mut self, pos: i64) -> usize {
        if pos == self.length {
            return self.stakes.len();
        }
        let idx = self.index_at(pos);
        if self.stakes[idx].span().start != pos {
            let (left, right) = self.stakes[idx].split_at(pos);
            self.stakes[idx] = left;
            self.stakes.insert(idx + 1, right);
            idx + 1
        } else {
            idx
        }
    }

    /// Crate-internal: force a stake boundary at `pos` and return the index
    /// of the stake starting there. Used by trails that decorate stakes in
    /// place without changing the partition (marker labels); no event fires.
    pub(crate) fn split_boundary(&mut self, pos: i64) -> usize {
        let idx = self.ensure_boundary(pos);
        self.debug_verify();
        idx
    }

    pub(crate) fn stakes_mut(&mut self) -> &mut [S] {
        &mut self.stakes
    }

    fn emit(&mut self, event: TrailEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn debug_verify(&self) {
        #[cfg(debug_assertions)]
        if let Err(err) = self.verify_contiguity() {
            panic!("{err}");
        }
    }
}

impl<S: Stake> Clone for Trail<S> {
    /// Clones the partition, not the subscriber list: a snapshot taken for a
    /// background job must not receive future mutation events.
    fn clone(&self) -> Self {
        Self {
            stakes: self.stakes.clone(),
            length: self.length,
            subscribers: Vec::new(),
        }
    }
}

impl<S: Stake> Default for Trail<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stake> std::fmt::Debug for Trail<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trail")
            .field("length", &self.length)
            .field("stakes", &self.stakes.len())
            .finish()
    }
}

fn contiguous_length<S: Stake>(stakes: &[S]) -> Result<i64, TrailError> {
    let mut expected = 0i64;
    for stake in stakes {
        let span = stake.span();
        if span.start != expected || span.is_empty() {
            return Err(TrailError::InvalidArgument(
                "incoming stakes must form a gap-free partition starting at zero",
            ));
        }
        expected = span.stop;
    }
    Ok(expected)
}
