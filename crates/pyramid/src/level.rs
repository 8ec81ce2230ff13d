use chisel_trail::{Span, TrailEvent};

use crate::dirty::DirtyMap;
use crate::summary::Summary;

/// Number of summary frames covering `length` raw frames at `factor`.
pub(crate) fn frame_count(length: i64, factor: i64) -> i64 {
    if length <= 0 { 0 } else { (length + factor - 1) / factor }
}

/// The level frame range covering raw span `span`, rounded outward.
pub(crate) fn outward(span: Span, factor: i64) -> Span {
    if span.is_empty() {
        return Span::empty();
    }
    Span::new(span.start.div_euclid(factor), (span.stop + factor - 1).div_euclid(factor))
}

/// One stored decimation level: a frame-major buffer of summary frames
/// (`frame * channels + channel`) plus its dirty map.
#[derive(Debug)]
pub(crate) struct Level<S: Summary> {
    pub factor: i64,
    pub dirty: DirtyMap,
    channels: usize,
    frames: Vec<S::Frame>,
}

impl<S: Summary> Level<S> {
    /// A level sized for `length` raw frames, filled with silent placeholders
    /// and entirely dirty.
    pub fn new(factor: i64, channels: usize, length: i64, summary: &S) -> Self {
        let count = frame_count(length, factor);
        let mut dirty = DirtyMap::new();
        dirty.mark(Span::new(0, count));
        Self {
            factor,
            dirty,
            channels,
            frames: vec![summary.silent(); (count as usize) * channels],
        }
    }

    pub fn count(&self) -> i64 {
        (self.frames.len() / self.channels) as i64
    }

    pub fn frame(&self, frame: i64, channel: usize) -> &S::Frame {
        &self.frames[frame as usize * self.channels + channel]
    }

    /// Install computed frames for `range` (frame-major, `range.length() *
    /// channels` entries). Parts of the range that fell off the level after a
    /// later resize are dropped.
    pub fn commit(&mut self, range: Span, frames: Vec<S::Frame>) {
        let bounds = Span::new(0, self.count());
        let hit = range.intersect(&bounds);
        if hit.is_empty() {
            return;
        }
        let src_offset = (hit.start - range.start) as usize * self.channels;
        let src_len = hit.length() as usize * self.channels;
        let dst_offset = hit.start as usize * self.channels;
        self.frames[dst_offset..dst_offset + src_len]
            .clone_from_slice(&frames[src_offset..src_offset + src_len]);
        self.dirty.clear(hit);
    }

    /// Adjust storage for a length-changing edit and return the frame range
    /// that must be recomputed.
    ///
    /// When the delta is a whole number of frames at this factor, surviving
    /// frames index-shift and only the edit's own frames go dirty. Otherwise
    /// every frame from the edit start onward changes alignment, so the tail
    /// is rebuilt.
    pub fn resize(&mut self, event: &TrailEvent, new_length: i64, summary: &S) -> Span {
        let old_count = self.count();
        let new_count = frame_count(new_length, self.factor);
        let delta = event.length_delta;

        // `event.span` is the new content's span; the replaced pre-mutation
        // content ran `old_extent` frames from the same start.
        let new_extent = event.span.length();
        let old_extent = new_extent - delta;

        if delta % self.factor == 0 {
            let k = delta / self.factor;
            if k > 0 {
                // First pre-mutation frame fully past the replaced region
                // shifts right by k; silent placeholders fill the gap.
                let at = ((event.span.start + old_extent + self.factor - 1) / self.factor)
                    .min(old_count);
                let idx = at as usize * self.channels;
                self.frames.splice(
                    idx..idx,
                    std::iter::repeat_n(summary.silent(), k as usize * self.channels),
                );
                self.dirty.insert_frames(at, k);
            } else {
                let at = (event.span.start + new_extent + self.factor - 1) / self.factor;
                let idx = at as usize * self.channels;
                self.frames.drain(idx..idx + (-k) as usize * self.channels);
                self.dirty.remove_frames(at, -k);
            }
            debug_assert_eq!(self.count(), new_count);
            // Frames past the edit carry correctly shifted content; only the
            // new content's covering frames change. A pure deletion touches
            // at most the seam frame, and none when the seam is aligned.
            let dirty = if new_extent > 0 {
                outward(event.span, self.factor)
            } else if event.span.start % self.factor != 0 {
                let seam = event.span.start.div_euclid(self.factor);
                Span::new(seam, seam + 1)
            } else {
                Span::empty()
            };
            let dirty = dirty.intersect(&Span::new(0, new_count));
            self.dirty.mark(dirty);
            return dirty;
        }

        // Unaligned delta: frames before the edit keep their alignment, the
        // rest is rebuilt.
        let pivot = (event.span.start.div_euclid(self.factor)).clamp(0, new_count);
        self.frames.truncate(pivot as usize * self.channels);
        self.frames
            .resize(new_count as usize * self.channels, summary.silent());
        self.dirty.truncate(pivot);
        let dirty = Span::new(pivot, new_count);
        self.dirty.mark(dirty);
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty::PendingState;
    use crate::summary::{WaveFrame, WaveSummary};

    fn filled(factor: i64, length: i64) -> Level<WaveSummary> {
        let mut level = Level::new(factor, 1, length, &WaveSummary);
        let count = level.count();
        let frames: Vec<WaveFrame> = (0..count)
            .map(|i| WaveFrame {
                min: -(i as f32),
                max: i as f32,
                mean_sq: i as f32,
            })
            .collect();
        level.commit(Span::new(0, count), frames);
        level
    }

    #[test]
    fn test_counts_round_up() {
        assert_eq!(frame_count(0, 4), 0);
        assert_eq!(frame_count(1, 4), 1);
        assert_eq!(frame_count(4, 4), 1);
        assert_eq!(frame_count(5, 4), 2);
        assert_eq!(outward(Span::new(2, 9), 4), Span::new(0, 3));
        assert_eq!(outward(Span::new(4, 8), 4), Span::new(1, 2));
    }

    #[test]
    fn test_new_level_is_all_dirty() {
        let level: Level<WaveSummary> = Level::new(4, 2, 100, &WaveSummary);
        assert_eq!(level.count(), 25);
        let pending = level.dirty.pending_in(Span::new(0, 25));
        assert_eq!(pending, vec![(Span::new(0, 25), PendingState::Recomputing)]);
    }

    #[test]
    fn test_commit_clears_dirty_and_stores() {
        let mut level: Level<WaveSummary> = Level::new(4, 1, 16, &WaveSummary);
        let frame = WaveFrame { min: -1.0, max: 1.0, mean_sq: 0.5 };
        level.commit(Span::new(1, 3), vec![frame; 2]);
        assert_eq!(*level.frame(1, 0), frame);
        assert_eq!(*level.frame(2, 0), frame);
        assert_eq!(
            level.dirty.pending_in(Span::new(0, 4)),
            vec![
                (Span::new(0, 1), PendingState::Recomputing),
                (Span::new(3, 4), PendingState::Recomputing),
            ]
        );
    }

    #[test]
    fn test_commit_past_end_is_clipped() {
        let mut level: Level<WaveSummary> = Level::new(4, 1, 8, &WaveSummary);
        let frame = WaveFrame { min: 0.0, max: 0.5, mean_sq: 0.1 };
        level.commit(Span::new(1, 4), vec![frame; 3]);
        assert_eq!(level.count(), 2);
        assert_eq!(*level.frame(1, 0), frame);
    }

    #[test]
    fn test_aligned_insert_shifts_frames() {
        let mut level = filled(4, 64);
        let event = TrailEvent {
            span: Span::new(16, 24),
            length_delta: 8,
        };
        let dirty = level.resize(&event, 72, &WaveSummary);

        assert_eq!(level.count(), 18);
        assert_eq!(dirty, Span::new(4, 6));
        // Frame 3 untouched, frames past the insert carry their old content.
        assert_eq!(level.frame(3, 0).max, 3.0);
        assert_eq!(level.frame(6, 0).max, 4.0);
        assert_eq!(level.frame(17, 0).max, 15.0);
    }

    #[test]
    fn test_aligned_delete_shifts_frames() {
        let mut level = filled(4, 64);
        // Delete of [8, 16): empty post-mutation span at the seam.
        let event = TrailEvent {
            span: Span::new(8, 8),
            length_delta: -8,
        };
        let dirty = level.resize(&event, 56, &WaveSummary);

        assert_eq!(level.count(), 14);
        // Aligned delete leaves no mixed frame.
        assert!(dirty.is_empty());
        assert_eq!(level.frame(1, 0).max, 1.0);
        assert_eq!(level.frame(2, 0).max, 4.0);
    }

    #[test]
    fn test_replace_grow_dirties_new_content_only() {
        let mut level = filled(4, 64);
        // [16, 24) replaced by 16 frames at [16, 32); aligned delta +8.
        let event = TrailEvent {
            span: Span::new(16, 32),
            length_delta: 8,
        };
        let dirty = level.resize(&event, 72, &WaveSummary);

        assert_eq!(level.count(), 18);
        assert_eq!(dirty, Span::new(4, 8));
        // Content past the old region shifted intact: old frame 6 -> 8.
        assert_eq!(level.frame(8, 0).max, 6.0);
        assert_eq!(level.frame(3, 0).max, 3.0);
        assert!(level.dirty.pending_in(Span::new(0, 4)).is_empty());
        assert!(level.dirty.pending_in(Span::new(8, 18)).is_empty());
    }

    #[test]
    fn test_unaligned_insert_dirties_tail() {
        let mut level = filled(4, 64);
        let event = TrailEvent {
            span: Span::new(10, 13),
            length_delta: 3,
        };
        let dirty = level.resize(&event, 67, &WaveSummary);

        assert_eq!(level.count(), 17);
        assert_eq!(dirty, Span::new(2, 17));
        // Frames before the edit keep their content and validity.
        assert_eq!(level.frame(1, 0).max, 1.0);
        assert!(level.dirty.pending_in(Span::new(0, 2)).is_empty());
    }
}
