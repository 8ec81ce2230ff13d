use crossbeam_channel::Receiver;

use crate::error::TrailError;
use crate::fade::Blend;
use crate::span::Span;
use crate::stake::{AudioStake, Stake};
use crate::trail::{CutPolicy, Trail, TrailEvent};

/// The system of record for audio content: a [`Trail`] of [`AudioStake`]s
/// plus channel-count and sample-rate metadata.
///
/// Cloning is cheap (the stake list holds refcounted views, no bulk copy);
/// the recompute scheduler uses clones as read snapshots. A clone does not
/// inherit event subscribers.
#[derive(Debug, Clone)]
pub struct AudioTrail {
    trail: Trail<AudioStake>,
    channels: usize,
    sample_rate: u32,
}

impl AudioTrail {
    /// An empty trail.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0.
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        Self {
            trail: Trail::new(),
            channels,
            sample_rate,
        }
    }

    /// A trail of `length` silent frames backed by a single zero stake.
    pub fn silent(length: i64, channels: usize, sample_rate: u32) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        let mut trail = Trail::new();
        if length > 0 {
            let stake = AudioStake::silent(Span::new(0, length), channels);
            trail = Trail::from_stakes(vec![stake]).expect("single stake is contiguous");
        }
        Self {
            trail,
            channels,
            sample_rate,
        }
    }

    /// Build a trail over existing stakes, typically file-backed regions of
    /// a loaded take. The stakes must form a gap-free partition starting at
    /// zero and agree with the trail's channel count.
    pub fn from_stakes(
        stakes: Vec<AudioStake>,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, TrailError> {
        if channels == 0 {
            return Err(TrailError::InvalidArgument("channel count must be > 0"));
        }
        if stakes.iter().any(|s| s.channels() != channels) {
            return Err(TrailError::InvalidArgument(
                "stake channel count differs from trail",
            ));
        }
        Ok(Self {
            trail: Trail::from_stakes(stakes)?,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> i64 {
        self.trail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trail.is_empty()
    }

    pub fn span(&self) -> Span {
        self.trail.span()
    }

    pub fn stakes(&self) -> &[AudioStake] {
        self.trail.stakes()
    }

    /// Subscribe to mutation events (see [`TrailEvent`]).
    pub fn subscribe(&mut self) -> Receiver<TrailEvent> {
        self.trail.subscribe()
    }

    /// Read `span` for a subset of channels, in the order requested.
    /// Each returned buffer holds `span.length()` samples.
    pub fn read(&self, span: Span, channel_sel: &[usize]) -> Result<Vec<Vec<f32>>, TrailError> {
        if !self.span().contains_span(&span) {
            return Err(TrailError::OutOfRange {
                span,
                length: self.len(),
            });
        }
        for &ch in channel_sel {
            if ch >= self.channels {
                return Err(TrailError::InvalidArgument("channel index out of bounds"));
            }
        }

        let frames = span.length() as usize;
        let mut out = vec![vec![0.0f32; frames]; channel_sel.len()];
        if frames == 0 {
            return Ok(out);
        }

        // The read splits across however many stakes intersect the span;
        // each stake contributes one contiguous run.
        for stake in self.trail.stakes_in(span) {
            let part = stake.span().intersect(&span);
            let data = stake.interleaved(part)?;
            let offset = (part.start - span.start) as usize;
            for (slot, &ch) in channel_sel.iter().enumerate() {
                let dst = &mut out[slot][offset..offset + part.length() as usize];
                for (i, frame) in data.chunks_exact(self.channels).enumerate() {
                    dst[i] = frame[ch];
                }
            }
        }
        Ok(out)
    }

    /// Read all channels of `span`.
    pub fn read_all(&self, span: Span) -> Result<Vec<Vec<f32>>, TrailError> {
        let all: Vec<usize> = (0..self.channels).collect();
        self.read(span, &all)
    }

    /// Read a single channel of `span`.
    pub fn read_channel(&self, span: Span, channel: usize) -> Result<Vec<f32>, TrailError> {
        let mut buffers = self.read(span, &[channel])?;
        Ok(buffers.swap_remove(0))
    }

    /// Insert per-channel sample data at `at`; content after `at` shifts.
    pub fn insert(&mut self, at: i64, data: &[Vec<f32>]) -> Result<(), TrailError> {
        let interleaved = self.interleave(data)?;
        if interleaved.is_empty() {
            return Ok(());
        }
        let stake = AudioStake::from_samples(0, interleaved, self.channels)?;
        self.trail.insert(at, vec![stake])
    }

    /// Insert another trail's content at `at` (paste). The other trail is
    /// not consumed; its stakes are shared, not copied.
    pub fn insert_trail(&mut self, at: i64, other: &AudioTrail) -> Result<(), TrailError> {
        if other.channels != self.channels {
            return Err(TrailError::InvalidArgument("channel count mismatch"));
        }
        self.trail.insert(at, other.trail.stakes().to_vec())
    }

    pub fn delete(&mut self, span: Span) -> Result<(), TrailError> {
        self.trail.delete(span)
    }

    /// Replace `span` with new content. With a [`Blend`], the new data's
    /// edges are cross-faded out of and back into the old content before
    /// insertion; without one the cut is hard. `data` may be longer or
    /// shorter than the span (the trail length changes accordingly).
    pub fn overwrite(
        &mut self,
        span: Span,
        data: &[Vec<f32>],
        blend: Option<&Blend>,
    ) -> Result<(), TrailError> {
        if !self.span().contains_span(&span) {
            return Err(TrailError::OutOfRange {
                span,
                length: self.len(),
            });
        }
        let mut shaped = data.to_vec();
        if let Some(blend) = blend {
            let left = (blend.left as i64).min(span.length());
            let right = (blend.right as i64).min(span.length());
            let old_left = self.read_all(Span::from_start_len(span.start, left))?;
            let old_right = self.read_all(Span::new(span.stop - right, span.stop))?;
            blend.shape(&old_left, &old_right, &mut shaped);
        }

        let interleaved = self.interleave(&shaped)?;
        let incoming = if interleaved.is_empty() {
            Vec::new()
        } else {
            vec![AudioStake::from_samples(0, interleaved, self.channels)?]
        };
        self.trail.replace(span, incoming)
    }

    /// Extract `span` as an independent trail with private copy-views of the
    /// covered stakes (see [`CutPolicy`]).
    pub fn cut(&mut self, span: Span, policy: CutPolicy) -> Result<AudioTrail, TrailError> {
        let cut = self.trail.cut(span, policy)?;
        Ok(AudioTrail {
            trail: cut,
            channels: self.channels,
            sample_rate: self.sample_rate,
        })
    }

    /// Diagnostic coverage-invariant check.
    pub fn verify_contiguity(&self) -> Result<(), TrailError> {
        self.trail.verify_contiguity()
    }

    fn interleave(&self, data: &[Vec<f32>]) -> Result<Vec<f32>, TrailError> {
        if data.len() != self.channels {
            return Err(TrailError::InvalidArgument(
                "data must carry one buffer per channel",
            ));
        }
        let frames = data[0].len();
        if data.iter().any(|c| c.len() != frames) {
            return Err(TrailError::InvalidArgument(
                "channel buffers must have equal length",
            ));
        }
        let mut interleaved = Vec::with_capacity(frames * self.channels);
        for i in 0..frames {
            for channel in data {
                interleaved.push(channel[i]);
            }
        }
        Ok(interleaved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fade::FadeCurve;

    fn ramp(frames: usize, offset: f32) -> Vec<f32> {
        (0..frames).map(|i| i as f32 + offset).collect()
    }

    #[test]
    fn test_silent_trail_reads_zeros() {
        let trail = AudioTrail::silent(1000, 2, 48_000);
        assert_eq!(trail.len(), 1000);
        let buffers = trail.read_all(Span::new(100, 200)).expect("read");
        assert_eq!(buffers.len(), 2);
        assert!(buffers.iter().all(|c| c.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn test_read_out_of_range() {
        let trail = AudioTrail::silent(100, 1, 48_000);
        let err = trail.read_all(Span::new(50, 101));
        assert!(matches!(err, Err(TrailError::OutOfRange { .. })));
    }

    #[test]
    fn test_insert_and_read_across_stakes() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail.insert(50, &[ramp(10, 1.0)]).expect("insert");
        assert_eq!(trail.len(), 110);

        // Read straddling silence, inserted data, silence again.
        let read = trail.read_channel(Span::new(48, 64), 0).expect("read");
        assert_eq!(&read[0..2], &[0.0, 0.0]);
        assert_eq!(&read[2..12], &ramp(10, 1.0)[..]);
        assert_eq!(&read[12..], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_partial_channel_selection() {
        let mut trail = AudioTrail::silent(10, 3, 48_000);
        trail
            .overwrite(
                Span::new(0, 10),
                &[ramp(10, 0.0), ramp(10, 100.0), ramp(10, 200.0)],
                None,
            )
            .expect("overwrite");

        let buffers = trail.read(Span::new(2, 5), &[2, 0]).expect("read");
        assert_eq!(buffers[0], vec![202.0, 203.0, 204.0]);
        assert_eq!(buffers[1], vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_overwrite_hard_cut() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail
            .overwrite(Span::new(20, 30), &[vec![1.0; 10]], None)
            .expect("overwrite");
        assert_eq!(trail.len(), 100);

        let read = trail.read_channel(Span::new(19, 31), 0).expect("read");
        assert_eq!(read[0], 0.0);
        assert!(read[1..11].iter().all(|&v| v == 1.0));
        assert_eq!(read[11], 0.0);
    }

    #[test]
    fn test_overwrite_with_blend_interpolates_edges() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail
            .overwrite(Span::new(0, 100), &[vec![1.0; 100]], None)
            .expect("prime");

        let blend = Blend::symmetric(8, FadeCurve::Linear);
        trail
            .overwrite(Span::new(40, 60), &[vec![-1.0; 20]], Some(&blend))
            .expect("blended overwrite");

        let read = trail.read_channel(Span::new(40, 60), 0).expect("read");
        // Edge frames interpolate between old (+1) and new (-1).
        assert!(read[0] > 0.0, "first frame leans old");
        assert!(read[7] < 0.0, "end of left fade leans new");
        assert!(read[8..12].iter().all(|&v| v == -1.0), "middle is pure new");
        assert!(read[19] > 0.0, "last frame leans old again");
    }

    #[test]
    fn test_overwrite_changes_length() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail
            .overwrite(Span::new(10, 20), &[vec![1.0; 4]], None)
            .expect("shrink");
        assert_eq!(trail.len(), 94);
        trail.verify_contiguity().expect("contiguous");
    }

    #[test]
    fn test_cut_survives_source_disposal() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail
            .overwrite(Span::new(0, 100), &[ramp(100, 0.0)], None)
            .expect("fill");

        let cut = trail.cut(Span::new(0, 10), CutPolicy::TouchSplit).expect("cut");
        drop(trail);

        let read = cut.read_channel(Span::new(0, 10), 0).expect("read");
        assert_eq!(read, ramp(10, 0.0));
    }

    #[test]
    fn test_paste_cut_trail() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        trail
            .overwrite(Span::new(10, 20), &[vec![0.5; 10]], None)
            .expect("fill");

        let cut = trail
            .cut(Span::new(10, 20), CutPolicy::TouchSplitRemove)
            .expect("cut");
        assert_eq!(trail.len(), 90);

        trail.insert_trail(0, &cut).expect("paste");
        assert_eq!(trail.len(), 100);
        let read = trail.read_channel(Span::new(0, 10), 0).expect("read");
        assert!(read.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_from_stakes_file_backed_trail() {
        use crate::stake::{FileSource, SampleFormat};
        use std::fs::File;
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("take.pcm");
        let mut f = File::create(&path).expect("create");
        for i in 0..64i16 {
            f.write_all(&(i * 512).to_le_bytes()).expect("write");
        }
        drop(f);

        let source = FileSource::new(File::open(&path).expect("open"), 0, SampleFormat::I16, 1);
        let stake = AudioStake::from_file(Span::new(0, 64), source, 0);
        let mut trail = AudioTrail::from_stakes(vec![stake], 1, 48_000).expect("trail");
        assert_eq!(trail.len(), 64);

        let read = trail.read_channel(Span::new(10, 12), 0).expect("read");
        assert!((read[0] - 10.0 * 512.0 / 32768.0).abs() < 1e-6);

        // Edits work over file-backed content like any other: the insert
        // splits the stake and the file region shifts with the partition.
        trail.insert(32, &[vec![0.9; 8]]).expect("insert");
        assert_eq!(trail.len(), 72);
        trail.verify_contiguity().expect("contiguous");
        let read = trail.read_channel(Span::new(39, 41), 0).expect("read");
        assert_eq!(read[0], 0.9);
        assert!((read[1] - 32.0 * 512.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_stakes_rejects_channel_mismatch() {
        let stake = AudioStake::from_samples(0, vec![0.0; 8], 2).expect("stake");
        let err = AudioTrail::from_stakes(vec![stake], 1, 48_000);
        assert!(matches!(err, Err(TrailError::InvalidArgument(_))));
    }

    #[test]
    fn test_event_stream_for_edit_sequence() {
        let mut trail = AudioTrail::silent(100, 1, 48_000);
        let events = trail.subscribe();
        trail.insert(50, &[vec![0.0; 25]]).expect("insert");
        trail
            .overwrite(Span::new(0, 10), &[vec![1.0; 10]], None)
            .expect("overwrite");

        let first = events.try_recv().expect("insert event");
        assert_eq!(first.span, Span::new(50, 75));
        assert_eq!(first.length_delta, 25);
        let second = events.try_recv().expect("overwrite event");
        assert_eq!(second.span, Span::new(0, 10));
        assert_eq!(second.length_delta, 0);
    }
}
