use anyhow::Context;
use crossbeam_channel::Receiver;

use chisel_pyramid::{
    Pyramid, PyramidConfig, SpectralSummary, WaveSummary,
};
use chisel_trail::{
    AudioTrail, Blend, CutPolicy, Marker, MarkerTrail, Span, TrailEvent,
};

/// One open piece of audio: the trail of record, its markers, and lazily
/// created decimation pyramids kept in sync with every edit.
///
/// All edits go through the document so pyramids and markers see them.
/// The owner calls [`poll`](Self::poll) once per UI frame to publish
/// finished recompute work, and [`close`](Self::close) before dropping so
/// worker threads drain deterministically.
pub struct Document {
    audio: AudioTrail,
    markers: MarkerTrail,
    events: Receiver<TrailEvent>,
    config: PyramidConfig,
    spectral_bands: usize,
    wave: Option<Pyramid<WaveSummary>>,
    spectral: Option<Pyramid<SpectralSummary>>,
}

impl Document {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self::from_trail(AudioTrail::new(channels, sample_rate))
    }

    pub fn with_silence(length: i64, channels: usize, sample_rate: u32) -> Self {
        Self::from_trail(AudioTrail::silent(length, channels, sample_rate))
    }

    /// Adopt an existing trail (imported content).
    pub fn from_trail(mut audio: AudioTrail) -> Self {
        let events = audio.subscribe();
        let markers = MarkerTrail::with_length(audio.len());
        Self {
            audio,
            markers,
            events,
            config: PyramidConfig::default(),
            spectral_bands: 16,
            wave: None,
            spectral: None,
        }
    }

    /// Replace the pyramid configuration. Existing pyramids are torn down
    /// and rebuilt on next access.
    pub fn set_pyramid_config(&mut self, config: PyramidConfig, spectral_bands: usize) {
        self.config = config;
        self.spectral_bands = spectral_bands.max(1);
        if let Some(mut pyramid) = self.wave.take() {
            pyramid.shutdown();
        }
        if let Some(mut pyramid) = self.spectral.take() {
            pyramid.shutdown();
        }
    }

    pub fn audio(&self) -> &AudioTrail {
        &self.audio
    }

    pub fn len(&self) -> i64 {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.audio.channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate()
    }

    /// Read raw samples; the fallback path when a view is finer than level 0.
    pub fn read(&self, span: Span, channel_sel: &[usize]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(self.audio.read(span, channel_sel)?)
    }

    pub fn insert(&mut self, at: i64, data: &[Vec<f32>]) -> anyhow::Result<()> {
        let before = self.audio.len();
        self.audio.insert(at, data).context("insert samples")?;
        self.markers
            .insert_gap(at, self.audio.len() - before)
            .context("mirror insert into markers")?;
        self.pump();
        Ok(())
    }

    pub fn delete(&mut self, span: Span) -> anyhow::Result<()> {
        self.audio.delete(span).context("delete span")?;
        self.markers
            .delete(span)
            .context("mirror delete into markers")?;
        self.pump();
        Ok(())
    }

    /// Replace `span` with new content, optionally cross-faded at the edges.
    pub fn overwrite(
        &mut self,
        span: Span,
        data: &[Vec<f32>],
        blend: Option<&Blend>,
    ) -> anyhow::Result<()> {
        let before = self.audio.len();
        self.audio
            .overwrite(span, data, blend)
            .context("overwrite span")?;
        // Markers inside the span keep their positions; a length change
        // shifts everything after the old span's end.
        let delta = self.audio.len() - before;
        if delta > 0 {
            self.markers
                .insert_gap(span.stop, delta)
                .context("mirror grow into markers")?;
        } else if delta < 0 {
            self.markers
                .delete(Span::new(span.stop + delta, span.stop))
                .context("mirror shrink into markers")?;
        }
        self.pump();
        Ok(())
    }

    /// Extract `span` as an independent trail (see [`CutPolicy`]).
    pub fn cut(&mut self, span: Span, policy: CutPolicy) -> anyhow::Result<AudioTrail> {
        let cut = self.audio.cut(span, policy).context("cut span")?;
        if matches!(policy, CutPolicy::TouchSplitRemove) {
            self.markers
                .delete(span)
                .context("mirror cut into markers")?;
        }
        self.pump();
        Ok(cut)
    }

    /// Insert another trail's content at `at` (paste); stakes are shared.
    pub fn paste(&mut self, at: i64, other: &AudioTrail) -> anyhow::Result<()> {
        self.audio.insert_trail(at, other).context("paste trail")?;
        self.markers
            .insert_gap(at, other.len())
            .context("mirror paste into markers")?;
        self.pump();
        Ok(())
    }

    pub fn add_marker(&mut self, pos: i64, label: impl Into<String>) -> anyhow::Result<()> {
        Ok(self.markers.add_marker(pos, label)?)
    }

    pub fn remove_marker(&mut self, pos: i64) -> anyhow::Result<bool> {
        Ok(self.markers.remove_marker(pos)?)
    }

    pub fn markers_in(&self, span: Span) -> Vec<Marker> {
        self.markers.markers_in(span)
    }

    /// The waveform pyramid, created over current content on first access.
    pub fn wave(&mut self) -> anyhow::Result<&mut Pyramid<WaveSummary>> {
        let pyramid = match self.wave.take() {
            Some(p) => p,
            None => {
                log::debug!("building waveform pyramid over {} frames", self.audio.len());
                Pyramid::new(WaveSummary, &self.audio, self.config)
                    .context("create waveform pyramid")?
            }
        };
        Ok(self.wave.insert(pyramid))
    }

    /// The spectral pyramid; its analysis window is the level-0 factor.
    pub fn spectral(&mut self) -> anyhow::Result<&mut Pyramid<SpectralSummary>> {
        let pyramid = match self.spectral.take() {
            Some(p) => p,
            None => {
                let summary = SpectralSummary::new(self.spectral_bands, self.config.base as usize);
                log::debug!("building spectral pyramid over {} frames", self.audio.len());
                Pyramid::new(summary, &self.audio, self.config)
                    .context("create spectral pyramid")?
            }
        };
        Ok(self.spectral.insert(pyramid))
    }

    /// Forward pending trail events and publish finished recompute work.
    pub fn poll(&mut self) {
        self.pump();
        if let Some(pyramid) = &mut self.wave {
            pyramid.poll();
        }
        if let Some(pyramid) = &mut self.spectral {
            pyramid.poll();
        }
    }

    /// Whether any pyramid still has recompute work outstanding.
    pub fn is_settled(&self) -> bool {
        self.wave.as_ref().is_none_or(|p| p.is_idle())
            && self.spectral.as_ref().is_none_or(|p| p.is_idle())
    }

    /// Shut down recompute workers before the trail goes away.
    pub fn close(&mut self) {
        if let Some(mut pyramid) = self.wave.take() {
            pyramid.shutdown();
        }
        if let Some(mut pyramid) = self.spectral.take() {
            pyramid.shutdown();
        }
    }

    fn pump(&mut self) {
        let events: Vec<TrailEvent> = self.events.try_iter().collect();
        for event in events {
            if let Some(pyramid) = &mut self.wave {
                pyramid.on_trail_modified(&event, &self.audio);
            }
            if let Some(pyramid) = &mut self.spectral {
                pyramid.on_trail_modified(&event, &self.audio);
            }
        }
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_follow_document_edits() {
        let mut doc = Document::with_silence(1000, 1, 48_000);
        doc.add_marker(600, "hit").expect("marker");

        doc.insert(100, &[vec![0.0; 50]]).expect("insert");
        assert_eq!(doc.len(), 1050);
        assert_eq!(doc.markers_in(Span::new(0, 1050))[0].pos, 650);

        doc.delete(Span::new(0, 100)).expect("delete");
        assert_eq!(doc.markers_in(Span::new(0, 950))[0].pos, 550);
    }

    #[test]
    fn test_overwrite_shrink_keeps_markers_before_span() {
        let mut doc = Document::with_silence(1000, 1, 48_000);
        doc.add_marker(100, "before").expect("marker");
        doc.add_marker(900, "after").expect("marker");

        doc.overwrite(Span::new(400, 600), &[vec![0.1; 50]], None)
            .expect("shrink");
        assert_eq!(doc.len(), 850);
        let markers = doc.markers_in(Span::new(0, 850));
        assert_eq!(markers[0].pos, 100);
        assert_eq!(markers[1].pos, 750);
    }

    #[test]
    fn test_pyramids_are_lazy() {
        let mut doc = Document::with_silence(10_000, 1, 48_000);
        assert!(doc.is_settled(), "no pyramid, nothing outstanding");
        doc.wave().expect("wave pyramid");
        assert!(!doc.is_settled(), "initial build is in flight");
    }
}
