use std::fmt::Debug;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::view::RenderTarget;

/// A decimation flavor: how raw samples fold into summary frames, how frames
/// fold into coarser frames, and how a frame is drawn.
///
/// Reductions must be idempotent over re-computation and independent of the
/// order in which sibling windows are processed; the scheduler relies on both.
pub trait Summary: Clone + Send + Sync + 'static {
    type Frame: Clone + PartialEq + Send + Sync + Debug + 'static;

    /// The frame summarizing pure silence. Placeholder content for regions
    /// that have not been computed yet.
    fn silent(&self) -> Self::Frame;

    /// Fold a window of raw single-channel samples into one frame. The last
    /// window of a level may be shorter than the decimation factor.
    fn reduce_raw(&self, window: &[f32]) -> Self::Frame;

    /// Fold consecutive child frames into one parent frame. The last parent
    /// of a level may have fewer children than the pyramid base.
    fn reduce_children(&self, children: &[Self::Frame]) -> Self::Frame;

    /// Draw one frame into pixel column `x` of `target`.
    fn paint(&self, frame: &Self::Frame, x: usize, target: &mut dyn RenderTarget);
}

/// Per-window amplitude statistics for waveform display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveFrame {
    pub min: f32,
    pub max: f32,
    /// Mean of squared samples; `sqrt` of this is the window RMS.
    pub mean_sq: f32,
}

impl WaveFrame {
    pub fn rms(&self) -> f32 {
        self.mean_sq.sqrt()
    }
}

/// Min/max/RMS waveform decimation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaveSummary;

impl Summary for WaveSummary {
    type Frame = WaveFrame;

    fn silent(&self) -> WaveFrame {
        WaveFrame {
            min: 0.0,
            max: 0.0,
            mean_sq: 0.0,
        }
    }

    fn reduce_raw(&self, window: &[f32]) -> WaveFrame {
        if window.is_empty() {
            return self.silent();
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum_sq = 0.0f64;
        for &s in window {
            min = min.min(s);
            max = max.max(s);
            sum_sq += (s as f64) * (s as f64);
        }
        WaveFrame {
            min,
            max,
            mean_sq: (sum_sq / window.len() as f64) as f32,
        }
    }

    fn reduce_children(&self, children: &[WaveFrame]) -> WaveFrame {
        if children.is_empty() {
            return self.silent();
        }
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum_sq = 0.0f64;
        for child in children {
            min = min.min(child.min);
            max = max.max(child.max);
            sum_sq += child.mean_sq as f64;
        }
        WaveFrame {
            min,
            max,
            mean_sq: (sum_sq / children.len() as f64) as f32,
        }
    }

    fn paint(&self, frame: &WaveFrame, x: usize, target: &mut dyn RenderTarget) {
        let height = target.height();
        if height == 0 {
            return;
        }
        // Amplitude [-1, 1] maps to rows [height, 0] (positive up).
        let to_row = |amp: f32| -> usize {
            let t = (1.0 - amp.clamp(-1.0, 1.0)) * 0.5;
            ((t * height as f32) as usize).min(height - 1)
        };
        let top = to_row(frame.max);
        let bottom = to_row(frame.min);
        target.fill(x, top, 1, bottom - top + 1, 0.6);

        let rms = frame.rms();
        let rms_top = to_row(rms);
        let rms_bottom = to_row(-rms);
        target.fill(x, rms_top, 1, rms_bottom - rms_top + 1, 1.0);
    }
}

/// Per-band peak magnitudes over one analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    pub bands: Box<[f32]>,
}

/// Spectrogram-style decimation: each level-0 frame is the band-folded
/// magnitude spectrum of its window; coarser frames keep per-band maxima so
/// narrow spectral events stay visible when zoomed out.
#[derive(Clone)]
pub struct SpectralSummary {
    bands: usize,
    window: usize,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl Debug for SpectralSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralSummary")
            .field("bands", &self.bands)
            .field("window", &self.window)
            .finish()
    }
}

impl SpectralSummary {
    /// `window` is the analysis size in samples (normally the level-0
    /// decimation factor); `bands` is the number of displayed frequency rows.
    pub fn new(bands: usize, window: usize) -> Self {
        let bands = bands.max(1);
        let window = window.max(2);
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(window);
        Self { bands, window, fft }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }
}

impl Summary for SpectralSummary {
    type Frame = SpectralFrame;

    fn silent(&self) -> SpectralFrame {
        SpectralFrame {
            bands: vec![0.0; self.bands].into_boxed_slice(),
        }
    }

    fn reduce_raw(&self, window: &[f32]) -> SpectralFrame {
        let mut input = vec![0.0f32; self.window];
        let n = window.len().min(self.window);
        input[..n].copy_from_slice(&window[..n]);

        let mut spectrum: Vec<Complex<f32>> = self.fft.make_output_vec();
        if self.fft.process(&mut input, &mut spectrum).is_err() {
            return self.silent();
        }

        // Fold FFT bins (DC excluded) into display bands, keeping the peak
        // magnitude per band.
        let scale = 2.0 / self.window as f32;
        let mut bands = vec![0.0f32; self.bands];
        let bins = &spectrum[1..];
        for (i, bin) in bins.iter().enumerate() {
            let band = i * self.bands / bins.len().max(1);
            let mag = bin.norm() * scale;
            bands[band] = bands[band].max(mag);
        }
        SpectralFrame {
            bands: bands.into_boxed_slice(),
        }
    }

    fn reduce_children(&self, children: &[SpectralFrame]) -> SpectralFrame {
        let mut bands = vec![0.0f32; self.bands];
        for child in children {
            for (slot, &mag) in bands.iter_mut().zip(child.bands.iter()) {
                *slot = slot.max(mag);
            }
        }
        SpectralFrame {
            bands: bands.into_boxed_slice(),
        }
    }

    fn paint(&self, frame: &SpectralFrame, x: usize, target: &mut dyn RenderTarget) {
        let height = target.height();
        if height == 0 {
            return;
        }
        // Band 0 (lowest frequency) at the bottom row.
        for (band, &mag) in frame.bands.iter().enumerate() {
            let y0 = height - (band + 1) * height / self.bands.max(1);
            let y1 = height - band * height / self.bands.max(1);
            target.fill(x, y0, 1, (y1 - y0).max(1), mag.clamp(0.0, 1.0));
        }
    }
}
