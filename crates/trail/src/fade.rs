/// Control curve for one side of a cross-fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCurve {
    Linear,
    /// Sine-quadrant curve; keeps perceived level constant across the blend.
    EqualPower,
    Sqrt,
}

impl FadeCurve {
    /// Gain at normalized fade position `t` in `[0, 1]`.
    pub fn gain(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => t,
            FadeCurve::EqualPower => (t * std::f32::consts::FRAC_PI_2).sin(),
            FadeCurve::Sqrt => t.sqrt(),
        }
    }
}

/// Cross-fade context for a blended overwrite.
///
/// `left` and `right` are independent edge widths in frames. Within the left
/// edge the outgoing old content is interpolated with the incoming new
/// content (old fades out, new fades in); mirrored over the right edge. This
/// is pure data shaping applied before insertion; the partition algorithm is
/// untouched. Edge widths wider than the available material are clamped.
#[derive(Debug, Clone, Copy)]
pub struct Blend {
    pub left: u64,
    pub right: u64,
    pub fade_in: FadeCurve,
    pub fade_out: FadeCurve,
}

impl Blend {
    pub fn new(left: u64, right: u64, fade_in: FadeCurve, fade_out: FadeCurve) -> Self {
        Self {
            left,
            right,
            fade_in,
            fade_out,
        }
    }

    /// Equal edge widths with the same curve on both sides.
    pub fn symmetric(width: u64, curve: FadeCurve) -> Self {
        Self::new(width, width, curve, curve)
    }

    /// Shape `new` in place: blend its left edge out of `old_left` and its
    /// right edge into `old_right`. The old buffers hold the content being
    /// overwritten at the corresponding edges (possibly shorter than the
    /// requested widths; the fade shrinks to fit).
    pub(crate) fn shape(
        &self,
        old_left: &[Vec<f32>],
        old_right: &[Vec<f32>],
        new: &mut [Vec<f32>],
    ) {
        if new.is_empty() || new[0].is_empty() {
            return;
        }
        let frames = new[0].len();

        let left = (self.left as usize)
            .min(frames)
            .min(old_left.first().map_or(0, |c| c.len()));
        for (ch, channel) in new.iter_mut().enumerate() {
            for i in 0..left {
                let t = (i as f32 + 0.5) / left as f32;
                let keep = self.fade_out.gain(1.0 - t);
                let take = self.fade_in.gain(t);
                channel[i] = old_left[ch][i] * keep + channel[i] * take;
            }
        }

        let right = (self.right as usize)
            .min(frames.saturating_sub(left))
            .min(old_right.first().map_or(0, |c| c.len()));
        for (ch, channel) in new.iter_mut().enumerate() {
            let old = &old_right[ch];
            for i in 0..right {
                // i counts from the start of the right edge.
                let t = (i as f32 + 0.5) / right as f32;
                let keep = self.fade_in.gain(1.0 - t);
                let take = self.fade_out.gain(t);
                let frame = frames - right + i;
                let old_frame = old.len() - right + i;
                channel[frame] = channel[frame] * keep + old[old_frame] * take;
            }
        }
    }
}
