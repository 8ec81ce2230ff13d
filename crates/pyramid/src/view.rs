use chisel_trail::Span;

/// Minimal pixel-grid sink for [`crate::Pyramid::render`]. Implementors map
/// normalized intensity onto whatever color scheme they draw with.
pub trait RenderTarget {
    fn width(&self) -> usize;
    fn height(&self) -> usize;

    /// Fill a rectangle with intensity in `[0, 1]`. Coordinates are clipped
    /// by the implementor; `y` grows downward.
    fn fill(&mut self, x: usize, y: usize, w: usize, h: usize, intensity: f32);
}

/// Result of a best-level query: either a stored level to draw from, or the
/// instruction to fall back to reading raw samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum View {
    /// Fewer raw frames than pixels; read the trail directly.
    Raw { span: Span },
    /// Draw from stored level `level`.
    Level {
        level: usize,
        /// Raw span the view covers, clipped to the trail.
        span: Span,
        /// Covering frame range at this level, in level frame indices.
        frames: Span,
        /// How many level frames map onto one pixel column (`>= 1`).
        frames_per_pixel: f64,
    },
}

impl View {
    pub fn span(&self) -> Span {
        match self {
            View::Raw { span } => *span,
            View::Level { span, .. } => *span,
        }
    }
}

/// What a render could not show yet, in raw frame coordinates. Callers
/// typically gray out `pending` regions and flag `errored` ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub pending: Vec<Span>,
    pub errored: Vec<Span>,
}

impl RenderReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.errored.is_empty()
    }
}

/// In-memory grayscale surface, mainly for tests and headless rendering.
#[derive(Debug, Clone)]
pub struct PixelSurface {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
}

impl PixelSurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.pixels[y * self.width + x]
    }

    /// Max intensity in column `x`.
    pub fn column_peak(&self, x: usize) -> f32 {
        (0..self.height)
            .map(|y| self.get(x, y))
            .fold(0.0, f32::max)
    }
}

impl RenderTarget for PixelSurface {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn fill(&mut self, x: usize, y: usize, w: usize, h: usize, intensity: f32) {
        for yy in y..(y + h).min(self.height) {
            for xx in x..(x + w).min(self.width) {
                self.pixels[yy * self.width + xx] = intensity;
            }
        }
    }
}
