//! Headless repaint loop: edit a document, poll until the pyramid settles,
//! and print the waveform as ASCII shading.

use std::time::Duration;

use chisel_core::{Document, PixelSurface, Span, View};

fn main() -> anyhow::Result<()> {
    let mut doc = Document::with_silence(1_000_000, 1, 48_000);

    let tone: Vec<f32> = (0..200_000)
        .map(|i| (i as f32 * 0.01).sin() * (1.0 - i as f32 / 200_000.0))
        .collect();
    doc.overwrite(Span::new(300_000, 500_000), &[tone], None)?;

    let width = 80;
    let height = 16;
    loop {
        doc.poll();
        let pyramid = doc.wave()?;
        let view = pyramid.best_level(Span::new(0, 1_000_000), width)?;
        let mut surface = PixelSurface::new(width, height);
        let report = pyramid.render(&view, &mut surface)?;

        if let View::Level { level, .. } = view {
            println!("level {level}, {} pending region(s):", report.pending.len());
        }
        for y in 0..height {
            let row: String = (0..width)
                .map(|x| match surface.get(x, y) {
                    i if i >= 1.0 => '#',
                    i if i > 0.0 => '-',
                    _ => ' ',
                })
                .collect();
            println!("{row}");
        }

        if doc.is_settled() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    doc.close();
    Ok(())
}
