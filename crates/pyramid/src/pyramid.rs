use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use chisel_trail::{AudioTrail, Span, TrailEvent};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::PyramidError;
use crate::level::{Level, outward};
use crate::scheduler::{Job, WorkerEvent, spawn_workers};
use crate::summary::Summary;
use crate::view::{RenderReport, RenderTarget, View};

/// Pyramid shape and scheduling knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Decimation ratio between adjacent levels. Level `k` summarizes
    /// `base^(k + 1)` raw frames per summary frame.
    pub base: i64,
    /// Number of stored levels.
    pub levels: usize,
    /// Recompute worker threads.
    pub workers: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            base: 4,
            levels: 6,
            workers: 1,
        }
    }
}

/// Callback surface for recompute campaigns. A campaign spans all jobs
/// between two idle states; listeners run on the thread that calls
/// [`Pyramid::poll`].
pub trait AsyncListener: Send {
    fn on_progress(&mut self, _fraction: f32) {}
    /// Fired once per campaign; `error` carries the first failure, if any.
    fn on_finished(&mut self, error: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Ticket {
    generation: u64,
    /// Raw span the job recomputes; containment by a newer edit supersedes.
    raw_span: Span,
    /// Per-level frame ranges, kept to downgrade dirty state on failure.
    ranges: Vec<Span>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct Campaign {
    total: usize,
    done: usize,
    first_error: Option<String>,
}

/// Multi-resolution summary of an [`AudioTrail`], kept current by a
/// background worker pool.
///
/// The pyramid never holds the trail; the owner forwards [`TrailEvent`]s via
/// [`on_trail_modified`](Self::on_trail_modified) and pumps results with
/// [`poll`](Self::poll). All reads and commits happen on the polling thread,
/// so queries always observe whole frames.
pub struct Pyramid<S: Summary> {
    summary: S,
    config: PyramidConfig,
    channels: usize,
    length: i64,
    levels: Vec<Level<S>>,
    job_tx: Option<Sender<Job<S>>>,
    event_rx: Receiver<WorkerEvent<S>>,
    workers: Vec<JoinHandle<()>>,
    tickets: Vec<Ticket>,
    /// Finished work waiting for every older job to land first; commits
    /// apply strictly in enqueue order.
    ready: BTreeMap<u64, WorkerEvent<S>>,
    next_generation: u64,
    campaign: Campaign,
    listeners: Vec<(ListenerId, Box<dyn AsyncListener>)>,
    next_listener: u64,
}

impl<S: Summary> Pyramid<S> {
    /// Build a pyramid over the trail's current content. Storage is sized
    /// immediately; a job computing every level is queued right away.
    pub fn new(summary: S, trail: &AudioTrail, config: PyramidConfig) -> Result<Self, PyramidError> {
        if config.base < 2 {
            return Err(PyramidError::InvalidArgument("pyramid base must be at least 2"));
        }
        if config.levels == 0 {
            return Err(PyramidError::InvalidArgument("pyramid needs at least one level"));
        }
        let mut factors = Vec::with_capacity(config.levels);
        let mut factor = config.base;
        for _ in 0..config.levels {
            factors.push(factor);
            factor = factor
                .checked_mul(config.base)
                .ok_or(PyramidError::InvalidArgument("pyramid factor overflows"))?;
        }

        let channels = trail.channels();
        let length = trail.len();
        let levels = factors
            .iter()
            .map(|&f| Level::new(f, channels, length, &summary))
            .collect();

        let (job_tx, event_rx, workers) = spawn_workers(config.workers);
        let mut pyramid = Self {
            summary,
            config,
            channels,
            length,
            levels,
            job_tx: Some(job_tx),
            event_rx,
            workers,
            tickets: Vec::new(),
            ready: BTreeMap::new(),
            next_generation: 0,
            campaign: Campaign::default(),
            listeners: Vec::new(),
            next_listener: 0,
        };
        let initial: Vec<Span> = pyramid
            .levels
            .iter()
            .map(|l| Span::new(0, l.count()))
            .collect();
        pyramid.enqueue(trail, &initial);
        Ok(pyramid)
    }

    pub fn len(&self) -> i64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Decimation factor of stored level `level`.
    pub fn factor(&self, level: usize) -> i64 {
        self.levels[level].factor
    }

    /// Whether any recompute work is queued or running.
    pub fn is_idle(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Absorb one trail mutation: resize level storage, mark the smallest
    /// affected frame ranges dirty, and queue a recompute job over them.
    ///
    /// `trail` must be the trail the event came from, after the mutation; a
    /// cheap clone of it becomes the job's read snapshot.
    pub fn on_trail_modified(&mut self, event: &TrailEvent, trail: &AudioTrail) {
        self.length += event.length_delta;
        debug_assert_eq!(self.length, trail.len());

        if event.length_delta != 0 {
            // In-flight jobs whose range reaches the edit carry pre-resize
            // frame indices; their results must not land. The cutoff aligns
            // down to the coarsest factor: a coarse frame straddling the
            // edit point gets rebuilt by the resize even though part of its
            // raw extent lies before the edit.
            let top_factor = self.levels.last().map_or(1, |l| l.factor);
            let safe_stop = (event.span.start / top_factor) * top_factor;
            for ticket in &self.tickets {
                if ticket.raw_span.stop > safe_stop
                    && !ticket.cancelled.swap(true, Ordering::Relaxed)
                {
                    log::debug!(
                        "cancelling job {} ({}): length change at {} shifted its frames",
                        ticket.generation,
                        ticket.raw_span,
                        event.span.start
                    );
                }
            }
        }

        let mut pending = Vec::with_capacity(self.levels.len());
        for level in &mut self.levels {
            let p = if event.length_delta != 0 {
                level.resize(event, self.length, &self.summary);
                // One replacement job re-covers everything still pending at
                // this level, including the ranges orphaned above (their
                // marks were shifted along with the storage).
                hull(&level.dirty.pending_in(Span::new(0, level.count())))
            } else {
                let p = outward(event.span, level.factor).intersect(&Span::new(0, level.count()));
                level.dirty.mark(p);
                p
            };
            pending.push(p);
        }
        self.enqueue(trail, &pending);
    }

    /// Pump finished work: commit computed frames, clear dirty ranges, and
    /// notify campaign listeners. Call from the thread that queries.
    pub fn poll(&mut self) {
        for event in self.event_rx.try_iter() {
            let generation = match &event {
                WorkerEvent::Computed { generation, .. }
                | WorkerEvent::Cancelled { generation }
                | WorkerEvent::Failed { generation, .. } => *generation,
            };
            self.ready.insert(generation, event);
        }

        // Apply in enqueue order: with several workers an older overlapping
        // job may finish after a newer one, and committing it late would
        // overwrite the newer frames. Its result waits in `ready` instead.
        let mut applied = false;
        while let Some(generation) = self.tickets.first().map(|t| t.generation) {
            let Some(event) = self.ready.remove(&generation) else {
                break;
            };
            self.apply(event);
            applied = true;
        }
        if !applied {
            return;
        }

        if self.campaign.total > 0 {
            let fraction = self.campaign.done as f32 / self.campaign.total as f32;
            for (_, listener) in &mut self.listeners {
                listener.on_progress(fraction);
            }
            if self.tickets.is_empty() && self.campaign.done == self.campaign.total {
                let error = self.campaign.first_error.take();
                for (_, listener) in &mut self.listeners {
                    listener.on_finished(error.as_deref());
                }
                self.campaign = Campaign::default();
            }
        }
    }

    /// The coarsest stored level that still yields at least one summary
    /// frame per pixel column, or the instruction to read raw samples when
    /// even level 0 is finer than the view.
    pub fn best_level(&self, span: Span, pixel_width: usize) -> Result<View, PyramidError> {
        if pixel_width == 0 {
            return Err(PyramidError::InvalidArgument("pixel width must be positive"));
        }
        let bounds = Span::new(0, self.length);
        let clipped = span.intersect(&bounds);
        if clipped.is_empty() {
            return Err(PyramidError::OutOfRange {
                span,
                length: self.length,
            });
        }
        for level in (0..self.levels.len()).rev() {
            let frames = outward(clipped, self.levels[level].factor);
            if frames.length() >= pixel_width as i64 {
                return Ok(View::Level {
                    level,
                    span: clipped,
                    frames,
                    frames_per_pixel: frames.length() as f64 / pixel_width as f64,
                });
            }
        }
        Ok(View::Raw { span: clipped })
    }

    /// Draw a level view onto `target`, one reduced frame per pixel column.
    /// Channels are folded together. The report lists what could not be
    /// drawn from valid frames yet, in raw coordinates.
    pub fn render(
        &self,
        view: &View,
        target: &mut dyn RenderTarget,
    ) -> Result<RenderReport, PyramidError> {
        let View::Level {
            level,
            span,
            frames,
            frames_per_pixel,
        } = view
        else {
            return Err(PyramidError::InvalidArgument(
                "raw views are read from the trail, not the pyramid",
            ));
        };
        let level = self
            .levels
            .get(*level)
            .ok_or(PyramidError::InvalidArgument("level index out of range"))?;

        let width = target.width();
        for x in 0..width {
            let lo = frames.start + ((x as f64) * frames_per_pixel).floor() as i64;
            let hi = (frames.start + (((x + 1) as f64) * frames_per_pixel).ceil() as i64)
                .min(frames.stop)
                .max(lo + 1)
                .min(level.count());
            if lo >= hi {
                continue;
            }
            let mut children = Vec::with_capacity(((hi - lo) as usize) * self.channels);
            for i in lo..hi {
                for ch in 0..self.channels {
                    children.push(level.frame(i, ch).clone());
                }
            }
            let reduced = self.summary.reduce_children(&children);
            self.summary.paint(&reduced, x, target);
        }

        let mut report = RenderReport::default();
        for (hit, state) in level.dirty.pending_in(*frames) {
            let raw = Span::new(hit.start * level.factor, hit.stop * level.factor).intersect(span);
            if raw.is_empty() {
                continue;
            }
            match state {
                crate::dirty::PendingState::Recomputing => report.pending.push(raw),
                crate::dirty::PendingState::Errored => report.errored.push(raw),
            }
        }
        Ok(report)
    }

    pub fn add_async_listener(&mut self, listener: Box<dyn AsyncListener>) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_async_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Cancel outstanding work and join the worker threads. Called on drop;
    /// explicit shutdown just makes the join point visible.
    pub fn shutdown(&mut self) {
        for ticket in &self.tickets {
            ticket.cancelled.store(true, Ordering::Relaxed);
        }
        self.job_tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn enqueue(&mut self, trail: &AudioTrail, pending: &[Span]) {
        let ranges = self.widen(pending);
        if ranges.iter().all(|r| r.is_empty()) {
            return;
        }
        let factor0 = self.levels[0].factor;
        let raw_span = Span::new(ranges[0].start * factor0, ranges[0].stop * factor0)
            .intersect(&Span::new(0, self.length));

        for ticket in &self.tickets {
            if raw_span.contains_span(&ticket.raw_span)
                && !ticket.cancelled.swap(true, Ordering::Relaxed)
            {
                log::debug!(
                    "superseding job {} ({}) with wider recompute of {raw_span}",
                    ticket.generation,
                    ticket.raw_span
                );
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = Job {
            generation,
            cancelled: cancelled.clone(),
            snapshot: trail.clone(),
            ranges: ranges.clone(),
            factors: self.levels.iter().map(|l| l.factor).collect(),
            base: self.config.base,
            summary: self.summary.clone(),
        };
        let sent = match &self.job_tx {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            log::error!("recompute worker pool is gone; pyramid stays stale");
            return;
        }
        self.tickets.push(Ticket {
            generation,
            raw_span,
            ranges,
            cancelled,
        });
        self.campaign.total += 1;
    }

    /// Widen per-level dirty ranges top-down so every level's reduction
    /// finds its children inside the level below's computed range.
    fn widen(&self, pending: &[Span]) -> Vec<Span> {
        let mut ranges = vec![Span::empty(); self.levels.len()];
        for k in (0..self.levels.len()).rev() {
            let mut r = pending[k];
            if k + 1 < self.levels.len() {
                let above = ranges[k + 1];
                if !above.is_empty() {
                    r = r.union(&Span::new(
                        above.start * self.config.base,
                        above.stop * self.config.base,
                    ));
                }
            }
            ranges[k] = r.intersect(&Span::new(0, self.levels[k].count()));
        }
        ranges
    }

    fn apply(&mut self, event: WorkerEvent<S>) {
        match event {
            WorkerEvent::Computed { generation, results } => {
                if let Some(ticket) = self.take_ticket(generation) {
                    if !ticket.cancelled.load(Ordering::Relaxed) {
                        for r in results {
                            self.levels[r.level].commit(r.range, r.frames);
                        }
                    }
                    self.campaign.done += 1;
                }
            }
            WorkerEvent::Cancelled { generation } => {
                if self.take_ticket(generation).is_some() {
                    self.campaign.done += 1;
                }
            }
            WorkerEvent::Failed { generation, error } => {
                if let Some(ticket) = self.take_ticket(generation) {
                    log::warn!("recompute of {} failed: {error}", ticket.raw_span);
                    if !ticket.cancelled.load(Ordering::Relaxed) {
                        for (level, range) in self.levels.iter_mut().zip(&ticket.ranges) {
                            level.dirty.mark_errored(*range);
                        }
                    }
                    self.campaign.done += 1;
                    if self.campaign.first_error.is_none() {
                        self.campaign.first_error = Some(error);
                    }
                }
            }
        }
    }

    fn take_ticket(&mut self, generation: u64) -> Option<Ticket> {
        let idx = self.tickets.iter().position(|t| t.generation == generation)?;
        Some(self.tickets.remove(idx))
    }
}

/// Bounding span of a level's pending ranges, in order.
fn hull(ranges: &[(Span, crate::dirty::PendingState)]) -> Span {
    match (ranges.first(), ranges.last()) {
        (Some((first, _)), Some((last, _))) => Span::new(first.start, last.stop),
        _ => Span::empty(),
    }
}

impl<S: Summary> Drop for Pyramid<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::WaveSummary;
    use crate::view::PixelSurface;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn pump<S: Summary>(pyramid: &mut Pyramid<S>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pyramid.is_idle() {
            pyramid.poll();
            assert!(Instant::now() < deadline, "recompute did not settle");
            std::thread::sleep(Duration::from_millis(1));
        }
        pyramid.poll();
    }

    fn wave_pyramid(trail: &AudioTrail) -> Pyramid<WaveSummary> {
        Pyramid::new(WaveSummary, trail, PyramidConfig::default()).expect("pyramid")
    }

    #[test]
    fn test_initial_build_settles_clean() {
        let trail = AudioTrail::silent(100_000, 2, 48_000);
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(0, 100_000), 100).expect("view");
        let mut surface = PixelSurface::new(100, 64);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.is_complete());
    }

    #[test]
    fn test_best_level_picks_coarsest_sufficient() {
        let trail = AudioTrail::silent(1_000_000, 1, 48_000);
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        // 1M frames over 1000 px: level 2 (factor 64) gives ~15625 frames,
        // level 3 (factor 256) gives ~3906, level 4 (factor 1024) only 977.
        let view = pyramid.best_level(Span::new(0, 1_000_000), 1000).expect("view");
        match view {
            View::Level { level, .. } => assert_eq!(level, 3),
            View::Raw { .. } => panic!("expected a stored level"),
        }
    }

    #[test]
    fn test_narrow_view_falls_back_to_raw() {
        let trail = AudioTrail::silent(10_000, 1, 48_000);
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(100, 300), 800).expect("view");
        assert_eq!(view, View::Raw { span: Span::new(100, 300) });
    }

    #[test]
    fn test_view_span_is_clipped_to_length() {
        let trail = AudioTrail::silent(10_000, 1, 48_000);
        let mut pyramid = wave_pyramid(&trail);
        let view = pyramid.best_level(Span::new(5_000, 50_000), 10).expect("view");
        assert_eq!(view.span(), Span::new(5_000, 10_000));
        assert!(matches!(
            pyramid.best_level(Span::new(20_000, 30_000), 10),
            Err(PyramidError::OutOfRange { .. })
        ));
        pyramid.shutdown();
    }

    #[test]
    fn test_edit_dirties_then_recomputes() {
        let mut trail = AudioTrail::silent(100_000, 1, 48_000);
        let events = trail.subscribe();
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        trail
            .overwrite(Span::new(40_000, 41_000), &[vec![0.8; 1000]], None)
            .expect("overwrite");
        let event = events.try_recv().expect("event");
        pyramid.on_trail_modified(&event, &trail);

        // Straight after the edit the touched region reports pending.
        let view = pyramid.best_level(Span::new(0, 100_000), 50).expect("view");
        let mut surface = PixelSurface::new(50, 32);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(!report.is_complete());
        assert!(report.pending.iter().any(|s| s.overlaps(&Span::new(40_000, 41_000))));

        pump(&mut pyramid);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.is_complete());
        // The edited region now lights up at the column it maps to.
        let column = 50 * 40_500 / 100_000;
        assert!(surface.column_peak(column) > 0.0);
    }

    #[test]
    fn test_insert_resizes_pyramid() {
        let mut trail = AudioTrail::silent(100_000, 1, 48_000);
        let events = trail.subscribe();
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        trail.insert(50_000, &[vec![0.5; 500]]).expect("insert");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        assert_eq!(pyramid.len(), 100_500);
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(0, 100_500), 100).expect("view");
        let mut surface = PixelSurface::new(100, 32);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.is_complete());
    }

    #[test]
    fn test_containing_edit_supersedes_queued_job() {
        let mut trail = AudioTrail::silent(200_000, 1, 48_000);
        let events = trail.subscribe();
        let mut pyramid = wave_pyramid(&trail);

        trail
            .overwrite(Span::new(50_000, 51_000), &[vec![0.5; 1000]], None)
            .expect("first edit");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        let first = pyramid.tickets.last().expect("ticket").cancelled.clone();

        trail
            .overwrite(Span::new(40_000, 60_000), &[vec![-0.5; 20_000]], None)
            .expect("containing edit");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);

        assert!(first.load(Ordering::Relaxed), "inner job is superseded");
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(0, 200_000), 100).expect("view");
        let mut surface = PixelSurface::new(100, 32);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.is_complete());
    }

    #[test]
    fn test_length_change_cancels_inflight_jobs() {
        let mut trail = AudioTrail::silent(200_000, 1, 48_000);
        let events = trail.subscribe();
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        trail
            .overwrite(Span::new(150_000, 151_000), &[vec![0.5; 1000]], None)
            .expect("overwrite");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        let first = pyramid.tickets.last().expect("ticket").cancelled.clone();

        // The insert shifts the overwritten region before its job publishes;
        // committing that job would land frames at stale indices.
        trail.insert(10_000, &[vec![0.0; 500]]).expect("insert");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        assert!(first.load(Ordering::Relaxed), "stale-index job is cancelled");

        pump(&mut pyramid);
        assert!(pyramid.levels[0].dirty.is_empty(), "no stranded pending ranges");
        // The burst now sits at [150_500, 151_500).
        assert_eq!(pyramid.levels[0].frame(37_700, 0).max, 0.5);
        assert_eq!(pyramid.levels[0].frame(37_500, 0).max, 0.0);
    }

    #[test]
    fn test_overlapping_jobs_commit_in_order() {
        let config = PyramidConfig { workers: 4, ..Default::default() };
        let mut trail = AudioTrail::silent(200_000, 1, 48_000);
        let events = trail.subscribe();
        let mut pyramid = Pyramid::new(WaveSummary, &trail, config).expect("pyramid");
        pump(&mut pyramid);

        // Overlapping but not nested, so neither job supersedes the other;
        // with several workers either may finish first.
        trail
            .overwrite(Span::new(50_000, 150_000), &[vec![0.5; 100_000]], None)
            .expect("first");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        trail
            .overwrite(Span::new(100_000, 180_000), &[vec![-0.5; 80_000]], None)
            .expect("second");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        pump(&mut pyramid);

        // The overlap holds the second edit's content whichever worker won.
        for frame in [25_000, 30_000, 37_000] {
            assert_eq!(pyramid.levels[0].frame(frame, 0).max, -0.5);
            assert_eq!(pyramid.levels[0].frame(frame, 0).min, -0.5);
        }
    }

    #[test]
    fn test_failed_read_marks_errored_and_recovers() {
        use chisel_trail::{AudioStake, FileSource, SampleFormat};
        use std::fs::File;
        use std::io::Write;

        struct Recorder(std::sync::Arc<Mutex<Vec<Option<String>>>>);
        impl AsyncListener for Recorder {
            fn on_finished(&mut self, error: Option<&str>) {
                self.0.lock().unwrap().push(error.map(String::from));
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("take.pcm");
        let mut f = File::create(&path).expect("create");
        for _ in 0..8192 {
            f.write_all(&0.25f32.to_le_bytes()).expect("write");
        }
        drop(f);

        let source = FileSource::new(File::open(&path).expect("open"), 0, SampleFormat::F32, 1);
        let stake = AudioStake::from_file(Span::new(0, 8192), source, 0);
        let mut trail = AudioTrail::from_stakes(vec![stake], 1, 48_000).expect("trail");
        let events = trail.subscribe();

        // Truncate the backing file so every read fails; the initial build
        // job fails after its retry.
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("reopen")
            .set_len(0)
            .expect("truncate");

        let mut pyramid = wave_pyramid(&trail);
        let finishes = std::sync::Arc::new(Mutex::new(Vec::new()));
        pyramid.add_async_listener(Box::new(Recorder(finishes.clone())));
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(0, 8192), 4).expect("view");
        let mut surface = PixelSurface::new(4, 8);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.pending.is_empty());
        assert!(!report.errored.is_empty(), "failed ranges surface as errored");
        // Placeholder frames render as silence, never garbage: the 0.25
        // content would land on row 3 of an 8-row surface.
        for x in 0..4 {
            assert_eq!(surface.get(x, 3), 0.0);
        }
        assert_eq!(finishes.lock().unwrap().len(), 1);
        assert!(finishes.lock().unwrap()[0].is_some(), "campaign reports the failure");

        // A later edit re-dirties the range and recomputes it from the new
        // in-memory content; the error does not stick.
        trail
            .overwrite(Span::new(0, 8192), &[vec![0.25; 8192]], None)
            .expect("overwrite");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.errored.is_empty(), "re-dirtied ranges go back to pending");
        assert!(!report.pending.is_empty());

        pump(&mut pyramid);
        let report = pyramid.render(&view, &mut surface).expect("render");
        assert!(report.is_complete());
        assert!((0..4).all(|x| surface.get(x, 3) > 0.0));
        let finishes = finishes.lock().unwrap();
        assert_eq!(finishes.len(), 2);
        assert!(finishes[1].is_none(), "recovered campaign finishes clean");
    }

    #[test]
    fn test_recompute_of_valid_range_is_identical() {
        let mut trail = AudioTrail::silent(50_000, 1, 48_000);
        trail
            .overwrite(
                Span::new(0, 50_000),
                &[(0..50_000).map(|i| ((i % 997) as f32 / 997.0) - 0.5).collect()],
                None,
            )
            .expect("fill");
        let events = trail.subscribe();
        let mut pyramid = wave_pyramid(&trail);
        pump(&mut pyramid);

        let view = pyramid.best_level(Span::new(0, 50_000), 200).expect("view");
        let mut before = PixelSurface::new(200, 64);
        pyramid.render(&view, &mut before).expect("render");

        // Overwrite a range with its own content: a full recompute of
        // already-valid frames.
        let old = trail.read_all(Span::new(10_000, 20_000)).expect("read");
        trail
            .overwrite(Span::new(10_000, 20_000), &old, None)
            .expect("rewrite");
        pyramid.on_trail_modified(&events.try_recv().expect("event"), &trail);
        pump(&mut pyramid);

        let mut after = PixelSurface::new(200, 64);
        pyramid.render(&view, &mut after).expect("render");
        for x in 0..200 {
            for y in 0..64 {
                assert_eq!(before.get(x, y), after.get(x, y));
            }
        }
    }

    #[test]
    fn test_campaign_listener_fires_once() {
        struct Recorder(std::sync::Arc<Mutex<Vec<String>>>);
        impl AsyncListener for Recorder {
            fn on_progress(&mut self, fraction: f32) {
                self.0.lock().unwrap().push(format!("progress {fraction:.1}"));
            }
            fn on_finished(&mut self, error: Option<&str>) {
                assert!(error.is_none());
                self.0.lock().unwrap().push("finished".into());
            }
        }

        let trail = AudioTrail::silent(10_000, 1, 48_000);
        let mut pyramid = wave_pyramid(&trail);
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let id = pyramid.add_async_listener(Box::new(Recorder(log.clone())));
        pump(&mut pyramid);

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries.iter().filter(|e| *e == "finished").count(), 1);
        assert!(entries.iter().any(|e| e.starts_with("progress")));

        assert!(pyramid.remove_async_listener(id));
        assert!(!pyramid.remove_async_listener(id));
    }

    #[test]
    fn test_config_validation() {
        let trail = AudioTrail::silent(10, 1, 48_000);
        let bad = PyramidConfig { base: 1, ..Default::default() };
        assert!(matches!(
            Pyramid::new(WaveSummary, &trail, bad),
            Err(PyramidError::InvalidArgument(_))
        ));
    }
}
