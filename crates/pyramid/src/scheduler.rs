use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use chisel_trail::{AudioTrail, Span, TrailError};
use crossbeam_channel::{Receiver, Sender, unbounded};
use rayon::prelude::*;

use crate::level::frame_count;
use crate::summary::Summary;

/// One recompute unit: a trail snapshot plus the frame range to rebuild at
/// every level, bottom-up. Ranges are pre-widened so each level's reduction
/// finds all of its children inside the level below's range.
///
/// The snapshot keeps the covered stakes alive for the lifetime of the job;
/// edits racing ahead on the live trail cannot invalidate its reads.
pub(crate) struct Job<S: Summary> {
    pub generation: u64,
    pub cancelled: Arc<AtomicBool>,
    pub snapshot: AudioTrail,
    pub ranges: Vec<Span>,
    pub factors: Vec<i64>,
    pub base: i64,
    pub summary: S,
}

pub(crate) struct LevelResult<S: Summary> {
    pub level: usize,
    pub range: Span,
    /// Frame-major, `range.length() * channels` entries.
    pub frames: Vec<S::Frame>,
}

pub(crate) enum WorkerEvent<S: Summary> {
    /// All levels computed; results are committed on the poll thread so
    /// readers never observe a half-applied job.
    Computed {
        generation: u64,
        results: Vec<LevelResult<S>>,
    },
    /// The job noticed its cancellation flag and stopped.
    Cancelled { generation: u64 },
    Failed { generation: u64, error: String },
}

pub(crate) fn spawn_workers<S: Summary>(
    count: usize,
) -> (Sender<Job<S>>, Receiver<WorkerEvent<S>>, Vec<JoinHandle<()>>) {
    let (job_tx, job_rx) = unbounded::<Job<S>>();
    let (event_tx, event_rx) = unbounded::<WorkerEvent<S>>();
    let workers = (0..count.max(1))
        .map(|_| {
            let jobs = job_rx.clone();
            let events = event_tx.clone();
            std::thread::spawn(move || run_worker(jobs, events))
        })
        .collect();
    (job_tx, event_rx, workers)
}

fn run_worker<S: Summary>(jobs: Receiver<Job<S>>, events: Sender<WorkerEvent<S>>) {
    for job in jobs.iter() {
        let generation = job.generation;
        let event = match compute(&job) {
            Ok(Some(results)) => WorkerEvent::Computed {
                generation,
                results,
            },
            Ok(None) => WorkerEvent::Cancelled { generation },
            Err(e) => WorkerEvent::Failed {
                generation,
                error: e.to_string(),
            },
        };
        // The pyramid dropping its receiver means shutdown; nothing to do.
        if events.send(event).is_err() {
            return;
        }
    }
}

/// Build every level of a job bottom-up. Returns `None` when the job was
/// cancelled by a superseding edit.
fn compute<S: Summary>(job: &Job<S>) -> Result<Option<Vec<LevelResult<S>>>, TrailError> {
    let channels = job.snapshot.channels();
    let length = job.snapshot.len();
    let mut results: Vec<LevelResult<S>> = Vec::with_capacity(job.ranges.len());

    for (level, (&factor, &range)) in job.factors.iter().zip(job.ranges.iter()).enumerate() {
        if job.cancelled.load(Ordering::Relaxed) {
            return Ok(None);
        }
        if range.is_empty() {
            continue;
        }

        let frames = if level == 0 {
            reduce_raw_level(job, range, factor, channels, length)?
        } else {
            let below = results
                .last()
                .filter(|r| r.level == level - 1)
                .map(|r| (r.range, r.frames.as_slice()))
                .unwrap_or((Span::empty(), &[]));
            reduce_child_level(
                job,
                range,
                frame_count(length, job.factors[level - 1]),
                below,
                channels,
            )
        };
        results.push(LevelResult {
            level,
            range,
            frames,
        });
    }
    Ok(Some(results))
}

fn reduce_raw_level<S: Summary>(
    job: &Job<S>,
    range: Span,
    factor: i64,
    channels: usize,
    length: i64,
) -> Result<Vec<S::Frame>, TrailError> {
    let raw = Span::new(range.start * factor, (range.stop * factor).min(length));
    let data = read_with_retry(&job.snapshot, raw)?;
    let samples = raw.length() as usize;
    let window = factor as usize;

    let per_frame: Vec<Vec<S::Frame>> = (range.start..range.stop)
        .into_par_iter()
        .map(|i| {
            let off = ((i - range.start) as usize * window).min(samples);
            let end = (off + window).min(samples);
            (0..channels)
                .map(|ch| job.summary.reduce_raw(&data[ch][off..end]))
                .collect()
        })
        .collect();
    Ok(per_frame.into_iter().flatten().collect())
}

fn reduce_child_level<S: Summary>(
    job: &Job<S>,
    range: Span,
    child_count: i64,
    (below_range, below): (Span, &[S::Frame]),
    channels: usize,
) -> Vec<S::Frame> {
    let mut out = Vec::with_capacity(range.length() as usize * channels);
    for i in range.start..range.stop {
        let kids = Span::new(i * job.base, ((i + 1) * job.base).min(child_count))
            .intersect(&below_range);
        for ch in 0..channels {
            let children: Vec<S::Frame> = (kids.start..kids.stop)
                .map(|j| below[(j - below_range.start) as usize * channels + ch].clone())
                .collect();
            out.push(job.summary.reduce_children(&children));
        }
    }
    out
}

/// Transient IO failures (a source file briefly unavailable) get one retry
/// before the job is reported as failed.
fn read_with_retry(trail: &AudioTrail, span: Span) -> Result<Vec<Vec<f32>>, TrailError> {
    match trail.read_all(span) {
        Err(TrailError::Io(e)) => {
            log::debug!("retrying pyramid read of {span} after io error: {e}");
            trail.read_all(span)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::WaveSummary;

    fn job(snapshot: AudioTrail, ranges: Vec<Span>) -> Job<WaveSummary> {
        Job {
            generation: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            snapshot,
            ranges,
            factors: vec![4, 16],
            base: 4,
            summary: WaveSummary,
        }
    }

    #[test]
    fn test_compute_builds_levels_bottom_up() {
        let mut trail = AudioTrail::silent(64, 1, 48_000);
        trail
            .overwrite(Span::new(0, 64), &[vec![0.5; 64]], None)
            .expect("fill");

        let results = compute(&job(trail, vec![Span::new(0, 16), Span::new(0, 4)]))
            .expect("compute")
            .expect("not cancelled");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].frames.len(), 16);
        assert_eq!(results[1].frames.len(), 4);
        assert!(results[1].frames.iter().all(|f| f.max == 0.5 && f.min == 0.5));
    }

    #[test]
    fn test_compute_partial_last_window() {
        // 10 raw frames at factor 4: the last level-0 window has 2 samples.
        let trail = AudioTrail::silent(10, 1, 48_000);
        let results = compute(&job(trail, vec![Span::new(0, 3), Span::new(0, 1)]))
            .expect("compute")
            .expect("not cancelled");
        assert_eq!(results[0].frames.len(), 3);
        assert_eq!(results[1].frames.len(), 1);
    }

    #[test]
    fn test_cancelled_job_stops_early() {
        let trail = AudioTrail::silent(64, 1, 48_000);
        let job = job(trail, vec![Span::new(0, 16), Span::new(0, 4)]);
        job.cancelled.store(true, Ordering::Relaxed);
        assert!(compute(&job).expect("compute").is_none());
    }

    #[test]
    fn test_widened_range_covers_parent_children() {
        let mut trail = AudioTrail::silent(256, 1, 48_000);
        trail
            .overwrite(Span::new(60, 68), &[vec![1.0; 8]], None)
            .expect("edit");

        // Parent frame 3 at factor 16 needs children 12..16 at factor 4.
        let results = compute(&job(trail, vec![Span::new(12, 17), Span::new(3, 5)]))
            .expect("compute")
            .expect("not cancelled");
        let parents = &results[1];
        assert_eq!(parents.range, Span::new(3, 5));
        assert_eq!(parents.frames[0].max, 1.0, "peak visible at coarse level");
    }
}
