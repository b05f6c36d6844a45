//! Progress parsing and estimation.
//!
//! The encoder writes `key=value` lines to stdout in blocks that end with
//! `progress=continue` or `progress=end`. [`ProgressParser`] folds those lines
//! into [`ProgressBlock`]s, [`ProgressEstimator`] turns frame counts into a
//! smoothed throughput and a time-remaining figure, and [`ProgressTracker`]
//! glues both together for a single job.

use crate::probe::MediaInfo;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One accumulated progress block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressBlock {
    pub frame: Option<u64>,
    /// Output timestamp reached so far.
    pub out_time: Option<Duration>,
    pub fps: Option<f64>,
    /// Encoding speed relative to real time.
    pub speed: Option<f64>,
    /// Set when the block was closed by `progress=end`.
    pub end: bool,
}

impl ProgressBlock {
    fn is_empty(&self) -> bool {
        self.frame.is_none() && self.out_time.is_none()
    }
}

/// Line-oriented accumulator for the encoder's progress stream.
///
/// A block is emitted when a `progress=` line arrives, when a second `frame=`
/// line shows up while one is already pending, or on [`ProgressParser::finish`].
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: ProgressBlock,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a completed block if this line closed one.
    pub fn feed(&mut self, line: &str) -> Option<ProgressBlock> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "frame" => {
                let frame = leading_number(value)?.parse::<u64>().ok()?;
                if self.pending.frame.is_some() {
                    let flushed = std::mem::take(&mut self.pending);
                    self.pending.frame = Some(frame);
                    return Some(flushed);
                }
                self.pending.frame = Some(frame);
            }
            // out_time_ms is also microseconds, a long-standing encoder quirk
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.pending.out_time = Some(Duration::from_micros(us));
                }
            }
            "out_time" => {
                if self.pending.out_time.is_none() {
                    self.pending.out_time = parse_timestamp(value);
                }
            }
            "fps" => self.pending.fps = value.parse().ok(),
            "speed" => self.pending.speed = value.trim_end_matches('x').trim().parse().ok(),
            "progress" => {
                self.pending.end = value == "end";
                let flushed = std::mem::take(&mut self.pending);
                if !flushed.is_empty() {
                    return Some(flushed);
                }
            }
            _ => {}
        }
        None
    }

    /// Flush whatever is pending at end of stream.
    pub fn finish(&mut self) -> Option<ProgressBlock> {
        let flushed = std::mem::take(&mut self.pending);
        if flushed.is_empty() {
            None
        } else {
            Some(flushed)
        }
    }
}

fn leading_number(value: &str) -> Option<&str> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if end == 0 {
        None
    } else {
        Some(&value[..end])
    }
}

/// Parse `HH:MM:SS.ffffff`. Values that do not fit a [`Duration`] are rejected.
fn parse_timestamp(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    let fraction = Duration::try_from_secs_f64(seconds).ok()?;
    Duration::from_secs(whole).checked_add(fraction)
}

/// Sliding-window throughput estimator.
///
/// Keeps the last `window` frame deltas and time deltas and recomputes
/// throughput as their ratio every `recompute_every` samples, starting with
/// the first one. Between recomputations the previous figure is reused.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    frame_deltas: Vec<u64>,
    time_deltas: Vec<f64>,
    cursor: usize,
    filled: usize,
    recompute_every: u64,
    samples: u64,
    last_frame: u64,
    last_elapsed: Duration,
    throughput: f64,
    expected_total: Option<u64>,
}

impl ProgressEstimator {
    pub fn new(window: usize, recompute_every: usize) -> Self {
        let window = window.max(1);
        Self {
            frame_deltas: vec![0; window],
            time_deltas: vec![0.0; window],
            cursor: 0,
            filled: 0,
            recompute_every: recompute_every.max(1) as u64,
            samples: 0,
            last_frame: 0,
            last_elapsed: Duration::ZERO,
            throughput: 0.0,
            expected_total: None,
        }
    }

    pub fn with_expected_total(mut self, expected_total: Option<u64>) -> Self {
        self.expected_total = expected_total;
        self
    }

    pub fn expected_total(&self) -> Option<u64> {
        self.expected_total
    }

    /// Record a sample: frames encoded so far and time since start.
    pub fn record(&mut self, frame: u64, elapsed: Duration) {
        let frame_delta = frame.saturating_sub(self.last_frame);
        let time_delta = elapsed.saturating_sub(self.last_elapsed).as_secs_f64();

        self.frame_deltas[self.cursor] = frame_delta;
        self.time_deltas[self.cursor] = time_delta;
        self.cursor = (self.cursor + 1) % self.frame_deltas.len();
        self.filled = (self.filled + 1).min(self.frame_deltas.len());

        if self.samples % self.recompute_every == 0 {
            self.recompute();
        }
        self.samples += 1;
        self.last_frame = frame.max(self.last_frame);
        self.last_elapsed = elapsed.max(self.last_elapsed);
    }

    fn recompute(&mut self) {
        let frames: u64 = self.frame_deltas[..self.filled].iter().sum();
        let secs: f64 = self.time_deltas[..self.filled].iter().sum();
        self.throughput = if secs > 0.0 { frames as f64 / secs } else { 0.0 };
    }

    /// Current smoothed throughput in frames per second.
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    /// Estimated time left, never negative. Zero while throughput or the
    /// expected total is unknown; saturates at [`Duration::MAX`].
    pub fn remaining(&self) -> Duration {
        match self.expected_total {
            Some(total) if self.throughput > 0.0 => {
                let left = total.saturating_sub(self.last_frame) as f64;
                Duration::try_from_secs_f64(left / self.throughput).unwrap_or(Duration::MAX)
            }
            _ => Duration::ZERO,
        }
    }
}

/// Expected number of frames the encoder will write.
///
/// With a frame-rate change, this is duration x target rate (or the input
/// frame count scaled by the rate ratio when the duration is unknown).
/// Without one, it is the input frame count.
pub fn expected_output_frames(info: &MediaInfo, target_fps: Option<f64>) -> Option<u64> {
    let target = match target_fps {
        Some(fps) if fps > 0.0 => fps,
        _ => return info.input_frames(),
    };

    if let Some(duration) = info.duration_secs.filter(|d| *d > 0.0) {
        return Some((duration * target).round() as u64);
    }
    match (info.input_frames(), info.fps()) {
        (Some(frames), Some(source)) => Some((frames as f64 * target / source).round() as u64),
        _ => None,
    }
}

/// Completion percentage in `[0, 100]`.
///
/// Prefers the frame ratio and falls back to output time over input duration.
pub fn percent_complete(
    frame: u64,
    expected_frames: Option<u64>,
    out_time: Option<Duration>,
    duration_secs: Option<f64>,
) -> f64 {
    let ratio = match (expected_frames, out_time, duration_secs) {
        (Some(total), _, _) if total > 0 => frame as f64 / total as f64,
        (_, Some(out), Some(duration)) if duration > 0.0 => out.as_secs_f64() / duration,
        _ => 0.0,
    };
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// Point-in-time view of a running job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub frame: u64,
    pub expected_frames: Option<u64>,
    pub percent: f64,
    /// Smoothed frames per second.
    pub throughput: f64,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub out_time_secs: Option<f64>,
    /// Instantaneous rate reported by the encoder itself.
    pub encoder_fps: Option<f64>,
    pub speed: Option<f64>,
}

/// Per-job progress state: parser, estimator and clock.
#[derive(Debug)]
pub struct ProgressTracker {
    parser: ProgressParser,
    estimator: ProgressEstimator,
    duration_secs: Option<f64>,
    started: Instant,
    last: Option<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(
        info: &MediaInfo,
        target_fps: Option<f64>,
        window: usize,
        recompute_every: usize,
        started: Instant,
    ) -> Self {
        let estimator = ProgressEstimator::new(window, recompute_every)
            .with_expected_total(expected_output_frames(info, target_fps));
        Self {
            parser: ProgressParser::new(),
            estimator,
            duration_secs: info.duration_secs,
            started,
            last: None,
        }
    }

    /// Feed an output line observed at `now`.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<ProgressSnapshot> {
        let block = self.parser.feed(line)?;
        Some(self.apply(block, now))
    }

    /// Flush the final block at end of stream.
    pub fn finish(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        let block = self.parser.finish()?;
        Some(self.apply(block, now))
    }

    /// Most recent snapshot produced.
    pub fn last(&self) -> Option<&ProgressSnapshot> {
        self.last.as_ref()
    }

    fn apply(&mut self, block: ProgressBlock, now: Instant) -> ProgressSnapshot {
        let elapsed = now.saturating_duration_since(self.started);
        let frame = block
            .frame
            .or_else(|| self.last.as_ref().map(|s| s.frame))
            .unwrap_or(0);

        if block.frame.is_some() {
            self.estimator.record(frame, elapsed);
        }

        let expected_frames = self.estimator.expected_total();
        let percent = if block.end {
            100.0
        } else {
            percent_complete(frame, expected_frames, block.out_time, self.duration_secs)
        };

        let snapshot = ProgressSnapshot {
            frame,
            expected_frames,
            percent,
            throughput: self.estimator.throughput(),
            elapsed_secs: elapsed.as_secs_f64(),
            remaining_secs: if block.end {
                0.0
            } else {
                self.estimator.remaining().as_secs_f64()
            },
            out_time_secs: block.out_time.map(|d| d.as_secs_f64()),
            encoder_fps: block.fps,
            speed: block.speed,
        };
        self.last = Some(snapshot.clone());
        snapshot
    }
}
