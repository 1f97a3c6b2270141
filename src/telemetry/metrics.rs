//! Throughput metering
//!
//! Counts frames written and, once per reporting interval, yields the
//! average rate over that interval.

use std::time::{Duration, Instant};

/// One periodic throughput sample
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputReport {
    /// Frames recorded since the meter started
    pub total_frames: u64,
    /// Average frames per second over the last interval
    pub fps: f64,
    /// Completed fraction of the expected total, if known
    pub progress: Option<f64>,
}

impl std::fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame {} at {:.1} fps", self.total_frames, self.fps)?;
        if let Some(progress) = self.progress {
            write!(f, " ({:.1}%)", progress * 100.0)?;
        }
        Ok(())
    }
}

/// Interval-based frame rate meter
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    interval: Duration,
    expected_total: Option<u64>,
    window_start: Option<Instant>,
    window_frames: u64,
    total_frames: u64,
}

impl ThroughputMeter {
    pub fn new(interval: Duration, expected_total: Option<u64>) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            expected_total: expected_total.filter(|n| *n > 0),
            window_start: None,
            window_frames: 0,
            total_frames: 0,
        }
    }

    /// Start timing; otherwise the first `record` starts the window
    pub fn start(&mut self, now: Instant) {
        self.window_start = Some(now);
        self.window_frames = 0;
    }

    /// Count one frame; returns a report when the interval has elapsed
    pub fn record(&mut self, now: Instant) -> Option<ThroughputReport> {
        let start = *self.window_start.get_or_insert(now);
        self.window_frames += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.interval {
            return None;
        }

        let report = ThroughputReport {
            total_frames: self.total_frames,
            fps: self.window_frames as f64 / elapsed.as_secs_f64(),
            progress: self
                .expected_total
                .map(|total| (self.total_frames as f64 / total as f64).min(1.0)),
        };
        self.window_start = Some(now);
        self.window_frames = 0;
        Some(report)
    }

    /// Whether the timing window is open
    pub fn is_started(&self) -> bool {
        self.window_start.is_some()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}
