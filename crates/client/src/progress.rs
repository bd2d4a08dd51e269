//! Progress accounting for one submission attempt.
//!
//! The transport reports a cumulative count of bytes handed to the wire.
//! [`ProgressMeter`] turns each report into a [`ProgressSnapshot`]:
//! overall position in the file (the attempt may have started at a
//! resume offset), completion percentage, and a throughput estimate over
//! a recent window of reports, from which the time remaining is derived.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which throughput is averaged.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Upper bound on retained reports.
const MAX_REPORTS: usize = 100;

/// One progress reading, ready to attach to an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes of the file accounted for: resume offset plus bytes sent
    /// this attempt.
    pub loaded: u64,
    /// Total file size in bytes.
    pub total: u64,
    /// `loaded / total`, as a percentage. 100.0 for an empty file.
    pub percentage: f64,
    /// Recent throughput in bytes per second; 0.0 until two reports
    /// with measurable spacing have arrived.
    pub bytes_per_sec: f64,
    /// Estimated time to send the rest, when the rate is known.
    pub eta: Option<Duration>,
}

/// Accumulates cumulative sent-byte reports for a single attempt.
///
/// Owned by the attempt's event pump; a fresh meter is built per
/// attempt so a resume never inherits rate history from before the
/// interruption.
pub struct ProgressMeter {
    start: u64,
    total: u64,
    /// `(when, cumulative bytes sent)`, oldest first.
    reports: VecDeque<(Instant, u64)>,
}

impl ProgressMeter {
    /// Meter for an attempt sending `[start, total)` of a file.
    pub fn new(start: u64, total: u64) -> Self {
        Self {
            start,
            total,
            reports: VecDeque::new(),
        }
    }

    /// Records a cumulative sent count and returns the reading.
    pub fn record(&mut self, sent: u64) -> ProgressSnapshot {
        self.record_at(sent, Instant::now())
    }

    fn record_at(&mut self, sent: u64, now: Instant) -> ProgressSnapshot {
        self.reports.push_back((now, sent));
        while let Some(&(when, _)) = self.reports.front() {
            let expired = now.duration_since(when) > RATE_WINDOW;
            if (expired || self.reports.len() > MAX_REPORTS) && self.reports.len() > 1 {
                self.reports.pop_front();
            } else {
                break;
            }
        }

        let loaded = self.start + sent;
        let percentage = if self.total == 0 {
            100.0
        } else {
            loaded as f64 / self.total as f64 * 100.0
        };
        let bytes_per_sec = self.rate();
        let eta = if bytes_per_sec > 0.0 {
            let remaining = self.total.saturating_sub(loaded);
            Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
        } else {
            None
        };

        ProgressSnapshot {
            loaded,
            total: self.total,
            percentage,
            bytes_per_sec,
            eta,
        }
    }

    /// Throughput between the oldest and newest retained reports.
    ///
    /// Cumulative counts make this a plain difference; a lossy channel
    /// that drops intermediate reports does not skew the rate.
    fn rate(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.reports.front(), self.reports.back())
        else {
            return 0.0;
        };
        let elapsed = t1.duration_since(t0);
        if elapsed.is_zero() || b1 <= b0 {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed.as_secs_f64()
    }
}
