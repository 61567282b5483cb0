//! Display counters and cycle timing
//!
//! Counters are bumped by the render cycle; the profiler measures the time
//! from `prepare` to the end of `display` for each presented frame.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counters kept by a display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    /// Render cycles that reached submission
    pub cycles: u64,
    /// Cycles skipped because no swapchain image was ready
    pub skipped: u64,
    /// Cycles that drew the failure frame
    pub failed: u64,
    /// Slots returned to the pool by completion polling
    pub reclaimed: u64,
    /// Swapchain submissions that failed
    pub submit_failures: u64,
    /// Frames presented
    pub presented: u64,
}

/// Cycle timing statistics
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    /// Average cycle time in milliseconds
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// 50th percentile (median) cycle time
    pub p50_ms: f64,
    /// 95th percentile cycle time
    pub p95_ms: f64,
    /// 99th percentile cycle time
    pub p99_ms: f64,
    /// Number of samples in the statistics
    pub sample_count: usize,
}

/// Measures prepare-to-present latency and presentation rate
pub struct CycleProfiler {
    cycle_times: VecDeque<Duration>,
    /// Maximum samples to keep (5 seconds at 60fps)
    max_samples: usize,
    cycle_start: Option<Instant>,
    presents: VecDeque<Instant>,
}

impl Default for CycleProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleProfiler {
    pub fn new() -> Self {
        Self {
            cycle_times: VecDeque::with_capacity(300),
            max_samples: 300,
            cycle_start: None,
            presents: VecDeque::with_capacity(300),
        }
    }

    /// Mark the start of a render cycle
    pub fn begin_cycle(&mut self) {
        self.cycle_start = Some(Instant::now());
    }

    /// Mark the frame as presented, closing the open cycle if any
    pub fn end_cycle(&mut self) {
        let now = Instant::now();
        if let Some(start) = self.cycle_start.take() {
            self.record(now.duration_since(start));
        }
        self.presents.push_back(now);
        if self.presents.len() > self.max_samples {
            self.presents.pop_front();
        }
    }

    /// Add one cycle duration
    pub fn record(&mut self, duration: Duration) {
        self.cycle_times.push_back(duration);
        if self.cycle_times.len() > self.max_samples {
            self.cycle_times.pop_front();
        }
    }

    pub fn stats(&self) -> CycleStats {
        if self.cycle_times.is_empty() {
            return CycleStats::default();
        }

        let mut times: Vec<f64> = self
            .cycle_times
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();
        let count = times.len() as f64;

        CycleStats {
            avg_ms: sum / count,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }

    /// Presentation rate over the kept window
    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.presents.front(), self.presents.back()) else {
            return 0.0;
        };
        let duration = last.duration_since(*first).as_secs_f64();
        if self.presents.len() >= 2 && duration > 0.0 {
            (self.presents.len() - 1) as f64 / duration
        } else {
            0.0
        }
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}
