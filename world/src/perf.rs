//! Frame statistics gathered over fixed windows of simulated time.

use danmaku_system_lanes::LaneStats;

/// Counters accumulated since the current statistics window opened.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Ticks processed.
    pub frames: u64,
    /// Comments spawned.
    pub appended: u64,
    /// Rows whose geometry or opacity changed.
    pub geometry_updates: u64,
    /// Rows released by culling or fading.
    pub removed: u64,
    /// Whether the slot table was compacted.
    pub compacted: bool,
    /// Lane pick counters.
    pub lanes: LaneStats,
}

/// Distribution of frame durations over a closed window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameSummary {
    /// Length of the window in milliseconds.
    pub window_ms: f64,
    /// Frames per second over the window.
    pub fps: f64,
    /// Mean frame duration.
    pub avg_ms: f64,
    /// Median frame duration.
    pub p50_ms: f64,
    /// 95th percentile frame duration.
    pub p95_ms: f64,
    /// 99th percentile frame duration.
    pub p99_ms: f64,
    /// Longest frame duration.
    pub max_ms: f64,
}

impl FrameSummary {
    /// Summarizes frame samples collected over `window_ms`.
    #[must_use]
    pub fn from_samples(samples: &[f64], window_ms: f64) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let avg_ms = if count == 0 {
            0.0
        } else {
            sorted.iter().sum::<f64>() / count as f64
        };
        let fps = if window_ms > 0.0 {
            count as f64 * 1000.0 / window_ms
        } else {
            0.0
        };
        Self {
            window_ms,
            fps,
            avg_ms,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            max_ms: sorted.last().copied().unwrap_or(0.0),
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Rolling statistics window.
#[derive(Debug)]
pub(crate) struct PerfWindow {
    window_ms: Option<f64>,
    started_at_ms: f64,
    samples: Vec<f64>,
    stats: FrameStats,
}

impl PerfWindow {
    pub(crate) fn new(window_ms: Option<u64>) -> Self {
        Self {
            window_ms: window_ms.map(|window| window as f64),
            started_at_ms: 0.0,
            samples: Vec::new(),
            stats: FrameStats::default(),
        }
    }

    pub(crate) const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FrameStats {
        &mut self.stats
    }

    pub(crate) fn record_frame(&mut self, elapsed_ms: f64) {
        self.stats.frames += 1;
        if self.window_ms.is_some() {
            self.samples.push(elapsed_ms);
        }
    }

    /// Closes the window when it has run its full length, returning its contents.
    pub(crate) fn roll(
        &mut self,
        now_ms: f64,
        lanes: LaneStats,
    ) -> Option<(FrameSummary, FrameStats)> {
        let window_ms = self.window_ms?;
        let elapsed = now_ms - self.started_at_ms;
        if elapsed < window_ms {
            return None;
        }
        let summary = FrameSummary::from_samples(&self.samples, elapsed);
        let mut stats = std::mem::take(&mut self.stats);
        stats.lanes = lanes;
        self.samples.clear();
        self.started_at_ms = now_ms;
        Some((summary, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_use_nearest_rank() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        let summary = FrameSummary::from_samples(&samples, 2_000.0);
        assert_eq!(summary.p50_ms, 50.0);
        assert_eq!(summary.p95_ms, 95.0);
        assert_eq!(summary.p99_ms, 99.0);
        assert_eq!(summary.max_ms, 100.0);
        assert!((summary.avg_ms - 50.5).abs() < 1e-12);
        assert!((summary.fps - 50.0).abs() < 1e-12);
    }

    #[test]
    fn empty_window_summarizes_to_zero() {
        assert_eq!(FrameSummary::from_samples(&[], 0.0), FrameSummary::default());
    }

    #[test]
    fn window_rolls_after_its_length() {
        let mut window = PerfWindow::new(Some(100));
        window.record_frame(40.0);
        window.record_frame(40.0);
        assert!(window.roll(80.0, LaneStats::default()).is_none());
        window.record_frame(40.0);
        let (summary, stats) = window
            .roll(120.0, LaneStats::default())
            .expect("window closes");
        assert_eq!(stats.frames, 3);
        assert_eq!(summary.max_ms, 40.0);
        assert_eq!(window.stats().frames, 0);
    }

    #[test]
    fn disabled_window_never_rolls() {
        let mut window = PerfWindow::new(None);
        window.record_frame(16.0);
        assert!(window.roll(1.0e9, LaneStats::default()).is_none());
        assert_eq!(window.stats().frames, 1);
    }
}
