use std::time::{Duration, Instant};
use log::{debug, warn};

/// Running average of a repeated measurement.
///
/// Measurements over `slow_threshold` are logged at warn level; the rest only at debug.
#[derive(Debug)]
pub struct TimingStats {
    pub name: String,
    pub total_time: Duration,
    pub count: u32,
    pub slow_threshold: Duration,
    pub slow_count: u32,
}

impl TimingStats {
    pub fn new(name: &str, slow_threshold: Duration) -> Self {
        Self {
            name: name.to_string(),
            total_time: Duration::from_secs(0),
            count: 0,
            slow_threshold,
            slow_count: 0,
        }
    }

    pub fn add_measurement(&mut self, duration: Duration) {
        self.total_time += duration;
        self.count += 1;

        if duration > self.slow_threshold {
            self.slow_count += 1;
            warn!("{} - Slow: {:.2}ms, Avg: {:.2}ms, Count: {}",
                self.name,
                duration.as_secs_f64() * 1000.0,
                self.average_ms(),
                self.count
            );
        } else if self.count % 600 == 0 {
            debug!("{} - Avg: {:.2}ms over {} samples, {} slow",
                self.name,
                self.average_ms(),
                self.count,
                self.slow_count
            );
        }
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_time.as_secs_f64() * 1000.0) / self.count as f64
        }
    }
}

pub struct ScopedTimer<'a> {
    start: Instant,
    stats: &'a mut TimingStats,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(stats: &'a mut TimingStats) -> Self {
        Self {
            start: Instant::now(),
            stats,
        }
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.stats.add_measurement(duration);
    }
}
