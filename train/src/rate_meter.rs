use crate::common::*;

/// Counts events and reports their rate once per interval.
#[derive(Debug)]
pub struct RateMeter {
    count: usize,
    since: Instant,
    interval: Duration,
}

impl RateMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            count: 0,
            since: Instant::now(),
            interval,
        }
    }

    pub fn tick(&mut self) {
        self.count += 1;
    }

    /// Returns events per second if the interval has elapsed, and restarts counting.
    pub fn poll(&mut self) -> Option<f64> {
        let elapsed = self.since.elapsed();
        (elapsed >= self.interval).then(|| {
            let rate = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.since = Instant::now();
            rate
        })
    }
}
