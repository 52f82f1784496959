use std::collections::VecDeque;
use std::time::Duration;

/// Smooths raw byte-progress callbacks into throttled progress, speed and
/// ETA figures.
///
/// Updates are grouped into buckets of at least `interval_ms`. Once a bucket
/// has lasted long enough, [`ProgressTracker::content_received`] returns
/// `true` exactly once; the caller then surfaces the figures and calls
/// [`ProgressTracker::notified`] to open the next bucket. Speed is the mean
/// of the last `window` closed buckets.
///
/// Single writer: the owning session serialises all calls.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    interval_ms: i64,
    window: usize,
    announced_total: u64,
    total: u64,
    bytes: u64,
    started_at: Option<i64>,
    last_update_at: i64,
    bucket_started_at: i64,
    bucket_start_bytes: u64,
    bucket_signaled: bool,
    samples: VecDeque<u64>,
    progress: Option<u8>,
}

impl ProgressTracker {
    pub fn new(announced_total: u64, interval_ms: u32, window: usize) -> Self {
        Self {
            interval_ms: i64::from(interval_ms.max(1)),
            window: window.max(1),
            announced_total,
            total: announced_total,
            bytes: 0,
            started_at: None,
            last_update_at: 0,
            bucket_started_at: 0,
            bucket_start_bytes: 0,
            bucket_signaled: false,
            samples: VecDeque::with_capacity(window.max(1)),
            progress: None,
        }
    }

    /// Records `bytes_so_far` and reports whether the caller should notify.
    ///
    /// A `total_expected` of zero keeps the last known total (or the size
    /// announced with the transfer request).
    pub fn content_received(
        &mut self,
        bytes_so_far: u64,
        total_expected: u64,
        now_ms: i64,
    ) -> bool {
        if total_expected > 0 {
            self.total = total_expected;
        } else if self.total == 0 {
            self.total = self.announced_total;
        }
        self.bytes = self.bytes.max(bytes_so_far);
        self.last_update_at = now_ms;
        self.refresh_progress();

        if self.started_at.is_none() {
            self.started_at = Some(now_ms);
            self.bucket_started_at = now_ms;
            self.bucket_start_bytes = 0;
            return false;
        }

        if self.bucket_signaled {
            return false;
        }

        let elapsed = now_ms - self.bucket_started_at;
        if elapsed < self.interval_ms {
            return false;
        }

        let delta = self.bytes.saturating_sub(self.bucket_start_bytes);
        let sample = delta.saturating_mul(1000) / elapsed.max(1) as u64;
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.bucket_signaled = true;
        true
    }

    /// Opens a new bucket after the caller acted on a `true` signal.
    pub fn notified(&mut self, now_ms: i64) {
        self.bucket_started_at = now_ms;
        self.bucket_start_bytes = self.bytes;
        self.bucket_signaled = false;
    }

    /// Percent in `[0, 100]`, or `None` while the total is unknown.
    pub fn current_progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn average_speed(&self) -> u64 {
        if !self.samples.is_empty() {
            return self.samples.iter().sum::<u64>() / self.samples.len() as u64;
        }

        match self.started_at {
            Some(started_at) if self.last_update_at > started_at => {
                let elapsed = (self.last_update_at - started_at) as u64;
                self.bytes.saturating_mul(1000) / elapsed
            }
            _ => 0,
        }
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        let speed = self.average_speed();
        if speed == 0 || self.total == 0 || self.bytes >= self.total {
            return None;
        }

        Some(Duration::from_secs((self.total - self.bytes).div_ceil(speed)))
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes
    }

    pub fn total_expected(&self) -> u64 {
        self.total
    }

    fn refresh_progress(&mut self) {
        if self.total == 0 {
            return;
        }

        let percent = (u128::from(self.bytes) * 100 / u128::from(self.total)).min(100) as u8;
        // a total revised upwards must not move the bar backwards
        self.progress = Some(self.progress.map_or(percent, |previous| previous.max(percent)));
    }
}

#[cfg(test)]
#[path = "../tests/reception/progress_tests.rs"]
mod tests;
