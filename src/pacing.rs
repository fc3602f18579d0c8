use std::thread;
use std::time::{Duration, Instant};

/// Maps capture timestamps onto the wall clock so packets leave with the
/// spacing they were recorded with.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    capture_epoch: f64,
    wall_epoch: Instant,
}

impl Pacer {
    pub fn new(capture_epoch: f64, wall_epoch: Instant) -> Self {
        Self {
            capture_epoch,
            wall_epoch,
        }
    }

    pub fn capture_epoch(&self) -> f64 {
        self.capture_epoch
    }

    /// Wall-clock instant at which a packet captured at `timestamp` is due.
    /// Timestamps before the capture epoch are due immediately.
    pub fn deadline(&self, timestamp: f64) -> Instant {
        let offset = (timestamp - self.capture_epoch).max(0.0);
        self.wall_epoch + Duration::from_secs_f64(offset)
    }

    /// Blocks until the packet captured at `timestamp` is due. Returns at once
    /// if the deadline has already passed; the backlog is not compressed.
    pub fn wait_for(&self, timestamp: f64) {
        wait_until(self.deadline(timestamp));
    }
}

/// Sleeps until `deadline`, spinning for the last stretch below 100 us.
pub fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if now >= deadline {
        return;
    }

    let sleep_time = deadline.duration_since(now);
    if sleep_time > Duration::from_micros(100) {
        thread::sleep(sleep_time - Duration::from_micros(100));
    }
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
