use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Message creation timestamps and the aging computation both use this
/// source, so a message's age is always a difference of two values from the
/// same clock. A clock set before the epoch yields 0 rather than an error.
pub fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Wall-clock seconds since the Unix epoch, for report headers.
pub fn wall_secs() -> u64 {
    wall_ms() / 1000
}

/// Monotonic elapsed-time source anchored at construction.
///
/// Log and sample timestamps are expressed as seconds since the run began;
/// unlike [`wall_ms`] this never jumps backwards.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    start: Instant,
}

impl RunClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_ms_is_nonzero_and_monotonic_enough() {
        let a = wall_ms();
        let b = wall_ms();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn run_clock_advances() {
        let clock = RunClock::new();
        std::thread::sleep(Duration::from_millis(10));
        assert!(clock.elapsed_secs() > 0.0);
    }
}
