//! Frame timer producing the delta fed to scene animation.

use std::time::{Duration, Instant};

/// Upper bound on a single frame delta.
///
/// A stall (window drag, breakpoint, device-idle rebuild) would otherwise
/// jump every animated light forward by the whole pause.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Measures the time between frames.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    max_delta: Duration,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        Self::with_max_delta(MAX_FRAME_DELTA)
    }

    /// Create a timer with a custom delta clamp.
    pub fn with_max_delta(max_delta: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            max_delta,
        }
    }

    /// Total time since creation or the last [`Timer::reset`].
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous tick, clamped to the configured maximum.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        clamp_delta(delta, self.max_delta)
    }

    /// [`Timer::tick`] in seconds.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Restart both the elapsed clock and the tick reference.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_delta(delta: Duration, max: Duration) -> Duration {
    delta.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_delta_passes_short_frames() {
        let delta = Duration::from_millis(16);
        assert_eq!(clamp_delta(delta, MAX_FRAME_DELTA), delta);
    }

    #[test]
    fn test_clamp_delta_caps_stalls() {
        let delta = Duration::from_secs(3);
        assert_eq!(clamp_delta(delta, MAX_FRAME_DELTA), MAX_FRAME_DELTA);
    }

    #[test]
    fn test_tick_never_exceeds_max() {
        let mut timer = Timer::with_max_delta(Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.tick() <= Duration::from_nanos(1));
    }
}
