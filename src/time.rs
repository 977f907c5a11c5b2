//! Frame timing for the render loop.
//!
//! ```ignore
//! let mut timer = FrameTimer::new();
//! // once per frame:
//! if let Some(fps) = timer.tick() {
//!     log::info!("{:.1} fps", fps);
//! }
//! ```

use std::time::{Duration, Instant};

/// Counts frames and reports a frame rate at a fixed interval.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    delta: Duration,
    frames: u64,
    fps: f32,
    window_start: Instant,
    window_frames: u64,
    report_interval: Duration,
    paused: bool,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(2))
    }

    pub fn with_report_interval(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta: Duration::ZERO,
            frames: 0,
            fps: 0.0,
            window_start: now,
            window_frames: 0,
            report_interval,
            paused: false,
        }
    }

    /// Record a rendered frame. Returns the frame rate when a reporting
    /// window has just closed.
    pub fn tick(&mut self) -> Option<f32> {
        let now = Instant::now();
        self.delta = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frames += 1;
        self.window_frames += 1;

        let window = now.duration_since(self.window_start);
        if window < self.report_interval {
            return None;
        }
        self.fps = self.window_frames as f32 / window.as_secs_f32();
        self.window_frames = 0;
        self.window_start = now;
        Some(self.fps)
    }

    /// Frames recorded so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frame rate over the last completed window.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Time between the last two ticks.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the animation is paused. The host stops calling `draw` while
    /// paused; the timer only carries the flag.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        if !self.paused {
            // don't count the pause into the next window
            self.last_frame = Instant::now();
            self.window_start = self.last_frame;
            self.window_frames = 0;
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timer_new() {
        let timer = FrameTimer::new();
        assert_eq!(timer.frames(), 0);
        assert_eq!(timer.fps(), 0.0);
        assert!(!timer.is_paused());
    }

    #[test]
    fn test_tick_reports_after_interval() {
        let mut timer = FrameTimer::with_report_interval(Duration::from_millis(20));
        assert_eq!(timer.tick(), None);
        thread::sleep(Duration::from_millis(30));
        let fps = timer.tick().expect("window should have closed");
        assert!(fps > 0.0);
        assert_eq!(timer.frames(), 2);
        assert!(timer.delta() >= Duration::from_millis(30));
    }

    #[test]
    fn test_toggle_pause() {
        let mut timer = FrameTimer::new();
        timer.toggle_pause();
        assert!(timer.is_paused());
        timer.toggle_pause();
        assert!(!timer.is_paused());
    }
}
