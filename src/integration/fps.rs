use std::fmt;

/// Frame rate over the last second and averaged over the first minute of a run.
///
/// Driven by tick timestamps in seconds, so it measures whatever clock the host feeds the session
/// with.
#[derive(Debug, Clone, Default)]
pub struct FrameRateMonitor {
    started_at: Option<f64>,
    last_second: f64,
    frames_since_last_second: u32,
    frames_since_start: u32,
    fps: Option<f64>,
    first_minute_fps: Option<f64>,
}

impl FrameRateMonitor {
    const WINDOW: f64 = 1.0;
    const FIRST_MINUTE: f64 = 60.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: f64) {
        *self = Self {
            started_at: Some(now),
            last_second: now,
            ..Self::default()
        };
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Counts one frame shown at `now`. Ignored while stopped.
    pub fn tick(&mut self, now: f64) {
        let Some(started_at) = self.started_at else {
            return;
        };
        self.frames_since_last_second += 1;
        self.frames_since_start += 1;

        let window = now - self.last_second;
        if window > Self::WINDOW {
            self.fps = Some(self.frames_since_last_second as f64 / window);
            self.last_second = now;
            self.frames_since_last_second = 0;
        }

        let elapsed = now - started_at;
        if elapsed > Self::FIRST_MINUTE && self.first_minute_fps.is_none() {
            self.first_minute_fps = Some(self.frames_since_start as f64 / elapsed);
        }
    }

    /// Frames per second over the last completed window.
    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn first_minute_fps(&self) -> Option<f64> {
        self.first_minute_fps
    }
}

impl fmt::Display for FrameRateMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fps {
            Some(fps) => write!(f, "{fps:.2} FPS")?,
            None => write!(f, "- FPS")?,
        }
        match self.first_minute_fps {
            Some(avg) => write!(f, " (1m avg: {avg:.2})"),
            None => write!(f, " (1m avg: -)"),
        }
    }
}
