//! Per-frame orchestration of one active tracker.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use super::FrameRateMonitor;
use crate::color::{ColorCalibrator, ColorRange};
use crate::error::{CalibrationError, TrackerError};
use crate::frame::{CameraView, Frame, HandTransform};
use crate::mapping::CoordinateMapper;
use crate::tracker::{HandTracker, TrackerKind};

/// Configuration for a [`TrackingSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub tracker: TrackerKind,
    /// Radius in frame pixels of the circle sampled on calibration.
    pub calibration_radius: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerKind::default(),
            calibration_radius: 45,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Waiting for the first frame to learn its size.
    Pending,
    Running,
    /// Initialization failed; the tracker is never retried.
    Failed,
    Disposed,
}

/// Feeds frames to a single tracker and owns its lifecycle.
///
/// The tracker is initialized from the first frame, which yields no hands. It is disposed when
/// the session is disposed or dropped.
///
/// # Example
///
/// ```ignore
/// use handtrack_rs::{CameraView, Frame, SessionConfig, TrackingSession, Viewport};
///
/// let mut session = TrackingSession::new(SessionConfig::default());
/// let camera = CameraView::new(Viewport::new(1920.0, 1080.0));
/// loop {
///     let frame = Frame::new(&rgba, width, height)?;
///     for hand in session.tick(&frame, &camera, now)? {
///         // Move an avatar hand to `hand.position`
///     }
/// }
/// ```
pub struct TrackingSession {
    config: SessionConfig,
    tracker: Box<dyn HandTracker>,
    calibrator: ColorCalibrator,
    frame_rate: FrameRateMonitor,
    lifecycle: Lifecycle,
}

impl TrackingSession {
    pub fn new(config: SessionConfig) -> Self {
        let tracker = config.tracker.build();
        Self::with_tracker(config, tracker)
    }

    /// Session around a caller-constructed tracker. `config.tracker` is kept for reference only.
    pub fn with_tracker(config: SessionConfig, tracker: Box<dyn HandTracker>) -> Self {
        Self {
            config,
            tracker,
            calibrator: ColorCalibrator::new(),
            frame_rate: FrameRateMonitor::new(),
            lifecycle: Lifecycle::Pending,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tracker(&self) -> &dyn HandTracker {
        self.tracker.as_ref()
    }

    pub fn tracker_mut(&mut self) -> &mut dyn HandTracker {
        self.tracker.as_mut()
    }

    pub fn frame_rate(&self) -> &FrameRateMonitor {
        &self.frame_rate
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Running && self.tracker.is_initialized()
    }

    /// Processes one frame captured at `time` seconds.
    ///
    /// The first call initializes the tracker for the frame size and returns no hands. Returns
    /// the initialization error once if the tracker cannot be set up, and
    /// [`TrackerError::NotInitialized`] on every later call or after disposal.
    pub fn tick(
        &mut self,
        frame: &Frame<'_>,
        camera: &CameraView,
        time: f64,
    ) -> Result<Vec<HandTransform>, TrackerError> {
        match self.lifecycle {
            Lifecycle::Pending => {
                if let Err(e) = self.tracker.initialize(frame.width(), frame.height()) {
                    log::debug!("tracker initialization failed: {e}");
                    self.lifecycle = Lifecycle::Failed;
                    return Err(e);
                }
                self.lifecycle = Lifecycle::Running;
                self.frame_rate.start(time);
                Ok(Vec::new())
            }
            Lifecycle::Running => {
                self.frame_rate.tick(time);
                Ok(self.tracker.hand_positions(frame, camera, time))
            }
            Lifecycle::Failed | Lifecycle::Disposed => Err(TrackerError::NotInitialized),
        }
    }

    /// Samples the color around a frame pixel and hands the range to the tracker.
    pub fn calibrate_at_frame_point(
        &mut self,
        frame: &Frame<'_>,
        point: Point2<f32>,
    ) -> Result<ColorRange, CalibrationError> {
        let range = self
            .calibrator
            .calibrate(frame, point, self.config.calibration_radius)?;
        log::debug!(
            "calibrated at ({:.1}, {:.1}): hsv {:?}..{:?}",
            point.x,
            point.y,
            range.hsv_lower,
            range.hsv_upper
        );
        self.tracker.set_threshold_colors(&range);
        Ok(range)
    }

    /// Like [`Self::calibrate_at_frame_point`] for a point picked on screen.
    pub fn calibrate_at_screen_point(
        &mut self,
        frame: &Frame<'_>,
        camera: &CameraView,
        point: Point2<f32>,
    ) -> Result<ColorRange, CalibrationError> {
        let mapper = CoordinateMapper::new(
            frame.width() as f32,
            frame.height() as f32,
            camera.viewport,
        );
        self.calibrate_at_frame_point(frame, mapper.screen_to_frame(point))
    }

    /// Releases the tracker. Disposing twice is a no-op.
    pub fn dispose(&mut self) {
        if self.lifecycle != Lifecycle::Disposed {
            self.tracker.dispose();
            self.frame_rate.stop();
            self.lifecycle = Lifecycle::Disposed;
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
