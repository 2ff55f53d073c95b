//! Per-tick inputs and outputs: video frames, the viewing camera and hand transforms.

use nalgebra::{Point2, UnitQuaternion, Vector3};
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// A borrowed RGBA video frame.
///
/// Frames are owned by the frame source; trackers read them during a single tick and never keep
/// a reference past the call that provided them.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> Frame<'a> {
    /// Wraps a tightly packed RGBA8 buffer.
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the RGBA value at `(x, y)`; the caller guarantees the coordinates are in bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Writes the frame into `dst` converted with an OpenCV color conversion code that accepts
    /// a four-channel source, e.g. `COLOR_RGBA2RGB`, `COLOR_RGBA2GRAY` or `COLOR_RGB2HSV`.
    pub fn convert_into(&self, code: i32, dst: &mut Mat) -> opencv::Result<()> {
        let rgba = Mat::from_slice(self.data)?
            .reshape(4, self.height as i32)?
            .try_clone()?;
        imgproc::cvt_color_def(&rgba, dst, code)
    }
}

/// Position, Euler rotation (degrees) and scale of one tracked hand in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandTransform {
    pub position: Vector3<f32>,
    pub rotation: Vector3<f32>,
    pub scale: Vector3<f32>,
}

impl HandTransform {
    /// A transform with zero rotation and unit scale.
    pub fn new(position: Vector3<f32>) -> Self {
        Self::with_rotation(position, Vector3::zeros())
    }

    pub fn with_rotation(position: Vector3<f32>, rotation: Vector3<f32>) -> Self {
        Self {
            position,
            rotation,
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Size of the display surface the frame is presented on, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }
}

/// The 3D camera that looks at the scene the hands are placed in.
///
/// Screen space has its origin at the bottom-left of the viewport with y pointing up. Camera
/// space looks down +z with +y up. `orientation` holds Euler angles in degrees, applied in
/// z, x, y order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub position: Vector3<f32>,
    pub orientation: Vector3<f32>,
    pub fov_y_degrees: f32,
    pub viewport: Viewport,
}

impl CameraView {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: Vector3::zeros(),
            fov_y_degrees: 60.0,
            viewport,
        }
    }

    pub fn with_orientation(mut self, orientation: Vector3<f32>) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(&self) -> UnitQuaternion<f32> {
        let [x, y, z] = [
            self.orientation.x.to_radians(),
            self.orientation.y.to_radians(),
            self.orientation.z.to_radians(),
        ];
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z)
    }

    /// Unprojects a screen point to the world position `depth` units in front of the camera.
    pub fn screen_to_world(&self, screen: Point2<f32>, depth: f32) -> Vector3<f32> {
        let Viewport { width, height } = self.viewport;
        let ndc_x = if width > 0.0 { screen.x / width * 2.0 - 1.0 } else { 0.0 };
        let ndc_y = if height > 0.0 { screen.y / height * 2.0 - 1.0 } else { 0.0 };

        let half_height = (self.fov_y_degrees.to_radians() / 2.0).tan() * depth;
        let half_width = half_height * self.viewport.aspect();

        let local = Vector3::new(ndc_x * half_width, ndc_y * half_height, depth);
        self.position + self.rotation() * local
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_rejects_short_buffer() {
        let data = vec![0u8; 10];
        let err = Frame::new(&data, 2, 2).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { expected: 16, .. }));
    }

    #[test]
    fn frame_rejects_zero_size() {
        assert!(matches!(
            Frame::new(&[], 0, 4),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn frame_pixel_lookup() {
        let mut data = vec![0u8; 3 * 2 * 4];
        data[(1 * 3 + 2) * 4..(1 * 3 + 2) * 4 + 4].copy_from_slice(&[1, 2, 3, 4]);
        let frame = Frame::new(&data, 3, 2).unwrap();
        assert_eq!(frame.pixel(2, 1), [1, 2, 3, 4]);
    }

    #[test]
    fn converts_to_opencv_color_spaces() {
        let data = test_util::paint(4, 3, [0, 255, 0], &[(0, 0, 1, 1, [255, 0, 0])]);
        let frame = Frame::new(&data, 4, 3).unwrap();

        let mut rgb = Mat::default();
        frame.convert_into(imgproc::COLOR_RGBA2RGB, &mut rgb).unwrap();
        assert_eq!((rgb.rows(), rgb.cols(), rgb.channels()), (3, 4, 3));
        let bytes = rgb.data_bytes().unwrap();
        assert_eq!(&bytes[..3], &[255, 0, 0]);
        assert_eq!(&bytes[3..6], &[0, 255, 0]);

        let mut hsv = Mat::default();
        frame.convert_into(imgproc::COLOR_RGB2HSV, &mut hsv).unwrap();
        let bytes = hsv.data_bytes().unwrap();
        // Red has hue 0, green 60 on the halved hue scale.
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[bytes.len() - 3], 60);
    }

    #[test]
    fn screen_center_unprojects_onto_view_axis() {
        let camera = CameraView::new(Viewport::new(800.0, 600.0));
        let p = camera.screen_to_world(Point2::new(400.0, 300.0), 2.0);
        assert_relative_eq!(p, Vector3::new(0.0, 0.0, 2.0), epsilon = 1e-5);
    }

    #[test]
    fn screen_corner_spans_field_of_view() {
        let camera = CameraView::new(Viewport::new(800.0, 400.0));
        let p = camera.screen_to_world(Point2::new(800.0, 400.0), 1.0);
        let half = (30.0f32).to_radians().tan();
        assert_relative_eq!(p, Vector3::new(2.0 * half, half, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn yawed_camera_rotates_forward_axis() {
        let camera = CameraView::new(Viewport::new(100.0, 100.0))
            .with_orientation(Vector3::new(0.0, 90.0, 0.0))
            .with_position(Vector3::new(1.0, 0.0, 0.0));
        let p = camera.screen_to_world(Point2::new(50.0, 50.0), 1.0);
        assert_relative_eq!(p, Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-5);
    }
}
