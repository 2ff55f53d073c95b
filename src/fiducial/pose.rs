//! Pinhole camera model and planar marker pose.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use opencv::calib3d;
use opencv::core::{self, Mat, Point2f, Point3f, Vector};
use opencv::prelude::*;

/// Pinhole intrinsics without distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Approximates an uncalibrated camera: focal length `max(width, height)`, principal point at
    /// the frame center.
    pub fn from_frame_size(width: u32, height: u32) -> Self {
        let f = width.max(height) as f64;
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    /// 3x3 `CV_64F` camera matrix.
    pub fn camera_matrix(&self) -> opencv::Result<Mat> {
        Mat::from_slice_2d(&[
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ])?
        .try_clone()
    }
}

/// Marker pose relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

/// Corners of a square marker of side `length` in its own plane, in detection order
/// (top-left, top-right, bottom-right, bottom-left), centered on the origin.
pub fn marker_object_points(length: f64) -> [Point3<f64>; 4] {
    let h = length / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// Estimates the pose of a square marker of side `length` from its four image corners.
///
/// Returns `None` when no solution in front of the camera exists.
pub fn estimate_pose(
    corners: &[Point2<f32>; 4],
    length: f64,
    intrinsics: &CameraIntrinsics,
) -> opencv::Result<Option<Pose>> {
    let object: Vector<Point3f> = marker_object_points(length)
        .iter()
        .map(|p| Point3f::new(p.x as f32, p.y as f32, p.z as f32))
        .collect();
    let image: Vector<Point2f> = corners.iter().map(|c| Point2f::new(c.x, c.y)).collect();
    let camera_matrix = intrinsics.camera_matrix()?;
    let dist_coeffs = Mat::zeros(1, 5, core::CV_64F)?.to_mat()?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let solved = calib3d::solve_pnp(
        &object,
        &image,
        &camera_matrix,
        &dist_coeffs,
        &mut rvec,
        &mut tvec,
        false,
        calib3d::SOLVEPNP_IPPE_SQUARE,
    )?;
    if !solved {
        return Ok(None);
    }

    let mut rotation = Mat::default();
    calib3d::rodrigues(&rvec, &mut rotation, &mut core::no_array())?;
    let mut r = Matrix3::zeros();
    for row in 0..3 {
        for col in 0..3 {
            r[(row, col)] = *rotation.at_2d::<f64>(row as i32, col as i32)?;
        }
    }
    let translation = Vector3::new(
        *tvec.at::<f64>(0)?,
        *tvec.at::<f64>(1)?,
        *tvec.at::<f64>(2)?,
    );

    if translation.z.is_nan() || translation.z <= 0.0 || r.iter().any(|v| !v.is_finite()) {
        return Ok(None);
    }
    Ok(Some(Pose {
        rotation: Rotation3::from_matrix_unchecked(r),
        translation,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn project_marker(pose: &Pose, length: f64, k: &CameraIntrinsics) -> [Point2<f32>; 4] {
        marker_object_points(length).map(|p| {
            let cam = pose.rotation * p.coords + pose.translation;
            Point2::new(
                (k.fx * cam.x / cam.z + k.cx) as f32,
                (k.fy * cam.y / cam.z + k.cy) as f32,
            )
        })
    }

    #[test]
    fn intrinsics_from_frame() {
        let k = CameraIntrinsics::from_frame_size(640, 480);
        assert_eq!(k.fx, 640.0);
        assert_eq!(k.fy, 640.0);
        assert_eq!((k.cx, k.cy), (320.0, 240.0));

        let m = k.camera_matrix().unwrap();
        assert_eq!((m.rows(), m.cols()), (3, 3));
        assert_eq!(*m.at_2d::<f64>(0, 0).unwrap(), 640.0);
        assert_eq!(*m.at_2d::<f64>(1, 2).unwrap(), 240.0);
        assert_eq!(*m.at_2d::<f64>(2, 2).unwrap(), 1.0);
    }

    #[test]
    fn recovers_fronto_parallel_pose() {
        let k = CameraIntrinsics::from_frame_size(640, 480);
        // Facing the camera means half a turn about x.
        let truth = Pose {
            rotation: Rotation3::from_axis_angle(&Vector3::x_axis(), PI),
            translation: Vector3::new(0.02, -0.01, 0.4),
        };
        let corners = project_marker(&truth, 0.05, &k);
        let pose = estimate_pose(&corners, 0.05, &k).unwrap().unwrap();
        assert_abs_diff_eq!(pose.translation, truth.translation, epsilon = 1e-3);
        let angle = pose.rotation.rotation_to(&truth.rotation).angle();
        assert!(angle < 1e-2, "rotation error {angle}");
    }

    #[test]
    fn recovers_tilted_pose() {
        let k = CameraIntrinsics::from_frame_size(640, 480);
        let truth = Pose {
            rotation: Rotation3::from_scaled_axis(Vector3::new(2.8, 0.4, -0.3)),
            translation: Vector3::new(-0.05, 0.03, 0.6),
        };
        let corners = project_marker(&truth, 0.05, &k);
        let pose = estimate_pose(&corners, 0.05, &k).unwrap().unwrap();
        assert_abs_diff_eq!(pose.translation, truth.translation, epsilon = 1e-3);
        let angle = pose.rotation.rotation_to(&truth.rotation).angle();
        assert!(angle < 1e-2, "rotation error {angle}");
    }

    #[test]
    fn degenerate_quad_has_no_pose() {
        let k = CameraIntrinsics::from_frame_size(640, 480);
        let corners = [Point2::new(100.0, 100.0); 4];
        assert!(!matches!(estimate_pose(&corners, 0.05, &k), Ok(Some(_))));
    }
}
