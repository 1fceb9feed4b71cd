//! Forward simulation of the lighthouse image-formation model.
//!
//! A base station sweeping laser planes across the tracked object is, for
//! estimation purposes, a camera at the origin looking down the negative z
//! axis: a photodiode at camera coordinates `(x, y, z)` with `z < 0` is hit
//! at sweep angles whose tangents are `(x / -z, y / -z)`, which are exactly
//! the normalized coordinates the pose pipeline consumes. These helpers
//! project known reference geometry through an assumed pose to synthesize
//! such observations for tests and demos.

use crate::pose::PoseError;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

/// Build a rotation matrix from Euler angles in degrees, composed as
/// yaw about y, then pitch about x, then roll about z:
/// `R = Rz(roll) * Rx(pitch) * Ry(yaw)`.
pub fn rotation_from_euler_deg(yaw: f64, pitch: f64, roll: f64) -> Matrix3<f64> {
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), yaw.to_radians());
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), pitch.to_radians());
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), roll.to_radians());
    (rz * rx * ry).into_inner()
}

/// The standard four-photodiode rectangle on the object plane `z = 0`,
/// in the wiring order used throughout: top-left, top-right, bottom-right,
/// bottom-left.
pub fn photodiode_square(half_width: f64, half_height: f64) -> Vec<Point3<f64>> {
    vec![
        Point3::new(-half_width, half_height, 0.0),
        Point3::new(half_width, half_height, 0.0),
        Point3::new(half_width, -half_height, 0.0),
        Point3::new(-half_width, -half_height, 0.0),
    ]
}

/// Project one reference point through the pose `(rotation, translation)`
/// onto the normalized image plane.
///
/// # Errors
///
/// [`PoseError::PointBehindCamera`] if the transformed point does not end up
/// strictly in front of the camera (`z < 0`).
pub fn project_point(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    point: &Point3<f64>,
) -> Result<Point2<f64>, PoseError> {
    let world = rotation * point + translation;
    if world.z > -f64::EPSILON.sqrt() {
        return Err(PoseError::PointBehindCamera(world.z));
    }
    Ok(Point2::new(world.x / -world.z, world.y / -world.z))
}

/// Project a whole reference-point set, preserving order so the result pairs
/// 1:1 with the input by index.
pub fn simulate_observations(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    points: &[Point3<f64>],
) -> Result<Vec<Point2<f64>>, PoseError> {
    points
        .iter()
        .map(|p| project_point(rotation, translation, p))
        .collect()
}
