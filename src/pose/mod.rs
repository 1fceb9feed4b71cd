//! Pose estimation from point correspondences via Direct Linear Transformation.
//!
//! The pipeline has two stages:
//! 1. The linear system builder ([`dlt`]) assembles the over-determined
//!    system `A h = b` that relates known 3D reference points on the tracked
//!    object to their observed 2D normalized image coordinates.
//! 2. The decomposer ([`decompose`]) solves for `h` in the least-squares
//!    sense and factors the resulting projection into a scale, a translation
//!    and an orthonormal rotation, reported both as a matrix and as Euler
//!    angles in degrees.
//!
//! Every step is a pure function of its inputs; repeated calls with the same
//! correspondences produce identical results.
//!
//! The coordinate convention throughout is a camera at the origin looking
//! down the negative z axis: a point at camera coordinates `(x, y, z)` with
//! `z < 0` appears at normalized image coordinates `(x / -z, y / -z)`.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub mod decompose;
pub mod dlt;

pub use decompose::{condition_report, decompose_system, solve_parameters};
pub use dlt::CoefficientSystem;

/// Relative singular-value cutoff below which the coefficient matrix is
/// treated as rank deficient.
pub const DEFAULT_RANK_EPSILON: f64 = 1e-12;

/// Condition numbers above this default trigger a
/// [`PoseWarning::PoorlyConditioned`] warning.
pub const DEFAULT_CONDITION_THRESHOLD: f64 = 1e6;

#[derive(thiserror::Error, Debug)]
pub enum PoseError {
    #[error("need at least {required} correspondences for this model, got {actual}")]
    InsufficientCorrespondences { required: usize, actual: usize },
    #[error("got {points} reference points but {observations} observations")]
    MismatchedCorrespondences { points: usize, observations: usize },
    #[error("reference geometry is degenerate: coefficient matrix has rank {rank}, need {required}")]
    DegenerateGeometry { rank: usize, required: usize },
    #[error("linear system is singular, cannot solve for projection parameters")]
    SingularSystem,
    #[error("point is on or behind the camera plane (z = {0})")]
    PointBehindCamera(f64),
}

/// Which projection model the unknown parameter vector describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionModel {
    /// Planar homography with the reference points on the plane `z = 0`.
    /// Eight unknowns, at least four correspondences.
    Planar,
    /// Full 3x4 projection for reference points in general position.
    /// Eleven unknowns, at least six correspondences (eight recommended).
    Full,
}

impl ProjectionModel {
    /// Number of unknown projection parameters (the trailing entry is fixed to 1).
    pub fn unknowns(&self) -> usize {
        match self {
            ProjectionModel::Planar => 8,
            ProjectionModel::Full => 11,
        }
    }

    /// Minimum number of correspondences for a determined system.
    pub fn min_correspondences(&self) -> usize {
        match self {
            ProjectionModel::Planar => 4,
            ProjectionModel::Full => 6,
        }
    }
}

/// Least-squares backend for the linear solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
    /// SVD-based least squares. Numerically the most robust choice and the
    /// default.
    #[default]
    Svd,
    /// Classic normal equations `h = (A^T A)^-1 A^T b`. Squares the condition
    /// number of the system; kept as a fallback for parity with
    /// microcontroller ports that only have a matrix inverse available.
    NormalEquations,
}

/// Tuning knobs for [`estimate_pose`].
///
/// There is no global state anywhere in the pipeline; every threshold is an
/// explicit field here so tests can run arbitrary geometries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseConfig {
    pub method: SolveMethod,
    /// Condition numbers of `A` above this are surfaced as a
    /// [`PoseWarning::PoorlyConditioned`] warning on the estimate.
    pub condition_threshold: f64,
    /// Relative singular-value cutoff for the rank checks.
    pub rank_epsilon: f64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        PoseConfig {
            method: SolveMethod::default(),
            condition_threshold: DEFAULT_CONDITION_THRESHOLD,
            rank_epsilon: DEFAULT_RANK_EPSILON,
        }
    }
}

/// Euler angles in degrees for the yaw(Y) -> pitch(X) -> roll(Z) composition
/// `R = Rz(roll) * Rx(pitch) * Ry(yaw)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Non-fatal conditions attached to an otherwise successful estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PoseWarning {
    /// Pitch is at +-90 degrees; roll and yaw are coupled and the reported
    /// roll is fixed to 0 by convention.
    GimbalLock,
    /// The condition number of `A` exceeded the configured threshold; the
    /// estimate is returned but is sensitive to measurement noise.
    PoorlyConditioned { condition: f64 },
}

/// The decomposed pose. Computed once per invocation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Positive factor relating the raw projection parameters to the metric
    /// pose. Under the looking-down-negative-z convention this equals the
    /// distance of the object origin along the optical axis.
    pub scale: f64,
    /// Object origin in camera coordinates.
    pub translation: Vector3<f64>,
    /// Orthonormal rotation with determinant +1.
    pub rotation: Matrix3<f64>,
    /// [`Self::rotation`] reduced to Euler angles in degrees.
    pub euler: EulerAngles,
    pub warnings: Vec<PoseWarning>,
}

impl PoseEstimate {
    /// The pose as a rigid transform (unit quaternion + translation), for
    /// callers that want to chain or interpolate it.
    pub fn isometry(&self) -> Isometry3<f64> {
        let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
            self.rotation,
        ));
        Isometry3::from_parts(Translation3::from(self.translation), rot)
    }

    pub fn has_warning(&self, warning: &PoseWarning) -> bool {
        self.warnings.iter().any(|w| w == warning)
    }
}

/// Numerical sensitivity of the linear system, computed from the singular
/// values of `A` independently of the pose itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionReport {
    /// Singular values of `A` in descending order.
    pub singular_values: Vec<f64>,
    /// Ratio of largest to smallest singular value; `f64::INFINITY` when the
    /// smallest is exactly zero.
    pub condition: f64,
}

/// Estimate the pose of an object from reference points and their observed
/// normalized image coordinates, paired 1:1 by index.
///
/// This is the whole pipeline in one call: build the coefficient system,
/// solve it, decompose the solution, and attach the conditioning diagnostics.
///
/// # Errors
///
/// * [`PoseError::InsufficientCorrespondences`] and
///   [`PoseError::MismatchedCorrespondences`] for malformed input.
/// * [`PoseError::DegenerateGeometry`] when the reference points are
///   coplanar/collinear for the chosen model.
/// * [`PoseError::SingularSystem`] when the least-squares solve fails.
///
/// Gimbal lock and poor conditioning are not errors; they are reported in
/// [`PoseEstimate::warnings`].
pub fn estimate_pose(
    points: &[Point3<f64>],
    observations: &[Point2<f64>],
    model: ProjectionModel,
    config: &PoseConfig,
) -> Result<(PoseEstimate, ConditionReport), PoseError> {
    let system = CoefficientSystem::build(points, observations, model, config.rank_epsilon)?;
    let report = condition_report(&system);
    let mut estimate = decompose_system(&system, config)?;
    if report.condition > config.condition_threshold {
        log::warn!(
            "coefficient matrix is poorly conditioned: K(A) = {:.3e}",
            report.condition
        );
        estimate.warnings.push(PoseWarning::PoorlyConditioned {
            condition: report.condition,
        });
    }
    Ok((estimate, report))
}
