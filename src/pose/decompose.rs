//! Least-squares solve and decomposition of the projection parameters.
//!
//! The solution vector of the coefficient system, with its fixed trailing 1
//! appended, is reshaped into a projection whose left 3x3 block is a scaled,
//! sign-flipped copy of the object rotation. Decomposition peels those layers
//! off one at a time: the scale from the column norms, the translation from
//! the last column, and the rotation from a QR factorization followed by a
//! sign and handedness correction.
//!
//! The handedness correction deserves a note. Because the camera looks down
//! the negative z axis, the recovered projection carries the rotation with
//! its third row negated, and QR factorizations are only unique up to a sign
//! per column. The column signs are therefore normalized against the
//! diagonal of the triangular factor before the third row is flipped. The
//! round-trip tests below pin this behavior against ground truth; do not
//! change it without them.

use super::{
    CoefficientSystem, ConditionReport, EulerAngles, PoseConfig, PoseError, PoseEstimate,
    PoseWarning, ProjectionModel, SolveMethod,
};
use log::{debug, info};
use nalgebra::{DVector, Matrix3, Vector3};

/// Pitch is treated as gimbal locked when |sin(pitch)| is within this of 1.
const GIMBAL_LOCK_EPSILON: f64 = 1e-9;

/// Solve `min ||A h - b||^2` for the raw parameter vector.
///
/// The SVD backend also rejects rank-deficient systems with
/// [`PoseError::SingularSystem`]; the normal-equations backend fails the same
/// way when `A^T A` is not invertible.
pub fn solve_parameters(
    system: &CoefficientSystem,
    method: SolveMethod,
    rank_epsilon: f64,
) -> Result<DVector<f64>, PoseError> {
    match method {
        SolveMethod::Svd => {
            let svd = system.a.clone().svd(true, true);
            let max_sv = svd.singular_values.max();
            let cutoff = rank_epsilon * max_sv;
            let rank = svd
                .singular_values
                .iter()
                .filter(|&&sv| sv > cutoff)
                .count();
            if rank < system.model.unknowns() {
                return Err(PoseError::SingularSystem);
            }
            svd.solve(&system.b, cutoff)
                .map_err(|_| PoseError::SingularSystem)
        }
        SolveMethod::NormalEquations => {
            let ata = system.a.transpose() * &system.a;
            let atb = system.a.transpose() * &system.b;
            let inv = ata.try_inverse().ok_or(PoseError::SingularSystem)?;
            Ok(inv * atb)
        }
    }
}

/// Reshape the solved parameters into the raw rotation block and translation
/// column, appending the trailing entry that was fixed to 1.
///
/// For the planar model the two solved rotation columns span the photodiode
/// plane; the third is their cross product, normalized to the geometric mean
/// of their lengths so all three columns share the same scale. The cross
/// order (`f2 x f1`) absorbs the handedness flip introduced by the negated
/// third projection row.
fn reshape_solution(h: &DVector<f64>, model: ProjectionModel) -> (Matrix3<f64>, Vector3<f64>) {
    match model {
        ProjectionModel::Planar => {
            let f1 = Vector3::new(h[0], h[3], h[6]);
            let f2 = Vector3::new(h[1], h[4], h[7]);
            let cross = f2.cross(&f1);
            let f3 = cross / cross.norm().sqrt();
            let r_raw = Matrix3::from_columns(&[f1, f2, f3]);
            (r_raw, Vector3::new(h[2], h[5], 1.0))
        }
        ProjectionModel::Full => {
            let r_raw = Matrix3::new(h[0], h[1], h[2], h[4], h[5], h[6], h[8], h[9], h[10]);
            (r_raw, Vector3::new(h[3], h[7], 1.0))
        }
    }
}

/// Extract the orthonormal rotation from the raw 3x3 block.
fn rotation_from_raw(r_raw: &Matrix3<f64>) -> Matrix3<f64> {
    let qr = r_raw.qr();
    let upper = qr.r();
    let mut q = qr.q();
    // Column signs are arbitrary in a QR factorization; pin them so the
    // triangular factor has a positive diagonal.
    for j in 0..3 {
        if upper[(j, j)] < 0.0 {
            q.column_mut(j).neg_mut();
        }
    }
    // The projection rows were built for a camera looking down -z, which
    // negates the third row of the embedded rotation. Undo it.
    q.row_mut(2).neg_mut();
    // A left-handed frame can survive the steps above only for degenerate
    // input; full negation restores det = +1 without breaking orthonormality.
    if q.determinant() < 0.0 {
        q.neg_mut();
    }
    q
}

/// Reduce a rotation matrix to Euler angles in degrees for the composition
/// `R = Rz(roll) * Rx(pitch) * Ry(yaw)`.
///
/// Returns the angles and whether the rotation is gimbal locked. At pitch
/// = +-90 degrees only the sum (or difference) of roll and yaw is observable;
/// by convention roll is reported as 0 and yaw carries the combined angle.
fn euler_from_rotation(r: &Matrix3<f64>) -> (EulerAngles, bool) {
    let sin_pitch = r[(2, 1)].clamp(-1.0, 1.0);
    if 1.0 - sin_pitch.abs() < GIMBAL_LOCK_EPSILON {
        // In both locked configurations the first row reduces to
        // (cos(combined), 0, sin(combined)), with combined = roll + yaw at
        // +90 degrees and yaw - roll at -90.
        let yaw = r[(0, 2)].atan2(r[(0, 0)]);
        let euler = EulerAngles {
            roll: 0.0,
            pitch: 90.0_f64.copysign(sin_pitch),
            yaw: yaw.to_degrees(),
        };
        (euler, true)
    } else {
        let euler = EulerAngles {
            roll: (-r[(0, 1)]).atan2(r[(1, 1)]).to_degrees(),
            pitch: sin_pitch.asin().to_degrees(),
            yaw: (-r[(2, 0)]).atan2(r[(2, 2)]).to_degrees(),
        };
        (euler, false)
    }
}

/// Solve the coefficient system and decompose the solution into a
/// [`PoseEstimate`].
///
/// Conditioning diagnostics are not computed here; see [`condition_report`]
/// and [`super::estimate_pose`], which combines both.
pub fn decompose_system(
    system: &CoefficientSystem,
    config: &PoseConfig,
) -> Result<PoseEstimate, PoseError> {
    let h = solve_parameters(system, config.method, config.rank_epsilon)?;
    debug!("raw parameter vector: {:?}", h.as_slice());

    let (r_raw, t_raw) = reshape_solution(&h, system.model);

    let column_norm_sum =
        r_raw.column(0).norm() + r_raw.column(1).norm() + r_raw.column(2).norm();
    let scale = 3.0 / column_norm_sum;
    // The z sign flip mirrors the one hidden in the projection rows.
    let translation = scale * Vector3::new(t_raw.x, t_raw.y, -t_raw.z);
    let rotation = rotation_from_raw(&r_raw);

    if !scale.is_finite()
        || translation.iter().any(|v| !v.is_finite())
        || rotation.iter().any(|v| !v.is_finite())
    {
        return Err(PoseError::SingularSystem);
    }

    let (euler, gimbal_locked) = euler_from_rotation(&rotation);
    let mut warnings = Vec::new();
    if gimbal_locked {
        info!("pitch at +-90 degrees, roll/yaw coupled; reporting roll = 0");
        warnings.push(PoseWarning::GimbalLock);
    }

    Ok(PoseEstimate {
        scale,
        translation,
        rotation,
        euler,
        warnings,
    })
}

/// Singular values of the coefficient matrix and their max/min ratio.
pub fn condition_report(system: &CoefficientSystem) -> ConditionReport {
    let svd = system.a.clone().svd(false, false);
    let mut singular_values: Vec<f64> = svd.singular_values.iter().copied().collect();
    singular_values.sort_by(|x, y| y.total_cmp(x));

    let max_sv = singular_values[0];
    let min_sv = singular_values[singular_values.len() - 1];
    let condition = if min_sv > 0.0 {
        max_sv / min_sv
    } else {
        f64::INFINITY
    };

    ConditionReport {
        singular_values,
        condition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{photodiode_square, rotation_from_euler_deg, simulate_observations};
    use crate::pose::estimate_pose;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, Point3};

    fn full_model_points() -> Vec<Point3<f64>> {
        let mut points = photodiode_square(42.0, 25.0);
        points.push(Point3::new(-30.0, 10.0, 17.0));
        points.push(Point3::new(25.0, -12.0, 23.0));
        points.push(Point3::new(8.0, 30.0, -15.0));
        points.push(Point3::new(-12.0, -28.0, -9.0));
        points
    }

    fn run_case(
        points: &[Point3<f64>],
        yaw: f64,
        pitch: f64,
        roll: f64,
        translation: Vector3<f64>,
        model: ProjectionModel,
        config: &PoseConfig,
    ) -> (PoseEstimate, ConditionReport, Matrix3<f64>) {
        let rotation = rotation_from_euler_deg(yaw, pitch, roll);
        let observations = simulate_observations(&rotation, &translation, points).unwrap();
        let (estimate, report) = estimate_pose(points, &observations, model, config).unwrap();
        (estimate, report, rotation)
    }

    #[test]
    fn test_round_trip_identity_pose() {
        let points = photodiode_square(42.0, 25.0);
        let (estimate, report, _) = run_case(
            &points,
            0.0,
            0.0,
            0.0,
            Vector3::new(0.0, 0.0, -50.0),
            ProjectionModel::Planar,
            &PoseConfig::default(),
        );

        assert!((estimate.rotation - Matrix3::identity()).norm() < 1e-6);
        assert_relative_eq!(estimate.translation.z, -50.0, epsilon = 1e-6);
        assert!(estimate.translation.xy().norm() < 1e-6);
        assert_relative_eq!(estimate.scale, 50.0, epsilon = 1e-6);
        assert!(estimate.euler.roll.abs() < 1e-6);
        assert!(estimate.euler.pitch.abs() < 1e-6);
        assert!(estimate.euler.yaw.abs() < 1e-6);
        assert!(estimate.warnings.is_empty());

        // Axis-aligned square at a moderate distance is a well-behaved
        // system.
        assert!(report.condition.is_finite());
        assert!(report.condition < 1e4);
    }

    #[test]
    fn test_round_trip_tilted_pose() {
        // The reference scenario: 45 degrees of pitch and roll, off-center
        // translation.
        let points = photodiode_square(42.0, 25.0);
        let (estimate, _, rotation_gt) = run_case(
            &points,
            0.0,
            45.0,
            45.0,
            Vector3::new(10.0, 10.0, -50.0),
            ProjectionModel::Planar,
            &PoseConfig::default(),
        );

        assert!((estimate.rotation - rotation_gt).norm() < 1e-6);
        assert!((estimate.translation - Vector3::new(10.0, 10.0, -50.0)).norm() < 1e-6);
        assert_relative_eq!(estimate.euler.roll, 45.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.euler.pitch, 45.0, epsilon = 1e-6);
        assert!(estimate.euler.yaw.abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_full_model() {
        let points = full_model_points();
        let (estimate, report, rotation_gt) = run_case(
            &points,
            20.0,
            -30.0,
            10.0,
            Vector3::new(5.0, -3.0, -80.0),
            ProjectionModel::Full,
            &PoseConfig::default(),
        );

        assert!((estimate.rotation - rotation_gt).norm() < 1e-6);
        assert!((estimate.translation - Vector3::new(5.0, -3.0, -80.0)).norm() < 1e-6);
        assert_relative_eq!(estimate.scale, 80.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.euler.yaw, 20.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.euler.pitch, -30.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.euler.roll, 10.0, epsilon = 1e-6);
        assert!(report.condition.is_finite());
    }

    #[test]
    fn test_rotation_always_orthonormal() {
        let points = photodiode_square(42.0, 25.0);
        let cases = [
            (0.0, 0.0, 0.0, Vector3::new(0.0, 0.0, -50.0)),
            (0.0, 45.0, 45.0, Vector3::new(10.0, 10.0, -50.0)),
            (20.0, -30.0, 10.0, Vector3::new(5.0, -3.0, -80.0)),
            (-15.0, 10.0, 120.0, Vector3::new(0.0, 4.0, -60.0)),
        ];
        for (yaw, pitch, roll, translation) in cases {
            let (estimate, _, rotation_gt) = run_case(
                &points,
                yaw,
                pitch,
                roll,
                translation,
                ProjectionModel::Planar,
                &PoseConfig::default(),
            );
            let r = estimate.rotation;
            assert!((r.transpose() * r - Matrix3::identity()).norm() < 1e-9);
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
            assert!(estimate.scale > 0.0);
            assert!((r - rotation_gt).norm() < 1e-6);
        }
    }

    #[test]
    fn test_idempotent() {
        let points = photodiode_square(42.0, 25.0);
        let rotation = rotation_from_euler_deg(0.0, 45.0, 45.0);
        let translation = Vector3::new(10.0, 10.0, -50.0);
        let observations = simulate_observations(&rotation, &translation, &points).unwrap();

        let config = PoseConfig::default();
        let (first, report_a) =
            estimate_pose(&points, &observations, ProjectionModel::Planar, &config).unwrap();
        let (second, report_b) =
            estimate_pose(&points, &observations, ProjectionModel::Planar, &config).unwrap();

        assert_eq!(first.scale, second.scale);
        assert_eq!(first.translation, second.translation);
        assert_eq!(first.rotation, second.rotation);
        assert_eq!(report_a.singular_values, report_b.singular_values);
    }

    #[test]
    fn test_gimbal_lock_positive_pitch() {
        // A planar target at pitch 90 is edge-on and degenerate, so gimbal
        // lock is exercised through the full model.
        let points = full_model_points();
        let (estimate, _, _) = run_case(
            &points,
            30.0,
            90.0,
            20.0,
            Vector3::new(0.0, 0.0, -50.0),
            ProjectionModel::Full,
            &PoseConfig::default(),
        );

        assert!(estimate.has_warning(&PoseWarning::GimbalLock));
        assert_relative_eq!(estimate.euler.pitch, 90.0, epsilon = 1e-6);
        assert_eq!(estimate.euler.roll, 0.0);
        // Only roll + yaw is observable; the convention folds it into yaw.
        assert_relative_eq!(estimate.euler.yaw, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gimbal_lock_negative_pitch() {
        let points = full_model_points();
        let (estimate, _, _) = run_case(
            &points,
            10.0,
            -90.0,
            5.0,
            Vector3::new(2.0, 1.0, -60.0),
            ProjectionModel::Full,
            &PoseConfig::default(),
        );

        assert!(estimate.has_warning(&PoseWarning::GimbalLock));
        assert_relative_eq!(estimate.euler.pitch, -90.0, epsilon = 1e-6);
        assert_eq!(estimate.euler.roll, 0.0);
        // At -90 the observable combination is yaw - roll, sign included.
        assert_relative_eq!(estimate.euler.yaw, 5.0, epsilon = 1e-6);

        let (estimate, _, _) = run_case(
            &points,
            5.0,
            -90.0,
            10.0,
            Vector3::new(2.0, 1.0, -60.0),
            ProjectionModel::Full,
            &PoseConfig::default(),
        );
        assert_relative_eq!(estimate.euler.yaw, -5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_poorly_conditioned_warning() {
        // Nearly collinear photodiodes: solvable, but barely.
        let points = vec![
            Point3::new(-42.0, 0.001, 0.0),
            Point3::new(42.0, -0.001, 0.0),
            Point3::new(10.0, 0.0005, 0.0),
            Point3::new(-10.0, -0.0005, 0.0),
        ];
        let rotation = rotation_from_euler_deg(0.0, 0.0, 0.0);
        let translation = Vector3::new(0.0, 0.0, -50.0);
        let observations = simulate_observations(&rotation, &translation, &points).unwrap();

        let (estimate, report) = estimate_pose(
            &points,
            &observations,
            ProjectionModel::Planar,
            &PoseConfig::default(),
        )
        .unwrap();

        assert!(report.condition > 1e6);
        assert!(estimate
            .warnings
            .iter()
            .any(|w| matches!(w, PoseWarning::PoorlyConditioned { .. })));
    }

    #[test]
    fn test_normal_equations_fallback_agrees() {
        let points = photodiode_square(42.0, 25.0);
        let config = PoseConfig {
            method: SolveMethod::NormalEquations,
            ..PoseConfig::default()
        };
        let (estimate, _, rotation_gt) = run_case(
            &points,
            0.0,
            45.0,
            45.0,
            Vector3::new(10.0, 10.0, -50.0),
            ProjectionModel::Planar,
            &config,
        );

        assert!((estimate.rotation - rotation_gt).norm() < 1e-6);
        assert!((estimate.translation - Vector3::new(10.0, 10.0, -50.0)).norm() < 1e-6);
    }

    #[test]
    fn test_all_zero_system_is_singular() {
        let system = CoefficientSystem {
            a: DMatrix::zeros(8, 8),
            b: DVector::zeros(8),
            model: ProjectionModel::Planar,
        };
        let err = solve_parameters(&system, SolveMethod::Svd, 1e-12).unwrap_err();
        assert!(matches!(err, PoseError::SingularSystem));
        let err = solve_parameters(&system, SolveMethod::NormalEquations, 1e-12).unwrap_err();
        assert!(matches!(err, PoseError::SingularSystem));
    }

    #[test]
    fn test_condition_report_sorted() {
        let points = photodiode_square(42.0, 25.0);
        let rotation = rotation_from_euler_deg(0.0, 45.0, 45.0);
        let translation = Vector3::new(10.0, 10.0, -50.0);
        let observations = simulate_observations(&rotation, &translation, &points).unwrap();
        let system =
            CoefficientSystem::build(&points, &observations, ProjectionModel::Planar, 1e-12)
                .unwrap();

        let report = condition_report(&system);
        assert_eq!(report.singular_values.len(), 8);
        for pair in report.singular_values.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        let expected = report.singular_values[0] / report.singular_values[7];
        assert_relative_eq!(report.condition, expected);
    }

    #[test]
    fn test_isometry_matches_matrix() {
        let points = photodiode_square(42.0, 25.0);
        let (estimate, _, _) = run_case(
            &points,
            20.0,
            -30.0,
            10.0,
            Vector3::new(5.0, -3.0, -80.0),
            ProjectionModel::Planar,
            &PoseConfig::default(),
        );

        let iso = estimate.isometry();
        assert!((iso.translation.vector - estimate.translation).norm() < 1e-12);
        let r_from_quat = iso.rotation.to_rotation_matrix();
        assert!((r_from_quat.matrix() - estimate.rotation).norm() < 1e-9);
    }
}
