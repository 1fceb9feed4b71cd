//! Assembly of the DLT coefficient system.
//!
//! The projective relation `observed = (M * point) / w` is nonlinear because
//! of the division by the homogeneous coordinate `w`. Cross-multiplying turns
//! each correspondence into two linear constraints on the entries of `M`;
//! stacking them gives the over-determined system solved in
//! [`super::decompose`]. With the trailing entry of `M` fixed to 1 the system
//! is non-homogeneous: the column belonging to that entry moves to the
//! right-hand side `b`.

use super::{PoseError, ProjectionModel};
use nalgebra::{DMatrix, DVector, Point2, Point3};

/// The assembled pair `(A, b)` for one batch of correspondences.
///
/// `A` has two rows per correspondence, in input order: rows `2i` and
/// `2i + 1` always come from correspondence `i` (x channel first). It has 8
/// columns for [`ProjectionModel::Planar`] and 11 for
/// [`ProjectionModel::Full`].
#[derive(Debug, Clone)]
pub struct CoefficientSystem {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    pub model: ProjectionModel,
}

impl CoefficientSystem {
    /// Build the coefficient system for `points` and `observations` paired by
    /// index.
    ///
    /// For the planar model the reference points are taken to lie on the
    /// plane `z = 0` of the object frame and their `z` coordinate is ignored.
    ///
    /// The geometry is validated before handing off to the solver: if the
    /// numerical rank of `A` (relative cutoff `rank_epsilon`) is below the
    /// unknown count, e.g. because points meant for the full model are
    /// coplanar, this fails with [`PoseError::DegenerateGeometry`].
    pub fn build(
        points: &[Point3<f64>],
        observations: &[Point2<f64>],
        model: ProjectionModel,
        rank_epsilon: f64,
    ) -> Result<Self, PoseError> {
        if points.len() != observations.len() {
            return Err(PoseError::MismatchedCorrespondences {
                points: points.len(),
                observations: observations.len(),
            });
        }
        let n = points.len();
        let required = model.min_correspondences();
        if n < required {
            return Err(PoseError::InsufficientCorrespondences {
                required,
                actual: n,
            });
        }

        let cols = model.unknowns();
        let mut a = DMatrix::<f64>::zeros(2 * n, cols);
        let mut b = DVector::<f64>::zeros(2 * n);

        for (i, (p, obs)) in points.iter().zip(observations.iter()).enumerate() {
            let (x, y, z) = (p.x, p.y, p.z);
            let (xn, yn) = (obs.x, obs.y);

            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            match model {
                ProjectionModel::Planar => {
                    a[(r0, 0)] = x;
                    a[(r0, 1)] = y;
                    a[(r0, 2)] = 1.0;
                    a[(r0, 6)] = -x * xn;
                    a[(r0, 7)] = -y * xn;

                    a[(r1, 3)] = x;
                    a[(r1, 4)] = y;
                    a[(r1, 5)] = 1.0;
                    a[(r1, 6)] = -x * yn;
                    a[(r1, 7)] = -y * yn;
                }
                ProjectionModel::Full => {
                    a[(r0, 0)] = x;
                    a[(r0, 1)] = y;
                    a[(r0, 2)] = z;
                    a[(r0, 3)] = 1.0;
                    a[(r0, 8)] = -x * xn;
                    a[(r0, 9)] = -y * xn;
                    a[(r0, 10)] = -z * xn;

                    a[(r1, 4)] = x;
                    a[(r1, 5)] = y;
                    a[(r1, 6)] = z;
                    a[(r1, 7)] = 1.0;
                    a[(r1, 8)] = -x * yn;
                    a[(r1, 9)] = -y * yn;
                    a[(r1, 10)] = -z * yn;
                }
            }

            b[r0] = xn;
            b[r1] = yn;
        }

        let system = CoefficientSystem { a, b, model };
        system.validate_rank(rank_epsilon)?;
        Ok(system)
    }

    fn validate_rank(&self, rank_epsilon: f64) -> Result<(), PoseError> {
        let svd = self.a.clone().svd(false, false);
        let max_sv = svd.singular_values.max();
        let rank = svd
            .singular_values
            .iter()
            .filter(|&&sv| sv > rank_epsilon * max_sv)
            .count();
        let required = self.model.unknowns();
        if rank < required {
            return Err(PoseError::DegenerateGeometry { rank, required });
        }
        Ok(())
    }
}
