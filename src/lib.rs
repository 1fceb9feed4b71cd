//! Lighthouse Pose Library
//!
//! A Rust library for recovering the position and orientation of a rigid
//! object carrying known reference points (e.g. the photodiodes of a VR
//! tracking board) from their 2D normalized image-plane projections.
//! The estimator is a batch, single-shot Direct Linear Transformation:
//! - assemble the over-determined linear system relating reference points to
//!   observations,
//! - solve it via least squares,
//! - decompose the solution into scale, translation, rotation and Euler
//!   angles,
//! - and report the conditioning of the system alongside the estimate.
//!
//! The library also includes the forward image-formation model used to
//! synthesize observations for testing the estimator end to end.

pub mod geometry;
pub mod pose;

// Re-export commonly used types
pub use pose::{
    estimate_pose, CoefficientSystem, ConditionReport, EulerAngles, PoseConfig, PoseError,
    PoseEstimate, PoseWarning, ProjectionModel, SolveMethod,
};
