//! Geometry and numeric support for the atomscript engine.

pub mod math;
pub mod matrix;
pub mod quaternion;
pub mod types;

pub use matrix::{Matrix3, Matrix4};
pub use quaternion::Quaternion;
pub use types::{Point3, Point4, Scalar};
