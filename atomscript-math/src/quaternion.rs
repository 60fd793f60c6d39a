//! Quaternions for script-level rotation math.
//!
//! Scripts build quaternions from axis-angle pairs or rotation matrices
//! and combine them by multiplication; the runtime converts back to a
//! rotation matrix when a transform is applied.

use crate::matrix::Matrix3;
use crate::types::{approx_eq, Point3, Point4, Scalar};

/// A rotation quaternion `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
    pub w: Scalar,
}

impl Quaternion {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Create from raw components.
    #[inline]
    #[must_use]
    pub const fn new(x: Scalar, y: Scalar, z: Scalar, w: Scalar) -> Self {
        Self { x, y, z, w }
    }

    /// Build from an axis and an angle in degrees.
    #[must_use]
    pub fn from_axis_angle(axis: Point3, degrees: Scalar) -> Self {
        let axis = axis.normalized();
        let half = degrees.to_radians() / 2.0;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Build from an axis-angle [`Point4`] (`{x y z angle}` in scripts).
    #[must_use]
    pub fn from_point4(p: Point4) -> Self {
        Self::from_axis_angle(p.xyz(), p.w)
    }

    /// Hamilton product `self * other` (other applies first).
    #[must_use]
    pub fn mul(self, o: Self) -> Self {
        Self::new(
            self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
            self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
        )
    }

    /// The inverse rotation (conjugate of a unit quaternion).
    #[inline]
    #[must_use]
    pub const fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Normalize to unit length; identity for degenerate input.
    #[must_use]
    pub fn normalized(self) -> Self {
        let n = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if n < crate::types::NEAR_ZERO {
            Self::IDENTITY
        } else {
            Self::new(self.x / n, self.y / n, self.z / n, self.w / n)
        }
    }

    /// Convert to a rotation matrix.
    #[must_use]
    pub fn to_matrix(self) -> Matrix3 {
        let q = self.normalized();
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);
        Matrix3::from_rows([
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ])
    }

    /// Rotate a point.
    #[must_use]
    pub fn transform(self, p: Point3) -> Point3 {
        self.to_matrix().transform(p)
    }

    /// Approximate equality (treats `q` and `-q` as distinct).
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        approx_eq(self.x, other.x)
            && approx_eq(self.y, other.y)
            && approx_eq(self.z, other.z)
            && approx_eq(self.w, other.w)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::fmt::Display for Quaternion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{} {} {} {}}}", self.x, self.y, self.z, self.w)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_noop() {
        let p = Point3::new(1.0, 2.0, 3.0);
        assert!(Quaternion::IDENTITY.transform(p).approx_eq(p));
    }

    #[test]
    fn rotate_90_about_z() {
        let q = Quaternion::from_axis_angle(Point3::new(0.0, 0.0, 1.0), 90.0);
        let p = q.transform(Point3::new(1.0, 0.0, 0.0));
        assert!(p.approx_eq(Point3::new(0.0, 1.0, 0.0)), "got {p}");
    }

    #[test]
    fn composition_matches_matrix_product() {
        let a = Quaternion::from_axis_angle(Point3::new(0.0, 0.0, 1.0), 30.0);
        let b = Quaternion::from_axis_angle(Point3::new(1.0, 0.0, 0.0), 45.0);
        let p = Point3::new(0.3, -1.2, 2.0);
        let via_quat = a.mul(b).transform(p);
        let via_mats = a.to_matrix().mul(&b.to_matrix()).transform(p);
        assert!(via_quat.approx_eq(via_mats));
    }

    #[test]
    fn conjugate_inverts() {
        let q = Quaternion::from_axis_angle(Point3::new(0.0, 1.0, 0.0), 72.0);
        let p = Point3::new(1.0, 2.0, 3.0);
        assert!(q.conjugate().transform(q.transform(p)).approx_eq(p));
    }
}
