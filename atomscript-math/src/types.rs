//! Point types used by the scripting runtime.
//!
//! `Point3` is a position or vector in model space; `Point4` carries a
//! fourth component and doubles as the storage for axis-angle and plane
//! values in scripts.

/// Scalar type used throughout the engine.
pub type Scalar = f64;

/// Tolerance for approximate comparisons in script semantics.
///
/// Two scalars closer than this compare equal under the script `==`
/// operator; display rounding uses the same cutoff.
pub const NEAR_ZERO: Scalar = 1e-6;

#[inline]
#[must_use]
pub fn approx_eq(a: Scalar, b: Scalar) -> bool {
    (a - b).abs() < NEAR_ZERO
}

// ---------------------------------------------------------------------------
// Point3
// ---------------------------------------------------------------------------

/// A point or vector with three components.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
}

impl Point3 {
    /// The origin.
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a point from components.
    #[inline]
    #[must_use]
    pub const fn new(x: Scalar, y: Scalar, z: Scalar) -> Self {
        Self { x, y, z }
    }

    /// Componentwise addition.
    #[inline]
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Componentwise subtraction.
    #[inline]
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Scale by a scalar.
    #[inline]
    #[must_use]
    pub fn scale(self, s: Scalar) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, other: Self) -> Scalar {
        self.z.mul_add(other.z, self.x.mul_add(other.x, self.y * other.y))
    }

    /// Cross product.
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y.mul_add(other.z, -(self.z * other.y)),
            self.z.mul_add(other.x, -(self.x * other.z)),
            self.x.mul_add(other.y, -(self.y * other.x)),
        )
    }

    /// Euclidean length.
    #[inline]
    #[must_use]
    pub fn length(self) -> Scalar {
        self.dot(self).sqrt()
    }

    /// Distance to another point.
    #[inline]
    #[must_use]
    pub fn distance(self, other: Self) -> Scalar {
        self.sub(other).length()
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len < NEAR_ZERO {
            Self::ZERO
        } else {
            self.scale(1.0 / len)
        }
    }

    /// Component by 0-based index (`x`, `y`, `z`).
    #[must_use]
    pub const fn component(self, i: usize) -> Option<Scalar> {
        match i {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            _ => None,
        }
    }

    /// Approximate equality under [`NEAR_ZERO`].
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        approx_eq(self.x, other.x) && approx_eq(self.y, other.y) && approx_eq(self.z, other.z)
    }
}

impl std::fmt::Display for Point3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{} {} {}}}", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Point4
// ---------------------------------------------------------------------------

/// A point with four components (axis-angle, plane, or homogeneous point).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point4 {
    pub x: Scalar,
    pub y: Scalar,
    pub z: Scalar,
    pub w: Scalar,
}

impl Point4 {
    /// Create a point from components.
    #[inline]
    #[must_use]
    pub const fn new(x: Scalar, y: Scalar, z: Scalar, w: Scalar) -> Self {
        Self { x, y, z, w }
    }

    /// The first three components as a [`Point3`].
    #[inline]
    #[must_use]
    pub const fn xyz(self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }

    /// Componentwise addition.
    #[inline]
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::new(
            self.x + other.x,
            self.y + other.y,
            self.z + other.z,
            self.w + other.w,
        )
    }

    /// Componentwise subtraction.
    #[inline]
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::new(
            self.x - other.x,
            self.y - other.y,
            self.z - other.z,
            self.w - other.w,
        )
    }

    /// Scale by a scalar.
    #[inline]
    #[must_use]
    pub fn scale(self, s: Scalar) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    /// Component by 0-based index.
    #[must_use]
    pub const fn component(self, i: usize) -> Option<Scalar> {
        match i {
            0 => Some(self.x),
            1 => Some(self.y),
            2 => Some(self.z),
            3 => Some(self.w),
            _ => None,
        }
    }

    /// Approximate equality under [`NEAR_ZERO`].
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        approx_eq(self.x, other.x)
            && approx_eq(self.y, other.y)
            && approx_eq(self.z, other.z)
            && approx_eq(self.w, other.w)
    }
}

impl std::fmt::Display for Point4 {
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
    fn point3_arithmetic() {
        let a = Point3::new(1.0, 2.0, 3.0);
        let b = Point3::new(4.0, 5.0, 6.0);
        assert_eq!(a.add(b), Point3::new(5.0, 7.0, 9.0));
        assert_eq!(b.sub(a), Point3::new(3.0, 3.0, 3.0));
        assert_eq!(a.scale(2.0), Point3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn point3_dot_and_cross() {
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::new(0.0, 1.0, 0.0);
        assert_eq!(a.dot(b), 0.0);
        assert_eq!(a.cross(b), Point3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn point3_length_and_distance() {
        let a = Point3::new(3.0, 4.0, 0.0);
        assert!(approx_eq(a.length(), 5.0));
        assert!(approx_eq(a.distance(Point3::ZERO), 5.0));
    }

    #[test]
    fn point3_normalized_zero_stays_zero() {
        assert_eq!(Point3::ZERO.normalized(), Point3::ZERO);
        let n = Point3::new(0.0, 3.0, 0.0).normalized();
        assert!(n.approx_eq(Point3::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn point3_display() {
        assert_eq!(format!("{}", Point3::new(1.0, 2.5, -3.0)), "{1 2.5 -3}");
    }

    #[test]
    fn point4_components() {
        let p = Point4::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(p.component(3), Some(4.0));
        assert_eq!(p.component(4), None);
        assert_eq!(p.xyz(), Point3::new(1.0, 2.0, 3.0));
    }
}
