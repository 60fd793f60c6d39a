//! 3×3 and 4×4 matrices for rotation and model transforms.
//!
//! Row-major storage. A `Matrix4` is treated as an affine transform:
//! the upper-left 3×3 block rotates/scales, the last column translates.

use crate::types::{approx_eq, Point3, Point4, Scalar};

// ---------------------------------------------------------------------------
// Matrix3
// ---------------------------------------------------------------------------

/// A 3×3 matrix, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3 {
    pub m: [Scalar; 9],
}

impl Matrix3 {
    /// The identity matrix.
    pub const IDENTITY: Self = Self {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Create from a row-major array.
    #[inline]
    #[must_use]
    pub const fn from_rows(m: [Scalar; 9]) -> Self {
        Self { m }
    }

    /// Element at `(row, col)`, 0-based.
    #[inline]
    #[must_use]
    pub const fn get(&self, row: usize, col: usize) -> Scalar {
        self.m[row * 3 + col]
    }

    /// Set element at `(row, col)`, 0-based.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: Scalar) {
        self.m[row * 3 + col] = v;
    }

    /// Row as a [`Point3`].
    #[must_use]
    pub const fn row(&self, r: usize) -> Point3 {
        Point3::new(self.m[r * 3], self.m[r * 3 + 1], self.m[r * 3 + 2])
    }

    /// Matrix × matrix.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                let mut sum = 0.0;
                for k in 0..3 {
                    sum += self.get(r, k) * other.get(k, c);
                }
                out[r * 3 + c] = sum;
            }
        }
        Self { m: out }
    }

    /// Matrix × point (column vector).
    #[must_use]
    pub fn transform(&self, p: Point3) -> Point3 {
        Point3::new(
            self.row(0).dot(p),
            self.row(1).dot(p),
            self.row(2).dot(p),
        )
    }

    /// Scale every element.
    #[must_use]
    pub fn scale(&self, s: Scalar) -> Self {
        let mut m = self.m;
        for v in &mut m {
            *v *= s;
        }
        Self { m }
    }

    /// Componentwise addition.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut m = self.m;
        for (v, o) in m.iter_mut().zip(other.m) {
            *v += o;
        }
        Self { m }
    }

    /// Componentwise subtraction.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        let mut m = self.m;
        for (v, o) in m.iter_mut().zip(other.m) {
            *v -= o;
        }
        Self { m }
    }

    /// Transpose.
    #[must_use]
    pub fn transposed(&self) -> Self {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[c * 3 + r] = self.m[r * 3 + c];
            }
        }
        Self { m: out }
    }

    /// Approximate equality, element by element.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.m.iter().zip(other.m).all(|(a, b)| approx_eq(*a, b))
    }
}

impl Default for Matrix3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::fmt::Display for Matrix3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[ [{} {} {}] [{} {} {}] [{} {} {}] ]",
            self.m[0],
            self.m[1],
            self.m[2],
            self.m[3],
            self.m[4],
            self.m[5],
            self.m[6],
            self.m[7],
            self.m[8]
        )
    }
}

// ---------------------------------------------------------------------------
// Matrix4
// ---------------------------------------------------------------------------

/// A 4×4 matrix, row-major, used as an affine model transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    pub m: [Scalar; 16],
}

impl Matrix4 {
    /// The identity matrix.
    pub const IDENTITY: Self = Self {
        m: [
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Create from a row-major array.
    #[inline]
    #[must_use]
    pub const fn from_rows(m: [Scalar; 16]) -> Self {
        Self { m }
    }

    /// Build from a rotation block and a translation column.
    #[must_use]
    pub const fn from_rotation_translation(rot: &Matrix3, t: Point3) -> Self {
        let r = &rot.m;
        Self {
            m: [
                r[0], r[1], r[2], t.x, r[3], r[4], r[5], t.y, r[6], r[7], r[8], t.z, 0.0, 0.0,
                0.0, 1.0,
            ],
        }
    }

    /// Element at `(row, col)`, 0-based.
    #[inline]
    #[must_use]
    pub const fn get(&self, row: usize, col: usize) -> Scalar {
        self.m[row * 4 + col]
    }

    /// Set element at `(row, col)`, 0-based.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, v: Scalar) {
        self.m[row * 4 + col] = v;
    }

    /// The rotation block.
    #[must_use]
    pub const fn rotation(&self) -> Matrix3 {
        Matrix3::from_rows([
            self.m[0], self.m[1], self.m[2], self.m[4], self.m[5], self.m[6], self.m[8],
            self.m[9], self.m[10],
        ])
    }

    /// The translation column.
    #[must_use]
    pub const fn translation(&self) -> Point3 {
        Point3::new(self.m[3], self.m[7], self.m[11])
    }

    /// Matrix × matrix.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.get(r, k) * other.get(k, c);
                }
                out[r * 4 + c] = sum;
            }
        }
        Self { m: out }
    }

    /// Transform a 3-point as a position (w = 1).
    #[must_use]
    pub fn transform(&self, p: Point3) -> Point3 {
        let q = Point4::new(p.x, p.y, p.z, 1.0);
        let out = self.transform4(q);
        out.xyz()
    }

    /// Matrix × 4-point.
    #[must_use]
    pub fn transform4(&self, p: Point4) -> Point4 {
        let mut out = [0.0; 4];
        for (r, o) in out.iter_mut().enumerate() {
            *o = self.get(r, 3).mul_add(
                p.w,
                self.get(r, 2).mul_add(
                    p.z,
                    self.get(r, 0).mul_add(p.x, self.get(r, 1) * p.y),
                ),
            );
        }
        Point4::new(out[0], out[1], out[2], out[3])
    }

    /// Componentwise addition.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut m = self.m;
        for (v, o) in m.iter_mut().zip(other.m) {
            *v += o;
        }
        Self { m }
    }

    /// Componentwise subtraction.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        let mut m = self.m;
        for (v, o) in m.iter_mut().zip(other.m) {
            *v -= o;
        }
        Self { m }
    }

    /// Scale every element.
    #[must_use]
    pub fn scale(&self, s: Scalar) -> Self {
        let mut m = self.m;
        for v in &mut m {
            *v *= s;
        }
        Self { m }
    }

    /// Approximate equality, element by element.
    #[must_use]
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.m.iter().zip(other.m).all(|(a, b)| approx_eq(*a, b))
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::fmt::Display for Matrix4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[ ")?;
        for r in 0..4 {
            write!(
                f,
                "[{} {} {} {}] ",
                self.get(r, 0),
                self.get(r, 1),
                self.get(r, 2),
                self.get(r, 3)
            )?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
