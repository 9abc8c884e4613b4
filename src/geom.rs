//! Coordinate systems, rectangles and affine transforms.
//!
//! Two coordinate systems are used throughout the core:
//!
//! - **Canonical**: continuous, pixel-aspect-corrected, mip-level-independent.
//!   Regions of definition and regions of interest are always expressed here.
//! - **Pixel**: integer, at a specific mip-level, with pixel aspect applied.
//!   Image bounds and tile rectangles are expressed here.
//!
//! [`RectD`] and [`RectI`] are kept as distinct types so a mismatched
//! coordinate system is a compile error rather than a silent bug — the
//! conversion only happens through [`RectD::to_pixel`] / [`RectI::to_canonical`],
//! which take the mip-level scale and pixel aspect explicitly.

use glam::{Mat3, Vec2};

/// A canonical-space rectangle (continuous coordinates).
///
/// `None` bounds are represented as [`RectD::INFINITE`] rather than via an
/// `Option`, matching how an "infinite region of definition" is represented
/// in the planner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectD {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl RectD {
    pub const EMPTY: RectD = RectD { x0: 0.0, y0: 0.0, x1: 0.0, y1: 0.0 };
    pub const INFINITE: RectD = RectD {
        x0: f64::NEG_INFINITY,
        y0: f64::NEG_INFINITY,
        x1: f64::INFINITY,
        y1: f64::INFINITY,
    };

    #[must_use]
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        debug_assert!(x0 <= x1 && y0 <= y1, "degenerate rect: {x0},{y0} .. {x1},{y1}");
        Self { x0, y0, x1, y1 }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.x0.is_infinite() || self.y0.is_infinite() || self.x1.is_infinite() || self.y1.is_infinite()
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).max(0.0)
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).max(0.0)
    }

    /// Union of two canonical rectangles. A null rectangle is absorbed
    /// without affecting the result (used by the planner's pass-2 union).
    #[must_use]
    pub fn union(&self, other: &RectD) -> RectD {
        if self.is_null() {
            return *other;
        }
        if other.is_null() {
            return *self;
        }
        RectD {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    #[must_use]
    pub fn intersect(&self, other: &RectD) -> RectD {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x1 <= x0 || y1 <= y0 {
            RectD::EMPTY
        } else {
            RectD { x0, y0, x1, y1 }
        }
    }

    /// Clip an infinite (or partially infinite) rectangle against a finite
    /// project-format bound, per the configurable policy in
    /// [`crate::config::InfiniteRodPolicy`].
    #[must_use]
    pub fn clip_infinite(&self, project_format: &RectD, inputs_union: &RectD) -> RectD {
        let x0 = if self.x0.is_infinite() { project_format.x0.min(inputs_union.x0) } else { self.x0 };
        let y0 = if self.y0.is_infinite() { project_format.y0.min(inputs_union.y0) } else { self.y0 };
        let x1 = if self.x1.is_infinite() { project_format.x1.max(inputs_union.x1) } else { self.x1 };
        let y1 = if self.y1.is_infinite() { project_format.y1.max(inputs_union.y1) } else { self.y1 };
        RectD { x0, y0, x1, y1 }
    }

    /// Projects this canonical rectangle to pixel coordinates at the given
    /// mip-level scale (`2^-level`) and pixel aspect ratio.
    #[must_use]
    pub fn to_pixel(&self, scale: f64, pixel_aspect: f64) -> RectI {
        RectI {
            x0: (self.x0 * scale / pixel_aspect).floor() as i32,
            y0: (self.y0 * scale).floor() as i32,
            x1: (self.x1 * scale / pixel_aspect).ceil() as i32,
            y1: (self.y1 * scale).ceil() as i32,
        }
    }

    /// Transforms the four corners by `m` and returns the enclosing
    /// axis-aligned rectangle. Used when concatenating affine transforms
    /// across a chain of nodes.
    #[must_use]
    pub fn transform_by(&self, m: &Mat3) -> RectD {
        if self.is_infinite() {
            return *self;
        }
        let corners = [
            Vec2::new(self.x0 as f32, self.y0 as f32),
            Vec2::new(self.x1 as f32, self.y0 as f32),
            Vec2::new(self.x0 as f32, self.y1 as f32),
            Vec2::new(self.x1 as f32, self.y1 as f32),
        ];
        let mut out = RectD::INFINITE;
        out.x0 = f64::INFINITY;
        out.y0 = f64::INFINITY;
        out.x1 = f64::NEG_INFINITY;
        out.y1 = f64::NEG_INFINITY;
        for c in corners {
            let p = *m * c.extend(1.0);
            out.x0 = out.x0.min(f64::from(p.x));
            out.y0 = out.y0.min(f64::from(p.y));
            out.x1 = out.x1.max(f64::from(p.x));
            out.y1 = out.y1.max(f64::from(p.y));
        }
        out
    }
}

/// A pixel-space rectangle at a specific mip-level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct RectI {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl RectI {
    pub const EMPTY: RectI = RectI { x0: 0, y0: 0, x1: 0, y1: 0 };

    #[must_use]
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    #[must_use]
    pub fn width(&self) -> i32 {
        (self.x1 - self.x0).max(0)
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        (self.y1 - self.y0).max(0)
    }

    #[must_use]
    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    #[must_use]
    pub fn contains(&self, other: &RectI) -> bool {
        other.is_null()
            || (self.x0 <= other.x0 && self.y0 <= other.y0 && self.x1 >= other.x1 && self.y1 >= other.y1)
    }

    #[must_use]
    pub fn intersect(&self, other: &RectI) -> RectI {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x1 <= x0 || y1 <= y0 { RectI::EMPTY } else { RectI { x0, y0, x1, y1 } }
    }

    #[must_use]
    pub fn union(&self, other: &RectI) -> RectI {
        if self.is_null() {
            return *other;
        }
        if other.is_null() {
            return *self;
        }
        RectI {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    #[must_use]
    pub fn to_canonical(&self, scale: f64, pixel_aspect: f64) -> RectD {
        RectD {
            x0: f64::from(self.x0) / scale * pixel_aspect,
            y0: f64::from(self.y0) / scale,
            x1: f64::from(self.x1) / scale * pixel_aspect,
            y1: f64::from(self.y1) / scale,
        }
    }

    /// Splits this rectangle into horizontal scanline strips of `rows_per_tile`
    /// rows each, used by the executor's adaptive tiling.
    #[must_use]
    pub fn split_scanlines(&self, rows_per_tile: i32) -> Vec<RectI> {
        if self.is_null() {
            return Vec::new();
        }
        let rows_per_tile = rows_per_tile.max(1);
        let mut out = Vec::new();
        let mut y = self.y0;
        while y < self.y1 {
            let y1 = (y + rows_per_tile).min(self.y1);
            out.push(RectI { x0: self.x0, y0: y, x1: self.x1, y1 });
            y = y1;
        }
        out
    }
}

/// Returns `scale = 2^-level`, the canonical-to-pixel scale factor for a
/// mip-level.
#[must_use]
pub fn mip_scale(level: u32) -> f64 {
    1.0 / f64::from(1u32 << level)
}

/// A 3x3 affine transform, wrapping [`glam::Mat3`] for concatenation.
///
/// Transform concatenation (§4.3 d, §8 property 8) composes a chain of
/// per-node matrices with ordinary matrix multiplication, which is
/// associative by construction — `(a * b) * c == a * (b * c)` holds exactly
/// for `glam::Mat3`'s floating point multiply up to the same rounding on
/// both sides, since no other operation is interposed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform(pub Mat3);

impl Transform {
    #[must_use]
    pub fn identity() -> Self {
        Self(Mat3::IDENTITY)
    }

    #[must_use]
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self(Mat3::from_translation(Vec2::new(dx as f32, dy as f32)))
    }

    #[must_use]
    pub fn then(&self, next: &Transform) -> Transform {
        Transform(next.0 * self.0)
    }

    /// Maps one canonical-space point through this transform.
    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.0 * Vec2::new(x as f32, y as f32).extend(1.0);
        (f64::from(p.x), f64::from(p.y))
    }

    #[must_use]
    pub fn inverse(&self) -> Option<Transform> {
        let det = self.0.determinant();
        if det.abs() < f32::EPSILON {
            None
        } else {
            Some(Transform(self.0.inverse()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_absorbs_null() {
        let a = RectD::new(0.0, 0.0, 10.0, 10.0);
        let b = RectD::EMPTY;
        assert_eq!(a.union(&b), a);
        assert_eq!(b.union(&a), a);
    }

    #[test]
    fn union_is_commutative_superset() {
        let a = RectD::new(0.0, 0.0, 10.0, 10.0);
        let b = RectD::new(5.0, 5.0, 20.0, 8.0);
        let u = a.union(&b);
        assert!(u.x0 <= a.x0.min(b.x0));
        assert!(u.x1 >= a.x1.max(b.x1));
    }

    #[test]
    fn clip_infinite_uses_project_format_and_inputs() {
        let inf = RectD::INFINITE;
        let project = RectD::new(0.0, 0.0, 1920.0, 1080.0);
        let inputs = RectD::new(-100.0, -100.0, 100.0, 100.0);
        let clipped = inf.clip_infinite(&project, &inputs);
        assert_eq!(clipped.x0, -100.0);
        assert_eq!(clipped.x1, 1920.0);
    }

    #[test]
    fn transform_concatenation_is_associative() {
        let a = Transform::translate(1.0, 0.0);
        let b = Transform::translate(0.0, 2.0);
        let c = Transform::translate(3.0, 3.0);
        let left = a.then(&b).then(&c);
        let right = a.then(&b.then(&c));
        assert!((left.0.to_cols_array_2d()[2][0] - right.0.to_cols_array_2d()[2][0]).abs() < 1e-5);
        assert!((left.0.to_cols_array_2d()[2][1] - right.0.to_cols_array_2d()[2][1]).abs() < 1e-5);
    }

    #[test]
    fn scanline_split_covers_whole_window() {
        let window = RectI::new(0, 0, 64, 64);
        let tiles = window.split_scanlines(1);
        assert_eq!(tiles.len(), 64);
        let union = tiles.iter().fold(RectI::EMPTY, |acc, r| acc.union(r));
        assert_eq!(union, window);
    }

    #[test]
    fn pixel_roundtrip_at_scale_one() {
        let canon = RectD::new(0.0, 0.0, 100.0, 50.0);
        let px = canon.to_pixel(1.0, 1.0);
        assert_eq!(px, RectI::new(0, 0, 100, 50));
    }
}
