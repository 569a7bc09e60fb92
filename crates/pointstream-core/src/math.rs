//! Math utilities and helpers.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at `center` with given half-extents
    #[inline]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Largest extent along any axis
    #[inline]
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    /// Radius of the bounding sphere around the box
    #[inline]
    pub fn radius(&self) -> f32 {
        self.size().length() * 0.5
    }

    /// Whether `min <= max` on every axis
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Check if this AABB intersects another
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Split into the octant selected by the low three bits of `index`
    /// (bit 0 = +x, bit 1 = +y, bit 2 = +z)
    pub fn octant(&self, index: usize) -> Self {
        let center = self.center();
        let pick = |bit: usize, lo: f32, mid: f32, hi: f32| {
            if index & bit == 0 {
                (lo, mid)
            } else {
                (mid, hi)
            }
        };
        let (x0, x1) = pick(1, self.min.x, center.x, self.max.x);
        let (y0, y1) = pick(2, self.min.y, center.y, self.max.y);
        let (z0, z1) = pick(4, self.min.z, center.z, self.max.z);
        Self::new(Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
    }

    /// Merge two AABBs
    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Frustum for culling operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    /// Six frustum planes (left, right, bottom, top, near, far)
    /// Each plane is (nx, ny, nz, d) where n is normal and d is distance
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: Mat4) -> Self {
        let row0 = vp.row(0);
        let row1 = vp.row(1);
        let row2 = vp.row(2);
        let row3 = vp.row(3);

        let planes = [
            normalize_plane(row3 + row0), // Left
            normalize_plane(row3 - row0), // Right
            normalize_plane(row3 + row1), // Bottom
            normalize_plane(row3 - row1), // Top
            normalize_plane(row3 + row2), // Near
            normalize_plane(row3 - row2), // Far
        ];

        Self { planes }
    }

    /// A frustum that accepts every box.
    pub const fn unbounded() -> Self {
        Self {
            planes: [Vec4::new(0.0, 0.0, 0.0, 1.0); 6],
        }
    }

    /// Test if an AABB is inside or intersects the frustum
    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let normal = plane.truncate();

            // Find the positive vertex (furthest along plane normal)
            let p = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);

            if normal.dot(p) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

/// Normalize a plane by the length of its normal (not the full 4-vector).
fn normalize_plane(plane: Vec4) -> Vec4 {
    let len = plane.truncate().length();
    if len > f32::EPSILON {
        plane / len
    } else {
        plane
    }
}
