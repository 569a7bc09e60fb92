//! Camera state as seen from octree-local space.

use glam::{Mat4, Vec3};
use pointstream_core::{Aabb, Frustum};

/// Closest distance used for projection; avoids dividing by zero.
const MIN_DISTANCE: f32 = 1e-6;

/// View used by one traversal tick.
///
/// Everything is expressed in octree-local coordinates so node bounds can be
/// tested without transforming them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// Camera position in octree-local space.
    pub position: Vec3,
    /// Frustum in octree-local space.
    pub frustum: Frustum,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Viewport height in pixels.
    pub screen_height: f32,
    /// Largest axis scale of the world transform (local to world units).
    pub world_scale: f32,
}

impl ViewState {
    /// Build a view from world-space camera data and the cloud's world transform.
    pub fn from_camera(
        view_projection: Mat4,
        camera_position: Vec3,
        fov_y: f32,
        screen_height: f32,
        world: Mat4,
    ) -> Self {
        let (scale, _, _) = world.to_scale_rotation_translation();
        Self {
            position: world.inverse().transform_point3(camera_position),
            frustum: Frustum::from_view_projection(view_projection * world),
            fov_y,
            screen_height,
            world_scale: scale.abs().max_element(),
        }
    }

    /// A view that sees everything, positioned at `position` (local space).
    pub fn unbounded(position: Vec3, fov_y: f32, screen_height: f32) -> Self {
        Self {
            position,
            frustum: Frustum::unbounded(),
            fov_y,
            screen_height,
            world_scale: 1.0,
        }
    }

    pub fn is_visible(&self, bounds: &Aabb) -> bool {
        self.frustum.test_aabb(bounds)
    }

    /// Distance from the camera to the box center.
    pub fn distance_to(&self, bounds: &Aabb) -> f32 {
        self.position.distance(bounds.center())
    }

    /// Approximate on-screen radius of the box in pixels.
    ///
    /// Infinite while the camera is inside the box.
    pub fn projected_size(&self, bounds: &Aabb) -> f32 {
        if bounds.contains_point(self.position) {
            return f32::INFINITY;
        }
        let distance = self.distance_to(bounds).max(MIN_DISTANCE);
        let slope = (self.fov_y * 0.5).tan();
        bounds.radius() / (distance * slope) * (self.screen_height * 0.5)
    }

    /// Largest extent of the box in world units.
    pub fn world_size(&self, bounds: &Aabb) -> f32 {
        bounds.max_extent() * self.world_scale
    }
}
