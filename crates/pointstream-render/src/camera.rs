//! Camera and view management.

use glam::{Mat4, Vec3};
use pointstream_core::Frustum;
use pointstream_stream::ViewState;

/// Camera for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a new camera.
    pub fn new(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let direction = (target - position).normalize();
        Self {
            position,
            direction,
            up,
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Place the camera on a horizontal circle around `target`, looking at it.
    ///
    /// `angle` is in radians, measured from +x towards +z.
    pub fn orbit(&mut self, target: Vec3, distance: f32, angle: f32) {
        self.position = target + Vec3::new(angle.cos(), 0.0, angle.sin()) * distance;
        self.look_at(target);
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Extract frustum planes from the current camera state.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection_matrix())
    }

    /// Traversal view of a cloud placed in the world by `world`.
    pub fn view_state(&self, world: Mat4, screen_height: f32) -> ViewState {
        ViewState::from_camera(
            self.view_projection_matrix(),
            self.position,
            self.fov,
            screen_height,
            world,
        )
    }

    /// Get camera uniforms for GPU.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }
}

/// Camera uniform buffer data for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub position: [f32; 4],
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        Self {
            view: camera.view_matrix().to_cols_array_2d(),
            projection: camera.projection_matrix().to_cols_array_2d(),
            position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pointstream_core::Aabb;

    #[test]
    fn orbit_faces_target() {
        let mut camera = Camera::default();
        camera.orbit(Vec3::new(1.0, 2.0, 3.0), 10.0, 0.0);
        assert_relative_eq!(camera.position.x, 11.0, epsilon = 1e-5);
        assert_relative_eq!(camera.direction.x, -1.0, epsilon = 1e-5);

        camera.orbit(Vec3::ZERO, 5.0, std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(camera.position.z, 5.0, epsilon = 1e-5);
        assert_relative_eq!(camera.direction.z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn frustum_sees_what_is_in_front() {
        let camera = Camera::new(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            std::f32::consts::FRAC_PI_4,
            1.0,
            0.1,
            100.0,
        );
        let frustum = camera.frustum();
        assert!(frustum.test_aabb(&Aabb::from_center(Vec3::ZERO, Vec3::ONE)));
        assert!(!frustum.test_aabb(&Aabb::from_center(Vec3::new(0.0, 0.0, 30.0), Vec3::ONE)));
    }

    #[test]
    fn view_state_uses_cloud_local_space() {
        let camera = Camera::new(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            std::f32::consts::FRAC_PI_4,
            1.0,
            0.1,
            100.0,
        );
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let view = camera.view_state(world, 720.0);
        assert_relative_eq!(view.position.z, 15.0, epsilon = 1e-4);
        assert_relative_eq!(view.screen_height, 720.0);
    }
}
