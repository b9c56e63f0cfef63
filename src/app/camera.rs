use glam::{Mat4, Vec3};
use tessera::renderer::interface::CameraSource;

/// Perspective camera circling a pivot point on the horizontal plane
pub struct OrbitCamera {
    position: Vec3,
    forward: Vec3,
    up: Vec3,
    world_up: Vec3,
    pivot: Vec3,
    fov_y_deg: f32,
    near: f32,
    far: f32,
    aspect_ratio: f32,

    // Radians per second
    orbit_speed: f32,
}

impl OrbitCamera {
    const DEFAULT_FOV_Y_DEG: f32 = 45.0;

    pub fn new(orbit_speed: f32) -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            world_up: Vec3::Y,
            pivot: Vec3::ZERO,
            fov_y_deg: Self::DEFAULT_FOV_Y_DEG,
            near: 0.1,
            far: 100.0,
            aspect_ratio: 1.0,
            orbit_speed,
        };
        camera.look_at(Vec3::ZERO);
        camera
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target == self.position {
            return;
        }
        self.pivot = target;
        self.forward = (target - self.position).normalize();
        let right = self.forward.cross(self.world_up).normalize();
        self.up = right.cross(self.forward).normalize();
    }

    /// Keeps the projection in step with the drawable size; ignores a minimized window
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }

    /// Rotates the eye around the pivot's vertical axis
    pub fn advance(&mut self, delta_time_secs: f32) {
        let rotation = glam::Quat::from_axis_angle(self.world_up, self.orbit_speed * delta_time_secs);
        let pivot_to_eye = rotation * (self.position - self.pivot);
        self.position = self.pivot + pivot_to_eye;
        self.look_at(self.pivot);
    }
}

impl CameraSource for OrbitCamera {
    fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    fn projection(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(
            self.fov_y_deg.to_radians(),
            self.aspect_ratio,
            self.near,
            self.far,
        );
        // Vulkan clip space points Y down
        projection.y_axis.y *= -1.0;
        projection
    }

    fn position(&self) -> Vec3 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_keeps_distance_to_pivot() {
        let mut camera = OrbitCamera::new(1.0);
        let before = camera.position().distance(Vec3::ZERO);
        camera.advance(0.5);
        camera.advance(1.25);
        let after = camera.position().distance(Vec3::ZERO);
        assert!((before - after).abs() < 1e-4);
        assert!(camera.position().y.abs() < 1e-4);
    }

    #[test]
    fn test_view_looks_at_pivot() {
        let mut camera = OrbitCamera::new(0.7);
        camera.advance(2.0);
        let pivot_in_view = camera.view().transform_point3(Vec3::ZERO);
        assert!(pivot_in_view.x.abs() < 1e-4);
        assert!(pivot_in_view.z < 0.0);
    }

    #[test]
    fn test_zero_viewport_keeps_aspect() {
        let mut camera = OrbitCamera::new(0.0);
        camera.set_viewport(1600, 800);
        camera.set_viewport(0, 0);
        assert_eq!(camera.aspect_ratio, 2.0);
    }
}
