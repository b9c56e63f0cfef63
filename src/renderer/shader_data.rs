use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use crate::renderer::config::MAX_LIGHTS;

/// One light entry of the per-frame uniform block
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub position: Vec4,
    pub color: Vec4,
}

/// Data unique to each frame passed into uniform buffer (std140)
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameUniform {
    pub camera_position: Vec4,
    pub camera_projection: Mat4,
    pub camera_view: Mat4,
    pub global_light_position: Vec4,
    pub lights: [LightUniform; MAX_LIGHTS],
    pub lights_count: u32,
    _padding: [u32; 3],
}

impl FrameUniform {
    pub const GLOBAL_LIGHT_POSITION: Vec4 = Vec4::new(1.0, 1.0, 1.0, 0.0);

    /// Builds the block from camera data and the live lights, keeping at most
    /// `MAX_LIGHTS` entries in iteration order.
    pub fn new<'a>(
        camera_position: Vec3,
        camera_projection: Mat4,
        camera_view: Mat4,
        lights: impl IntoIterator<Item = &'a LightUniform>,
    ) -> Self {
        let mut uniform = Self {
            camera_position: camera_position.extend(1.0),
            camera_projection,
            camera_view,
            global_light_position: Self::GLOBAL_LIGHT_POSITION,
            lights: [LightUniform::default(); MAX_LIGHTS],
            lights_count: 0,
            _padding: [0; 3],
        };
        for (slot, light) in uniform.lights.iter_mut().zip(lights) {
            *slot = *light;
            uniform.lights_count += 1;
        }
        uniform
    }
}

/// Data unique to each object passed into its own uniform buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
}

impl ObjectUniform {
    /// Rotation is accepted but not composed into the model matrix.
    pub fn from_placement(position: Vec3, _rotation: Vec3) -> Self {
        Self {
            model: Mat4::from_translation(position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(x: f32) -> LightUniform {
        LightUniform {
            position: Vec4::new(x, 0.0, 0.0, 1.0),
            color: Vec4::ONE,
        }
    }

    #[test]
    fn test_std140_sizes() {
        assert_eq!(size_of::<LightUniform>(), 32);
        assert_eq!(size_of::<ObjectUniform>(), 64);
        // 16 + 64 + 64 + 16 + 10 * 32 + 16
        assert_eq!(size_of::<FrameUniform>(), 496);
        assert_eq!(std::mem::offset_of!(FrameUniform, lights), 160);
        assert_eq!(std::mem::offset_of!(FrameUniform, lights_count), 480);
    }

    #[test]
    fn test_light_list_is_capped() {
        let lights = (0..MAX_LIGHTS + 3).map(|i| light(i as f32)).collect::<Vec<_>>();
        let uniform = FrameUniform::new(Vec3::ZERO, Mat4::IDENTITY, Mat4::IDENTITY, &lights);
        assert_eq!(uniform.lights_count as usize, MAX_LIGHTS);
        assert_eq!(uniform.lights[MAX_LIGHTS - 1], lights[MAX_LIGHTS - 1]);
    }

    #[test]
    fn test_frame_uniform_copies_camera() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let uniform = FrameUniform::new(Vec3::new(0.0, 0.0, 5.0), Mat4::IDENTITY, view, &[light(2.0)]);
        assert_eq!(uniform.camera_position, Vec4::new(0.0, 0.0, 5.0, 1.0));
        assert_eq!(uniform.camera_view, view);
        assert_eq!(uniform.global_light_position, FrameUniform::GLOBAL_LIGHT_POSITION);
        assert_eq!(uniform.lights_count, 1);
    }

    #[test]
    fn test_object_uniform_is_idempotent() {
        let position = Vec3::new(1.0, -2.0, 3.5);
        let rotation = Vec3::new(0.3, 0.0, 1.2);
        let a = ObjectUniform::from_placement(position, rotation);
        let b = ObjectUniform::from_placement(position, rotation);
        assert_eq!(bytemuck::bytes_of(&a), bytemuck::bytes_of(&b));
    }

    #[test]
    fn test_object_uniform_ignores_rotation() {
        let position = Vec3::new(4.0, 5.0, 6.0);
        let plain = ObjectUniform::from_placement(position, Vec3::ZERO);
        let rotated = ObjectUniform::from_placement(position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(plain, rotated);
        assert_eq!(plain.model.w_axis, position.extend(1.0));
    }
}
