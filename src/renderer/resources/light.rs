use glam::Vec3;
use crate::renderer::shader_data::LightUniform;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
}

impl Light {
    pub fn as_shader_data(&self) -> LightUniform {
        LightUniform {
            position: self.position.extend(1.0),
            color: self.color.extend(1.0),
        }
    }
}
