use glam::Vec3;
use crate::renderer::contexts::frame_ctx::per_frame::PerFrame;
use crate::renderer::handle::{BufferHandle, DescriptorSetHandle, ImageHandle, MeshHandle, PipelineHandle};
use crate::renderer::shader_data::ObjectUniform;

/// A drawable instance. Descriptor sets and uniform buffers are partitioned by frame slot.
pub struct GpuModel {
    pub mesh: MeshHandle,
    pub texture: ImageHandle,
    pub pipeline: PipelineHandle,
    pub position: Vec3,
    pub rotation: Vec3,
    pub descriptor_sets: PerFrame<DescriptorSetHandle>,
    pub uniform_buffers: PerFrame<BufferHandle>,
}

impl GpuModel {
    /// Takes effect the next time the object uniform is built
    pub fn set_placement(&mut self, position: Vec3, rotation: Vec3) {
        self.position = position;
        self.rotation = rotation;
    }

    pub fn object_uniform(&self) -> ObjectUniform {
        ObjectUniform::from_placement(self.position, self.rotation)
    }
}

#[cfg(test)]
mod tests {
    use crate::renderer::handle::Handle;
    use super::*;

    fn model() -> GpuModel {
        GpuModel {
            mesh: MeshHandle::from_raw(1),
            texture: ImageHandle::from_raw(2),
            pipeline: PipelineHandle::from_raw(3),
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            descriptor_sets: PerFrame::try_new(2, |slot| {
                Ok(DescriptorSetHandle::from_raw(slot as u64 + 1))
            })
            .unwrap(),
            uniform_buffers: PerFrame::try_new(2, |slot| {
                Ok(BufferHandle::from_raw(slot as u64 + 10))
            })
            .unwrap(),
        }
    }

    #[test]
    fn test_repeated_placement_gives_identical_uniform_bytes() {
        let mut model = model();
        let position = Vec3::new(1.5, -2.0, 0.25);
        let rotation = Vec3::new(0.0, 90.0, 0.0);

        model.set_placement(position, rotation);
        let first = model.object_uniform();
        model.set_placement(position, rotation);
        let second = model.object_uniform();

        assert_eq!(bytemuck::bytes_of(&first), bytemuck::bytes_of(&second));
    }

    #[test]
    fn test_placement_moves_the_model_matrix() {
        let mut model = model();
        let before = model.object_uniform();
        model.set_placement(Vec3::new(3.0, 0.0, 0.0), Vec3::ZERO);
        let after = model.object_uniform();
        assert_ne!(bytemuck::bytes_of(&before), bytemuck::bytes_of(&after));
    }
}
