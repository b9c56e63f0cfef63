pub mod builder;
pub mod raster;
pub mod shader;

use std::path::PathBuf;
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::descriptor_ctx::DescriptorManager;
use crate::renderer::contexts::pipeline_ctx::builder::GraphicsPipelineBuilder;
use crate::renderer::contexts::pipeline_ctx::raster::{CullMode, FrontFace};
use crate::renderer::contexts::pipeline_ctx::shader::GraphicsShader;
use crate::renderer::handle::{DescriptorSetLayoutHandle, HandleTable, PipelineHandle};
use crate::renderer::resources::vertex::VertexInputDescription;

/// Everything needed to compile one graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub vertex_input: VertexInputDescription,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    // `None` disables the depth test
    pub depth_test: Option<vk::CompareOp>,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub sampler: Option<vk::Sampler>,
    pub render_pass: vk::RenderPass,
}

/// A compiled pipeline and the layout it was built against
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub sampler: Option<vk::Sampler>,
    pub first_set_layout: Option<DescriptorSetLayoutHandle>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Responsibilities:
/// - Compile immutable graphics pipelines from SPIR-V and fixed-function state
/// - Own pipeline layouts and texture samplers
pub struct PipelineManager {
    pipelines: HandleTable<PipelineHandle, Pipeline>,
    samplers: Vec<vk::Sampler>,
    device: Arc<ash::Device>,
}

impl PipelineManager {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            pipelines: HandleTable::new(),
            samplers: Vec::new(),
            device,
        }
    }

    pub fn create_pipeline(
        &mut self,
        desc: &PipelineDesc,
        descriptors: &DescriptorManager,
    ) -> Result<PipelineHandle> {
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|layout| descriptors.raw_layout(*layout))
            .collect::<Result<Vec<_>>>()?;
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts);
        let layout = unsafe {
            self.device.create_pipeline_layout(&layout_info, None)?
        };

        let pipeline = GraphicsShader::new(
            &desc.vertex_shader,
            &desc.fragment_shader,
            self.device.clone(),
        )
        .and_then(|shader| {
            GraphicsPipelineBuilder::new(self.device.clone())
                .with_shader(shader)
                .with_pipeline_layout(layout)
                .with_render_pass(desc.render_pass, 0)
                .with_vertex_input(desc.vertex_input.clone())
                .with_cull_mode(desc.cull_mode.to_vk(), desc.front_face.to_vk())
                .with_depth_test(desc.depth_test)
                .with_blending_disabled()
                .build()
        });
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let handle = self.pipelines.insert(Pipeline {
            pipeline,
            layout,
            sampler: desc.sampler,
            first_set_layout: desc.set_layouts.first().copied(),
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            device: self.device.clone(),
        });
        log::info!(
            "Created pipeline {:?} from {:?} and {:?} (cull {}, front face {})",
            handle,
            desc.vertex_shader,
            desc.fragment_shader,
            desc.cull_mode,
            desc.front_face,
        );

        Ok(handle)
    }

    /// Creates a texture sampler owned by the manager. Anisotropy is only
    /// enabled when `max_anisotropy` is given.
    pub fn create_sampler(&mut self, max_anisotropy: Option<f32>) -> Result<vk::Sampler> {
        let info = sampler_info(max_anisotropy);
        let sampler = unsafe { self.device.create_sampler(&info, None)? };
        self.samplers.push(sampler);
        Ok(sampler)
    }

    pub fn get(&self, handle: PipelineHandle) -> Result<&Pipeline> {
        self.pipelines.get(handle)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        drop(self.pipelines.drain());
        unsafe {
            for sampler in self.samplers.drain(..) {
                self.device.destroy_sampler(sampler, None);
            }
        }
    }
}

/// Linear filtering with repeat addressing on every axis
pub fn sampler_info(max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(max_anisotropy.is_some())
        .max_anisotropy(max_anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_without_anisotropy() {
        let info = sampler_info(None);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.max_anisotropy, 1.0);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
    }

    #[test]
    fn test_sampler_with_anisotropy() {
        let info = sampler_info(Some(8.0));
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 8.0);
    }
}
