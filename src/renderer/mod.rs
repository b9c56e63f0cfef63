pub mod config;
pub mod contexts;
pub mod error;
pub mod handle;
pub mod interface;
pub mod resources;
pub mod shader_data;

use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use glam::Vec3;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::descriptor_ctx::registry::{DescriptorWrite, LayoutBinding};
use crate::renderer::contexts::descriptor_ctx::DescriptorManager;
use crate::renderer::contexts::device_ctx::commands::{Commands, SubmitSync};
use crate::renderer::contexts::device_ctx::target::RenderTarget;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::per_frame::PerFrame;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::pipeline_ctx::raster::{CullMode, FrontFace};
use crate::renderer::contexts::pipeline_ctx::{PipelineDesc, PipelineManager};
use crate::renderer::contexts::resource_ctx::buffer::BufferKind;
use crate::renderer::contexts::resource_ctx::ResourceManager;
use crate::renderer::error::RenderError;
use crate::renderer::handle::{
    BufferHandle, CommandBufferHandle, DescriptorSetLayoutHandle, HandleTable, ImageHandle,
    LightHandle, MeshHandle, ModelHandle, PipelineHandle,
};
use crate::renderer::interface::{CameraSource, PresentationSurface};
use crate::renderer::resources::light::Light;
use crate::renderer::resources::mesh::{GpuMesh, MeshData};
use crate::renderer::resources::model::GpuModel;
use crate::renderer::resources::texture::TextureData;
use crate::renderer::resources::vertex::Vertex;
use crate::renderer::shader_data::{FrameUniform, ObjectUniform};

/// Outcome of one `Renderer::draw_frame` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { slot: usize, image_index: u32 },
    // Nothing was submitted: the surface is minimized or the swapchain was rebuilt
    Skipped,
}

type UiCommand = Box<dyn FnMut()>;

/// Drives the per-frame loop over the device, resource, descriptor and pipeline contexts.
///
/// Fields are dropped top to bottom, so everything that holds a device handle
/// is declared before `dev`.
pub struct Renderer {
    meshes: HandleTable<MeshHandle, GpuMesh>,
    models: HandleTable<ModelHandle, GpuModel>,
    lights: HandleTable<LightHandle, Light>,
    ui_commands: Vec<(String, UiCommand)>,

    frm: RenderFrameContext,
    dsc: DescriptorManager,
    pip: PipelineManager,
    tgt: RenderTarget,
    res: ResourceManager,
    cmd: Arc<Commands>,
    dev: RenderDeviceContext,

    scene_layout: DescriptorSetLayoutHandle,
    sampler: vk::Sampler,
    config: RenderConfig,
    resize_requested: bool,
}

impl Renderer {
    pub fn new(
        config: RenderConfig,
        surface: Arc<dyn PresentationSurface>,
    ) -> Result<Self> {
        config.validate()?;

        let (dev, raw_surface) = RenderDeviceContext::new(&config, Some(surface.as_ref()))?;
        let raw_surface = raw_surface.ok_or_eyre("Presentation surface was not created")?;
        let device = dev.device.logical.clone();

        let cmd = Arc::new(Commands::new(
            device.clone(),
            dev.device.graphics_queue.clone(),
            1,
        )?);
        let mut res = ResourceManager::new(
            device.clone(),
            dev.device.memory_allocator()?,
            cmd.clone(),
        );
        let tgt = RenderTarget::new(
            surface,
            raw_surface,
            config.vsync,
            &dev.instance,
            &dev.device,
            &mut res,
        )?;
        let frm = RenderFrameContext::new(config.frames_in_flight, &cmd, &mut res, device.clone())?;

        let mut pip = PipelineManager::new(device.clone());
        let anisotropy = dev.device.sampler_anisotropy.then(|| {
            config
                .max_anisotropy
                .min(dev.device.properties.limits.max_sampler_anisotropy)
        });
        let sampler = pip.create_sampler(anisotropy)?;

        let mut dsc = DescriptorManager::new(device);
        let scene_layout = dsc.create_layout(&scene_bindings(sampler))?;

        log::info!(
            "Renderer ready with {} frames in flight and {} swapchain images",
            config.frames_in_flight,
            tgt.image_count()
        );

        Ok(Self {
            meshes: HandleTable::new(),
            models: HandleTable::new(),
            lights: HandleTable::new(),
            ui_commands: Vec::new(),

            frm,
            dsc,
            pip,
            tgt,
            res,
            cmd,
            dev,

            scene_layout,
            sampler,
            config,
            resize_requested: false,
        })
    }

    /// Uploads vertices and indices in a single transfer session
    pub fn add_mesh(&mut self, mesh: &MeshData) -> Result<MeshHandle> {
        mesh.validate()?;

        let vertex_buffer = self
            .res
            .create_buffer(BufferKind::Vertex, size_of_val(mesh.vertices.as_slice()) as u64)?;
        let index_buffer = match self
            .res
            .create_buffer(BufferKind::Index, size_of_val(mesh.indices.as_slice()) as u64)
        {
            Ok(buffer) => buffer,
            Err(e) => {
                self.res.release_buffer(vertex_buffer)?;
                return Err(e);
            }
        };

        let uploaded = self.cmd.transfer_session().and_then(|mut session| {
            self.res.stage_buffer_upload(&mut session, vertex_buffer, &mesh.vertices)?;
            self.res.stage_buffer_upload(&mut session, index_buffer, &mesh.indices)?;
            session.submit()
        });
        if let Err(e) = uploaded {
            self.res.release_buffer(vertex_buffer)?;
            self.res.release_buffer(index_buffer)?;
            return Err(e);
        }

        let handle = self.meshes.insert(GpuMesh {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertices.len() as u32,
            index_count: mesh.indices.len() as u32,
        });
        log::debug!(
            "Added mesh {:?} ({} vertices, {} indices)",
            handle,
            mesh.vertices.len(),
            mesh.indices.len()
        );

        Ok(handle)
    }

    pub fn add_texture(&mut self, texture: &TextureData) -> Result<ImageHandle> {
        let handle = self.res.upload_texture(texture)?;
        log::debug!("Added texture {:?} ({}x{})", handle, texture.width, texture.height);
        Ok(handle)
    }

    /// Compiles a pipeline for the scene descriptor layout and the standard vertex format
    pub fn create_pipeline(
        &mut self,
        vertex_shader: &Path,
        fragment_shader: &Path,
        cull_mode: CullMode,
        front_face: FrontFace,
    ) -> Result<PipelineHandle> {
        let desc = PipelineDesc {
            vertex_shader: vertex_shader.to_path_buf(),
            fragment_shader: fragment_shader.to_path_buf(),
            vertex_input: Vertex::input_description(),
            cull_mode,
            front_face,
            depth_test: Some(vk::CompareOp::LESS),
            set_layouts: vec![self.scene_layout],
            sampler: Some(self.sampler),
            render_pass: self.tgt.render_pass,
        };
        self.pip.create_pipeline(&desc, &self.dsc)
    }

    /// Registers a drawable with one descriptor set and one object uniform
    /// buffer per frame slot
    pub fn add_model(
        &mut self,
        mesh: MeshHandle,
        position: Vec3,
        rotation: Vec3,
        texture: ImageHandle,
        pipeline: PipelineHandle,
    ) -> Result<ModelHandle> {
        self.meshes.get(mesh)?;
        let texture_view = self.res.image_view(texture)?;
        let layout = self
            .pip
            .get(pipeline)?
            .first_set_layout
            .ok_or_else(|| RenderError::invalid(format!(
                "pipeline {:?} has no descriptor set layout for model data",
                pipeline
            )))?;

        let frames = self.config.frames_in_flight;
        let object_uniform = ObjectUniform::from_placement(position, rotation);
        let uniform_buffers = PerFrame::try_new_or_undo(
            frames,
            &mut self.res,
            |res, _| {
                let buffer = res.create_buffer(BufferKind::Uniform, size_of::<ObjectUniform>() as u64)?;
                if let Err(e) = res.insert_data(buffer, &[object_uniform]) {
                    release_buffer_logged(res, buffer);
                    return Err(e);
                }
                Ok(buffer)
            },
            release_buffer_logged,
        )?;

        let frame_uniforms = self.frm.slots.iter().map(|frame| frame.frame_uniform).collect::<Vec<_>>();
        let res = &self.res;
        let sampler = self.sampler;
        let descriptor_sets = self
            .dsc
            .pre_allocate(layout, frames as u32)
            .and_then(|_| {
                PerFrame::try_new_or_undo(
                    frames,
                    &mut self.dsc,
                    |dsc, slot| {
                        let writes = model_writes(
                            res,
                            *frame_uniforms.get(slot).ok_or_eyre("missing frame uniform")?,
                            *uniform_buffers.get(slot)?,
                            texture_view,
                            sampler,
                        )?;
                        dsc.write_ds(layout, &writes)
                    },
                    |dsc, set| {
                        if let Err(e) = dsc.free_ds(set) {
                            log::error!("Failed to return descriptor set {:?}: {}", set, e);
                        }
                    },
                )
            });
        let descriptor_sets = match descriptor_sets {
            Ok(sets) => sets,
            Err(e) => {
                for buffer in uniform_buffers {
                    release_buffer_logged(&mut self.res, buffer);
                }
                return Err(e);
            }
        };

        let handle = self.models.insert(GpuModel {
            mesh,
            texture,
            pipeline,
            position,
            rotation,
            descriptor_sets,
            uniform_buffers,
        });
        log::debug!("Added model {:?} at {}", handle, position);

        Ok(handle)
    }

    /// Takes effect on the next recorded frame
    pub fn update_model_position(
        &mut self,
        model: ModelHandle,
        position: Vec3,
        rotation: Vec3,
    ) -> Result<()> {
        self.models.get_mut(model)?.set_placement(position, rotation);
        Ok(())
    }

    pub fn add_light(&mut self, position: Vec3, color: Vec3) -> LightHandle {
        self.lights.insert(Light { position, color })
    }

    /// Registers a callback run inside the render pass after scene geometry,
    /// every frame, in registration order
    pub fn add_ui_commands(&mut self, name: impl Into<String>, callback: UiCommand) {
        self.ui_commands.push((name.into(), callback));
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn should_stop(&self) -> bool {
        self.tgt.provider.should_stop()
    }

    /// Number of frames submitted so far
    pub fn frame_index(&self) -> u64 {
        self.frm.counter.frame_index()
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.dev.device.wait_idle()
    }

    /// Runs one iteration of wait, acquire, record, submit and present
    pub fn draw_frame(&mut self, camera: &dyn CameraSource) -> Result<FrameStatus> {
        if !self.prepare_target()? {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.frm.current_slot();
        let frame = self.frm.current()?;
        frame.wait()?;
        let command_buffer = frame.command_buffer;
        let image_available = frame.image_available;
        let render_finished = frame.render_finished;
        let in_flight = frame.in_flight;

        let image_index = match self.tgt.acquire_next_image(image_available) {
            Ok(Some(image_index)) => image_index,
            Ok(None) => return Ok(FrameStatus::Skipped),
            Err(e) if RenderError::is_swapchain_stale(&e) => {
                log::warn!("Swapchain went stale on acquire, rebuilding");
                self.tgt.recreate(&mut self.res)?;
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.record_frame(slot, image_index, camera) {
            self.abandon_frame(command_buffer, image_available);
            return Err(e);
        }

        // Only reset once recording succeeded and the fence is about to be submitted
        let submitted = self.frm.current().and_then(|frame| frame.reset()).and_then(|_| {
            self.cmd.end(command_buffer, &SubmitSync {
                wait_semaphores: &[image_available],
                wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                signal_semaphores: &[render_finished],
                fence: in_flight,
            })
        });
        if let Err(e) = submitted {
            self.abandon_frame(command_buffer, image_available);
            return Err(e);
        }

        let presented = self.tgt.present(image_index, render_finished);
        self.frm.advance();
        match presented {
            Ok(()) => {}
            Err(e) if RenderError::is_swapchain_stale(&e) => {
                log::warn!("Swapchain went stale on present, rebuilding");
                self.tgt.recreate(&mut self.res)?;
            }
            Err(e) => return Err(e),
        }

        log::trace!("Presented image {} from slot {}", image_index, slot);
        Ok(FrameStatus::Presented { slot, image_index })
    }

    // Leaves the current slot drawable again after recording or submission failed:
    // the command buffer is reset, the acquire semaphore is consumed and the
    // fence ends up signaled. The frame index does not advance.
    fn abandon_frame(&mut self, command_buffer: CommandBufferHandle, image_available: vk::Semaphore) {
        if let Err(e) = self.cmd.discard(command_buffer) {
            log::error!("Failed to discard frame command buffer: {}", e);
        }

        let frame = match self.frm.current_mut() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to recover frame slot: {}", e);
                return;
            }
        };
        let in_flight = frame.in_flight;
        let consumed = frame.reset().and_then(|_| {
            self.cmd.submit_sync_only(&SubmitSync {
                wait_semaphores: &[image_available],
                wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                signal_semaphores: &[],
                fence: in_flight,
            })
        });
        if let Err(e) = consumed {
            log::error!("Failed to release the acquired image: {}", e);
            // Nothing was submitted with the fence, so it can be replaced
            if let Err(e) = frame.rearm() {
                log::error!("Failed to rearm frame fence: {}", e);
            }
        }
    }

    // Handles pending resizes and minimization. Returns whether a frame can be drawn.
    fn prepare_target(&mut self) -> Result<bool> {
        let extent = self.tgt.provider.extent();
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }
        if self.resize_requested || !self.tgt.has_swapchain() {
            self.resize_requested = false;
            self.tgt.recreate(&mut self.res)?;
        }
        Ok(self.tgt.has_swapchain())
    }

    fn record_frame(
        &mut self,
        slot: usize,
        image_index: u32,
        camera: &dyn CameraSource,
    ) -> Result<()> {
        let device = self.dev.device.logical.clone();
        let frame = self.frm.slots.get(slot)?;
        let frame_uniform_buffer = frame.frame_uniform;
        let command_buffer = self.cmd.begin(frame.command_buffer)?;

        let extent = self.tgt.extent().ok_or_eyre("Cannot record a frame without a swapchain")?;
        let framebuffer = self.tgt.framebuffer(image_index)?;

        let lights = self.lights.values().map(Light::as_shader_data).collect::<Vec<_>>();
        let frame_uniform = FrameUniform::new(
            camera.position(),
            camera.projection(),
            camera.view(),
            &lights,
        );
        self.res.insert_data(frame_uniform_buffer, &[frame_uniform])?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.tgt.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);
        }

        for (_, model) in self.models.iter() {
            let object_buffer = *model.uniform_buffers.get(slot)?;
            self.res.insert_data(object_buffer, &[model.object_uniform()])?;

            let set = *model.descriptor_sets.get(slot)?;
            let writes = model_writes(
                &self.res,
                frame_uniform_buffer,
                object_buffer,
                self.res.image_view(model.texture)?,
                self.sampler,
            )?;
            self.dsc.update_ds(set, &writes)?;

            let pipeline = self.pip.get(model.pipeline)?;
            let mesh = self.meshes.get(model.mesh)?;
            let vertex_buffer = self.res.raw_buffer(mesh.vertex_buffer)?;
            let index_buffer = self.res.raw_buffer(mesh.index_buffer)?;

            pipeline.bind(command_buffer);
            pipeline.bind_descriptor_sets(command_buffer, 0, &[self.dsc.descriptor_set(set)?]);
            unsafe {
                device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer], &[0]);
                device.cmd_bind_index_buffer(command_buffer, index_buffer, 0, vk::IndexType::UINT32);
                device.cmd_draw_indexed(command_buffer, mesh.index_count, 1, 0, 0, 0);
            }
        }

        for (_, callback) in self.ui_commands.iter_mut() {
            callback();
        }

        unsafe {
            device.cmd_end_render_pass(command_buffer);
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.frm.wait_all().and_then(|_| self.dev.device.wait_idle()) {
            log::error!("Failed to wait for the GPU before shutdown: {}", e);
        }
    }
}

fn release_buffer_logged(res: &mut ResourceManager, buffer: BufferHandle) {
    if let Err(e) = res.release_buffer(buffer) {
        log::error!("Failed to release buffer {:?}: {}", buffer, e);
    }
}

/// Frame uniform at binding 0, object uniform at 1, texture at 2
pub fn scene_bindings(sampler: vk::Sampler) -> [LayoutBinding; 3] {
    [
        LayoutBinding::uniform_buffer(0),
        LayoutBinding::uniform_buffer(1),
        LayoutBinding::combined_image_sampler(2, Some(sampler)),
    ]
}

fn model_writes(
    res: &ResourceManager,
    frame_uniform: BufferHandle,
    object_uniform: BufferHandle,
    texture_view: vk::ImageView,
    sampler: vk::Sampler,
) -> Result<[DescriptorWrite; 3]> {
    Ok([
        DescriptorWrite::buffer(
            res.raw_buffer(frame_uniform)?,
            0,
            size_of::<FrameUniform>() as u64,
        ),
        DescriptorWrite::buffer(
            res.raw_buffer(object_uniform)?,
            0,
            size_of::<ObjectUniform>() as u64,
        ),
        DescriptorWrite::image(texture_view, sampler),
    ])
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;

    #[test]
    fn test_scene_layout_shape() {
        let sampler = vk::Sampler::from_raw(7);
        let bindings = scene_bindings(sampler);
        assert_eq!(
            bindings.iter().map(|b| b.binding).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[2].immutable_sampler, Some(sampler));
    }

    #[test]
    fn test_model_writes_match_scene_layout() {
        let sampler = vk::Sampler::from_raw(7);
        let bindings = scene_bindings(sampler);
        let writes = [
            DescriptorWrite::buffer(vk::Buffer::from_raw(1), 0, size_of::<FrameUniform>() as u64),
            DescriptorWrite::buffer(vk::Buffer::from_raw(2), 0, size_of::<ObjectUniform>() as u64),
            DescriptorWrite::image(vk::ImageView::from_raw(3), sampler),
        ];
        assert!(writes.iter().zip(bindings.iter()).all(|(w, b)| w.matches(b)));
    }
}
