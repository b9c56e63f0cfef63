use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamilyIndices};
use crate::renderer::contexts::device_ctx::swapchain::{self, Swapchain};
use crate::renderer::contexts::resource_ctx::image::ImageKind;
use crate::renderer::contexts::resource_ctx::ResourceManager;
use crate::renderer::error::RenderError;
use crate::renderer::handle::ImageHandle;
use crate::renderer::interface::PresentationSurface;

/// Presentation target of the renderer, encapsulating the surface, swapchain,
/// render pass, depth buffer and framebuffers
pub struct RenderTarget {
    pub provider: Arc<dyn PresentationSurface>,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface_format: vk::SurfaceFormatKHR,
    pub surface_present_mode: vk::PresentModeKHR,

    // Outlives swapchain rebuilds; pipelines are compiled against it
    pub render_pass: vk::RenderPass,

    // `None` while the surface has a zero extent
    swapchain: Option<Swapchain>,
    depth_image: Option<ImageHandle>,
    framebuffers: Vec<vk::Framebuffer>,
    // Set when an acquire succeeded but reported a suboptimal swapchain
    suboptimal: bool,

    present_queue: Arc<Queue>,
    queue_families: QueueFamilyIndices,
    physical: vk::PhysicalDevice,
    instance: ash::Instance,
    device: Arc<ash::Device>,
}

impl RenderTarget {
    pub fn new(
        provider: Arc<dyn PresentationSurface>,
        surface: Surface,
        vsync: bool,
        ins: &RenderInstance,
        dev: &RenderDevice,
        resources: &mut ResourceManager,
    ) -> Result<Self> {
        let (surface, surface_loader) = surface;

        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(dev.physical, surface)?
        };
        let surface_present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(dev.physical, surface)?
        };
        let surface_format = swapchain::choose_surface_format(&surface_formats)
            .ok_or_eyre("Surface reports no formats")?;
        let surface_present_mode = swapchain::choose_present_mode(&surface_present_modes, vsync);

        let present_queue = dev
            .present_queue
            .clone()
            .ok_or_eyre("Device was created without a present queue")?;

        let render_pass = create_render_pass(&dev.logical, surface_format.format)?;

        let mut target = Self {
            provider,
            surface,
            surface_loader,
            surface_format,
            surface_present_mode,
            render_pass,
            swapchain: None,
            depth_image: None,
            framebuffers: Vec::new(),
            suboptimal: false,
            present_queue,
            queue_families: dev.queue_families,
            physical: dev.physical,
            instance: ins.instance.clone(),
            device: dev.logical.clone(),
        };
        target.recreate(resources)?;

        Ok(target)
    }

    /// Rebuilds the swapchain, depth image and framebuffers for the current
    /// surface extent. Leaves the target without a swapchain while the extent is zero.
    pub fn recreate(&mut self, resources: &mut ResourceManager) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }

        self.destroy_framebuffers();
        if let Some(depth) = self.depth_image.take() {
            resources.release_image(depth)?;
        }
        self.suboptimal = false;

        let window_extent = self.provider.extent();
        if window_extent.width == 0 || window_extent.height == 0 {
            self.swapchain = None;
            log::debug!("Surface has a zero extent, presentation paused");
            return Ok(());
        }

        let old_swapchain = self.swapchain.take();
        let swapchain = Swapchain::new(
            self.surface,
            &self.surface_loader,
            self.surface_format,
            self.surface_present_mode,
            window_extent,
            old_swapchain.as_ref(),
            &self.queue_families,
            &self.instance,
            self.physical,
            self.device.clone(),
        )?;
        // The retired swapchain may only be destroyed after its replacement exists
        drop(old_swapchain);

        let extent = swapchain.swapchain_image_extent;
        let depth_image = resources.create_image(extent, ImageKind::Depth)?;
        self.depth_image = Some(depth_image);
        self.framebuffers = create_framebuffers(
            &self.device,
            self.render_pass,
            &swapchain.swapchain_image_views,
            resources.image_view(depth_image)?,
            extent,
        )?;
        self.swapchain = Some(swapchain);

        Ok(())
    }

    /// Returns the index of the next presentable image, or `None` while there is
    /// no swapchain to draw into
    pub fn acquire_next_image(&mut self, image_available: vk::Semaphore) -> Result<Option<u32>> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(None);
        };
        let result = unsafe {
            swapchain.swapchain_loader.acquire_next_image(
                swapchain.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => {
                // The semaphore is signaled either way, so render this image and
                // rebuild after presenting it
                self.suboptimal |= suboptimal;
                Ok(Some(image_index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainStale.into()),
            Err(e) => Err(eyre!("Failed to acquire swapchain image: {}", e)),
        }
    }

    pub fn present(&mut self, image_index: u32, render_finished: vk::Semaphore) -> Result<()> {
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_eyre("Cannot present without a swapchain")?;

        let wait_semaphores = [render_finished];
        let swapchains = [swapchain.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            swapchain
                .swapchain_loader
                .queue_present(self.present_queue.handle, &present_info)
        };
        match result {
            Ok(suboptimal) if !suboptimal && !self.suboptimal => Ok(()),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainStale.into()),
            Err(e) => Err(eyre!("Failed to present swapchain image: {}", e)),
        }
    }

    pub fn has_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|swapchain| swapchain.swapchain_image_extent)
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RenderError::invalid(format!(
                "swapchain image {} has no framebuffer ({} exist)",
                image_index,
                self.framebuffers.len()
            )))
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    fn destroy_framebuffers(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        drop(self.swapchain.take());
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

fn create_render_pass(device: &ash::Device, color_format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [
        // Swapchain image
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        // Depth buffer, contents discarded after the pass
        vk::AttachmentDescription::default()
            .format(ImageKind::Depth.format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_attachment_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_attachment_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs)
        .depth_stencil_attachment(&depth_attachment_ref)];

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(attachment_stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(attachment_stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe {
        device.create_render_pass(&render_pass_info, None)?
    })
}

fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    image_views: &[vk::ImageView],
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for view in image_views {
        let attachments = [*view, depth_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                unsafe {
                    for framebuffer in framebuffers {
                        device.destroy_framebuffer(framebuffer, None);
                    }
                }
                return Err(eyre!("Failed to create framebuffer: {}", e));
            }
        }
    }
    Ok(framebuffers)
}
