pub mod commands;
pub mod device;
pub mod instance;
pub mod queue;
pub mod swapchain;
pub mod target;
pub mod transfer;

use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::interface::PresentationSurface;

/// Responsibilities:
/// - Manage the Vulkan instance, device, and queues
/// - Create the presentation surface the render target takes over
pub struct RenderDeviceContext {
    // Declared before `instance` so the device is destroyed first
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderDeviceContext {
    /// Creates the instance and device. With a surface provider, also returns
    /// the surface the device was selected against.
    pub fn new(
        config: &RenderConfig,
        provider: Option<&dyn PresentationSurface>,
    ) -> Result<(Self, Option<Surface>)> {
        let instance = RenderInstance::new(config, provider)?;
        let surface = match provider {
            Some(provider) => Some(instance.create_surface(provider)?),
            None => None,
        };
        let device = match instance.create_device(config, surface.as_ref()) {
            Ok(device) => device,
            Err(e) => {
                if let Some((surface, surface_loader)) = surface {
                    unsafe { surface_loader.destroy_surface(surface, None) };
                }
                return Err(e);
            }
        };

        Ok((Self { device, instance }, surface))
    }

    /// Device without presentation support, for offscreen work and tests
    pub fn headless(config: &RenderConfig) -> Result<Self> {
        let (ctx, _) = Self::new(config, None)?;
        Ok(ctx)
    }
}
