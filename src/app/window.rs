use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tessera::renderer::interface::PresentationSurface;
use winit::window::Window;

/// Presents into a winit window
pub struct WinitSurface {
    window: Arc<Window>,
    close_requested: AtomicBool,
}

impl WinitSurface {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            close_requested: AtomicBool::new(false),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Relaxed);
    }
}

impl PresentationSurface for WinitSurface {
    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let exts = ash_window::enumerate_required_extensions(
            self.window.display_handle()?.as_raw()
        )?
            .iter()
            .map(|ext| unsafe {
                CStr::from_ptr(*ext)
            })
            .collect::<Vec<_>>();
        Ok(exts)
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.display_handle()?.as_raw(),
                self.window.window_handle()?.as_raw(),
                None,
            )?
        };
        Ok(surface)
    }

    fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn should_stop(&self) -> bool {
        self.close_requested.load(Ordering::Relaxed)
    }
}
