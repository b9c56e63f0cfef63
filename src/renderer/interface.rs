//! Narrow seams to the collaborators that live outside the renderer.

use std::ffi::CStr;
use ash::vk;
use color_eyre::Result;
use glam::{Mat4, Vec3};

/// Window side of presentation.
pub trait PresentationSurface {
    /// Instance extensions the platform needs to create a surface
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Creates a surface bound to the native window. The caller owns and destroys it.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Current drawable size in pixels; zero while minimized.
    fn extent(&self) -> vk::Extent2D;

    /// Polled once per frame by the owner of the frame loop.
    fn should_stop(&self) -> bool;
}

/// Camera data copied verbatim into the frame uniform block.
pub trait CameraSource {
    fn view(&self) -> Mat4;
    fn projection(&self) -> Mat4;
    fn position(&self) -> Vec3;
}
