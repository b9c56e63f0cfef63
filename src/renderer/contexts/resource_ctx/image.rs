use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::error::RenderError;

/// What an image is used for. Format, usage and aspect follow from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Depth,
    Texture,
}

impl ImageKind {
    pub fn format(self) -> vk::Format {
        match self {
            Self::Depth => vk::Format::D32_SFLOAT,
            Self::Texture => vk::Format::R8G8B8A8_SRGB,
        }
    }

    pub fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            Self::Texture => vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        }
    }

    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            Self::Depth => vk::ImageAspectFlags::DEPTH,
            Self::Texture => vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn tiling(self) -> vk::ImageTiling {
        vk::ImageTiling::OPTIMAL
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Depth => "Depth image",
            Self::Texture => "Texture image",
        }
    }
}

pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub kind: ImageKind,
    pub extent: vk::Extent3D,

    allocation: Option<Allocation>, // GPU-only memory block
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Image {
    // NOTE: The memory of the returned image is GPU-only and holds no data yet.
    // Texture images have to be filled with a buffer-to-image copy.
    pub fn new(
        extent: vk::Extent2D,
        kind: ImageKind,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::invalid(format!(
                "image extent {}x{} is empty",
                extent.width, extent.height
            )));
        }

        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(kind.format())
                .usage(kind.usage())
                .extent(extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(kind.tiling())
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.create_image(&info, None)? }
        };

        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
            .and_then(|mut allocator| {
                Ok(allocator.allocate(&AllocationCreateDesc {
                    name: kind.name(),
                    requirements: reqs,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::DedicatedImage(image),
                })?)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on `Drop` cleans up after a failure
        let mut image = Self {
            image,
            view: vk::ImageView::null(),
            kind,
            extent,

            allocation: Some(allocation),
            memory_allocator,
            device,
        };
        image.bind_and_create_view()?;

        Ok(image)
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.kind.aspect(),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn bind_and_create_view(&mut self) -> Result<()> {
        if let Some(allocation) = self.allocation.as_ref() {
            unsafe {
                self.device.bind_image_memory(self.image, allocation.memory(), allocation.offset())?;
            }
        }

        let info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(self.image)
            .format(self.kind.format())
            .subresource_range(self.subresource_range());
        self.view = unsafe { self.device.create_image_view(&info, None)? };

        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free image memory: {}", e);
                    }
                }
                Err(e) => log::error!("Memory allocator lock poisoned: {}", e),
            }
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_kind() {
        let kind = ImageKind::Depth;
        assert_eq!(kind.format(), vk::Format::D32_SFLOAT);
        assert_eq!(kind.usage(), vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(kind.aspect(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(kind.tiling(), vk::ImageTiling::OPTIMAL);
    }

    #[test]
    fn test_texture_kind() {
        let kind = ImageKind::Texture;
        assert_eq!(kind.format(), vk::Format::R8G8B8A8_SRGB);
        assert!(kind.usage().contains(vk::ImageUsageFlags::SAMPLED));
        assert!(kind.usage().contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert_eq!(kind.aspect(), vk::ImageAspectFlags::COLOR);
    }
}
