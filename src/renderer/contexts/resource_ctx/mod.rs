pub mod buffer;
pub mod image;
pub mod transition;

use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use crate::renderer::contexts::device_ctx::commands::Commands;
use crate::renderer::contexts::device_ctx::transfer::TransferSession;
use crate::renderer::contexts::resource_ctx::buffer::{Buffer, BufferKind};
use crate::renderer::contexts::resource_ctx::image::{Image, ImageKind};
use crate::renderer::contexts::resource_ctx::transition::LayoutTransition;
use crate::renderer::error::RenderError;
use crate::renderer::handle::{BufferHandle, HandleTable, ImageHandle};
use crate::renderer::resources::texture::TextureData;

/// Responsibilities:
/// - Allocate buffers and images and own their memory
/// - Write host-visible buffers and copy data between GPU resources
/// - Move images between the layouts a texture upload needs
pub struct ResourceManager {
    buffers: HandleTable<BufferHandle, Buffer>,
    images: HandleTable<ImageHandle, Image>,

    commands: Arc<Commands>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl ResourceManager {
    pub fn new(
        device: Arc<ash::Device>,
        memory_allocator: Arc<Mutex<Allocator>>,
        commands: Arc<Commands>,
    ) -> Self {
        Self {
            buffers: HandleTable::new(),
            images: HandleTable::new(),
            commands,
            memory_allocator,
            device,
        }
    }

    pub fn create_buffer(&mut self, kind: BufferKind, size: u64) -> Result<BufferHandle> {
        let buffer = Buffer::new(
            size,
            kind,
            self.memory_allocator.clone(),
            self.device.clone(),
        )?;
        let handle = self.buffers.insert(buffer);
        log::trace!("Created {:?} buffer {:?} ({} bytes)", kind, handle, size);
        Ok(handle)
    }

    /// Writes `data` to the start of a host-visible buffer. The caller makes
    /// sure the GPU is not reading the buffer at the same time.
    pub fn insert_data<T: Copy>(&mut self, handle: BufferHandle, data: &[T]) -> Result<()> {
        self.buffers.get_mut(handle)?.write(data, 0)?;
        Ok(())
    }

    /// Copies `size` bytes between two buffers and waits for the copy to finish
    pub fn copy(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> Result<()> {
        let (src, dst) = self.copy_pair(src, dst, size)?;
        self.commands.immediate_submit(|cmd, device| {
            record_buffer_copy(device, cmd, src, dst, size);
            Ok(())
        })
    }

    pub fn create_image(&mut self, extent: vk::Extent2D, kind: ImageKind) -> Result<ImageHandle> {
        let image = Image::new(
            extent,
            kind,
            self.memory_allocator.clone(),
            self.device.clone(),
        )?;
        let handle = self.images.insert(image);
        log::trace!(
            "Created {:?} image {:?} ({}x{})",
            kind,
            handle,
            extent.width,
            extent.height
        );
        Ok(handle)
    }

    pub fn transition_image(
        &self,
        handle: ImageHandle,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let transition = LayoutTransition::between(old_layout, new_layout)?;
        let image = self.images.get(handle)?;
        let (raw, range) = (image.image, image.subresource_range());
        self.commands.immediate_submit(|cmd, device| {
            transition.record(cmd, raw, range, old_layout, new_layout, device);
            Ok(())
        })
    }

    /// Fills a freshly created texture from a buffer and leaves it shader-readable
    pub fn copy_buffer_to_image(&self, buffer: BufferHandle, image: ImageHandle) -> Result<()> {
        let mut session = self.commands.transfer_session()?;
        self.record_buffer_to_image(&mut session, buffer, image)?;
        session.submit()
    }

    /// Uploads `data` into `dst` through a staging buffer recorded in `session`
    pub fn stage_buffer_upload<T: Copy>(
        &self,
        session: &mut TransferSession,
        dst: BufferHandle,
        data: &[T],
    ) -> Result<()> {
        let size = size_of_val(data) as u64;
        let dst_buffer = self.buffers.get(dst)?;
        if size > dst_buffer.size {
            return Err(RenderError::invalid(format!(
                "{} bytes do not fit in buffer {:?} of {} bytes",
                size, dst, dst_buffer.size
            )));
        }
        let dst_raw = dst_buffer.buffer;

        let mut staging = self.new_staging(size)?;
        staging.write(data, 0)?;
        let src_raw = staging.buffer;
        session.record(|cmd, device| {
            record_buffer_copy(device, cmd, src_raw, dst_raw, size);
            Ok(())
        })?;
        session.keep_alive(staging);

        Ok(())
    }

    /// Uploads texture pixels into `image` through a staging buffer recorded in `session`
    pub fn stage_image_upload(
        &self,
        session: &mut TransferSession,
        image: ImageHandle,
        texture: &TextureData,
    ) -> Result<()> {
        texture.validate()?;
        let target = self.images.get(image)?;
        if target.extent.width != texture.width || target.extent.height != texture.height {
            return Err(RenderError::invalid(format!(
                "{}x{} texture does not match {}x{} image {:?}",
                texture.width, texture.height, target.extent.width, target.extent.height, image
            )));
        }

        let mut staging = self.new_staging(texture.byte_size())?;
        staging.write(&texture.pixels, 0)?;
        self.record_image_copy(session, staging.buffer, target)?;
        session.keep_alive(staging);

        Ok(())
    }

    /// Creates a texture image and fills it in one transfer session
    pub fn upload_texture(&mut self, texture: &TextureData) -> Result<ImageHandle> {
        texture.validate()?;
        let extent = vk::Extent2D {
            width: texture.width,
            height: texture.height,
        };
        let handle = self.create_image(extent, ImageKind::Texture)?;

        let result = self.commands.transfer_session().and_then(|mut session| {
            self.stage_image_upload(&mut session, handle, texture)?;
            session.submit()
        });
        if let Err(e) = result {
            self.release_image(handle)?;
            return Err(e);
        }

        Ok(handle)
    }

    pub fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        drop(self.buffers.remove(handle)?);
        Ok(())
    }

    pub fn release_image(&mut self, handle: ImageHandle) -> Result<()> {
        drop(self.images.remove(handle)?);
        Ok(())
    }

    /// Reads back the contents of a host-visible buffer
    pub fn read_buffer(&self, handle: BufferHandle) -> Result<Vec<u8>> {
        self.buffers.get(handle)?.read()
    }

    pub fn allocation_size(&self, handle: BufferHandle) -> Result<u64> {
        Ok(self.buffers.get(handle)?.allocation_size())
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers.get(handle)
    }

    pub fn raw_buffer(&self, handle: BufferHandle) -> Result<vk::Buffer> {
        Ok(self.buffers.get(handle)?.buffer)
    }

    pub fn image(&self, handle: ImageHandle) -> Result<&Image> {
        self.images.get(handle)
    }

    pub fn image_view(&self, handle: ImageHandle) -> Result<vk::ImageView> {
        Ok(self.images.get(handle)?.view)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn new_staging(&self, size: u64) -> Result<Buffer> {
        Buffer::new(
            size,
            BufferKind::Staging,
            self.memory_allocator.clone(),
            self.device.clone(),
        )
    }

    fn copy_pair(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> Result<(vk::Buffer, vk::Buffer)> {
        let src_buffer = self.buffers.get(src)?;
        let dst_buffer = self.buffers.get(dst)?;
        if size == 0 || size > src_buffer.size || size > dst_buffer.size {
            return Err(RenderError::invalid(format!(
                "cannot copy {} bytes from a {} byte buffer into a {} byte buffer",
                size, src_buffer.size, dst_buffer.size
            )));
        }
        Ok((src_buffer.buffer, dst_buffer.buffer))
    }

    fn record_buffer_to_image(
        &self,
        session: &mut TransferSession,
        buffer: BufferHandle,
        image: ImageHandle,
    ) -> Result<()> {
        let source = self.buffers.get(buffer)?;
        let target = self.images.get(image)?;
        let needed = target.extent.width as u64 * target.extent.height as u64 * TextureData::BYTES_PER_PIXEL;
        if source.size < needed {
            return Err(RenderError::invalid(format!(
                "buffer {:?} holds {} bytes but image {:?} needs {}",
                buffer, source.size, image, needed
            )));
        }
        self.record_image_copy(session, source.buffer, target)
    }

    // Transition to TRANSFER_DST, copy, then transition to SHADER_READ_ONLY
    fn record_image_copy(
        &self,
        session: &mut TransferSession,
        source: vk::Buffer,
        target: &Image,
    ) -> Result<()> {
        let to_transfer = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        let to_readable = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        let image = target.image;
        let range = target.subresource_range();
        let extent = target.extent;

        session.record(|cmd, device| {
            to_transfer.record(
                cmd,
                image,
                range,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                device,
            );

            let copy_region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: range.aspect_mask,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_extent: extent,
                ..Default::default()
            };
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    source,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[copy_region],
                );
            }

            to_readable.record(
                cmd,
                image,
                range,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                device,
            );
            Ok(())
        })
    }
}

fn record_buffer_copy(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: u64,
) {
    let region = vk::BufferCopy::default()
        .src_offset(0)
        .dst_offset(0)
        .size(size);
    unsafe {
        device.cmd_copy_buffer(cmd, src, dst, &[region]);
    }
}
