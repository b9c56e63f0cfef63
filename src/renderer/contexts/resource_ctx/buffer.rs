use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::error::RenderError;

/// Intended use of a buffer. Usage flags and memory location follow from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Staging,
    Uniform,
}

impl BufferKind {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            // Geometry can be written directly or filled from a staging buffer
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    /// Every kind is host-visible and coherent so it can be written in place
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "Vertex buffer",
            Self::Index => "Index buffer",
            Self::Staging => "Staging buffer",
            Self::Uniform => "Uniform buffer",
        }
    }
}

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,
    pub kind: BufferKind,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        size: u64,
        kind: BufferKind,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(RenderError::invalid("buffer size must be greater than zero"));
        }

        let buffer = {
            let buffer_info = vk::BufferCreateInfo {
                size,
                usage: kind.usage(),
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = mem_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))
            .and_then(|mut allocator| {
                Ok(allocator.allocate(&AllocationCreateDesc {
                    name: kind.name(),
                    requirements,
                    location: kind.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
                })?)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut buffer = Self {
            buffer,
            size,
            kind,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        };
        buffer.bind()?;

        Ok(buffer)
    }

    /// Copies `data` into the mapped allocation starting at `start_offset` bytes
    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let byte_len = size_of_val(data) as u64;
        if start_offset as u64 + byte_len > self.size {
            return Err(RenderError::invalid(format!(
                "{} bytes at offset {} do not fit in a {} byte buffer",
                byte_len, start_offset, self.size
            )));
        }

        let allocation = self
            .allocation
            .as_mut()
            .ok_or_eyre("Buffer memory has already been freed")?;
        Ok(presser::copy_from_slice_to_offset(
            data,
            allocation,
            start_offset,
        )?)
    }

    /// Bytes of the host-visible allocation covering the requested size
    pub fn read(&self) -> Result<Vec<u8>> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_eyre("Buffer memory is not host visible")?;
        Ok(mapped[..self.size as usize].to_vec())
    }

    /// Size of the backing allocation, at least `size`
    pub fn allocation_size(&self) -> u64 {
        self.allocation
            .as_ref()
            .map_or(0, |allocation| allocation.size())
    }

    fn bind(&mut self) -> Result<()> {
        let allocation = self
            .allocation
            .as_ref()
            .ok_or_eyre("Buffer memory has already been freed")?;
        unsafe {
            self.device.bind_buffer_memory(
                self.buffer,
                allocation.memory(),
                allocation.offset(),
            )?;
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {}", e);
                    }
                }
                Err(e) => log::error!("Memory allocator lock poisoned: {}", e),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_usage() {
        assert!(BufferKind::Vertex.usage().contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferKind::Vertex.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(BufferKind::Index.usage().contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert_eq!(BufferKind::Staging.usage(), vk::BufferUsageFlags::TRANSFER_SRC);
        assert_eq!(BufferKind::Uniform.usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn test_every_kind_is_host_visible() {
        for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Staging, BufferKind::Uniform] {
            assert_eq!(kind.memory_location(), MemoryLocation::CpuToGpu);
        }
    }
}
