use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::handle::{BufferHandle, CommandBufferHandle};

/// Synchronization and recording state of one frame in flight
pub struct FrameSlot {
    pub command_buffer: CommandBufferHandle,

    // Frame-wide uniform block written while recording this slot
    pub frame_uniform: BufferHandle,

    // Signals when the acquired swapchain image is ready to be rendered to.
    pub image_available: vk::Semaphore,

    // Signals when rendering commands have finished and the image can be presented.
    pub render_finished: vk::Semaphore,

    // Signals when all rendering commands have finished execution.
    pub in_flight: vk::Fence,

    device: Arc<ash::Device>,
}

impl FrameSlot {
    pub fn new(
        command_buffer: CommandBufferHandle,
        frame_uniform: BufferHandle,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        // Start with null handles so `Drop` only destroys what was created
        let mut slot = Self {
            command_buffer,
            frame_uniform,
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device,
        };

        unsafe {
            slot.image_available = slot
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            slot.render_finished = slot
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            // Created signaled so the first wait on this slot returns immediately
            slot.in_flight = slot.device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?;
        }

        Ok(slot)
    }

    /// Blocks until the GPU has finished the last submission made from this slot
    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device.reset_fences(&[self.in_flight])?;
        }
        Ok(())
    }

    pub fn is_signaled(&self) -> Result<bool> {
        Ok(unsafe { self.device.get_fence_status(self.in_flight)? })
    }

    /// Replaces the fence with a signaled one. Only valid while no submission
    /// references the current fence.
    pub fn rearm(&mut self) -> Result<()> {
        let fence = unsafe {
            self.device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };
        unsafe {
            self.device.destroy_fence(self.in_flight, None);
        }
        self.in_flight = fence;
        Ok(())
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            if self.in_flight != vk::Fence::null() {
                self.device.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.image_available, None);
            }
        }
    }
}
