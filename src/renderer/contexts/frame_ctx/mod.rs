pub mod frame;
pub mod per_frame;

use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::commands::Commands;
use crate::renderer::contexts::frame_ctx::frame::FrameSlot;
use crate::renderer::contexts::frame_ctx::per_frame::PerFrame;
use crate::renderer::contexts::resource_ctx::buffer::BufferKind;
use crate::renderer::contexts::resource_ctx::ResourceManager;
use crate::renderer::error::RenderError;
use crate::renderer::shader_data::FrameUniform;

/// Counts rendered frames and maps them onto frame-in-flight slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    frame_index: u64,
    frames_in_flight: usize,
}

impl FrameCounter {
    pub fn new(frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::invalid("frames_in_flight must be at least 1"));
        }
        Ok(Self {
            frame_index: 0,
            frames_in_flight,
        })
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_index % self.frames_in_flight as u64) as usize
    }

    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}

/// Responsibilities:
/// - Manage per-frame command buffers
/// - Manage per-frame uniform buffers
/// - Manage synchronization between frames
pub struct RenderFrameContext {
    pub slots: PerFrame<FrameSlot>,
    pub counter: FrameCounter,
}

impl RenderFrameContext {
    pub fn new(
        frames_in_flight: usize,
        commands: &Commands,
        resources: &mut ResourceManager,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let counter = FrameCounter::new(frames_in_flight)?;
        let command_buffers = commands.allocate(frames_in_flight as u32)?;
        let uniform_size = size_of::<FrameUniform>() as u64;

        let slots = PerFrame::try_new(frames_in_flight, |slot| {
            let frame_uniform = resources.create_buffer(BufferKind::Uniform, uniform_size)?;
            FrameSlot::new(command_buffers[slot], frame_uniform, device.clone())
        })?;

        log::debug!("Created {} frame slots", frames_in_flight);

        Ok(Self { slots, counter })
    }

    pub fn current_slot(&self) -> usize {
        self.counter.current_slot()
    }

    pub fn current(&self) -> Result<&FrameSlot> {
        self.slots.get(self.counter.current_slot())
    }

    pub fn current_mut(&mut self) -> Result<&mut FrameSlot> {
        self.slots.get_mut(self.counter.current_slot())
    }

    pub fn advance(&mut self) {
        self.counter.advance();
    }

    /// Waits for every slot's last submission
    pub fn wait_all(&self) -> Result<()> {
        for slot in self.slots.iter() {
            slot.wait()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_slots_alternate() {
        let mut counter = FrameCounter::new(2).unwrap();
        let slots = (0..6)
            .map(|_| {
                let slot = counter.current_slot();
                counter.advance();
                slot
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(counter.frame_index(), 6);
    }

    #[test]
    fn test_three_slots_cycle() {
        let mut counter = FrameCounter::new(3).unwrap();
        let mut slots = Vec::new();
        for _ in 0..7 {
            slots.push(counter.current_slot());
            counter.advance();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_single_slot_never_moves() {
        let mut counter = FrameCounter::new(1).unwrap();
        counter.advance();
        counter.advance();
        assert_eq!(counter.current_slot(), 0);
    }

    #[test]
    fn test_zero_frames_rejected() {
        let err = FrameCounter::new(0).unwrap_err();
        assert!(matches!(
            RenderError::of(&err),
            Some(RenderError::InvalidArgument(_))
        ));
    }
}
