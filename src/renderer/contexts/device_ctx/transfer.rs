use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::commands::Commands;
use crate::renderer::contexts::resource_ctx::buffer::Buffer;

/// A batch of copy and layout-transition commands recorded into one
/// command buffer, submitted and waited on exactly once.
///
/// Staging buffers handed to `keep_alive` are released after the GPU has
/// consumed them. If waiting on the batch fails they move to the pending
/// list of `Commands` and are released once its fence signals.
pub struct TransferSession<'a> {
    commands: &'a Commands,
    command_buffer: vk::CommandBuffer,
    staging: Vec<Buffer>,
    recorded: usize,
    submitted: bool,
}

impl<'a> TransferSession<'a> {
    pub(crate) fn begin(commands: &'a Commands) -> Result<Self> {
        let command_buffer = commands.begin_single_time()?;
        Ok(Self {
            commands,
            command_buffer,
            staging: Vec::new(),
            recorded: 0,
            submitted: false,
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn record<F>(&mut self, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        func(self.command_buffer, self.commands.device())?;
        self.recorded += 1;
        Ok(())
    }

    pub fn keep_alive(&mut self, buffer: Buffer) {
        self.staging.push(buffer);
    }

    /// Number of operations recorded so far
    pub fn len(&self) -> usize {
        self.recorded
    }

    pub fn is_empty(&self) -> bool {
        self.recorded == 0
    }

    pub fn submit(mut self) -> Result<()> {
        self.submitted = true;
        let staging = std::mem::take(&mut self.staging);
        let staging_count = staging.len();
        // Staging buffers are released only once the GPU is done with them
        self.commands
            .end_single_time_keeping(self.command_buffer, true, staging)?;
        log::debug!(
            "Transfer session finished: {} operations, {} staging buffers",
            self.recorded,
            staging_count
        );
        Ok(())
    }
}

impl Drop for TransferSession<'_> {
    fn drop(&mut self) {
        if self.submitted {
            return;
        }
        if self.recorded > 0 {
            log::warn!(
                "Transfer session dropped with {} unsubmitted operations",
                self.recorded
            );
        }
        if let Err(e) = self.commands.abandon_single_time(self.command_buffer) {
            log::error!("Failed to free transfer command buffer: {}", e);
        }
    }
}
