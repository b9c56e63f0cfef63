use std::sync::{Arc, Mutex, MutexGuard};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::transfer::TransferSession;
use crate::renderer::contexts::resource_ctx::buffer::Buffer;
use crate::renderer::error::RenderError;
use crate::renderer::handle::{CommandBufferHandle, HandleTable};

/// Semaphores and fence attached to one submission
#[derive(Default)]
pub struct SubmitSync<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

struct CommandBufferRecord {
    raw: vk::CommandBuffer,
    pool: usize,
    is_recording: bool,
}

// A one-shot submission the GPU may still be executing
struct PendingSubmit {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    // Read by the submitted copies, dropped once the fence signals
    staging: Vec<Buffer>,
}

struct CommandsInner {
    pools: Vec<vk::CommandPool>,
    active_pool: usize,
    transient_pool: vk::CommandPool,
    buffers: HandleTable<CommandBufferHandle, CommandBufferRecord>,
    pending: Vec<PendingSubmit>,
}

/// Responsibilities:
/// - Own the command pools of one queue
/// - Allocate, record and submit reusable command buffers
/// - Run one-shot setup work, synchronously or batched in a transfer session
pub struct Commands {
    inner: Mutex<CommandsInner>,
    queue: Arc<Queue>,
    device: Arc<ash::Device>,
}

impl Commands {
    pub fn new(
        device: Arc<ash::Device>,
        queue: Arc<Queue>,
        pool_count: usize,
    ) -> Result<Self> {
        if pool_count == 0 {
            return Err(RenderError::invalid("at least one command pool is required"));
        }

        let pools = (0..pool_count)
            .map(|_| create_pool(&device, queue.family.index, vk::CommandPoolCreateFlags::empty()))
            .collect::<Result<Vec<_>>>()?;
        let transient_pool = create_pool(
            &device,
            queue.family.index,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            inner: Mutex::new(CommandsInner {
                pools,
                active_pool: 0,
                transient_pool,
                buffers: HandleTable::new(),
                pending: Vec::new(),
            }),
            queue,
            device,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn pool_count(&self) -> Result<usize> {
        Ok(self.lock()?.pools.len())
    }

    /// Resets pool `index` and uses it for subsequent allocations. Buffers
    /// already allocated from it stay valid but lose their recorded commands.
    pub fn select_pool(&self, index: usize) -> Result<()> {
        let mut guard = self.lock()?;
        let pool = *guard.pools.get(index).ok_or_else(|| {
            RenderError::invalid(format!("command pool {} does not exist", index))
        })?;
        unsafe {
            self.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty())?;
        }
        for (_, record) in guard.buffers.iter_mut() {
            if record.pool == index {
                record.is_recording = false;
            }
        }
        guard.active_pool = index;
        Ok(())
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<CommandBufferHandle>> {
        if count == 0 {
            return Err(RenderError::invalid("cannot allocate zero command buffers"));
        }

        let mut guard = self.lock()?;
        let pool_index = guard.active_pool;
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(guard.pools[pool_index])
            .command_buffer_count(count)
            .level(vk::CommandBufferLevel::PRIMARY);
        let raw_buffers = unsafe { self.device.allocate_command_buffers(&allocate_info) }
            .map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                    RenderError::exhausted(format!("command pool {} cannot grow: {}", pool_index, e))
                }
                e => eyre!(e),
            })?;

        Ok(raw_buffers
            .into_iter()
            .map(|raw| {
                guard.buffers.insert(CommandBufferRecord {
                    raw,
                    pool: pool_index,
                    is_recording: false,
                })
            })
            .collect())
    }

    pub fn raw(&self, handle: CommandBufferHandle) -> Result<vk::CommandBuffer> {
        Ok(self.lock()?.buffers.get(handle)?.raw)
    }

    /// Starts recording a reusable command buffer, discarding what it held before
    pub fn begin(&self, handle: CommandBufferHandle) -> Result<vk::CommandBuffer> {
        let mut guard = self.lock()?;
        let record = guard.buffers.get_mut(handle)?;
        if record.is_recording {
            return Err(RenderError::invalid("command buffer is already recording"));
        }

        unsafe {
            self.device.begin_command_buffer(record.raw, &vk::CommandBufferBeginInfo::default())?;
        }
        record.is_recording = true;

        Ok(record.raw)
    }

    /// Ends recording and submits with the given synchronization
    pub fn end(&self, handle: CommandBufferHandle, sync: &SubmitSync) -> Result<()> {
        validate_sync(sync)?;

        let mut guard = self.lock()?;
        let record = guard.buffers.get_mut(handle)?;
        if !record.is_recording {
            return Err(RenderError::invalid("command buffer is not recording"));
        }
        record.is_recording = false;

        let command_buffers = [record.raw];
        unsafe {
            self.device.end_command_buffer(record.raw)?;

            let submit = vk::SubmitInfo::default()
                .wait_semaphores(sync.wait_semaphores)
                .wait_dst_stage_mask(sync.wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(sync.signal_semaphores);
            self.device.queue_submit(self.queue.handle, &[submit], sync.fence)?;
        }

        Ok(())
    }

    /// Drops whatever was recorded into `handle` without submitting it, so
    /// the buffer can begin again
    pub fn discard(&self, handle: CommandBufferHandle) -> Result<()> {
        let mut guard = self.lock()?;
        let record = guard.buffers.get_mut(handle)?;
        record.is_recording = false;
        unsafe {
            self.device.reset_command_buffer(record.raw, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Submits no commands, only the semaphore waits and signals and the fence
    pub fn submit_sync_only(&self, sync: &SubmitSync) -> Result<()> {
        validate_sync(sync)?;

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(sync.wait_semaphores)
            .wait_dst_stage_mask(sync.wait_stages)
            .signal_semaphores(sync.signal_semaphores);
        unsafe {
            self.device.queue_submit(self.queue.handle, &[submit], sync.fence)?;
        }
        Ok(())
    }

    pub fn is_recording(&self, handle: CommandBufferHandle) -> Result<bool> {
        Ok(self.lock()?.buffers.get(handle)?.is_recording)
    }

    pub fn free(&self, handle: CommandBufferHandle) -> Result<()> {
        let mut guard = self.lock()?;
        let record = guard.buffers.remove(handle)?;
        let pool = guard.pools[record.pool];
        unsafe {
            self.device.free_command_buffers(pool, &[record.raw]);
        }
        Ok(())
    }

    /// Allocates a one-shot command buffer and begins recording it
    pub fn begin_single_time(&self) -> Result<vk::CommandBuffer> {
        let mut guard = self.lock()?;
        self.reap_pending(&mut guard)?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(guard.transient_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = unsafe {
            self.device.allocate_command_buffers(&allocate_info)?[0]
        };

        // This command buffer will be used exactly once before being freed
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let begun = unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) };
        if let Err(e) = begun {
            unsafe {
                self.device.free_command_buffers(guard.transient_pool, &[command_buffer]);
            }
            return Err(e.into());
        }

        Ok(command_buffer)
    }

    /// Ends and submits a one-shot command buffer. With `wait`, blocks until
    /// the GPU has executed it; otherwise it is reclaimed by a later call.
    pub fn end_single_time(&self, command_buffer: vk::CommandBuffer, wait: bool) -> Result<()> {
        self.end_single_time_keeping(command_buffer, wait, Vec::new())
    }

    /// Like `end_single_time`, but `staging` outlives the GPU's use of the
    /// command buffer even when waiting on it fails
    pub fn end_single_time_keeping(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: bool,
        staging: Vec<Buffer>,
    ) -> Result<()> {
        let mut guard = self.lock()?;
        self.submit_single_time(&mut guard, command_buffer, wait, staging)
    }

    /// Drops a one-shot command buffer that will never be submitted
    pub fn abandon_single_time(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let guard = self.lock()?;
        unsafe {
            self.device.free_command_buffers(guard.transient_pool, &[command_buffer]);
        }
        Ok(())
    }

    // Instantly execute some commands to the GPU without dealing with the render loop and other synchronization
    pub fn immediate_submit<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let command_buffer = self.begin_single_time()?;
        if let Err(e) = func(command_buffer, &self.device) {
            self.abandon_single_time(command_buffer)?;
            return Err(e);
        }
        self.end_single_time(command_buffer, true)
    }

    /// Opens a batch of transfer commands that is submitted and waited on once
    pub fn transfer_session(&self) -> Result<TransferSession<'_>> {
        TransferSession::begin(self)
    }

    /// Number of one-shot submissions still awaiting reclamation
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.lock()?.pending.len())
    }

    fn submit_single_time(
        &self,
        guard: &mut CommandsInner,
        command_buffer: vk::CommandBuffer,
        wait: bool,
        staging: Vec<Buffer>,
    ) -> Result<()> {
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            let submitted = self
                .device
                .end_command_buffer(command_buffer)
                .and_then(|_| self.device.create_fence(&vk::FenceCreateInfo::default(), None))
                .and_then(|fence| {
                    match self.device.queue_submit(self.queue.handle, &[submit], fence) {
                        Ok(()) => Ok(fence),
                        Err(e) => {
                            self.device.destroy_fence(fence, None);
                            Err(e)
                        }
                    }
                });
            let fence = match submitted {
                Ok(fence) => fence,
                Err(e) => {
                    // Never reached the queue
                    self.device.free_command_buffers(guard.transient_pool, &command_buffers);
                    return Err(e.into());
                }
            };

            let pending = PendingSubmit {
                command_buffer,
                fence,
                staging,
            };
            if !wait {
                guard.pending.push(pending);
                return Ok(());
            }

            // `fence` will now block until the commands finish execution
            if let Err(e) = self.device.wait_for_fences(&[fence], true, u64::MAX) {
                // The GPU may still be reading; reclaimed once the fence signals
                guard.pending.push(pending);
                return Err(e.into());
            }
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(guard.transient_pool, &command_buffers);
        }

        Ok(())
    }

    fn reap_pending(&self, guard: &mut CommandsInner) -> Result<()> {
        let mut still_pending = Vec::with_capacity(guard.pending.len());
        for pending in guard.pending.drain(..) {
            let finished = unsafe { self.device.get_fence_status(pending.fence)? };
            if finished {
                unsafe {
                    self.device.destroy_fence(pending.fence, None);
                    self.device.free_command_buffers(guard.transient_pool, &[pending.command_buffer]);
                }
            } else {
                still_pending.push(pending);
            }
        }
        guard.pending = still_pending;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CommandsInner>> {
        self.inner.lock().map_err(|e| eyre!(e.to_string()))
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        unsafe {
            for pending in inner.pending.drain(..) {
                if let Err(e) = self.device.wait_for_fences(&[pending.fence], true, u64::MAX) {
                    log::error!("Failed to wait for a pending submission: {}", e);
                }
                self.device.destroy_fence(pending.fence, None);
            }
            // Destroying a pool frees every command buffer allocated from it
            for pool in inner.pools.drain(..) {
                self.device.destroy_command_pool(pool, None);
            }
            self.device.destroy_command_pool(inner.transient_pool, None);
        }
    }
}

fn validate_sync(sync: &SubmitSync) -> Result<()> {
    if sync.wait_semaphores.len() != sync.wait_stages.len() {
        return Err(RenderError::invalid(format!(
            "{} wait semaphores but {} wait stages",
            sync.wait_semaphores.len(),
            sync.wait_stages.len()
        )));
    }
    Ok(())
}

fn create_pool(
    device: &ash::Device,
    queue_family_index: u32,
    extra_flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        // Allow the pool to reset individual command buffers
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER | extra_flags);
    Ok(unsafe { device.create_command_pool(&pool_info, None)? })
}
