//! Integration test: resource, descriptor and command management on a real device
//!
//! Creates a headless Vulkan device (no surface, validation off). Each test
//! prints a note and returns early when no Vulkan implementation is available.
//!
//! Run with: cargo test --test gpu_resources -- --nocapture

use std::sync::Arc;
use ash::vk;
use tessera::renderer::config::RenderConfig;
use tessera::renderer::contexts::descriptor_ctx::registry::{DescriptorWrite, LayoutBinding};
use tessera::renderer::contexts::descriptor_ctx::DescriptorManager;
use tessera::renderer::contexts::device_ctx::commands::{Commands, SubmitSync};
use tessera::renderer::contexts::device_ctx::RenderDeviceContext;
use tessera::renderer::contexts::pipeline_ctx::PipelineManager;
use tessera::renderer::contexts::frame_ctx::frame::FrameSlot;
use tessera::renderer::contexts::resource_ctx::buffer::{Buffer, BufferKind};
use tessera::renderer::contexts::resource_ctx::ResourceManager;
use tessera::renderer::error::RenderError;
use tessera::renderer::handle::{BufferHandle, CommandBufferHandle, Handle};
use tessera::renderer::resources::texture::TextureData;
use tessera::renderer::resources::vertex::Vertex;

// Field order is drop order: resources go before the device they live on
struct Gpu {
    res: ResourceManager,
    cmd: Arc<Commands>,
    dev: RenderDeviceContext,
}

impl Gpu {
    fn device(&self) -> Arc<ash::Device> {
        self.dev.device.logical.clone()
    }
}

fn make_gpu() -> Option<Gpu> {
    let config = RenderConfig {
        application_name: "gpu_resources".to_string(),
        validation: false,
        ..Default::default()
    };
    let dev = match RenderDeviceContext::headless(&config) {
        Ok(dev) => dev,
        Err(e) => {
            eprintln!("Skipping: no usable Vulkan device ({})", e);
            return None;
        }
    };
    let cmd = Arc::new(
        Commands::new(dev.device.logical.clone(), dev.device.graphics_queue.clone(), 2)
            .expect("command pools"),
    );
    let res = ResourceManager::new(
        dev.device.logical.clone(),
        dev.device.memory_allocator().expect("memory allocator"),
        cmd.clone(),
    );
    Some(Gpu { res, cmd, dev })
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn test_vertex_buffer_roundtrip_through_staging() {
    let Some(mut gpu) = make_gpu() else { return };

    // Four vertices worth of known bytes
    let size = 4 * size_of::<Vertex>();
    assert_eq!(size, 128);
    let bytes = pattern(size);

    let staging = gpu.res.create_buffer(BufferKind::Staging, size as u64).unwrap();
    gpu.res.insert_data(staging, &bytes).unwrap();
    let vertex = gpu.res.create_buffer(BufferKind::Vertex, size as u64).unwrap();
    gpu.res.copy(staging, vertex, size as u64).unwrap();

    let read_back = gpu.res.read_buffer(vertex).unwrap();
    assert_eq!(read_back, bytes);
}

#[test]
fn test_allocation_covers_requested_size() {
    let Some(mut gpu) = make_gpu() else { return };

    for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Staging, BufferKind::Uniform] {
        for size in [1u64, 7, 256, 4097, 65536] {
            let buffer = gpu.res.create_buffer(kind, size).unwrap();
            let allocated = gpu.res.allocation_size(buffer).unwrap();
            assert!(
                allocated >= size,
                "{:?} buffer of {} bytes got {} bytes",
                kind,
                size,
                allocated
            );
            gpu.res.release_buffer(buffer).unwrap();
        }
    }
    assert_eq!(gpu.res.buffer_count(), 0);
}

#[test]
fn test_zero_sized_buffer_is_rejected() {
    let Some(mut gpu) = make_gpu() else { return };

    let err = gpu.res.create_buffer(BufferKind::Uniform, 0).unwrap_err();
    assert!(matches!(
        RenderError::of(&err),
        Some(RenderError::InvalidArgument(_))
    ));
}

#[test]
fn test_descriptor_free_list_on_real_pool() {
    let Some(mut gpu) = make_gpu() else { return };
    let mut pip = PipelineManager::new(gpu.device());
    let mut dsc = DescriptorManager::new(gpu.device());

    let sampler = pip.create_sampler(None).unwrap();
    let uniform = gpu.res.create_buffer(BufferKind::Uniform, 64).unwrap();
    let texture = gpu
        .res
        .upload_texture(&TextureData::checkerboard(4, 2, [255; 4], [0, 0, 0, 255]))
        .unwrap();

    let layout = dsc
        .create_layout(&[
            LayoutBinding::uniform_buffer(0),
            LayoutBinding::combined_image_sampler(1, None),
        ])
        .unwrap();
    let writes = [
        DescriptorWrite::buffer(gpu.res.raw_buffer(uniform).unwrap(), 0, 64),
        DescriptorWrite::image(gpu.res.image_view(texture).unwrap(), sampler),
    ];

    let sets = dsc.pre_allocate(layout, 2).unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(dsc.free_count(layout).unwrap(), 2);

    let first = dsc.write_ds(layout, &writes).unwrap();
    let second = dsc.write_ds(layout, &writes).unwrap();
    assert_ne!(first, second);
    assert_ne!(dsc.descriptor_set(first).unwrap(), vk::DescriptorSet::null());

    let err = dsc.get_free(layout).unwrap_err();
    assert!(matches!(
        RenderError::of(&err),
        Some(RenderError::ResourceExhausted(_))
    ));

    dsc.free_ds(first).unwrap();
    assert_eq!(dsc.get_free(layout).unwrap(), first);

    // A short write list is rejected without touching the set
    let err = dsc.update_ds(second, &writes[..1]).unwrap_err();
    assert!(matches!(
        RenderError::of(&err),
        Some(RenderError::InvalidArgument(_))
    ));
    dsc.update_ds(second, &writes).unwrap();
}

#[test]
fn test_transfer_session_uploads_in_one_batch() {
    let Some(mut gpu) = make_gpu() else { return };

    let first_bytes = pattern(96);
    let second_bytes = pattern(40).into_iter().rev().collect::<Vec<_>>();
    let first = gpu.res.create_buffer(BufferKind::Vertex, 96).unwrap();
    let second = gpu.res.create_buffer(BufferKind::Index, 40).unwrap();

    let mut session = gpu.cmd.transfer_session().unwrap();
    gpu.res.stage_buffer_upload(&mut session, first, &first_bytes).unwrap();
    gpu.res.stage_buffer_upload(&mut session, second, &second_bytes).unwrap();
    assert_eq!(session.len(), 2);
    session.submit().unwrap();

    assert_eq!(gpu.res.read_buffer(first).unwrap(), first_bytes);
    assert_eq!(gpu.res.read_buffer(second).unwrap(), second_bytes);
    assert_eq!(gpu.cmd.pending_count().unwrap(), 0);

    // Oversized uploads are refused before anything is recorded
    let mut session = gpu.cmd.transfer_session().unwrap();
    let err = gpu
        .res
        .stage_buffer_upload(&mut session, second, &pattern(41))
        .unwrap_err();
    assert!(matches!(
        RenderError::of(&err),
        Some(RenderError::InvalidArgument(_))
    ));
    assert!(session.is_empty());
}

#[test]
fn test_texture_upload_leaves_image_readable() {
    let Some(mut gpu) = make_gpu() else { return };

    let texture = TextureData::checkerboard(16, 4, [200, 10, 10, 255], [10, 10, 200, 255]);
    let image = gpu.res.upload_texture(&texture).unwrap();
    assert_eq!(gpu.res.image(image).unwrap().extent.width, 16);
    assert_eq!(gpu.res.image_count(), 1);

    gpu.res.release_image(image).unwrap();
    assert!(gpu.res.image_view(image).is_err());
}

#[test]
fn test_command_pools_and_recording_guard() {
    let Some(gpu) = make_gpu() else { return };

    assert_eq!(gpu.cmd.pool_count().unwrap(), 2);
    let buffers = gpu.cmd.allocate(2).unwrap();
    assert_eq!(buffers.len(), 2);

    gpu.cmd.begin(buffers[0]).unwrap();
    assert!(gpu.cmd.begin(buffers[0]).is_err());
    gpu.cmd.end(buffers[0], &SubmitSync::default()).unwrap();
    assert!(gpu.cmd.end(buffers[0], &SubmitSync::default()).is_err());
    gpu.dev.device.wait_idle().unwrap();

    // Buffers can be recorded again once the GPU is done with them
    gpu.cmd.begin(buffers[0]).unwrap();
    gpu.cmd.end(buffers[0], &SubmitSync::default()).unwrap();
    gpu.dev.device.wait_idle().unwrap();

    gpu.cmd.select_pool(1).unwrap();
    let from_second_pool = gpu.cmd.allocate(1).unwrap();
    assert!(!buffers.contains(&from_second_pool[0]));

    let err = gpu.cmd.select_pool(2).unwrap_err();
    assert!(matches!(
        RenderError::of(&err),
        Some(RenderError::InvalidArgument(_))
    ));
}

#[test]
fn test_single_time_without_wait_is_reclaimed() {
    let Some(gpu) = make_gpu() else { return };

    let command_buffer = gpu.cmd.begin_single_time().unwrap();
    gpu.cmd.end_single_time(command_buffer, false).unwrap();
    assert!(gpu.cmd.pending_count().unwrap() <= 1);

    gpu.dev.device.wait_idle().unwrap();
    let command_buffer = gpu.cmd.begin_single_time().unwrap();
    // Finished submissions are reaped when the next one starts
    assert_eq!(gpu.cmd.pending_count().unwrap(), 0);
    gpu.cmd.end_single_time(command_buffer, true).unwrap();
}

#[test]
fn test_discarded_recording_can_begin_again() {
    let Some(gpu) = make_gpu() else { return };

    let buffer = gpu.cmd.allocate(1).unwrap()[0];
    gpu.cmd.begin(buffer).unwrap();
    assert!(gpu.cmd.is_recording(buffer).unwrap());

    // Recording failed halfway: nothing is submitted and the buffer is reusable
    gpu.cmd.discard(buffer).unwrap();
    assert!(!gpu.cmd.is_recording(buffer).unwrap());
    assert!(gpu.cmd.end(buffer, &SubmitSync::default()).is_err());

    gpu.cmd.begin(buffer).unwrap();
    gpu.cmd.end(buffer, &SubmitSync::default()).unwrap();
    gpu.dev.device.wait_idle().unwrap();
}

#[test]
fn test_abandoned_frame_leaves_fence_signaled() {
    let Some(gpu) = make_gpu() else { return };
    let mut slot = FrameSlot::new(
        CommandBufferHandle::from_raw(1),
        BufferHandle::from_raw(1),
        gpu.device(),
    )
    .unwrap();
    assert!(slot.is_signaled().unwrap());

    // A submission without commands still signals the slot fence
    slot.reset().unwrap();
    assert!(!slot.is_signaled().unwrap());
    gpu.cmd
        .submit_sync_only(&SubmitSync {
            fence: slot.in_flight,
            ..Default::default()
        })
        .unwrap();
    slot.wait().unwrap();
    assert!(slot.is_signaled().unwrap());

    // A reset fence that was never submitted can be replaced by a signaled one
    slot.reset().unwrap();
    let old_fence = slot.in_flight;
    slot.rearm().unwrap();
    assert_ne!(slot.in_flight, old_fence);
    assert!(slot.is_signaled().unwrap());
    slot.wait().unwrap();
}

#[test]
fn test_pending_submission_keeps_staging_alive() {
    let Some(gpu) = make_gpu() else { return };

    let staging = Buffer::new(
        64,
        BufferKind::Staging,
        gpu.dev.device.memory_allocator().unwrap(),
        gpu.device(),
    )
    .unwrap();
    let command_buffer = gpu.cmd.begin_single_time().unwrap();
    gpu.cmd
        .end_single_time_keeping(command_buffer, false, vec![staging])
        .unwrap();
    assert_eq!(gpu.cmd.pending_count().unwrap(), 1);

    gpu.dev.device.wait_idle().unwrap();
    let command_buffer = gpu.cmd.begin_single_time().unwrap();
    assert_eq!(gpu.cmd.pending_count().unwrap(), 0);
    gpu.cmd.end_single_time(command_buffer, true).unwrap();
}
