pub mod ash_device;
pub mod layout_builder;
pub mod registry;

use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use gpu_descriptor::{DescriptorAllocator, DescriptorSetLayoutCreateFlags};
use crate::renderer::contexts::descriptor_ctx::ash_device::DescriptorAshDevice;
use crate::renderer::contexts::descriptor_ctx::layout_builder::{descriptor_total_count, DescriptorSetLayoutBuilder};
use crate::renderer::contexts::descriptor_ctx::registry::{DescriptorRegistry, DescriptorWrite, LayoutBinding};
use crate::renderer::error::RenderError;
use crate::renderer::handle::{DescriptorSetHandle, DescriptorSetLayoutHandle};

// Sets per pool before gpu-descriptor grows a new one
const MAX_SETS_PER_POOL: u32 = 1024;

/// Responsibilities:
/// - Register descriptor-set layouts
/// - Pre-allocate sets per layout and hand them out from a LIFO free-list
/// - Validate and apply descriptor writes
pub struct DescriptorManager {
    registry: DescriptorRegistry,
    descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    // Every set drawn from the pools, returned to them on drop
    allocated_sets: Vec<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,

    ash_device: DescriptorAshDevice,
    device: Arc<ash::Device>,
}

impl DescriptorManager {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            registry: DescriptorRegistry::new(),
            descriptor_allocator: DescriptorAllocator::new(MAX_SETS_PER_POOL),
            allocated_sets: Vec::new(),
            ash_device: DescriptorAshDevice::from(device.clone()),
            device,
        }
    }

    pub fn create_layout(&mut self, bindings: &[LayoutBinding]) -> Result<DescriptorSetLayoutHandle> {
        let raw = DescriptorSetLayoutBuilder::new()
            .add_bindings(bindings)
            .build(&self.device)?;
        let handle = self.registry.register_layout(raw, bindings.to_vec());
        log::debug!("Created descriptor set layout {:?} with {} bindings", handle, bindings.len());
        Ok(handle)
    }

    /// Draws `count` sets for `layout` from the shared pools onto its free-list
    pub fn pre_allocate(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> Result<Vec<DescriptorSetHandle>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let raw_layout = self.registry.raw_layout(layout)?;
        let total = descriptor_total_count(self.registry.bindings(layout)?)?;
        let sets = unsafe {
            self.descriptor_allocator.allocate(
                &self.ash_device,
                &raw_layout,
                DescriptorSetLayoutCreateFlags::empty(),
                &total,
                count,
            )
        }
        .map_err(|e| {
            RenderError::exhausted(format!(
                "failed to allocate {} descriptor sets for layout {:?}: {:?}",
                count, layout, e
            ))
        })?;

        let raw_sets = sets.iter().map(|set| *set.raw()).collect::<Vec<_>>();
        self.allocated_sets.extend(sets);
        self.registry.register_sets(layout, raw_sets)
    }

    /// Checks out the most recently freed set of `layout`
    pub fn get_free(&mut self, layout: DescriptorSetLayoutHandle) -> Result<DescriptorSetHandle> {
        self.registry.take_free(layout)
    }

    /// Checks out a free set of `layout` and performs its initial writes
    pub fn write_ds(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        writes: &[DescriptorWrite],
    ) -> Result<DescriptorSetHandle> {
        // Validate first so a rejected write does not consume a set
        self.registry.validate_writes(layout, writes)?;
        let set = self.registry.take_free(layout)?;
        self.apply_writes(set, layout, writes)?;
        Ok(set)
    }

    /// Rewrites every binding of a checked-out set
    pub fn update_ds(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> Result<()> {
        let layout = self.registry.checked_out_layout(set)?;
        self.registry.validate_writes(layout, writes)?;
        self.apply_writes(set, layout, writes)
    }

    /// Returns a checked-out set to its layout's free-list
    pub fn free_ds(&mut self, set: DescriptorSetHandle) -> Result<()> {
        self.registry.release(set)
    }

    pub fn descriptor_set(&self, set: DescriptorSetHandle) -> Result<vk::DescriptorSet> {
        self.registry.raw_set(set)
    }

    pub fn raw_layout(&self, layout: DescriptorSetLayoutHandle) -> Result<vk::DescriptorSetLayout> {
        self.registry.raw_layout(layout)
    }

    pub fn layout_bindings(&self, layout: DescriptorSetLayoutHandle) -> Result<&[LayoutBinding]> {
        self.registry.bindings(layout)
    }

    pub fn free_count(&self, layout: DescriptorSetLayoutHandle) -> Result<usize> {
        self.registry.free_count(layout)
    }

    fn apply_writes(
        &self,
        set: DescriptorSetHandle,
        layout: DescriptorSetLayoutHandle,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let raw_set = self.registry.raw_set(set)?;
        let raw_writes = self
            .registry
            .bindings(layout)?
            .iter()
            .zip(writes)
            .map(|(binding, write)| {
                let raw = vk::WriteDescriptorSet::default()
                    .dst_set(raw_set)
                    .dst_binding(binding.binding)
                    .dst_array_element(0)
                    .descriptor_type(binding.descriptor_type);
                match write {
                    DescriptorWrite::Buffer(info) => raw.buffer_info(std::slice::from_ref(info)),
                    DescriptorWrite::Image(info) => raw.image_info(std::slice::from_ref(info)),
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.device.update_descriptor_sets(&raw_writes, &[]);
        }
        Ok(())
    }
}

impl Drop for DescriptorManager {
    fn drop(&mut self) {
        unsafe {
            self.descriptor_allocator
                .free(&self.ash_device, self.allocated_sets.drain(..));
            self.descriptor_allocator.cleanup(&self.ash_device);
            for layout in self.registry.raw_layouts() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}
