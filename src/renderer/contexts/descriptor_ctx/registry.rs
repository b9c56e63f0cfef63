use ash::vk;
use color_eyre::Result;
use crate::renderer::error::RenderError;
use crate::renderer::handle::{DescriptorSetHandle, DescriptorSetLayoutHandle, HandleTable};

/// One binding slot of a descriptor-set layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub immutable_sampler: Option<vk::Sampler>,
}

impl LayoutBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            descriptor_type,
            count: 1,
            stages,
            immutable_sampler: None,
        }
    }

    pub fn uniform_buffer(binding: u32) -> Self {
        Self::new(binding, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL)
    }

    pub fn combined_image_sampler(binding: u32, sampler: Option<vk::Sampler>) -> Self {
        Self {
            immutable_sampler: sampler,
            ..Self::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::ALL)
        }
    }

    /// Whether writes to this binding carry image info rather than buffer info
    pub fn takes_image(&self) -> bool {
        matches!(
            self.descriptor_type,
            vk::DescriptorType::SAMPLER
                | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                | vk::DescriptorType::SAMPLED_IMAGE
                | vk::DescriptorType::STORAGE_IMAGE
                | vk::DescriptorType::INPUT_ATTACHMENT
        )
    }
}

/// Payload for one binding of a descriptor write, in binding order
#[derive(Clone, Copy, Debug)]
pub enum DescriptorWrite {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

impl DescriptorWrite {
    pub fn buffer(buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        Self::Buffer(vk::DescriptorBufferInfo {
            buffer,
            offset,
            range,
        })
    }

    pub fn image(image_view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self::Image(vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        })
    }

    pub fn matches(&self, binding: &LayoutBinding) -> bool {
        match self {
            Self::Buffer(_) => !binding.takes_image(),
            Self::Image(_) => binding.takes_image(),
        }
    }
}

struct LayoutEntry {
    raw: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
    // Top of the stack is served first
    free: Vec<DescriptorSetHandle>,
}

struct SetEntry {
    raw: vk::DescriptorSet,
    layout: DescriptorSetLayoutHandle,
    in_use: bool,
}

/// Bookkeeping side of the descriptor manager: layout shapes, set ownership
/// and the per-layout free-lists. Holds native handles but never calls the device.
#[derive(Default)]
pub struct DescriptorRegistry {
    layouts: HandleTable<DescriptorSetLayoutHandle, LayoutEntry>,
    sets: HandleTable<DescriptorSetHandle, SetEntry>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_layout(
        &mut self,
        raw: vk::DescriptorSetLayout,
        bindings: Vec<LayoutBinding>,
    ) -> DescriptorSetLayoutHandle {
        self.layouts.insert(LayoutEntry {
            raw,
            bindings,
            free: Vec::new(),
        })
    }

    /// Pushes freshly allocated sets onto the layout's free-list
    pub fn register_sets(
        &mut self,
        layout: DescriptorSetLayoutHandle,
        raw_sets: impl IntoIterator<Item = vk::DescriptorSet>,
    ) -> Result<Vec<DescriptorSetHandle>> {
        // Fail on an unknown layout before issuing any set handles
        self.layouts.get(layout)?;

        let handles = raw_sets
            .into_iter()
            .map(|raw| {
                self.sets.insert(SetEntry {
                    raw,
                    layout,
                    in_use: false,
                })
            })
            .collect::<Vec<_>>();
        self.layouts.get_mut(layout)?.free.extend(handles.iter().copied());

        Ok(handles)
    }

    /// Pops the most recently freed set of `layout` and marks it in use
    pub fn take_free(&mut self, layout: DescriptorSetLayoutHandle) -> Result<DescriptorSetHandle> {
        let handle = self
            .layouts
            .get_mut(layout)?
            .free
            .pop()
            .ok_or_else(|| {
                RenderError::exhausted(format!("no free descriptor sets left for layout {:?}", layout))
            })?;
        self.sets.get_mut(handle)?.in_use = true;
        Ok(handle)
    }

    /// Returns a checked-out set to its layout's free-list
    pub fn release(&mut self, set: DescriptorSetHandle) -> Result<()> {
        let entry = self.sets.get_mut(set)?;
        if !entry.in_use {
            return Err(RenderError::invalid(format!("descriptor set {:?} is already free", set)));
        }
        entry.in_use = false;
        let layout = entry.layout;
        self.layouts.get_mut(layout)?.free.push(set);
        Ok(())
    }

    /// Writes must cover every binding of the layout, in order, with matching kinds
    pub fn validate_writes(
        &self,
        layout: DescriptorSetLayoutHandle,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let bindings = &self.layouts.get(layout)?.bindings;
        if writes.len() != bindings.len() {
            return Err(RenderError::invalid(format!(
                "layout {:?} has {} bindings but {} writes were given",
                layout,
                bindings.len(),
                writes.len()
            )));
        }
        if let Some((binding, write)) = bindings
            .iter()
            .zip(writes)
            .find(|(binding, write)| !write.matches(binding))
        {
            return Err(RenderError::invalid(format!(
                "binding {} is {:?} but got a {} write",
                binding.binding,
                binding.descriptor_type,
                match write {
                    DescriptorWrite::Buffer(_) => "buffer",
                    DescriptorWrite::Image(_) => "image",
                }
            )));
        }
        Ok(())
    }

    /// Layout of a set that is currently checked out
    pub fn checked_out_layout(&self, set: DescriptorSetHandle) -> Result<DescriptorSetLayoutHandle> {
        let entry = self.sets.get(set)?;
        if !entry.in_use {
            return Err(RenderError::invalid(format!(
                "descriptor set {:?} is not checked out",
                set
            )));
        }
        Ok(entry.layout)
    }

    pub fn raw_set(&self, set: DescriptorSetHandle) -> Result<vk::DescriptorSet> {
        Ok(self.sets.get(set)?.raw)
    }

    pub fn raw_layout(&self, layout: DescriptorSetLayoutHandle) -> Result<vk::DescriptorSetLayout> {
        Ok(self.layouts.get(layout)?.raw)
    }

    pub fn bindings(&self, layout: DescriptorSetLayoutHandle) -> Result<&[LayoutBinding]> {
        Ok(&self.layouts.get(layout)?.bindings)
    }

    pub fn free_count(&self, layout: DescriptorSetLayoutHandle) -> Result<usize> {
        Ok(self.layouts.get(layout)?.free.len())
    }

    pub fn is_in_use(&self, set: DescriptorSetHandle) -> Result<bool> {
        Ok(self.sets.get(set)?.in_use)
    }

    pub fn raw_layouts(&self) -> Vec<vk::DescriptorSetLayout> {
        self.layouts.values().map(|entry| entry.raw).collect()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use crate::renderer::handle::Handle as _;
    use super::*;

    fn scene_layout(registry: &mut DescriptorRegistry) -> DescriptorSetLayoutHandle {
        registry.register_layout(
            vk::DescriptorSetLayout::from_raw(0x10),
            vec![
                LayoutBinding::uniform_buffer(0),
                LayoutBinding::combined_image_sampler(1, None),
            ],
        )
    }

    fn raw_sets(range: std::ops::Range<u64>) -> Vec<vk::DescriptorSet> {
        range.map(vk::DescriptorSet::from_raw).collect()
    }

    fn valid_writes() -> [DescriptorWrite; 2] {
        [
            DescriptorWrite::buffer(vk::Buffer::from_raw(1), 0, 64),
            DescriptorWrite::image(vk::ImageView::from_raw(2), vk::Sampler::null()),
        ]
    }

    #[test]
    fn test_preallocated_sets_run_out() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        let handles = registry.register_sets(layout, raw_sets(1..4)).unwrap();
        assert_eq!(handles.len(), 3);

        let mut taken = (0..3)
            .map(|_| registry.take_free(layout).unwrap())
            .collect::<Vec<_>>();
        taken.sort();
        taken.dedup();
        assert_eq!(taken.len(), 3);

        let err = registry.take_free(layout).unwrap_err();
        assert!(matches!(
            RenderError::of(&err),
            Some(RenderError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        registry.register_sets(layout, raw_sets(1..5)).unwrap();

        let a = registry.take_free(layout).unwrap();
        let b = registry.take_free(layout).unwrap();
        registry.release(a).unwrap();
        registry.release(b).unwrap();

        assert_eq!(registry.take_free(layout).unwrap(), b);
        assert_eq!(registry.take_free(layout).unwrap(), a);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        registry.register_sets(layout, raw_sets(1..2)).unwrap();

        let set = registry.take_free(layout).unwrap();
        registry.release(set).unwrap();
        let err = registry.release(set).unwrap_err();
        assert!(matches!(
            RenderError::of(&err),
            Some(RenderError::InvalidArgument(_))
        ));
        assert_eq!(registry.free_count(layout).unwrap(), 1);
    }

    #[test]
    fn test_write_count_must_match_bindings() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        let writes = valid_writes();

        assert!(registry.validate_writes(layout, &writes).is_ok());
        let empty: &[DescriptorWrite] = &[];
        for bad in [&writes[..1], empty] {
            let err = registry.validate_writes(layout, bad).unwrap_err();
            assert!(matches!(
                RenderError::of(&err),
                Some(RenderError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_write_kind_must_match_binding() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        let [buffer, image] = valid_writes();

        let err = registry.validate_writes(layout, &[image, buffer]).unwrap_err();
        assert!(matches!(
            RenderError::of(&err),
            Some(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_uniform_and_sampler_scenario() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        registry.register_sets(layout, raw_sets(7..9)).unwrap();

        let writes = valid_writes();
        registry.validate_writes(layout, &writes).unwrap();
        let first = registry.take_free(layout).unwrap();
        registry.validate_writes(layout, &writes).unwrap();
        let second = registry.take_free(layout).unwrap();
        assert_ne!(first, second);

        registry.release(first).unwrap();
        assert_eq!(registry.take_free(layout).unwrap(), first);
        assert!(registry.is_in_use(second).unwrap());
    }

    #[test]
    fn test_update_requires_checked_out_set() {
        let mut registry = DescriptorRegistry::new();
        let layout = scene_layout(&mut registry);
        let sets = registry.register_sets(layout, raw_sets(1..2)).unwrap();

        assert!(registry.checked_out_layout(sets[0]).is_err());
        let set = registry.take_free(layout).unwrap();
        assert_eq!(registry.checked_out_layout(set).unwrap(), layout);
    }

    #[test]
    fn test_unknown_layout() {
        let mut registry = DescriptorRegistry::new();
        let layout = DescriptorSetLayoutHandle::from_raw(42);
        assert!(registry.register_sets(layout, raw_sets(1..2)).is_err());
        assert!(registry.take_free(layout).is_err());
    }
}
