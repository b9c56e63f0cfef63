use ash::vk;
use color_eyre::Result;
use gpu_descriptor::DescriptorTotalCount;
use crate::renderer::contexts::descriptor_ctx::registry::LayoutBinding;
use crate::renderer::error::RenderError;

pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(mut self, binding: LayoutBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn add_bindings(mut self, bindings: &[LayoutBinding]) -> Self {
        self.bindings.extend_from_slice(bindings);
        self
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    pub fn build(&self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        if let Some(binding) = self
            .bindings
            .iter()
            .find(|binding| binding.immutable_sampler.is_some() && binding.count != 1)
        {
            return Err(RenderError::invalid(format!(
                "binding {} has an immutable sampler but {} descriptors",
                binding.binding, binding.count
            )));
        }

        // Immutable sampler arrays must outlive the create call
        let samplers = self
            .bindings
            .iter()
            .map(|binding| [binding.immutable_sampler.unwrap_or_default()])
            .collect::<Vec<_>>();
        let raw_bindings = self
            .bindings
            .iter()
            .zip(&samplers)
            .map(|(binding, sampler)| {
                let raw = vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages);
                if binding.immutable_sampler.is_some() {
                    raw.immutable_samplers(sampler)
                } else {
                    raw
                }
            })
            .collect::<Vec<_>>();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&raw_bindings);
        Ok(unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        })
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptors one set of this shape consumes from a pool
pub fn descriptor_total_count(bindings: &[LayoutBinding]) -> Result<DescriptorTotalCount> {
    let mut total = DescriptorTotalCount::default();
    for binding in bindings {
        let slot = match binding.descriptor_type {
            vk::DescriptorType::SAMPLER => &mut total.sampler,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => &mut total.combined_image_sampler,
            vk::DescriptorType::SAMPLED_IMAGE => &mut total.sampled_image,
            vk::DescriptorType::STORAGE_IMAGE => &mut total.storage_image,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => &mut total.uniform_texel_buffer,
            vk::DescriptorType::STORAGE_TEXEL_BUFFER => &mut total.storage_texel_buffer,
            vk::DescriptorType::UNIFORM_BUFFER => &mut total.uniform_buffer,
            vk::DescriptorType::STORAGE_BUFFER => &mut total.storage_buffer,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => &mut total.uniform_buffer_dynamic,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => &mut total.storage_buffer_dynamic,
            vk::DescriptorType::INPUT_ATTACHMENT => &mut total.input_attachment,
            other => {
                return Err(RenderError::invalid(format!(
                    "descriptor type {:?} is not supported",
                    other
                )));
            }
        };
        *slot += binding.count;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_count_sums_bindings() {
        let bindings = [
            LayoutBinding::uniform_buffer(0),
            LayoutBinding::uniform_buffer(1),
            LayoutBinding::combined_image_sampler(2, None),
        ];
        let total = descriptor_total_count(&bindings).unwrap();
        assert_eq!(total.uniform_buffer, 2);
        assert_eq!(total.combined_image_sampler, 1);
        assert_eq!(total.storage_buffer, 0);
    }

    #[test]
    fn test_unsupported_descriptor_type() {
        let bindings = [LayoutBinding::new(
            0,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            vk::ShaderStageFlags::ALL,
        )];
        assert!(descriptor_total_count(&bindings).is_err());
    }
}
