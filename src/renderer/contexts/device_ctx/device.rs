use std::ffi::{c_char, CStr};
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::instance::{RenderInstance, Surface};
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily, QueueFamilyIndices};

/// Physical device selection, the logical device, its queues and the memory allocator
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: QueueFamilyIndices,

    pub graphics_queue: Arc<Queue>,
    // Same queue as `graphics_queue` when the families match
    pub present_queue: Option<Arc<Queue>>,

    pub sampler_anisotropy: bool,

    memory_allocator: Option<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        config: &RenderConfig,
        surface: Option<&Surface>,
    ) -> Result<Self> {
        let (physical_device, queue_families) = Self::select_physical_device(
            &instance.instance,
            surface,
        )?;

        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical_device)
        };
        let supported_features = unsafe {
            instance.instance.get_physical_device_features(physical_device)
        };
        let sampler_anisotropy = supported_features.sampler_anisotropy == vk::TRUE
            && config.max_anisotropy > 1.0;

        log::info!(
            "Selected physical device {:?} ({:?}), graphics family {}, present family {:?}",
            properties.device_name_as_c_str().unwrap_or(c"<unnamed>"),
            properties.device_type,
            queue_families.graphics,
            queue_families.present,
        );

        let (
            logical_device,
            graphics_queue,
            present_queue,
        ) = Self::create_logical_device(
            &instance.instance,
            physical_device,
            queue_families,
            sampler_anisotropy,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            properties,
            queue_families,

            graphics_queue: Arc::new(graphics_queue),
            present_queue: present_queue.map(Arc::new),

            sampler_anisotropy,

            memory_allocator: Some(Arc::new(Mutex::new(memory_allocator))),
        })
    }

    pub fn memory_allocator(&self) -> Result<Arc<Mutex<Allocator>>> {
        self.memory_allocator
            .clone()
            .ok_or_eyre("Memory allocator has already been released")
    }

    /// Blocks until every queue of the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: Option<&Surface>,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let req_device_exts = Self::get_required_device_extensions(surface.is_some());

        let physical_devices = unsafe { instance.enumerate_physical_devices()? };
        physical_devices
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default()
                };

                req_device_exts.iter().all(|req_ext| {
                    let req_ext_supported = supported_extensions
                        .iter()
                        .filter_map(|sup_ext| sup_ext.extension_name_as_c_str().ok())
                        .any(|sup_ext| sup_ext == *req_ext);
                    if !req_ext_supported {
                        log::warn!("Device extension not supported: {:?}", req_ext);
                    }
                    req_ext_supported
                })
            })
            // Filter out devices that do not contain the required queues
            .filter_map(|device| {
                let props = unsafe {
                    instance.get_physical_device_queue_family_properties(device)
                };
                let supports_present = |index: u32| match surface {
                    Some((surface, surface_loader)) => unsafe {
                        surface_loader
                            .get_physical_device_surface_support(device, index, *surface)
                            .unwrap_or(false)
                    },
                    None => false,
                };
                QueueFamilyIndices::select(&props, supports_present, surface.is_none())
                    .map(|indices| (device, indices))
            })
            .min_by_key(|(device, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .ok_or_eyre("No suitable physical device found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        sampler_anisotropy: bool,
    ) -> Result<(ash::Device, Queue, Option<Queue>)> {
        let queue_priorities = [1.0];
        let queue_create_infos = queue_families
            .unique()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = Self::get_required_device_extensions(
            queue_families.present.is_some(),
        )
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(sampler_anisotropy);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance.create_device(physical_device, &device_create_info, None)?
        };

        let family_props = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let family = |index: u32| -> Result<QueueFamily> {
            let props = family_props
                .get(index as usize)
                .ok_or_eyre("Queue family index out of range")?;
            Ok(QueueFamily::new(index, *props))
        };

        let graphics_queue = unsafe {
            let queue = device.get_device_queue(queue_families.graphics, 0);
            Queue::new(family(queue_families.graphics)?, queue)
        };
        let present_queue = match queue_families.present {
            Some(index) => unsafe {
                let queue = device.get_device_queue(index, 0);
                Some(Queue::new(family(index)?, queue))
            },
            None => None,
        };

        Ok((device, graphics_queue, present_queue))
    }

    fn get_required_device_extensions(presentation: bool) -> Vec<&'static CStr> {
        let mut exts = Vec::new();
        if presentation {
            exts.push(ash::khr::swapchain::NAME);
        }
        #[cfg(target_os = "macos")]
        exts.push(ash::khr::portability_subset::NAME);
        exts
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {}", e);
        }

        // The allocator must release its memory blocks before the device goes away
        if let Some(allocator) = self.memory_allocator.take() {
            if Arc::strong_count(&allocator) > 1 {
                log::error!("GPU resources are still alive while the device is being destroyed");
            }
            drop(allocator);
        }

        unsafe {
            self.logical.destroy_device(None);
        }
    }
}
