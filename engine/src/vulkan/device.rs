use anyhow::{anyhow, Ok, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::{
    vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0, KhrSurfaceExtension},
    Device, Entry,
};

use crate::renderer::RendererConfig;

use super::{
    constants, context::VulkanContext, instance::VulkanInstance, swapchain::SwapchainSupport,
};

#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
}

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

impl VulkanDevice {
    /// Scans the enumerated physical devices in order and keeps the first
    /// suitable one on the context. Selection happens once; an unsuitable
    /// machine is a hard failure, not something to retry.
    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
        context: &mut VulkanContext,
    ) -> Result<()> {
        let physical_devices = instance.vk_instance.enumerate_physical_devices()?;
        if physical_devices.is_empty() {
            return Err(anyhow!("Failed to find GPUs with Vulkan support."));
        }

        for physical_device in physical_devices {
            let properties = instance
                .vk_instance
                .get_physical_device_properties(physical_device);

            if let Err(error) =
                VulkanDevice::check_physical_device(instance, context, physical_device)
            {
                warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                );
            } else {
                info!("Selected physical device (`{}`).", properties.device_name);
                dump_physical_device(&properties);
                context.physical_device = physical_device;
                return Ok(());
            }
        }
        Err(anyhow!("Failed to find a suitable physical device."))
    }

    unsafe fn check_physical_device(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        let properties = instance
            .vk_instance
            .get_physical_device_properties(physical_device);
        check_device_properties(&properties)?;

        VulkanDevice::check_device_extensions(instance, physical_device)?;

        let indices = QueueFamilyIndices::get(instance, context, physical_device)?;
        if indices.graphics.is_none() || indices.present.is_none() {
            return Err(anyhow!(SuitabilityError(
                "required queue families"
            )));
        }

        let support = SwapchainSupport::get(instance, context, physical_device)?;
        if !support.is_adequate() {
            return Err(anyhow!(SuitabilityError(
                "surface formats or present modes"
            )));
        }

        Ok(())
    }

    unsafe fn check_device_extensions(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        let available = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();

        debug!("Found {} available device extensions.", available.len());
        for extension in &available {
            trace!("Device extension: {}", extension);
        }

        if has_required_extensions(&available) {
            Ok(())
        } else {
            Err(anyhow!(SuitabilityError("required device extensions")))
        }
    }

    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        config: &RendererConfig,
        context: &mut VulkanContext,
    ) -> Result<VulkanDevice> {
        VulkanDevice::pick_physical_device(instance, context)?;

        let shared = QueueFamilyIndices::find_shared(instance, context, context.physical_device)?;
        let indices = QueueFamilyIndices::get(instance, context, context.physical_device)?;
        let (graphics_index, present_index) = match (indices.graphics, indices.present) {
            (Some(graphics), Some(present)) => (graphics, present),
            _ => return Err(anyhow!(SuitabilityError("required queue families"))),
        };

        let queue_priorities = &[1.0];
        let queue_infos = match shared {
            // One family serves both roles through a single queue.
            Some(index) => vec![vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(index)
                .queue_priorities(queue_priorities)],
            None => vec![
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(graphics_index)
                    .queue_priorities(queue_priorities),
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(present_index)
                    .queue_priorities(queue_priorities),
            ],
        };

        let layers = if config.validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder();

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(context.physical_device, &info, None)?;
        info!("Created the logical device.");

        match shared {
            Some(index) => {
                context.graphics_queue = device.get_device_queue(index, 0);
                context.present_queue = device.get_device_queue(index, 0);
                info!(
                    "Using a single queue family for graphics and presentation (index {}).",
                    index
                );
            }
            None => {
                context.graphics_queue = device.get_device_queue(graphics_index, 0);
                context.present_queue = device.get_device_queue(present_index, 0);
                info!(
                    "Using separate queue families for graphics ({}) and presentation ({}).",
                    graphics_index, present_index
                );
            }
        }

        Ok(VulkanDevice { vk_device: device })
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}

fn check_device_properties(properties: &vk::PhysicalDeviceProperties) -> Result<()> {
    if properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return Err(anyhow!(SuitabilityError("discrete GPU support")));
    }
    Ok(())
}

fn has_required_extensions(available: &HashSet<vk::ExtensionName>) -> bool {
    constants::DEVICE_EXTENSIONS
        .iter()
        .all(|e| available.contains(e))
}

fn dump_physical_device(properties: &vk::PhysicalDeviceProperties) {
    debug!("        Device name: {}", properties.device_name);
    debug!("        Device type: {:?}", properties.device_type);
    debug!("     Driver version: {}", properties.driver_version);
    debug!("          Vendor ID: {}", properties.vendor_id);
}

/// The queue family indices resolved for one physical device and surface.
///
/// Either role may be unresolved. The result is recomputed whenever it is
/// needed and never cached on the context.
#[derive(Copy, Clone, Debug, Default)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Fills both role indices by scanning every queue family the device
    /// exposes. When several families qualify for a role, the last one
    /// scanned wins.
    pub unsafe fn get(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);
        let present_support =
            QueueFamilyIndices::present_support(instance, context, physical_device, &properties)?;

        Ok(QueueFamilyIndices::scan(&properties, &present_support))
    }

    /// Looks for one family that can serve graphics and presentation at the
    /// same time, returning the first hit.
    pub unsafe fn find_shared(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<u32>> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);
        let present_support =
            QueueFamilyIndices::present_support(instance, context, physical_device, &properties)?;

        Ok(QueueFamilyIndices::scan_shared(
            &properties,
            &present_support,
        ))
    }

    unsafe fn present_support(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
        properties: &[vk::QueueFamilyProperties],
    ) -> Result<Vec<bool>> {
        let mut present_support = Vec::with_capacity(properties.len());
        for index in 0..properties.len() as u32 {
            present_support.push(instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index,
                context.surface,
            )?);
        }
        Ok(present_support)
    }

    fn scan(properties: &[vk::QueueFamilyProperties], present_support: &[bool]) -> Self {
        let mut indices = QueueFamilyIndices::default();
        for (index, family) in properties.iter().enumerate() {
            if family.queue_count < 1 {
                continue;
            }
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(index as u32);
            }
            if present_support[index] {
                indices.present = Some(index as u32);
            }
        }
        indices
    }

    fn scan_shared(
        properties: &[vk::QueueFamilyProperties],
        present_support: &[bool],
    ) -> Option<u32> {
        for (index, family) in properties.iter().enumerate() {
            if family.queue_count < 1 {
                continue;
            }
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present_support[index] {
                return Some(index as u32);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn scan_keeps_last_qualifying_family_per_role() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let present = [true, false, true];

        let indices = QueueFamilyIndices::scan(&families, &present);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
    }

    #[test]
    fn scan_shared_returns_first_combined_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let present = [true, true];

        assert_eq!(
            QueueFamilyIndices::scan_shared(&families, &present),
            Some(0)
        );
    }

    #[test]
    fn scan_and_scan_shared_agree_on_a_single_candidate() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let present = [false, true, false];

        let indices = QueueFamilyIndices::scan(&families, &present);
        let shared = QueueFamilyIndices::scan_shared(&families, &present);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(shared, Some(1));
    }

    #[test]
    fn scan_ignores_families_without_queues() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let present = [true, false];

        let indices = QueueFamilyIndices::scan(&families, &present);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, None);
        assert_eq!(QueueFamilyIndices::scan_shared(&families, &present), None);
    }

    #[test]
    fn scan_reports_missing_roles() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let present = [false];

        let indices = QueueFamilyIndices::scan(&families, &present);
        assert_eq!(indices.graphics, None);
        assert_eq!(indices.present, None);
    }

    #[test]
    fn only_discrete_gpus_pass_the_properties_check() {
        let discrete = vk::PhysicalDeviceProperties {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        assert!(check_device_properties(&discrete).is_ok());

        for device_type in [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::VIRTUAL_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::OTHER,
        ] {
            let properties = vk::PhysicalDeviceProperties {
                device_type,
                ..Default::default()
            };
            assert!(check_device_properties(&properties).is_err());
        }
    }

    #[test]
    fn required_extensions_must_all_be_available() {
        let complete = constants::DEVICE_EXTENSIONS
            .iter()
            .copied()
            .collect::<HashSet<_>>();
        assert!(has_required_extensions(&complete));

        let unrelated = [vk::ExtensionName::from_bytes(b"VK_KHR_maintenance1")]
            .into_iter()
            .collect::<HashSet<_>>();
        assert!(!has_required_extensions(&unrelated));

        assert!(!has_required_extensions(&HashSet::new()));
    }
}
