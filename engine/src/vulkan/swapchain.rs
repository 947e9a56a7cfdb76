use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension};
use winit::window::Window;

use super::{
    context::VulkanContext,
    device::{QueueFamilyIndices, VulkanDevice},
    instance::VulkanInstance,
};

/// What a (device, surface) pair supports, probed once per construction and
/// dropped right after the decisions are made.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .vk_instance
                .get_physical_device_surface_capabilities_khr(physical_device, context.surface)?,
            formats: instance
                .vk_instance
                .get_physical_device_surface_formats_khr(physical_device, context.surface)?,
            present_modes: instance
                .vk_instance
                .get_physical_device_surface_present_modes_khr(physical_device, context.surface)?,
        })
    }

    /// A swapchain can only be built when at least one format and one
    /// present mode are available.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Debug)]
pub struct VulkanSwapchain;

impl VulkanSwapchain {
    pub unsafe fn create(
        window: &Window,
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &mut VulkanContext,
    ) -> Result<()> {
        let support = SwapchainSupport::get(instance, context, context.physical_device)?;
        if !support.is_adequate() {
            return Err(anyhow!("Insufficient swapchain support."));
        }

        let surface_format = get_swapchain_surface_format(&support.formats);
        let present_mode = get_swapchain_present_mode(&support.present_modes);
        let size = window.inner_size();
        let extent = get_swapchain_extent(&support.capabilities, size.width, size.height);
        let image_count = get_swapchain_image_count(&support.capabilities);

        let indices = QueueFamilyIndices::get(instance, context, context.physical_device)?;
        let shared = QueueFamilyIndices::find_shared(instance, context, context.physical_device)?;
        let (graphics_index, present_index) = match (indices.graphics, indices.present) {
            (Some(graphics), Some(present)) => (graphics, present),
            _ => return Err(anyhow!("Missing required queue families.")),
        };
        let queue_family_indices = [graphics_index, present_index];

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // A family serving both roles keeps images exclusive; split families
        // share them concurrently and must both be declared.
        let info = if shared.is_some() {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        };

        context.swapchain = device.vk_device.create_swapchain_khr(&info, None)?;
        info!(
            "Created the swapchain ({}x{}, {:?}, {:?}).",
            extent.width, extent.height, surface_format.format, present_mode
        );

        context.swapchain_images = match device.vk_device.get_swapchain_images_khr(context.swapchain)
        {
            Ok(images) => images,
            Err(err) => {
                // The swapchain is useless without its images.
                device.vk_device.destroy_swapchain_khr(context.swapchain, None);
                context.swapchain = vk::SwapchainKHR::null();
                return Err(err.into());
            }
        };
        context.swapchain_format = surface_format.format;
        context.swapchain_extent = extent;

        Ok(())
    }

    pub unsafe fn create_image_views(
        device: &VulkanDevice,
        context: &mut VulkanContext,
    ) -> Result<()> {
        for image in &context.swapchain_images {
            let components = vk::ComponentMapping::builder()
                .r(vk::ComponentSwizzle::IDENTITY)
                .g(vk::ComponentSwizzle::IDENTITY)
                .b(vk::ComponentSwizzle::IDENTITY)
                .a(vk::ComponentSwizzle::IDENTITY);

            let subresource_range = vk::ImageSubresourceRange::builder()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1);

            let info = vk::ImageViewCreateInfo::builder()
                .image(*image)
                .view_type(vk::ImageViewType::_2D)
                .format(context.swapchain_format)
                .components(components)
                .subresource_range(subresource_range);

            // Views created so far stay on the context, so a failure here is
            // cleaned up with the rest of the partial build.
            let view = device.vk_device.create_image_view(&info, None)?;
            context.swapchain_image_views.push(view);
        }

        Ok(())
    }

    pub unsafe fn destroy(device: &VulkanDevice, context: &mut VulkanContext) {
        for view in context.swapchain_image_views.drain(..) {
            device.vk_device.destroy_image_view(view, None);
        }
        if !context.swapchain.is_null() {
            device.vk_device.destroy_swapchain_khr(context.swapchain, None);
            context.swapchain = vk::SwapchainKHR::null();
        }
        context.swapchain_images.clear();
    }
}

fn get_swapchain_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .cloned()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| {
            info!("B8G8R8A8_SRGB / SRGB_NONLINEAR is unavailable, using the first supported format.");
            formats[0]
        })
}

fn get_swapchain_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        // Every conformant driver offers FIFO.
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn get_swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_width: u32,
    framebuffer_height: u32,
) -> vk::Extent2D {
    // u32::MAX here means the window manager leaves the extent to us,
    // bounded by the device limits.
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn get_swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    // One above the minimum so the driver never has to be waited on.
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_format_prefers_bgra_srgb_wherever_it_sits() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let picked = get_swapchain_surface_format(&formats);
        assert_eq!(picked.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_requires_both_format_and_color_space() {
        // Right format, wrong color space: not an exact match.
        let formats = [
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::ADOBERGB_NONLINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let picked = get_swapchain_surface_format(&formats);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_falls_back_to_the_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let picked = get_swapchain_surface_format(&formats);
        assert_eq!(picked.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            get_swapchain_present_mode(&modes),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(get_swapchain_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_the_current_extent_when_the_driver_decided() {
        let capabilities = capabilities((1280, 720), (1, 1), (4096, 4096));

        let extent = get_swapchain_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn extent_derives_from_the_framebuffer_when_left_to_us() {
        let capabilities = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096));

        let extent = get_swapchain_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn extent_clamps_each_axis_independently() {
        let capabilities = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096));

        let extent = get_swapchain_extent(&capabilities, 10000, 600);
        assert_eq!(extent.width, 4096);
        assert_eq!(extent.height, 600);

        let extent = get_swapchain_extent(&capabilities, 0, 600);
        assert_eq!(extent.width, 1);
    }

    #[test]
    fn image_count_is_one_above_the_minimum() {
        let mut capabilities = capabilities((800, 600), (1, 1), (4096, 4096));
        capabilities.min_image_count = 2;
        capabilities.max_image_count = 0; // no upper limit

        assert_eq!(get_swapchain_image_count(&capabilities), 3);
    }

    #[test]
    fn image_count_respects_the_maximum() {
        let mut capabilities = capabilities((800, 600), (1, 1), (4096, 4096));
        capabilities.min_image_count = 3;
        capabilities.max_image_count = 3;

        assert_eq!(get_swapchain_image_count(&capabilities), 3);
    }

    fn support(formats: usize, modes: usize) -> SwapchainSupport {
        SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![
                format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
                formats
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO; modes],
        }
    }

    #[test]
    fn support_is_adequate_only_with_formats_and_present_modes() {
        assert!(support(1, 1).is_adequate());
        assert!(!support(0, 1).is_adequate());
        assert!(!support(1, 0).is_adequate());
        assert!(!support(0, 0).is_adequate());
    }
}
