use vulkanalia::vk;

/// The Vulkan handles and associated properties used by our renderer.
///
/// Fields are filled in dependency order while the context is built and torn
/// down in exact reverse order. A default value carries only null handles and
/// empty arrays, so a partially built context can always be destroyed: every
/// teardown step is guarded on its handle actually existing.
#[derive(Clone, Debug, Default)]
pub struct VulkanContext {
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    /// Non-owning; enumerated and owned by the driver.
    pub physical_device: vk::PhysicalDevice,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_format: vk::Format,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_image_views: Vec<vk::ImageView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulkanalia::vk::Handle;

    #[test]
    fn default_context_has_no_handles() {
        let context = VulkanContext::default();

        assert!(context.messenger.is_null());
        assert!(context.surface.is_null());
        assert!(context.physical_device.is_null());
        assert!(context.graphics_queue.is_null());
        assert!(context.present_queue.is_null());
        assert!(context.swapchain.is_null());
        assert!(context.swapchain_images.is_empty());
        assert!(context.swapchain_image_views.is_empty());
    }
}
