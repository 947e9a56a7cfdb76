use anyhow::{anyhow, Result};
use context::VulkanContext;
use device::VulkanDevice;
use instance::VulkanInstance;
use log::*;
use swapchain::VulkanSwapchain;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    Entry,
};
use winit::window::Window;

use crate::renderer::RendererConfig;

mod constants;
mod context;
mod device;
mod instance;
mod swapchain;

#[derive(Debug)]
pub struct VulkanRenderer {
    pub instance: VulkanInstance,
    pub device: VulkanDevice,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Builds the context in dependency order: instance, surface, physical
    /// device, logical device and queues, swapchain, image views. A failing
    /// step releases everything the earlier steps created before the error
    /// is handed back.
    pub unsafe fn new(window: &Window, config: RendererConfig) -> Result<VulkanRenderer> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let mut context = VulkanContext::default();
        let mut instance = VulkanInstance::new(window, &entry, &config, &mut context)?;

        let device =
            match VulkanRenderer::create_context(window, &entry, &instance, &config, &mut context)
            {
                Ok(device) => device,
                Err(err) => {
                    instance.destroy(&mut context);
                    return Err(err);
                }
            };

        info!("The rendering context is ready.");

        Ok(VulkanRenderer {
            instance,
            device,
            context,
        })
    }

    unsafe fn create_context(
        window: &Window,
        entry: &Entry,
        instance: &VulkanInstance,
        config: &RendererConfig,
        context: &mut VulkanContext,
    ) -> Result<VulkanDevice> {
        instance.create_surface(window, context)?;

        let mut device = VulkanDevice::new(entry, instance, config, context)?;

        if let Err(err) = VulkanRenderer::create_swapchain(window, instance, &device, context) {
            VulkanSwapchain::destroy(&device, context);
            device.destroy();
            return Err(err);
        }

        Ok(device)
    }

    unsafe fn create_swapchain(
        window: &Window,
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &mut VulkanContext,
    ) -> Result<()> {
        VulkanSwapchain::create(window, instance, device, context)?;
        VulkanSwapchain::create_image_views(device, context)?;

        Ok(())
    }

    /// Tears everything down in exact reverse construction order.
    pub unsafe fn destroy(&mut self) {
        // TODO: wait for the device to go idle once frames are actually
        // submitted before teardown.
        VulkanSwapchain::destroy(&self.device, &mut self.context);
        self.device.destroy();
        self.instance.destroy(&mut self.context);

        info!("The rendering context was torn down.");
    }
}
