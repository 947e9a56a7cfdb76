use anyhow::Result;
use winit::window::Window;

use crate::vulkan::VulkanRenderer;

const VALIDATION_ENABLED: bool = cfg!(debug_assertions);

/// Options applied while building the rendering context.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Enable the Khronos validation layer and the debug messenger.
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: VALIDATION_ENABLED,
        }
    }
}

#[derive(Debug)]
pub struct Renderer {
    pub vk_renderer: VulkanRenderer,
}

impl Renderer {
    /// Builds the whole Vulkan context for the given window.
    ///
    /// An error here means rendering is unavailable; no other method of this
    /// type may be called afterwards.
    pub unsafe fn initialize(window: &Window, config: RendererConfig) -> Result<Self> {
        let vk_renderer = VulkanRenderer::new(window, config)?;

        Ok(Self { vk_renderer })
    }

    /// One-time hook, invoked after a successful initialization.
    pub fn ready(&mut self) {}

    /// Marks the start of a frame. Command recording will live here.
    pub fn begin_frame(&mut self) {}

    /// Marks the end of a frame. Submission and presentation will live here.
    pub fn end_frame(&mut self) {}

    /// Tears down the entire context.
    pub unsafe fn release(&mut self) {
        self.vk_renderer.destroy();
    }
}
