#![allow(
    dead_code,
    unused_variables,
    clippy::too_many_arguments,
    clippy::unnecessary_wraps
)]

use anyhow::{Ok, Result};
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

mod renderer;
mod vulkan;

pub use renderer::{Renderer, RendererConfig};

#[derive(Debug)]
pub struct Engine {
    window: Window,
    renderer: Renderer,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new() -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title("Borealis")
            .with_inner_size(LogicalSize::new(800, 600))
            .with_resizable(false)
            .build(&event_loop)?;

        let mut renderer = unsafe {
            Renderer::initialize(&window, RendererConfig::default())?
        };

        // Called exactly once, after the context is fully built.
        renderer.ready();

        return Ok(Engine{
            window,
            renderer,
            event_loop,
        })
    }

    pub fn run(mut self) -> Result<()> {
        self.event_loop.run(move |event, elwt| {
            match event {
                // Request a redraw when all events were processed.
                Event::AboutToWait => self.window.request_redraw(),
                Event::WindowEvent { event, .. } => match event {
                    // Drive the frame hooks while we are not shutting down.
                    WindowEvent::RedrawRequested if !elwt.exiting() => {
                        self.renderer.begin_frame();
                        self.renderer.end_frame();
                    }
                    // Tear down the rendering context.
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                        unsafe {
                            self.renderer.release();
                        }
                    }
                    _ => {}
                }
                _ => {}
            }
        })?;

        Ok(())
    }
}
