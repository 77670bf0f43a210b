//! Platform layer: winit windows, Vulkan surfaces and keyboard input.

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, SurfaceHost, Window};

pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
