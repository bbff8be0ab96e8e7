// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use prism_render::{RenderSize, SurfaceProvider};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::debug;

pub use winit;

use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};

#[derive(Clone, Debug)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

/// Last known drawable size plus a sticky "it changed" flag.
#[derive(Clone, Copy, Debug)]
pub struct ResizeTracker {
    size: RenderSize,
    resized: bool,
}

impl ResizeTracker {
    pub fn new(size: RenderSize) -> Self {
        Self {
            size,
            resized: false,
        }
    }

    /// Records a size report; the flag stays set until [`Self::reset`].
    pub fn observe(&mut self, size: RenderSize) {
        if size != self.size {
            self.size = size;
            self.resized = true;
        }
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn resized(&self) -> bool {
        self.resized
    }

    pub fn reset(&mut self) {
        self.resized = false;
    }
}

pub struct AppWindow {
    window: Window,
    tracker: ResizeTracker,
}

impl AppWindow {
    pub fn create(event_loop: &ActiveEventLoop, desc: &WindowDesc) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title(desc.title.clone())
            .with_inner_size(PhysicalSize::new(desc.width, desc.height))
            .with_resizable(true);
        let window = event_loop.create_window(attrs).context("create_window")?;
        Ok(Self::from_window(window))
    }

    pub fn from_window(window: Window) -> Self {
        let size = window.inner_size();
        Self {
            window,
            tracker: ResizeTracker::new(RenderSize::new(size.width, size.height)),
        }
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    pub fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        debug!("window resized to {}x{}", size.width, size.height);
        self.tracker
            .observe(RenderSize::new(size.width, size.height));
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for AppWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for AppWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl SurfaceProvider for AppWindow {
    fn extent(&self) -> RenderSize {
        self.tracker.size()
    }

    fn was_resized(&self) -> bool {
        self.tracker.resized()
    }

    fn reset_resized(&mut self) {
        self.tracker.reset();
    }
}
