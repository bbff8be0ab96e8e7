// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod frame;

pub use frame::{FrameDriver, FrameOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero dimension; nothing can be presented.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How the display received (or will receive) a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    /// Still presentable, but the chain no longer matches the surface exactly.
    Suboptimal,
    /// The chain must be rebuilt before it can be used again.
    OutOfDate,
}

impl PresentStatus {
    pub fn is_stale(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

/// Result of asking the chain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// What the presentation layer needs from the windowing layer.
pub trait SurfaceProvider: HasWindowHandle + HasDisplayHandle {
    /// Current drawable size in pixels.
    fn extent(&self) -> RenderSize;
    fn was_resized(&self) -> bool;
    fn reset_resized(&mut self);
}

/// The per-frame operations a backend exposes to [`FrameDriver`].
pub trait Renderer {
    fn acquire(&mut self) -> Result<Acquire>;
    /// Records this frame's commands for `image_index`.
    fn record(&mut self, image_index: u32) -> Result<()>;
    /// Submits the recorded commands and presents `image_index`.
    fn submit(&mut self, image_index: u32) -> Result<PresentStatus>;
    /// Rebuilds every size-dependent resource for `size`.
    fn recreate(&mut self, size: RenderSize) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&self) -> Result<()>;
}
