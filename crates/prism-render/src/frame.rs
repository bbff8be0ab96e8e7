// SPDX-License-Identifier: CEPL-1.0
use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::{Acquire, PresentStatus, RenderSize, Renderer, SurfaceProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The chain was rebuilt; nothing was recorded this iteration.
    Recreated,
    /// The window has no drawable area; the iteration did nothing.
    Skipped,
}

/// Drives one acquire → record → submit → present iteration per call and
/// decides when the presentation chain has to be rebuilt.
///
/// Staleness is handled here and never surfaced as an error. The one
/// exception is a chain that is out of date again right after being rebuilt
/// for the same extent: that means recreation cannot fix it, so it is fatal.
#[derive(Debug, Default)]
pub struct FrameDriver {
    pending_recreate: bool,
    fresh_chain: Option<RenderSize>,
    frames: u64,
    recreations: u64,
}

impl FrameDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn draw_frame<R, W>(&mut self, renderer: &mut R, window: &mut W) -> Result<FrameOutcome>
    where
        R: Renderer + ?Sized,
        W: SurfaceProvider + ?Sized,
    {
        if self.pending_recreate {
            return self.recreate(renderer, window);
        }

        let (image_index, acquired_suboptimal) = match renderer.acquire()? {
            Acquire::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            Acquire::OutOfDate => {
                let extent = window.extent();
                if self.fresh_chain == Some(extent) {
                    bail!(
                        "presentation chain out of date again after recreation at {}x{}",
                        extent.width,
                        extent.height
                    );
                }
                debug!("acquire reported out of date");
                return self.recreate(renderer, window);
            }
        };
        self.fresh_chain = None;

        renderer.record(image_index)?;
        let status = renderer.submit(image_index)?;
        if status != PresentStatus::OutOfDate {
            self.frames += 1;
        }

        if status.is_stale() || acquired_suboptimal || window.was_resized() {
            debug!(
                "rebuilding chain (present={status:?}, acquire suboptimal={acquired_suboptimal})"
            );
            return self.recreate(renderer, window);
        }
        Ok(FrameOutcome::Presented)
    }

    fn recreate<R, W>(&mut self, renderer: &mut R, window: &mut W) -> Result<FrameOutcome>
    where
        R: Renderer + ?Sized,
        W: SurfaceProvider + ?Sized,
    {
        let extent = window.extent();
        if extent.is_empty() {
            // minimized; retry once the window has an area again
            self.pending_recreate = true;
            return Ok(FrameOutcome::Skipped);
        }

        renderer.recreate(extent)?;
        // the new chain already matches this extent
        window.reset_resized();
        self.pending_recreate = false;
        self.fresh_chain = Some(extent);
        self.recreations += 1;
        info!(
            "presentation chain rebuilt at {}x{} (#{})",
            extent.width, extent.height, self.recreations
        );
        Ok(FrameOutcome::Recreated)
    }
}
