// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;

use crate::error::VkError;

/// Bookkeeping for frames in flight.
///
/// The frame slot rotates with period `frames` and picks which semaphores and
/// fence a submission uses. The image slots remember which frame fence last
/// rendered into each chain image, since acquisition can hand images back in
/// any order.
#[derive(Clone, Debug)]
pub struct FrameSlots {
    frames: usize,
    current: usize,
    images_in_flight: Vec<Option<vk::Fence>>,
}

impl FrameSlots {
    pub fn new(frames: usize, image_count: usize) -> Self {
        assert!(frames > 0, "at least one frame in flight");
        Self {
            frames,
            current: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Fence of the last submission that rendered into `image`, if any.
    pub fn image_fence(&self, image: usize) -> Option<vk::Fence> {
        self.images_in_flight[image]
    }

    /// Marks `image` as being rendered under `fence` and returns the fence
    /// of the frame that used it before, which must be waited on first.
    pub fn claim_image(&mut self, image: usize, fence: vk::Fence) -> Option<vk::Fence> {
        self.images_in_flight[image].replace(fence)
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames;
    }
}

/// Per-frame semaphores and fences, `frames` of each.
pub(crate) struct SyncObjects {
    pub image_available: Vec<vk::Semaphore>,
    pub render_finished: Vec<vk::Semaphore>,
    /// Created signaled so the first wait on each returns at once.
    pub in_flight: Vec<vk::Fence>,
}

impl SyncObjects {
    pub(crate) fn empty() -> Self {
        Self {
            image_available: Vec::new(),
            render_finished: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    pub(crate) unsafe fn create(device: &ash::Device, frames: usize) -> Result<Self> {
        let mut sync = Self::empty();
        if let Err(e) = sync.fill(device, frames) {
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    unsafe fn fill(&mut self, device: &ash::Device, frames: usize) -> Result<()> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..frames {
            self.image_available.push(
                device
                    .create_semaphore(&sem_ci, None)
                    .map_err(VkError::api("vkCreateSemaphore"))?,
            );
            self.render_finished.push(
                device
                    .create_semaphore(&sem_ci, None)
                    .map_err(VkError::api("vkCreateSemaphore"))?,
            );
            self.in_flight.push(
                device
                    .create_fence(&fence_ci, None)
                    .map_err(VkError::api("vkCreateFence"))?,
            );
        }
        Ok(())
    }

    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.image_available.drain(..) {
            device.destroy_semaphore(s, None);
        }
        for s in self.render_finished.drain(..) {
            device.destroy_semaphore(s, None);
        }
        for f in self.in_flight.drain(..) {
            device.destroy_fence(f, None);
        }
    }
}
