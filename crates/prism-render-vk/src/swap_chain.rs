// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use prism_render::{Acquire, PresentStatus, RenderSize};
use tracing::{debug, info};

use crate::device::{Device, QueueFamilies};
use crate::error::VkError;
use crate::frame_sync::{FrameSlots, SyncObjects};

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// sRGB BGRA when offered, otherwise whatever the surface lists first.
/// `None` when the surface reports no formats at all.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX, then IMMEDIATE, then FIFO (always supported).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; a maximum of 0 means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Exclusive when one family does both jobs, concurrent across both otherwise.
pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

/// The swapchain plus everything sized or formatted after it: color views,
/// depth buffers, render pass, framebuffers and the per-frame sync objects.
///
/// Recreate by building a new chain and passing the old one in; the old chain
/// is retired through `old_swapchain` and dropped once the new one exists.
pub struct PresentationChain {
    device: ash::Device,
    loader: swapchain::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,

    depth_format: vk::Format,
    depth_images: Vec<vk::Image>,
    depth_memory: Vec<vk::DeviceMemory>,
    depth_views: Vec<vk::ImageView>,

    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    sync: SyncObjects,
    slots: FrameSlots,
}

// STRICT TEARDOWN ORDER (callers idle the device first):
// - framebuffers, render pass
// - depth views, images, memory
// - color views, swapchain
// - semaphores and fences
impl Drop for PresentationChain {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            for &fb in &self.framebuffers {
                d.destroy_framebuffer(fb, None);
            }
            d.destroy_render_pass(self.render_pass, None);

            for &v in &self.depth_views {
                d.destroy_image_view(v, None);
            }
            for &img in &self.depth_images {
                d.destroy_image(img, None);
            }
            for &mem in &self.depth_memory {
                d.free_memory(mem, None);
            }

            for &v in &self.image_views {
                d.destroy_image_view(v, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);

            self.sync.destroy(d);
        }
    }
}

impl PresentationChain {
    /// Builds a chain for the device's surface. `window_extent` is only used
    /// when the surface leaves the size up to the swapchain.
    pub fn new(
        device: &Device,
        window_extent: RenderSize,
        previous: Option<PresentationChain>,
    ) -> Result<Self> {
        let mut chain = Self {
            device: device.handle().clone(),
            loader: device.swapchain_loader().clone(),
            graphics_queue: device.graphics_queue(),
            present_queue: device.present_queue(),
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            depth_images: Vec::new(),
            depth_memory: Vec::new(),
            depth_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            sync: SyncObjects::empty(),
            slots: FrameSlots::new(MAX_FRAMES_IN_FLIGHT, 0),
        };
        // on error `chain` drops here and releases whatever was built
        unsafe {
            chain.create_swapchain(device, window_extent, previous)?;
            chain.create_image_views()?;
            chain.create_depth_resources(device)?;
            chain.create_render_pass()?;
            chain.create_framebuffers()?;
            chain.sync = SyncObjects::create(&chain.device, MAX_FRAMES_IN_FLIGHT)?;
        }
        chain.slots = FrameSlots::new(MAX_FRAMES_IN_FLIGHT, chain.images.len());

        info!(
            "Swapchain: {}x{}, {} images, {:?}/{:?}, {:?}, depth {:?}",
            chain.extent.width,
            chain.extent.height,
            chain.images.len(),
            chain.surface_format.format,
            chain.surface_format.color_space,
            chain.present_mode,
            chain.depth_format
        );
        Ok(chain)
    }

    unsafe fn create_swapchain(
        &mut self,
        device: &Device,
        window_extent: RenderSize,
        previous: Option<PresentationChain>,
    ) -> Result<()> {
        let support = device.swapchain_support()?;
        let caps = support.capabilities;

        self.surface_format = choose_surface_format(&support.formats)
            .context("surface reports no formats")?;
        self.present_mode = choose_present_mode(&support.present_modes);
        self.extent = choose_extent(&caps, window_extent);
        let min_image_count = choose_image_count(&caps);
        let (sharing_mode, family_indices) = choose_sharing(device.queue_families());

        let old_swapchain = previous
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |p| p.swapchain);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: device.surface(),
            min_image_count,
            image_format: self.surface_format.format,
            image_color_space: self.surface_format.color_space,
            image_extent: self.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: self.present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };

        self.swapchain = self
            .loader
            .create_swapchain(&swap_info, None)
            .map_err(VkError::api("vkCreateSwapchainKHR"))?;
        if previous.is_some() {
            debug!("retiring previous swapchain");
        }
        drop(previous);

        // the implementation may hand out more than requested
        self.images = self
            .loader
            .get_swapchain_images(self.swapchain)
            .map_err(VkError::api("vkGetSwapchainImagesKHR"))?;
        Ok(())
    }

    unsafe fn create_image_views(&mut self) -> Result<()> {
        for i in 0..self.images.len() {
            let view = create_view(
                &self.device,
                self.images[i],
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }
        Ok(())
    }

    unsafe fn create_depth_resources(&mut self, device: &Device) -> Result<()> {
        self.depth_format = device
            .find_supported_format(
                &DEPTH_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .context("depth format")?;

        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: self.depth_format,
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        for _ in 0..self.images.len() {
            let (image, memory) =
                device.create_image_with_info(&img_ci, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
            self.depth_images.push(image);
            self.depth_memory.push(memory);
            let view = create_view(
                &self.device,
                image,
                self.depth_format,
                vk::ImageAspectFlags::DEPTH,
            )?;
            self.depth_views.push(view);
        }
        Ok(())
    }

    unsafe fn create_render_pass(&mut self) -> Result<()> {
        let attachments = [
            vk::AttachmentDescription {
                format: self.surface_format.format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: self.depth_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: stages,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        };

        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        self.render_pass = self
            .device
            .create_render_pass(&rp_info, None)
            .map_err(VkError::api("vkCreateRenderPass"))?;
        Ok(())
    }

    unsafe fn create_framebuffers(&mut self) -> Result<()> {
        for i in 0..self.images.len() {
            let attachments = [self.image_views[i], self.depth_views[i]];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = self
                .device
                .create_framebuffer(&fb_info, None)
                .map_err(VkError::api("vkCreateFramebuffer"))?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    /// Waits (unbounded) for the current frame's fence, then acquires the next
    /// image, signaling the frame's image-available semaphore.
    pub fn acquire_next_image(&mut self) -> Result<Acquire> {
        let frame = self.slots.current();
        unsafe {
            self.device
                .wait_for_fences(&[self.sync.in_flight[frame]], true, u64::MAX)
                .map_err(VkError::api("vkWaitForFences"))?;

            match self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.sync.image_available[frame],
                vk::Fence::null(),
            ) {
                Ok((image_index, suboptimal)) => Ok(Acquire::Ready {
                    image_index,
                    suboptimal,
                }),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
                Err(e) => Err(VkError::api("vkAcquireNextImageKHR")(e).into()),
            }
        }
    }

    /// Blocks until the last submission that rendered into `image_index` has
    /// retired, so its command buffer can be recorded again.
    pub fn wait_for_image(&self, image_index: u32) -> Result<()> {
        if let Some(fence) = self.slots.image_fence(image_index as usize) {
            unsafe {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(VkError::api("vkWaitForFences"))?;
            }
        }
        Ok(())
    }

    /// Submits `command_buffer` for `image_index` and presents it. The frame
    /// slot advances whatever the outcome.
    ///
    /// # Safety
    /// `command_buffer` must be fully recorded against this chain's render
    /// pass and framebuffer for `image_index`.
    pub unsafe fn submit(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentStatus> {
        let result = self.submit_and_present(command_buffer, image_index);
        self.slots.advance();
        result
    }

    unsafe fn submit_and_present(
        &mut self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
    ) -> Result<PresentStatus> {
        let d = &self.device;
        let frame = self.slots.current();
        let in_flight = self.sync.in_flight[frame];

        if let Some(previous) = self.slots.claim_image(image_index as usize, in_flight) {
            d.wait_for_fences(&[previous], true, u64::MAX)
                .map_err(VkError::api("vkWaitForFences"))?;
        }
        d.reset_fences(&[in_flight])
            .map_err(VkError::api("vkResetFences"))?;

        let wait_semaphores = [self.sync.image_available[frame]];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished[frame]];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &command_buffer,
            signal_semaphore_count: signal_semaphores.len() as u32,
            p_signal_semaphores: signal_semaphores.as_ptr(),
            ..Default::default()
        };
        d.queue_submit(self.graphics_queue, std::slice::from_ref(&submit), in_flight)
            .map_err(VkError::api("vkQueueSubmit"))?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: signal_semaphores.len() as u32,
            p_wait_semaphores: signal_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match self.loader.queue_present(self.present_queue, &present) {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(VkError::api("vkQueuePresentKHR")(e).into()),
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    pub fn current_frame(&self) -> usize {
        self.slots.current()
    }
}

unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device
        .create_image_view(&iv_info, None)
        .map_err(VkError::api("vkCreateImageView"))?)
}
