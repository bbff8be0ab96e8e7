// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_math::{PushConstants, ANIMATION_PERIOD};
use prism_render::{Acquire, PresentStatus, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

use crate::debug::DiagnosticSink;
use crate::device::{Device, DeviceConfig};
use crate::error::VkError;
use crate::model::{Model, Vertex};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::swap_chain::PresentationChain;

/// Copies of the model drawn per frame, each with its own push block.
const STACK_ROWS: u32 = 4;

pub const DEMO_TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 1.0, 0.0]),
    Vertex::new([-0.5, 0.5], [0.0, 0.0, 1.0]),
];

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub device: DeviceConfig,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            vertex_shader: PathBuf::from("shaders/simple_shader.vert.spv"),
            fragment_shader: PathBuf::from("shaders/simple_shader.frag.spv"),
            clear_color: [0.01, 0.01, 0.01, 1.0],
        }
    }
}

pub struct VkRenderer {
    chain: Option<PresentationChain>,
    pipeline: Option<Pipeline>,
    model: Option<Model>,
    pipeline_layout: vk::PipelineLayout,
    command_buffers: Vec<vk::CommandBuffer>,

    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    clear_color: [f32; 4],
    animation_frame: u32,

    // last: everything above borrows its function tables
    device: Device,
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - command buffers, pipeline, model, presentation chain, layout
// - Device (instance-level objects) via field drop
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().device_wait_idle().ok();
            self.device.free_command_buffers(&self.command_buffers);
        }
        self.pipeline = None;
        self.model = None;
        self.chain = None;
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

impl VkRenderer {
    pub fn new<W>(
        window: &W,
        size: RenderSize,
        config: &RendererConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let device = Device::new(window, window, &config.device, sink)?;
        let pipeline_layout = create_pipeline_layout(&device)?;

        let mut r = VkRenderer {
            chain: None,
            pipeline: None,
            model: None,
            pipeline_layout,
            command_buffers: Vec::new(),
            vertex_shader: config.vertex_shader.clone(),
            fragment_shader: config.fragment_shader.clone(),
            clear_color: config.clear_color,
            animation_frame: 0,
            device,
        };
        r.model = Some(Model::new(&r.device, &DEMO_TRIANGLE).context("demo model")?);
        r.rebuild_chain(size)?;

        info!("Vulkan renderer ready on {}", r.device.adapter_name());
        Ok(r)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn chain(&self) -> Option<&PresentationChain> {
        self.chain.as_ref()
    }

    fn live_chain(&self) -> Result<&PresentationChain> {
        self.chain
            .as_ref()
            .ok_or_else(|| anyhow!("no presentation chain (last recreation failed)"))
    }

    /// New chain from the old one, then everything that depends on its
    /// render pass or image count.
    fn rebuild_chain(&mut self, size: RenderSize) -> Result<()> {
        let previous = self.chain.take();
        let chain = PresentationChain::new(&self.device, size, previous)
            .context("create presentation chain")?;

        if chain.image_count() != self.command_buffers.len() {
            debug!(
                "command buffers: {} -> {}",
                self.command_buffers.len(),
                chain.image_count()
            );
            unsafe { self.device.free_command_buffers(&self.command_buffers) };
            self.command_buffers.clear();
            self.command_buffers = self
                .device
                .allocate_command_buffers(chain.image_count() as u32)?;
        }

        self.pipeline = None;
        let config = PipelineConfig::new(chain.render_pass(), self.pipeline_layout);
        self.pipeline = Some(
            Pipeline::new(
                &self.device,
                &self.vertex_shader,
                &self.fragment_shader,
                &config,
            )
            .context("create pipeline")?,
        );
        self.chain = Some(chain);
        Ok(())
    }

    unsafe fn record_commands(&self, cmd: vk::CommandBuffer, image_index: usize) -> Result<()> {
        let d = self.device.handle();
        let chain = self.live_chain()?;
        let (pipeline, model) = match (&self.pipeline, &self.model) {
            (Some(p), Some(m)) => (p, m),
            _ => return Err(anyhow!("pipeline or model missing")),
        };

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)
            .map_err(VkError::api("vkBeginCommandBuffer"))?;

        let extent = chain.extent();
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: chain.render_pass(),
            framebuffer: chain.framebuffer(image_index),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        d.cmd_set_viewport(cmd, 0, &[viewport]);
        d.cmd_set_scissor(cmd, 0, &[scissor]);

        pipeline.bind(cmd);
        model.bind(cmd);
        for row in 0..STACK_ROWS {
            let push = PushConstants::stacked(self.animation_frame, row);
            d.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push.as_bytes(),
            );
            model.draw(cmd);
        }

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)
            .map_err(VkError::api("vkEndCommandBuffer"))?;
        Ok(())
    }

    fn command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        self.command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| anyhow!("no command buffer for image {image_index}"))
    }
}

impl Renderer for VkRenderer {
    fn acquire(&mut self) -> Result<Acquire> {
        self.chain
            .as_mut()
            .ok_or_else(|| anyhow!("no presentation chain (last recreation failed)"))?
            .acquire_next_image()
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        let cmd = self.command_buffer(image_index)?;
        self.live_chain()?.wait_for_image(image_index)?;
        unsafe { self.record_commands(cmd, image_index as usize)? };
        self.animation_frame = (self.animation_frame + 1) % ANIMATION_PERIOD;
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<PresentStatus> {
        let cmd = self.command_buffer(image_index)?;
        let chain = self
            .chain
            .as_mut()
            .ok_or_else(|| anyhow!("no presentation chain (last recreation failed)"))?;
        unsafe { chain.submit(cmd, image_index) }
    }

    fn recreate(&mut self, size: RenderSize) -> Result<()> {
        self.device.wait_idle()?;
        self.rebuild_chain(size)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

fn create_pipeline_layout(device: &Device) -> Result<vk::PipelineLayout> {
    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        offset: 0,
        size: PushConstants::SIZE,
    };
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        push_constant_range_count: 1,
        p_push_constant_ranges: &push_range,
        ..Default::default()
    };
    unsafe {
        Ok(device
            .handle()
            .create_pipeline_layout(&layout_info, None)
            .map_err(VkError::api("vkCreatePipelineLayout"))?)
    }
}
