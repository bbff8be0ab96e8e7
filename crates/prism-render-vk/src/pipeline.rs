// SPDX-License-Identifier: CEPL-1.0
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::VkError;
use crate::model::Vertex;

/// Fixed-function state for a graphics pipeline. Start from [`PipelineConfig::new`]
/// and override fields as needed.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub layout: vk::PipelineLayout,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub color_blend: vk::PipelineColorBlendAttachmentState,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl PipelineConfig {
    pub fn new(render_pass: vk::RenderPass, layout: vk::PipelineLayout) -> Self {
        Self {
            render_pass,
            subpass: 0,
            layout,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            color_blend: vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::FALSE,
                src_color_blend_factor: vk::BlendFactor::ONE,
                dst_color_blend_factor: vk::BlendFactor::ZERO,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE,
                dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::R
                    | vk::ColorComponentFlags::G
                    | vk::ColorComponentFlags::B
                    | vk::ColorComponentFlags::A,
            },
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            // viewport and scissor are set per frame; one of each
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

/// Reads a SPIR-V binary. The bytes are not validated beyond word alignment.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file =
        File::open(path).with_context(|| format!("open shader {}", path.display()))?;
    read_spv(&mut file).with_context(|| format!("read shader {}", path.display()))
}

pub struct Pipeline {
    device: ash::Device,
    pipeline: vk::Pipeline,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

impl Pipeline {
    pub fn new(
        device: &Device,
        vert_path: &Path,
        frag_path: &Path,
        config: &PipelineConfig,
    ) -> Result<Self> {
        if config.render_pass == vk::RenderPass::null() || config.layout == vk::PipelineLayout::null() {
            return Err(anyhow!("pipeline config needs a render pass and a layout"));
        }
        let vs_code = load_spirv(vert_path)?;
        let fs_code = load_spirv(frag_path)?;

        let d = device.handle();
        unsafe {
            let vs = create_shader_module(d, &vs_code)?;
            let fs = match create_shader_module(d, &fs_code) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_shader_module(vs, None);
                    return Err(e);
                }
            };
            let pipeline = create_graphics_pipeline(d, vs, fs, config);
            // modules are only needed while the pipeline is built
            d.destroy_shader_module(vs, None);
            d.destroy_shader_module(fs, None);

            debug!(
                "pipeline built from {} + {}",
                vert_path.display(),
                frag_path.display()
            );
            Ok(Self {
                device: d.clone(),
                pipeline: pipeline?,
            })
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer) {
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device
        .create_shader_module(&ci, None)
        .map_err(VkError::api("vkCreateShaderModule"))?)
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
    config: &PipelineConfig,
) -> Result<vk::Pipeline> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    let bindings = Vertex::binding_descriptions();
    let attributes = Vertex::attribute_descriptions();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: bindings.len() as u32,
        p_vertex_binding_descriptions: bindings.as_ptr(),
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: config.topology,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: config.polygon_mode,
        cull_mode: config.cull_mode,
        front_face: config.front_face,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: config.samples,
        min_sample_shading: 1.0,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: config.depth_test.into(),
        depth_write_enable: config.depth_write.into(),
        depth_compare_op: config.depth_compare,
        max_depth_bounds: 1.0,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &config.color_blend,
        ..Default::default()
    };
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: config.dynamic_states.len() as u32,
        p_dynamic_states: config.dynamic_states.as_ptr(),
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout: config.layout,
        render_pass: config.render_pass,
        subpass: config.subpass,
        base_pipeline_index: -1,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => Ok(p[0]),
        Err((_, err)) => Err(VkError::api("vkCreateGraphicsPipelines")(err).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::path::PathBuf;

    fn scratch(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("prism-{}-{name}", std::process::id()));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn default_config_state() {
        let rp = vk::RenderPass::from_raw(1);
        let layout = vk::PipelineLayout::from_raw(2);
        let cfg = PipelineConfig::new(rp, layout);

        assert_eq!(cfg.subpass, 0);
        assert_eq!(cfg.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(cfg.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(cfg.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(cfg.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(cfg.color_blend.blend_enable, vk::FALSE);
        assert_eq!(
            cfg.color_blend.color_write_mask,
            vk::ColorComponentFlags::from_raw(0b1111)
        );
        assert!(cfg.depth_test && cfg.depth_write);
        assert_eq!(cfg.depth_compare, vk::CompareOp::LESS);
        assert_eq!(
            cfg.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn spirv_words_are_read_little_endian() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let path = scratch("ok.spv", &bytes);

        let words = load_spirv(&path).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn misaligned_shader_names_the_path() {
        let path = scratch("short.spv", &[3, 2, 35, 7, 0, 0, 1]);
        let err = load_spirv(&path).unwrap_err();
        assert!(format!("{err}").contains("short.spv"), "{err}");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_shader_names_the_path() {
        let path = std::env::temp_dir().join("prism-does-not-exist.vert.spv");
        let err = load_spirv(&path).unwrap_err();
        assert!(format!("{err}").contains("prism-does-not-exist.vert.spv"));
    }
}
