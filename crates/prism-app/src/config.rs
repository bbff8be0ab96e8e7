// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use prism_platform::WindowDesc;
use prism_render_vk::{DeviceConfig, RendererConfig};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Vulkan Application".to_owned(),
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub validation: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let r = RendererConfig::default();
        RenderCfg {
            clear_color: r.clear_color,
            validation: cfg!(debug_assertions),
            vertex_shader: r.vertex_shader,
            fragment_shader: r.fragment_shader,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn window_desc(&self) -> WindowDesc {
        WindowDesc {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            device: DeviceConfig {
                app_name: self.window.title.clone(),
                validation: self.render.validation,
            },
            vertex_shader: self.render.vertex_shader.clone(),
            fragment_shader: self.render.fragment_shader.clone(),
            clear_color: self.render.clear_color,
        }
    }
}

/// A missing file means defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}
