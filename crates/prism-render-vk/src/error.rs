// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Fatal conditions raised by the device and presentation layers.
///
/// Functions return `anyhow::Result`; these can be recovered with
/// `err.downcast_ref::<VkError>()` when a caller needs to tell them apart.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("Vulkan loader unavailable: {0}")]
    LoaderUnavailable(String),

    #[error("missing required instance extensions: {}", .0.join(", "))]
    MissingInstanceExtension(Vec<String>),

    #[error("validation layer {0} requested but not available")]
    ValidationLayerUnavailable(String),

    #[error("no physical device satisfies the presentation requirements")]
    NoSuitableAdapter,

    #[error("no memory type matches filter {type_filter:#b} with {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("none of {candidates:?} supports {features:?} with {tiling:?} tiling")]
    NoSupportedFormat {
        candidates: Vec<vk::Format>,
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    },

    #[error("{call} failed: {result}")]
    Api {
        call: &'static str,
        result: vk::Result,
    },
}

impl VkError {
    pub fn api(call: &'static str) -> impl FnOnce(vk::Result) -> VkError {
        move |result| VkError::Api { call, result }
    }
}
