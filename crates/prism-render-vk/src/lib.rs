// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device bring-up, the presentation chain and its
//! frames-in-flight protocol, plus the pipeline and model used to draw.

mod debug;
mod device;
mod error;
mod frame_sync;
mod model;
mod pipeline;
mod renderer;
mod swap_chain;

pub use debug::{DiagnosticSink, Severity, TracingSink, VALIDATION_LAYER};
pub use device::{
    first_supported_format, missing_names, resolve_memory_type, AdapterReport, Device,
    DeviceConfig, QueueFamilies, QueueFamilyIndices, SwapchainSupport,
};
pub use error::VkError;
pub use frame_sync::FrameSlots;
pub use model::{Model, Vertex};
pub use pipeline::{load_spirv, Pipeline, PipelineConfig};
pub use renderer::{RendererConfig, VkRenderer, DEMO_TRIANGLE};
pub use swap_chain::{
    choose_extent, choose_image_count, choose_present_mode, choose_sharing,
    choose_surface_format, PresentationChain, MAX_FRAMES_IN_FLIGHT,
};

pub use ash::vk;
