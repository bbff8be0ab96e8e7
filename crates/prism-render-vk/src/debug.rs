// SPDX-License-Identifier: CEPL-1.0
use std::borrow::Cow;
use std::ffi::{c_void, CStr};
use std::sync::Arc;

use anyhow::Result;
use ash::ext::debug_utils;
use ash::vk;
use tracing::{error, warn};

use crate::error::VkError;

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// Receives validation-layer reports. Reporting never aborts the process.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, severity: Severity, kind: &str, message: &str);
}

/// Forwards reports to `tracing` under the `vulkan` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, severity: Severity, kind: &str, message: &str) {
        match severity {
            Severity::Warning => warn!(target: "vulkan", "[{kind}] {message}"),
            Severity::Error => error!(target: "vulkan", "[{kind}] {message}"),
        }
    }
}

/// Boxed so the address handed to the driver as user data stays put
/// while the owning `Device` moves.
pub(crate) type SinkHandle = Box<Arc<dyn DiagnosticSink>>;

fn classify(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Option<Severity> {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Some(Severity::Error)
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn kind_name(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

pub(crate) unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user.is_null() {
        return vk::FALSE;
    }
    let Some(severity) = classify(severity) else {
        return vk::FALSE;
    };

    let sink = &*(user as *const Arc<dyn DiagnosticSink>);
    let p_message = (*data).p_message;
    let message = if p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr(p_message).to_string_lossy()
    };
    sink.report(severity, kind_name(types), &message);
    vk::FALSE
}

pub(crate) fn messenger_create_info(
    sink: &SinkHandle,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        p_user_data: (&**sink) as *const Arc<dyn DiagnosticSink> as *mut c_void,
        ..Default::default()
    }
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        sink: &SinkHandle,
    ) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = messenger_create_info(sink);
        let messenger = loader
            .create_debug_utils_messenger(&ci, None)
            .map_err(VkError::api("vkCreateDebugUtilsMessengerEXT"))?;
        Ok(Self { loader, messenger })
    }

    pub(crate) unsafe fn destroy(&self) {
        self.loader
            .destroy_debug_utils_messenger(self.messenger, None);
    }
}
