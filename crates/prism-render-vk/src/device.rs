// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::debug::{messenger_create_info, DebugMessenger, DiagnosticSink, SinkHandle, VALIDATION_LAYER};
use crate::error::VkError;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub app_name: String,
    /// Enables the Khronos validation layer and the debug messenger.
    pub validation: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_owned(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Queue families found while scanning an adapter; either may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans families in index order and keeps the first graphics-capable one
    /// and, independently, the first one that can present. Families with no
    /// queues are ignored. A failing present query aborts the scan.
    pub fn discover(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut found = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count == 0 {
                continue;
            }
            if found.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                found.graphics = Some(i);
            }
            if found.present.is_none() && supports_present(i)? {
                found.present = Some(i);
            }
            if found.is_complete() {
                break;
            }
        }
        Ok(found)
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Surface capabilities, formats and present modes for one adapter.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: loader
                .get_physical_device_surface_capabilities(phys, surface)
                .map_err(VkError::api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
            formats: loader
                .get_physical_device_surface_formats(phys, surface)
                .map_err(VkError::api("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
            present_modes: loader
                .get_physical_device_surface_present_modes(phys, surface)
                .map_err(VkError::api("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
        })
    }
}

/// What an adapter offers, measured against what presentation needs.
#[derive(Clone, Debug, Default)]
pub struct AdapterReport {
    pub families: QueueFamilyIndices,
    pub swapchain_extension: bool,
    pub has_formats: bool,
    pub has_present_modes: bool,
    pub sampler_anisotropy: bool,
}

impl AdapterReport {
    pub fn unmet(&self) -> Vec<&'static str> {
        let mut unmet = Vec::new();
        if self.families.graphics.is_none() {
            unmet.push("graphics queue");
        }
        if self.families.present.is_none() {
            unmet.push("present queue");
        }
        if !self.swapchain_extension {
            unmet.push("VK_KHR_swapchain");
        }
        if !self.has_formats {
            unmet.push("surface formats");
        }
        if !self.has_present_modes {
            unmet.push("present modes");
        }
        if !self.sampler_anisotropy {
            unmet.push("samplerAnisotropy");
        }
        unmet
    }

    pub fn is_suitable(&self) -> bool {
        self.unmet().is_empty()
    }
}

/// Names in `required` that do not appear in `available`, in `required` order.
pub fn missing_names(required: &[&CStr], available: &[&CStr]) -> Vec<String> {
    required
        .iter()
        .filter(|r| !available.contains(r))
        .map(|r| r.to_string_lossy().into_owned())
        .collect()
}

/// First memory type allowed by `type_filter` whose flags include `properties`.
pub fn resolve_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    for i in 0..memory.memory_type_count {
        let allowed = (type_filter & (1 << i)) != 0;
        if allowed
            && memory.memory_types[i as usize]
                .property_flags
                .contains(properties)
        {
            return Ok(i);
        }
    }
    Err(VkError::NoSuitableMemoryType {
        type_filter,
        properties,
    })
}

pub fn first_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties_of: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, VkError> {
    for &format in candidates {
        let props = properties_of(format);
        let supported = match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features,
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features,
            _ => vk::FormatFeatureFlags::empty(),
        };
        if supported.contains(features) {
            return Ok(format);
        }
    }
    Err(VkError::NoSupportedFormat {
        candidates: candidates.to_vec(),
        tiling,
        features,
    })
}

// Dropped after `Device` has destroyed its logical device:
// messenger → surface → instance, then the sink the messenger points at.
struct InstanceContext {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    sink: SinkHandle,
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn check_instance_extensions(entry: &Entry, required: &[*const c_char]) -> Result<()> {
    let props = entry
        .enumerate_instance_extension_properties(None)
        .map_err(VkError::api("vkEnumerateInstanceExtensionProperties"))?;
    let available: Vec<&CStr> = props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .collect();
    let required: Vec<&CStr> = required.iter().map(|&p| CStr::from_ptr(p)).collect();

    let missing = missing_names(&required, &available);
    if !missing.is_empty() {
        return Err(VkError::MissingInstanceExtension(missing).into());
    }
    Ok(())
}

unsafe fn check_validation_layer(entry: &Entry) -> Result<()> {
    let props = entry
        .enumerate_instance_layer_properties()
        .map_err(VkError::api("vkEnumerateInstanceLayerProperties"))?;
    let found = props
        .iter()
        .any(|p| p.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER));
    if !found {
        return Err(VkError::ValidationLayerUnavailable(
            VALIDATION_LAYER.to_string_lossy().into_owned(),
        )
        .into());
    }
    Ok(())
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    config: &DeviceConfig,
    sink: &SinkHandle,
) -> Result<Instance> {
    let app_name = CString::new(config.app_name.as_str()).context("app name contains NUL")?;
    let engine_name = c"Prism";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: engine_name.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .map_err(VkError::api("ash_window::enumerate_required_extensions"))?
        .to_vec();
    if config.validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }
    check_instance_extensions(entry, &extensions)?;

    let layers = [VALIDATION_LAYER.as_ptr()];
    // Covers messages emitted by vkCreateInstance and vkDestroyInstance,
    // which the standalone messenger cannot see.
    let instance_debug = messenger_create_info(sink);

    let mut create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    if config.validation {
        check_validation_layer(entry)?;
        create_info.enabled_layer_count = layers.len() as u32;
        create_info.pp_enabled_layer_names = layers.as_ptr();
        create_info.p_next = &instance_debug as *const _ as *const std::ffi::c_void;
    }

    Ok(entry
        .create_instance(&create_info, None)
        .map_err(VkError::api("vkCreateInstance"))?)
}

unsafe fn inspect_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<AdapterReport> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let families = QueueFamilyIndices::discover(&qprops, |i| {
        Ok(surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .map_err(VkError::api("vkGetPhysicalDeviceSurfaceSupportKHR"))?)
    })?;

    let exts = instance
        .enumerate_device_extension_properties(phys)
        .map_err(VkError::api("vkEnumerateDeviceExtensionProperties"))?;
    let swapchain_extension = exts
        .iter()
        .any(|e| e.extension_name_as_c_str().ok() == Some(swapchain::NAME));

    let mut report = AdapterReport {
        families,
        swapchain_extension,
        sampler_anisotropy: instance.get_physical_device_features(phys).sampler_anisotropy
            == vk::TRUE,
        ..Default::default()
    };
    if swapchain_extension {
        let support = SwapchainSupport::query(surface_loader, phys, surface)?;
        report.has_formats = !support.formats.is_empty();
        report.has_present_modes = !support.present_modes.is_empty();
    }
    Ok(report)
}

fn adapter_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned())
}

unsafe fn pick_adapter(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let adapters = instance
        .enumerate_physical_devices()
        .map_err(VkError::api("vkEnumeratePhysicalDevices"))?;
    info!("{} Vulkan adapter(s) found", adapters.len());

    for phys in adapters {
        let name = adapter_name(&instance.get_physical_device_properties(phys));
        let report = inspect_adapter(instance, surface_loader, surface, phys)?;
        match report.families.resolve() {
            Some(families) if report.is_suitable() => {
                info!(
                    "Adapter: {name} (graphics family {}, present family {})",
                    families.graphics, families.present
                );
                return Ok((phys, families));
            }
            _ => debug!("skipping adapter {name}: missing {}", report.unmet().join(", ")),
        }
    }
    Err(VkError::NoSuitableAdapter.into())
}

/// Owns the instance, surface, logical device, queues and command pool.
///
/// Everything else in the backend borrows the function tables returned by
/// [`Device::handle`] and must be dropped before the `Device`.
pub struct Device {
    phys: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory: vk::PhysicalDeviceMemoryProperties,
    families: QueueFamilies,

    device: ash::Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    swapchain_loader: swapchain::Device,

    // last: its Drop runs after ours has destroyed the logical device
    ctx: InstanceContext,
}

// STRICT TEARDOWN ORDER:
// - command pool
// - logical device
// - debug messenger, surface, instance (InstanceContext)
impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}

impl Device {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &DeviceConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let dh: RawDisplayHandle = display.display_handle()?.as_raw();
        let wh: RawWindowHandle = window.window_handle()?.as_raw();

        unsafe {
            let entry = Entry::load().map_err(|e| VkError::LoaderUnavailable(e.to_string()))?;
            let sink: SinkHandle = Box::new(sink);
            let instance = create_instance(&entry, dh, config, &sink)?;

            let mut ctx = InstanceContext {
                surface_loader: surface::Instance::new(&entry, &instance),
                entry,
                instance,
                debug: None,
                surface: vk::SurfaceKHR::null(),
                sink,
            };
            if config.validation {
                ctx.debug = Some(DebugMessenger::new(&ctx.entry, &ctx.instance, &ctx.sink)?);
                debug!("validation layer enabled");
            }
            ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
                .map_err(VkError::api("vkCreateSurfaceKHR"))?;

            let (phys, families) = pick_adapter(&ctx.instance, &ctx.surface_loader, ctx.surface)?;
            let device = create_logical_device(&ctx.instance, phys, families, config.validation)?;

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: families.graphics,
                flags: vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            let command_pool = match device.create_command_pool(&pool_info, None) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(VkError::api("vkCreateCommandPool")(e).into());
                }
            };

            Ok(Self {
                phys,
                properties: ctx.instance.get_physical_device_properties(phys),
                memory: ctx.instance.get_physical_device_memory_properties(phys),
                families,
                graphics_queue: device.get_device_queue(families.graphics, 0),
                present_queue: device.get_device_queue(families.present, 0),
                command_pool,
                swapchain_loader: swapchain::Device::new(&ctx.instance, &device),
                device,
                ctx,
            })
        }
    }

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Instance {
        &self.ctx.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.ctx.surface
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn adapter_name(&self) -> String {
        adapter_name(&self.properties)
    }

    /// Fresh surface query; the answer changes as the window is resized.
    pub fn swapchain_support(&self) -> Result<SwapchainSupport> {
        unsafe { SwapchainSupport::query(&self.ctx.surface_loader, self.phys, self.ctx.surface) }
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        Ok(resolve_memory_type(&self.memory, type_filter, properties)?)
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        let instance = &self.ctx.instance;
        Ok(first_supported_format(candidates, tiling, features, |f| unsafe {
            instance.get_physical_device_format_properties(self.phys, f)
        })?)
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let d = &self.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = d
                .create_buffer(&bci, None)
                .map_err(VkError::api("vkCreateBuffer"))?;
            let req = d.get_buffer_memory_requirements(buffer);
            let memory = match self.allocate(req, properties) {
                Ok(m) => m,
                Err(e) => {
                    d.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = d.bind_buffer_memory(buffer, memory, 0) {
                d.destroy_buffer(buffer, None);
                d.free_memory(memory, None);
                return Err(VkError::api("vkBindBufferMemory")(e).into());
            }
            Ok((buffer, memory))
        }
    }

    /// # Safety
    /// Neither handle may be in use by pending GPU work.
    pub unsafe fn destroy_buffer(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        self.device.destroy_buffer(buffer, None);
        self.device.free_memory(memory, None);
    }

    /// # Safety
    /// Every pointer inside `info` must be valid for the call.
    pub unsafe fn create_image_with_info(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        let d = &self.device;
        let image = d
            .create_image(info, None)
            .map_err(VkError::api("vkCreateImage"))?;
        let req = d.get_image_memory_requirements(image);
        let memory = match self.allocate(req, properties) {
            Ok(m) => m,
            Err(e) => {
                d.destroy_image(image, None);
                return Err(e);
            }
        };
        if let Err(e) = d.bind_image_memory(image, memory, 0) {
            d.destroy_image(image, None);
            d.free_memory(memory, None);
            return Err(VkError::api("vkBindImageMemory")(e).into());
        }
        Ok((image, memory))
    }

    unsafe fn allocate(
        &self,
        req: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: self.find_memory_type(req.memory_type_bits, properties)?,
            ..Default::default()
        };
        Ok(self
            .device
            .allocate_memory(&mai, None)
            .map_err(VkError::api("vkAllocateMemory"))?)
    }

    pub fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe {
            Ok(self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(VkError::api("vkAllocateCommandBuffers"))?)
        }
    }

    /// # Safety
    /// The buffers must come from this device's pool and not be pending.
    pub unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            self.device
                .free_command_buffers(self.command_pool, buffers);
        }
    }

    /// Allocates and begins a primary buffer for a single submission.
    pub fn begin_one_shot(&self) -> Result<vk::CommandBuffer> {
        let cmd = self.allocate_command_buffers(1)?[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            if let Err(e) = self.device.begin_command_buffer(cmd, &bi) {
                self.free_command_buffers(&[cmd]);
                return Err(VkError::api("vkBeginCommandBuffer")(e).into());
            }
        }
        Ok(cmd)
    }

    /// Ends, submits and frees `cmd`, blocking until the graphics queue is
    /// idle. Meant for setup work only.
    ///
    /// # Safety
    /// `cmd` must come from [`Device::begin_one_shot`].
    pub unsafe fn end_one_shot(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let result = self.submit_and_wait(cmd);
        self.free_command_buffers(&[cmd]);
        result
    }

    unsafe fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let d = &self.device;
        d.end_command_buffer(cmd)
            .map_err(VkError::api("vkEndCommandBuffer"))?;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        d.queue_submit(self.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
            .map_err(VkError::api("vkQueueSubmit"))?;
        d.queue_wait_idle(self.graphics_queue)
            .map_err(VkError::api("vkQueueWaitIdle"))?;
        Ok(())
    }

    /// # Safety
    /// Both buffers must be live and at least `size` bytes.
    pub unsafe fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> Result<()> {
        let cmd = self.begin_one_shot()?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.device
            .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        self.end_one_shot(cmd).context("copy_buffer")
    }

    /// Copies tightly packed texels into `image`, which must already be in
    /// `TRANSFER_DST_OPTIMAL`.
    ///
    /// # Safety
    /// `buffer` must hold `width * height * layers` texels of the image's format.
    pub unsafe fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
        layers: u32,
    ) -> Result<()> {
        let cmd = self.begin_one_shot()?;
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: layers,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };
        self.device.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
        self.end_one_shot(cmd).context("copy_buffer_to_image")
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(VkError::api("vkDeviceWaitIdle"))?;
        }
        Ok(())
    }
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    validation: bool,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: vk::TRUE,
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    // Device layers are ignored by current loaders; older ones still need them.
    let layers = [VALIDATION_LAYER.as_ptr()];

    let mut dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    if validation {
        dinfo.enabled_layer_count = layers.len() as u32;
        dinfo.pp_enabled_layer_names = layers.as_ptr();
    }

    Ok(instance
        .create_device(phys, &dinfo, None)
        .map_err(VkError::api("vkCreateDevice"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn discovery_keeps_first_graphics_and_first_present_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
        ];
        let found = QueueFamilyIndices::discover(&families, |i| Ok(i >= 1)).unwrap();

        assert_eq!(found.graphics, Some(1));
        assert_eq!(found.present, Some(1));
        assert!(found.resolve().unwrap().is_shared());
    }

    #[test]
    fn discovery_skips_empty_families_and_splits_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let found = QueueFamilyIndices::discover(&families, |i| Ok(i != 1)).unwrap();

        let resolved = found.resolve().unwrap();
        assert_eq!(resolved, QueueFamilies { graphics: 1, present: 2 });
        assert!(!resolved.is_shared());
        assert_eq!(resolved.unique(), vec![1, 2]);
    }

    #[test]
    fn discovery_stops_probing_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut probed = Vec::new();
        QueueFamilyIndices::discover(&families, |i| {
            probed.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(probed, vec![0]);
    }

    #[test]
    fn failed_present_query_reaches_the_caller() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let err = QueueFamilyIndices::discover(&families, |_| {
            Err(VkError::Api {
                call: "vkGetPhysicalDeviceSurfaceSupportKHR",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            }
            .into())
        })
        .unwrap_err();

        match err.downcast_ref::<VkError>() {
            Some(VkError::Api { call, result }) => {
                assert_eq!(*call, "vkGetPhysicalDeviceSurfaceSupportKHR");
                assert_eq!(*result, vk::Result::ERROR_SURFACE_LOST_KHR);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn incomplete_discovery_does_not_resolve() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let found = QueueFamilyIndices::discover(&families, |_| Ok(false)).unwrap();
        assert!(!found.is_complete());
        assert_eq!(found.resolve(), None);
    }

    #[test]
    fn adapter_report_names_every_unmet_requirement() {
        let report = AdapterReport {
            families: QueueFamilyIndices {
                graphics: Some(0),
                present: None,
            },
            swapchain_extension: true,
            has_formats: true,
            has_present_modes: false,
            sampler_anisotropy: false,
        };
        assert!(!report.is_suitable());
        assert_eq!(
            report.unmet(),
            vec!["present queue", "present modes", "samplerAnisotropy"]
        );

        let good = AdapterReport {
            families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            swapchain_extension: true,
            has_formats: true,
            has_present_modes: true,
            sampler_anisotropy: true,
        };
        assert!(good.is_suitable());
    }

    #[test]
    fn missing_names_lists_absent_extensions_in_order() {
        let required = [c"VK_KHR_surface", c"VK_KHR_xlib_surface", c"VK_EXT_debug_utils"];
        let available = [c"VK_KHR_surface"];
        assert_eq!(
            missing_names(&required, &available),
            vec!["VK_KHR_xlib_surface", "VK_EXT_debug_utils"]
        );
        assert!(missing_names(&required[..1], &available).is_empty());
    }

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn memory_type_respects_filter_bits() {
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let props = memory(&[local, host, local]);

        assert_eq!(resolve_memory_type(&props, 0b100, local).unwrap(), 2);
        assert_eq!(resolve_memory_type(&props, 0b111, local).unwrap(), 0);
    }

    #[test]
    fn only_the_filtered_type_with_the_flags_matches() {
        let local = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let props = memory(&[host, host, local, host]);

        assert_eq!(resolve_memory_type(&props, 0b0100, local).unwrap(), 2);
        assert!(resolve_memory_type(&props, 0b1011, local).is_err());
    }

    #[test]
    fn memory_type_needs_every_requested_flag() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let coherent = vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory(&[host, host | coherent]);

        assert_eq!(resolve_memory_type(&props, 0b11, host | coherent).unwrap(), 1);
    }

    #[test]
    fn memory_type_without_match_is_an_error() {
        let props = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let err =
            resolve_memory_type(&props, 0b010, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(
            err,
            VkError::NoSuitableMemoryType {
                type_filter: 0b010,
                ..
            }
        ));
    }

    #[test]
    fn supported_format_checks_the_requested_tiling() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        let props = |f: vk::Format| match f {
            vk::Format::D32_SFLOAT => vk::FormatProperties {
                linear_tiling_features: depth,
                ..Default::default()
            },
            vk::Format::D24_UNORM_S8_UINT => vk::FormatProperties {
                optimal_tiling_features: depth,
                ..Default::default()
            },
            _ => vk::FormatProperties::default(),
        };

        assert_eq!(
            first_supported_format(&candidates, vk::ImageTiling::OPTIMAL, depth, props).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert_eq!(
            first_supported_format(&candidates, vk::ImageTiling::LINEAR, depth, props).unwrap(),
            vk::Format::D32_SFLOAT
        );
    }

    #[test]
    fn unsupported_format_lists_the_candidates() {
        let err = first_supported_format(
            &[vk::Format::D16_UNORM],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        )
        .unwrap_err();
        match err {
            VkError::NoSupportedFormat { candidates, .. } => {
                assert_eq!(candidates, vec![vk::Format::D16_UNORM])
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
