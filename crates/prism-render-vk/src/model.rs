// SPDX-License-Identifier: CEPL-1.0
use std::mem::{offset_of, size_of};

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::device::Device;
use crate::error::VkError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(position: [f32; 2], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, color) as u32,
            },
        ]
    }
}

/// A device-local vertex buffer drawn as a plain triangle list.
pub struct Model {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
}

impl Drop for Model {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl Model {
    pub fn new(device: &Device, vertices: &[Vertex]) -> Result<Self> {
        if vertices.len() < 3 {
            bail!("a model needs at least 3 vertices, got {}", vertices.len());
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;

        let (staging, staging_mem) = device
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .context("staging buffer")?;

        let uploaded = unsafe { upload(device, staging, staging_mem, bytes) };
        unsafe { device.destroy_buffer(staging, staging_mem) };
        let (buffer, memory) = uploaded?;

        debug!("vertex buffer: {} vertices, {} bytes", vertices.len(), size);
        Ok(Self {
            device: device.handle().clone(),
            buffer,
            memory,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn bind(&self, cmd: vk::CommandBuffer) {
        self.device
            .cmd_bind_vertex_buffers(cmd, 0, &[self.buffer], &[0]);
    }

    /// # Safety
    /// `cmd` must be recording inside a render pass with a pipeline bound.
    pub unsafe fn draw(&self, cmd: vk::CommandBuffer) {
        self.device.cmd_draw(cmd, self.vertex_count, 1, 0, 0);
    }
}

// host → staging, then staging → a fresh device-local buffer
unsafe fn upload(
    device: &Device,
    staging: vk::Buffer,
    staging_mem: vk::DeviceMemory,
    bytes: &[u8],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let d = device.handle();
    let size = bytes.len() as vk::DeviceSize;

    let ptr = d
        .map_memory(staging_mem, 0, size, vk::MemoryMapFlags::empty())
        .map_err(VkError::api("vkMapMemory"))?;
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
    d.unmap_memory(staging_mem);

    let (buffer, memory) = device
        .create_buffer(
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .context("vertex buffer")?;
    if let Err(e) = device.copy_buffer(staging, buffer, size) {
        device.destroy_buffer(buffer, memory);
        return Err(e);
    }
    Ok((buffer, memory))
}
