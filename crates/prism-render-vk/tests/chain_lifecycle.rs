// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan driver and an X11 display:
//! `cargo test -p prism-render-vk -- --ignored`
#![cfg(target_os = "linux")]

use std::sync::Arc;

use prism_platform::AppWindow;
use prism_render::SurfaceProvider;
use prism_render_vk::{vk, Device, DeviceConfig, PresentationChain, TracingSink};
use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoop;
use winit::platform::x11::EventLoopBuilderExtX11;
use winit::window::Window;

fn open_window(event_loop: &EventLoop<()>) -> AppWindow {
    let attrs = Window::default_attributes()
        .with_title("prism chain test")
        .with_inner_size(PhysicalSize::new(640, 480))
        .with_visible(false);
    #[allow(deprecated)]
    let window = event_loop.create_window(attrs).unwrap();
    AppWindow::from_window(window)
}

fn device_for(window: &AppWindow) -> Device {
    let config = DeviceConfig {
        app_name: "prism-tests".to_owned(),
        validation: false,
    };
    Device::new(window, window, &config, Arc::new(TracingSink)).unwrap()
}

#[test]
#[ignore = "needs a Vulkan driver and a display"]
fn construct_destroy_construct_keeps_chain_properties() {
    let event_loop = EventLoop::builder().with_any_thread(true).build().unwrap();
    let window = open_window(&event_loop);
    let device = device_for(&window);

    let first = PresentationChain::new(&device, window.extent(), None).unwrap();
    let image_count = first.image_count();
    let format = first.image_format();
    let mode = first.present_mode();
    assert!(image_count >= 2);
    assert_eq!(first.current_frame(), 0);
    drop(first);

    let second = PresentationChain::new(&device, window.extent(), None).unwrap();
    assert_eq!(second.image_count(), image_count);
    assert_eq!(second.image_format(), format);
    assert_eq!(second.present_mode(), mode);

    // hand-off through old_swapchain
    let third = PresentationChain::new(&device, window.extent(), Some(second)).unwrap();
    assert_eq!(third.image_count(), image_count);
    assert_ne!(third.render_pass(), vk::RenderPass::null());
    for i in 0..third.image_count() {
        assert_ne!(third.framebuffer(i), vk::Framebuffer::null());
    }
}

#[test]
#[ignore = "needs a Vulkan driver and a display"]
fn one_shot_copy_moves_buffer_contents() {
    let event_loop = EventLoop::builder().with_any_thread(true).build().unwrap();
    let window = open_window(&event_loop);
    let device = device_for(&window);

    let data: Vec<u8> = (0..=255).collect();
    let size = data.len() as vk::DeviceSize;
    let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let (src, src_mem) = device
        .create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, host)
        .unwrap();
    let (dst, dst_mem) = device
        .create_buffer(size, vk::BufferUsageFlags::TRANSFER_DST, host)
        .unwrap();

    unsafe {
        let d = device.handle();
        let ptr = d
            .map_memory(src_mem, 0, size, vk::MemoryMapFlags::empty())
            .unwrap();
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
        d.unmap_memory(src_mem);

        device.copy_buffer(src, dst, size).unwrap();

        let ptr = d
            .map_memory(dst_mem, 0, size, vk::MemoryMapFlags::empty())
            .unwrap();
        let copied = std::slice::from_raw_parts(ptr as *const u8, data.len()).to_vec();
        d.unmap_memory(dst_mem);
        assert_eq!(copied, data);

        device.destroy_buffer(src, src_mem);
        device.destroy_buffer(dst, dst_mem);
    }
}
