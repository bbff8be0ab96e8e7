// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use prism_core::{init_tracing, DEFAULT_FILTER};
use prism_platform::AppWindow;
use prism_render::{FrameDriver, FrameOutcome, Renderer, SurfaceProvider};
use prism_render_vk::{TracingSink, VkRenderer};
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};

mod config;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config; a missing file means built-in defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Force the Vulkan validation layer on or off
    #[arg(long)]
    validation: Option<bool>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(v) = self.validation {
            cfg.render.validation = v;
        }
        if let Some(w) = self.width {
            cfg.window.width = w;
        }
        if let Some(h) = self.height {
            cfg.window.height = h;
        }
    }
}

struct App {
    cfg: AppCfg,
    // renderer before window: it must be torn down while the surface's window lives
    renderer: Option<VkRenderer>,
    window: Option<AppWindow>,
    driver: FrameDriver,
    failure: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            renderer: None,
            window: None,
            driver: FrameDriver::new(),
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = AppWindow::create(event_loop, &self.cfg.window_desc())?;
        let mut renderer = VkRenderer::new(
            &window,
            window.extent(),
            &self.cfg.renderer_config(),
            Arc::new(TracingSink),
        )?;
        renderer.set_clear_color(self.cfg.render.clear_color);
        info!(
            "window {}x{}, validation={}",
            window.extent().width,
            window.extent().height,
            self.cfg.render.validation
        );

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("fatal: {e:#}");
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(r) = &self.renderer {
            r.wait_idle().ok();
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && self.failure.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(w) if w.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested ({} frames)", self.driver.frames_presented());
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                if let Some(w) = &mut self.window {
                    w.handle_resize(new_size);
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                let (Some(renderer), Some(window)) = (&mut self.renderer, &mut self.window) else {
                    return;
                };
                match self.driver.draw_frame(renderer, window) {
                    Ok(FrameOutcome::Presented) => self.frames = self.frames.saturating_add(1),
                    Ok(FrameOutcome::Recreated | FrameOutcome::Skipped) => {}
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };

        // minimized: sleep until the next resize instead of spinning
        if window.extent().is_empty() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing(DEFAULT_FILTER);
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    args.apply(&mut cfg);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
