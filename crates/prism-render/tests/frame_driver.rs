// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use prism_render::{
    Acquire, FrameDriver, FrameOutcome, PresentStatus, RenderSize, Renderer, SurfaceProvider,
};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Acquire,
    Record(u32),
    Submit(u32),
    Recreate(RenderSize),
}

#[derive(Default)]
struct ScriptedRenderer {
    acquires: VecDeque<Acquire>,
    presents: VecDeque<PresentStatus>,
    fail_record: bool,
    calls: Vec<Call>,
}

impl ScriptedRenderer {
    fn new(acquires: &[Acquire], presents: &[PresentStatus]) -> Self {
        Self {
            acquires: acquires.iter().copied().collect(),
            presents: presents.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn recorded(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Record(_)))
            .count()
    }
}

impl Renderer for ScriptedRenderer {
    fn acquire(&mut self) -> Result<Acquire> {
        self.calls.push(Call::Acquire);
        Ok(self.acquires.pop_front().unwrap_or(Acquire::Ready {
            image_index: 0,
            suboptimal: false,
        }))
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        if self.fail_record {
            return Err(anyhow!("device lost"));
        }
        self.calls.push(Call::Record(image_index));
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<PresentStatus> {
        self.calls.push(Call::Submit(image_index));
        Ok(self.presents.pop_front().unwrap_or(PresentStatus::Optimal))
    }

    fn recreate(&mut self, size: RenderSize) -> Result<()> {
        self.calls.push(Call::Recreate(size));
        Ok(())
    }

    fn set_clear_color(&mut self, _rgba: [f32; 4]) {}

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

struct FakeWindow {
    size: RenderSize,
    resized: bool,
}

impl FakeWindow {
    fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            resized: false,
        }
    }
}

impl HasWindowHandle for FakeWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

impl HasDisplayHandle for FakeWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::NotSupported)
    }
}

impl SurfaceProvider for FakeWindow {
    fn extent(&self) -> RenderSize {
        self.size
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized(&mut self) {
        self.resized = false;
    }
}

fn ready(image_index: u32) -> Acquire {
    Acquire::Ready {
        image_index,
        suboptimal: false,
    }
}

#[test]
fn steady_state_frame_acquires_records_and_presents_in_order() {
    let mut renderer = ScriptedRenderer::new(&[ready(2)], &[]);
    let mut window = FakeWindow::new(800, 600);
    let mut driver = FrameDriver::new();

    let outcome = driver.draw_frame(&mut renderer, &mut window).unwrap();

    assert_eq!(outcome, FrameOutcome::Presented);
    assert_eq!(
        renderer.calls,
        vec![Call::Acquire, Call::Record(2), Call::Submit(2)]
    );
    assert_eq!(driver.frames_presented(), 1);
}

#[test]
fn out_of_date_acquire_skips_recording_and_recreates_before_next_acquire() {
    let mut renderer = ScriptedRenderer::new(&[Acquire::OutOfDate, ready(1)], &[]);
    let mut window = FakeWindow::new(1024, 768);
    let mut driver = FrameDriver::new();

    let first = driver.draw_frame(&mut renderer, &mut window).unwrap();
    assert_eq!(first, FrameOutcome::Recreated);
    assert_eq!(renderer.recorded(), 0);

    let second = driver.draw_frame(&mut renderer, &mut window).unwrap();
    assert_eq!(second, FrameOutcome::Presented);
    assert_eq!(
        renderer.calls,
        vec![
            Call::Acquire,
            Call::Recreate(RenderSize::new(1024, 768)),
            Call::Acquire,
            Call::Record(1),
            Call::Submit(1),
        ]
    );
}

#[test]
fn recreation_on_out_of_date_acquire_also_clears_pending_resize() {
    let mut renderer = ScriptedRenderer::new(&[Acquire::OutOfDate, ready(0)], &[]);
    let mut window = FakeWindow::new(900, 600);
    window.resized = true;
    let mut driver = FrameDriver::new();

    assert_eq!(
        driver.draw_frame(&mut renderer, &mut window).unwrap(),
        FrameOutcome::Recreated
    );
    assert!(!window.resized);

    assert_eq!(
        driver.draw_frame(&mut renderer, &mut window).unwrap(),
        FrameOutcome::Presented
    );
    assert_eq!(
        renderer.calls,
        vec![
            Call::Acquire,
            Call::Recreate(RenderSize::new(900, 600)),
            Call::Acquire,
            Call::Record(0),
            Call::Submit(0),
        ]
    );
    assert_eq!(driver.recreations(), 1);
}

#[test]
fn stale_present_status_triggers_recreation() {
    for status in [PresentStatus::Suboptimal, PresentStatus::OutOfDate] {
        let mut renderer = ScriptedRenderer::new(&[ready(0)], &[status]);
        let mut window = FakeWindow::new(640, 480);
        let mut driver = FrameDriver::new();

        let outcome = driver.draw_frame(&mut renderer, &mut window).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated, "status {status:?}");
        assert_eq!(
            renderer.calls.last(),
            Some(&Call::Recreate(RenderSize::new(640, 480)))
        );
    }
}

#[test]
fn suboptimal_acquire_still_presents_then_recreates() {
    let acquire = Acquire::Ready {
        image_index: 1,
        suboptimal: true,
    };
    let mut renderer = ScriptedRenderer::new(&[acquire], &[]);
    let mut window = FakeWindow::new(640, 480);
    let mut driver = FrameDriver::new();

    let outcome = driver.draw_frame(&mut renderer, &mut window).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(
        renderer.calls,
        vec![
            Call::Acquire,
            Call::Record(1),
            Call::Submit(1),
            Call::Recreate(RenderSize::new(640, 480)),
        ]
    );
    assert_eq!(driver.frames_presented(), 1);
}

#[test]
fn resize_flag_triggers_recreation_and_is_cleared() {
    let mut renderer = ScriptedRenderer::new(&[], &[]);
    let mut window = FakeWindow::new(1280, 720);
    window.resized = true;
    let mut driver = FrameDriver::new();

    let outcome = driver.draw_frame(&mut renderer, &mut window).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert!(!window.resized);
    assert_eq!(driver.recreations(), 1);

    let next = driver.draw_frame(&mut renderer, &mut window).unwrap();
    assert_eq!(next, FrameOutcome::Presented);
}

#[test]
fn minimized_window_defers_recreation_until_it_has_an_area() {
    let mut renderer = ScriptedRenderer::new(&[Acquire::OutOfDate], &[]);
    let mut window = FakeWindow::new(0, 0);
    let mut driver = FrameDriver::new();

    assert_eq!(
        driver.draw_frame(&mut renderer, &mut window).unwrap(),
        FrameOutcome::Skipped
    );
    // still minimized: no further acquire, no recreate
    assert_eq!(
        driver.draw_frame(&mut renderer, &mut window).unwrap(),
        FrameOutcome::Skipped
    );
    assert_eq!(renderer.calls, vec![Call::Acquire]);

    window.size = RenderSize::new(300, 200);
    assert_eq!(
        driver.draw_frame(&mut renderer, &mut window).unwrap(),
        FrameOutcome::Recreated
    );
    assert_eq!(
        renderer.calls,
        vec![Call::Acquire, Call::Recreate(RenderSize::new(300, 200))]
    );
}

#[test]
fn out_of_date_again_after_recreation_is_fatal() {
    let mut renderer = ScriptedRenderer::new(&[Acquire::OutOfDate, Acquire::OutOfDate], &[]);
    let mut window = FakeWindow::new(800, 600);
    let mut driver = FrameDriver::new();

    driver.draw_frame(&mut renderer, &mut window).unwrap();
    let err = driver.draw_frame(&mut renderer, &mut window).unwrap_err();

    assert!(err.to_string().contains("after recreation"), "{err}");
}

#[test]
fn out_of_date_after_a_new_resize_is_recoverable() {
    let mut renderer = ScriptedRenderer::new(&[Acquire::OutOfDate, Acquire::OutOfDate], &[]);
    let mut window = FakeWindow::new(800, 600);
    let mut driver = FrameDriver::new();

    driver.draw_frame(&mut renderer, &mut window).unwrap();
    window.size = RenderSize::new(900, 600);

    let outcome = driver.draw_frame(&mut renderer, &mut window).unwrap();
    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(driver.recreations(), 2);
}

#[test]
fn renderer_failures_propagate() {
    let mut renderer = ScriptedRenderer::new(&[], &[]);
    renderer.fail_record = true;
    let mut window = FakeWindow::new(800, 600);
    let mut driver = FrameDriver::new();

    let err = driver.draw_frame(&mut renderer, &mut window).unwrap_err();

    assert_eq!(err.to_string(), "device lost");
    assert_eq!(driver.frames_presented(), 0);
}
