//! Windowed host: owns the winit event loop, the GPU backend, and the
//! renderer lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use collageconfig::WallpaperConfig;
use engine::{DiskMediaSource, RenderMode, Renderer, WgpuBackend};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::window::WindowBuilder;

/// Wake interval while idle; dispatcher timers cannot wake the event loop
/// directly, so redraw requests are polled at this cadence.
const IDLE_POLL: Duration = Duration::from_millis(50);

pub fn run_window(config: WallpaperConfig, size: (u32, u32)) -> Result<()> {
    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("PhotoFlux")
            .with_inner_size(PhysicalSize::new(size.0, size.1))
            .build(&event_loop)
            .map_err(|err| anyhow!("failed to create window: {err}"))?,
    );

    let source = DiskMediaSource::new(config.media_paths.clone());
    let mut renderer = Renderer::new(config, Box::new(source), rand::random());
    let mut backend = WgpuBackend::new(window.as_ref(), size.0, size.1)
        .context("failed to initialise the GPU backend")?;

    renderer.on_create();
    renderer.on_surface_created();
    let inner = window.inner_size();
    renderer.on_surface_changed(&mut backend, inner.width, inner.height);
    let handle = renderer.handle();
    window.request_redraw();

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    renderer.on_destroy();
                    elwt.exit();
                }
                WindowEvent::Resized(new_size) => {
                    renderer.on_surface_changed(&mut backend, new_size.width, new_size.height);
                    window.request_redraw();
                }
                WindowEvent::Occluded(occluded) => {
                    if occluded {
                        renderer.on_pause();
                    } else {
                        renderer.on_resume();
                    }
                }
                WindowEvent::RedrawRequested => {
                    renderer.on_draw_frame(&mut backend);
                }
                _ => {}
            },
            Event::AboutToWait => {
                if handle.render_mode() == RenderMode::Continuous || handle.take_redraw_request() {
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                } else {
                    elwt.set_control_flow(ControlFlow::WaitUntil(Instant::now() + IDLE_POLL));
                }
            }
            _ => {}
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))?;
    Ok(())
}
