// main.rs — 窗口、事件循环、状态栏与导出调度

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use winit::{
    dpi::PhysicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use panorama_animator::animation::{AnimationTrack, Preset};
use panorama_animator::cli::{self, CliCommand};
use panorama_animator::config::{ExportSettings, ViewerConfig};
use panorama_animator::export::{self, ExportPipeline, ExportReport, ExportRequest, PngSequenceSink};
use panorama_animator::input::{DispatchOutcome, InputDispatcher, InputEvent, KeyAction};
use panorama_animator::media::{self, MediaSource};
use panorama_animator::panorama::ViewMode;
use panorama_animator::renderer::{ContextSlot, OffscreenRenderer, Renderer};
use panorama_animator::view::ViewController;
use panorama_animator::{PanoramaError, Result};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let program = std::env::args().next().unwrap_or_else(|| "panorama_animator".to_string());
    let path = match cli::parse_args(std::env::args_os()) {
        CliCommand::Help => {
            println!("{}", cli::usage(&program));
            return;
        }
        CliCommand::Invalid(reason) => {
            log::error!("{reason}");
            println!("{}", cli::usage(&program));
            std::process::exit(1);
        }
        CliCommand::View(path) => path,
    };

    if let Err(e) = run(path) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(path: PathBuf) -> Result<()> {
    let config = ViewerConfig::load().unwrap_or_else(|e| {
        log::warn!("{e}; falling back to default settings");
        ViewerConfig::default()
    });

    let source = media::open(&path)?;
    let kind = source.kind();
    let (first_frame, mut video) = match source {
        MediaSource::Image(img) => (img, None),
        MediaSource::Video(mut video) => (video.next_frame()?, Some(video)),
    };

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Panorama Animator")
            .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
            .build(&event_loop)
            .map_err(|e| PanoramaError::GraphicsSetup(e.to_string()))?,
    );

    let mut renderer = pollster::block_on(Renderer::new(window.clone(), first_frame, config.vsync))?;
    let mut input = InputDispatcher::new(ViewController::new(ViewMode::Perspective, config.controls), kind);
    let exports = ExportPipeline::new();
    let (report_tx, report_rx): (Sender<Result<ExportReport>>, Receiver<Result<ExportReport>>) =
        channel();

    let mut cursor = (0.0f64, 0.0f64);
    let mut last_tick = Instant::now();
    let mut last_export: Option<String> = None;

    // FPS 计算
    let mut fps_window_start = Instant::now();
    let mut frame_count = 0u32;
    let mut fps = 0.0f32;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => {
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,

                    WindowEvent::Resized(new_size) => renderer.resize(new_size),
                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        renderer.resize(*new_inner_size)
                    }

                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                state,
                                virtual_keycode: Some(key),
                                ..
                            },
                        ..
                    } => {
                        if key == VirtualKeyCode::Escape && state == ElementState::Pressed {
                            *control_flow = ControlFlow::Exit;
                            return;
                        }
                        let Some(action) = key_action(key) else {
                            return;
                        };
                        let event = match state {
                            ElementState::Pressed => InputEvent::KeyPressed(action),
                            ElementState::Released => InputEvent::KeyReleased(action),
                        };
                        if input.dispatch(event) == DispatchOutcome::ExportRequested {
                            start_export(&input, &renderer, &exports, &config.export, &report_tx);
                        }
                    }

                    WindowEvent::MouseInput {
                        state,
                        button: MouseButton::Left,
                        ..
                    } => {
                        let event = match state {
                            ElementState::Pressed => InputEvent::ButtonPressed { cursor },
                            ElementState::Released => InputEvent::ButtonReleased { cursor },
                        };
                        input.dispatch(event);
                    }

                    WindowEvent::CursorMoved { position, .. } => {
                        cursor = (position.x, position.y);
                        input.dispatch(InputEvent::CursorMoved { cursor });
                    }

                    WindowEvent::MouseWheel { delta, .. } => {
                        let dy = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                        };
                        input.dispatch(InputEvent::Scroll { dy });
                    }

                    _ => {}
                }
            }

            Event::MainEventsCleared => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;
                input.frame(dt);

                while let Ok(result) = report_rx.try_recv() {
                    last_export = Some(describe_export(&result));
                }

                if let Some(video) = video.as_mut() {
                    match video.next_frame() {
                        Ok(frame) => {
                            renderer.upload_panorama(frame);
                        }
                        Err(e) => {
                            log::error!("{e}");
                            *control_flow = ControlFlow::ExitWithCode(1);
                            return;
                        }
                    }
                }

                window.request_redraw();
            }

            Event::RedrawRequested(_) => {
                frame_count += 1;
                let now = Instant::now();
                let elapsed = now.duration_since(fps_window_start).as_secs_f32();
                if elapsed >= 1.0 {
                    fps = frame_count as f32 / elapsed;
                    frame_count = 0;
                    fps_window_start = now;
                }

                let camera = input.controller_mut().camera(renderer.aspect_ratio());
                let status = StatusLine::capture(&input, exports.is_exporting(), last_export.as_deref(), fps);
                let result = renderer.render_with_ui(&window, &camera, |ctx| draw_status(ctx, &status));

                match result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.reconfigure(),
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("GPU out of memory");
                        *control_flow = ControlFlow::ExitWithCode(1);
                    }
                    Err(e) => log::warn!("render error: {e:?}"),
                }
            }

            _ => {}
        }
    })
}

fn key_action(key: VirtualKeyCode) -> Option<KeyAction> {
    let action = match key {
        VirtualKeyCode::Key1 => KeyAction::Perspective,
        VirtualKeyCode::Key2 => KeyAction::LittlePlanet,
        VirtualKeyCode::Key3 => KeyAction::CrystalBall,
        VirtualKeyCode::F1 => KeyAction::PlayRotate,
        VirtualKeyCode::F2 => KeyAction::PlaySwipe,
        VirtualKeyCode::F3 => KeyAction::PlaySwipeRotate,
        VirtualKeyCode::F4 => KeyAction::PlayRotateCompact,
        VirtualKeyCode::P => KeyAction::Export,
        VirtualKeyCode::W => KeyAction::PitchUp,
        VirtualKeyCode::S => KeyAction::PitchDown,
        VirtualKeyCode::A => KeyAction::YawLeft,
        VirtualKeyCode::D => KeyAction::YawRight,
        _ => return None,
    };
    Some(action)
}

/// Export the active animation, on a worker thread or inline depending on
/// `settings.background`. The outcome lands on `reports` either way.
fn start_export(
    input: &InputDispatcher,
    renderer: &Renderer,
    exports: &ExportPipeline,
    settings: &ExportSettings,
    reports: &Sender<Result<ExportReport>>,
) {
    let Some(playback) = input.controller().playback() else {
        log::warn!("{}", PanoramaError::NoActiveAnimation);
        return;
    };

    let track = playback.track();
    let request = ExportRequest {
        fps: settings.fps,
        width: settings.width,
        height: settings.height,
    };
    let dir = settings.output_dir.join(playback.preset().label().to_lowercase());
    let slot = renderer.context_slot();
    log::info!("export of {} -> {}", playback.preset().label(), dir.display());

    if settings.background {
        let job = move || export_frames(&slot, &track, &request, dir);
        if let Err(e) = exports.spawn_reporting(job, reports.clone()) {
            log::warn!("export not started: {e}");
        }
    } else {
        let result = exports
            .try_begin()
            .and_then(|_ticket| export_frames(&slot, &track, &request, dir));
        let _ = reports.send(result);
    }
}

fn export_frames(
    slot: &ContextSlot,
    track: &AnimationTrack,
    request: &ExportRequest,
    dir: PathBuf,
) -> Result<ExportReport> {
    slot.lease(|ctx| {
        let mut renderer = OffscreenRenderer::new(ctx, request.width, request.height)?;
        let mut sink = PngSequenceSink::create(dir)?;
        export::render_track(track, request, &mut renderer, &mut sink)
    })
}

fn describe_export(result: &Result<ExportReport>) -> String {
    match result {
        Ok(report) => {
            log::info!(
                "export finished: {} frames ({:.2}s @ {} fps, {}x{})",
                report.frames,
                report.duration,
                report.fps,
                report.width,
                report.height
            );
            format!("exported {} frames", report.frames)
        }
        Err(e) => {
            log::error!("export failed: {e}");
            format!("export failed: {e}")
        }
    }
}

struct StatusLine {
    mode: ViewMode,
    fov: f32,
    yaw: f32,
    pitch: f32,
    animation: Option<(Preset, f32)>,
    exporting: bool,
    last_export: Option<String>,
    fps: f32,
}

impl StatusLine {
    fn capture(input: &InputDispatcher, exporting: bool, last_export: Option<&str>, fps: f32) -> Self {
        let controller = input.controller();
        let state = controller.state();
        Self {
            mode: state.mode,
            fov: state.fov,
            yaw: state.yaw,
            pitch: state.pitch,
            animation: controller.playback().map(|p| (p.preset(), p.fraction())),
            exporting,
            last_export: last_export.map(str::to_owned),
            fps,
        }
    }
}

fn draw_status(ctx: &egui::Context, status: &StatusLine) {
    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if status.exporting {
                ui.label(egui::RichText::new("Exporting…").color(egui::Color32::YELLOW));
                ui.label("|");
            }

            ui.label(status.mode.label());
            ui.label("|");
            ui.label(format!("FOV: {:.1}°", status.fov));
            ui.label("|");
            ui.label(format!("Yaw: {:.1}°", status.yaw));
            ui.label("|");
            ui.label(format!("Pitch: {:.1}°", status.pitch));

            if let Some((preset, fraction)) = status.animation {
                ui.label("|");
                ui.label(format!("{} {:.0}%", preset.label(), fraction * 100.0));
            }

            if let Some(last) = &status.last_export {
                ui.label("|");
                ui.label(last);
            }

            ui.label("|");
            ui.label(egui::RichText::new(format!("FPS: {:.1}", status.fps)).color(egui::Color32::GREEN));
        });
    });
}
