#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;
use iced_wgpu::wgpu;
use iced_winit::winit;
use iced_winit::winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use iced_winit::winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use iced_winit::winit::keyboard::{KeyCode, PhysicalKey};
use tokio::runtime::Runtime;

use imagecloud::capabilities::Capabilities;
use imagecloud::config::Config;
use imagecloud::logging::{export_debug_logs, get_log_directory, setup_logger, setup_panic_hook, LogBuffer};
use imagecloud::manifest::Manifest;
use imagecloud::message::{Command, Event};
use imagecloud::picking::ClickTracker;
use imagecloud::render::{PickingPass, Renderer};
use imagecloud::settings::UserSettings;
use imagecloud::utils::debounce::Debounce;
use imagecloud::utils::timing::{ScopedTimer, TimingStats};
use imagecloud::{AppContext, Picker};

const PAN_STEP: f32 = 40.0;
const ZOOM_STEP: f32 = 1.1;
const FLY_TO_HEIGHT: f32 = 60.0;
const SLOW_FRAME: Duration = Duration::from_millis(33);

#[derive(Parser, Debug)]
#[command(name = "imagecloud")]
#[command(about = "Browse very large image collections as an interactive point cloud")]
struct Cli {
    /// Path to the dataset manifest (JSON)
    manifest: PathBuf,

    /// Custom settings file, defaults to <config_dir>/imagecloud/settings.yaml
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Stream every atlas without opening a window and report progress
    #[arg(long)]
    headless: bool,

    /// Write the captured debug log on exit
    #[arg(long)]
    export_logs: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_buffer = setup_logger();
    setup_panic_hook(log_buffer.clone());

    let settings = UserSettings::load(cli.settings.as_deref());
    let config = Config::from_settings(&settings);

    let manifest = match Manifest::from_file(&cli.manifest) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Cannot load manifest {:?}: {}", cli.manifest, e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = if cli.headless {
        run_headless(manifest, config, &runtime)
    } else {
        run_windowed(manifest, config, &runtime)
    };

    if cli.export_logs {
        export_logs(&log_buffer);
    }
    code
}

fn export_logs(log_buffer: &LogBuffer) {
    match export_debug_logs(&get_log_directory(), log_buffer) {
        Ok(path) => println!("Debug logs written to {}", path.display()),
        Err(e) => eprintln!("Failed to export debug logs: {e}"),
    }
}

fn run_headless(manifest: Manifest, config: Config, runtime: &Runtime) -> ExitCode {
    let caps = match Capabilities::new(config.texture_edge_cap, 16, u32::MAX) {
        Ok(caps) => caps,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut ctx = match AppContext::new(manifest, config, &caps, runtime.handle().clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    ctx.start();
    let mut failures = 0;
    loop {
        for event in ctx.tick(Instant::now()) {
            match event {
                Event::LoadProgress(percent) => println!("Loading... {percent}%"),
                Event::StreamingFailed { atlas, reason } => {
                    failures += 1;
                    eprintln!("Atlas {atlas} failed: {reason}");
                }
                Event::Ready => println!("Ready: {} cells in {} textures", ctx.dataset.len(), ctx.dataset.texture_count()),
                _ => {}
            }
        }
        if ctx.is_ready() || ctx.loader.is_settled() {
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run_windowed(manifest: Manifest, config: Config, runtime: &Runtime) -> ExitCode {
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!("Cannot create the event loop: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let resize = Debounce::new(config.resize_debounce);
    let mut runner = Runner::Loading {
        manifest: Some(manifest),
        config,
        handle: runtime.handle().clone(),
        resize,
        failed: false,
    };

    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {}", e);
        return ExitCode::FAILURE;
    }
    match runner {
        Runner::Loading { failed: true, .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

struct Gpu {
    window: Arc<winit::window::Window>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    format: wgpu::TextureFormat,
}

impl Gpu {
    fn configure(&self, width: u32, height: u32) {
        self.surface.configure(
            &self.device,
            &wgpu::SurfaceConfiguration {
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                format: self.format,
                width: width.max(1),
                height: height.max(1),
                present_mode: wgpu::PresentMode::AutoVsync,
                alpha_mode: wgpu::CompositeAlphaMode::Auto,
                view_formats: vec![],
                desired_maximum_frame_latency: 2,
            },
        );
    }
}

/// Picks through the GPU pass using the state of the current frame.
struct GpuPicker<'a> {
    gpu: &'a Gpu,
    renderer: &'a Renderer,
    picking: &'a PickingPass,
    cell_count: usize,
}

impl Picker for GpuPicker<'_> {
    fn pick(&mut self, x: u32, y: u32) -> Option<usize> {
        self.picking
            .pick(&self.gpu.device, &self.gpu.queue, self.renderer, x, y, self.cell_count)
    }
}

#[allow(clippy::large_enum_variant)]
enum Runner {
    Loading {
        manifest: Option<Manifest>,
        config: Config,
        handle: tokio::runtime::Handle,
        resize: Debounce<(u32, u32)>,
        failed: bool,
    },
    Ready {
        gpu: Gpu,
        ctx: AppContext,
        renderer: Renderer,
        picking: PickingPass,
        clicks: ClickTracker,
        cursor: Option<(f64, f64)>,
        resize: Debounce<(u32, u32)>,
        size: (u32, u32),
        selected: Option<usize>,
        frame_stats: TimingStats,
    },
}

fn init_gpu(event_loop: &ActiveEventLoop, config: &Config) -> Result<Gpu, String> {
    let window = Arc::new(
        event_loop
            .create_window(
                winit::window::WindowAttributes::default()
                    .with_inner_size(winit::dpi::PhysicalSize::new(config.window_width, config.window_height))
                    .with_title("imagecloud")
                    .with_resizable(true),
            )
            .map_err(|e| format!("create window: {e}"))?,
    );

    let backends = wgpu::util::backend_bits_from_env().unwrap_or_default();
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    let surface = instance
        .create_surface(window.clone())
        .map_err(|e| format!("create surface: {e}"))?;

    let (format, device, queue) = futures::executor::block_on(async {
        let adapter = wgpu::util::initialize_adapter_from_env_or_default(&instance, Some(&surface))
            .await
            .ok_or_else(|| "no suitable graphics adapter".to_string())?;
        info!("Adapter: {:?}", adapter.get_info());

        let capabilities = surface.get_capabilities(&adapter);
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| format!("request device: {e}"))?;

        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(wgpu::TextureFormat::is_srgb)
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| "surface reports no formats".to_string())?;
        Ok::<_, String>((format, device, queue))
    })?;

    let gpu = Gpu {
        window,
        device,
        queue,
        surface,
        format,
    };
    let size = gpu.window.inner_size();
    gpu.configure(size.width, size.height);
    Ok(gpu)
}

impl Runner {
    fn next_layout(ctx: &AppContext) -> Option<String> {
        let names: Vec<&str> = ctx.dataset.layout_names().collect();
        let current = names.iter().position(|n| *n == ctx.dataset.current_layout())?;
        names.get((current + 1) % names.len()).map(|n| n.to_string())
    }

    fn on_events(events: Vec<Event>, selected: &mut Option<usize>, window: &winit::window::Window) {
        for event in events {
            match event {
                Event::LoadProgress(percent) => window.set_title(&format!("imagecloud - loading {percent}%")),
                Event::Ready => window.set_title("imagecloud"),
                Event::LayoutChanged(name) => window.set_title(&format!("imagecloud - {name}")),
                Event::Picked(cell) => *selected = cell,
                Event::StreamingFailed { atlas, reason } => {
                    error!("Atlas {} is unavailable: {}", atlas, reason);
                }
            }
        }
    }

    fn redraw(&mut self) {
        let Self::Ready {
            gpu,
            ctx,
            renderer,
            picking,
            resize,
            size,
            selected,
            frame_stats,
            ..
        } = self
        else {
            return;
        };

        let _timer = ScopedTimer::new(frame_stats);
        let now = Instant::now();

        if let Some((width, height)) = resize.poll(now) {
            *size = (width, height);
            gpu.configure(width, height);
            ctx.resize(width, height);
            picking.resize(&gpu.device, width, height);
        }

        let events = ctx.tick(now);
        Self::on_events(events, selected, &gpu.window);

        let transition = ctx.transition_percent(now);
        let point_scale = ctx.config.point_scale;
        renderer.prepare(
            &gpu.device,
            &gpu.queue,
            &ctx.camera,
            point_scale,
            transition,
            ctx.loader.textures_mut(),
            &mut ctx.lod,
            &mut ctx.batches,
        );

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                gpu.configure(size.0, size.1);
                return;
            }
            Err(e) => {
                warn!("Skipping frame: {}", e);
                return;
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });
        renderer.render(&view, &mut encoder);
        gpu.queue.submit(Some(encoder.finish()));
        frame.present();
    }

    fn command(&mut self, command: Command) {
        let Self::Ready {
            gpu,
            ctx,
            renderer,
            picking,
            selected,
            ..
        } = self
        else {
            return;
        };
        let mut picker = GpuPicker {
            gpu,
            renderer,
            picking,
            cell_count: ctx.dataset.len(),
        };
        if let Some(event) = ctx.handle_command(command, Some(&mut picker)) {
            Self::on_events(vec![event], selected, &gpu.window);
        }
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Self::Ready { ctx, selected, .. } = self else {
            return;
        };
        let command = match key {
            KeyCode::Escape => {
                event_loop.exit();
                None
            }
            KeyCode::Tab => Self::next_layout(ctx).map(Command::ChangeLayout),
            KeyCode::KeyF => selected.and_then(|cell| {
                let target = ctx.dataset.cells.get(cell)?.target;
                Some(Command::FlyTo(target + Vec3::new(0.0, 0.0, FLY_TO_HEIGHT)))
            }),
            KeyCode::KeyO => Some(Command::FlyTo(Vec3::new(0.0, 0.0, ctx.config.layout_spread * 2.5))),
            KeyCode::ArrowLeft => {
                ctx.camera.pan(-PAN_STEP, 0.0);
                None
            }
            KeyCode::ArrowRight => {
                ctx.camera.pan(PAN_STEP, 0.0);
                None
            }
            KeyCode::ArrowUp => {
                ctx.camera.pan(0.0, PAN_STEP);
                None
            }
            KeyCode::ArrowDown => {
                ctx.camera.pan(0.0, -PAN_STEP);
                None
            }
            KeyCode::Equal => {
                ctx.camera.zoom(1.0 / ZOOM_STEP);
                None
            }
            KeyCode::Minus => {
                ctx.camera.zoom(ZOOM_STEP);
                None
            }
            _ => None,
        };
        if let Some(command) = command {
            self.command(command);
        }
    }
}

impl winit::application::ApplicationHandler for Runner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Self::Loading {
            manifest,
            config,
            handle,
            resize,
            failed,
        } = self
        else {
            return;
        };
        info!("resumed()...");

        let Some(manifest) = manifest.take() else {
            return;
        };
        let gpu = match init_gpu(event_loop, config) {
            Ok(gpu) => gpu,
            Err(e) => {
                error!("Graphics initialization failed: {}", e);
                *failed = true;
                event_loop.exit();
                return;
            }
        };

        let ctx = Capabilities::from_limits(&gpu.device.limits())
            .and_then(|caps| AppContext::new(manifest, config.clone(), &caps, handle.clone()).map(|ctx| (ctx, caps)));
        let (ctx, caps) = match ctx {
            Ok(pair) => pair,
            Err(e) => {
                error!("{}", e);
                *failed = true;
                event_loop.exit();
                return;
            }
        };

        let texture_count = ctx.dataset.texture_count();
        let units = caps.atlas_texture_units().min(texture_count.max(1) as u32);
        let renderer = Renderer::new(
            &gpu.device,
            gpu.format,
            units,
            texture_count,
            ctx.lod.lod_edge(),
            &ctx.batches,
        );
        let inner = gpu.window.inner_size();
        let picking = PickingPass::new(&gpu.device, &renderer, inner.width, inner.height);

        ctx.start();
        event_loop.set_control_flow(ControlFlow::Poll);

        let resize = std::mem::replace(resize, Debounce::new(config.resize_debounce));
        *self = Self::Ready {
            gpu,
            ctx,
            renderer,
            picking,
            clicks: ClickTracker::new(),
            cursor: None,
            resize,
            size: (inner.width, inner.height),
            selected: None,
            frame_stats: TimingStats::new("Frame", SLOW_FRAME),
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::RedrawRequested => self.redraw(),
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.on_key(event_loop, key),
            _ => {}
        }

        let Self::Ready {
            ctx,
            clicks,
            cursor,
            resize,
            size,
            ..
        } = self
        else {
            return;
        };
        let pick = match event {
            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    resize.push((new_size.width, new_size.height), Instant::now());
                }
                None
            }
            WindowEvent::CursorMoved { position, .. } => {
                *cursor = Some((position.x, position.y));
                None
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                ctx.camera.zoom(ZOOM_STEP.powf(-lines));
                None
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match (state, *cursor) {
                (ElementState::Pressed, Some(position)) => {
                    clicks.press(position, *size);
                    None
                }
                (ElementState::Released, Some(position)) => clicks.release(position, *size),
                _ => None,
            },
            _ => None,
        };
        if let Some((x, y)) = pick {
            self.command(Command::Pick { x, y });
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Self::Ready { gpu, .. } = self {
            gpu.window.request_redraw();
        }
    }
}
