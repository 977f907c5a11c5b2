use std::sync::Arc;

use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use windfield::error::GpuError;
use windfield::gpu::{self, Context, OutputSurface, SurfaceFrame};
use windfield::time::FrameTimer;
use windfield::{ColorRamp, Palette, ShaderSources, WindConfig, WindEngine, WindError, WindField};

/// Swapchain-backed output.
struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl WindowSurface {
    fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let caps = surface.get_capabilities(adapter);
        let format = gpu::preferred_surface_format(&caps.formats).ok_or_else(|| GpuError::ResourceCreation {
            resource: "window surface".to_string(),
            message: "the adapter supports no formats for this surface".to_string(),
        })?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);
        Ok(Self { surface, config })
    }
}

impl OutputSurface for WindowSurface {
    fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn acquire(&mut self, device: &wgpu::Device) -> Result<Option<SurfaceFrame>, GpuError> {
        match self.surface.get_current_texture() {
            Ok(texture) => Ok(Some(SurfaceFrame::from_surface_texture(texture))),
            Err(wgpu::SurfaceError::OutOfMemory) => Err(GpuError::Surface(wgpu::SurfaceError::OutOfMemory)),
            Err(e) => {
                log::warn!("surface unavailable ({e}), reconfiguring");
                self.surface.configure(device, &self.config);
                Ok(None)
            }
        }
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(device, &self.config);
    }
}

/// What the demo shows.
pub struct DemoOptions {
    pub shaders: ShaderSources,
    pub config: WindConfig,
    pub field: WindField,
}

async fn create_engine(window: Arc<Window>, options: DemoOptions) -> Result<WindEngine, WindError> {
    let size = window.inner_size();
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let surface = instance
        .create_surface(window)
        .map_err(GpuError::SurfaceCreation)?;
    let (adapter, device, queue) = gpu::request_device(&instance, Some(&surface)).await?;

    let output = WindowSurface::new(surface, &adapter, &device, size.width, size.height)?;
    let ctx = Context::new(device, queue, Box::new(output));

    let mut engine = WindEngine::new(ctx, options.config)?;
    engine.initialize(&options.shaders).await?;
    engine.set_wind_field(options.field)?;
    Ok(engine)
}

pub struct App {
    options: Option<DemoOptions>,
    window: Option<Arc<Window>>,
    engine: Option<WindEngine>,
    timer: FrameTimer,
    palette: Palette,
}

impl App {
    pub fn new(options: DemoOptions) -> Self {
        Self {
            options: Some(options),
            window: None,
            engine: None,
            timer: FrameTimer::new(),
            palette: Palette::default(),
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, code: KeyCode) {
        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::Space => {
                self.timer.toggle_pause();
                log::info!("{}", if self.timer.is_paused() { "paused" } else { "resumed" });
            }
            KeyCode::KeyC => {
                let Some(engine) = &mut self.engine else { return };
                self.palette = self.palette.next();
                if let Err(e) = engine.set_color_ramp(&ColorRamp::from_palette(self.palette)) {
                    log::error!("failed to switch palette: {e}");
                } else {
                    log::info!("palette: {:?}", self.palette);
                }
            }
            KeyCode::BracketRight | KeyCode::BracketLeft => {
                let Some(engine) = &mut self.engine else { return };
                let count = engine.particle_count();
                let count = if code == KeyCode::BracketRight {
                    count.saturating_mul(2)
                } else {
                    (count / 2).max(1)
                };
                match engine.set_particle_count(count) {
                    Ok(()) => log::info!("{} particles", engine.particle_count()),
                    Err(e) => log::warn!("{e}"),
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let Some(options) = self.options.take() else { return };

        let window_attrs = Window::default_attributes()
            .with_title("windfield")
            .with_inner_size(winit::dpi::LogicalSize::new(1024, 512));
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(create_engine(window.clone(), options)) {
            Ok(engine) => {
                self.engine = Some(engine);
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("failed to start: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(engine) = &mut self.engine {
                    if let Err(e) = engine.resize(size.width, size.height) {
                        log::error!("resize failed: {e}");
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, code),
            WindowEvent::RedrawRequested => {
                if let Some(engine) = &mut self.engine {
                    if !self.timer.is_paused() {
                        if let Err(e) = engine.draw() {
                            log::error!("draw failed: {e}");
                            event_loop.exit();
                            return;
                        }
                        if let Some(fps) = self.timer.tick() {
                            log::info!("{:.1} fps ({} frames)", fps, engine.stats().frames);
                        }
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}
