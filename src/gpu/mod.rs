//! GPU resource layer.
//!
//! [`Context`] owns the wgpu device and queue plus the small amount of state
//! the drawing protocol needs between calls: which texture sits in each
//! texture unit, where draws currently go (the output surface or an attached
//! texture), the blend state, and per-frame bookkeeping.
//!
//! Draws are recorded and submitted one at a time so that uniform and vertex
//! writes made between two draws are seen by the second draw only.

pub mod framebuffer;
pub mod program;
pub mod reflect;
pub mod texture;

use std::sync::Arc;

use crate::error::{BindingError, GpuError};
use texture::{TextureInner, TEXTURE_FORMAT};

pub use framebuffer::{Framebuffer, FramebufferBinding};
pub use program::{Attribute, DrawMode, Program, Uniform};
pub use texture::{FilterMode, Texture, TextureData};

/// Number of texture units a program can sample from.
pub const MAX_TEXTURE_UNITS: usize = 8;

/// A frame acquired from an [`OutputSurface`].
pub struct SurfaceFrame {
    view: wgpu::TextureView,
    presentable: Option<wgpu::SurfaceTexture>,
}

impl SurfaceFrame {
    /// A frame that needs no presentation step (off-screen targets).
    pub fn offscreen(view: wgpu::TextureView) -> Self {
        Self {
            view,
            presentable: None,
        }
    }

    /// A frame backed by a window surface texture.
    pub fn from_surface_texture(texture: wgpu::SurfaceTexture) -> Self {
        let view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            view,
            presentable: Some(texture),
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    fn present(self) {
        if let Some(texture) = self.presentable {
            texture.present();
        }
    }
}

/// The visible output that draws go to when no framebuffer is attached.
pub trait OutputSurface {
    /// Current size in pixels.
    fn size(&self) -> (u32, u32);

    fn format(&self) -> wgpu::TextureFormat;

    /// Get the frame to draw into. `Ok(None)` skips the frame.
    fn acquire(&mut self, device: &wgpu::Device) -> Result<Option<SurfaceFrame>, GpuError>;

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32);

    /// Read the last rendered frame, if the surface supports it.
    fn read_pixels(&self, _ctx: &Context) -> Option<Result<Vec<u8>, GpuError>> {
        None
    }
}

/// An [`OutputSurface`] backed by a plain texture, for headless rendering.
pub struct OffscreenSurface {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

impl OffscreenSurface {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self {
            texture: Self::create_texture(device, width, height),
            width,
            height,
        }
    }

    fn create_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen surface"),
            size: texture::extent(width.max(1), height.max(1)),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }
}

impl OutputSurface for OffscreenSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> wgpu::TextureFormat {
        TEXTURE_FORMAT
    }

    fn acquire(&mut self, _device: &wgpu::Device) -> Result<Option<SurfaceFrame>, GpuError> {
        let view = self
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Some(SurfaceFrame::offscreen(view)))
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.texture.destroy();
        self.texture = Self::create_texture(device, width, height);
        self.width = width;
        self.height = height;
    }

    fn read_pixels(&self, ctx: &Context) -> Option<Result<Vec<u8>, GpuError>> {
        Some(texture::read_texture(
            ctx,
            &self.texture,
            self.width.max(1),
            self.height.max(1),
        ))
    }
}

/// Counters for tests and frame statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub draw_calls: u64,
    pub frames: u64,
}

/// Where a draw is recorded.
pub(crate) struct RenderTarget {
    pub(crate) view: wgpu::TextureView,
    pub(crate) format: wgpu::TextureFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) load: wgpu::LoadOp<wgpu::Color>,
}

/// Device, queue and drawing state shared by every resource.
pub struct Context {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Box<dyn OutputSurface>,
    frame: Option<SurfaceFrame>,
    frame_cleared: bool,
    units: [Option<Arc<TextureInner>>; MAX_TEXTURE_UNITS],
    attached: Option<Arc<TextureInner>>,
    blend: Option<wgpu::BlendState>,
    clear_color: wgpu::Color,
    stats: DrawStats,
}

impl Context {
    /// Wrap an existing device and queue drawing into `surface`.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface: Box<dyn OutputSurface>) -> Self {
        Self {
            device,
            queue,
            surface,
            frame: None,
            frame_cleared: false,
            units: Default::default(),
            attached: None,
            blend: None,
            clear_color: wgpu::Color::TRANSPARENT,
            stats: DrawStats::default(),
        }
    }

    /// Create a device on any available adapter and render into an
    /// [`OffscreenSurface`] of the given size.
    pub async fn headless(width: u32, height: u32) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let (_adapter, device, queue) = request_device(&instance, None).await?;
        let surface = OffscreenSurface::new(&device, width, height);
        Ok(Self::new(device, queue, Box::new(surface)))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface.size()
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface.format()
    }

    /// Resize the output surface. Any acquired frame is dropped unpresented.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.frame = None;
        self.frame_cleared = false;
        self.surface.resize(&self.device, width, height);
    }

    /// Read back the output surface, when it supports readback.
    pub fn read_surface(&self) -> Option<Result<Vec<u8>, GpuError>> {
        self.surface.read_pixels(self)
    }

    pub fn set_clear_color(&mut self, color: wgpu::Color) {
        self.clear_color = color;
    }

    pub fn stats(&self) -> DrawStats {
        self.stats
    }

    /// Put a texture into unit `unit`, replacing whatever was there.
    pub(crate) fn bind_texture(&mut self, unit: u32, texture: Arc<TextureInner>) -> Result<(), BindingError> {
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or(BindingError::InvalidTextureUnit(unit as i64))?;
        *slot = Some(texture);
        Ok(())
    }

    pub(crate) fn texture_unit(&self, unit: u32) -> Option<&Arc<TextureInner>> {
        self.units.get(unit as usize).and_then(|u| u.as_ref())
    }

    /// Empty every unit that holds `texture`.
    pub(crate) fn unbind_texture(&mut self, texture: &Arc<TextureInner>) {
        for slot in &mut self.units {
            if slot.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, texture)) {
                *slot = None;
            }
        }
    }

    /// Whether any texture sits in `unit`.
    pub fn is_unit_bound(&self, unit: u32) -> bool {
        self.texture_unit(unit).is_some()
    }

    pub(crate) fn attach(&mut self, texture: Arc<TextureInner>) {
        self.attached = Some(texture);
    }

    pub(crate) fn detach(&mut self) {
        self.attached = None;
    }

    /// Blend state for subsequent draws; `None` replaces the destination.
    pub fn set_blend(&mut self, blend: Option<wgpu::BlendState>) {
        self.blend = blend;
    }

    pub fn blend(&self) -> Option<wgpu::BlendState> {
        self.blend
    }

    /// Resolve the current render target. Returns `None` when the surface has
    /// no frame to give this time.
    pub(crate) fn render_target(&mut self) -> Result<Option<RenderTarget>, GpuError> {
        if let Some(texture) = &self.attached {
            return Ok(Some(RenderTarget {
                view: texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                format: TEXTURE_FORMAT,
                width: texture.width,
                height: texture.height,
                load: wgpu::LoadOp::Load,
            }));
        }

        if self.frame.is_none() {
            self.frame = self.surface.acquire(&self.device)?;
        }
        let Some(frame) = &self.frame else {
            log::warn!("output surface returned no frame; skipping draw");
            return Ok(None);
        };

        let load = if self.frame_cleared {
            wgpu::LoadOp::Load
        } else {
            wgpu::LoadOp::Clear(self.clear_color)
        };
        self.frame_cleared = true;
        let (width, height) = self.surface.size();
        Ok(Some(RenderTarget {
            view: frame.view().clone(),
            format: self.surface.format(),
            width,
            height,
            load,
        }))
    }

    pub(crate) fn record_draw(&mut self) {
        self.stats.draw_calls += 1;
    }

    /// Present the current frame, if one was drawn into.
    pub fn present(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        self.frame_cleared = false;
        self.stats.frames += 1;
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    pub(crate) fn with_error_scope<T>(&self, resource: &str, f: impl FnOnce() -> T) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(out_of_memory) {
            Some(err) => Err(GpuError::resource(resource, err.to_string())),
            None => Ok(value),
        }
    }
}

/// Pick a swapchain format from `formats`, preferring non-sRGB ones since
/// trails are blended in 8-bit unorm. `None` when the list is empty.
pub fn preferred_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .find(|f| !f.is_srgb())
        .or_else(|| formats.first())
        .copied()
}

/// Request an adapter and a device with default limits.
pub async fn request_device(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), GpuError> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface,
            force_fallback_adapter: false,
        })
        .await?;
    log::info!("using adapter: {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("windfield device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        })
        .await?;
    Ok((adapter, device, queue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat;

    #[test]
    fn test_surface_format_prefers_linear() {
        let formats = [TextureFormat::Bgra8UnormSrgb, TextureFormat::Bgra8Unorm];
        assert_eq!(preferred_surface_format(&formats), Some(TextureFormat::Bgra8Unorm));
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [TextureFormat::Rgba8UnormSrgb, TextureFormat::Bgra8UnormSrgb];
        assert_eq!(preferred_surface_format(&formats), Some(TextureFormat::Rgba8UnormSrgb));
    }

    #[test]
    fn test_surface_without_formats_has_no_choice() {
        assert_eq!(preferred_surface_format(&[]), None);
    }
}
