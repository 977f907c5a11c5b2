//! Owned 2D textures.
//!
//! Every [`Texture`] is RGBA8, clamp-to-edge, and carries its own sampler with
//! the requested [`FilterMode`]. Dimensions are fixed at creation; resizing
//! means creating a new texture. The GPU memory is released when the last
//! reference is dropped, which includes references held by texture units.

use std::sync::Arc;

use image::RgbaImage;

use super::Context;
use crate::error::{BindingError, GpuError};

pub(crate) const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Filter mode for texture sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Exact texel reads. Used for state textures.
    #[default]
    Nearest,
    /// Smooth linear filtering. Used for the wind field and color ramp.
    Linear,
}

impl FilterMode {
    fn to_wgpu(self) -> wgpu::FilterMode {
        match self {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }
}

/// Pixel source for a new texture.
#[derive(Debug, Clone, Copy)]
pub enum TextureData<'a> {
    /// Raw RGBA bytes, `width * height * 4` long.
    Bytes {
        data: &'a [u8],
        width: u32,
        height: u32,
    },
    /// A decoded image; the texture takes its dimensions.
    Image(&'a RgbaImage),
}

impl<'a> TextureData<'a> {
    pub fn bytes(data: &'a [u8], width: u32, height: u32) -> Self {
        TextureData::Bytes {
            data,
            width,
            height,
        }
    }

    fn parts(&self) -> (&'a [u8], u32, u32) {
        match *self {
            TextureData::Bytes {
                data,
                width,
                height,
            } => (data, width, height),
            TextureData::Image(image) => (image.as_raw().as_slice(), image.width(), image.height()),
        }
    }
}

pub(crate) struct TextureInner {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl Drop for TextureInner {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

/// A GPU texture with its sampler.
pub struct Texture {
    inner: Arc<TextureInner>,
    filter: FilterMode,
    label: String,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("label", &self.label)
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("filter", &self.filter)
            .finish()
    }
}

impl Texture {
    /// Create a texture and upload `data`.
    pub fn new(
        ctx: &Context,
        label: &str,
        filter: FilterMode,
        data: TextureData<'_>,
    ) -> Result<Self, GpuError> {
        let (bytes, width, height) = data.parts();
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(GpuError::resource(
                label,
                format!(
                    "expected {} bytes for {}x{} RGBA, got {}",
                    expected,
                    width,
                    height,
                    bytes.len()
                ),
            ));
        }

        let texture = Self::allocate(ctx, label, filter, width, height)?;
        ctx.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.inner.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
        Ok(texture)
    }

    /// Create a texture whose texels are all zero.
    pub fn zeroed(
        ctx: &Context,
        label: &str,
        filter: FilterMode,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let zeros = vec![0u8; width as usize * height as usize * 4];
        Self::new(ctx, label, filter, TextureData::bytes(&zeros, width, height))
    }

    fn allocate(
        ctx: &Context,
        label: &str,
        filter: FilterMode,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let max = ctx.device().limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(GpuError::resource(
                label,
                format!("size {}x{} outside 1..={}", width, height, max),
            ));
        }

        let device = ctx.device();
        let (texture, sampler) = ctx.with_error_scope(label, || {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(width, height),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TEXTURE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter.to_wgpu(),
                min_filter: filter.to_wgpu(),
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });
            (texture, sampler)
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        log::debug!("allocated texture '{}' {}x{} ({:?})", label, width, height, filter);
        Ok(Self {
            inner: Arc::new(TextureInner {
                texture,
                view,
                sampler,
                width,
                height,
            }),
            filter,
            label: label.to_string(),
        })
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Bind into the context's texture unit `unit`.
    pub fn bind_to_unit(&self, ctx: &mut Context, unit: u32) -> Result<(), BindingError> {
        ctx.bind_texture(unit, Arc::clone(&self.inner))
    }

    /// Remove this texture from every unit it is bound to.
    pub fn unbind(&self, ctx: &mut Context) {
        ctx.unbind_texture(&self.inner);
    }

    pub(crate) fn inner(&self) -> &Arc<TextureInner> {
        &self.inner
    }

    /// Copy the texels back to the CPU, tightly packed RGBA.
    pub fn read_pixels(&self, ctx: &Context) -> Result<Vec<u8>, GpuError> {
        read_texture(ctx, &self.inner.texture, self.inner.width, self.inner.height)
    }
}

pub(crate) fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Blocking readback of a 4-byte-per-texel texture.
pub(crate) fn read_texture(
    ctx: &Context,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, GpuError> {
    let device = ctx.device();
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        extent(width, height),
    );
    ctx.queue().submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?;
    rx.recv()
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?
        .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

    let mut pixels = Vec::with_capacity(unpadded as usize * height as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks_exact(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    staging.unmap();
    Ok(pixels)
}
