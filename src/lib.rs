//! # windfield
//!
//! GPU-accelerated wind visualization: tens of thousands of particles advected
//! through a 2-D wind field, leaving fading trails.
//!
//! All simulation state lives in textures. Each particle's position is packed
//! into one RGBA8 texel, the wind field is an RGBA8 image whose red and green
//! channels encode the `u` and `v` velocity components, and trails come from
//! drawing every frame over a faded copy of the previous one.
//!
//! ## Quick Start
//!
//! ```ignore
//! use windfield::prelude::*;
//!
//! let ctx = Context::headless(1024, 512).await?;
//! let mut engine = WindEngine::new(ctx, WindConfig::default().with_particle_count(65_536))?;
//! engine.initialize(&ShaderSources::embedded()).await?;
//! engine.set_wind_field(windfield::assets::load_wind_pair("data/2016112000")?)?;
//!
//! loop {
//!     engine.draw()?;
//! }
//! ```
//!
//! ## Layers
//!
//! | Layer | Items |
//! |-------|-------|
//! | Engine | [`WindEngine`], [`WindConfig`] |
//! | Data | [`WindField`], [`ColorRamp`], [`ParticleState`] |
//! | GPU | [`gpu::Context`], [`gpu::Program`], [`gpu::Texture`], [`gpu::Framebuffer`] |
//! | CPU reference | [`software::SoftwareUpdater`] |
//!
//! The [`software`] module runs the same particle update on the CPU. It is used
//! by tests and benchmarks and to check GPU results.

pub mod assets;
pub mod config;
pub mod engine;
pub mod error;
pub mod field;
pub mod gpu;
pub mod logging;
pub mod particles;
pub mod ramp;
pub mod software;
pub mod time;
pub mod uniforms;

pub use assets::ShaderSources;
pub use config::WindConfig;
pub use engine::WindEngine;
pub use error::{AssetLoadError, BindingError, CompileError, ConfigError, GpuError, ShaderStage, WindError};
pub use field::{WindField, WindMeta, WindRange};
pub use glam::Vec2;
pub use particles::{ParticleState, PingPong};
pub use ramp::{ColorRamp, ColorStop, Palette, Rgba};
pub use uniforms::{UniformKind, UniformValue};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use windfield::prelude::*;
/// ```
pub mod prelude {
    pub use crate::assets::ShaderSources;
    pub use crate::config::WindConfig;
    pub use crate::engine::WindEngine;
    pub use crate::error::WindError;
    pub use crate::field::{WindField, WindRange};
    pub use crate::gpu::{Context, OffscreenSurface, OutputSurface};
    pub use crate::ramp::{ColorRamp, Palette, Rgba};
    pub use crate::time::FrameTimer;
    pub use crate::Vec2;
}
