//! Uniform values and the closed set of uniform types a program may declare.
//!
//! The declared type of every uniform is resolved once, when the program is
//! introspected, into a [`UniformKind`]. Writing a value is then a plain match
//! on that kind; there is no runtime type code involved.
//!
//! ```ignore
//! program.uniform_mut("u_opacity")?.set(ctx, 0.996f32)?;
//! program.uniform_mut("u_wind_min")?.set(ctx, (-21.3f32, -21.6f32))?;
//! program.uniform_mut("u_wind")?.set(ctx, 0i32)?; // texture unit
//! ```

use glam::Vec2;
use std::fmt;

/// Uniform types supported by the binding layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformKind {
    /// `var<uniform> name: f32`
    Float,
    /// `var<uniform> name: vec2<f32>`
    Vec2,
    /// `var<uniform> name: i32`
    Int,
    /// `var name: texture_2d<f32>`, assigned a texture unit index.
    Sampler,
}

impl UniformKind {
    /// Get the WGSL type name for this kind.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformKind::Float => "f32",
            UniformKind::Vec2 => "vec2<f32>",
            UniformKind::Int => "i32",
            UniformKind::Sampler => "texture_2d<f32>",
        }
    }

    /// Whether a value of this variant may be written to a uniform of this kind.
    pub fn accepts(&self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (UniformKind::Float, UniformValue::F32(_))
                | (UniformKind::Vec2, UniformValue::Vec2(_))
                | (UniformKind::Int, UniformValue::I32(_))
                | (UniformKind::Sampler, UniformValue::I32(_))
        )
    }

    /// Whether values of this kind live in a uniform buffer.
    pub fn is_buffered(&self) -> bool {
        !matches!(self, UniformKind::Sampler)
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl_type())
    }
}

/// A value written to a uniform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    Vec2(Vec2),
    /// Integer uniforms and sampler texture units.
    I32(i32),
}

impl UniformValue {
    /// Get the WGSL type name for this value.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformValue::F32(_) => "f32",
            UniformValue::Vec2(_) => "vec2<f32>",
            UniformValue::I32(_) => "i32",
        }
    }

    /// Write this value to a byte buffer.
    pub fn write_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            UniformValue::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            UniformValue::Vec2(v) => {
                buf.extend_from_slice(&v.x.to_le_bytes());
                buf.extend_from_slice(&v.y.to_le_bytes());
            }
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::I32(v as i32)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<(f32, f32)> for UniformValue {
    fn from((x, y): (f32, f32)) -> Self {
        UniformValue::Vec2(Vec2::new(x, y))
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(Vec2::from_array(v))
    }
}
