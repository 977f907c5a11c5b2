//! Error types for windfield.
//!
//! Each concern has its own enum: GPU setup and allocation, shader
//! compilation, binding contracts, asset loading and configuration.
//! [`WindError`] wraps all of them for the engine-level API.

use std::fmt;
use std::path::PathBuf;

/// Errors raised while creating GPU objects.
#[derive(Debug)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    SurfaceCreation(wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    NoAdapter(wgpu::RequestAdapterError),
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// A texture, buffer or pipeline could not be allocated.
    ResourceCreation {
        /// Label of the resource that failed.
        resource: String,
        /// Reason reported by the allocator or validation layer.
        message: String,
    },
    /// The output surface could not provide a frame.
    Surface(wgpu::SurfaceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
}

impl GpuError {
    pub(crate) fn resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        GpuError::ResourceCreation {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::SurfaceCreation(e) => write!(f, "Failed to create GPU surface: {}", e),
            GpuError::NoAdapter(e) => write!(f, "No compatible GPU adapter found: {}", e),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::ResourceCreation { resource, message } => {
                write!(f, "Failed to create GPU resource '{}': {}", resource, message)
            }
            GpuError::Surface(e) => write!(f, "Failed to acquire surface frame: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::SurfaceCreation(e) => Some(e),
            GpuError::NoAdapter(e) => Some(e),
            GpuError::DeviceCreation(e) => Some(e),
            GpuError::Surface(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::CreateSurfaceError> for GpuError {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        GpuError::SurfaceCreation(e)
    }
}

impl From<wgpu::RequestAdapterError> for GpuError {
    fn from(e: wgpu::RequestAdapterError) -> Self {
        GpuError::NoAdapter(e)
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

impl From<wgpu::SurfaceError> for GpuError {
    fn from(e: wgpu::SurfaceError) -> Self {
        GpuError::Surface(e)
    }
}

/// Which part of program construction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    /// Both stages compiled but their interfaces do not fit together.
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
            ShaderStage::Link => write!(f, "link"),
        }
    }
}

/// Shader compilation or link failure, carrying the compiler log.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub stage: ShaderStage,
    pub log: String,
}

impl CompileError {
    pub(crate) fn new(stage: ShaderStage, log: impl Into<String>) -> Self {
        Self {
            stage,
            log: log.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.log)
    }
}

impl std::error::Error for CompileError {}

/// Violations of the uniform/attribute binding contract.
///
/// These are programming errors; they are reported instead of issuing a draw
/// with mismatched state.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingError {
    /// A uniform was declared with, or assigned, a type outside its contract.
    UniformType {
        name: String,
        expected: String,
        found: String,
    },
    /// Attribute values do not match the declared element arity.
    AttributeArity {
        name: String,
        expected: u32,
        found: u32,
    },
    /// An attribute was declared with a type other than `f32` or `vec2<f32>`.
    UnsupportedAttribute { name: String, ty: String },
    /// No active uniform with this name.
    UnknownUniform(String),
    /// No active attribute with this name.
    UnknownAttribute(String),
    /// A draw was issued before the attribute received data.
    UnsetAttribute(String),
    /// A draw was issued before the sampler uniform received a unit.
    UnsetSampler(String),
    /// A sampler uniform points at a unit with no texture bound.
    EmptyTextureUnit { name: String, unit: u32 },
    /// Texture unit index outside the supported range.
    InvalidTextureUnit(i64),
    /// The draw range reads past the data uploaded for an attribute.
    VertexRange {
        name: String,
        available: u32,
        requested: u32,
    },
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingError::UniformType {
                name,
                expected,
                found,
            } => write!(
                f,
                "Uniform '{}' expects {} but was given {}",
                name, expected, found
            ),
            BindingError::AttributeArity {
                name,
                expected,
                found,
            } => write!(
                f,
                "Attribute '{}' has {} component(s) per vertex, got {}",
                name, expected, found
            ),
            BindingError::UnsupportedAttribute { name, ty } => {
                write!(f, "Attribute '{}' has unsupported type {}", name, ty)
            }
            BindingError::UnknownUniform(name) => write!(f, "No active uniform named '{}'", name),
            BindingError::UnknownAttribute(name) => {
                write!(f, "No active attribute named '{}'", name)
            }
            BindingError::UnsetAttribute(name) => {
                write!(f, "Attribute '{}' has no data; call set() before drawing", name)
            }
            BindingError::UnsetSampler(name) => {
                write!(f, "Sampler '{}' has no texture unit assigned", name)
            }
            BindingError::EmptyTextureUnit { name, unit } => write!(
                f,
                "Sampler '{}' reads texture unit {} but no texture is bound there",
                name, unit
            ),
            BindingError::InvalidTextureUnit(unit) => {
                write!(f, "Texture unit {} is out of range", unit)
            }
            BindingError::VertexRange {
                name,
                available,
                requested,
            } => write!(
                f,
                "Draw needs {} vertices but attribute '{}' holds {}",
                requested, name, available
            ),
        }
    }
}

impl std::error::Error for BindingError {}

/// Failures of the asset collaborators (shader text, field metadata, images).
#[derive(Debug)]
pub enum AssetLoadError {
    /// Failed to read a file.
    Io { path: PathBuf, source: std::io::Error },
    /// Failed to decode an image.
    Image(image::ImageError),
    /// Failed to parse field metadata.
    Json(serde_json::Error),
    /// The field data is inconsistent.
    InvalidField(String),
    /// A shader role has no source file.
    MissingShader { role: &'static str, path: PathBuf },
}

impl fmt::Display for AssetLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetLoadError::Io { path, source } => {
                write!(f, "Failed to read '{}': {}", path.display(), source)
            }
            AssetLoadError::Image(e) => write!(f, "Failed to decode image: {}", e),
            AssetLoadError::Json(e) => write!(f, "Failed to parse wind metadata: {}", e),
            AssetLoadError::InvalidField(msg) => write!(f, "Invalid wind field: {}", msg),
            AssetLoadError::MissingShader { role, path } => {
                write!(f, "Missing {} shader: '{}' not found", role, path.display())
            }
        }
    }
}

impl std::error::Error for AssetLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetLoadError::Io { source, .. } => Some(source),
            AssetLoadError::Image(e) => Some(e),
            AssetLoadError::Json(e) => Some(e),
            AssetLoadError::InvalidField(_) | AssetLoadError::MissingShader { .. } => None,
        }
    }
}

impl From<image::ImageError> for AssetLoadError {
    fn from(e: image::ImageError) -> Self {
        AssetLoadError::Image(e)
    }
}

impl From<serde_json::Error> for AssetLoadError {
    fn from(e: serde_json::Error) -> Self {
        AssetLoadError::Json(e)
    }
}

/// Invalid configuration values.
#[derive(Debug)]
pub enum ConfigError {
    /// A numeric option is outside its allowed range.
    OutOfRange {
        option: &'static str,
        value: f64,
        expected: &'static str,
    },
    /// A color string could not be parsed.
    InvalidColor(String),
    /// A ramp stop position is not a number in [0, 1].
    InvalidStop(String),
    /// A color ramp needs at least one stop.
    EmptyRamp,
    /// Failed to read a configuration file.
    Io(std::io::Error),
    /// Failed to parse a configuration file.
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange {
                option,
                value,
                expected,
            } => write!(f, "{} = {} is out of range (expected {})", option, value, expected),
            ConfigError::InvalidColor(s) => write!(f, "Invalid color '{}'", s),
            ConfigError::InvalidStop(s) => write!(f, "Invalid color stop '{}'", s),
            ConfigError::EmptyRamp => write!(f, "Color ramp has no stops"),
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Errors surfaced by the engine and the program wrappers.
#[derive(Debug)]
pub enum WindError {
    Gpu(GpuError),
    Compile(CompileError),
    Binding(BindingError),
    Asset(AssetLoadError),
    Config(ConfigError),
}

impl fmt::Display for WindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindError::Gpu(e) => write!(f, "GPU error: {}", e),
            WindError::Compile(e) => write!(f, "Shader error: {}", e),
            WindError::Binding(e) => write!(f, "Binding error: {}", e),
            WindError::Asset(e) => write!(f, "Asset error: {}", e),
            WindError::Config(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for WindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WindError::Gpu(e) => Some(e),
            WindError::Compile(e) => Some(e),
            WindError::Binding(e) => Some(e),
            WindError::Asset(e) => Some(e),
            WindError::Config(e) => Some(e),
        }
    }
}

impl From<GpuError> for WindError {
    fn from(e: GpuError) -> Self {
        WindError::Gpu(e)
    }
}

impl From<CompileError> for WindError {
    fn from(e: CompileError) -> Self {
        WindError::Compile(e)
    }
}

impl From<BindingError> for WindError {
    fn from(e: BindingError) -> Self {
        WindError::Binding(e)
    }
}

impl From<AssetLoadError> for WindError {
    fn from(e: AssetLoadError) -> Self {
        WindError::Asset(e)
    }
}

impl From<ConfigError> for WindError {
    fn from(e: ConfigError) -> Self {
        WindError::Config(e)
    }
}
