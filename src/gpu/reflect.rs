//! Program introspection using naga.
//!
//! Both stages are parsed and validated before anything is handed to wgpu, so
//! compile failures come back as a [`CompileError`] naming the stage with the
//! compiler's own diagnostic. The validated modules are then walked to build
//! the binding table of the program:
//!
//! - `var<uniform> u_name: f32 | vec2<f32> | i32` become value uniforms,
//! - `var u_name: texture_2d<f32>` becomes a sampler uniform, optionally paired
//!   with `var u_name_sampler: sampler`,
//! - `@location(n)` inputs of the vertex entry point typed `f32` or
//!   `vec2<f32>` become attributes.
//!
//! All resources live in `@group(0)`. A name declared by both stages must use
//! the same binding slot and type; this and the varying interface between the
//! stages are the "link" step.

use std::collections::BTreeMap;

use naga::front::wgsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{BindingError, CompileError, ShaderStage, WindError};
use crate::uniforms::UniformKind;

/// Suffix naming the sampler paired with a texture uniform.
pub const SAMPLER_SUFFIX: &str = "_sampler";

const UNIFORM_TYPES: &str = "f32, vec2<f32>, i32 or texture_2d<f32>";

/// Which stages reference a binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageVisibility {
    pub vertex: bool,
    pub fragment: bool,
}

impl StageVisibility {
    fn of(stage: ShaderStage) -> Self {
        Self {
            vertex: stage == ShaderStage::Vertex,
            fragment: stage == ShaderStage::Fragment,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            vertex: self.vertex || other.vertex,
            fragment: self.fragment || other.fragment,
        }
    }

    pub fn to_wgpu(self) -> wgpu::ShaderStages {
        let mut stages = wgpu::ShaderStages::NONE;
        if self.vertex {
            stages |= wgpu::ShaderStages::VERTEX;
        }
        if self.fragment {
            stages |= wgpu::ShaderStages::FRAGMENT;
        }
        stages
    }
}

/// A uniform found by introspection.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
    pub binding: u32,
    pub visibility: StageVisibility,
}

/// A sampler object paired with the texture uniform `texture`.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDecl {
    pub texture: String,
    pub binding: u32,
    pub visibility: StageVisibility,
}

/// A vertex attribute found by introspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDecl {
    pub name: String,
    pub location: u32,
    /// Number of `f32` components per vertex (1 or 2).
    pub arity: u32,
}

/// Binding table and entry points of a linked program.
#[derive(Clone, Debug)]
pub struct ProgramLayout {
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Sorted by binding slot.
    pub uniforms: Vec<UniformDecl>,
    /// Sorted by binding slot.
    pub samplers: Vec<SamplerDecl>,
    /// Sorted by shader location.
    pub attributes: Vec<AttributeDecl>,
}

impl ProgramLayout {
    /// Compile, validate and link a vertex/fragment pair.
    pub fn reflect(vertex_source: &str, fragment_source: &str) -> Result<Self, WindError> {
        let vertex = compile_stage(vertex_source, ShaderStage::Vertex)?;
        let fragment = compile_stage(fragment_source, ShaderStage::Fragment)?;

        let vertex_ep = find_entry_point(&vertex, ShaderStage::Vertex)?;
        let fragment_ep = find_entry_point(&fragment, ShaderStage::Fragment)?;

        let mut resources = Resources::default();
        resources.collect(&vertex, ShaderStage::Vertex)?;
        resources.collect(&fragment, ShaderStage::Fragment)?;
        let (uniforms, samplers) = resources.finish()?;

        let attributes = collect_attributes(&vertex, vertex_ep)?;
        check_varyings(&vertex, vertex_ep, &fragment, fragment_ep)?;

        log::debug!(
            "reflected program: {} uniform(s), {} sampler(s), {} attribute(s)",
            uniforms.len(),
            samplers.len(),
            attributes.len()
        );

        Ok(Self {
            vertex_entry: vertex_ep.name.clone(),
            fragment_entry: fragment_ep.name.clone(),
            uniforms,
            samplers,
            attributes,
        })
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformDecl> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Parse and validate one stage.
pub fn compile_stage(source: &str, stage: ShaderStage) -> Result<naga::Module, CompileError> {
    let module = wgsl::parse_str(source)
        .map_err(|err| CompileError::new(stage, err.emit_to_string(source)))?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|err| CompileError::new(stage, err.emit_to_string(source)))?;

    Ok(module)
}

fn find_entry_point(
    module: &naga::Module,
    stage: ShaderStage,
) -> Result<&naga::EntryPoint, CompileError> {
    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        _ => naga::ShaderStage::Fragment,
    };
    let mut matching = module.entry_points.iter().filter(|ep| ep.stage == wanted);
    match (matching.next(), matching.next()) {
        (Some(ep), None) => Ok(ep),
        (None, _) => Err(CompileError::new(
            stage,
            format!("no @{} entry point", stage),
        )),
        (Some(_), Some(_)) => Err(CompileError::new(
            stage,
            format!("more than one @{} entry point", stage),
        )),
    }
}

#[derive(Default)]
struct Resources {
    /// name -> uniform
    uniforms: BTreeMap<String, UniformDecl>,
    /// name of the sampler global -> sampler
    samplers: BTreeMap<String, SamplerDecl>,
}

impl Resources {
    fn collect(&mut self, module: &naga::Module, stage: ShaderStage) -> Result<(), WindError> {
        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let name = var.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
            if binding.group != 0 {
                return Err(CompileError::new(
                    stage,
                    format!("'{}' uses @group({}); only @group(0) is supported", name, binding.group),
                )
                .into());
            }

            let inner = &module.types[var.ty].inner;
            let visibility = StageVisibility::of(stage);
            match var.space {
                naga::AddressSpace::Uniform => {
                    let kind = value_kind(inner).ok_or_else(|| BindingError::UniformType {
                        name: name.clone(),
                        expected: UNIFORM_TYPES.to_string(),
                        found: type_name(module, inner),
                    })?;
                    self.add_uniform(name, kind, binding.binding, visibility)?;
                }
                naga::AddressSpace::Handle => match inner {
                    naga::TypeInner::Sampler { comparison: false } => {
                        let texture = name
                            .strip_suffix(SAMPLER_SUFFIX)
                            .ok_or_else(|| {
                                CompileError::new(
                                    ShaderStage::Link,
                                    format!(
                                        "sampler '{}' must be named <texture>{}",
                                        name, SAMPLER_SUFFIX
                                    ),
                                )
                            })?
                            .to_string();
                        self.add_sampler(name, texture, binding.binding, visibility)?;
                    }
                    _ if is_sampled_2d(inner) => {
                        self.add_uniform(name, UniformKind::Sampler, binding.binding, visibility)?;
                    }
                    _ => {
                        return Err(BindingError::UniformType {
                            name,
                            expected: UNIFORM_TYPES.to_string(),
                            found: type_name(module, inner),
                        }
                        .into())
                    }
                },
                _ => {
                    return Err(BindingError::UniformType {
                        name,
                        expected: UNIFORM_TYPES.to_string(),
                        found: format!("{:?} resource", var.space),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    fn add_uniform(
        &mut self,
        name: String,
        kind: UniformKind,
        binding: u32,
        visibility: StageVisibility,
    ) -> Result<(), CompileError> {
        match self.uniforms.get_mut(&name) {
            Some(existing) if existing.kind == kind && existing.binding == binding => {
                existing.visibility = existing.visibility.union(visibility);
            }
            Some(existing) => {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!(
                        "'{}' is declared as {} @binding({}) and {} @binding({})",
                        name, existing.kind, existing.binding, kind, binding
                    ),
                ))
            }
            None => {
                self.uniforms.insert(
                    name.clone(),
                    UniformDecl {
                        name,
                        kind,
                        binding,
                        visibility,
                    },
                );
            }
        }
        Ok(())
    }

    fn add_sampler(
        &mut self,
        name: String,
        texture: String,
        binding: u32,
        visibility: StageVisibility,
    ) -> Result<(), CompileError> {
        match self.samplers.get_mut(&name) {
            Some(existing) if existing.binding == binding => {
                existing.visibility = existing.visibility.union(visibility);
            }
            Some(existing) => {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!(
                        "sampler '{}' is declared at @binding({}) and @binding({})",
                        name, existing.binding, binding
                    ),
                ))
            }
            None => {
                self.samplers.insert(
                    name,
                    SamplerDecl {
                        texture,
                        binding,
                        visibility,
                    },
                );
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(Vec<UniformDecl>, Vec<SamplerDecl>), CompileError> {
        let mut slots: BTreeMap<u32, &str> = BTreeMap::new();
        let names = self
            .uniforms
            .values()
            .map(|u| (u.binding, u.name.as_str()))
            .chain(self.samplers.iter().map(|(n, s)| (s.binding, n.as_str())));
        for (binding, name) in names {
            if let Some(other) = slots.insert(binding, name) {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!("'{}' and '{}' share @binding({})", other, name, binding),
                ));
            }
        }

        for sampler in self.samplers.values() {
            let paired = self
                .uniforms
                .get(&sampler.texture)
                .is_some_and(|u| u.kind == UniformKind::Sampler);
            if !paired {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!(
                        "sampler '{}{}' has no texture named '{}'",
                        sampler.texture, SAMPLER_SUFFIX, sampler.texture
                    ),
                ));
            }
        }

        let mut uniforms: Vec<_> = self.uniforms.into_values().collect();
        uniforms.sort_by_key(|u| u.binding);
        let mut samplers: Vec<_> = self.samplers.into_values().collect();
        samplers.sort_by_key(|s| s.binding);
        Ok((uniforms, samplers))
    }
}

fn value_kind(inner: &naga::TypeInner) -> Option<UniformKind> {
    match inner {
        naga::TypeInner::Scalar(s) if *s == naga::Scalar::F32 => Some(UniformKind::Float),
        naga::TypeInner::Scalar(s) if *s == naga::Scalar::I32 => Some(UniformKind::Int),
        naga::TypeInner::Vector {
            size: naga::VectorSize::Bi,
            scalar,
        } if *scalar == naga::Scalar::F32 => Some(UniformKind::Vec2),
        _ => None,
    }
}

fn is_sampled_2d(inner: &naga::TypeInner) -> bool {
    matches!(
        inner,
        naga::TypeInner::Image {
            dim: naga::ImageDimension::D2,
            arrayed: false,
            class: naga::ImageClass::Sampled {
                kind: naga::ScalarKind::Float,
                multi: false,
            },
        }
    )
}

fn attribute_arity(inner: &naga::TypeInner) -> Option<u32> {
    match inner {
        naga::TypeInner::Scalar(s) if *s == naga::Scalar::F32 => Some(1),
        naga::TypeInner::Vector {
            size: naga::VectorSize::Bi,
            scalar,
        } if *scalar == naga::Scalar::F32 => Some(2),
        _ => None,
    }
}

fn location_of(binding: &Option<naga::Binding>) -> Option<u32> {
    match binding {
        Some(naga::Binding::Location { location, .. }) => Some(*location),
        _ => None,
    }
}

/// Flatten function arguments (or struct members) into `(location, name, type)`.
fn located_inputs<'m>(
    module: &'m naga::Module,
    function: &'m naga::Function,
) -> Vec<(u32, String, naga::Handle<naga::Type>)> {
    let mut inputs = Vec::new();
    for arg in &function.arguments {
        if let Some(location) = location_of(&arg.binding) {
            let name = arg.name.clone().unwrap_or_default();
            inputs.push((location, name, arg.ty));
        } else if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
            for member in members {
                if let Some(location) = location_of(&member.binding) {
                    let name = member.name.clone().unwrap_or_default();
                    inputs.push((location, name, member.ty));
                }
            }
        }
    }
    inputs.sort_by_key(|(location, _, _)| *location);
    inputs
}

fn located_outputs(
    module: &naga::Module,
    function: &naga::Function,
) -> BTreeMap<u32, naga::Handle<naga::Type>> {
    let mut outputs = BTreeMap::new();
    let Some(result) = &function.result else {
        return outputs;
    };
    if let Some(location) = location_of(&result.binding) {
        outputs.insert(location, result.ty);
    } else if let naga::TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
        for member in members {
            if let Some(location) = location_of(&member.binding) {
                outputs.insert(location, member.ty);
            }
        }
    }
    outputs
}

fn collect_attributes(
    module: &naga::Module,
    entry: &naga::EntryPoint,
) -> Result<Vec<AttributeDecl>, BindingError> {
    located_inputs(module, &entry.function)
        .into_iter()
        .map(|(location, name, ty)| {
            let inner = &module.types[ty].inner;
            match attribute_arity(inner) {
                Some(arity) => Ok(AttributeDecl {
                    name,
                    location,
                    arity,
                }),
                None => Err(BindingError::UnsupportedAttribute {
                    name,
                    ty: type_name(module, inner),
                }),
            }
        })
        .collect()
}

fn check_varyings(
    vertex: &naga::Module,
    vertex_ep: &naga::EntryPoint,
    fragment: &naga::Module,
    fragment_ep: &naga::EntryPoint,
) -> Result<(), CompileError> {
    let outputs = located_outputs(vertex, &vertex_ep.function);
    for (location, name, ty) in located_inputs(fragment, &fragment_ep.function) {
        let wanted = &fragment.types[ty].inner;
        match outputs.get(&location) {
            Some(out_ty) if vertex.types[*out_ty].inner == *wanted => {}
            Some(out_ty) => {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!(
                        "varying '{}' @location({}) is {} in the fragment stage but {} in the vertex stage",
                        name,
                        location,
                        type_name(fragment, wanted),
                        type_name(vertex, &vertex.types[*out_ty].inner)
                    ),
                ))
            }
            None => {
                return Err(CompileError::new(
                    ShaderStage::Link,
                    format!(
                        "varying '{}' @location({}) is not written by the vertex stage",
                        name, location
                    ),
                ))
            }
        }
    }
    Ok(())
}

fn scalar_name(scalar: &naga::Scalar) -> String {
    match scalar.kind {
        naga::ScalarKind::Float => format!("f{}", scalar.width * 8),
        naga::ScalarKind::Sint => format!("i{}", scalar.width * 8),
        naga::ScalarKind::Uint => format!("u{}", scalar.width * 8),
        naga::ScalarKind::Bool => "bool".to_string(),
        other => format!("{:?}", other),
    }
}

fn type_name(module: &naga::Module, inner: &naga::TypeInner) -> String {
    match inner {
        naga::TypeInner::Scalar(scalar) => scalar_name(scalar),
        naga::TypeInner::Vector { size, scalar } => {
            format!("vec{}<{}>", *size as u8, scalar_name(scalar))
        }
        naga::TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("mat{}x{}<{}>", *columns as u8, *rows as u8, scalar_name(scalar)),
        naga::TypeInner::Image { dim, arrayed, .. } => {
            format!("texture {:?}{}", dim, if *arrayed { " array" } else { "" })
        }
        naga::TypeInner::Sampler { comparison: true } => "sampler_comparison".to_string(),
        naga::TypeInner::Sampler { comparison: false } => "sampler".to_string(),
        naga::TypeInner::Struct { .. } => module
            .types
            .iter()
            .find(|(_, t)| t.inner == *inner)
            .and_then(|(_, t)| t.name.clone())
            .unwrap_or_else(|| "struct".to_string()),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD_VS: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_pos: vec2<f32>,
};

@vertex
fn main(@location(0) a_pos: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(a_pos * 2.0 - 1.0, 0.0, 1.0);
    out.tex_pos = a_pos;
    return out;
}
"#;

    const SCREEN_FS: &str = r#"
@group(0) @binding(0) var u_screen: texture_2d<f32>;
@group(0) @binding(1) var u_screen_sampler: sampler;
@group(0) @binding(2) var<uniform> u_opacity: f32;

@fragment
fn main(@location(0) tex_pos: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSampleLevel(u_screen, u_screen_sampler, tex_pos, 0.0) * u_opacity;
}
"#;

    #[test]
    fn test_reflect_collects_bindings() {
        let layout = ProgramLayout::reflect(QUAD_VS, SCREEN_FS).unwrap();

        assert_eq!(layout.vertex_entry, "main");
        assert_eq!(layout.attributes.len(), 1);
        assert_eq!(layout.attributes[0].name, "a_pos");
        assert_eq!(layout.attributes[0].arity, 2);

        let screen = layout.uniform("u_screen").unwrap();
        assert_eq!(screen.kind, UniformKind::Sampler);
        assert_eq!(screen.binding, 0);
        assert!(screen.visibility.fragment);
        assert!(!screen.visibility.vertex);

        assert_eq!(layout.uniform("u_opacity").unwrap().kind, UniformKind::Float);
        assert_eq!(layout.samplers.len(), 1);
        assert_eq!(layout.samplers[0].texture, "u_screen");
    }

    #[test]
    fn test_fragment_syntax_error_names_fragment_stage() {
        let err = ProgramLayout::reflect(QUAD_VS, "fn main( {").unwrap_err();
        match err {
            WindError::Compile(e) => {
                assert_eq!(e.stage, ShaderStage::Fragment);
                assert!(!e.log.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_uniform_type_is_rejected() {
        let fs = r#"
@group(0) @binding(0) var<uniform> u_matrix: mat4x4<f32>;

@fragment
fn main(@location(0) tex_pos: vec2<f32>) -> @location(0) vec4<f32> {
    return u_matrix * vec4<f32>(tex_pos, 0.0, 1.0);
}
"#;
        let err = ProgramLayout::reflect(QUAD_VS, fs).unwrap_err();
        match err {
            WindError::Binding(BindingError::UniformType { name, found, .. }) => {
                assert_eq!(name, "u_matrix");
                assert_eq!(found, "mat4x4<f32>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_varying_fails_link() {
        let fs = r#"
@fragment
fn main(@location(3) other: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(other, 0.0, 1.0);
}
"#;
        let err = ProgramLayout::reflect(QUAD_VS, fs).unwrap_err();
        assert!(matches!(
            err,
            WindError::Compile(CompileError {
                stage: ShaderStage::Link,
                ..
            })
        ));
    }

    #[test]
    fn test_binding_collision_fails_link() {
        let fs = r#"
@group(0) @binding(0) var<uniform> u_a: f32;
@group(0) @binding(0) var<uniform> u_b: f32;

@fragment
fn main(@location(0) tex_pos: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(tex_pos, u_a, u_b);
}
"#;
        // naga itself rejects duplicate bindings in one module; either way the
        // program must not be produced.
        assert!(ProgramLayout::reflect(QUAD_VS, fs).is_err());
    }

    #[test]
    fn test_vec4_attribute_is_unsupported() {
        let vs = r#"
@vertex
fn main(@location(0) a_color: vec4<f32>) -> @builtin(position) vec4<f32> {
    return a_color;
}
"#;
        let fs = r#"
@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;
        let err = ProgramLayout::reflect(vs, fs).unwrap_err();
        assert!(matches!(
            err,
            WindError::Binding(BindingError::UnsupportedAttribute { .. })
        ));
    }
}
