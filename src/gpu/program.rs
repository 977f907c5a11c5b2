//! Linked shader programs and their typed bindings.
//!
//! [`Program::new`] introspects both stages (see [`super::reflect`]) and
//! builds one [`Uniform`] per declared uniform and one [`Attribute`] per
//! vertex input. The binding table is fixed for the lifetime of the program.
//!
//! ```ignore
//! let mut screen = Program::new(&ctx, QUAD_VERT, SCREEN_FRAG).await?;
//! screen.attribute_mut("a_pos")?.set(&ctx, &QUAD)?;
//! background.bind_to_unit(&mut ctx, 2)?;
//! screen.set_uniform(&ctx, "u_screen", 2i32)?;
//! screen.set_uniform(&ctx, "u_opacity", 0.996f32)?;
//! screen.draw(&mut ctx, DrawMode::Triangles, 0..6)?;
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::reflect::{AttributeDecl, ProgramLayout, SamplerDecl, UniformDecl};
use super::texture::TextureInner;
use super::{Context, MAX_TEXTURE_UNITS};
use crate::error::{BindingError, CompileError, GpuError, ShaderStage, WindError};
use crate::uniforms::{UniformKind, UniformValue};

/// Size of the uniform buffer behind every value uniform.
const UNIFORM_BUFFER_SIZE: u64 = 16;

/// Primitive assembly for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Triangles,
    Points,
}

impl DrawMode {
    fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            DrawMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
            DrawMode::Points => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// A uniform of a linked program.
pub struct Uniform {
    decl: UniformDecl,
    value: Option<UniformValue>,
    buffer: Option<wgpu::Buffer>,
}

impl Uniform {
    fn new(ctx: &Context, decl: UniformDecl) -> Self {
        let buffer = decl.kind.is_buffered().then(|| {
            ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(&decl.name),
                size: UNIFORM_BUFFER_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        Self {
            decl,
            value: None,
            buffer,
        }
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn kind(&self) -> UniformKind {
        self.decl.kind
    }

    pub fn binding(&self) -> u32 {
        self.decl.binding
    }

    /// Last value written, if any.
    pub fn value(&self) -> Option<UniformValue> {
        self.value
    }

    /// Write a value. Sampler uniforms take a texture unit index.
    pub fn set(&mut self, ctx: &Context, value: impl Into<UniformValue>) -> Result<(), BindingError> {
        let value = value.into();
        if !self.decl.kind.accepts(&value) {
            return Err(BindingError::UniformType {
                name: self.decl.name.clone(),
                expected: self.decl.kind.to_string(),
                found: value.wgsl_type().to_string(),
            });
        }
        if let (UniformKind::Sampler, UniformValue::I32(unit)) = (self.decl.kind, value) {
            if unit < 0 || unit as usize >= MAX_TEXTURE_UNITS {
                return Err(BindingError::InvalidTextureUnit(unit as i64));
            }
        }
        if let Some(buffer) = &self.buffer {
            let mut bytes = Vec::with_capacity(8);
            value.write_bytes(&mut bytes);
            ctx.queue().write_buffer(buffer, 0, &bytes);
        }
        self.value = Some(value);
        Ok(())
    }

    fn texture_unit(&self) -> Option<u32> {
        match (self.decl.kind, self.value) {
            (UniformKind::Sampler, Some(UniformValue::I32(unit))) => Some(unit as u32),
            _ => None,
        }
    }
}

/// A vertex attribute of a linked program, backed by its own vertex buffer.
pub struct Attribute {
    decl: AttributeDecl,
    buffer: Option<wgpu::Buffer>,
    vertices: u32,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    /// Components per vertex.
    pub fn arity(&self) -> u32 {
        self.decl.arity
    }

    /// Number of vertices uploaded so far.
    pub fn len(&self) -> u32 {
        self.vertices
    }

    pub fn is_empty(&self) -> bool {
        self.vertices == 0
    }

    /// Upload one element per vertex; every element must have the declared arity.
    pub fn set<V: AsRef<[f32]>>(&mut self, ctx: &Context, values: &[V]) -> Result<(), BindingError> {
        let mut flat = Vec::with_capacity(values.len() * self.decl.arity as usize);
        for value in values {
            let value = value.as_ref();
            if value.len() != self.decl.arity as usize {
                return Err(BindingError::AttributeArity {
                    name: self.decl.name.clone(),
                    expected: self.decl.arity,
                    found: value.len() as u32,
                });
            }
            flat.extend_from_slice(value);
        }
        self.upload(ctx, &flat, values.len() as u32);
        Ok(())
    }

    /// Upload one scalar per vertex. Only valid for single-component attributes.
    pub fn set_scalars(&mut self, ctx: &Context, values: &[f32]) -> Result<(), BindingError> {
        if self.decl.arity != 1 {
            return Err(BindingError::AttributeArity {
                name: self.decl.name.clone(),
                expected: self.decl.arity,
                found: 1,
            });
        }
        self.upload(ctx, values, values.len() as u32);
        Ok(())
    }

    fn upload(&mut self, ctx: &Context, data: &[f32], vertices: u32) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let reusable = !bytes.is_empty()
            && self
                .buffer
                .as_ref()
                .is_some_and(|buffer| buffer.size() >= bytes.len() as u64);
        if reusable {
            if let Some(buffer) = &self.buffer {
                ctx.queue().write_buffer(buffer, 0, bytes);
            }
        } else {
            // wgpu rejects zero-sized vertex buffers
            let contents: Cow<[u8]> = if bytes.is_empty() {
                Cow::Owned(vec![0u8; 4])
            } else {
                Cow::Borrowed(bytes)
            };
            self.buffer = Some(ctx.device().create_buffer_init(
                &wgpu::util::BufferInitDescriptor {
                    label: Some(&self.decl.name),
                    contents: &contents,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                },
            ));
            log::debug!("attribute '{}': {} vertices", self.decl.name, vertices);
        }
        self.vertices = vertices;
    }

    fn vertex_format(&self) -> wgpu::VertexFormat {
        if self.decl.arity == 2 {
            wgpu::VertexFormat::Float32x2
        } else {
            wgpu::VertexFormat::Float32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    mode: DrawMode,
}

/// A linked vertex + fragment program.
pub struct Program {
    layout: ProgramLayout,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniforms: Vec<Uniform>,
    samplers: Vec<SamplerDecl>,
    attributes: Vec<Attribute>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl Program {
    /// Compile, link and introspect a program.
    ///
    /// Fails with a [`CompileError`] naming the failing stage (or the link
    /// step), or a [`BindingError`] when a declared uniform or attribute type
    /// is outside the supported set. Nothing is kept on failure.
    pub async fn new(ctx: &Context, vertex_source: &str, fragment_source: &str) -> Result<Self, WindError> {
        let layout = ProgramLayout::reflect(vertex_source, fragment_source)?;
        let device = ctx.device();

        let vertex = create_module(device, ShaderStage::Vertex, vertex_source).await?;
        let fragment = create_module(device, ShaderStage::Fragment, fragment_source).await?;

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .uniforms
            .iter()
            .map(|u| wgpu::BindGroupLayoutEntry {
                binding: u.binding,
                visibility: u.visibility.to_wgpu(),
                ty: match u.kind {
                    UniformKind::Sampler => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    _ => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                },
                count: None,
            })
            .collect();
        entries.extend(layout.samplers.iter().map(|s| wgpu::BindGroupLayoutEntry {
            binding: s.binding,
            visibility: s.visibility.to_wgpu(),
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        }));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program bindings"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("program layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniforms = layout
            .uniforms
            .iter()
            .cloned()
            .map(|decl| Uniform::new(ctx, decl))
            .collect();
        let attributes = layout
            .attributes
            .iter()
            .cloned()
            .map(|decl| Attribute {
                decl,
                buffer: None,
                vertices: 0,
            })
            .collect();
        let samplers = layout.samplers.clone();

        Ok(Self {
            layout,
            vertex,
            fragment,
            bind_group_layout,
            pipeline_layout,
            uniforms,
            samplers,
            attributes,
            pipelines: HashMap::new(),
        })
    }

    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }

    pub fn uniforms(&self) -> impl Iterator<Item = &Uniform> {
        self.uniforms.iter()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.iter().find(|u| u.name() == name)
    }

    pub fn uniform_mut(&mut self, name: &str) -> Result<&mut Uniform, BindingError> {
        self.uniforms
            .iter_mut()
            .find(|u| u.name() == name)
            .ok_or_else(|| BindingError::UnknownUniform(name.to_string()))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Result<&mut Attribute, BindingError> {
        self.attributes
            .iter_mut()
            .find(|a| a.name() == name)
            .ok_or_else(|| BindingError::UnknownAttribute(name.to_string()))
    }

    /// Shorthand for `uniform_mut(name)?.set(ctx, value)`.
    pub fn set_uniform(
        &mut self,
        ctx: &Context,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), BindingError> {
        self.uniform_mut(name)?.set(ctx, value)
    }

    /// Issue one draw into the context's current target.
    pub fn draw(&mut self, ctx: &mut Context, mode: DrawMode, vertices: Range<u32>) -> Result<(), WindError> {
        for attribute in &self.attributes {
            if attribute.buffer.is_none() {
                return Err(BindingError::UnsetAttribute(attribute.decl.name.clone()).into());
            }
            if vertices.end > attribute.vertices {
                return Err(BindingError::VertexRange {
                    name: attribute.decl.name.clone(),
                    available: attribute.vertices,
                    requested: vertices.end,
                }
                .into());
            }
        }
        let textures = self.bound_textures(ctx)?;
        if vertices.is_empty() {
            return Ok(());
        }

        let Some(target) = ctx.render_target()? else {
            return Ok(());
        };
        let key = PipelineKey {
            format: target.format,
            blend: ctx.blend(),
            mode,
        };
        if !self.pipelines.contains_key(&key) {
            let pipeline = self.create_pipeline(ctx, key)?;
            self.pipelines.insert(key, pipeline);
        }
        let Some(pipeline) = self.pipelines.get(&key) else {
            return Ok(());
        };

        let mut entries = Vec::with_capacity(self.uniforms.len() + self.samplers.len());
        for uniform in &self.uniforms {
            let resource = match (&uniform.buffer, textures.get(uniform.name())) {
                (Some(buffer), _) => buffer.as_entire_binding(),
                (None, Some(texture)) => wgpu::BindingResource::TextureView(&texture.view),
                (None, None) => return Err(BindingError::UnsetSampler(uniform.decl.name.clone()).into()),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: uniform.binding(),
                resource,
            });
        }
        for sampler in &self.samplers {
            let texture = textures
                .get(&sampler.texture)
                .ok_or_else(|| BindingError::UnsetSampler(sampler.texture.clone()))?;
            entries.push(wgpu::BindGroupEntry {
                binding: sampler.binding,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }

        let device = ctx.device();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("program bind group"),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("draw"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: target.load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            for (slot, attribute) in self.attributes.iter().enumerate() {
                if let Some(buffer) = &attribute.buffer {
                    pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
            }
            pass.draw(vertices, 0..1);
        }
        ctx.queue().submit(std::iter::once(encoder.finish()));
        ctx.record_draw();
        Ok(())
    }

    /// Resolve every sampler uniform to the texture in its unit.
    fn bound_textures(&self, ctx: &Context) -> Result<HashMap<String, Arc<TextureInner>>, BindingError> {
        let mut textures = HashMap::new();
        for uniform in self.uniforms.iter().filter(|u| u.kind() == UniformKind::Sampler) {
            let unit = uniform
                .texture_unit()
                .ok_or_else(|| BindingError::UnsetSampler(uniform.decl.name.clone()))?;
            let texture = ctx
                .texture_unit(unit)
                .ok_or_else(|| BindingError::EmptyTextureUnit {
                    name: uniform.decl.name.clone(),
                    unit,
                })?;
            textures.insert(uniform.decl.name.clone(), Arc::clone(texture));
        }
        Ok(textures)
    }

    fn create_pipeline(&self, ctx: &Context, key: PipelineKey) -> Result<wgpu::RenderPipeline, GpuError> {
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = self
            .attributes
            .iter()
            .map(|a| {
                [wgpu::VertexAttribute {
                    format: a.vertex_format(),
                    offset: 0,
                    shader_location: a.decl.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = self
            .attributes
            .iter()
            .zip(&vertex_attributes)
            .map(|(a, attrs)| wgpu::VertexBufferLayout {
                array_stride: a.decl.arity as u64 * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attrs,
            })
            .collect();

        log::debug!(
            "creating pipeline for {:?} into {:?} (blend: {})",
            key.mode,
            key.format,
            key.blend.is_some()
        );
        let device = ctx.device();
        ctx.with_error_scope("render pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("program pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.vertex,
                    entry_point: Some(self.layout.vertex_entry.as_str()),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.fragment,
                    entry_point: Some(self.layout.fragment_entry.as_str()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend: key.blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: key.mode.topology(),
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })
    }
}

async fn create_module(
    device: &wgpu::Device,
    stage: ShaderStage,
    source: &str,
) -> Result<wgpu::ShaderModule, CompileError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(match stage {
            ShaderStage::Vertex => "vertex stage",
            _ => "fragment stage",
        }),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    match device.pop_error_scope().await {
        Some(err) => Err(CompileError::new(stage, err.to_string())),
        None => Ok(module),
    }
}
