//! The two GPU programs of the peeler.
//!
//! - [`LayerProgram`] draws scene geometry into one render target per pass,
//!   rejecting fragments that are not behind the previous pass's depth;
//!   wireframe edges are instanced quads `line_width` pixels wide
//! - [`CompositeProgram`] blends one layer over the destination with a
//!   full-screen quad
//!
//! Both are built once by [`ShaderLibrary::new`]. Uniform slots are reflected
//! from the WGSL source at that point and cached; a build or reflection
//! failure is returned as [`PeelError::ShaderCompile`].
//!
//! # Bind groups
//!
//! | Program   | Group | Contents                                         |
//! |-----------|-------|--------------------------------------------------|
//! | layer     | 0     | per-pass uniforms (dynamic offset, one per pass) |
//! | layer     | 1     | per-draw uniforms (dynamic offset, one per draw) |
//! | layer     | 2     | mesh texture and sampler                         |
//! | layer     | 3     | previous pass depth                              |
//! | composite | 0     | `show_depth`                                     |
//! | composite | 1     | layer color and depth                            |

use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;
use crate::mesh::{LineSegment, Vertex};
use crate::reflect::{ReflectError, Reflection, UniformSlot, UniformType};
use crate::render_target::{COLOR_FORMAT, DEPTH_FORMAT};
use crate::texture;

const LAYER_SOURCE: &str = include_str!("shaders/layer.wgsl");
const COMPOSITE_SOURCE: &str = include_str!("shaders/composite.wgsl");

/// Vertex layout of the full-screen quad: one `vec2<f32>` position.
pub(crate) const QUAD_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 8,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[wgpu::VertexAttribute {
        offset: 0,
        shader_location: 0,
        format: wgpu::VertexFormat::Float32x2,
    }],
};

/// Slots of the per-pass uniform block (group 0 of the layer program).
#[derive(Clone, Copy, Debug)]
pub(crate) struct PassSlots {
    pub view: UniformSlot,
    pub proj: UniformSlot,
    pub light_position: UniformSlot,
    pub viewport_width: UniformSlot,
    pub viewport_height: UniformSlot,
    pub first_pass: UniformSlot,
}

/// Slots of the per-draw uniform block (group 1 of the layer program).
#[derive(Clone, Copy, Debug)]
pub(crate) struct DrawSlots {
    pub model: UniformSlot,
    pub normal_matrix: UniformSlot,
    pub specular_exponent: UniformSlot,
    pub lighting_factor: UniformSlot,
    pub texture_factor: UniformSlot,
    pub fixed_color: UniformSlot,
    pub use_fixed_color: UniformSlot,
    pub line_width: UniformSlot,
}

/// Slots of the composite program's uniform block.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CompositeSlots {
    pub show_depth: UniformSlot,
}

/// Layer-shading program: pipelines, layouts and cached uniform slots.
pub struct LayerProgram {
    pub(crate) face_pipeline: wgpu::RenderPipeline,
    pub(crate) line_pipeline: wgpu::RenderPipeline,
    pub(crate) pass_layout: wgpu::BindGroupLayout,
    pub(crate) draw_layout: wgpu::BindGroupLayout,
    pub(crate) depth_layout: wgpu::BindGroupLayout,
    pub(crate) pass_slots: PassSlots,
    pub(crate) draw_slots: DrawSlots,
    /// Size of the per-pass uniform block in bytes.
    pub(crate) pass_size: u32,
    /// Size of the per-draw uniform block in bytes.
    pub(crate) draw_size: u32,
    reflection: Reflection,
}

/// Composite program: pipeline, layouts and cached uniform slots.
pub struct CompositeProgram {
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) uniform_layout: wgpu::BindGroupLayout,
    pub(crate) layer_layout: wgpu::BindGroupLayout,
    pub(crate) slots: CompositeSlots,
    pub(crate) uniform_size: u32,
    reflection: Reflection,
}

/// Owns the layer and composite programs.
pub struct ShaderLibrary {
    pub layer: LayerProgram,
    pub composite: CompositeProgram,
}

impl ShaderLibrary {
    /// Compiles both programs. `target_format` is the destination the
    /// composite program blends into.
    pub fn new(gpu: &GpuContext, target_format: wgpu::TextureFormat) -> Result<Self> {
        let layer = LayerProgram::new(gpu)?;
        let composite = CompositeProgram::new(gpu, target_format)?;
        log::debug!("Shader library built for {:?}", target_format);
        Ok(Self { layer, composite })
    }
}

impl LayerProgram {
    const LABEL: &'static str = "Layer Program";

    fn new(gpu: &GpuContext) -> Result<Self> {
        let reflection = Reflection::from_wgsl(LAYER_SOURCE).map_err(|e| compile_error(Self::LABEL, e))?;
        let (pass_slots, draw_slots) =
            Self::resolve(&reflection).map_err(|e| compile_error(Self::LABEL, e))?;
        let pass_size = block_size(&reflection, 0, Self::LABEL)?;
        let draw_size = block_size(&reflection, 1, Self::LABEL)?;

        let device = &gpu.device;
        let (built, error) = gpu.scoped(wgpu::ErrorFilter::Validation, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Layer Shader"),
                source: wgpu::ShaderSource::Wgsl(LAYER_SOURCE.into()),
            });

            let pass_layout = uniform_layout(gpu, "Pass Uniforms Layout", true, pass_size);
            let draw_layout = uniform_layout(gpu, "Draw Uniforms Layout", true, draw_size);

            let texture_layout = texture::bind_group_layout(device);

            let depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Previous Depth Layout"),
                entries: &[depth_entry(0)],
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Layer Pipeline Layout"),
                bind_group_layouts: &[&pass_layout, &draw_layout, &texture_layout, &depth_layout],
                push_constant_ranges: &[],
            });

            let face_pipeline = Self::pipeline(
                gpu,
                &shader,
                &pipeline_layout,
                "Layer Face Pipeline",
                ("vs", Vertex::LAYOUT),
                wgpu::CompareFunction::Less,
            );
            // wireframe sits exactly on its faces, so it must pass at equal depth
            let line_pipeline = Self::pipeline(
                gpu,
                &shader,
                &pipeline_layout,
                "Layer Line Pipeline",
                ("vs_line", LineSegment::LAYOUT),
                wgpu::CompareFunction::LessEqual,
            );

            (face_pipeline, line_pipeline, pass_layout, draw_layout, depth_layout)
        });
        if let Some(e) = error {
            return Err(compile_error(Self::LABEL, e));
        }
        let (face_pipeline, line_pipeline, pass_layout, draw_layout, depth_layout) =
            built;

        Ok(Self {
            face_pipeline,
            line_pipeline,
            pass_layout,
            draw_layout,
            depth_layout,
            pass_slots,
            draw_slots,
            pass_size,
            draw_size,
            reflection,
        })
    }

    fn resolve(r: &Reflection) -> std::result::Result<(PassSlots, DrawSlots), ReflectError> {
        use UniformType::*;
        let pass = PassSlots {
            view: r.require("view", Mat4)?,
            proj: r.require("proj", Mat4)?,
            light_position: r.require("light_position", Vec3)?,
            viewport_width: r.require("viewport_width", F32)?,
            viewport_height: r.require("viewport_height", F32)?,
            first_pass: r.require("first_pass", U32)?,
        };
        let draw = DrawSlots {
            model: r.require("model", Mat4)?,
            normal_matrix: r.require("normal_matrix", Mat4)?,
            specular_exponent: r.require("specular_exponent", F32)?,
            lighting_factor: r.require("lighting_factor", F32)?,
            texture_factor: r.require("texture_factor", F32)?,
            fixed_color: r.require("fixed_color", Vec4)?,
            use_fixed_color: r.require("use_fixed_color", U32)?,
            line_width: r.require("line_width", F32)?,
        };
        Ok((pass, draw))
    }

    fn pipeline(
        gpu: &GpuContext,
        shader: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        label: &str,
        (entry_point, vertex_layout): (&str, wgpu::VertexBufferLayout<'static>),
        depth_compare: wgpu::CompareFunction,
    ) -> wgpu::RenderPipeline {
        gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some(entry_point),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    /// The reflected slot of any layer uniform, by name.
    pub fn uniform(&self, name: &str) -> Option<UniformSlot> {
        self.reflection.slot(name)
    }
}

impl CompositeProgram {
    const LABEL: &'static str = "Composite Program";

    fn new(gpu: &GpuContext, target_format: wgpu::TextureFormat) -> Result<Self> {
        let reflection =
            Reflection::from_wgsl(COMPOSITE_SOURCE).map_err(|e| compile_error(Self::LABEL, e))?;
        let slots = CompositeSlots {
            show_depth: reflection
                .require("show_depth", UniformType::U32)
                .map_err(|e| compile_error(Self::LABEL, e))?,
        };
        let uniform_size = block_size(&reflection, 0, Self::LABEL)?;

        let device = &gpu.device;
        let (built, error) = gpu.scoped(wgpu::ErrorFilter::Validation, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Composite Shader"),
                source: wgpu::ShaderSource::Wgsl(COMPOSITE_SOURCE.into()),
            });

            let uniform_layout = uniform_layout(gpu, "Composite Uniforms Layout", false, uniform_size);

            let layer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Composite Layer Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    depth_entry(1),
                ],
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Composite Pipeline Layout"),
                bind_group_layouts: &[&uniform_layout, &layer_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Composite Pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs"),
                    buffers: &[QUAD_LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

            (pipeline, uniform_layout, layer_layout)
        });
        if let Some(e) = error {
            return Err(compile_error(Self::LABEL, e));
        }
        let (pipeline, uniform_layout, layer_layout) = built;

        Ok(Self {
            pipeline,
            uniform_layout,
            layer_layout,
            slots,
            uniform_size,
            reflection,
        })
    }

    /// The reflected slot of any composite uniform, by name.
    pub fn uniform(&self, name: &str) -> Option<UniformSlot> {
        self.reflection.slot(name)
    }
}

fn compile_error(label: &str, log: impl std::fmt::Display) -> PeelError {
    PeelError::ShaderCompile {
        label: label.to_string(),
        log: log.to_string(),
    }
}

fn block_size(reflection: &Reflection, group: u32, label: &str) -> Result<u32> {
    reflection
        .block(group)
        .map(|b| b.size)
        .ok_or_else(|| compile_error(label, format!("no uniform block in group {}", group)))
}

fn uniform_layout(gpu: &GpuContext, label: &str, dynamic: bool, size: u32) -> wgpu::BindGroupLayout {
    gpu.device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: dynamic,
                    min_binding_size: wgpu::BufferSize::new(size as u64),
                },
                count: None,
            }],
        })
}

fn depth_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_source_declares_every_uniform() {
        let r = Reflection::from_wgsl(LAYER_SOURCE).unwrap();
        let (pass, draw) = LayerProgram::resolve(&r).unwrap();
        assert_eq!(pass.view.group, 0);
        assert_eq!(draw.model.group, 1);
        assert_eq!(pass.proj.offset, 64);
        assert_eq!(pass.light_position.offset, 128);
        assert_eq!(pass.viewport_width.offset, 140);
        assert_eq!(pass.first_pass.offset, 148);
        assert_eq!(draw.fixed_color.offset, 128);
        assert_eq!(draw.texture_factor.offset, 152);
        assert_eq!(draw.use_fixed_color.offset, 156);
        assert_eq!(draw.line_width.offset, 160);
        assert_eq!(r.block(0).unwrap().size, 160);
        assert_eq!(r.block(1).unwrap().size, 176);
    }

    #[test]
    fn composite_source_declares_show_depth() {
        let r = Reflection::from_wgsl(COMPOSITE_SOURCE).unwrap();
        let slot = r.require("show_depth", UniformType::U32).unwrap();
        assert_eq!((slot.group, slot.offset), (0, 0));
    }

    #[test]
    fn compile_error_keeps_label_and_log() {
        let err = compile_error("Layer Program", ReflectError::MissingUniform("proj".into()));
        match err {
            PeelError::ShaderCompile { label, log } => {
                assert_eq!(label, "Layer Program");
                assert!(log.contains("proj"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
