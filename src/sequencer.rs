//! Per-frame pass ordering and the peeling passes.
//!
//! [`plan_frame`] fixes the order of a frame as plain data: peeling passes
//! ascend `0..N` and each reads the depth of the pass before it, compositing
//! descends `N-1..=0`. [`PassSequencer::execute`] walks the peel steps of that
//! plan on the GPU; the compositor walks the composite order.
//!
//! Every peeling pass is encoded into its own command buffer and submitted on
//! the one queue in order. The queue guarantees pass k sees everything pass
//! k-1 wrote, so no fences are issued between passes.

use glam::{Mat4, Vec4};

use crate::camera::CameraMatrices;
use crate::draw::{DrawFlags, FrameOptions};
use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;
use crate::reflect::{UniformData, round_up};
use crate::render_target::{DEPTH_FORMAT, RenderTargetPool, SENTINEL_DEPTH};
use crate::scene::SceneObject;
use crate::shader::ShaderLibrary;

/// One peeling pass: render into `target`, rejecting fragments that are not
/// behind the depth recorded in `input`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeelStep {
    pub target: usize,
    /// Target whose depth this pass peels behind; `None` for the first pass.
    pub input: Option<usize>,
}

impl PeelStep {
    pub fn is_first(&self) -> bool {
        self.input.is_none()
    }
}

/// The complete ordering of one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    pub peel: Vec<PeelStep>,
    pub composite: Vec<usize>,
}

impl FramePlan {
    pub fn layers(&self) -> usize {
        self.peel.len()
    }
}

/// Plans a frame over `layers` render targets.
///
/// ```
/// use lamina::plan_frame;
///
/// let plan = plan_frame(3);
/// assert_eq!(plan.peel[2].input, Some(1));
/// assert_eq!(plan.composite, vec![2, 1, 0]);
/// ```
pub fn plan_frame(layers: usize) -> FramePlan {
    let peel = (0..layers)
        .map(|k| PeelStep {
            target: k,
            input: k.checked_sub(1),
        })
        .collect();
    let composite = (0..layers).rev().collect();
    FramePlan { peel, composite }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DrawKind {
    Faces,
    Lines,
}

/// One draw call repeated in every pass of a frame.
#[derive(Clone, Copy, Debug)]
struct Draw {
    object: usize,
    kind: DrawKind,
}

fn collect_draws(scene: &[SceneObject]) -> Vec<Draw> {
    let mut draws = Vec::new();
    for (object, item) in scene.iter().enumerate() {
        if item.flags.show_faces && item.binding.triangle_count > 0 {
            draws.push(Draw {
                object,
                kind: DrawKind::Faces,
            });
        }
        if item.flags.show_lines && item.binding.line_count > 0 {
            draws.push(Draw {
                object,
                kind: DrawKind::Lines,
            });
        }
    }
    draws
}

/// Color a draw outputs in place of shading: the line color for wireframes,
/// including fully transparent ones.
fn fixed_color(kind: DrawKind, flags: &DrawFlags) -> Option<Vec4> {
    match kind {
        DrawKind::Faces => None,
        DrawKind::Lines => Some(flags.line_color.to_vec4()),
    }
}

/// Inverse transpose of the model-view matrix, negated when normals are flipped.
fn normal_matrix(view: Mat4, model: Mat4, invert: bool) -> Mat4 {
    let m = (view * model).inverse().transpose();
    if invert { -m } else { m }
}

/// Runs the N peeling passes of a frame.
pub struct PassSequencer {
    layers: usize,
    pass_buffer: wgpu::Buffer,
    pass_bind_group: wgpu::BindGroup,
    pass_stride: u32,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    draw_stride: u32,
    draw_capacity: usize,
    /// Bound as "previous depth" by the first pass, which never reads it.
    placeholder_depth: wgpu::BindGroup,
    /// `depth_bind_groups[k]` exposes target k's depth to pass k + 1.
    depth_bind_groups: Vec<wgpu::BindGroup>,
}

impl PassSequencer {
    const INITIAL_DRAWS: usize = 16;

    pub fn new(gpu: &GpuContext, shaders: &ShaderLibrary, pool: &RenderTargetPool) -> Result<Self> {
        let program = &shaders.layer;
        let alignment = gpu.device.limits().min_uniform_buffer_offset_alignment;
        let pass_stride = round_up(program.pass_size, alignment);
        let draw_stride = round_up(program.draw_size, alignment);
        let layers = pool.len();

        let ((pass_buffer, draw_buffer, placeholder), error) =
            gpu.allocating(|| {
                let pass_buffer = uniform_buffer(gpu, "Pass Uniforms", pass_stride as u64 * layers as u64);
                let draw_buffer = uniform_buffer(
                    gpu,
                    "Draw Uniforms",
                    draw_stride as u64 * Self::INITIAL_DRAWS as u64,
                );
                let placeholder = gpu.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Placeholder Depth"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                });
                (pass_buffer, draw_buffer, placeholder)
            });
        if let Some(e) = error {
            return Err(PeelError::ResourceAllocation(e.to_string()));
        }

        let pass_bind_group = uniform_bind_group(
            gpu,
            &program.pass_layout,
            &pass_buffer,
            program.pass_size,
            "Pass Uniforms Bind Group",
        );
        let draw_bind_group = uniform_bind_group(
            gpu,
            &program.draw_layout,
            &draw_buffer,
            program.draw_size,
            "Draw Uniforms Bind Group",
        );
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());
        let placeholder_depth = depth_bind_group(gpu, shaders, &placeholder_view, "Placeholder Depth");

        Ok(Self {
            layers,
            pass_buffer,
            pass_bind_group,
            pass_stride,
            draw_buffer,
            draw_bind_group,
            draw_stride,
            draw_capacity: Self::INITIAL_DRAWS,
            placeholder_depth,
            depth_bind_groups: Self::depth_bind_groups(gpu, shaders, pool),
        })
    }

    /// Rebuilds the bindings that reference render targets. Called after the
    /// pool reallocates.
    pub fn rebind(&mut self, gpu: &GpuContext, shaders: &ShaderLibrary, pool: &RenderTargetPool) {
        self.depth_bind_groups = Self::depth_bind_groups(gpu, shaders, pool);
    }

    fn depth_bind_groups(
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        pool: &RenderTargetPool,
    ) -> Vec<wgpu::BindGroup> {
        pool.iter()
            .enumerate()
            .map(|(i, target)| {
                depth_bind_group(gpu, shaders, &target.depth_view, &format!("Layer {} Depth Input", i))
            })
            .collect()
    }

    fn ensure_draw_capacity(&mut self, gpu: &GpuContext, shaders: &ShaderLibrary, draws: usize) -> Result<()> {
        if draws <= self.draw_capacity {
            return Ok(());
        }
        let capacity = draws.next_power_of_two();
        let (buffer, error) = gpu.allocating(|| {
            uniform_buffer(gpu, "Draw Uniforms", self.draw_stride as u64 * capacity as u64)
        });
        if let Some(e) = error {
            return Err(PeelError::ResourceAllocation(e.to_string()));
        }
        self.draw_bind_group = uniform_bind_group(
            gpu,
            &shaders.layer.draw_layout,
            &buffer,
            shaders.layer.draw_size,
            "Draw Uniforms Bind Group",
        );
        self.draw_buffer = buffer;
        self.draw_capacity = capacity;
        log::debug!("Draw uniform capacity grown to {}", capacity);
        Ok(())
    }

    /// Uploads the frame's uniforms and runs every peel step of `plan`.
    ///
    /// Validation errors of a pass are appended to `diagnostics` and the
    /// remaining passes still run. Returns the number of draw calls per pass.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &mut self,
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        pool: &RenderTargetPool,
        plan: &FramePlan,
        scene: &[SceneObject],
        camera: &CameraMatrices,
        options: &FrameOptions,
        diagnostics: &mut Vec<String>,
    ) -> Result<usize> {
        debug_assert_eq!(plan.layers(), self.layers);
        let program = &shaders.layer;
        let draws = collect_draws(scene);
        self.ensure_draw_capacity(gpu, shaders, draws.len())?;

        // per-pass uniforms, one slot per pass
        let mut staging = vec![0u8; self.pass_stride as usize * self.layers];
        for (i, step) in plan.peel.iter().enumerate() {
            let slots = &program.pass_slots;
            let mut data = UniformData::new(program.pass_size);
            data.set_mat4(slots.view, camera.view);
            data.set_mat4(slots.proj, camera.proj);
            data.set_vec3(slots.light_position, options.light_position);
            data.set_f32(slots.viewport_width, pool.width() as f32);
            data.set_f32(slots.viewport_height, pool.height() as f32);
            data.set_u32(slots.first_pass, step.is_first() as u32);
            let start = i * self.pass_stride as usize;
            staging[start..start + data.as_bytes().len()].copy_from_slice(data.as_bytes());
        }
        gpu.queue.write_buffer(&self.pass_buffer, 0, &staging);

        // per-draw uniforms, identical in every pass
        if !draws.is_empty() {
            let mut staging = vec![0u8; self.draw_stride as usize * draws.len()];
            for (i, draw) in draws.iter().enumerate() {
                let slots = &program.draw_slots;
                let object = &scene[draw.object];
                let fixed_color = fixed_color(draw.kind, &object.flags);
                let mut data = UniformData::new(program.draw_size);
                data.set_mat4(slots.model, object.model);
                data.set_mat4(
                    slots.normal_matrix,
                    normal_matrix(camera.view, object.model, object.flags.invert_normals),
                );
                data.set_f32(slots.specular_exponent, options.shininess);
                data.set_f32(slots.lighting_factor, options.lighting_factor);
                data.set_f32(slots.texture_factor, if object.flags.show_texture { 1.0 } else { 0.0 });
                data.set_vec4(slots.fixed_color, fixed_color.unwrap_or(Vec4::ZERO));
                data.set_u32(slots.use_fixed_color, fixed_color.is_some() as u32);
                data.set_f32(slots.line_width, object.flags.line_width);
                let start = i * self.draw_stride as usize;
                staging[start..start + data.as_bytes().len()].copy_from_slice(data.as_bytes());
            }
            gpu.queue.write_buffer(&self.draw_buffer, 0, &staging);
        }

        let background = options.background.to_wgpu();

        for (i, step) in plan.peel.iter().enumerate() {
            let Some(target) = pool.get(step.target) else {
                diagnostics.push(format!("pass {}: no render target {}", i, step.target));
                continue;
            };
            let input = match step.input {
                Some(k) => &self.depth_bind_groups[k],
                None => &self.placeholder_depth,
            };

            let ((), error) = gpu.scoped(wgpu::ErrorFilter::Validation, || {
                let mut encoder = gpu
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Peel Pass Encoder"),
                    });
                {
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Peel Pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target.color_view,
                            resolve_target: None,
                            depth_slice: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(background),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                            view: &target.depth_view,
                            depth_ops: Some(wgpu::Operations {
                                load: wgpu::LoadOp::Clear(SENTINEL_DEPTH),
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });

                    pass.set_bind_group(0, &self.pass_bind_group, &[i as u32 * self.pass_stride]);
                    pass.set_bind_group(3, input, &[]);

                    for (d, draw) in draws.iter().enumerate() {
                        let binding = scene[draw.object].binding;
                        pass.set_bind_group(1, &self.draw_bind_group, &[d as u32 * self.draw_stride]);
                        pass.set_bind_group(2, &binding.texture.bind_group, &[]);
                        match draw.kind {
                            DrawKind::Faces => {
                                pass.set_pipeline(&program.face_pipeline);
                                pass.set_vertex_buffer(0, binding.vertex_buffer.slice(..));
                                pass.set_index_buffer(
                                    binding.triangle_buffer.slice(..),
                                    wgpu::IndexFormat::Uint32,
                                );
                                pass.draw_indexed(0..binding.triangle_count, 0, 0..1);
                            }
                            DrawKind::Lines => {
                                // six corners per segment instance
                                pass.set_pipeline(&program.line_pipeline);
                                pass.set_vertex_buffer(0, binding.segment_buffer.slice(..));
                                pass.draw(0..6, 0..binding.line_count);
                            }
                        }
                    }
                }
                gpu.queue.submit(std::iter::once(encoder.finish()));
            });

            log::trace!(
                "Peel pass {} -> target {} (input {:?}), {} draws",
                i,
                step.target,
                step.input,
                draws.len()
            );
            if let Some(e) = error {
                let message = format!("peel pass {}: {}", i, e);
                log::warn!("{}", message);
                diagnostics.push(message);
            }
        }

        Ok(draws.len())
    }
}

fn uniform_buffer(gpu: &GpuContext, label: &str, size: u64) -> wgpu::Buffer {
    gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn uniform_bind_group(
    gpu: &GpuContext,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    size: u32,
    label: &str,
) -> wgpu::BindGroup {
    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: wgpu::BufferSize::new(size as u64),
            }),
        }],
    })
}

fn depth_bind_group(
    gpu: &GpuContext,
    shaders: &ShaderLibrary,
    view: &wgpu::TextureView,
    label: &str,
) -> wgpu::BindGroup {
    gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &shaders.layer.depth_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(view),
        }],
    })
}
