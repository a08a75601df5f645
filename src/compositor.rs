//! Back-to-front blending of the peeled layers into the destination.
//!
//! The composite pass has its own pipeline state: no depth attachment, alpha
//! blending on, and a static full-screen quad instead of scene geometry. Each
//! layer is drawn once, farthest first, so the standard "over" blend
//! `src * a + dst * (1 - a)` accumulates in the right order.

use wgpu::util::DeviceExt;

use crate::draw::FrameOptions;
use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;
use crate::reflect::{UniformData, round_up};
use crate::render_target::RenderTargetPool;
use crate::shader::ShaderLibrary;

/// Corners of the full-screen quad in clip space.
const QUAD_VERTICES: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub struct Compositor {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    /// One bind group per render target, indexed like the pool.
    layer_bind_groups: Vec<wgpu::BindGroup>,
}

impl Compositor {
    pub fn new(gpu: &GpuContext, shaders: &ShaderLibrary, pool: &RenderTargetPool) -> Result<Self> {
        let program = &shaders.composite;

        let ((vertex_buffer, index_buffer, uniform_buffer), error) =
            gpu.allocating(|| {
                let vertex_buffer = gpu
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Composite Quad Vertices"),
                        contents: bytemuck::cast_slice(&QUAD_VERTICES),
                        usage: wgpu::BufferUsages::VERTEX,
                    });
                let index_buffer = gpu
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Composite Quad Indices"),
                        contents: bytemuck::cast_slice(&QUAD_INDICES),
                        usage: wgpu::BufferUsages::INDEX,
                    });
                let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Composite Uniforms"),
                    size: round_up(program.uniform_size, 16) as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                (vertex_buffer, index_buffer, uniform_buffer)
            });
        if let Some(e) = error {
            return Err(PeelError::ResourceAllocation(e.to_string()));
        }

        let uniform_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Uniforms Bind Group"),
            layout: &program.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            uniform_bind_group,
            layer_bind_groups: Self::layer_bind_groups(gpu, shaders, pool),
        })
    }

    /// Rebuilds the per-layer bindings after the pool reallocates.
    pub fn rebind(&mut self, gpu: &GpuContext, shaders: &ShaderLibrary, pool: &RenderTargetPool) {
        self.layer_bind_groups = Self::layer_bind_groups(gpu, shaders, pool);
    }

    fn layer_bind_groups(
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        pool: &RenderTargetPool,
    ) -> Vec<wgpu::BindGroup> {
        pool.iter()
            .enumerate()
            .map(|(i, target)| {
                gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("Composite Layer {}", i)),
                    layout: &shaders.composite.layer_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&target.color_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&target.depth_view),
                        },
                    ],
                })
            })
            .collect()
    }

    /// Blends the layers listed in `order` into `destination`, in that order.
    ///
    /// The destination is cleared to the background first when
    /// `options.clear_destination` is set. Validation errors are appended to
    /// `diagnostics`.
    pub fn composite(
        &self,
        gpu: &GpuContext,
        shaders: &ShaderLibrary,
        destination: &wgpu::TextureView,
        order: &[usize],
        options: &FrameOptions,
        diagnostics: &mut Vec<String>,
    ) {
        let program = &shaders.composite;
        let mut data = UniformData::new(program.uniform_size);
        data.set_u32(program.slots.show_depth, options.show_depth as u32);
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, data.as_bytes());

        let load = if options.clear_destination {
            wgpu::LoadOp::Clear(options.background.to_wgpu())
        } else {
            wgpu::LoadOp::Load
        };

        let ((), error) = gpu.scoped(wgpu::ErrorFilter::Validation, || {
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Composite Encoder"),
                });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Composite Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: destination,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });

                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);

                for &layer in order {
                    if let Some(bind_group) = self.layer_bind_groups.get(layer) {
                        pass.set_bind_group(1, bind_group, &[]);
                        pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
                    }
                }
            }
            gpu.queue.submit(std::iter::once(encoder.finish()));
        });

        log::trace!("Composited layers {:?}", order);
        if let Some(e) = error {
            let message = format!("composite pass: {}", e);
            log::warn!("{}", message);
            diagnostics.push(message);
        }
    }
}
