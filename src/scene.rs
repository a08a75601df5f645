//! GPU-side scene geometry.
//!
//! A [`SceneBinding`] is the read-only view the peeling passes have of one
//! mesh: a vertex buffer, a triangle index buffer, a wireframe segment buffer
//! and the texture applied when `show_texture` is set. Every pass of a
//! frame rebinds the same buffers; nothing is copied between passes.

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::draw::DrawFlags;
use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;
use crate::mesh::{LineSegment, MeshData, Transform};
use crate::texture::Texture;

/// Size and cell count of the grid texture bound to meshes without their own.
const DEFAULT_TEXTURE_SIZE: u32 = 128;
const DEFAULT_TEXTURE_CELLS: u32 = 8;

/// Mesh buffers uploaded once and shared by every peeling pass.
pub struct SceneBinding {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) triangle_buffer: wgpu::Buffer,
    pub(crate) segment_buffer: wgpu::Buffer,
    pub(crate) triangle_count: u32,
    pub(crate) line_count: u32,
    pub(crate) texture: Texture,
    mesh: MeshData,
}

impl SceneBinding {
    /// Uploads `mesh` with the default checkerboard texture.
    pub fn new(gpu: &GpuContext, mesh: &MeshData) -> Result<Self> {
        let texture = Texture::checkerboard(gpu, DEFAULT_TEXTURE_SIZE, DEFAULT_TEXTURE_CELLS)?;
        Self::with_texture(gpu, mesh, texture)
    }

    /// Uploads `mesh` and binds `texture` to it.
    pub fn with_texture(gpu: &GpuContext, mesh: &MeshData, texture: Texture) -> Result<Self> {
        let (vertices, triangles, lines) = mesh.to_gpu_buffers();

        let (buffers, error) = gpu.allocating(|| {
            let vertex_buffer = create_vertex_buffer(gpu, "Scene Vertex Buffer", bytemuck::cast_slice(&vertices));
            let triangle_buffer = create_index_buffer(gpu, "Scene Triangle Buffer", &triangles);
            let segment_buffer = create_vertex_buffer(gpu, "Scene Segment Buffer", bytemuck::cast_slice(&lines));
            (vertex_buffer, triangle_buffer, segment_buffer)
        });
        if let Some(e) = error {
            return Err(PeelError::ResourceAllocation(e.to_string()));
        }
        let (vertex_buffer, triangle_buffer, segment_buffer) = buffers;

        log::debug!(
            "Bound mesh: {} vertices, {} triangles, {} edges",
            vertices.len(),
            triangles.len() / 3,
            lines.len()
        );

        Ok(Self {
            vertex_buffer,
            triangle_buffer,
            segment_buffer,
            triangle_count: triangles.len() as u32,
            line_count: lines.len() as u32,
            texture,
            mesh: mesh.clone(),
        })
    }

    /// Moves the mesh's vertices, keeping topology and materials.
    ///
    /// Requires `&mut self`, so it can only happen between frames. Returns
    /// [`PeelError::GeometryMismatch`] if `positions` has a different length
    /// than the bound mesh; the GPU copy is then left untouched.
    pub fn update_positions(&mut self, gpu: &GpuContext, positions: &[Vec3]) -> Result<()> {
        if !self.mesh.set_positions(positions) {
            return Err(PeelError::GeometryMismatch {
                expected: self.mesh.vertex_count(),
                actual: positions.len(),
            });
        }
        let (vertices, _, segments) = self.mesh.to_gpu_buffers();
        gpu.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        gpu.queue
            .write_buffer(&self.segment_buffer, 0, bytemuck::cast_slice(&segments));
        Ok(())
    }

    /// The CPU copy of the bound geometry.
    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    /// Number of triangle indices drawn per face pass.
    pub fn triangle_index_count(&self) -> u32 {
        self.triangle_count
    }

    /// Number of wireframe segments drawn per pass.
    pub fn line_segment_count(&self) -> u32 {
        self.line_count
    }
}

fn create_vertex_buffer(gpu: &GpuContext, label: &str, contents: &[u8]) -> wgpu::Buffer {
    // wgpu rejects binding zero-sized buffers; a mesh without edges keeps one empty segment
    let empty = [0u8; std::mem::size_of::<LineSegment>()];
    let contents = if contents.is_empty() { &empty[..] } else { contents };
    gpu.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        })
}

fn create_index_buffer(gpu: &GpuContext, label: &str, indices: &[u32]) -> wgpu::Buffer {
    // wgpu rejects zero-sized buffers bound as index buffers, keep one slot
    let contents: &[u32] = if indices.is_empty() { &[0] } else { indices };
    gpu.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(contents),
            usage: wgpu::BufferUsages::INDEX,
        })
}

/// One object drawn in a frame: bound geometry, its model matrix and display flags.
#[derive(Clone, Copy)]
pub struct SceneObject<'a> {
    pub binding: &'a SceneBinding,
    pub model: Mat4,
    pub flags: DrawFlags,
}

impl<'a> SceneObject<'a> {
    pub fn new(binding: &'a SceneBinding) -> Self {
        Self {
            binding,
            model: Mat4::IDENTITY,
            flags: DrawFlags::default(),
        }
    }

    pub fn model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    /// Sets the model matrix from a position/rotation/scale transform.
    pub fn transform(self, transform: Transform) -> Self {
        self.model(transform.matrix())
    }

    pub fn flags(mut self, flags: DrawFlags) -> Self {
        self.flags = flags;
        self
    }
}
