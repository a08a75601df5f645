//! CPU-side geometry and the GPU vertex format.
//!
//! - [`Vertex`]: the vertex layout read by the layer program: position,
//!   normal, per-vertex ambient/diffuse/specular material and texcoords
//! - [`LineSegment`]: one wireframe edge, drawn as an instanced quad
//! - [`MeshData`]: caller-owned triangle mesh with material colors
//! - [`Transform`]: position, rotation and scale for placing a mesh
//!
//! # Vertex Layout
//!
//! [`Vertex`] uses the following GPU layout (80 bytes per vertex):
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | ambient   | Float32x4 | 24     | 2               |
//! | diffuse   | Float32x4 | 40     | 3               |
//! | specular  | Float32x4 | 56     | 4               |
//! | uv        | Float32x2 | 72     | 5               |

use std::collections::BTreeSet;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::draw::Color;

/// Default ambient material (gold).
pub const GOLD_AMBIENT: Vec4 = Vec4::new(51.0 / 255.0, 43.33 / 255.0, 10.2 / 255.0, 1.0);
/// Default diffuse material (gold).
pub const GOLD_DIFFUSE: Vec4 = Vec4::new(255.0 / 255.0, 228.0 / 255.0, 58.0 / 255.0, 1.0);
/// Default specular material (gold).
pub const GOLD_SPECULAR: Vec4 = Vec4::new(255.0 / 255.0, 235.0 / 255.0, 80.0 / 255.0, 1.0);

/// A vertex as consumed by the layer program.
///
/// `#[repr(C)]` plus [`bytemuck::Pod`] lets vertex slices be uploaded with
/// `bytemuck::cast_slice`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub uv: [f32; 2],
}

impl Vertex {
    /// The wgpu vertex buffer layout for this vertex type.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // normal
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            // ambient
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x4,
            },
            // diffuse
            wgpu::VertexAttribute {
                offset: 40,
                shader_location: 3,
                format: wgpu::VertexFormat::Float32x4,
            },
            // specular
            wgpu::VertexAttribute {
                offset: 56,
                shader_location: 4,
                format: wgpu::VertexFormat::Float32x4,
            },
            // uv
            wgpu::VertexAttribute {
                offset: 72,
                shader_location: 5,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };
}

/// One wireframe edge. The line program expands every segment into a
/// screen-space quad `line_width` pixels wide, so segments are uploaded as
/// per-instance data (locations 0 and 1).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineSegment {
    pub start: [f32; 3],
    pub end: [f32; 3],
}

impl LineSegment {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<LineSegment>() as u64,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
        ],
    };
}

/// A triangle mesh with per-vertex materials, owned by the caller.
///
/// The renderer never mutates a `MeshData`; [`SceneBinding`](crate::SceneBinding)
/// uploads it once and reads the GPU copy in every peeling pass.
///
/// # Example
///
/// ```
/// use lamina::{Color, MeshData};
///
/// let mut square = MeshData::square(1.0);
/// square.set_uniform_color(Color::from_rgba8(224, 86, 253, 128));
/// assert_eq!(square.triangles().len(), 2);
/// assert_eq!(square.edges().len(), 5);
/// ```
#[derive(Clone, Debug)]
pub struct MeshData {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    uvs: Vec<Vec2>,
    ambient: Vec<Vec4>,
    diffuse: Vec<Vec4>,
    specular: Vec<Vec4>,
    face_based: bool,
}

impl MeshData {
    /// Creates a mesh with the default gold material and zero texcoords.
    ///
    /// Triangles referencing a vertex outside `positions` are dropped.
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        let n = positions.len();
        let valid: Vec<[u32; 3]> = triangles
            .into_iter()
            .filter(|t| t.iter().all(|&i| (i as usize) < n))
            .collect();
        Self {
            positions,
            triangles: valid,
            uvs: vec![Vec2::ZERO; n],
            ambient: vec![GOLD_AMBIENT; n],
            diffuse: vec![GOLD_DIFFUSE; n],
            specular: vec![GOLD_SPECULAR; n],
            face_based: false,
        }
    }

    /// A `size × size` square in the XY plane, centered at the origin.
    pub fn square(size: f32) -> Self {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h, -h, 0.0),
            Vec3::new(-h, h, 0.0),
            Vec3::new(h, h, 0.0),
            Vec3::new(h, -h, 0.0),
        ];
        let mut mesh = Self::new(positions, vec![[0, 2, 1], [0, 3, 2]]);
        mesh.uvs = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
        ];
        mesh.face_based = true;
        mesh
    }

    /// A unit cube centered at the origin with 8 shared corners and flat normals.
    pub fn cube() -> Self {
        #[rustfmt::skip]
        let positions = vec![
            Vec3::new(-0.5, -0.5, -0.5), Vec3::new(-0.5, -0.5,  0.5),
            Vec3::new(-0.5,  0.5, -0.5), Vec3::new(-0.5,  0.5,  0.5),
            Vec3::new( 0.5, -0.5, -0.5), Vec3::new( 0.5, -0.5,  0.5),
            Vec3::new( 0.5,  0.5, -0.5), Vec3::new( 0.5,  0.5,  0.5),
        ];
        #[rustfmt::skip]
        let triangles = vec![
            [0, 6, 4], [0, 2, 6], // back (z-)
            [0, 3, 2], [0, 1, 3], // left (x-)
            [2, 7, 6], [2, 3, 7], // top (y+)
            [4, 6, 7], [4, 7, 5], // right (x+)
            [0, 4, 5], [0, 5, 1], // bottom (y-)
            [1, 5, 7], [1, 7, 3], // front (z+)
        ];
        let mut mesh = Self::new(positions.clone(), triangles);
        mesh.uvs = positions.iter().map(|p| Vec2::new(p.x + 0.5, p.y + 0.5)).collect();
        mesh.face_based = true;
        mesh
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_face_based(&self) -> bool {
        self.face_based
    }

    /// Flat (per-face) normals when `true`, averaged per-vertex normals otherwise.
    pub fn set_face_based(&mut self, face_based: bool) -> &mut Self {
        self.face_based = face_based;
        self
    }

    /// Replaces texcoords. Ignored unless there is exactly one per vertex.
    pub fn set_uvs(&mut self, uvs: Vec<Vec2>) -> &mut Self {
        if uvs.len() == self.positions.len() {
            self.uvs = uvs;
        }
        self
    }

    /// Derives the ambient/diffuse/specular materials from a single color.
    ///
    /// Ambient is a tenth of the color, specular is pulled towards grey, and
    /// all three keep the color's alpha, so a translucent color makes the
    /// whole material translucent.
    pub fn set_uniform_color(&mut self, color: Color) -> &mut Self {
        let c = color.to_vec4();
        let n = self.positions.len();
        self.ambient = vec![ambient_of(c); n];
        self.diffuse = vec![c; n];
        self.specular = vec![specular_of(c); n];
        self
    }

    /// Replaces positions, keeping topology and materials.
    ///
    /// Returns `false` (and leaves the mesh untouched) if the count differs.
    pub fn set_positions(&mut self, positions: &[Vec3]) -> bool {
        if positions.len() != self.positions.len() {
            return false;
        }
        self.positions.copy_from_slice(positions);
        true
    }

    /// Unit normal of every triangle (zero for degenerate triangles).
    pub fn face_normals(&self) -> Vec<Vec3> {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|i| self.positions[i as usize]);
                (b - a).cross(c - a).normalize_or_zero()
            })
            .collect()
    }

    /// Area-weighted average of incident face normals at each vertex.
    pub fn vertex_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for t in &self.triangles {
            let [a, b, c] = t.map(|i| self.positions[i as usize]);
            let weighted = (b - a).cross(c - a);
            for &i in t {
                normals[i as usize] += weighted;
            }
        }
        normals.into_iter().map(Vec3::normalize_or_zero).collect()
    }

    /// Unique undirected edges of the triangle list, as `(low, high)` pairs.
    pub fn edges(&self) -> Vec<[u32; 2]> {
        let mut set = BTreeSet::new();
        for t in &self.triangles {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                set.insert([a.min(b), a.max(b)]);
            }
        }
        set.into_iter().collect()
    }

    /// Builds the vertex stream, the triangle index list and the wireframe
    /// segments to upload.
    ///
    /// Face-based meshes get one vertex per triangle corner so every corner
    /// can carry its face's normal.
    pub fn to_gpu_buffers(&self) -> (Vec<Vertex>, Vec<u32>, Vec<LineSegment>) {
        let vertices: Vec<Vertex> = if self.face_based {
            let normals = self.face_normals();
            self.triangles
                .iter()
                .zip(normals)
                .flat_map(|(t, n)| t.map(|i| self.vertex(i as usize, n)))
                .collect()
        } else {
            let normals = self.vertex_normals();
            (0..self.positions.len())
                .map(|i| self.vertex(i, normals[i]))
                .collect()
        };
        let triangles = if self.face_based {
            (0..vertices.len() as u32).collect()
        } else {
            self.triangles.iter().flatten().copied().collect()
        };
        (vertices, triangles, self.line_segments())
    }

    /// One segment per unique edge, in model space.
    pub fn line_segments(&self) -> Vec<LineSegment> {
        self.edges()
            .into_iter()
            .map(|[a, b]| LineSegment {
                start: self.positions[a as usize].to_array(),
                end: self.positions[b as usize].to_array(),
            })
            .collect()
    }

    fn vertex(&self, i: usize, normal: Vec3) -> Vertex {
        Vertex {
            position: self.positions[i].to_array(),
            normal: normal.to_array(),
            ambient: self.ambient[i].to_array(),
            diffuse: self.diffuse[i].to_array(),
            specular: self.specular[i].to_array(),
            uv: self.uvs[i].to_array(),
        }
    }
}

fn ambient_of(c: Vec4) -> Vec4 {
    Vec4::new(0.1 * c.x, 0.1 * c.y, 0.1 * c.z, c.w)
}

fn specular_of(c: Vec4) -> Vec4 {
    let grey = |v: f32| 0.3 + 0.1 * (v - 0.3);
    Vec4::new(grey(c.x), grey(c.y), grey(c.z), c.w)
}

/// Position, rotation and scale of a scene object.
///
/// Transformations are applied in SRT order (scale, rotate, translate).
///
/// ```
/// use lamina::{Transform, Vec3};
///
/// let t = Transform::new().position(Vec3::new(1.0, 0.0, 0.0)).uniform_scale(2.0);
/// assert_eq!(t.matrix().transform_point3(Vec3::ZERO), Vec3::new(1.0, 0.0, 0.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
