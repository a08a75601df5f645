//! # Lamina
//!
//! **Depth-peeling order-independent transparency for wgpu.**
//!
//! Overlapping translucent geometry only blends correctly when it is drawn
//! back to front, and sorting triangles per frame is neither cheap nor always
//! possible. Lamina renders the scene N times instead: every pass keeps the
//! nearest fragment that lies strictly behind what the previous pass kept, so
//! pass k captures the k-th surface at every pixel. The N captured layers are
//! then blended farthest first into the destination.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lamina::*;
//!
//! let gpu = GpuContext::headless(800, 600, wgpu::TextureFormat::Rgba8UnormSrgb)?;
//! let mut peeler = DepthPeeler::new(PeelConfig::from_env())?;
//! peeler.initialize(&gpu, Viewport::new(800, 600)?)?;
//!
//! let mut square = MeshData::square(1.5);
//! square.set_uniform_color(Color::from_rgba8(224, 86, 253, 128));
//! let square = SceneBinding::new(&gpu, &square)?;
//! let cube = SceneBinding::new(&gpu, &MeshData::cube())?;
//!
//! let camera = Camera::new().at(Vec3::new(0.0, 1.0, 3.0)).matrices(gpu.aspect());
//! let scene = [
//!     SceneObject::new(&cube),
//!     SceneObject::new(&square).flags(DrawFlags::default().lines(true)),
//! ];
//! # let target: wgpu::TextureView = unimplemented!();
//! let report = peeler.render_frame(&gpu, &target, &scene, &camera, &FrameOptions::default())?;
//! if !report.is_defined() {
//!     eprintln!("frame had driver errors: {:?}", report.diagnostics);
//! }
//! # Ok::<(), lamina::PeelError>(())
//! ```
//!
//! ## Layout
//!
//! - [`RenderTargetPool`] owns the N color + depth targets
//! - [`ShaderLibrary`] builds the layer and composite programs
//! - [`SceneBinding`] holds the GPU copy of a mesh
//! - [`PassSequencer`] runs the peeling passes of a [`FramePlan`]
//! - [`Compositor`] blends the layers into the destination
//! - [`DepthPeeler`] drives all of them through [`TransparencyRenderer`]
//!
//! The [`software`] module models a single pixel of the same computation on
//! the CPU.

mod camera;
mod compositor;
mod config;
mod draw;
mod error;
mod gpu;
mod mesh;
mod peeler;
pub mod reflect;
mod render_target;
mod scene;
mod sequencer;
mod shader;
pub mod software;
mod texture;

pub use camera::{Camera, CameraMatrices};
pub use compositor::Compositor;
pub use config::{LAYERS_ENV, PeelConfig, Viewport};
pub use draw::{Color, DrawFlags, FrameOptions};
pub use error::{PeelError, Result};
pub use gpu::GpuContext;
pub use mesh::{GOLD_AMBIENT, GOLD_DIFFUSE, GOLD_SPECULAR, LineSegment, MeshData, Transform, Vertex};
pub use peeler::{DepthPeeler, FrameReport, TransparencyRenderer};
pub use render_target::{COLOR_FORMAT, DEPTH_FORMAT, RenderTarget, RenderTargetPool, SENTINEL_DEPTH};
pub use scene::{SceneBinding, SceneObject};
pub use sequencer::{FramePlan, PassSequencer, PeelStep, plan_frame};
pub use shader::{CompositeProgram, LayerProgram, ShaderLibrary};
pub use texture::Texture;

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
