//! The host-facing renderer.
//!
//! [`DepthPeeler`] ties the pieces together behind the
//! [`TransparencyRenderer`] contract. A host creates it from a
//! [`PeelConfig`], calls [`initialize`](TransparencyRenderer::initialize) once,
//! [`render_frame`](TransparencyRenderer::render_frame) every frame,
//! [`resize`](TransparencyRenderer::resize) when the viewport changes and
//! [`shutdown`](TransparencyRenderer::shutdown) at the end.
//!
//! # Example
//!
//! ```no_run
//! use lamina::{
//!     CameraMatrices, DepthPeeler, FrameOptions, GpuContext, MeshData, PeelConfig,
//!     SceneBinding, SceneObject, TransparencyRenderer, Viewport,
//! };
//!
//! let gpu = GpuContext::headless(640, 480, wgpu::TextureFormat::Rgba8UnormSrgb)?;
//! let mut peeler = DepthPeeler::new(PeelConfig::new().layers(4))?;
//! peeler.initialize(&gpu, Viewport::new(640, 480)?)?;
//!
//! let cube = SceneBinding::new(&gpu, &MeshData::cube())?;
//! let scene = [SceneObject::new(&cube)];
//! # let target: wgpu::TextureView = unimplemented!();
//! let report = peeler.render_frame(
//!     &gpu,
//!     &target,
//!     &scene,
//!     &CameraMatrices::default(),
//!     &FrameOptions::default(),
//! )?;
//! assert_eq!(report.composite_order, vec![3, 2, 1, 0]);
//! # Ok::<(), lamina::PeelError>(())
//! ```

use crate::camera::CameraMatrices;
use crate::compositor::Compositor;
use crate::config::{PeelConfig, Viewport};
use crate::draw::FrameOptions;
use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;
use crate::render_target::RenderTargetPool;
use crate::scene::SceneObject;
use crate::sequencer::{PassSequencer, plan_frame};
use crate::shader::ShaderLibrary;

/// The capability contract a host loop drives.
pub trait TransparencyRenderer {
    /// Builds programs and allocates render targets for `viewport`.
    fn initialize(&mut self, gpu: &GpuContext, viewport: Viewport) -> Result<()>;

    /// Peels `scene` and composites the result into `target`.
    fn render_frame(
        &mut self,
        gpu: &GpuContext,
        target: &wgpu::TextureView,
        scene: &[SceneObject],
        camera: &CameraMatrices,
        options: &FrameOptions,
    ) -> Result<FrameReport>;

    /// Reallocates render targets. Zero dimensions are rejected and change nothing.
    fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()>;

    /// Releases every GPU resource. The renderer may be initialized again.
    fn shutdown(&mut self);
}

/// What happened during one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    /// Render targets in the order they were composited.
    pub composite_order: Vec<usize>,
    /// Number of peeling passes run.
    pub passes: usize,
    /// Draw calls issued in each pass.
    pub draws_per_pass: usize,
    /// Errors reported by the driver while the frame ran.
    pub diagnostics: Vec<String>,
}

impl FrameReport {
    /// `false` when any pass reported an error; the image is then undefined.
    pub fn is_defined(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

struct PeelerState {
    shaders: ShaderLibrary,
    pool: RenderTargetPool,
    sequencer: PassSequencer,
    compositor: Compositor,
}

/// Depth-peeling order-independent transparency renderer.
pub struct DepthPeeler {
    config: PeelConfig,
    state: Option<PeelerState>,
}

impl DepthPeeler {
    /// Validates `config`. No GPU work happens until `initialize`.
    pub fn new(config: PeelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: None,
        })
    }

    pub fn config(&self) -> &PeelConfig {
        &self.config
    }

    /// Number of layers peeled per frame.
    pub fn layers(&self) -> usize {
        self.config.layers
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// The current render targets, if initialized.
    pub fn targets(&self) -> Option<&RenderTargetPool> {
        self.state.as_ref().map(|s| &s.pool)
    }
}

impl TransparencyRenderer for DepthPeeler {
    fn initialize(&mut self, gpu: &GpuContext, viewport: Viewport) -> Result<()> {
        let shaders = ShaderLibrary::new(gpu, gpu.format())?;
        let pool = RenderTargetPool::new(gpu, self.config.layers, viewport)?;
        let sequencer = PassSequencer::new(gpu, &shaders, &pool)?;
        let compositor = Compositor::new(gpu, &shaders, &pool)?;

        log::info!(
            "Depth peeler initialized: {} layers at {}x{}",
            self.config.layers,
            viewport.width(),
            viewport.height()
        );

        self.state = Some(PeelerState {
            shaders,
            pool,
            sequencer,
            compositor,
        });
        Ok(())
    }

    fn render_frame(
        &mut self,
        gpu: &GpuContext,
        target: &wgpu::TextureView,
        scene: &[SceneObject],
        camera: &CameraMatrices,
        options: &FrameOptions,
    ) -> Result<FrameReport> {
        let state = self.state.as_mut().ok_or(PeelError::NotInitialized)?;
        let plan = plan_frame(state.pool.len());
        let mut diagnostics = Vec::new();

        let draws_per_pass = state.sequencer.execute(
            gpu,
            &state.shaders,
            &state.pool,
            &plan,
            scene,
            camera,
            options,
            &mut diagnostics,
        )?;
        state.compositor.composite(
            gpu,
            &state.shaders,
            target,
            &plan.composite,
            options,
            &mut diagnostics,
        );

        Ok(FrameReport {
            composite_order: plan.composite,
            passes: plan.peel.len(),
            draws_per_pass,
            diagnostics,
        })
    }

    fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        let state = self.state.as_mut().ok_or(PeelError::NotInitialized)?;
        if let Err(e) = state.pool.resize(gpu, width, height) {
            if e.is_rejection() {
                log::warn!("Resize to {}x{} rejected: {}", width, height, e);
            }
            return Err(e);
        }
        state.sequencer.rebind(gpu, &state.shaders, &state.pool);
        state.compositor.rebind(gpu, &state.shaders, &state.pool);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.state.take().is_some() {
            log::info!("Depth peeler shut down");
        }
    }
}
