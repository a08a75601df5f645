//! Offscreen render targets, one per peeled layer.

use crate::config::Viewport;
use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;

/// Color format of every layer.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// Depth format of every layer.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Rendered by one pass, read by the next pass and the compositor, copied
/// out by hosts that inspect a layer.
pub(crate) const LAYER_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC);
/// Depth a target holds where no fragment was recorded (the cleared far plane).
pub const SENTINEL_DEPTH: f32 = 1.0;

/// A color + depth texture pair that one peeling pass renders into.
///
/// Both textures can be rendered to (as attachments), read from (by the
/// next pass and by the compositor) and copied out. Neither has mipmaps;
/// shaders read them texel by texel, which is nearest filtering.
pub struct RenderTarget {
    pub color_texture: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub depth_texture: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl RenderTarget {
    fn new(gpu: &GpuContext, viewport: Viewport, index: usize) -> Self {
        let color_texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("Layer {} Color", index)),
            size: viewport.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: LAYER_USAGE,
            view_formats: &[],
        });
        let depth_texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("Layer {} Depth", index)),
            size: viewport.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: LAYER_USAGE,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            color_texture,
            color_view,
            depth_texture,
            depth_view,
            width: viewport.width(),
            height: viewport.height(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// The ordered set of N render targets (index 0 is the nearest layer).
///
/// The pool always holds exactly N targets, all sized to the current viewport.
pub struct RenderTargetPool {
    targets: Vec<RenderTarget>,
    viewport: Viewport,
}

impl RenderTargetPool {
    /// Allocates `layers` targets sized to `viewport`.
    pub fn new(gpu: &GpuContext, layers: usize, viewport: Viewport) -> Result<Self> {
        let targets = Self::allocate(gpu, layers, viewport)?;
        log::debug!(
            "Allocated {} render targets at {}x{}",
            layers,
            viewport.width(),
            viewport.height()
        );
        Ok(Self { targets, viewport })
    }

    /// Replaces every target with a fresh one of the new size.
    ///
    /// A zero dimension is rejected with [`PeelError::InvalidViewport`] and
    /// nothing is allocated. If allocation fails the previous targets are kept
    /// and [`PeelError::ResourceAllocation`] is returned.
    pub fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        let viewport = Viewport::new(width, height)?;
        self.targets = Self::allocate(gpu, self.targets.len(), viewport)?;
        self.viewport = viewport;
        log::debug!("Render targets resized to {}x{}", width, height);
        Ok(())
    }

    fn allocate(gpu: &GpuContext, layers: usize, viewport: Viewport) -> Result<Vec<RenderTarget>> {
        fits_limit(viewport, gpu.device.limits().max_texture_dimension_2d)?;
        let (targets, error) = gpu.allocating(|| {
            (0..layers)
                .map(|i| RenderTarget::new(gpu, viewport, i))
                .collect::<Vec<_>>()
        });
        match error {
            Some(e) => Err(PeelError::ResourceAllocation(e.to_string())),
            None => Ok(targets),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RenderTarget> {
        self.targets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderTarget> {
        self.targets.iter()
    }

    pub fn width(&self) -> u32 {
        self.viewport.width()
    }

    pub fn height(&self) -> u32 {
        self.viewport.height()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}

fn fits_limit(viewport: Viewport, max_dimension: u32) -> Result<()> {
    if viewport.width() > max_dimension || viewport.height() > max_dimension {
        return Err(PeelError::ResourceAllocation(format!(
            "{}x{} exceeds the device limit of {} per side",
            viewport.width(),
            viewport.height(),
            max_dimension
        )));
    }
    Ok(())
}

impl std::ops::Index<usize> for RenderTargetPool {
    type Output = RenderTarget;

    fn index(&self, index: usize) -> &RenderTarget {
        &self.targets[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_within_limit_fits() {
        let viewport = Viewport::new(8192, 1).unwrap();
        assert!(fits_limit(viewport, 8192).is_ok());
    }

    #[test]
    fn oversized_viewport_is_an_allocation_failure() {
        for (w, h) in [(8193, 16), (16, 8193)] {
            let err = fits_limit(Viewport::new(w, h).unwrap(), 8192).unwrap_err();
            match err {
                PeelError::ResourceAllocation(message) => assert!(message.contains("8192"), "{message}"),
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
