//! Core GPU context and device management.
//!
//! [`GpuContext`] holds the wgpu device, queue and the configuration of the
//! destination the peeler composites into. It can be created for a winit
//! [`Window`] (with a presentable surface) or headless, in which case the host
//! supplies its own destination texture views.
//!
//! # Example
//!
//! ```no_run
//! use lamina::GpuContext;
//!
//! // Offscreen context, e.g. for tests or image export
//! let gpu = GpuContext::headless(640, 480, wgpu::TextureFormat::Rgba8UnormSrgb)?;
//! println!("{}x{} (aspect: {})", gpu.width(), gpu.height(), gpu.aspect());
//! # Ok::<(), lamina::PeelError>(())
//! ```
//!
//! [`Window`]: winit::window::Window

use std::sync::Arc;
use winit::window::Window;

use crate::error::{PeelError, Result};
use crate::render_target::{COLOR_FORMAT, DEPTH_FORMAT, LAYER_USAGE};

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
/// The context is created once at startup and passed by reference to the
/// peeler on every call.
pub struct GpuContext {
    /// The surface for presenting frames, `None` for headless contexts.
    pub surface: Option<wgpu::Surface<'static>>,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue; every pass of a frame is submitted here in order.
    pub queue: wgpu::Queue,
    /// Destination configuration (format and size).
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Create a GPU context presenting to a winit window.
    ///
    /// 1. Creates a wgpu instance with primary backends (Vulkan, Metal, DX12)
    /// 2. Creates a surface for the window
    /// 3. Requests a suitable GPU adapter
    /// 4. Creates the logical device and command queue
    /// 5. Configures the surface with an sRGB format and Fifo present mode
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| PeelError::AdapterUnavailable(e.to_string()))?;

        check_layer_formats(|format| adapter.get_texture_format_features(format).allowed_usages)?;
        let (device, queue) = Self::request_device(&adapter)?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| PeelError::AdapterUnavailable("surface reports no formats".into()))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        log::info!(
            "GPU context ready: {} ({:?}), surface {:?} {}x{}",
            adapter.get_info().name,
            adapter.get_info().backend,
            config.format,
            config.width,
            config.height
        );

        Ok(Self {
            surface: Some(surface),
            device,
            queue,
            config,
        })
    }

    /// Create a context without a window.
    ///
    /// `format` is the format of the destination views the host will pass to
    /// the peeler; `width`/`height` are its initial size. Uses the same
    /// primary backends as [`GpuContext::new`].
    pub fn headless(width: u32, height: u32, format: wgpu::TextureFormat) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| PeelError::AdapterUnavailable(e.to_string()))?;

        check_layer_formats(|format| adapter.get_texture_format_features(format).allowed_usages)?;
        let (device, queue) = Self::request_device(&adapter)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        log::info!(
            "Headless GPU context ready: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            surface: None,
            device,
            queue,
            config,
        })
    }

    fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        let pair = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Lamina Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;
        Ok(pair)
    }

    /// Resize the destination to new dimensions.
    ///
    /// Ignores zero-sized dimensions to avoid wgpu validation errors (which
    /// occur while a window is minimized).
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, &self.config);
            }
        }
    }

    /// Returns the current destination width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current destination height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    /// Returns the destination color format.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Runs `f` inside a wgpu error scope and returns any captured error.
    ///
    /// Errors caught here are not routed to the device's uncaptured-error
    /// handler, which panics by default.
    pub(crate) fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        f: impl FnOnce() -> T,
    ) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let value = f();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    /// Runs resource creation inside both an out-of-memory and a validation
    /// scope. Oversized descriptors fail validation rather than allocation,
    /// so both count as an allocation failure.
    pub(crate) fn allocating<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let (value, invalid) = self.scoped(wgpu::ErrorFilter::Validation, f);
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(invalid))
    }
}

/// Fails with [`PeelError::AdapterUnavailable`] unless the adapter allows
/// every layer usage on both layer formats. `usages` reports what the
/// adapter allows for a format.
fn check_layer_formats(usages: impl Fn(wgpu::TextureFormat) -> wgpu::TextureUsages) -> Result<()> {
    for format in [COLOR_FORMAT, DEPTH_FORMAT] {
        let missing = LAYER_USAGE.difference(usages(format));
        if !missing.is_empty() {
            return Err(PeelError::AdapterUnavailable(format!(
                "{:?} does not support {:?}",
                format, missing
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_color_without_render_attachment_is_unavailable() {
        // what a GL adapter reports for Rgba32Float
        let err = check_layer_formats(|format| match format {
            f if f == COLOR_FORMAT => {
                wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
            }
            _ => wgpu::TextureUsages::all(),
        })
        .unwrap_err();
        match err {
            PeelError::AdapterUnavailable(message) => {
                assert!(message.contains("Rgba32Float"), "{message}");
                assert!(message.contains("RENDER_ATTACHMENT"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn depth_must_be_readable() {
        let err = check_layer_formats(|format| match format {
            f if f == DEPTH_FORMAT => wgpu::TextureUsages::RENDER_ATTACHMENT,
            _ => wgpu::TextureUsages::all(),
        })
        .unwrap_err();
        assert!(matches!(err, PeelError::AdapterUnavailable(_)));
    }

    #[test]
    fn full_support_passes() {
        assert!(check_layer_formats(|_| wgpu::TextureUsages::all()).is_ok());
    }
}
