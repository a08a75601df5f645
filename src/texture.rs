use wgpu::util::DeviceExt;

use crate::error::{PeelError, Result};
use crate::gpu::GpuContext;

/// A sampled color texture applied to a scene object when `show_texture` is on.
///
/// The bind group (texture view + sampler, group 2 of the layer program) is
/// built once here and reused by every pass of every frame.
#[derive(Debug)]
pub struct Texture {
    pub(crate) bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Uploads tightly packed RGBA8 pixels (`width * height * 4` bytes).
    ///
    /// Returns [`PeelError::ResourceAllocation`] for a zero dimension, a
    /// pixel buffer of the wrong length or a texture the device cannot hold.
    pub fn from_rgba(gpu: &GpuContext, data: &[u8], width: u32, height: u32, label: &str) -> Result<Self> {
        check_rgba(data.len(), width, height)?;

        let (bind_group, error) = gpu.allocating(|| {
            let texture = gpu.device.create_texture_with_data(
                &gpu.queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                data,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            // texels are looked up exactly; uv outside [0, 1] tiles
            let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                ..Default::default()
            });
            gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bind_group_layout(&gpu.device),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            })
        });
        if let Some(e) = error {
            return Err(PeelError::ResourceAllocation(e.to_string()));
        }

        Ok(Self {
            bind_group,
            width,
            height,
        })
    }

    /// A grey-and-white grid, bound to meshes that carry no texture of their own.
    pub fn checkerboard(gpu: &GpuContext, size: u32, cells: u32) -> Result<Self> {
        let data = checkerboard_pixels(size, cells);
        Self::from_rgba(gpu, &data, size, size, "Checkerboard Texture")
    }
}

/// Layout of group 2 of the layer program: a filterable 2D texture and its
/// sampler. wgpu deduplicates identical layouts, so the program and every
/// [`Texture`] end up sharing one.
pub(crate) fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Mesh Texture Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn check_rgba(len: usize, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(PeelError::ResourceAllocation(format!(
            "texture size {}x{} is empty",
            width, height
        )));
    }
    let expected = width as usize * height as usize * 4;
    if len != expected {
        return Err(PeelError::ResourceAllocation(format!(
            "{}x{} RGBA texture needs {} bytes, got {}",
            width, height, expected, len
        )));
    }
    Ok(())
}

fn checkerboard_pixels(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            let v = if (x / cell + y / cell) % 2 == 0 { 255 } else { 128 };
            [v, v, v, 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_cells() {
        let px = checkerboard_pixels(4, 2);
        assert_eq!(px.len(), 64);
        let at = |x: usize, y: usize| px[(y * 4 + x) * 4];
        assert_eq!(at(0, 0), 255);
        assert_eq!(at(1, 1), 255);
        assert_eq!(at(2, 0), 128);
        assert_eq!(at(0, 2), 128);
        assert_eq!(at(2, 2), 255);
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let err = check_rgba(4, 2, 2).unwrap_err();
        match err {
            PeelError::ResourceAllocation(message) => {
                assert!(message.contains("16 bytes"), "{message}");
                assert!(message.contains("got 4"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check_rgba(20, 2, 2).is_err());
    }

    #[test]
    fn empty_texture_is_rejected() {
        assert!(matches!(check_rgba(0, 0, 4), Err(PeelError::ResourceAllocation(_))));
        assert!(matches!(check_rgba(0, 4, 0), Err(PeelError::ResourceAllocation(_))));
    }

    #[test]
    fn packed_pixels_are_accepted() {
        assert!(check_rgba(64, 4, 4).is_ok());
        assert!(check_rgba(checkerboard_pixels(8, 2).len(), 8, 8).is_ok());
    }
}
