//! Depth Peeler GPU Tests
//!
//! Tests for:
//! - Initialization and render target allocation
//! - Resize rejection of zero and oversized dimensions, idempotent resizes
//! - Frame ordering and draw counts reported by a real frame
//! - Pixels read back from the GPU against the CPU model in `software`
//! - Wireframe width and fixed line colors
//! - Texture upload validation and reflected uniform lookups
//! - Lifecycle errors before initialize / after shutdown
//!
//! Every test needs a GPU adapter that can render the layer formats and
//! returns early when none is available.

use lamina::software::{Fragment, render_pixel};
use lamina::{
    Camera, CameraMatrices, Color, DepthPeeler, DrawFlags, FrameOptions, GpuContext, MeshData,
    PeelConfig, PeelError, SENTINEL_DEPTH, SceneBinding, SceneObject, ShaderLibrary, Texture,
    Transform, TransparencyRenderer, Vec3, Viewport,
};

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
/// Linear destination for readback, so bytes compare directly with blended values.
const LINEAR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn gpu(width: u32, height: u32) -> Option<GpuContext> {
    gpu_with_format(width, height, FORMAT)
}

fn gpu_with_format(width: u32, height: u32, format: wgpu::TextureFormat) -> Option<GpuContext> {
    match GpuContext::headless(width, height, format) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn destination(gpu: &GpuContext) -> wgpu::TextureView {
    destination_texture(gpu).create_view(&wgpu::TextureViewDescriptor::default())
}

fn destination_texture(gpu: &GpuContext) -> wgpu::Texture {
    gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Destination"),
        size: wgpu::Extent3d {
            width: gpu.width(),
            height: gpu.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: gpu.format(),
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn peeler(gpu: &GpuContext, layers: usize) -> DepthPeeler {
    let mut peeler = DepthPeeler::new(PeelConfig::new().layers(layers)).unwrap();
    peeler
        .initialize(gpu, Viewport::new(gpu.width(), gpu.height()).unwrap())
        .unwrap();
    peeler
}

/// Copies one aspect of `texture` to the CPU, rows tightly packed.
fn read_texture(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    aspect: wgpu::TextureAspect,
    texel_size: u32,
) -> Vec<u8> {
    let row = texture.width() * texel_size;
    let padded = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: padded as u64 * texture.height() as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(texture.height()),
            },
        },
        texture.size(),
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).unwrap();
    });
    gpu.device.poll(wgpu::PollType::wait_indefinitely()).unwrap();
    receiver.recv().unwrap().unwrap();

    let pixels = slice
        .get_mapped_range()
        .chunks(padded as usize)
        .flat_map(|r| r[..row as usize].to_vec())
        .collect();
    buffer.unmap();
    pixels
}

fn rgba8_at(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * width + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

fn f32_at(texels: &[u8], width: u32, x: u32, y: u32, channels: u32, channel: u32) -> f32 {
    let i = (((y * width + x) * channels + channel) * 4) as usize;
    bytemuck::pod_read_unaligned(&texels[i..i + 4])
}

/// Asserts an 8-bit channel is within one step of `expected`.
fn assert_channel(actual: u8, expected: f32, what: &str) {
    let scaled = expected.clamp(0.0, 1.0) * 255.0;
    assert!(
        (actual as f32 - scaled).abs() <= 1.0,
        "{what}: got {actual}, expected {scaled:.2}"
    );
}

/// Color of a fragment drawn with `lighting_factor = 0` and no texture: the
/// material's ambient (a tenth of the color) plus its diffuse color.
fn flat_shaded(c: Color) -> Color {
    Color::rgba(1.1 * c.r, 1.1 * c.g, 1.1 * c.b, c.a)
}

/// A unit square in the XY plane with its material derived from `color`.
fn square(gpu: &GpuContext, color: Color) -> SceneBinding {
    let mut mesh = MeshData::square(1.0);
    mesh.set_uniform_color(color);
    SceneBinding::new(gpu, &mesh).unwrap()
}

fn at_depth(depth: f32) -> Transform {
    Transform::new().position(Vec3::new(0.0, 0.0, depth))
}

fn flat_options() -> FrameOptions {
    FrameOptions {
        background: Color::BLACK,
        lighting_factor: 0.0,
        ..FrameOptions::default()
    }
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn initialize_allocates_one_target_per_layer() {
    let Some(gpu) = gpu(64, 48) else { return };
    let peeler = peeler(&gpu, 5);
    let pool = peeler.targets().unwrap();
    assert_eq!(pool.len(), 5);
    for target in pool.iter() {
        assert_eq!((target.width(), target.height()), (64, 48));
        assert_eq!(target.color_texture.format(), lamina::COLOR_FORMAT);
        assert_eq!(target.depth_texture.format(), lamina::DEPTH_FORMAT);
    }
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn zero_sized_resize_is_rejected_and_keeps_targets() {
    let Some(gpu) = gpu(32, 32) else { return };
    let mut peeler = peeler(&gpu, 3);

    for (w, h) in [(0, 32), (32, 0), (0, 0)] {
        let err = peeler.resize(&gpu, w, h).unwrap_err();
        assert!(matches!(err, PeelError::InvalidViewport { .. }), "{err}");
        let pool = peeler.targets().unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!((pool.width(), pool.height()), (32, 32));
    }
}

#[test]
fn oversized_resize_is_reported_and_keeps_targets() {
    let Some(gpu) = gpu(32, 32) else { return };
    let mut peeler = peeler(&gpu, 2);
    let max = gpu.device.limits().max_texture_dimension_2d;

    let err = peeler.resize(&gpu, max + 1, 16).unwrap_err();
    assert!(matches!(err, PeelError::ResourceAllocation(_)), "{err}");
    let pool = peeler.targets().unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!((pool.width(), pool.height()), (32, 32));

    // the peeler keeps working at the old size
    let target = destination(&gpu);
    let camera = CameraMatrices::default();
    let report = peeler
        .render_frame(&gpu, &target, &[], &camera, &FrameOptions::default())
        .unwrap();
    assert!(report.is_defined(), "{:?}", report.diagnostics);
}

#[test]
fn repeated_resize_is_idempotent() {
    let Some(gpu) = gpu(32, 32) else { return };
    let mut peeler = peeler(&gpu, 2);

    peeler.resize(&gpu, 80, 60).unwrap();
    peeler.resize(&gpu, 80, 60).unwrap();
    let pool = peeler.targets().unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!((pool.width(), pool.height()), (80, 60));
    assert!(pool.iter().all(|t| (t.width(), t.height()) == (80, 60)));
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn frame_composites_in_reverse_order() {
    let Some(gpu) = gpu(64, 64) else { return };
    let mut peeler = peeler(&gpu, 4);
    let target = destination(&gpu);

    let cube = SceneBinding::new(&gpu, &MeshData::cube()).unwrap();
    let mut square = MeshData::square(1.5);
    square.set_uniform_color(Color::from_rgba8(224, 86, 253, 128));
    let square = SceneBinding::new(&gpu, &square).unwrap();

    let scene = [
        SceneObject::new(&cube),
        SceneObject::new(&square).flags(DrawFlags::default().lines(true).texture(true)),
    ];
    let camera = Camera::new().at(Vec3::new(0.0, 0.5, 3.0)).matrices(1.0);

    let report = peeler
        .render_frame(&gpu, &target, &scene, &camera, &FrameOptions::default())
        .unwrap();
    assert_eq!(report.composite_order, vec![3, 2, 1, 0]);
    assert_eq!(report.passes, 4);
    assert_eq!(report.draws_per_pass, 3);
    assert!(report.is_defined(), "{:?}", report.diagnostics);
}

#[test]
fn empty_scene_still_runs_every_pass() {
    let Some(gpu) = gpu(16, 16) else { return };
    let mut peeler = peeler(&gpu, 2);
    let target = destination(&gpu);

    let options = FrameOptions {
        show_depth: true,
        clear_destination: false,
        ..FrameOptions::default()
    };
    let report = peeler
        .render_frame(&gpu, &target, &[], &Camera::new().matrices(1.0), &options)
        .unwrap();
    assert_eq!(report.passes, 2);
    assert_eq!(report.draws_per_pass, 0);
    assert_eq!(report.composite_order, vec![1, 0]);
}

#[test]
fn textured_objects_render_across_frames() {
    let Some(gpu) = gpu(32, 32) else { return };
    let mut peeler = peeler(&gpu, 3);
    let target = destination(&gpu);

    let texture = Texture::checkerboard(&gpu, 16, 4).unwrap();
    let cube = SceneBinding::with_texture(&gpu, &MeshData::cube(), texture).unwrap();
    let scene = [SceneObject::new(&cube).flags(DrawFlags::default().texture(true))];
    let camera = Camera::new().at(Vec3::new(0.0, 0.5, 3.0)).matrices(1.0);

    for _ in 0..3 {
        let report = peeler
            .render_frame(&gpu, &target, &scene, &camera, &FrameOptions::default())
            .unwrap();
        assert_eq!(report.draws_per_pass, 1);
        assert!(report.is_defined(), "{:?}", report.diagnostics);
    }
}

#[test]
fn update_positions_checks_vertex_count() {
    let Some(gpu) = gpu(16, 16) else { return };
    let mut square = SceneBinding::new(&gpu, &MeshData::square(1.0)).unwrap();

    let err = square.update_positions(&gpu, &[Vec3::ZERO]).unwrap_err();
    assert!(matches!(
        err,
        PeelError::GeometryMismatch {
            expected: 4,
            actual: 1
        }
    ));

    let moved: Vec<Vec3> = square.mesh().positions().iter().map(|p| *p + Vec3::Z).collect();
    square.update_positions(&gpu, &moved).unwrap();
    assert_eq!(square.mesh().positions()[0].z, 1.0);
}

// ============================================================================
// Readback
// ============================================================================

#[test]
fn two_translucent_squares_match_cpu_model() {
    let Some(gpu) = gpu_with_format(8, 8, LINEAR_FORMAT) else { return };
    let mut peeler = peeler(&gpu, 4);
    let texture = destination_texture(&gpu);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let near_color = Color::rgba(0.6, 0.2, 0.1, 0.4);
    let far_color = Color::rgba(0.1, 0.3, 0.7, 0.7);
    let near = square(&gpu, near_color);
    let far = square(&gpu, far_color);
    // far square submitted first; the result must not depend on it
    let scene = [
        SceneObject::new(&far).transform(at_depth(0.6)),
        SceneObject::new(&near).transform(at_depth(0.3)),
    ];

    let report = peeler
        .render_frame(&gpu, &view, &scene, &CameraMatrices::default(), &flat_options())
        .unwrap();
    assert!(report.is_defined(), "{:?}", report.diagnostics);

    let pixels = read_texture(&gpu, &texture, wgpu::TextureAspect::All, 4);
    let expected = render_pixel(
        4,
        &[
            Fragment::new(0.6, flat_shaded(far_color)),
            Fragment::new(0.3, flat_shaded(near_color)),
        ],
        Color::BLACK,
    );
    let [r, g, b, _] = rgba8_at(&pixels, 8, 4, 4);
    assert_channel(r, expected.r, "red");
    assert_channel(g, expected.g, "green");
    assert_channel(b, expected.b, "blue");

    // c1 * a1 + c2 * a2 * (1 - a1) over black
    let (c1, c2) = (flat_shaded(near_color), flat_shaded(far_color));
    assert_channel(b, c1.b * c1.a + c2.b * c2.a * (1.0 - c1.a), "blue formula");

    // outside both squares only the cleared destination remains
    let [r, g, b, _] = rgba8_at(&pixels, 8, 0, 0);
    assert_eq!([r, g, b], [0, 0, 0]);
}

#[test]
fn opaque_square_composites_to_first_pass() {
    let Some(gpu) = gpu_with_format(8, 8, LINEAR_FORMAT) else { return };
    let mut peeler = peeler(&gpu, 3);
    let texture = destination_texture(&gpu);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let opaque = square(&gpu, Color::rgba(0.5, 0.25, 0.75, 1.0));
    let scene = [SceneObject::new(&opaque).transform(at_depth(0.5))];
    peeler
        .render_frame(&gpu, &view, &scene, &CameraMatrices::default(), &flat_options())
        .unwrap();

    let pool = peeler.targets().unwrap();
    let first = read_texture(&gpu, &pool[0].color_texture, wgpu::TextureAspect::All, 16);
    let second_depth = read_texture(&gpu, &pool[1].depth_texture, wgpu::TextureAspect::DepthOnly, 4);
    assert_eq!(f32_at(&second_depth, 8, 4, 4, 1, 0), SENTINEL_DEPTH);

    let pixels = read_texture(&gpu, &texture, wgpu::TextureAspect::All, 4);
    let out = rgba8_at(&pixels, 8, 4, 4);
    for channel in 0..3 {
        let layer = f32_at(&first, 8, 4, 4, 4, channel as u32);
        assert_channel(out[channel], layer, "composite vs pass 0");
    }
}

#[test]
fn each_pass_records_a_deeper_surface() {
    let Some(gpu) = gpu_with_format(8, 8, LINEAR_FORMAT) else { return };
    let mut peeler = peeler(&gpu, 4);
    let view = destination(&gpu);

    let color = Color::rgba(0.2, 0.6, 0.4, 0.5);
    let squares: Vec<SceneBinding> = (0..3).map(|_| square(&gpu, color)).collect();
    let depths = [0.5, 0.8, 0.2];
    let scene: Vec<SceneObject> = squares
        .iter()
        .zip(depths)
        .map(|(binding, depth)| SceneObject::new(binding).transform(at_depth(depth)))
        .collect();
    peeler
        .render_frame(&gpu, &view, &scene, &CameraMatrices::default(), &flat_options())
        .unwrap();

    let recorded: Vec<f32> = peeler
        .targets()
        .unwrap()
        .iter()
        .map(|target| {
            let texels = read_texture(&gpu, &target.depth_texture, wgpu::TextureAspect::DepthOnly, 4);
            f32_at(&texels, 8, 4, 4, 1, 0)
        })
        .collect();

    for (actual, expected) in recorded.iter().zip([0.2, 0.5, 0.8, SENTINEL_DEPTH]) {
        assert!((actual - expected).abs() < 1e-5, "{recorded:?}");
    }
    assert!(recorded.windows(2).all(|w| w[0] < w[1]), "{recorded:?}");
}

fn lit_pixels(gpu: &GpuContext, peeler: &mut DepthPeeler, scene: &[SceneObject]) -> Vec<[u8; 4]> {
    let texture = destination_texture(gpu);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let report = peeler
        .render_frame(gpu, &view, scene, &CameraMatrices::default(), &flat_options())
        .unwrap();
    assert!(report.is_defined(), "{:?}", report.diagnostics);
    read_texture(gpu, &texture, wgpu::TextureAspect::All, 4)
        .chunks(4)
        .map(|p| [p[0], p[1], p[2], p[3]])
        .filter(|p| p[..3].iter().any(|&c| c > 0))
        .collect()
}

#[test]
fn line_width_widens_the_wireframe() {
    let Some(gpu) = gpu_with_format(32, 32, LINEAR_FORMAT) else { return };
    let mut peeler = peeler(&gpu, 2);
    let outline = square(&gpu, Color::WHITE);
    let wireframe = |width: f32| {
        let flags = DrawFlags::default()
            .faces(false)
            .lines(true)
            .line_color(Color::WHITE)
            .line_width(width);
        [SceneObject::new(&outline).transform(at_depth(0.5)).flags(flags)]
    };

    let thin = lit_pixels(&gpu, &mut peeler, &wireframe(1.0)).len();
    let wide = lit_pixels(&gpu, &mut peeler, &wireframe(5.0)).len();
    assert!(thin > 0);
    assert!(wide >= 3 * thin, "thin {thin}, wide {wide}");
}

#[test]
fn transparent_wireframe_draws_nothing() {
    let Some(gpu) = gpu_with_format(32, 32, LINEAR_FORMAT) else { return };
    let mut peeler = peeler(&gpu, 2);
    let red = square(&gpu, Color::rgb(0.8, 0.0, 0.0));
    let scene = [SceneObject::new(&red).transform(at_depth(0.5)).flags(
        DrawFlags::default()
            .faces(false)
            .lines(true)
            .line_width(3.0)
            .line_color(Color::TRANSPARENT),
    )];

    let lit = lit_pixels(&gpu, &mut peeler, &scene);
    assert!(lit.is_empty(), "shaded edges leaked through: {:?}", &lit[..lit.len().min(4)]);
}

// ============================================================================
// Resources and reflection
// ============================================================================

#[test]
fn short_texture_data_is_an_error() {
    let Some(gpu) = gpu(16, 16) else { return };
    let err = Texture::from_rgba(&gpu, &[0; 4], 2, 2, "Short Texture").unwrap_err();
    assert!(matches!(err, PeelError::ResourceAllocation(_)), "{err}");
    assert!(Texture::from_rgba(&gpu, &[255; 16], 2, 2, "Full Texture").is_ok());
}

#[test]
fn programs_expose_reflected_uniforms() {
    let Some(gpu) = gpu(16, 16) else { return };
    let shaders = ShaderLibrary::new(&gpu, gpu.format()).unwrap();

    let flag = shaders.layer.uniform("use_fixed_color").unwrap();
    assert_eq!((flag.group, flag.offset), (1, 156));
    let first_pass = shaders.layer.uniform("first_pass").unwrap();
    assert_eq!((first_pass.group, first_pass.offset), (0, 148));
    assert_eq!(shaders.composite.uniform("show_depth").unwrap().group, 0);
    assert!(shaders.layer.uniform("show_depth").is_none());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn uninitialized_and_shut_down_peelers_refuse_work() {
    let Some(gpu) = gpu(16, 16) else { return };
    let target = destination(&gpu);
    let camera = Camera::new().matrices(1.0);

    let mut peeler = DepthPeeler::new(PeelConfig::new().layers(2)).unwrap();
    assert!(matches!(
        peeler.render_frame(&gpu, &target, &[], &camera, &FrameOptions::default()),
        Err(PeelError::NotInitialized)
    ));

    peeler
        .initialize(&gpu, Viewport::new(16, 16).unwrap())
        .unwrap();
    peeler.shutdown();
    assert!(!peeler.is_initialized());
    assert!(matches!(
        peeler.resize(&gpu, 8, 8),
        Err(PeelError::NotInitialized)
    ));
}
