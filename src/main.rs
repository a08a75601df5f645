use std::sync::{Arc, Once};
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use lamina::{
    Camera, Color, DepthPeeler, DrawFlags, FrameOptions, GpuContext, MeshData, PeelConfig,
    PeelError, Quat, SceneBinding, SceneObject, Transform, TransparencyRenderer, Vec3, Viewport,
};

static LOGGING: Once = Once::new();

/// Initializes `env_logger` once, honouring `RUST_LOG` and defaulting to info.
fn init_logging() {
    LOGGING.call_once(|| {
        let mut builder = env_logger::Builder::new();
        if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }
        builder.init();
    });
}

struct Demo {
    gpu: GpuContext,
    peeler: DepthPeeler,
    cube: SceneBinding,
    square: SceneBinding,
    square_rest: Vec<Vec3>,
    cube_flags: DrawFlags,
    square_flags: DrawFlags,
    options: FrameOptions,
}

impl Demo {
    fn new(window: Arc<Window>, config: PeelConfig) -> Result<Self, PeelError> {
        let gpu = GpuContext::new(window)?;
        let mut peeler = DepthPeeler::new(config)?;
        peeler.initialize(&gpu, Viewport::new(gpu.width(), gpu.height())?)?;

        let cube = SceneBinding::new(&gpu, &MeshData::cube())?;

        let mut square = MeshData::square(1.6);
        square.set_uniform_color(Color::from_rgba8(224, 86, 253, 128));
        let square_rest = square.positions().to_vec();
        let square = SceneBinding::new(&gpu, &square)?;

        Ok(Self {
            gpu,
            peeler,
            cube,
            square,
            square_rest,
            cube_flags: DrawFlags::default(),
            square_flags: DrawFlags::default(),
            options: FrameOptions::from(&config),
        })
    }

    fn set_layers(&mut self, layers: usize) {
        let config = self.peeler.config().layers(layers);
        let rebuilt = DepthPeeler::new(config).and_then(|mut peeler| {
            peeler.initialize(&self.gpu, Viewport::new(self.gpu.width(), self.gpu.height())?)?;
            Ok(peeler)
        });
        match rebuilt {
            Ok(peeler) => {
                self.peeler.shutdown();
                self.peeler = peeler;
                log::info!("Peeling {} layers", layers);
            }
            Err(e) => log::warn!("Keeping {} layers: {}", self.peeler.layers(), e),
        }
    }

    fn key(&mut self, code: KeyCode) {
        let flags = [&mut self.cube_flags, &mut self.square_flags];
        match code {
            KeyCode::KeyL => flags.into_iter().for_each(|f| f.show_lines = !f.show_lines),
            KeyCode::KeyF => flags.into_iter().for_each(|f| f.show_faces = !f.show_faces),
            KeyCode::KeyT => flags.into_iter().for_each(|f| f.show_texture = !f.show_texture),
            KeyCode::KeyN => flags.into_iter().for_each(|f| f.invert_normals = !f.invert_normals),
            KeyCode::KeyD => self.options.show_depth = !self.options.show_depth,
            KeyCode::Equal | KeyCode::NumpadAdd => self.set_layers(self.peeler.layers() + 1),
            KeyCode::Minus | KeyCode::NumpadSubtract => {
                if self.peeler.layers() > 1 {
                    self.set_layers(self.peeler.layers() - 1);
                }
            }
            _ => {}
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        // minimized windows report 0x0; keep the old targets
        match self.peeler.resize(&self.gpu, width, height) {
            Err(e) if !e.is_rejection() => log::error!("Resize failed: {}", e),
            _ => {}
        }
    }

    fn render(&mut self, time: f32) {
        let slide = Vec3::new(0.0, 0.0, 0.25 * time.sin());
        let moved: Vec<Vec3> = self.square_rest.iter().map(|p| *p + slide).collect();
        if let Err(e) = self.square.update_positions(&self.gpu, &moved) {
            log::error!("{}", e);
        }

        let Some(surface) = &self.gpu.surface else {
            return;
        };
        let output = match surface.get_current_texture() {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Skipping frame: {}", e);
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let spin = Transform::new()
            .rotation(Quat::from_rotation_y(time * 0.4) * Quat::from_rotation_x(0.4));
        let camera = Camera::new()
            .at(Vec3::new(0.0, 0.6, 2.8))
            .matrices(self.gpu.aspect());
        let scene = [
            SceneObject::new(&self.cube)
                .transform(spin)
                .flags(self.cube_flags),
            SceneObject::new(&self.square)
                .transform(spin)
                .flags(self.square_flags),
        ];

        match self
            .peeler
            .render_frame(&self.gpu, &view, &scene, &camera, &self.options)
        {
            Ok(report) if !report.is_defined() => {
                log::warn!("Frame output undefined: {:?}", report.diagnostics)
            }
            Ok(_) => {}
            Err(e) => log::error!("Frame failed: {}", e),
        }

        output.present();
    }
}

struct App {
    config: PeelConfig,
    window: Option<Arc<Window>>,
    demo: Option<Demo>,
    start_time: Instant,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = Window::default_attributes().with_title("lamina: depth peeling");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Demo::new(window.clone(), self.config) {
            Ok(demo) => self.demo = Some(demo),
            Err(e) => {
                log::error!("Failed to start: {}", e);
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(demo) = &mut self.demo else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                demo.peeler.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => demo.resize(size.width, size.height),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => demo.key(code),
            WindowEvent::RedrawRequested => {
                demo.render(self.start_time.elapsed().as_secs_f32());
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    init_logging();

    let config = PeelConfig::from_env();
    if let Err(e) = config.validate() {
        log::error!("{}", e);
        return;
    }
    log::info!("L: wireframe  F: faces  T: texture  N: invert normals  D: depth  +/-: layers");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App {
        config,
        window: None,
        demo: None,
        start_time: Instant::now(),
    };
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop error: {}", e);
    }
}
