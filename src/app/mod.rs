mod camera;
mod config;
mod window;

use std::sync::Arc;
use std::time::Instant;
use color_eyre::eyre::{Report, WrapErr};
use color_eyre::Result;
use glam::Vec3;
use tessera::renderer::interface::PresentationSurface;
use tessera::renderer::resources::mesh::MeshData;
use tessera::renderer::resources::texture::TextureData;
use tessera::renderer::{FrameStatus, Renderer};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::camera::OrbitCamera;
use crate::app::config::{AppConfig, SceneConfig, CONFIG_FILE};
use crate::app::window::WinitSurface;

pub struct App {
    config: AppConfig,
    // Dropped before `surface` so the swapchain goes before the window
    renderer: Option<Renderer>,
    surface: Option<Arc<WinitSurface>>,
    camera: OrbitCamera,

    // State
    prev_frame_time: Instant,
    delta_time_secs: f32,
    error: Option<Report>,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = AppConfig::load_or_default(CONFIG_FILE)?;
        let camera = OrbitCamera::new(config.scene.orbit_speed);

        Ok(Self {
            config,
            renderer: None,
            surface: None,
            camera,

            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            error: None,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(self)?;

        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = Window::default_attributes()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();
        self.camera.set_viewport(size.width, size.height);

        let surface = Arc::new(WinitSurface::new(window));
        let mut renderer = Renderer::new(
            self.config.render.clone(),
            surface.clone() as Arc<dyn PresentationSurface>,
        )?;
        build_scene(&mut renderer, &self.config.scene)?;

        self.surface = Some(surface);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        self.camera.advance(self.delta_time_secs);
        if let FrameStatus::Presented { slot, image_index } = renderer.draw_frame(&self.camera)? {
            log::trace!("Frame {} used slot {} and image {}", renderer.frame_index(), slot, image_index);
        }
        Ok(())
    }

    // Stops the event loop and hands the error back to `run`
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Report) {
        log::error!("Stopping after error: {:#}", error);
        self.error.get_or_insert(error);
        if let Some(surface) = self.surface.as_ref() {
            surface.request_close();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time.duration_since(self.prev_frame_time).as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        let Some(surface) = self.surface.clone() else {
            return;
        };
        if window_id != surface.window().id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                surface.request_close();
            }
            WindowEvent::Resized(new_size) => {
                self.camera.set_viewport(new_size.width, new_size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                surface.request_close();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_ref() else {
            return;
        };

        if renderer.should_stop() {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed to wait for the GPU on exit: {}", e);
            }
            event_loop.exit();
        } else if let Some(surface) = self.surface.as_ref() {
            surface.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.surface = None;
    }
}

fn build_scene(renderer: &mut Renderer, scene: &SceneConfig) -> Result<()> {
    let texture = match scene.texture.as_ref() {
        Some(path) => {
            let image = image::open(path)
                .wrap_err_with(|| format!("Failed to load texture {:?}", path))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            TextureData::new(image.into_raw(), width, height)?
        }
        None => TextureData::checkerboard(256, 8, [230, 230, 230, 255], [40, 40, 40, 255]),
    };

    let mesh = renderer.add_mesh(&MeshData::new_quad())?;
    let texture = renderer.add_texture(&texture)?;
    let pipeline = renderer.create_pipeline(
        &scene.vertex_shader,
        &scene.fragment_shader,
        scene.cull_mode,
        scene.front_face,
    )?;
    renderer.add_model(mesh, Vec3::ZERO, Vec3::ZERO, texture, pipeline)?;
    renderer.add_light(Vec3::new(2.0, 2.0, 2.0), Vec3::ONE);

    let mut frames = 0u64;
    let started = Instant::now();
    renderer.add_ui_commands(
        "frame rate",
        Box::new(move || {
            frames += 1;
            if frames % 600 == 0 {
                let fps = frames as f64 / started.elapsed().as_secs_f64();
                log::debug!("{} frames, {:.1} fps average", frames, fps);
            }
        }),
    );

    log::info!("Scene ready");
    Ok(())
}
