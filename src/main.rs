// =============================================================================
// RENDERER DEMO - Spinning cube over the frame-cycle core
// =============================================================================
//
// Drives the library's full frame contract against the Vulkan backend:
//
// FRAME FLOW:
// 1. begin_prepare (deletion pass + open upload batch)
// 2. stage uploads (first frame only: cube vertex + index data)
// 3. end_prepare (submit on the transfer queue)
// 4. begin_frame / begin_frame_surface (fence wait, image acquire)
// 5. draw (record the cube)
// 6. end_frame_surface / end_frame (submit, arm guards, present, cycle)
//
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use glam::{Mat4, Vec3};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use gfx_renderer::{
    Config, IndexData, IndexFormat, Mesh, PrimitiveTopology, Renderer, VertexColumn, VertexData,
    VertexFormat, VulkanBackend,
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting renderer demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<VulkanBackend>>,
    cube_vertices: Option<VertexData>,
    cube_indices: Option<IndexData>,
    uploaded: bool,
    is_fullscreen: bool,

    start_time: Instant,
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            renderer: None,
            cube_vertices: None,
            cube_indices: None,
            uploaded: false,
            is_fullscreen,
            start_time: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing renderer...");

        let display = window.raw_display_handle();
        let raw_window = window.raw_window_handle();
        let size = window.inner_size();

        let format = cube_vertex_format();
        let backend = VulkanBackend::new(
            display,
            raw_window,
            size.width,
            size.height,
            &format,
            &self.config,
        )?;

        let mut renderer = Renderer::new(backend, self.config.renderer_options())?;

        let (vertices, indices) = make_cube(&mut renderer);
        self.cube_vertices = Some(vertices);
        self.cube_indices = Some(indices);
        self.renderer = Some(renderer);

        log::info!("Renderer initialized successfully!");
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Runs one full frame cycle. Returns false when a frame operation
    /// failed; the caller treats that as fatal.
    fn render_frame(&mut self) -> bool {
        let Some(renderer) = self.renderer.as_mut() else {
            return true;
        };
        let (Some(vertices), Some(indices)) =
            (self.cube_vertices.as_ref(), self.cube_indices.as_ref())
        else {
            return true;
        };

        // ─────────────────────────────────────────────────────────────────────
        // PREPARE: uploads go out first, on the transfer queue
        // ─────────────────────────────────────────────────────────────────────
        if !renderer.begin_prepare() {
            return false;
        }
        if !self.uploaded {
            if !renderer.stage_vertex_data(vertices) || !renderer.stage_index_data(indices) {
                return false;
            }
            self.uploaded = true;
            log::info!("Cube data staged for upload");
        }
        if !renderer.end_prepare() {
            return false;
        }

        // ─────────────────────────────────────────────────────────────────────
        // CAMERA: two matrices through push constants
        // ─────────────────────────────────────────────────────────────────────
        let extent = renderer.backend().extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let elapsed = self.start_time.elapsed().as_secs_f32();

        let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.5, 4.0), Vec3::ZERO, Vec3::Y);
        let model = Mat4::from_rotation_y(elapsed) * Mat4::from_rotation_x(elapsed * 0.4);
        let matrices = [projection * view, model];
        renderer
            .backend_mut()
            .set_push_constants(bytemuck::cast_slice(&matrices));

        // ─────────────────────────────────────────────────────────────────────
        // FRAME: draw and present
        // ─────────────────────────────────────────────────────────────────────
        if !renderer.begin_frame() || !renderer.begin_frame_surface() {
            return false;
        }
        let mesh = Mesh {
            vertex_data: vertices,
            index_data: Some(indices),
            first: 0,
            count: 0,
            topology: PrimitiveTopology::TriangleList,
        };
        if !renderer.draw(&mesh) {
            return false;
        }
        renderer.end_frame_surface() && renderer.end_frame()
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(window.clone()) {
            log::error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if self.render_frame() {
                    self.update_fps();
                } else {
                    log::error!("Frame failed, exiting");
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CUBE GEOMETRY
// =============================================================================

fn cube_vertex_format() -> VertexFormat {
    VertexFormat::single(&[VertexColumn::Position, VertexColumn::Color])
}

/// Builds a unit cube: 24 vertices (4 per face, per-face color), 36 indices.
fn make_cube(renderer: &mut Renderer<VulkanBackend>) -> (VertexData, IndexData) {
    // (normal axis, face corners, RGBA color)
    const FACES: [([f32; 3], [[f32; 3]; 4], [u8; 4]); 6] = [
        // +Z front, red
        (
            [0.0, 0.0, 1.0],
            [
                [-1.0, -1.0, 1.0],
                [1.0, -1.0, 1.0],
                [1.0, 1.0, 1.0],
                [-1.0, 1.0, 1.0],
            ],
            [230, 60, 60, 255],
        ),
        // -Z back, green
        (
            [0.0, 0.0, -1.0],
            [
                [1.0, -1.0, -1.0],
                [-1.0, -1.0, -1.0],
                [-1.0, 1.0, -1.0],
                [1.0, 1.0, -1.0],
            ],
            [60, 200, 90, 255],
        ),
        // +X right, blue
        (
            [1.0, 0.0, 0.0],
            [
                [1.0, -1.0, 1.0],
                [1.0, -1.0, -1.0],
                [1.0, 1.0, -1.0],
                [1.0, 1.0, 1.0],
            ],
            [70, 110, 240, 255],
        ),
        // -X left, yellow
        (
            [-1.0, 0.0, 0.0],
            [
                [-1.0, -1.0, -1.0],
                [-1.0, -1.0, 1.0],
                [-1.0, 1.0, 1.0],
                [-1.0, 1.0, -1.0],
            ],
            [235, 200, 60, 255],
        ),
        // +Y top, cyan
        (
            [0.0, 1.0, 0.0],
            [
                [-1.0, 1.0, 1.0],
                [1.0, 1.0, 1.0],
                [1.0, 1.0, -1.0],
                [-1.0, 1.0, -1.0],
            ],
            [70, 210, 220, 255],
        ),
        // -Y bottom, magenta
        (
            [0.0, -1.0, 0.0],
            [
                [-1.0, -1.0, -1.0],
                [1.0, -1.0, -1.0],
                [1.0, -1.0, 1.0],
                [-1.0, -1.0, 1.0],
            ],
            [210, 80, 200, 255],
        ),
    ];

    let mut vertices = renderer.make_vertex_buffer(cube_vertex_format(), 24);
    let mut indices = renderer.make_index_buffer(IndexFormat::U16, 36);

    let bytes = &mut vertices.arrays[0];
    bytes.clear();
    for (_, corners, color) in &FACES {
        for corner in corners {
            for component in corner {
                bytes.extend_from_slice(&component.to_ne_bytes());
            }
            bytes.extend_from_slice(color);
        }
    }

    let index_bytes = &mut indices.data;
    index_bytes.clear();
    for face in 0u16..6 {
        let base = face * 4;
        for offset in [0, 1, 2, 2, 3, 0] {
            index_bytes.extend_from_slice(&(base + offset).to_ne_bytes());
        }
    }

    (vertices, indices)
}
