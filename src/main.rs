// =============================================================================
// FRESNEL - Two-pass Vulkan presentation demo
// =============================================================================
//
// Opens a window, wires the renderer through the module registry and renders a
// fullscreen gradient (scene pass) with a banner composed on top (overlay pass)
// on every redraw.
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence
// 2. Acquire swapchain image
// 3. Wait for whichever slot still renders into that image
// 4. Record scene + overlay command buffers
// 5. Submit both in one batch
// 6. Present, advance the slot
//
// =============================================================================

use anyhow::Result;
use clap::Parser;
use fresnel::config::DEFAULT_CONFIG_PATH;
use fresnel::registry::{Handle, Module, Registry};
use fresnel::{
    BannerOverlay, Config, NoOverlay, OverlayProducer, RenderError, RenderResult, Renderer,
    TickOutcome, WinitSurface,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

#[derive(Parser, Debug)]
#[command(name = "fresnel", version, about = "Two-pass Vulkan presentation demo")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    /// Present the scene without the banner overlay
    #[arg(long)]
    no_overlay: bool,
}

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_or_default(&args.config);
    log::info!("Starting Fresnel");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, &args);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

// =============================================================================
// MODULES
// =============================================================================

struct ConfigModule {
    config: Config,
}

impl Module for ConfigModule {}

struct WindowModule {
    window: Arc<Window>,
}

impl Module for WindowModule {}

/// Builds the renderer from the registered config and window
#[derive(Default)]
struct RenderModule {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Option<Config>,
}

impl Module for RenderModule {
    fn wire(&mut self, registry: &Registry) -> RenderResult<()> {
        let config = registry.instance::<ConfigModule>("config")?;
        self.config = Some(config.borrow().config.clone());

        let window = registry.instance::<WindowModule>("window")?;
        self.window = Some(Arc::clone(&window.borrow().window));
        Ok(())
    }

    fn init(&mut self) -> RenderResult<()> {
        let (Some(config), Some(window)) = (&self.config, &self.window) else {
            return Err(RenderError::Registry(
                "renderer needs a config and a window".into(),
            ));
        };

        let surfaces = Box::new(WinitSurface::new(Arc::clone(window)));
        self.renderer = Some(Renderer::new(surfaces, config)?);
        Ok(())
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window.
struct App {
    renderer: Option<Handle<RenderModule>>,
    registry: Registry,
    window: Option<Arc<Window>>,
    overlay: Box<dyn OverlayProducer>,
    config: Config,

    frame_limit: Option<u64>,
    presented: u64,
    error: Option<RenderError>,

    is_minimized: bool,
    is_fullscreen: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config, args: &Args) -> Self {
        let overlay: Box<dyn OverlayProducer> = if args.no_overlay || !config.overlay.enabled {
            Box::new(NoOverlay)
        } else {
            Box::new(BannerOverlay::from_config(&config.overlay))
        };

        let now = Instant::now();
        Self {
            renderer: None,
            registry: Registry::new(),
            window: None,
            overlay,
            is_fullscreen: config.window.fullscreen,
            config,
            frame_limit: args.frames,
            presented: 0,
            error: None,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn with_renderer<R>(&self, f: impl FnOnce(&mut Renderer) -> R) -> Option<R> {
        let handle = self.renderer.as_ref()?;
        let mut module = handle.borrow_mut();
        module.renderer.as_mut().map(f)
    }

    fn init_renderer(&mut self, window: Arc<Window>) -> RenderResult<()> {
        let config = self.config.clone();
        self.registry.register("config", move || ConfigModule {
            config: config.clone(),
        });
        self.registry.register("window", move || WindowModule {
            window: Arc::clone(&window),
        });
        self.registry.register("renderer", RenderModule::default);

        self.renderer = Some(self.registry.get::<RenderModule>("renderer")?);
        Ok(())
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_minimized {
            return;
        }

        let outcome = {
            let Some(handle) = &self.renderer else {
                return;
            };
            let mut module = handle.borrow_mut();
            let Some(renderer) = module.renderer.as_mut() else {
                return;
            };
            renderer.render_frame(self.overlay.as_mut())
        };

        match outcome {
            Ok(TickOutcome::Presented { .. }) => {
                self.presented += 1;
                self.update_fps();

                if self.frame_limit.is_some_and(|limit| self.presented >= limit) {
                    log::info!("Presented {} frames, exiting...", self.presented);
                    event_loop.exit();
                }
            }
            Ok(TickOutcome::Skipped(reason)) => {
                log::debug!("Frame skipped: {:?}", reason);
            }
            Err(e) => {
                log::error!("Render error: {}", e);
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        let Some(window) = &self.window else {
            return;
        };

        self.is_fullscreen = !self.is_fullscreen;
        if self.is_fullscreen {
            window.set_fullscreen(Some(Fullscreen::Borderless(None)));
            log::info!("Entered fullscreen mode");
        } else {
            window.set_fullscreen(None);
            log::info!("Exited fullscreen mode");
        }

        self.with_renderer(Renderer::resized);
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.window.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(window) = &self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
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
            .with_resizable(self.config.window.resizable)
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
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(Arc::clone(&window)) {
            log::error!("Failed to initialize renderer: {}", e);
            self.error = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(Err(e)) = self.with_renderer(Renderer::wait_idle) {
                    log::error!("Failed to drain GPU work: {}", e);
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                self.is_minimized = size.width == 0 || size.height == 0;
                if !self.is_minimized {
                    self.with_renderer(Renderer::resized);
                }
            }

            WindowEvent::RedrawRequested => self.render(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if !event.state.is_pressed() {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                    PhysicalKey::Code(KeyCode::F11) => self.toggle_fullscreen(),
                    _ => {}
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing continuously
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        // The renderer must not outlive the window it presents to
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}
