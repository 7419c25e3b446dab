//! Object Detection App - Main Entry Point
//!
//! Reads frames from a camera, optionally runs object detection on each
//! frame, overlays bounding boxes and labels, and renders the result in a
//! window with start/stop controls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camera_detect::camera::CameraSource;
use camera_detect::catalog::ClassCatalog;
use camera_detect::config;
use camera_detect::detect::SsdDetector;
use camera_detect::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// UI redraw pacing when no loop iteration is due sooner.
const UI_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Collaborators loaded before the window exists. Model and class list are
/// startup-fatal; the camera handle lives here for the process lifetime.
struct Startup {
    camera: CameraSource,
    detector: SsdDetector,
    catalog: ClassCatalog,
}

/// Application state machine
enum AppState {
    /// Initial state before the window is created
    Uninitialized,
    /// Window and graphics context are ready
    Running {
        window: Arc<Window>,
        /// Secondary display window, kept open but not driven by the frame
        /// render path.
        _output_window: Arc<Window>,
        app: App,
    },
}

/// Main application handler implementing winit's ApplicationHandler trait
struct DetectionApp {
    startup: Option<Startup>,
    state: AppState,
    next_redraw_at: Instant,
}

impl DetectionApp {
    fn new(startup: Startup) -> Self {
        Self {
            startup: Some(startup),
            state: AppState::Uninitialized,
            next_redraw_at: Instant::now(),
        }
    }
}

impl ApplicationHandler for DetectionApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Only initialize if we haven't already
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }
        let Some(startup) = self.startup.take() else {
            return;
        };

        log::info!("Creating window...");

        let window_attributes = WindowAttributes::default()
            .with_title(config::WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(config::WINDOW_WIDTH, config::WINDOW_HEIGHT));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .expect("Failed to create window"),
        );

        let output_attributes = WindowAttributes::default()
            .with_title(config::OUTPUT_WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(
                config::OUTPUT_WINDOW_WIDTH,
                config::OUTPUT_WINDOW_HEIGHT,
            ));

        let output_window = Arc::new(
            event_loop
                .create_window(output_attributes)
                .expect("Failed to create output window"),
        );

        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        // Initialize wgpu and egui
        log::info!("Initializing wgpu and egui...");
        let app = pollster::block_on(App::new(
            window.clone(),
            startup.camera,
            startup.detector,
            startup.catalog,
        ));

        log::info!("Object Detection App ready!");
        log::info!("Press q to quit");

        self.state = AppState::Running {
            window,
            _output_window: output_window,
            app,
        };
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        // Only handle events if we're running
        let AppState::Running { window, app, .. } = &mut self.state else {
            return;
        };

        // The secondary output window has no interactions of its own
        if window_id != window.id() {
            return;
        }

        // Let egui handle the event first
        let egui_consumed = app.handle_window_event(&event);

        match event {
            // Handle close request
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                app.stop_detection();
                event_loop.exit();
            }

            // Handle keyboard input (only if egui doesn't want it)
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if !egui_consumed => {
                // q to quit and stop detection
                if key_code == KeyCode::KeyQ {
                    log::info!("q pressed, exiting...");
                    app.stop_detection();
                    event_loop.exit();
                }
            }

            // Handle window resize
            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            // Handle redraw request
            WindowEvent::RedrawRequested => {
                // Run the armed loop iteration if its deadline has passed
                app.poll_loop(Instant::now());

                // Render frame
                match app.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => {
                        log::warn!("Surface lost, reconfiguring...");
                        app.resize(app.size());
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of GPU memory!");
                        event_loop.exit();
                    }
                    Err(e) => {
                        log::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, app, .. } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Wake for the next UI redraw or the next loop iteration,
        // whichever is sooner
        let mut wake_at = self.next_redraw_at;
        if let Some(deadline) = app.next_loop_deadline() {
            wake_at = wake_at.min(deadline);
        }

        let now = Instant::now();
        if now >= wake_at {
            window.request_redraw();
            self.next_redraw_at = now + UI_FRAME_INTERVAL;
        } else {
            event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Object Detection App v0.1.0");

    // Startup file dependencies; missing any of these is fatal
    let catalog = ClassCatalog::load(config::CLASS_LIST_PATH)?;
    let detector = SsdDetector::load(config::MODEL_WEIGHTS_PATH, config::MODEL_MANIFEST_PATH)?;

    // The camera is best-effort: a device that fails to open just produces
    // failed reads, it never aborts startup
    let camera = CameraSource::open(
        config::CAMERA_INDEX,
        config::CAPTURE_WIDTH,
        config::CAPTURE_HEIGHT,
        config::CAPTURE_BRIGHTNESS,
    );

    // Create event loop
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    // Create and run application
    let mut app = DetectionApp::new(Startup {
        camera,
        detector,
        catalog,
    });
    event_loop.run_app(&mut app).expect("Event loop error");

    Ok(())
}
