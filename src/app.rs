//! Windowed driver
//!
//! Runs the warp loop from the winit event loop: one sequencer tick per
//! redraw, with the window title tracking progress. Escape or closing the
//! window stops the batch early; everything written so far is kept.

use std::path::PathBuf;
use std::sync::Arc;

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::pipeline::{create_backend, start_session, Presenter, Sequencer, SequencerState};
use crate::settings::WarpSettings;
use crate::video::Frame;

pub const WINDOW_TITLE: &str = "Immersive Warp";

/// Frames between window title updates
const TITLE_INTERVAL: u64 = 30;

/// Presenter backed by a winit window
pub struct WindowPresenter {
    window: Arc<Window>,
}

impl WindowPresenter {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }
}

impl Presenter for WindowPresenter {
    fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width.max(1), size.height.max(1))
    }

    fn present(&mut self, frame: &Frame) {
        if frame.frame_index % TITLE_INTERVAL == 0 {
            self.window
                .set_title(&format!("{} - frame {}", WINDOW_TITLE, frame.frame_index));
        }
    }

    fn close(&mut self) {
        self.window.set_title(&format!("{} - done", WINDOW_TITLE));
    }
}

enum AppState {
    Uninitialized,
    Running {
        window: Arc<Window>,
        sequencer: Sequencer,
    },
    Finished,
}

/// What to warp, handed to the event loop
pub struct WarpJob {
    pub settings: WarpSettings,
    pub input: PathBuf,
    pub output: PathBuf,
    pub software: bool,
}

/// winit application running one warp job
pub struct WarpApp {
    job: WarpJob,
    state: AppState,
    exit_code: i32,
}

impl WarpApp {
    pub fn new(job: WarpJob) -> Self {
        Self {
            job,
            state: AppState::Uninitialized,
            exit_code: 0,
        }
    }

    /// Process exit code once the event loop has returned
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) {
        let settings = &self.job.settings;
        let window_attributes = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(settings.window_width, settings.window_height));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                self.fail(event_loop, 1);
                return;
            }
        };
        tracing::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        let presenter: Box<dyn Presenter> = Box::new(WindowPresenter::new(window.clone()));
        let session = create_backend(settings, self.job.software).and_then(|backend| {
            start_session(settings, &self.job.input, &self.job.output, backend, Some(presenter))
        });

        match session {
            Ok(sequencer) => {
                window.request_redraw();
                self.state = AppState::Running { window, sequencer };
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.fail(event_loop, e.exit_code());
            }
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, code: i32) {
        self.exit_code = code;
        self.state = AppState::Finished;
        event_loop.exit();
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let AppState::Running { sequencer, .. } = &mut self.state {
            sequencer.shutdown();
        }
        self.state = AppState::Finished;
        event_loop.exit();
    }
}

impl ApplicationHandler for WarpApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if matches!(self.state, AppState::Uninitialized) {
            self.start(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let AppState::Running { window, sequencer } = &mut self.state else {
            return;
        };
        if window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Window closed, stopping");
                self.stop(event_loop);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        tracing::info!("Escape pressed, stopping");
                        self.stop(event_loop);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if sequencer.tick() == SequencerState::Terminated {
                    self.state = AppState::Finished;
                    event_loop.exit();
                } else {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        match &self.state {
            AppState::Running { .. } => event_loop.set_control_flow(ControlFlow::Poll),
            _ => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}
