//! Immersive Warp Library
//!
//! Mesh-based pre-distortion of video for projection onto domes and curved
//! screens. Frames flow from a source through a sampling texture, get
//! rasterized through the calibration mesh, and are read back into a sink.

pub mod app;
pub mod gpu;
pub mod pipeline;
pub mod settings;
pub mod shaders;
pub mod telemetry;
pub mod video;
pub mod warp;

pub use app::{WarpApp, WarpJob, WindowPresenter};
pub use gpu::{Capabilities, SoftwareBackend, WarpBackend, WgpuBackend};
pub use pipeline::{start_session, FrameCounters, Sequencer, SequencerState, StartupError};
pub use settings::{output_path_for, SettingsError, WarpSettings};
pub use video::{Frame, FrameSink, FrameSource, PixelLayout};
pub use warp::{load_mesh, Mesh, MeshLoadError, UvPolicy};
