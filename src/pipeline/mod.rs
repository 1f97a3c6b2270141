//! Frame pipeline
//!
//! - `upload`: frame pixels into the sampling texture
//! - `readback`: render target pixels into sink frames
//! - `sequencer`: the per-frame loop and release sequence
//! - `session`: startup wiring and fatal errors
//! - `presenter`: optional window collaborator

pub mod presenter;
pub mod readback;
pub mod sequencer;
pub mod session;
pub mod upload;

pub use presenter::Presenter;
pub use readback::adapt_readback;
pub use sequencer::{FrameCounters, PipelineContext, Sequencer, SequencerState};
pub use session::{create_backend, start_session, start_with, StartupError};
pub use upload::{
    select_upload_strategy, texture_pixels, DoubleBufferUpload, SingleBufferUpload, SlotRotation, UploadOutcome,
    UploadStrategy,
};
