//! Output sequencer
//!
//! Drives the per-frame loop: pull a frame, upload it, rasterize, read back,
//! present and write. The sequencer owns every pipeline resource through
//! `PipelineContext` and releases them exactly once when it terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::presenter::Presenter;
use super::readback::adapt_readback;
use super::upload::{UploadOutcome, UploadStrategy};
use crate::gpu::{BackendError, WarpBackend};
use crate::telemetry::ThroughputMeter;
use crate::video::{Frame, FrameSink, FrameSourceAdapter};
use crate::warp::{Mesh, WarpRasterizer};

/// Frame counts for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounters {
    /// Frames pulled from the source
    pub read: u64,
    /// Frames that reached the sampling texture
    pub uploaded: u64,
    /// Frames dropped by the upload stage
    pub skipped: u64,
    /// Frames rasterized and read back
    pub rendered: u64,
    /// Frames accepted by the sink
    pub written: u64,
    /// Frames the sink (or the render/readback step) failed on
    pub write_failures: u64,
}

/// Sequencer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Running,
    Terminated,
}

/// Everything the loop needs, owned in one place
pub struct PipelineContext {
    /// Calibration mesh; dropped first on shutdown
    pub mesh: Option<Mesh>,
    pub source: FrameSourceAdapter,
    pub sink: Box<dyn FrameSink>,
    pub backend: Box<dyn WarpBackend>,
    pub upload: Box<dyn UploadStrategy>,
    pub rasterizer: WarpRasterizer,
    pub presenter: Option<Box<dyn Presenter>>,
    pub meter: ThroughputMeter,
}

/// Two-state driver for the warp loop
pub struct Sequencer {
    context: PipelineContext,
    state: SequencerState,
    counters: FrameCounters,
    released: bool,
}

impl Sequencer {
    pub fn new(mut context: PipelineContext) -> Self {
        context.meter.start(Instant::now());
        Self {
            context,
            state: SequencerState::Running,
            counters: FrameCounters::default(),
            released: false,
        }
    }

    /// Run one step of the loop
    pub fn tick(&mut self) -> SequencerState {
        if self.state == SequencerState::Terminated {
            return self.state;
        }

        let frame = self.context.source.next_frame();
        if frame.is_some() {
            self.counters.read += 1;
        }

        let ctx = &mut self.context;
        let outcome = ctx.upload.submit(ctx.backend.as_mut(), frame.as_ref());
        self.counters.uploaded = ctx.upload.uploaded();
        self.counters.skipped = ctx.upload.skipped();

        match outcome {
            UploadOutcome::Ready => self.render_and_write(),
            UploadOutcome::Pending => {}
            UploadOutcome::Drained => {
                tracing::info!("Source drained after {} frames", self.counters.read);
                self.terminate();
            }
        }
        self.state
    }

    /// Stop on external request; safe to call repeatedly
    pub fn shutdown(&mut self) -> SequencerState {
        if self.state == SequencerState::Running {
            tracing::info!("Shutdown requested after {} frames", self.counters.written);
            self.terminate();
        }
        self.state
    }

    /// Tick until the source is drained
    pub fn run_to_completion(&mut self) -> FrameCounters {
        while self.tick() == SequencerState::Running {}
        self.counters
    }

    /// Tick until drained or until `stop` is raised
    pub fn run_until(&mut self, stop: &AtomicBool) -> FrameCounters {
        while self.state == SequencerState::Running {
            if stop.load(Ordering::SeqCst) {
                self.shutdown();
                break;
            }
            self.tick();
        }
        self.counters
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn counters(&self) -> FrameCounters {
        self.counters
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn render_frame(&mut self) -> Result<Frame, BackendError> {
        let ctx = &mut self.context;
        ctx.rasterizer.render(ctx.backend.as_mut())?;
        let image = ctx.backend.read_target()?;
        let mut frame = adapt_readback(&image, ctx.sink.expected_layout())?;
        frame.frame_index = self.counters.rendered;
        Ok(frame)
    }

    fn render_and_write(&mut self) {
        let frame = match self.render_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.write_failures += 1;
                tracing::error!("Failed to render frame {}: {}", self.counters.rendered, e);
                return;
            }
        };
        self.counters.rendered += 1;

        if let Some(presenter) = self.context.presenter.as_mut() {
            presenter.present(&frame);
        }

        match self.context.sink.write_frame(&frame) {
            Ok(()) => self.counters.written += 1,
            Err(e) => {
                self.counters.write_failures += 1;
                tracing::warn!("Failed to write frame {}: {}", frame.frame_index, e);
            }
        }

        if let Some(report) = self.context.meter.record(Instant::now()) {
            tracing::info!("Warping: {}", report);
        }
    }

    fn terminate(&mut self) {
        self.state = SequencerState::Terminated;
        self.release();
    }

    /// Release sequence, runs once
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let ctx = &mut self.context;
        ctx.mesh = None;
        ctx.upload.release(ctx.backend.as_mut());
        ctx.rasterizer.release(ctx.backend.as_mut());
        if let Some(presenter) = ctx.presenter.as_mut() {
            presenter.close();
        }
        if let Err(e) = ctx.sink.finish() {
            tracing::error!("Failed to finish output: {}", e);
        }

        let c = &self.counters;
        tracing::info!(
            "Finished: {} read, {} uploaded, {} skipped, {} rendered, {} written, {} write failures",
            c.read,
            c.uploaded,
            c.skipped,
            c.rendered,
            c.written,
            c.write_failures
        );
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.release();
    }
}
