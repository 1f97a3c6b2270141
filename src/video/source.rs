//! Frame source adapter
//!
//! Decoders implement `FrameSource`; the pipeline only ever talks to the
//! `FrameSourceAdapter`, which turns the decoder's results into a plain
//! "next frame or end-of-stream" signal.

use std::path::PathBuf;

use thiserror::Error;

use super::{FourCc, Frame};

/// Errors raised while opening or reading a source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("failed to open input {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
    #[error("no readable images in {}", .0.display())]
    Empty(PathBuf),
    #[error("{} is a video file; rebuild with the `ffmpeg` feature to read it", .0.display())]
    Unsupported(PathBuf),
    #[error("failed to decode {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Source stream metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second
    pub frame_rate: f64,
    /// Estimated number of frames, used for progress only
    pub frame_count: Option<u64>,
    /// Input codec, when the container reports one
    pub codec: Option<FourCc>,
}

/// A decoder producing frames in presentation order
pub trait FrameSource {
    /// Stream metadata
    fn info(&self) -> &StreamInfo;

    /// Decode the next frame; `Ok(None)` at end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Pulls frames from a source until end-of-stream
pub struct FrameSourceAdapter {
    source: Box<dyn FrameSource>,
    frames_read: u64,
    end_of_stream: bool,
}

impl FrameSourceAdapter {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            frames_read: 0,
            end_of_stream: false,
        }
    }

    pub fn info(&self) -> &StreamInfo {
        self.source.info()
    }

    /// Next frame, or `None` once the stream has ended
    ///
    /// A decode failure or an empty frame ends the stream. After the first
    /// `None` the decoder is never called again.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.end_of_stream {
            return None;
        }

        match self.source.read_frame() {
            Ok(Some(mut frame)) if frame.is_valid() => {
                frame.frame_index = self.frames_read;
                self.frames_read += 1;
                Some(frame)
            }
            Ok(Some(frame)) => {
                tracing::warn!(
                    "Source returned an empty {}x{} frame after {} frames; treating as end of stream",
                    frame.width,
                    frame.height,
                    self.frames_read
                );
                self.finish()
            }
            Ok(None) => {
                tracing::info!("End of stream after {} frames", self.frames_read);
                self.finish()
            }
            Err(e) => {
                tracing::error!("Decode error after {} frames, ending stream: {}", self.frames_read, e);
                self.finish()
            }
        }
    }

    fn finish(&mut self) -> Option<Frame> {
        self.end_of_stream = true;
        None
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }
}
