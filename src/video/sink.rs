//! Frame sink interface

use std::path::PathBuf;

use thiserror::Error;

use super::{Frame, PixelLayout};

/// Errors raised while opening or writing a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create output {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open output {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
    #[error("{} needs a video encoder; rebuild with the `ffmpeg` feature", .0.display())]
    Unsupported(PathBuf),
    #[error("failed to write {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame is {got_width}x{got_height} {got_layout}, sink expects {width}x{height} {layout}")]
    FrameMismatch {
        width: u32,
        height: u32,
        layout: PixelLayout,
        got_width: u32,
        got_height: u32,
        got_layout: PixelLayout,
    },
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("sink already finished")]
    Finished,
}

/// An encoder consuming frames in order
pub trait FrameSink {
    /// Channel layout `write_frame` expects
    fn expected_layout(&self) -> PixelLayout;

    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Flush and close; further writes fail with `SinkError::Finished`
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Check a frame against the sink's fixed size and layout
pub(crate) fn check_frame(frame: &Frame, width: u32, height: u32, layout: PixelLayout) -> Result<(), SinkError> {
    if frame.width != width || frame.height != height || frame.layout != layout {
        return Err(SinkError::FrameMismatch {
            width,
            height,
            layout,
            got_width: frame.width,
            got_height: frame.height,
            got_layout: frame.layout,
        });
    }
    Ok(())
}
