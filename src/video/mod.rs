//! Video input and output
//!
//! The warp pipeline reads frames through `FrameSource` and writes them
//! through `FrameSink`. Image sequences are always available; container
//! formats go through FFmpeg when the `ffmpeg` feature is enabled.

mod codec;
#[cfg(feature = "ffmpeg")]
mod decoder;
#[cfg(feature = "ffmpeg")]
mod encoder;
mod frame;
mod image_sequence;
mod sink;
mod source;

use std::path::Path;

pub use codec::{CodecFamily, FourCc, FourCcError};
#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;
#[cfg(feature = "ffmpeg")]
pub use encoder::FfmpegSink;
pub(crate) use frame::convert_row;
pub use frame::{Frame, PixelLayout};
pub use image_sequence::{is_image_path, ImageSequenceSink, ImageSequenceSource, IMAGE_EXTENSIONS};
pub use sink::{FrameSink, SinkError};
pub use source::{FrameSource, FrameSourceAdapter, SourceError, StreamInfo};

/// Output stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Requested codec; `NULL` inherits `input_codec`
    pub codec: FourCc,
    pub input_codec: Option<FourCc>,
}

/// Open `path` as a frame source
///
/// Directories are read as image sequences, anything else as a video file.
pub fn open_source(path: &Path, sequence_fps: f64) -> Result<Box<dyn FrameSource>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Ok(Box::new(ImageSequenceSource::open(path, sequence_fps)?));
    }
    open_video_source(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video_source(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Ok(Box::new(FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_source(path: &Path) -> Result<Box<dyn FrameSource>, SourceError> {
    Err(SourceError::Unsupported(path.to_path_buf()))
}

/// Open `path` as a frame sink
///
/// Paths without an extension (or existing directories) become image
/// sequences, anything else a video container.
pub fn open_sink(path: &Path, config: &SinkConfig) -> Result<Box<dyn FrameSink>, SinkError> {
    if path.is_dir() || path.extension().is_none() {
        return Ok(Box::new(ImageSequenceSink::create(
            path,
            config.width,
            config.height,
            config.codec,
        )?));
    }
    open_video_sink(path, config)
}

#[cfg(feature = "ffmpeg")]
fn open_video_sink(path: &Path, config: &SinkConfig) -> Result<Box<dyn FrameSink>, SinkError> {
    Ok(Box::new(FfmpegSink::create(
        path,
        config.width,
        config.height,
        config.frame_rate,
        config.codec,
        config.input_codec,
    )?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_sink(path: &Path, _config: &SinkConfig) -> Result<Box<dyn FrameSink>, SinkError> {
    Err(SinkError::Unsupported(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_is_not_found() {
        let result = open_source(Path::new("/nonexistent/clip"), 30.0);
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_extensionless_output_is_image_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = SinkConfig {
            width: 4,
            height: 4,
            frame_rate: 30.0,
            codec: FourCc::XVID,
            input_codec: None,
        };
        let sink = open_sink(&dir.path().join("clipF"), &config).unwrap();
        assert_eq!(sink.expected_layout(), PixelLayout::Rgb8);
    }
}
