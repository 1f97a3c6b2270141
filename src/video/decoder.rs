//! Video decoder using FFmpeg
//!
//! Decodes the best video stream of a container to packed `BGR24` frames via
//! the ffmpeg-next crate.

use std::path::Path;

use super::{FourCc, Frame, FrameSource, PixelLayout, SourceError, StreamInfo};

impl From<ffmpeg_next::Error> for SourceError {
    fn from(e: ffmpeg_next::Error) -> Self {
        SourceError::Decode(e.to_string())
    }
}

/// FourCC for a decoder name, where one is conventional
fn fourcc_for_codec(name: &str) -> Option<FourCc> {
    let code = match name {
        "h264" => "H264",
        "hevc" => "HEVC",
        "mpeg4" => "FMP4",
        "mjpeg" => "MJPG",
        _ => return None,
    };
    code.parse().ok()
}

/// FFmpeg-backed frame source
pub struct FfmpegSource {
    input: ffmpeg_next::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    info: StreamInfo,
    /// All packets have been sent to the decoder
    input_exhausted: bool,
    /// The decoder has returned its last frame
    finished: bool,
}

impl FfmpegSource {
    /// Open a video file for decoding
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        ffmpeg_next::init()?;

        let input = ffmpeg_next::format::input(&path).map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let video_stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| SourceError::Open {
                path: path.to_path_buf(),
                reason: "no video stream".into(),
            })?;
        let video_stream_index = video_stream.index();

        let rate = video_stream.avg_frame_rate();
        let frame_rate = if rate.denominator() > 0 && rate.numerator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            30.0
        };
        let frame_count = match video_stream.frames() {
            n if n > 0 => Some(n as u64),
            _ => None,
        };

        let context = ffmpeg_next::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context.decoder().video().map_err(|e| SourceError::Open {
            path: path.to_path_buf(),
            reason: format!("failed to create video decoder: {}", e),
        })?;
        let codec_name = decoder
            .codec()
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::BGR24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        tracing::info!(
            "Opened video: {}x{} @ {:.2}fps, {} frames, codec: {}",
            width,
            height,
            frame_rate,
            frame_count.map(|n| n.to_string()).unwrap_or_else(|| "unknown".into()),
            codec_name
        );

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            scaler,
            info: StreamInfo {
                width,
                height,
                frame_rate,
                frame_count,
                codec: fourcc_for_codec(&codec_name),
            },
            input_exhausted: false,
            finished: false,
        })
    }

    /// Scale a decoded frame to packed BGR, dropping row padding
    fn convert(&mut self, decoded: &ffmpeg_next::frame::Video) -> Result<Frame, SourceError> {
        let mut bgr = ffmpeg_next::frame::Video::empty();
        self.scaler.run(decoded, &mut bgr)?;

        let width = self.info.width;
        let height = self.info.height;
        let data = bgr.data(0);
        let stride = bgr.stride(0);
        let row_bytes = width as usize * 3;

        let pixels = if stride == row_bytes {
            data[..row_bytes * height as usize].to_vec()
        } else {
            let mut output = Vec::with_capacity(row_bytes * height as usize);
            for y in 0..height as usize {
                let start = y * stride;
                output.extend_from_slice(&data[start..start + row_bytes]);
            }
            output
        };
        Ok(Frame::new(pixels, width, height, PixelLayout::Bgr8, 0))
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.finished {
            return Ok(None);
        }

        let mut decoded = ffmpeg_next::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => return self.convert(&decoded).map(Some),
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => {
                    // Need more input
                }
                Err(ffmpeg_next::Error::Eof) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => return Err(SourceError::Decode(e.to_string())),
            }

            if self.input_exhausted {
                // Flushed decoder still asks for input: nothing left
                self.finished = true;
                return Ok(None);
            }

            loop {
                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.video_stream_index {
                            self.decoder.send_packet(&packet)?;
                            break;
                        }
                    }
                    None => {
                        self.decoder.send_eof()?;
                        self.input_exhausted = true;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_names_map_to_fourcc() {
        assert_eq!(fourcc_for_codec("h264").map(|c| c.to_string()), Some("H264".into()));
        assert_eq!(fourcc_for_codec("mpeg4").map(|c| c.to_string()), Some("FMP4".into()));
        assert_eq!(fourcc_for_codec("prores"), None);
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let result = FfmpegSource::open(Path::new("/nonexistent/input.avi"));
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }
}
