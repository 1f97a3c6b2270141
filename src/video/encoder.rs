//! Video encoder using FFmpeg
//!
//! Accepts packed `BGR24` frames, converts them to the encoder's YUV format
//! and muxes into the container implied by the output extension.

use std::path::{Path, PathBuf};

use super::sink::check_frame;
use super::{CodecFamily, FourCc, Frame, FrameSink, PixelLayout, SinkError};

impl From<ffmpeg_next::Error> for SinkError {
    fn from(e: ffmpeg_next::Error) -> Self {
        SinkError::Encode(e.to_string())
    }
}

/// Map a requested FourCC to an encoder, resolving the `NULL` sentinel
fn codec_id(requested: FourCc, input: Option<FourCc>) -> ffmpeg_next::codec::Id {
    let code = if requested.is_inherit() {
        input.unwrap_or_default()
    } else {
        requested
    };
    match code.family() {
        Some(CodecFamily::Mpeg4) => ffmpeg_next::codec::Id::MPEG4,
        Some(CodecFamily::H264) => ffmpeg_next::codec::Id::H264,
        Some(CodecFamily::Hevc) => ffmpeg_next::codec::Id::HEVC,
        Some(CodecFamily::Mjpeg) => ffmpeg_next::codec::Id::MJPEG,
        None => {
            tracing::warn!("No encoder known for FourCC {}, using MPEG-4 Part 2", code);
            ffmpeg_next::codec::Id::MPEG4
        }
    }
}

/// FFmpeg-backed frame sink
pub struct FfmpegSink {
    path: PathBuf,
    output: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::encoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg_next::Rational,
    stream_time_base: ffmpeg_next::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    finished: bool,
}

impl FfmpegSink {
    /// Create the output container and open the encoder
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
        codec: FourCc,
        input_codec: Option<FourCc>,
    ) -> Result<Self, SinkError> {
        ffmpeg_next::init()?;
        let open_err = |reason: String| SinkError::Open {
            path: path.to_path_buf(),
            reason,
        };

        let mut output = ffmpeg_next::format::output(&path).map_err(|e| open_err(e.to_string()))?;
        let id = codec_id(codec, input_codec);
        let encoder_codec = ffmpeg_next::encoder::find(id).ok_or_else(|| open_err(format!("no encoder for {:?}", id)))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let rate = ffmpeg_next::Rational::from(if frame_rate > 0.0 { frame_rate } else { 30.0 });
        let time_base = rate.invert();
        let pixel_format = if id == ffmpeg_next::codec::Id::MJPEG {
            ffmpeg_next::format::Pixel::YUVJ420P
        } else {
            ffmpeg_next::format::Pixel::YUV420P
        };

        let mut stream = output.add_stream(encoder_codec)?;
        let stream_index = stream.index();

        let mut encoder = ffmpeg_next::codec::context::Context::new_with_codec(encoder_codec)
            .encoder()
            .video()?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(rate));
        if global_header {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(encoder_codec)
            .map_err(|e| open_err(format!("failed to open encoder: {}", e)))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        output.write_header().map_err(|e| open_err(e.to_string()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(time_base);

        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::BGR24,
            width,
            height,
            pixel_format,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        tracing::info!(
            "Encoding {}x{} @ {:.2}fps with {:?} to {}",
            width,
            height,
            frame_rate,
            id,
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base: time_base,
            stream_time_base,
            width,
            height,
            next_pts: 0,
            finished: false,
        })
    }

    /// Write every packet the encoder has ready
    fn drain_packets(&mut self) -> Result<(), SinkError> {
        let mut packet = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output)?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn expected_layout(&self) -> PixelLayout {
        PixelLayout::Bgr8
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        check_frame(frame, self.width, self.height, PixelLayout::Bgr8)?;

        let mut bgr = ffmpeg_next::frame::Video::new(ffmpeg_next::format::Pixel::BGR24, self.width, self.height);
        let stride = bgr.stride(0);
        let row_bytes = frame.stride();
        let plane = bgr.data_mut(0);
        for (y, row) in frame.data.chunks_exact(row_bytes).enumerate() {
            plane[y * stride..y * stride + row_bytes].copy_from_slice(row);
        }

        let mut yuv = ffmpeg_next::frame::Video::empty();
        self.scaler.run(&bgr, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder.send_frame(&yuv)?;
        self.drain_packets()
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.encoder.send_eof()?;
        self.drain_packets()?;
        self.output.write_trailer()?;
        tracing::info!("Finished writing {} frames to {}", self.next_pts, self.path.display());
        Ok(())
    }
}
