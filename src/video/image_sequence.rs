//! Image sequence source and sink
//!
//! A directory of numbered stills stands in for a video container when
//! FFmpeg is not available. Files are read in lexical order, so zero-padded
//! numbering is expected.

use std::path::{Path, PathBuf};

use super::sink::check_frame;
use super::{FourCc, Frame, FrameSink, FrameSource, PixelLayout, SinkError, SourceError, StreamInfo};

/// Extensions recognised as stills (lowercase)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Whether `path` looks like a still image
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reads a directory of stills as `Bgr8` frames
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    info: StreamInfo,
}

impl ImageSequenceSource {
    /// Scan `dir` for stills; the first image fixes the stream size
    pub fn open(dir: &Path, frame_rate: f64) -> Result<Self, SourceError> {
        if !dir.exists() {
            return Err(SourceError::NotFound(dir.to_path_buf()));
        }
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::Open {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_path(path))
            .collect();
        files.sort();

        let first = files.first().ok_or_else(|| SourceError::Empty(dir.to_path_buf()))?;
        let (width, height) = image::image_dimensions(first).map_err(|source| SourceError::Image {
            path: first.clone(),
            source,
        })?;

        tracing::info!(
            "Opened image sequence {}: {} frames, {}x{} @ {:.2}fps",
            dir.display(),
            files.len(),
            width,
            height,
            frame_rate
        );

        let frame_count = files.len() as u64;
        Ok(Self {
            files,
            next: 0,
            info: StreamInfo {
                width,
                height,
                frame_rate,
                frame_count: Some(frame_count),
                codec: None,
            },
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let index = self.next as u64;
        self.next += 1;

        let rgb = image::open(path)
            .map_err(|source| SourceError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        let (width, height) = rgb.dimensions();
        if (width, height) != (self.info.width, self.info.height) {
            // Resized to the texture downstream like any other frame
            tracing::debug!(
                "{} is {}x{}, sequence started at {}x{}",
                path.display(),
                width,
                height,
                self.info.width,
                self.info.height
            );
        }

        let frame = Frame::new(rgb.into_raw(), width, height, PixelLayout::Rgb8, index);
        Ok(Some(frame.to_layout(PixelLayout::Bgr8)))
    }
}

/// Writes frames as numbered PNG files
pub struct ImageSequenceSink {
    dir: PathBuf,
    width: u32,
    height: u32,
    written: u64,
    finished: bool,
}

impl ImageSequenceSink {
    /// Create (or reuse) the output directory
    pub fn create(dir: &Path, width: u32, height: u32, codec: FourCc) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(|source| SinkError::Create {
            path: dir.to_path_buf(),
            source,
        })?;
        if !codec.is_inherit() && codec != FourCc::default() {
            tracing::debug!("Codec {} ignored for image sequence output", codec);
        }
        tracing::info!("Writing {}x{} PNG sequence to {}", width, height, dir.display());

        Ok(Self {
            dir: dir.to_path_buf(),
            width,
            height,
            written: 0,
            finished: false,
        })
    }

    /// Path of the `index`th output image
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }
}

impl FrameSink for ImageSequenceSink {
    fn expected_layout(&self) -> PixelLayout {
        PixelLayout::Rgb8
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        check_frame(frame, self.width, self.height, PixelLayout::Rgb8)?;

        let path = self.frame_path(self.written);
        image::save_buffer(&path, &frame.data, frame.width, frame.height, image::ExtendedColorType::Rgb8)
            .map_err(|source| SinkError::Image { path, source })?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if !self.finished {
            self.finished = true;
            tracing::info!("Wrote {} frames to {}", self.written, self.dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        img.save(path).unwrap();
    }

    #[test]
    fn test_reads_in_lexical_order_as_bgr() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("0002.png"), 2, 2, [0, 0, 255]);
        write_png(&dir.path().join("0001.png"), 2, 2, [255, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 25.0).unwrap();
        assert_eq!(source.info().frame_count, Some(2));
        assert_eq!(source.info().frame_rate, 25.0);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.layout, PixelLayout::Bgr8);
        assert_eq!(first.pixel(0, 0), &[0, 0, 255]);
        let second = source.read_frame().unwrap().unwrap();
        assert_eq!(second.pixel(1, 1), &[255, 0, 0]);
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 30.0),
            Err(SourceError::Empty(_))
        ));
    }

    #[test]
    fn test_size_change_keeps_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 2, 2, [1, 2, 3]);
        write_png(&dir.path().join("b.png"), 3, 2, [1, 2, 3]);
        write_png(&dir.path().join("c.png"), 2, 2, [1, 2, 3]);

        let mut source = ImageSequenceSource::open(dir.path(), 30.0).unwrap();
        let sizes: Vec<(u32, u32, u64)> = std::iter::from_fn(|| source.read_frame().unwrap())
            .map(|f| (f.width, f.height, f.frame_index))
            .collect();
        assert_eq!(sizes, vec![(2, 2, 0), (3, 2, 1), (2, 2, 2)]);
    }

    #[test]
    fn test_sink_writes_numbered_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("outF");
        let mut sink = ImageSequenceSink::create(&out, 2, 1, FourCc::XVID).unwrap();

        let frame = Frame::new(vec![10, 20, 30, 40, 50, 60], 2, 1, PixelLayout::Rgb8, 0);
        sink.write_frame(&frame).unwrap();
        sink.write_frame(&frame).unwrap();
        sink.finish().unwrap();

        let saved = image::open(out.join("frame_000001.png")).unwrap().to_rgb8();
        assert_eq!(saved.get_pixel(1, 0).0, [40, 50, 60]);
        assert!(matches!(sink.write_frame(&frame), Err(SinkError::Finished)));
    }

    #[test]
    fn test_sink_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageSequenceSink::create(dir.path(), 4, 4, FourCc::XVID).unwrap();
        let frame = Frame::solid(2, 2, PixelLayout::Rgb8, &[0, 0, 0]);
        assert!(matches!(sink.write_frame(&frame), Err(SinkError::FrameMismatch { .. })));
    }
}
