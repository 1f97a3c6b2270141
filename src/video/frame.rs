//! Video frame representation
//!
//! Contains the raw pixel data and metadata for a frame flowing through the
//! warp pipeline. Rows are always tightly packed, top-to-bottom.

/// Channel order of a frame's pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// 3 bytes per pixel: blue, green, red (the decoder's native order)
    Bgr8,
    /// 3 bytes per pixel: red, green, blue
    Rgb8,
    /// 4 bytes per pixel: blue, green, red, alpha
    Bgra8,
    /// 4 bytes per pixel: red, green, blue, alpha
    Rgba8,
}

impl PixelLayout {
    /// Number of bytes per pixel
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr8 | PixelLayout::Rgb8 => 3,
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => 4,
        }
    }

    /// Byte offsets of the red, green and blue channels within a pixel
    pub fn rgb_offsets(self) -> [usize; 3] {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => [0, 1, 2],
            PixelLayout::Bgr8 | PixelLayout::Bgra8 => [2, 1, 0],
        }
    }

    /// Byte offset of the alpha channel, if any
    pub fn alpha_offset(self) -> Option<usize> {
        match self {
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => Some(3),
            PixelLayout::Bgr8 | PixelLayout::Rgb8 => None,
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelLayout::Bgr8 => write!(f, "bgr8"),
            PixelLayout::Rgb8 => write!(f, "rgb8"),
            PixelLayout::Bgra8 => write!(f, "bgra8"),
            PixelLayout::Rgba8 => write!(f, "rgba8"),
        }
    }
}

/// Convert one row of pixels between layouts, appending to `dst`.
///
/// Alpha is dropped when the target has none and set opaque when the source has none.
pub(crate) fn convert_row(src: &[u8], from: PixelLayout, to: PixelLayout, dst: &mut Vec<u8>) {
    if from == to {
        dst.extend_from_slice(src);
        return;
    }

    let [r, g, b] = from.rgb_offsets();
    let [tr, tg, tb] = to.rgb_offsets();
    let from_alpha = from.alpha_offset();
    let to_alpha = to.alpha_offset();
    let out_channels = to.channels();

    for pixel in src.chunks_exact(from.channels()) {
        let mut out = [0u8; 4];
        out[tr] = pixel[r];
        out[tg] = pixel[g];
        out[tb] = pixel[b];
        if let Some(ta) = to_alpha {
            out[ta] = from_alpha.map(|a| pixel[a]).unwrap_or(u8::MAX);
        }
        dst.extend_from_slice(&out[..out_channels]);
    }
}

/// A video frame with pixel data
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Raw pixel data, `height` rows of `width * channels` bytes
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Channel order of `data`
    pub layout: PixelLayout,
    /// Position in the source stream (0-based)
    pub frame_index: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout, frame_index: u64) -> Self {
        Self {
            data,
            width,
            height,
            layout,
            frame_index,
        }
    }

    /// Create a frame filled with a single pixel value
    ///
    /// `pixel` must hold at least `layout.channels()` bytes.
    pub fn solid(width: u32, height: u32, layout: PixelLayout, pixel: &[u8]) -> Self {
        let pixel = &pixel[..layout.channels()];
        let mut data = Vec::with_capacity(Self::expected_size(width, height, layout));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(pixel);
        }
        Self::new(data, width, height, layout, 0)
    }

    /// Get the expected data size for the given dimensions and layout
    pub fn expected_size(width: u32, height: u32, layout: PixelLayout) -> usize {
        (width as usize) * (height as usize) * layout.channels()
    }

    /// Check if the frame data has the correct size
    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == Self::expected_size(self.width, self.height, self.layout)
    }

    /// Get the stride (bytes per row)
    pub fn stride(&self) -> usize {
        (self.width as usize) * self.layout.channels()
    }

    /// Get the bytes of the pixel at `(x, y)`, where `y = 0` is the top row
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let channels = self.layout.channels();
        let offset = (y as usize) * self.stride() + (x as usize) * channels;
        &self.data[offset..offset + channels]
    }

    /// Return a copy of this frame converted to another channel layout
    pub fn to_layout(&self, layout: PixelLayout) -> Frame {
        if layout == self.layout {
            return self.clone();
        }

        let mut data = Vec::with_capacity(Self::expected_size(self.width, self.height, layout));
        for row in self.data.chunks_exact(self.stride()) {
            convert_row(row, self.layout, layout, &mut data);
        }
        Frame::new(data, self.width, self.height, layout, self.frame_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let width = 1920;
        let height = 1080;
        let data = vec![0u8; Frame::expected_size(width, height, PixelLayout::Bgr8)];
        let frame = Frame::new(data, width, height, PixelLayout::Bgr8, 0);

        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert!(frame.is_valid());
        assert_eq!(frame.stride(), 1920 * 3);
    }

    #[test]
    fn test_expected_size() {
        assert_eq!(Frame::expected_size(1920, 1080, PixelLayout::Rgba8), 1920 * 1080 * 4);
        assert_eq!(Frame::expected_size(1280, 720, PixelLayout::Bgr8), 1280 * 720 * 3);
    }

    #[test]
    fn test_bgr_to_rgba_sets_opaque_alpha() {
        let frame = Frame::solid(2, 1, PixelLayout::Bgr8, &[10, 20, 30]);
        let rgba = frame.to_layout(PixelLayout::Rgba8);
        assert_eq!(rgba.data, vec![30, 20, 10, 255, 30, 20, 10, 255]);
        assert!(rgba.is_valid());
    }

    #[test]
    fn test_rgba_to_bgr_drops_alpha() {
        let frame = Frame::solid(1, 2, PixelLayout::Rgba8, &[1, 2, 3, 4]);
        let bgr = frame.to_layout(PixelLayout::Bgr8);
        assert_eq!(bgr.data, vec![3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn test_pixel_access() {
        let mut frame = Frame::solid(3, 2, PixelLayout::Rgb8, &[0, 0, 0]);
        let offset = frame.stride() + 2 * 3;
        frame.data[offset..offset + 3].copy_from_slice(&[7, 8, 9]);
        assert_eq!(frame.pixel(2, 1), &[7, 8, 9]);
        assert_eq!(frame.pixel(0, 0), &[0, 0, 0]);
    }
}
