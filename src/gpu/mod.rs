//! Device backends for the warp pipeline
//!
//! `WarpBackend` is the narrow device surface the upload strategies, the
//! rasterizer and the readback stage drive. Two implementations exist:
//! - `WgpuBackend`: real GPU rendering through wgpu
//! - `SoftwareBackend`: a deterministic CPU rasterizer that follows GL
//!   conventions (bottom-up rows, BGRA reads), used headless and in tests

pub mod context;
pub mod software;
pub mod wgpu_backend;

use thiserror::Error;

use crate::video::PixelLayout;
use crate::warp::{RenderTarget, UvPolicy, WarpGeometry};

pub use context::GpuContext;
pub use software::{AuditEvent, AuditLog, Resource, SoftwareBackend};
pub use wgpu_backend::WgpuBackend;

/// Number of transfer slots used by the double-buffered upload path
pub const SLOT_COUNT: usize = 2;

/// Errors raised by a device backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// No adapter satisfied the request
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    /// Device creation failed
    #[error("failed to create GPU device: {0}")]
    RequestDevice(String),
    /// Mapping a transfer slot for host writes failed (recoverable)
    #[error("failed to map transfer slot {slot} for writing")]
    MapFailed { slot: usize },
    /// Reading the render target back to host memory failed
    #[error("render target readback failed: {0}")]
    Readback(String),
    /// A resource was used before it was allocated
    #[error("{0} has not been allocated")]
    NotAllocated(&'static str),
    /// Pixel data does not match the allocated resource
    #[error("pixel data is {got_width}x{got_height}, resource is {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
}

/// Optional accelerations reported by the capability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Double-buffered transfer slots for texture uploads
    pub staged_upload: bool,
    /// Render targets decoupled from any visible window
    pub offscreen_target: bool,
}

impl Capabilities {
    /// Everything available
    pub fn full() -> Self {
        Self {
            staged_upload: true,
            offscreen_target: true,
        }
    }

    /// Neither acceleration available
    pub fn minimal() -> Self {
        Self {
            staged_upload: false,
            offscreen_target: false,
        }
    }
}

/// Row order of pixels read back from a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    /// First row in memory is the top of the image
    TopDown,
    /// First row in memory is the bottom of the image (GL framebuffer convention)
    BottomUp,
}

/// Rendered pixels copied into host memory
#[derive(Debug, Clone)]
pub struct ReadbackImage {
    /// Pixel rows, each `stride` bytes long
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * 4`
    pub stride: usize,
    /// Channel order of the 4-channel read
    pub layout: PixelLayout,
    pub row_order: RowOrder,
}

/// Tightly packed RGBA pixels ready for texture upload (rows top-to-bottom)
#[derive(Debug, Clone, PartialEq)]
pub struct TexturePixels {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TexturePixels {
    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }
}

/// Align a row length to the given power-of-two alignment
pub fn padded_bytes_per_row(width: u32, align: u32) -> u32 {
    (width * 4).div_ceil(align) * align
}

/// Device operations needed by the warp pipeline
///
/// Every `allocate_*` has a matching `release_*`; the sequencer calls the
/// releases exactly once during shutdown.
pub trait WarpBackend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Probe the optional accelerations
    fn capabilities(&self) -> Capabilities;

    /// Create the persistent sampling texture
    fn allocate_texture(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    /// Write pixels straight into the sampling texture
    fn write_texture(&mut self, pixels: &TexturePixels) -> Result<(), BackendError>;

    /// Create the two transfer slots, each sized for one texture upload
    fn allocate_slots(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    /// Map `slot` for host writes, copy `pixels` in and unmap.
    ///
    /// Returns `BackendError::MapFailed` when the mapping cannot be obtained.
    fn write_slot(&mut self, slot: usize, pixels: &TexturePixels) -> Result<(), BackendError>;

    /// Have the device update the sampling texture from `slot`
    fn consume_slot(&mut self, slot: usize) -> Result<(), BackendError>;

    /// Create the render target
    fn allocate_target(&mut self, target: RenderTarget) -> Result<(), BackendError>;

    /// Upload the warp geometry and sampling policy
    fn set_geometry(&mut self, geometry: &WarpGeometry, policy: UvPolicy) -> Result<(), BackendError>;

    /// Clear the target and rasterize the geometry sampling the texture
    fn draw(&mut self) -> Result<(), BackendError>;

    /// Copy the render target into host memory
    fn read_target(&mut self) -> Result<ReadbackImage, BackendError>;

    fn release_slots(&mut self);
    fn release_texture(&mut self);
    fn release_geometry(&mut self);
    fn release_target(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_row_alignment() {
        // 1920 * 4 = 7680 is already a multiple of 256
        assert_eq!(padded_bytes_per_row(1920, 256), 7680);
        // 100 * 4 = 400 rounds up to 512
        assert_eq!(padded_bytes_per_row(100, 256), 512);
        assert_eq!(padded_bytes_per_row(3, 4), 12);
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::MapFailed { slot: 1 };
        assert_eq!(err.to_string(), "failed to map transfer slot 1 for writing");
    }
}
