//! Texture upload strategies
//!
//! Two ways to get decoded pixels into the sampling texture, chosen once from
//! the capability probe:
//! - `SingleBufferUpload` writes the texture directly every frame
//! - `DoubleBufferUpload` ping-pongs between two transfer slots so the host
//!   fills one while the device consumes the other
//!
//! The double-buffered path reads one frame ahead: the first frame only
//! primes slot 0, and the frame still staged at end-of-stream is consumed
//! before the strategy reports `Drained`.

use crate::gpu::{BackendError, Capabilities, TexturePixels, WarpBackend, SLOT_COUNT};
use crate::video::{Frame, PixelLayout};

/// Result of handing one tick's frame to the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The texture holds a frame to rasterize now
    Ready,
    /// Nothing to render this tick (priming, or the frame was skipped)
    Pending,
    /// No frame arrived and nothing is staged
    Drained,
}

/// Moves frames into the sampling texture
pub trait UploadStrategy {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Allocate the texture (and slots, if any)
    fn allocate(&mut self, backend: &mut dyn WarpBackend) -> Result<(), BackendError>;

    /// Upload `frame` (`None` once the source has ended)
    fn submit(&mut self, backend: &mut dyn WarpBackend, frame: Option<&Frame>) -> UploadOutcome;

    /// Release everything `allocate` created
    fn release(&mut self, backend: &mut dyn WarpBackend);

    /// Frames that reached the sampling texture
    fn uploaded(&self) -> u64;

    /// Frames dropped because a write failed
    fn skipped(&self) -> u64;

    /// Slot rotation, for strategies that use transfer slots
    fn rotation(&self) -> Option<&SlotRotation> {
        None
    }
}

/// Pick the upload strategy for the probed capabilities
pub fn select_upload_strategy(caps: &Capabilities, texture_size: (u32, u32)) -> Box<dyn UploadStrategy> {
    if caps.staged_upload {
        tracing::info!("Using double-buffered texture uploads");
        Box::new(DoubleBufferUpload::new(texture_size))
    } else {
        tracing::warn!("Staged uploads unavailable; writing the texture directly each frame");
        Box::new(SingleBufferUpload::new(texture_size))
    }
}

/// Convert a frame to tightly packed RGBA at the texture resolution
pub fn texture_pixels(frame: &Frame, texture_size: (u32, u32)) -> TexturePixels {
    let rgba = frame.to_layout(PixelLayout::Rgba8);
    let (width, height) = texture_size;
    if (rgba.width, rgba.height) == texture_size {
        return TexturePixels {
            data: rgba.data,
            width,
            height,
        };
    }

    match image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data) {
        Some(img) => {
            let resized = image::imageops::resize(&img, width, height, image::imageops::FilterType::Triangle);
            TexturePixels {
                data: resized.into_raw(),
                width,
                height,
            }
        }
        None => {
            tracing::warn!("Frame {} has a short pixel buffer; uploading black", frame.frame_index);
            TexturePixels {
                data: vec![0; width as usize * height as usize * 4],
                width,
                height,
            }
        }
    }
}

/// Direct texture writes
pub struct SingleBufferUpload {
    texture_size: (u32, u32),
    uploaded: u64,
    skipped: u64,
}

impl SingleBufferUpload {
    pub fn new(texture_size: (u32, u32)) -> Self {
        Self {
            texture_size,
            uploaded: 0,
            skipped: 0,
        }
    }
}

impl UploadStrategy for SingleBufferUpload {
    fn name(&self) -> &'static str {
        "single-buffer"
    }

    fn allocate(&mut self, backend: &mut dyn WarpBackend) -> Result<(), BackendError> {
        backend.allocate_texture(self.texture_size.0, self.texture_size.1)
    }

    fn submit(&mut self, backend: &mut dyn WarpBackend, frame: Option<&Frame>) -> UploadOutcome {
        let Some(frame) = frame else {
            return UploadOutcome::Drained;
        };

        let pixels = texture_pixels(frame, self.texture_size);
        match backend.write_texture(&pixels) {
            Ok(()) => {
                self.uploaded += 1;
                UploadOutcome::Ready
            }
            Err(e) => {
                self.skipped += 1;
                tracing::warn!("Skipping frame {}: {}", frame.frame_index, e);
                UploadOutcome::Pending
            }
        }
    }

    fn release(&mut self, backend: &mut dyn WarpBackend) {
        backend.release_texture();
    }

    fn uploaded(&self) -> u64 {
        self.uploaded
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }
}

/// Two-phase slot rotation
///
/// The device consumes slot `n % 2` on its `n`th consumption; the host may
/// only write the other slot while a frame is staged.
#[derive(Debug, Clone, Default)]
pub struct SlotRotation {
    consumed: u64,
    history: Vec<usize>,
}

impl SlotRotation {
    /// Slot the device consumes next
    pub fn consume_slot(&self) -> usize {
        (self.consumed % SLOT_COUNT as u64) as usize
    }

    /// Slot the host may write while the consume slot is staged
    pub fn write_ahead_slot(&self) -> usize {
        ((self.consumed + 1) % SLOT_COUNT as u64) as usize
    }

    fn advance(&mut self) {
        self.history.push(self.consume_slot());
        self.consumed += 1;
    }

    /// Number of consumptions so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Slots consumed so far, in order
    pub fn history(&self) -> &[usize] {
        &self.history
    }
}

/// Double-buffered uploads through two transfer slots
pub struct DoubleBufferUpload {
    texture_size: (u32, u32),
    rotation: SlotRotation,
    /// Slot holding a frame the device has not consumed yet
    staged: Option<usize>,
    uploaded: u64,
    skipped: u64,
}

impl DoubleBufferUpload {
    pub fn new(texture_size: (u32, u32)) -> Self {
        Self {
            texture_size,
            rotation: SlotRotation::default(),
            staged: None,
            uploaded: 0,
            skipped: 0,
        }
    }

    /// Write `frame` into `slot`; false when the frame had to be skipped
    fn stage(&mut self, backend: &mut dyn WarpBackend, slot: usize, frame: &Frame) -> bool {
        let pixels = texture_pixels(frame, self.texture_size);
        match backend.write_slot(slot, &pixels) {
            Ok(()) => true,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!("Skipping frame {}: {}", frame.frame_index, e);
                false
            }
        }
    }
}

impl UploadStrategy for DoubleBufferUpload {
    fn name(&self) -> &'static str {
        "double-buffer"
    }

    fn allocate(&mut self, backend: &mut dyn WarpBackend) -> Result<(), BackendError> {
        let (width, height) = self.texture_size;
        backend.allocate_texture(width, height)?;
        backend.allocate_slots(width, height)
    }

    fn submit(&mut self, backend: &mut dyn WarpBackend, frame: Option<&Frame>) -> UploadOutcome {
        let Some(staged) = self.staged else {
            // Priming, or recovering from a skip: fill the slot bound for consumption
            let Some(frame) = frame else {
                return UploadOutcome::Drained;
            };
            let slot = self.rotation.consume_slot();
            if self.stage(backend, slot, frame) {
                self.staged = Some(slot);
            }
            return UploadOutcome::Pending;
        };
        debug_assert_eq!(staged, self.rotation.consume_slot());

        // Device takes the staged slot
        let consumed = backend.consume_slot(staged);
        self.rotation.advance();
        self.staged = None;

        // Host fills the other one with the next frame
        if let Some(frame) = frame {
            let slot = self.rotation.consume_slot();
            debug_assert_ne!(slot, staged);
            if self.stage(backend, slot, frame) {
                self.staged = Some(slot);
            }
        }

        match consumed {
            Ok(()) => {
                self.uploaded += 1;
                UploadOutcome::Ready
            }
            Err(e) => {
                self.skipped += 1;
                tracing::warn!("Device failed to consume slot {}: {}", staged, e);
                UploadOutcome::Pending
            }
        }
    }

    fn release(&mut self, backend: &mut dyn WarpBackend) {
        self.staged = None;
        backend.release_slots();
        backend.release_texture();
    }

    fn uploaded(&self) -> u64 {
        self.uploaded
    }

    fn skipped(&self) -> u64 {
        self.skipped
    }

    fn rotation(&self) -> Option<&SlotRotation> {
        Some(&self.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{AuditEvent, SoftwareBackend};

    fn frame(index: u64) -> Frame {
        let mut frame = Frame::solid(4, 2, PixelLayout::Bgr8, &[index as u8, 0, 0]);
        frame.frame_index = index;
        frame
    }

    fn drive(strategy: &mut dyn UploadStrategy, backend: &mut SoftwareBackend, frames: u64) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::new();
        for i in 0..frames {
            outcomes.push(strategy.submit(backend, Some(&frame(i))));
        }
        loop {
            let outcome = strategy.submit(backend, None);
            outcomes.push(outcome);
            if outcome == UploadOutcome::Drained {
                break;
            }
        }
        outcomes
    }

    #[test]
    fn test_selection_follows_capabilities() {
        assert_eq!(select_upload_strategy(&Capabilities::full(), (4, 4)).name(), "double-buffer");
        assert_eq!(select_upload_strategy(&Capabilities::minimal(), (4, 4)).name(), "single-buffer");
    }

    #[test]
    fn test_single_buffer_is_ready_every_frame() {
        let mut backend = SoftwareBackend::new(Capabilities::minimal());
        let mut strategy = SingleBufferUpload::new((4, 2));
        strategy.allocate(&mut backend).unwrap();

        let outcomes = drive(&mut strategy, &mut backend, 3);
        use UploadOutcome::*;
        assert_eq!(outcomes, vec![Ready, Ready, Ready, Drained]);
        assert_eq!(strategy.uploaded(), 3);
        assert_eq!(backend.audit().count(AuditEvent::WriteTexture), 3);
    }

    #[test]
    fn test_double_buffer_primes_then_drains_staged_frame() {
        let mut backend = SoftwareBackend::new(Capabilities::full());
        let mut strategy = DoubleBufferUpload::new((4, 2));
        strategy.allocate(&mut backend).unwrap();

        let outcomes = drive(&mut strategy, &mut backend, 3);
        use UploadOutcome::*;
        assert_eq!(outcomes, vec![Pending, Ready, Ready, Ready, Drained]);
        assert_eq!(strategy.uploaded(), 3);
        assert_eq!(strategy.rotation().unwrap().history(), &[0, 1, 0]);
    }

    #[test]
    fn test_host_never_writes_the_slot_being_consumed() {
        let mut backend = SoftwareBackend::new(Capabilities::full());
        let audit = backend.audit();
        let mut strategy = DoubleBufferUpload::new((4, 2));
        strategy.allocate(&mut backend).unwrap();
        drive(&mut strategy, &mut backend, 6);

        // Within one submit the consume precedes the write; they must differ
        let events = audit.events();
        for pair in events.windows(2) {
            if let [AuditEvent::ConsumeSlot(c), AuditEvent::WriteSlot(w)] = pair {
                assert_ne!(c, w);
            }
        }
        assert_eq!(audit.consumed_slots(), vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_failed_map_skips_frame_and_keeps_rotation() {
        // Third write (frame 2) fails to map
        let mut backend = SoftwareBackend::new(Capabilities::full()).with_failing_slot_writes([2]);
        let mut strategy = DoubleBufferUpload::new((4, 2));
        strategy.allocate(&mut backend).unwrap();

        let outcomes = drive(&mut strategy, &mut backend, 5);
        let ready = outcomes.iter().filter(|o| **o == UploadOutcome::Ready).count();
        assert_eq!(ready, 4);
        assert_eq!(strategy.skipped(), 1);
        assert_eq!(strategy.uploaded(), 4);
        assert_eq!(strategy.rotation().unwrap().history(), &[0, 1, 0, 1]);
    }

    #[test]
    fn test_texture_pixels_resizes_to_texture() {
        let pixels = texture_pixels(&frame(7), (2, 1));
        assert_eq!((pixels.width, pixels.height), (2, 1));
        assert_eq!(pixels.data.len(), 8);
        // Bgr8 [7, 0, 0] is red 0, blue 7
        assert_eq!(&pixels.data[..4], &[0, 0, 7, 255]);
    }

    #[test]
    fn test_release_frees_slots_and_texture() {
        let mut backend = SoftwareBackend::new(Capabilities::full());
        let audit = backend.audit();
        let mut strategy = DoubleBufferUpload::new((4, 2));
        strategy.allocate(&mut backend).unwrap();
        strategy.release(&mut backend);
        assert!(audit.live_resources().is_empty());
    }
}
