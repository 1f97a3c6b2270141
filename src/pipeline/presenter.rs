//! Presentation surface seen by the sequencer

use crate::video::Frame;

/// Where rendered frames are shown while the batch runs
pub trait Presenter {
    /// Current drawable size in pixels
    fn size(&self) -> (u32, u32);

    /// Show (or acknowledge) a rendered frame
    fn present(&mut self, frame: &Frame);

    /// Release the surface; called once during shutdown
    fn close(&mut self);
}
