//! Warp rasterizer
//!
//! Renders the textured mesh into the render target. This is a forward mesh
//! warp: output-space triangles carry source-space texture coordinates and the
//! rasterizer's linear interpolation performs the resampling.

use crate::gpu::{BackendError, Capabilities, WarpBackend};

use super::geometry::WarpGeometry;
use super::mesh::{Mesh, UvPolicy};

/// Where warped frames are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// Off-screen target at the configured output resolution
    Offscreen { width: u32, height: u32 },
    /// The visible window's back buffer; output resolution follows the window
    WindowBackBuffer { width: u32, height: u32 },
}

impl RenderTarget {
    /// Target size in pixels
    pub fn size(&self) -> (u32, u32) {
        match *self {
            RenderTarget::Offscreen { width, height }
            | RenderTarget::WindowBackBuffer { width, height } => (width.max(1), height.max(1)),
        }
    }

    /// Whether the target is decoupled from the window
    pub fn is_offscreen(&self) -> bool {
        matches!(self, RenderTarget::Offscreen { .. })
    }
}

/// Choose the render target from the capability probe
///
/// Without off-screen support the output resolution is whatever the window
/// currently measures.
pub fn select_render_target(
    caps: &Capabilities,
    output_size: (u32, u32),
    window_size: (u32, u32),
) -> RenderTarget {
    if caps.offscreen_target {
        RenderTarget::Offscreen {
            width: output_size.0,
            height: output_size.1,
        }
    } else {
        tracing::warn!(
            "Off-screen render targets unavailable; rendering to the window back buffer at {}x{} instead of {}x{}",
            window_size.0,
            window_size.1,
            output_size.0,
            output_size.1
        );
        RenderTarget::WindowBackBuffer {
            width: window_size.0,
            height: window_size.1,
        }
    }
}

/// Draws the mesh geometry each frame
pub struct WarpRasterizer {
    geometry: WarpGeometry,
    policy: UvPolicy,
    target: RenderTarget,
}

impl WarpRasterizer {
    /// Build the rasterizer for a mesh
    pub fn new(mesh: &Mesh, policy: UvPolicy, target: RenderTarget) -> Self {
        Self {
            geometry: WarpGeometry::from_mesh(mesh),
            policy,
            target,
        }
    }

    /// Create the render target and hand the geometry to the backend
    pub fn prepare(&self, backend: &mut dyn WarpBackend) -> Result<(), BackendError> {
        backend.allocate_target(self.target)?;
        backend.set_geometry(&self.geometry, self.policy)?;

        let (width, height) = self.target.size();
        tracing::info!(
            "Warp target {}x{} ({}), {} triangles, {} blanked cells, uv policy: {}",
            width,
            height,
            if self.target.is_offscreen() { "off-screen" } else { "window" },
            self.geometry.triangle_count(),
            self.geometry.blanked_cells,
            self.policy.display_name()
        );
        Ok(())
    }

    /// Rasterize the current texture through the mesh
    pub fn render(&self, backend: &mut dyn WarpBackend) -> Result<(), BackendError> {
        backend.draw()
    }

    /// Release the geometry buffers and the render target
    pub fn release(&self, backend: &mut dyn WarpBackend) {
        backend.release_geometry();
        backend.release_target();
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }

    pub fn geometry(&self) -> &WarpGeometry {
        &self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offscreen_uses_output_size() {
        let target = select_render_target(&Capabilities::full(), (2048, 2048), (800, 600));
        assert_eq!(target, RenderTarget::Offscreen { width: 2048, height: 2048 });
        assert!(target.is_offscreen());
    }

    #[test]
    fn test_window_fallback_follows_window_size() {
        let target = select_render_target(&Capabilities::minimal(), (2048, 2048), (800, 600));
        assert_eq!(target, RenderTarget::WindowBackBuffer { width: 800, height: 600 });
        assert_eq!(target.size(), (800, 600));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let target = RenderTarget::WindowBackBuffer { width: 0, height: 0 };
        assert_eq!(target.size(), (1, 1));
    }
}
