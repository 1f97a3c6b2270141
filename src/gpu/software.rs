//! CPU implementation of the warp backend
//!
//! Rasterizes the warp triangles with linear (screen-space) interpolation and
//! bilinear texture sampling, mirroring what the GPU path does. The
//! framebuffer follows GL conventions: rows are stored bottom-up and reads
//! return BGRA with rows padded to `READBACK_ROW_ALIGNMENT`.
//!
//! Every device operation is recorded in an `AuditLog` so callers can check
//! slot rotation and that each allocation is released.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::{
    padded_bytes_per_row, BackendError, Capabilities, ReadbackImage, RowOrder, TexturePixels,
    WarpBackend, SLOT_COUNT,
};
use crate::video::PixelLayout;
use crate::warp::{RenderTarget, UvPolicy, WarpGeometry, WarpVertex};

/// Row alignment of readback images, matching wgpu's copy alignment
pub const READBACK_ROW_ALIGNMENT: u32 = 256;

/// Tolerance for pixel centres lying on a shared triangle edge
const EDGE_EPSILON: f32 = 1e-5;

/// Device resources with an allocate/release lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Texture,
    Slots,
    Geometry,
    Target,
}

/// A recorded device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Allocate(Resource),
    Release(Resource),
    WriteTexture,
    WriteSlot(usize),
    MapFailed(usize),
    ConsumeSlot(usize),
    Draw,
    Read,
}

/// Shared, cloneable record of device operations
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditLog {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// All events in order
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Resources allocated more often than released
    pub fn live_resources(&self) -> Vec<Resource> {
        let events = self.events();
        let mut live = Vec::new();
        for resource in [Resource::Texture, Resource::Slots, Resource::Geometry, Resource::Target] {
            let allocated = events.iter().filter(|e| **e == AuditEvent::Allocate(resource)).count();
            let released = events.iter().filter(|e| **e == AuditEvent::Release(resource)).count();
            if allocated > released {
                live.push(resource);
            }
        }
        live
    }

    /// Number of times a resource was released
    pub fn release_count(&self, resource: Resource) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == AuditEvent::Release(resource))
            .count()
    }

    /// Slots consumed by the device, in order
    pub fn consumed_slots(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                AuditEvent::ConsumeSlot(slot) => Some(*slot),
                _ => None,
            })
            .collect()
    }

    /// Number of events matching `event`
    pub fn count(&self, event: AuditEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

/// RGBA framebuffer, rows stored bottom-up
struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// CPU warp backend
pub struct SoftwareBackend {
    capabilities: Capabilities,
    texture: Option<TexturePixels>,
    slots: Option<Vec<TexturePixels>>,
    geometry: Option<(WarpGeometry, UvPolicy)>,
    target: Option<Framebuffer>,
    /// Ordinal of the next `write_slot` call
    slot_writes: u64,
    /// `write_slot` ordinals whose mapping fails
    failing_writes: HashSet<u64>,
    audit: AuditLog,
}

impl SoftwareBackend {
    /// Create a backend reporting the given capabilities
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            texture: None,
            slots: None,
            geometry: None,
            target: None,
            slot_writes: 0,
            failing_writes: HashSet::new(),
            audit: AuditLog::default(),
        }
    }

    /// Make the given `write_slot` calls (0-based, in call order) fail to map
    pub fn with_failing_slot_writes(mut self, ordinals: impl IntoIterator<Item = u64>) -> Self {
        self.failing_writes.extend(ordinals);
        self
    }

    /// Handle to the operation log
    pub fn audit(&self) -> AuditLog {
        self.audit.clone()
    }

    fn check_size(expected: (u32, u32), pixels: &TexturePixels) -> Result<(), BackendError> {
        if (pixels.width, pixels.height) != expected {
            return Err(BackendError::SizeMismatch {
                width: expected.0,
                height: expected.1,
                got_width: pixels.width,
                got_height: pixels.height,
            });
        }
        Ok(())
    }
}

impl WarpBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn allocate_texture(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.texture = Some(TexturePixels {
            data: vec![0; width as usize * height as usize * 4],
            width,
            height,
        });
        self.audit.record(AuditEvent::Allocate(Resource::Texture));
        Ok(())
    }

    fn write_texture(&mut self, pixels: &TexturePixels) -> Result<(), BackendError> {
        let texture = self.texture.as_mut().ok_or(BackendError::NotAllocated("sampling texture"))?;
        Self::check_size((texture.width, texture.height), pixels)?;
        texture.data.copy_from_slice(&pixels.data);
        self.audit.record(AuditEvent::WriteTexture);
        Ok(())
    }

    fn allocate_slots(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        let slot = TexturePixels {
            data: vec![0; width as usize * height as usize * 4],
            width,
            height,
        };
        self.slots = Some(vec![slot; SLOT_COUNT]);
        self.audit.record(AuditEvent::Allocate(Resource::Slots));
        Ok(())
    }

    fn write_slot(&mut self, slot: usize, pixels: &TexturePixels) -> Result<(), BackendError> {
        let ordinal = self.slot_writes;
        self.slot_writes += 1;

        let slots = self.slots.as_mut().ok_or(BackendError::NotAllocated("transfer slots"))?;
        if slot >= SLOT_COUNT || self.failing_writes.contains(&ordinal) {
            self.audit.record(AuditEvent::MapFailed(slot));
            return Err(BackendError::MapFailed { slot });
        }

        let target = &mut slots[slot];
        Self::check_size((target.width, target.height), pixels)?;
        target.data.copy_from_slice(&pixels.data);
        self.audit.record(AuditEvent::WriteSlot(slot));
        Ok(())
    }

    fn consume_slot(&mut self, slot: usize) -> Result<(), BackendError> {
        let slots = self.slots.as_ref().ok_or(BackendError::NotAllocated("transfer slots"))?;
        let texture = self.texture.as_mut().ok_or(BackendError::NotAllocated("sampling texture"))?;
        let source = slots.get(slot).ok_or(BackendError::MapFailed { slot })?;
        Self::check_size((texture.width, texture.height), source)?;
        texture.data.copy_from_slice(&source.data);
        self.audit.record(AuditEvent::ConsumeSlot(slot));
        Ok(())
    }

    fn allocate_target(&mut self, target: RenderTarget) -> Result<(), BackendError> {
        let (width, height) = target.size();
        self.target = Some(Framebuffer {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        });
        self.audit.record(AuditEvent::Allocate(Resource::Target));
        Ok(())
    }

    fn set_geometry(&mut self, geometry: &WarpGeometry, policy: UvPolicy) -> Result<(), BackendError> {
        self.geometry = Some((geometry.clone(), policy));
        self.audit.record(AuditEvent::Allocate(Resource::Geometry));
        Ok(())
    }

    fn draw(&mut self) -> Result<(), BackendError> {
        let framebuffer = self.target.as_mut().ok_or(BackendError::NotAllocated("render target"))?;
        let texture = self.texture.as_ref().ok_or(BackendError::NotAllocated("sampling texture"))?;
        let (geometry, policy) = self.geometry.as_ref().ok_or(BackendError::NotAllocated("geometry"))?;

        framebuffer.pixels.fill(0);
        for triangle in geometry.triangles() {
            rasterize_triangle(framebuffer, triangle, texture, *policy);
        }
        self.audit.record(AuditEvent::Draw);
        Ok(())
    }

    fn read_target(&mut self) -> Result<ReadbackImage, BackendError> {
        let framebuffer = self.target.as_ref().ok_or(BackendError::NotAllocated("render target"))?;
        let stride = padded_bytes_per_row(framebuffer.width, READBACK_ROW_ALIGNMENT) as usize;
        let row_bytes = framebuffer.width as usize * 4;

        let mut data = vec![0u8; stride * framebuffer.height as usize];
        for (src, dst) in framebuffer
            .pixels
            .chunks_exact(row_bytes)
            .zip(data.chunks_exact_mut(stride))
        {
            // Native read order is BGRA
            for (s, d) in src.chunks_exact(4).zip(dst[..row_bytes].chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
            }
        }

        self.audit.record(AuditEvent::Read);
        Ok(ReadbackImage {
            data,
            width: framebuffer.width,
            height: framebuffer.height,
            stride,
            layout: PixelLayout::Bgra8,
            row_order: RowOrder::BottomUp,
        })
    }

    fn release_slots(&mut self) {
        if self.slots.take().is_some() {
            self.audit.record(AuditEvent::Release(Resource::Slots));
        }
    }

    fn release_texture(&mut self) {
        if self.texture.take().is_some() {
            self.audit.record(AuditEvent::Release(Resource::Texture));
        }
    }

    fn release_geometry(&mut self) {
        if self.geometry.take().is_some() {
            self.audit.record(AuditEvent::Release(Resource::Geometry));
        }
    }

    fn release_target(&mut self) {
        if self.target.take().is_some() {
            self.audit.record(AuditEvent::Release(Resource::Target));
        }
    }
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Fill one triangle, interpolating uv and intensity linearly in screen space
fn rasterize_triangle(
    framebuffer: &mut Framebuffer,
    triangle: [&WarpVertex; 3],
    texture: &TexturePixels,
    policy: UvPolicy,
) {
    let width = framebuffer.width as f32;
    let height = framebuffer.height as f32;

    // NDC to window coordinates, y measured up from the bottom row
    let p = triangle.map(|v| ((v.position[0] + 1.0) * 0.5 * width, (v.position[1] + 1.0) * 0.5 * height));

    let area = edge(p[0], p[1], p[2]);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = p.iter().map(|q| q.0).fold(f32::INFINITY, f32::min).floor().max(0.0);
    let max_x = p.iter().map(|q| q.0).fold(f32::NEG_INFINITY, f32::max).ceil().min(width);
    let min_y = p.iter().map(|q| q.1).fold(f32::INFINITY, f32::min).floor().max(0.0);
    let max_y = p.iter().map(|q| q.1).fold(f32::NEG_INFINITY, f32::max).ceil().min(height);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let row_bytes = framebuffer.width as usize * 4;
    for row in min_y as u32..max_y as u32 {
        for col in min_x as u32..max_x as u32 {
            let centre = (col as f32 + 0.5, row as f32 + 0.5);
            let w0 = edge(p[1], p[2], centre) / area;
            let w1 = edge(p[2], p[0], centre) / area;
            let w2 = edge(p[0], p[1], centre) / area;
            if w0 < -EDGE_EPSILON || w1 < -EDGE_EPSILON || w2 < -EDGE_EPSILON {
                continue;
            }

            let u = w0 * triangle[0].uv[0] + w1 * triangle[1].uv[0] + w2 * triangle[2].uv[0];
            let v = w0 * triangle[0].uv[1] + w1 * triangle[1].uv[1] + w2 * triangle[2].uv[1];
            let intensity =
                w0 * triangle[0].intensity + w1 * triangle[1].intensity + w2 * triangle[2].intensity;

            let texel = sample_bilinear(texture, policy, u, v);
            let offset = row as usize * row_bytes + col as usize * 4;
            let out = &mut framebuffer.pixels[offset..offset + 4];
            for c in 0..3 {
                out[c] = (texel[c] * intensity).round().clamp(0.0, 255.0) as u8;
            }
            out[3] = u8::MAX;
        }
    }
}

/// Keep a texel coordinate where integer addressing cannot overflow
///
/// Huge or infinite mesh coordinates are valid input; they land on the edge
/// texel under `Clamp` and wrap under `Repeat`. NaN samples texel 0.
fn bound_coord(s: f32, len: f32, policy: UvPolicy) -> f32 {
    if s.is_nan() {
        return 0.0;
    }
    match policy {
        UvPolicy::Repeat if s.is_finite() => s.rem_euclid(len),
        UvPolicy::Repeat => 0.0,
        UvPolicy::Clamp | UvPolicy::Reject => s.clamp(-1.0, len),
    }
}

/// Bilinear texture lookup; `v = 0` is the bottom row of the texture
fn sample_bilinear(texture: &TexturePixels, policy: UvPolicy, u: f32, v: f32) -> [f32; 4] {
    let w = texture.width as i64;
    let h = texture.height as i64;

    let sx = bound_coord(u * w as f32 - 0.5, w as f32, policy);
    let sy = bound_coord((1.0 - v) * h as f32 - 0.5, h as f32, policy);
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;

    let address = |i: i64, len: i64| -> usize {
        match policy {
            UvPolicy::Repeat => i.rem_euclid(len) as usize,
            UvPolicy::Clamp | UvPolicy::Reject => i.clamp(0, len - 1) as usize,
        }
    };
    let (x0, y0) = (x0 as i64, y0 as i64);
    let xs = [address(x0, w), address(x0 + 1, w)];
    let ys = [address(y0, h), address(y0 + 1, h)];

    let stride = texture.stride();
    let texel = |x: usize, y: usize, c: usize| texture.data[y * stride + x * 4 + c] as f32;

    let mut result = [0f32; 4];
    for (c, value) in result.iter_mut().enumerate() {
        *value = texel(xs[0], ys[0], c) * (1.0 - fx) * (1.0 - fy)
            + texel(xs[1], ys[0], c) * fx * (1.0 - fy)
            + texel(xs[0], ys[1], c) * (1.0 - fx) * fy
            + texel(xs[1], ys[1], c) * fx * fy;
    }
    result
}
