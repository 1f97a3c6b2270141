//! Mesh warp for projection onto non-planar surfaces
//!
//! - `mesh`: calibration mesh model and loader
//! - `geometry`: triangles for the visible cells
//! - `rasterizer`: render target choice and per-frame drawing

pub mod geometry;
pub mod mesh;
pub mod rasterizer;

pub use geometry::{WarpGeometry, WarpVertex};
pub use mesh::{load_mesh, parse_mesh, Mesh, MeshLoadError, MeshPoint, UvPolicy};
pub use rasterizer::{select_render_target, RenderTarget, WarpRasterizer};
