//! Triangle geometry for the forward mesh warp
//!
//! Every mesh node becomes one vertex; every visible cell becomes two
//! triangles. Cells with a blanked corner produce no triangles.

use super::mesh::Mesh;

/// Vertex layout shared by the GPU pipeline and the software rasterizer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WarpVertex {
    /// Output position in normalized device coordinates
    pub position: [f32; 2],
    /// Source sampling coordinate (v up)
    pub uv: [f32; 2],
    /// Brightness multiplier
    pub intensity: f32,
}

impl WarpVertex {
    /// Vertex buffer attributes: position, uv, intensity
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32];

    /// Vertex buffer layout for the warp pipeline
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<WarpVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Indexed triangle list covering the visible cells of a mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarpGeometry {
    /// One vertex per mesh node, row-major
    pub vertices: Vec<WarpVertex>,
    /// Three indices per triangle
    pub indices: Vec<u32>,
    /// Number of cells skipped because a corner is blanked
    pub blanked_cells: usize,
}

impl WarpGeometry {
    /// Build triangles for every cell without a blanked corner
    pub fn from_mesh(mesh: &Mesh) -> Self {
        let vertices = mesh
            .points()
            .iter()
            .map(|p| WarpVertex {
                position: [p.x, p.y],
                uv: [p.u, p.v],
                intensity: p.intensity,
            })
            .collect();

        let cols = mesh.cols();
        let rows = mesh.rows();
        let mut indices = Vec::with_capacity((cols - 1) * (rows - 1) * 6);
        let mut blanked_cells = 0;

        for j in 0..rows - 1 {
            for i in 0..cols - 1 {
                if mesh.is_cell_blanked(i, j) {
                    blanked_cells += 1;
                    continue;
                }

                let a = (j * cols + i) as u32;
                let b = (j * cols + i + 1) as u32;
                let c = ((j + 1) * cols + i + 1) as u32;
                let d = ((j + 1) * cols + i) as u32;
                indices.extend_from_slice(&[a, b, c, a, c, d]);
            }
        }

        if blanked_cells > 0 {
            tracing::debug!(
                "Mesh geometry: {} visible cells, {} blanked",
                indices.len() / 6,
                blanked_cells
            );
        }

        Self {
            vertices,
            indices,
            blanked_cells,
        }
    }

    /// Number of triangles to draw
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Iterate triangles as vertex triples
    pub fn triangles(&self) -> impl Iterator<Item = [&WarpVertex; 3]> + '_ {
        self.indices.chunks_exact(3).map(move |tri| {
            [
                &self.vertices[tri[0] as usize],
                &self.vertices[tri[1] as usize],
                &self.vertices[tri[2] as usize],
            ]
        })
    }

    /// Whether there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
