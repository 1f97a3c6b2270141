//! Calibration mesh for warp rendering
//!
//! Parses Paul Bourke style mesh files: a `kind cols rows` header followed by
//! `rows * cols` nodes of `x y u v intensity`, stored row-major.

use std::fmt::Write as _;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading a calibration mesh
#[derive(Debug, Error)]
pub enum MeshLoadError {
    /// The mesh file could not be opened
    #[error("failed to open mesh file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The mesh file was opened but could not be read as text
    #[error("failed to read mesh file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The three-integer header is missing
    #[error("mesh header is incomplete (expected `kind cols rows`)")]
    MissingHeader,
    /// A token could not be parsed as a number
    #[error("invalid mesh token {token:?} at token {position}")]
    Parse { token: String, position: usize },
    /// The header declares a grid smaller than 2x2
    #[error("mesh must be at least 2x2, header declares {cols} columns x {rows} rows")]
    Dimensions { cols: i64, rows: i64 },
    /// Fewer nodes than the header declares
    #[error("mesh declares {expected} points but only {found} are present")]
    Truncated { expected: usize, found: usize },
    /// More nodes than the grid holds
    #[error("{cols}x{rows} mesh holds {expected} points, {found} were supplied")]
    ExtraPoints {
        cols: usize,
        rows: usize,
        expected: usize,
        found: usize,
    },
    /// A sampling coordinate lies outside the unit square under `UvPolicy::Reject`
    #[error("mesh point {index} samples ({u}, {v}), outside [0, 1]")]
    UvOutOfRange { index: usize, u: f32, v: f32 },
}

/// How sampling coordinates outside `[0, 1]` are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UvPolicy {
    /// Out-of-range coordinates sample the nearest edge texel
    #[default]
    Clamp,
    /// The source texture tiles
    Repeat,
    /// Loading fails on the first out-of-range coordinate
    Reject,
}

impl UvPolicy {
    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            UvPolicy::Clamp => "Clamp to edge",
            UvPolicy::Repeat => "Repeat",
            UvPolicy::Reject => "Reject mesh",
        }
    }
}

/// A single calibration node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPoint {
    /// Output position in normalized device coordinates (y up)
    pub x: f32,
    pub y: f32,
    /// Source sampling coordinate (v = 0 is the bottom row of the source)
    pub u: f32,
    pub v: f32,
    /// Brightness multiplier; negative values blank every adjoining cell
    pub intensity: f32,
}

impl MeshPoint {
    pub fn new(x: f32, y: f32, u: f32, v: f32, intensity: f32) -> Self {
        Self { x, y, u, v, intensity }
    }

    /// Whether this node masks out its adjoining cells
    pub fn is_blanked(&self) -> bool {
        self.intensity < 0.0
    }

    fn uv_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.u) && (0.0..=1.0).contains(&self.v)
    }
}

/// Row-major grid of calibration nodes
///
/// Node `(col, row)` is stored at `row * cols + col`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    kind: i64,
    cols: usize,
    rows: usize,
    points: Vec<MeshPoint>,
}

impl Mesh {
    /// Build a mesh from an explicit list of nodes
    pub fn from_points(
        kind: i64,
        cols: usize,
        rows: usize,
        points: Vec<MeshPoint>,
    ) -> Result<Self, MeshLoadError> {
        if cols < 2 || rows < 2 {
            return Err(MeshLoadError::Dimensions {
                cols: cols as i64,
                rows: rows as i64,
            });
        }
        let expected = cols * rows;
        if points.len() < expected {
            return Err(MeshLoadError::Truncated {
                expected,
                found: points.len(),
            });
        }
        if points.len() > expected {
            return Err(MeshLoadError::ExtraPoints {
                cols,
                rows,
                expected,
                found: points.len(),
            });
        }

        Ok(Self {
            kind,
            cols,
            rows,
            points,
        })
    }

    /// Create a full-frame identity mesh (no deformation, full brightness)
    pub fn identity(cols: usize, rows: usize) -> Self {
        let cols = cols.max(2);
        let rows = rows.max(2);
        let mut points = Vec::with_capacity(cols * rows);

        for row in 0..rows {
            for col in 0..cols {
                let u = col as f32 / (cols - 1) as f32;
                let v = row as f32 / (rows - 1) as f32;
                points.push(MeshPoint::new(u * 2.0 - 1.0, v * 2.0 - 1.0, u, v, 1.0));
            }
        }

        Self {
            kind: 2,
            cols,
            rows,
            points,
        }
    }

    /// Header mesh type as read from the file (unused by rendering)
    pub fn kind(&self) -> i64 {
        self.kind
    }

    /// Number of grid columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of grid rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// All nodes in row-major order
    pub fn points(&self) -> &[MeshPoint] {
        &self.points
    }

    /// Get a node by grid coordinates
    pub fn get(&self, col: usize, row: usize) -> Option<&MeshPoint> {
        if col < self.cols && row < self.rows {
            self.points.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// Get a node by grid coordinates, panicking in debug builds when out of range
    #[inline]
    pub fn point(&self, col: usize, row: usize) -> &MeshPoint {
        debug_assert!(col < self.cols && row < self.rows, "mesh index ({col}, {row}) out of range");
        &self.points[row * self.cols + col]
    }

    /// Whether cell `(col, row)` has a blanked corner and must not be drawn
    pub fn is_cell_blanked(&self, col: usize, row: usize) -> bool {
        [
            self.point(col, row),
            self.point(col + 1, row),
            self.point(col + 1, row + 1),
            self.point(col, row + 1),
        ]
        .iter()
        .any(|p| p.is_blanked())
    }

    /// Serialize back into the mesh file format
    pub fn to_map_string(&self) -> String {
        let mut out = String::with_capacity(self.points.len() * 48);
        let _ = writeln!(out, "{}", self.kind);
        let _ = writeln!(out, "{} {}", self.cols, self.rows);
        for p in &self.points {
            let _ = writeln!(out, "{} {} {} {} {}", p.x, p.y, p.u, p.v, p.intensity);
        }
        out
    }
}

/// Load a mesh file from disk
pub fn load_mesh(path: impl AsRef<Path>, policy: UvPolicy) -> Result<Mesh, MeshLoadError> {
    let path = path.as_ref();

    let mut file = std::fs::File::open(path).map_err(|source| MeshLoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|source| MeshLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let mesh = parse_mesh(&text, policy)?;
    tracing::info!(
        "Loaded mesh {}: {} columns x {} rows ({} points)",
        path.display(),
        mesh.cols(),
        mesh.rows(),
        mesh.points().len()
    );
    Ok(mesh)
}

/// Parse mesh text
pub fn parse_mesh(text: &str, policy: UvPolicy) -> Result<Mesh, MeshLoadError> {
    let mut tokens = text.split_whitespace().enumerate();

    let mut header = [0i64; 3];
    for slot in header.iter_mut() {
        let (position, token) = tokens.next().ok_or(MeshLoadError::MissingHeader)?;
        *slot = token.parse().map_err(|_| MeshLoadError::Parse {
            token: token.to_string(),
            position,
        })?;
    }
    // Column count comes first, then row count
    let [kind, cols, rows] = header;
    if cols < 2 || rows < 2 {
        return Err(MeshLoadError::Dimensions { cols, rows });
    }

    let (cols, rows) = (cols as usize, rows as usize);
    let expected = cols
        .checked_mul(rows)
        .ok_or(MeshLoadError::Dimensions {
            cols: cols as i64,
            rows: rows as i64,
        })?;

    let mut points = Vec::with_capacity(expected.min(1 << 20));
    let mut values = [0f32; 5];
    while points.len() < expected {
        for value in values.iter_mut() {
            let Some((position, token)) = tokens.next() else {
                return Err(MeshLoadError::Truncated {
                    expected,
                    found: points.len(),
                });
            };
            *value = token.parse().map_err(|_| MeshLoadError::Parse {
                token: token.to_string(),
                position,
            })?;
        }
        let [x, y, u, v, intensity] = values;
        let point = MeshPoint::new(x, y, u, v, intensity);

        if policy == UvPolicy::Reject && !point.uv_in_range() {
            return Err(MeshLoadError::UvOutOfRange {
                index: points.len(),
                u,
                v,
            });
        }
        points.push(point);
    }

    let trailing = tokens.count();
    if trailing > 0 {
        tracing::debug!("Ignoring {} trailing tokens after mesh data", trailing);
    }

    Mesh::from_points(kind, cols, rows, points)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_MESH: &str = "2\n3 2\n\
        -1 -1 0 0 1\n0 -1 0.5 0 1\n1 -1 1 0 0.5\n\
        -1 1 0 1 1\n0 1 0.5 1 -1\n1 1 1 1 1\n";

    #[test]
    fn test_parse_header_order() {
        let mesh = parse_mesh(SMALL_MESH, UvPolicy::Clamp).unwrap();
        assert_eq!(mesh.kind(), 2);
        assert_eq!(mesh.cols(), 3);
        assert_eq!(mesh.rows(), 2);
        assert_eq!(mesh.points().len(), 6);
    }

    #[test]
    fn test_points_are_row_major() {
        let mesh = parse_mesh(SMALL_MESH, UvPolicy::Clamp).unwrap();
        // Second node of the first row
        assert_eq!(*mesh.point(1, 0), MeshPoint::new(0.0, -1.0, 0.5, 0.0, 1.0));
        // First node of the second row
        assert_eq!(*mesh.point(0, 1), MeshPoint::new(-1.0, 1.0, 0.0, 1.0, 1.0));
        assert_eq!(mesh.point(2, 0).intensity, 0.5);
        assert!(mesh.get(3, 0).is_none());
        assert!(mesh.get(0, 2).is_none());
    }

    #[test]
    fn test_round_trip() {
        let mesh = parse_mesh(SMALL_MESH, UvPolicy::Clamp).unwrap();
        let reparsed = parse_mesh(&mesh.to_map_string(), UvPolicy::Clamp).unwrap();
        assert_eq!(mesh, reparsed);

        let identity = Mesh::identity(7, 5);
        let reparsed = parse_mesh(&identity.to_map_string(), UvPolicy::Clamp).unwrap();
        assert_eq!(identity, reparsed);
    }

    #[test]
    fn test_tokens_may_span_lines() {
        let text = "0 2 2 -1 -1 0 0 1 1 -1\n1 0 1 -1 1 0 1 1 1 1 1 1 1";
        let mesh = parse_mesh(text, UvPolicy::Clamp).unwrap();
        assert_eq!(mesh.points().len(), 4);
        assert_eq!(*mesh.point(1, 1), MeshPoint::new(1.0, 1.0, 1.0, 1.0, 1.0));
    }

    #[test]
    fn test_cell_blanking() {
        let mesh = parse_mesh(SMALL_MESH, UvPolicy::Clamp).unwrap();
        // Node (1, 1) is negative: both cells share it
        assert!(mesh.is_cell_blanked(0, 0));
        assert!(mesh.is_cell_blanked(1, 0));

        let identity = Mesh::identity(3, 3);
        assert!(!identity.is_cell_blanked(0, 0));
    }

    #[test]
    fn test_truncated_mesh() {
        let err = parse_mesh("2 2 2 -1 -1 0 0 1 1 -1 1 0 1", UvPolicy::Clamp).unwrap_err();
        assert!(matches!(err, MeshLoadError::Truncated { expected: 4, found: 2 }));
    }

    #[test]
    fn test_from_points_rejects_extra_points() {
        let mut points = Mesh::identity(2, 2).points().to_vec();
        points.push(MeshPoint::new(0.0, 0.0, 0.5, 0.5, 1.0));
        let err = Mesh::from_points(2, 2, 2, points).unwrap_err();
        assert!(matches!(err, MeshLoadError::ExtraPoints { expected: 4, found: 5, .. }));
    }

    #[test]
    fn test_degenerate_dimensions() {
        let err = parse_mesh("2 1 5", UvPolicy::Clamp).unwrap_err();
        assert!(matches!(err, MeshLoadError::Dimensions { cols: 1, rows: 5 }));
    }

    #[test]
    fn test_bad_token() {
        let err = parse_mesh("2 2 x", UvPolicy::Clamp).unwrap_err();
        assert!(matches!(err, MeshLoadError::Parse { position: 2, .. }));
        assert!(matches!(parse_mesh("2 2", UvPolicy::Clamp), Err(MeshLoadError::MissingHeader)));
    }

    #[test]
    fn test_uv_policy() {
        let text = "2 2 2  -1 -1 0 0 1  1 -1 1.5 0 1  -1 1 0 1 1  1 1 1 1 1";
        assert!(parse_mesh(text, UvPolicy::Clamp).is_ok());
        assert!(parse_mesh(text, UvPolicy::Repeat).is_ok());
        let err = parse_mesh(text, UvPolicy::Reject).unwrap_err();
        assert!(matches!(err, MeshLoadError::UvOutOfRange { index: 1, .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_mesh("/nonexistent/dir/mesh.map", UvPolicy::Clamp).unwrap_err();
        assert!(matches!(err, MeshLoadError::Open { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.map");
        std::fs::write(&path, Mesh::identity(4, 3).to_map_string()).unwrap();

        let mesh = load_mesh(&path, UvPolicy::Reject).unwrap();
        assert_eq!(mesh, Mesh::identity(4, 3));
    }
}
