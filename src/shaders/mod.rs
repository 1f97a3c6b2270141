//! Embedded WGSL shaders

use std::path::PathBuf;

/// The mesh warp shader
pub const WARP_MESH_SHADER: &str = include_str!("warp_mesh.wgsl");

/// Get the path to the shaders directory
pub fn shaders_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("src").join("shaders")
}

/// Load the warp shader, preferring the file on disk over the embedded copy
///
/// Lets installers tweak the shader without rebuilding.
pub fn load_warp_mesh_shader() -> String {
    let path = shaders_dir().join("warp_mesh.wgsl");
    match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(_) => {
            tracing::debug!("Using embedded warp shader ({} not readable)", path.display());
            WARP_MESH_SHADER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_shader_has_entry_points() {
        assert!(WARP_MESH_SHADER.contains("fn vs_main"));
        assert!(WARP_MESH_SHADER.contains("fn fs_main"));
    }
}
