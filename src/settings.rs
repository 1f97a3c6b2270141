//! Settings persistence
//!
//! Handles loading and saving warp settings as XML, plus the legacy
//! whitespace-separated INI used by older installs.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::video::FourCc;
use crate::warp::UvPolicy;

/// Legacy INI file name, looked up in the working directory
pub const LEGACY_INI_NAME: &str = "GL_warp2mp4.ini";

/// Resolved parameters for one warp run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "WarpSettings")]
pub struct WarpSettings {
    /// Output (render target) width in pixels
    #[serde(rename = "outputWidth", default = "default_output_width")]
    pub output_width: u32,

    /// Output (render target) height in pixels
    #[serde(rename = "outputHeight", default = "default_output_height")]
    pub output_height: u32,

    /// Window width in pixels
    #[serde(rename = "windowWidth", default = "default_window_width")]
    pub window_width: u32,

    /// Window height in pixels
    #[serde(rename = "windowHeight", default = "default_window_height")]
    pub window_height: u32,

    /// Sampling texture width (0 = source width)
    #[serde(rename = "textureWidth", default)]
    pub texture_width: u32,

    /// Sampling texture height (0 = source height)
    #[serde(rename = "textureHeight", default)]
    pub texture_height: u32,

    /// Output codec; `NULL` keeps the input's codec
    #[serde(rename = "codec", default)]
    pub codec: FourCc,

    /// Calibration mesh file
    #[serde(rename = "meshPath", default = "default_mesh_path")]
    pub mesh_path: PathBuf,

    #[serde(rename = "uvPolicy", default)]
    pub uv_policy: UvPolicy,

    /// Allow double-buffered uploads when the device supports them
    #[serde(rename = "allowStagedUpload", default = "default_true")]
    pub allow_staged_upload: bool,

    /// Allow off-screen render targets when the device supports them
    #[serde(rename = "allowOffscreenTarget", default = "default_true")]
    pub allow_offscreen_target: bool,

    /// Seconds between throughput reports
    #[serde(rename = "reportIntervalSecs", default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// Frame rate assumed for image sequence input
    #[serde(rename = "sequenceFps", default = "default_sequence_fps")]
    pub sequence_fps: f64,
}

fn default_output_width() -> u32 {
    1920
}

fn default_output_height() -> u32 {
    1080
}

fn default_window_width() -> u32 {
    800
}

fn default_window_height() -> u32 {
    600
}

fn default_mesh_path() -> PathBuf {
    PathBuf::from("EP_xyuv_1920.map")
}

fn default_true() -> bool {
    true
}

fn default_report_interval() -> u64 {
    5
}

fn default_sequence_fps() -> f64 {
    30.0
}

impl Default for WarpSettings {
    fn default() -> Self {
        Self {
            output_width: default_output_width(),
            output_height: default_output_height(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            texture_width: 0,
            texture_height: 0,
            codec: FourCc::default(),
            mesh_path: default_mesh_path(),
            uv_policy: UvPolicy::default(),
            allow_staged_upload: true,
            allow_offscreen_target: true,
            report_interval_secs: default_report_interval(),
            sequence_fps: default_sequence_fps(),
        }
    }
}

impl WarpSettings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("immersive-warp");
            p.push("settings.xml");
            p
        })
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> Result<Self, SettingsError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading settings from {}", path.display());
                Self::load_from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, formatted).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay the legacy INI from `path`; a missing file leaves settings unchanged
    ///
    /// Layout: three comment tokens, then
    /// `width label height label fourcc label mesh_path`. Reading stops at the
    /// first missing or malformed value, keeping what was read so far.
    pub fn apply_legacy_ini(&mut self, path: &Path) -> Result<(), SettingsError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Unable to open {}, using defaults", path.display());
                return Ok(());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.apply_legacy_tokens(&contents);
        self.validate()
    }

    fn apply_legacy_tokens(&mut self, contents: &str) {
        let mut tokens = contents.split_whitespace().skip(3);

        let Some(width) = tokens.next().and_then(|t| t.parse().ok()) else {
            return;
        };
        self.output_width = width;

        let Some(height) = tokens.nth(1).and_then(|t| t.parse().ok()) else {
            return;
        };
        self.output_height = height;

        let Some(codec) = tokens.nth(1) else {
            return;
        };
        match codec.parse::<FourCc>() {
            Ok(codec) => self.codec = codec,
            Err(e) => {
                tracing::warn!("Ignoring legacy codec: {}", e);
                return;
            }
        }

        if let Some(mesh) = tokens.nth(1) {
            self.mesh_path = PathBuf::from(mesh);
        }
    }

    /// Sampling texture size for a source of the given size
    pub fn texture_size(&self, source_size: (u32, u32)) -> (u32, u32) {
        let width = if self.texture_width == 0 { source_size.0 } else { self.texture_width };
        let height = if self.texture_height == 0 { source_size.1 } else { self.texture_height };
        (width.max(1), height.max(1))
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.output_width == 0 || self.output_height == 0 {
            return Err(SettingsError::Invalid(format!(
                "output size {}x{} must be non-zero",
                self.output_width, self.output_height
            )));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(SettingsError::Invalid(format!(
                "window size {}x{} must be non-zero",
                self.window_width, self.window_height
            )));
        }
        if self.sequence_fps.is_nan() || self.sequence_fps <= 0.0 {
            return Err(SettingsError::Invalid(format!(
                "sequence frame rate {} must be positive",
                self.sequence_fps
            )));
        }
        Ok(())
    }
}

/// Default output path: input stem with an `F` suffix
///
/// Video files get an `.avi` container in the same folder; image sequence
/// directories get a sibling directory.
pub fn output_path_for(input: &Path) -> PathBuf {
    let mut name = if input.is_dir() {
        input.file_name().map(|n| n.to_os_string()).unwrap_or_default()
    } else {
        input.file_stem().map(|n| n.to_os_string()).unwrap_or_default()
    };
    name.push("F");
    if !input.is_dir() {
        name.push(".avi");
    }
    input.with_file_name(name)
}

/// Settings-related errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = WarpSettings::default();
        assert_eq!((settings.output_width, settings.output_height), (1920, 1080));
        assert_eq!((settings.window_width, settings.window_height), (800, 600));
        assert_eq!(settings.codec, FourCc::XVID);
        assert_eq!(settings.mesh_path, PathBuf::from("EP_xyuv_1920.map"));
        assert_eq!(settings.uv_policy, UvPolicy::Clamp);
        assert!(settings.allow_staged_upload && settings.allow_offscreen_target);
        assert_eq!(settings.report_interval_secs, 5);
    }

    #[test]
    fn test_xml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.xml");

        let mut settings = WarpSettings::default();
        settings.output_width = 2048;
        settings.output_height = 2048;
        settings.codec = FourCc::INHERIT;
        settings.uv_policy = UvPolicy::Repeat;
        settings.allow_staged_upload = false;
        settings.save_to_file(&path).unwrap();

        let loaded = WarpSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_xml_fields_use_defaults() {
        let xml = "<WarpSettings><outputWidth>1024</outputWidth><meshPath>dome.map</meshPath></WarpSettings>";
        let settings: WarpSettings = from_str(xml).unwrap();
        assert_eq!(settings.output_width, 1024);
        assert_eq!(settings.output_height, 1080);
        assert_eq!(settings.mesh_path, PathBuf::from("dome.map"));
        assert!(settings.allow_offscreen_target);
    }

    #[test]
    fn test_legacy_ini() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEGACY_INI_NAME);
        fs::write(
            &path,
            "//GL_warp2mp4\n//settings\n//file\n\
             2048 outputwidth\n1536 outputheight\nH264 fourcc\n/meshes/dome.map\n",
        )
        .unwrap();

        let mut settings = WarpSettings::default();
        settings.apply_legacy_ini(&path).unwrap();
        assert_eq!((settings.output_width, settings.output_height), (2048, 1536));
        assert_eq!(settings.codec.to_string(), "H264");
        assert_eq!(settings.mesh_path, PathBuf::from("/meshes/dome.map"));
    }

    #[test]
    fn test_partial_legacy_ini_keeps_defaults() {
        let mut settings = WarpSettings::default();
        settings.apply_legacy_tokens("a b c 1280 w oops h");
        assert_eq!(settings.output_width, 1280);
        assert_eq!(settings.output_height, 1080);
        assert_eq!(settings.codec, FourCc::XVID);
    }

    #[test]
    fn test_missing_legacy_ini_is_not_an_error() {
        let mut settings = WarpSettings::default();
        settings.apply_legacy_ini(Path::new("/nonexistent/GL_warp2mp4.ini")).unwrap();
        assert_eq!(settings, WarpSettings::default());
    }

    #[test]
    fn test_output_path_for_video() {
        assert_eq!(
            output_path_for(Path::new("/videos/show.mp4")),
            PathBuf::from("/videos/showF.avi")
        );
        assert_eq!(output_path_for(Path::new("clip")), PathBuf::from("clipF.avi"));
    }

    #[test]
    fn test_output_path_for_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("frames");
        fs::create_dir(&frames).unwrap();
        assert_eq!(output_path_for(&frames), dir.path().join("framesF"));
    }

    #[test]
    fn test_texture_size_follows_source_when_unset() {
        let mut settings = WarpSettings::default();
        assert_eq!(settings.texture_size((720, 480)), (720, 480));
        settings.texture_width = 1024;
        settings.texture_height = 1024;
        assert_eq!(settings.texture_size((720, 480)), (1024, 1024));
    }

    #[test]
    fn test_zero_output_is_invalid() {
        let mut settings = WarpSettings::default();
        settings.output_width = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }
}
