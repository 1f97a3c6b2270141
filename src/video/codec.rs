//! FourCC codec identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid FourCC string
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid FourCC {0:?}: expected exactly four printable ASCII characters")]
pub struct FourCcError(pub String);

/// Encoder families a FourCC can select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    Mpeg4,
    H264,
    Hevc,
    Mjpeg,
}

/// Four-character codec code, e.g. `XVID`
///
/// The sentinel `NULL` means "use the input's codec".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc([u8; 4]);

impl FourCc {
    /// Inherit the input stream's codec
    pub const INHERIT: FourCc = FourCc(*b"NULL");
    /// Default output codec
    pub const XVID: FourCc = FourCc(*b"XVID");

    /// Build from raw bytes (as stored in container headers)
    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, FourCcError> {
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            Ok(Self(bytes))
        } else {
            Err(FourCcError(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    /// Whether this is the `NULL` sentinel
    pub fn is_inherit(&self) -> bool {
        self.0.eq_ignore_ascii_case(b"NULL")
    }

    pub fn as_str(&self) -> &str {
        // Only printable ASCII is ever stored
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    /// Encoder family this code selects, if known
    pub fn family(&self) -> Option<CodecFamily> {
        let upper = self.0.map(|b| b.to_ascii_uppercase());
        match &upper {
            b"XVID" | b"DIVX" | b"DX50" | b"FMP4" | b"MP4V" => Some(CodecFamily::Mpeg4),
            b"H264" | b"X264" | b"AVC1" => Some(CodecFamily::H264),
            b"HEVC" | b"HVC1" | b"H265" | b"X265" => Some(CodecFamily::Hevc),
            b"MJPG" => Some(CodecFamily::Mjpeg),
            _ => None,
        }
    }
}

impl Default for FourCc {
    fn default() -> Self {
        Self::XVID
    }
}

impl FromStr for FourCc {
    type Err = FourCcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| FourCcError(s.to_string()))?;
        Self::from_bytes(bytes)
    }
}

impl TryFrom<String> for FourCc {
    type Error = FourCcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}
