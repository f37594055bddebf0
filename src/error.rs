use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a codestream header or a decoded tile payload
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// The PGX header line did not have the expected shape
    #[error("Unexpected tile format: {0}")]
    UnexpectedTileFormat(String),

    /// A numeric header field could not be parsed
    #[error("Invalid {field} in tile header: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// Fewer sample bytes follow the header than it declares
    #[error("Truncated tile payload: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The file is neither a JP2 box stream nor a raw J2K codestream
    #[error("Not a JPEG 2000 file: {0}")]
    NotJpeg2000(String),

    /// A required codestream marker was not found in the main header
    #[error("Missing codestream marker: {0}")]
    MissingMarker(&'static str),

    /// A marker segment or box is shorter than its declared length
    #[error("Truncated {0} segment")]
    TruncatedSegment(&'static str),

    /// Geometry read from the header violates the layout invariants
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// Underlying read failure while scanning the header
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors produced by a tile decoder
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The decompressor process could not be started
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The decompressor exited with a non-zero status
    #[error("Decompressor exited with status {code:?}")]
    ExitStatus { code: Option<i32> },

    /// The decoder reported success but the component-0 artifact is absent
    #[error("Decoder produced no artifact at {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// The in-process decoder failed
    #[error("Native decode failed: {0}")]
    Native(String),

    /// The decompressor did not finish in time and was killed
    #[error("Decode timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Failure writing or inspecting decoder output
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors surfaced by the tile accessor
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Source image is missing or unreadable
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Cache directory cannot be established
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Layout or payload header could not be parsed
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Declared tile dimensions exceed the destination tile
    #[error("Corrupt tile: declared {width}x{height} exceeds tile size {tile_width}x{tile_height}")]
    Corruption {
        width: usize,
        height: usize,
        tile_width: usize,
        tile_height: usize,
    },

    /// The decoder failed or produced no artifact
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Requested resolution level is not available in the image
    #[error("Invalid resolution {resolution}: image has {num_resolutions} levels")]
    InvalidResolution {
        resolution: u32,
        num_resolutions: u32,
    },

    /// The accessor handle was already disposed
    #[error("Image handle has been disposed")]
    Disposed,

    /// Other filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FormatError::TruncatedSegment("header"),
            _ => FormatError::Io(err.to_string()),
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        DecodeError::Io(err.to_string())
    }
}

impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::Io(err.to_string())
    }
}
