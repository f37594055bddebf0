//! Configuration for the tile cache and the `jp2-tiles` command line tool.
//!
//! Options are read from command-line arguments, falling back to
//! environment variables with the `JP2_` prefix and then to defaults.
//!
//! # Example
//!
//! ```ignore
//! use jp2_tile_cache::config::Cli;
//! use jp2_tile_cache::raster::Jp2ImageFactory;
//!
//! let cli = Cli::parse();
//! cli.cache.validate()?;
//! let factory = Jp2ImageFactory::from_config(&cli.cache);
//! ```
//!
//! # Environment Variables
//!
//! - `JP2_CACHE_DIR` - Cache root (default: platform cache dir + `jp2-tile-cache`)
//! - `JP2_DECODER` - `exe` or `native` (default: exe)
//! - `OPJ_DECOMPRESS_PATH` - Decompressor executable (default: opj_decompress)
//! - `JP2_DECODE_TIMEOUT` - Seconds before a decompressor is killed (default: none)
//! - `JP2_PAYLOAD_CACHE` - Per-handle payload pool in bytes (default: 64MB)
//! - `JP2_PURGE_ON_DISPOSE` - Delete generated artifacts on dispose (default: false)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::decode::{DecoderKind, DEFAULT_DECOMPRESSOR};
use crate::tile::DEFAULT_PAYLOAD_CACHE_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Directory created under the platform cache directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = "jp2-tile-cache";

/// Default number of concurrent decodes for `warm`.
pub const DEFAULT_WARM_JOBS: usize = 4;

/// Upper bound accepted for the decode timeout (one day).
pub const MAX_DECODE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Cache root used when none is configured.
///
/// Falls back to the system temporary directory on platforms without a
/// per-user cache directory.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_CACHE_DIR_NAME)
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// jp2-tiles - decode-on-demand tile cache for tiled JPEG 2000 rasters.
#[derive(Parser, Debug, Clone)]
#[command(name = "jp2-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub cache: CacheConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of `jp2-tiles`.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the layout of an image as JSON.
    Info(InfoArgs),

    /// Read one tile component and print sample statistics.
    Tile(TileArgs),

    /// Decode every tile of a resolution level into the cache.
    Warm(WarmArgs),
}

/// Tile cache settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for decoded tile artifacts.
    #[arg(long, global = true, env = "JP2_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Decoder implementation.
    #[arg(long, global = true, value_enum, default_value_t = DecoderKind::Exe, env = "JP2_DECODER")]
    pub decoder: DecoderKind,

    /// Decompressor executable used by the `exe` decoder.
    #[arg(long, global = true, default_value = DEFAULT_DECOMPRESSOR, env = "OPJ_DECOMPRESS_PATH")]
    pub decompressor: PathBuf,

    /// Kill the decompressor after this many seconds (0 waits forever).
    #[arg(long, global = true, default_value_t = 0, env = "JP2_DECODE_TIMEOUT")]
    pub decode_timeout: u64,

    /// Per-handle payload pool capacity in bytes (0 disables it).
    #[arg(long, global = true, default_value_t = DEFAULT_PAYLOAD_CACHE_CAPACITY, env = "JP2_PAYLOAD_CACHE")]
    pub payload_cache: usize,

    /// Delete artifacts a handle generated when it is disposed.
    #[arg(long, global = true, default_value_t = false, env = "JP2_PURGE_ON_DISPOSE")]
    pub purge_on_dispose: bool,
}

/// Arguments of `jp2-tiles info`.
#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// JPEG 2000 file (.jp2 or .j2k).
    pub file: PathBuf,
}

/// Arguments of `jp2-tiles tile`.
#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// JPEG 2000 file (.jp2 or .j2k).
    pub file: PathBuf,

    /// Resolution level (0 = full resolution).
    #[arg(short, long, default_value_t = 0)]
    pub resolution: u32,

    /// Tile column.
    #[arg(short = 'x', long, default_value_t = 0)]
    pub tile_x: u32,

    /// Tile row.
    #[arg(short = 'y', long, default_value_t = 0)]
    pub tile_y: u32,

    /// Component (band) index.
    #[arg(short, long, default_value_t = 0)]
    pub component: u32,

    /// Write the tile as a 16-bit grayscale PNG.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments of `jp2-tiles warm`.
#[derive(Args, Debug, Clone)]
pub struct WarmArgs {
    /// JPEG 2000 file (.jp2 or .j2k).
    pub file: PathBuf,

    /// Resolution level (0 = full resolution).
    #[arg(short, long, default_value_t = 0)]
    pub resolution: u32,

    /// Number of tiles decoded concurrently.
    #[arg(short, long, default_value_t = DEFAULT_WARM_JOBS)]
    pub jobs: usize,
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.decoder == DecoderKind::Exe && self.decompressor.as_os_str().is_empty() {
            return Err(
                "Decompressor path is empty. Set --decompressor or OPJ_DECOMPRESS_PATH"
                    .to_string(),
            );
        }

        if self.decode_timeout > MAX_DECODE_TIMEOUT_SECS {
            return Err(format!(
                "decode_timeout must be at most {} seconds",
                MAX_DECODE_TIMEOUT_SECS
            ));
        }

        if let Some(ref dir) = self.cache_dir {
            if dir.as_os_str().is_empty() {
                return Err("cache_dir must not be empty".to_string());
            }
            if dir.is_file() {
                return Err(format!("cache_dir {} is a file", dir.display()));
            }
        }

        Ok(())
    }

    /// Cache root: the configured directory or [`default_cache_root`].
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_root)
    }

    /// Decode timeout, `None` when disabled.
    pub fn decode_timeout(&self) -> Option<Duration> {
        (self.decode_timeout > 0).then(|| Duration::from_secs(self.decode_timeout))
    }
}

impl WarmArgs {
    /// Validate the arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.jobs == 0 {
            return Err("jobs must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
