//! # jp2-tile-cache
//!
//! Decode-on-demand tile access for very large, tiled, multi-resolution
//! JPEG 2000 rasters such as satellite image bands.
//!
//! Tiles are requested lazily at any resolution level. The first request for
//! a tile runs a decoder that writes the tile as PGX files (one per
//! component) into an on-disk cache; later requests read those files back.
//!
//! ## Features
//!
//! - **Header-only layout**: image and tile geometry is read from the JP2/J2K
//!   main header without decoding pixels
//! - **Two decoders**: OpenJPEG's `opj_decompress` as a child process, or
//!   OpenJPEG in-process
//! - **Single decode per tile**: concurrent requests for the same tile wait
//!   for one decode; different tiles decode in parallel
//! - **Graceful degradation**: decode or parse failures yield a zero-filled
//!   tile and a log line, never an error
//!
//! ## Architecture
//!
//! - [`raster`] - Layout, image handles and their factory
//! - [`tile`] - On-disk artifact store, decode gate and payload pool
//! - [`decode`] - Tile decoders
//! - [`mod@format`] - Codestream header and PGX parsing
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jp2_tile_cache::{ExeDecoder, Jp2ImageFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), jp2_tile_cache::TileError> {
//!     let factory = Jp2ImageFactory::new("/var/cache/jp2", Arc::new(ExeDecoder::default()));
//!     let image = factory.open("/data/S2A_MSIL1C/B04.jp2", 2).await?;
//!
//!     let mut tile = vec![0u16; image.tile_len()];
//!     image.read_tile(0, 1, 0, &mut tile).await?;
//!
//!     image.dispose();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod format;
pub mod raster;
pub mod tile;

// Re-export commonly used types
pub use config::{CacheConfig, Cli, Command};
pub use decode::{
    create_decoder, DecodeRequest, DecoderKind, ExeDecoder, NativeDecoder, TileDecoder,
};
pub use error::{DecodeError, FormatError, TileError};
pub use format::{parse_tile, resolve_layout, write_pgx, PgxHeader};
pub use raster::{Jp2Image, Jp2ImageFactory, Layout, TileOutcome};
pub use tile::{DecodeGate, TileKey, TileStore};
