//! Tile decoders.
//!
//! A decoder materializes one tile of one resolution level as PGX artifacts,
//! one file per component, next to a caller-chosen output base path:
//!
//! ```text
//! output base:  <cache dir>/B04_R2_TX1_TY0.pgx
//! artifacts:    <cache dir>/B04_R2_TX1_TY0_0.pgx
//!               <cache dir>/B04_R2_TX1_TY0_1.pgx ...
//! ```
//!
//! Two implementations exist behind the [`TileDecoder`] trait:
//!
//! - [`ExeDecoder`]: runs OpenJPEG's `opj_decompress` as a child process
//! - [`NativeDecoder`]: decodes in-process through the `jpeg2k` bindings
//!
//! Both publish complete files only, by renaming them into place, and move
//! component 0 last. Neither checks that the component-0 artifact exists
//! afterwards; the [`DecodeGate`](crate::tile::DecodeGate) does that for
//! every decoder and removes leftovers of a failed decode.

mod exe;
mod native;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DecodeError;
use crate::raster::Layout;

pub use exe::{ExeDecoder, DEFAULT_DECOMPRESSOR};
pub use native::NativeDecoder;

/// Parameters of a single tile decode.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    /// JPEG 2000 source file
    pub source: &'a Path,

    /// Output base path; component `c` is written to `<stem>_<c>.pgx`
    pub output: &'a Path,

    /// Directory the decode runs in
    pub working_dir: &'a Path,

    /// Geometry of the source image
    pub layout: &'a Layout,

    /// Resolution level (number of discarded wavelet levels)
    pub resolution: u32,

    /// Tile column
    pub tile_x: u32,

    /// Tile row
    pub tile_y: u32,
}

impl DecodeRequest<'_> {
    /// Row-major tile index as understood by `opj_decompress -t`.
    pub fn tile_index(&self) -> u32 {
        self.layout.tile_index(self.tile_x, self.tile_y)
    }
}

/// Capability to decode one tile into PGX artifacts on disk.
#[async_trait]
pub trait TileDecoder: Send + Sync {
    /// Decode the requested tile, writing one artifact per component.
    async fn decode_tile(&self, request: &DecodeRequest<'_>) -> Result<(), DecodeError>;

    /// Short name for logging.
    fn name(&self) -> &str;
}

/// Decoder implementation selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DecoderKind {
    /// External `opj_decompress` executable
    #[default]
    Exe,
    /// In-process OpenJPEG
    Native,
}

/// Build a decoder of the given kind.
///
/// `program` and `timeout` only apply to [`DecoderKind::Exe`].
pub fn create_decoder(
    kind: DecoderKind,
    program: &Path,
    timeout: Option<Duration>,
) -> Arc<dyn TileDecoder> {
    match kind {
        DecoderKind::Exe => {
            let mut decoder = ExeDecoder::new(program);
            if let Some(timeout) = timeout {
                decoder = decoder.with_timeout(timeout);
            }
            Arc::new(decoder)
        }
        DecoderKind::Native => Arc::new(NativeDecoder::new()),
    }
}
