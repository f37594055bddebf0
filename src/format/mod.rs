//! File formats read and written by the tile cache.
//!
//! - [`codestream`]: JPEG 2000 main-header parsing, used to resolve a [`Layout`]
//!   without decoding any pixels
//! - [`pgx`]: the raw per-component tile format produced by the decoders
//!
//! [`Layout`]: crate::raster::Layout

pub mod codestream;
pub mod pgx;

pub use codestream::{read_codestream_info, resolve_layout, CodestreamInfo};
pub use pgx::{parse_tile, write_pgx, PgxHeader, SampleOrder};
