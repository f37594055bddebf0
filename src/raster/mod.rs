//! Tiled multi-resolution raster access.
//!
//! - [`Layout`]: immutable image geometry
//! - [`Jp2ImageFactory`]: opens handles sharing a cache and a decoder
//! - [`Jp2Image`]: reads tiles of one image at one resolution level

mod factory;
mod image;
mod layout;

pub use factory::Jp2ImageFactory;
pub use image::{Jp2Image, TileOutcome};
pub use layout::{Layout, DEFAULT_DISPLAY_TILE_SIZE};
