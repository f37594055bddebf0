//! Geometry of a tiled, multi-resolution JPEG 2000 image.
//!
//! A [`Layout`] is resolved once when an image is opened and never changes
//! afterwards. The tile grid is the same at every resolution level; only the
//! pixel size of each tile shrinks, by a power of two per level.

use serde::Serialize;

use crate::error::FormatError;

/// Maximum edge length of a display tile handed to a rendering framework.
pub const DEFAULT_DISPLAY_TILE_SIZE: u32 = 512;

/// Immutable geometry descriptor for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Layout {
    /// Number of decodable resolution levels (0 = full resolution)
    pub num_resolutions: u32,

    /// Number of components (bands) per pixel
    pub num_components: u32,

    /// Full resolution image width in pixels
    pub width: u32,

    /// Full resolution image height in pixels
    pub height: u32,

    /// Number of tiles in X direction
    pub num_x_tiles: u32,

    /// Number of tiles in Y direction
    pub num_y_tiles: u32,

    /// Horizontal offset of the tile grid origin
    pub tile_offset_x: u32,

    /// Vertical offset of the tile grid origin
    pub tile_offset_y: u32,

    /// Level-0 tile width in pixels
    pub tile_width: u32,

    /// Level-0 tile height in pixels
    pub tile_height: u32,

    /// Horizontal origin of the image area on the reference grid
    pub image_offset_x: u32,

    /// Vertical origin of the image area on the reference grid
    pub image_offset_y: u32,
}

impl Layout {
    /// Build a layout with the image area anchored at the reference grid origin.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidLayout`] if any count or dimension is zero,
    /// or if the tile size would shrink to zero before the last resolution level.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num_resolutions: u32,
        num_components: u32,
        width: u32,
        height: u32,
        num_x_tiles: u32,
        num_y_tiles: u32,
        tile_offset_x: u32,
        tile_offset_y: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self, FormatError> {
        Self {
            num_resolutions,
            num_components,
            width,
            height,
            num_x_tiles,
            num_y_tiles,
            tile_offset_x,
            tile_offset_y,
            tile_width,
            tile_height,
            image_offset_x: 0,
            image_offset_y: 0,
        }
        .validated()
    }

    /// Set the image area origin on the reference grid.
    pub fn with_image_offset(mut self, x: u32, y: u32) -> Self {
        self.image_offset_x = x;
        self.image_offset_y = y;
        self
    }

    pub(crate) fn validated(self) -> Result<Self, FormatError> {
        let invalid = |msg: String| Err(FormatError::InvalidLayout(msg));

        if self.num_resolutions == 0 || self.num_resolutions > 32 {
            return invalid(format!("num_resolutions = {}", self.num_resolutions));
        }
        if self.num_components == 0 {
            return invalid("num_components = 0".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return invalid(format!("image size {}x{}", self.width, self.height));
        }
        if self.num_x_tiles == 0 || self.num_y_tiles == 0 {
            return invalid(format!(
                "tile grid {}x{}",
                self.num_x_tiles, self.num_y_tiles
            ));
        }

        let last = self.num_resolutions - 1;
        if (self.tile_width >> last) == 0 || (self.tile_height >> last) == 0 {
            return invalid(format!(
                "tile {}x{} vanishes at resolution {}",
                self.tile_width, self.tile_height, last
            ));
        }

        Ok(self)
    }

    /// Tile pixel size at a resolution level.
    pub fn tile_dim(&self, resolution: u32) -> (u32, u32) {
        (self.tile_width >> resolution, self.tile_height >> resolution)
    }

    /// Number of samples in one tile buffer at a resolution level.
    pub fn tile_len(&self, resolution: u32) -> usize {
        let (w, h) = self.tile_dim(resolution);
        w as usize * h as usize
    }

    /// Image size at a resolution level, rounding partial pixels up.
    pub fn level_dim(&self, resolution: u32) -> (u32, u32) {
        let div = 1u64 << resolution;
        let shrink = |v: u32| ((v as u64 + div - 1) / div) as u32;
        (shrink(self.width), shrink(self.height))
    }

    /// Display tile size for a rendering grid at a resolution level.
    ///
    /// Large codestream tiles are split into display tiles of at most
    /// [`DEFAULT_DISPLAY_TILE_SIZE`] pixels per edge.
    pub fn display_tile_dim(&self, resolution: u32) -> (u32, u32) {
        let (w, h) = self.tile_dim(resolution);
        (
            w.min(DEFAULT_DISPLAY_TILE_SIZE),
            h.min(DEFAULT_DISPLAY_TILE_SIZE),
        )
    }

    /// Row-major tile index, identical at every resolution level.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> u32 {
        self.num_x_tiles * tile_y + tile_x
    }

    /// Total number of tiles in the grid.
    pub fn tile_count(&self) -> u32 {
        self.num_x_tiles * self.num_y_tiles
    }

    /// Whether the tile coordinates fall inside the grid.
    pub fn contains_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        tile_x < self.num_x_tiles && tile_y < self.num_y_tiles
    }

    /// Reference-grid rectangle `(x0, y0, x1, y1)` covered by a tile at full
    /// resolution, clipped to the image area.
    pub fn tile_bounds(&self, tile_x: u32, tile_y: u32) -> (u32, u32, u32, u32) {
        // u64 keeps `offset + (tile + 1) * size` from wrapping for huge tiles.
        let span = |origin: u32, extent: u32, tile_offset: u32, size: u32, tile: u32| {
            let start = origin as u64;
            let end = (start + extent as u64).min(u32::MAX as u64);
            let t0 = tile_offset as u64 + tile as u64 * size as u64;
            let t1 = t0 + size as u64;
            (t0.clamp(start, end) as u32, t1.clamp(start, end) as u32)
        };

        let (x0, x1) = span(
            self.image_offset_x,
            self.width,
            self.tile_offset_x,
            self.tile_width,
            tile_x,
        );
        let (y0, y1) = span(
            self.image_offset_y,
            self.height,
            self.tile_offset_y,
            self.tile_height,
            tile_y,
        );

        (x0, y0, x1, y1)
    }
}
