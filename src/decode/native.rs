//! In-process decoding through the `jpeg2k` OpenJPEG bindings.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jpeg2k::{DecodeArea, DecodeParameters, Image};
use tracing::debug;

use crate::error::DecodeError;
use crate::format::write_pgx;
use crate::raster::Layout;
use crate::tile::component_path;

use super::{DecodeRequest, TileDecoder};

/// Decoder that runs OpenJPEG inside the current process.
///
/// The tile is selected with a decode window covering the tile's rectangle
/// on the reference grid, and the result is written in exactly the layout
/// `opj_decompress` would produce, so the rest of the cache cannot tell the
/// two decoders apart. Decoding runs on the blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDecoder;

impl NativeDecoder {
    /// Create a new in-process decoder.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TileDecoder for NativeDecoder {
    async fn decode_tile(&self, request: &DecodeRequest<'_>) -> Result<(), DecodeError> {
        let job = NativeJob {
            source: request.source.to_path_buf(),
            output: request.output.to_path_buf(),
            layout: *request.layout,
            resolution: request.resolution,
            tile_x: request.tile_x,
            tile_y: request.tile_y,
        };

        tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| DecodeError::Native(format!("decode task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "openjpeg"
    }
}

struct NativeJob {
    source: PathBuf,
    output: PathBuf,
    layout: Layout,
    resolution: u32,
    tile_x: u32,
    tile_y: u32,
}

impl NativeJob {
    fn run(self) -> Result<(), DecodeError> {
        let (x0, y0, x1, y1) = self.layout.tile_bounds(self.tile_x, self.tile_y);
        debug!(
            "Decoding {} area ({}, {})-({}, {}) at resolution {}",
            self.source.display(),
            x0,
            y0,
            x1,
            y1,
            self.resolution
        );

        let params = DecodeParameters::new()
            .reduce(self.resolution)
            .decode_area(Some(DecodeArea::new(x0, y0, x1, y1)));

        let image = Image::from_file_with(&self.source, params)
            .map_err(|e| DecodeError::Native(e.to_string()))?;

        let components = image.components();
        if components.is_empty() {
            return Err(DecodeError::Native("image has no components".to_string()));
        }

        // Component 0 marks the tile as present, so it is written last.
        for (index, component) in components.iter().enumerate().rev() {
            let width = component.width() as usize;
            let height = component.height() as usize;
            let data = component.data();
            if data.len() != width * height {
                return Err(DecodeError::Native(format!(
                    "component {} has {} samples for {}x{}",
                    index,
                    data.len(),
                    width,
                    height
                )));
            }

            let samples: Vec<u16> = data
                .iter()
                .map(|&v| v.clamp(0, u16::MAX as i32) as u16)
                .collect();
            let payload = write_pgx(component.precision(), width, height, &samples);

            write_artifact(&component_path(&self.output, index as u32), &payload)?;
        }

        Ok(())
    }
}

/// Write through a temporary sibling and rename, so readers never observe
/// a partially written artifact.
fn write_artifact(path: &Path, payload: &[u8]) -> Result<(), DecodeError> {
    let tmp = path.with_extension("pgx.part");
    std::fs::write(&tmp, payload)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
