//! Construction of image handles.
//!
//! A [`Jp2ImageFactory`] owns what handles share: the cache root, the decoder
//! and the [`DecodeGate`] that keeps two handles from decoding the same tile
//! at once. Handles opened on the same file through one factory reuse each
//! other's artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::decode::{create_decoder, ExeDecoder, TileDecoder};
use crate::error::TileError;
use crate::format::resolve_layout;
use crate::tile::{package_cache_dir, DecodeGate, TileStore, DEFAULT_PAYLOAD_CACHE_CAPACITY};

use super::{Jp2Image, Layout};

/// Opens [`Jp2Image`] handles that share one cache and one decoder.
#[derive(Clone)]
pub struct Jp2ImageFactory {
    /// Directory under which package cache directories are created
    cache_root: PathBuf,

    decoder: Arc<dyn TileDecoder>,

    gate: Arc<DecodeGate>,

    /// Payload pool capacity of each handle, in bytes
    payload_capacity: usize,

    /// Whether handles delete their generated artifacts on dispose
    purge_on_dispose: bool,
}

impl Jp2ImageFactory {
    /// Create a factory caching under `cache_root` and decoding with `decoder`.
    pub fn new(cache_root: impl Into<PathBuf>, decoder: Arc<dyn TileDecoder>) -> Self {
        Self {
            cache_root: cache_root.into(),
            decoder,
            gate: Arc::new(DecodeGate::new()),
            payload_capacity: DEFAULT_PAYLOAD_CACHE_CAPACITY,
            purge_on_dispose: false,
        }
    }

    /// Create a factory from command line / environment configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        let decoder = create_decoder(
            config.decoder,
            &config.decompressor,
            config.decode_timeout(),
        );
        Self::new(config.cache_root(), decoder)
            .with_payload_capacity(config.payload_cache)
            .with_purge_on_dispose(config.purge_on_dispose)
    }

    /// Set the per-handle payload pool capacity in bytes (0 disables it).
    pub fn with_payload_capacity(mut self, bytes: usize) -> Self {
        self.payload_capacity = bytes;
        self
    }

    /// Delete artifacts generated by a handle when it is disposed.
    pub fn with_purge_on_dispose(mut self, purge: bool) -> Self {
        self.purge_on_dispose = purge;
        self
    }

    /// Root of the on-disk cache.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Decoder used by handles of this factory.
    pub fn decoder(&self) -> &Arc<dyn TileDecoder> {
        &self.decoder
    }

    /// Decode gate shared by handles of this factory.
    pub fn gate(&self) -> &Arc<DecodeGate> {
        &self.gate
    }

    /// Open `path` at the given resolution level.
    ///
    /// # Errors
    ///
    /// - [`TileError::NotFound`] if the file does not exist or is not a file
    /// - [`TileError::Config`] if the package cache directory is unusable
    /// - [`TileError::Format`] if the codestream header cannot be parsed
    /// - [`TileError::InvalidResolution`] if the level is not in the image
    pub async fn open(&self, path: impl AsRef<Path>, resolution: u32) -> Result<Jp2Image, TileError> {
        let path = locate(path.as_ref()).await?;
        let dir = package_cache_dir(&self.cache_root, &path).await?;
        let layout = load_layout(&path).await?;

        if resolution >= layout.num_resolutions {
            return Err(TileError::InvalidResolution {
                resolution,
                num_resolutions: layout.num_resolutions,
            });
        }

        info!(
            "Opened {} at resolution {} ({}x{} tiles of {}x{}), cache {}",
            path.display(),
            resolution,
            layout.num_x_tiles,
            layout.num_y_tiles,
            layout.tile_width >> resolution,
            layout.tile_height >> resolution,
            dir.display()
        );

        let store = TileStore::new(dir, &path);
        Ok(Jp2Image::new(
            Arc::from(path),
            layout,
            resolution,
            store,
            self.gate.clone(),
            self.decoder.clone(),
            self.payload_capacity,
            self.purge_on_dispose,
        ))
    }

    /// Resolve the layout of `path` without opening a handle.
    pub async fn layout(&self, path: impl AsRef<Path>) -> Result<Layout, TileError> {
        let path = locate(path.as_ref()).await?;
        load_layout(&path).await
    }
}

impl Default for Jp2ImageFactory {
    fn default() -> Self {
        Self::new(
            crate::config::default_cache_root(),
            Arc::new(ExeDecoder::default()),
        )
    }
}

impl std::fmt::Debug for Jp2ImageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jp2ImageFactory")
            .field("cache_root", &self.cache_root)
            .field("decoder", &self.decoder.name())
            .field("payload_capacity", &self.payload_capacity)
            .field("purge_on_dispose", &self.purge_on_dispose)
            .finish()
    }
}

/// Canonicalize `path`, requiring a regular file.
async fn locate(path: &Path) -> Result<PathBuf, TileError> {
    let not_found = || TileError::NotFound {
        path: path.to_path_buf(),
    };

    let canonical = tokio::fs::canonicalize(path).await.map_err(|_| not_found())?;
    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    Ok(canonical)
}

async fn load_layout(path: &Path) -> Result<Layout, TileError> {
    let owned = path.to_path_buf();
    let layout = tokio::task::spawn_blocking(move || resolve_layout(&owned))
        .await
        .map_err(|e| TileError::Io(format!("layout task failed: {}", e)))??;

    debug!("Resolved layout of {}: {:?}", path.display(), layout);
    Ok(layout)
}
