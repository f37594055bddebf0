//! Multi-resolution image accessor.
//!
//! A [`Jp2Image`] is a handle on one JPEG 2000 file at one resolution level.
//! Tiles are decoded on first access and served from the on-disk store
//! afterwards:
//!
//! ```text
//! read_tile(c, x, y)
//!   │
//!   ├─ payload pool hit ──────────────────────────────► parse → Cached
//!   │
//!   ├─ DecodeGate::ensure(component-0 artifact)
//!   │     ├─ exists ─────────────────────────────────► parse → Cached
//!   │     ├─ decoded ────────────────────────────────► parse → Decoded
//!   │     └─ failed ── partial artifacts removed ────► zeros → Blank
//!   └─ parse failure ────────────────────────────────► zeros → Blank
//! ```
//!
//! Nothing but a disposed handle makes `read_tile` fail; every other problem
//! is logged and the caller gets a zero-filled tile.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::decode::{DecodeRequest, TileDecoder};
use crate::error::TileError;
use crate::format::parse_tile;
use crate::tile::{DecodeGate, Fetch, PayloadCache, TileKey, TileStore};

use super::Layout;

/// How a tile buffer was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileOutcome {
    /// Parsed from an artifact that already existed
    Cached,
    /// Parsed from an artifact produced by this call
    Decoded,
    /// Zero-filled because no usable artifact was available
    Blank,
}

/// Handle on one JPEG 2000 image at a fixed resolution level.
pub struct Jp2Image {
    /// Canonical path of the source file
    path: Arc<Path>,

    /// Geometry, resolved once at open
    layout: Layout,

    /// Resolution level served by this handle
    resolution: u32,

    /// Artifact naming in the package cache directory
    store: TileStore,

    /// Decode serialization shared with sibling handles
    gate: Arc<DecodeGate>,

    decoder: Arc<dyn TileDecoder>,

    /// Artifact bytes read by this handle
    payloads: PayloadCache,

    /// Artifacts this handle caused to be decoded
    generated: Mutex<HashSet<PathBuf>>,

    disposed: AtomicBool,

    /// Delete generated artifacts on dispose
    purge_on_dispose: bool,
}

impl Jp2Image {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        path: Arc<Path>,
        layout: Layout,
        resolution: u32,
        store: TileStore,
        gate: Arc<DecodeGate>,
        decoder: Arc<dyn TileDecoder>,
        payload_capacity: usize,
        purge_on_dispose: bool,
    ) -> Self {
        Self {
            path,
            layout,
            resolution,
            store,
            gate,
            decoder,
            payloads: PayloadCache::with_capacity(payload_capacity),
            generated: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            purge_on_dispose,
        }
    }

    /// Canonical path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image geometry.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Resolution level served by this handle.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Tile size in pixels at this handle's resolution level.
    pub fn tile_dim(&self) -> (u32, u32) {
        self.layout.tile_dim(self.resolution)
    }

    /// Number of samples a tile buffer must hold.
    pub fn tile_len(&self) -> usize {
        self.layout.tile_len(self.resolution)
    }

    /// Cache directory holding this image's artifacts.
    pub fn cache_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Fill `buffer` with one component of one tile.
    ///
    /// The tile is decoded on first access. Decode failures, missing output
    /// and malformed artifacts are logged and yield a zero-filled buffer
    /// reported as [`TileOutcome::Blank`]; so do tile coordinates outside the
    /// grid and component indices the image does not have.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::Disposed`] if the handle has been disposed.
    ///
    /// # Panics
    ///
    /// Panics if `buffer.len()` differs from [`tile_len`](Self::tile_len).
    pub async fn read_tile(
        &self,
        component: u32,
        tile_x: u32,
        tile_y: u32,
        buffer: &mut [u16],
    ) -> Result<TileOutcome, TileError> {
        let (tile_width, tile_height) = self.tile_dim();
        assert_eq!(
            buffer.len(),
            self.tile_len(),
            "tile buffer holds {} samples, expected {}x{}",
            buffer.len(),
            tile_width,
            tile_height
        );

        if self.is_disposed() {
            return Err(TileError::Disposed);
        }

        if !self.layout.contains_tile(tile_x, tile_y)
            || component >= self.layout.num_components
        {
            warn!(
                "Tile ({},{}) component {} is outside {}, returning blank",
                tile_x,
                tile_y,
                component,
                self.path.display()
            );
            buffer.fill(0);
            return Ok(TileOutcome::Blank);
        }

        let key = TileKey::new(self.path.clone(), self.resolution, tile_x, tile_y);
        let artifact = self.store.artifact_path(&key, component);

        if let Some(data) = self.payloads.get(&artifact) {
            debug!("Payload pool hit {}", artifact.display());
            return Ok(self.fill(&artifact, &data, buffer, TileOutcome::Cached));
        }

        let outcome = match self.ensure_decoded(&key).await {
            Some(outcome) => outcome,
            None => {
                buffer.fill(0);
                return Ok(TileOutcome::Blank);
            }
        };

        let data = match tokio::fs::read(&artifact).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!("Can't read tile artifact {}: {}", artifact.display(), e);
                buffer.fill(0);
                return Ok(TileOutcome::Blank);
            }
        };

        let outcome = self.fill(&artifact, &data, buffer, outcome);
        if outcome != TileOutcome::Blank {
            self.payloads.put(artifact, data);
        }
        Ok(outcome)
    }

    /// Make sure the tile's artifacts exist, decoding them if needed.
    ///
    /// Returns `None` when no artifact is available.
    async fn ensure_decoded(&self, key: &TileKey) -> Option<TileOutcome> {
        let output = self.store.output_path(key);
        let marker = self.store.marker_path(key);
        let artifacts = self.store.artifact_paths(key, self.layout.num_components);
        let request = DecodeRequest {
            source: &self.path,
            output: &output,
            working_dir: self.store.dir(),
            layout: &self.layout,
            resolution: key.resolution,
            tile_x: key.tile_x,
            tile_y: key.tile_y,
        };

        match self
            .gate
            .ensure(key, &marker, &artifacts, || {
                self.decoder.decode_tile(&request)
            })
            .await
        {
            Ok(Fetch::Hit) => Some(TileOutcome::Cached),
            Ok(Fetch::Decoded) => {
                self.record_generated(key);
                Some(TileOutcome::Decoded)
            }
            Err(e) => {
                warn!(
                    "Failed to decode tile ({},{}) at resolution {} of {} with {}: {}",
                    key.tile_x,
                    key.tile_y,
                    key.resolution,
                    self.path.display(),
                    self.decoder.name(),
                    e
                );
                None
            }
        }
    }

    fn fill(
        &self,
        artifact: &Path,
        data: &[u8],
        buffer: &mut [u16],
        outcome: TileOutcome,
    ) -> TileOutcome {
        let (tile_width, tile_height) = self.tile_dim();
        match parse_tile(data, tile_width as usize, tile_height as usize, buffer) {
            Ok(_) => outcome,
            Err(e) => {
                warn!("Discarding tile artifact {}: {}", artifact.display(), e);
                buffer.fill(0);
                TileOutcome::Blank
            }
        }
    }

    fn record_generated(&self, key: &TileKey) {
        let mut generated = self.generated.lock().unwrap_or_else(|e| e.into_inner());
        generated.extend(self.store.artifact_paths(key, self.layout.num_components));
    }

    /// Release the handle.
    ///
    /// Empties the payload pool and forgets which artifacts this handle
    /// generated, deleting them first when purging is enabled. Deletion is
    /// best-effort. Calling this more than once has no further effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.payloads.clear();

        let generated: Vec<PathBuf> = {
            let mut set = self.generated.lock().unwrap_or_else(|e| e.into_inner());
            set.drain().collect()
        };

        if !self.purge_on_dispose {
            return;
        }

        debug!(
            "Purging {} generated artifacts of {}",
            generated.len(),
            self.path.display()
        );
        for path in generated {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Can't delete {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for Jp2Image {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Jp2Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jp2Image")
            .field("path", &self.path)
            .field("resolution", &self.resolution)
            .field("layout", &self.layout)
            .field("cache_dir", &self.store.dir())
            .field("decoder", &self.decoder.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
