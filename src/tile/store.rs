//! On-disk tile artifact store.
//!
//! Decoded tiles live as PGX files in one cache directory per source package.
//! The directory is derived from the name of the directory containing the
//! source, so sibling bands of the same product share one cache directory.
//! A short hash of the canonical package path is appended to keep unrelated
//! packages that happen to share a directory name apart:
//!
//! ```text
//! <cache root>/S2A_MSIL1C_20230101-3fa2c91e/B04_R2_TX1_TY0_0.pgx
//!              └─ package dir ─┘ └─ hash ─┘ └stem┘ └─ key ──┘ └component
//! ```
//!
//! # Per-key serialization
//!
//! [`DecodeGate`] guarantees at most one decode in flight per [`TileKey`].
//! The key map is only locked long enough to find or insert the key's slot;
//! the check-decode-record sequence then runs under that slot's own lock,
//! so unrelated tiles never wait on each other. The marker is only trusted
//! under the slot lock, so a caller never sees the artifacts of a decode
//! that is still running in this process. Slots are dropped again once no
//! caller holds them, which bounds the map by the number of keys in use.
//!
//! Decoders publish artifacts by renaming complete files into place with
//! component 0 last, so a marker seen on disk always means every component
//! is readable, whichever process wrote it.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DecodeError, TileError};

/// Extension of decoder artifacts
pub const ARTIFACT_EXTENSION: &str = "pgx";

/// Number of hash characters appended to the package directory name
const PACKAGE_HASH_LEN: usize = 8;

// =============================================================================
// Tile Key
// =============================================================================

/// Identifies one decoded tile of one source at one resolution level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Canonical path of the source image
    pub source: Arc<Path>,

    /// Resolution level (0 = full resolution)
    pub resolution: u32,

    /// Tile column
    pub tile_x: u32,

    /// Tile row
    pub tile_y: u32,
}

impl TileKey {
    /// Create a new tile key.
    pub fn new(source: impl Into<Arc<Path>>, resolution: u32, tile_x: u32, tile_y: u32) -> Self {
        Self {
            source: source.into(),
            resolution,
            tile_x,
            tile_y,
        }
    }
}

// =============================================================================
// Artifact naming
// =============================================================================

/// Path of a component artifact given the decoder's output base path.
///
/// `B04_R0_TX1_TY2.pgx` becomes `B04_R0_TX1_TY2_<component>.pgx`.
pub fn component_path(output: &Path, component: u32) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("{}_{}.{}", stem, component, ARTIFACT_EXTENSION))
}

/// Resolve and create the cache directory for the package containing `source`.
///
/// `source` should be canonical so that the hash suffix is stable.
///
/// # Errors
///
/// Returns [`TileError::Config`] if the source has no parent directory or the
/// cache directory cannot be created or written.
pub async fn package_cache_dir(cache_root: &Path, source: &Path) -> Result<PathBuf, TileError> {
    let package = source.parent().ok_or_else(|| TileError::Config {
        reason: "Can't determine package directory".to_string(),
    })?;

    let name = package
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    let digest = Sha256::digest(package.to_string_lossy().as_bytes());
    let suffix = &hex::encode(digest)[..PACKAGE_HASH_LEN];

    let dir = cache_root.join(format!("{}-{}", name, suffix));

    let access_error = |detail: String| TileError::Config {
        reason: format!(
            "Can't access package cache directory {}: {}",
            dir.display(),
            detail
        ),
    };

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| access_error(e.to_string()))?;

    let metadata = tokio::fs::metadata(&dir)
        .await
        .map_err(|e| access_error(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(access_error("not a directory".to_string()));
    }
    if metadata.permissions().readonly() {
        return Err(access_error("read-only".to_string()));
    }

    Ok(dir)
}

// =============================================================================
// Tile Store
// =============================================================================

/// Maps tile keys of one source image to artifact paths in its cache directory.
#[derive(Debug, Clone)]
pub struct TileStore {
    dir: PathBuf,
    stem: String,
}

impl TileStore {
    /// Create a store for `source` inside `dir`.
    pub fn new(dir: impl Into<PathBuf>, source: &Path) -> Self {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            dir: dir.into(),
            stem,
        }
    }

    /// Cache directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Output base path handed to the decoder.
    pub fn output_path(&self, key: &TileKey) -> PathBuf {
        self.dir.join(format!(
            "{}_R{}_TX{}_TY{}.{}",
            self.stem, key.resolution, key.tile_x, key.tile_y, ARTIFACT_EXTENSION
        ))
    }

    /// Path of one component artifact.
    pub fn artifact_path(&self, key: &TileKey, component: u32) -> PathBuf {
        component_path(&self.output_path(key), component)
    }

    /// Path of the component-0 artifact whose existence marks a cache hit.
    pub fn marker_path(&self, key: &TileKey) -> PathBuf {
        self.artifact_path(key, 0)
    }

    /// Paths of every component artifact of a tile, component 0 first.
    pub fn artifact_paths(&self, key: &TileKey, num_components: u32) -> Vec<PathBuf> {
        let output = self.output_path(key);
        (0..num_components)
            .map(|component| component_path(&output, component))
            .collect()
    }

    /// Whether the tile has been decoded.
    pub async fn contains(&self, key: &TileKey) -> bool {
        artifact_exists(&self.marker_path(key)).await
    }
}

async fn artifact_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

// =============================================================================
// Decode Gate
// =============================================================================

/// Decode progress of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Not decoded yet, or the last attempt failed
    Idle,
    /// A decode is running
    InFlight,
    /// The artifact has been produced
    Done,
}

/// How [`DecodeGate::ensure`] obtained the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// The artifact already existed, possibly produced by a concurrent caller
    Hit,
    /// This call ran the decoder
    Decoded,
}

type Slot = Arc<Mutex<DecodeState>>;

/// Key-scoped serialization of decodes.
#[derive(Default)]
pub struct DecodeGate {
    slots: Mutex<HashMap<TileKey, Slot>>,
}

impl DecodeGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the artifact at `marker` exists, running `decode` at most
    /// once across concurrent callers for the same key.
    ///
    /// Callers arriving while a decode of the key is running wait for it to
    /// finish before looking at `marker`.
    ///
    /// A decode that reports success without producing `marker` fails with
    /// [`DecodeError::MissingArtifact`]. On any failure the files listed in
    /// `artifacts` are removed, so a partial write never passes for a cached
    /// tile, and the next call tries again.
    pub async fn ensure<F, Fut>(
        &self,
        key: &TileKey,
        marker: &Path,
        artifacts: &[PathBuf],
        decode: F,
    ) -> Result<Fetch, DecodeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DecodeError>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(DecodeState::Idle)))
                .clone()
        };

        let result = {
            let mut state = slot.lock().await;

            if *state == DecodeState::Done || artifact_exists(marker).await {
                debug!(
                    "Cache hit res={}, tile=({},{})",
                    key.resolution, key.tile_x, key.tile_y
                );
                *state = DecodeState::Done;
                Ok(Fetch::Hit)
            } else {
                info!(
                    "Decoding res={}, tile=({},{}) of {}",
                    key.resolution,
                    key.tile_x,
                    key.tile_y,
                    key.source.display()
                );
                *state = DecodeState::InFlight;

                let result = match decode().await {
                    Ok(()) if artifact_exists(marker).await => Ok(Fetch::Decoded),
                    Ok(()) => Err(DecodeError::MissingArtifact {
                        path: marker.to_path_buf(),
                    }),
                    Err(e) => Err(e),
                };

                if result.is_ok() {
                    *state = DecodeState::Done;
                } else {
                    discard_artifacts(marker, artifacts).await;
                    *state = DecodeState::Idle;
                }
                result
            }
        };

        self.release(key, slot).await;
        result
    }

    /// Give up a caller's hold on a slot, dropping it from the map when no
    /// other caller holds it.
    async fn release(&self, key: &TileKey, slot: Slot) {
        let mut slots = self.slots.lock().await;
        // Clones are only taken and dropped under the map lock.
        drop(slot);
        if slots
            .get(key)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            slots.remove(key);
        }
    }

    /// Current state of a key, or `None` if no caller is working on it.
    ///
    /// Waits for a running decode of the key to finish.
    pub async fn state(&self, key: &TileKey) -> Option<DecodeState> {
        let slot = self.slots.lock().await.get(key).cloned()?;
        let state = *slot.lock().await;
        self.release(key, slot).await;
        Some(state)
    }

    /// Number of keys with callers in progress.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether no key has callers in progress.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

/// Remove whatever a failed decode left behind, marker first.
async fn discard_artifacts(marker: &Path, artifacts: &[PathBuf]) {
    let paths = std::iter::once(marker).chain(artifacts.iter().map(PathBuf::as_path));
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed partial artifact {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Can't remove partial artifact {}: {}", path.display(), e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
