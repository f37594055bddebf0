//! Tile cache layer.
//!
//! Decoded tiles are kept on disk as PGX artifacts and, per image handle, as
//! payloads in memory:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Jp2Image::read_tile           │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  PayloadCache (per handle, in memory)   │
//! └────────────────────┬────────────────────┘
//!                      │ miss
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  TileStore + DecodeGate (on disk,       │
//! │  shared by all handles of a factory)    │
//! └────────────────────┬────────────────────┘
//!                      │ miss
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileDecoder                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileKey`]: identity of one tile of one source at one resolution level
//! - [`TileStore`]: maps keys to artifact paths in a package cache directory
//! - [`DecodeGate`]: at most one decode in flight per key
//! - [`PayloadCache`]: LRU of artifact bytes with size-based eviction

mod pool;
mod store;

pub use pool::{PayloadCache, DEFAULT_PAYLOAD_CACHE_CAPACITY};
pub use store::{
    component_path, package_cache_dir, DecodeGate, DecodeState, Fetch, TileKey, TileStore,
    ARTIFACT_EXTENSION,
};
