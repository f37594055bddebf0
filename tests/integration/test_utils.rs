//! Test utilities for integration tests.
//!
//! This module provides a scripted decoder and helpers for creating minimal
//! JPEG 2000 codestream headers on disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use jp2_tile_cache::decode::{DecodeRequest, TileDecoder};
use jp2_tile_cache::error::DecodeError;
use jp2_tile_cache::format::write_pgx;
use jp2_tile_cache::raster::{Jp2ImageFactory, Layout};
use jp2_tile_cache::tile::component_path;

// =============================================================================
// Codestream Builders
// =============================================================================

/// Geometry of a synthetic image.
#[derive(Debug, Clone, Copy)]
pub struct TestGeometry {
    pub width: u32,
    pub height: u32,
    pub tile: u32,
    pub components: u16,
    pub levels: u8,
}

impl Default for TestGeometry {
    /// 20x20 pixels, 8x8 tiles (3x3 grid with partial edge tiles),
    /// 2 components, 3 resolution levels.
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            tile: 8,
            components: 2,
            levels: 2,
        }
    }
}

/// Build a raw J2K main header followed by an empty tile-part and EOC.
pub fn j2k_header(g: &TestGeometry) -> Vec<u8> {
    let mut siz = Vec::new();
    siz.extend_from_slice(&0u16.to_be_bytes());
    siz.extend_from_slice(&g.width.to_be_bytes());
    siz.extend_from_slice(&g.height.to_be_bytes());
    siz.extend_from_slice(&0u32.to_be_bytes());
    siz.extend_from_slice(&0u32.to_be_bytes());
    siz.extend_from_slice(&g.tile.to_be_bytes());
    siz.extend_from_slice(&g.tile.to_be_bytes());
    siz.extend_from_slice(&0u32.to_be_bytes());
    siz.extend_from_slice(&0u32.to_be_bytes());
    siz.extend_from_slice(&g.components.to_be_bytes());
    for _ in 0..g.components {
        // 16-bit unsigned, no subsampling
        siz.extend_from_slice(&[15, 1, 1]);
    }

    let mut out = vec![0xFF, 0x4F];
    out.extend_from_slice(&[0xFF, 0x51]);
    out.extend_from_slice(&((siz.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&siz);

    out.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C]);
    out.extend_from_slice(&[0, 0, 0, 1, 0, g.levels, 4, 4, 0, 0]);

    out.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0, 0, 0, 0, 0, 0, 0, 1]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Write a synthetic J2K file at `path`, creating parent directories.
pub fn write_j2k(path: &Path, g: &TestGeometry) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, j2k_header(g)).unwrap();
    path.to_path_buf()
}

// =============================================================================
// Expected Samples
// =============================================================================

/// Deterministic sample value the mock decoder writes.
pub fn sample_value(component: u32, tile_index: u32, x: usize, y: usize) -> u16 {
    ((component + 1) * 1000 + tile_index * 10) as u16 + ((x + y) % 10) as u16
}

/// Pixel size of a decoded tile at `resolution`, clipped at the image edge.
pub fn decoded_dim(layout: &Layout, resolution: u32, tile_x: u32, tile_y: u32) -> (usize, usize) {
    let (x0, y0, x1, y1) = layout.tile_bounds(tile_x, tile_y);
    let shrink = |v: u32| v.div_ceil(1 << resolution);
    (
        (shrink(x1) - shrink(x0)) as usize,
        (shrink(y1) - shrink(y0)) as usize,
    )
}

/// Full tile buffer `read_tile` should produce for a mock-decoded tile.
pub fn expected_tile(
    layout: &Layout,
    resolution: u32,
    component: u32,
    tile_x: u32,
    tile_y: u32,
) -> Vec<u16> {
    let (tile_width, tile_height) = layout.tile_dim(resolution);
    let (width, height) = decoded_dim(layout, resolution, tile_x, tile_y);
    let index = layout.tile_index(tile_x, tile_y);

    let mut tile = vec![0u16; (tile_width * tile_height) as usize];
    for y in 0..height {
        for x in 0..width {
            tile[y * tile_width as usize + x] = sample_value(component, index, x, y);
        }
    }
    tile
}

// =============================================================================
// Mock Decoder
// =============================================================================

/// What the mock decoder does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    /// Write one artifact per component and succeed
    Succeed,
    /// Fail without writing anything
    Fail,
    /// Report success without writing anything
    NoOutput,
}

/// A decoder that writes deterministic PGX artifacts and records its calls.
pub struct MockDecoder {
    mode: Mutex<MockMode>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(u32, u32)>>,
    delay: Option<Duration>,
    barrier: Option<Arc<Barrier>>,
    marker_first_gap: Option<Duration>,
}

impl MockDecoder {
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
            barrier: None,
            marker_first_gap: None,
        }
    }

    /// Sleep before producing output.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Wait on `barrier` before producing output.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Write component 0 first and pause for `gap` before each further
    /// component, the order `opj_decompress` writes its output in.
    pub fn with_marker_first(mut self, gap: Duration) -> Self {
        self.marker_first_gap = Some(gap);
        self
    }

    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recorded `(resolution, tile index)` pairs in call order.
    pub fn requests(&self) -> Vec<(u32, u32)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TileDecoder for MockDecoder {
    async fn decode_tile(&self, request: &DecodeRequest<'_>) -> Result<(), DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((request.resolution, request.tile_index()));

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.mode.lock().unwrap();
        match mode {
            MockMode::Fail => return Err(DecodeError::ExitStatus { code: Some(1) }),
            MockMode::NoOutput => return Ok(()),
            MockMode::Succeed => {}
        }

        let layout = request.layout;
        let (width, height) =
            decoded_dim(layout, request.resolution, request.tile_x, request.tile_y);
        let index = request.tile_index();

        // Component 0 last unless told otherwise, so the marker means done.
        let order: Vec<u32> = match self.marker_first_gap {
            Some(_) => (0..layout.num_components).collect(),
            None => (0..layout.num_components).rev().collect(),
        };

        for component in order {
            match self.marker_first_gap {
                Some(gap) if component > 0 => tokio::time::sleep(gap).await,
                _ => {}
            }
            let mut samples = Vec::with_capacity(width * height);
            for y in 0..height {
                for x in 0..width {
                    samples.push(sample_value(component, index, x, y));
                }
            }
            let payload = write_pgx(16, width, height, &samples);
            tokio::fs::write(component_path(request.output, component), payload).await?;
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// =============================================================================
// Test Environment
// =============================================================================

/// Scratch directories for one test: sources under `data/`, cache under `cache/`.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Create a synthetic source at `data/<relative>`.
    pub fn source(&self, relative: &str, g: &TestGeometry) -> PathBuf {
        write_j2k(&self.dir.path().join("data").join(relative), g)
    }

    /// The default source `data/S2A_PRODUCT/B04.j2k`.
    pub fn default_source(&self) -> PathBuf {
        self.source("S2A_PRODUCT/B04.j2k", &TestGeometry::default())
    }

    pub fn factory(&self, decoder: Arc<MockDecoder>) -> Jp2ImageFactory {
        Jp2ImageFactory::new(self.cache_root(), decoder)
    }
}
