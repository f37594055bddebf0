//! Tests for opening images and reading tiles through the accessor.

use std::sync::Arc;

use jp2_tile_cache::error::TileError;
use jp2_tile_cache::format::write_pgx;
use jp2_tile_cache::raster::TileOutcome;

use super::test_utils::{expected_tile, MockDecoder, MockMode, TestEnv, TestGeometry};

// =============================================================================
// Open
// =============================================================================

#[tokio::test]
async fn test_open_resolves_layout() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    let image = factory.open(&source, 1).await.unwrap();
    let layout = image.layout();

    assert_eq!(layout.num_resolutions, 3);
    assert_eq!(layout.num_components, 2);
    assert_eq!((layout.width, layout.height), (20, 20));
    assert_eq!((layout.num_x_tiles, layout.num_y_tiles), (3, 3));
    assert_eq!(image.resolution(), 1);
    assert_eq!(image.tile_dim(), (4, 4));
    assert_eq!(image.tile_len(), 16);
    assert_eq!(image.path(), source.canonicalize().unwrap());
    assert!(image.cache_dir().starts_with(env.cache_root()));
}

#[tokio::test]
async fn test_open_missing_file() {
    let env = TestEnv::new();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    let result = factory.open(env.dir.path().join("data/none.j2k"), 0).await;
    assert!(matches!(result, Err(TileError::NotFound { .. })));

    // A directory is not an image either
    let result = factory.open(env.dir.path(), 0).await;
    assert!(matches!(result, Err(TileError::NotFound { .. })));
}

#[tokio::test]
async fn test_open_invalid_resolution() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    let result = factory.open(&source, 3).await;
    assert!(matches!(
        result,
        Err(TileError::InvalidResolution {
            resolution: 3,
            num_resolutions: 3
        })
    ));
}

#[tokio::test]
async fn test_open_not_jpeg2000() {
    let env = TestEnv::new();
    let source = env.dir.path().join("data/PKG/notes.j2k");
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, b"this is not a codestream").unwrap();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    let result = factory.open(&source, 0).await;
    assert!(matches!(result, Err(TileError::Format(_))));
}

#[tokio::test]
async fn test_open_unusable_cache_root() {
    let env = TestEnv::new();
    let source = env.default_source();
    let root = env.dir.path().join("not-a-dir");
    std::fs::write(&root, b"").unwrap();

    let factory = jp2_tile_cache::raster::Jp2ImageFactory::new(
        root,
        Arc::new(MockDecoder::new(MockMode::Succeed)),
    );
    let result = factory.open(&source, 0).await;
    assert!(matches!(result, Err(TileError::Config { .. })));
}

#[tokio::test]
async fn test_sibling_bands_share_cache_dir() {
    let env = TestEnv::new();
    let g = TestGeometry::default();
    let b04 = env.source("S2A_PRODUCT/B04.j2k", &g);
    let b08 = env.source("S2A_PRODUCT/B08.j2k", &g);
    let other = env.source("elsewhere/S2A_PRODUCT/B04.j2k", &g);
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    let a = factory.open(&b04, 0).await.unwrap();
    let b = factory.open(&b08, 0).await.unwrap();
    let c = factory.open(&other, 0).await.unwrap();

    assert_eq!(a.cache_dir(), b.cache_dir());
    assert_ne!(a.cache_dir(), c.cache_dir());
    assert!(a
        .cache_dir()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("S2A_PRODUCT-"));
}

// =============================================================================
// Read Tile
// =============================================================================

#[tokio::test]
async fn test_miss_then_hit() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    let mut first = vec![0u16; image.tile_len()];
    let outcome = image.read_tile(0, 1, 1, &mut first).await.unwrap();
    assert_eq!(outcome, TileOutcome::Decoded);
    assert_eq!(first, expected_tile(image.layout(), 0, 0, 1, 1));

    let mut second = vec![0u16; image.tile_len()];
    let outcome = image.read_tile(0, 1, 1, &mut second).await.unwrap();
    assert_eq!(outcome, TileOutcome::Cached);
    assert_eq!(first, second);
    assert_eq!(decoder.call_count(), 1);

    assert!(image.cache_dir().join("B04_R0_TX1_TY1_0.pgx").exists());
    assert!(image.cache_dir().join("B04_R0_TX1_TY1_1.pgx").exists());
}

#[tokio::test]
async fn test_artifacts_reused_across_handles() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());

    let first = factory.open(&source, 1).await.unwrap();
    let mut tile = vec![0u16; first.tile_len()];
    first.read_tile(0, 0, 0, &mut tile).await.unwrap();
    first.dispose();

    let second = factory.open(&source, 1).await.unwrap();
    let outcome = second.read_tile(0, 0, 0, &mut tile).await.unwrap();
    assert_eq!(outcome, TileOutcome::Cached);
    assert_eq!(tile, expected_tile(second.layout(), 1, 0, 0, 0));
    assert_eq!(decoder.call_count(), 1);
}

#[tokio::test]
async fn test_second_component() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    let mut band0 = vec![0u16; image.tile_len()];
    let mut band1 = vec![0u16; image.tile_len()];
    image.read_tile(0, 2, 0, &mut band0).await.unwrap();
    let outcome = image.read_tile(1, 2, 0, &mut band1).await.unwrap();

    assert_eq!(outcome, TileOutcome::Cached);
    assert_eq!(band1, expected_tile(image.layout(), 0, 1, 2, 0));
    assert_ne!(band0, band1);
    assert_eq!(decoder.call_count(), 1);
}

#[tokio::test]
async fn test_edge_tile_is_padded() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));

    for resolution in 0..3 {
        let image = factory.open(&source, resolution).await.unwrap();
        let (tile_width, tile_height) = image.tile_dim();
        let mut tile = vec![u16::MAX; image.tile_len()];
        image.read_tile(0, 2, 2, &mut tile).await.unwrap();

        let expected = expected_tile(image.layout(), resolution, 0, 2, 2);
        assert_eq!(tile, expected);

        // Right column and bottom row of an edge tile are padding
        let last = (tile_width * tile_height - 1) as usize;
        assert_eq!(tile[last], 0);
        assert_ne!(tile[0], 0);
    }
}

#[tokio::test]
async fn test_tile_index_is_same_at_every_level() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());

    for resolution in 0..3 {
        let image = factory.open(&source, resolution).await.unwrap();
        let mut tile = vec![0u16; image.tile_len()];
        image.read_tile(0, 2, 1, &mut tile).await.unwrap();
    }

    assert_eq!(decoder.requests(), vec![(0, 5), (1, 5), (2, 5)]);
}

#[tokio::test]
async fn test_decode_failure_is_blank_then_retried() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Fail));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    let mut tile = vec![7u16; image.tile_len()];
    let outcome = image.read_tile(0, 0, 0, &mut tile).await.unwrap();
    assert_eq!(outcome, TileOutcome::Blank);
    assert!(tile.iter().all(|&s| s == 0));

    decoder.set_mode(MockMode::Succeed);
    let outcome = image.read_tile(0, 0, 0, &mut tile).await.unwrap();
    assert_eq!(outcome, TileOutcome::Decoded);
    assert_eq!(tile, expected_tile(image.layout(), 0, 0, 0, 0));
    assert_eq!(decoder.call_count(), 2);
}

#[tokio::test]
async fn test_decode_without_output_is_blank() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::NoOutput));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    let mut tile = vec![7u16; image.tile_len()];
    let outcome = image.read_tile(0, 1, 0, &mut tile).await.unwrap();
    assert_eq!(outcome, TileOutcome::Blank);
    assert!(tile.iter().all(|&s| s == 0));
    assert_eq!(decoder.call_count(), 1);
}

#[tokio::test]
async fn test_out_of_grid_is_blank() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    let mut tile = vec![7u16; image.tile_len()];
    assert_eq!(
        image.read_tile(0, 3, 0, &mut tile).await.unwrap(),
        TileOutcome::Blank
    );
    assert_eq!(
        image.read_tile(0, 0, 3, &mut tile).await.unwrap(),
        TileOutcome::Blank
    );
    assert_eq!(
        image.read_tile(2, 0, 0, &mut tile).await.unwrap(),
        TileOutcome::Blank
    );
    assert!(tile.iter().all(|&s| s == 0));
    assert_eq!(decoder.call_count(), 0);
}

#[tokio::test]
async fn test_corrupt_artifact_is_blank() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let factory = env.factory(decoder.clone());
    let image = factory.open(&source, 0).await.unwrap();

    // Declares more samples than an 8x8 tile can hold
    let oversized = write_pgx(16, 9, 1, &[1; 9]);
    std::fs::write(image.cache_dir().join("B04_R0_TX0_TY0_0.pgx"), oversized).unwrap();
    std::fs::write(image.cache_dir().join("B04_R0_TX1_TY0_0.pgx"), b"garbage").unwrap();

    let mut tile = vec![7u16; image.tile_len()];
    assert_eq!(
        image.read_tile(0, 0, 0, &mut tile).await.unwrap(),
        TileOutcome::Blank
    );
    assert!(tile.iter().all(|&s| s == 0));

    tile.fill(7);
    assert_eq!(
        image.read_tile(0, 1, 0, &mut tile).await.unwrap(),
        TileOutcome::Blank
    );
    assert!(tile.iter().all(|&s| s == 0));
    assert_eq!(decoder.call_count(), 0);
}

#[tokio::test]
#[should_panic(expected = "tile buffer holds")]
async fn test_buffer_size_mismatch_panics() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));
    let image = factory.open(&source, 0).await.unwrap();

    let mut tile = vec![0u16; image.tile_len() - 1];
    let _ = image.read_tile(0, 0, 0, &mut tile).await;
}

// =============================================================================
// Dispose
// =============================================================================

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env.factory(Arc::new(MockDecoder::new(MockMode::Succeed)));
    let image = factory.open(&source, 0).await.unwrap();

    let mut tile = vec![0u16; image.tile_len()];
    image.read_tile(0, 0, 0, &mut tile).await.unwrap();

    image.dispose();
    image.dispose();
    assert!(image.is_disposed());

    let result = image.read_tile(0, 0, 0, &mut tile).await;
    assert!(matches!(result, Err(TileError::Disposed)));

    // Artifacts stay without purge
    assert!(image.cache_dir().join("B04_R0_TX0_TY0_0.pgx").exists());
}

#[tokio::test]
async fn test_purge_deletes_only_generated_artifacts() {
    let env = TestEnv::new();
    let source = env.default_source();
    let decoder = Arc::new(MockDecoder::new(MockMode::Succeed));
    let keeper = env.factory(decoder.clone());
    let purger = env.factory(decoder.clone()).with_purge_on_dispose(true);

    let kept = keeper.open(&source, 0).await.unwrap();
    let purged = purger.open(&source, 0).await.unwrap();
    let dir = kept.cache_dir().to_path_buf();
    let mut tile = vec![0u16; kept.tile_len()];

    // Decoded by the keeping handle, only read by the purging one
    kept.read_tile(0, 0, 0, &mut tile).await.unwrap();
    assert_eq!(
        purged.read_tile(0, 0, 0, &mut tile).await.unwrap(),
        TileOutcome::Cached
    );

    // Decoded by the purging handle
    assert_eq!(
        purged.read_tile(0, 1, 0, &mut tile).await.unwrap(),
        TileOutcome::Decoded
    );

    purged.dispose();

    assert!(dir.join("B04_R0_TX0_TY0_0.pgx").exists());
    assert!(dir.join("B04_R0_TX0_TY0_1.pgx").exists());
    assert!(!dir.join("B04_R0_TX1_TY0_0.pgx").exists());
    assert!(!dir.join("B04_R0_TX1_TY0_1.pgx").exists());

    // The keeping handle decodes the purged tile again
    assert_eq!(
        kept.read_tile(0, 1, 0, &mut tile).await.unwrap(),
        TileOutcome::Decoded
    );
    assert_eq!(decoder.call_count(), 3);
}

#[tokio::test]
async fn test_drop_disposes() {
    let env = TestEnv::new();
    let source = env.default_source();
    let factory = env
        .factory(Arc::new(MockDecoder::new(MockMode::Succeed)))
        .with_purge_on_dispose(true);

    let dir = {
        let image = factory.open(&source, 0).await.unwrap();
        let mut tile = vec![0u16; image.tile_len()];
        image.read_tile(0, 0, 0, &mut tile).await.unwrap();
        assert!(image.cache_dir().join("B04_R0_TX0_TY0_0.pgx").exists());
        image.cache_dir().to_path_buf()
    };

    assert!(!dir.join("B04_R0_TX0_TY0_0.pgx").exists());
}
