//! jp2-tiles - inspect, read and pre-decode tiles of JPEG 2000 rasters.

use clap::Parser;
use image::{ImageBuffer, ImageFormat, Luma};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jp2_tile_cache::{
    config::{Cli, Command, InfoArgs, TileArgs, WarmArgs},
    raster::{Jp2Image, Jp2ImageFactory, TileOutcome},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.cache.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let factory = Jp2ImageFactory::from_config(&cli.cache);
    info!(
        "Cache root {}, decoder {}",
        factory.cache_root().display(),
        factory.decoder().name()
    );

    match cli.command {
        Command::Info(args) => run_info(&factory, args).await,
        Command::Tile(args) => run_tile(&factory, args).await,
        Command::Warm(args) => run_warm(&factory, args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "jp2_tile_cache=debug,jp2_tiles=debug"
    } else {
        "jp2_tile_cache=info,jp2_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(factory: &Jp2ImageFactory, args: InfoArgs) -> ExitCode {
    let layout = match factory.layout(&args.file).await {
        Ok(layout) => layout,
        Err(e) => {
            error!("Can't read {}: {}", args.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let levels: Vec<_> = (0..layout.num_resolutions)
        .map(|r| {
            let (width, height) = layout.level_dim(r);
            let (tile_width, tile_height) = layout.tile_dim(r);
            let (display_width, display_height) = layout.display_tile_dim(r);
            serde_json::json!({
                "resolution": r,
                "width": width,
                "height": height,
                "tile_width": tile_width,
                "tile_height": tile_height,
                "display_tile_width": display_width,
                "display_tile_height": display_height,
            })
        })
        .collect();

    let json = serde_json::json!({
        "file": args.file,
        "layout": layout,
        "tile_count": layout.tile_count(),
        "levels": levels,
    });

    match serde_json::to_string_pretty(&json) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Can't serialize layout: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(factory: &Jp2ImageFactory, args: TileArgs) -> ExitCode {
    let image = match factory.open(&args.file, args.resolution).await {
        Ok(image) => image,
        Err(e) => {
            error!("Can't open {}: {}", args.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let (width, height) = image.tile_dim();
    let mut samples = vec![0u16; image.tile_len()];
    let outcome = match image
        .read_tile(args.component, args.tile_x, args.tile_y, &mut samples)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Can't read tile: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let min = samples.iter().copied().min().unwrap_or(0);
    let max = samples.iter().copied().max().unwrap_or(0);
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len().max(1) as f64;

    println!(
        "tile ({},{}) component {} at resolution {}: {}x{} {:?}",
        args.tile_x, args.tile_y, args.component, args.resolution, width, height, outcome
    );
    println!("  min {}  max {}  mean {:.2}", min, max, mean);

    if let Some(ref output) = args.output {
        let buffer = match ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(
            width, height, samples,
        ) {
            Some(buffer) => buffer,
            None => {
                error!("Tile buffer does not match {}x{}", width, height);
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = buffer.save_with_format(output, ImageFormat::Png) {
            error!("Can't write {}: {}", output.display(), e);
            return ExitCode::FAILURE;
        }
        info!("Wrote {}", output.display());
    }

    image.dispose();

    if outcome == TileOutcome::Blank {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Warm Command
// =============================================================================

async fn run_warm(factory: &Jp2ImageFactory, args: WarmArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let image: Arc<Jp2Image> = match factory.open(&args.file, args.resolution).await {
        Ok(image) => Arc::new(image),
        Err(e) => {
            error!("Can't open {}: {}", args.file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let layout = *image.layout();
    info!(
        "Warming {} tiles of {} at resolution {} with {} jobs",
        layout.tile_count(),
        args.file.display(),
        args.resolution,
        args.jobs
    );

    let permits = Arc::new(tokio::sync::Semaphore::new(args.jobs));
    let mut tasks = tokio::task::JoinSet::new();

    for tile_y in 0..layout.num_y_tiles {
        for tile_x in 0..layout.num_x_tiles {
            let image = image.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                let mut samples = vec![0u16; image.tile_len()];
                image.read_tile(0, tile_x, tile_y, &mut samples).await.ok()
            });
        }
    }

    let (mut cached, mut decoded, mut blank) = (0usize, 0usize, 0usize);
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Some(TileOutcome::Cached)) => cached += 1,
            Ok(Some(TileOutcome::Decoded)) => decoded += 1,
            Ok(Some(TileOutcome::Blank)) | Ok(None) => blank += 1,
            Err(e) => {
                error!("Warm task failed: {}", e);
                blank += 1;
            }
        }
    }

    println!(
        "{} decoded, {} already cached, {} blank",
        decoded, cached, blank
    );

    image.dispose();

    if blank == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
