//! Out-of-process decoding through `opj_decompress`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::tile::component_path;

use super::{DecodeRequest, TileDecoder};

/// Program name looked up on `PATH` when no decompressor path is configured.
pub const DEFAULT_DECOMPRESSOR: &str = "opj_decompress";

/// Decoder that spawns one `opj_decompress` process per tile.
///
/// The process runs with the cache directory as its working directory and is
/// invoked as:
///
/// ```text
/// opj_decompress -i <source> -o <output> -r <resolution> -t <tile index>
/// ```
///
/// The output base handed to the process points into a private staging
/// directory next to the artifacts. Only after a zero exit are the component
/// files renamed into place, component 0 last; the staging directory is
/// removed whatever the outcome.
///
/// Without a timeout the call waits for the process to exit, however long
/// that takes. With a timeout the child is killed when it expires.
#[derive(Debug, Clone)]
pub struct ExeDecoder {
    program: PathBuf,
    timeout: Option<Duration>,
    name: String,
}

impl ExeDecoder {
    /// Create a decoder running the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        let program = program.as_ref().to_path_buf();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            program,
            timeout: None,
            name,
        }
    }

    /// Kill the decompressor if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Path of the decompressor program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, request: &DecodeRequest<'_>, staged: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(request.source)
            .arg("-o")
            .arg(staged)
            .arg("-r")
            .arg(request.resolution.to_string())
            .arg("-t")
            .arg(request.tile_index().to_string())
            .current_dir(request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: &DecodeRequest<'_>, staged: &Path) -> Result<(), DecodeError> {
        debug!(
            "Executing: {} -i {} -o {} -r {} -t {}",
            self.program.display(),
            request.source.display(),
            staged.display(),
            request.resolution,
            request.tile_index()
        );

        let output = self.command(request, staged).output();

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, output).await {
                Ok(result) => result,
                // Dropping the future kills the child (kill_on_drop).
                Err(_) => {
                    return Err(DecodeError::Timeout {
                        secs: timeout.as_secs(),
                    })
                }
            },
            None => output.await,
        }
        .map_err(|e| DecodeError::Spawn {
            program: self.program.display().to_string(),
            reason: e.to_string(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Failed to decompress tile {} at resolution {}: exit code {:?}",
                request.tile_index(),
                request.resolution,
                output.status.code()
            );
            if !stderr.trim().is_empty() {
                debug!("{} stderr: {}", self.name, stderr.trim());
            }
            Err(DecodeError::ExitStatus {
                code: output.status.code(),
            })
        }
    }
}

impl Default for ExeDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECOMPRESSOR)
    }
}

/// Staging directory and staged output base for a request.
///
/// The directory name carries the process id so that two processes sharing
/// a cache directory never write into each other's staging area.
fn staging_paths(request: &DecodeRequest<'_>) -> (PathBuf, PathBuf) {
    let stem = request
        .output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = request
        .working_dir
        .join(format!(".{}.{}.part", stem, std::process::id()));
    let staged = dir.join(request.output.file_name().unwrap_or_default());
    (dir, staged)
}

/// Move staged component files next to the output base, component 0 last.
async fn publish(request: &DecodeRequest<'_>, staged: &Path) -> Result<(), DecodeError> {
    for component in (0..request.layout.num_components).rev() {
        let from = component_path(staged, component);
        if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
            continue;
        }
        tokio::fs::rename(&from, component_path(request.output, component)).await?;
    }
    Ok(())
}

#[async_trait]
impl TileDecoder for ExeDecoder {
    async fn decode_tile(&self, request: &DecodeRequest<'_>) -> Result<(), DecodeError> {
        let (staging, staged) = staging_paths(request);
        tokio::fs::create_dir_all(&staging).await?;

        let result = match self.run(request, &staged).await {
            Ok(()) => publish(request, &staged).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            warn!("Can't remove staging directory {}: {}", staging.display(), e);
        }
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
