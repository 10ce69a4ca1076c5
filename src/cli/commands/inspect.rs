//! Inspection commands - hash-file, dump-manifest and extract-result

use crate::atomic::write_atomic;
use crate::compression::decompress;
use crate::config::Config;
use crate::error::{StashError, StashResult};
use crate::hash::{hash_file as digest_file, HashAlgorithm, HashState};
use crate::manifest::Manifest;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Execute the hash-file command
pub async fn hash_file(
    path: String,
    algorithm: Option<HashAlgorithm>,
    config: &Config,
) -> StashResult<()> {
    let algorithm = algorithm.unwrap_or(config.cache.hash_algorithm);
    let digest = tokio::task::spawn_blocking(move || {
        if path == "-" {
            let mut state = HashState::new(algorithm);
            state
                .absorb_reader(std::io::stdin().lock())
                .map_err(|e| StashError::io("reading stdin", e))?;
            Ok(state.finalize())
        } else {
            digest_file(algorithm, Path::new(&path))
        }
    })
    .await
    .map_err(|e| StashError::Internal(format!("hash task failed: {e}")))??;
    println!("{digest}");
    Ok(())
}

/// Execute the dump-manifest command
pub async fn dump_manifest(path: PathBuf) -> StashResult<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| StashError::io(format!("reading {}", path.display()), e))?;
    let manifest = Manifest::from_bytes(&bytes)?;
    print!("{}", manifest.dump());
    Ok(())
}

/// Execute the extract-result command
///
/// Writes the decoded compiler output to `output`, or to stdout.
pub async fn extract_result(path: PathBuf, output: Option<PathBuf>) -> StashResult<()> {
    let encoded = tokio::fs::read(&path)
        .await
        .map_err(|e| StashError::io(format!("reading {}", path.display()), e))?;
    let data = decompress(&encoded)?;
    match output {
        Some(out) => {
            tokio::task::spawn_blocking(move || write_atomic(&out, &data))
                .await
                .map_err(|e| StashError::Internal(format!("write task failed: {e}")))??;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&data)
                .and_then(|()| stdout.flush())
                .map_err(|e| StashError::io("writing stdout", e))?;
        }
    }
    Ok(())
}
