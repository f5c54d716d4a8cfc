use hf_hub::{
    api::sync::{ApiBuilder, ApiError},
    Cache, Repo, RepoType,
};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to fetch from HF hub: {0}")]
    HfHub(#[from] ApiError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fetch a single file from a model repo, returning its local path.
///
/// The local hub cache is consulted first; a cache hit returns immediately
/// without constructing an API client, so no network access happens. The
/// cache lives under `cache_dir` when given, otherwise the hub default.
pub fn download_model_file_sync(
    repo_id: &str,
    filename: &str,
    cache_dir: Option<PathBuf>,
    token: Option<String>,
    progress_bar: bool,
) -> Result<PathBuf, FetchError> {
    let cache = match cache_dir {
        Some(dir) => Cache::new(dir),
        None => Cache::default(),
    };
    if let Some(path) = cache.repo(Repo::model(repo_id.to_string())).get(filename) {
        debug!(filename, "Found file in local cache, skipping hub fetch");
        return Ok(path);
    }
    let api = ApiBuilder::new()
        .with_cache_dir(cache.path().clone())
        .with_token(token.or(cache.token()))
        .with_progress(progress_bar)
        .build()?
        .repo(Repo::model(repo_id.to_string()));
    let start_time = Instant::now();
    debug!(filename, "Starting file download from hub");
    let path = api.get(filename)?;
    let duration_secs = start_time.elapsed().as_secs_f32();
    tracing::info!(
        filename,
        duration_secs = duration_secs,
        "Finished downloading file from hub"
    );
    Ok(path)
}

/// Fetch a fixed batch of files from a dataset repo into `target_dir`.
///
/// A file already present at its literal target path is accepted as-is with
/// no integrity check. The API client is only built when at least one file is
/// missing, and the first failed fetch aborts the whole batch. Returned paths
/// are in input order.
pub fn download_dataset_files_sync(
    repo_id: &str,
    files: &[&str],
    target_dir: &Path,
    token: Option<String>,
    progress_bar: bool,
) -> Result<Vec<PathBuf>, FetchError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(target_dir).map_err(|source| FetchError::Io {
        path: target_dir.to_path_buf(),
        source,
    })?;

    let missing: Vec<&str> = files
        .iter()
        .copied()
        .filter(|name| !target_dir.join(name).exists())
        .collect();

    if !missing.is_empty() {
        let api = ApiBuilder::new()
            .with_token(token.or_else(|| Cache::default().token()))
            .with_progress(progress_bar)
            .build()?
            .repo(Repo::new(repo_id.to_string(), RepoType::Dataset));
        for name in missing {
            let start_time = Instant::now();
            debug!(filename = name, "Starting file download from hub");
            let cached = api.get(name)?;
            place_file(&cached, &target_dir.join(name))?;
            let duration_secs = start_time.elapsed().as_secs_f32();
            tracing::info!(
                filename = name,
                duration_secs = duration_secs,
                "Finished downloading file from hub"
            );
        }
    } else {
        debug!(
            target_dir = %target_dir.display(),
            "All dataset files already present, skipping hub fetch"
        );
    }

    Ok(files.iter().map(|name| target_dir.join(name)).collect())
}

/// Hard-link the cached blob into place, falling back to a copy when the
/// cache and target live on different filesystems.
fn place_file(cached: &Path, target: &Path) -> Result<(), FetchError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FetchError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    if std::fs::hard_link(cached, target).is_err() {
        std::fs::copy(cached, target).map_err(|source| FetchError::Io {
            path: target.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}
