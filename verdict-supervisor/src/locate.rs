//! Engine binary discovery
//!
//! Ordered chain: explicit config path, PATH lookup, per-user cache,
//! development build directories, then auto-download. An explicit path that
//! does not exist fails fast rather than silently falling through, since it
//! expresses clear operator intent.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use verdict_core::config::EngineConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::ENGINE_BINARY_NAME;

use crate::install;

/// Locate the engine binary, downloading it as a last resort.
pub async fn locate_engine(config: &EngineConfig) -> Result<PathBuf> {
    // 1. Explicit path from config or VERDICT_ENGINE_PATH.
    if let Some(path) = &config.path {
        if path.is_file() {
            debug!("using configured engine path {}", path.display());
            return Ok(path.clone());
        }
        return Err(VerdictError::BinaryNotFound(format!(
            "configured engine path {} does not exist or is not a file",
            path.display()
        )));
    }

    // 2. PATH lookup.
    if let Ok(path) = which::which(ENGINE_BINARY_NAME) {
        debug!("found engine on PATH at {}", path.display());
        return Ok(path);
    }

    // 3. Per-user cache with a matching version marker.
    if let Some(path) = install::cached_engine_path(config) {
        debug!("found cached engine at {}", path.display());
        return Ok(path);
    }

    // 4. Development build locations relative to the working directory.
    for dir in ["bin", "target/release"] {
        let candidate = Path::new(dir).join(install::binary_filename());
        if is_executable(&candidate) {
            debug!("found development engine at {}", candidate.display());
            return Ok(candidate);
        }
    }

    // 5. Auto-download, unless disabled.
    if !config.no_download {
        info!("engine binary not found locally, attempting download");
        return install::download_engine(config).await;
    }

    Err(VerdictError::BinaryNotFound(format!(
        "could not find '{}' and auto-download is disabled. Options: \
         set VERDICT_ENGINE_PATH to the binary, put it on PATH, \
         or unset VERDICT_ENGINE_NO_DOWNLOAD to allow download",
        ENGINE_BINARY_NAME
    )))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
