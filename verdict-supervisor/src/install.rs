//! Engine binary download and cache management
//!
//! Release assets are fetched over HTTPS and verified against the release's
//! sha256 manifest before anything lands in the cache directory. Installs
//! are atomic: bytes go to a temp file in the target directory first, then
//! rename into place, so a concurrent reader never sees a half-written
//! binary. The version marker is written the same way, and only after the
//! binary itself.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;

use verdict_core::config::EngineConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::{ENGINE_BINARY_NAME, ENGINE_VERSION};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const VERSION_MARKER: &str = ".engine-version";

/// (os, arch) pairs with a published release asset, mapped to the asset
/// naming scheme.
const PLATFORMS: &[(&str, &str, &str)] = &[
    ("linux", "x86_64", "linux-amd64"),
    ("linux", "aarch64", "linux-arm64"),
    ("macos", "x86_64", "darwin-amd64"),
    ("macos", "aarch64", "darwin-arm64"),
    ("windows", "x86_64", "windows-amd64"),
    ("windows", "aarch64", "windows-arm64"),
];

/// Engine binary filename for the current OS.
pub fn binary_filename() -> String {
    if cfg!(windows) {
        format!("{}.exe", ENGINE_BINARY_NAME)
    } else {
        ENGINE_BINARY_NAME.to_string()
    }
}

/// Map the current OS/architecture to the release asset naming convention.
pub fn platform_key() -> Result<&'static str> {
    let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
    PLATFORMS
        .iter()
        .find(|(p_os, p_arch, _)| *p_os == os && *p_arch == arch)
        .map(|(_, _, key)| *key)
        .ok_or_else(|| {
            let mut supported: Vec<&str> = PLATFORMS.iter().map(|(_, _, key)| *key).collect();
            supported.sort_unstable();
            VerdictError::PlatformUnsupported {
                platform: format!("{}-{}", os, arch),
                supported: supported.join(", "),
            }
        })
}

/// Release asset name for the current platform.
pub fn asset_name() -> Result<String> {
    let mut name = format!("{}-{}", ENGINE_BINARY_NAME, platform_key()?);
    if cfg!(windows) {
        name.push_str(".exe");
    }
    Ok(name)
}

/// Per-user binary cache directory, created if absent.
pub fn bin_dir(config: &EngineConfig) -> Result<PathBuf> {
    let dir = match &config.cache_dir {
        Some(dir) => dir.clone(),
        None => dirs::home_dir()
            .ok_or_else(|| {
                VerdictError::Configuration(
                    "cannot determine home directory; set VERDICT_CACHE_DIR".to_string(),
                )
            })?
            .join(".verdict")
            .join("bin"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Cached binary path, if present and its version marker matches
/// [`ENGINE_VERSION`] exactly.
pub fn cached_engine_path(config: &EngineConfig) -> Option<PathBuf> {
    let dir = bin_dir(config).ok()?;
    let bin_path = dir.join(binary_filename());
    if !bin_path.is_file() {
        return None;
    }
    let cached_version = std::fs::read_to_string(dir.join(VERSION_MARKER)).ok()?;
    if cached_version.trim() != ENGINE_VERSION {
        return None;
    }
    Some(bin_path)
}

/// Parse a checksums manifest of `<hex-digest>  <filename>` lines into a
/// filename -> digest map.
pub(crate) fn parse_checksums(text: &str) -> HashMap<String, String> {
    let mut checksums = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((digest, filename)) = line.split_once(char::is_whitespace) {
            checksums.insert(filename.trim().to_string(), digest.to_string());
        }
    }
    checksums
}

/// Download the engine binary for the current platform, verify it against
/// the release checksum manifest, and install it atomically into the cache.
pub async fn download_engine(config: &EngineConfig) -> Result<PathBuf> {
    let plat = platform_key()?;
    let asset = asset_name()?;
    let base = config.release_base_url.trim_end_matches('/');
    let checksums_url = format!("{}/v{}/checksums-sha256.txt", base, ENGINE_VERSION);
    let binary_url = format!("{}/v{}/{}", base, ENGINE_VERSION, asset);

    info!(
        "downloading engine v{} for {} from {}",
        ENGINE_VERSION, plat, binary_url
    );

    let http = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(concat!("verdict-sdk/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| VerdictError::Download(format!("failed to build HTTP client: {}", e)))?;

    // Checksums manifest first; without it the binary is unverifiable.
    let checksums_text = fetch(&http, &checksums_url)
        .await
        .map_err(|e| {
            VerdictError::Download(format!(
                "failed to download checksums from {}: {}. Verify that release v{} exists.",
                checksums_url, e, ENGINE_VERSION
            ))
        })
        .and_then(|bytes| {
            String::from_utf8(bytes).map_err(|e| {
                VerdictError::Download(format!("checksums manifest is not UTF-8: {}", e))
            })
        })?;

    let checksums = parse_checksums(&checksums_text);
    let expected = checksums.get(&asset).ok_or_else(|| {
        let mut available: Vec<&str> = checksums.keys().map(String::as_str).collect();
        available.sort_unstable();
        VerdictError::Download(format!(
            "no checksum found for '{}' in checksums-sha256.txt; available assets: {}",
            asset,
            available.join(", ")
        ))
    })?;

    let binary_data = fetch(&http, &binary_url).await.map_err(|e| {
        VerdictError::Download(format!("failed to download engine from {}: {}", binary_url, e))
    })?;

    let actual = hex::encode(Sha256::digest(&binary_data));
    if actual != *expected {
        return Err(VerdictError::ChecksumMismatch {
            asset,
            expected: expected.clone(),
            actual,
        });
    }

    let dir = bin_dir(config)?;
    let target = dir.join(binary_filename());

    // Temp file in the target directory keeps the rename on one filesystem;
    // the NamedTempFile guard removes it on every early-return path.
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&binary_data)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o755))?;
    }
    tmp.persist(&target).map_err(|e| VerdictError::Io(e.error))?;

    // Marker goes second: a binary without a marker re-downloads, a marker
    // without a binary would wrongly validate the cache.
    let mut marker = NamedTempFile::new_in(&dir)?;
    marker.write_all(ENGINE_VERSION.as_bytes())?;
    marker.flush()?;
    marker
        .persist(dir.join(VERSION_MARKER))
        .map_err(|e| VerdictError::Io(e.error))?;

    info!("engine v{} installed to {}", ENGINE_VERSION, target.display());
    Ok(target)
}

async fn fetch(http: &reqwest::Client, url: &str) -> std::result::Result<Vec<u8>, String> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}
