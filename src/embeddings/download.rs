// download.rs — Model file download with SHA256 verification.
//
// Downloads model files from the Hugging Face hub on first use and caches them
// at ~/.paraphrase_filter/models/<repo>/. Pinned files are verified against
// their SHA256; unpinned ones have their hash logged for later pinning.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

use crate::config;
use crate::logging::home_dir;

pub const MODEL_FILES: [&str; 3] = [
    config::model::WEIGHTS_FILE,
    config::model::TOKENIZER_FILE,
    config::model::CONFIG_FILE,
];

/// Cache directory for `repo` under `home` (`org/name` becomes `org--name`).
pub fn model_dir_in(home: &Path, repo: &str) -> PathBuf {
    home.join(config::model::MODEL_DIR_REL).join(repo.replace('/', "--"))
}

/// Returns the local cache directory for `repo`.
pub fn model_dir(repo: &str) -> anyhow::Result<PathBuf> {
    let home = home_dir().context("cannot determine home directory (neither HOME nor USERPROFILE is set)")?;
    Ok(model_dir_in(&home, repo))
}

/// Check if all required model files exist in `dir`.
pub fn model_files_exist(dir: &Path) -> bool {
    MODEL_FILES.iter().all(|f| dir.join(f).exists())
}

pub fn missing_model_files(dir: &Path) -> Vec<&'static str> {
    MODEL_FILES.iter().copied().filter(|f| !dir.join(f).exists()).collect()
}

pub fn file_url(repo: &str, file: &str) -> String {
    format!(
        "{}/{}/resolve/{}/{}",
        config::model::HUB_BASE,
        repo,
        config::model::HUB_REVISION,
        file
    )
}

pub fn pinned_sha256(repo: &str, file: &str) -> Option<&'static str> {
    config::model::PINNED_SHA256
        .iter()
        .find(|(r, f, _)| *r == repo && *f == file)
        .map(|(_, _, sha)| *sha)
}

/// Download all model files for `repo` if not already cached. Returns the model directory path.
pub fn ensure_model_files(repo: &str, offline: bool) -> anyhow::Result<PathBuf> {
    let dir = model_dir(repo)?;

    if model_files_exist(&dir) {
        log::info!("Model files already cached at {}", dir.display());
        return Ok(dir);
    }

    if offline {
        bail!(
            "model files missing in {} ({}) and downloads are disabled (--offline)",
            dir.display(),
            missing_model_files(&dir).join(", ")
        );
    }

    log::info!("Downloading {} to {}", repo, dir.display());
    fs::create_dir_all(&dir).with_context(|| format!("failed to create model dir {}", dir.display()))?;

    for file in missing_model_files(&dir) {
        download_and_verify(&file_url(repo, file), &dir.join(file), pinned_sha256(repo, file))?;
    }

    log::info!("Model download complete");
    Ok(dir)
}

/// Download a file from URL and verify its SHA256 hash when one is pinned.
fn download_and_verify(url: &str, dest: &Path, expected_sha256: Option<&str>) -> anyhow::Result<()> {
    let filename = dest.file_name().unwrap_or_default().to_string_lossy();
    log::info!("Downloading {} from {}", filename, url);

    let resp = ureq::get(url)
        .timeout(std::time::Duration::from_secs(config::model::DOWNLOAD_TIMEOUT_SECS))
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let status = resp.status();
    if status != 200 {
        bail!("HTTP {status} downloading {url}");
    }

    // Read body into memory (bert-base is ~440 MB, fits in RAM)
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .with_context(|| format!("failed to read response body for {url}"))?;

    let actual_hash = sha256_hex(&body);
    match expected_sha256 {
        Some(expected) if expected != actual_hash => {
            bail!("SHA256 mismatch for {}: expected {}, got {}", filename, expected, actual_hash);
        }
        Some(_) => log::info!("SHA256 verified for {} ({})", filename, &actual_hash[..12]),
        None => log::info!("SHA256 of unpinned {}: {}", filename, actual_hash),
    }

    // Write atomically: write to .tmp, then rename
    let tmp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(&body)?;
    file.flush()?;
    drop(file);

    fs::rename(&tmp_path, dest)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), dest.display()))?;

    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
