//! Evidence bundles: full-page screenshot, its SHA-256, and a timestamp proof.
//!
//! Files live under the shared directory as `images/<base>.png` and
//! `ots/<base>.ots`, where `<base>` is derived from the UTC capture time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::crawl::render::PageRenderer;
use crate::error::CrawlError;

/// Produces a tamper-evident timestamp proof for a file.
#[async_trait]
pub trait TimestampProver: Send + Sync {
    /// Stamp `file` and write the proof to `dest`.
    async fn stamp(&self, file: &Path, dest: &Path) -> Result<(), CrawlError>;
}

/// OpenTimestamps client (`ots stamp <file>` writes `<file>.ots`).
pub struct OtsProver {
    binary: String,
    timeout: Duration,
}

impl OtsProver {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TimestampProver for OtsProver {
    async fn stamp(&self, file: &Path, dest: &Path) -> Result<(), CrawlError> {
        let run = tokio::process::Command::new(&self.binary)
            .arg("stamp")
            .arg(file)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                CrawlError::Evidence(format!("ots stamp timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| CrawlError::Evidence(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CrawlError::Evidence(format!("ots stamp failed: {}", stderr.trim())));
        }

        let mut produced = file.as_os_str().to_owned();
        produced.push(".ots");
        tokio::fs::rename(&produced, dest).await?;
        Ok(())
    }
}

/// Paths and digest of a captured bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvidence {
    pub screenshot_path: PathBuf,
    /// Lowercase hex.
    pub screenshot_sha256: String,
    pub proof_path: PathBuf,
    pub captured_at: DateTime<Utc>,
}

/// Hex SHA-256 of a file's contents.
pub async fn sha256_file(path: &Path) -> Result<String, CrawlError> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// `screenshot_YYYYmmdd_HHMMSS_micros`
pub fn base_name(at: DateTime<Utc>) -> String {
    format!("screenshot_{}", at.format("%Y%m%d_%H%M%S_%6f"))
}

/// The shared evidence directory.
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn proofs_dir(&self) -> PathBuf {
        self.root.join("ots")
    }

    /// Screenshot `url`, hash the image, and timestamp it.
    pub async fn capture(
        &self,
        url: &str,
        renderer: &dyn PageRenderer,
        prover: &dyn TimestampProver,
    ) -> Result<CapturedEvidence, CrawlError> {
        tokio::fs::create_dir_all(self.images_dir()).await?;
        tokio::fs::create_dir_all(self.proofs_dir()).await?;

        let captured_at = Utc::now();
        let base = base_name(captured_at);
        let screenshot_path = self.images_dir().join(format!("{base}.png"));
        let proof_path = self.proofs_dir().join(format!("{base}.ots"));

        renderer.screenshot(url, &screenshot_path).await?;
        let screenshot_sha256 = sha256_file(&screenshot_path).await?;
        debug!(url, sha256 = %screenshot_sha256, "Screenshot captured");

        if let Err(e) = prover.stamp(&screenshot_path, &proof_path).await {
            // An unstamped screenshot is not evidence.
            if let Err(rm) = tokio::fs::remove_file(&screenshot_path).await {
                warn!(path = %screenshot_path.display(), error = %rm, "Failed to remove unstamped screenshot");
            }
            return Err(e);
        }
        info!(url, screenshot = %screenshot_path.display(), proof = %proof_path.display(), "Evidence captured");

        Ok(CapturedEvidence {
            screenshot_path,
            screenshot_sha256,
            proof_path,
            captured_at,
        })
    }
}
