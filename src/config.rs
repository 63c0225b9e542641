//! Runtime configuration, loaded once at startup from the environment.
//!
//! Follows the teacher's `Config`/`ForgeConfig` layering: typed fields with
//! explicit defaults, a fallible constructor that never panics on a missing
//! optional variable, and validation performed once here rather than
//! scattered through handlers.

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub blob_root: PathBuf,
    pub queue_capacity: usize,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub gcs_enabled: bool,
    pub gcs_signing_account: Option<String>,
    pub media_processor_path: String,
    pub font_path: String,
    pub progress_ttl_secs: i64,
}

impl AppConfig {
    /// Load configuration from the environment, falling back to a `.env`
    /// file in the working directory if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url = env_or("DATABASE_URL", ".riskpipe/riskpipe.db");
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:8080");
        let blob_root = PathBuf::from(env_or("BLOB_ROOT", ".riskpipe/blobs"));
        let queue_capacity = env_or("QUEUE_CAPACITY", "256")
            .parse::<usize>()
            .context("QUEUE_CAPACITY must be a positive integer")?;
        let max_upload_mb = env_or("MAX_UPLOAD_MB", "500")
            .parse::<u64>()
            .context("MAX_UPLOAD_MB must be a positive integer")?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| anyhow!("MAX_UPLOAD_MB overflowed"))?;
        let allowed_extensions: Vec<String> = env_or("ALLOWED_EXTENSIONS", "mp4")
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if allowed_extensions.is_empty() {
            return Err(anyhow!("ALLOWED_EXTENSIONS must list at least one extension"));
        }
        let gcs_enabled = env_or("GCS_ENABLED", "false") == "true";
        let gcs_signing_account = std::env::var("GCS_SIGNING_SERVICE_ACCOUNT").ok();
        let media_processor_path = env_or("MEDIA_PROCESSOR_PATH", "ffmpeg");
        let font_path = env_or("FONT_PATH", "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf");
        let progress_ttl_secs = env_or("PROGRESS_TTL_SECS", "86400")
            .parse::<i64>()
            .context("PROGRESS_TTL_SECS must be an integer")?;

        Ok(Self {
            database_url,
            bind_addr,
            blob_root,
            queue_capacity,
            max_upload_bytes,
            allowed_extensions,
            gcs_enabled,
            gcs_signing_account,
            media_processor_path,
            font_path,
            progress_ttl_secs,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = PathBuf::from(&self.database_url).parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        std::fs::create_dir_all(&self.blob_root).context("failed to create blob root")?;
        Ok(())
    }

    pub fn is_extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == &ext.to_lowercase())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        // SAFETY: test-only; no other test in this module touches these vars concurrently.
        for key in ["DATABASE_URL", "MAX_UPLOAD_MB", "ALLOWED_EXTENSIONS"] {
            unsafe { std::env::remove_var(key) };
        }
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.database_url, ".riskpipe/riskpipe.db");
        assert_eq!(config.max_upload_bytes, 500 * 1024 * 1024);
        assert!(config.is_extension_allowed("mp4"));
        assert!(!config.is_extension_allowed("avi"));
    }

    #[test]
    fn rejects_empty_allowed_extensions() {
        unsafe { std::env::set_var("ALLOWED_EXTENSIONS", "") };
        let result = AppConfig::from_env();
        unsafe { std::env::remove_var("ALLOWED_EXTENSIONS") };
        assert!(result.is_err());
    }
}
