//! Server configuration from environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub uploads_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub max_upload_bytes: usize,
    // Sweeper schedule
    pub sweep_interval_secs: u64,
    pub job_max_age_secs: u64,
    pub upload_max_age_secs: u64,
    pub export_max_age_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL required")?,
            uploads_dir: std::env::var("UPLOADS_DIR")
                .unwrap_or_else(|_| "./uploads".to_string())
                .into(),
            exports_dir: std::env::var("EXPORTS_DIR")
                .unwrap_or_else(|_| "./exports".to_string())
                .into(),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (100 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid MAX_UPLOAD_BYTES")?,
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("Invalid SWEEP_INTERVAL_SECS")?,
            job_max_age_secs: std::env::var("JOB_MAX_AGE_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid JOB_MAX_AGE_SECS")?,
            upload_max_age_secs: std::env::var("UPLOAD_MAX_AGE_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .context("Invalid UPLOAD_MAX_AGE_SECS")?,
            export_max_age_secs: std::env::var("EXPORT_MAX_AGE_SECS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()
                .context("Invalid EXPORT_MAX_AGE_SECS")?,
        })
    }
}
