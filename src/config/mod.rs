//! Application configuration management

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Artifacts strictly larger than this are promoted to the object store.
pub const DEFAULT_PROMOTE_THRESHOLD_BYTES: u64 = 512 * 1024 * 1024;

const DEFAULT_GCS_BASE: &str = "https://storage.googleapis.com";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: IpAddr,

    /// Server port
    pub port: u16,

    /// Shared temporary area for job artifacts
    pub temp_dir: PathBuf,

    /// Media-fetch tool settings
    pub fetch: FetchToolConfig,

    /// Size above which artifacts are promoted instead of kept locally
    pub promote_threshold_bytes: u64,

    /// Object store target; `None` means promotion is not configured
    pub object_store: Option<ObjectStoreConfig>,

    /// Timeout for the completion callback
    pub callback_timeout: Duration,

    /// Maximum number of jobs running at once
    pub max_concurrent_jobs: usize,

    /// How long locally placed artifacts survive before the retention sweep removes them
    pub local_retention: Duration,

    /// Cron expression for the retention sweep
    pub retention_sweep_cron: String,

    /// Emit human-readable logs instead of JSON
    pub pretty_logs: bool,
}

/// How the external media-fetch tool is invoked
#[derive(Debug, Clone)]
pub struct FetchToolConfig {
    /// Path to the executable (e.g. "yt-dlp")
    pub tool_path: String,

    /// Requested format policy
    pub format: String,

    /// Container every download is normalized to
    pub merge_output_format: String,

    /// Optional cookie bundle handed to the tool
    pub cookies_path: Option<PathBuf>,
}

impl Default for FetchToolConfig {
    fn default() -> Self {
        Self {
            tool_path: "yt-dlp".to_string(),
            format: "bestvideo+bestaudio/best".to_string(),
            merge_output_format: "mp4".to_string(),
            cookies_path: None,
        }
    }
}

/// Google Cloud Storage target for promoted artifacts
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,

    /// Bearer token passed through to the API as-is
    pub access_token: Option<String>,

    /// JSON API base, overridable for emulators
    pub api_base: String,

    /// Base used to build public object URLs
    pub public_base: String,
}

impl ObjectStoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            access_token: None,
            api_base: DEFAULT_GCS_BASE.to_string(),
            public_base: DEFAULT_GCS_BASE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        // Promotion is only configured when a bucket is named
        let object_store = var("GCS_BUCKET").map(|bucket| ObjectStoreConfig {
            bucket,
            access_token: var("GCS_ACCESS_TOKEN"),
            api_base: var("GCS_API_BASE").unwrap_or_else(|| DEFAULT_GCS_BASE.to_string()),
            public_base: var("GCS_PUBLIC_BASE").unwrap_or_else(|| DEFAULT_GCS_BASE.to_string()),
        });

        let defaults = FetchToolConfig::default();

        Ok(Self {
            host: var("HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string())
                .parse()
                .context("Invalid HOST")?,

            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid PORT")?,

            temp_dir: PathBuf::from(var("TEMP_DIR").unwrap_or_else(|| "/tmp/mediagrab".to_string())),

            fetch: FetchToolConfig {
                tool_path: var("FETCH_TOOL_PATH").unwrap_or(defaults.tool_path),
                format: var("FETCH_FORMAT").unwrap_or(defaults.format),
                merge_output_format: var("MERGE_OUTPUT_FORMAT")
                    .unwrap_or(defaults.merge_output_format),
                cookies_path: var("COOKIES_PATH").map(PathBuf::from),
            },

            promote_threshold_bytes: match var("PROMOTE_THRESHOLD_BYTES") {
                Some(v) => v.parse().context("Invalid PROMOTE_THRESHOLD_BYTES")?,
                None => DEFAULT_PROMOTE_THRESHOLD_BYTES,
            },

            object_store,

            callback_timeout: Duration::from_secs(
                var("CALLBACK_TIMEOUT_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("Invalid CALLBACK_TIMEOUT_SECS")?,
            ),

            max_concurrent_jobs: var("MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|| "4".to_string())
                .parse::<usize>()
                .context("Invalid MAX_CONCURRENT_JOBS")?
                .max(1),

            local_retention: Duration::from_secs(
                var("LOCAL_RETENTION_SECS")
                    .unwrap_or_else(|| "3600".to_string())
                    .parse()
                    .context("Invalid LOCAL_RETENTION_SECS")?,
            ),

            retention_sweep_cron: var("RETENTION_SWEEP_CRON")
                .unwrap_or_else(|| "0 */10 * * * *".to_string()),

            pretty_logs: var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("pretty"))
                .unwrap_or(false),
        })
    }
}
