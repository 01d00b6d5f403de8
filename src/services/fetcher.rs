//! Media-fetch tool runner
//!
//! Invokes the external media-fetch tool (yt-dlp compatible) as a child process
//! and turns its JSON report into an [`Artifact`].
//!
//! The tool is asked to print its info document after the download has finished
//! (`--dump-single-json --no-simulate`), so the reported path is the final,
//! merged file rather than one of the per-format intermediates.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::FetchToolConfig;

/// Placeholder the tool expands to the source-derived id.
pub const LOGICAL_ID_PLACEHOLDER: &str = "%(id)s";

/// Placeholder the tool expands to the final extension.
pub const EXT_PLACEHOLDER: &str = "%(ext)s";

/// Unmodified metadata document reported by the tool
pub type RawMetadata = serde_json::Value;

/// The file produced for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location inside the job-scoped temporary area
    pub local_path: PathBuf,

    /// Source-derived identifier (distinct from the job id)
    pub logical_id: String,

    /// Size measured after container normalization
    pub size_bytes: u64,

    pub ext: String,
    pub title: String,
}

/// What to fetch and where the tool may write
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub source_url: &'a Url,

    /// Output path template; must embed [`LOGICAL_ID_PLACEHOLDER`]
    pub output_template: PathBuf,
}

/// Failures surfaced by the tool runner. None of these are retried.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("output template '{0}' does not embed the logical id placeholder")]
    InvalidTemplate(String),

    #[error("failed to launch '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported or unreachable source: {0}")]
    Unsupported(String),

    #[error("post-processing failed: {0}")]
    PostProcessing(String),

    #[error("'{tool}' exited with code {code}: {message}")]
    Tool {
        tool: String,
        code: String,
        message: String,
    },

    #[error("could not read tool metadata: {0}")]
    InvalidOutput(String),

    #[error("tool reported '{}' but the file does not exist", .0.display())]
    MissingArtifact(PathBuf),
}

/// Anything that can turn a source URL into a local artifact.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Retrieve the source into the temporary area described by `request`.
    async fn fetch(&self, request: &FetchRequest<'_>)
    -> Result<(Artifact, RawMetadata), RetrievalError>;

    /// Whether the underlying tool can be executed at all.
    async fn is_available(&self) -> bool;
}

/// Build the output template for a scope prefix inside `temp_dir`.
///
/// The resulting file name is `<prefix><logical id>.<ext>`.
pub fn output_template(temp_dir: &Path, scope_prefix: &str) -> PathBuf {
    temp_dir.join(format!(
        "{scope_prefix}{LOGICAL_ID_PLACEHOLDER}.{EXT_PLACEHOLDER}"
    ))
}

/// Subset of the tool's info document we rely on
#[derive(Debug, Deserialize)]
struct ToolReport {
    id: String,
    title: Option<String>,
    ext: Option<String>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(rename = "_filename")]
    internal_filename: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
}

impl ToolReport {
    /// Final path, preferring the post-merge location
    fn final_path(&self) -> Option<PathBuf> {
        self.requested_downloads
            .iter()
            .find_map(|d| d.filepath.clone())
            .or_else(|| self.internal_filename.clone())
            .or_else(|| self.filename.clone())
            .map(PathBuf::from)
    }
}

/// Runs the configured media-fetch executable
pub struct CommandFetcher {
    config: FetchToolConfig,
}

impl CommandFetcher {
    pub fn new(config: FetchToolConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &FetchRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.config.tool_path);
        // --no-mtime: the retention sweep ages files from when they were written
        cmd.args(["--no-playlist", "--no-progress", "--no-mtime"])
            .args(["--dump-single-json", "--no-simulate"])
            .arg("-f")
            .arg(&self.config.format)
            .arg("--merge-output-format")
            .arg(&self.config.merge_output_format)
            .arg("-o")
            .arg(&request.output_template);

        if let Some(cookies) = &self.config.cookies_path {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg("--")
            .arg(request.source_url.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl MediaFetcher for CommandFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
    ) -> Result<(Artifact, RawMetadata), RetrievalError> {
        let template = request.output_template.to_string_lossy().into_owned();
        if !template.contains(LOGICAL_ID_PLACEHOLDER) {
            return Err(RetrievalError::InvalidTemplate(template));
        }

        debug!(
            tool = %self.config.tool_path,
            source_url = %request.source_url,
            template = %template,
            "Invoking media-fetch tool"
        );

        let output = self
            .command(request)
            .output()
            .await
            .map_err(|source| RetrievalError::Spawn {
                tool: self.config.tool_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                tool = %self.config.tool_path,
                exit_code = %code,
                "Media-fetch tool failed"
            );
            return Err(classify_failure(&self.config.tool_path, &code, &stderr));
        }

        let (report, raw) = parse_report(&output.stdout)?;
        let scope_dir = request
            .output_template
            .parent()
            .unwrap_or_else(|| Path::new("."));
        let artifact = resolve_artifact(report, scope_dir).await?;

        info!(
            logical_id = %artifact.logical_id,
            path = %artifact.local_path.display(),
            size_bytes = artifact.size_bytes,
            "Retrieval complete"
        );

        Ok((artifact, raw))
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.config.tool_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Pick the info document out of stdout; warnings may precede it.
fn parse_report(stdout: &[u8]) -> Result<(ToolReport, RawMetadata), RetrievalError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| RetrievalError::InvalidOutput("no JSON document on stdout".to_string()))?;

    let raw: RawMetadata =
        serde_json::from_str(line).map_err(|e| RetrievalError::InvalidOutput(e.to_string()))?;
    let report: ToolReport = serde_json::from_value(raw.clone())
        .map_err(|e| RetrievalError::InvalidOutput(e.to_string()))?;

    Ok((report, raw))
}

async fn resolve_artifact(report: ToolReport, scope_dir: &Path) -> Result<Artifact, RetrievalError> {
    let local_path = report
        .final_path()
        .ok_or_else(|| RetrievalError::InvalidOutput("no output path reported".to_string()))?;

    // The tool must not have written outside the temporary area
    let escapes = local_path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if escapes || !local_path.starts_with(scope_dir) {
        return Err(RetrievalError::InvalidOutput(format!(
            "output path '{}' is outside '{}'",
            local_path.display(),
            scope_dir.display()
        )));
    }

    let metadata = match tokio::fs::metadata(&local_path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RetrievalError::MissingArtifact(local_path));
        }
        Err(e) => return Err(RetrievalError::InvalidOutput(e.to_string())),
    };

    let ext = report
        .ext
        .clone()
        .or_else(|| {
            local_path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_string)
        })
        .unwrap_or_default();

    Ok(Artifact {
        size_bytes: metadata.len(),
        title: report.title.unwrap_or_else(|| report.id.clone()),
        logical_id: report.id,
        ext,
        local_path,
    })
}

static ERROR_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ERROR:\s*(.+?)\s*$").expect("valid regex"));

/// Map a failed run onto the retrieval error taxonomy using the tool's `ERROR:` lines.
fn classify_failure(tool: &str, code: &str, stderr: &str) -> RetrievalError {
    let message = ERROR_LINE
        .captures_iter(stderr)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .last()
        .unwrap_or_else(|| {
            let trimmed = stderr.trim();
            if trimmed.is_empty() {
                "no error output".to_string()
            } else {
                trimmed.lines().last().unwrap_or(trimmed).to_string()
            }
        });
    let lower = message.to_lowercase();

    if lower.contains("unsupported url")
        || lower.contains("no video formats")
        || lower.contains("video unavailable")
        || lower.contains("is not a valid url")
    {
        RetrievalError::Unsupported(message)
    } else if lower.contains("postprocessing")
        || lower.contains("ffmpeg")
        || lower.contains("merg")
        || lower.contains("remux")
    {
        RetrievalError::PostProcessing(message)
    } else if lower.contains("unable to download")
        || lower.contains("http error")
        || lower.contains("timed out")
        || lower.contains("name or service not known")
        || lower.contains("failed to resolve")
        || lower.contains("connection")
    {
        RetrievalError::Network(message)
    } else {
        RetrievalError::Tool {
            tool: tool.to_string(),
            code: code.to_string(),
            message,
        }
    }
}
