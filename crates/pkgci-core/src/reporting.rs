//! Reporting sink: archives per-cell reports and logs, forwards coverage.
//!
//! Archiving is best-effort and never fails a cell. Coverage forwarding is
//! the opposite: once an aggregator is configured, any upload problem fails
//! the cell that produced the payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pkgci_store::ArtifactStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matrix::MatrixCell;
use crate::runner::{log_file_name, report_file_name, TestRunResult};
use crate::variant::VariantTag;

/// Coverage data of one cell, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveragePayload {
    pub data: Vec<u8>,

    /// Comma-separated aggregator flags (`<os>,py<runtime>,<variant>`)
    pub flags: String,

    /// Upload name, unique per cell
    pub name: String,
}

impl CoveragePayload {
    pub fn for_cell(cell: &MatrixCell, variant: VariantTag, data: Vec<u8>) -> Self {
        Self {
            data,
            flags: format!(
                "{},py{},{}",
                cell.operating_system, cell.runtime_version, variant
            ),
            name: format!(
                "{}_py{}_{}",
                cell.operating_system, cell.runtime_version, variant
            ),
        }
    }
}

/// The external coverage aggregator.
#[async_trait]
pub trait CoverageUploader: Send + Sync {
    async fn upload(&self, payload: &CoveragePayload, token: Option<&str>) -> anyhow::Result<()>;
}

/// Uploads coverage with a plain HTTP POST.
pub struct HttpCoverageUploader {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCoverageUploader {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pkgci/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl CoverageUploader for HttpCoverageUploader {
    async fn upload(&self, payload: &CoveragePayload, token: Option<&str>) -> anyhow::Result<()> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("flags", payload.flags.as_str()), ("name", payload.name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(payload.data.clone());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        response.error_for_status()?;
        Ok(())
    }
}

/// What happened to a cell's coverage payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CoverageStatus {
    Uploaded,

    /// No aggregator configured
    Skipped,

    Failed(String),
}

impl CoverageStatus {
    /// Whether this status allows the cell to pass.
    pub fn is_ok(&self) -> bool {
        !matches!(self, CoverageStatus::Failed(_))
    }
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageStatus::Uploaded => f.write_str("uploaded"),
            CoverageStatus::Skipped => f.write_str("skipped"),
            CoverageStatus::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Names the report and log were archived under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub report_name: String,
    pub log_name: String,

    /// Store failures hit while archiving
    pub warnings: Vec<String>,
}

pub struct ReportingSink {
    store: Arc<dyn ArtifactStore>,
    uploader: Option<Arc<dyn CoverageUploader>>,
    token: Option<String>,
    upload_timeout: Option<Duration>,
}

impl ReportingSink {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            uploader: None,
            token: None,
            upload_timeout: None,
        }
    }

    pub fn with_uploader(
        mut self,
        uploader: Arc<dyn CoverageUploader>,
        token: Option<String>,
    ) -> Self {
        self.uploader = Some(uploader);
        self.token = token;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Persist the report and log of `cell`, whatever the test outcome.
    ///
    /// A missing report or log is replaced by a placeholder so both names
    /// always exist in the store.
    pub async fn archive(
        &self,
        cell: &MatrixCell,
        variant: VariantTag,
        result: &TestRunResult,
    ) -> ArchiveReceipt {
        let os = &cell.operating_system;
        let runtime = &cell.runtime_version;
        let mut receipt = ArchiveReceipt {
            report_name: report_file_name(os, runtime, variant),
            log_name: log_file_name(os, runtime, variant),
            warnings: Vec::new(),
        };

        let report = match &result.report {
            Some(bytes) => bytes.clone(),
            None => placeholder_report(cell, result),
        };
        let log = match &result.log {
            Some(bytes) => bytes.clone(),
            None => placeholder_log(cell, result),
        };

        let blobs = [
            (receipt.report_name.clone(), report),
            (receipt.log_name.clone(), log),
        ];
        for (name, bytes) in blobs {
            if let Err(e) = self.store.put(&name, &bytes).await {
                warn!(cell = %cell.slug(), name = %name, error = %e, "failed to archive");
                receipt.warnings.push(format!("failed to archive {name}: {e}"));
            }
        }
        receipt
    }

    /// Forward the coverage payload of `cell` to the aggregator.
    pub async fn upload_coverage(
        &self,
        cell: &MatrixCell,
        variant: VariantTag,
        coverage: Option<Vec<u8>>,
    ) -> CoverageStatus {
        let Some(uploader) = &self.uploader else {
            return CoverageStatus::Skipped;
        };
        let Some(data) = coverage else {
            warn!(cell = %cell.slug(), "no coverage payload to upload");
            return CoverageStatus::Failed("test run produced no coverage payload".to_string());
        };

        let payload = CoveragePayload::for_cell(cell, variant, data);
        let upload = uploader.upload(&payload, self.token.as_deref());
        let result = match self.upload_timeout {
            Some(limit) => match tokio::time::timeout(limit, upload).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "coverage upload timed out after {} seconds",
                    limit.as_secs()
                )),
            },
            None => upload.await,
        };

        match result {
            Ok(()) => {
                info!(cell = %cell.slug(), bytes = payload.data.len(), "coverage uploaded");
                CoverageStatus::Uploaded
            }
            Err(e) => {
                warn!(cell = %cell.slug(), error = %format!("{e:#}"), "coverage upload failed");
                CoverageStatus::Failed(format!("{e:#}"))
            }
        }
    }
}

fn placeholder_report(cell: &MatrixCell, result: &TestRunResult) -> Vec<u8> {
    let reason = result.error.as_deref().unwrap_or("the test run wrote no report");
    format!(
        "<!DOCTYPE html>\n<html><head><title>{slug}</title></head><body>\n<h1>No test report for {slug}</h1>\n<pre>{reason}</pre>\n</body></html>\n",
        slug = cell.slug(),
        reason = escape_html(reason),
    )
    .into_bytes()
}

fn placeholder_log(cell: &MatrixCell, result: &TestRunResult) -> Vec<u8> {
    let reason = result.error.as_deref().unwrap_or("the test run wrote no log");
    format!("no log captured for {}: {reason}\n", cell.slug()).into_bytes()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
