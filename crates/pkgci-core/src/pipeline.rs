//! Pipeline orchestration: build once, then fan the test matrix out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use pkgci_store::ArtifactStore;
use tokio::sync::Semaphore;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::builder::{build_artifacts, dist_dir, publish_artifacts, PackageBuilder};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::gate::MatrixGate;
use crate::matrix::{dedupe, expand, MatrixCell};
use crate::obs;
use crate::outcome::{CellOutcome, PipelineReport};
use crate::reporting::{CoverageStatus, CoverageUploader, ReportingSink};
use crate::runner::{TestCapability, TestExecutor, TestRunResult};
use crate::trigger::TriggerEvent;
use crate::variant::{VariantResolver, VariantTag};
use crate::version::{resolve_release, ReleaseRef};

/// External collaborators of a pipeline run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub builder: Arc<dyn PackageBuilder>,
    pub store: Arc<dyn ArtifactStore>,
    pub tests: Arc<dyn TestCapability>,

    /// Coverage aggregator; uploads are skipped when `None`
    pub uploader: Option<Arc<dyn CoverageUploader>>,
    pub coverage_token: Option<String>,
}

/// Build-and-verify pipeline orchestrator.
pub struct Pipeline {
    config: PipelineConfig,
    deps: PipelineDeps,
    run_id: Uuid,
}

impl Pipeline {
    /// Validate `config` and prepare a run with a fresh id.
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            deps,
            run_id: Uuid::new_v4(),
        })
    }

    /// Use a caller-chosen run id, e.g. one already used to scope the store.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Scratch directory of this run.
    pub fn run_dir(&self) -> PathBuf {
        self.config.work_dir.join(self.run_id.to_string())
    }

    /// Execute the pipeline for `trigger`.
    ///
    /// Returns `Err` only for run-aborting failures (build, artifact count,
    /// storing an artifact). Cell failures are reported on the returned
    /// `PipelineReport` and make `success` false.
    pub async fn run(&self, trigger: &TriggerEvent) -> Result<PipelineReport> {
        let run_id = self.run_id.to_string();
        let release = resolve_release(trigger);
        let planned = dedupe(&self.config.runtime_versions).len()
            * dedupe(&self.config.operating_systems).len()
            * 2;
        obs::emit_pipeline_started(
            &run_id,
            trigger.kind.name(),
            release.as_ref().map(ReleaseRef::as_str),
            planned,
        );

        let result = self
            .run_stages(trigger, release)
            .instrument(obs::run_span(&run_id))
            .await;
        if let Err(e) = &result {
            obs::emit_pipeline_aborted(&run_id, e);
        }
        result
    }

    async fn run_stages(
        &self,
        trigger: &TriggerEvent,
        release: Option<ReleaseRef>,
    ) -> Result<PipelineReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = self.run_id.to_string();
        let run_dir = self.run_dir();

        let output = build_artifacts(
            self.deps.builder.as_ref(),
            release.as_ref(),
            &dist_dir(&run_dir),
            self.config.build_timeout(),
        )
        .await?;
        let artifacts = publish_artifacts(self.deps.store.as_ref(), &output).await?;
        obs::emit_build_completed(
            &run_id,
            &artifacts.wheel.storage_name,
            &artifacts.source_archive.storage_name,
            start.elapsed().as_millis() as u64,
        );

        let cells = expand(
            &self.config.runtime_versions,
            &self.config.operating_systems,
            &artifacts,
        )?;
        let outcomes = self.run_matrix(cells, &run_dir.join("cells")).await;

        let verdict = MatrixGate::evaluate(&outcomes);
        let report = PipelineReport {
            run_id: self.run_id,
            started_at,
            trigger: trigger.clone(),
            release,
            artifacts,
            success: verdict.passed,
            verdict,
            cells: outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        obs::emit_pipeline_finished(
            &run_id,
            report.duration_ms,
            report.passed_count(),
            report.failed_count(),
            report.success,
        );
        Ok(report)
    }

    /// Run every cell as its own task and wait for all of them.
    ///
    /// Fail-fast is off: a failing or panicking cell never cancels its
    /// siblings. Outcomes come back in matrix order.
    async fn run_matrix(&self, cells: Vec<MatrixCell>, cells_dir: &Path) -> Vec<CellOutcome> {
        let run_id = self.run_id.to_string();
        let limiter = self
            .config
            .max_parallel_cells
            .map(|n| Arc::new(Semaphore::new(n)));

        let executor = Arc::new(
            TestExecutor::new(
                Arc::clone(&self.deps.store),
                Arc::clone(&self.deps.tests),
                self.config.parallelism,
            )
            .with_timeout(self.config.cell_timeout()),
        );
        let mut sink = ReportingSink::new(Arc::clone(&self.deps.store))
            .with_upload_timeout(self.config.upload_timeout());
        if let Some(uploader) = &self.deps.uploader {
            sink = sink.with_uploader(Arc::clone(uploader), self.deps.coverage_token.clone());
        }
        let sink = Arc::new(sink);

        info!(cells = cells.len(), limit = ?self.config.max_parallel_cells, "starting test matrix");

        let mut planned = Vec::with_capacity(cells.len());
        let mut handles = Vec::with_capacity(cells.len());
        for cell in cells {
            let variant = VariantResolver::resolve(&cell);
            let span = obs::cell_span(&run_id, &cell, variant);
            let task = run_cell(
                cell.clone(),
                variant,
                Arc::clone(&executor),
                Arc::clone(&sink),
                limiter.clone(),
                cells_dir.to_path_buf(),
            );
            handles.push(tokio::spawn(task.instrument(span)));
            planned.push((cell, variant));
        }

        let joined = join_all(handles).await;
        let mut outcomes = Vec::with_capacity(joined.len());
        for (joined, (cell, variant)) in joined.into_iter().zip(planned) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = format!("cell task failed: {e}");
                    // Store placeholders for whatever the task did not archive.
                    let receipt = sink
                        .archive(&cell, variant, &TestRunResult::failed(error.clone()))
                        .await;
                    let outcome = CellOutcome::aborted(cell, variant, receipt, error);
                    obs::emit_cell_finished(&outcome.cell, false, None, 0);
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

async fn run_cell(
    cell: MatrixCell,
    variant: VariantTag,
    executor: Arc<TestExecutor>,
    sink: Arc<ReportingSink>,
    limiter: Option<Arc<Semaphore>>,
    cells_dir: PathBuf,
) -> CellOutcome {
    // The semaphore is never closed, so acquiring only fails if it was.
    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    let start = Instant::now();
    obs::emit_cell_started(&cell, &cell.artifact.storage_name);

    let result = executor.execute(&cell, variant, &cells_dir).await;
    let receipt = sink.archive(&cell, variant, &result).await;

    // No coverage exists for a cell whose tests never ran.
    let coverage = if result.exit_code.is_some() {
        let status = sink
            .upload_coverage(&cell, variant, result.coverage.clone())
            .await;
        obs::emit_coverage_uploaded(&cell, &status.to_string());
        status
    } else {
        CoverageStatus::Skipped
    };

    let outcome = CellOutcome::new(
        cell,
        variant,
        &result,
        receipt,
        coverage,
        start.elapsed().as_millis() as u64,
    );
    obs::emit_cell_finished(
        &outcome.cell,
        outcome.passed(),
        outcome.exit_code,
        outcome.duration_ms,
    );
    outcome
}
