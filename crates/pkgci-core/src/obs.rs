//! Structured lifecycle events for pipeline runs.
//!
//! Every event carries an `event` field so log aggregation can filter on it.
//! Cells run inside a [`cell_span`] so their own log lines inherit the cell
//! coordinates.

use tracing::{info, warn, Span};

use crate::matrix::MatrixCell;
use crate::variant::VariantTag;

/// Span a whole pipeline run is instrumented with.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("pkgci.run", run_id = %run_id)
}

/// Span a cell task is instrumented with.
pub fn cell_span(run_id: &str, cell: &MatrixCell, variant: VariantTag) -> Span {
    tracing::info_span!(
        "cell",
        run_id = %run_id,
        index = cell.index,
        runtime = %cell.runtime_version,
        os = %cell.operating_system,
        variant = %variant,
    )
}

pub fn emit_pipeline_started(run_id: &str, trigger: &str, release: Option<&str>, cells: usize) {
    info!(
        event = "pipeline.started",
        run_id = %run_id,
        trigger = %trigger,
        release = release.unwrap_or("-"),
        planned_cells = cells,
    );
}

pub fn emit_build_completed(run_id: &str, wheel: &str, source_archive: &str, duration_ms: u64) {
    info!(
        event = "build.completed",
        run_id = %run_id,
        wheel = %wheel,
        source_archive = %source_archive,
        duration_ms = duration_ms,
    );
}

pub fn emit_cell_started(cell: &MatrixCell, artifact: &str) {
    info!(event = "cell.started", cell = %cell.slug(), artifact = %artifact);
}

pub fn emit_cell_finished(
    cell: &MatrixCell,
    passed: bool,
    exit_code: Option<i32>,
    duration_ms: u64,
) {
    if passed {
        info!(
            event = "cell.finished",
            cell = %cell.slug(),
            passed = passed,
            exit_code = ?exit_code,
            duration_ms = duration_ms,
        );
    } else {
        warn!(
            event = "cell.finished",
            cell = %cell.slug(),
            passed = passed,
            exit_code = ?exit_code,
            duration_ms = duration_ms,
        );
    }
}

pub fn emit_coverage_uploaded(cell: &MatrixCell, status: &str) {
    info!(event = "coverage.uploaded", cell = %cell.slug(), status = %status);
}

pub fn emit_pipeline_finished(
    run_id: &str,
    duration_ms: u64,
    passed: usize,
    failed: usize,
    success: bool,
) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        passed_cells = passed,
        failed_cells = failed,
        success = success,
    );
}

/// Warning for a pipeline that aborted before the matrix ran.
pub fn emit_pipeline_aborted(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "pipeline.aborted", run_id = %run_id, error = %error);
}
