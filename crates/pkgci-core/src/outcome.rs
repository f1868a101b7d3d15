//! Per-cell outcomes and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactPair;
use crate::gate::GateVerdict;
use crate::matrix::MatrixCell;
use crate::reporting::{ArchiveReceipt, CoverageStatus};
use crate::runner::TestRunResult;
use crate::trigger::TriggerEvent;
use crate::variant::VariantTag;
use crate::version::ReleaseRef;

/// Everything recorded about one finished matrix cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellOutcome {
    pub cell: MatrixCell,
    pub variant: VariantTag,

    /// Store name of the HTML report
    pub report_name: String,

    /// Store name of the log
    pub log_name: String,

    /// Exit code of the test run; `None` when the tests never ran
    pub exit_code: Option<i32>,

    pub tests_passed: bool,
    pub coverage: CoverageStatus,

    /// Best-effort archive problems; these never fail the cell
    pub archive_warnings: Vec<String>,

    /// Install, locate, timeout or task failure
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl CellOutcome {
    pub fn new(
        cell: MatrixCell,
        variant: VariantTag,
        result: &TestRunResult,
        receipt: ArchiveReceipt,
        coverage: CoverageStatus,
        duration_ms: u64,
    ) -> Self {
        Self {
            cell,
            variant,
            report_name: receipt.report_name,
            log_name: receipt.log_name,
            exit_code: result.exit_code,
            tests_passed: result.success,
            coverage,
            archive_warnings: receipt.warnings,
            error: result.error.clone(),
            duration_ms,
        }
    }

    /// Outcome of a cell whose task died before reporting anything.
    ///
    /// `receipt` comes from archiving placeholders after the fact.
    pub fn aborted(
        cell: MatrixCell,
        variant: VariantTag,
        receipt: ArchiveReceipt,
        error: impl Into<String>,
    ) -> Self {
        Self {
            cell,
            variant,
            report_name: receipt.report_name,
            log_name: receipt.log_name,
            exit_code: None,
            tests_passed: false,
            coverage: CoverageStatus::Skipped,
            archive_warnings: receipt.warnings,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Tests passed, coverage was handled and nothing else went wrong.
    pub fn passed(&self) -> bool {
        self.tests_passed && self.coverage.is_ok() && self.error.is_none()
    }

    /// Reasons this cell failed, empty when it passed.
    pub fn failure_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(error) = &self.error {
            reasons.push(error.clone());
        } else if !self.tests_passed {
            match self.exit_code {
                Some(code) => reasons.push(format!("tests exited with code {code}")),
                None => reasons.push("tests did not run".to_string()),
            }
        }
        if let CoverageStatus::Failed(e) = &self.coverage {
            reasons.push(format!("coverage upload failed: {e}"));
        }
        reasons
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub trigger: TriggerEvent,

    /// Version stamped onto the build, if this was a release
    pub release: Option<ReleaseRef>,

    pub artifacts: ArtifactPair,

    /// Outcomes in matrix order
    pub cells: Vec<CellOutcome>,

    pub verdict: GateVerdict,
    pub success: bool,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn passed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cells.len() - self.passed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::expand;

    fn cell() -> MatrixCell {
        let pair = ArtifactPair::from_names("pkg-1.0-py3-none-any.whl", "pkg-1.0.tar.gz");
        expand(&["3.11".to_string()], &["linux".to_string()], &pair)
            .unwrap()
            .remove(0)
    }

    fn receipt() -> ArchiveReceipt {
        ArchiveReceipt {
            report_name: "unittest_report_linux_py3.11_wheel.html".to_string(),
            log_name: "pytest_linux_py3.11_wheel.log".to_string(),
            warnings: Vec::new(),
        }
    }

    fn passing_result() -> TestRunResult {
        TestRunResult {
            exit_code: Some(0),
            success: true,
            ..TestRunResult::default()
        }
    }

    #[test]
    fn test_passing_cell() {
        let outcome = CellOutcome::new(
            cell(),
            VariantTag::Wheel,
            &passing_result(),
            receipt(),
            CoverageStatus::Uploaded,
            10,
        );
        assert!(outcome.passed());
        assert!(outcome.failure_reasons().is_empty());
    }

    #[test]
    fn test_upload_failure_fails_passing_cell() {
        let outcome = CellOutcome::new(
            cell(),
            VariantTag::Wheel,
            &passing_result(),
            receipt(),
            CoverageStatus::Failed("503".to_string()),
            10,
        );
        assert!(!outcome.passed());
        assert_eq!(outcome.failure_reasons(), vec!["coverage upload failed: 503"]);
    }

    #[test]
    fn test_archive_warnings_do_not_fail_cell() {
        let mut receipt = receipt();
        receipt.warnings.push("disk full".to_string());
        let outcome = CellOutcome::new(
            cell(),
            VariantTag::Wheel,
            &passing_result(),
            receipt,
            CoverageStatus::Skipped,
            10,
        );
        assert!(outcome.passed());
    }

    #[test]
    fn test_aborted_cell() {
        let outcome =
            CellOutcome::aborted(cell(), VariantTag::Wheel, receipt(), "task panicked");
        assert!(!outcome.passed());
        assert_eq!(outcome.report_name, "unittest_report_linux_py3.11_wheel.html");
        assert_eq!(outcome.failure_reasons(), vec!["task panicked"]);
    }
}
