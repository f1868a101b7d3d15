use anyhow::{Context, Result};
use std::path::Path;

use crate::outcome::PipelineReport;

/// Write the run report as pretty JSON.
pub fn write_report_json(path: &Path, report: &PipelineReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize pipeline report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the Markdown summary used for job summaries and PR comments.
pub fn render_summary_md(report: &PipelineReport) -> String {
    let mut out = String::new();
    let verdict = if report.success { "passed" } else { "failed" };
    out.push_str(&format!("# pkgci run {}\n\n", verdict));
    out.push_str(&format!(
        "- run: `{}`\n- trigger: {}{}\n- release: {}\n- cells: {} passed, {} failed\n- duration: {:.1}s\n\n",
        report.run_id,
        report.trigger.kind,
        report
            .trigger
            .git_ref
            .as_deref()
            .map(|r| format!(" (`{r}`)"))
            .unwrap_or_default(),
        report
            .release
            .as_ref()
            .map(|r| format!("`{r}`"))
            .unwrap_or_else(|| "none".to_string()),
        report.passed_count(),
        report.failed_count(),
        report.duration_ms as f64 / 1000.0,
    ));

    out.push_str("## Artifacts\n");
    for artifact in report.artifacts.iter() {
        out.push_str(&format!(
            "- {}: `{}` ({} bytes)\n",
            artifact.kind, artifact.storage_name, artifact.size_bytes
        ));
    }
    out.push('\n');

    out.push_str("## Matrix\n");
    out.push_str("| OS | Runtime | Variant | Tests | Coverage | Report |\n");
    out.push_str("|----|---------|---------|-------|----------|--------|\n");
    for cell in &report.cells {
        let tests = match (cell.tests_passed, cell.exit_code) {
            (true, _) => "pass".to_string(),
            (false, Some(code)) => format!("fail ({code})"),
            (false, None) => "error".to_string(),
        };
        let coverage = match &cell.coverage {
            crate::reporting::CoverageStatus::Failed(_) => "failed".to_string(),
            other => other.to_string(),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | `{}` |\n",
            cell.cell.operating_system,
            cell.cell.runtime_version,
            cell.variant,
            tests,
            coverage,
            cell.report_name
        ));
    }

    if !report.verdict.violations.is_empty() {
        out.push_str("\n## Failures\n");
        for v in &report.verdict.violations {
            out.push_str(&format!("- {}\n", v));
        }
    }

    let warnings: Vec<&String> = report
        .cells
        .iter()
        .flat_map(|c| &c.archive_warnings)
        .collect();
    if !warnings.is_empty() {
        out.push_str("\n## Archive warnings\n");
        for w in warnings {
            out.push_str(&format!("- {}\n", w));
        }
    }
    out
}

/// Write summary.md.
pub fn write_summary_md(path: &Path, report: &PipelineReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactPair;
    use crate::gate::MatrixGate;
    use crate::matrix::expand;
    use crate::outcome::CellOutcome;
    use crate::reporting::{ArchiveReceipt, CoverageStatus};
    use crate::runner::TestRunResult;
    use crate::trigger::TriggerEvent;
    use crate::variant::VariantResolver;
    use crate::version::parse_release_ref;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    fn report() -> PipelineReport {
        let artifacts = ArtifactPair::from_names("pkg-2.3.1-py3-none-any.whl", "pkg-2.3.1.tar.gz");
        let cells = expand(&["3.12".to_string()], &["linux".to_string()], &artifacts).unwrap();
        let outcomes: Vec<CellOutcome> = cells
            .into_iter()
            .enumerate()
            .map(|(i, cell)| {
                let variant = VariantResolver::resolve(&cell);
                let result = TestRunResult {
                    exit_code: Some(i as i32),
                    success: i == 0,
                    ..TestRunResult::default()
                };
                let receipt = ArchiveReceipt {
                    report_name: format!("report-{i}.html"),
                    log_name: format!("log-{i}.log"),
                    warnings: Vec::new(),
                };
                CellOutcome::new(cell, variant, &result, receipt, CoverageStatus::Uploaded, 5)
            })
            .collect();
        let verdict = MatrixGate::evaluate(&outcomes);

        PipelineReport {
            run_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").expect("valid UUID"),
            started_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            trigger: TriggerEvent::push("refs/tags/v2.3.1"),
            release: parse_release_ref("refs/tags/v2.3.1"),
            artifacts,
            success: verdict.passed,
            verdict,
            cells: outcomes,
            duration_ms: 1500,
        }
    }

    #[test]
    fn summary_lists_cells_and_failures() {
        let md = render_summary_md(&report());
        assert!(md.starts_with("# pkgci run failed"));
        assert!(md.contains("- release: `2.3.1`"));
        assert!(md.contains("| linux | 3.12 | wheel | pass | uploaded | `report-0.html` |"));
        assert!(md.contains("| linux | 3.12 | sourceArchive | fail (1) | uploaded |"));
        assert!(md.contains("## Failures"));
        assert!(md.contains("tests exited with code 1"));
    }

    #[test]
    fn report_json_has_expected_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline_report.json");
        write_report_json(&path, &report()).expect("write report");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        let obj = raw.as_object().expect("report object");
        for key in [
            "run_id",
            "started_at",
            "trigger",
            "release",
            "artifacts",
            "cells",
            "verdict",
            "success",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(raw["release"], "2.3.1");
        assert_eq!(raw["cells"][1]["variant"], "sourceArchive");
        assert_eq!(raw["cells"][0]["coverage"]["status"], "uploaded");
    }

    #[test]
    fn report_json_round_trips() {
        let original = report();
        let json = serde_json::to_string(&original).unwrap();
        let back: PipelineReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
