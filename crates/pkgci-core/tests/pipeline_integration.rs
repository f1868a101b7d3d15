//! Integration tests for the pipeline with in-memory collaborators.

use std::path::Path;
use std::sync::Arc;

use pkgci_core::fakes::{FakeBuilder, FakeCoverageUploader, FakeTestCapability};
use pkgci_core::{
    render_summary_md, CoverageStatus, CoverageUploader, Pipeline, PipelineConfig, PipelineDeps,
    PipelineError, TriggerEvent, VariantTag,
};
use pkgci_store::fakes::MemoryArtifactStore;
use pkgci_store::{ArtifactStore, FsArtifactStore};

fn two_by_two(work_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        runtime_versions: vec!["3.9".to_string(), "3.12".to_string()],
        operating_systems: vec!["linux".to_string(), "windows".to_string()],
        work_dir: work_dir.to_path_buf(),
        ..PipelineConfig::default()
    }
}

struct Harness {
    builder: Arc<FakeBuilder>,
    store: Arc<MemoryArtifactStore>,
    tests: Arc<FakeTestCapability>,
    uploader: Arc<FakeCoverageUploader>,
}

impl Harness {
    fn new() -> Self {
        Self::with_builder(FakeBuilder::new("pkg"))
    }

    fn with_builder(builder: FakeBuilder) -> Self {
        Self {
            builder: Arc::new(builder),
            store: Arc::new(MemoryArtifactStore::new()),
            tests: Arc::new(FakeTestCapability::new()),
            uploader: Arc::new(FakeCoverageUploader::new()),
        }
    }

    fn deps(&self, with_uploader: bool) -> PipelineDeps {
        PipelineDeps {
            builder: self.builder.clone(),
            store: self.store.clone(),
            tests: self.tests.clone(),
            uploader: with_uploader.then(|| self.uploader.clone() as Arc<dyn CoverageUploader>),
            coverage_token: Some("token".to_string()),
        }
    }

    fn pipeline(&self, work_dir: &Path, with_uploader: bool) -> Pipeline {
        Pipeline::new(two_by_two(work_dir), self.deps(with_uploader)).expect("valid config")
    }
}

/// Test: 2 runtimes × 2 systems × 2 artifacts run as 8 passing cells
#[tokio::test]
async fn test_eight_cells_all_pass() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let report = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");

    assert!(report.success, "{:?}", report.verdict.violations);
    assert_eq!(report.cells.len(), 8);
    assert_eq!(report.passed_count(), 8);
    assert_eq!(harness.tests.installs().len(), 8);
    assert_eq!(harness.uploader.uploads().len(), 8);
    assert!(harness
        .uploader
        .uploads()
        .iter()
        .all(|(_, token)| token.as_deref() == Some("token")));

    let wheel_cells = report
        .cells
        .iter()
        .filter(|c| c.variant == VariantTag::Wheel)
        .count();
    assert_eq!(wheel_cells, 4);
}

/// Test: cell #3 failing does not stop the other seven
#[tokio::test]
async fn test_failing_cell_does_not_cancel_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    // Cell order: 3.9/linux/wheel, 3.9/linux/sdist, 3.9/windows/wheel, ...
    harness.tests.fail_cell("windows", "3.9", VariantTag::Wheel);

    let report = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(harness.tests.runs().len(), 8, "every cell ran");
    assert_eq!(report.failed_count(), 1);
    assert!(!report.cells[2].passed());
    assert_eq!(report.cells[2].exit_code, Some(1));
    assert!(report
        .cells
        .iter()
        .enumerate()
        .all(|(i, c)| i == 2 || c.passed()));

    // The failing cell's report and log were still archived.
    let report_blob = harness
        .store
        .get("unittest_report_windows_py3.9_wheel.html")
        .await
        .expect("report archived");
    assert!(String::from_utf8(report_blob).unwrap().contains("failed"));
    assert!(harness
        .store
        .contains("pytest_windows_py3.9_wheel.log")
        .await
        .unwrap());
}

/// Test: a panicking cell task becomes a failed outcome
#[tokio::test]
async fn test_panicking_cell_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness
        .tests
        .panic_in("linux", "3.12", VariantTag::SourceArchive);

    let report = harness
        .pipeline(dir.path(), false)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(report.cells.len(), 8);
    assert_eq!(report.failed_count(), 1);
    let crashed = report
        .cells
        .iter()
        .find(|c| !c.passed())
        .expect("one failed cell");
    assert_eq!(crashed.cell.runtime_version, "3.12");
    assert_eq!(crashed.cell.operating_system, "linux");
    assert!(crashed.error.as_deref().unwrap().contains("cell task failed"));

    // Both names still exist in the store, holding placeholders.
    assert_eq!(
        crashed.report_name,
        "unittest_report_linux_py3.12_sourceArchive.html"
    );
    let report_blob = harness.store.get(&crashed.report_name).await.unwrap();
    assert!(String::from_utf8(report_blob)
        .unwrap()
        .contains("cell task failed"));
    assert_eq!(crashed.log_name, "pytest_linux_py3.12_sourceArchive.log");
    let log_blob = harness.store.get(&crashed.log_name).await.unwrap();
    assert!(String::from_utf8(log_blob)
        .unwrap()
        .contains("cell task failed"));
    assert!(crashed.archive_warnings.is_empty());
}

/// Test: a coverage upload failure fails an otherwise passing cell
#[tokio::test]
async fn test_upload_failure_fails_passing_cell() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness.uploader.fail_for("linux_py3.12_wheel");

    let report = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");

    assert!(!report.success);
    assert_eq!(report.failed_count(), 1);
    let cell = report
        .cells
        .iter()
        .find(|c| !c.passed())
        .expect("one failed cell");
    assert!(cell.tests_passed);
    assert!(matches!(cell.coverage, CoverageStatus::Failed(_)));
    assert!(report.verdict.violations[0].contains("coverage upload failed"));
}

/// Test: a missing coverage payload fails the cell when uploads are configured
#[tokio::test]
async fn test_missing_coverage_payload_fails_cell() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness
        .tests
        .omit_coverage("windows", "3.12", VariantTag::SourceArchive);

    let report = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");
    assert_eq!(report.failed_count(), 1);

    // Without an aggregator the same run passes.
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness
        .tests
        .omit_coverage("windows", "3.12", VariantTag::SourceArchive);
    let report = harness
        .pipeline(dir.path(), false)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");
    assert!(report.success);
}

/// Test: a broken install fails only its own cell
#[tokio::test]
async fn test_install_failure_is_cell_local() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    harness
        .tests
        .break_install("linux", "3.9", VariantTag::SourceArchive);

    let report = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .expect("pipeline failed");

    assert_eq!(report.failed_count(), 1);
    let broken = &report.cells[1];
    assert!(broken.exit_code.is_none());
    assert_eq!(broken.coverage, CoverageStatus::Skipped);
    assert!(harness
        .store
        .contains("unittest_report_linux_py3.9_sourceArchive.html")
        .await
        .unwrap());
    assert_eq!(harness.uploader.uploads().len(), 7);
}

/// Test: two wheels from one build abort the run before any cell starts
#[tokio::test]
async fn test_wrong_artifact_count_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let builder = FakeBuilder::new("pkg").with_extra_file("other-1.0-py3-none-any.whl");
    let harness = Harness::with_builder(builder);

    let err = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactCount { .. }));
    assert!(harness.tests.runs().is_empty());
    assert!(harness.store.names().is_empty());
}

/// Test: a build failure aborts the run
#[tokio::test]
async fn test_build_failure_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::with_builder(FakeBuilder::new("pkg").failing());

    let err = harness
        .pipeline(dir.path(), true)
        .run(&TriggerEvent::manual())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Build(_)));
    assert!(harness.tests.installs().is_empty());
}

/// Test: a release tag is stamped and flows into the artifact names
#[tokio::test]
async fn test_release_tag_is_stamped() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let report = harness
        .pipeline(dir.path(), false)
        .run(&TriggerEvent::push("refs/tags/v2.3.1"))
        .await
        .expect("pipeline failed");

    assert_eq!(harness.builder.stamped_versions(), vec!["2.3.1"]);
    assert_eq!(report.release.as_ref().map(|r| r.as_str()), Some("2.3.1"));
    assert_eq!(report.artifacts.wheel.storage_name, "pkg-2.3.1-py3-none-any.whl");
    assert!(report
        .cells
        .iter()
        .all(|c| c.cell.artifact.storage_name.contains("2.3.1")));
    assert!(render_summary_md(&report).contains("`2.3.1`"));
}

/// Test: a branch push builds the development version
#[tokio::test]
async fn test_branch_push_is_not_stamped() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();

    let report = harness
        .pipeline(dir.path(), false)
        .run(&TriggerEvent::push("refs/heads/master"))
        .await
        .expect("pipeline failed");

    assert!(harness.builder.stamped_versions().is_empty());
    assert!(report.release.is_none());
}

/// Test: reports written through the filesystem store are readable from a
/// second store instance over the same root
#[tokio::test]
async fn test_filesystem_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store_root = dir.path().join("store");
    let store = Arc::new(FsArtifactStore::new(&store_root).expect("open store"));

    let deps = PipelineDeps {
        builder: Arc::new(FakeBuilder::new("pkg")),
        store,
        tests: Arc::new(FakeTestCapability::new()),
        uploader: None,
        coverage_token: None,
    };
    let pipeline = Pipeline::new(two_by_two(&dir.path().join("work")), deps).unwrap();
    let report = pipeline.run(&TriggerEvent::manual()).await.unwrap();
    assert!(report.success);

    let reader = FsArtifactStore::new(&store_root).expect("open store");
    for cell in &report.cells {
        let log = reader.get(&cell.log_name).await.expect("log readable");
        assert!(!log.is_empty());
    }
    let wheel = reader
        .get(&report.artifacts.wheel.storage_name)
        .await
        .unwrap();
    assert_eq!(wheel, b"contents of pkg-0.0.0.dev0-py3-none-any.whl");
}
