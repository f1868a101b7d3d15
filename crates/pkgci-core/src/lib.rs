//! pkgci core library
//!
//! Builds a package once, stores its wheel and source archive, then fans a
//! test matrix of runtime versions × operating systems × artifact kinds out
//! as independent tasks, archiving reports and forwarding coverage per cell.

pub mod artifact;
pub mod builder;
pub mod command;
pub mod config;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod matrix;
pub mod obs;
pub mod outcome;
pub mod pipeline;
pub mod reporting;
pub mod runner;
pub mod summary;
pub mod telemetry;
pub mod trigger;
pub mod variant;
pub mod version;

pub use artifact::{ArtifactDescriptor, ArtifactKind, ArtifactPair, BuildOutput, BuiltArtifact};
pub use builder::{build_artifacts, publish_artifacts, CommandBuilder, PackageBuilder};
pub use config::{
    BuildConfig, CoverageConfig, Parallelism, PipelineConfig, StoreConfig, TestConfig,
};
pub use error::{ConfigError, PipelineError, Result};
pub use gate::{GateVerdict, MatrixGate};
pub use matrix::{expand, MatrixCell};
pub use outcome::{CellOutcome, PipelineReport};
pub use pipeline::{Pipeline, PipelineDeps};
pub use reporting::{
    ArchiveReceipt, CoveragePayload, CoverageStatus, CoverageUploader, HttpCoverageUploader,
    ReportingSink,
};
pub use runner::{
    log_file_name, report_file_name, CommandTestCapability, InstallRequest, InstalledPackage,
    TestCapability, TestExecutor, TestRequest, TestRunResult,
};
pub use summary::{render_summary_md, write_report_json, write_summary_md};
pub use telemetry::init_tracing;
pub use trigger::{TriggerEvent, TriggerKind};
pub use variant::{derive_variant_tag, VariantResolver, VariantTag};
pub use version::{parse_release_ref, resolve_release, ReleaseRef};
