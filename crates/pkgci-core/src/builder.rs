//! Build stage: version stamping, artifact build, and hand-off to the store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pkgci_store::ArtifactStore;
use tracing::info;

use crate::artifact::{ArtifactDescriptor, ArtifactPair, BuildOutput, BuiltArtifact};
use crate::command::{run_checked, Placeholders};
use crate::config::BuildConfig;
use crate::error::{PipelineError, Result};
use crate::version::ReleaseRef;

/// The package build capability.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Stamp `version` onto the build metadata. Called before `build` only
    /// for release triggers.
    async fn set_version(&self, version: &ReleaseRef) -> anyhow::Result<()>;

    /// Emit one wheel and one source archive into `out_dir`.
    async fn build(&self, out_dir: &Path) -> anyhow::Result<()>;
}

/// Builder that shells out to configured commands.
pub struct CommandBuilder {
    config: BuildConfig,
    timeout: Option<Duration>,
}

impl CommandBuilder {
    pub fn new(config: BuildConfig, timeout: Option<Duration>) -> Self {
        Self { config, timeout }
    }
}

#[async_trait]
impl PackageBuilder for CommandBuilder {
    async fn set_version(&self, version: &ReleaseRef) -> anyhow::Result<()> {
        let Some(template) = &self.config.version_command else {
            anyhow::bail!("release {version} requested but no version_command is configured");
        };
        let argv = Placeholders::new()
            .with("version", version.as_str())
            .render_argv(template);
        run_checked(&argv, Some(&self.config.source_dir), self.timeout).await?;
        Ok(())
    }

    async fn build(&self, out_dir: &Path) -> anyhow::Result<()> {
        let argv = Placeholders::new()
            .with("out_dir", out_dir.to_string_lossy())
            .render_argv(&self.config.command);
        run_checked(&argv, Some(&self.config.source_dir), self.timeout).await?;
        Ok(())
    }
}

/// Stamp (if releasing), build into a fresh `out_dir`, and verify the output.
///
/// Any failure here aborts the whole run.
pub async fn build_artifacts(
    builder: &dyn PackageBuilder,
    release: Option<&ReleaseRef>,
    out_dir: &Path,
    timeout: Option<Duration>,
) -> Result<BuildOutput> {
    if out_dir.exists() {
        tokio::fs::remove_dir_all(out_dir).await?;
    }
    tokio::fs::create_dir_all(out_dir).await?;

    if let Some(version) = release {
        info!(version = %version, "stamping release version");
        builder
            .set_version(version)
            .await
            .map_err(|e| PipelineError::SetVersion(format!("{e:#}")))?;
    }

    let build = builder.build(out_dir);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, build)
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: "build",
                secs: limit.as_secs(),
            })?,
        None => build.await,
    };
    result.map_err(|e| PipelineError::Build(format!("{e:#}")))?;

    let output = BuildOutput::collect(out_dir)?;
    info!(
        wheel = %output.wheel.file_name,
        source_archive = %output.source_archive.file_name,
        "build produced artifacts"
    );
    Ok(output)
}

/// Persist both built artifacts under their file names.
///
/// The matrix must not start until this returns.
pub async fn publish_artifacts(
    store: &dyn ArtifactStore,
    output: &BuildOutput,
) -> Result<ArtifactPair> {
    let wheel = publish_one(store, &output.wheel).await?;
    let source_archive = publish_one(store, &output.source_archive).await?;
    Ok(ArtifactPair::new(wheel, source_archive))
}

async fn publish_one(
    store: &dyn ArtifactStore,
    artifact: &BuiltArtifact,
) -> Result<ArtifactDescriptor> {
    let manifest = store
        .put_file(&artifact.file_name, &artifact.path)
        .await
        .map_err(|source| PipelineError::StoreArtifact {
            name: artifact.file_name.clone(),
            source,
        })?;
    Ok(ArtifactDescriptor::from_manifest(artifact.kind, &manifest))
}

/// Default build output directory under the work dir.
pub fn dist_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("dist")
}
