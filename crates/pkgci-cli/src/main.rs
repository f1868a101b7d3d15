//! pkgci - build-and-verify pipeline CLI
//!
//! ## Commands
//!
//! - `run`: build, store and test the package across the whole matrix
//! - `matrix`: print the cells a run would execute
//! - `variant`: show the variant tag derived from an artifact name
//! - `version`: show the release version a git ref resolves to
//! - `store`: put, get and prune blobs in the artifact store
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use uuid::Uuid;

use pkgci_core::{
    derive_variant_tag, expand, log_file_name, parse_release_ref, report_file_name,
    write_report_json, write_summary_md, ArtifactPair, CommandBuilder, CommandTestCapability,
    CoverageUploader, HttpCoverageUploader, Pipeline, PipelineConfig, PipelineDeps,
    PipelineReport, TriggerEvent, TriggerKind, VariantResolver,
};
use pkgci_store::{ArtifactStore, FsArtifactStore};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "pkgci.toml";

#[derive(Parser)]
#[command(name = "pkgci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-and-verify pipeline for Python packages", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "PKGCI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: build, store, test matrix, report
    Run {
        /// Trigger kind (defaults to GITHUB_EVENT_NAME, or manual)
        #[arg(long)]
        event: Option<String>,

        /// Git ref that triggered the run
        #[arg(long = "ref", env = "GITHUB_REF")]
        git_ref: Option<String>,

        /// Override runtime versions (repeatable)
        #[arg(long = "runtime")]
        runtimes: Vec<String>,

        /// Override operating systems (repeatable)
        #[arg(long = "os")]
        systems: Vec<String>,

        /// Directory for pipeline_report.json and summary.md
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Print the matrix cells for a pair of artifact names as JSON
    Matrix {
        /// Wheel file name
        #[arg(long)]
        wheel: String,

        /// Source archive file name
        #[arg(long)]
        sdist: String,

        /// Override runtime versions (repeatable)
        #[arg(long = "runtime")]
        runtimes: Vec<String>,

        /// Override operating systems (repeatable)
        #[arg(long = "os")]
        systems: Vec<String>,
    },

    /// Show the variant tag for an artifact file name
    Variant {
        /// Artifact file name, possibly quoted
        name: String,
    },

    /// Show the release version a git ref resolves to
    Version {
        /// Git ref, e.g. refs/tags/v2.3.1
        #[arg(long = "ref", env = "GITHUB_REF")]
        git_ref: Option<String>,
    },

    /// Artifact store operations
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum StoreAction {
    /// Store a file under a name
    Put {
        name: String,
        file: PathBuf,

        /// Run whose store to use
        #[arg(long)]
        run: Option<String>,
    },

    /// Fetch a blob by name
    Get {
        name: String,

        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run whose store to use
        #[arg(long)]
        run: Option<String>,
    },

    /// Delete blobs past their retention in every run store
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pkgci_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            event,
            git_ref,
            runtimes,
            systems,
            output_dir,
        } => {
            let trigger = resolve_trigger(event.as_deref(), git_ref, |k| std::env::var(k).ok())?;
            let config = with_overrides(config, runtimes, systems);
            let report = cmd_run(config, &trigger, &output_dir).await?;
            if report.success {
                println!("\n✓ All cells passed!");
                Ok(())
            } else {
                anyhow::bail!(
                    "pipeline failed: {} of {} cells failed",
                    report.failed_count(),
                    report.cells.len()
                )
            }
        }
        Commands::Matrix {
            wheel,
            sdist,
            runtimes,
            systems,
        } => {
            let config = with_overrides(config, runtimes, systems);
            let planned = plan_matrix(&config, &wheel, &sdist)?;
            println!("{}", serde_json::to_string_pretty(&planned)?);
            Ok(())
        }
        Commands::Variant { name } => {
            println!("{}", derive_variant_tag(&name));
            Ok(())
        }
        Commands::Version { git_ref } => {
            match git_ref.as_deref().and_then(parse_release_ref) {
                Some(version) => println!("{}", version),
                None => println!("(no release)"),
            }
            Ok(())
        }
        Commands::Store { action } => match action {
            StoreAction::Put { name, file, run } => {
                let store = open_store(&config, run.as_deref())?;
                let manifest = store
                    .put_file(&name, &file)
                    .await
                    .with_context(|| format!("store {:?} as {}", file, name))?;
                println!("{} {} ({} bytes)", manifest.name, manifest.digest, manifest.size_bytes);
                Ok(())
            }
            StoreAction::Get { name, output, run } => {
                let store = open_store(&config, run.as_deref())?;
                let data = store
                    .get(&name)
                    .await
                    .with_context(|| format!("fetch {}", name))?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, &data).with_context(|| format!("write {:?}", path))?
                    }
                    None => std::io::stdout().write_all(&data)?,
                }
                Ok(())
            }
            StoreAction::Prune => {
                let pruned = cmd_prune(&config).await?;
                println!("Pruned {} expired blob(s)", pruned.len());
                for name in pruned {
                    println!("  - {}", name);
                }
                Ok(())
            }
        },
        Commands::Config => {
            print!(
                "{}",
                toml::to_string_pretty(&config).context("serialize config")?
            );
            Ok(())
        }
    }
}

/// Load `path`, or `pkgci.toml` if present, or fall back to defaults.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(PipelineConfig::default());
            }
            default
        }
    };
    PipelineConfig::load(&path).with_context(|| format!("load config {:?}", path))
}

fn with_overrides(
    mut config: PipelineConfig,
    runtimes: Vec<String>,
    systems: Vec<String>,
) -> PipelineConfig {
    if !runtimes.is_empty() {
        config.runtime_versions = runtimes;
    }
    if !systems.is_empty() {
        config.operating_systems = systems;
    }
    config
}

/// Build the trigger from `--event`/`--ref`, falling back to the CI
/// environment read through `lookup`.
fn resolve_trigger<F>(
    event: Option<&str>,
    git_ref: Option<String>,
    lookup: F,
) -> Result<TriggerEvent>
where
    F: Fn(&str) -> Option<String>,
{
    let mut trigger = match event {
        Some(event) => TriggerEvent {
            kind: event.parse::<TriggerKind>().map_err(anyhow::Error::msg)?,
            git_ref: None,
        },
        None => TriggerEvent::from_lookup(lookup).map_err(anyhow::Error::msg)?,
    };
    if let Some(git_ref) = git_ref.filter(|r| !r.is_empty()) {
        trigger.git_ref = Some(git_ref);
    }
    Ok(trigger)
}

/// Store for one run, or the store root itself when no run is given.
fn open_store(config: &PipelineConfig, run: Option<&str>) -> Result<FsArtifactStore> {
    let root = match run {
        Some(run) => config.store.root.join(run),
        None => config.store.root.clone(),
    };
    FsArtifactStore::with_retention(&root, config.retention())
        .with_context(|| format!("open artifact store {:?}", root))
}

#[derive(Debug, Serialize)]
struct PlannedCell {
    index: usize,
    runtime_version: String,
    operating_system: String,
    artifact: String,
    variant: String,
    report: String,
    log: String,
}

fn plan_matrix(config: &PipelineConfig, wheel: &str, sdist: &str) -> Result<Vec<PlannedCell>> {
    let pair = ArtifactPair::from_names(wheel, sdist);
    let cells = expand(&config.runtime_versions, &config.operating_systems, &pair)?;
    Ok(cells
        .into_iter()
        .map(|cell| {
            let variant = VariantResolver::resolve(&cell);
            PlannedCell {
                index: cell.index,
                report: report_file_name(&cell.operating_system, &cell.runtime_version, variant),
                log: log_file_name(&cell.operating_system, &cell.runtime_version, variant),
                variant: variant.to_string(),
                artifact: cell.artifact.storage_name.clone(),
                runtime_version: cell.runtime_version,
                operating_system: cell.operating_system,
            }
        })
        .collect())
}

async fn cmd_run(
    config: PipelineConfig,
    trigger: &TriggerEvent,
    output_dir: &Path,
) -> Result<PipelineReport> {
    let run_id = Uuid::new_v4();
    let store = Arc::new(open_store(&config, Some(&run_id.to_string()))?);
    let builder = Arc::new(CommandBuilder::new(
        config.build.clone(),
        config.build_timeout(),
    ));
    let tests = Arc::new(
        CommandTestCapability::new(config.test.clone()).context("configure test runner")?,
    );
    let uploader = match &config.coverage.endpoint {
        Some(endpoint) => Some(Arc::new(
            HttpCoverageUploader::new(endpoint.clone()).context("create coverage client")?,
        ) as Arc<dyn CoverageUploader>),
        None => None,
    };

    let deps = PipelineDeps {
        builder,
        store,
        tests,
        uploader,
        coverage_token: config.coverage.token(),
    };

    println!("Running pipeline {}", run_id);
    println!("Trigger: {}", trigger.kind);
    if let Some(git_ref) = &trigger.git_ref {
        println!("Ref: {}", git_ref);
    }
    println!();

    let pipeline = Pipeline::new(config, deps)?.with_run_id(run_id);
    let report = pipeline
        .run(trigger)
        .await
        .context("pipeline aborted")?;

    for cell in &report.cells {
        let status = if cell.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status,
            cell.cell.slug(),
            cell.duration_ms,
            cell.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
    println!(
        "Summary: {}/{} cells passed",
        report.passed_count(),
        report.cells.len()
    );
    println!(
        "Gate: {}",
        if report.verdict.passed { "✓ PASSED" } else { "✗ FAILED" }
    );
    if !report.verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &report.verdict.violations {
            println!("  - {}", violation);
        }
    }

    std::fs::create_dir_all(output_dir).with_context(|| format!("create {:?}", output_dir))?;
    write_report_json(&output_dir.join("pipeline_report.json"), &report)?;
    let summary_path = output_dir.join("summary.md");
    write_summary_md(&summary_path, &report)?;
    append_step_summary(&summary_path)?;
    info!(output_dir = %output_dir.display(), "wrote pipeline report and summary");

    Ok(report)
}

/// Append summary.md to the CI job summary when `GITHUB_STEP_SUMMARY` is set.
fn append_step_summary(summary_path: &Path) -> Result<()> {
    let Some(target) = std::env::var_os("GITHUB_STEP_SUMMARY") else {
        return Ok(());
    };
    let md = std::fs::read_to_string(summary_path)
        .with_context(|| format!("read {:?}", summary_path))?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target)
        .with_context(|| format!("open {:?}", target))?;
    file.write_all(md.as_bytes())?;
    Ok(())
}

/// Prune the root store and every per-run store under it.
async fn cmd_prune(config: &PipelineConfig) -> Result<Vec<String>> {
    let root = &config.store.root;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut roots = vec![root.clone()];
    for entry in std::fs::read_dir(root).with_context(|| format!("read {:?}", root))? {
        let path = entry?.path();
        if path.join("manifests").is_dir() {
            roots.push(path);
        }
    }

    let now = chrono::Utc::now();
    let mut pruned = Vec::new();
    for store_root in roots {
        let store = FsArtifactStore::with_retention(&store_root, config.retention())
            .with_context(|| format!("open artifact store {:?}", store_root))?;
        pruned.extend(store.prune_expired(now).await?);
    }
    Ok(pruned)
}
