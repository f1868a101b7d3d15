//! External command execution with placeholder templating.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

/// Placeholder values substituted into `{name}` tokens of an argv template.
#[derive(Debug, Clone, Default)]
pub struct Placeholders(BTreeMap<&'static str, String>);

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) -> &mut Self {
        self.0.insert(key, value.into());
        self
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Replace every known `{key}` in `template`. Unknown tokens are kept.
    pub fn render(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (key, value) in &self.0 {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }

    pub fn render_argv(&self, argv: &[String]) -> Vec<String> {
        argv.iter().map(|arg| self.render(arg)).collect()
    }
}

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Stdout and stderr in one block, for logs and error messages.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Run `argv` to completion, capturing output.
///
/// The child is killed if the returned future is dropped, so wrapping this in
/// a timeout (here or by the caller) never leaves orphaned processes behind.
pub async fn run_command(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> anyhow::Result<CommandOutput> {
    run_command_with_env(argv, cwd, &[], timeout).await
}

/// Like [`run_command`], with extra environment variables for the child.
pub async fn run_command_with_env(
    argv: &[String],
    cwd: Option<&Path>,
    env: &[(&str, String)],
    timeout: Option<Duration>,
) -> anyhow::Result<CommandOutput> {
    let start = Instant::now();

    let Some((exe, args)) = argv.split_first() else {
        anyhow::bail!("empty command");
    };

    debug!(command = ?argv, "spawning command");

    let mut command = Command::new(exe);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(env.iter().map(|(key, value)| (*key, value.as_str())))
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let child = command
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {exe}: {e}"))?;

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("{} timed out after {} seconds", exe, limit.as_secs())
            })??,
        None => child.wait_with_output().await?,
    };

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    })
}

/// Run `argv` and fail unless it exits with code 0.
pub async fn run_checked(
    argv: &[String],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> anyhow::Result<CommandOutput> {
    let output = run_command(argv, cwd, timeout).await?;
    if !output.passed() {
        anyhow::bail!(
            "`{}` exited with code {}: {}",
            argv.join(" "),
            output.exit_code,
            output.combined().trim()
        );
    }
    Ok(output)
}
