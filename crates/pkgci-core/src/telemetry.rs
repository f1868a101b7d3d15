//! Log output for the `pkgci` binary.
//!
//! Everything goes to stderr; stdout is reserved for command output such as
//! `pkgci matrix` listings.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Variable checked before `RUST_LOG` for filter directives.
pub const LOG_ENV: &str = "PKGCI_LOG";

/// Filter directives: `PKGCI_LOG`, then `RUST_LOG`, then `level`.
fn filter_directives<F>(lookup: F, level: Level) -> String
where
    F: Fn(&str) -> Option<String>,
{
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .filter_map(&lookup)
        .find(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| level.as_str().to_lowercase())
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let directives = filter_directives(|key| std::env::var(key).ok(), level);
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .is_ok()
}
