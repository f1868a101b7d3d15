//! Release version resolution.
//!
//! A pipeline stamps a release version only when it was triggered by a
//! `refs/tags/v<semver>` reference. Anything else, including malformed tags,
//! means "keep the development version"; resolution never fails.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::trigger::TriggerEvent;

/// Semantic version to stamp onto the build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseRef(String);

impl ReleaseRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn release_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^refs/tags/v(?P<semver>\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)$",
        )
        .expect("release tag pattern is valid")
    })
}

/// Extract the semantic version from a release tag ref.
pub fn parse_release_ref(git_ref: &str) -> Option<ReleaseRef> {
    release_tag_pattern()
        .captures(git_ref.trim())
        .and_then(|caps| caps.name("semver"))
        .map(|m| ReleaseRef(m.as_str().to_string()))
}

/// Decide the release version to stamp for `trigger`, if any.
pub fn resolve_release(trigger: &TriggerEvent) -> Option<ReleaseRef> {
    trigger.git_ref.as_deref().and_then(parse_release_ref)
}
