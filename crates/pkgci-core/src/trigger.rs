//! Pipeline trigger events.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What started the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Manual invocation (`workflow_dispatch`)
    Manual,

    /// Code-review request (`pull_request`)
    CodeReview,

    /// Push of a branch or tag
    Push,
}

impl TriggerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::CodeReview => "code_review",
            TriggerKind::Push => "push",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    /// Accepts both our own names and the CI provider's event names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" | "workflow_dispatch" => Ok(TriggerKind::Manual),
            "code_review" | "pull_request" => Ok(TriggerKind::CodeReview),
            "push" => Ok(TriggerKind::Push),
            other => Err(format!("unknown trigger event: {other}")),
        }
    }
}

/// Trigger descriptor handed to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,

    /// Git ref for push events (e.g. `refs/tags/v2.3.1`, `refs/heads/master`)
    pub git_ref: Option<String>,
}

impl TriggerEvent {
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            git_ref: None,
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Push,
            git_ref: Some(git_ref.into()),
        }
    }

    /// Read `GITHUB_EVENT_NAME` / `GITHUB_REF` through `lookup`.
    ///
    /// A missing event name means a local, manual run.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = match lookup("GITHUB_EVENT_NAME") {
            Some(name) => name.parse()?,
            None => TriggerKind::Manual,
        };
        let git_ref = lookup("GITHUB_REF").filter(|r| !r.is_empty());
        Ok(Self { kind, git_ref })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_kind_parses_provider_names() {
        assert_eq!("workflow_dispatch".parse::<TriggerKind>(), Ok(TriggerKind::Manual));
        assert_eq!("pull_request".parse::<TriggerKind>(), Ok(TriggerKind::CodeReview));
        assert_eq!("push".parse::<TriggerKind>(), Ok(TriggerKind::Push));
        assert!("schedule".parse::<TriggerKind>().is_err());
    }

    #[test]
    fn test_from_lookup_push_tag() {
        let env: HashMap<&str, &str> = [
            ("GITHUB_EVENT_NAME", "push"),
            ("GITHUB_REF", "refs/tags/v2.3.1"),
        ]
        .into_iter()
        .collect();
        let trigger = TriggerEvent::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(trigger, TriggerEvent::push("refs/tags/v2.3.1"));
    }

    #[test]
    fn test_from_lookup_defaults_to_manual() {
        let trigger = TriggerEvent::from_lookup(|_| None).unwrap();
        assert_eq!(trigger, TriggerEvent::manual());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&TriggerKind::CodeReview).unwrap();
        assert_eq!(json, "\"code_review\"");
    }
}
