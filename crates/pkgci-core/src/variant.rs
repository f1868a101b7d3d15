//! Variant tag derivation.
//!
//! The tag is a pure function of the artifact's storage name. The operating
//! system of the cell plays no part, so every platform derives the same tag.

use serde::{Deserialize, Serialize};

use crate::matrix::MatrixCell;

/// Normalized classifier of an artifact's packaging kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum VariantTag {
    Wheel,
    SourceArchive,
}

impl VariantTag {
    /// Name used in persisted report and log file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantTag::Wheel => "wheel",
            VariantTag::SourceArchive => "sourceArchive",
        }
    }
}

impl std::fmt::Display for VariantTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip whitespace and any layers of matching shell quotes around `name`.
fn normalize_name(name: &str) -> &str {
    let mut name = name.trim();
    loop {
        let quoted = name.len() >= 2
            && ((name.starts_with('"') && name.ends_with('"'))
                || (name.starts_with('\'') && name.ends_with('\'')));
        if !quoted {
            return name;
        }
        name = name[1..name.len() - 1].trim();
    }
}

/// `.whl` means wheel; anything else is treated as a source archive.
pub fn derive_variant_tag(name: &str) -> VariantTag {
    if normalize_name(name).ends_with(".whl") {
        VariantTag::Wheel
    } else {
        VariantTag::SourceArchive
    }
}

/// Resolves the variant tag for a matrix cell.
pub struct VariantResolver;

impl VariantResolver {
    pub fn resolve(cell: &MatrixCell) -> VariantTag {
        derive_variant_tag(&cell.artifact.storage_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactPair;
    use crate::matrix::expand;

    #[test]
    fn test_suffix_classification() {
        assert_eq!(derive_variant_tag("pkg-2.3.1-py3-none-any.whl"), VariantTag::Wheel);
        assert_eq!(derive_variant_tag("pkg-2.3.1.tar.gz"), VariantTag::SourceArchive);
        assert_eq!(derive_variant_tag("pkg-2.3.1.zip"), VariantTag::SourceArchive);
        assert_eq!(derive_variant_tag(""), VariantTag::SourceArchive);
    }

    #[test]
    fn test_quoting_is_normalized() {
        assert_eq!(derive_variant_tag("\"pkg.whl\""), VariantTag::Wheel);
        assert_eq!(derive_variant_tag("'pkg.whl'"), VariantTag::Wheel);
        assert_eq!(derive_variant_tag("  \"'pkg.whl'\" \r\n"), VariantTag::Wheel);
        assert_eq!(derive_variant_tag("\"pkg.tar.gz\""), VariantTag::SourceArchive);
        // Unbalanced quotes are left alone.
        assert_eq!(derive_variant_tag("\"pkg.whl"), VariantTag::Wheel);
        assert_eq!(derive_variant_tag("pkg.whl'"), VariantTag::SourceArchive);
    }

    #[test]
    fn test_same_tag_on_every_platform() {
        let pair = ArtifactPair::from_names("pkg-1.0-py3-none-any.whl", "pkg-1.0.tar.gz");
        let os = vec![
            "ubuntu-latest".to_string(),
            "windows-latest".to_string(),
            "macos-latest".to_string(),
        ];
        let cells = expand(&["3.12".to_string()], &os, &pair).unwrap();

        for cell in &cells {
            let expected = match cell.artifact.storage_name.as_str() {
                "pkg-1.0-py3-none-any.whl" => VariantTag::Wheel,
                _ => VariantTag::SourceArchive,
            };
            assert_eq!(VariantResolver::resolve(cell), expected, "{}", cell.operating_system);
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(VariantTag::Wheel.to_string(), "wheel");
        assert_eq!(VariantTag::SourceArchive.to_string(), "sourceArchive");
        assert_eq!(
            serde_json::to_string(&VariantTag::SourceArchive).unwrap(),
            "\"sourceArchive\""
        );
    }
}
