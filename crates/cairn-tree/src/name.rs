//! Entry names and how they are compared.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};

/// How entry names are matched on lookup, replacement and removal.
///
/// Stored names always keep their case and are always serialized in byte
/// order; the policy only decides which names count as the same entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameComparison {
    #[default]
    CaseSensitive,
    /// ASCII case folding, matching the usual behaviour of case-insensitive
    /// filesystems for ASCII names.
    CaseInsensitive,
}

impl NameComparison {
    pub fn eq(&self, a: &str, b: &str) -> bool {
        match self {
            Self::CaseSensitive => a == b,
            Self::CaseInsensitive => a.eq_ignore_ascii_case(b),
        }
    }

    pub fn cmp(&self, a: &str, b: &str) -> Ordering {
        match self {
            Self::CaseSensitive => a.cmp(b),
            Self::CaseInsensitive => a
                .bytes()
                .map(|b| b.to_ascii_lowercase())
                .cmp(b.bytes().map(|b| b.to_ascii_lowercase())),
        }
    }
}

/// Validate a single path component.
pub fn validate_entry_name(name: &str) -> TreeResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains('/') || name.contains('\\') {
        "name contains a path separator"
    } else if name.contains('\0') {
        "name contains NUL"
    } else {
        return Ok(());
    };
    Err(TreeError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}
