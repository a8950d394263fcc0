//! Layer identifiers.
//!
//! A layer id names a manifest file under the control directory, so it is
//! restricted to ASCII letters, digits, `-`, `_` and `.`, must not start
//! with `.`, and is at most 64 characters long.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{WorkspaceError, WorkspaceResult};

const MAX_LEN: usize = 64;

fn invalid(id: &str, reason: &str) -> WorkspaceError {
    WorkspaceError::InvalidLayer {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

/// Validated name of a workspace layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> WorkspaceResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(invalid(&id, "layer id must not be empty"));
        }
        if id.len() > MAX_LEN {
            return Err(invalid(&id, "layer id is longer than 64 characters"));
        }
        if id.starts_with('.') {
            return Err(invalid(&id, "layer id must not start with '.'"));
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(invalid(&id, "layer id may only contain [A-Za-z0-9._-]"));
        }
        Ok(Self(id))
    }

    /// The layer used when none is named.
    pub fn default_layer() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::default_layer()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LayerId {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> WorkspaceResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for LayerId {
    type Error = WorkspaceError;

    fn try_from(s: String) -> WorkspaceResult<Self> {
        Self::new(s)
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        for ok in ["default", "tools", "engine-binaries", "v1.2_win64"] {
            assert_eq!(LayerId::new(ok).unwrap().as_str(), ok);
        }
    }

    #[test]
    fn rejects_unsafe_ids() {
        let long = "x".repeat(65);
        for bad in ["", ".hidden", "a/b", "a b", "..", "tab\t", long.as_str()] {
            assert!(
                matches!(LayerId::new(bad), Err(WorkspaceError::InvalidLayer { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn parses_from_str() {
        let id: LayerId = "tools".parse().unwrap();
        assert_eq!(id.to_string(), "tools");
        assert_eq!(LayerId::default().as_str(), "default");
    }
}
