//! Ref name validation.
//!
//! Valid ref names:
//! - Must be non-empty
//! - Must not contain whitespace, control characters, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - Must not contain `..` or consecutive slashes (`//`)
//! - Must not start or end with `.` or `/`
//! - Must not end with `.lock`
//! - Components between slashes must not start with `.`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RefError, Result};

/// Characters that are forbidden anywhere in a ref name.
const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

fn invalid(name: &str, reason: impl Into<String>) -> RefError {
    RefError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a ref name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use cairn_refs::names::validate_ref_name;
///
/// assert!(validate_ref_name("builds/main/latest").is_ok());
/// assert!(validate_ref_name("").is_err());
/// assert!(validate_ref_name("bad..name").is_err());
/// ```
pub fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "ref name must not be empty"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
    }
    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid(name, "must not start or end with '.'"));
    }
    if name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(name, "must not start or end with '/'"));
    }
    if name.ends_with(".lock") {
        return Err(invalid(name, "must not end with '.lock'"));
    }
    if name.contains("//") {
        return Err(invalid(name, "must not contain consecutive slashes '//'"));
    }
    if let Some(component) = name.split('/').find(|c| c.starts_with('.')) {
        return Err(invalid(
            name,
            format!("component must not start with '.': {component:?}"),
        ));
    }
    Ok(())
}

/// Validate an alias key. Aliases are free-form but must be non-empty and
/// free of control characters.
pub fn validate_alias_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "alias name must not be empty"));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid(name, "alias name must not contain control characters"));
    }
    Ok(())
}

/// A validated ref name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RefName {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate_ref_name("main").is_ok());
        assert!(validate_ref_name("builds/ue5-main/12345").is_ok());
        assert!(validate_ref_name("v1.0").is_ok());
    }

    #[test]
    fn reject_empty_and_traversal() {
        assert!(validate_ref_name("").is_err());
        assert!(validate_ref_name("a..b").is_err());
        assert!(validate_ref_name("a//b").is_err());
    }

    #[test]
    fn reject_forbidden_chars() {
        for name in ["a b", "a\tb", "a~b", "a^b", "a:b", "a?b", "a*b", "a[b", "a\\b", "a\u{7}b"] {
            assert!(validate_ref_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn reject_boundaries() {
        assert!(validate_ref_name(".hidden").is_err());
        assert!(validate_ref_name("trailing.").is_err());
        assert!(validate_ref_name("/lead").is_err());
        assert!(validate_ref_name("trail/").is_err());
        assert!(validate_ref_name("main.lock").is_err());
        assert!(validate_ref_name("a/.b").is_err());
    }

    #[test]
    fn alias_names_are_free_form() {
        assert!(validate_alias_name("commit:12345 #tag").is_ok());
        assert!(validate_alias_name("").is_err());
        assert!(validate_alias_name("line\nbreak").is_err());
    }

    #[test]
    fn ref_name_serde_validates() {
        let name = RefName::new("builds/latest").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"builds/latest\"");
        assert_eq!(serde_json::from_str::<RefName>(&json).unwrap(), name);
        assert!(serde_json::from_str::<RefName>("\"bad..name\"").is_err());
    }
}
