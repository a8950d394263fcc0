use std::collections::BTreeMap;

use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};

use crate::error::{RefError, Result};
use crate::names::{validate_alias_name, RefName};
use crate::types::{insert_alias, Alias};

/// Ref and alias state shared by the in-memory and file-backed stores.
/// Callers hold the store lock around every method.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct RefTable {
    #[serde(default)]
    refs: BTreeMap<RefName, BlobHash>,
    #[serde(default)]
    aliases: BTreeMap<String, Vec<Alias>>,
}

impl RefTable {
    pub fn get(&self, name: &RefName) -> Option<BlobHash> {
        self.refs.get(name).copied()
    }

    pub fn set(&mut self, name: &RefName, target: BlobHash) -> Option<BlobHash> {
        self.refs.insert(name.clone(), target)
    }

    pub fn remove(&mut self, name: &RefName) -> bool {
        self.refs.remove(name).is_some()
    }

    pub fn compare_and_swap(
        &mut self,
        name: &RefName,
        expected: Option<BlobHash>,
        new: Option<BlobHash>,
    ) -> Result<()> {
        let actual = self.get(name);
        if actual != expected {
            return Err(RefError::Conflict {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        match new {
            Some(target) => {
                self.set(name, target);
            }
            None => {
                self.remove(name);
            }
        }
        Ok(())
    }

    pub fn list(&self, prefix: &str) -> Vec<(RefName, BlobHash)> {
        self.refs
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, hash)| (name.clone(), *hash))
            .collect()
    }

    pub fn add_alias(&mut self, name: &str, alias: Alias) -> Result<()> {
        validate_alias_name(name)?;
        insert_alias(self.aliases.entry(name.to_string()).or_default(), alias);
        Ok(())
    }

    pub fn remove_alias(&mut self, name: &str, target: &BlobHash) -> bool {
        let Some(records) = self.aliases.get_mut(name) else {
            return false;
        };
        let before = records.len();
        records.retain(|alias| alias.target != *target);
        let removed = records.len() != before;
        if records.is_empty() {
            self.aliases.remove(name);
        }
        removed
    }

    pub fn find_aliases(&self, name: &str, max: usize) -> Vec<Alias> {
        self.aliases
            .get(name)
            .map(|records| records.iter().take(max).cloned().collect())
            .unwrap_or_default()
    }
}
