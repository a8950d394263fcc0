use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};

/// One record under an alias key.
///
/// Several records may share a key; lookups return them by descending rank.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub target: BlobHash,
    pub rank: i32,
    /// Small inline payload returned with the lookup.
    pub data: Vec<u8>,
}

impl Alias {
    pub fn new(target: BlobHash) -> Self {
        Self {
            target,
            rank: 0,
            data: Vec::new(),
        }
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }
}

/// Insert or replace (same target) a record, keeping descending rank order.
pub(crate) fn insert_alias(records: &mut Vec<Alias>, alias: Alias) {
    records.retain(|existing| existing.target != alias.target);
    let pos = records
        .iter()
        .position(|existing| existing.rank < alias.rank)
        .unwrap_or(records.len());
    records.insert(pos, alias);
}
