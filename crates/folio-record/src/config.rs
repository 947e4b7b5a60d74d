use serde::{Deserialize, Serialize};

/// Configuration for record handles and their housekeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Prefix of the coalescing key under which a record's housekeeping is
    /// queued. The record id is appended after a colon.
    pub housekeeping_prefix: String,
    /// Keep per-term usage counts current.
    pub track_term_counts: bool,
    /// Ask the search indexer to reindex a record after each housekeeping
    /// run.
    pub reindex_on_change: bool,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            housekeeping_prefix: "record-housekeeping".into(),
            track_term_counts: true,
            reindex_on_change: true,
        }
    }
}

impl RecordConfig {
    pub fn housekeeping_key(&self, record: folio_types::RecordId) -> String {
        format!("{}:{}", self.housekeeping_prefix, record.get())
    }
}
