use serde::{Deserialize, Serialize};

use crate::filter::pool::{FilteredEntry, ScoredCandidate};

/// One input line: a source expression and its candidate paraphrases.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolRecord {
    pub source: String,
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// One output line per source expression.
#[derive(Debug, Serialize)]
pub struct FilteredRecord<'a> {
    pub source: &'a str,
    pub kept: &'a [ScoredCandidate],
    pub rejected: usize,
    pub skipped: usize,
    pub error: Option<&'a str>,
}

impl<'a> From<&'a FilteredEntry> for FilteredRecord<'a> {
    fn from(entry: &'a FilteredEntry) -> Self {
        Self {
            source: &entry.source,
            kept: &entry.kept,
            rejected: entry.rejected,
            skipped: entry.skipped,
            error: entry.error.as_deref(),
        }
    }
}
