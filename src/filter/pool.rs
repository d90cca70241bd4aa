// pool.rs — Source expressions and their candidate paraphrases, in input order.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

/// One source expression with its distinct candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub source: String,
    pub candidates: Vec<String>,
}

/// Ordered mapping source → candidate set.
///
/// Candidates are deduplicated on insert (first occurrence kept); a source seen
/// twice has its candidates merged into the first entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParaphrasePool {
    entries: Vec<PoolEntry>,
    // source → position in `entries`, and the candidate set of each entry
    index: HashMap<String, usize>,
    seen: Vec<HashSet<String>>,
}

impl ParaphrasePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&mut self, source: &str, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let idx = match self.index.get(source) {
            Some(&idx) => idx,
            None => {
                self.entries.push(PoolEntry {
                    source: source.to_string(),
                    candidates: Vec::new(),
                });
                self.seen.push(HashSet::new());
                let idx = self.entries.len() - 1;
                self.index.insert(source.to_string(), idx);
                idx
            }
        };
        let entry = &mut self.entries[idx];
        let seen = &mut self.seen[idx];
        for candidate in candidates {
            let candidate = candidate.into();
            if !seen.contains(&candidate) {
                seen.insert(candidate.clone());
                entry.candidates.push(candidate);
            }
        }
    }

    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn candidate_count(&self) -> usize {
        self.entries.iter().map(|e| e.candidates.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: String,
    pub score: f32,
}

/// Filter outcome for one source expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilteredEntry {
    pub source: String,
    pub kept: Vec<ScoredCandidate>,
    /// Candidates scored and rejected by the policy.
    pub rejected: usize,
    /// Empty candidates, never sent to the encoder.
    pub skipped: usize,
    /// Set when the entry stopped on an embedding or scoring error. `kept` and
    /// `rejected` then cover only the candidates scored before it.
    pub error: Option<String>,
}

#[cfg(test)]
impl FilteredEntry {
    pub fn kept_candidates(&self) -> impl Iterator<Item = &str> {
        self.kept.iter().map(|c| c.candidate.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub entries: usize,
    pub failed: usize,
    pub kept: usize,
    pub rejected: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredPool {
    pub entries: Vec<FilteredEntry>,
}

impl FilteredPool {
    #[cfg(test)]
    pub fn get(&self, source: &str) -> Option<&FilteredEntry> {
        self.entries.iter().find(|e| e.source == source)
    }

    pub fn summary(&self) -> FilterSummary {
        self.entries.iter().fold(FilterSummary::default(), |mut s, e| {
            s.entries += 1;
            s.failed += usize::from(e.error.is_some());
            s.kept += e.kept.len();
            s.rejected += e.rejected;
            s.skipped += e.skipped;
            s
        })
    }
}
