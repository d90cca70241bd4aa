// filter/ — Similarity filtering of paraphrase pools.
//
// For each pool entry the source is embedded once, then every candidate is
// embedded, scored against it and kept or rejected by the policy. Any embedding
// or scoring error stops that entry and is recorded on it; the rest of the pool
// still runs. Empty candidates are skipped with a warning and never embedded.

pub mod policy;
pub mod pool;
pub mod similarity;

use anyhow::Context;

use crate::embeddings::text_prep::normalize_utterance;
use crate::embeddings::Embedder;
use policy::{FilterPolicy, Thresholds};
use pool::{FilteredEntry, FilteredPool, ParaphrasePool, PoolEntry, ScoredCandidate};
use similarity::{checked_norm, cosine_similarity};

pub fn filter_pool(
    pool: &ParaphrasePool,
    embedder: &Embedder<'_>,
    policy: FilterPolicy,
    thresholds: &Thresholds,
) -> FilteredPool {
    log::info!(
        "Filtering {} sources / {} candidates ({} policy, lower={}, upper={}, {})",
        pool.len(),
        pool.candidate_count(),
        policy.name(),
        thresholds.lower,
        thresholds.upper,
        embedder.describe()
    );

    let entries = pool
        .entries()
        .iter()
        .map(|entry| filter_entry(entry, embedder, policy, thresholds))
        .collect();
    FilteredPool { entries }
}

fn filter_entry(
    entry: &PoolEntry,
    embedder: &Embedder<'_>,
    policy: FilterPolicy,
    thresholds: &Thresholds,
) -> FilteredEntry {
    let mut out = FilteredEntry {
        source: entry.source.clone(),
        ..Default::default()
    };

    let source_vec = match embed_scorable(embedder, &entry.source) {
        Ok(v) => v,
        Err(e) => {
            log::error!("Source '{}' failed, skipping its {} candidates: {:#}", entry.source, entry.candidates.len(), e);
            out.error = Some(format!("{e:#}"));
            return out;
        }
    };

    for candidate in &entry.candidates {
        if normalize_utterance(candidate).is_none() {
            log::warn!("Skipping empty candidate for source '{}'", entry.source);
            out.skipped += 1;
            continue;
        }

        let score = embedder
            .embed(candidate)
            .and_then(|v| Ok(cosine_similarity(&source_vec, v.as_slice())?));
        let score = match score {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "Source '{}' failed on candidate '{}' after {} scored: {:#}",
                    entry.source,
                    candidate,
                    out.kept.len() + out.rejected,
                    e
                );
                out.error = Some(format!("candidate '{candidate}': {e:#}"));
                return out;
            }
        };

        let keep = policy.keeps(score, thresholds);
        log::debug!("'{}' vs '{}' = {:.4} → {}", entry.source, candidate, score, if keep { "keep" } else { "reject" });
        if keep {
            out.kept.push(ScoredCandidate {
                candidate: candidate.clone(),
                score,
            });
        } else {
            out.rejected += 1;
        }
    }

    log::info!(
        "Source '{}': kept {}, rejected {}, skipped {}",
        entry.source,
        out.kept.len(),
        out.rejected,
        out.skipped
    );
    out
}

/// Embed the source and make sure later cosine calls cannot fail on its side.
fn embed_scorable(embedder: &Embedder<'_>, source: &str) -> anyhow::Result<Vec<f32>> {
    normalize_utterance(source).context("empty source expression")?;
    let vector = embedder.embed(source)?;
    checked_norm(vector.as_slice()).context("source vector cannot be scored")?;
    Ok(vector.as_slice().to_vec())
}
