//! The best view is the one fact treated as current truth for a key.
//!
//! A pure computed view over the append-only ledger. Nothing is written.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::fact::{Fact, FactKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BestView {
  Selected {
    fact:       Fact,
    /// Number of competing candidates, including the selected one.
    candidates: usize,
  },
  /// No fact exists for the key. A normal, reportable state.
  InsufficientEvidence { key: FactKey },
}

impl BestView {
  pub fn fact(&self) -> Option<&Fact> {
    match self {
      Self::Selected { fact, .. } => Some(fact),
      Self::InsufficientEvidence { .. } => None,
    }
  }
}

/// Preference order, most preferred first:
///
/// 1. explicit scale over assumed scale,
/// 2. the most recently ingested document,
/// 3. more complete provenance (page/row/column),
/// 4. then document id and content hash, so the result never depends on
///    input order.
fn preference(a: &Fact, b: &Fact) -> Ordering {
  b.scale_confidence
    .rank()
    .cmp(&a.scale_confidence.rank())
    .then_with(|| b.ingested_at.cmp(&a.ingested_at))
    .then_with(|| b.provenance.completeness().cmp(&a.provenance.completeness()))
    .then_with(|| a.provenance.document_id.cmp(&b.provenance.document_id))
    .then_with(|| a.content_hash.cmp(&b.content_hash))
}

/// Select the best fact among candidates that share `key`. Candidates under
/// any other key are ignored.
pub fn select(key: &FactKey, candidates: &[Fact]) -> BestView {
  let matching: Vec<&Fact> = candidates.iter().filter(|f| &f.key() == key).collect();
  match matching.iter().copied().min_by(|a, b| preference(a, b)) {
    Some(best) => BestView::Selected { fact: best.clone(), candidates: matching.len() },
    None => BestView::InsufficientEvidence { key: key.clone() },
  }
}
