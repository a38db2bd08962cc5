//! Structured disagreements raised by corroboration.
//!
//! Findings are recomputed per company run. A run never edits an earlier
//! run's findings; it supersedes them. Each finding carries enough provenance
//! to cite both sides without going back to the raw evidence.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error,
  fact::{Fact, FactHash},
  hashing::digest_parts,
  observation::{CompanyId, DocumentId, ObservationId},
  period::PeriodId,
  taxonomy::LineItemId,
  value_type::ValueType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
  /// Two documents report different values for the same fact key.
  CrossDocumentDisagreement,
}

impl FindingKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::CrossDocumentDisagreement => "cross_document_disagreement",
    }
  }
}

impl FromStr for FindingKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cross_document_disagreement" => Ok(Self::CrossDocumentDisagreement),
      other => Err(Error::UnknownDiscriminant {
        kind:  "finding kind",
        value: other.to_owned(),
      }),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  /// The period is still open; figures may legitimately move.
  Normal,
  /// The period is closed; a changed figure is a restatement.
  Restatement,
}

impl Severity {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Normal => "normal",
      Self::Restatement => "restatement",
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Severity {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "normal" => Ok(Self::Normal),
      "restatement" => Ok(Self::Restatement),
      other => Err(Error::UnknownDiscriminant {
        kind:  "severity",
        value: other.to_owned(),
      }),
    }
  }
}

/// One side of a disagreement, citeable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingEvidence {
  pub content_hash:   FactHash,
  pub document_id:    DocumentId,
  pub page:           Option<u32>,
  pub table:          Option<String>,
  pub row:            Option<u32>,
  pub column:         Option<u32>,
  pub value:          f64,
  pub observation_id: ObservationId,
}

impl From<&Fact> for FindingEvidence {
  fn from(fact: &Fact) -> Self {
    Self {
      content_hash:   fact.content_hash.clone(),
      document_id:    fact.provenance.document_id.clone(),
      page:           fact.provenance.page,
      table:          fact.provenance.table.clone(),
      row:            fact.provenance.row,
      column:         fact.provenance.column,
      value:          fact.value,
      observation_id: fact.observation_id.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  /// Stable across runs for the same pair of facts.
  pub finding_key:         String,
  pub run_id:              Uuid,
  pub company_id:          CompanyId,
  pub period_id:           PeriodId,
  pub line_item_id:        LineItemId,
  pub value_type:          ValueType,
  pub kind:                FindingKind,
  pub severity:            Severity,
  /// Relative difference, `|a - b| / max(|a|, |b|)`.
  pub magnitude:           f64,
  pub absolute_difference: f64,
  /// Tolerance the pair was judged against.
  pub tolerance:           f64,
  /// Exactly two entries, ordered by document id.
  pub evidence:            Vec<FindingEvidence>,
  pub created_at:          DateTime<Utc>,
  /// Run that replaced this finding, if any.
  pub superseded_by:       Option<Uuid>,
}

impl Finding {
  /// Key over the unordered pair of fact hashes.
  pub fn key_for(a: &FactHash, b: &FactHash) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    digest_parts([first.as_str(), second.as_str()])
  }

  pub fn is_active(&self) -> bool { self.superseded_by.is_none() }
}

/// The complete output of one corroboration run for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRun {
  pub run_id:     Uuid,
  pub company_id: CompanyId,
  pub as_of:      DateTime<Utc>,
  pub findings:   Vec<Finding>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finding_key_ignores_pair_order() {
    let a = FactHash::new("aaa");
    let b = FactHash::new("bbb");
    assert_eq!(Finding::key_for(&a, &b), Finding::key_for(&b, &a));
    assert_ne!(Finding::key_for(&a, &b), Finding::key_for(&a, &a));
  }

  #[test]
  fn discriminants_parse() {
    assert_eq!("restatement".parse::<Severity>().unwrap(), Severity::Restatement);
    assert_eq!(
      "cross_document_disagreement".parse::<FindingKind>().unwrap(),
      FindingKind::CrossDocumentDisagreement
    );
    assert!("minor".parse::<Severity>().is_err());
  }
}
