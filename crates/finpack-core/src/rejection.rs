//! Rejections: the mandatory trace left by every observation that does not
//! become a fact.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  hashing::digest_parts,
  observation::{CompanyId, DocumentId, ObservationId},
};

/// Structured reason code. The snake_case form is the stable wire and
/// storage representation.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
  /// The label matched no canonical line item (including narrative text).
  TaxonomyUnmapped,
  /// No period, or conflicting period signals.
  PeriodAmbiguous,
  /// The value could not be parsed, or scale/currency evidence conflicts.
  ScaleUnresolved,
  /// Conflicting Actual/Budget/Prior/Forecast markers, or a derived
  /// variance column.
  ValueTypeAmbiguous,
  /// Another observation in the same batch produced the same fact hash with
  /// a different value.
  StorageConflict,
}

impl RejectionReason {
  pub const ALL: [Self; 5] = [
    Self::TaxonomyUnmapped,
    Self::PeriodAmbiguous,
    Self::ScaleUnresolved,
    Self::ValueTypeAmbiguous,
    Self::StorageConflict,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::TaxonomyUnmapped => "taxonomy_unmapped",
      Self::PeriodAmbiguous => "period_ambiguous",
      Self::ScaleUnresolved => "scale_unresolved",
      Self::ValueTypeAmbiguous => "value_type_ambiguous",
      Self::StorageConflict => "storage_conflict",
    }
  }
}

impl fmt::Display for RejectionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RejectionReason {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|r| r.as_str() == s)
      .ok_or_else(|| Error::UnknownDiscriminant {
        kind:  "rejection reason",
        value: s.to_owned(),
      })
  }
}

// ─── Stage outcome ───────────────────────────────────────────────────────────

/// A stage's refusal to resolve an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRejection {
  pub reason: RejectionReason,
  pub detail: String,
}

impl StageRejection {
  pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
    Self { reason, detail: detail.into() }
  }
}

/// Result type returned by every resolution stage.
pub type StageResult<T> = std::result::Result<T, StageRejection>;

// ─── Records ─────────────────────────────────────────────────────────────────

/// A persisted rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
  /// Deterministic over `(observation_id, reason)`; re-ingestion is a no-op.
  pub rejection_id:   String,
  pub company_id:     CompanyId,
  pub document_id:    DocumentId,
  pub observation_id: ObservationId,
  pub reason:         RejectionReason,
  pub detail:         String,
  /// Copied from the observation so the record reads on its own.
  pub label:          String,
  pub value_text:     String,
  pub rejected_at:    DateTime<Utc>,
}

/// Input to [`crate::store::FactStore::record_rejection`].
#[derive(Debug, Clone)]
pub struct NewRejection {
  pub company_id:     CompanyId,
  pub document_id:    DocumentId,
  pub observation_id: ObservationId,
  pub reason:         RejectionReason,
  pub detail:         String,
  pub label:          String,
  pub value_text:     String,
}

impl NewRejection {
  pub fn rejection_id(&self) -> String {
    digest_parts([self.observation_id.as_str(), self.reason.as_str()])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reason_codes_roundtrip_through_strings() {
    for reason in RejectionReason::ALL {
      assert_eq!(reason.as_str().parse::<RejectionReason>().unwrap(), reason);
      let json = serde_json::to_string(&reason).unwrap();
      assert_eq!(json, format!("\"{}\"", reason.as_str()));
    }
    assert!("dropped".parse::<RejectionReason>().is_err());
  }
}
