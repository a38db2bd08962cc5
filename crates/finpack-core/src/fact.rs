//! Facts: persisted, mapped, normalised observations.
//!
//! A fact's identity is its content hash over (company, period, line item,
//! value type, source document). The store enforces uniqueness on that hash,
//! so re-ingesting a document can never duplicate a fact. Values are never
//! edited in place except through an upsert that also records a
//! [`FactRevision`].

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error,
  hashing::digest_parts,
  id::string_id,
  observation::{CompanyId, DocumentId, ObservationId, Provenance},
  period::PeriodId,
  scale::ScaleConfidence,
  taxonomy::LineItemId,
  value_type::ValueType,
};

string_id!(
  /// Hex SHA-256 dedup key of a fact.
  FactHash
);

// ─── Key ─────────────────────────────────────────────────────────────────────

/// The document-independent identity shared by competing facts. Best view
/// and corroboration both group by this key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactKey {
  pub company_id:   CompanyId,
  pub period_id:    PeriodId,
  pub line_item_id: LineItemId,
  pub value_type:   ValueType,
}

impl fmt::Display for FactKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{}/{}/{}",
      self.company_id, self.period_id, self.line_item_id, self.value_type
    )
  }
}

impl FactHash {
  /// Deterministic over the key and the source document.
  pub fn compute(key: &FactKey, document: &DocumentId) -> Self {
    Self::new(digest_parts([
      key.company_id.as_str(),
      key.period_id.as_str(),
      key.line_item_id.as_str(),
      key.value_type.as_str(),
      document.as_str(),
    ]))
  }
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Corroboration state of a fact. The only field a store updates in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorroborationStatus {
  /// Never corroborated.
  #[default]
  Pending,
  /// Only one source document reports this key.
  Uncorroborated,
  /// Agrees with every other document within tolerance.
  Corroborated,
  /// Part of at least one active finding.
  Disputed,
}

impl CorroborationStatus {
  pub const ALL: [Self; 4] =
    [Self::Pending, Self::Uncorroborated, Self::Corroborated, Self::Disputed];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Uncorroborated => "uncorroborated",
      Self::Corroborated => "corroborated",
      Self::Disputed => "disputed",
    }
  }
}

impl FromStr for CorroborationStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|v| v.as_str() == s)
      .ok_or_else(|| Error::UnknownDiscriminant {
        kind:  "corroboration status",
        value: s.to_owned(),
      })
  }
}

// ─── Fact ────────────────────────────────────────────────────────────────────

/// A persisted fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
  pub fact_id:              Uuid,
  pub content_hash:         FactHash,
  pub company_id:           CompanyId,
  pub period_id:            PeriodId,
  pub line_item_id:         LineItemId,
  pub value_type:           ValueType,
  /// Signed value in base currency units.
  pub value:                f64,
  pub multiplier:           f64,
  pub currency:             Option<String>,
  pub scale_confidence:     ScaleConfidence,
  pub taxonomy_confidence:  f64,
  pub provenance:           Provenance,
  pub observation_id:       ObservationId,
  /// First ingestion time of the source document.
  pub ingested_at:          DateTime<Utc>,
  /// When this row (or its latest revision) was written.
  pub recorded_at:          DateTime<Utc>,
  pub corroboration_status: CorroborationStatus,
}

impl Fact {
  pub fn key(&self) -> FactKey {
    FactKey {
      company_id:   self.company_id.clone(),
      period_id:    self.period_id.clone(),
      line_item_id: self.line_item_id.clone(),
      value_type:   self.value_type,
    }
  }

  pub fn document_id(&self) -> &DocumentId { &self.provenance.document_id }
}

/// Input to [`crate::store::FactStore::upsert_fact`]. The store assigns
/// `fact_id` and `recorded_at`.
#[derive(Debug, Clone)]
pub struct NewFact {
  pub key:                 FactKey,
  pub value:               f64,
  pub multiplier:          f64,
  pub currency:            Option<String>,
  pub scale_confidence:    ScaleConfidence,
  pub taxonomy_confidence: f64,
  pub provenance:          Provenance,
  pub observation_id:      ObservationId,
  pub ingested_at:         DateTime<Utc>,
}

impl NewFact {
  pub fn content_hash(&self) -> FactHash {
    FactHash::compute(&self.key, &self.provenance.document_id)
  }

  /// Build the persisted form.
  pub fn into_fact(self, fact_id: Uuid, recorded_at: DateTime<Utc>) -> Fact {
    let content_hash = self.content_hash();
    Fact {
      fact_id,
      content_hash,
      company_id: self.key.company_id,
      period_id: self.key.period_id,
      line_item_id: self.key.line_item_id,
      value_type: self.key.value_type,
      value: self.value,
      multiplier: self.multiplier,
      currency: self.currency,
      scale_confidence: self.scale_confidence,
      taxonomy_confidence: self.taxonomy_confidence,
      provenance: self.provenance,
      observation_id: self.observation_id,
      ingested_at: self.ingested_at,
      recorded_at,
      corroboration_status: CorroborationStatus::Pending,
    }
  }
}

// ─── Upsert outcome ──────────────────────────────────────────────────────────

/// A value change under an existing hash. Appended, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRevision {
  pub revision_id:             Uuid,
  pub content_hash:            FactHash,
  pub previous_value:          f64,
  pub new_value:               f64,
  pub previous_observation_id: ObservationId,
  pub new_observation_id:      ObservationId,
  pub revised_at:              DateTime<Utc>,
}

/// Result of a hash-keyed upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
  Inserted(Fact),
  /// Same hash, same value. Counts as success.
  AlreadyPresent(Fact),
  /// Same hash, different value: the value was replaced and a revision
  /// appended.
  Replaced { fact: Fact, revision: FactRevision },
}

impl UpsertOutcome {
  pub fn fact(&self) -> &Fact {
    match self {
      Self::Inserted(fact) | Self::AlreadyPresent(fact) => fact,
      Self::Replaced { fact, .. } => fact,
    }
  }
}

/// Values are equal for dedup purposes when they agree to within rounding
/// noise of the scale multiplication.
pub fn same_value(a: f64, b: f64) -> bool {
  let scale = a.abs().max(b.abs()).max(1.0);
  (a - b).abs() <= scale * 1e-9
}
