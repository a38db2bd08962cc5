//! Raw observations, the immutable input handed over by the extractor.
//!
//! An observation is one labelled cell lifted out of a source document, with
//! enough coordinates to cite it later. Observations are retained forever,
//! whether or not they survive resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  hashing::digest_parts, id::string_id, taxonomy::StatementCategory,
  value_type::ValueType,
};

string_id!(
  /// Stable identifier for a reporting company.
  CompanyId
);

string_id!(
  /// Stable identity of a source document, typically a content hash of the
  /// uploaded file so that re-uploads of the same bytes share an identity.
  DocumentId
);

string_id!(
  /// Deterministic identity of a raw observation (see
  /// [`RawObservation::observation_id`]).
  ObservationId
);

// ─── Source document ─────────────────────────────────────────────────────────

/// A document submitted for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
  pub document_id: DocumentId,
  pub company_id:  CompanyId,
  /// Original file name; also a period hint of last resort.
  pub filename:    Option<String>,
  /// When this document was (first) ingested. Stores keep the earliest value
  /// on re-ingestion.
  pub ingested_at: DateTime<Utc>,
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// Where in a document an observation was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
  pub document_id: DocumentId,
  pub page:        Option<u32>,
  /// Table title or identifier within the page.
  pub table:       Option<String>,
  pub row:         Option<u32>,
  pub column:      Option<u32>,
}

impl Provenance {
  /// Number of populated page/row/column coordinates (0–3).
  pub fn completeness(&self) -> u8 {
    [self.page.is_some(), self.row.is_some(), self.column.is_some()]
      .into_iter()
      .filter(|present| *present)
      .count() as u8
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Text surrounding an observation, ordered from most to least local.
///
/// Used for scale, currency, period, and value-type hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationContext {
  /// Annotation attached to the cell itself (e.g. `"£"`).
  pub cell:          Option<String>,
  /// Row-level annotation (e.g. a unit column).
  pub row:           Option<String>,
  /// Header of the column the value sits in (e.g. `"Feb 2025 Actual"`).
  pub column_header: Option<String>,
  /// Table title or caption (e.g. `"Profit and loss (£000)"`).
  pub table:         Option<String>,
  /// Document- or statement-level unit hint.
  pub document:      Option<String>,
  /// Free-form period hint supplied alongside the upload.
  pub period_hint:   Option<String>,
}

// ─── RawObservation ──────────────────────────────────────────────────────────

/// One extracted cell. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
  /// Owning document. Left empty by extractors that emit per-document batches;
  /// the pipeline stamps it from the [`SourceDocument`].
  #[serde(default)]
  pub document_id:           DocumentId,
  pub page:                  Option<u32>,
  pub table:                 Option<String>,
  pub row:                   Option<u32>,
  pub column:                Option<u32>,
  /// Row label as printed, e.g. `"Turnover (note 3)"`.
  pub label:                 String,
  /// Cell text as printed, e.g. `"(2,390,873)"`.
  pub value:                 String,
  /// Raw period text, usually the column header's date portion.
  #[serde(default)]
  pub period:                Option<String>,
  #[serde(default)]
  pub context:               ObservationContext,
  /// Extractor's own confidence in the cell read, if it reports one.
  #[serde(default)]
  pub extraction_confidence: Option<f64>,
  /// Value type when the extractor already knows it.
  #[serde(default)]
  pub value_type:            Option<ValueType>,
  /// Statement the row was read from, when known.
  #[serde(default)]
  pub statement:             Option<StatementCategory>,
}

impl RawObservation {
  /// Convenience constructor with every optional field unset.
  pub fn new(
    document_id: impl Into<DocumentId>,
    label: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    Self {
      document_id:           document_id.into(),
      page:                  None,
      table:                 None,
      row:                   None,
      column:                None,
      label:                 label.into(),
      value:                 value.into(),
      period:                None,
      context:               ObservationContext::default(),
      extraction_confidence: None,
      value_type:            None,
      statement:             None,
    }
  }

  /// Deterministic identity over the document, the coordinates, and the raw
  /// text. Re-extracting an unchanged document yields the same ids.
  pub fn observation_id(&self) -> ObservationId {
    let page = self.page.map(|p| p.to_string()).unwrap_or_default();
    let row = self.row.map(|r| r.to_string()).unwrap_or_default();
    let column = self.column.map(|c| c.to_string()).unwrap_or_default();
    ObservationId::new(digest_parts([
      self.document_id.as_str(),
      page.as_str(),
      self.table.as_deref().unwrap_or_default(),
      row.as_str(),
      column.as_str(),
      self.label.as_str(),
      self.value.as_str(),
      self.period.as_deref().unwrap_or_default(),
    ]))
  }

  pub fn provenance(&self) -> Provenance {
    Provenance {
      document_id: self.document_id.clone(),
      page:        self.page,
      table:       self.table.clone(),
      row:         self.row,
      column:      self.column,
    }
  }
}

/// Parse extractor output leniently: empty or malformed input is zero
/// observations, not an error.
pub fn parse_extractor_output(input: &str) -> Vec<RawObservation> {
  if input.trim().is_empty() {
    return Vec::new();
  }
  match serde_json::from_str::<Vec<RawObservation>>(input) {
    Ok(observations) => observations,
    Err(e) => {
      tracing::warn!(error = %e, "malformed extractor output; treating as empty");
      Vec::new()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn observation_id_is_deterministic() {
    let mut a = RawObservation::new("doc-1", "Revenue", "100");
    a.row = Some(4);
    let b = a.clone();
    assert_eq!(a.observation_id(), b.observation_id());

    let mut c = a.clone();
    c.row = Some(5);
    assert_ne!(a.observation_id(), c.observation_id());
  }

  #[test]
  fn provenance_completeness_counts_coordinates() {
    let mut obs = RawObservation::new("doc-1", "Revenue", "100");
    assert_eq!(obs.provenance().completeness(), 0);
    obs.page = Some(2);
    obs.column = Some(3);
    assert_eq!(obs.provenance().completeness(), 2);
  }

  #[test]
  fn malformed_extractor_output_is_empty() {
    assert!(parse_extractor_output("").is_empty());
    assert!(parse_extractor_output("{not json").is_empty());

    let parsed = parse_extractor_output(
      r#"[{"page":1,"table":null,"row":2,"column":3,"label":"Revenue","value":"1,000"}]"#,
    );
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].label, "Revenue");
    assert!(parsed[0].document_id.is_empty());
  }
}
