//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings and calendar dates are `YYYY-MM-DD`.
//! Observations and finding evidence are stored as compact JSON. Enumerations
//! use their `as_str` codes.

use chrono::{DateTime, NaiveDate, Utc};
use finpack_core::{
  fact::{Fact, FactHash, FactRevision},
  finding::{Finding, FindingEvidence},
  observation::{Provenance, SourceDocument},
  period::{Period, PeriodScope, PeriodType},
  rejection::Rejection,
  scale::ScaleConfidence,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── Dates ───────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Period discriminants ────────────────────────────────────────────────────

pub fn decode_period_type(s: &str) -> Result<PeriodType> {
  match s {
    "month" => Ok(PeriodType::Month),
    "quarter" => Ok(PeriodType::Quarter),
    "year" => Ok(PeriodType::Year),
    other => Err(Error::Decode { kind: "period type", value: other.to_owned() }),
  }
}

pub fn decode_period_scope(s: &str) -> Result<PeriodScope> {
  match s {
    "period" => Ok(PeriodScope::Period),
    "ytd" => Ok(PeriodScope::Ytd),
    "fy" => Ok(PeriodScope::Fy),
    "ltm" => Ok(PeriodScope::Ltm),
    other => Err(Error::Decode { kind: "period scope", value: other.to_owned() }),
  }
}

pub fn decode_scale_confidence(s: &str) -> Result<ScaleConfidence> {
  ScaleConfidence::parse(s)
    .ok_or_else(|| Error::Decode { kind: "scale confidence", value: s.to_owned() })
}

// ─── Optional coordinates ────────────────────────────────────────────────────

/// SQLite integers are `i64`; page/row/column are small and non-negative.
pub fn decode_coord(v: Option<i64>) -> Option<u32> { v.and_then(|v| u32::try_from(v).ok()) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub struct RawDocument {
  pub document_id: String,
  pub company_id:  String,
  pub filename:    Option<String>,
  pub ingested_at: String,
}

impl RawDocument {
  pub fn into_document(self) -> Result<SourceDocument> {
    Ok(SourceDocument {
      document_id: self.document_id.into(),
      company_id:  self.company_id.into(),
      filename:    self.filename,
      ingested_at: decode_dt(&self.ingested_at)?,
    })
  }
}

pub struct RawPeriod {
  pub period_id:   String,
  pub period_type: String,
  pub label:       String,
  pub start_date:  String,
  pub end_date:    String,
  pub scope:       String,
}

impl RawPeriod {
  pub const COLUMNS: &'static str = "period_id, period_type, label, start_date, end_date, scope";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      period_id:   row.get(0)?,
      period_type: row.get(1)?,
      label:       row.get(2)?,
      start_date:  row.get(3)?,
      end_date:    row.get(4)?,
      scope:       row.get(5)?,
    })
  }

  pub fn into_period(self) -> Result<Period> {
    Ok(Period {
      period_id:   self.period_id.into(),
      period_type: decode_period_type(&self.period_type)?,
      label:       self.label,
      start:       decode_date(&self.start_date)?,
      end:         decode_date(&self.end_date)?,
      scope:       decode_period_scope(&self.scope)?,
    })
  }
}

/// Raw values read directly from a `facts` row.
pub struct RawFact {
  pub fact_id:              String,
  pub content_hash:         String,
  pub company_id:           String,
  pub period_id:            String,
  pub line_item_id:         String,
  pub value_type:           String,
  pub value:                f64,
  pub multiplier:           f64,
  pub currency:             Option<String>,
  pub scale_confidence:     String,
  pub taxonomy_confidence:  f64,
  pub document_id:          String,
  pub page:                 Option<i64>,
  pub table_name:           Option<String>,
  pub row_no:               Option<i64>,
  pub column_no:            Option<i64>,
  pub observation_id:       String,
  pub ingested_at:          String,
  pub recorded_at:          String,
  pub corroboration_status: String,
}

impl RawFact {
  /// Column list matching [`RawFact::from_row`], qualified with `f.`.
  pub const COLUMNS: &'static str = "f.fact_id, f.content_hash, f.company_id, f.period_id, \
     f.line_item_id, f.value_type, f.value, f.multiplier, f.currency, f.scale_confidence, \
     f.taxonomy_confidence, f.document_id, f.page, f.table_name, f.row_no, f.column_no, \
     f.observation_id, f.ingested_at, f.recorded_at, f.corroboration_status";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fact_id:              row.get(0)?,
      content_hash:         row.get(1)?,
      company_id:           row.get(2)?,
      period_id:            row.get(3)?,
      line_item_id:         row.get(4)?,
      value_type:           row.get(5)?,
      value:                row.get(6)?,
      multiplier:           row.get(7)?,
      currency:             row.get(8)?,
      scale_confidence:     row.get(9)?,
      taxonomy_confidence:  row.get(10)?,
      document_id:          row.get(11)?,
      page:                 row.get(12)?,
      table_name:           row.get(13)?,
      row_no:               row.get(14)?,
      column_no:            row.get(15)?,
      observation_id:       row.get(16)?,
      ingested_at:          row.get(17)?,
      recorded_at:          row.get(18)?,
      corroboration_status: row.get(19)?,
    })
  }

  pub fn into_fact(self) -> Result<Fact> {
    Ok(Fact {
      fact_id:              decode_uuid(&self.fact_id)?,
      content_hash:         FactHash::new(self.content_hash),
      company_id:           self.company_id.into(),
      period_id:            self.period_id.into(),
      line_item_id:         self.line_item_id.into(),
      value_type:           self.value_type.parse()?,
      value:                self.value,
      multiplier:           self.multiplier,
      currency:             self.currency,
      scale_confidence:     decode_scale_confidence(&self.scale_confidence)?,
      taxonomy_confidence:  self.taxonomy_confidence,
      provenance:           Provenance {
        document_id: self.document_id.into(),
        page:        decode_coord(self.page),
        table:       self.table_name,
        row:         decode_coord(self.row_no),
        column:      decode_coord(self.column_no),
      },
      observation_id:       self.observation_id.into(),
      ingested_at:          decode_dt(&self.ingested_at)?,
      recorded_at:          decode_dt(&self.recorded_at)?,
      corroboration_status: self.corroboration_status.parse()?,
    })
  }
}

pub struct RawRevision {
  pub revision_id:             String,
  pub content_hash:            String,
  pub previous_value:          f64,
  pub new_value:               f64,
  pub previous_observation_id: String,
  pub new_observation_id:      String,
  pub revised_at:              String,
}

impl RawRevision {
  pub fn into_revision(self) -> Result<FactRevision> {
    Ok(FactRevision {
      revision_id:             decode_uuid(&self.revision_id)?,
      content_hash:            FactHash::new(self.content_hash),
      previous_value:          self.previous_value,
      new_value:               self.new_value,
      previous_observation_id: self.previous_observation_id.into(),
      new_observation_id:      self.new_observation_id.into(),
      revised_at:              decode_dt(&self.revised_at)?,
    })
  }
}

pub struct RawRejection {
  pub rejection_id:   String,
  pub company_id:     String,
  pub document_id:    String,
  pub observation_id: String,
  pub reason:         String,
  pub detail:         String,
  pub label:          String,
  pub value_text:     String,
  pub rejected_at:    String,
}

impl RawRejection {
  pub const COLUMNS: &'static str = "rejection_id, company_id, document_id, observation_id, \
     reason, detail, label, value_text, rejected_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      rejection_id:   row.get(0)?,
      company_id:     row.get(1)?,
      document_id:    row.get(2)?,
      observation_id: row.get(3)?,
      reason:         row.get(4)?,
      detail:         row.get(5)?,
      label:          row.get(6)?,
      value_text:     row.get(7)?,
      rejected_at:    row.get(8)?,
    })
  }

  pub fn into_rejection(self) -> Result<Rejection> {
    Ok(Rejection {
      rejection_id:   self.rejection_id,
      company_id:     self.company_id.into(),
      document_id:    self.document_id.into(),
      observation_id: self.observation_id.into(),
      reason:         self.reason.parse()?,
      detail:         self.detail,
      label:          self.label,
      value_text:     self.value_text,
      rejected_at:    decode_dt(&self.rejected_at)?,
    })
  }
}

/// A `findings` row plus the id of the run that superseded it, if any.
pub struct RawFinding {
  pub finding_key:         String,
  pub run_id:              String,
  pub company_id:          String,
  pub period_id:           String,
  pub line_item_id:        String,
  pub value_type:          String,
  pub kind:                String,
  pub severity:            String,
  pub magnitude:           f64,
  pub absolute_difference: f64,
  pub tolerance:           f64,
  pub evidence_json:       String,
  pub created_at:          String,
  pub superseded_by:       Option<String>,
}

impl RawFinding {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      finding_key:         row.get(0)?,
      run_id:              row.get(1)?,
      company_id:          row.get(2)?,
      period_id:           row.get(3)?,
      line_item_id:        row.get(4)?,
      value_type:          row.get(5)?,
      kind:                row.get(6)?,
      severity:            row.get(7)?,
      magnitude:           row.get(8)?,
      absolute_difference: row.get(9)?,
      tolerance:           row.get(10)?,
      evidence_json:       row.get(11)?,
      created_at:          row.get(12)?,
      superseded_by:       row.get(13)?,
    })
  }

  pub fn into_finding(self) -> Result<Finding> {
    let evidence: Vec<FindingEvidence> = serde_json::from_str(&self.evidence_json)?;
    Ok(Finding {
      finding_key: self.finding_key,
      run_id: decode_uuid(&self.run_id)?,
      company_id: self.company_id.into(),
      period_id: self.period_id.into(),
      line_item_id: self.line_item_id.into(),
      value_type: self.value_type.parse()?,
      kind: self.kind.parse()?,
      severity: self.severity.parse()?,
      magnitude: self.magnitude,
      absolute_difference: self.absolute_difference,
      tolerance: self.tolerance,
      evidence,
      created_at: decode_dt(&self.created_at)?,
      superseded_by: self.superseded_by.as_deref().map(decode_uuid).transpose()?,
    })
  }
}
