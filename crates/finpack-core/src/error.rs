//! Error types for `finpack-core`.
//!
//! Stage-local resolution failures are not errors; they are
//! [`crate::rejection::StageRejection`]s. This enum covers invalid reference
//! configuration, malformed requests, and loss of the fact store.

use thiserror::Error;

use crate::observation::{CompanyId, DocumentId};

#[derive(Debug, Error)]
pub enum Error {
  #[error("alias {alias:?} maps to both {first} and {second}")]
  ConflictingAlias {
    alias:  String,
    first:  String,
    second: String,
  },

  #[error("alias {alias:?} refers to unknown line item {target}")]
  UnknownLineItem { alias: String, target: String },

  #[error("duplicate line item id: {0}")]
  DuplicateLineItem(String),

  #[error("period alias {alias:?} does not name a single period: {detail}")]
  InvalidPeriodAlias { alias: String, detail: String },

  #[error("fiscal year start month must be 1-12, got {0}")]
  InvalidFiscalMonth(u32),

  #[error("tolerance must be a finite non-negative number, got {0}")]
  InvalidTolerance(f64),

  #[error("similarity threshold must lie in [0, 1], got {0}")]
  InvalidThreshold(f64),

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("observation belongs to document {found}, not {expected}")]
  DocumentMismatch {
    expected: DocumentId,
    found:    DocumentId,
  },

  #[error("document {document} is registered to {registered}, not {requested}")]
  DocumentCompany {
    document:   DocumentId,
    registered: CompanyId,
    requested:  CompanyId,
  },

  #[error("regex error: {0}")]
  Regex(#[from] regex::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The fact store failed. Aborts the current run; the run must be retried
  /// wholesale.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
