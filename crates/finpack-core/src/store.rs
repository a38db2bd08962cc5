//! The `FactStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `finpack-store-sqlite`).
//! The pipeline and the API depend on this abstraction, not on any concrete
//! backend.

use std::{collections::HashSet, future::Future};

use chrono::NaiveDate;

use crate::{
  fact::{CorroborationStatus, Fact, FactHash, FactRevision, NewFact, UpsertOutcome},
  finding::{Finding, FindingRun},
  observation::{CompanyId, DocumentId, RawObservation, SourceDocument},
  period::{Period, PeriodId},
  rejection::{NewRejection, Rejection, RejectionReason},
  taxonomy::LineItemId,
  value_type::ValueType,
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`FactStore::list_facts`].
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
  pub company_id:   Option<CompanyId>,
  pub line_item_id: Option<LineItemId>,
  pub value_type:   Option<ValueType>,
  /// Exact period.
  pub period_id:    Option<PeriodId>,
  /// Inclusive lower bound on the period's end date.
  pub period_from:  Option<NaiveDate>,
  /// Inclusive upper bound on the period's end date.
  pub period_to:    Option<NaiveDate>,
}

/// Parameters for [`FactStore::list_rejections`].
#[derive(Debug, Clone, Default)]
pub struct RejectionQuery {
  pub company_id:  Option<CompanyId>,
  pub reason:      Option<RejectionReason>,
  pub document_id: Option<DocumentId>,
}

// ─── Error classification ────────────────────────────────────────────────────

/// Backend errors must say whether they are a uniqueness violation, so that
/// a racing upsert can be retried once.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn is_constraint_violation(&self) -> bool;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a fact store backend.
///
/// Observations, rejections, revisions, and finding runs are append-only.
/// Facts are unique by content hash; their value changes only through
/// [`FactStore::upsert_fact`], which records a [`FactRevision`], and their
/// corroboration status is the one field updated in place.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait FactStore: Send + Sync {
  type Error: StoreError;

  // ── Audit trail ───────────────────────────────────────────────────────

  /// Record a source document. Re-recording keeps the first `ingested_at`
  /// and returns the stored document.
  fn record_document(
    &self,
    document: SourceDocument,
  ) -> impl Future<Output = Result<SourceDocument, Self::Error>> + Send + '_;

  fn get_document(
    &self,
    document_id: DocumentId,
  ) -> impl Future<Output = Result<Option<SourceDocument>, Self::Error>> + Send + '_;

  /// Persist a raw observation. A no-op when its id is already stored.
  fn record_observation(
    &self,
    company_id: CompanyId,
    observation: RawObservation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Observations of one document, in coordinate order.
  fn list_observations(
    &self,
    document_id: DocumentId,
  ) -> impl Future<Output = Result<Vec<RawObservation>, Self::Error>> + Send + '_;

  // ── Periods ───────────────────────────────────────────────────────────

  /// Insert the period if its id is new. Periods are immutable, so an
  /// existing row is returned unchanged.
  fn ensure_period(
    &self,
    period: Period,
  ) -> impl Future<Output = Result<Period, Self::Error>> + Send + '_;

  fn get_period(
    &self,
    period_id: PeriodId,
  ) -> impl Future<Output = Result<Option<Period>, Self::Error>> + Send + '_;

  fn list_periods(
    &self,
  ) -> impl Future<Output = Result<Vec<Period>, Self::Error>> + Send + '_;

  /// Mark a period label closed for a company. Idempotent.
  fn close_period(
    &self,
    company_id: CompanyId,
    label: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn closed_periods(
    &self,
    company_id: CompanyId,
  ) -> impl Future<Output = Result<HashSet<String>, Self::Error>> + Send + '_;

  // ── Facts ─────────────────────────────────────────────────────────────

  /// Hash-keyed upsert. Must be atomic: a concurrent writer of the same hash
  /// either sees this row or fails with a constraint violation.
  fn upsert_fact(
    &self,
    input: NewFact,
  ) -> impl Future<Output = Result<UpsertOutcome, Self::Error>> + Send + '_;

  fn get_fact(
    &self,
    content_hash: FactHash,
  ) -> impl Future<Output = Result<Option<Fact>, Self::Error>> + Send + '_;

  fn list_facts<'a>(
    &'a self,
    query: &'a FactQuery,
  ) -> impl Future<Output = Result<Vec<Fact>, Self::Error>> + Send + 'a;

  fn fact_revisions(
    &self,
    content_hash: FactHash,
  ) -> impl Future<Output = Result<Vec<FactRevision>, Self::Error>> + Send + '_;

  /// Overwrite corroboration statuses in one transaction.
  fn set_corroboration_status(
    &self,
    statuses: Vec<(FactHash, CorroborationStatus)>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Rejections ────────────────────────────────────────────────────────

  /// Persist a rejection. Rejection ids are deterministic, so recording the
  /// same rejection twice returns the original record.
  fn record_rejection(
    &self,
    input: NewRejection,
  ) -> impl Future<Output = Result<Rejection, Self::Error>> + Send + '_;

  fn list_rejections<'a>(
    &'a self,
    query: &'a RejectionQuery,
  ) -> impl Future<Output = Result<Vec<Rejection>, Self::Error>> + Send + 'a;

  // ── Findings ──────────────────────────────────────────────────────────

  /// Store a run and mark every earlier active finding of the company as
  /// superseded by it.
  fn replace_findings(
    &self,
    run: FindingRun,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_findings(
    &self,
    company_id: CompanyId,
    include_superseded: bool,
  ) -> impl Future<Output = Result<Vec<Finding>, Self::Error>> + Send + '_;
}
