//! End-to-end pipeline runs against an in-memory `SqliteStore`.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use chrono::{DateTime, TimeZone, Utc};
use finpack_core::{
  best_view::BestView,
  config::{CorroborationConfig, PipelineConfig, ReferenceSnapshot},
  corroboration::ClosurePolicy,
  fact::{CorroborationStatus, Fact, FactHash, FactKey, FactRevision, NewFact, UpsertOutcome},
  finding::{Finding, FindingRun, Severity},
  observation::{CompanyId, DocumentId, ObservationContext, RawObservation, SourceDocument},
  period::{Period, PeriodId, PeriodScope},
  pipeline::Pipeline,
  rejection::{NewRejection, Rejection, RejectionReason},
  store::{FactQuery, FactStore, RejectionQuery},
  taxonomy::LineItemId,
  value_type::ValueType,
};

use crate::{Error, Result, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn pipeline(closure: ClosurePolicy) -> Pipeline {
  let config = PipelineConfig {
    corroboration: CorroborationConfig { closure, ..Default::default() },
    ..Default::default()
  };
  Pipeline::new(Arc::new(ReferenceSnapshot::load(&config).expect("builtin snapshot")))
}

fn acme() -> CompanyId { CompanyId::new("acme") }

fn at(month: u32, day: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
}

fn document(id: &str, ingested_at: DateTime<Utc>) -> SourceDocument {
  SourceDocument {
    document_id: DocumentId::new(id),
    company_id: acme(),
    filename: Some(format!("{id}.pdf")),
    ingested_at,
  }
}

/// A cell with period text and a table caption, but no document id; the
/// pipeline stamps it.
fn cell(row: u32, label: &str, value: &str, period: &str) -> RawObservation {
  let mut obs = RawObservation::new("", label, value);
  obs.page = Some(1);
  obs.row = Some(row);
  obs.column = Some(2);
  obs.period = Some(period.into());
  obs.context = ObservationContext {
    table: Some("Profit and loss (£000)".into()),
    column_header: Some(format!("{period} Actual")),
    ..Default::default()
  };
  obs
}

fn revenue_key(period_label: &str) -> FactKey {
  FactKey {
    company_id:   acme(),
    period_id:    Period::id_for(period_label, PeriodScope::Period),
    line_item_id: LineItemId::new("revenue"),
    value_type:   ValueType::Actual,
  }
}

#[tokio::test]
async fn pound_thousands_are_scaled_to_units() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());

  let mut obs = cell(4, "Turnover", "2,390,873", "Feb 2025");
  obs.context.cell = Some("£".into());
  let report = p.ingest(&s, document("mgmt-feb", at(3, 10)), vec![obs]).await.unwrap();
  assert_eq!(report.inserted, 1);

  let view = p.best_view(&s, &revenue_key("2025-02")).await.unwrap();
  let fact = view.fact().expect("revenue fact");
  assert_eq!(fact.value, 2_390_873_000.0);
  assert_eq!(fact.multiplier, 1000.0);
  assert_eq!(fact.currency.as_deref(), Some("GBP"));
  assert_eq!(fact.provenance.row, Some(4));
}

#[tokio::test]
async fn re_ingesting_a_document_changes_nothing() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  let observations = vec![
    cell(4, "Turnover", "1,200", "Feb 2025"),
    cell(5, "Cost of sales", "(700)", "Feb 2025"),
    cell(6, "Gross profit", "500", "Feb 2025"),
  ];

  let first =
    p.ingest(&s, document("mgmt-feb", at(3, 10)), observations.clone()).await.unwrap();
  assert_eq!(first.inserted, 3);

  let second = p.ingest(&s, document("mgmt-feb", at(3, 12)), observations).await.unwrap();
  assert_eq!(second.inserted, 0);
  assert_eq!(second.already_present, 3);
  assert!(second.replaced.is_empty());

  let facts = s.list_facts(&FactQuery::default()).await.unwrap();
  assert_eq!(facts.len(), 3);
  // The document keeps its first ingestion time.
  assert!(facts.iter().all(|f| f.ingested_at == at(3, 10)));
}

#[tokio::test]
async fn period_spellings_resolve_to_one_period() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  let observations = vec![
    cell(4, "Turnover", "10", "Feb 2025"),
    cell(5, "Cost of sales", "4", "February 2025"),
    cell(6, "Gross profit", "6", "2025-02"),
    cell(7, "Overheads", "2", "Feb-25"),
  ];
  let report = p.ingest(&s, document("mgmt-feb", at(3, 10)), observations).await.unwrap();
  assert_eq!(report.inserted, 4);

  let periods = s.list_periods().await.unwrap();
  assert_eq!(periods.len(), 1);
  assert_eq!(periods[0].label, "2025-02");
}

#[tokio::test]
async fn every_observation_is_a_fact_or_a_rejection() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());

  let mut undated = cell(8, "Turnover", "12", "");
  undated.period = None;
  undated.context.column_header = None;
  undated.context.table = Some("Profit and loss".into());
  let observations = vec![
    cell(4, "Turnover", "1,200", "Feb 2025"),
    cell(5, "Sundry widgets", "40", "Feb 2025"),
    cell(6, "Cost of sales", "n/a", "Feb 2025"),
    cell(7, "Gross profit", "500", "Feb 2025 variance"),
    undated,
  ];
  let mut doc = document("mgmt", at(3, 10));
  doc.filename = None;

  let report = p.ingest(&s, doc, observations).await.unwrap();
  assert_eq!(report.processed, 5);
  assert_eq!(report.facts() + report.rejected, report.processed);
  assert_eq!(report.inserted, 1);
  assert_eq!(report.rejected, 4);
  for reason in [
    RejectionReason::TaxonomyUnmapped,
    RejectionReason::ScaleUnresolved,
    RejectionReason::ValueTypeAmbiguous,
    RejectionReason::PeriodAmbiguous,
  ] {
    assert_eq!(report.rejections_by_reason.get(&reason), Some(&1), "{reason}");
  }

  let stored = s.list_rejections(&RejectionQuery::default()).await.unwrap();
  assert_eq!(stored.len(), 4);
  // Raw observations are retained whatever their fate.
  assert_eq!(s.list_observations(DocumentId::new("mgmt")).await.unwrap().len(), 5);
}

#[tokio::test]
async fn conflicting_values_within_one_document_are_rejected() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  let observations = vec![
    cell(4, "Turnover", "1,200", "Feb 2025"),
    cell(9, "Total turnover", "1,200", "Feb 2025"),
    cell(12, "Sales", "1,300", "Feb 2025"),
  ];
  let report = p.ingest(&s, document("mgmt", at(3, 10)), observations).await.unwrap();
  assert_eq!(report.inserted, 1);
  assert_eq!(report.already_present, 1);
  assert_eq!(report.rejections_by_reason.get(&RejectionReason::StorageConflict), Some(&1));
}

#[tokio::test]
async fn observation_for_another_document_fails_the_batch() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  let mut foreign = cell(4, "Turnover", "1", "Feb 2025");
  foreign.document_id = DocumentId::new("someone-else");

  let err = p.ingest(&s, document("mgmt", at(3, 10)), vec![foreign]).await;
  assert!(matches!(err, Err(finpack_core::Error::DocumentMismatch { .. })));
  assert!(s.get_document(DocumentId::new("mgmt")).await.unwrap().is_none());
}

#[tokio::test]
async fn best_view_prefers_the_latest_document() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  p.ingest(&s, document("board-pack", at(7, 10)), vec![cell(4, "Revenue", "100", "Jun 2025")])
    .await
    .unwrap();
  p.ingest(&s, document("audited", at(8, 20)), vec![cell(4, "Revenue", "103", "Jun 2025")])
    .await
    .unwrap();

  match p.best_view(&s, &revenue_key("2025-06")).await.unwrap() {
    BestView::Selected { fact, candidates } => {
      assert_eq!(candidates, 2);
      assert_eq!(fact.value, 103_000.0);
      assert_eq!(fact.provenance.document_id.as_str(), "audited");
    }
    other => panic!("expected a selection, got {other:?}"),
  }

  let missing = p.best_view(&s, &revenue_key("2025-07")).await.unwrap();
  assert!(matches!(missing, BestView::InsufficientEvidence { .. }));
}

#[tokio::test]
async fn closing_a_period_escalates_the_disagreement() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::Confirmed);
  p.ingest(&s, document("board-pack", at(7, 10)), vec![cell(4, "Revenue", "100", "Jun 2025")])
    .await
    .unwrap();
  p.ingest(&s, document("audited", at(8, 20)), vec![cell(4, "Revenue", "103", "Jun 2025")])
    .await
    .unwrap();

  let open = p.corroborate(&s, &acme(), at(9, 1)).await.unwrap();
  assert_eq!(open.findings, 1);
  assert_eq!(open.restatements, 0);
  let before = s.list_findings(acme(), false).await.unwrap();
  assert_eq!(before.len(), 1);
  assert_eq!(before[0].severity, Severity::Normal);
  assert_eq!(before[0].evidence.len(), 2);

  let facts = s.list_facts(&FactQuery::default()).await.unwrap();
  assert!(facts.iter().all(|f| f.corroboration_status == CorroborationStatus::Disputed));

  s.close_period(acme(), "2025-06".into()).await.unwrap();
  let closed = p.corroborate(&s, &acme(), at(9, 2)).await.unwrap();
  assert_eq!(closed.restatements, 1);

  let after = s.list_findings(acme(), false).await.unwrap();
  assert_eq!(after.len(), 1);
  assert_eq!(after[0].severity, Severity::Restatement);
  assert_eq!(after[0].finding_key, before[0].finding_key);

  let history = s.list_findings(acme(), true).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].superseded_by, Some(closed.run_id));
}

#[tokio::test]
async fn agreeing_documents_are_corroborated() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  p.ingest(&s, document("board-pack", at(7, 10)), vec![cell(4, "Revenue", "100", "Jun 2025")])
    .await
    .unwrap();
  p.ingest(&s, document("audited", at(8, 20)), vec![cell(4, "Revenue", "100.5", "Jun 2025")])
    .await
    .unwrap();
  p.ingest(&s, document("board-pack", at(7, 10)), vec![cell(5, "Overheads", "40", "Jun 2025")])
    .await
    .unwrap();

  let report = p.corroborate(&s, &acme(), at(9, 1)).await.unwrap();
  assert_eq!(report.findings, 0);
  assert_eq!(report.single_source, 1);

  let facts = s.list_facts(&FactQuery::default()).await.unwrap();
  let status = |item: &str| {
    facts
      .iter()
      .filter(|f| f.line_item_id.as_str() == item)
      .map(|f| f.corroboration_status)
      .collect::<Vec<_>>()
  };
  assert_eq!(status("revenue"), vec![CorroborationStatus::Corroborated; 2]);
  assert_eq!(status("operating_expenses"), vec![CorroborationStatus::Uncorroborated]);
}

#[tokio::test]
async fn changed_value_is_surfaced_as_a_replacement() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  p.ingest(&s, document("mgmt-feb", at(3, 10)), vec![cell(4, "Turnover", "1,200", "Feb 2025")])
    .await
    .unwrap();

  let report = p
    .ingest(&s, document("mgmt-feb", at(3, 10)), vec![cell(4, "Turnover", "1,250", "Feb 2025")])
    .await
    .unwrap();
  assert_eq!(report.inserted, 0);
  assert_eq!(report.replaced.len(), 1);
  assert_eq!(report.replaced[0].previous_value, 1_200_000.0);
  assert_eq!(report.replaced[0].new_value, 1_250_000.0);

  let hash = FactHash::compute(&revenue_key("2025-02"), &DocumentId::new("mgmt-feb"));
  let revisions = s.fact_revisions(hash.clone()).await.unwrap();
  assert_eq!(revisions.len(), 1);
  assert_eq!(s.get_fact(hash).await.unwrap().unwrap().value, 1_250_000.0);
}

#[tokio::test]
async fn document_registered_to_another_company_is_refused() {
  let s = store().await;
  let p = pipeline(ClosurePolicy::default());
  p.ingest(&s, document("shared-doc", at(3, 10)), vec![cell(4, "Turnover", "1,200", "Feb 2025")])
    .await
    .unwrap();

  let mut globex_doc = document("shared-doc", at(3, 11));
  globex_doc.company_id = CompanyId::new("globex");
  let err = p
    .ingest(&s, globex_doc, vec![cell(5, "Cost of sales", "(700)", "Feb 2025")])
    .await
    .unwrap_err();
  assert!(matches!(err, finpack_core::Error::DocumentCompany { .. }), "{err}");

  let facts_of = |company: &str| FactQuery {
    company_id: Some(CompanyId::new(company)),
    ..Default::default()
  };
  assert!(s.list_facts(&facts_of("globex")).await.unwrap().is_empty());
  let acme_facts = s.list_facts(&facts_of("acme")).await.unwrap();
  assert_eq!(acme_facts.len(), 1);
  assert_eq!(acme_facts[0].line_item_id.as_str(), "revenue");
  assert_eq!(s.list_observations(DocumentId::new("shared-doc")).await.unwrap().len(), 1);
}

// ─── Upsert races ────────────────────────────────────────────────────────────

/// Fails the first `failures` upserts with a uniqueness violation, as a
/// writer racing on the same hash would.
struct RacingStore {
  inner:    SqliteStore,
  failures: AtomicUsize,
  upserts:  AtomicUsize,
}

impl RacingStore {
  async fn new(failures: usize) -> Self {
    Self {
      inner:    store().await,
      failures: AtomicUsize::new(failures),
      upserts:  AtomicUsize::new(0),
    }
  }
}

fn unique_violation() -> Error {
  Error::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
    Some("UNIQUE constraint failed: facts.content_hash".into()),
  )))
}

impl FactStore for RacingStore {
  type Error = Error;

  async fn record_document(&self, document: SourceDocument) -> Result<SourceDocument> {
    self.inner.record_document(document).await
  }

  async fn get_document(&self, document_id: DocumentId) -> Result<Option<SourceDocument>> {
    self.inner.get_document(document_id).await
  }

  async fn record_observation(
    &self,
    company_id: CompanyId,
    observation: RawObservation,
  ) -> Result<()> {
    self.inner.record_observation(company_id, observation).await
  }

  async fn list_observations(&self, document_id: DocumentId) -> Result<Vec<RawObservation>> {
    self.inner.list_observations(document_id).await
  }

  async fn ensure_period(&self, period: Period) -> Result<Period> {
    self.inner.ensure_period(period).await
  }

  async fn get_period(&self, period_id: PeriodId) -> Result<Option<Period>> {
    self.inner.get_period(period_id).await
  }

  async fn list_periods(&self) -> Result<Vec<Period>> { self.inner.list_periods().await }

  async fn close_period(&self, company_id: CompanyId, label: String) -> Result<()> {
    self.inner.close_period(company_id, label).await
  }

  async fn closed_periods(&self, company_id: CompanyId) -> Result<HashSet<String>> {
    self.inner.closed_periods(company_id).await
  }

  async fn upsert_fact(&self, input: NewFact) -> Result<UpsertOutcome> {
    self.upserts.fetch_add(1, Ordering::SeqCst);
    let raced = self
      .failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if raced {
      return Err(unique_violation());
    }
    self.inner.upsert_fact(input).await
  }

  async fn get_fact(&self, content_hash: FactHash) -> Result<Option<Fact>> {
    self.inner.get_fact(content_hash).await
  }

  async fn list_facts<'a>(&'a self, query: &'a FactQuery) -> Result<Vec<Fact>> {
    self.inner.list_facts(query).await
  }

  async fn fact_revisions(&self, content_hash: FactHash) -> Result<Vec<FactRevision>> {
    self.inner.fact_revisions(content_hash).await
  }

  async fn set_corroboration_status(
    &self,
    statuses: Vec<(FactHash, CorroborationStatus)>,
  ) -> Result<()> {
    self.inner.set_corroboration_status(statuses).await
  }

  async fn record_rejection(&self, input: NewRejection) -> Result<Rejection> {
    self.inner.record_rejection(input).await
  }

  async fn list_rejections<'a>(&'a self, query: &'a RejectionQuery) -> Result<Vec<Rejection>> {
    self.inner.list_rejections(query).await
  }

  async fn replace_findings(&self, run: FindingRun) -> Result<()> {
    self.inner.replace_findings(run).await
  }

  async fn list_findings(
    &self,
    company_id: CompanyId,
    include_superseded: bool,
  ) -> Result<Vec<Finding>> {
    self.inner.list_findings(company_id, include_superseded).await
  }
}

#[tokio::test]
async fn lost_upsert_race_is_retried_once() {
  let s = RacingStore::new(1).await;
  let p = pipeline(ClosurePolicy::default());
  let report = p
    .ingest(&s, document("mgmt-feb", at(3, 10)), vec![cell(4, "Turnover", "1,200", "Feb 2025")])
    .await
    .unwrap();

  assert_eq!(report.inserted, 1);
  assert_eq!(report.rejected, 0);
  assert_eq!(s.upserts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_upsert_failure_aborts_the_ingest() {
  let s = RacingStore::new(2).await;
  let p = pipeline(ClosurePolicy::default());
  let err = p
    .ingest(&s, document("mgmt-feb", at(3, 10)), vec![cell(4, "Turnover", "1,200", "Feb 2025")])
    .await
    .unwrap_err();

  assert!(matches!(err, finpack_core::Error::Store(_)), "{err}");
  assert_eq!(s.upserts.load(Ordering::SeqCst), 2);
  assert!(s.inner.list_facts(&FactQuery::default()).await.unwrap().is_empty());
}
