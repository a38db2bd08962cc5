//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{NaiveDate, TimeZone, Utc};
use finpack_core::{
  fact::{CorroborationStatus, FactKey, NewFact, UpsertOutcome},
  finding::{Finding, FindingEvidence, FindingKind, FindingRun, Severity},
  observation::{CompanyId, DocumentId, ObservationId, Provenance, RawObservation, SourceDocument},
  period::{Period, PeriodScope, PeriodType},
  rejection::{NewRejection, RejectionReason},
  scale::ScaleConfidence,
  store::{FactQuery, FactStore, RejectionQuery, StoreError},
  taxonomy::LineItemId,
  value_type::ValueType,
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn company() -> CompanyId { CompanyId::new("acme") }

fn june() -> Period {
  Period {
    period_id:   Period::id_for("2025-06", PeriodScope::Period),
    period_type: PeriodType::Month,
    label:       "2025-06".into(),
    start:       NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    end:         NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
    scope:       PeriodScope::Period,
  }
}

/// Record a document with one observation and return the observation id.
async fn seed_document(s: &SqliteStore, doc: &str, day: u32) -> ObservationId {
  s.record_document(SourceDocument {
    document_id: DocumentId::new(doc),
    company_id:  company(),
    filename:    Some(format!("{doc}.pdf")),
    ingested_at: Utc.with_ymd_and_hms(2025, 7, day, 9, 0, 0).unwrap(),
  })
  .await
  .unwrap();
  let mut obs = RawObservation::new(doc, "Revenue", "100");
  obs.page = Some(1);
  obs.row = Some(4);
  let id = obs.observation_id();
  s.record_observation(company(), obs).await.unwrap();
  id
}

fn new_fact(doc: &str, observation_id: ObservationId, value: f64) -> NewFact {
  NewFact {
    key: FactKey {
      company_id:   company(),
      period_id:    june().period_id,
      line_item_id: LineItemId::new("revenue"),
      value_type:   ValueType::Actual,
    },
    value,
    multiplier: 1.0,
    currency: Some("GBP".into()),
    scale_confidence: ScaleConfidence::Explicit,
    taxonomy_confidence: 1.0,
    provenance: Provenance {
      document_id: DocumentId::new(doc),
      page:        Some(1),
      table:       Some("P&L".into()),
      row:         Some(4),
      column:      None,
    },
    observation_id,
    ingested_at: Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap(),
  }
}

// ─── Documents and observations ──────────────────────────────────────────────

#[tokio::test]
async fn re_recording_a_document_keeps_first_ingestion_time() {
  let s = store().await;
  let first = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
  let doc = SourceDocument {
    document_id: DocumentId::new("doc-a"),
    company_id:  company(),
    filename:    None,
    ingested_at: first,
  };
  s.record_document(doc.clone()).await.unwrap();

  let again = SourceDocument { ingested_at: Utc::now(), ..doc };
  let stored = s.record_document(again).await.unwrap();
  assert_eq!(stored.ingested_at, first);
}

#[tokio::test]
async fn observations_are_recorded_once() {
  let s = store().await;
  seed_document(&s, "doc-a", 1).await;
  seed_document(&s, "doc-a", 1).await;

  let observations = s.list_observations(DocumentId::new("doc-a")).await.unwrap();
  assert_eq!(observations.len(), 1);
  assert_eq!(observations[0].label, "Revenue");
}

// ─── Periods ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_period_is_idempotent() {
  let s = store().await;
  let a = s.ensure_period(june()).await.unwrap();
  let b = s.ensure_period(june()).await.unwrap();
  assert_eq!(a, b);
  assert_eq!(s.list_periods().await.unwrap().len(), 1);
  assert_eq!(s.get_period(june().period_id).await.unwrap(), Some(june()));
}

#[tokio::test]
async fn closing_a_period_is_idempotent() {
  let s = store().await;
  s.close_period(company(), "2025-06".into()).await.unwrap();
  s.close_period(company(), "2025-06".into()).await.unwrap();

  let closed = s.closed_periods(company()).await.unwrap();
  assert_eq!(closed.len(), 1);
  assert!(closed.contains("2025-06"));
  assert!(s.closed_periods(CompanyId::new("other")).await.unwrap().is_empty());
}

// ─── Facts ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_inserts_then_reports_already_present() {
  let s = store().await;
  s.ensure_period(june()).await.unwrap();
  let obs = seed_document(&s, "doc-a", 1).await;

  let first = s.upsert_fact(new_fact("doc-a", obs.clone(), 100_000.0)).await.unwrap();
  assert!(matches!(first, UpsertOutcome::Inserted(_)));
  assert_eq!(first.fact().corroboration_status, CorroborationStatus::Pending);

  let second = s.upsert_fact(new_fact("doc-a", obs, 100_000.0)).await.unwrap();
  assert!(matches!(second, UpsertOutcome::AlreadyPresent(_)));
  assert_eq!(first.fact().fact_id, second.fact().fact_id);

  let all = s.list_facts(&FactQuery::default()).await.unwrap();
  assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn upsert_with_new_value_records_revision() {
  let s = store().await;
  s.ensure_period(june()).await.unwrap();
  let obs = seed_document(&s, "doc-a", 1).await;

  let inserted = s.upsert_fact(new_fact("doc-a", obs.clone(), 100_000.0)).await.unwrap();
  let hash = inserted.fact().content_hash.clone();
  s.set_corroboration_status(vec![(hash.clone(), CorroborationStatus::Corroborated)])
    .await
    .unwrap();

  let replaced = s.upsert_fact(new_fact("doc-a", obs, 101_000.0)).await.unwrap();
  let UpsertOutcome::Replaced { fact, revision } = replaced else {
    panic!("expected a replacement");
  };
  assert_eq!(fact.value, 101_000.0);
  assert_eq!(fact.corroboration_status, CorroborationStatus::Pending);
  assert_eq!(revision.previous_value, 100_000.0);

  let revisions = s.fact_revisions(hash).await.unwrap();
  assert_eq!(revisions.len(), 1);
  assert_eq!(revisions[0].new_value, 101_000.0);
}

#[tokio::test]
async fn integrity_failures_are_constraint_violations() {
  let s = store().await;
  let orphan = NewRejection {
    company_id:     company(),
    document_id:    DocumentId::new("never-recorded"),
    observation_id: ObservationId::new("never-recorded"),
    reason:         RejectionReason::PeriodAmbiguous,
    detail:         String::new(),
    label:          "Revenue".into(),
    value_text:     "1".into(),
  };
  let err: Error = s.record_rejection(orphan).await.unwrap_err();
  assert!(err.is_constraint_violation());
}

#[tokio::test]
async fn list_facts_filters_by_key_fields_and_dates() {
  let s = store().await;
  s.ensure_period(june()).await.unwrap();
  let a = seed_document(&s, "doc-a", 1).await;
  let b = seed_document(&s, "doc-b", 2).await;
  s.upsert_fact(new_fact("doc-a", a, 100.0)).await.unwrap();
  s.upsert_fact(new_fact("doc-b", b, 103.0)).await.unwrap();

  let by_company = FactQuery { company_id: Some(company()), ..Default::default() };
  assert_eq!(s.list_facts(&by_company).await.unwrap().len(), 2);

  let budget = FactQuery { value_type: Some(ValueType::Budget), ..Default::default() };
  assert!(s.list_facts(&budget).await.unwrap().is_empty());

  let after = FactQuery {
    period_from: NaiveDate::from_ymd_opt(2025, 7, 1),
    ..Default::default()
  };
  assert!(s.list_facts(&after).await.unwrap().is_empty());

  let within = FactQuery {
    period_from: NaiveDate::from_ymd_opt(2025, 6, 1),
    period_to: NaiveDate::from_ymd_opt(2025, 6, 30),
    ..Default::default()
  };
  let facts = s.list_facts(&within).await.unwrap();
  assert_eq!(facts.len(), 2);
  assert_eq!(facts[0].provenance.document_id.as_str(), "doc-a");
}

// ─── Rejections ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejections_are_deduplicated_and_filterable() {
  let s = store().await;
  let obs = seed_document(&s, "doc-a", 1).await;
  let input = NewRejection {
    company_id:     company(),
    document_id:    DocumentId::new("doc-a"),
    observation_id: obs,
    reason:         RejectionReason::TaxonomyUnmapped,
    detail:         "no alias matches \"Sundry\"".into(),
    label:          "Sundry".into(),
    value_text:     "12".into(),
  };
  let first = s.record_rejection(input.clone()).await.unwrap();
  let second = s.record_rejection(input).await.unwrap();
  assert_eq!(first.rejection_id, second.rejection_id);
  assert_eq!(first.rejected_at, second.rejected_at);

  let unmapped = RejectionQuery {
    reason: Some(RejectionReason::TaxonomyUnmapped),
    ..Default::default()
  };
  assert_eq!(s.list_rejections(&unmapped).await.unwrap().len(), 1);

  let scale = RejectionQuery {
    reason: Some(RejectionReason::ScaleUnresolved),
    ..Default::default()
  };
  assert!(s.list_rejections(&scale).await.unwrap().is_empty());
}

// ─── Findings ────────────────────────────────────────────────────────────────

fn finding(run_id: Uuid, severity: Severity) -> Finding {
  let evidence = |doc: &str, value: f64| FindingEvidence {
    content_hash: format!("hash-{doc}").as_str().into(),
    document_id: DocumentId::new(doc),
    page: Some(1),
    table: None,
    row: Some(4),
    column: None,
    value,
    observation_id: ObservationId::new(format!("obs-{doc}")),
  };
  Finding {
    finding_key: "pair-key".into(),
    run_id,
    company_id: company(),
    period_id: june().period_id,
    line_item_id: LineItemId::new("revenue"),
    value_type: ValueType::Actual,
    kind: FindingKind::CrossDocumentDisagreement,
    severity,
    magnitude: 0.0291,
    absolute_difference: 3_000.0,
    tolerance: 0.01,
    evidence: vec![evidence("doc-a", 100_000.0), evidence("doc-b", 103_000.0)],
    created_at: Utc::now(),
    superseded_by: None,
  }
}

fn run(severity: Severity) -> FindingRun {
  let run_id = Uuid::new_v4();
  FindingRun {
    run_id,
    company_id: company(),
    as_of: Utc::now(),
    findings: vec![finding(run_id, severity)],
  }
}

#[tokio::test]
async fn later_run_supersedes_earlier_findings() {
  let s = store().await;
  let first = run(Severity::Normal);
  let second = run(Severity::Restatement);
  s.replace_findings(first.clone()).await.unwrap();
  s.replace_findings(second.clone()).await.unwrap();

  let active = s.list_findings(company(), false).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].run_id, second.run_id);
  assert_eq!(active[0].severity, Severity::Restatement);
  assert!(active[0].is_active());
  assert_eq!(active[0].evidence.len(), 2);

  let history = s.list_findings(company(), true).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].superseded_by, Some(second.run_id));
  assert_eq!(history[0].finding_key, history[1].finding_key);
}

#[tokio::test]
async fn empty_run_clears_active_findings() {
  let s = store().await;
  s.replace_findings(run(Severity::Normal)).await.unwrap();
  s.replace_findings(FindingRun {
    run_id:     Uuid::new_v4(),
    company_id: company(),
    as_of:      Utc::now(),
    findings:   Vec::new(),
  })
  .await
  .unwrap();

  assert!(s.list_findings(company(), false).await.unwrap().is_empty());
  assert_eq!(s.list_findings(company(), true).await.unwrap().len(), 1);
}
