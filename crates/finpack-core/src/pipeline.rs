//! Ingestion and corroboration orchestration over any [`FactStore`].
//!
//! Each observation runs through the taxonomy, period, scale, and value-type
//! stages independently. The first stage to refuse it produces a rejection
//! and the batch carries on; only a store failure aborts the run. Ingestion
//! and corroboration for one company are serialised by [`CompanyLocks`];
//! different companies proceed concurrently over the same shared
//! [`ReferenceSnapshot`].

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  best_view::{self, BestView},
  config::ReferenceSnapshot,
  corroboration::{self, ClosedPeriods, CorroborationInput},
  fact::{FactHash, FactKey, FactRevision, NewFact, UpsertOutcome, same_value},
  finding::Severity,
  observation::{CompanyId, ObservationId, RawObservation, SourceDocument},
  period::{Period, PeriodContext, PeriodId},
  rejection::{NewRejection, RejectionReason, StageRejection, StageResult},
  scale::ScaleContext,
  store::{FactQuery, FactStore, StoreError},
  value_type::classify_value_type,
};

fn store_error<E: StoreError>(e: E) -> Error { Error::Store(Box::new(e)) }

// ─── Per-company serialisation ───────────────────────────────────────────────

/// One async mutex per company, created on first use.
#[derive(Debug, Default)]
pub struct CompanyLocks {
  locks: DashMap<CompanyId, Arc<Mutex<()>>>,
}

impl CompanyLocks {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `company`.
  pub async fn lock(&self, company: &CompanyId) -> OwnedMutexGuard<()> {
    // Clone the Arc out so the map shard is not held across the await.
    let mutex = self.locks.entry(company.clone()).or_default().clone();
    mutex.lock_owned().await
  }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Outcome counts of one ingestion. Every processed observation is counted
/// exactly once: `inserted + already_present + replaced.len() + rejected ==
/// processed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
  pub processed:            usize,
  pub inserted:             usize,
  pub already_present:      usize,
  pub replaced:             Vec<FactRevision>,
  pub rejected:             usize,
  pub rejections_by_reason: BTreeMap<RejectionReason, usize>,
}

impl IngestReport {
  pub fn facts(&self) -> usize {
    self.inserted + self.already_present + self.replaced.len()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorroborationReport {
  pub run_id:        Uuid,
  pub company_id:    CompanyId,
  pub as_of:         DateTime<Utc>,
  pub facts:         usize,
  pub keys_compared: usize,
  pub single_source: usize,
  pub findings:      usize,
  pub restatements:  usize,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

struct Resolved {
  period: Period,
  fact:   NewFact,
}

pub struct Pipeline {
  snapshot: Arc<ReferenceSnapshot>,
  locks:    CompanyLocks,
}

impl Pipeline {
  pub fn new(snapshot: Arc<ReferenceSnapshot>) -> Self {
    Self { snapshot, locks: CompanyLocks::new() }
  }

  pub fn snapshot(&self) -> &ReferenceSnapshot { &self.snapshot }

  /// Ingest one document's observations.
  ///
  /// Observations with an empty `document_id` are stamped with the
  /// document's; an observation naming a different document fails the whole
  /// call before anything is written. So does a document id already
  /// registered to another company.
  pub async fn ingest<S: FactStore>(
    &self,
    store: &S,
    document: SourceDocument,
    observations: Vec<RawObservation>,
  ) -> Result<IngestReport> {
    let span = info_span!(
      "ingest",
      company = %document.company_id,
      document = %document.document_id,
    );
    self.ingest_inner(store, document, observations).instrument(span).await
  }

  async fn ingest_inner<S: FactStore>(
    &self,
    store: &S,
    document: SourceDocument,
    mut observations: Vec<RawObservation>,
  ) -> Result<IngestReport> {
    for obs in &mut observations {
      if obs.document_id.is_empty() {
        obs.document_id = document.document_id.clone();
      } else if obs.document_id != document.document_id {
        return Err(Error::DocumentMismatch {
          expected: document.document_id.clone(),
          found:    obs.document_id.clone(),
        });
      }
    }

    let _guard = self.locks.lock(&document.company_id).await;
    let requested = document.company_id.clone();
    let document = store.record_document(document).await.map_err(store_error)?;
    if document.company_id != requested {
      return Err(Error::DocumentCompany {
        document:   document.document_id,
        registered: document.company_id,
        requested,
      });
    }

    let mut report = IngestReport { processed: observations.len(), ..Default::default() };
    // Hashes written by this batch, with the value and observation that won.
    let mut batch: HashMap<FactHash, (f64, ObservationId)> = HashMap::new();

    for obs in observations {
      let observation_id = obs.observation_id();
      store
        .record_observation(document.company_id.clone(), obs.clone())
        .await
        .map_err(store_error)?;

      let resolved = match self.resolve(&document, &obs) {
        Ok(resolved) => resolved,
        Err(rejection) => {
          self.reject(store, &document, &obs, rejection, &mut report).await?;
          continue;
        }
      };

      let hash = resolved.fact.content_hash();
      if let Some((value, winner)) = batch.get(&hash) {
        if same_value(*value, resolved.fact.value) {
          debug!(observation = %observation_id, %hash, "duplicate within batch");
          report.already_present += 1;
        } else {
          let rejection = StageRejection::new(
            RejectionReason::StorageConflict,
            format!(
              "fact {hash} already takes value {value} from observation {winner} in this document; got {}",
              resolved.fact.value
            ),
          );
          self.reject(store, &document, &obs, rejection, &mut report).await?;
        }
        continue;
      }

      store.ensure_period(resolved.period).await.map_err(store_error)?;
      let outcome = upsert_with_retry(store, resolved.fact).await?;
      batch.insert(hash.clone(), (outcome.fact().value, observation_id.clone()));

      match outcome {
        UpsertOutcome::Inserted(_) => {
          debug!(observation = %observation_id, %hash, "fact inserted");
          report.inserted += 1;
        }
        UpsertOutcome::AlreadyPresent(_) => {
          debug!(observation = %observation_id, %hash, "fact already present");
          report.already_present += 1;
        }
        UpsertOutcome::Replaced { revision, .. } => {
          warn!(
            %hash,
            previous = revision.previous_value,
            new = revision.new_value,
            "fact value replaced"
          );
          report.replaced.push(revision);
        }
      }
    }

    info!(
      processed = report.processed,
      inserted = report.inserted,
      already_present = report.already_present,
      replaced = report.replaced.len(),
      rejected = report.rejected,
      taxonomy_version = self.snapshot.taxonomy.version(),
      "ingestion complete"
    );
    Ok(report)
  }

  /// Run every stage for one observation. The first refusal wins.
  fn resolve(
    &self,
    document: &SourceDocument,
    obs: &RawObservation,
  ) -> StageResult<Resolved> {
    let ctx = &obs.context;
    let table_text = ctx.table.as_deref().or(obs.table.as_deref());

    let line_item =
      self.snapshot.taxonomy.resolve(&obs.label, &document.company_id, obs.statement)?;

    let period = self
      .snapshot
      .periods
      .resolve(obs.period.as_deref(), &PeriodContext {
        table:    table_text,
        header:   ctx.column_header.as_deref(),
        hint:     ctx.period_hint.as_deref(),
        filename: document.filename.as_deref(),
      })?
      .period;

    let value = self.snapshot.scale.normalize(&obs.value, &ScaleContext {
      cell:     ctx.cell.as_deref(),
      row:      ctx.row.as_deref(),
      column:   ctx.column_header.as_deref(),
      table:    table_text,
      document: ctx.document.as_deref(),
    })?;

    let value_type = classify_value_type(obs.value_type, &[
      obs.period.as_deref(),
      ctx.column_header.as_deref(),
    ])?;

    let fact = NewFact {
      key: FactKey {
        company_id: document.company_id.clone(),
        period_id: period.period_id.clone(),
        line_item_id: line_item.line_item_id,
        value_type,
      },
      value: value.value,
      multiplier: value.multiplier,
      currency: value.currency,
      scale_confidence: value.confidence,
      taxonomy_confidence: line_item.confidence,
      provenance: obs.provenance(),
      observation_id: obs.observation_id(),
      ingested_at: document.ingested_at,
    };
    Ok(Resolved { period, fact })
  }

  async fn reject<S: FactStore>(
    &self,
    store: &S,
    document: &SourceDocument,
    obs: &RawObservation,
    rejection: StageRejection,
    report: &mut IngestReport,
  ) -> Result<()> {
    let observation_id = obs.observation_id();
    debug!(
      observation = %observation_id,
      reason = %rejection.reason,
      detail = %rejection.detail,
      "observation rejected"
    );
    store
      .record_rejection(NewRejection {
        company_id: document.company_id.clone(),
        document_id: document.document_id.clone(),
        observation_id,
        reason: rejection.reason,
        detail: rejection.detail,
        label: obs.label.clone(),
        value_text: obs.value.clone(),
      })
      .await
      .map_err(store_error)?;
    report.rejected += 1;
    *report.rejections_by_reason.entry(rejection.reason).or_default() += 1;
    Ok(())
  }

  /// Corroborate every fact of `company`, update statuses, and supersede the
  /// previous finding run. Safe to re-run at any time.
  pub async fn corroborate<S: FactStore>(
    &self,
    store: &S,
    company: &CompanyId,
    as_of: DateTime<Utc>,
  ) -> Result<CorroborationReport> {
    let span = info_span!("corroborate", company = %company);
    async {
      let _guard = self.locks.lock(company).await;

      let query = FactQuery { company_id: Some(company.clone()), ..Default::default() };
      let facts = store.list_facts(&query).await.map_err(store_error)?;
      let periods: HashMap<PeriodId, Period> = store
        .list_periods()
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|p| (p.period_id.clone(), p))
        .collect();
      let closed =
        ClosedPeriods(store.closed_periods(company.clone()).await.map_err(store_error)?);

      let outcome = corroboration::corroborate(
        &CorroborationInput {
          company_id: company,
          facts: &facts,
          periods: &periods,
          closed: &closed,
          as_of,
        },
        &self.snapshot.corroboration,
      );

      let report = CorroborationReport {
        run_id: outcome.run.run_id,
        company_id: company.clone(),
        as_of,
        facts: facts.len(),
        keys_compared: outcome.keys_compared,
        single_source: outcome.single_source,
        findings: outcome.run.findings.len(),
        restatements: outcome
          .run
          .findings
          .iter()
          .filter(|f| f.severity == Severity::Restatement)
          .count(),
      };

      store.replace_findings(outcome.run).await.map_err(store_error)?;
      store
        .set_corroboration_status(outcome.statuses)
        .await
        .map_err(store_error)?;

      info!(
        run = %report.run_id,
        facts = report.facts,
        findings = report.findings,
        restatements = report.restatements,
        "corroboration complete"
      );
      Ok(report)
    }
    .instrument(span)
    .await
  }

  /// The current-truth fact for `key`, or an explicit insufficient-evidence
  /// answer.
  pub async fn best_view<S: FactStore>(&self, store: &S, key: &FactKey) -> Result<BestView> {
    let query = FactQuery {
      company_id: Some(key.company_id.clone()),
      line_item_id: Some(key.line_item_id.clone()),
      value_type: Some(key.value_type),
      period_id: Some(key.period_id.clone()),
      ..Default::default()
    };
    let facts = store.list_facts(&query).await.map_err(store_error)?;
    Ok(best_view::select(key, &facts))
  }
}

/// A hash-unique violation means another writer won a race; the retry then
/// sees that row and resolves to an ordinary upsert outcome.
async fn upsert_with_retry<S: FactStore>(store: &S, fact: NewFact) -> Result<UpsertOutcome> {
  match store.upsert_fact(fact.clone()).await {
    Ok(outcome) => Ok(outcome),
    Err(e) if e.is_constraint_violation() => {
      warn!(error = %e, hash = %fact.content_hash(), "upsert raced; retrying once");
      store.upsert_fact(fact).await.map_err(store_error)
    }
    Err(e) => Err(store_error(e)),
  }
}
