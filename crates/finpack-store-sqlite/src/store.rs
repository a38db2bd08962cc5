//! [`SqliteStore`], the SQLite implementation of [`FactStore`].

use std::{collections::HashSet, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use finpack_core::{
  fact::{CorroborationStatus, Fact, FactHash, FactRevision, NewFact, UpsertOutcome, same_value},
  finding::{Finding, FindingRun},
  observation::{CompanyId, DocumentId, RawObservation, SourceDocument},
  period::{Period, PeriodId},
  rejection::{NewRejection, Rejection},
  store::{FactQuery, FactStore, RejectionQuery},
};

use crate::{
  Error, Result,
  encode::{
    RawDocument, RawFact, RawFinding, RawPeriod, RawRejection, RawRevision, encode_date,
    encode_dt, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Finpack fact store backed by a single SQLite file.
///
/// Clones share one reference-counted connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// What the upsert transaction did, before the row is read back.
enum UpsertStep {
  Inserted,
  AlreadyPresent,
  Replaced { previous_value: f64, previous_observation_id: String },
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "opening fact store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_fact(&self, hash: &FactHash) -> Result<Fact> {
    self
      .get_fact(hash.clone())
      .await?
      .ok_or_else(|| Error::FactNotFound(hash.to_string()))
  }
}

impl FactStore for SqliteStore {
  type Error = Error;

  // ── Audit trail ───────────────────────────────────────────────────────────

  async fn record_document(&self, document: SourceDocument) -> Result<SourceDocument> {
    let id_str = document.document_id.to_string();
    let company_str = document.company_id.to_string();
    let filename = document.filename.clone();
    let at_str = encode_dt(document.ingested_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO documents (document_id, company_id, filename, ingested_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, company_str, filename, at_str],
        )?;
        Ok(())
      })
      .await?;

    self
      .get_document(document.document_id.clone())
      .await?
      .ok_or_else(|| Error::Decode { kind: "document", value: document.document_id.to_string() })
  }

  async fn get_document(&self, document_id: DocumentId) -> Result<Option<SourceDocument>> {
    let id_str = document_id.to_string();

    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT document_id, company_id, filename, ingested_at
             FROM documents WHERE document_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawDocument {
                document_id: row.get(0)?,
                company_id:  row.get(1)?,
                filename:    row.get(2)?,
                ingested_at: row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn record_observation(
    &self,
    company_id: CompanyId,
    observation: RawObservation,
  ) -> Result<()> {
    let id_str = observation.observation_id().to_string();
    let doc_str = observation.document_id.to_string();
    let company_str = company_id.to_string();
    let page = observation.page;
    let row_no = observation.row;
    let column_no = observation.column;
    let json = serde_json::to_string(&observation)?;
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO observations
             (observation_id, document_id, company_id, page, row_no, column_no,
              observation_json, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![id_str, doc_str, company_str, page, row_no, column_no, json, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_observations(&self, document_id: DocumentId) -> Result<Vec<RawObservation>> {
    let doc_str = document_id.to_string();

    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT observation_json FROM observations WHERE document_id = ?1
           ORDER BY page, row_no, column_no, observation_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![doc_str], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|json| serde_json::from_str(json).map_err(Error::from))
      .collect()
  }

  // ── Periods ───────────────────────────────────────────────────────────────

  async fn ensure_period(&self, period: Period) -> Result<Period> {
    let id_str = period.period_id.to_string();
    let type_str = period.period_type.as_str();
    let label = period.label.clone();
    let start_str = encode_date(period.start);
    let end_str = encode_date(period.end);
    let scope_str = period.scope.as_str();

    let raw: RawPeriod = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO periods
             (period_id, period_type, label, start_date, end_date, scope)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, type_str, label, start_str, end_str, scope_str],
        )?;
        let sql = format!("SELECT {} FROM periods WHERE period_id = ?1", RawPeriod::COLUMNS);
        Ok(conn.query_row(&sql, rusqlite::params![id_str], RawPeriod::from_row)?)
      })
      .await?;

    raw.into_period()
  }

  async fn get_period(&self, period_id: PeriodId) -> Result<Option<Period>> {
    let id_str = period_id.to_string();

    let raw: Option<RawPeriod> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM periods WHERE period_id = ?1", RawPeriod::COLUMNS);
        Ok(conn.query_row(&sql, rusqlite::params![id_str], RawPeriod::from_row).optional()?)
      })
      .await?;

    raw.map(RawPeriod::into_period).transpose()
  }

  async fn list_periods(&self) -> Result<Vec<Period>> {
    let raws: Vec<RawPeriod> = self
      .conn
      .call(|conn| {
        let sql =
          format!("SELECT {} FROM periods ORDER BY end_date, start_date", RawPeriod::COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], RawPeriod::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPeriod::into_period).collect()
  }

  async fn close_period(&self, company_id: CompanyId, label: String) -> Result<()> {
    let company_str = company_id.to_string();
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO closed_periods (company_id, label, closed_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![company_str, label, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn closed_periods(&self, company_id: CompanyId) -> Result<HashSet<String>> {
    let company_str = company_id.to_string();

    let labels = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT label FROM closed_periods WHERE company_id = ?1")?;
        let rows = stmt
          .query_map(rusqlite::params![company_str], |row| row.get(0))?
          .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(labels)
  }

  // ── Facts ─────────────────────────────────────────────────────────────────

  async fn upsert_fact(&self, input: NewFact) -> Result<UpsertOutcome> {
    let hash = input.content_hash();
    let now = Utc::now();
    let fact_id = Uuid::new_v4();
    let revision_id = Uuid::new_v4();

    let hash_str            = hash.to_string();
    let fact_id_str         = encode_uuid(fact_id);
    let revision_id_str     = encode_uuid(revision_id);
    let company_str         = input.key.company_id.to_string();
    let period_str          = input.key.period_id.to_string();
    let line_item_str       = input.key.line_item_id.to_string();
    let value_type_str      = input.key.value_type.as_str();
    let value               = input.value;
    let multiplier          = input.multiplier;
    let currency            = input.currency.clone();
    let scale_str           = input.scale_confidence.as_str();
    let taxonomy_confidence = input.taxonomy_confidence;
    let doc_str             = input.provenance.document_id.to_string();
    let page                = input.provenance.page;
    let table_name          = input.provenance.table.clone();
    let row_no              = input.provenance.row;
    let column_no           = input.provenance.column;
    let observation_str     = input.observation_id.to_string();
    let ingested_str        = encode_dt(input.ingested_at);
    let now_str             = encode_dt(now);

    let step = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let existing: Option<(f64, String)> = tx
          .query_row(
            "SELECT value, observation_id FROM facts WHERE content_hash = ?1",
            rusqlite::params![hash_str],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;

        let step = match existing {
          None => {
            tx.execute(
              "INSERT INTO facts (
                 fact_id, content_hash, company_id, period_id, line_item_id, value_type,
                 value, multiplier, currency, scale_confidence, taxonomy_confidence,
                 document_id, page, table_name, row_no, column_no, observation_id,
                 ingested_at, recorded_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19)",
              rusqlite::params![
                fact_id_str,
                hash_str,
                company_str,
                period_str,
                line_item_str,
                value_type_str,
                value,
                multiplier,
                currency,
                scale_str,
                taxonomy_confidence,
                doc_str,
                page,
                table_name,
                row_no,
                column_no,
                observation_str,
                ingested_str,
                now_str,
              ],
            )?;
            UpsertStep::Inserted
          }
          Some((previous, _)) if same_value(previous, value) => UpsertStep::AlreadyPresent,
          Some((previous_value, previous_observation_id)) => {
            tx.execute(
              "UPDATE facts SET
                 value = ?2, multiplier = ?3, currency = ?4, scale_confidence = ?5,
                 taxonomy_confidence = ?6, page = ?7, table_name = ?8, row_no = ?9,
                 column_no = ?10, observation_id = ?11, recorded_at = ?12,
                 corroboration_status = 'pending'
               WHERE content_hash = ?1",
              rusqlite::params![
                hash_str,
                value,
                multiplier,
                currency,
                scale_str,
                taxonomy_confidence,
                page,
                table_name,
                row_no,
                column_no,
                observation_str,
                now_str,
              ],
            )?;
            tx.execute(
              "INSERT INTO fact_revisions (
                 revision_id, content_hash, previous_value, new_value,
                 previous_observation_id, new_observation_id, revised_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
              rusqlite::params![
                revision_id_str,
                hash_str,
                previous_value,
                value,
                previous_observation_id,
                observation_str,
                now_str,
              ],
            )?;
            UpsertStep::Replaced { previous_value, previous_observation_id }
          }
        };

        tx.commit()?;
        Ok(step)
      })
      .await?;

    let fact = self.fetch_fact(&hash).await?;
    Ok(match step {
      UpsertStep::Inserted => UpsertOutcome::Inserted(fact),
      UpsertStep::AlreadyPresent => UpsertOutcome::AlreadyPresent(fact),
      UpsertStep::Replaced { previous_value, previous_observation_id } => {
        tracing::debug!(
          hash = %hash,
          previous = previous_value,
          new = fact.value,
          "fact value revised"
        );
        let revision = FactRevision {
          revision_id,
          content_hash: hash,
          previous_value,
          new_value: fact.value,
          previous_observation_id: previous_observation_id.into(),
          new_observation_id: fact.observation_id.clone(),
          revised_at: now,
        };
        UpsertOutcome::Replaced { fact, revision }
      }
    })
  }

  async fn get_fact(&self, content_hash: FactHash) -> Result<Option<Fact>> {
    let hash_str = content_hash.to_string();

    let raw: Option<RawFact> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {} FROM facts f WHERE f.content_hash = ?1", RawFact::COLUMNS);
        Ok(conn.query_row(&sql, rusqlite::params![hash_str], RawFact::from_row).optional()?)
      })
      .await?;

    raw.map(RawFact::into_fact).transpose()
  }

  async fn list_facts<'a>(&'a self, query: &'a FactQuery) -> Result<Vec<Fact>> {
    let company_str    = query.company_id.as_ref().map(ToString::to_string);
    let line_item_str  = query.line_item_id.as_ref().map(ToString::to_string);
    let value_type_str = query.value_type.map(|v| v.as_str());
    let period_str     = query.period_id.as_ref().map(ToString::to_string);
    let from_str       = query.period_from.map(encode_date);
    let to_str         = query.period_to.map(encode_date);

    let raws: Vec<RawFact> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM facts f
           JOIN periods p ON p.period_id = f.period_id
           WHERE (?1 IS NULL OR f.company_id = ?1)
             AND (?2 IS NULL OR f.line_item_id = ?2)
             AND (?3 IS NULL OR f.value_type = ?3)
             AND (?4 IS NULL OR f.period_id = ?4)
             AND (?5 IS NULL OR p.end_date >= ?5)
             AND (?6 IS NULL OR p.end_date <= ?6)
           ORDER BY p.end_date, p.start_date, f.line_item_id, f.value_type, f.document_id",
          RawFact::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![company_str, line_item_str, value_type_str, period_str, from_str, to_str],
            RawFact::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFact::into_fact).collect()
  }

  async fn fact_revisions(&self, content_hash: FactHash) -> Result<Vec<FactRevision>> {
    let hash_str = content_hash.to_string();

    let raws: Vec<RawRevision> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT revision_id, content_hash, previous_value, new_value,
                  previous_observation_id, new_observation_id, revised_at
           FROM fact_revisions WHERE content_hash = ?1
           ORDER BY revised_at, rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![hash_str], |row| {
            Ok(RawRevision {
              revision_id:             row.get(0)?,
              content_hash:            row.get(1)?,
              previous_value:          row.get(2)?,
              new_value:               row.get(3)?,
              previous_observation_id: row.get(4)?,
              new_observation_id:      row.get(5)?,
              revised_at:              row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRevision::into_revision).collect()
  }

  async fn set_corroboration_status(
    &self,
    statuses: Vec<(FactHash, CorroborationStatus)>,
  ) -> Result<()> {
    let rows: Vec<(String, &'static str)> = statuses
      .into_iter()
      .map(|(hash, status)| (hash.to_string(), status.as_str()))
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt =
            tx.prepare("UPDATE facts SET corroboration_status = ?2 WHERE content_hash = ?1")?;
          for (hash, status) in &rows {
            stmt.execute(rusqlite::params![hash, status])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Rejections ────────────────────────────────────────────────────────────

  async fn record_rejection(&self, input: NewRejection) -> Result<Rejection> {
    let id_str = input.rejection_id();
    let company_str = input.company_id.to_string();
    let doc_str = input.document_id.to_string();
    let observation_str = input.observation_id.to_string();
    let reason_str = input.reason.as_str();
    let at_str = encode_dt(Utc::now());

    let raw: RawRejection = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO rejections (
             rejection_id, company_id, document_id, observation_id, reason, detail,
             label, value_text, rejected_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id_str,
            company_str,
            doc_str,
            observation_str,
            reason_str,
            input.detail,
            input.label,
            input.value_text,
            at_str,
          ],
        )?;
        let sql =
          format!("SELECT {} FROM rejections WHERE rejection_id = ?1", RawRejection::COLUMNS);
        Ok(conn.query_row(&sql, rusqlite::params![id_str], RawRejection::from_row)?)
      })
      .await?;

    raw.into_rejection()
  }

  async fn list_rejections<'a>(&'a self, query: &'a RejectionQuery) -> Result<Vec<Rejection>> {
    let company_str = query.company_id.as_ref().map(ToString::to_string);
    let reason_str  = query.reason.map(|r| r.as_str());
    let doc_str     = query.document_id.as_ref().map(ToString::to_string);

    let raws: Vec<RawRejection> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM rejections
           WHERE (?1 IS NULL OR company_id = ?1)
             AND (?2 IS NULL OR reason = ?2)
             AND (?3 IS NULL OR document_id = ?3)
           ORDER BY rejected_at, rejection_id",
          RawRejection::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![company_str, reason_str, doc_str], RawRejection::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRejection::into_rejection).collect()
  }

  // ── Findings ──────────────────────────────────────────────────────────────

  async fn replace_findings(&self, run: FindingRun) -> Result<()> {
    let run_str = encode_uuid(run.run_id);
    let company_str = run.company_id.to_string();
    let as_of_str = encode_dt(run.as_of);

    let rows = run
      .findings
      .iter()
      .map(|f| -> Result<_> {
        Ok((
          f.finding_key.clone(),
          f.period_id.to_string(),
          f.line_item_id.to_string(),
          f.value_type.as_str(),
          f.kind.as_str(),
          f.severity.as_str(),
          f.magnitude,
          f.absolute_difference,
          f.tolerance,
          serde_json::to_string(&f.evidence)?,
          encode_dt(f.created_at),
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO finding_runs (run_id, company_id, as_of) VALUES (?1, ?2, ?3)",
          rusqlite::params![run_str, company_str, as_of_str],
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO findings (
               run_id, finding_key, company_id, period_id, line_item_id, value_type, kind,
               severity, magnitude, absolute_difference, tolerance, evidence_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          )?;
          for (key, period, line_item, value_type, kind, severity, magnitude, diff, tol, ev, at) in
            &rows
          {
            stmt.execute(rusqlite::params![
              run_str,
              key,
              company_str,
              period,
              line_item,
              value_type,
              kind,
              severity,
              magnitude,
              diff,
              tol,
              ev,
              at,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_findings(
    &self,
    company_id: CompanyId,
    include_superseded: bool,
  ) -> Result<Vec<Finding>> {
    let company_str = company_id.to_string();

    let raws: Vec<RawFinding> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT fi.finding_key, fi.run_id, fi.company_id, fi.period_id, fi.line_item_id,
                  fi.value_type, fi.kind, fi.severity, fi.magnitude, fi.absolute_difference,
                  fi.tolerance, fi.evidence_json, fi.created_at,
                  (SELECT n.run_id FROM finding_runs n
                    WHERE n.company_id = r.company_id AND n.run_seq > r.run_seq
                    ORDER BY n.run_seq LIMIT 1) AS superseded_by
           FROM findings fi
           JOIN finding_runs r ON r.run_id = fi.run_id
           WHERE fi.company_id = ?1
             AND (?2 OR NOT EXISTS (
               SELECT 1 FROM finding_runs n
                WHERE n.company_id = r.company_id AND n.run_seq > r.run_seq))
           ORDER BY r.run_seq, fi.period_id, fi.line_item_id, fi.value_type, fi.finding_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![company_str, include_superseded], RawFinding::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFinding::into_finding).collect()
  }
}
