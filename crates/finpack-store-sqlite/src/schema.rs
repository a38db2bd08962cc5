//! SQL schema for the Finpack SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS documents (
    document_id TEXT PRIMARY KEY,
    company_id  TEXT NOT NULL,
    filename    TEXT,
    ingested_at TEXT NOT NULL      -- first ingestion; never updated
);

-- Raw observations are append-only and kept whether or not they resolve.
CREATE TABLE IF NOT EXISTS observations (
    observation_id   TEXT PRIMARY KEY,
    document_id      TEXT NOT NULL REFERENCES documents(document_id),
    company_id       TEXT NOT NULL,
    page             INTEGER,
    row_no           INTEGER,
    column_no        INTEGER,
    observation_json TEXT NOT NULL,
    recorded_at      TEXT NOT NULL
);

-- Periods are immutable once created.
CREATE TABLE IF NOT EXISTS periods (
    period_id   TEXT PRIMARY KEY,   -- '{label}:{scope}'
    period_type TEXT NOT NULL,      -- 'month' | 'quarter' | 'year'
    label       TEXT NOT NULL,
    start_date  TEXT NOT NULL,      -- YYYY-MM-DD
    end_date    TEXT NOT NULL,
    scope       TEXT NOT NULL,      -- 'period' | 'ytd' | 'fy' | 'ltm'
    UNIQUE (label, scope)
);

CREATE TABLE IF NOT EXISTS closed_periods (
    company_id TEXT NOT NULL,
    label      TEXT NOT NULL,
    closed_at  TEXT NOT NULL,
    PRIMARY KEY (company_id, label)
);

-- One row per content hash. The value columns change only together with a
-- fact_revisions row; corroboration_status is recomputed by each run.
CREATE TABLE IF NOT EXISTS facts (
    fact_id              TEXT PRIMARY KEY,
    content_hash         TEXT NOT NULL UNIQUE,
    company_id           TEXT NOT NULL,
    period_id            TEXT NOT NULL REFERENCES periods(period_id),
    line_item_id         TEXT NOT NULL,
    value_type           TEXT NOT NULL,
    value                REAL NOT NULL,
    multiplier           REAL NOT NULL,
    currency             TEXT,
    scale_confidence     TEXT NOT NULL,
    taxonomy_confidence  REAL NOT NULL,
    document_id          TEXT NOT NULL REFERENCES documents(document_id),
    page                 INTEGER,
    table_name           TEXT,
    row_no               INTEGER,
    column_no            INTEGER,
    observation_id       TEXT NOT NULL REFERENCES observations(observation_id),
    ingested_at          TEXT NOT NULL,
    recorded_at          TEXT NOT NULL,
    corroboration_status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS fact_revisions (
    revision_id             TEXT PRIMARY KEY,
    content_hash            TEXT NOT NULL REFERENCES facts(content_hash),
    previous_value          REAL NOT NULL,
    new_value               REAL NOT NULL,
    previous_observation_id TEXT NOT NULL,
    new_observation_id      TEXT NOT NULL,
    revised_at              TEXT NOT NULL
);

-- Deterministic ids: one row per (observation, reason).
CREATE TABLE IF NOT EXISTS rejections (
    rejection_id   TEXT PRIMARY KEY,
    company_id     TEXT NOT NULL,
    document_id    TEXT NOT NULL REFERENCES documents(document_id),
    observation_id TEXT NOT NULL REFERENCES observations(observation_id),
    reason         TEXT NOT NULL,
    detail         TEXT NOT NULL,
    label          TEXT NOT NULL,
    value_text     TEXT NOT NULL,
    rejected_at    TEXT NOT NULL
);

-- Finding runs are append-only. A run's findings are superseded by the next
-- run for the same company; nothing is updated.
CREATE TABLE IF NOT EXISTS finding_runs (
    run_seq    INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     TEXT NOT NULL UNIQUE,
    company_id TEXT NOT NULL,
    as_of      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS findings (
    run_id              TEXT NOT NULL REFERENCES finding_runs(run_id),
    finding_key         TEXT NOT NULL,
    company_id          TEXT NOT NULL,
    period_id           TEXT NOT NULL,
    line_item_id        TEXT NOT NULL,
    value_type          TEXT NOT NULL,
    kind                TEXT NOT NULL,
    severity            TEXT NOT NULL,
    magnitude           REAL NOT NULL,
    absolute_difference REAL NOT NULL,
    tolerance           REAL NOT NULL,
    evidence_json       TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    PRIMARY KEY (run_id, finding_key)
);

CREATE INDEX IF NOT EXISTS facts_key_idx         ON facts(company_id, period_id, line_item_id, value_type);
CREATE INDEX IF NOT EXISTS observations_doc_idx  ON observations(document_id);
CREATE INDEX IF NOT EXISTS rejections_reason_idx ON rejections(company_id, reason);
CREATE INDEX IF NOT EXISTS finding_runs_co_idx   ON finding_runs(company_id, run_seq);

PRAGMA user_version = 1;
";
