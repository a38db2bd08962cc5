//! `finpack` command-line tool for ingesting and querying financial packs.
//!
//! # Usage
//!
//! ```text
//! finpack ingest acme extracted/board-pack-jun.json --filename "Board pack June 2025.pdf"
//! finpack corroborate acme
//! finpack best-view acme revenue 2025-06:period
//! finpack close-period acme 2025-06
//! finpack serve
//! ```

mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use finpack_core::{
  config::ReferenceSnapshot,
  fact::FactKey,
  observation::{CompanyId, DocumentId, SourceDocument, parse_extractor_output},
  period::PeriodId,
  pipeline::Pipeline,
  rejection::RejectionReason,
  store::{FactQuery, FactStore, RejectionQuery},
  taxonomy::LineItemId,
  value_type::ValueType,
};
use finpack_store_sqlite::SqliteStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "finpack", version, about = "Canonical fact pipeline for financial packs")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "finpack.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Ingest one document's extractor output (a JSON array of observations).
  Ingest {
    company:     String,
    file:        PathBuf,
    /// Defaults to the SHA-256 of the file contents.
    #[arg(long)]
    document_id: Option<String>,
    /// Original document file name; used as a period hint of last resort.
    #[arg(long)]
    filename:    Option<String>,
    #[arg(long)]
    ingested_at: Option<DateTime<Utc>>,
  },
  /// Compare every fact of a company across documents.
  Corroborate {
    company: String,
    #[arg(long)]
    as_of:   Option<DateTime<Utc>>,
  },
  /// Show the current-truth fact for one key.
  BestView {
    company:    String,
    line_item:  String,
    /// Period id, e.g. `2025-06:period` or `FY2025:fy`.
    period_id:  String,
    #[arg(long, default_value = "actual")]
    value_type: ValueType,
  },
  /// List facts of a company.
  Facts {
    company:   String,
    #[arg(long)]
    line_item: Option<String>,
    #[arg(long)]
    from:      Option<NaiveDate>,
    #[arg(long)]
    to:        Option<NaiveDate>,
  },
  /// List findings of a company.
  Findings {
    company: String,
    /// Include findings superseded by later runs.
    #[arg(long)]
    all:     bool,
  },
  /// List rejected observations.
  Rejections {
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    reason:  Option<RejectionReason>,
  },
  /// Mark a period label (e.g. `2025-06`) closed for a company.
  ClosePeriod { company: String, label: String },
  /// Serve the JSON API.
  Serve,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let service = ServiceConfig::load(&cli.config)?;

  let snapshot =
    ReferenceSnapshot::load(&service.pipeline).context("invalid pipeline configuration")?;
  let pipeline = Arc::new(Pipeline::new(Arc::new(snapshot)));

  let store_path = service.store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Ingest { company, file, document_id, filename, ingested_at } => {
      let bytes = std::fs::read(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
      let observations = parse_extractor_output(&String::from_utf8_lossy(&bytes));
      let document = SourceDocument {
        document_id: DocumentId::new(
          document_id.unwrap_or_else(|| hex::encode(Sha256::digest(&bytes))),
        ),
        company_id:  CompanyId::new(company),
        filename:    filename
          .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned())),
        ingested_at: ingested_at.unwrap_or_else(Utc::now),
      };
      print_json(&pipeline.ingest(&store, document, observations).await?)
    }

    Command::Corroborate { company, as_of } => {
      let company = CompanyId::new(company);
      let as_of = as_of.unwrap_or_else(Utc::now);
      print_json(&pipeline.corroborate(&store, &company, as_of).await?)
    }

    Command::BestView { company, line_item, period_id, value_type } => {
      let key = FactKey {
        company_id: CompanyId::new(company),
        period_id: PeriodId::new(period_id),
        line_item_id: LineItemId::new(line_item),
        value_type,
      };
      print_json(&pipeline.best_view(&store, &key).await?)
    }

    Command::Facts { company, line_item, from, to } => {
      let query = FactQuery {
        company_id: Some(CompanyId::new(company)),
        line_item_id: line_item.map(LineItemId::new),
        period_from: from,
        period_to: to,
        ..Default::default()
      };
      print_json(&store.list_facts(&query).await?)
    }

    Command::Findings { company, all } => {
      print_json(&store.list_findings(CompanyId::new(company), all).await?)
    }

    Command::Rejections { company, reason } => {
      let query = RejectionQuery {
        company_id: company.map(CompanyId::new),
        reason,
        ..Default::default()
      };
      print_json(&store.list_rejections(&query).await?)
    }

    Command::ClosePeriod { company, label } => {
      store.close_period(CompanyId::new(company), label.clone()).await?;
      tracing::info!(%label, "period closed");
      Ok(())
    }

    Command::Serve => serve(&service, store, pipeline).await,
  }
}

async fn serve(service: &ServiceConfig, store: SqliteStore, pipeline: Arc<Pipeline>) -> Result<()> {
  let app = Router::new()
    .nest("/api", finpack_api::api_router(Arc::new(store), pipeline))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", service.host, service.port);

  tracing::info!("Listening on http://{address}/api");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
