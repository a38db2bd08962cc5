//! Pipeline configuration and the immutable reference snapshot built from it.
//!
//! Configuration is deserialised from the service's layered config sources.
//! [`ReferenceSnapshot::load`] validates it once and freezes it into lookup
//! indices that are shared read-only (`Arc`) by every concurrent run.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
  Result,
  corroboration::{ClosurePolicy, CorroborationSettings},
  period::PeriodResolver,
  scale::ScaleNormalizer,
  taxonomy::{LineItemId, StatementCategory, TaxonomyResolver},
};

// ─── Config sections ─────────────────────────────────────────────────────────

/// Root of the pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub taxonomy:      TaxonomyConfig,
  pub periods:       PeriodConfig,
  pub corroboration: CorroborationConfig,
}

/// One taxonomy entry as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemConfig {
  pub id:        String,
  pub name:      String,
  pub category:  StatementCategory,
  #[serde(default)]
  pub aliases:   Vec<String>,
  /// Relative corroboration tolerance for this item.
  #[serde(default)]
  pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
  /// Version tag of the alias table, recorded in logs for each run.
  pub version:          String,
  /// Minimum fuzzy similarity for a match.
  pub fuzzy_threshold:  f64,
  /// Labels with more words than this are narrative, never line items.
  pub max_label_tokens: usize,
  pub items:            Vec<LineItemConfig>,
  /// Company id → (alias → line item id).
  pub overrides:        HashMap<String, HashMap<String, String>>,
}

impl TaxonomyConfig {
  /// A configuration with no line items.
  pub fn empty() -> Self {
    Self {
      version:          "empty".into(),
      fuzzy_threshold:  0.85,
      max_label_tokens: 8,
      items:            Vec::new(),
      overrides:        HashMap::new(),
    }
  }
}

impl Default for TaxonomyConfig {
  fn default() -> Self {
    use StatementCategory::*;

    let item = |id: &str, name: &str, category, aliases: &[&str]| LineItemConfig {
      id: id.into(),
      name: name.into(),
      category,
      aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
      tolerance: None,
    };

    Self {
      version: "builtin-1".into(),
      items: vec![
        item("revenue", "Revenue", IncomeStatement, &[
          "turnover",
          "sales",
          "total revenue",
          "total turnover",
          "income from sales",
        ]),
        item("cost_of_sales", "Cost of sales", IncomeStatement, &[
          "cost of goods sold",
          "cogs",
          "direct costs",
          "total cost of sales",
        ]),
        item("gross_profit", "Gross profit", IncomeStatement, &["gross margin"]),
        item("operating_expenses", "Operating expenses", IncomeStatement, &[
          "overheads",
          "administrative expenses",
          "total overheads",
          "opex",
        ]),
        item("ebitda", "EBITDA", IncomeStatement, &["adjusted ebitda"]),
        item("operating_profit", "Operating profit", IncomeStatement, &[
          "ebit",
          "operating income",
        ]),
        item("profit_before_tax", "Profit before tax", IncomeStatement, &[
          "pbt",
          "profit before taxation",
        ]),
        item("net_profit", "Net profit", IncomeStatement, &[
          "profit after tax",
          "profit for the period",
          "net income",
        ]),
        item("cash", "Cash", BalanceSheet, &[
          "cash at bank",
          "cash at bank and in hand",
          "cash and cash equivalents",
        ]),
        item("trade_debtors", "Trade debtors", BalanceSheet, &[
          "trade receivables",
          "accounts receivable",
        ]),
        item("trade_creditors", "Trade creditors", BalanceSheet, &[
          "trade payables",
          "accounts payable",
        ]),
        item("net_assets", "Net assets", BalanceSheet, &[
          "total equity",
          "shareholders funds",
        ]),
        item("operating_cash_flow", "Operating cash flow", CashFlow, &[
          "net cash from operating activities",
          "cash generated from operations",
        ]),
        item("headcount", "Headcount", Kpi, &["fte", "employees"]),
      ],
      ..Self::empty()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
  /// First month (1–12) of the fiscal year.
  pub fiscal_year_start_month: u32,
  /// Raw period text → canonical period text (anything the structured parser
  /// accepts, e.g. `"2025-02"`, `"2025-Q1"`, `"FY2025"`, `"YTD 2025-02"`).
  pub aliases:                 HashMap<String, String>,
}

impl Default for PeriodConfig {
  fn default() -> Self {
    Self { fiscal_year_start_month: 1, aliases: HashMap::new() }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorroborationConfig {
  /// Relative difference above which two observations disagree.
  pub default_tolerance:              f64,
  /// Tolerance multiplier applied when either side's scale was assumed.
  pub assumed_scale_tolerance_factor: f64,
  pub closure:                        ClosurePolicy,
}

impl Default for CorroborationConfig {
  fn default() -> Self {
    Self {
      default_tolerance:              0.01,
      assumed_scale_tolerance_factor: 0.5,
      closure:                        ClosurePolicy::default(),
    }
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Versioned, read-only reference data for pipeline runs.
pub struct ReferenceSnapshot {
  pub taxonomy:      TaxonomyResolver,
  pub periods:       PeriodResolver,
  pub scale:         ScaleNormalizer,
  pub corroboration: CorroborationSettings,
}

impl ReferenceSnapshot {
  pub fn load(config: &PipelineConfig) -> Result<Self> {
    let taxonomy = TaxonomyResolver::build(&config.taxonomy)?;
    let periods = PeriodResolver::build(&config.periods)?;

    let per_line_item: HashMap<LineItemId, f64> = taxonomy
      .items()
      .filter_map(|item| item.tolerance.map(|t| (item.id.clone(), t)))
      .collect();
    let corroboration =
      CorroborationSettings::new(&config.corroboration, per_line_item)?;

    tracing::info!(
      taxonomy_version = taxonomy.version(),
      line_items = taxonomy.items().count(),
      "reference snapshot loaded"
    );

    Ok(Self { taxonomy, periods, scale: ScaleNormalizer::new(), corroboration })
  }
}
