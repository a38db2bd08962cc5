//! Maps raw row labels to canonical line items.
//!
//! The resolver is an immutable index built once from configuration. Company
//! overrides are a separate layer consulted before the global table; they
//! never modify it.

use std::collections::{BTreeSet, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  config::TaxonomyConfig,
  id::string_id,
  observation::CompanyId,
  rejection::{RejectionReason, StageRejection, StageResult},
};

string_id!(
  /// Canonical line-item identifier, e.g. `revenue`.
  LineItemId
);

/// Two different line items scoring within this margin of each other are
/// treated as an ambiguous fuzzy match.
const AMBIGUITY_MARGIN: f64 = 0.02;

/// Label tokens that change the meaning of an otherwise contained alias
/// ("other operating income" is not "operating income").
const QUALIFIERS: &[&str] = &[
  "other", "non", "less", "excluding", "ex", "before", "after", "adjusted",
  "underlying", "net", "gross", "deferred", "accrued",
];

// ─── Types ───────────────────────────────────────────────────────────────────

/// Which financial statement a line item belongs to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StatementCategory {
  IncomeStatement,
  BalanceSheet,
  CashFlow,
  Kpi,
}

/// A taxonomy entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalLineItem {
  pub id:        LineItemId,
  pub name:      String,
  pub category:  StatementCategory,
  /// Normalised alias strings, including the normalised name.
  pub aliases:   BTreeSet<String>,
  /// Corroboration tolerance override (relative difference).
  pub tolerance: Option<f64>,
}

/// How a label was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
  CompanyOverride,
  ExactAlias,
  Fuzzy,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyMatch {
  pub line_item_id: LineItemId,
  /// In `[0, 1]`; exact and override matches are `1.0`.
  pub confidence:   f64,
  pub method:       MatchMethod,
}

// ─── Label normalisation ─────────────────────────────────────────────────────

struct LabelNormalizer {
  bracketed:  Regex,
  note_ref:   Regex,
  enumerator: Regex,
}

impl LabelNormalizer {
  fn new() -> Result<Self> {
    Ok(Self {
      bracketed:  Regex::new(r"\([^)]*\)|\[[^\]]*\]")?,
      note_ref:   Regex::new(r"\bnotes?\s*\d+[a-z]?(?:\s*(?:,|and|&)\s*\d+[a-z]?)*")?,
      enumerator: Regex::new(r"^\s*(?:\d+(?:\.\d+)*[.)]?|[a-z][.)]|[ivx]+[.)])\s+")?,
    })
  }

  /// Lowercase, strip brackets, note references, enumerators, punctuation,
  /// and unit boilerplate; collapse whitespace.
  fn normalize(&self, label: &str) -> String {
    let lowered = label.to_lowercase().replace('&', " and ");
    let stripped = self.bracketed.replace_all(&lowered, " ");
    let stripped = self.note_ref.replace_all(&stripped, " ");
    let stripped = self.enumerator.replace(&stripped, "");

    stripped
      .split(|c: char| !c.is_alphanumeric())
      .filter(|t| !t.is_empty())
      .filter(|t| !matches!(*t, "000" | "000s" | "gbp" | "usd" | "eur"))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Immutable taxonomy snapshot plus per-company override layers.
pub struct TaxonomyResolver {
  version:          String,
  items:            HashMap<LineItemId, CanonicalLineItem>,
  alias_index:      HashMap<String, LineItemId>,
  overrides:        HashMap<CompanyId, HashMap<String, LineItemId>>,
  fuzzy_threshold:  f64,
  max_label_tokens: usize,
  normalizer:       LabelNormalizer,
}

impl TaxonomyResolver {
  /// Build and validate the index.
  pub fn build(config: &TaxonomyConfig) -> Result<Self> {
    if !(0.0..=1.0).contains(&config.fuzzy_threshold) {
      return Err(Error::InvalidThreshold(config.fuzzy_threshold));
    }
    let normalizer = LabelNormalizer::new()?;

    let mut items = HashMap::new();
    let mut alias_index: HashMap<String, LineItemId> = HashMap::new();

    for item in &config.items {
      let id = LineItemId::new(item.id.clone());
      if items.contains_key(&id) {
        return Err(Error::DuplicateLineItem(item.id.clone()));
      }
      if let Some(t) = item.tolerance
        && (!t.is_finite() || t < 0.0)
      {
        return Err(Error::InvalidTolerance(t));
      }

      let aliases: BTreeSet<String> = std::iter::once(item.name.as_str())
        .chain(std::iter::once(item.id.replace('_', " ").as_str()))
        .chain(item.aliases.iter().map(String::as_str))
        .map(|a| normalizer.normalize(a))
        .filter(|a| !a.is_empty())
        .collect();

      for alias in &aliases {
        if let Some(existing) = alias_index.get(alias)
          && existing != &id
        {
          return Err(Error::ConflictingAlias {
            alias:  alias.clone(),
            first:  existing.to_string(),
            second: id.to_string(),
          });
        }
        alias_index.insert(alias.clone(), id.clone());
      }

      items.insert(id.clone(), CanonicalLineItem {
        id,
        name: item.name.clone(),
        category: item.category,
        aliases,
        tolerance: item.tolerance,
      });
    }

    let mut overrides = HashMap::new();
    for (company, table) in &config.overrides {
      let mut layer = HashMap::new();
      for (alias, target) in table {
        let target_id = LineItemId::new(target.clone());
        if !items.contains_key(&target_id) {
          return Err(Error::UnknownLineItem {
            alias:  alias.clone(),
            target: target.clone(),
          });
        }
        let normalized = normalizer.normalize(alias);
        if !normalized.is_empty() {
          layer.insert(normalized, target_id);
        }
      }
      overrides.insert(CompanyId::new(company.clone()), layer);
    }

    Ok(Self {
      version: config.version.clone(),
      items,
      alias_index,
      overrides,
      fuzzy_threshold: config.fuzzy_threshold,
      max_label_tokens: config.max_label_tokens,
      normalizer,
    })
  }

  pub fn version(&self) -> &str { &self.version }

  pub fn item(&self, id: &LineItemId) -> Option<&CanonicalLineItem> {
    self.items.get(id)
  }

  pub fn items(&self) -> impl Iterator<Item = &CanonicalLineItem> {
    self.items.values()
  }

  /// Resolve a raw label for `company`.
  ///
  /// Order: company override exact match, global alias exact match, then the
  /// best fuzzy match over both layers (restricted to `hint`'s statement when
  /// given). Unmapped labels, including narrative text, are rejected with
  /// [`RejectionReason::TaxonomyUnmapped`].
  pub fn resolve(
    &self,
    label: &str,
    company: &CompanyId,
    hint: Option<StatementCategory>,
  ) -> StageResult<TaxonomyMatch> {
    let normalized = self.normalizer.normalize(label);
    if normalized.is_empty() {
      return Err(unmapped(format!("label {label:?} is empty after normalisation")));
    }

    let layer = self.overrides.get(company);
    if let Some(id) = layer.and_then(|l| l.get(&normalized)) {
      return Ok(TaxonomyMatch {
        line_item_id: id.clone(),
        confidence:   1.0,
        method:       MatchMethod::CompanyOverride,
      });
    }
    if let Some(id) = self.alias_index.get(&normalized) {
      return Ok(TaxonomyMatch {
        line_item_id: id.clone(),
        confidence:   1.0,
        method:       MatchMethod::ExactAlias,
      });
    }

    let tokens: Vec<&str> = normalized.split(' ').collect();
    if tokens.len() > self.max_label_tokens {
      return Err(unmapped(format!(
        "label {label:?} has {} words; treated as narrative",
        tokens.len()
      )));
    }

    let candidates = layer
      .into_iter()
      .flat_map(|l| l.iter())
      .chain(self.alias_index.iter())
      .filter(|(_, id)| match (hint, self.items.get(*id)) {
        (Some(category), Some(item)) => item.category == category,
        _ => true,
      });

    let mut best_per_item: HashMap<&LineItemId, f64> = HashMap::new();
    for (alias, id) in candidates {
      let score = similarity(&normalized, &tokens, alias);
      let entry = best_per_item.entry(id).or_insert(0.0);
      if score > *entry {
        *entry = score;
      }
    }

    let mut ranked: Vec<(&LineItemId, f64)> = best_per_item.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    match ranked.as_slice() {
      [] => Err(unmapped(format!("no candidate line items for {label:?}"))),
      [(id, score), ..] if *score < self.fuzzy_threshold => Err(unmapped(format!(
        "best candidate {id} scored {score:.3} below threshold {:.3}",
        self.fuzzy_threshold
      ))),
      [(first, a), (second, b), ..] if a - b <= AMBIGUITY_MARGIN => {
        Err(unmapped(format!(
          "{label:?} matches both {first} ({a:.3}) and {second} ({b:.3})"
        )))
      }
      [(id, score), ..] => Ok(TaxonomyMatch {
        line_item_id: (*id).clone(),
        confidence:   *score,
        method:       MatchMethod::Fuzzy,
      }),
    }
  }
}

fn unmapped(detail: String) -> StageRejection {
  StageRejection::new(RejectionReason::TaxonomyUnmapped, detail)
}

/// Similarity in `[0, 1]`: the larger of normalised edit similarity and a
/// token-containment score for aliases whose every word appears in the label.
fn similarity(label: &str, label_tokens: &[&str], alias: &str) -> f64 {
  let edit = strsim::normalized_levenshtein(label, alias);

  let alias_tokens: Vec<&str> = alias.split(' ').collect();
  let contained = alias_tokens.iter().all(|t| label_tokens.contains(t));
  let qualified = label_tokens
    .iter()
    .any(|t| QUALIFIERS.contains(t) && !alias_tokens.contains(t));

  let containment = if contained && !qualified {
    let coverage = alias_tokens.len() as f64 / label_tokens.len() as f64;
    (0.8 + 0.2 * coverage).min(1.0)
  } else {
    0.0
  };

  edit.max(containment)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::config::{LineItemConfig, TaxonomyConfig};

  fn item(
    id: &str,
    name: &str,
    category: StatementCategory,
    aliases: &[&str],
  ) -> LineItemConfig {
    LineItemConfig {
      id: id.into(),
      name: name.into(),
      category,
      aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
      tolerance: None,
    }
  }

  fn resolver() -> TaxonomyResolver {
    let mut overrides = HashMap::new();
    overrides.insert(
      "acme".to_owned(),
      HashMap::from([("net sales".to_owned(), "revenue".to_owned())]),
    );
    TaxonomyResolver::build(&TaxonomyConfig {
      version: "test".into(),
      fuzzy_threshold: 0.85,
      max_label_tokens: 8,
      items: vec![
        item("revenue", "Revenue", StatementCategory::IncomeStatement, &[
          "turnover",
          "sales",
          "total revenue",
        ]),
        item("cost_of_sales", "Cost of sales", StatementCategory::IncomeStatement, &[
          "cost of goods sold",
          "cogs",
        ]),
        item("operating_income", "Operating income", StatementCategory::IncomeStatement, &[]),
        item("cash", "Cash", StatementCategory::BalanceSheet, &[
          "cash at bank",
          "cash and cash equivalents",
        ]),
      ],
      overrides,
    })
    .unwrap()
  }

  fn acme() -> CompanyId { CompanyId::new("acme") }

  #[test]
  fn exact_alias_after_boilerplate_stripping() {
    let r = resolver();
    let m = r.resolve("  1. TURNOVER (note 3) ", &acme(), None).unwrap();
    assert_eq!(m.line_item_id.as_str(), "revenue");
    assert_eq!(m.method, MatchMethod::ExactAlias);
    assert_eq!(m.confidence, 1.0);

    let m = r.resolve("Cash & cash equivalents (£000)", &acme(), None).unwrap();
    assert_eq!(m.line_item_id.as_str(), "cash");
  }

  #[test]
  fn company_override_is_layered() {
    let r = resolver();
    let m = r.resolve("Net sales", &acme(), None).unwrap();
    assert_eq!(m.method, MatchMethod::CompanyOverride);
    assert_eq!(m.line_item_id.as_str(), "revenue");

    // Other companies never see acme's override.
    let other = CompanyId::new("globex");
    let err = r.resolve("Net sales", &other, None).unwrap_err();
    assert_eq!(err.reason, RejectionReason::TaxonomyUnmapped);
  }

  #[test]
  fn fuzzy_match_within_threshold() {
    let r = resolver();
    let m = r.resolve("Cost of goods sol", &acme(), None).unwrap();
    assert_eq!(m.line_item_id.as_str(), "cost_of_sales");
    assert_eq!(m.method, MatchMethod::Fuzzy);
    assert!(m.confidence >= 0.85 && m.confidence < 1.0);
  }

  #[test]
  fn qualified_labels_do_not_collapse_into_parent() {
    let r = resolver();
    let err = r.resolve("Other operating income", &acme(), None).unwrap_err();
    assert_eq!(err.reason, RejectionReason::TaxonomyUnmapped);
  }

  #[test]
  fn narrative_lines_are_unmapped() {
    let r = resolver();
    let err = r
      .resolve(
        "Revenue grew strongly in the quarter driven by new enterprise contracts",
        &acme(),
        None,
      )
      .unwrap_err();
    assert_eq!(err.reason, RejectionReason::TaxonomyUnmapped);
  }

  #[test]
  fn statement_hint_restricts_fuzzy_candidates() {
    let r = resolver();
    let err = r
      .resolve("Cash at banks", &acme(), Some(StatementCategory::IncomeStatement))
      .unwrap_err();
    assert_eq!(err.reason, RejectionReason::TaxonomyUnmapped);

    let m = r
      .resolve("Cash at banks", &acme(), Some(StatementCategory::BalanceSheet))
      .unwrap();
    assert_eq!(m.line_item_id.as_str(), "cash");
  }

  #[test]
  fn conflicting_aliases_fail_to_load() {
    let err = TaxonomyResolver::build(&TaxonomyConfig {
      items: vec![
        item("revenue", "Revenue", StatementCategory::IncomeStatement, &["sales"]),
        item("other", "Other", StatementCategory::IncomeStatement, &["Sales"]),
      ],
      ..TaxonomyConfig::empty()
    })
    .err()
    .unwrap();
    assert!(matches!(err, Error::ConflictingAlias { .. }));
  }

  #[test]
  fn override_to_unknown_item_fails_to_load() {
    let mut config = TaxonomyConfig::empty();
    config.items =
      vec![item("revenue", "Revenue", StatementCategory::IncomeStatement, &[])];
    config.overrides.insert(
      "acme".into(),
      HashMap::from([("widgets".to_owned(), "widget_sales".to_owned())]),
    );
    let err = TaxonomyResolver::build(&config).err().unwrap();
    assert!(matches!(err, Error::UnknownLineItem { .. }));
  }
}
