//! Scale, sign, and currency normalisation.
//!
//! A printed value such as `"(2,390,873)"` says nothing about units on its
//! own. The multiplier and the currency are each taken from the most local
//! context level that carries evidence: the value text itself, then the cell,
//! row, column header, table title, and document. Conflicting evidence at the
//! deciding level is a rejection. When no level says anything the multiplier
//! is 1 and the result is flagged [`ScaleConfidence::AssumedDefault`].

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::rejection::{RejectionReason, StageRejection, StageResult};

const CURRENCY_SYMBOLS: &[(char, &str)] = &[('£', "GBP"), ('$', "USD"), ('€', "EUR")];
const CURRENCY_CODES: &[&str] = &["gbp", "usd", "eur"];

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleConfidence {
  /// Some context level stated the scale.
  Explicit,
  /// Nothing stated a scale; a multiplier of 1 was assumed.
  AssumedDefault,
}

impl ScaleConfidence {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Explicit => "explicit",
      Self::AssumedDefault => "assumed_default",
    }
  }

  /// Higher is better. Used by best-view ordering.
  pub fn rank(self) -> u8 {
    match self {
      Self::Explicit => 1,
      Self::AssumedDefault => 0,
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "explicit" => Some(Self::Explicit),
      "assumed_default" => Some(Self::AssumedDefault),
      _ => None,
    }
  }
}

/// Context level that decided the multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLevel {
  Value,
  Cell,
  Row,
  Column,
  Table,
  Document,
  Default,
}

impl fmt::Display for EvidenceLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Value => "value",
      Self::Cell => "cell",
      Self::Row => "row",
      Self::Column => "column",
      Self::Table => "table",
      Self::Document => "document",
      Self::Default => "default",
    };
    f.write_str(s)
  }
}

/// Unit hints around a value, most local first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleContext<'a> {
  pub cell:     Option<&'a str>,
  pub row:      Option<&'a str>,
  pub column:   Option<&'a str>,
  pub table:    Option<&'a str>,
  pub document: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedValue {
  /// Signed value in base units.
  pub value:        f64,
  /// The number as printed, signed, before the multiplier.
  pub raw_number:   f64,
  pub multiplier:   f64,
  /// ISO code, when any level names one.
  pub currency:     Option<String>,
  pub confidence:   ScaleConfidence,
  pub scale_source: EvidenceLevel,
  pub percent:      bool,
}

// ─── Evidence ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Evidence {
  /// Powers of ten.
  exponents:  BTreeSet<u32>,
  currencies: BTreeSet<&'static str>,
}

impl Evidence {
  fn from_text(text: &str) -> Self {
    let mut evidence = Self::default();
    let lowered = text.to_lowercase().replace('\u{2019}', "'");

    for raw in lowered.split(|c: char| c.is_whitespace() || matches!(c, '/' | '|')) {
      let token = raw.trim_matches(|c: char| "()[]{}.,:;".contains(c));
      if token.is_empty() {
        continue;
      }

      let (currency, rest) = split_currency_prefix(token);
      if let Some(currency) = currency {
        evidence.currencies.insert(currency);
      }
      let rest = rest.trim_start_matches('\'');

      let exponent = match rest {
        "000" | "000s" => Some(3),
        "thousand" | "thousands" => Some(3),
        "million" | "millions" => Some(6),
        "billion" | "billions" => Some(9),
        // Single letters only count when they hang off a currency.
        "k" if currency.is_some() => Some(3),
        "m" | "mn" | "mm" if currency.is_some() => Some(6),
        "b" | "bn" if currency.is_some() => Some(9),
        _ => None,
      };
      if let Some(exponent) = exponent {
        evidence.exponents.insert(exponent);
      }
    }

    evidence
  }
}

fn split_currency_prefix(token: &str) -> (Option<&'static str>, &str) {
  for &(symbol, code) in CURRENCY_SYMBOLS {
    if let Some(rest) = token.strip_prefix(symbol) {
      return (Some(code), rest);
    }
  }
  for &code in CURRENCY_CODES {
    // "eur" must not claim "europe".
    if let Some(rest) = token.strip_prefix(code) {
      let unit = matches!(rest, "k" | "m" | "mn" | "bn");
      if unit || !rest.starts_with(|c: char| c.is_alphabetic()) {
        return (Some(upper(code)), rest);
      }
    }
  }
  (None, token)
}

fn upper(code: &str) -> &'static str {
  match code {
    "gbp" => "GBP",
    "usd" => "USD",
    _ => "EUR",
  }
}

// ─── Value text ──────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct ParsedValue {
  number:   f64,
  exponent: Option<u32>,
  currency: Option<&'static str>,
  percent:  bool,
}

fn unresolved(detail: impl Into<String>) -> StageRejection {
  StageRejection::new(RejectionReason::ScaleUnresolved, detail)
}

fn parse_value(text: &str) -> StageResult<ParsedValue> {
  let mut s = text
    .trim()
    .to_lowercase()
    .replace(['\u{2212}', '\u{2013}', '\u{2014}'], "-")
    .replace('\u{a0}', " ");

  if s.is_empty() {
    return Err(unresolved("empty value"));
  }
  if matches!(s.as_str(), "n/a" | "na" | "n.a." | "nm" | "n/m" | "tbc") {
    return Err(unresolved(format!("no numeric value in {text:?}")));
  }
  if s.chars().all(|c| c == '-') {
    return Ok(ParsedValue { number: 0.0, exponent: None, currency: None, percent: false });
  }

  let mut negative = false;
  let mut currency = None;

  // Sign and currency may nest either way round: "£(1,234)", "(£1,234)",
  // "-£1,234", "£-1,234".
  for _ in 0..2 {
    let trimmed = s.trim();
    if let Some(inner) = trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
      negative = !negative;
      s = inner.to_owned();
      continue;
    }
    if let Some(inner) = trimmed.strip_prefix('-') {
      negative = !negative;
      s = inner.to_owned();
      continue;
    }
    if let Some(inner) = trimmed.strip_suffix('-') {
      negative = !negative;
      s = inner.to_owned();
      continue;
    }
    if currency.is_none()
      && let (Some(code), rest) = split_currency_prefix(trimmed)
    {
      currency = Some(code);
      s = rest.to_owned();
      continue;
    }
    s = trimmed.to_owned();
  }

  let mut body = s.trim().to_owned();
  for &code in CURRENCY_CODES {
    if let Some(rest) = body.strip_suffix(code) {
      if currency.is_some_and(|c| c != upper(code)) {
        return Err(unresolved(format!("two currencies in {text:?}")));
      }
      currency = Some(upper(code));
      body = rest.trim_end().to_owned();
      break;
    }
  }

  let percent = body.ends_with('%');
  if percent {
    body.pop();
  }
  let body = body.trim_end();

  let (digits, exponent) = if let Some(rest) = body.strip_suffix("bn") {
    (rest, Some(9))
  } else if let Some(rest) = body.strip_suffix("mn") {
    (rest, Some(6))
  } else if let Some(rest) = body.strip_suffix('m') {
    (rest, Some(6))
  } else if let Some(rest) = body.strip_suffix('k') {
    (rest, Some(3))
  } else {
    (body, None)
  };

  let cleaned: String = digits
    .chars()
    .filter(|c| !matches!(c, ',' | ' ' | '\''))
    .collect();
  let well_formed = !cleaned.is_empty()
    && cleaned.chars().any(|c| c.is_ascii_digit())
    && cleaned.chars().all(|c| c.is_ascii_digit() || c == '.')
    && cleaned.matches('.').count() <= 1;
  if !well_formed {
    return Err(unresolved(format!("unparseable value {text:?}")));
  }
  let magnitude: f64 = cleaned
    .parse()
    .map_err(|_| unresolved(format!("unparseable value {text:?}")))?;

  Ok(ParsedValue {
    number: if negative { -magnitude } else { magnitude },
    exponent,
    currency,
    percent,
  })
}

// ─── Normaliser ──────────────────────────────────────────────────────────────

/// Stateless; the context hierarchy is the only input beyond the value text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleNormalizer;

impl ScaleNormalizer {
  pub fn new() -> Self { Self }

  pub fn normalize(
    &self,
    value_text: &str,
    ctx: &ScaleContext<'_>,
  ) -> StageResult<NormalizedValue> {
    let parsed = parse_value(value_text)?;

    let mut levels = vec![(EvidenceLevel::Value, Evidence {
      exponents:  parsed.exponent.into_iter().collect(),
      currencies: parsed.currency.into_iter().collect(),
    })];
    for (level, text) in [
      (EvidenceLevel::Cell, ctx.cell),
      (EvidenceLevel::Row, ctx.row),
      (EvidenceLevel::Column, ctx.column),
      (EvidenceLevel::Table, ctx.table),
      (EvidenceLevel::Document, ctx.document),
    ] {
      if let Some(text) = text {
        levels.push((level, Evidence::from_text(text)));
      }
    }

    let currency = match levels.iter().find(|(_, e)| !e.currencies.is_empty()) {
      None => None,
      Some((level, e)) if e.currencies.len() > 1 => {
        return Err(unresolved(format!(
          "conflicting currencies at {level} level: {:?}",
          e.currencies
        )));
      }
      Some((_, e)) => e.currencies.iter().next().map(|c| (*c).to_owned()),
    };

    // Percentages are ratios; context multipliers never apply.
    if parsed.percent {
      return Ok(NormalizedValue {
        value: parsed.number,
        raw_number: parsed.number,
        multiplier: 1.0,
        currency: None,
        confidence: ScaleConfidence::Explicit,
        scale_source: EvidenceLevel::Value,
        percent: true,
      });
    }

    let (exponent, confidence, scale_source) =
      match levels.iter().find(|(_, e)| !e.exponents.is_empty()) {
        None => (0, ScaleConfidence::AssumedDefault, EvidenceLevel::Default),
        Some((level, e)) if e.exponents.len() > 1 => {
          return Err(unresolved(format!(
            "conflicting scale at {level} level: {:?}",
            e.exponents.iter().map(|x| 10f64.powi(*x as i32)).collect::<Vec<_>>()
          )));
        }
        Some((level, e)) => (
          e.exponents.iter().next().copied().unwrap_or_default(),
          ScaleConfidence::Explicit,
          *level,
        ),
      };

    let multiplier = 10f64.powi(exponent as i32);
    Ok(NormalizedValue {
      value: parsed.number * multiplier,
      raw_number: parsed.number,
      multiplier,
      currency,
      confidence,
      scale_source,
      percent: false,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn normalize(value: &str, ctx: ScaleContext<'_>) -> StageResult<NormalizedValue> {
    ScaleNormalizer::new().normalize(value, &ctx)
  }

  #[test]
  fn table_thousands_with_cell_currency() {
    let got = normalize("2,390,873", ScaleContext {
      cell: Some("£"),
      table: Some("£000"),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(got.value, 2_390_873_000.0);
    assert_eq!(got.multiplier, 1000.0);
    assert_eq!(got.currency.as_deref(), Some("GBP"));
    assert_eq!(got.confidence, ScaleConfidence::Explicit);
    assert_eq!(got.scale_source, EvidenceLevel::Table);
  }

  #[test]
  fn no_evidence_assumes_units() {
    let got = normalize("1,250", ScaleContext::default()).unwrap();
    assert_eq!(got.value, 1250.0);
    assert_eq!(got.multiplier, 1.0);
    assert_eq!(got.confidence, ScaleConfidence::AssumedDefault);
    assert_eq!(got.scale_source, EvidenceLevel::Default);
  }

  #[test]
  fn parentheses_and_minus_are_negative() {
    for text in ["(1,234)", "-1,234", "1,234-", "\u{2212}1,234", "£(1,234)", "(£1,234)"] {
      let got = normalize(text, ScaleContext::default()).unwrap();
      assert_eq!(got.value, -1234.0, "{text}");
    }
  }

  #[test]
  fn value_suffix_beats_table() {
    let got = normalize("£2.5m", ScaleContext {
      table: Some("Summary (£000)"),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(got.value, 2_500_000.0);
    assert_eq!(got.scale_source, EvidenceLevel::Value);
  }

  #[test]
  fn column_header_units() {
    let got = normalize("42", ScaleContext {
      column: Some("Feb 2025 (£'000)"),
      document: Some("All figures in £m"),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(got.value, 42_000.0);
    assert_eq!(got.scale_source, EvidenceLevel::Column);
  }

  #[test]
  fn words_count_as_evidence() {
    let got = normalize("3.2", ScaleContext {
      document: Some("Amounts in USD millions"),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(got.multiplier, 1_000_000.0);
    assert_eq!(got.currency.as_deref(), Some("USD"));
  }

  #[test]
  fn bare_letters_without_currency_are_not_scale() {
    let got = normalize("10", ScaleContext {
      row: Some("Plan m"),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(got.confidence, ScaleConfidence::AssumedDefault);
  }

  #[test]
  fn conflicting_scale_is_rejected() {
    let err = normalize("10", ScaleContext {
      table: Some("£000 / £m"),
      ..Default::default()
    })
    .unwrap_err();
    assert_eq!(err.reason, RejectionReason::ScaleUnresolved);
  }

  #[test]
  fn percentages_ignore_context_scale() {
    let got = normalize("12.5%", ScaleContext {
      table: Some("£000"),
      ..Default::default()
    })
    .unwrap();
    assert!(got.percent);
    assert_eq!(got.value, 12.5);
    assert_eq!(got.multiplier, 1.0);
  }

  #[test]
  fn dashes_are_zero_and_na_is_rejected() {
    assert_eq!(normalize("-", ScaleContext::default()).unwrap().value, 0.0);
    for text in ["n/a", "", "abc", "1.2.3"] {
      let err = normalize(text, ScaleContext::default()).unwrap_err();
      assert_eq!(err.reason, RejectionReason::ScaleUnresolved, "{text}");
    }
  }
}
