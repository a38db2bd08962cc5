//! Period resolution from raw period text to canonical periods.
//!
//! Resolution order: the configured alias dictionary, then structured parsing
//! of the observation's own period text, then the table title and column
//! header, and finally the upload's period hint and filename. Scope markers
//! (YTD, LTM, full year) are kept as a separate dimension so that a
//! year-to-date figure never shares a bucket with a single month.
//!
//! Conflicting signals are rejected, never guessed.

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
};

use chrono::{Datelike, Months, NaiveDate};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  config::PeriodConfig,
  id::string_id,
  rejection::{RejectionReason, StageRejection, StageResult},
};

string_id!(
  /// Canonical period identifier: `"{label}:{scope}"`, e.g. `"2025-02:period"`.
  PeriodId
);

const MONTHS: [&str; 12] = [
  "january", "february", "march", "april", "may", "june", "july", "august",
  "september", "october", "november", "december",
];

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
  Month,
  Quarter,
  Year,
}

impl PeriodType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Month => "month",
      Self::Quarter => "quarter",
      Self::Year => "year",
    }
  }
}

/// Whether a period is a single bucket or an accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodScope {
  /// A single month or quarter.
  Period,
  /// Fiscal year start through the labelled month or quarter.
  Ytd,
  /// A full fiscal year.
  Fy,
  /// Twelve months ending with the labelled month or quarter.
  Ltm,
}

impl PeriodScope {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Period => "period",
      Self::Ytd => "ytd",
      Self::Fy => "fy",
      Self::Ltm => "ltm",
    }
  }
}

/// A canonical time bucket. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
  pub period_id:   PeriodId,
  pub period_type: PeriodType,
  /// `"2025-02"`, `"2025-Q1"`, or `"FY2025"`.
  pub label:       String,
  pub start:       NaiveDate,
  pub end:         NaiveDate,
  pub scope:       PeriodScope,
}

impl Period {
  pub fn id_for(label: &str, scope: PeriodScope) -> PeriodId {
    PeriodId::new(format!("{label}:{}", scope.as_str()))
  }
}

/// Which evidence tier produced a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSource {
  Alias,
  Text,
  Context,
  Hint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPeriod {
  pub period: Period,
  pub source: PeriodSource,
}

/// Text around an observation that may carry period evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodContext<'a> {
  pub table:    Option<&'a str>,
  pub header:   Option<&'a str>,
  pub hint:     Option<&'a str>,
  pub filename: Option<&'a str>,
}

// ─── Internal parse model ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Bucket {
  Month { year: i32, month: u32 },
  Quarter { year: i32, quarter: u32 },
  Year { year: i32 },
}

impl fmt::Display for Bucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Month { year, month } => write!(f, "{year:04}-{month:02}"),
      Self::Quarter { year, quarter } => write!(f, "{year:04}-Q{quarter}"),
      Self::Year { year } => write!(f, "FY{year:04}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
  Bucket(Bucket),
  /// `FY25`, `FY2024/25`: a year named as a fiscal year.
  FiscalYear(i32),
  MonthNoYear(u32),
  QuarterNoYear(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ScopeMarker {
  Ytd,
  Ltm,
  FullYear,
}

const MARKER_PHRASES: &[(&str, ScopeMarker)] = &[
  ("ytd", ScopeMarker::Ytd),
  ("year to date", ScopeMarker::Ytd),
  ("cumulative", ScopeMarker::Ytd),
  ("ltm", ScopeMarker::Ltm),
  ("ttm", ScopeMarker::Ltm),
  ("l12m", ScopeMarker::Ltm),
  ("last twelve months", ScopeMarker::Ltm),
  ("last 12 months", ScopeMarker::Ltm),
  ("trailing twelve months", ScopeMarker::Ltm),
  ("trailing 12 months", ScopeMarker::Ltm),
  ("rolling 12 months", ScopeMarker::Ltm),
  ("12 months to", ScopeMarker::Ltm),
  ("12 months ended", ScopeMarker::Ltm),
  ("12 months ending", ScopeMarker::Ltm),
  ("twelve months to", ScopeMarker::Ltm),
  ("twelve months ended", ScopeMarker::Ltm),
  ("twelve months ending", ScopeMarker::Ltm),
  ("full year", ScopeMarker::FullYear),
  ("year ended", ScopeMarker::FullYear),
  ("year ending", ScopeMarker::FullYear),
  ("financial year", ScopeMarker::FullYear),
  ("fiscal year", ScopeMarker::FullYear),
  ("annual", ScopeMarker::FullYear),
];

struct Scan {
  tokens:  Vec<Token>,
  markers: BTreeSet<ScopeMarker>,
}

/// A single interpreted bucket; `fiscal` records that it came from an `FY`
/// label rather than a bare year.
#[derive(Debug, Clone, Copy)]
struct Reading {
  bucket: Bucket,
  fiscal: bool,
}

struct Patterns {
  iso_date:      Regex,
  day_month:     Regex,
  quarter_first: Regex,
  year_quarter:  Regex,
  iso_month:     Regex,
  fiscal_year:   Regex,
  month_year:    Regex,
  year_month:    Regex,
  word:          Regex,
  bare_quarter:  Regex,
  bare_year:     Regex,
}

impl Patterns {
  fn new() -> Result<Self> {
    Ok(Self {
      iso_date:      Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b")?,
      day_month:     Regex::new(r"\b(\d{1,2})[/.](\d{1,2})[/.](\d{4})\b")?,
      quarter_first: Regex::new(r"\bq([1-4])[\s\-/']*(\d{4}|\d{2})\b")?,
      year_quarter:  Regex::new(r"\b(\d{4})[\s\-/]*q([1-4])\b")?,
      iso_month:     Regex::new(r"\b(\d{4})[-/](\d{1,2})\b")?,
      fiscal_year:   Regex::new(r"\bfy\s*'?(\d{4}|\d{2})(?:\s*[/-]\s*(\d{4}|\d{2}))?\b")?,
      month_year:    Regex::new(r"\b([a-z]{3,9})\.?[\s\-/']*(\d{4}|\d{2})\b")?,
      year_month:    Regex::new(r"\b(\d{4})\s+([a-z]{3,9})\b")?,
      word:          Regex::new(r"\b([a-z]{3,9})\b")?,
      bare_quarter:  Regex::new(r"\bq([1-4])\b")?,
      bare_year:     Regex::new(r"\b((?:19|20)\d{2})\b")?,
    })
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub struct PeriodResolver {
  fiscal_start: u32,
  /// Normalised alias → normalised canonical text.
  aliases:      HashMap<String, String>,
  patterns:     Patterns,
}

impl PeriodResolver {
  /// Build the resolver, validating that every alias names exactly one period.
  pub fn build(config: &PeriodConfig) -> Result<Self> {
    if !(1..=12).contains(&config.fiscal_year_start_month) {
      return Err(Error::InvalidFiscalMonth(config.fiscal_year_start_month));
    }

    let mut resolver = Self {
      fiscal_start: config.fiscal_year_start_month,
      aliases:      HashMap::new(),
      patterns:     Patterns::new()?,
    };

    let mut aliases = HashMap::new();
    for (alias, canonical) in &config.aliases {
      let canonical = normalize(canonical);
      let scan = resolver.scan(&canonical);
      match resolver.read(&scan.tokens, &BTreeSet::new()) {
        Ok(Some(_)) => {}
        Ok(None) => {
          return Err(Error::InvalidPeriodAlias {
            alias:  alias.clone(),
            detail: "no period found".into(),
          });
        }
        Err(detail) => {
          return Err(Error::InvalidPeriodAlias { alias: alias.clone(), detail });
        }
      }
      aliases.insert(normalize(alias), canonical);
    }
    resolver.aliases = aliases;

    Ok(resolver)
  }

  pub fn fiscal_year_start_month(&self) -> u32 { self.fiscal_start }

  /// Resolve raw period text with its surrounding context.
  pub fn resolve(
    &self,
    text: Option<&str>,
    ctx: &PeriodContext<'_>,
  ) -> StageResult<ResolvedPeriod> {
    let text = text.map(normalize).filter(|t| !t.is_empty());

    let context_texts: Vec<String> =
      [ctx.table, ctx.header].into_iter().flatten().map(normalize).collect();
    let hint_texts: Vec<String> =
      [ctx.hint, ctx.filename].into_iter().flatten().map(normalize).collect();

    let mut own_markers = BTreeSet::new();
    let mut found = None;

    if let Some(text) = &text {
      if let Some(canonical) = self.aliases.get(text) {
        let scan = self.scan(canonical);
        own_markers = scan.markers;
        found = self
          .read(&scan.tokens, &BTreeSet::new())
          .map_err(ambiguous)?
          .map(|r| (r, PeriodSource::Alias));
      } else {
        let scan = self.scan(text);
        own_markers = scan.markers;
        let years = self.years_in(context_texts.iter().chain(&hint_texts));
        found = self
          .read(&scan.tokens, &years)
          .map_err(ambiguous)?
          .map(|r| (r, PeriodSource::Text));
      }
    }

    if found.is_none() {
      for (source, texts) in [
        (PeriodSource::Context, &context_texts),
        (PeriodSource::Hint, &hint_texts),
      ] {
        let tokens: Vec<Token> =
          texts.iter().flat_map(|t| self.scan(t).tokens).collect();
        if let Some(reading) =
          self.read(&tokens, &BTreeSet::new()).map_err(ambiguous)?
        {
          found = Some((reading, source));
          break;
        }
      }
    }

    let Some((reading, source)) = found else {
      return Err(ambiguous("no period evidence in text, context, or hint".into()));
    };

    let markers: BTreeSet<ScopeMarker> = if own_markers.is_empty() {
      context_texts.iter().flat_map(|t| markers_in(t)).collect()
    } else {
      own_markers
    };

    let mut markers = markers.into_iter();
    let marker = markers.next();
    if let (Some(a), Some(b)) = (marker, markers.next()) {
      return Err(ambiguous(format!("conflicting scope markers {a:?} and {b:?}")));
    }

    let period = self.build_period(reading, marker).map_err(ambiguous)?;
    Ok(ResolvedPeriod { period, source })
  }

  // ── Scanning ────────────────────────────────────────────────────────────

  fn scan(&self, text: &str) -> Scan {
    let p = &self.patterns;
    let mut work = text.to_owned();
    let mut tokens = Vec::new();

    take(&mut work, &p.iso_date, &mut tokens, |c| {
      let (y, m, d) = (num(c, 1)?, num(c, 2)?, num(c, 3)?);
      NaiveDate::from_ymd_opt(y as i32, m, d)
        .map(|_| Token::Bucket(Bucket::Month { year: y as i32, month: m }))
    });
    take(&mut work, &p.day_month, &mut tokens, |c| {
      let (d, m, y) = (num(c, 1)?, num(c, 2)?, num(c, 3)?);
      NaiveDate::from_ymd_opt(y as i32, m, d)
        .map(|_| Token::Bucket(Bucket::Month { year: y as i32, month: m }))
    });
    take(&mut work, &p.quarter_first, &mut tokens, |c| {
      Some(Token::Bucket(Bucket::Quarter {
        year:    year(c.get(2)?.as_str())?,
        quarter: num(c, 1)?,
      }))
    });
    take(&mut work, &p.year_quarter, &mut tokens, |c| {
      Some(Token::Bucket(Bucket::Quarter {
        year:    year(c.get(1)?.as_str())?,
        quarter: num(c, 2)?,
      }))
    });
    take(&mut work, &p.iso_month, &mut tokens, |c| {
      let month = num(c, 2)?;
      (1..=12).contains(&month).then_some(Token::Bucket(Bucket::Month {
        year: year(c.get(1)?.as_str())?,
        month,
      }))
    });
    take(&mut work, &p.fiscal_year, &mut tokens, |c| {
      let end = c.get(2).or_else(|| c.get(1))?;
      Some(Token::FiscalYear(year(end.as_str())?))
    });
    take(&mut work, &p.month_year, &mut tokens, |c| {
      Some(Token::Bucket(Bucket::Month {
        month: month_number(c.get(1)?.as_str())?,
        year:  year(c.get(2)?.as_str())?,
      }))
    });
    take(&mut work, &p.year_month, &mut tokens, |c| {
      Some(Token::Bucket(Bucket::Month {
        year:  year(c.get(1)?.as_str())?,
        month: month_number(c.get(2)?.as_str())?,
      }))
    });
    take(&mut work, &p.word, &mut tokens, |c| {
      month_number(c.get(1)?.as_str()).map(Token::MonthNoYear)
    });
    take(&mut work, &p.bare_quarter, &mut tokens, |c| {
      num(c, 1).map(Token::QuarterNoYear)
    });
    take(&mut work, &p.bare_year, &mut tokens, |c| {
      Some(Token::Bucket(Bucket::Year { year: year(c.get(1)?.as_str())? }))
    });

    Scan { tokens, markers: markers_in(text) }
  }

  /// Every calendar year mentioned anywhere in `texts`.
  fn years_in<'a>(&self, texts: impl Iterator<Item = &'a String>) -> BTreeSet<i32> {
    texts
      .flat_map(|t| self.scan(t).tokens)
      .filter_map(|t| match t {
        Token::Bucket(Bucket::Month { year, .. })
        | Token::Bucket(Bucket::Quarter { year, .. })
        | Token::Bucket(Bucket::Year { year })
        | Token::FiscalYear(year) => Some(year),
        Token::MonthNoYear(_) | Token::QuarterNoYear(_) => None,
      })
      .collect()
  }

  /// Reduce scanned tokens to at most one bucket. `fallback_years` supplies
  /// the year for a month or quarter printed without one.
  fn read(
    &self,
    tokens: &[Token],
    fallback_years: &BTreeSet<i32>,
  ) -> std::result::Result<Option<Reading>, String> {
    let mut buckets = BTreeSet::new();
    let mut fiscal_years = BTreeSet::new();
    let mut dangling = Vec::new();

    for token in tokens {
      match *token {
        Token::Bucket(b) => {
          buckets.insert(b);
        }
        Token::FiscalYear(y) => {
          fiscal_years.insert(y);
        }
        Token::MonthNoYear(_) | Token::QuarterNoYear(_) => dangling.push(*token),
      }
    }
    dangling.dedup();

    if !dangling.is_empty() {
      if dangling.len() > 1 {
        return Err("several months or quarters without a year".into());
      }
      let bare_years: BTreeSet<i32> = buckets
        .iter()
        .filter_map(|b| match b {
          Bucket::Year { year } => Some(*year),
          _ => None,
        })
        .collect();

      let (year, fiscal) = match (fiscal_years.len(), bare_years.len()) {
        (1, 0) => (fiscal_years.iter().copied().next().unwrap_or_default(), true),
        (0, 1) => (bare_years.iter().copied().next().unwrap_or_default(), false),
        (0, 0) => match fallback_years.len() {
          1 => (fallback_years.iter().copied().next().unwrap_or_default(), false),
          0 => return Err("month or quarter printed without a year".into()),
          _ => return Err("month or quarter without a year; context names several years".into()),
        },
        _ => return Err("month or quarter alongside several years".into()),
      };
      fiscal_years.clear();
      buckets.retain(|b| !matches!(b, Bucket::Year { .. }));

      let bucket = match dangling[0] {
        Token::MonthNoYear(month) if fiscal => Bucket::Month {
          year: self.calendar_year_of_fiscal_month(year, month),
          month,
        },
        Token::MonthNoYear(month) => Bucket::Month { year, month },
        Token::QuarterNoYear(_) if fiscal && self.fiscal_start != 1 => {
          return Err(format!(
            "fiscal quarters are ambiguous when the fiscal year starts in month {}",
            self.fiscal_start
          ));
        }
        Token::QuarterNoYear(quarter) => Bucket::Quarter { year, quarter },
        _ => return Err("unexpected period token".into()),
      };
      buckets.insert(bucket);
    }

    // Years that merely restate the year of a finer bucket add nothing.
    let finer: Vec<Bucket> = buckets
      .iter()
      .copied()
      .filter(|b| !matches!(b, Bucket::Year { .. }))
      .collect();
    let covered = |y: i32| {
      finer.iter().any(|b| match *b {
        Bucket::Month { year, month } => {
          year == y || self.fiscal_year_of(year, month) == y
        }
        Bucket::Quarter { year, quarter } => {
          year == y || self.fiscal_year_of(year, quarter * 3) == y
        }
        Bucket::Year { .. } => false,
      })
    };
    buckets.retain(|b| !matches!(*b, Bucket::Year { year } if covered(year)));
    fiscal_years.retain(|y| !covered(*y));

    let mut readings: Vec<Reading> = buckets
      .iter()
      .filter(|b| !matches!(b, Bucket::Year { year } if fiscal_years.contains(year)))
      .map(|&bucket| Reading { bucket, fiscal: false })
      .collect();
    readings.extend(
      fiscal_years
        .iter()
        .map(|&year| Reading { bucket: Bucket::Year { year }, fiscal: true }),
    );

    match readings.as_slice() {
      [] => Ok(None),
      [only] => Ok(Some(*only)),
      many => Err(format!(
        "conflicting periods: {}",
        many.iter().map(|r| r.bucket.to_string()).collect::<Vec<_>>().join(", ")
      )),
    }
  }

  // ── Calendar arithmetic ─────────────────────────────────────────────────

  /// The fiscal year (named by its ending calendar year) containing a month.
  fn fiscal_year_of(&self, year: i32, month: u32) -> i32 {
    if self.fiscal_start != 1 && month >= self.fiscal_start { year + 1 } else { year }
  }

  fn fiscal_end_month(&self) -> u32 {
    if self.fiscal_start == 1 { 12 } else { self.fiscal_start - 1 }
  }

  fn calendar_year_of_fiscal_month(&self, fiscal_year: i32, month: u32) -> i32 {
    if self.fiscal_start != 1 && month >= self.fiscal_start {
      fiscal_year - 1
    } else {
      fiscal_year
    }
  }

  fn build_period(
    &self,
    reading: Reading,
    marker: Option<ScopeMarker>,
  ) -> std::result::Result<Period, String> {
    let bucket = match (reading.bucket, marker) {
      // "Year ended 31 December 2024" names a year by its closing month.
      (Bucket::Month { year, month }, Some(ScopeMarker::FullYear))
        if month == self.fiscal_end_month() =>
      {
        Bucket::Year { year: self.fiscal_year_of(year, month) }
      }
      (bucket, _) => bucket,
    };
    let (period_type, end_year, end_month) = match bucket {
      Bucket::Month { year, month } => (PeriodType::Month, year, month),
      Bucket::Quarter { year, quarter } => (PeriodType::Quarter, year, quarter * 3),
      Bucket::Year { year } => (PeriodType::Year, year, self.fiscal_end_month()),
    };
    let end = month_end(end_year, end_month)?;

    let (scope, start) = match (bucket, marker) {
      (Bucket::Year { .. }, None | Some(ScopeMarker::FullYear)) => {
        (PeriodScope::Fy, shift_months(month_start(end_year, end_month)?, -11)?)
      }
      (Bucket::Year { .. }, Some(m)) => {
        return Err(format!("{m:?} needs a month or quarter, got {bucket}"));
      }
      (_, Some(ScopeMarker::FullYear)) => {
        return Err(format!(
          "full-year marker on {bucket}, which does not end the fiscal year"
        ));
      }
      (Bucket::Month { year, month }, None) => {
        (PeriodScope::Period, month_start(year, month)?)
      }
      (Bucket::Quarter { year, quarter }, None) => {
        (PeriodScope::Period, month_start(year, quarter * 3 - 2)?)
      }
      (_, Some(ScopeMarker::Ytd)) => {
        let start_year = if end_month >= self.fiscal_start { end_year } else { end_year - 1 };
        (PeriodScope::Ytd, month_start(start_year, self.fiscal_start)?)
      }
      (_, Some(ScopeMarker::Ltm)) => {
        (PeriodScope::Ltm, shift_months(month_start(end_year, end_month)?, -11)?)
      }
    };

    let label = bucket.to_string();
    tracing::trace!(%label, fiscal = reading.fiscal, scope = scope.as_str(), "period built");
    Ok(Period {
      period_id: Period::id_for(&label, scope),
      period_type,
      label,
      start,
      end,
      scope,
    })
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn ambiguous(detail: String) -> StageRejection {
  StageRejection::new(RejectionReason::PeriodAmbiguous, detail)
}

fn normalize(text: &str) -> String {
  text
    .to_lowercase()
    .replace('_', " ")
    .replace('\u{2019}', "'")
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn markers_in(text: &str) -> BTreeSet<ScopeMarker> {
  let lowered = text.to_lowercase();
  let words: Vec<&str> = lowered
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .collect();
  let padded = format!(" {} ", words.join(" "));
  let mut markers: BTreeSet<ScopeMarker> = MARKER_PHRASES
    .iter()
    .filter(|(phrase, _)| padded.contains(&format!(" {phrase} ")))
    .map(|(_, marker)| *marker)
    .collect();

  // A standalone "FY" marks a full year; "FY 25" is a fiscal year label.
  let standalone_fy = words.iter().enumerate().any(|(i, w)| {
    *w == "fy"
      && !words.get(i + 1).is_some_and(|next| next.chars().all(|c| c.is_ascii_digit()))
  });
  if standalone_fy {
    markers.insert(ScopeMarker::FullYear);
  }
  markers
}

/// Apply `re` to `work`, turning accepted matches into tokens and blanking
/// them so later, looser patterns cannot re-read the same characters.
fn take(
  work: &mut String,
  re: &Regex,
  tokens: &mut Vec<Token>,
  accept: impl Fn(&Captures<'_>) -> Option<Token>,
) {
  let mut spans = Vec::new();
  for caps in re.captures_iter(work.as_str()) {
    if let Some(token) = accept(&caps)
      && let Some(m) = caps.get(0)
    {
      tokens.push(token);
      spans.push(m.range());
    }
  }
  for span in spans {
    let blank = " ".repeat(span.len());
    work.replace_range(span, &blank);
  }
}

fn num(caps: &Captures<'_>, group: usize) -> Option<u32> {
  caps.get(group)?.as_str().parse().ok()
}

fn year(text: &str) -> Option<i32> {
  let n: i32 = text.parse().ok()?;
  let year = if text.len() == 2 { 2000 + n } else { n };
  (1900..=2099).contains(&year).then_some(year)
}

fn month_number(word: &str) -> Option<u32> {
  if word == "sept" {
    return Some(9);
  }
  if word.len() < 3 {
    return None;
  }
  MONTHS
    .iter()
    .position(|m| m.starts_with(word))
    .map(|i| i as u32 + 1)
}

fn month_start(year: i32, month: u32) -> std::result::Result<NaiveDate, String> {
  NaiveDate::from_ymd_opt(year, month, 1)
    .ok_or_else(|| format!("invalid month {year}-{month}"))
}

fn month_end(year: i32, month: u32) -> std::result::Result<NaiveDate, String> {
  let next = shift_months(month_start(year, month)?, 1)?;
  next
    .pred_opt()
    .filter(|d| d.month() == month)
    .ok_or_else(|| format!("invalid month {year}-{month}"))
}

fn shift_months(date: NaiveDate, delta: i32) -> std::result::Result<NaiveDate, String> {
  let shifted = if delta >= 0 {
    date.checked_add_months(Months::new(delta as u32))
  } else {
    date.checked_sub_months(Months::new(delta.unsigned_abs()))
  };
  shifted.ok_or_else(|| format!("date out of range shifting {date} by {delta} months"))
}
