//! Column type inference over raw scraped strings.
//!
//! Types live on a three-step lattice, `integer ⊂ real ⊂ text`, and every
//! decision made here is a point on it. Cleaning is shared with staging so a
//! value that looked numeric while profiling coerces the same way later.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cell values treated as missing after trimming.
const NULL_TOKENS: &[&str] = &["nan", "n/a", "na", "null", "none", "\u{2014}", "-", "--"];

const IDENTIFIER_NAMES: &[&str] = &[
    "player",
    "player_name",
    "nation",
    "pos",
    "position",
    "squad",
    "team",
    "club",
    "comp",
    "competition",
    "country",
    "season",
    "opponent",
];

const COUNT_NAMES: &[&str] = &[
    "rk",
    "rank",
    "age",
    "born",
    "birth_year",
    "mp",
    "matches_played",
    "starts",
    "min",
    "mins",
    "minutes",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Real,
    Text,
}

impl SemanticType {
    /// Least type able to hold values of both `self` and `other`.
    pub fn promote(self, other: SemanticType) -> SemanticType {
        self.max(other)
    }

    pub fn promote_all<I>(types: I) -> Option<SemanticType>
    where
        I: IntoIterator<Item = SemanticType>,
    {
        types.into_iter().reduce(SemanticType::promote)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Real => "real",
            SemanticType::Text => "text",
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            SemanticType::Integer => "BIGINT",
            SemanticType::Real => "DOUBLE PRECISION",
            SemanticType::Text => "TEXT",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SemanticType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" | "bigint" => Ok(SemanticType::Integer),
            "real" | "float" | "double" | "double precision" => Ok(SemanticType::Real),
            "text" | "string" | "varchar" => Ok(SemanticType::Text),
            other => Err(anyhow::anyhow!(
                "Unknown semantic type '{other}'. Supported types: integer, real, text"
            )),
        }
    }
}

/// A raw cell after the shared cleaning rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedValue {
    pub text: String,
    pub was_percent: bool,
}

/// Trim, null-out placeholders, turn `(x)` into `-x`, drop thousands
/// separators and a leading `+`, and strip a trailing `%`.
pub fn clean_value(raw: &str) -> Option<CleanedValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_null_token(trimmed) {
        return None;
    }

    let mut body = trimmed.to_string();
    if body.len() > 2 && body.starts_with('(') && body.ends_with(')') {
        let inner = body[1..body.len() - 1].trim().to_string();
        body = format!("-{inner}");
    }
    body.retain(|ch| ch != ',');
    if let Some(rest) = body.strip_prefix('+') {
        body = rest.to_string();
    }
    let mut was_percent = false;
    if let Some(rest) = body.strip_suffix('%') {
        body = rest.trim_end().to_string();
        was_percent = true;
    }
    if body.is_empty() {
        return None;
    }
    Some(CleanedValue {
        text: body,
        was_percent,
    })
}

fn is_null_token(value: &str) -> bool {
    let lowered = value.to_lowercase();
    NULL_TOKENS.iter().any(|token| lowered == *token)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericLiteral {
    Integer(i64),
    Real(f64),
}

impl NumericLiteral {
    pub fn as_f64(self) -> f64 {
        match self {
            NumericLiteral::Integer(value) => value as f64,
            NumericLiteral::Real(value) => value,
        }
    }
}

fn is_integer_literal(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}

fn is_float_literal(text: &str) -> bool {
    text.chars().any(|ch| ch.is_ascii_digit())
        && text
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E' | '+' | '-'))
        && text.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Classify a cleaned value. Percentages always come back as reals scaled to
/// a fraction.
pub fn classify(value: &CleanedValue) -> Option<NumericLiteral> {
    if is_integer_literal(&value.text) && !value.was_percent {
        if let Ok(parsed) = value.text.parse::<i64>() {
            return Some(NumericLiteral::Integer(parsed));
        }
    }
    if is_integer_literal(&value.text) || is_float_literal(&value.text) {
        let parsed = value.text.parse::<f64>().ok()?;
        let scaled = if value.was_percent {
            parsed / 100.0
        } else {
            parsed
        };
        return Some(NumericLiteral::Real(scaled));
    }
    None
}

/// Clean and classify in one step. `None` covers both nulls and text.
pub fn parse_numeric(raw: &str) -> Option<NumericLiteral> {
    clean_value(raw).as_ref().and_then(classify)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameHint {
    Identifier,
    Ratio,
    Count,
    Neutral,
}

/// Category implied by a column name, raw (`Cmp%`) or canonical
/// (`pass_completion_pct`).
pub fn name_hint(name: &str) -> NameHint {
    let lowered = name.trim().to_lowercase();
    let key = lowered
        .split(|ch: char| ch.is_whitespace() || ch == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if IDENTIFIER_NAMES.contains(&key.as_str()) || key.ends_with("_id") {
        return NameHint::Identifier;
    }
    if lowered.contains('%')
        || lowered.contains("pct")
        || lowered.contains("percent")
        || lowered.contains("rate")
    {
        return NameHint::Ratio;
    }
    if COUNT_NAMES.contains(&key.as_str())
        || key.ends_with("_count")
        || key.ends_with("count")
        || key.ends_with("num")
    {
        return NameHint::Count;
    }
    NameHint::Neutral
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    NameHint,
    Samples,
    NoSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnInference {
    pub semantic_type: SemanticType,
    pub non_null: usize,
    pub percent_values: usize,
    pub decided_by: Decision,
}

pub fn infer_type<'a, I>(samples: I, column_name_hint: &str) -> SemanticType
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    infer_column(samples, column_name_hint).semantic_type
}

pub fn infer_column<'a, I>(samples: I, column_name_hint: &str) -> ColumnInference
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let cleaned: Vec<CleanedValue> = samples
        .into_iter()
        .flatten()
        .filter_map(clean_value)
        .collect();
    let non_null = cleaned.len();
    let percent_values = cleaned.iter().filter(|value| value.was_percent).count();
    let literals: Vec<Option<NumericLiteral>> = cleaned.iter().map(classify).collect();
    let decided = |semantic_type, decided_by| ColumnInference {
        semantic_type,
        non_null,
        percent_values,
        decided_by,
    };

    if non_null == 0 {
        return decided(SemanticType::Text, Decision::NoSamples);
    }

    match name_hint(column_name_hint) {
        NameHint::Identifier => return decided(SemanticType::Text, Decision::NameHint),
        NameHint::Ratio if literals.iter().all(Option::is_some) => {
            return decided(SemanticType::Real, Decision::NameHint);
        }
        NameHint::Count
            if literals
                .iter()
                .all(|literal| matches!(literal, Some(NumericLiteral::Integer(_)))) =>
        {
            return decided(SemanticType::Integer, Decision::NameHint);
        }
        _ => {}
    }

    let mut saw_real = false;
    for literal in &literals {
        match literal {
            None => return decided(SemanticType::Text, Decision::Samples),
            Some(NumericLiteral::Real(_)) => saw_real = true,
            Some(NumericLiteral::Integer(_)) => {}
        }
    }
    if saw_real {
        decided(SemanticType::Real, Decision::Samples)
    } else {
        decided(SemanticType::Integer, Decision::Samples)
    }
}
