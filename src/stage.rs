//! Staging: apply a unioned schema to one season's raw rows.
//!
//! The steps run in a fixed order: drop decoy header rows, rename, coerce,
//! fill missing columns, attach provenance, then drop rows without an
//! identity value. Nothing in here fails on bad data; every loss is counted
//! in the [`StageReport`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::{
    aggregate::{LogicalTableSchema, assign_column_names},
    data::{self, Value},
    glossary::Resolver,
    ident::header_key,
    mapping::IdentifierStore,
    source::RawTable,
};

pub const PROVENANCE_COLUMNS: [&str; 3] = ["season", "table_type", "processed_at"];

/// Columns whose text carries a lowercase country-code prefix (`eng ENG`).
const CODE_PREFIXED_COLUMNS: [&str; 2] = ["nation", "competition"];

#[derive(Debug, Clone)]
pub struct StageOptions {
    pub decoy_threshold_percent: u8,
    pub identity_column: String,
    pub processed_at: DateTime<Utc>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            decoy_threshold_percent: crate::config::DEFAULT_DECOY_THRESHOLD_PERCENT,
            identity_column: crate::config::DEFAULT_IDENTITY_COLUMN.to_string(),
            processed_at: Utc::now(),
        }
    }
}

/// A row is a decoy header when at least `threshold_percent` of its cells
/// equal the header in the same position, ignoring case and spacing. A
/// repeated header shifted by a leading cell is caught by counting the
/// distinct header names present anywhere in the row.
pub fn is_decoy_row(row: &[String], headers: &[String], threshold_percent: u8) -> bool {
    if headers.is_empty() {
        return false;
    }
    let needed = headers.len() * usize::from(threshold_percent);
    let keys = headers.iter().map(|header| header_key(header)).collect::<Vec<_>>();
    let positional = keys
        .iter()
        .zip(row)
        .filter(|(key, cell)| !key.is_empty() && **key == header_key(cell))
        .count();
    if positional * 100 >= needed {
        return true;
    }
    let cells = row.iter().map(|cell| header_key(cell)).collect::<HashSet<_>>();
    let present = keys
        .iter()
        .filter(|key| !key.is_empty() && cells.contains(key.as_str()))
        .collect::<HashSet<_>>()
        .len();
    present * 100 >= needed
}

/// One staged output row, keyed by the schema's column names.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    columns: Arc<[String]>,
    values: Vec<Option<Value>>,
    pub season: String,
    pub table_type: String,
    pub processed_at: DateTime<Utc>,
}

impl StagedRow {
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column == name)
    }

    /// Value of a schema column; `None` for nulls and unknown names alike.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|idx| self.values[idx].as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_ref))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cells in output order: schema columns followed by provenance.
    pub fn to_record(&self) -> Vec<String> {
        let mut record = self
            .values
            .iter()
            .map(|value| data::render(value.as_ref()))
            .collect::<Vec<_>>();
        record.push(self.season.clone());
        record.push(self.table_type.clone());
        record.push(self.processed_at.format("%Y-%m-%d %H:%M:%S").to_string());
        record
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub table: String,
    pub season: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub cols_in: usize,
    pub cols_out: usize,
    pub decoy_rows_dropped: usize,
    pub rows_missing_identity: usize,
    /// Raw header to staged name, for headers whose name changed.
    pub columns_renamed: BTreeMap<String, String>,
    pub collisions_suffixed: Vec<String>,
    pub duplicate_columns: Vec<String>,
    pub columns_filled: Vec<String>,
    pub columns_unknown: Vec<String>,
    pub coercion_failures: BTreeMap<String, usize>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StageOutput {
    pub columns: Vec<String>,
    pub rows: Vec<StagedRow>,
    pub report: StageReport,
}

impl StageOutput {
    /// Header of the staged file: schema columns then provenance columns.
    pub fn header(&self) -> Vec<String> {
        self.columns
            .iter()
            .cloned()
            .chain(PROVENANCE_COLUMNS.iter().map(|c| c.to_string()))
            .collect()
    }
}

pub struct Stager<'a> {
    resolver: &'a Resolver,
    options: &'a StageOptions,
    code_prefix: Regex,
}

impl<'a> Stager<'a> {
    pub fn new(resolver: &'a Resolver, options: &'a StageOptions) -> anyhow::Result<Self> {
        Ok(Self {
            resolver,
            options,
            code_prefix: Regex::new(r"^[a-z]{2,3}\s+")?,
        })
    }

    pub fn stage(
        &self,
        raw: &RawTable,
        schema: &LogicalTableSchema,
        season: &str,
        store: &mut IdentifierStore,
    ) -> StageOutput {
        let table = schema.table_name.as_str();
        let mut report = StageReport {
            table: table.to_string(),
            season: season.to_string(),
            rows_in: raw.rows.len(),
            cols_in: raw.headers.len(),
            duplicate_columns: duplicate_headers(&raw.headers),
            ..StageReport::default()
        };
        for duplicate in &report.duplicate_columns {
            warn!("{table}/{season}: header '{duplicate}' appears more than once");
        }

        // 1. decoy header rows
        let threshold = self.options.decoy_threshold_percent;
        let kept = raw
            .rows
            .iter()
            .filter(|row| !is_decoy_row(row, &raw.headers, threshold))
            .collect::<Vec<_>>();
        report.decoy_rows_dropped = raw.rows.len() - kept.len();
        if report.decoy_rows_dropped > 0 {
            info!(
                "{table}/{season}: dropped {} repeated header row(s)",
                report.decoy_rows_dropped
            );
        }

        // 2. rename
        let named = assign_column_names(&raw.headers, table, self.resolver, store);
        let mut targets: Vec<Option<usize>> = Vec::with_capacity(named.len());
        for column in &named {
            if column.name != column.raw_header {
                report
                    .columns_renamed
                    .insert(column.raw_header.clone(), column.name.clone());
            }
            if column.was_suffixed() {
                report.collisions_suffixed.push(column.name.clone());
            }
            let target = schema.position(&column.name);
            if target.is_none() {
                warn!(
                    "{table}/{season}: column '{}' ({}) is not in the schema and was dropped",
                    column.raw_header, column.name
                );
                report.columns_unknown.push(column.raw_header.clone());
            }
            targets.push(target);
        }

        // 4. missing columns stay null
        let mut provided = vec![false; schema.columns.len()];
        for target in targets.iter().flatten() {
            provided[*target] = true;
        }
        report.columns_filled = schema
            .columns
            .iter()
            .zip(&provided)
            .filter(|(_, present)| !**present)
            .map(|(column, _)| column.name().to_string())
            .collect();
        report.cols_out = schema.columns.len() + PROVENANCE_COLUMNS.len();

        let types = schema
            .columns
            .iter()
            .map(|column| column.preferred_type())
            .collect::<Vec<_>>();
        let strip_code = schema
            .columns
            .iter()
            .map(|column| CODE_PREFIXED_COLUMNS.contains(&column.name()))
            .collect::<Vec<_>>();
        let columns: Arc<[String]> = schema.column_names().into();
        let identity = schema.position(&self.options.identity_column);
        if identity.is_none() {
            debug!(
                "{table}: no '{}' column; rows are kept without an identity check",
                self.options.identity_column
            );
        }

        let mut failures: HashMap<usize, usize> = HashMap::new();
        let mut rows = Vec::with_capacity(kept.len());
        for row in kept {
            // 3. coerce
            let mut values: Vec<Option<Value>> = vec![None; schema.columns.len()];
            for (cell, target) in row.iter().zip(&targets) {
                let Some(target) = *target else { continue };
                values[target] = match data::coerce(cell, types[target]) {
                    Ok(value) => value,
                    Err(err) => {
                        debug!("{table}/{season}: {err}");
                        *failures.entry(target).or_default() += 1;
                        None
                    }
                };
                if strip_code[target] {
                    values[target] = values[target].take().map(|value| self.strip_code(value));
                }
            }

            // 6. identity
            if let Some(identity) = identity {
                if values[identity].is_none() {
                    report.rows_missing_identity += 1;
                    continue;
                }
            }

            // 5. provenance
            rows.push(StagedRow {
                columns: Arc::clone(&columns),
                values,
                season: season.to_string(),
                table_type: table.to_string(),
                processed_at: self.options.processed_at,
            });
        }

        report.coercion_failures = failures
            .into_iter()
            .map(|(idx, count)| (schema.columns[idx].name().to_string(), count))
            .collect();
        report.rows_out = rows.len();
        if report.rows_missing_identity > 0 {
            report.notes.push(format!(
                "dropped {} row(s) without {}",
                report.rows_missing_identity, self.options.identity_column
            ));
            warn!(
                "{table}/{season}: dropped {} row(s) without {}",
                report.rows_missing_identity, self.options.identity_column
            );
        }
        if !report.coercion_failures.is_empty() {
            report.notes.push(format!(
                "{} value(s) failed type coercion and were nulled",
                report.coercion_failures.values().sum::<usize>()
            ));
        }
        info!(
            "{table}/{season}: staged {} of {} row(s) into {} column(s)",
            report.rows_out, report.rows_in, report.cols_out
        );

        StageOutput {
            columns: columns.to_vec(),
            rows,
            report,
        }
    }

    fn strip_code(&self, value: Value) -> Value {
        match value {
            Value::Text(text) => {
                let stripped = self.code_prefix.replace(&text, "").into_owned();
                if stripped.is_empty() {
                    Value::Text(text)
                } else {
                    Value::Text(stripped)
                }
            }
            other => other,
        }
    }
}

pub(crate) fn duplicate_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for header in headers {
        let count = seen.entry(header_key(header)).or_default();
        *count += 1;
        if *count == 2 {
            duplicates.push(header.clone());
        }
    }
    duplicates
}
