//! Raw scraper output: discovery, decoding and profiling.
//!
//! Files live at `<raw>/<season>/<table>.csv`. Files placed directly under
//! `<raw>` are accepted when their stem carries the season
//! (`2023-2024 stats_passing.csv`).

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;

use crate::{
    aggregate::RawColumn,
    config::ConfigError,
    glossary::TableKind,
    ident::{self, normalize_header},
    io_utils,
    stage::is_decoy_row,
};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?} is not valid {encoding}")]
    Undecodable {
        path: PathBuf,
        encoding: &'static str,
    },
    #[error("{path:?} has no header row")]
    Empty { path: PathBuf },
    #[error("malformed CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One `(season, logical table)` export.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceFile {
    pub logical_table: String,
    pub season: String,
    pub path: PathBuf,
    pub stem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Rows whose width differed from the header and were padded or cut.
    pub malformed_rows: usize,
    pub encoding: &'static str,
}

#[derive(Debug, Clone)]
pub struct Discovery {
    season_pattern: Regex,
    leading_season: Regex,
    trailing_season: Regex,
}

impl Discovery {
    pub fn new() -> Result<Self> {
        Ok(Self {
            season_pattern: Regex::new(r"\d{4}-\d{4}")?,
            leading_season: Regex::new(r"(?i)^(season[ _-]+)?\d{4}-\d{4}[ _-]+")?,
            trailing_season: Regex::new(r"[ _-]+\d{4}-\d{4}$")?,
        })
    }

    /// Season-independent table name for a file stem.
    pub fn logical_table(&self, stem: &str) -> String {
        let without_lead = self.leading_season.replace(stem.trim(), "");
        let without_trail = self.trailing_season.replace(&without_lead, "");
        ident::sanitize_table_name(&without_trail)
    }

    /// Every CSV export under `raw_dir`, sorted by table, season and path.
    pub fn discover(&self, raw_dir: &Path) -> Result<Vec<SourceFile>> {
        if !raw_dir.is_dir() {
            return Err(ConfigError::MissingSourceDir(raw_dir.to_path_buf()).into());
        }
        let mut files = Vec::new();
        for entry in read_dir_sorted(raw_dir)? {
            if entry.is_dir() {
                let season = entry
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or_default()
                    .to_string();
                for path in read_dir_sorted(&entry)? {
                    if is_csv(&path) {
                        files.push(self.source_file(path, season.clone()));
                    }
                }
            } else if is_csv(&entry) {
                let stem = file_stem(&entry);
                match self.season_pattern.find(&stem) {
                    Some(season) => {
                        let season = season.as_str().to_string();
                        files.push(self.source_file(entry, season));
                    }
                    None => warn!("Skipping {entry:?}: no season directory or season in file name"),
                }
            }
        }
        files.sort();
        info!("Discovered {} raw file(s) under {raw_dir:?}", files.len());
        Ok(files)
    }

    fn source_file(&self, path: PathBuf, season: String) -> SourceFile {
        let stem = file_stem(&path);
        SourceFile {
            logical_table: self.logical_table(&stem),
            season,
            path,
            stem,
        }
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("Listing {dir:?}"))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("Listing {dir:?}"))?;
    paths.sort();
    Ok(paths)
}

fn is_csv(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

/// True when `table` names the same logical table as one of `filters`,
/// either literally or through a table kind alias.
pub fn matches_table(table: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let kind = TableKind::from_table_name(table);
    filters.iter().any(|filter| {
        ident::sanitize_table_name(filter) == table
            || (kind.is_some() && TableKind::from_table_name(filter) == kind)
    })
}

/// Group files by logical table, keeping the sorted order.
pub fn group_by_table(files: Vec<SourceFile>) -> BTreeMap<String, Vec<SourceFile>> {
    let mut grouped: BTreeMap<String, Vec<SourceFile>> = BTreeMap::new();
    for file in files {
        grouped
            .entry(file.logical_table.clone())
            .or_default()
            .push(file);
    }
    grouped
}

pub fn read_raw_table(
    path: &Path,
    forced: Option<&'static Encoding>,
) -> Result<RawTable, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, encoding) =
        io_utils::decode_with_fallback(&bytes, forced).ok_or_else(|| SourceError::Undecodable {
            path: path.to_path_buf(),
            encoding: forced.map(Encoding::name).unwrap_or("UTF-8"),
        })?;
    parse_raw_table(&text, encoding.name()).map_err(|err| match err {
        ParseFailure::Empty => SourceError::Empty {
            path: path.to_path_buf(),
        },
        ParseFailure::Csv(source) => SourceError::Csv {
            path: path.to_path_buf(),
            source,
        },
    })
}

#[derive(Debug)]
enum ParseFailure {
    Empty,
    Csv(csv::Error),
}

fn parse_raw_table(text: &str, encoding: &'static str) -> Result<RawTable, ParseFailure> {
    let mut reader =
        io_utils::open_csv_reader(text.as_bytes(), io_utils::DEFAULT_CSV_DELIMITER, true);
    let headers = reader
        .headers()
        .map_err(ParseFailure::Csv)?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(ParseFailure::Empty);
    }

    let mut rows = Vec::new();
    let mut malformed_rows = 0usize;
    for record in reader.records() {
        let record = record.map_err(ParseFailure::Csv)?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let mut row = record.iter().map(str::to_string).collect::<Vec<_>>();
        if row.len() != headers.len() {
            malformed_rows += 1;
            row.resize(headers.len(), String::new());
        }
        rows.push(row);
    }
    Ok(RawTable {
        headers,
        rows,
        malformed_rows,
        encoding,
    })
}

/// Sample the first `sample_rows` non-decoy rows of each column.
/// `sample_rows == 0` samples every row.
pub fn profile(
    table: &RawTable,
    source: &SourceFile,
    sample_rows: usize,
    decoy_threshold_percent: u8,
) -> Vec<RawColumn> {
    let limit = if sample_rows == 0 {
        usize::MAX
    } else {
        sample_rows
    };
    let sampled = table
        .rows
        .iter()
        .filter(|row| !is_decoy_row(row, &table.headers, decoy_threshold_percent))
        .take(limit)
        .collect::<Vec<_>>();
    debug!(
        "Profiling {:?}: {} of {} row(s) sampled",
        source.path,
        sampled.len(),
        table.rows.len()
    );
    table
        .headers
        .iter()
        .enumerate()
        .map(|(position, header)| RawColumn {
            raw_header: header.clone(),
            logical_table: source.logical_table.clone(),
            season: source.season.clone(),
            sample_values: sampled
                .iter()
                .map(|row| row.get(position).cloned().unwrap_or_default())
                .collect(),
            position,
        })
        .collect()
}
