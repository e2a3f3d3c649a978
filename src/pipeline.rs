//! Run orchestration: discover raw files, aggregate one schema per logical
//! table, optionally stage every selected season, and report what happened.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    aggregate::{self, AggregateOptions, LogicalTableSchema},
    config::PipelineConfig,
    ddl,
    glossary::Resolver,
    io_utils,
    mapping::IdentifierStore,
    source::{self, Discovery, RawTable, SourceFile},
    stage::{self, StageOptions, StageOutput, StageReport, Stager},
    table::TextTable,
};

pub const MAPPING_FILE: &str = "column_identifier_mapping.json";
pub const RUN_REPORT_FILE: &str = "run_report.json";
const SCHEMA_DIR: &str = "schemas";
const REPORT_DIR: &str = "reports";
const PREVIEW_CELL_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Aggregate,
    Stage,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub raw_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Logical tables to process; empty means all.
    pub tables: Vec<String>,
    /// Seasons to stage; empty means all. Aggregation always sees every season.
    pub seasons: Vec<String>,
    pub preview: bool,
    pub force_rebuild: bool,
    /// Identifier mapping location; defaults to `<out_dir>/column_identifier_mapping.json`.
    pub mapping: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(raw_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            out_dir: out_dir.into(),
            tables: Vec::new(),
            seasons: Vec::new(),
            preview: false,
            force_rebuild: false,
            mapping: None,
        }
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.mapping
            .clone()
            .unwrap_or_else(|| self.out_dir.join(MAPPING_FILE))
    }

    pub fn schema_path(&self, table: &str) -> PathBuf {
        self.out_dir
            .join(SCHEMA_DIR)
            .join(format!("{table}.schema.json"))
    }

    pub fn staged_path(&self, table: &str, season: &str) -> PathBuf {
        self.out_dir
            .join(season)
            .join(format!("stg_{table}_{season}.csv"))
    }

    pub fn file_report_path(&self, season: &str, stem: &str) -> PathBuf {
        self.out_dir
            .join(REPORT_DIR)
            .join(season)
            .join(format!("{stem}.processing.json"))
    }

    fn wants_season(&self, season: &str) -> bool {
        self.seasons.is_empty() || self.seasons.iter().any(|s| s == season)
    }
}

/// Outcome of one raw file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: PathBuf,
    pub season: String,
    pub table: String,
    pub encoding: Option<String>,
    pub rows_in: usize,
    pub cols_in: usize,
    pub malformed_rows: usize,
    pub duplicate_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    fn new(file: &SourceFile) -> Self {
        Self {
            source: file.path.clone(),
            season: file.season.clone(),
            table: file.logical_table.clone(),
            encoding: None,
            rows_in: 0,
            cols_in: 0,
            malformed_rows: 0,
            duplicate_columns: Vec::new(),
            staged_output: None,
            stage: None,
            error: None,
        }
    }

    fn loaded(file: &SourceFile, raw: &RawTable) -> Self {
        Self {
            encoding: Some(raw.encoding.to_string()),
            rows_in: raw.rows.len(),
            cols_in: raw.headers.len(),
            malformed_rows: raw.malformed_rows,
            duplicate_columns: stage::duplicate_headers(&raw.headers),
            ..Self::new(file)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    pub seasons: Vec<String>,
    pub columns: usize,
    pub unmapped_columns: Vec<String>,
    pub type_conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    pub files: Vec<FileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            seasons: Vec::new(),
            columns: 0,
            unmapped_columns: Vec::new(),
            type_conflicts: Vec::new(),
            schema_fingerprint: None,
            schema_path: None,
            files: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingSummary {
    pub path: PathBuf,
    pub entries: usize,
    pub added: usize,
    pub rebuilt: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub mode: RunMode,
    pub preview: bool,
    pub raw_dir: PathBuf,
    pub out_dir: PathBuf,
    pub mapping: MappingSummary,
    pub tables: Vec<TableReport>,
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Rows written to staged files across the run.
    pub fn rows_staged(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|table| &table.files)
            .filter_map(|file| file.stage.as_ref())
            .map(|stage| stage.rows_out)
            .sum()
    }
}

/// Execute one run. Configuration, discovery and mapping-store failures
/// abort the run; per-table and per-file failures are recorded in the
/// report and the run continues.
pub fn execute(mode: RunMode, options: &RunOptions, config: &PipelineConfig) -> Result<RunReport> {
    let resolver = config.build_resolver()?;
    let forced = io_utils::resolve_encoding(config.input_encoding.as_deref())?;
    let discovery = Discovery::new()?;
    let files = discovery.discover(&options.raw_dir)?;

    let mapping_path = options.mapping_path();
    let store = open_store(options, &mapping_path, config.identifier_max_len)?;
    let stage_options = StageOptions {
        decoy_threshold_percent: config.decoy_threshold_percent,
        identity_column: config.identity_column.clone(),
        processed_at: Utc::now(),
    };
    let mut run = Run {
        mode,
        options,
        config,
        resolver: &resolver,
        forced,
        store,
        stage_options: &stage_options,
    };

    let mut report = RunReport {
        run_id: Uuid::new_v4(),
        generated_at: stage_options.processed_at,
        mode,
        preview: options.preview,
        raw_dir: options.raw_dir.clone(),
        out_dir: options.out_dir.clone(),
        mapping: MappingSummary {
            path: mapping_path.clone(),
            entries: 0,
            added: 0,
            rebuilt: options.force_rebuild,
        },
        tables: Vec::new(),
        errors: Vec::new(),
    };

    let groups = source::group_by_table(files)
        .into_iter()
        .filter(|(table, _)| source::matches_table(table, &options.tables))
        .collect::<Vec<_>>();
    if groups.is_empty() {
        warn!("No raw files matched the requested tables");
        report
            .errors
            .push("no raw files matched the requested tables".to_string());
    }

    for (table, files) in &groups {
        let table_report = run.process_table(table, files)?;
        if let Some(err) = &table_report.error {
            report.errors.push(format!("{table}: {err}"));
        }
        for file in &table_report.files {
            if let Some(err) = &file.error {
                report
                    .errors
                    .push(format!("{table}: {}: {err}", file.source.display()));
            }
        }
        report.tables.push(table_report);
    }

    report.mapping.entries = run.store.len();
    report.mapping.added = run.store.added();
    if options.preview {
        info!(
            "Preview complete: {} table(s), nothing written",
            report.tables.len()
        );
        return Ok(report);
    }

    let saved = run.store.save();
    if let Err(err) = &saved {
        report.errors.push(format!("{err:#}"));
    }
    let report_path = options.out_dir.join(RUN_REPORT_FILE);
    io_utils::write_json_atomic(&report_path, &report)
        .with_context(|| format!("Writing run report {report_path:?}"))?;
    saved?;
    info!(
        "Run {} finished: {} table(s), {} staged row(s), {} error(s)",
        report.run_id,
        report.tables.len(),
        report.rows_staged(),
        report.errors.len()
    );
    Ok(report)
}

fn open_store(options: &RunOptions, path: &Path, max_len: usize) -> Result<IdentifierStore> {
    if options.preview {
        if path.exists() && !options.force_rebuild {
            return IdentifierStore::load_read_only(path, max_len);
        }
        return Ok(IdentifierStore::in_memory(max_len));
    }
    IdentifierStore::open(path, max_len, options.force_rebuild)
        .with_context(|| format!("Opening identifier mapping {path:?}"))
}

struct Run<'a> {
    mode: RunMode,
    options: &'a RunOptions,
    config: &'a PipelineConfig,
    resolver: &'a Resolver,
    forced: Option<&'static Encoding>,
    store: IdentifierStore,
    stage_options: &'a StageOptions,
}

impl Run<'_> {
    fn process_table(&mut self, table: &str, files: &[SourceFile]) -> Result<TableReport> {
        info!("Processing logical table '{table}' ({} file(s))", files.len());
        let mut report = TableReport::new(table);

        let mut loaded = Vec::new();
        for file in files {
            match source::read_raw_table(&file.path, self.forced) {
                Ok(raw) => {
                    report.files.push(FileReport::loaded(file, &raw));
                    loaded.push((report.files.len() - 1, file, raw));
                }
                Err(err) => {
                    warn!("Skipping {:?}: {err}", file.path);
                    let mut file_report = FileReport::new(file);
                    file_report.error = Some(err.to_string());
                    report.files.push(file_report);
                }
            }
        }
        reject_duplicate_seasons(&mut report, &mut loaded);
        if loaded.is_empty() {
            report.error = Some("no readable raw files".to_string());
            self.write_file_reports(&report);
            return Ok(report);
        }

        let observations = loaded
            .iter()
            .flat_map(|(_, file, raw)| {
                source::profile(
                    raw,
                    file,
                    self.config.sample_rows,
                    self.config.decoy_threshold_percent,
                )
            })
            .collect::<Vec<_>>();
        let refs = observations.iter().collect::<Vec<_>>();
        let schema = aggregate::aggregate_table(
            table,
            &refs,
            self.resolver,
            &mut self.store,
            &AggregateOptions {
                sample_values: self.config.sample_values,
            },
        );
        summarize_schema(&mut report, &schema)?;

        if self.options.preview {
            print_schema(&schema);
        } else {
            let path = self.options.schema_path(table);
            match io_utils::write_json_atomic(&path, &schema) {
                Ok(()) => {
                    info!("Schema for '{table}' written to {path:?}");
                    report.schema_path = Some(path);
                }
                Err(err) => {
                    error!("Failed to write schema for '{table}': {err:#}");
                    report.error = Some(format!("{err:#}"));
                    return Ok(report);
                }
            }
        }

        if self.mode == RunMode::Stage {
            self.stage_table(&mut report, &schema, &loaded)?;
            if self.options.preview {
                print_stage_summary(&report);
            }
        }
        self.write_file_reports(&report);
        Ok(report)
    }

    fn stage_table(
        &mut self,
        report: &mut TableReport,
        schema: &LogicalTableSchema,
        loaded: &[(usize, &SourceFile, RawTable)],
    ) -> Result<()> {
        let stager = Stager::new(self.resolver, self.stage_options)?;
        let mut staged_any = false;
        for (slot, file, raw) in loaded {
            if !self.options.wants_season(&file.season) {
                debug!("Season {} of '{}' not selected", file.season, schema.table_name);
                continue;
            }
            staged_any = true;
            let output = stager.stage(raw, schema, &file.season, &mut self.store);
            let file_report = &mut report.files[*slot];
            if !self.options.preview {
                let path = self
                    .options
                    .staged_path(&schema.table_name, &file.season);
                match write_staged(&path, &output) {
                    Ok(()) => {
                        info!(
                            "Staged {} row(s) of '{}' season {} to {path:?}",
                            output.rows.len(),
                            schema.table_name,
                            file.season
                        );
                        file_report.staged_output = Some(path);
                    }
                    Err(err) => {
                        error!("Failed to write {path:?}: {err:#}");
                        file_report.error = Some(format!("{err:#}"));
                    }
                }
            }
            file_report.stage = Some(output.report);
        }
        if !staged_any && !self.options.seasons.is_empty() {
            warn!(
                "None of the selected seasons exist for '{}'",
                schema.table_name
            );
        }
        Ok(())
    }

    fn write_file_reports(&self, report: &TableReport) {
        if self.options.preview {
            return;
        }
        for file in &report.files {
            if !self.options.wants_season(&file.season) {
                continue;
            }
            let stem = file
                .source
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| report.table.clone());
            let path = self.options.file_report_path(&file.season, &stem);
            if let Err(err) = io_utils::write_json_atomic(&path, file) {
                error!("Failed to write processing report {path:?}: {err:#}");
            }
        }
    }
}

/// Keep the first readable export of each season; later exports of the same
/// `(season, table)` are recorded as file errors and take no part in the run.
fn reject_duplicate_seasons(
    report: &mut TableReport,
    loaded: &mut Vec<(usize, &SourceFile, RawTable)>,
) {
    let mut first_seen: HashMap<String, PathBuf> = HashMap::new();
    loaded.retain(|(slot, file, _)| match first_seen.get(&file.season) {
        Some(first) => {
            warn!(
                "Skipping {:?}: season {} of '{}' was already read from {first:?}",
                file.path, file.season, file.logical_table
            );
            report.files[*slot].error = Some(format!(
                "duplicate export for season {}; already read from {}",
                file.season,
                first.display()
            ));
            false
        }
        None => {
            first_seen.insert(file.season.clone(), file.path.clone());
            true
        }
    });
}

fn summarize_schema(report: &mut TableReport, schema: &LogicalTableSchema) -> Result<()> {
    report.seasons = schema.seasons_covered.iter().cloned().collect();
    report.columns = schema.columns.len();
    report.unmapped_columns = schema
        .unmapped_columns()
        .map(|column| column.name().to_string())
        .collect();
    report.type_conflicts = schema
        .columns
        .iter()
        .filter(|column| column.type_conflict())
        .map(|column| column.name().to_string())
        .collect();
    report.schema_fingerprint = Some(
        schema
            .fingerprint()
            .with_context(|| format!("Fingerprinting schema for '{}'", schema.table_name))?,
    );
    if !report.unmapped_columns.is_empty() {
        warn!(
            "'{}' has {} column(s) without a canonical mapping: {}",
            schema.table_name,
            report.unmapped_columns.len(),
            report.unmapped_columns.join(", ")
        );
    }
    Ok(())
}

fn write_staged(path: &Path, output: &StageOutput) -> Result<()> {
    let mut writer = io_utils::open_csv_writer(path, io_utils::DEFAULT_CSV_DELIMITER)?;
    writer
        .write_record(output.header())
        .with_context(|| format!("Writing header to {path:?}"))?;
    for row in &output.rows {
        writer
            .write_record(row.to_record())
            .with_context(|| format!("Writing row to {path:?}"))?;
    }
    writer
        .flush()
        .with_context(|| format!("Flushing {path:?}"))?;
    Ok(())
}

fn print_schema(schema: &LogicalTableSchema) {
    println!(
        "{} ({} column(s), seasons: {})",
        schema.table_name,
        schema.columns.len(),
        schema
            .seasons_covered
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut table = TextTable::new(["column", "type", "seasons", "rule", "headers", "notes"])
        .max_cell_width(PREVIEW_CELL_WIDTH);
    for column in &schema.columns {
        let mut notes = Vec::new();
        if !column.mapped {
            notes.push("unmapped");
        }
        if column.type_conflict() {
            notes.push("type conflict");
        }
        table.push_row([
            column.name().to_string(),
            column.preferred_type().to_string(),
            column.seasons_covered.len().to_string(),
            column.resolved_by.to_string(),
            column
                .column
                .origin_headers
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            notes.join(", "),
        ]);
    }
    table.print();
    println!();
    print!("{}", ddl::render_create_table(schema));
    println!();
}

fn print_stage_summary(report: &TableReport) {
    let mut table = TextTable::new([
        "season",
        "rows_in",
        "rows_out",
        "decoys",
        "no_identity",
        "filled",
        "unknown",
    ]);
    for file in &report.files {
        let Some(stage) = &file.stage else {
            continue;
        };
        table.push_row([
            stage.season.clone(),
            stage.rows_in.to_string(),
            stage.rows_out.to_string(),
            stage.decoy_rows_dropped.to_string(),
            stage.rows_missing_identity.to_string(),
            stage.columns_filled.len().to_string(),
            stage.columns_unknown.len().to_string(),
        ]);
    }
    if !table.is_empty() {
        table.print();
        println!();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn aggregate_writes_schema_mapping_and_run_report() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        write(
            &raw,
            "2022-2023/stats_shooting.csv",
            "Player,Gls,Mystery Stat\nSaka,14,3\n",
        );
        write(
            &raw,
            "2023-2024/stats_shooting.csv",
            "Player,Gls,Mystery Stat\nSaka,16,2.5\n",
        );

        let options = RunOptions::new(&raw, &out);
        let report = execute(RunMode::Aggregate, &options, &PipelineConfig::default()).unwrap();
        assert!(!report.has_errors(), "{:?}", report.errors);
        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert_eq!(table.table, "stats_shooting");
        assert_eq!(table.seasons, vec!["2022-2023", "2023-2024"]);
        assert_eq!(table.unmapped_columns, vec!["mystery_stat"]);
        assert_eq!(table.type_conflicts, vec!["mystery_stat"]);

        assert!(options.schema_path("stats_shooting").exists());
        assert!(out.join(RUN_REPORT_FILE).exists());
        assert!(options
            .file_report_path("2022-2023", "stats_shooting")
            .exists());
        let mapping = fs::read_to_string(options.mapping_path()).unwrap();
        assert!(mapping.contains("Mystery Stat"));
        assert!(!out.join("2023-2024").exists());
    }

    #[test]
    fn stage_respects_season_filter_and_writes_reports() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        write(&raw, "2022-2023/stats_misc.csv", "Player,CrdY\nRice,4\n");
        write(
            &raw,
            "2023-2024/stats_misc.csv",
            "Player,CrdY,CrdR\nRice,6,1\nPlayer,CrdY,CrdR\n",
        );

        let mut options = RunOptions::new(&raw, &out);
        options.seasons = vec!["2023-2024".to_string()];
        let report = execute(RunMode::Stage, &options, &PipelineConfig::default()).unwrap();
        assert!(!report.has_errors(), "{:?}", report.errors);
        assert_eq!(report.rows_staged(), 1);

        assert!(options.staged_path("stats_misc", "2023-2024").exists());
        assert!(!options.staged_path("stats_misc", "2022-2023").exists());
        let processing = options.file_report_path("2023-2024", "stats_misc");
        let text = fs::read_to_string(processing).unwrap();
        assert!(text.contains("\"decoy_rows_dropped\": 1"));
    }

    #[test]
    fn unreadable_file_is_recorded_and_run_continues() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        write(&raw, "2023-2024/stats_keeper.csv", "");
        write(&raw, "2023-2024/stats_misc.csv", "Player,CrdY\nRice,4\n");

        let options = RunOptions::new(&raw, &out);
        let report = execute(RunMode::Stage, &options, &PipelineConfig::default()).unwrap();
        assert_eq!(report.tables.len(), 2);
        let keeper = report
            .tables
            .iter()
            .find(|table| table.table == "stats_keeper")
            .unwrap();
        assert!(keeper.files[0].error.is_some());
        assert!(keeper.error.is_some());
        assert!(report.has_errors());
        assert!(options.staged_path("stats_misc", "2023-2024").exists());
    }

    #[test]
    fn second_export_of_a_season_is_rejected() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        write(&raw, "2023-2024/stats_passing.csv", "Player,Cmp\nA,10\n");
        write(
            &raw,
            "2023-2024/stats_passing_2023-2024.csv",
            "Player,Cmp\nB,12\n",
        );

        let options = RunOptions::new(&raw, &out);
        let report = execute(RunMode::Stage, &options, &PipelineConfig::default()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("duplicate export"));

        let table = &report.tables[0];
        assert_eq!(table.columns, 2);
        assert!(table.files[0].error.is_none());
        assert_eq!(table.files[0].stage.as_ref().unwrap().rows_out, 1);
        assert!(table.files[1].error.is_some());
        assert!(table.files[1].stage.is_none());

        let staged = fs::read_to_string(options.staged_path("stats_passing", "2023-2024")).unwrap();
        assert!(staged.starts_with("player_name,passes_completed,"));
        assert!(staged.contains("\nA,10,"));
        assert!(!staged.contains("\nB,"));
    }

    #[test]
    fn preview_writes_nothing() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        let out = dir.path().join("out");
        write(&raw, "2023-2024/stats_misc.csv", "Player,CrdY\nRice,4\n");

        let mut options = RunOptions::new(&raw, &out);
        options.preview = true;
        let report = execute(RunMode::Stage, &options, &PipelineConfig::default()).unwrap();
        assert!(report.preview);
        assert!(!out.exists());
    }

    #[test]
    fn missing_raw_dir_aborts_the_run() {
        let dir = tempdir().unwrap();
        let options = RunOptions::new(dir.path().join("absent"), dir.path().join("out"));
        assert!(execute(RunMode::Aggregate, &options, &PipelineConfig::default()).is_err());
    }
}
