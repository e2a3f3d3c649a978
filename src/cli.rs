use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::ConfigOverrides, pipeline::RunOptions};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile season-by-season football stat exports into staging tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer one unified schema per logical table across all seasons
    Aggregate(AggregateArgs),
    /// Aggregate, then rewrite each season's raw file onto the unified schema
    Stage(StageArgs),
    /// Show how headers resolve to canonical column names for a table
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// YAML pipeline configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Glossary file (JSON or YAML) mapping raw headers to descriptions
    #[arg(long)]
    pub glossary: Option<PathBuf>,
    /// Canonical pattern file (JSON or YAML) mapping canonical names to regexes
    #[arg(long)]
    pub patterns: Option<PathBuf>,
    /// Identifier mapping file (defaults to <out-dir>/column_identifier_mapping.json)
    #[arg(long)]
    pub mapping: Option<PathBuf>,
    /// Rows sampled per file when inferring types (0 means full scan)
    #[arg(long)]
    pub sample_rows: Option<usize>,
    /// Percentage of cells equal to their header that marks a repeated header row
    #[arg(long = "decoy-threshold")]
    pub decoy_threshold: Option<u8>,
    /// Column that must be present for a staged row to be kept
    #[arg(long)]
    pub identity_column: Option<String>,
    /// Character encoding of the raw files (defaults to UTF-8 with Windows-1252 fallback)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

impl CommonArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            glossary: self.glossary.clone(),
            canonical_patterns: self.patterns.clone(),
            sample_rows: self.sample_rows,
            decoy_threshold_percent: self.decoy_threshold,
            identity_column: self.identity_column.clone(),
            input_encoding: self.input_encoding.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Directory holding one sub-directory of CSV exports per season
    #[arg(long = "raw-dir")]
    pub raw_dir: PathBuf,
    /// Directory receiving schemas, staged files, reports and the mapping
    #[arg(long = "out-dir")]
    pub out_dir: PathBuf,
    /// Logical table to process (repeatable; defaults to all)
    #[arg(long = "table", action = clap::ArgAction::Append)]
    pub tables: Vec<String>,
    /// Print the planned schema and DDL without writing any files
    #[arg(long)]
    pub preview: bool,
    /// Discard cached identifier mappings and allocate them again
    #[arg(long = "force-rebuild")]
    pub force_rebuild: bool,
    #[command(flatten)]
    pub common: CommonArgs,
}

impl RunArgs {
    pub fn run_options(&self, seasons: &[String]) -> RunOptions {
        RunOptions {
            raw_dir: self.raw_dir.clone(),
            out_dir: self.out_dir.clone(),
            tables: self.tables.clone(),
            seasons: seasons.to_vec(),
            preview: self.preview,
            force_rebuild: self.force_rebuild,
            mapping: self.common.mapping.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Args)]
pub struct StageArgs {
    /// Season to stage, e.g. 2023-2024 (repeatable; defaults to all)
    #[arg(long = "season", action = clap::ArgAction::Append)]
    pub seasons: Vec<String>,
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Raw header to resolve (repeatable)
    #[arg(long = "header", action = clap::ArgAction::Append, required = true)]
    pub headers: Vec<String>,
    /// Logical table providing the resolution context
    #[arg(long)]
    pub table: String,
    #[command(flatten)]
    pub common: CommonArgs,
}
