pub mod aggregate;
pub mod cli;
pub mod config;
pub mod data;
pub mod ddl;
pub mod glossary;
pub mod ident;
pub mod infer;
pub mod io_utils;
pub mod mapping;
pub mod pipeline;
pub mod source;
pub mod stage;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::PipelineConfig,
    pipeline::{RunMode, RunReport},
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("fbref_stage", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Aggregate(args) => {
            handle_run(RunMode::Aggregate, &args.run, &[]).map(|_| ())
        }
        Commands::Stage(args) => handle_run(RunMode::Stage, &args.run, &args.seasons).map(|_| ()),
        Commands::Resolve(args) => handle_resolve(&args),
    }
}

fn load_config(common: &cli::CommonArgs) -> Result<PipelineConfig> {
    let config = PipelineConfig::resolve(common.config.as_deref(), common.overrides())
        .context("Loading pipeline configuration")?;
    debug!("Effective configuration: {config:?}");
    Ok(config)
}

fn handle_run(mode: RunMode, args: &cli::RunArgs, seasons: &[String]) -> Result<RunReport> {
    let config = load_config(&args.common)?;
    let options = args.run_options(seasons);
    info!(
        "Starting {} run: {:?} -> {:?}{}",
        match mode {
            RunMode::Aggregate => "aggregate",
            RunMode::Stage => "stage",
        },
        options.raw_dir,
        options.out_dir,
        if options.preview { " (preview)" } else { "" }
    );
    let report = pipeline::execute(mode, &options, &config)?;
    if report.has_errors() {
        warn!(
            "Run finished with {} error(s); see {:?}",
            report.errors.len(),
            options.out_dir.join(pipeline::RUN_REPORT_FILE)
        );
    }
    Ok(report)
}

fn handle_resolve(args: &cli::ResolveArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let resolver = config.build_resolver()?;
    let mut table = TextTable::new(["header", "canonical", "rule", "type_hint", "description"])
        .max_cell_width(60);
    for header in &args.headers {
        let resolution = resolver.resolve(header, &args.table);
        debug!("Resolved {header:?} in '{}': {resolution:?}", args.table);
        table.push_row([
            resolution.raw_header.clone(),
            resolution.canonical_name.clone(),
            resolution.rule.to_string(),
            resolution
                .type_hint
                .map(|ty| ty.to_string())
                .unwrap_or_default(),
            resolution.description.clone().unwrap_or_default(),
        ]);
    }
    table.print();
    Ok(())
}
