use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    glossary::{self, Glossary, Resolver},
    ident::IDENTIFIER_MAX_LEN,
};

pub const DEFAULT_SAMPLE_ROWS: usize = 2000;
pub const DEFAULT_SAMPLE_VALUES: usize = 5;
pub const DEFAULT_DECOY_THRESHOLD_PERCENT: u8 = 60;
pub const DEFAULT_IDENTITY_COLUMN: &str = "player_name";

/// Shortest identifier limit that still leaves room for a prefix and a
/// collision suffix.
const MIN_IDENTIFIER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("glossary file {0:?} does not exist")]
    MissingGlossary(PathBuf),
    #[error("source directory {0:?} does not exist")]
    MissingSourceDir(PathBuf),
    #[error("invalid pattern '{pattern}' for canonical column '{canonical}': {source}")]
    InvalidPattern {
        canonical: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("decoy threshold must be between 1 and 100 percent, got {0}")]
    InvalidThreshold(u8),
    #[error("identifier length limit must be at least 8, got {0}")]
    InvalidIdentifierLimit(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rows: usize,
    pub sample_values: usize,
    pub decoy_threshold_percent: u8,
    pub identity_column: String,
    pub identifier_max_len: usize,
    pub glossary: Option<PathBuf>,
    pub canonical_patterns: Option<PathBuf>,
    pub glossary_required: bool,
    pub input_encoding: Option<String>,
    /// Extra `table -> header -> canonical` entries merged over the built-in
    /// table overrides.
    pub table_overrides: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
            sample_values: DEFAULT_SAMPLE_VALUES,
            decoy_threshold_percent: DEFAULT_DECOY_THRESHOLD_PERCENT,
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
            identifier_max_len: IDENTIFIER_MAX_LEN,
            glossary: None,
            canonical_patterns: None,
            glossary_required: false,
            input_encoding: None,
            table_overrides: BTreeMap::new(),
        }
    }
}

/// Flag values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub glossary: Option<PathBuf>,
    pub canonical_patterns: Option<PathBuf>,
    pub sample_rows: Option<usize>,
    pub decoy_threshold_percent: Option<u8>,
    pub identity_column: Option<String>,
    pub input_encoding: Option<String>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Reading pipeline config {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("Parsing pipeline config {path:?}"))?;
        Ok(config)
    }

    pub fn resolve(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(glossary) = overrides.glossary {
            self.glossary = Some(glossary);
            self.glossary_required = true;
        }
        if let Some(patterns) = overrides.canonical_patterns {
            self.canonical_patterns = Some(patterns);
        }
        if let Some(rows) = overrides.sample_rows {
            self.sample_rows = rows;
        }
        if let Some(threshold) = overrides.decoy_threshold_percent {
            self.decoy_threshold_percent = threshold;
        }
        if let Some(identity) = overrides.identity_column {
            self.identity_column = identity;
        }
        if let Some(encoding) = overrides.input_encoding {
            self.input_encoding = Some(encoding);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decoy_threshold_percent == 0 || self.decoy_threshold_percent > 100 {
            return Err(ConfigError::InvalidThreshold(self.decoy_threshold_percent));
        }
        if self.identifier_max_len < MIN_IDENTIFIER_LEN {
            return Err(ConfigError::InvalidIdentifierLimit(self.identifier_max_len));
        }
        Ok(())
    }

    /// Build the run's resolver. A configured glossary that is missing is
    /// fatal only when it is required; otherwise the built-in tables are used.
    pub fn build_resolver(&self) -> Result<Resolver> {
        let mut builder = Resolver::builder().max_len(self.identifier_max_len);
        if let Some(path) = &self.glossary {
            if path.exists() || self.glossary_required {
                builder = builder.glossary(Glossary::load(path)?);
            } else {
                warn!("Glossary {path:?} not found; using built-in header tables only");
            }
        }
        if let Some(path) = &self.canonical_patterns {
            builder = builder.patterns(glossary::load_patterns(path)?);
        }
        for (table, headers) in &self.table_overrides {
            for (header, canonical) in headers {
                builder = builder.table_override(table, header, canonical);
            }
        }
        builder.build()
    }
}
