//! Schema aggregation across seasons.
//!
//! Observations are grouped by logical table, then by season, and every
//! column is keyed by its resolved name, never by its raw header. A column
//! seen in any season appears in the unioned schema; its type is the
//! promotion of every season's inferred type.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;
use log::{debug, info, warn};
use serde::{
    Serialize, Serializer,
    ser::{SerializeMap, SerializeStruct},
};
use sha2::{Digest, Sha256};

use crate::{
    glossary::{CanonicalColumn, Resolution, ResolutionRule, Resolver, TableKind},
    ident::IdentifierAllocator,
    infer::{self, Decision, SemanticType},
    mapping::IdentifierStore,
    stage::PROVENANCE_COLUMNS,
};

/// One column as observed in one season's export of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub raw_header: String,
    pub logical_table: String,
    pub season: String,
    pub sample_values: Vec<String>,
    pub position: usize,
}

/// A raw header paired with the unique name it carries inside its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedColumn {
    pub raw_header: String,
    pub name: String,
    pub resolution: Resolution,
}

impl NamedColumn {
    pub fn was_suffixed(&self) -> bool {
        self.name != self.resolution.canonical_name
    }
}

/// Resolve and uniquely name the headers of one file, in column order.
///
/// Mapped headers keep their canonical name; unmapped headers take their
/// stable identifier from the store. Names that collide within the table are
/// suffixed `_1`, `_2`, ... in order of first appearance. Provenance column
/// names are reserved.
pub fn assign_column_names(
    headers: &[String],
    table: &str,
    resolver: &Resolver,
    store: &mut IdentifierStore,
) -> Vec<NamedColumn> {
    let mut allocator = IdentifierAllocator::with_taken(resolver.max_len(), PROVENANCE_COLUMNS);
    headers
        .iter()
        .map(|raw| {
            let mut resolution = resolver.resolve(raw, table);
            if !resolution.is_mapped() {
                resolution.canonical_name = store.identifier_for(raw);
            }
            let name = allocator.allocate(&resolution.canonical_name);
            if name != resolution.canonical_name {
                warn!(
                    "Column '{}' in {} collides on '{}'; renamed to '{}'",
                    raw, table, resolution.canonical_name, name
                );
            }
            NamedColumn {
                raw_header: raw.clone(),
                name,
                resolution,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub column: CanonicalColumn,
    pub seasons_covered: BTreeSet<String>,
    /// Inferred type per season; `None` where the season had no values.
    pub type_history: BTreeMap<String, Option<SemanticType>>,
    pub sample_values: Vec<String>,
    pub resolved_by: ResolutionRule,
    pub mapped: bool,
}

impl SchemaColumn {
    pub fn name(&self) -> &str {
        &self.column.canonical_name
    }

    pub fn preferred_type(&self) -> SemanticType {
        self.column.preferred_type
    }

    /// True when seasons disagreed on the type and promotion was needed.
    pub fn type_conflict(&self) -> bool {
        self.type_history.values().flatten().unique().count() > 1
    }

    fn observed_types(&self) -> impl Iterator<Item = SemanticType> + '_ {
        self.type_history.values().flatten().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTableSchema {
    pub table_name: String,
    pub columns: Vec<SchemaColumn>,
    pub seasons_covered: BTreeSet<String>,
}

impl LogicalTableSchema {
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|column| column.name() == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name() == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn unmapped_columns(&self) -> impl Iterator<Item = &SchemaColumn> {
        self.columns.iter().filter(|column| !column.mapped)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 of the pretty JSON document, hex encoded.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let digest = Sha256::digest(self.to_json()?.as_bytes());
        Ok(format!("{digest:x}"))
    }
}

impl Serialize for LogicalTableSchema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("LogicalTableSchema", 3)?;
        state.serialize_field("table_name", &self.table_name)?;
        state.serialize_field("seasons_covered", &self.seasons_covered)?;
        state.serialize_field("columns", &ColumnMap(&self.columns))?;
        state.end()
    }
}

/// Serializes columns as a JSON object whose key order is schema order.
struct ColumnMap<'a>(&'a [SchemaColumn]);

impl Serialize for ColumnMap<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for column in self.0 {
            map.serialize_entry(column.name(), &ColumnDocument(column))?;
        }
        map.end()
    }
}

struct ColumnDocument<'a>(&'a SchemaColumn);

impl Serialize for ColumnDocument<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let column = self.0;
        let mut state = serializer.serialize_struct("SchemaColumn", 9)?;
        state.serialize_field("preferred_type", &column.column.preferred_type)?;
        state.serialize_field("seasons_covered", &column.seasons_covered)?;
        state.serialize_field("sample_values", &column.sample_values)?;
        state.serialize_field("description", &column.column.description)?;
        state.serialize_field("origin_headers", &column.column.origin_headers)?;
        state.serialize_field("type_history", &column.type_history)?;
        state.serialize_field("type_conflict", &column.type_conflict())?;
        state.serialize_field("mapped", &column.mapped)?;
        state.serialize_field("resolved_by", &column.resolved_by)?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    /// Distinct example values kept per column in the schema document.
    pub sample_values: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            sample_values: crate::config::DEFAULT_SAMPLE_VALUES,
        }
    }
}

/// Union every logical table's observations into one schema per table.
pub fn aggregate(
    raw_columns: &[RawColumn],
    resolver: &Resolver,
    store: &mut IdentifierStore,
    options: &AggregateOptions,
) -> BTreeMap<String, LogicalTableSchema> {
    let mut by_table: BTreeMap<&str, Vec<&RawColumn>> = BTreeMap::new();
    for column in raw_columns {
        by_table
            .entry(column.logical_table.as_str())
            .or_default()
            .push(column);
    }
    by_table
        .into_iter()
        .map(|(table, columns)| {
            let schema = aggregate_table(table, &columns, resolver, store, options);
            (table.to_string(), schema)
        })
        .collect()
}

pub fn aggregate_table(
    table: &str,
    observations: &[&RawColumn],
    resolver: &Resolver,
    store: &mut IdentifierStore,
    options: &AggregateOptions,
) -> LogicalTableSchema {
    let mut by_season: BTreeMap<&str, Vec<&RawColumn>> = BTreeMap::new();
    for column in observations {
        by_season.entry(column.season.as_str()).or_default().push(column);
    }

    let mut columns: Vec<SchemaColumn> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seasons_covered = BTreeSet::new();

    for (season, mut season_columns) in by_season {
        seasons_covered.insert(season.to_string());
        season_columns.sort_by_key(|column| column.position);
        let headers = season_columns
            .iter()
            .map(|column| column.raw_header.clone())
            .collect::<Vec<_>>();
        let named = assign_column_names(&headers, table, resolver, store);

        for (raw, named) in season_columns.iter().zip(named) {
            let inference = infer::infer_column(
                raw.sample_values.iter().map(|value| Some(value.as_str())),
                &raw.raw_header,
            );
            let observed = (inference.decided_by != Decision::NoSamples)
                .then_some(inference.semantic_type);
            debug!(
                "{table}/{season}: '{}' -> {} ({:?}, {} non-null sample(s))",
                raw.raw_header, named.name, observed, inference.non_null
            );

            let slot = match index.get(&named.name) {
                Some(slot) => *slot,
                None => {
                    let mut column = named.resolution.to_column();
                    column.canonical_name = named.name.clone();
                    column.origin_headers.clear();
                    columns.push(SchemaColumn {
                        column,
                        seasons_covered: BTreeSet::new(),
                        type_history: BTreeMap::new(),
                        sample_values: Vec::new(),
                        resolved_by: named.resolution.rule,
                        mapped: named.resolution.is_mapped(),
                    });
                    index.insert(named.name.clone(), columns.len() - 1);
                    columns.len() - 1
                }
            };
            let entry = &mut columns[slot];
            entry.seasons_covered.insert(season.to_string());
            entry.type_history.insert(season.to_string(), observed);
            entry.column.origin_headers.insert(raw.raw_header.clone());
            entry.mapped |= named.resolution.is_mapped();
            if entry.column.description.is_none() {
                entry.column.description = named
                    .resolution
                    .description
                    .clone()
                    .filter(|text| !text.trim().is_empty());
            }
            for value in &raw.sample_values {
                if entry.sample_values.len() >= options.sample_values {
                    break;
                }
                let trimmed = value.trim();
                if !trimmed.is_empty() && !entry.sample_values.iter().any(|v| v == trimmed) {
                    entry.sample_values.push(trimmed.to_string());
                }
            }
        }
    }

    for column in &mut columns {
        column.column.preferred_type =
            SemanticType::promote_all(column.observed_types()).unwrap_or(SemanticType::Text);
        if column.type_conflict() {
            warn!(
                "{table}: column '{}' has conflicting types across seasons {:?}; promoted to {}",
                column.name(),
                column.type_history,
                column.column.preferred_type
            );
        }
    }

    apply_standard_order(table, &mut columns);

    info!(
        "Aggregated {} column(s) for {table} across {} season(s)",
        columns.len(),
        seasons_covered.len()
    );
    LogicalTableSchema {
        table_name: table.to_string(),
        columns,
        seasons_covered,
    }
}

/// Columns with a standard slot for the table's kind move to that slot;
/// the rest follow in first-seen order. Unknown tables keep first-seen order.
fn apply_standard_order(table: &str, columns: &mut [SchemaColumn]) {
    let Some(kind) = TableKind::from_table_name(table) else {
        return;
    };
    columns.sort_by_key(|column| kind.column_slot(column.name()).unwrap_or(usize::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::IDENTIFIER_MAX_LEN;

    fn raw(table: &str, season: &str, position: usize, header: &str, values: &[&str]) -> RawColumn {
        RawColumn {
            raw_header: header.to_string(),
            logical_table: table.to_string(),
            season: season.to_string(),
            sample_values: values.iter().map(|v| v.to_string()).collect(),
            position,
        }
    }

    fn run(observations: &[RawColumn]) -> BTreeMap<String, LogicalTableSchema> {
        let resolver = Resolver::builder().build().unwrap();
        let mut store = IdentifierStore::in_memory(IDENTIFIER_MAX_LEN);
        aggregate(observations, &resolver, &mut store, &AggregateOptions::default())
    }

    #[test]
    fn seasons_union_by_resolved_name() {
        let schemas = run(&[
            raw("stats_standard", "2022-2023", 0, "Player", &["A"]),
            raw("stats_standard", "2022-2023", 1, "Gls", &["3"]),
            raw("stats_standard", "2023-2024", 0, "Player", &["B"]),
            raw("stats_standard", "2023-2024", 1, "Gls", &["4"]),
            raw("stats_standard", "2023-2024", 2, "Ast", &["1"]),
        ]);
        let schema = &schemas["stats_standard"];
        assert_eq!(schema.column_names(), ["player_name", "goals", "assists"]);
        let assists = schema.column("assists").unwrap();
        assert_eq!(assists.seasons_covered, BTreeSet::from(["2023-2024".to_string()]));
        assert_eq!(schema.seasons_covered.len(), 2);
    }

    #[test]
    fn later_columns_take_their_standard_slot() {
        let schemas = run(&[
            raw("stats_standard", "2022-2023", 0, "Player", &["A"]),
            raw("stats_standard", "2022-2023", 1, "Gls", &["3"]),
            raw("stats_standard", "2022-2023", 2, "Mystery Stat", &["x"]),
            raw("stats_standard", "2023-2024", 0, "Player", &["B"]),
            raw("stats_standard", "2023-2024", 1, "Gls", &["4"]),
            raw("stats_standard", "2023-2024", 2, "Mystery Stat", &["y"]),
            raw("stats_standard", "2023-2024", 3, "Other Stat", &["z"]),
            raw("stats_standard", "2023-2024", 4, "Squad", &["Arsenal"]),
            raw("stats_standard", "2023-2024", 5, "MP", &["30"]),
        ]);
        assert_eq!(
            schemas["stats_standard"].column_names(),
            [
                "player_name",
                "squad",
                "matches_played",
                "goals",
                "mystery_stat",
                "other_stat"
            ]
        );
    }

    #[test]
    fn unknown_tables_keep_first_seen_order() {
        let schemas = run(&[
            raw("league_table", "2023-2024", 0, "Gls", &["3"]),
            raw("league_table", "2023-2024", 1, "Player", &["A"]),
        ]);
        assert_eq!(schemas["league_table"].column_names(), ["goals", "player_name"]);
    }

    #[test]
    fn types_promote_across_seasons_and_record_conflicts() {
        let schemas = run(&[
            raw("stats_shooting", "2021-2022", 0, "Dist", &["17", "20"]),
            raw("stats_shooting", "2022-2023", 0, "Dist", &["17.5", "19"]),
        ]);
        let dist = schemas["stats_shooting"].column("avg_shot_distance").unwrap();
        assert_eq!(dist.preferred_type(), SemanticType::Real);
        assert!(dist.type_conflict());
        assert_eq!(dist.type_history["2021-2022"], Some(SemanticType::Integer));
    }

    #[test]
    fn empty_season_does_not_force_text() {
        let schemas = run(&[
            raw("stats_standard", "2021-2022", 0, "Gls", &["", ""]),
            raw("stats_standard", "2022-2023", 0, "Gls", &["2", "5"]),
        ]);
        let goals = schemas["stats_standard"].column("goals").unwrap();
        assert_eq!(goals.preferred_type(), SemanticType::Integer);
        assert!(!goals.type_conflict());
        assert_eq!(goals.type_history["2021-2022"], None);
    }

    #[test]
    fn suffix_stripped_header_unifies_with_direct_header() {
        let schemas = run(&[
            raw("stats_standard", "2021-2022", 0, "xG", &["0.4"]),
            raw("stats_standard", "2022-2023", 0, "xG_stats_shooting", &["1.2"]),
        ]);
        let schema = &schemas["stats_standard"];
        assert_eq!(schema.columns.len(), 1);
        let xg = schema.column("expected_goals").unwrap();
        assert_eq!(xg.seasons_covered.len(), 2);
        assert_eq!(
            xg.column.origin_headers,
            BTreeSet::from(["xG".to_string(), "xG_stats_shooting".to_string()])
        );
    }

    #[test]
    fn collisions_within_a_season_are_suffixed() {
        let schemas = run(&[
            raw("stats_standard", "2023-2024", 0, "Gls", &["1"]),
            raw("stats_standard", "2023-2024", 1, "Gls", &["0.5"]),
            raw("stats_standard", "2023-2024", 2, "Season", &["2023"]),
        ]);
        let names = schemas["stats_standard"].column_names();
        assert_eq!(names, ["goals", "goals_1", "season_1"]);
    }

    #[test]
    fn unknown_headers_are_kept_unmapped() {
        let schemas = run(&[raw("stats_misc", "2023-2024", 0, "Mystery Stat", &["x"])]);
        let schema = &schemas["stats_misc"];
        let column = schema.column("mystery_stat").unwrap();
        assert!(!column.mapped);
        assert_eq!(column.resolved_by, ResolutionRule::Synthesized);
        assert!(column.column.description.is_none());
        assert_eq!(schema.unmapped_columns().count(), 1);
    }

    #[test]
    fn sample_values_are_distinct_and_bounded() {
        let resolver = Resolver::builder().build().unwrap();
        let mut store = IdentifierStore::in_memory(IDENTIFIER_MAX_LEN);
        let observations = [raw(
            "stats_standard",
            "2023-2024",
            0,
            "Gls",
            &["1", "1", "2", "", "3", "4"],
        )];
        let schemas = aggregate(
            &observations,
            &resolver,
            &mut store,
            &AggregateOptions { sample_values: 3 },
        );
        assert_eq!(schemas["stats_standard"].columns[0].sample_values, ["1", "2", "3"]);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let observations = vec![
            raw("stats_passing", "2022-2023", 0, "Player", &["A", "B"]),
            raw("stats_passing", "2022-2023", 1, "Cmp", &["10", "12"]),
            raw("stats_passing", "2023-2024", 1, "Cmp%", &["80.1"]),
            raw("stats_passing", "2023-2024", 0, "Player", &["C"]),
            raw("stats_keeper_adv", "2023-2024", 0, "Cmp", &["5"]),
        ];
        let first = run(&observations);
        let second = run(&observations);
        for (table, schema) in &first {
            assert_eq!(schema.to_json().unwrap(), second[table].to_json().unwrap());
            assert_eq!(
                schema.fingerprint().unwrap(),
                second[table].fingerprint().unwrap()
            );
        }
        assert_eq!(first["stats_keeper_adv"].column_names(), ["launches"]);
    }

    #[test]
    fn schema_document_keeps_column_order() {
        let schemas = run(&[
            raw("stats_standard", "2023-2024", 0, "Player", &["A"]),
            raw("stats_standard", "2023-2024", 1, "Age", &["21"]),
            raw("stats_standard", "2023-2024", 2, "Gls", &["3"]),
        ]);
        let json = schemas["stats_standard"].to_json().unwrap();
        let player = json.find("\"player_name\"").unwrap();
        let age = json.find("\"age\"").unwrap();
        let goals = json.find("\"goals\"").unwrap();
        assert!(player < age && age < goals);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["columns"]["age"]["preferred_type"], "integer");
        assert_eq!(parsed["table_name"], "stats_standard");
    }
}
