//! Planned `CREATE TABLE` statements for the staging schema.

use std::fmt::Write as _;

use crate::{aggregate::LogicalTableSchema, stage::PROVENANCE_COLUMNS};

pub const STAGING_SCHEMA: &str = "staging";

const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
    "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
    "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
    "window", "with",
];

pub fn quote_ident(ident: &str) -> String {
    if RESERVED_WORDS.contains(&ident) {
        format!("\"{ident}\"")
    } else {
        ident.to_string()
    }
}

fn provenance_type(column: &str) -> &'static str {
    match column {
        "processed_at" => "TIMESTAMP",
        _ => "TEXT",
    }
}

pub fn render_create_table(schema: &LogicalTableSchema) -> String {
    let table = format!("{STAGING_SCHEMA}.{}", quote_ident(&schema.table_name));
    let mut lines = schema
        .columns
        .iter()
        .map(|column| {
            format!(
                "    {} {}",
                quote_ident(column.name()),
                column.preferred_type().sql_type()
            )
        })
        .collect::<Vec<_>>();
    lines.extend(
        PROVENANCE_COLUMNS
            .iter()
            .map(|column| format!("    {column} {}", provenance_type(column))),
    );

    let mut sql = String::new();
    let _ = writeln!(sql, "CREATE TABLE IF NOT EXISTS {table} (");
    let _ = writeln!(sql, "{}", lines.join(",\n"));
    let _ = writeln!(sql, ");");
    for column in &schema.columns {
        if let Some(description) = &column.column.description {
            let _ = writeln!(
                sql,
                "COMMENT ON COLUMN {table}.{} IS '{}';",
                quote_ident(column.name()),
                description.replace('\'', "''")
            );
        }
    }
    sql
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::{
        aggregate::SchemaColumn,
        glossary::{CanonicalColumn, ResolutionRule},
        infer::SemanticType,
    };

    fn column(name: &str, ty: SemanticType, description: Option<&str>) -> SchemaColumn {
        SchemaColumn {
            column: CanonicalColumn {
                canonical_name: name.to_string(),
                preferred_type: ty,
                description: description.map(str::to_string),
                origin_headers: BTreeSet::new(),
            },
            seasons_covered: BTreeSet::new(),
            type_history: BTreeMap::new(),
            sample_values: Vec::new(),
            resolved_by: ResolutionRule::Glossary,
            mapped: true,
        }
    }

    #[test]
    fn renders_types_provenance_and_comments() {
        let schema = LogicalTableSchema {
            table_name: "stats_passing".into(),
            columns: vec![
                column("player_name", SemanticType::Text, None),
                column("passes_completed", SemanticType::Integer, Some("Passes Completed")),
                column("pass_completion_pct", SemanticType::Real, None),
                column("in", SemanticType::Integer, Some("Inswinging corner's kicks")),
            ],
            seasons_covered: BTreeSet::new(),
        };
        let sql = render_create_table(&schema);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS staging.stats_passing ("));
        assert!(sql.contains("    passes_completed BIGINT,\n"));
        assert!(sql.contains("    pass_completion_pct DOUBLE PRECISION,\n"));
        assert!(sql.contains("    \"in\" BIGINT,\n"));
        assert!(sql.contains("    processed_at TIMESTAMP\n);"));
        assert!(sql.contains("IS 'Inswinging corner''s kicks';"));
        assert!(sql.contains("staging.stats_passing.passes_completed IS 'Passes Completed';"));
    }
}
