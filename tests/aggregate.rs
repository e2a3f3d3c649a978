mod common;

use std::fs;

use fbref_stage::{
    config::PipelineConfig,
    pipeline::{self, RunMode, RunOptions},
};
use serde_json::json;

use common::TestWorkspace;

fn aggregate(workspace: &TestWorkspace) -> pipeline::RunReport {
    let options = RunOptions::new(workspace.raw_dir(), workspace.out_dir());
    pipeline::execute(RunMode::Aggregate, &options, &PipelineConfig::default())
        .expect("aggregate run")
}

#[test]
fn seasons_are_unioned_in_first_seen_order() {
    let workspace = TestWorkspace::new();
    workspace.write_season(
        "2022-2023",
        "stats_standard",
        "Player,Nation,Gls\nBukayo Saka,eng ENG,14\n",
    );
    workspace.write_season(
        "2023-2024",
        "stats_standard",
        "Player,Nation,Gls,Ast\nBukayo Saka,eng ENG,16,9\n",
    );

    let report = aggregate(&workspace);
    assert!(!report.has_errors(), "{:?}", report.errors);

    let schema = workspace.read_out_json("schemas/stats_standard.schema.json");
    assert_eq!(schema["table_name"], "stats_standard");
    assert_eq!(schema["seasons_covered"], json!(["2022-2023", "2023-2024"]));
    let names = workspace.schema_columns("stats_standard");
    assert_eq!(names, ["player_name", "nation", "goals", "assists"]);
    assert_eq!(schema["columns"]["goals"]["preferred_type"], "integer");
    assert_eq!(
        schema["columns"]["goals"]["seasons_covered"],
        json!(["2022-2023", "2023-2024"])
    );
    assert_eq!(
        schema["columns"]["assists"]["seasons_covered"],
        json!(["2023-2024"])
    );
    assert_eq!(schema["columns"]["player_name"]["preferred_type"], "text");
}

#[test]
fn new_columns_take_their_standard_slot() {
    let workspace = TestWorkspace::new();
    workspace.write_season(
        "2022-2023",
        "stats_passing",
        "Player,Cmp,Att,Cmp%\nDeclan Rice,1500,1700,88.2\n",
    );
    workspace.write_season(
        "2023-2024",
        "stats_passing",
        "Player,Cmp,Att,Cmp%,Extra Stat,Squad,Age\nDeclan Rice,1800,2000,90.0,7,Arsenal,24\n",
    );

    aggregate(&workspace);

    let names = workspace.schema_columns("stats_passing");
    assert_eq!(
        names,
        [
            "player_name",
            "squad",
            "age",
            "passes_completed",
            "passes_attempted",
            "pass_completion_pct",
            "extra_stat"
        ]
    );
}

#[test]
fn ambiguous_header_resolves_per_table() {
    let workspace = TestWorkspace::new();
    workspace.write_season(
        "2023-2024",
        "stats_passing",
        "Player,Cmp,Att,Cmp%\nDeclan Rice,1800,2000,90.0\n",
    );
    workspace.write_season(
        "2023-2024",
        "stats_keeper_adv",
        "Player,Cmp,Att,Cmp%\nDavid Raya,120,300,40.0\n",
    );

    aggregate(&workspace);

    let passing = workspace.read_out_json("schemas/stats_passing.schema.json");
    let keeper = workspace.read_out_json("schemas/stats_keeper_adv.schema.json");
    assert!(passing["columns"].get("passes_completed").is_some());
    assert!(passing["columns"].get("launches").is_none());
    assert!(keeper["columns"].get("launches").is_some());
    assert!(keeper["columns"].get("passes_completed").is_none());
    assert_eq!(keeper["columns"]["launches"]["resolved_by"], "table_override");
}

#[test]
fn conflicting_seasons_promote_and_record_history() {
    let workspace = TestWorkspace::new();
    workspace.write_season(
        "2022-2023",
        "stats_misc",
        "Player,Custom Metric\nA,12\nB,7\n",
    );
    workspace.write_season(
        "2023-2024",
        "stats_misc",
        "Player,Custom Metric\nA,12.5\nB,3\n",
    );

    let report = aggregate(&workspace);
    assert_eq!(report.tables[0].type_conflicts, ["custom_metric"]);
    assert_eq!(report.tables[0].unmapped_columns, ["custom_metric"]);

    let schema = workspace.read_out_json("schemas/stats_misc.schema.json");
    let column = &schema["columns"]["custom_metric"];
    assert_eq!(column["preferred_type"], "real");
    assert_eq!(
        column["type_history"],
        json!({"2022-2023": "integer", "2023-2024": "real"})
    );
    assert_eq!(column["type_conflict"], true);
    assert_eq!(column["mapped"], false);
}

#[test]
fn all_null_season_does_not_drive_the_type() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2022-2023", "stats_misc", "Player,Custom Metric\nA,\nB,n/a\n");
    workspace.write_season("2023-2024", "stats_misc", "Player,Custom Metric\nA,3\n");

    aggregate(&workspace);

    let schema = workspace.read_out_json("schemas/stats_misc.schema.json");
    let column = &schema["columns"]["custom_metric"];
    assert_eq!(column["preferred_type"], "integer");
    assert_eq!(column["type_history"]["2022-2023"], serde_json::Value::Null);
    assert_eq!(column["type_conflict"], false);
}

#[test]
fn repeated_runs_produce_identical_schemas() {
    let workspace = TestWorkspace::new();
    workspace.write_season(
        "2023-2024",
        "stats_shooting",
        "Player,Gls,Sh,Gls.1,Odd Header\nSaka,16,80,0.2,x\n",
    );

    let first = aggregate(&workspace);
    let schema_before = workspace.read_out("schemas/stats_shooting.schema.json");
    let mapping_before = workspace.read_out("column_identifier_mapping.json");
    let second = aggregate(&workspace);

    assert_eq!(
        first.tables[0].schema_fingerprint,
        second.tables[0].schema_fingerprint
    );
    assert_eq!(
        schema_before,
        workspace.read_out("schemas/stats_shooting.schema.json")
    );
    assert_eq!(
        mapping_before,
        workspace.read_out("column_identifier_mapping.json")
    );
    assert_eq!(second.mapping.added, 0);
}

#[test]
fn cached_identifiers_survive_until_force_rebuild() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2023-2024", "stats_misc", "Player,Custom Metric\nA,3\n");
    workspace.write(
        "out/column_identifier_mapping.json",
        r#"{"Custom Metric": "custom_metric_legacy"}"#,
    );

    aggregate(&workspace);
    let schema = workspace.read_out_json("schemas/stats_misc.schema.json");
    assert!(schema["columns"].get("custom_metric_legacy").is_some());

    let mut options = RunOptions::new(workspace.raw_dir(), workspace.out_dir());
    options.force_rebuild = true;
    let report =
        pipeline::execute(RunMode::Aggregate, &options, &PipelineConfig::default()).unwrap();
    assert!(report.mapping.rebuilt);
    let schema = workspace.read_out_json("schemas/stats_misc.schema.json");
    assert!(schema["columns"].get("custom_metric").is_some());
    let mapping = workspace.read_out_json("column_identifier_mapping.json");
    assert_eq!(mapping, json!({"Custom Metric": "custom_metric"}));
}

#[test]
fn held_mapping_lock_aborts_the_run() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2023-2024", "stats_misc", "Player,CrdY\nA,3\n");
    workspace.write("out/column_identifier_mapping.json.lock", "");

    let options = RunOptions::new(workspace.raw_dir(), workspace.out_dir());
    let result = pipeline::execute(RunMode::Aggregate, &options, &PipelineConfig::default());
    assert!(result.is_err());
    assert!(!workspace.out_dir().join("schemas").exists());
}

#[test]
fn table_filter_limits_the_run() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2023-2024", "stats_misc", "Player,CrdY\nA,3\n");
    workspace.write_season("2023-2024", "stats_passing", "Player,Cmp\nA,30\n");

    let mut options = RunOptions::new(workspace.raw_dir(), workspace.out_dir());
    options.tables = vec!["passing".to_string()];
    let report =
        pipeline::execute(RunMode::Aggregate, &options, &PipelineConfig::default()).unwrap();
    assert_eq!(report.tables.len(), 1);
    assert!(
        workspace
            .out_dir()
            .join("schemas/stats_passing.schema.json")
            .exists()
    );
    assert!(
        !workspace
            .out_dir()
            .join("schemas/stats_misc.schema.json")
            .exists()
    );
}

#[test]
fn glossary_descriptions_follow_the_table_section() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2023-2024", "stats_keeper_adv", "Player,Cmp\nRaya,120\n");
    workspace.write_season("2023-2024", "stats_passing", "Player,Cmp\nRice,1800\n");

    let config = PipelineConfig {
        glossary: Some(common::fixture_path("glossary.json")),
        glossary_required: true,
        ..PipelineConfig::default()
    };
    let options = RunOptions::new(workspace.raw_dir(), workspace.out_dir());
    pipeline::execute(RunMode::Aggregate, &options, &config).unwrap();

    let keeper = workspace.read_out_json("schemas/stats_keeper_adv.schema.json");
    let passing = workspace.read_out_json("schemas/stats_passing.schema.json");
    assert_eq!(
        keeper["columns"]["launches"]["description"],
        "Passes Completed: Passes longer than 40 yards"
    );
    assert_eq!(
        passing["columns"]["passes_completed"]["description"],
        "Passes Completed"
    );
}

#[test]
fn run_report_lists_fingerprints_and_files() {
    let workspace = TestWorkspace::new();
    workspace.write_season("2023-2024", "stats_misc", "Player,CrdY\nA,3\n");

    let report = aggregate(&workspace);
    let document = workspace.read_out_json("run_report.json");
    assert_eq!(document["run_id"], report.run_id.to_string());
    assert_eq!(document["mode"], "aggregate");
    let table = &document["tables"][0];
    assert_eq!(table["table"], "stats_misc");
    assert_eq!(
        table["schema_fingerprint"].as_str().map(str::len),
        Some(64)
    );
    assert_eq!(table["files"][0]["rows_in"], 1);
    assert_eq!(document["errors"], json!([]));
    assert!(
        fs::read_dir(workspace.out_dir().join("schemas"))
            .unwrap()
            .count()
            == 1
    );
}
