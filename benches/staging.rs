use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use fbref_stage::config::PipelineConfig;
use fbref_stage::pipeline::{self, RunMode, RunOptions};
use tempfile::TempDir;

const SEASONS: [&str; 3] = ["2021-2022", "2022-2023", "2023-2024"];

fn generate_season(dir: &Path, season: &str, rows: usize, with_assists: bool) {
    let season_dir = dir.join(season);
    fs::create_dir_all(&season_dir).expect("season dir");
    let mut file = fs::File::create(season_dir.join("stats_standard.csv")).expect("create csv");
    let header = if with_assists {
        "Player,Nation,Pos,Squad,Comp,Age,MP,Min,Gls,Ast,xG,G+A"
    } else {
        "Player,Nation,Pos,Squad,Comp,Age,MP,Min,Gls,xG,G+A"
    };
    writeln!(file, "{header}").expect("header");
    for i in 0..rows {
        if i > 0 && i % 25 == 0 {
            writeln!(file, "{header}").expect("repeated header");
        }
        let goals = i % 30;
        let assists = i % 12;
        let xg = goals as f64 * 0.85;
        if with_assists {
            writeln!(
                file,
                "Player {i},eng ENG,FW,Club {},eng Premier League,{},{},{},{goals},{assists},{xg:.1},{}",
                i % 20,
                18 + i % 20,
                i % 38,
                (i % 38) * 90,
                goals + assists
            )
            .expect("row");
        } else {
            writeln!(
                file,
                "Player {i},eng ENG,FW,Club {},eng Premier League,{},{},{},{goals},{xg:.1},{goals}",
                i % 20,
                18 + i % 20,
                i % 38,
                (i % 38) * 90
            )
            .expect("row");
        }
    }
}

fn generate_raw(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let raw = temp_dir.path().join("raw");
    for (idx, season) in SEASONS.iter().enumerate() {
        generate_season(&raw, season, rows, idx > 0);
    }
    (temp_dir, raw)
}

fn bench_pipeline(c: &mut Criterion) {
    let (temp_dir, raw) = generate_raw(5_000);
    let config = PipelineConfig::default();
    let mut group = c.benchmark_group("pipeline");

    group.bench_function("aggregate_all_seasons", |b| {
        b.iter_batched(
            || tempfile::tempdir().expect("out dir"),
            |out| {
                let options = RunOptions::new(&raw, out.path());
                pipeline::execute(RunMode::Aggregate, &options, &config).expect("aggregate");
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("stage_all_seasons", |b| {
        b.iter_batched(
            || tempfile::tempdir().expect("out dir"),
            |out| {
                let options = RunOptions::new(&raw, out.path());
                pipeline::execute(RunMode::Stage, &options, &config).expect("stage");
            },
            BatchSize::SmallInput,
        );
    });

    drop(temp_dir);
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
