use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{Days, NaiveDate};
use lagreg_rs::features::derive_entity;
use lagreg_rs::{
    Config, DirectionPipeline, EntityBars, FeatureSpec, LagregError, RecordSource, ScalingMode,
};
use tempfile::tempdir;

const HEADER: &str = "Date,Open,High,Low,Close,Volume,OpenInt\n";

fn wobbly_closes(rows: usize, phase: usize) -> Vec<f64> {
    (0..rows)
        .map(|i| 20.0 + ((i + phase) % 9) as f64 * 0.8 - ((i * 5 + phase) % 3) as f64)
        .collect()
}

fn write_ticker(dir: &Path, name: &str, closes: &[f64]) -> Result<()> {
    let start = NaiveDate::from_ymd_opt(2012, 3, 1).expect("valid date");
    let mut body = String::from(HEADER);
    for (i, close) in closes.iter().enumerate() {
        let date = start + Days::new(i as u64);
        body.push_str(&format!("{date},{close},{close},{close},{close},100,0\n"));
    }
    fs::write(dir.join(name), body)?;
    Ok(())
}

fn config_for(dir: &Path) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        n_workers: 2,
        ..Config::default()
    }
}

#[test]
fn sixty_one_rising_closes_give_one_labelled_row() -> Result<()> {
    let closes: Vec<f64> = (100..=160).map(f64::from).collect();
    let rows = derive_entity(&closes, FeatureSpec::new(30, 30));

    assert_eq!(rows.len(), 1);
    assert_eq!(rows.labels, vec![1]);
    let expected: Vec<f64> = (100..=129).rev().map(f64::from).collect();
    assert_eq!(rows.features, expected);

    // A single retained row cannot be split into train and test.
    let source = vec![EntityBars::from_closes("up", &closes)];
    let err = DirectionPipeline::new(Config::default())
        .run_with_source(&source)
        .expect_err("one row is too few to split");
    assert!(format!("{err:#}").contains("split stage failed"));
    assert!(matches!(
        err.downcast_ref::<LagregError>(),
        Some(LagregError::EmptyDataset { .. })
    ));
    Ok(())
}

#[test]
fn hundred_retained_rows_split_eighty_twenty() -> Result<()> {
    let source = vec![EntityBars::from_closes("abc", &wobbly_closes(160, 0))];
    let report = DirectionPipeline::new(Config::default()).run_with_source(&source)?;

    assert_eq!(report.rows_retained, 100);
    assert_eq!(report.train_rows, 80);
    assert_eq!(report.test_rows, 20);
    assert_eq!(report.confusion.total(), 20);
    assert!((0.0..=1.0).contains(&report.accuracy));
    assert_eq!(report.coefficients.len(), 30);
    assert_eq!(report.feature_names.first().map(String::as_str), Some("lag_1"));
    assert_eq!(report.feature_names.last().map(String::as_str), Some("lag_30"));
    Ok(())
}

#[test]
fn header_only_file_is_skipped_and_run_succeeds() -> Result<()> {
    let temp_dir = tempdir()?;
    write_ticker(temp_dir.path(), "aaa.us.txt", &wobbly_closes(130, 1))?;
    write_ticker(temp_dir.path(), "bbb.us.txt", &wobbly_closes(130, 5))?;
    fs::write(temp_dir.path().join("ccc.us.txt"), HEADER)?;
    fs::write(temp_dir.path().join("ddd.us.txt"), "")?;

    let report = DirectionPipeline::new(config_for(temp_dir.path())).run()?;

    assert_eq!(report.tickers_discovered, 4);
    assert_eq!(report.tickers_loaded, 2);
    assert_eq!(report.tickers_skipped, 2);
    assert_eq!(report.rows_assembled, 260);
    assert_eq!(report.rows_retained, 2 * (130 - 60));
    assert_eq!(report.train_rows + report.test_rows, report.rows_retained);
    Ok(())
}

#[test]
fn short_tickers_contribute_nothing() -> Result<()> {
    let source = vec![
        EntityBars::from_closes("long", &wobbly_closes(120, 2)),
        EntityBars::from_closes("short", &wobbly_closes(60, 2)),
    ];
    let report = DirectionPipeline::new(Config::default()).run_with_source(&source)?;
    assert_eq!(report.tickers_with_rows, 1);
    assert_eq!(report.rows_retained, 60);
    Ok(())
}

#[test]
fn runs_are_reproducible_and_scaling_modes_share_the_split() -> Result<()> {
    let source: Vec<EntityBars> = (0..4)
        .map(|k| EntityBars::from_closes(format!("t{k}"), &wobbly_closes(140, k * 3)))
        .collect();

    let full = DirectionPipeline::new(Config::default()).run_with_source(&source)?;
    let again = DirectionPipeline::new(Config::default()).run_with_source(&source)?;
    assert_eq!(full.confusion, again.confusion);
    assert_eq!(full.coefficients, again.coefficients);

    let train_only = DirectionPipeline::new(Config {
        scaling: ScalingMode::TrainOnly,
        ..Config::default()
    })
    .run_with_source(&source)?;
    assert_eq!(train_only.scaling, ScalingMode::TrainOnly);
    assert_eq!(train_only.train_rows, full.train_rows);
    assert_eq!(train_only.test_rows, full.test_rows);
    assert_eq!(train_only.confusion.total(), full.confusion.total());
    Ok(())
}

#[test]
fn fixed_sample_seed_selects_the_same_files() -> Result<()> {
    let temp_dir = tempdir()?;
    for k in 0..6 {
        write_ticker(
            temp_dir.path(),
            &format!("t{k}.us.txt"),
            &wobbly_closes(100 + k * 5, k),
        )?;
    }
    let config = Config {
        sample_size: Some(3),
        sample_seed: Some(9),
        ..config_for(temp_dir.path())
    };

    let source = lagreg_rs::DirectorySource::from_config(&config);
    let first: Vec<String> = source.load()?.into_iter().map(|e| e.ticker).collect();
    let second: Vec<String> = source.load()?.into_iter().map(|e| e.ticker).collect();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);

    let report = DirectionPipeline::new(config).run()?;
    assert_eq!(report.sample_seed, Some(9));
    assert_eq!(report.tickers_discovered, 3);
    Ok(())
}

#[test]
fn date_window_limits_the_bars_read() -> Result<()> {
    let temp_dir = tempdir()?;
    write_ticker(temp_dir.path(), "aaa.us.txt", &wobbly_closes(200, 0))?;
    let start = NaiveDate::from_ymd_opt(2012, 3, 1).expect("valid date");

    let config = Config {
        include_date_start: Some(start + Days::new(50)),
        include_date_end: Some(start + Days::new(149)),
        ..config_for(temp_dir.path())
    };
    let report = DirectionPipeline::new(config).run()?;
    assert_eq!(report.rows_assembled, 100);
    assert_eq!(report.rows_retained, 40);
    Ok(())
}

#[test]
fn missing_close_column_fails_the_load_stage() -> Result<()> {
    let temp_dir = tempdir()?;
    write_ticker(temp_dir.path(), "aaa.us.txt", &wobbly_closes(100, 0))?;
    fs::write(
        temp_dir.path().join("bbb.us.txt"),
        "Date,Price\n2012-03-01,1.0\n",
    )?;

    let err = DirectionPipeline::new(config_for(temp_dir.path()))
        .run()
        .expect_err("close column is required");
    assert!(format!("{err:#}").contains("load stage failed"));
    assert!(matches!(
        err.downcast_ref::<LagregError>(),
        Some(LagregError::MissingColumn { .. })
    ));
    Ok(())
}
