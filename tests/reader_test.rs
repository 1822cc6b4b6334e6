//! Integration tests for the reader facade
//!
//! Every test builds a run directory tree in a temporary directory and goes
//! through the public API only: open → filter → read lazy fields.

mod common;

use std::fs;
use std::path::Path;

use arrow::datatypes::DataType;
use common::{fixture, lr_fixture, status_fixture, write_run, RunSpec};
use runlog::index::FieldKind;
use runlog::{
    ArtifactCodec, CompareOp, Error, Predicate, QueryParser, Reader, ReaderConfig, ResultFormat,
    Value,
};

fn seeds(records: &runlog::RecordSet) -> Vec<Value> {
    records.column("config.seed").unwrap()
}

#[test]
fn test_filter_by_status_keeps_original_order() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();

    let complete = reader.filter("info.status == 'COMPLETE'").unwrap();
    assert_eq!(complete.len(), 2);
    assert_eq!(seeds(&complete), vec![Value::Int(0), Value::Int(1)]);
    let ids: Vec<Option<u64>> = complete.iter().map(runlog::Record::id).collect();
    assert_eq!(ids, vec![Some(1), Some(3)]);
}

#[test]
fn test_empty_query_returns_all_runs() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();
    assert_eq!(reader.filter("").unwrap().len(), 3);
    assert_eq!(reader.filter("   ").unwrap().len(), 3);
    assert_eq!(reader.len(), 3);
    assert!(!reader.is_empty());
}

#[test]
fn test_compound_query() {
    let src = lr_fixture();
    let reader = Reader::open(src.path()).unwrap();

    let runs = reader
        .filter("info.status == 'COMPLETE' & config.optimizer.lr >= 0.5 & ~(config.seed == 0)")
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs.get(0).unwrap().id(), Some(4));

    let runs = reader.filter("config.seed in [1] | config.optimizer.lr < 0.5").unwrap();
    assert_eq!(runs.len(), 3);
}

#[test]
fn test_query_errors() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();

    assert!(matches!(
        reader.filter("info.status == "),
        Err(Error::Syntax(_))
    ));
    assert!(matches!(
        reader.filter("train.loss == 1"),
        Err(Error::InvalidKey(_))
    ));
}

#[test]
fn test_lazy_metric_matches_log() {
    let src = fixture(&[RunSpec::new(0, 0.1, "COMPLETE").losses(vec![3.0, 2.0, 1.5])]);
    let reader = Reader::open(src.path()).unwrap();
    let runs = reader.filter("").unwrap();
    let run = runs.get(0).unwrap();

    assert!(run.is_lazy("train.loss"));
    assert_eq!(
        run.get("train.loss").unwrap(),
        Some(Value::from(vec![3.0, 2.0, 1.5]))
    );
    assert_eq!(
        run.get("train.epoch").unwrap(),
        Some(Value::from(vec![0, 1, 2]))
    );
    assert_eq!(run.get("train.missing").unwrap(), None);
}

#[test]
fn test_artifact_field_loads_through_codec() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();
    let runs = reader.filter("config.seed == 0").unwrap();
    let run = runs.get(0).unwrap();

    let items = run.get("artifact.text.").unwrap().unwrap();
    let notes = items.as_map().unwrap()["notes.txt"].as_artifact().unwrap();
    assert_eq!(notes.artifact_type(), "text");
    assert_eq!(notes.load().unwrap(), Value::from("run 1 with seed 0"));
}

struct ShoutingCodec;

impl ArtifactCodec for ShoutingCodec {
    fn load(&self, path: &Path) -> runlog::Result<Value> {
        Ok(Value::Str(fs::read_to_string(path)?.to_uppercase()))
    }

    fn save(&self, value: &Value, path: &Path) -> runlog::Result<()> {
        fs::write(path, value.to_string())?;
        Ok(())
    }
}

#[test]
fn test_custom_artifact_codec() {
    let src = status_fixture();
    let reader = Reader::builder(src.path())
        .artifact_codec("text", ShoutingCodec)
        .build()
        .unwrap();
    let runs = reader.filter("config.seed == 0").unwrap();
    let items = runs.get(0).unwrap().get("artifact.text.").unwrap().unwrap();
    let notes = items.as_map().unwrap()["notes.txt"].as_artifact().unwrap();
    assert_eq!(notes.load().unwrap(), Value::from("RUN 1 WITH SEED 0"));
}

#[test]
fn test_unregistered_artifact_type() {
    let src = status_fixture();
    fs::write(
        src.path().join("1/artifacts/.keys/artifacts.yaml"),
        "pickle:\n  '':\n    model.pkl: ''\n",
    )
    .unwrap();
    let reader = Reader::open(src.path()).unwrap();
    let runs = reader.filter("config.seed == 0").unwrap();
    assert!(matches!(
        runs.get(0).unwrap().get("artifact.pickle."),
        Err(Error::InvalidArtifact(_))
    ));
}

#[test]
fn test_fields_and_searchable() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();

    let fields = reader.fields();
    assert_eq!(fields["train.loss"], FieldKind::LazyMetric);
    assert_eq!(fields["artifact.text."], FieldKind::LazyArtifact);
    assert_eq!(fields["config.seed"].to_string(), "int");
    assert_eq!(fields["train.loss"].to_string(), "lazy metric");

    let searchable = reader.searchable();
    assert!(searchable.keys().all(|k| k.starts_with("config.") || k.starts_with("info.")));
    assert!(searchable.contains_key("info.status"));
    assert!(!searchable.contains_key("train.loss"));
}

#[test]
fn test_table_format() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();

    let table = reader
        .filter_as("", ResultFormat::Table)
        .unwrap()
        .into_table()
        .unwrap();
    assert_eq!(table.num_rows(), 3);
    let schema = table.schema();
    assert_eq!(
        schema.field_with_name("config.seed").unwrap().data_type(),
        &DataType::Int64
    );
    assert_eq!(
        schema.field_with_name("train.loss").unwrap().data_type(),
        &DataType::Utf8
    );

    let records = reader
        .filter_as("info.status == 'RUNNING'", "records".parse().unwrap())
        .unwrap()
        .into_records()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(matches!(
        "dataframe".parse::<ResultFormat>(),
        Err(Error::InvalidFormat(_))
    ));
}

#[test]
fn test_snapshot_reused_until_refresh() {
    let src = status_fixture();
    let reader = Reader::open(src.path()).unwrap();
    assert_eq!(reader.len(), 3);
    assert!(reader.snapshot_path().exists());
    drop(reader);

    write_run(src.path(), 4, &RunSpec::new(2, 0.1, "COMPLETE"));
    let mut reader = Reader::open(src.path()).unwrap();
    assert_eq!(reader.len(), 3);

    reader.refresh().unwrap();
    assert_eq!(reader.len(), 4);

    let reader = Reader::builder(src.path()).refresh(true).build().unwrap();
    assert_eq!(reader.len(), 4);
}

#[test]
fn test_skipped_runs_are_reported() {
    let src = status_fixture();
    fs::create_dir_all(src.path().join("7/metadata")).unwrap();
    fs::write(src.path().join("7/metadata/config.yaml"), "seed: 7\n").unwrap();

    let reader = Reader::open(src.path()).unwrap();
    assert_eq!(reader.len(), 3);
    assert_eq!(reader.skipped().len(), 1);
    assert!(reader.skipped()[0].ends_with("7"));
}

#[test]
fn test_separate_destination() {
    let src = status_fixture();
    let dst = tempfile::tempdir().unwrap();
    let out = dst.path().join("analysis");

    let reader = Reader::builder(src.path())
        .dst_dir(&out)
        .database_name("runs")
        .build()
        .unwrap();
    assert_eq!(reader.dst_dir(), out.as_path());
    assert!(out.join("runs.json").exists());
    assert!(!src.path().join("database.json").exists());
}

#[test]
fn test_config_seeds_builder() {
    let src = status_fixture();
    let dst = tempfile::tempdir().unwrap();
    let yaml = format!(
        "src_dir: {}\ndst_dir: {}\nrefresh: true\n",
        src.path().display(),
        dst.path().display()
    );
    let reader = ReaderConfig::from_yaml_str(&yaml)
        .unwrap()
        .into_builder()
        .build()
        .unwrap();
    assert_eq!(reader.len(), 3);
    assert!(dst.path().join("database.json").exists());
}

struct RunningOnly;

impl QueryParser for RunningOnly {
    fn parse(&self, _query: &str) -> runlog::Result<Predicate> {
        Ok(Predicate::compare("info.status", CompareOp::Eq, "RUNNING"))
    }
}

#[test]
fn test_custom_parser() {
    let src = status_fixture();
    let reader = Reader::builder(src.path()).parser(RunningOnly).build().unwrap();
    let runs = reader.filter("anything at all").unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(seeds(&runs), vec![Value::Int(1)]);
}

#[cfg(unix)]
#[test]
fn test_unwritable_destination() {
    use std::os::unix::fs::PermissionsExt;

    let src = status_fixture();
    let locked = tempfile::tempdir().unwrap();
    fs::set_permissions(locked.path(), fs::Permissions::from_mode(0o500)).unwrap();
    let probe = locked.path().join("probe");
    if fs::write(&probe, b"").is_ok() {
        // Running with privileges that ignore directory permissions.
        fs::remove_file(&probe).unwrap();
        return;
    }

    let target = locked.path().join("out");
    let err = Reader::builder(src.path()).dst_dir(&target).build().unwrap_err();
    assert!(matches!(err, Error::Permission { ref path } if path == &target));
    assert!(err.to_string().contains("select a different destination"));
    fs::set_permissions(locked.path(), fs::Permissions::from_mode(0o700)).unwrap();
}
