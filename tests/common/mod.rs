//! On-disk run fixtures shared by the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// One run to write under the fixture root.
pub struct RunSpec {
    pub seed: i64,
    pub lr: f64,
    pub status: &'static str,
    pub losses: Vec<f64>,
}

impl RunSpec {
    pub fn new(seed: i64, lr: f64, status: &'static str) -> Self {
        Self {
            seed,
            lr,
            status,
            losses: vec![1.0, 0.5],
        }
    }

    pub fn losses(mut self, losses: Vec<f64>) -> Self {
        self.losses = losses;
        self
    }
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Write run `id` (metadata, a `train` metric log and a text artifact).
pub fn write_run(src: &Path, id: u64, spec: &RunSpec) -> PathBuf {
    let run = src.join(id.to_string());
    write(
        &run.join("metadata/config.yaml"),
        &format!(
            "seed: {}\noptimizer:\n  lr: {:?}\n  name: sgd\n",
            spec.seed, spec.lr
        ),
    );
    write(
        &run.join("metadata/info.yaml"),
        &format!("status: {}\n", spec.status),
    );

    write(&run.join("metrics/.keys/train.yaml"), "loss: ''\nepoch: ''\n");
    let log: String = spec
        .losses
        .iter()
        .enumerate()
        .map(|(epoch, loss)| format!("{{\"loss\": {loss:?}, \"epoch\": {epoch}}}\n"))
        .collect();
    write(&run.join("metrics/train.json"), &log);

    write(
        &run.join("artifacts/.keys/artifacts.yaml"),
        "text:\n  '':\n    notes.txt: ''\n",
    );
    write(
        &run.join("artifacts/text/notes.txt"),
        &format!("run {id} with seed {}", spec.seed),
    );
    run
}

/// Temporary source directory holding `runs`, numbered from 1.
pub fn fixture(runs: &[RunSpec]) -> TempDir {
    let src = tempfile::tempdir().unwrap();
    for (i, spec) in runs.iter().enumerate() {
        write_run(src.path(), i as u64 + 1, spec);
    }
    src
}

/// Three runs: seeds 0, 1, 1 with statuses COMPLETE, RUNNING, COMPLETE.
pub fn status_fixture() -> TempDir {
    fixture(&[
        RunSpec::new(0, 0.1, "COMPLETE"),
        RunSpec::new(1, 0.1, "RUNNING"),
        RunSpec::new(1, 1.0, "COMPLETE"),
    ])
}

/// Four runs with learning rates 0.1, 0.1, 1.0, 1.0.
pub fn lr_fixture() -> TempDir {
    fixture(&[
        RunSpec::new(0, 0.1, "COMPLETE").losses(vec![1.0, 0.5]),
        RunSpec::new(1, 0.1, "COMPLETE").losses(vec![1.0, 0.3]),
        RunSpec::new(0, 1.0, "COMPLETE").losses(vec![2.0, 0.9]),
        RunSpec::new(1, 1.0, "COMPLETE").losses(vec![2.0, 0.7]),
    ])
}
