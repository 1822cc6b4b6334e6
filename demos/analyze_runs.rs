//! Analyze Runs Example
//!
//! Indexes a directory of experiment runs, selects the finished ones and
//! summarises their loss curves per learning rate.
//!
//! Run with: cargo run --example analyze_runs -- [LOG_DIR]
//!
//! Without a directory, a small synthetic run tree is written to a temporary
//! directory first. Set `RUST_LOG=runlog=debug` to watch the lazy loads.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use runlog::collection::aggregations;
use runlog::{Reader, ResultFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn write_demo_runs(root: &Path) -> Result<()> {
    let runs = [
        (0, 0.1, "COMPLETE", [2.0, 1.1, 0.6]),
        (1, 0.1, "COMPLETE", [2.1, 1.0, 0.5]),
        (0, 1.0, "COMPLETE", [2.0, 1.5, 1.4]),
        (1, 1.0, "RUNNING", [2.2, 1.7, 1.6]),
    ];
    for (i, (seed, lr, status, losses)) in runs.into_iter().enumerate() {
        let run = root.join((i + 1).to_string());
        fs::create_dir_all(run.join("metadata"))?;
        fs::create_dir_all(run.join("metrics/.keys"))?;
        fs::write(
            run.join("metadata/config.yaml"),
            format!("seed: {seed}\noptimizer:\n  name: sgd\n  lr: {lr:?}\n"),
        )?;
        fs::write(run.join("metadata/info.yaml"), format!("status: {status}\n"))?;
        fs::write(run.join("metrics/.keys/train.yaml"), "loss: ''\nepoch: ''\n")?;
        let log: String = losses
            .iter()
            .enumerate()
            .map(|(epoch, loss)| format!("{{\"epoch\": {epoch}, \"loss\": {loss:?}}}\n"))
            .collect();
        fs::write(run.join("metrics/train.json"), log)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,runlog=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let src_dir = match std::env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => {
            let dir = std::env::temp_dir().join("runlog-demo");
            write_demo_runs(&dir).context("writing demo runs")?;
            dir
        }
    };

    println!("=== runlog: analyzing {} ===\n", src_dir.display());

    // -------------------------------------------------------------------------
    // 1. Index the runs
    // -------------------------------------------------------------------------
    let reader = Reader::builder(&src_dir)
        .refresh(true)
        .build()
        .with_context(|| format!("indexing {}", src_dir.display()))?;

    println!("1. Indexed {} runs ({} skipped)", reader.len(), reader.skipped().len());
    println!("   Searchable fields:");
    for (key, kind) in reader.searchable() {
        println!("     {key:<28} {kind}");
    }

    // -------------------------------------------------------------------------
    // 2. Select finished runs
    // -------------------------------------------------------------------------
    let finished = reader.filter("info.status == 'COMPLETE'")?;
    println!("\n2. Finished runs:\n{finished}");
    println!("   Config keys that vary: {:?}", finished.diff("config."));

    // -------------------------------------------------------------------------
    // 3. Summarise loss curves per learning rate
    // -------------------------------------------------------------------------
    let summary = finished
        .groupby(&["config.optimizer.lr"])?
        .aggregate(&[
            aggregations::avg_std("train.loss"),
            aggregations::min_last("train.loss"),
        ])?;
    println!("\n3. Loss per learning rate:\n{summary}");

    // -------------------------------------------------------------------------
    // 4. Export the table view
    // -------------------------------------------------------------------------
    let table = reader
        .filter_as("", ResultFormat::Table)?
        .into_table()
        .context("table result")?;
    println!(
        "\n4. Table view: {} rows x {} columns",
        table.num_rows(),
        table.num_columns()
    );
    #[cfg(feature = "parquet")]
    {
        let path = reader.dst_dir().join("runs.parquet");
        runlog::table::write_parquet(&table, &path)?;
        println!("   Written to {}", path.display());
    }

    Ok(())
}
