//! Staging benchmarks
//!
//! Full runs against a stand-in tool that writes its output as soon as the
//! inputs are staged. The poll interval is 1 ms, so the numbers are mostly
//! copy, delete and move cost; the reported checks and wait time show how
//! much of a run the waiter accounts for.

use crate::{measure, CaseReport};
use anyhow::Result;
use secstage_core::{StagingTask, TaskParams};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const ITERATIONS: u32 = 50;

pub fn run_all() -> Result<Vec<CaseReport>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    Ok(vec![
        bench_stage_run(&runtime, 1, 64 * 1024),
        bench_stage_run(&runtime, 1, 4 * 1024 * 1024),
        bench_stage_run(&runtime, 20, 64 * 1024),
    ])
}

async fn stand_in_tool(staged: Vec<PathBuf>, produced: Vec<PathBuf>, content: Arc<Vec<u8>>) {
    while !staged.iter().all(|p| p.exists()) {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    for path in produced {
        fs::write(path, content.as_slice()).unwrap();
    }
}

fn bench_stage_run(runtime: &tokio::runtime::Runtime, files: usize, size: usize) -> CaseReport {
    let temp_dir = TempDir::new().unwrap();
    let tool_dir = temp_dir.path().join("tool");
    let bin_dir = temp_dir.path().join("bin");
    fs::create_dir_all(&tool_dir).unwrap();
    fs::create_dir_all(&bin_dir).unwrap();

    let content = Arc::new(vec![0x4du8; size]);
    let inputs: Vec<PathBuf> = (0..files)
        .map(|i| {
            let path = bin_dir.join(format!("Assembly{}.dll", i));
            fs::write(&path, content.as_slice()).unwrap();
            path
        })
        .collect();

    let params = TaskParams {
        tool_dir: Some(tool_dir.display().to_string()),
        input_files: inputs.iter().map(|p| p.display().to_string()).collect(),
        output_dir: Some(temp_dir.path().join("out").display().to_string()),
        timeout_ms: Some(5000),
        poll_interval_ms: Some(1),
        ..Default::default()
    };

    let name = format!("stage {} file(s) of {} KB", files, size / 1024);
    measure(name, files, ITERATIONS, || {
        let task = StagingTask::from_params(params.clone()).unwrap();
        let artifacts = task.task().artifacts();
        let staged = artifacts.iter().map(|a| a.staged.clone()).collect();
        let produced = artifacts.iter().map(|a| a.produced.clone()).collect();

        let outcome = runtime.block_on(async {
            let tool = tokio::spawn(stand_in_tool(staged, produced, content.clone()));
            let outcome = task.run().await.unwrap();
            tool.await.unwrap();
            outcome
        });
        Some(outcome)
    })
}
