//! Staging task
//!
//! Copies inputs into the tool directory, waits for the obfuscation tool to
//! write its output next to them, then cleans the tool directory and moves
//! the output to its destination. Any I/O failure aborts the run; files
//! already copied are left where they are.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::error::StageError;
use crate::params::{StagedArtifact, TaskParams, ValidatedTask};
use crate::path_utils::pathbuf_with_suffix;
use crate::waiter::FileMaterializationWaiter;

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct StageOutcome {
    /// Identifier attached to every log line of the run
    pub run_id: Uuid,
    /// Obfuscated files at their final location, one per input
    pub outputs: Vec<PathBuf>,
    /// Inputs and dependencies copied into the tool directory
    pub files_staged: usize,
    /// Time spent waiting for the tool
    pub waited: Duration,
    /// Number of existence checks made while waiting
    pub polls: u32,
}

/// One staging run over a validated task
pub struct StagingTask {
    task: ValidatedTask,
    run_id: Uuid,
}

impl StagingTask {
    pub fn new(task: ValidatedTask) -> Self {
        Self {
            task,
            run_id: Uuid::new_v4(),
        }
    }

    /// Validate `params` and build a task from them
    pub fn from_params(params: TaskParams) -> Result<Self, StageError> {
        Ok(Self::new(params.validate()?))
    }

    pub fn task(&self) -> &ValidatedTask {
        &self.task
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stage, wait and relocate
    pub async fn run(&self) -> Result<StageOutcome, StageError> {
        let span = tracing::info_span!("stage", run_id = %self.run_id);
        self.execute().instrument(span).await
    }

    async fn execute(&self) -> Result<StageOutcome, StageError> {
        let task = self.task.clone();
        let timeout = task.timeout;
        let waiter = FileMaterializationWaiter::new(task.poll_interval, timeout);

        let (task, artifacts) = blocking(move || {
            let artifacts = task.artifacts();
            stage_files(&task, &artifacts)?;
            Ok((task, artifacts))
        })
        .await?;

        task.importance.log("Waiting for the obfuscation tool to generate output");
        let outcome = waiter
            .wait(artifacts.iter().map(|a| a.produced.clone()))
            .await;

        if !outcome.is_materialized() {
            tracing::warn!(
                "Obfuscation tool produced nothing for {} file(s) within {} ms",
                outcome.missing.len(),
                timeout.as_millis()
            );
            return Err(StageError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
                missing: outcome.missing,
            });
        }

        let files_staged = artifacts.len() + task.dependencies.len();
        let outputs = blocking(move || collect_outputs(&task, &artifacts)).await?;

        Ok(StageOutcome {
            run_id: self.run_id,
            outputs,
            files_staged,
            waited: outcome.elapsed,
            polls: outcome.polls,
        })
    }
}

/// Run filesystem work on the blocking pool, inside the caller's span
async fn blocking<T, F>(f: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f)).await?
}

/// Create destination directories, copy dependencies, clear stale output and
/// copy inputs into the tool directory
fn stage_files(task: &ValidatedTask, artifacts: &[StagedArtifact]) -> Result<(), StageError> {
    let progress = |message: String| task.importance.log(message);

    for dir in destination_dirs(artifacts) {
        if !dir.exists() {
            progress(format!("Creating output directory: {}", dir.display()));
            fs::create_dir_all(&dir).map_err(|e| StageError::io("create output directory", &dir, e))?;
        }
    }

    for (dependency, staged) in task.dependencies.iter().zip(task.staged_dependencies()) {
        progress(format!(
            "Copying dependency file: {} => {}",
            dependency.display(),
            staged.display()
        ));
        fs::copy(dependency, &staged).map_err(|e| StageError::io("copy dependency file", dependency, e))?;
    }

    for artifact in artifacts {
        progress(format!(
            "Deleting previous output in tool_dir: {}",
            artifact.produced.display()
        ));
        remove_if_exists(&artifact.produced)?;
    }

    for artifact in artifacts {
        progress(format!(
            "Copying input file: {} => {}",
            artifact.source.display(),
            artifact.staged.display()
        ));
        fs::copy(&artifact.source, &artifact.staged)
            .map_err(|e| StageError::io("copy input file", &artifact.source, e))?;
    }

    Ok(())
}

/// Clean the tool directory and move every produced file to its destination
fn collect_outputs(
    task: &ValidatedTask,
    artifacts: &[StagedArtifact],
) -> Result<Vec<PathBuf>, StageError> {
    let progress = |message: String| task.importance.log(message);

    for artifact in artifacts {
        progress(format!("Deleting input file in tool_dir: {}", artifact.staged.display()));
        remove_if_exists(&artifact.staged)?;
    }

    for staged in task.staged_dependencies() {
        progress(format!("Deleting dependency file in tool_dir: {}", staged.display()));
        remove_if_exists(&staged)?;

        let dependency_output = pathbuf_with_suffix(&staged, &task.suffix);
        progress(format!(
            "Deleting obfuscated dependency file in tool_dir: {}",
            dependency_output.display()
        ));
        remove_if_exists(&dependency_output)?;
    }

    let mut outputs = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        progress(format!(
            "Moving obfuscated file: {} => {}",
            artifact.produced.display(),
            artifact.destination.display()
        ));
        move_file(&artifact.produced, &artifact.destination)?;
        outputs.push(artifact.destination.clone());
    }

    progress("Obfuscation completed".to_string());
    Ok(outputs)
}

fn destination_dirs(artifacts: &[StagedArtifact]) -> BTreeSet<PathBuf> {
    artifacts
        .iter()
        .filter_map(|a| a.destination.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .collect()
}

/// Delete a file, treating "not found" as success
fn remove_if_exists(path: &Path) -> Result<(), StageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StageError::io("delete", path, e)),
    }
}

fn move_file(from: &Path, to: &Path) -> Result<(), StageError> {
    move_file_with(from, to, |from, to| fs::rename(from, to))
}

/// Replace `to` with `from`, falling back to copy + delete when `rename`
/// fails (different volumes, network shares)
fn move_file_with<R>(from: &Path, to: &Path, rename: R) -> Result<(), StageError>
where
    R: FnOnce(&Path, &Path) -> io::Result<()>,
{
    remove_if_exists(to)?;

    if let Err(e) = rename(from, to) {
        tracing::debug!("Rename failed ({}), copying instead: {}", e, from.display());
        fs::copy(from, to).map_err(|e| StageError::io("copy obfuscated file", from, e))?;
        remove_if_exists(from)?;
    }

    Ok(())
}
