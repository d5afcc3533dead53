//! Error types for staging runs

use std::path::PathBuf;

/// Invalid or missing task parameters.
///
/// Always raised before anything in the tool directory or the output location
/// is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Please configure tool_dir, the directory watched by the obfuscation tool. Example: \\\\192.168.1.155\\dll")]
    MissingToolDir,

    #[error("tool_dir does not exist. tool_dir: {}", .0.display())]
    ToolDirNotFound(PathBuf),

    #[error("Please configure at least one input file. Example: bin/Release/App.dll")]
    MissingInput,

    #[error("Input file does not exist. input_file: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Dependency file does not exist. dependency_file: {}", .0.display())]
    DependencyNotFound(PathBuf),

    #[error("output_file can only be used with a single input file ({0} given); use output_dir instead")]
    OutputFileWithMultipleInputs(usize),

    #[error("{} is already inside tool_dir and would be copied onto itself; move it out of tool_dir", .0.display())]
    SourceInToolDir(PathBuf),

    #[error(
        "{} and {} have the same file name and would overwrite each other in tool_dir",
        .first.display(),
        .second.display()
    )]
    DuplicateStagedName { first: PathBuf, second: PathBuf },

    #[error("{} has the name of an expected obfuscated output in tool_dir", .0.display())]
    StagedNameIsOutput(PathBuf),

    #[error("Output path {} is the file the tool writes in tool_dir; choose a location outside tool_dir", .0.display())]
    DestinationInToolDir(PathBuf),

    #[error("Failed to read config file {}: {source}", .path.display())]
    ReadConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", .path.display())]
    ParseConfigFile { path: PathBuf, message: String },
}

/// Failure of a staging run
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Waiting for the obfuscated output timed out after {timeout_ms} ms. Can't find: {}",
        display_paths(.missing)
    )]
    Timeout { timeout_ms: u64, missing: Vec<PathBuf> },

    #[error("File operation worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl StageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
