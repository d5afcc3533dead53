//! SecStage Core Library
//!
//! Hands build artifacts to an external obfuscation tool that watches a
//! directory, and collects what it produces:
//! - Task parameters, validation and config files
//! - Staging of inputs and dependencies into the tool directory
//! - Polling for the tool's output with a timeout
//! - Relocation of the obfuscated files to the build output

pub mod config;
pub mod error;
pub mod importance;
pub mod params;
pub mod path_utils;
pub mod task;
pub mod waiter;

// Re-export commonly used types
pub use config::{
    default_config_toml, find_config_file, load_config_file, load_layered, user_config_path,
    CONFIG_FILE_NAME,
};
pub use error::{ConfigError, StageError};
pub use importance::Importance;
pub use params::{Destination, StagedArtifact, TaskParams, ValidatedTask, DEFAULT_SUFFIX};
pub use path_utils::{pathbuf_with_suffix, suffixed_file_name};
pub use task::{StageOutcome, StagingTask};
pub use waiter::{
    ExpectedFileSet, FileMaterializationWaiter, WaitOutcome, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
};
