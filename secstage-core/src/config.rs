//! Configuration files
//!
//! Task parameters can live in a project file (`secstage.toml` or
//! `secstage.json`) and in a user-level `config.toml`. Project values win over
//! user values; command-line values win over both.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::params::TaskParams;

/// Project config file written by `secstage init`
pub const CONFIG_FILE_NAME: &str = "secstage.toml";

/// Project config file names, in lookup order
pub const CONFIG_FILE_NAMES: [&str; 2] = [CONFIG_FILE_NAME, "secstage.json"];

/// Find a project config file in `dir`
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// User-level config file (`<config dir>/secstage/config.toml`)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("secstage").join("config.toml"))
}

/// Parse a config file, choosing the format from its extension
pub fn load_config_file(path: &Path) -> Result<TaskParams, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadConfigFile {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed: Result<TaskParams, String> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => toml::from_str(&content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|message| ConfigError::ParseConfigFile {
        path: path.to_path_buf(),
        message,
    })
}

/// Load user and project config, project values taking precedence.
///
/// `explicit` must exist when given; otherwise `project_dir` is searched and a
/// missing file is not an error.
pub fn load_layered(explicit: Option<&Path>, project_dir: &Path) -> Result<TaskParams, ConfigError> {
    load_layered_with_user(explicit, project_dir, user_config_path().as_deref())
}

fn load_layered_with_user(
    explicit: Option<&Path>,
    project_dir: &Path,
    user_config: Option<&Path>,
) -> Result<TaskParams, ConfigError> {
    let mut params = TaskParams::default();

    if let Some(user_path) = user_config.filter(|p| p.is_file()) {
        tracing::debug!("Loading user config: {}", user_path.display());
        params = params.merge(load_config_file(user_path)?);
    }

    let project_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(project_dir),
    };

    if let Some(project_path) = project_path {
        tracing::debug!("Loading project config: {}", project_path.display());
        params = params.merge(load_config_file(&project_path)?);
    }

    Ok(params)
}

/// Contents written by `secstage init`
pub fn default_config_toml(tool_dir: &str, input_file: &str) -> String {
    format!(
        r#"# secstage task configuration

# Directory watched by the obfuscation tool
tool_dir = '{tool_dir}'

# File(s) to obfuscate
input_files = ['{input_file}']

# Files the tool needs next to the inputs ("a.dll;b.dll" is accepted too)
dependency_files = []

# Destination of the obfuscated file (single input only)
# output_file = "bin/Release/App_Secure.dll"

# Directory receiving the obfuscated files
# output_dir = "dist"

# How long to wait for the tool, in milliseconds
timeout_ms = 30000

# How often to check for the tool's output, in milliseconds
poll_interval_ms = 500

# Suffix the tool appends to output file names
suffix = "_Secure"

# Progress message importance: high, normal or low
importance = "normal"
"#
    )
}
