//! Task parameters
//!
//! `TaskParams` holds the raw, optional values gathered from config files and
//! the command line. `validate` turns them into a `ValidatedTask`, checking
//! every path without writing anything to disk.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::importance::Importance;
use crate::path_utils::{pathbuf_with_suffix, produced_path, staged_path, suffixed_file_name};
use crate::waiter::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};

/// Name fragment the external tool appends to the file stem
pub const DEFAULT_SUFFIX: &str = "_Secure";

/// Raw task parameters as found in `secstage.toml` or on the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskParams {
    /// Directory watched by the obfuscation tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_dir: Option<String>,

    /// Files to obfuscate
    #[serde(default, alias = "input_file", deserialize_with = "string_or_list")]
    pub input_files: Vec<String>,

    /// Files the tool needs next to the inputs. Entries may hold several
    /// `;`-separated paths.
    #[serde(default, deserialize_with = "string_or_list")]
    pub dependency_files: Vec<String>,

    /// Destination of the obfuscated file (single input only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,

    /// Directory receiving the obfuscated files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<i64>,

    /// Output file name suffix (default: `_Secure`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// Progress message importance: high, normal or low
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => vec![s],
        StringOrList::Many(v) => v,
    })
}

/// Where obfuscated files end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// `<input dir>/<stem><suffix><ext>`
    BesideInput,
    /// Exact path, only for a single input
    File(PathBuf),
    /// `<dir>/<stem><suffix><ext>`
    Dir(PathBuf),
}

/// Paths involved in obfuscating one input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    /// Original input file
    pub source: PathBuf,
    /// Copy placed in the tool directory
    pub staged: PathBuf,
    /// File the tool is expected to write
    pub produced: PathBuf,
    /// Final location of the produced file
    pub destination: PathBuf,
}

/// Parameters after trimming, defaulting and path checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTask {
    pub tool_dir: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub dependencies: Vec<PathBuf>,
    pub destination: Destination,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub suffix: String,
    pub importance: Importance,
}

impl TaskParams {
    /// Layer `overrides` on top of `self`; any value set in `overrides` wins
    pub fn merge(self, overrides: TaskParams) -> TaskParams {
        TaskParams {
            tool_dir: overrides.tool_dir.or(self.tool_dir),
            input_files: if overrides.input_files.is_empty() {
                self.input_files
            } else {
                overrides.input_files
            },
            dependency_files: if overrides.dependency_files.is_empty() {
                self.dependency_files
            } else {
                overrides.dependency_files
            },
            output_file: overrides.output_file.or(self.output_file),
            output_dir: overrides.output_dir.or(self.output_dir),
            timeout_ms: overrides.timeout_ms.or(self.timeout_ms),
            poll_interval_ms: overrides.poll_interval_ms.or(self.poll_interval_ms),
            suffix: overrides.suffix.or(self.suffix),
            importance: overrides.importance.or(self.importance),
        }
    }

    /// Check the parameters and fill in defaults.
    ///
    /// Only reads the filesystem.
    pub fn validate(self) -> Result<ValidatedTask, ConfigError> {
        // tool_dir
        let tool_dir = non_blank(self.tool_dir.as_deref()).ok_or(ConfigError::MissingToolDir)?;
        let tool_dir = PathBuf::from(tool_dir);
        if !tool_dir.is_dir() {
            return Err(ConfigError::ToolDirNotFound(tool_dir));
        }

        // input_files
        let inputs: Vec<PathBuf> = self
            .input_files
            .iter()
            .filter_map(|s| non_blank(Some(s.as_str())))
            .map(PathBuf::from)
            .collect();
        if inputs.is_empty() {
            return Err(ConfigError::MissingInput);
        }
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(ConfigError::InputNotFound(missing.clone()));
        }

        // dependency_files
        let dependencies: Vec<PathBuf> = self
            .dependency_files
            .iter()
            .flat_map(|entry| entry.split(';'))
            .filter_map(|s| non_blank(Some(s)))
            .map(PathBuf::from)
            .collect();
        if let Some(missing) = dependencies.iter().find(|p| !p.is_file()) {
            return Err(ConfigError::DependencyNotFound(missing.clone()));
        }

        // suffix
        let suffix = non_blank(self.suffix.as_deref())
            .unwrap_or(DEFAULT_SUFFIX)
            .to_string();

        // output_file / output_dir
        let output_file = non_blank(self.output_file.as_deref()).map(PathBuf::from);
        let output_dir = non_blank(self.output_dir.as_deref()).map(PathBuf::from);
        let destination = match (output_file, output_dir) {
            (Some(file), dir) => {
                if inputs.len() > 1 {
                    return Err(ConfigError::OutputFileWithMultipleInputs(inputs.len()));
                }
                if dir.is_some() {
                    tracing::warn!("Both output_file and output_dir are configured, output_dir is ignored.");
                }
                Destination::File(file)
            }
            (None, Some(dir)) => Destination::Dir(dir),
            (None, None) => {
                let defaults: Vec<String> = inputs
                    .iter()
                    .map(|input| pathbuf_with_suffix(input, &suffix).display().to_string())
                    .collect();
                tracing::warn!(
                    "output_file is not configured, the default value will be used: {}.",
                    defaults.join(", ")
                );
                Destination::BesideInput
            }
        };

        // timeout_ms
        let timeout = match self.timeout_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => {
                tracing::warn!(
                    "timeout_ms is not configured, the default value will be used: {}.",
                    DEFAULT_TIMEOUT.as_millis()
                );
                DEFAULT_TIMEOUT
            }
        };

        let poll_interval = match self.poll_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => DEFAULT_POLL_INTERVAL,
        };

        let task = ValidatedTask {
            tool_dir,
            inputs,
            dependencies,
            destination,
            timeout,
            poll_interval,
            suffix,
            importance: Importance::parse_lenient(self.importance.as_deref()),
        };
        task.check_layout()?;
        Ok(task)
    }
}

impl ValidatedTask {
    /// Staging paths for every input file
    pub fn artifacts(&self) -> Vec<StagedArtifact> {
        self.inputs
            .iter()
            .map(|input| StagedArtifact {
                source: input.clone(),
                staged: staged_path(&self.tool_dir, input),
                produced: produced_path(&self.tool_dir, input, &self.suffix),
                destination: self.destination_for(input),
            })
            .collect()
    }

    /// Copies of the dependency files inside the tool directory
    pub fn staged_dependencies(&self) -> Vec<PathBuf> {
        self.dependencies
            .iter()
            .map(|dep| staged_path(&self.tool_dir, dep))
            .collect()
    }

    /// Reject runs whose staged, produced and destination paths collide.
    ///
    /// Every input and dependency is copied into tool_dir under its own file
    /// name, so names must be unique and must not live in tool_dir already.
    fn check_layout(&self) -> Result<(), ConfigError> {
        let mut staged_names: HashMap<&OsStr, &Path> = HashMap::new();
        for source in self.inputs.iter().chain(&self.dependencies) {
            let staged = staged_path(&self.tool_dir, source);
            if same_file_location(source, &staged) {
                return Err(ConfigError::SourceInToolDir(source.clone()));
            }
            let Some(name) = source.file_name() else {
                continue;
            };
            if let Some(first) = staged_names.insert(name, source.as_path()) {
                return Err(ConfigError::DuplicateStagedName {
                    first: first.to_path_buf(),
                    second: source.clone(),
                });
            }
        }

        for artifact in self.artifacts() {
            if let Some(source) = artifact
                .produced
                .file_name()
                .and_then(|name| staged_names.get(name))
            {
                return Err(ConfigError::StagedNameIsOutput(source.to_path_buf()));
            }
            if same_file_location(&artifact.destination, &artifact.produced) {
                return Err(ConfigError::DestinationInToolDir(artifact.destination));
            }
        }

        Ok(())
    }

    fn destination_for(&self, input: &Path) -> PathBuf {
        match &self.destination {
            Destination::BesideInput => pathbuf_with_suffix(input, &self.suffix),
            Destination::File(file) => file.clone(),
            Destination::Dir(dir) => dir.join(suffixed_file_name(input, &self.suffix)),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Same file name in the same directory, after resolving `..` and symlinks in
/// the directories. Falls back to a plain comparison when a directory does
/// not exist yet.
fn same_file_location(a: &Path, b: &Path) -> bool {
    if a.file_name() != b.file_name() {
        return false;
    }
    match (canonical_parent(a), canonical_parent(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.parent() == b.parent(),
    }
}

fn canonical_parent(path: &Path) -> Option<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    parent.canonicalize().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        tool_dir: PathBuf,
        input: PathBuf,
        dependency: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let tool_dir = temp_dir.path().join("tool");
        let bin_dir = temp_dir.path().join("bin");
        fs::create_dir_all(&tool_dir).unwrap();
        fs::create_dir_all(&bin_dir).unwrap();
        let input = bin_dir.join("App.dll");
        let dependency = bin_dir.join("App.Core.dll");
        fs::write(&input, b"app").unwrap();
        fs::write(&dependency, b"core").unwrap();
        Fixture {
            _temp_dir: temp_dir,
            tool_dir,
            input,
            dependency,
        }
    }

    fn params(f: &Fixture) -> TaskParams {
        TaskParams {
            tool_dir: Some(f.tool_dir.display().to_string()),
            input_files: vec![f.input.display().to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let f = fixture();
        let task = params(&f).validate().unwrap();
        assert_eq!(task.suffix, "_Secure");
        assert_eq!(task.timeout, Duration::from_millis(30_000));
        assert_eq!(task.poll_interval, Duration::from_millis(500));
        assert_eq!(task.importance, Importance::Normal);
        assert_eq!(task.destination, Destination::BesideInput);
        assert!(task.dependencies.is_empty());
    }

    #[test]
    fn test_values_are_trimmed() {
        let f = fixture();
        let task = TaskParams {
            tool_dir: Some(format!("  {}  ", f.tool_dir.display())),
            input_files: vec![format!(" {} ", f.input.display())],
            suffix: Some("   ".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(task.tool_dir, f.tool_dir);
        assert_eq!(task.inputs, vec![f.input.clone()]);
        assert_eq!(task.suffix, DEFAULT_SUFFIX);
    }

    #[test]
    fn test_missing_tool_dir() {
        let f = fixture();
        let result = TaskParams {
            tool_dir: Some("   ".to_string()),
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::MissingToolDir)));
    }

    #[test]
    fn test_tool_dir_not_found() {
        let f = fixture();
        let result = TaskParams {
            tool_dir: Some(f.tool_dir.join("nope").display().to_string()),
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::ToolDirNotFound(_))));
    }

    #[test]
    fn test_empty_input_aborts_before_touching_filesystem() {
        let f = fixture();
        let result = TaskParams {
            input_files: vec!["".to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::MissingInput)));
        assert_eq!(fs::read_dir(&f.tool_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_input_not_found() {
        let f = fixture();
        let missing = f.input.with_file_name("Missing.dll");
        let result = TaskParams {
            input_files: vec![missing.display().to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::InputNotFound(p)) if p == missing));
    }

    #[test]
    fn test_dependencies_split_on_semicolon() {
        let f = fixture();
        let task = TaskParams {
            dependency_files: vec![format!("{};", f.dependency.display())],
            ..params(&f)
        }
        .validate()
        .unwrap();
        assert_eq!(task.dependencies, vec![f.dependency.clone()]);

        let missing = f.dependency.with_file_name("Gone.dll");
        let result = TaskParams {
            dependency_files: vec![format!("{};{}", f.dependency.display(), missing.display())],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::DependencyNotFound(p)) if p == missing));
    }

    #[test]
    fn test_output_file_requires_single_input() {
        let f = fixture();
        let result = TaskParams {
            input_files: vec![f.input.display().to_string(), f.dependency.display().to_string()],
            output_file: Some("out/App.dll".to_string()),
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::OutputFileWithMultipleInputs(2))));
    }

    #[test]
    fn test_non_positive_timeout_uses_default() {
        let f = fixture();
        let task = TaskParams {
            timeout_ms: Some(0),
            poll_interval_ms: Some(-5),
            ..params(&f)
        }
        .validate()
        .unwrap();
        assert_eq!(task.timeout, DEFAULT_TIMEOUT);
        assert_eq!(task.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_artifact_paths() {
        let f = fixture();
        let out_dir = f.tool_dir.parent().unwrap().join("out");
        let task = TaskParams {
            output_dir: Some(out_dir.display().to_string()),
            suffix: Some("_Obf".to_string()),
            ..params(&f)
        }
        .validate()
        .unwrap();

        let artifacts = task.artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].staged, f.tool_dir.join("App.dll"));
        assert_eq!(artifacts[0].produced, f.tool_dir.join("App_Obf.dll"));
        assert_eq!(artifacts[0].destination, out_dir.join("App_Obf.dll"));
        // validation never creates the output directory
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_input_inside_tool_dir_rejected() {
        let f = fixture();
        let inside = f.tool_dir.join("App.dll");
        fs::write(&inside, b"precious").unwrap();
        // `..` in the directory must not hide that it is tool_dir
        let roundabout = f.tool_dir.join("..").join("tool").join("App.dll");

        let result = TaskParams {
            input_files: vec![roundabout.display().to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::SourceInToolDir(p)) if p == roundabout));
        assert_eq!(fs::read(&inside).unwrap(), b"precious");
    }

    #[test]
    fn test_dependency_inside_tool_dir_rejected() {
        let f = fixture();
        let inside = f.tool_dir.join("App.Core.dll");
        fs::write(&inside, b"core").unwrap();

        let result = TaskParams {
            dependency_files: vec![inside.display().to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::SourceInToolDir(p)) if p == inside));
    }

    #[test]
    fn test_output_dir_equal_to_tool_dir_rejected() {
        let f = fixture();
        let result = TaskParams {
            output_dir: Some(f.tool_dir.display().to_string()),
            ..params(&f)
        }
        .validate();
        assert!(
            matches!(result, Err(ConfigError::DestinationInToolDir(p)) if p == f.tool_dir.join("App_Secure.dll"))
        );
    }

    #[test]
    fn test_output_file_on_produced_path_rejected() {
        let f = fixture();
        let produced = f.tool_dir.join("App_Secure.dll");
        let result = TaskParams {
            output_file: Some(produced.display().to_string()),
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::DestinationInToolDir(p)) if p == produced));

        // another name inside tool_dir does not collide with the tool's output
        let elsewhere = f.tool_dir.join("Release.dll");
        assert!(TaskParams {
            output_file: Some(elsewhere.display().to_string()),
            ..params(&f)
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_inputs_with_same_file_name_rejected() {
        let f = fixture();
        let root = f.tool_dir.parent().unwrap();
        let first = root.join("a").join("App.dll");
        let second = root.join("b").join("App.dll");
        for path in [&first, &second] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"app").unwrap();
        }

        let result = TaskParams {
            input_files: vec![first.display().to_string(), second.display().to_string()],
            output_dir: Some(root.join("out").display().to_string()),
            ..params(&f)
        }
        .validate();
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateStagedName { first: a, second: b }) if a == first && b == second
        ));
    }

    #[test]
    fn test_dependency_sharing_input_name_rejected() {
        let f = fixture();
        let other = f.tool_dir.parent().unwrap().join("lib").join("App.dll");
        fs::create_dir_all(other.parent().unwrap()).unwrap();
        fs::write(&other, b"other").unwrap();

        let result = TaskParams {
            dependency_files: vec![other.display().to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::DuplicateStagedName { .. })));
    }

    #[test]
    fn test_dependency_named_like_output_rejected() {
        let f = fixture();
        let clash = f.input.with_file_name("App_Secure.dll");
        fs::write(&clash, b"old output").unwrap();

        let result = TaskParams {
            dependency_files: vec![clash.display().to_string()],
            ..params(&f)
        }
        .validate();
        assert!(matches!(result, Err(ConfigError::StagedNameIsOutput(p)) if p == clash));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = TaskParams {
            tool_dir: Some("base-tool".to_string()),
            input_files: vec!["base.dll".to_string()],
            timeout_ms: Some(1000),
            ..Default::default()
        };
        let overrides = TaskParams {
            tool_dir: Some("cli-tool".to_string()),
            ..Default::default()
        };
        let merged = base.merge(overrides);
        assert_eq!(merged.tool_dir.as_deref(), Some("cli-tool"));
        assert_eq!(merged.input_files, vec!["base.dll".to_string()]);
        assert_eq!(merged.timeout_ms, Some(1000));
    }

    #[test]
    fn test_deserialize_string_or_list() {
        let params: TaskParams = toml::from_str(
            r#"
tool_dir = "tool"
input_file = "bin/App.dll"
dependency_files = "a.dll;b.dll"
"#,
        )
        .unwrap();
        assert_eq!(params.input_files, vec!["bin/App.dll".to_string()]);
        assert_eq!(params.dependency_files, vec!["a.dll;b.dll".to_string()]);

        let params: TaskParams =
            serde_json::from_str(r#"{"input_files": ["a.dll", "b.dll"]}"#).unwrap();
        assert_eq!(params.input_files.len(), 2);
    }
}
