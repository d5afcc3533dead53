//! SecStage CLI
//!
//! Command-line interface for handing build output to an external
//! obfuscation tool and collecting the result.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use secstage_core::{
    default_config_toml, load_layered, FileMaterializationWaiter, StagingTask, TaskParams,
    CONFIG_FILE_NAME,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "secstage")]
#[command(about = "Stage build artifacts for an external obfuscation tool and collect its output")]
#[command(version)]
struct Cli {
    /// Log debug output (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage inputs, wait for the obfuscated output and move it to the build output
    Run(RunArgs),

    /// Wait until the given files exist
    Wait {
        /// Files to wait for
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Give up after this many milliseconds
        #[arg(short, long, default_value = "30000")]
        timeout_ms: u64,

        /// Check every this many milliseconds
        #[arg(short, long, default_value = "500")]
        poll_interval_ms: u64,
    },

    /// Write a default secstage.toml
    Init {
        /// Directory watched by the obfuscation tool
        #[arg(long, default_value = "obfuscator")]
        tool_dir: String,

        /// File to obfuscate
        #[arg(long, default_value = "bin/Release/App.dll")]
        input: String,

        /// Directory to write the config into (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (default: secstage.toml or secstage.json in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory watched by the obfuscation tool
    #[arg(long)]
    tool_dir: Option<String>,

    /// File to obfuscate (repeatable)
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// File the tool needs next to the inputs (repeatable, or ';'-separated)
    #[arg(short, long = "dependency")]
    dependencies: Vec<String>,

    /// Destination of the obfuscated file (single input only)
    #[arg(short, long)]
    output_file: Option<String>,

    /// Directory receiving the obfuscated files
    #[arg(long)]
    output_dir: Option<String>,

    /// Give up waiting for the tool after this many milliseconds (default: 30000)
    #[arg(short, long)]
    timeout_ms: Option<i64>,

    /// Check for the tool's output every this many milliseconds (default: 500)
    #[arg(long)]
    poll_interval_ms: Option<i64>,

    /// Suffix the tool appends to output file names (default: _Secure)
    #[arg(short, long)]
    suffix: Option<String>,

    /// Progress message importance: high, normal or low
    #[arg(long)]
    importance: Option<String>,
}

impl From<RunArgs> for TaskParams {
    fn from(args: RunArgs) -> Self {
        TaskParams {
            tool_dir: args.tool_dir,
            input_files: args.inputs,
            dependency_files: args.dependencies,
            output_file: args.output_file,
            output_dir: args.output_dir,
            timeout_ms: args.timeout_ms,
            poll_interval_ms: args.poll_interval_ms,
            suffix: args.suffix,
            importance: args.importance,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref())?)
        .init();

    tracing::debug!("secstage {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => {
            cmd_run(args).await?;
        }
        Commands::Wait {
            paths,
            timeout_ms,
            poll_interval_ms,
        } => {
            if !cmd_wait(paths, timeout_ms, poll_interval_ms).await {
                std::process::exit(1);
            }
        }
        Commands::Init {
            tool_dir,
            input,
            path,
            force,
        } => {
            cmd_init(&tool_dir, &input, path, force)?;
        }
    }

    Ok(())
}

/// Stage, wait and relocate
async fn cmd_run(args: RunArgs) -> Result<()> {
    let project_dir = std::env::current_dir().context("Failed to read current directory")?;
    let config_path = args.config.clone();
    let file_params = load_layered(config_path.as_deref(), &project_dir)?;
    let params = file_params.merge(args.into());

    let task = StagingTask::from_params(params)?;
    tracing::info!(
        "Staging {} file(s) into {}",
        task.task().inputs.len(),
        task.task().tool_dir.display()
    );

    let outcome = task.run().await?;
    tracing::info!(
        "Obfuscated {} file(s) in {:.1}s",
        outcome.outputs.len(),
        outcome.waited.as_secs_f64()
    );

    write_outputs(std::io::stdout().lock(), &outcome.outputs)
        .context("Failed to print output paths")?;

    Ok(())
}

/// `RUST_LOG` when set, otherwise info (debug with `-v`) for our own crates
fn log_filter(verbose: bool, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives).context("Invalid RUST_LOG");
    }
    let level = if verbose { "debug" } else { "info" };
    Ok(EnvFilter::new(format!("secstage={},secstage_core={}", level, level)))
}

/// One produced path per line, unaltered
fn write_outputs(mut out: impl Write, outputs: &[PathBuf]) -> std::io::Result<()> {
    for output in outputs {
        writeln!(out, "{}", output.display())?;
    }
    out.flush()
}

/// Wait for files to appear; true when all of them did
async fn cmd_wait(paths: Vec<PathBuf>, timeout_ms: u64, poll_interval_ms: u64) -> bool {
    let waiter = FileMaterializationWaiter::new(
        Duration::from_millis(poll_interval_ms.max(1)),
        Duration::from_millis(timeout_ms),
    );

    tracing::info!("Waiting up to {} ms for {} file(s)", timeout_ms, paths.len());
    let outcome = waiter.wait(paths).await;

    if outcome.is_materialized() {
        tracing::info!("All files present after {} check(s)", outcome.polls);
        true
    } else {
        for missing in &outcome.missing {
            tracing::error!("Timed out waiting for: {}", missing.display());
        }
        false
    }
}

/// Write a default config file
fn cmd_init(tool_dir: &str, input: &str, path: Option<PathBuf>, force: bool) -> Result<()> {
    let dir = match path {
        Some(p) => p,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let config_path = write_default_config(&dir, tool_dir, input, force)?;

    println!("Wrote {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Point tool_dir at the directory your obfuscation tool watches");
    println!("  2. Run: secstage run");

    Ok(())
}

fn write_default_config(dir: &Path, tool_dir: &str, input: &str, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&config_path, default_config_toml(tool_dir, input))
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secstage_core::load_config_file;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "secstage",
            "run",
            "--tool-dir",
            "tool",
            "-i",
            "bin/App.dll",
            "-i",
            "bin/Plugin.dll",
            "-d",
            "a.dll;b.dll",
            "--timeout-ms",
            "5000",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let params = TaskParams::from(args);
        assert_eq!(params.tool_dir.as_deref(), Some("tool"));
        assert_eq!(params.input_files.len(), 2);
        assert_eq!(params.dependency_files, vec!["a.dll;b.dll".to_string()]);
        assert_eq!(params.timeout_ms, Some(5000));
        assert!(params.suffix.is_none());
    }

    #[test]
    fn test_wait_requires_paths() {
        assert!(Cli::try_parse_from(["secstage", "wait"]).is_err());
    }

    #[test]
    fn test_rust_log_replaces_default_directives() {
        let filter = log_filter(true, Some("secstage=warn")).unwrap().to_string();
        assert!(filter.contains("secstage=warn"));
        assert!(!filter.contains("debug"));

        let filter = log_filter(true, None).unwrap().to_string();
        assert!(filter.contains("secstage=debug"));
        assert!(filter.contains("secstage_core=debug"));

        let filter = log_filter(false, Some("  ")).unwrap().to_string();
        assert!(filter.contains("secstage=info"));
    }

    #[test]
    fn test_output_paths_printed_verbatim() {
        let output = PathBuf::from("out").join("odd\\name_Secure.dll");
        let mut buf = Vec::new();
        write_outputs(&mut buf, &[output.clone()]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), format!("{}\n", output.display()));
    }

    #[test]
    fn test_write_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_default_config(temp_dir.path(), "tool", "bin/App.dll", false).unwrap();

        let params = load_config_file(&path).unwrap();
        assert_eq!(params.tool_dir.as_deref(), Some("tool"));

        assert!(write_default_config(temp_dir.path(), "tool", "bin/App.dll", false).is_err());
        assert!(write_default_config(temp_dir.path(), "other", "bin/App.dll", true).is_ok());
    }
}
