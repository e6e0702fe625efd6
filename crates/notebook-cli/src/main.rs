mod notebook_dir;
mod test_file;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use notebook::config::{ConfigSource, EngineConfig};
use notebook::errors::render_report;
use notebook::parser::parse_program;
use notebook::{Engine, Output, Response, ScriptRequest};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "notebook")]
#[command(about = "Run canvas notebook scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration, instead of the notebook.toml next to a notebook
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Abandon an invocation after this many milliseconds
    #[arg(long, global = true, default_value = "10000")]
    timeout_ms: u64,

    /// Print responses as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run notebook directories
    Run {
        /// Directories holding main.js and its modules
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Run notebook test files with expected output verification
    Test {
        /// Test files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the value of every top-level declaration of a notebook
    Introspect {
        /// Directory holding main.js and its modules
        dir: PathBuf,
    },
    /// Check if a script parses correctly
    Check {
        /// Path to a .js file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(dispatch(cli));
    // Timed out invocations keep their blocking threads; do not wait for them.
    runtime.shutdown_background();

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<bool> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    match cli.command {
        Commands::Run { dirs } => run_notebooks(&dirs, cli.config.as_deref(), timeout, cli.json).await,
        Commands::Test { files } => run_tests(&files, cli.config.as_deref(), timeout).await,
        Commands::Introspect { dir } => introspect(&dir, cli.config.as_deref(), timeout, cli.json).await,
        Commands::Check { file } => check(&file),
    }
}

fn engine_for(config: Option<&Path>, directory: &Path) -> Result<Engine> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => {
            let (config, source) = EngineConfig::discover(directory)?;
            if let ConfigSource::File(path) = source {
                log::info!("Using {}", path.display());
            }
            config
        }
    };
    Ok(Engine::new(config))
}

/// Runs `job` on a blocking thread. On timeout the thread is left behind.
async fn invoke<T, F>(timeout: Duration, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let task = tokio::task::spawn_blocking(job);
    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => joined.context("Invocation failed"),
        Err(_) => bail!("Timed out after {} ms", timeout.as_millis()),
    }
}

async fn run_notebooks(dirs: &[PathBuf], config: Option<&Path>, timeout: Duration, json: bool) -> Result<bool> {
    let mut tasks = Vec::new();
    for dir in dirs {
        let engine = engine_for(config, dir)?;
        let request = notebook_dir::load(dir)?;
        let task = tokio::spawn(invoke(timeout, move || engine.run(&request)));
        tasks.push((dir, task));
    }

    let mut success = true;
    for (dir, task) in tasks {
        if dirs.len() > 1 {
            eprintln!("Running: {}", dir.display());
        }
        let response = match task.await.context("Invocation task panicked")? {
            Ok(response) => response,
            Err(error) => {
                eprintln!("Error: {error:#}");
                success = false;
                continue;
            }
        };
        if json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            success &= !response.output.is_error();
        } else {
            success &= print_response(&response);
        }
    }
    Ok(success)
}

fn print_response(response: &Response) -> bool {
    for entry in &response.logs {
        eprintln!("[{}] {}", entry.level, entry.message);
    }
    for (index, outcome) in response.unit_tests.iter().enumerate() {
        let status = match (outcome.passed, &outcome.error) {
            (None, _) => "skipped".to_string(),
            (Some(true), _) => "ok".to_string(),
            (Some(false), Some(error)) => format!("FAILED: {error}"),
            (Some(false), None) => "FAILED".to_string(),
        };
        eprintln!("  test {} `{}` ... {status}", index + 1, outcome.expression);
    }
    print_output(&response.output)
}

fn print_output(output: &Output) -> bool {
    match output {
        Output::Plaintext { code } | Output::Json { code } | Output::Svg { code } => {
            println!("{code}");
            true
        }
        Output::Undefined => true,
        Output::Error { message, stack, report } => {
            match report {
                Some(report) => eprint!("{report}"),
                None => eprintln!("{message}"),
            }
            if let Some(stack) = stack {
                log::debug!("{stack}");
            }
            false
        }
    }
}

async fn introspect(dir: &Path, config: Option<&Path>, timeout: Duration, json: bool) -> Result<bool> {
    let engine = engine_for(config, dir)?;
    let request = notebook_dir::load(dir)?;
    let response = invoke(timeout, move || engine.introspect(&request)).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(response.error.is_none());
    }
    if let Some(error) = &response.error {
        return Ok(print_output(error));
    }
    for (name, output) in &response.symbols {
        let rendered = match output {
            Output::Plaintext { code } => format!("{code:?}"),
            Output::Json { code } | Output::Svg { code } => code.clone(),
            Output::Undefined => "undefined".to_string(),
            Output::Error { message, .. } => message.clone(),
        };
        println!("{name} = {rendered}");
    }
    Ok(true)
}

/// Notebook test file format:
/// ```text
/// // test: test_name
/// code here
/// // expect: expected_json_value
/// ```
async fn run_tests(files: &[PathBuf], config: Option<&Path>, timeout: Duration) -> Result<bool> {
    let mut total = 0;
    let mut passed = 0;
    let mut failed = 0;

    for file in files {
        let content = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(error) => {
                eprintln!("Error reading {}: {error}", file.display());
                failed += 1;
                continue;
            }
        };
        let directory = file.parent().unwrap_or(Path::new("."));
        let engine = engine_for(config, directory)?;
        let parsed = test_file::parse(&content);

        let mut tasks = Vec::new();
        for case in parsed.cases {
            let engine = engine.clone();
            let mut request = ScriptRequest::new(case.code.clone());
            request.modules = parsed.modules.clone();
            let task = tokio::spawn(invoke(timeout, move || engine.run(&request)));
            tasks.push((case, task));
        }

        eprintln!("{}", file.display());
        for (case, task) in tasks {
            total += 1;
            eprint!("  {} ... ", case.name);
            let response = task.await.context("Invocation task panicked")?;
            let ok = match response {
                Ok(response) => verify(&response.output, case.expected.as_deref()),
                Err(error) => {
                    eprintln!("FAILED: {error:#}");
                    false
                }
            };
            if ok {
                passed += 1;
            } else {
                failed += 1;
            }
        }
    }

    eprintln!("\n{total} tests: {passed} passed, {failed} failed");
    Ok(failed == 0)
}

fn verify(output: &Output, expected: Option<&str>) -> bool {
    let actual = match output_json(output) {
        Ok(actual) => actual,
        Err(message) => {
            eprintln!("FAILED: {message}");
            return false;
        }
    };
    let Some(expected) = expected else {
        eprintln!("ok ({actual})");
        return true;
    };
    match serde_json::from_str::<serde_json::Value>(expected) {
        Ok(expected_value) if expected_value == actual => {
            eprintln!("ok");
            true
        }
        Ok(_) => {
            eprintln!("FAILED");
            eprintln!("    expected: {expected}");
            eprintln!("    actual:   {actual}");
            false
        }
        Err(error) => {
            eprintln!("FAILED (invalid expected JSON: {error})");
            false
        }
    }
}

fn output_json(output: &Output) -> std::result::Result<serde_json::Value, String> {
    match output {
        Output::Plaintext { code } | Output::Svg { code } => Ok(serde_json::Value::String(code.clone())),
        Output::Json { code } => serde_json::from_str(code).map_err(|error| error.to_string()),
        Output::Undefined => Ok(serde_json::Value::Null),
        Output::Error { message, .. } => Err(message.clone()),
    }
}

fn check(file: &Path) -> Result<bool> {
    let source = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file.display().to_string();
    match parse_program(&source) {
        Ok(statements) => {
            eprintln!("OK: {filename} parses ({} statements)", statements.len());
            Ok(true)
        }
        Err(issues) => {
            for issue in &issues {
                match render_report(&filename, &source, issue.range.clone(), &issue.message) {
                    Some(report) => eprint!("{report}"),
                    None => eprintln!("{filename}: {}", issue.message),
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_json() {
        assert_eq!(output_json(&Output::Undefined), Ok(json!(null)));
        assert_eq!(
            output_json(&Output::Plaintext { code: "a".to_string() }),
            Ok(json!("a"))
        );
        assert_eq!(
            output_json(&Output::Json { code: "[1, 2]".to_string() }),
            Ok(json!([1, 2]))
        );
        assert_eq!(output_json(&Output::error("boom")), Err("boom".to_string()));
    }

    #[test]
    fn test_verify_compares_json() {
        let output = Output::Json { code: "{\"a\": 1}".to_string() };
        assert!(verify(&output, Some("{ \"a\": 1 }")));
        assert!(!verify(&output, Some("{ \"a\": 2 }")));
        assert!(verify(&output, None));
        assert!(!verify(&Output::error("boom"), None));
    }

    #[tokio::test]
    async fn test_invoke_times_out() {
        let result = invoke(Duration::from_millis(10), || std::thread::sleep(Duration::from_millis(200))).await;
        assert!(result.is_err());
        let value = invoke(Duration::from_secs(5), || 7).await.expect("finishes");
        assert_eq!(value, 7);
    }
}
