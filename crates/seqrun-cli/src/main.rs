// crates/seqrun-cli/src/main.rs
// ============================================================================
// Module: seqrun CLI Entry Point
// Description: Command dispatcher for remote tool runs and job inspection.
// Purpose: Run tools, check job status, and fetch outputs from a shell.
// Dependencies: clap, seqrun-client, seqrun-config, seqrun-core, tokio
// ============================================================================

//! ## Overview
//! `seqrun run` submits one tool invocation and blocks until its outputs are
//! local (or, with `--detach`, until the remote job is executing). The first
//! Ctrl-C asks every worker to stop at its next check-in and waits for them;
//! a second Ctrl-C stops waiting. `status` and `download` operate on jobs by
//! identifier, typically ones started with `--detach`.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use seqrun_client::RunOutcome;
use seqrun_client::RunRequest;
use seqrun_client::SeqrunClient;
use seqrun_config::SeqrunConfig;
use seqrun_core::CancellationToken;
use seqrun_core::DatabaseRef;
use seqrun_core::InputSpec;
use seqrun_core::JobError;
use seqrun_core::OutputHandle;
use seqrun_core::RemoteJobId;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Exit code reported after an interrupted run.
const EXIT_INTERRUPTED: u8 = 130;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Remote bioinformatics job runner.
#[derive(Parser, Debug)]
#[command(name = "seqrun", version, about)]
struct Cli {
    /// Config file path (defaults to seqrun.toml or SEQRUN_CONFIG).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a tool on the remote service.
    Run(RunCommand),
    /// Show the remote status of a job.
    Status(StatusCommand),
    /// Download the outputs of a finished job.
    Download(DownloadCommand),
    /// List the tools this client can run.
    Tools,
    /// Validate the configuration file.
    Validate,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Tool name (see `seqrun tools`).
    tool: String,
    /// Input files, directories, or remote URIs.
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<String>,
    /// Directory receiving the outputs.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
    /// Extra tool arguments, sanitized against the tool's policy.
    #[arg(long, value_name = "ARGS", default_value = "", allow_hyphen_values = true)]
    args: String,
    /// Hosted database name.
    #[arg(long, value_name = "NAME", requires = "database_version")]
    database: Option<String>,
    /// Hosted database version.
    #[arg(long, value_name = "VERSION", requires = "database")]
    database_version: Option<String>,
    /// Caller-provided database location.
    #[arg(long, value_name = "URI", conflicts_with = "database")]
    custom_database: Option<String>,
    /// Return once the remote job is executing.
    #[arg(long, action = ArgAction::SetTrue)]
    detach: bool,
    /// Execution instance size hint.
    #[arg(long, value_name = "SIZE")]
    instance_size: Option<String>,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
struct StatusCommand {
    /// Remote job identifier.
    job_id: String,
}

/// Arguments for `download`.
#[derive(Args, Debug)]
struct DownloadCommand {
    /// Remote job identifier.
    job_id: String,
    /// Directory receiving the outputs.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
    /// Output file that must be present and non-empty (repeatable).
    #[arg(long = "expect", value_name = "NAME")]
    expected: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error with its exit status.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
    /// Set when the failure came from an interruption.
    interrupted: bool,
}

impl CliError {
    /// Constructs a plain failure.
    const fn new(message: String) -> Self {
        Self {
            message,
            interrupted: false,
        }
    }
}

impl From<JobError> for CliError {
    fn from(err: JobError) -> Self {
        Self {
            interrupted: err.is_interrupted(),
            message: err.to_string(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => emit_error(&err),
    }
}

/// Executes the command dispatcher.
async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = cli.config;
    match cli.command {
        Commands::Run(command) => command_run(config, command).await,
        Commands::Status(command) => {
            blocking(move || command_status(config.as_deref(), &command)).await
        }
        Commands::Download(command) => {
            blocking(move || command_download(config.as_deref(), &command)).await
        }
        Commands::Tools => command_tools(config.as_deref()),
        Commands::Validate => command_validate(config.as_deref()),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `run`, cancelling on Ctrl-C.
async fn command_run(config: Option<PathBuf>, command: RunCommand) -> CliResult<ExitCode> {
    let request = build_request(command)?;
    let token = CancellationToken::new();
    let watcher = tokio::spawn(watch_interrupts(token.clone()));
    let result = blocking(move || {
        let client = load_client(config.as_deref())?;
        client.run(&request, &token).map_err(CliError::from)
    })
    .await;
    watcher.abort();
    report_outcome(&result?)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `status`.
fn command_status(config: Option<&Path>, command: &StatusCommand) -> CliResult<ExitCode> {
    let client = load_client(config)?;
    let status = client.status(&RemoteJobId::new(command.job_id.as_str()))?;
    let rendered = serde_json::to_string_pretty(&status)
        .map_err(|err| CliError::new(format!("failed to render status: {err}")))?;
    write_stdout_line(&rendered)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `download`.
fn command_download(config: Option<&Path>, command: &DownloadCommand) -> CliResult<ExitCode> {
    let client = load_client(config)?;
    let handle = client.download(
        &RemoteJobId::new(command.job_id.as_str()),
        &command.output_dir,
        &command.expected,
    )?;
    report_paths(&handle)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `tools`.
fn command_tools(config: Option<&Path>) -> CliResult<ExitCode> {
    let registry = load_config(config)?
        .tool_registry()
        .map_err(|err| CliError::new(format!("invalid tool table: {err}")))?;
    for record in registry.iter() {
        let mode = if record.io.parallel { "parallel" } else { "serial" };
        write_stdout_line(&format!("{}\t{}\t{mode}", record.name, record.version))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes `validate`.
fn command_validate(config: Option<&Path>) -> CliResult<ExitCode> {
    let registry = load_config(config)?
        .tool_registry()
        .map_err(|err| CliError::new(format!("invalid tool table: {err}")))?;
    write_stdout_line(&format!("config ok ({} tools)", registry.len()))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a run request from parsed arguments.
fn build_request(command: RunCommand) -> CliResult<RunRequest> {
    let inputs = input_spec(&command.inputs);
    let mut request = RunRequest::new(command.tool, inputs)
        .output_dir(command.output_dir)
        .args(command.args)
        .detach(command.detach);
    if let Some(database) = database_ref(
        command.database,
        command.database_version,
        command.custom_database,
    )? {
        request = request.database(database);
    }
    if let Some(size) = command.instance_size {
        request = request.instance_size(size);
    }
    Ok(request)
}

/// Converts positional inputs into an input specification.
fn input_spec(inputs: &[String]) -> InputSpec {
    match inputs {
        [single] => InputSpec::from(single.as_str()),
        many => InputSpec::from(many.iter().map(String::as_str).collect::<Vec<_>>()),
    }
}

/// Builds the database reference from the database flags.
fn database_ref(
    name: Option<String>,
    version: Option<String>,
    custom: Option<String>,
) -> CliResult<Option<DatabaseRef>> {
    match (name, version, custom) {
        (None, None, None) => Ok(None),
        (Some(name), Some(version), None) => Ok(Some(DatabaseRef::Named {
            name,
            version,
        })),
        (None, None, Some(location)) => Ok(Some(DatabaseRef::Custom {
            location,
        })),
        _ => Err(CliError::new(
            "use --database with --database-version, or --custom-database alone".to_string(),
        )),
    }
}

/// Loads the configuration file.
fn load_config(path: Option<&Path>) -> CliResult<SeqrunConfig> {
    SeqrunConfig::load(path).map_err(|err| CliError::new(format!("config load failed: {err}")))
}

/// Loads configuration and builds the client.
fn load_client(path: Option<&Path>) -> CliResult<SeqrunClient> {
    let config = load_config(path)?;
    SeqrunClient::from_config(&config)
        .map_err(|err| CliError::new(format!("client setup failed: {err}")))
}

/// Runs blocking client work off the async runtime.
async fn blocking<T: Send + 'static>(
    work: impl FnOnce() -> CliResult<T> + Send + 'static,
) -> CliResult<T> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| CliError::new(format!("command task failed: {err}")))?
}

/// Cancels on the first Ctrl-C and escalates on the second.
async fn watch_interrupts(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    token.cancel();
    let _ = write_stderr_line("interrupt received; stopping workers (Ctrl-C again to stop waiting)");
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    token.escalate();
}

/// Prints a run outcome.
fn report_outcome(outcome: &RunOutcome) -> CliResult<()> {
    match outcome {
        RunOutcome::Completed(handle) => report_paths(handle),
        RunOutcome::Submitted(handle) => {
            let job_id = handle.job_id().map(ToString::to_string).unwrap_or_default();
            write_stdout_line(&format!("submitted job {job_id}"))
        }
        RunOutcome::Merged {
            outputs,
            job_ids,
        } => {
            let ids: Vec<String> = job_ids.iter().map(ToString::to_string).collect();
            write_stdout_line(&format!("merged outputs of jobs [{}]", ids.join(", ")))?;
            for path in outputs {
                write_stdout_line(&path.display().to_string())?;
            }
            Ok(())
        }
    }
}

/// Prints the job id and local output paths of a handle.
fn report_paths(handle: &OutputHandle) -> CliResult<()> {
    if let Some(job_id) = handle.job_id() {
        write_stdout_line(&format!("job {job_id}"))?;
    }
    for path in handle.local_paths() {
        write_stdout_line(&path.display().to_string())?;
    }
    Ok(())
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message and returns the matching exit code.
fn emit_error(err: &CliError) -> ExitCode {
    let _ = write_stderr_line(&err.message);
    if err.interrupted { ExitCode::from(EXIT_INTERRUPTED) } else { ExitCode::FAILURE }
}
