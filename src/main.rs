use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use mockge::config::EngineConfig;
use mockge::engine::current_user;
use mockge::query::{Accounting, UserFilter};
use mockge::report;
use mockge::scheduler::JobRequest;
use mockge::MockGe;

#[derive(Parser, Debug)]
#[command(name = "mockge")]
#[command(version)]
#[command(about = "A single-host mock of the Grid Engine qsub, qstat and qacct commands")]
struct Args {
    #[command(flatten)]
    engine: EngineArgs,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Maximum number of jobs running at once
    #[arg(long, global = true, env = "MOCKGE_MAX_JOBS", default_value = "4")]
    max_jobs: usize,

    /// Seconds after a job ends before qacct reports it
    #[arg(long, global = true, env = "MOCKGE_QACCT_DELAY", default_value = "15")]
    qacct_delay: u64,

    /// Shell used to run job scripts
    #[arg(long, global = true, env = "MOCKGE_SHELL", default_value = "/bin/bash")]
    shell: PathBuf,

    /// State directory (default: ~/.mockGE)
    #[arg(long, global = true, env = "MOCKGE_DATABASE_DIR")]
    database_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

impl EngineArgs {
    fn to_config(&self) -> EngineConfig {
        EngineConfig {
            database_dir: self.database_dir.clone(),
            ..EngineConfig::default()
        }
        .with_max_jobs(self.max_jobs)
        .with_qacct_delay(Duration::from_secs(self.qacct_delay))
        .with_shell(self.shell.clone())
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Submit a job
    Qsub(QsubArgs),
    /// List queued and running jobs
    Qstat(QstatArgs),
    /// Show accounting information for a finished job
    Qacct(QacctArgs),
}

// =============================================================================
// Grid Engine style arguments
// =============================================================================

#[derive(clap::Args, Debug)]
struct QsubArgs {
    /// Treat the command as a binary (accepted, ignored)
    #[arg(short = 'b')]
    binary: Option<String>,

    /// Export the environment (accepted, ignored)
    #[arg(short = 'V')]
    export_env: bool,

    /// Job name
    #[arg(short = 'N')]
    name: Option<String>,

    /// Run in the current working directory
    #[arg(long = "cwd")]
    cwd: bool,

    /// Working directory
    #[arg(long = "wd")]
    wd: Option<PathBuf>,

    /// Parallel environment (accepted, ignored)
    #[arg(long = "pe", num_args = 2, value_names = ["ENV", "SLOTS"])]
    pe: Vec<String>,

    /// Merge stderr into stdout ("y" or "n")
    #[arg(short = 'j')]
    join: Option<String>,

    /// Output file base name or directory
    #[arg(short = 'o')]
    output: Option<String>,

    /// Error file (accepted, ignored)
    #[arg(short = 'e')]
    error: Option<String>,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct QstatArgs {
    /// User whose jobs to list ("*" for all users)
    #[arg(short = 'u')]
    user: Option<String>,
}

#[derive(clap::Args, Debug)]
struct QacctArgs {
    /// Job id
    #[arg(short = 'j')]
    job_id: i64,
}

#[derive(Serialize)]
struct SubmitOutput {
    job_id: i64,
    name: String,
}

// =============================================================================
// Helper Functions
// =============================================================================

const SUBCOMMANDS: [&str; 3] = ["qsub", "qstat", "qacct"];

/// qsub options spelled with a single dash and a multi-letter name.
const LONG_SINGLE_DASH: [(&str, usize); 3] = [("-cwd", 0), ("-wd", 1), ("-pe", 2)];

/// qsub options that take a value.
const VALUE_OPTIONS: [&str; 5] = ["-b", "-N", "-j", "-o", "-e"];

/// Rewrite the process arguments into the form clap parses.
///
/// A binary invoked as `qsub`, `qstat` or `qacct` implies that subcommand,
/// and `-cwd`, `-wd` and `-pe` before the job command become `--cwd`,
/// `--wd` and `--pe`.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().collect();
    let invoked_as = args
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| SUBCOMMANDS.contains(name))
        .map(str::to_string);
    if let Some(name) = invoked_as {
        args.insert(1, OsString::from(name));
    }

    let Some(qsub_at) = args.iter().skip(1).position(|a| a == "qsub") else {
        return args;
    };

    let mut pending_values = 0usize;
    for arg in args.iter_mut().skip(qsub_at + 2) {
        if pending_values > 0 {
            pending_values -= 1;
            continue;
        }
        let Some(text) = arg.to_str() else {
            break;
        };
        if let Some((flag, values)) = LONG_SINGLE_DASH.iter().find(|(flag, _)| *flag == text) {
            pending_values = *values;
            *arg = OsString::from(format!("-{flag}"));
        } else if let Some((_, values)) = LONG_SINGLE_DASH
            .iter()
            .find(|(flag, _)| text.strip_prefix('-') == Some(*flag))
        {
            pending_values = *values;
        } else if VALUE_OPTIONS.contains(&text) {
            pending_values = 1;
        } else if !text.starts_with('-') {
            break;
        }
    }
    args
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_qsub(
    engine: &mut MockGe,
    args: QsubArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(
        binary = ?args.binary,
        export_env = args.export_env,
        cwd = args.cwd,
        pe = ?args.pe,
        error = ?args.error,
        "Ignoring unsupported qsub options"
    );
    let working_dir = match args.wd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mut request = JobRequest::new(args.command)
        .with_working_dir(working_dir)
        .with_join_output(args.join.as_deref() == Some("y"));
    if let Some(name) = args.name {
        request = request.with_name(name);
    }
    if let Some(output) = args.output {
        request = request.with_output_path(output);
    }

    let submission = engine.submit(request).await?;
    match output_format {
        OutputFormat::Json => {
            let output = SubmitOutput {
                job_id: submission.job_id,
                name: submission.name,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => println!("{}", report::submitted(&submission)),
    }
    Ok(())
}

async fn handle_qstat(
    engine: &mut MockGe,
    args: QstatArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = args.user.unwrap_or_else(current_user);
    let jobs = engine.list(&UserFilter::parse(&user)).await?;
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        OutputFormat::Table => print!("{}", report::qstat_table(&jobs)),
    }
    Ok(())
}

async fn handle_qacct(
    engine: &mut MockGe,
    args: QacctArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = engine.accounting(args.job_id).await?;
    match (&outcome, output_format) {
        (Accounting::Unavailable, _) => eprintln!("{}", report::job_not_found(args.job_id)),
        (Accounting::Pending { .. }, _) => {}
        (Accounting::Ready { .. }, OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        (Accounting::Ready { job }, OutputFormat::Table) => print!("{}", report::qacct_block(job)),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse_from(normalize_args(std::env::args_os()));
    init_logging(args.engine.debug);

    let mut engine = MockGe::open(args.engine.to_config()).await?;
    let result = match args.command {
        Commands::Qsub(qsub) => handle_qsub(&mut engine, qsub, &args.format).await,
        Commands::Qstat(qstat) => handle_qstat(&mut engine, qstat, &args.format).await,
        Commands::Qacct(qacct) => handle_qacct(&mut engine, qacct, &args.format).await,
    };
    engine.close().await;
    result
}
