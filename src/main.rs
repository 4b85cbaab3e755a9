use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use harness::{AgentSession, AgentStatus, Credentials, HarnessConfig};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("log setup failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
    #[error("trace serialisation failed: {0}")]
    Trace(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(
    name = "smoke",
    about = "Basic scenario: Login - Set agent states - Logout"
)]
struct Cli {
    /// Agent's name
    #[arg(short, long, env = "SMOKE_USER")]
    user: String,

    /// Agent's password
    #[arg(short, long, env = "SMOKE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Server address, e.g. 10.5.78.3:8500
    #[arg(short, long, env = "SMOKE_SERVER")]
    server: String,

    #[arg(long, default_value = "log")]
    log_dir: PathBuf,

    /// State to set, as Label:code. Repeat for several.
    #[arg(
        long = "state",
        value_parser = AgentStatus::parse,
        default_values = ["Available:ready-call", "Unavailable:break"]
    )]
    states: Vec<AgentStatus>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return usage_exit(&error),
    };

    let stamp = match run_stamp() {
        Ok(stamp) => stamp,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = init_logging(&cli.log_dir, &stamp) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }
    tracing::info!(user = %cli.user, server = %cli.server, "started");

    let config = HarnessConfig::from_env(cli.server.clone());
    let credentials = Credentials::new(cli.user.clone(), cli.password.clone());
    let mut session = match AgentSession::new(config, credentials) {
        Ok(session) => session,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    let result = session
        .run_lifecycle(&cli.states, |line| {
            tracing::info!("---- {line}:");
            println!("{line}");
        })
        .await;

    let passed = result.is_ok();
    if let Err(error) = &result {
        eprintln!("\n{error}\n");
        tracing::error!(error = %error, state = %session.state(), "scenario failed");
    }

    let mut trace = session.into_trace();
    trace.verdict(passed);
    match write_trace(&cli.log_dir, &stamp, &trace) {
        Ok(path) => tracing::info!(path = %path.display(), "trace written"),
        Err(error) => eprintln!("{error}"),
    }

    if passed {
        println!("TEST PASSED");
        tracing::info!("---- TEST PASSED ----");
        ExitCode::SUCCESS
    } else {
        println!("TEST FAILED");
        tracing::info!("---- TEST FAILED ----");
        ExitCode::FAILURE
    }
}

/// Print a clap error or help text. Help and version exit 0, bad input exits 1.
fn usage_exit(error: &clap::Error) -> ExitCode {
    if let Err(io) = error.print() {
        eprintln!("could not print usage: {io}\n{error}");
        return ExitCode::FAILURE;
    }
    if error.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// `yyMMdd_HHMMSS.mmm`, shared by the log and trace file names.
fn run_stamp() -> Result<String, CliError> {
    let format = time::macros::format_description!(
        "[year repr:last_two][month][day]_[hour][minute][second].[subsecond digits:3]"
    );
    Ok(OffsetDateTime::now_utc().format(format)?)
}

fn init_logging(dir: &Path, stamp: &str) -> Result<(), CliError> {
    fs::create_dir_all(dir)?;
    let file = File::create(dir.join(format!("log_{stamp}.txt")))?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .with_max_level(tracing::Level::INFO)
        .init();
    Ok(())
}

fn write_trace(dir: &Path, stamp: &str, trace: &traces::TraceLog) -> Result<PathBuf, CliError> {
    let path = dir.join(format!("trace_{stamp}.jsonl"));
    fs::write(&path, trace.to_jsonl()?)?;
    Ok(path)
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
