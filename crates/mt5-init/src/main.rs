use std::fmt;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use mt5_common::{Logger, log_info};
use mt5_provision::config::{ConfigArgs, ProvisionConfig};
use mt5_provision::error::LedgerError;
use mt5_provision::{
    Context, HttpFetcher, InstallLedger, ProvisionError, SystemRunner, app, paths, supervisor,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

const LOG_TAG: &str = "init";

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "mt5-init", version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Provision, launch everything, then supervise until SIGTERM (default)
    Run,
    /// Normalize ownership and install dependencies and the terminal only
    Install,
    /// Launch the terminal detached if it is installed
    Launch,
    /// Print the install ledger
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Diagnostics go to stderr; the status log owns stdout.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve on SIGTERM or SIGINT. A handler that cannot be installed never
/// resolves, so the other one still works.
async fn shutdown_signal() {
    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    let sigint = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = sigterm => info!("received SIGTERM"),
        () = sigint => info!("received SIGINT"),
    }
}

/// Render the install ledger as a table, or as the raw JSON document.
fn render_status(ledger: &InstallLedger, json: bool) -> Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string_pretty(ledger.data()).map(|out| out + "\n");
    }

    let components = &ledger.data().components;
    if components.is_empty() {
        return Ok(format!(
            "No components recorded in {}\n",
            ledger.path().display()
        ));
    }

    let mut out = format!("{:<14} {:<17} {:<33} ERROR\n", "COMPONENT", "STATE", "UPDATED");
    for (name, record) in components {
        out.push_str(&format!(
            "{:<14} {:<17} {:<33} {}\n",
            name,
            record.state,
            record.updated_at,
            record.error.as_deref().unwrap_or("-")
        ));
    }
    Ok(out)
}

/// Reads only the ledger: no owner lookup, no log file.
fn status(volume_dir: &Path, json: bool) -> Result<String, ProvisionError> {
    let ledger = InstallLedger::load(paths::ledger_file(volume_dir))?;
    render_status(&ledger, json).map_err(|e| LedgerError::from(e).into())
}

/// Everything the provisioning subcommands share.
struct Runtime {
    config: ProvisionConfig,
    log: Logger,
    runner: SystemRunner,
    fetcher: HttpFetcher,
}

impl Runtime {
    fn new(args: &ConfigArgs) -> Result<Self, ProvisionError> {
        let config = args.load()?;
        let log = Logger::open_or_stdout(&config.log_file, LOG_TAG);
        let runner = SystemRunner::new(config.command_env()).run_as(config.owner);
        Ok(Self {
            config,
            log,
            runner,
            fetcher: HttpFetcher::new(),
        })
    }

    fn ctx(&self) -> Context<'_> {
        Context {
            config: &self.config,
            log: &self.log,
            runner: &self.runner,
            fetcher: &self.fetcher,
        }
    }
}

/// No subcommand means `run`, so the container entrypoint needs no args.
fn resolve(command: Option<Command>) -> Command {
    command.unwrap_or(Command::Run)
}

async fn execute(cli: Cli) -> Result<(), ProvisionError> {
    match resolve(cli.command) {
        Command::Run => {
            let rt = Runtime::new(&cli.config)?;
            supervisor::run(&rt.ctx(), shutdown_signal()).await?;
            log_info!(rt.log, LOG_TAG, "Shutdown complete");
        }
        Command::Install => {
            let rt = Runtime::new(&cli.config)?;
            let report = supervisor::install(&rt.ctx()).await?;
            info!(?report, "install finished");
        }
        Command::Launch => {
            let rt = Runtime::new(&cli.config)?;
            let ctx = rt.ctx();
            let mut ledger = supervisor::open_ledger(&ctx);
            // Dropping the handle leaves the terminal running on its own.
            if let Some(handle) = app::launch_application(&ctx, &mut ledger) {
                info!(name = handle.name(), pid = ?handle.id(), "launched detached");
            }
        }
        Command::Status { json } => {
            print!("{}", status(&cli.config.volume_dir, json)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
