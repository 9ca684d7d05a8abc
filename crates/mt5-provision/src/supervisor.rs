//! The startup sequence.
//!
//! Steps run strictly in order, each awaited before the next begins:
//! 1. Ownership normalizer (the only fatal step)
//! 2. Dependency installer, one component at a time
//! 3. Application installer/launcher
//! 4. Auxiliary service starter
//!
//! After that the supervisor idles until told to shut down, polling
//! liveness of what it started. Nothing is ever restarted.

use std::collections::HashSet;
use std::future::Future;

use mt5_common::{log_error, log_info, log_running, log_warn};
use tokio::time::MissedTickBehavior;

use crate::app;
use crate::context::Context;
use crate::error::Result;
use crate::install;
use crate::ledger::{ComponentState, InstallLedger};
use crate::ownership;
use crate::prerequisites::check_prerequisites;
use crate::process::Supervised;
use crate::services;

const LOG_TAG: &str = "supervisor";

/// Processes started by the sequence.
pub struct Running {
    pub application: Option<Box<dyn Supervised>>,
    pub services: Vec<Box<dyn Supervised>>,
}

impl Running {
    pub fn len(&self) -> usize {
        self.services.len() + usize::from(self.application.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handles_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Supervised>> {
        self.application.iter_mut().chain(self.services.iter_mut())
    }
}

/// Final state of every component after the install phase.
#[derive(Debug)]
pub struct InstallReport {
    pub dependencies: Vec<(String, ComponentState)>,
    pub application: ComponentState,
}

fn normalize_ownership(ctx: &Context<'_>) -> Result<()> {
    let config = ctx.config;
    log_running!(
        ctx.log,
        "ownership",
        "Setting ownership of {} to {}:{}",
        config.volume_dir.display(),
        config.owner.uid,
        config.owner.gid
    );
    match ownership::normalize(&config.volume_dir, config.owner) {
        Ok(count) => {
            log_info!(ctx.log, "ownership", "Ownership set on {count} entries");
            Ok(())
        }
        Err(e) => {
            log_error!(ctx.log, "ownership", "Aborting startup: {e}");
            Err(e)
        }
    }
}

/// Load the install ledger; an unreadable ledger is replaced by an empty one.
pub fn open_ledger(ctx: &Context<'_>) -> InstallLedger {
    let path = ctx.config.ledger_file.clone();
    match InstallLedger::load(path.clone()) {
        Ok(ledger) => ledger,
        Err(e) => {
            log_warn!(
                ctx.log,
                LOG_TAG,
                "Install ledger {} is unreadable ({e}), starting from an empty one",
                path.display()
            );
            InstallLedger::empty(path)
        }
    }
}

/// Normalizer, prerequisite hints and ledger: everything before the first
/// install step.
fn prepare(ctx: &Context<'_>) -> Result<InstallLedger> {
    normalize_ownership(ctx)?;

    let check = check_prerequisites(ctx.config);
    if !check.ok {
        for error in &check.errors {
            log_warn!(ctx.log, LOG_TAG, "{error}");
        }
    }

    Ok(open_ledger(ctx))
}

pub async fn install_dependencies(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
) -> Vec<(String, ComponentState)> {
    let mut states = Vec::with_capacity(ctx.config.dependencies.len());
    for component in &ctx.config.dependencies {
        let state = install::ensure_component(ctx, ledger, component).await;
        states.push((component.name.clone(), state));
    }
    states
}

/// Install everything without launching anything.
pub async fn install(ctx: &Context<'_>) -> Result<InstallReport> {
    log_info!(ctx.log, LOG_TAG, "Starting install sequence");
    let mut ledger = prepare(ctx)?;
    let dependencies = install_dependencies(ctx, &mut ledger).await;
    let application = app::install_application(ctx, &mut ledger).await;
    log_info!(ctx.log, LOG_TAG, "Install sequence finished");
    Ok(InstallReport {
        dependencies,
        application,
    })
}

/// Run steps 1–4 and return the started processes.
///
/// Only an ownership failure (or an invalid configuration upstream) is
/// returned as an error; every later failure is logged and skipped.
pub async fn start(ctx: &Context<'_>) -> Result<Running> {
    log_info!(ctx.log, LOG_TAG, "Starting provisioning sequence");
    let mut ledger = prepare(ctx)?;
    install_dependencies(ctx, &mut ledger).await;
    let application = app::provision_application(ctx, &mut ledger).await;
    let services = services::start_services(ctx);
    Ok(Running {
        application,
        services,
    })
}

/// Block until `shutdown` resolves, logging one `ERROR` line the first
/// time each supervised process is found dead.
pub async fn idle<F>(ctx: &Context<'_>, running: &mut Running, shutdown: F)
where
    F: Future<Output = ()>,
{
    log_info!(
        ctx.log,
        LOG_TAG,
        "Startup sequence complete, supervising {} process(es)",
        running.len()
    );

    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(ctx.config.watch_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reported: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = interval.tick() => {
                for handle in running.handles_mut() {
                    if !handle.is_alive() && reported.insert(handle.name().to_string()) {
                        log_error!(ctx.log, LOG_TAG, "{} is no longer running", handle.name());
                    }
                }
            }
        }
    }
}

/// Terminate services first, then the terminal.
pub async fn stop(ctx: &Context<'_>, running: &mut Running) {
    log_info!(
        ctx.log,
        LOG_TAG,
        "Shutdown requested, stopping {} process(es)",
        running.len()
    );
    let grace = ctx.config.shutdown_grace;
    let handles = running
        .services
        .iter_mut()
        .rev()
        .chain(running.application.iter_mut());
    for handle in handles {
        let name = handle.name().to_string();
        match handle.terminate(grace).await {
            Some(code) => log_info!(ctx.log, LOG_TAG, "{name} exited with code {code}"),
            None => log_info!(ctx.log, LOG_TAG, "{name} stopped"),
        }
    }
}

/// The whole lifecycle: start, idle until `shutdown`, stop.
pub async fn run<F>(ctx: &Context<'_>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut running = start(ctx).await?;
    idle(ctx, &mut running, shutdown).await;
    stop(ctx, &mut running).await;
    Ok(())
}
