//! Install gate shared by the dependency installer and the application
//! installer: marker + ledger check, cached download, unattended install,
//! marker re-check.

use std::path::{Path, PathBuf};

use mt5_common::{log_error, log_info, log_running, log_warn};

use crate::config::{Artifact, ComponentSpec};
use crate::context::Context;
use crate::error::FetchError;
use crate::ledger::{ComponentState, InstallLedger};
use crate::ownership;

/// Outcome of checking a component before installing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Installed,
    /// The marker exists but the last recorded state is `INSTALLING`: a
    /// previous run died mid-install, so the marker cannot be trusted.
    Interrupted,
    Missing,
}

pub fn gate(marker_present: bool, recorded: Option<ComponentState>) -> Gate {
    match (marker_present, recorded) {
        (true, Some(ComponentState::Installing)) => Gate::Interrupted,
        (true, _) => Gate::Installed,
        (false, _) => Gate::Missing,
    }
}

/// Give a file written into the volume (and any directory created for it)
/// to the volume owner.
fn hand_over(ctx: &Context<'_>, tag: &str, path: &Path) {
    if let Err(e) = ownership::adopt(path, &ctx.config.volume_dir, ctx.config.owner) {
        log_warn!(ctx.log, tag, "Could not hand over {}: {e}", path.display());
    }
}

/// Update the ledger; a failed write is logged and otherwise ignored.
pub fn record(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
    name: &str,
    state: ComponentState,
    error: Option<String>,
) {
    match ledger.set(name, state, error) {
        Ok(()) => hand_over(ctx, name, ledger.path()),
        Err(e) => log_warn!(
            ctx.log,
            name,
            "Could not persist {state} to {}: {e}",
            ledger.path().display()
        ),
    }
}

/// Returns `true` when the component is installed and can be skipped.
pub fn check(ctx: &Context<'_>, ledger: &mut InstallLedger, component: &ComponentSpec) -> bool {
    let name = component.name.as_str();
    let recorded = ledger.state(name);
    log_running!(
        ctx.log,
        name,
        "Checking {name} ({})",
        component.marker.display()
    );

    match gate(component.marker.exists(), recorded) {
        Gate::Installed => {
            log_info!(ctx.log, name, "{name} is already installed");
            if recorded != Some(ComponentState::Installed) {
                record(ctx, ledger, name, ComponentState::Installed, None);
            }
            true
        }
        Gate::Interrupted => {
            log_warn!(
                ctx.log,
                name,
                "{} exists but the previous install of {name} never finished, reinstalling",
                component.marker.display()
            );
            false
        }
        Gate::Missing => {
            log_info!(ctx.log, name, "{name} is not installed");
            if recorded.is_none() {
                record(ctx, ledger, name, ComponentState::NotInstalled, None);
            }
            false
        }
    }
}

/// Return the cached installer, downloading it first if it is absent.
///
/// A file at the cache path is trusted as-is.
pub async fn ensure_artifact(
    ctx: &Context<'_>,
    tag: &str,
    artifact: &Artifact,
) -> Result<PathBuf, FetchError> {
    if artifact.cache.exists() {
        log_info!(
            ctx.log,
            tag,
            "Using cached installer {}",
            artifact.cache.display()
        );
        return Ok(artifact.cache.clone());
    }

    log_running!(
        ctx.log,
        tag,
        "Downloading {} to {}",
        artifact.url,
        artifact.cache.display()
    );
    let bytes = ctx.fetcher.fetch(&artifact.url, &artifact.cache).await?;
    hand_over(ctx, tag, &artifact.cache);
    log_info!(ctx.log, tag, "Downloaded {bytes} bytes");
    Ok(artifact.cache.clone())
}

/// Download (if needed), run the unattended installer and re-check the
/// marker. Never fails: problems end up on the log and in the ledger.
pub async fn install(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
    component: &ComponentSpec,
) -> ComponentState {
    let name = component.name.as_str();

    let artifact = match &component.artifact {
        Some(artifact) => match ensure_artifact(ctx, name, artifact).await {
            Ok(path) => {
                record(ctx, ledger, name, ComponentState::InstallerCached, None);
                Some(path)
            }
            Err(e) => {
                let msg = format!("download of {} failed: {e}", artifact.url);
                log_error!(ctx.log, name, "{name} installation failed: {msg}");
                record(ctx, ledger, name, ComponentState::Failed, Some(msg));
                return ComponentState::Failed;
            }
        },
        None => None,
    };

    record(ctx, ledger, name, ComponentState::Installing, None);
    let cmd = component.install.render(artifact.as_deref());
    log_running!(ctx.log, name, "Installing {name}: {cmd}");

    match ctx.runner.run(&cmd).await {
        Ok(Some(code)) => log_info!(ctx.log, name, "{name} installer exited with code {code}"),
        Ok(None) => log_info!(ctx.log, name, "{name} installer was terminated by a signal"),
        Err(e) => log_warn!(ctx.log, name, "{name} installer could not be started: {e}"),
    }

    if component.marker.exists() {
        log_info!(ctx.log, name, "{name} installed successfully");
        record(ctx, ledger, name, ComponentState::Installed, None);
        ComponentState::Installed
    } else {
        let msg = format!("{} not found after install", component.marker.display());
        log_error!(ctx.log, name, "{name} installation failed: {msg}");
        record(ctx, ledger, name, ComponentState::Failed, Some(msg));
        ComponentState::Failed
    }
}

/// Full gate → artifact → install → re-check cycle for one component.
pub async fn ensure_component(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
    component: &ComponentSpec,
) -> ComponentState {
    if check(ctx, ledger, component) {
        return ComponentState::Installed;
    }
    install(ctx, ledger, component).await
}
