//! MetaTrader 5 terminal: install if missing, then launch.
//!
//! State flow recorded in the ledger:
//! `NOT_INSTALLED → INSTALLER_CACHED → INSTALLING → INSTALLED → RUNNING`,
//! with `FAILED` when the terminal binary is still missing after the
//! installer ran.

use mt5_common::{log_error, log_info, log_running, log_warn};

use crate::config::CompatFlag;
use crate::context::Context;
use crate::install;
use crate::ledger::{ComponentState, InstallLedger};
use crate::process::Supervised;

/// Write the Windows-version flag into the Wine registry.
async fn set_compat_flag(ctx: &Context<'_>) {
    let app = &ctx.config.application;
    let tag = app.component.name.as_str();
    log_info!(ctx.log, tag, "Setting Windows 10 compatibility mode");
    match ctx.runner.run(&app.compat_flag).await {
        Ok(Some(0)) => {}
        Ok(code) => log_warn!(
            ctx.log,
            tag,
            "Compatibility flag command exited with {code:?}"
        ),
        Err(e) => log_warn!(ctx.log, tag, "Compatibility flag command failed: {e}"),
    }
}

/// Install the terminal if its binary is missing.
///
/// With [`CompatFlag::Always`] the compatibility flag is written even when
/// the terminal is already installed, and a `WARN` line says so.
pub async fn install_application(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
) -> ComponentState {
    let component = &ctx.config.application.component;
    let installed = install::check(ctx, ledger, component);

    match (installed, ctx.config.compat_flag) {
        (false, _) => set_compat_flag(ctx).await,
        (true, CompatFlag::Always) => {
            log_warn!(
                ctx.log,
                component.name.as_str(),
                "{} is installed but the compatibility flag is still written on every start (compat_flag=always)",
                component.name
            );
            set_compat_flag(ctx).await;
        }
        (true, CompatFlag::NotInstalled) => {}
    }

    if installed {
        return ComponentState::Installed;
    }
    install::install(ctx, ledger, component).await
}

/// Launch the terminal as a supervised background process.
///
/// A missing binary or a spawn failure is logged at `ERROR` and yields
/// `None`; it never aborts the caller.
pub fn launch_application(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
) -> Option<Box<dyn Supervised>> {
    let app = &ctx.config.application;
    let name = app.component.name.as_str();

    if !app.component.marker.exists() {
        log_error!(
            ctx.log,
            name,
            "{} not found, cannot launch {name}",
            app.component.marker.display()
        );
        return None;
    }

    log_running!(ctx.log, name, "Launching {name}: {}", app.launch);
    match ctx.runner.spawn(name, &app.launch) {
        Ok(handle) => {
            match handle.id() {
                Some(pid) => log_info!(ctx.log, name, "{name} started (pid {pid})"),
                None => log_info!(ctx.log, name, "{name} started"),
            }
            install::record(ctx, ledger, name, ComponentState::Running, None);
            Some(handle)
        }
        Err(e) => {
            log_error!(ctx.log, name, "Failed to launch {name}: {e}");
            install::record(
                ctx,
                ledger,
                name,
                ComponentState::Installed,
                Some(format!("launch failed: {e}")),
            );
            None
        }
    }
}

/// Install (if needed) and launch. A failed install is not launched, and
/// the failure has already been logged once by the installer.
pub async fn provision_application(
    ctx: &Context<'_>,
    ledger: &mut InstallLedger,
) -> Option<Box<dyn Supervised>> {
    match install_application(ctx, ledger).await {
        ComponentState::Installed => launch_application(ctx, ledger),
        _ => None,
    }
}
