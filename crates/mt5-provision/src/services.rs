//! Auxiliary control-plane processes (RPC bridge, HTTP trading API).

use mt5_common::{log_error, log_info, log_running};

use crate::context::Context;
use crate::process::Supervised;

const LOG_TAG: &str = "services";

/// Start every configured service in order. A service that fails to spawn
/// is logged and skipped; the rest still start.
pub fn start_services(ctx: &Context<'_>) -> Vec<Box<dyn Supervised>> {
    let mut handles = Vec::with_capacity(ctx.config.services.len());

    for service in &ctx.config.services {
        log_running!(
            ctx.log,
            LOG_TAG,
            "Starting {}: {}",
            service.name,
            service.command
        );
        match ctx.runner.spawn(&service.name, &service.command) {
            Ok(handle) => {
                match handle.id() {
                    Some(pid) => log_info!(ctx.log, LOG_TAG, "{} started (pid {pid})", service.name),
                    None => log_info!(ctx.log, LOG_TAG, "{} started", service.name),
                }
                handles.push(handle);
            }
            Err(e) => {
                log_error!(ctx.log, LOG_TAG, "Failed to start {}: {e}", service.name);
            }
        }
    }

    handles
}
