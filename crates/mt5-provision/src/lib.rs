//! Provisioning supervisor for the MetaTrader 5 Wine container.
//!
//! Every container start re-runs the same idempotent sequence: normalize
//! volume ownership, install missing runtime dependencies, install and
//! launch the terminal, start the auxiliary services, then idle.

pub mod app;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod install;
pub mod ledger;
pub mod ownership;
pub mod paths;
pub mod prerequisites;
pub mod process;
pub mod services;
pub mod supervisor;

pub use command::{CommandRunner, CommandSpec, SystemRunner};
pub use config::{ConfigArgs, ProvisionConfig};
pub use context::Context;
pub use error::{ProvisionError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use ledger::{ComponentState, InstallLedger};
pub use process::Supervised;
