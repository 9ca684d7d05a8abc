//! Shared pieces of the MetaTrader 5 container provisioning tools.

pub mod log;

pub use log::{Level, Logger};
