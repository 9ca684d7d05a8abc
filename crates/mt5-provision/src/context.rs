use mt5_common::Logger;

use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::fetch::Fetcher;

/// Everything a step needs, borrowed for the duration of the sequence.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a ProvisionConfig,
    pub log: &'a Logger,
    pub runner: &'a dyn CommandRunner,
    pub fetcher: &'a dyn Fetcher,
}
