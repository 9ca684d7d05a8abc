//! In-memory process and network boundaries for driving the startup
//! sequence against a temporary volume.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use mt5_common::Logger;
use mt5_provision::command::{CommandError, CommandRunner, CommandSpec};
use mt5_provision::config::{ConfigArgs, ProvisionConfig};
use mt5_provision::error::FetchError;
use mt5_provision::fetch::Fetcher;
use mt5_provision::{Context, InstallLedger, Supervised};
use tempfile::TempDir;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

pub struct FakeProcess {
    name: String,
    alive: Arc<AtomicBool>,
    journal: Journal,
}

impl FakeProcess {
    pub fn new(name: &str, alive: bool, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            alive: Arc::new(AtomicBool::new(alive)),
            journal,
        }
    }
}

#[async_trait]
impl Supervised for FakeProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<u32> {
        self.alive.load(Ordering::SeqCst).then_some(4242)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self, _grace: Duration) -> Option<i32> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("terminate {}", self.name));
        self.alive.store(false, Ordering::SeqCst);
        Some(0)
    }
}

/// Records every command and creates `marker` when a run command
/// contains `needle`, standing in for a successful installer.
pub struct FakeRunner {
    pub journal: Journal,
    pub effects: Vec<(String, PathBuf)>,
    pub failing_spawns: HashSet<String>,
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<Option<i32>, CommandError> {
        let line = cmd.to_string();
        self.journal.lock().unwrap().push(format!("run {line}"));
        for (needle, marker) in &self.effects {
            if line.contains(needle.as_str()) {
                touch(marker);
            }
        }
        Ok(Some(0))
    }

    fn spawn(&self, name: &str, cmd: &CommandSpec) -> Result<Box<dyn Supervised>, CommandError> {
        self.journal.lock().unwrap().push(format!("spawn {name}"));
        if self.failing_spawns.contains(name) {
            return Err(CommandError {
                command: cmd.to_string(),
                detail: "No such file or directory (os error 2)".to_string(),
            });
        }
        Ok(Box::new(FakeProcess::new(name, true, self.journal.clone())))
    }
}

pub struct FakeFetcher {
    pub journal: Journal,
    pub failing: HashSet<String>,
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        self.journal.lock().unwrap().push(format!("fetch {url}"));
        if self.failing.contains(url) {
            return Err(FetchError::Http(format!("{url}: status code 503")));
        }
        touch(dest);
        std::fs::write(dest, b"installer")?;
        Ok(9)
    }
}

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    args: ConfigArgs,
}

pub fn test_config(root: &Path) -> ProvisionConfig {
    let owner = format!(
        "{}:{}",
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw()
    );
    let volume = root.join("config");
    let prefix = volume.join(".wine");
    let log_file = root.join("mt5_setup.log");
    TestCli::parse_from([
        "test",
        "--owner",
        owner.as_str(),
        "--volume-dir",
        volume.to_str().unwrap(),
        "--wine-prefix",
        prefix.to_str().unwrap(),
        "--wine-bin",
        "wine",
        "--log-file",
        log_file.to_str().unwrap(),
        "--compat-flag",
        "always",
        "--shutdown-grace-secs",
        "1",
    ])
    .args
    .load()
    .unwrap()
}

pub struct Harness {
    _dir: TempDir,
    pub config: ProvisionConfig,
    pub log: Logger,
    pub runner: FakeRunner,
    pub fetcher: FakeFetcher,
    journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let log = Logger::open(&config.log_file).unwrap().echo_stdout(false);
        let journal: Journal = Arc::default();

        let deps = &config.dependencies;
        let effects = vec![
            ("msiexec".to_string(), deps[0].marker.clone()),
            ("/quiet".to_string(), deps[1].marker.clone()),
            ("pip install".to_string(), deps[2].marker.clone()),
            (
                "/auto".to_string(),
                config.application.component.marker.clone(),
            ),
        ];

        Self {
            runner: FakeRunner {
                journal: journal.clone(),
                effects,
                failing_spawns: HashSet::new(),
            },
            fetcher: FakeFetcher {
                journal: journal.clone(),
                failing: HashSet::new(),
            },
            config,
            log,
            journal,
            _dir: dir,
        }
    }

    pub fn ctx(&self) -> Context<'_> {
        Context {
            config: &self.config,
            log: &self.log,
            runner: &self.runner,
            fetcher: &self.fetcher,
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    pub fn shared_journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn log_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.config.log_file)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn lines_at(&self, level: &str) -> Vec<String> {
        let tag = format!("[{level}]");
        self.log_lines()
            .into_iter()
            .filter(|l| l.contains(&tag))
            .collect()
    }

    pub fn ledger(&self) -> InstallLedger {
        InstallLedger::load(self.config.ledger_file.clone()).unwrap()
    }

    /// Every marker present, as after a completed first boot.
    pub fn install_everything(&self) {
        for dep in &self.config.dependencies {
            touch(&dep.marker);
        }
        touch(&self.config.application.component.marker);
    }

    pub fn cache_of(&self, index: usize) -> PathBuf {
        self.config.dependencies[index]
            .artifact
            .as_ref()
            .unwrap()
            .cache
            .clone()
    }

    pub fn app_cache(&self) -> PathBuf {
        self.config
            .application
            .component
            .artifact
            .as_ref()
            .unwrap()
            .cache
            .clone()
    }
}
