//! Install ledger: per-component install state persisted in the volume.
//!
//! Marker files alone cannot tell a finished install from one that was
//! interrupted half way. The ledger records the last state the supervisor
//! reached for each component, so a marker that appeared while the ledger
//! still says `INSTALLING` is treated as suspect.
//!
//! The file is rewritten atomically (temp file + rename) on every update.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    NotInstalled,
    InstallerCached,
    Installing,
    Installed,
    Failed,
    Running,
}

impl ComponentState {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentState::NotInstalled => "NOT_INSTALLED",
            ComponentState::InstallerCached => "INSTALLER_CACHED",
            ComponentState::Installing => "INSTALLING",
            ComponentState::Installed => "INSTALLED",
            ComponentState::Failed => "FAILED",
            ComponentState::Running => "RUNNING",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LedgerData {
    #[serde(default)]
    pub components: BTreeMap<String, ComponentRecord>,
}

pub struct InstallLedger {
    path: PathBuf,
    data: LedgerData,
}

impl InstallLedger {
    /// An empty ledger that will be written to `path` on the first update.
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            data: LedgerData::default(),
        }
    }

    /// Load the ledger from `path`. A missing file yields an empty ledger.
    pub fn load(path: PathBuf) -> Result<Self, LedgerError> {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(e) => return Err(e.into()),
        };
        let data = serde_json::from_str(&content)?;
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &LedgerData {
        &self.data
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRecord> {
        self.data.components.get(name)
    }

    pub fn state(&self, name: &str) -> Option<ComponentState> {
        self.get(name).map(|r| r.state)
    }

    /// Record a new state for `name` and persist the whole ledger.
    ///
    /// The in-memory record is updated even when persisting fails.
    pub fn set(
        &mut self,
        name: &str,
        state: ComponentState,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        self.data.components.insert(
            name.to_string(),
            ComponentRecord {
                state,
                error,
                updated_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        self.save()
    }

    fn save(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
