use std::path::{Path, PathBuf};

/// Locations inside a Wine prefix (must match what the Windows installers
/// produce).
pub struct WinePaths {
    prefix: PathBuf,
}

impl WinePaths {
    pub fn new(prefix: PathBuf) -> Self {
        Self { prefix }
    }

    pub fn drive_c(&self) -> PathBuf {
        self.prefix.join("drive_c")
    }

    /// Downloaded installers are cached at the root of `C:\`.
    pub fn cache(&self, file_name: &str) -> PathBuf {
        self.drive_c().join(file_name)
    }

    pub fn mono_dir(&self) -> PathBuf {
        self.drive_c().join("windows").join("mono")
    }

    pub fn python_dir(&self) -> PathBuf {
        self.drive_c().join("Program Files").join("Python39")
    }

    pub fn python_exe(&self) -> PathBuf {
        self.python_dir().join("python.exe")
    }

    pub fn site_package(&self, package: &str) -> PathBuf {
        self.python_dir()
            .join("Lib")
            .join("site-packages")
            .join(package)
    }

    pub fn mt5_dir(&self) -> PathBuf {
        self.drive_c().join("Program Files").join("MetaTrader 5")
    }

    pub fn terminal(&self) -> PathBuf {
        self.mt5_dir().join("terminal64.exe")
    }
}

/// Location of the install ledger inside the persistent volume.
pub fn ledger_file(volume_dir: &Path) -> PathBuf {
    volume_dir.join(".provision").join("state.json")
}
