//! Provisioning configuration.
//!
//! Built once at process start from CLI flags / environment variables (and
//! an optional YAML override file), then passed by reference to every step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::command::{ARTIFACT_PLACEHOLDER, CommandSpec};
use crate::error::{ProvisionError, Result};
use crate::paths::{self, WinePaths};

pub const MT5_INSTALLER_URL: &str =
    "https://download.mql5.com/cdn/web/metaquotes.software.corp/mt5/mt5setup.exe";
pub const MONO_URL: &str = "https://dl.winehq.org/wine/wine-mono/8.0.0/wine-mono-8.0.0-x86.msi";
pub const PYTHON_URL: &str = "https://www.python.org/ftp/python/3.9.13/python-3.9.13-amd64.exe";

/// Name of the application component in the ledger and in log lines.
pub const APPLICATION: &str = "mt5";

/// Target identity for the ownership normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// Parse `user[:group]`, where either side may be a name or a numeric id.
    /// Without a group the user's primary group is used.
    pub fn parse(spec: &str) -> Result<Self> {
        let (user, group) = match spec.split_once(':') {
            Some((u, g)) => (u, Some(g)),
            None => (spec, None),
        };

        let (uid, primary_gid) = resolve_user(user)?;
        let gid = match group {
            Some(g) => resolve_group(g)?,
            None => primary_gid.ok_or_else(|| {
                ProvisionError::Config(format!("owner '{spec}': numeric user needs a group"))
            })?,
        };
        Ok(Self { uid, gid })
    }
}

fn resolve_user(user: &str) -> Result<(u32, Option<u32>)> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok((uid, None));
    }
    match nix::unistd::User::from_name(user) {
        Ok(Some(u)) => Ok((u.uid.as_raw(), Some(u.gid.as_raw()))),
        Ok(None) => Err(ProvisionError::Config(format!("unknown user '{user}'"))),
        Err(e) => Err(ProvisionError::Config(format!("lookup user '{user}': {e}"))),
    }
}

fn resolve_group(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    match nix::unistd::Group::from_name(group) {
        Ok(Some(g)) => Ok(g.gid.as_raw()),
        Ok(None) => Err(ProvisionError::Config(format!("unknown group '{group}'"))),
        Err(e) => Err(ProvisionError::Config(format!("lookup group '{group}': {e}"))),
    }
}

/// When the Windows-version compatibility flag is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CompatFlag {
    /// On every start, whether or not the terminal is installed.
    Always,
    /// Only on the install branch.
    NotInstalled,
}

/// Installer download: fixed URL, fixed cache path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    pub cache: PathBuf,
}

/// Something installed once and detected afterwards by its marker path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub marker: PathBuf,
    #[serde(default)]
    pub artifact: Option<Artifact>,
    /// Unattended install command. `{artifact}` expands to the cache path.
    pub install: CommandSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSpec {
    pub component: ComponentSpec,
    pub launch: CommandSpec,
    pub compat_flag: CommandSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub command: CommandSpec,
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub volume_dir: PathBuf,
    pub owner: Owner,
    pub wine_prefix: PathBuf,
    pub wine_bin: String,
    pub log_file: PathBuf,
    pub ledger_file: PathBuf,
    pub dependencies: Vec<ComponentSpec>,
    pub application: ApplicationSpec,
    pub services: Vec<ServiceSpec>,
    pub compat_flag: CompatFlag,
    pub watch_interval: Duration,
    pub shutdown_grace: Duration,
}

impl ProvisionConfig {
    /// Environment every external command inherits.
    pub fn command_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "WINEPREFIX".to_string(),
            self.wine_prefix.to_string_lossy().into_owned(),
        );
        env.insert("WINEDEBUG".to_string(), "-all".to_string());
        env
    }
}

/// Flags and environment variables understood by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Persistent volume (chowned on start, holds the Wine prefix)
    #[arg(long, env = "MT5_VOLUME_DIR", default_value = "/config")]
    pub volume_dir: PathBuf,

    /// Runtime identity as user:group (names or numeric ids)
    #[arg(long, env = "MT5_OWNER", default_value = "abc:abc")]
    pub owner: String,

    /// Wine prefix (defaults to <volume-dir>/.wine)
    #[arg(long, env = "WINEPREFIX")]
    pub wine_prefix: Option<PathBuf>,

    /// Wine executable
    #[arg(long, env = "MT5_WINE_BIN", default_value = "wine")]
    pub wine_bin: String,

    /// Status log file
    #[arg(long, env = "MT5_LOG_FILE", default_value = "/var/log/mt5_setup.log")]
    pub log_file: PathBuf,

    /// MetaTrader 5 installer URL
    #[arg(long, env = "MT5_INSTALLER_URL", default_value = MT5_INSTALLER_URL)]
    pub installer_url: String,

    /// When to write the Windows 10 compatibility flag
    #[arg(long, env = "MT5_COMPAT_FLAG", value_enum, default_value_t = CompatFlag::Always)]
    pub compat_flag: CompatFlag,

    /// Port of the HTTP trading API service
    #[arg(long, env = "MT5_API_PORT", default_value_t = 5001)]
    pub api_port: u16,

    /// Port of the mt5linux RPC bridge
    #[arg(long, env = "MT5_BRIDGE_PORT", default_value_t = 8001)]
    pub bridge_port: u16,

    /// HTTP trading API entry point
    #[arg(long, env = "MT5_API_SCRIPT", default_value = "/app/app.py")]
    pub api_script: PathBuf,

    /// Seconds between liveness checks while idle
    #[arg(long, env = "MT5_WATCH_INTERVAL_SECS", default_value_t = 30)]
    pub watch_interval_secs: u64,

    /// Seconds a process gets between SIGTERM and SIGKILL on shutdown
    #[arg(long, env = "MT5_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// YAML file overriding dependencies, services and flags
    #[arg(long, env = "MT5_PROVISION_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Optional YAML override file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    dependencies: Option<Vec<ComponentSpec>>,
    services: Option<Vec<ServiceSpec>>,
    compat_flag: Option<CompatFlag>,
    installer_url: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<ProvisionConfig> {
        let owner = Owner::parse(&self.owner)?;
        let mut config = self.defaults(owner);

        if let Some(path) = &self.config {
            apply_file(&mut config, &read_config_file(path)?);
        }

        Ok(config)
    }

    fn defaults(&self, owner: Owner) -> ProvisionConfig {
        let wine_prefix = self
            .wine_prefix
            .clone()
            .unwrap_or_else(|| self.volume_dir.join(".wine"));
        let wine = WinePaths::new(wine_prefix.clone());
        let wine_bin = self.wine_bin.as_str();

        ProvisionConfig {
            volume_dir: self.volume_dir.clone(),
            owner,
            ledger_file: paths::ledger_file(&self.volume_dir),
            dependencies: default_dependencies(&wine, wine_bin),
            application: default_application(&wine, wine_bin, &self.installer_url),
            services: default_services(self, wine_bin),
            wine_prefix,
            wine_bin: self.wine_bin.clone(),
            log_file: self.log_file.clone(),
            compat_flag: self.compat_flag,
            watch_interval: Duration::from_secs(self.watch_interval_secs.max(1)),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ProvisionError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| ProvisionError::Config(format!("parse {}: {e}", path.display())))
}

fn apply_file(config: &mut ProvisionConfig, file: &ConfigFile) {
    if let Some(deps) = &file.dependencies {
        config.dependencies = deps.clone();
    }
    if let Some(services) = &file.services {
        config.services = services.clone();
    }
    if let Some(flag) = file.compat_flag {
        config.compat_flag = flag;
    }
    if let Some(url) = &file.installer_url
        && let Some(artifact) = config.application.component.artifact.as_mut()
    {
        artifact.url = url.clone();
    }
}

fn default_dependencies(wine: &WinePaths, wine_bin: &str) -> Vec<ComponentSpec> {
    vec![
        ComponentSpec {
            name: "mono".into(),
            marker: wine.mono_dir(),
            artifact: Some(Artifact {
                url: MONO_URL.into(),
                cache: wine.cache("mono.msi"),
            }),
            install: CommandSpec::new(wine_bin, ["msiexec", "/i", ARTIFACT_PLACEHOLDER, "/qn"]),
        },
        ComponentSpec {
            name: "python".into(),
            marker: wine.python_exe(),
            artifact: Some(Artifact {
                url: PYTHON_URL.into(),
                cache: wine.cache("python-installer.exe"),
            }),
            install: CommandSpec::new(
                wine_bin,
                [
                    ARTIFACT_PLACEHOLDER,
                    "/quiet",
                    "InstallAllUsers=1",
                    "PrependPath=1",
                ],
            ),
        },
        ComponentSpec {
            name: "python-libs".into(),
            marker: wine.site_package("MetaTrader5"),
            artifact: None,
            install: CommandSpec::new(
                wine_bin,
                [
                    "python",
                    "-m",
                    "pip",
                    "install",
                    "--no-cache-dir",
                    "MetaTrader5",
                    "mt5linux",
                ],
            ),
        },
    ]
}

fn default_application(wine: &WinePaths, wine_bin: &str, installer_url: &str) -> ApplicationSpec {
    let terminal = wine.terminal();
    ApplicationSpec {
        component: ComponentSpec {
            name: APPLICATION.into(),
            marker: terminal.clone(),
            artifact: Some(Artifact {
                url: installer_url.into(),
                cache: wine.cache("mt5setup.exe"),
            }),
            install: CommandSpec::new(wine_bin, [ARTIFACT_PLACEHOLDER, "/auto"]),
        },
        launch: CommandSpec::new(wine_bin, [terminal.to_string_lossy().into_owned()]),
        compat_flag: CommandSpec::new(
            wine_bin,
            [
                "reg",
                "add",
                r"HKEY_CURRENT_USER\Software\Wine",
                "/v",
                "Version",
                "/t",
                "REG_SZ",
                "/d",
                "win10",
                "/f",
            ],
        ),
    }
}

fn default_services(args: &ConfigArgs, wine_bin: &str) -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: "mt5linux".into(),
            command: CommandSpec::new(
                "python3",
                [
                    "-m".to_string(),
                    "mt5linux".to_string(),
                    "--host".to_string(),
                    "0.0.0.0".to_string(),
                    "-p".to_string(),
                    args.bridge_port.to_string(),
                    "-w".to_string(),
                    wine_bin.to_string(),
                    "python.exe".to_string(),
                ],
            ),
        },
        ServiceSpec {
            name: "mt5-api".into(),
            command: CommandSpec::new(
                wine_bin,
                [
                    "python".to_string(),
                    args.api_script.to_string_lossy().into_owned(),
                ],
            )
            .with_env("MT5_API_PORT", args.api_port.to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ConfigArgs,
    }

    fn parse(extra: &[&str]) -> ConfigArgs {
        let mut argv = vec!["test", "--owner", "0:0", "--wine-prefix", "/config/.wine"];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).args
    }

    #[test]
    fn owner_numeric_pair() {
        assert_eq!(
            Owner::parse("911:1000").unwrap(),
            Owner {
                uid: 911,
                gid: 1000
            }
        );
    }

    #[test]
    fn owner_by_name_uses_primary_group() {
        assert_eq!(Owner::parse("root").unwrap(), Owner { uid: 0, gid: 0 });
        assert_eq!(Owner::parse("root:0").unwrap(), Owner { uid: 0, gid: 0 });
    }

    #[test]
    fn owner_unknown_names_are_config_errors() {
        assert!(matches!(
            Owner::parse("no-such-user-mt5:root"),
            Err(ProvisionError::Config(_))
        ));
        assert!(matches!(
            Owner::parse("0:no-such-group-mt5"),
            Err(ProvisionError::Config(_))
        ));
        assert!(matches!(Owner::parse("0"), Err(ProvisionError::Config(_))));
    }

    #[test]
    fn defaults_follow_the_volume_layout() {
        let config = parse(&[]).load().unwrap();

        assert_eq!(config.volume_dir, PathBuf::from("/config"));
        assert_eq!(
            config.ledger_file,
            PathBuf::from("/config/.provision/state.json")
        );
        assert_eq!(config.compat_flag, CompatFlag::Always);

        let names: Vec<&str> = config.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["mono", "python", "python-libs"]);

        let app = &config.application.component;
        assert_eq!(app.name, APPLICATION);
        assert_eq!(
            app.marker,
            PathBuf::from("/config/.wine/drive_c/Program Files/MetaTrader 5/terminal64.exe")
        );
        assert_eq!(
            app.artifact.as_ref().map(|a| a.url.as_str()),
            Some(MT5_INSTALLER_URL)
        );
        assert_eq!(
            config.application.launch.to_string(),
            "wine /config/.wine/drive_c/Program Files/MetaTrader 5/terminal64.exe"
        );

        let api = config.services.iter().find(|s| s.name == "mt5-api").unwrap();
        assert_eq!(
            api.command.env.get("MT5_API_PORT").map(String::as_str),
            Some("5001")
        );
        assert_eq!(
            config.command_env().get("WINEPREFIX").map(String::as_str),
            Some("/config/.wine")
        );
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--compat-flag",
            "not-installed",
            "--bridge-port",
            "18001",
            "--installer-url",
            "http://mirror.local/mt5setup.exe",
        ])
        .load()
        .unwrap();

        assert_eq!(config.compat_flag, CompatFlag::NotInstalled);
        let bridge = config.services.iter().find(|s| s.name == "mt5linux").unwrap();
        assert!(bridge.command.args.contains(&"18001".to_string()));
        assert_eq!(
            config
                .application
                .component
                .artifact
                .as_ref()
                .map(|a| a.url.as_str()),
            Some("http://mirror.local/mt5setup.exe")
        );
    }

    #[test]
    fn yaml_file_replaces_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.yaml");
        std::fs::write(
            &path,
            r#"
compat_flag: not-installed
installer_url: http://mirror.local/mt5.exe
dependencies:
  - name: vcredist
    marker: /config/.wine/drive_c/windows/system32/vcruntime140.dll
    artifact:
      url: http://mirror.local/vc_redist.x64.exe
      cache: /config/.wine/drive_c/vc_redist.exe
    install:
      program: wine
      args: ["{artifact}", "/quiet", "/norestart"]
services:
  - name: bridge
    command:
      program: python3
      args: ["-m", "mt5linux"]
"#,
        )
        .unwrap();

        let config = parse(&["--config", path.to_str().unwrap()]).load().unwrap();

        assert_eq!(config.compat_flag, CompatFlag::NotInstalled);
        assert_eq!(config.dependencies.len(), 1);
        assert_eq!(config.dependencies[0].name, "vcredist");
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].command.to_string(), "python3 -m mt5linux");
        assert_eq!(
            config
                .application
                .component
                .artifact
                .as_ref()
                .map(|a| a.url.as_str()),
            Some("http://mirror.local/mt5.exe")
        );
    }

    #[test]
    fn yaml_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.yaml");
        std::fs::write(&path, "restart_policy: always\n").unwrap();

        let err = parse(&["--config", path.to_str().unwrap()])
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
