//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::gdb::Timeouts;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// GDB executable and remote target
    #[serde(default)]
    pub gdb: GdbConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,

    /// Out-of-band control channel
    #[serde(default)]
    pub control: ControlConfig,
}

/// GDB executable configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GdbConfig {
    /// Path or bare name of the GDB executable
    #[serde(default = "default_gdb_path")]
    pub path: PathBuf,

    /// Additional arguments passed after the MI flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Remote target for `target-select remote`
    #[serde(default = "default_target")]
    pub target: String,
}

impl Default for GdbConfig {
    fn default() -> Self {
        Self {
            path: default_gdb_path(),
            args: Vec::new(),
            target: default_target(),
        }
    }
}

fn default_gdb_path() -> PathBuf {
    PathBuf::from("gdb")
}

fn default_target() -> String {
    "localhost:3333".to_string()
}

impl GdbConfig {
    /// Resolve the configured executable, searching PATH for bare names
    pub fn resolve_path(&self) -> Result<PathBuf> {
        resolve_executable(&self.path)
    }
}

/// Find an executable, searching PATH when only a name is given
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    if path.components().count() > 1 {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::gdb_not_found(
            &path.display().to_string(),
            &[path.display().to_string()],
        ));
    }

    which::which(path).map_err(|_| {
        let searched: Vec<String> = std::env::var_os("PATH")
            .map(|p| {
                std::env::split_paths(&p)
                    .map(|d| d.display().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Error::gdb_not_found(&path.display().to_string(), &searched)
    })
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TimeoutConfig {
    /// Wait for GDB to report a stop or resume
    #[serde(default = "default_state_wait")]
    pub state_wait_ms: u64,

    /// Grace period after interrupt/continue results
    #[serde(default = "default_command_grace")]
    pub command_grace_ms: u64,

    /// Wait for `gdb-exit` before killing GDB
    #[serde(default = "default_kill")]
    pub kill_ms: u64,

    /// Wait for `target-detach` before killing GDB
    #[serde(default = "default_detach")]
    pub detach_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            state_wait_ms: default_state_wait(),
            command_grace_ms: default_command_grace(),
            kill_ms: default_kill(),
            detach_ms: default_detach(),
        }
    }
}

fn default_state_wait() -> u64 {
    6000
}
fn default_command_grace() -> u64 {
    4000
}
fn default_kill() -> u64 {
    4000
}
fn default_detach() -> u64 {
    3000
}

impl TimeoutConfig {
    /// Timeouts used by the GDB controller
    pub fn controller(&self) -> Timeouts {
        Timeouts {
            state_wait: Duration::from_millis(self.state_wait_ms),
            command_grace: Duration::from_millis(self.command_grace_ms),
        }
    }

    pub fn kill(&self) -> Duration {
        Duration::from_millis(self.kill_ms)
    }

    pub fn detach(&self) -> Duration {
        Duration::from_millis(self.detach_ms)
    }
}

/// Session behaviour
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SessionConfig {
    /// Resume the target once the client finished configuring
    #[serde(default = "default_true")]
    pub auto_continue: bool,

    /// Download the program to the target after connecting
    #[serde(default = "default_true")]
    pub load_on_launch: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_continue: true,
            load_on_launch: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Control channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Listen for control requests while a session runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Socket path; defaults to the per-user runtime directory
    #[serde(default)]
    pub socket: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}

/// Everything needed to start one debug session
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Program being debugged
    pub executable: PathBuf,
    /// Resolved GDB executable
    pub gdb: PathBuf,
    pub gdb_args: Vec<String>,
    pub target: String,
    pub load: bool,
    pub auto_continue: bool,
    pub timeouts: TimeoutConfig,
}

impl LaunchConfig {
    /// Combine the file configuration with a program to debug
    pub fn new(config: &Config, executable: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            executable: executable.into(),
            gdb: config.gdb.resolve_path()?,
            gdb_args: config.gdb.args.clone(),
            target: config.gdb.target.clone(),
            load: config.session.load_on_launch,
            auto_continue: config.session.auto_continue,
            timeouts: config.timeouts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gdb.target, "localhost:3333");
        assert_eq!(config.timeouts.state_wait_ms, 6000);
        assert_eq!(config.timeouts.kill(), Duration::from_secs(4));
        assert_eq!(config.timeouts.detach(), Duration::from_secs(3));
        assert!(config.session.auto_continue);
        assert!(config.control.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gdb]\ntarget = \"10.0.0.2:3333\"\nargs = [\"-nx\"]\n\n[timeouts]\nstate_wait_ms = 100\n\n[session]\nload_on_launch = false"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.gdb.target, "10.0.0.2:3333");
        assert_eq!(config.gdb.args, vec!["-nx"]);
        assert_eq!(config.gdb.path, PathBuf::from("gdb"));
        assert_eq!(config.timeouts.state_wait_ms, 100);
        assert_eq!(config.timeouts.command_grace_ms, 4000);
        assert!(!config.session.load_on_launch);
        assert!(config.session.auto_continue);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gdb\npath = ").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_gdb_is_reported() {
        let err = resolve_executable(Path::new("/definitely/not/here/gdb")).unwrap_err();
        assert!(matches!(err, Error::GdbNotFound { .. }));
    }
}
