//! Cross-platform control socket and configuration paths
//!
//! Unix/macOS: Unix domain sockets at $XDG_RUNTIME_DIR or /tmp
//! Windows: named pipes, `gdbmi-<username>-<pid>`

use std::io;
use std::path::{Path, PathBuf};

/// Name used for directories and pipes
const APP_NAME: &str = "gdbmi";

/// Directory holding the control sockets of running sessions
///
/// - Unix: `$XDG_RUNTIME_DIR/gdbmi` or `/tmp/gdbmi-<uid>`
#[cfg(unix)]
pub fn runtime_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_NAME);
    }

    // Fallback to /tmp with uid for isolation between users
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
}

#[cfg(windows)]
pub fn runtime_dir() -> PathBuf {
    PathBuf::new()
}

/// Default control socket for the session running in this process
#[cfg(unix)]
pub fn control_socket_path() -> PathBuf {
    runtime_dir().join(format!("control-{}.sock", std::process::id()))
}

#[cfg(windows)]
pub fn control_socket_path() -> PathBuf {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
    PathBuf::from(format!("{}-{}-{}", APP_NAME, username, std::process::id()))
}

/// Ensure the directory of a socket exists with owner-only permissions
#[cfg(unix)]
pub fn ensure_socket_dir(socket: &Path) -> io::Result<()> {
    let dir = socket
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid socket path"))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(windows)]
pub fn ensure_socket_dir(_socket: &Path) -> io::Result<()> {
    // Named pipes don't need a directory on Windows
    Ok(())
}

/// Remove a stale socket file
#[cfg(unix)]
pub fn remove_socket(socket: &Path) -> io::Result<()> {
    match std::fs::remove_file(socket) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(windows)]
pub fn remove_socket(_socket: &Path) -> io::Result<()> {
    // Named pipes are automatically cleaned up on Windows
    Ok(())
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/gdbmi/`
/// - macOS: `~/Library/Application Support/gdbmi/`
/// - Windows: `%APPDATA%\gdbmi\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_socket_path_is_per_process() {
        let path = control_socket_path();
        assert!(path
            .to_string_lossy()
            .contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_socket_dir_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("nested").join("control.sock");
        ensure_socket_dir(&socket).unwrap();

        let mode = std::fs::metadata(tmp.path().join("nested"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
        remove_socket(&socket).unwrap();
    }
}
