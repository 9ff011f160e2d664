/// Canonical file paths for QOL-Scripts data files on Windows.
///
/// Both files live under %APPDATA%\QOL-Scripts\:
///   - config.toml  Edited by the user (or a settings UI), read by the daemon.
///   - status.toml  Written by the daemon, read by the tray.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "QOL-Scripts";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application data directory: %APPDATA%\QOL-Scripts\
///
/// Falls back to the directory of the running executable when APPDATA is unset
/// (non-Windows development machines).
pub fn app_data_dir() -> PathBuf {
    match std::env::var_os("APPDATA") {
        Some(appdata) => PathBuf::from(appdata).join(APP_DIR_NAME),
        None => std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_default()
            .join(APP_DIR_NAME),
    }
}

/// Returns the full path to the config file: %APPDATA%\QOL-Scripts\config.toml
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: %APPDATA%\QOL-Scripts\status.toml
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

/// Candidate lock file locations, in the order they are probed.
///
/// The client normally writes its lock file next to the install; the
/// %LOCALAPPDATA% location is checked first because it survives custom
/// install directories.
pub fn lockfile_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        candidates.push(
            PathBuf::from(local)
                .join("Riot Games")
                .join("League of Legends")
                .join("lockfile"),
        );
    }
    candidates.push(PathBuf::from(r"C:\Riot Games\League of Legends\lockfile"));
    candidates
}
