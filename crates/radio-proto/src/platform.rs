use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol::Platform;

const APP_DIR: &str = "radionline";

/// Configured platform choice.  `Auto` resolves once at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformPreference {
    #[default]
    Auto,
    Web,
    Native,
}

/// Decide which playback backend this process uses.
///
/// `Auto` picks the native media player when its binary can be found and
/// falls back to the in-process element otherwise.
pub fn detect_platform(preference: PlatformPreference) -> Platform {
    match preference {
        PlatformPreference::Web => Platform::Web,
        PlatformPreference::Native => Platform::Native,
        PlatformPreference::Auto => match find_mpv_binary() {
            Some(path) => {
                tracing::debug!("platform: using mpv at {:?}", path);
                Platform::Native
            }
            None => {
                tracing::debug!("platform: mpv not found, using the in-process element");
                Platform::Web
            }
        },
    }
}

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!(
        "{}/radionline-mpv-{}.sock",
        std::env::temp_dir().display(),
        std::process::id()
    )
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    format!("radionline-mpv-{}", std::process::id())
}

#[cfg(unix)]
pub fn mpv_socket_arg(socket_name: &str) -> String {
    format!("--input-ipc-server={}", socket_name)
}

#[cfg(windows)]
pub fn mpv_socket_arg(socket_name: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", socket_name)
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/<app> on macOS too, for consistency with Linux
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary: `MPV_PATH` override, beside the executable, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe_name))
        .find(|p| p.exists())
}
