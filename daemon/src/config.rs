use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::event::DaemonEvent;

pub const DEFAULT_BRIGHTNESS_HIGH: u32 = 100;
pub const DEFAULT_BRIGHTNESS_LOW: u32 = 10;
pub const MAX_BRIGHTNESS: u32 = 100;

/// Settings shared between the config watcher (single writer) and the
/// connector handlers / dimming controller (readers).
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Root configuration structure. Deserialized from %APPDATA%\QOL-Scripts\config.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub auto_accept_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_pick_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_lock_enabled: bool,
    #[serde(default = "default_true")]
    pub dimming_enabled: bool,
    /// Dim every monitor except the one holding the focused game, instead of
    /// the fixed `dimmable_monitors` list.
    #[serde(default)]
    pub dim_all_except_focused: bool,
    /// Device names (e.g. `\\.\DISPLAY2`) of the monitors dimmed while a game
    /// has focus.
    #[serde(default)]
    pub dimmable_monitors: Vec<String>,
    #[serde(default)]
    pub monitor_brightness: BrightnessLevels,
    /// Window titles that count as "a game is focused".
    #[serde(default = "default_games")]
    pub games_to_dim: Vec<String>,
    /// Preferred champions keyed by assigned role.
    #[serde(default)]
    pub default_champions: BTreeMap<Role, RolePreference>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_accept_enabled: true,
            auto_pick_enabled: true,
            auto_lock_enabled: true,
            dimming_enabled: true,
            dim_all_except_focused: false,
            dimmable_monitors: Vec::new(),
            monitor_brightness: BrightnessLevels::default(),
            games_to_dim: default_games(),
            default_champions: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Returns the configured champions for `role`, or an empty preference.
    pub fn role_preference(&self, role: Role) -> RolePreference {
        self.default_champions.get(&role).copied().unwrap_or_default()
    }
}

/// Brightness percentages applied when a game gains (`low`) or loses (`high`) focus.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BrightnessLevels {
    #[serde(default = "default_high")]
    pub high: u32,
    #[serde(default = "default_low")]
    pub low: u32,
}

impl Default for BrightnessLevels {
    fn default() -> Self {
        Self {
            high: DEFAULT_BRIGHTNESS_HIGH,
            low: DEFAULT_BRIGHTNESS_LOW,
        }
    }
}

impl BrightnessLevels {
    /// Both levels clamped to the 0–100 range the monitors accept.
    pub fn clamped(self) -> Self {
        Self {
            high: self.high.min(MAX_BRIGHTNESS),
            low: self.low.min(MAX_BRIGHTNESS),
        }
    }
}

/// Assigned lane as reported by the champion-select roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Top,
    Jungle,
    Middle,
    Bottom,
    Utility,
}

impl Role {
    /// Parses an `assignedPosition` value. Empty (blind pick) and unknown
    /// positions return `None`.
    pub fn from_position(position: &str) -> Option<Self> {
        match position.to_ascii_lowercase().as_str() {
            "top" => Some(Role::Top),
            "jungle" => Some(Role::Jungle),
            "middle" => Some(Role::Middle),
            "bottom" => Some(Role::Bottom),
            "utility" => Some(Role::Utility),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Top => "top",
            Role::Jungle => "jungle",
            Role::Middle => "middle",
            Role::Bottom => "bottom",
            Role::Utility => "utility",
        }
    }
}

/// Primary and fallback champion for one role. A zero id counts as unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolePreference {
    pub primary: Option<i64>,
    pub secondary: Option<i64>,
}

impl RolePreference {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}

/// On-disk forms of a role entry. Older configs stored a bare champion id.
#[derive(Deserialize)]
#[serde(untagged)]
enum RoleEntry {
    Legacy(i64),
    Pair {
        #[serde(default)]
        primary: Option<i64>,
        #[serde(default)]
        secondary: Option<i64>,
    },
}

impl<'de> Deserialize<'de> for RolePreference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nonzero = |id: Option<i64>| id.filter(|&id| id != 0);
        Ok(match RoleEntry::deserialize(deserializer)? {
            RoleEntry::Legacy(id) => RolePreference {
                primary: nonzero(Some(id)),
                secondary: None,
            },
            RoleEntry::Pair { primary, secondary } => RolePreference {
                primary: nonzero(primary),
                secondary: nonzero(secondary),
            },
        })
    }
}

/// Loads the config file at `path`, returning `Settings::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to create config watcher");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!(path = %path.display(), "config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(error = %e, dir = %watch_dir.display(), "failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(settings) => {
                    if tx.send(DaemonEvent::ConfigReloaded(settings)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "failed to reload config"),
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_high() -> u32 {
    DEFAULT_BRIGHTNESS_HIGH
}

fn default_low() -> u32 {
    DEFAULT_BRIGHTNESS_LOW
}

fn default_games() -> Vec<String> {
    [
        "Counter-Strike 2",
        "EscapeFromTarkov",
        "Hell Let Loose",
        "League of Legends (TM) Client",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
