//! Side-monitor dimming driven by foreground-window changes.

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Settings;

/// Commands queued for the dimming worker.
const COMMAND_QUEUE: usize = 32;

/// Invisible separators some games put in their window titles.
const INVISIBLE_TITLE_CHARS: &[char] = &[
    '\u{feff}', // BOM / zero-width no-break space
    '\u{200b}', // zero-width space
    '\u{200c}', // zero-width non-joiner
    '\u{200d}', // zero-width joiner
    '\u{2005}', // four-per-em space
    '\u{2004}', // three-per-em space
    '\u{2003}', // em space
    '\u{2002}', // en space
    '\u{00a0}', // no-break space
    '\u{2060}', // word joiner
    '\u{180e}', // mongolian vowel separator
];

/// Strips invisible characters and surrounding whitespace from a title.
pub fn clean_window_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !INVISIBLE_TITLE_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Error)]
pub enum BrightnessError {
    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("monitor {0:?} not found")]
    UnknownMonitor(String),
    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("monitor {monitor:?} rejected the brightness change: {reason}")]
    Rejected { monitor: String, reason: String },
    #[cfg_attr(windows, allow(dead_code))]
    #[error("brightness control is not supported on this platform")]
    Unsupported,
}

/// Per-monitor brightness control. Monitors are identified by display device
/// name (e.g. `\\.\DISPLAY2`); levels are percentages.
pub trait Brightness: Send {
    fn monitors(&self) -> Vec<String>;

    /// The monitor showing the foreground window.
    fn focused_monitor(&self) -> Option<String>;

    fn get(&self, monitor: &str) -> Option<u32>;

    fn set(&mut self, monitor: &str, level: u32) -> Result<(), BrightnessError>;
}

/// Decides when to dim and restore monitors.
pub struct DimmingController<B: Brightness> {
    backend: B,
    last_title: Option<String>,
    /// `(is_game_focused, dim_all_except_focused)` last acted on.
    last_state: Option<(bool, bool)>,
    dimmed: bool,
}

impl<B: Brightness> DimmingController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            last_title: None,
            last_state: None,
            dimmed: false,
        }
    }

    pub fn is_dimmed(&self) -> bool {
        self.dimmed
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn on_focus_changed(&mut self, title: &str, settings: &Settings) {
        if self.last_title.as_deref() == Some(title) {
            return;
        }
        self.last_title = Some(title.to_string());
        tracing::debug!(title, "focus changed");

        if !settings.dimming_enabled {
            return;
        }

        let cleaned = clean_window_title(title);
        let is_game_focused = settings.games_to_dim.iter().any(|g| *g == cleaned);
        let state = (is_game_focused, settings.dim_all_except_focused);
        if self.last_state == Some(state) {
            return;
        }
        self.last_state = Some(state);

        let levels = settings.monitor_brightness.clamped();
        if is_game_focused {
            let targets = if settings.dim_all_except_focused {
                self.unfocused_monitors()
            } else {
                settings.dimmable_monitors.clone()
            };
            tracing::info!(game = %cleaned, monitors = ?targets, "game focused, dimming");
            self.apply(levels.low, &targets);
            self.dimmed = true;
        } else {
            tracing::debug!("game unfocused, restoring monitors");
            let all = self.backend.monitors();
            self.apply(levels.high, &all);
            self.dimmed = false;
        }
    }

    /// Sets every monitor to the high level and forgets the last decision.
    pub fn restore(&mut self, settings: &Settings) {
        let all = self.backend.monitors();
        self.apply(settings.monitor_brightness.clamped().high, &all);
        self.dimmed = false;
        self.last_state = None;
        self.last_title = None;
    }

    fn unfocused_monitors(&self) -> Vec<String> {
        let Some(focused) = self.backend.focused_monitor() else {
            tracing::debug!("cannot detect focused monitor, dimming nothing");
            return Vec::new();
        };
        self.backend
            .monitors()
            .into_iter()
            .filter(|m| *m != focused)
            .collect()
    }

    fn apply(&mut self, level: u32, monitors: &[String]) {
        let mut changed = Vec::new();
        let mut unchanged = Vec::new();
        for monitor in monitors {
            if self.backend.get(monitor) == Some(level) {
                unchanged.push(monitor.as_str());
                continue;
            }
            match self.backend.set(monitor, level) {
                Ok(()) => changed.push(monitor.as_str()),
                Err(e) => tracing::warn!(monitor = %monitor, error = %e, "failed to set brightness"),
            }
        }
        tracing::debug!(level, ?changed, ?unchanged, "brightness applied");
    }
}

enum DimmingCommand {
    FocusChanged(String, Settings),
    Restore(Settings),
}

/// Runs a [`DimmingController`] on a blocking thread.
///
/// DDC/CI reads and writes take tens of milliseconds per monitor, so they are
/// kept off the async runtime. Commands are applied in order; the current
/// dimmed flag is published on a watch channel.
pub struct DimmingWorker {
    tx: mpsc::Sender<DimmingCommand>,
    dimmed_rx: watch::Receiver<bool>,
    join: JoinHandle<()>,
}

impl DimmingWorker {
    /// Must be called from within a tokio runtime.
    pub fn spawn<B: Brightness + 'static>(mut controller: DimmingController<B>) -> Self {
        let (tx, mut rx) = mpsc::channel::<DimmingCommand>(COMMAND_QUEUE);
        let (dimmed_tx, dimmed_rx) = watch::channel(controller.is_dimmed());
        let join = tokio::task::spawn_blocking(move || {
            while let Some(command) = rx.blocking_recv() {
                match command {
                    DimmingCommand::FocusChanged(title, settings) => {
                        controller.on_focus_changed(&title, &settings)
                    }
                    DimmingCommand::Restore(settings) => controller.restore(&settings),
                }
                let dimmed = controller.is_dimmed();
                dimmed_tx.send_if_modified(|current| std::mem::replace(current, dimmed) != dimmed);
            }
            tracing::debug!("dimming worker exited");
        });
        Self { tx, dimmed_rx, join }
    }

    /// Receiver that observes every change of the dimmed flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.dimmed_rx.clone()
    }

    pub async fn focus_changed(&self, title: String, settings: Settings) {
        self.send(DimmingCommand::FocusChanged(title, settings)).await;
    }

    pub async fn restore(&self, settings: Settings) {
        self.send(DimmingCommand::Restore(settings)).await;
    }

    /// Restores every monitor, then waits for the worker to drain and exit.
    pub async fn shutdown(self, settings: Settings) {
        self.send(DimmingCommand::Restore(settings)).await;
        drop(self.tx);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "dimming worker failed");
        }
    }

    async fn send(&self, command: DimmingCommand) {
        if self.tx.send(command).await.is_err() {
            tracing::warn!("dimming worker is gone, command dropped");
        }
    }
}
