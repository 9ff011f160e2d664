use crate::config::Settings;
use crate::lcu::ConnectorState;

pub enum DaemonEvent {
    /// The foreground window changed; carries the new window title.
    FocusChanged(String),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Settings),
    /// The client connector moved between waiting, connected and stopped.
    ConnectorStateChanged(ConnectorState),
    /// Side monitors were dimmed (`true`) or restored (`false`).
    DimmingChanged(bool),
    /// Ctrl+C received; the daemon should restore monitors and exit.
    Shutdown,
}
