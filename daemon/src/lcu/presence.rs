//! Cheap "is the client up?" check.
//!
//! Looking up the client's top-level window by class name is a single
//! `FindWindowW` call, far cheaper than walking the process list every poll.

/// Window class of the client's main UX window.
pub const CLIENT_WINDOW_CLASS: &str = "RCLIENT";

pub trait PresenceDetector: Send + Sync {
    /// Returns `true` when the target application's window exists.
    /// Absence is a normal negative result, never an error.
    fn is_target_running(&self) -> bool;
}

/// Detects the client by the class name of its top-level window.
pub struct WindowClassPresence {
    #[cfg_attr(not(windows), allow(dead_code))]
    class_name: Vec<u16>,
}

impl WindowClassPresence {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.encode_utf16().chain(std::iter::once(0)).collect(),
        }
    }
}

impl Default for WindowClassPresence {
    fn default() -> Self {
        Self::new(CLIENT_WINDOW_CLASS)
    }
}

impl PresenceDetector for WindowClassPresence {
    #[cfg(windows)]
    fn is_target_running(&self) -> bool {
        use windows::core::PCWSTR;
        use windows::Win32::UI::WindowsAndMessaging::FindWindowW;

        // FindWindowW reports "no such window" as an error; both map to false.
        match unsafe { FindWindowW(PCWSTR::from_raw(self.class_name.as_ptr()), PCWSTR::null()) } {
            Ok(hwnd) => !hwnd.is_invalid(),
            Err(_) => false,
        }
    }

    #[cfg(not(windows))]
    fn is_target_running(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_is_nul_terminated_utf16() {
        let p = WindowClassPresence::new("RCLIENT");
        assert_eq!(p.class_name.last(), Some(&0));
        assert_eq!(p.class_name.len(), "RCLIENT".len() + 1);
    }

    #[test]
    fn unknown_window_class_is_not_running() {
        let p = WindowClassPresence::new("qol-daemon-test-class-that-does-not-exist");
        assert!(!p.is_target_running());
    }
}
