//! Foreground-window watcher built on WinEvent hooks.
//!
//! The hooks run on a dedicated OS thread with its own Windows message pump.
//! Every time the title of the focused window changes, a
//! [`DaemonEvent::FocusChanged`] carrying the raw title is sent to the main
//! loop. The thread exits when [`FocusHandle::stop`] is called.
//!
//! On non-Windows platforms the public API compiles but is a no-op at runtime.
use std::sync::OnceLock;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

/// Channel used by the hook callback. Set once by [`start`].
static FOCUS_TX: OnceLock<mpsc::Sender<DaemonEvent>> = OnceLock::new();

/// A handle to the running hook thread.
pub struct FocusHandle {
    #[cfg(windows)]
    thread: std::thread::JoinHandle<()>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    #[cfg(windows)]
    thread_id: u32,
}

impl FocusHandle {
    /// Signals the hook thread to stop and blocks until it exits.
    pub fn stop(self) {
        #[cfg(windows)]
        {
            imp::post_quit(self.thread_id);
            if self.thread.join().is_err() {
                tracing::warn!("focus hook thread panicked");
            }
        }
    }
}

/// Installs the foreground, minimize-end and object-focus hooks on a
/// dedicated thread.
///
/// Title changes are forwarded with a non-blocking
/// [`try_send`](mpsc::Sender::try_send); if the channel is full that change
/// is dropped and the next one is delivered.
pub fn start(tx: mpsc::Sender<DaemonEvent>) -> anyhow::Result<FocusHandle> {
    // Ignored if called more than once (test binaries).
    let _ = FOCUS_TX.set(tx);

    #[cfg(windows)]
    {
        use anyhow::Context;

        let (id_tx, id_rx) = std::sync::mpsc::sync_channel::<u32>(1);
        let thread = std::thread::Builder::new()
            .name("focus-pump".into())
            .spawn(move || imp::run_message_pump(id_tx))
            .context("failed to spawn focus hook thread")?;
        let thread_id = id_rx
            .recv()
            .context("focus hook thread exited before reporting its id")?;
        Ok(FocusHandle { thread, thread_id })
    }

    #[cfg(not(windows))]
    Ok(FocusHandle {})
}

/// Forwards `title` to `tx` unless it repeats the previous one.
#[cfg_attr(not(windows), allow(dead_code))]
fn forward_title(last: &mut Option<String>, title: String, tx: Option<&mpsc::Sender<DaemonEvent>>) {
    if last.as_deref() == Some(title.as_str()) {
        return;
    }
    *last = Some(title.clone());
    if let Some(tx) = tx {
        let _ = tx.try_send(DaemonEvent::FocusChanged(title));
    }
}

#[cfg(windows)]
mod imp {
    use std::cell::RefCell;
    use std::sync::mpsc as std_mpsc;

    use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK};
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, GetForegroundWindow, GetMessageW, GetWindowTextW, PostThreadMessageW,
        TranslateMessage, EVENT_OBJECT_FOCUS, EVENT_SYSTEM_FOREGROUND, EVENT_SYSTEM_MINIMIZEEND,
        MSG, WINEVENT_OUTOFCONTEXT, WM_QUIT,
    };

    use super::{forward_title, FOCUS_TX};

    thread_local! {
        // Only touched from the pump thread, which is where hook callbacks run.
        static LAST_TITLE: RefCell<Option<String>> = const { RefCell::new(None) };
    }

    fn window_title(hwnd: HWND) -> String {
        let mut buf = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
        String::from_utf16_lossy(&buf[..len.max(0) as usize])
    }

    unsafe extern "system" fn win_event_proc(
        _hook: HWINEVENTHOOK,
        _event: u32,
        _hwnd: HWND,
        _id_object: i32,
        _id_child: i32,
        _event_thread: u32,
        _event_time: u32,
    ) {
        // Object-focus events name child controls; the title that matters is
        // the top-level foreground window's.
        let foreground = GetForegroundWindow();
        if foreground.is_invalid() {
            return;
        }
        let title = window_title(foreground);
        LAST_TITLE.with(|last| forward_title(&mut last.borrow_mut(), title, FOCUS_TX.get()));
    }

    /// Installs the hooks, runs a message pump until `WM_QUIT`, then removes
    /// them.
    pub fn run_message_pump(id_tx: std_mpsc::SyncSender<u32>) {
        unsafe {
            let _ = id_tx.send(GetCurrentThreadId());
            drop(id_tx);

            let hooks: Vec<HWINEVENTHOOK> = [
                EVENT_SYSTEM_FOREGROUND,
                EVENT_SYSTEM_MINIMIZEEND,
                EVENT_OBJECT_FOCUS,
            ]
            .into_iter()
            .filter_map(|event| {
                let hook = SetWinEventHook(
                    event,
                    event,
                    HMODULE::default(),
                    Some(win_event_proc),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT,
                );
                if hook.is_invalid() {
                    tracing::warn!(event, "SetWinEventHook failed");
                    None
                } else {
                    Some(hook)
                }
            })
            .collect();
            tracing::debug!(hooks = hooks.len(), "focus hooks installed");

            let mut msg = MSG::default();
            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            for hook in hooks {
                let _ = UnhookWinEvent(hook);
            }
            tracing::debug!("focus hook thread exited");
        }
    }

    /// Posts `WM_QUIT` to `thread_id`, causing its `GetMessageW` loop to exit.
    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}
