//! DDC/CI brightness backend over the Dxva2 monitor configuration API.
//!
//! Monitors are addressed by their GDI device name (`\\.\DISPLAY1`, ...).
//! Each call re-enumerates monitors, so hot-plugged displays are picked up
//! without restarting the daemon. On non-Windows platforms no monitors are
//! reported.

use crate::dimming::{Brightness, BrightnessError};

#[derive(Debug, Default)]
pub struct DdcBrightness;

impl DdcBrightness {
    pub fn new() -> Self {
        Self
    }
}

/// Maps a raw DDC value in `min..=max` to a 0–100 percentage.
#[cfg_attr(not(windows), allow(dead_code))]
fn to_percent(current: u32, min: u32, max: u32) -> u32 {
    if max <= min {
        return current.min(100);
    }
    let span = max - min;
    ((current.saturating_sub(min)) * 100 + span / 2) / span
}

/// Maps a 0–100 percentage to a raw DDC value in `min..=max`.
#[cfg_attr(not(windows), allow(dead_code))]
fn from_percent(percent: u32, min: u32, max: u32) -> u32 {
    if max <= min {
        return percent.min(100);
    }
    min + ((max - min) * percent.min(100) + 50) / 100
}

#[cfg(windows)]
impl Brightness for DdcBrightness {
    fn monitors(&self) -> Vec<String> {
        imp::enumerate().into_iter().map(|(name, _)| name).collect()
    }

    fn focused_monitor(&self) -> Option<String> {
        imp::focused_monitor()
    }

    fn get(&self, monitor: &str) -> Option<u32> {
        let hmonitor = imp::find(monitor)?;
        let (current, min, max) = imp::read_brightness(hmonitor)?;
        Some(to_percent(current, min, max))
    }

    fn set(&mut self, monitor: &str, level: u32) -> Result<(), BrightnessError> {
        let hmonitor =
            imp::find(monitor).ok_or_else(|| BrightnessError::UnknownMonitor(monitor.to_string()))?;
        imp::write_brightness(hmonitor, level).map_err(|reason| BrightnessError::Rejected {
            monitor: monitor.to_string(),
            reason,
        })
    }
}

#[cfg(not(windows))]
impl Brightness for DdcBrightness {
    fn monitors(&self) -> Vec<String> {
        Vec::new()
    }

    fn focused_monitor(&self) -> Option<String> {
        None
    }

    fn get(&self, _monitor: &str) -> Option<u32> {
        None
    }

    fn set(&mut self, _monitor: &str, _level: u32) -> Result<(), BrightnessError> {
        Err(BrightnessError::Unsupported)
    }
}

#[cfg(windows)]
mod imp {
    use windows::Win32::Devices::Display::{
        DestroyPhysicalMonitors, GetMonitorBrightness, GetNumberOfPhysicalMonitorsFromHMONITOR,
        GetPhysicalMonitorsFromHMONITOR, SetMonitorBrightness, PHYSICAL_MONITOR,
    };
    use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayMonitors, GetMonitorInfoW, MonitorFromWindow, HDC, HMONITOR, MONITORINFO,
        MONITORINFOEXW, MONITOR_DEFAULTTONEAREST,
    };
    use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

    use super::{from_percent, to_percent};

    unsafe extern "system" fn collect_monitor(
        hmonitor: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        data: LPARAM,
    ) -> BOOL {
        let out = &mut *(data.0 as *mut Vec<HMONITOR>);
        out.push(hmonitor);
        TRUE
    }

    fn device_name(hmonitor: HMONITOR) -> Option<String> {
        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
        let ok = unsafe {
            GetMonitorInfoW(hmonitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO)
        };
        if !ok.as_bool() {
            return None;
        }
        let len = info.szDevice.iter().position(|c| *c == 0).unwrap_or(info.szDevice.len());
        Some(String::from_utf16_lossy(&info.szDevice[..len]))
    }

    pub fn enumerate() -> Vec<(String, HMONITOR)> {
        let mut handles: Vec<HMONITOR> = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(collect_monitor),
                LPARAM(&mut handles as *mut Vec<HMONITOR> as isize),
            );
        }
        handles
            .into_iter()
            .filter_map(|h| device_name(h).map(|name| (name, h)))
            .collect()
    }

    pub fn find(name: &str) -> Option<HMONITOR> {
        enumerate()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, h)| h)
    }

    pub fn focused_monitor() -> Option<String> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() {
            return None;
        }
        let hmonitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) };
        if hmonitor.is_invalid() {
            return None;
        }
        device_name(hmonitor)
    }

    /// Opens the physical monitors behind `hmonitor`, runs `f`, and releases
    /// them again.
    fn with_physical<T>(
        hmonitor: HMONITOR,
        f: impl FnOnce(&[PHYSICAL_MONITOR]) -> T,
    ) -> Result<T, String> {
        let mut count = 0u32;
        unsafe { GetNumberOfPhysicalMonitorsFromHMONITOR(hmonitor, &mut count) }
            .map_err(|e| e.to_string())?;
        if count == 0 {
            return Err("no physical monitors".to_string());
        }
        let mut physical = vec![PHYSICAL_MONITOR::default(); count as usize];
        unsafe { GetPhysicalMonitorsFromHMONITOR(hmonitor, &mut physical) }
            .map_err(|e| e.to_string())?;
        let result = f(&physical);
        unsafe {
            let _ = DestroyPhysicalMonitors(&physical);
        }
        Ok(result)
    }

    /// `(current, min, max)` of the first physical monitor that answers.
    pub fn read_brightness(hmonitor: HMONITOR) -> Option<(u32, u32, u32)> {
        with_physical(hmonitor, |physical| {
            physical.iter().find_map(|p| {
                let (mut min, mut current, mut max) = (0u32, 0u32, 0u32);
                let ok = unsafe {
                    GetMonitorBrightness(p.hPhysicalMonitor, &mut min, &mut current, &mut max)
                };
                (ok != 0).then_some((current, min, max))
            })
        })
        .ok()
        .flatten()
    }

    pub fn write_brightness(hmonitor: HMONITOR, percent: u32) -> Result<(), String> {
        let written = with_physical(hmonitor, |physical| {
            physical
                .iter()
                .filter(|p| {
                    let (mut min, mut current, mut max) = (0u32, 0u32, 0u32);
                    let range_ok = unsafe {
                        GetMonitorBrightness(p.hPhysicalMonitor, &mut min, &mut current, &mut max)
                    } != 0;
                    let (min, max) = if range_ok { (min, max) } else { (0, 100) };
                    let raw = from_percent(percent, min, max);
                    if range_ok && to_percent(current, min, max) == percent {
                        return true;
                    }
                    unsafe { SetMonitorBrightness(p.hPhysicalMonitor, raw) != 0 }
                })
                .count()
        })?;
        if written == 0 {
            return Err("monitor does not support DDC/CI brightness".to_string());
        }
        Ok(())
    }
}
