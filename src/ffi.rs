//! FFI bindings for Synheart Pulse
//!
//! This module provides C-compatible functions for calling Pulse from other
//! languages. Data crosses the boundary as JSON in null-terminated C strings.
//! Returned strings are allocated here and must be freed with
//! `pulse_free_string`.
//!
//! The monitor API is push-fed: the host owns the sensor driver and pushes
//! sample pairs, while the acquisition loop runs on its own thread inside the
//! library.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Deserialize;

use crate::config::MonitorConfig;
use crate::error::PulseError;
use crate::monitor::Monitor;
use crate::sensor::{sample_channel, SampleFeeder};
use crate::signal::{estimate_hr_spo2, estimate_hrv_from_buffer};
use crate::types::SamplePair;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize a result to a C string, or record the error and return NULL
fn json_result<T: serde::Serialize>(result: Result<T, PulseError>) -> *mut c_char {
    match result.and_then(|value| Ok(serde_json::to_string(&value)?)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

#[derive(Deserialize)]
struct WindowInput {
    ir: Vec<f64>,
    red: Vec<f64>,
}

// ============================================================================
// Stateless API
// ============================================================================

/// Estimate HR and SpO2 from `{"ir": [...], "red": [...]}`.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_estimate_hr_spo2(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    json_result(
        serde_json::from_str::<WindowInput>(&json_str)
            .map_err(PulseError::from)
            .map(|window| estimate_hr_spo2(&window.ir, &window.red)),
    )
}

/// Estimate HRV from a JSON array of raw IR samples.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_estimate_hrv(json: *const c_char, sample_rate: f64) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    json_result(
        serde_json::from_str::<Vec<f64>>(&json_str)
            .map_err(PulseError::from)
            .map(|buffer| estimate_hrv_from_buffer(&buffer, sample_rate)),
    )
}

// ============================================================================
// Monitor API
// ============================================================================

/// Opaque handle to a running Monitor and its sample feeder
pub struct PulseMonitorHandle {
    monitor: Monitor,
    feeder: SampleFeeder,
}

/// Create and start a monitor fed through `pulse_monitor_push_samples`.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string, or NULL for defaults.
/// - Returns a pointer that must be freed with `pulse_monitor_free`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_monitor_new(config_json: *const c_char) -> *mut PulseMonitorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        MonitorConfig::default()
    } else {
        let json_str = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match MonitorConfig::from_json(&json_str) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let (feeder, sensor) = sample_channel();
    let started = Monitor::new(config).and_then(|mut monitor| {
        monitor.start(sensor)?;
        Ok(monitor)
    });

    match started {
        Ok(monitor) => Box::into_raw(Box::new(PulseMonitorHandle { monitor, feeder })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop and free a monitor.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `pulse_monitor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_monitor_free(monitor: *mut PulseMonitorHandle) {
    if !monitor.is_null() {
        let mut handle = Box::from_raw(monitor);
        handle.monitor.shutdown();
        drop(handle);
    }
}

/// Push a JSON array of `{"red": .., "ir": ..}` sample pairs.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `pulse_monitor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns the number of pairs pushed, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_monitor_push_samples(
    monitor: *mut PulseMonitorHandle,
    json: *const c_char,
) -> i64 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &*monitor;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    let pushed = serde_json::from_str::<Vec<SamplePair>>(&json_str)
        .map_err(PulseError::from)
        .and_then(|pairs| {
            let count = pairs.len();
            handle.feeder.push_all(pairs)?;
            Ok(count)
        });

    match pushed {
        Ok(count) => count as i64,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Latest monitor snapshot as JSON.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `pulse_monitor_new`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_monitor_snapshot(monitor: *mut PulseMonitorHandle) -> *mut c_char {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return ptr::null_mut();
    }

    let handle = &*monitor;
    json_result(Ok(handle.monitor.snapshot()))
}

/// Acknowledge the HRV result, returning the monitor to IDLE.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `pulse_monitor_new`.
/// - Returns 0 on success, -1 on a NULL handle.
#[no_mangle]
pub unsafe extern "C" fn pulse_monitor_acknowledge_hrv(monitor: *mut PulseMonitorHandle) -> i32 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &*monitor;
    handle.monitor.acknowledge_hrv();
    0
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Pulse functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Pulse function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Pulse function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn pulse_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Pulse library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn pulse_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
