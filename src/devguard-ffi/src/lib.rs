//! # devguard-ffi
//!
//! C-compatible FFI interface for devguard.
//!
//! The host supplies two callbacks at init time: one that reads an integer
//! platform setting and one that opens a system screen. Requests and
//! responses cross the boundary as JSON.
//!
//! ## Usage
//!
//! ```c
//! #include "devguard.h"
//!
//! static int32_t read_setting(void* ctx, int32_t ns, const char* key, int64_t* out) {
//!     // 0 = value written to *out, 1 = unset, -1 = denied, -2 = unavailable
//!     return 1;
//! }
//!
//! int main() {
//!     DevGuardHandle* handle = devguard_init(NULL, read_setting, NULL, NULL);
//!     if (!handle) {
//!         return 1;
//!     }
//!
//!     const char* req = "{\"operation\":\"checkSignal\",\"args\":{\"name\":\"developer-mode\"}}";
//!     uint8_t* response_data = NULL;
//!     size_t response_len = 0;
//!
//!     int result = devguard_dispatch(
//!         handle,
//!         (const uint8_t*)req, strlen(req),
//!         &response_data, &response_len
//!     );
//!
//!     if (result == 0) {
//!         // {"status":"success","value":false}
//!         devguard_free(response_data);
//!     }
//!
//!     devguard_destroy(handle);
//!     return 0;
//! }
//! ```

#![allow(clippy::missing_safety_doc)] // FFI functions are inherently unsafe

use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;

use devguard_core::{
    BridgeDispatcher, GuardConfig, LaunchError, SettingsError, SettingsNamespace, SettingsSource,
    SurfaceLauncher, SystemSurface, UnsupportedLauncher,
};

#[cfg(target_os = "android")]
mod android;

/// Setting read succeeded; the value was written to `out_value`.
pub const DEVGUARD_SETTING_VALUE: i32 = 0;
/// Setting is not present.
pub const DEVGUARD_SETTING_UNSET: i32 = 1;
/// Reading the setting was refused.
pub const DEVGUARD_SETTING_DENIED: i32 = -1;
/// The settings store is unavailable.
pub const DEVGUARD_SETTING_UNAVAILABLE: i32 = -2;

/// Surface opened.
pub const DEVGUARD_LAUNCH_OK: i32 = 0;
/// No handler for the requested surface.
pub const DEVGUARD_LAUNCH_NO_HANDLER: i32 = 1;

/// Host callback reading one integer setting.
///
/// `namespace` is 0 (global), 1 (secure) or 2 (system). Returns one of the
/// `DEVGUARD_SETTING_*` codes.
pub type DevGuardReadSetting = unsafe extern "C" fn(
    ctx: *mut c_void,
    namespace: i32,
    key: *const libc::c_char,
    out_value: *mut i64,
) -> i32;

/// Host callback opening a system surface by Android intent action.
///
/// Returns `DEVGUARD_LAUNCH_OK`, `DEVGUARD_LAUNCH_NO_HANDLER`, or any
/// other value when the platform rejected the launch.
pub type DevGuardOpenSurface =
    unsafe extern "C" fn(ctx: *mut c_void, intent_action: *const libc::c_char) -> i32;

/// Opaque handle to the devguard instance.
pub struct DevGuardHandle {
    dispatcher: BridgeDispatcher,
}

/// Error codes returned by FFI functions.
#[repr(C)]
pub enum DevGuardError {
    /// Success.
    Success = 0,
    /// Invalid argument.
    InvalidArgument = -1,
    /// Initialization failed.
    InitializationFailed = -2,
    /// Internal error.
    InternalError = -99,
}

/// Host context pointer handed back to every callback.
#[derive(Clone, Copy)]
struct HostContext(*mut c_void);

// SAFETY: the host promises at init time that its callbacks may be invoked
// from any thread with this context.
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

/// Settings source backed by a host callback.
struct CallbackSettings {
    read: DevGuardReadSetting,
    ctx: HostContext,
}

impl SettingsSource for CallbackSettings {
    fn read_int(
        &self,
        namespace: SettingsNamespace,
        key: &str,
    ) -> Result<Option<i64>, SettingsError> {
        let c_key = CString::new(key).map_err(|e| SettingsError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let mut value: i64 = 0;

        // SAFETY: `read` and `ctx` were supplied together by the host, the
        // key is NUL-terminated and `value` outlives the call.
        let status = unsafe { (self.read)(self.ctx.0, namespace.code(), c_key.as_ptr(), &mut value) };

        match status {
            DEVGUARD_SETTING_VALUE => Ok(Some(value)),
            DEVGUARD_SETTING_UNSET => Ok(None),
            DEVGUARD_SETTING_DENIED => Err(SettingsError::PermissionDenied {
                namespace,
                key: key.to_string(),
            }),
            DEVGUARD_SETTING_UNAVAILABLE => Err(SettingsError::Unavailable {
                reason: format!("host reports {namespace}/{key} unavailable"),
            }),
            other => Err(SettingsError::Unavailable {
                reason: format!("host returned unknown status {other} for {namespace}/{key}"),
            }),
        }
    }
}

/// Surface launcher backed by a host callback.
struct CallbackLauncher {
    open: DevGuardOpenSurface,
    ctx: HostContext,
}

impl SurfaceLauncher for CallbackLauncher {
    fn open(&self, surface: SystemSurface) -> Result<(), LaunchError> {
        let action = CString::new(surface.android_intent_action()).map_err(|e| {
            LaunchError::Rejected {
                reason: e.to_string(),
            }
        })?;

        // SAFETY: see `CallbackSettings::read_int`.
        let status = unsafe { (self.open)(self.ctx.0, action.as_ptr()) };

        match status {
            DEVGUARD_LAUNCH_OK => Ok(()),
            DEVGUARD_LAUNCH_NO_HANDLER => Err(LaunchError::NoHandler {
                surface: surface.as_str().to_string(),
            }),
            other => Err(LaunchError::Rejected {
                reason: format!("host returned status {other}"),
            }),
        }
    }
}

/// Route `tracing` output to the platform log.
fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Info)
                .with_tag("DevGuard"),
        );
    }
}

/// Initialize a devguard instance.
///
/// # Arguments
///
/// * `config_json` - JSON `GuardConfig`, or NULL for defaults
/// * `read_setting` - Settings callback (required)
/// * `open_surface` - Launch callback, or NULL if the host cannot open screens
/// * `ctx` - Opaque pointer passed back to both callbacks
///
/// Returns NULL on failure.
///
/// # Safety
///
/// - `config_json` must be NULL or a valid NUL-terminated string
/// - The callbacks must be callable from any thread with `ctx` for as long
///   as the handle lives
/// - The returned handle must be freed with `devguard_destroy`
#[no_mangle]
pub unsafe extern "C" fn devguard_init(
    config_json: *const libc::c_char,
    read_setting: Option<DevGuardReadSetting>,
    open_surface: Option<DevGuardOpenSurface>,
    ctx: *mut c_void,
) -> *mut DevGuardHandle {
    init_logging();

    let Some(read) = read_setting else {
        tracing::error!("devguard_init: settings callback is required");
        return ptr::null_mut();
    };

    let config = if config_json.is_null() {
        GuardConfig::default()
    } else {
        let raw = match CStr::from_ptr(config_json).to_str() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("devguard_init: config is not UTF-8: {}", e);
                return ptr::null_mut();
            },
        };
        match GuardConfig::from_json(raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("devguard_init: {}", e);
                return ptr::null_mut();
            },
        }
    };

    let ctx = HostContext(ctx);
    let launcher: Arc<dyn SurfaceLauncher> = match open_surface {
        Some(open) => Arc::new(CallbackLauncher { open, ctx }),
        None => Arc::new(UnsupportedLauncher),
    };
    let settings = Arc::new(CallbackSettings { read, ctx });

    let handle = Box::new(DevGuardHandle {
        dispatcher: BridgeDispatcher::with_settings(config, settings, launcher),
    });
    Box::into_raw(handle)
}

/// Dispatch one bridge request.
///
/// # Arguments
///
/// * `handle` - Handle from `devguard_init`
/// * `request_data` - JSON `BridgeRequest`
/// * `request_len` - Length of request data
/// * `response_data` - Output pointer for the JSON `BridgeResponse` (caller must free with `devguard_free`)
/// * `response_len` - Output pointer for response length
///
/// # Returns
///
/// 0 when a response was produced, negative error code otherwise. Request
/// level failures (unknown operation, failed action) are reported inside
/// the response, not through the return code.
///
/// # Safety
///
/// - `handle` must be a valid handle from `devguard_init`
/// - `request_data` must point to valid memory of at least `request_len` bytes
/// - `response_data` and `response_len` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn devguard_dispatch(
    handle: *mut DevGuardHandle,
    request_data: *const u8,
    request_len: usize,
    response_data: *mut *mut u8,
    response_len: *mut usize,
) -> i32 {
    if handle.is_null() || request_data.is_null() || response_data.is_null() || response_len.is_null() {
        return DevGuardError::InvalidArgument as i32;
    }

    let handle = &*handle;
    let request_bytes = std::slice::from_raw_parts(request_data, request_len);

    let response_bytes = handle.dispatcher.dispatch_json(request_bytes);

    // Allocate and copy response
    let len = response_bytes.len();
    let ptr = libc::malloc(len) as *mut u8;
    if ptr.is_null() {
        return DevGuardError::InternalError as i32;
    }

    std::ptr::copy_nonoverlapping(response_bytes.as_ptr(), ptr, len);

    *response_data = ptr;
    *response_len = len;

    DevGuardError::Success as i32
}

/// Free memory allocated by devguard functions.
///
/// # Safety
///
/// `data` must be a pointer returned by a devguard function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn devguard_free(data: *mut c_void) {
    if !data.is_null() {
        libc::free(data);
    }
}

/// Destroy the devguard handle and release resources.
///
/// # Safety
///
/// `handle` must be a valid handle from `devguard_init`.
/// After this call, the handle is invalid and must not be used.
#[no_mangle]
pub unsafe extern "C" fn devguard_destroy(handle: *mut DevGuardHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Get the library version.
///
/// Returns a static string with the version number.
#[no_mangle]
pub extern "C" fn devguard_version() -> *const libc::c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const libc::c_char
}
