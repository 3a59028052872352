//! Android JNI bindings.
//!
//! Settings are read through `android.provider.Settings` and surfaces are
//! opened with `Context.startActivity`, both from the application context
//! passed to `nativeInit`.
//!
//! Kotlin side:
//!
//! ```kotlin
//! object DevGuard {
//!     init { System.loadLibrary("devguard_ffi") }
//!     external fun nativeInit(context: Context, configJson: String?): Long
//!     external fun nativeDispatch(handle: Long, request: ByteArray): ByteArray?
//!     external fun nativeDestroy(handle: Long)
//! }
//! ```

use std::sync::{Arc, OnceLock};

use jni::objects::{GlobalRef, JByteArray, JClass, JObject, JString, JThrowable, JValue};
use jni::sys::{jbyteArray, jlong};
use jni::{JNIEnv, JavaVM};
use tracing::{debug, error, info, warn};

use devguard_core::{
    BridgeDispatcher, GuardConfig, LaunchError, SettingsError, SettingsNamespace, SettingsSource,
    SurfaceLauncher, SystemSurface,
};

use super::{devguard_destroy, init_logging, DevGuardHandle};

/// `Intent.FLAG_ACTIVITY_NEW_TASK`; required when starting from a
/// non-activity context.
const FLAG_ACTIVITY_NEW_TASK: i32 = 0x1000_0000;

/// Global JavaVM reference, set during JNI_OnLoad.
static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();

/// JNI_OnLoad - called automatically when the library is loaded by Android.
#[no_mangle]
pub unsafe extern "system" fn JNI_OnLoad(
    vm: *mut jni::sys::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    init_logging();
    info!("JNI_OnLoad: devguard native library loaded");

    // Safety: vm pointer is provided by the JVM and is valid
    let vm = match JavaVM::from_raw(vm) {
        Ok(vm) => vm,
        Err(e) => {
            error!("JNI_OnLoad: failed to create JavaVM wrapper: {}", e);
            return jni::sys::JNI_ERR;
        },
    };

    if JAVA_VM.set(vm).is_err() {
        warn!("JNI_OnLoad: JavaVM already initialized");
    }

    jni::sys::JNI_VERSION_1_6
}

fn attach() -> Result<jni::AttachGuard<'static>, String> {
    let vm = JAVA_VM
        .get()
        .ok_or_else(|| "JNI not initialized".to_string())?;
    vm.attach_current_thread()
        .map_err(|e| format!("JNI attach failed: {e}"))
}

/// Take and clear the pending Java exception.
fn take_exception<'local>(env: &mut JNIEnv<'local>) -> Option<JThrowable<'local>> {
    let throwable = env.exception_occurred().ok()?;
    if env.exception_clear().is_err() || throwable.is_null() {
        return None;
    }
    Some(throwable)
}

fn is_instance(env: &mut JNIEnv<'_>, throwable: &JThrowable<'_>, class: &str) -> bool {
    env.is_instance_of(throwable, class).unwrap_or(false)
}

fn describe(env: &mut JNIEnv<'_>, throwable: &JThrowable<'_>) -> String {
    let text = env
        .call_method(throwable, "toString", "()Ljava/lang/String;", &[])
        .and_then(|v| v.l());
    match text {
        Ok(obj) => {
            let s = JString::from(obj);
            env.get_string(&s)
                .map(String::from)
                .unwrap_or_else(|_| "unknown exception".to_string())
        },
        Err(_) => "unknown exception".to_string(),
    }
}

/// Settings read through `Settings.Global/Secure/System.getInt`.
struct JniSettings {
    context: GlobalRef,
}

impl JniSettings {
    fn class(namespace: SettingsNamespace) -> &'static str {
        match namespace {
            SettingsNamespace::Global => "android/provider/Settings$Global",
            SettingsNamespace::Secure => "android/provider/Settings$Secure",
            SettingsNamespace::System => "android/provider/Settings$System",
        }
    }
}

impl SettingsSource for JniSettings {
    fn read_int(
        &self,
        namespace: SettingsNamespace,
        key: &str,
    ) -> Result<Option<i64>, SettingsError> {
        let unavailable = |reason: String| SettingsError::Unavailable { reason };

        let mut env = attach().map_err(unavailable)?;

        let resolver = env
            .call_method(
                self.context.as_obj(),
                "getContentResolver",
                "()Landroid/content/ContentResolver;",
                &[],
            )
            .and_then(|v| v.l())
            .map_err(|e| unavailable(format!("getContentResolver failed: {e}")))?;

        let name: JObject = env
            .new_string(key)
            .map_err(|e| unavailable(format!("JNI string creation failed: {e}")))?
            .into();

        let result = env.call_static_method(
            Self::class(namespace),
            "getInt",
            "(Landroid/content/ContentResolver;Ljava/lang/String;)I",
            &[JValue::Object(&resolver), JValue::Object(&name)],
        );

        match result {
            Ok(value) => {
                let value = value
                    .i()
                    .map_err(|e| unavailable(format!("getInt result conversion failed: {e}")))?;
                debug!(namespace = %namespace, key = key, value = value, "settings read");
                Ok(Some(i64::from(value)))
            },
            Err(jni::errors::Error::JavaException) => {
                let Some(throwable) = take_exception(&mut env) else {
                    return Err(unavailable(format!("{namespace}/{key}: exception vanished")));
                };
                if is_instance(
                    &mut env,
                    &throwable,
                    "android/provider/Settings$SettingNotFoundException",
                ) {
                    Ok(None)
                } else if is_instance(&mut env, &throwable, "java/lang/SecurityException") {
                    Err(SettingsError::PermissionDenied {
                        namespace,
                        key: key.to_string(),
                    })
                } else {
                    Err(unavailable(describe(&mut env, &throwable)))
                }
            },
            Err(e) => Err(unavailable(format!("{namespace}/{key}: {e}"))),
        }
    }
}

/// Launcher starting settings activities from the application context.
struct JniLauncher {
    context: GlobalRef,
}

impl SurfaceLauncher for JniLauncher {
    fn open(&self, surface: SystemSurface) -> Result<(), LaunchError> {
        let rejected = |reason: String| LaunchError::Rejected { reason };

        let mut env = attach().map_err(rejected)?;

        let action: JObject = env
            .new_string(surface.android_intent_action())
            .map_err(|e| rejected(format!("JNI string creation failed: {e}")))?
            .into();

        let intent = env
            .new_object(
                "android/content/Intent",
                "(Ljava/lang/String;)V",
                &[JValue::Object(&action)],
            )
            .map_err(|e| rejected(format!("Intent construction failed: {e}")))?;

        env.call_method(
            &intent,
            "addFlags",
            "(I)Landroid/content/Intent;",
            &[JValue::Int(FLAG_ACTIVITY_NEW_TASK)],
        )
        .map_err(|e| rejected(format!("addFlags failed: {e}")))?;

        let result = env.call_method(
            self.context.as_obj(),
            "startActivity",
            "(Landroid/content/Intent;)V",
            &[JValue::Object(&intent)],
        );

        match result {
            Ok(_) => Ok(()),
            Err(jni::errors::Error::JavaException) => {
                let Some(throwable) = take_exception(&mut env) else {
                    return Err(rejected("startActivity threw".to_string()));
                };
                if is_instance(
                    &mut env,
                    &throwable,
                    "android/content/ActivityNotFoundException",
                ) {
                    Err(LaunchError::NoHandler {
                        surface: surface.as_str().to_string(),
                    })
                } else {
                    Err(rejected(describe(&mut env, &throwable)))
                }
            },
            Err(e) => Err(rejected(format!("startActivity failed: {e}"))),
        }
    }
}

/// Create a handle bound to the application `context`.
///
/// Returns 0 on failure.
#[no_mangle]
pub extern "system" fn Java_com_atenim_fms_DevGuard_nativeInit<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    context: JObject<'local>,
    config_json: JString<'local>,
) -> jlong {
    init_logging();

    let config = if config_json.is_null() {
        GuardConfig::default()
    } else {
        let raw: String = match env.get_string(&config_json) {
            Ok(s) => s.into(),
            Err(e) => {
                error!("nativeInit: cannot read config: {}", e);
                return 0;
            },
        };
        match GuardConfig::from_json(&raw) {
            Ok(config) => config,
            Err(e) => {
                error!("nativeInit: {}", e);
                return 0;
            },
        }
    };

    let context = match env.new_global_ref(&context) {
        Ok(r) => r,
        Err(e) => {
            error!("nativeInit: cannot pin context: {}", e);
            return 0;
        },
    };

    let dispatcher = BridgeDispatcher::with_settings(
        config,
        Arc::new(JniSettings {
            context: context.clone(),
        }),
        Arc::new(JniLauncher { context }),
    );
    Box::into_raw(Box::new(DevGuardHandle { dispatcher })) as jlong
}

/// Dispatch one JSON request. Returns NULL only on JNI failure.
#[no_mangle]
pub unsafe extern "system" fn Java_com_atenim_fms_DevGuard_nativeDispatch<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    request: JByteArray<'local>,
) -> jbyteArray {
    if handle == 0 {
        error!("nativeDispatch: null handle");
        return std::ptr::null_mut();
    }
    let handle = &*(handle as *const DevGuardHandle);

    let bytes = match env.convert_byte_array(&request) {
        Ok(b) => b,
        Err(e) => {
            error!("nativeDispatch: cannot read request: {}", e);
            return std::ptr::null_mut();
        },
    };

    let response = handle.dispatcher.dispatch_json(&bytes);

    match env.byte_array_from_slice(&response) {
        Ok(array) => array.into_raw(),
        Err(e) => {
            error!("nativeDispatch: cannot allocate response: {}", e);
            std::ptr::null_mut()
        },
    }
}

/// Release a handle from `nativeInit`.
#[no_mangle]
pub unsafe extern "system" fn Java_com_atenim_fms_DevGuard_nativeDestroy<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) {
    devguard_destroy(handle as *mut DevGuardHandle);
}
