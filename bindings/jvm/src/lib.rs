//! JNI exports for `com.zhuchao.octopus.ipc_otms.IPCClient`.
//!
//! The Java class declares the native methods; this library backs them with
//! a process-wide [`Bridge`] over a [`SocketTransport`] configured from
//! `IPCBRIDGE_*` environment variables. Subscribers are keyed by
//! `System.identityHashCode`; objects whose hashes collide are told apart
//! with `IsSameObject` and get separate slots. They are called through
//! `onIpcNativeResponse(byte, byte, byte[])`.

mod logging;
mod runtime;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use ipcbridge_core::{Bridge, BridgeConfig, SubscriberId};
use ipcbridge_link::{LinkConfig, SocketTransport};
use jni::objects::{JByteArray, JObject, JValue};
use jni::sys::{jbyte, jint};
use jni::JNIEnv;
use tracing::{error, info, warn};

pub use logging::ENV_LOG;
pub use runtime::{JvmRuntime, JvmThread, ReceiverSpec, RECEIVER_METHOD, RECEIVER_SIGNATURE};

type JvmBridge = Bridge<JvmRuntime, SocketTransport>;

static BRIDGE: OnceLock<Arc<JvmBridge>> = OnceLock::new();

// Serializes the lookup and update of a subscriber slot.
static REGISTRATION: Mutex<()> = Mutex::new(());

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error!("panic caught at JNI boundary");
            on_panic
        }
    }
}

/// The process-wide bridge, starting its transport on first use.
fn shared_bridge() -> Option<&'static Arc<JvmBridge>> {
    if let Some(bridge) = BRIDGE.get() {
        return Some(bridge);
    }
    logging::init_logging();

    let config = LinkConfig::from_env();
    let transport = match SocketTransport::start(config) {
        Ok(transport) => transport,
        Err(err) => {
            error!(%err, "cannot start ipc link");
            return None;
        }
    };
    info!(socket = %transport.config().socket_path.display(), "ipc link started");
    // A concurrent first call may win; the losing transport is dropped here.
    let _ = BRIDGE.set(Bridge::new(transport, BridgeConfig::default()));
    BRIDGE.get()
}

/// Identity of the `slot`-th live subscriber with identity hash `hash`.
fn subscriber_id(hash: i32, slot: u32) -> SubscriberId {
    SubscriberId(u64::from(slot) << 32 | u64::from(hash as u32))
}

fn shares_hash(id: SubscriberId, hash: i32) -> bool {
    id.0 as u32 == hash as u32
}

/// Lowest identity for `hash` not in `taken`.
fn free_id(hash: i32, taken: &[SubscriberId]) -> SubscriberId {
    (0..=u32::MAX)
        .map(|slot| subscriber_id(hash, slot))
        .find(|id| !taken.contains(id))
        .unwrap_or(subscriber_id(hash, u32::MAX))
}

/// Payload for an outbound array read: empty for a null array, nothing if
/// the read failed.
fn outbound_payload<E: std::fmt::Display>(read: Option<Result<Vec<u8>, E>>) -> Option<Vec<u8>> {
    match read {
        None => Some(Vec::new()),
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(err)) => {
            warn!(%err, "cannot read message payload; not sent");
            None
        }
    }
}

fn identity_hash(env: &mut JNIEnv<'_>, object: &JObject<'_>) -> Option<i32> {
    let hash = env
        .call_static_method(
            "java/lang/System",
            "identityHashCode",
            "(Ljava/lang/Object;)I",
            &[JValue::Object(object)],
        )
        .and_then(|value| value.i());
    match hash {
        Ok(hash) => Some(hash),
        Err(err) => {
            let _ = env.exception_clear();
            warn!(%err, "cannot compute subscriber identity");
            None
        }
    }
}

/// Identity `object` is currently registered under.
fn registered_id(
    env: &JNIEnv<'_>,
    bridge: &JvmBridge,
    hash: i32,
    object: &JObject<'_>,
) -> Option<SubscriberId> {
    bridge.find_subscriber(|id, stored| {
        shares_hash(id, hash) && env.is_same_object(stored, object).unwrap_or(false)
    })
}

fn payload(env: &mut JNIEnv<'_>, data: &JByteArray<'_>) -> Option<Vec<u8>> {
    let read = (!data.is_null()).then(|| env.convert_byte_array(data));
    if matches!(read, Some(Err(_))) {
        let _ = env.exception_clear();
    }
    outbound_payload(read)
}

#[no_mangle]
pub extern "system" fn Java_com_zhuchao_octopus_ipc_1otms_IPCClient_nativeIpcInitClient<'local>(
    env: JNIEnv<'local>,
    _this: JObject<'local>,
) {
    ffi_boundary((), || {
        let Some(bridge) = shared_bridge() else {
            return;
        };
        match env.get_java_vm() {
            Ok(vm) => {
                if bridge.init(JvmRuntime::new(vm)) {
                    info!("ipc client initialized");
                }
            }
            Err(err) => error!(%err, "cannot obtain JavaVM"),
        }
    });
}

#[no_mangle]
pub extern "system" fn Java_com_zhuchao_octopus_ipc_1otms_IPCClient_nativeIpcRegisterCallback<
    'local,
>(
    mut env: JNIEnv<'local>,
    _this: JObject<'local>,
    client: JObject<'local>,
) {
    ffi_boundary((), || {
        if client.is_null() {
            warn!("null subscriber ignored");
            return;
        }
        let Some(bridge) = shared_bridge() else {
            return;
        };
        let Some(hash) = identity_hash(&mut env, &client) else {
            return;
        };
        let _registration = REGISTRATION.lock().unwrap_or_else(PoisonError::into_inner);
        // Registering the same object again replaces it in its own slot.
        let id = registered_id(&env, bridge, hash, &client)
            .unwrap_or_else(|| free_id(hash, &bridge.subscriber_ids()));
        match env.new_global_ref(&client) {
            Ok(object) => bridge.register_or_log(id, object),
            Err(err) => warn!(subscriber = %id, %err, "cannot pin subscriber"),
        }
    });
}

#[no_mangle]
pub extern "system" fn Java_com_zhuchao_octopus_ipc_1otms_IPCClient_nativeIpcUnregisterCallback<
    'local,
>(
    mut env: JNIEnv<'local>,
    _this: JObject<'local>,
    client: JObject<'local>,
) {
    ffi_boundary((), || {
        if client.is_null() {
            return;
        }
        let Some(bridge) = BRIDGE.get() else {
            return;
        };
        let Some(hash) = identity_hash(&mut env, &client) else {
            return;
        };
        let _registration = REGISTRATION.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = registered_id(&env, bridge, hash, &client) {
            bridge.unregister(id);
        }
    });
}

#[no_mangle]
pub extern "system" fn Java_com_zhuchao_octopus_ipc_1otms_IPCClient_nativeIpcSendMessage<'local>(
    mut env: JNIEnv<'local>,
    _this: JObject<'local>,
    group: jbyte,
    id: jbyte,
    data: JByteArray<'local>,
) {
    ffi_boundary((), || {
        let Some(bytes) = payload(&mut env, &data) else {
            return;
        };
        if let Some(bridge) = shared_bridge() {
            bridge.send(group as u8, id as u8, &bytes);
        }
    });
}

#[no_mangle]
pub extern "system" fn Java_com_zhuchao_octopus_ipc_1otms_IPCClient_nativeIpcSendMessageDelay<
    'local,
>(
    mut env: JNIEnv<'local>,
    _this: JObject<'local>,
    group: jbyte,
    id: jbyte,
    data: JByteArray<'local>,
    delay_ms: jint,
) {
    ffi_boundary((), || {
        let Some(bytes) = payload(&mut env, &data) else {
            return;
        };
        if let Some(bridge) = shared_bridge() {
            bridge.send_delayed_ms(group as u8, id as u8, &bytes, delay_ms);
        }
    });
}
