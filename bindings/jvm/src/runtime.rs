use ipcbridge_core::{ManagedRuntime, ManagedThread, RuntimeError};
use jni::objects::{GlobalRef, JByteArray, JMethodID, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{jbyte, jsize};
use jni::{JNIEnv, JavaVM};
use tracing::debug;

/// Receive method every subscriber class must declare.
pub const RECEIVER_METHOD: &str = "onIpcNativeResponse";
/// JNI signature of [`RECEIVER_METHOD`]: `void (byte group, byte id, byte[] buffer)`.
pub const RECEIVER_SIGNATURE: &str = "(BB[B)V";

/// Which method subscribers are called through.
#[derive(Debug, Clone)]
pub struct ReceiverSpec {
    pub method: String,
}

impl Default for ReceiverSpec {
    fn default() -> Self {
        Self {
            method: RECEIVER_METHOD.to_string(),
        }
    }
}

impl ReceiverSpec {
    /// Always [`RECEIVER_SIGNATURE`]; invocation relies on it.
    pub fn signature(&self) -> &'static str {
        RECEIVER_SIGNATURE
    }
}

/// The JVM that loaded this library.
pub struct JvmRuntime {
    vm: JavaVM,
    receiver: ReceiverSpec,
}

impl JvmRuntime {
    pub fn new(vm: JavaVM) -> Self {
        Self::with_receiver(vm, ReceiverSpec::default())
    }

    pub fn with_receiver(vm: JavaVM, receiver: ReceiverSpec) -> Self {
        Self { vm, receiver }
    }

    pub fn vm(&self) -> &JavaVM {
        &self.vm
    }
}

impl ManagedRuntime for JvmRuntime {
    type Object = GlobalRef;
    type Class = GlobalRef;
    type Method = JMethodID;
    type Buffer = GlobalRef;
    type Thread<'rt> = JvmThread<'rt>;

    fn current_thread(&self) -> Option<JvmThread<'_>> {
        let env = self.vm.get_env().ok()?;
        Some(JvmThread {
            env,
            receiver: &self.receiver,
        })
    }

    fn attach_current_thread(&self) -> Result<JvmThread<'_>, RuntimeError> {
        let env = self
            .vm
            .attach_current_thread_permanently()
            .map_err(|err| RuntimeError::AttachFailed(err.to_string()))?;
        Ok(JvmThread {
            env,
            receiver: &self.receiver,
        })
    }

    fn detach_current_thread(&self) {
        // SAFETY: only called by `ThreadAttachment` after the thread's
        // `JNIEnv` has been dropped, for a thread it attached itself. No
        // local references created on this thread outlive the call.
        unsafe { self.vm.detach_current_thread() };
    }
}

/// A thread attached to the JVM.
pub struct JvmThread<'rt> {
    env: JNIEnv<'rt>,
    receiver: &'rt ReceiverSpec,
}

impl JvmThread<'_> {
    /// Clear a pending Java exception. Returns true if there was one.
    fn clear_exception(&mut self, describe: bool) -> bool {
        if !self.env.exception_check().unwrap_or(false) {
            return false;
        }
        if describe {
            let _ = self.env.exception_describe();
        }
        let _ = self.env.exception_clear();
        true
    }
}

impl ManagedThread<JvmRuntime> for JvmThread<'_> {
    fn resolve_receiver(
        &mut self,
        object: &GlobalRef,
    ) -> Result<(GlobalRef, JMethodID), RuntimeError> {
        let receiver = self.receiver;
        let class = self.env.get_object_class(object.as_obj());
        let resolved = class.and_then(|class| {
            let resolved = self
                .env
                .get_method_id(&class, receiver.method.as_str(), receiver.signature())
                .and_then(|method| Ok((self.env.new_global_ref(&class)?, method)));
            let _ = self.env.delete_local_ref(class);
            resolved
        });

        resolved.map_err(|err| {
            self.clear_exception(false);
            debug!(%err, "receiver lookup failed");
            RuntimeError::MissingReceiver(format!("{}{}", receiver.method, receiver.signature()))
        })
    }

    fn new_buffer(&mut self, len: usize) -> Result<GlobalRef, RuntimeError> {
        let failed = |reason: String| RuntimeError::AllocationFailed { size: len, reason };

        let jlen = jsize::try_from(len).map_err(|_| failed("exceeds jsize".to_string()))?;
        let local = match self.env.new_byte_array(jlen) {
            Ok(local) => local,
            Err(err) => {
                self.clear_exception(false);
                return Err(failed(err.to_string()));
            }
        };
        let global = self.env.new_global_ref(&local);
        let _ = self.env.delete_local_ref(local);
        global.map_err(|err| {
            self.clear_exception(false);
            failed(err.to_string())
        })
    }

    fn write_buffer(&mut self, buffer: &GlobalRef, bytes: &[u8]) -> Result<(), RuntimeError> {
        let array = <&JByteArray>::from(buffer.as_obj());
        // SAFETY: u8 and jbyte (i8) have identical size and alignment.
        let bytes: &[jbyte] =
            unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<jbyte>(), bytes.len()) };
        self.env
            .set_byte_array_region(array, 0, bytes)
            .map_err(|err| {
                self.clear_exception(false);
                RuntimeError::WriteFailed(err.to_string())
            })
    }

    fn invoke(
        &mut self,
        object: &GlobalRef,
        method: JMethodID,
        group: u8,
        id: u8,
        buffer: &GlobalRef,
    ) -> Result<(), RuntimeError> {
        let args = [
            JValue::Byte(group as jbyte).as_jni(),
            JValue::Byte(id as jbyte).as_jni(),
            JValue::Object(buffer.as_obj()).as_jni(),
        ];
        // SAFETY: `method` was resolved on `object`'s class with
        // RECEIVER_SIGNATURE, which `args` and the return type match.
        let result = unsafe {
            self.env.call_method_unchecked(
                object.as_obj(),
                method,
                ReturnType::Primitive(Primitive::Void),
                &args,
            )
        };
        if self.clear_exception(true) {
            return Err(RuntimeError::Invocation(format!(
                "{} threw",
                self.receiver.method
            )));
        }
        result
            .map(|_| ())
            .map_err(|err| RuntimeError::Invocation(err.to_string()))
    }
}
