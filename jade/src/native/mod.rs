//! Host implementations of `native` methods.
//! Natives are looked up by `class.name(descriptor)`, like `java/lang/Object.hashCode()I`.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::{
    class::ClassMethod,
    eval::{EvalError, Thread},
    object::Ref,
    rv::RuntimeValue,
    GeneralError, Runtime, ValueException,
};

mod object;
mod system;
mod thread;
mod unsafe_;

pub const ILLEGAL_ARGUMENT_EXCEPTION: &str = "java/lang/IllegalArgumentException";
pub const CLONE_NOT_SUPPORTED_EXCEPTION: &str = "java/lang/CloneNotSupportedException";

/// The result of a native: `Value(())` once the return value (if any) has been pushed
pub type NativeResult = Result<ValueException<()>, GeneralError>;

pub type NativeFn = fn(NativeCall<'_>) -> NativeResult;

/// The natives known to a runtime
#[derive(Default)]
pub struct NativeMethods {
    methods: RwLock<IndexMap<String, NativeFn>>,
}
impl NativeMethods {
    /// Register a native under its key. Replaces an earlier registration for the same key.
    pub fn register(&self, key: impl Into<String>, native: NativeFn) {
        let key = key.into();
        let mut methods = self.methods.write();
        if methods.contains_key(&key) {
            tracing::warn!("replacing registered native {}", key);
        }
        methods.insert(key, native);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<NativeFn> {
        self.methods.read().get(key).copied()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.methods.read().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register everything the runtime provides out of the box
pub(crate) fn register_defaults(natives: &NativeMethods) {
    object::register(natives);
    system::register(natives);
    thread::register(natives);
    unsafe_::register(natives);
}

/// An in-progress call of a native.
/// The arguments have already been taken off the caller's stack, receiver first.
pub struct NativeCall<'t> {
    pub thread: &'t mut Thread,
    method: &'t ClassMethod,
    args: smallvec::IntoIter<[RuntimeValue; 6]>,
}
impl<'t> NativeCall<'t> {
    pub(crate) fn new(
        thread: &'t mut Thread,
        method: &'t ClassMethod,
    ) -> Result<NativeCall<'t>, GeneralError> {
        let info = method.method();
        let stack = thread.stack()?;

        let mut args: SmallVec<[RuntimeValue; 6]> = SmallVec::new();
        for param in info.descriptor().parameters().iter().rev() {
            args.push(stack.pop_value(param.value_kind())?);
        }
        if !info.is_static() {
            args.push(RuntimeValue::Reference(stack.pop_ref()?));
        }
        args.reverse();

        Ok(NativeCall {
            thread,
            method,
            args: args.into_iter(),
        })
    }

    #[must_use]
    pub fn method(&self) -> &ClassMethod {
        self.method
    }

    #[must_use]
    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(self.thread.runtime())
    }

    fn mismatch(&self) -> GeneralError {
        EvalError::ArgumentMismatch {
            method: self.method.to_string(),
        }
        .into()
    }

    pub fn next_arg(&mut self) -> Result<RuntimeValue, GeneralError> {
        match self.args.next() {
            Some(arg) => Ok(arg),
            None => Err(self.mismatch()),
        }
    }

    pub fn int_arg(&mut self) -> Result<i32, GeneralError> {
        let arg = self.next_arg()?;
        arg.into_int().ok_or_else(|| self.mismatch())
    }

    pub fn long_arg(&mut self) -> Result<i64, GeneralError> {
        let arg = self.next_arg()?;
        arg.into_long().ok_or_else(|| self.mismatch())
    }

    pub fn float_arg(&mut self) -> Result<f32, GeneralError> {
        let arg = self.next_arg()?;
        arg.into_float().ok_or_else(|| self.mismatch())
    }

    pub fn double_arg(&mut self) -> Result<f64, GeneralError> {
        let arg = self.next_arg()?;
        arg.into_double().ok_or_else(|| self.mismatch())
    }

    /// A reference argument, `None` for null
    pub fn ref_arg(&mut self) -> Result<Option<Ref>, GeneralError> {
        let arg = self.next_arg()?;
        arg.into_reference().ok_or_else(|| self.mismatch())
    }

    /// The receiver of an instance native, which can't be null since it was invoked on it
    pub fn this(&mut self) -> Result<Ref, GeneralError> {
        self.ref_arg()?.ok_or_else(|| self.mismatch())
    }

    /// Finish by pushing the return value, narrowed to the declared return type
    pub fn ret(mut self, value: impl Into<RuntimeValue>) -> NativeResult {
        let value = value.into();
        let value = match self
            .method
            .method()
            .descriptor()
            .return_type()
            .and_then(|ret| ret.as_primitive())
        {
            Some(prim) => value.narrow_to(prim),
            None => value,
        };
        self.thread.stack()?.push_value(value)?;
        Ok(ValueException::Value(()))
    }

    /// Finish a void native
    #[allow(clippy::unused_self)]
    pub fn ret_void(self) -> NativeResult {
        Ok(ValueException::Value(()))
    }

    /// Finish by throwing a new exception of the class
    pub fn throw(mut self, class_name: &str, message: Option<&str>) -> NativeResult {
        self.thread
            .new_exception(class_name, message)
            .map(ValueException::Exception)
    }
}

#[cfg(test)]
mod tests {
    use super::{NativeCall, NativeMethods, NativeResult};

    fn answer(call: NativeCall<'_>) -> NativeResult {
        call.ret(42)
    }

    #[test]
    fn test_registry() {
        let natives = NativeMethods::default();
        assert!(natives.is_empty());

        natives.register("a/B.answer()I", answer);
        assert!(natives.contains("a/B.answer()I"));
        assert!(natives.get("a/B.answer()J").is_none());
        assert_eq!(natives.len(), 1);

        natives.register("a/B.answer()I", answer);
        assert_eq!(natives.len(), 1);
    }

    #[test]
    fn test_defaults() {
        let natives = NativeMethods::default();
        super::register_defaults(&natives);
        for key in [
            "java/lang/Object.hashCode()I",
            "java/lang/Object.getClass()Ljava/lang/Class;",
            "java/lang/Object.wait(J)V",
            "java/lang/System.arraycopy(Ljava/lang/Object;ILjava/lang/Object;II)V",
            "java/lang/Thread.sleep(J)V",
            "jdk/internal/misc/Unsafe.allocateMemory0(J)J",
            "jdk/internal/misc/Unsafe.compareAndSetInt(Ljava/lang/Object;JII)Z",
        ] {
            assert!(natives.contains(key), "{} was not registered", key);
        }
    }
}
