use std::{sync::Arc, time::Duration};

use jade_base::descriptor::PrimitiveType;

use crate::{
    eval::{ILLEGAL_MONITOR_STATE_EXCEPTION, INTERRUPTED_EXCEPTION, NULL_POINTER_EXCEPTION},
    link::CLONEABLE_CLASS_NAME,
    monitor::MonitorError,
};

use super::{
    NativeCall, NativeMethods, NativeResult, CLONE_NOT_SUPPORTED_EXCEPTION,
    ILLEGAL_ARGUMENT_EXCEPTION,
};

pub(super) fn register(natives: &NativeMethods) {
    natives.register("java/lang/Object.hashCode()I", object_hash_code);
    natives.register("java/lang/Object.getClass()Ljava/lang/Class;", object_get_class);
    natives.register("java/lang/Object.notify()V", object_notify);
    natives.register("java/lang/Object.notifyAll()V", object_notify_all);
    natives.register("java/lang/Object.wait(J)V", object_wait);
    natives.register("java/lang/Object.wait0(J)V", object_wait);
    natives.register("java/lang/Object.clone()Ljava/lang/Object;", object_clone);
    natives.register(
        "java/lang/Class.getPrimitiveClass(Ljava/lang/String;)Ljava/lang/Class;",
        class_get_primitive_class,
    );
}

/// Raise the guest form of a failed monitor operation
pub(super) fn monitor_error(call: NativeCall<'_>, err: MonitorError) -> NativeResult {
    match err {
        MonitorError::NotOwner => call.throw(
            ILLEGAL_MONITOR_STATE_EXCEPTION,
            Some("current thread is not owner"),
        ),
        MonitorError::Interrupted => call.throw(INTERRUPTED_EXCEPTION, None),
    }
}

fn object_hash_code(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    call.ret(this.identity_hash())
}

fn object_get_class(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    let mirror = call.thread.runtime().class_mirror(this.class())?;
    call.ret(mirror)
}

fn object_notify(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    match this.monitor().notify(call.thread.id()) {
        Ok(()) => call.ret_void(),
        Err(err) => monitor_error(call, err),
    }
}

fn object_notify_all(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    match this.monitor().notify_all(call.thread.id()) {
        Ok(()) => call.ret_void(),
        Err(err) => monitor_error(call, err),
    }
}

/// `wait(0)` waits until notified
fn object_wait(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    let millis = call.long_arg()?;
    let millis = match u64::try_from(millis) {
        Ok(millis) => millis,
        Err(_) => {
            return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("timeout value is negative"))
        }
    };
    let timeout = (millis != 0).then(|| Duration::from_millis(millis));

    let handle = Arc::clone(call.thread.handle());
    match this.monitor().wait(&handle, timeout) {
        Ok(()) => call.ret_void(),
        Err(err) => monitor_error(call, err),
    }
}

/// Arrays can always be cloned, other objects only if their class implements `Cloneable`
fn object_clone(mut call: NativeCall<'_>) -> NativeResult {
    let this = call.this()?;
    let cloneable = this.is_array() || {
        let cloneable = call.thread.runtime().loader().load_class(CLONEABLE_CLASS_NAME)?;
        cloneable.is_assignable_from(this.class())
    };

    if cloneable {
        call.ret(this.shallow_clone())
    } else {
        let name = this.class().name().replace('/', ".");
        call.throw(CLONE_NOT_SUPPORTED_EXCEPTION, Some(&name))
    }
}

fn class_get_primitive_class(mut call: NativeCall<'_>) -> NativeResult {
    let name = match call.ref_arg()? {
        Some(name) => name,
        None => return call.throw(NULL_POINTER_EXCEPTION, None),
    };

    let runtime = call.runtime();
    let text = runtime.string_text(&name);
    let prim = text
        .as_deref()
        .and_then(|text| PrimitiveType::ALL.iter().copied().find(|p| p.name() == text));
    match prim {
        Some(prim) => {
            let class = runtime.primitive_class(prim);
            let mirror = runtime.class_mirror(&class)?;
            call.ret(mirror)
        }
        None => call.throw(ILLEGAL_ARGUMENT_EXCEPTION, text.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        eval::{testing, ILLEGAL_MONITOR_STATE_EXCEPTION},
        native::CLONE_NOT_SUPPORTED_EXCEPTION,
        object::{ArrayElements, Ref},
        rv::RuntimeValue,
    };

    #[test]
    fn test_identity() {
        let runtime = testing::runtime(Vec::new());
        let object_class = runtime.loader().load_class("java/lang/Object").unwrap();
        let object = Ref::new_instance(Arc::clone(&object_class));
        let mut thread = runtime.new_thread("main");
        let this = [RuntimeValue::from(object.clone())];

        let hash_code = testing::method(&object_class, "hashCode", "()I");
        let result = thread.invoke(&hash_code, &this);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(object.identity_hash())));

        let get_class = testing::method(&object_class, "getClass", "()Ljava/lang/Class;");
        let first = testing::returned(thread.invoke(&get_class, &this));
        let second = testing::returned(thread.invoke(&get_class, &this));
        assert_eq!(first, second);
        let mirror = first.and_then(RuntimeValue::into_reference).flatten().unwrap();
        assert!(Arc::ptr_eq(&mirror.mirror_of().unwrap(), &object_class));
    }

    #[test]
    fn test_clone() {
        let runtime = testing::runtime(Vec::new());
        let object_class = runtime.loader().load_class("java/lang/Object").unwrap();
        let clone = testing::method(&object_class, "clone", "()Ljava/lang/Object;");
        let mut thread = runtime.new_thread("main");

        let array_class = runtime.loader().load_class("[I").unwrap();
        let array = Ref::new_array(array_class, ArrayElements::Int(vec![1, 2, 3]));
        let copy = testing::returned(thread.invoke(&clone, &[RuntimeValue::from(array.clone())]))
            .and_then(RuntimeValue::into_reference)
            .flatten()
            .unwrap();
        assert_ne!(copy, array);
        array.with_array_mut(|e| assert!(e.splice_from(0, &ArrayElements::Int(vec![9]))));
        assert_eq!(
            copy.with_array(|e| matches!(e, ArrayElements::Int(v) if v == &[1, 2, 3])),
            Some(true)
        );

        let object = Ref::new_instance(object_class);
        let result = thread.invoke(&clone, &[RuntimeValue::from(object)]);
        assert_eq!(testing::thrown_class(result), CLONE_NOT_SUPPORTED_EXCEPTION);
    }

    #[test]
    fn test_monitor_ownership() {
        let runtime = testing::runtime(Vec::new());
        let object_class = runtime.loader().load_class("java/lang/Object").unwrap();
        let object = Ref::new_instance(Arc::clone(&object_class));
        let mut thread = runtime.new_thread("main");
        let this = [RuntimeValue::from(object.clone())];

        let notify = testing::method(&object_class, "notify", "()V");
        let result = thread.invoke(&notify, &this);
        assert_eq!(testing::thrown_class(result), ILLEGAL_MONITOR_STATE_EXCEPTION);

        let wait = testing::method(&object_class, "wait", "(J)V");
        object.monitor().lock(thread.id());
        let result = thread.invoke(&wait, &[RuntimeValue::from(object.clone()), RuntimeValue::Long(1)]);
        assert_eq!(testing::returned(result), None);
        assert!(object.monitor().is_owned_by(thread.id()));
    }

    #[test]
    fn test_primitive_class() {
        let runtime = testing::runtime(Vec::new());
        let class_class = runtime.loader().load_class("java/lang/Class").unwrap();
        let get_primitive = testing::method(
            &class_class,
            "getPrimitiveClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
        );
        let mut thread = runtime.new_thread("main");

        let name = runtime.intern_string("int").unwrap();
        let mirror = testing::returned(thread.invoke(&get_primitive, &[RuntimeValue::from(name)]))
            .and_then(RuntimeValue::into_reference)
            .flatten()
            .unwrap();
        assert_eq!(mirror.mirror_of().unwrap().name(), "int");
    }
}
