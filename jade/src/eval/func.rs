use std::sync::Arc;

use jade_base::{id::ConstantPoolIndex, ClassAccessFlags};

use crate::{
    class::{Class, ClassMethod},
    link::{self, InvokeKind, LinkError},
    object::Ref,
    GeneralError, ValueException,
};

use super::{exc_value, Invocation, RunInstArgs, RunInstValue, Thread, NULL_POINTER_EXCEPTION};

/// Start the call, turning what happened into the instruction's result
fn dispatch(thread: &mut Thread, method: &ClassMethod) -> Result<RunInstValue, GeneralError> {
    Ok(match exc_value!(thread.begin_invoke(method)?) {
        Invocation::Frame => RunInstValue::Invoked,
        Invocation::Native => RunInstValue::Continue,
    })
}

/// The receiver of an instance method, which sits below the arguments
fn receiver(thread: &mut Thread, method: &ClassMethod) -> Result<ValueException<Ref>, GeneralError> {
    let depth = method.method().argument_slot_count().saturating_sub(1);
    match thread.stack()?.peek_ref(depth)? {
        Some(receiver) => Ok(ValueException::Value(receiver)),
        None => {
            let message = format!(
                "Cannot invoke \"{}.{}()\" because the receiver is null",
                method.class().name().replace('/', "."),
                method.method().name()
            );
            thread
                .new_exception(NULL_POINTER_EXCEPTION, Some(&message))
                .map(ValueException::Exception)
        }
    }
}

/// Find the method that overrides `resolved` for an instance of `class`.
/// Private and static methods on the way do not override anything.
fn select_override(class: &Arc<Class>, resolved: &ClassMethod) -> ClassMethod {
    let name = resolved.method().name();
    let descriptor = resolved.method().descriptor();

    let mut current = Some(class);
    while let Some(class) = current {
        if let Some(index) = class.find_method(name, descriptor) {
            let found = &class.methods()[index];
            if !found.is_private() && !found.is_static() {
                if let Some(method) = ClassMethod::new(Arc::clone(class), index) {
                    return method;
                }
            }
        }
        current = class.super_class();
    }

    class
        .find_interface_method(name, descriptor)
        .unwrap_or_else(|| resolved.clone())
}

pub(crate) fn invoke_static(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_method(
        &class,
        index,
        thread.runtime().loader().as_ref(),
        InvokeKind::Static,
    );
    let method = exc_value!(thread.resolved(result)?);

    if let Some(exc) = thread.initialize_class(method.class())? {
        return Ok(RunInstValue::Exception(exc));
    }

    dispatch(thread, &method)
}

/// Constructors, private methods, and `super.method()` calls
pub(crate) fn invoke_special(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_method(
        &class,
        index,
        thread.runtime().loader().as_ref(),
        InvokeKind::Special,
    );
    let resolved = exc_value!(thread.resolved(result)?);
    exc_value!(receiver(thread, &resolved)?);

    let target = resolved.class();
    let is_super_call = class.access_flags().contains(ClassAccessFlags::SUPER)
        && resolved.method().name() != "<init>"
        && !target.is_interface()
        && !Arc::ptr_eq(target, &class)
        && class.is_subclass_of(target);
    let method = if is_super_call {
        class
            .super_class()
            .and_then(|sup| sup.find_method_in_chain(resolved.method().name(), resolved.method().descriptor()))
            .unwrap_or(resolved)
    } else {
        resolved
    };

    dispatch(thread, &method)
}

pub(crate) fn invoke_virtual(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_method(
        &class,
        index,
        thread.runtime().loader().as_ref(),
        InvokeKind::Virtual,
    );
    let resolved = exc_value!(thread.resolved(result)?);
    let receiver = exc_value!(receiver(thread, &resolved)?);

    let method = if resolved.method().is_private() {
        resolved
    } else {
        select_override(receiver.class(), &resolved)
    };

    dispatch(thread, &method)
}

pub(crate) fn invoke_interface(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_method(
        &class,
        index,
        thread.runtime().loader().as_ref(),
        InvokeKind::Interface,
    );
    let resolved = exc_value!(thread.resolved(result)?);
    let receiver = exc_value!(receiver(thread, &resolved)?);

    if !resolved.class().is_assignable_from(receiver.class()) {
        let err = LinkError::IncompatibleClassChange {
            class: receiver.class().name().to_owned(),
            reason: format!("does not implement {}", resolved.class().name()),
        };
        let exc = thread.link_exception(err)?;
        return Ok(RunInstValue::Exception(exc));
    }

    let method = select_override(receiver.class(), &resolved);
    dispatch(thread, &method)
}

pub(crate) fn invoke_dynamic(
    RunInstArgs { class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    Err(LinkError::BootstrapMethod {
        class: class.name().to_owned(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use jade_base::{
        class::{ClassFileData, FieldInfo, MethodInfo},
        constant_pool::{ConstantInfo, ConstantPool, DynamicConstant},
        ClassAccessFlags, FieldAccessFlags, MethodAccessFlags,
    };

    use crate::{
        eval::{testing, InvokeOutcome, NULL_POINTER_EXCEPTION},
        link::LinkError,
        native::{NativeCall, NativeResult},
        rv::RuntimeValue,
        GeneralError,
    };

    fn index_bytes(index: jade_base::id::ConstantPoolIndex) -> [u8; 2] {
        index.get().to_be_bytes()
    }

    #[test]
    fn test_simple_invoke() {
        // iconst_1; iconst_2; iadd; ireturn
        let code = [0x04, 0x05, 0x60, 0xac];
        let (runtime, class) = testing::runtime_with_static(
            ConstantPool::new(),
            "()I",
            2,
            0,
            &code,
            &[],
        );
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static(class.name(), "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(3)));
        assert_eq!(thread.depth(), 0);

        // Calling it again on the same thread works the same
        let result = thread.invoke_static(class.name(), "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(3)));
    }

    #[test]
    fn test_static_call_chain() {
        // run(I)I calls twice(I)I: iload_0; invokestatic twice; iconst_1; iadd; ireturn
        let mut pool = ConstantPool::new();
        let twice = pool.method_ref("T", "twice", "(I)I").unwrap();
        let [hi, lo] = index_bytes(twice);
        let run_code = [0x1a, 0xb8, hi, lo, 0x04, 0x60, 0xac];
        // iload_0; iconst_2; imul; ireturn
        let twice_code = [0x1a, 0x05, 0x68, 0xac];

        let data = ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
            .with_constant_pool(pool.clone())
            .with_method(testing::static_method(&pool, "run", "(I)I", 2, 1, &run_code))
            .with_method(testing::static_method(&pool, "twice", "(I)I", 2, 1, &twice_code));
        let runtime = testing::runtime(vec![data]);
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static("T", "run", "(I)I", &[RuntimeValue::Int(20)]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(41)));
        assert_eq!(thread.depth(), 0);
    }

    /// `Base.value()I` returns 1, `Derived` overrides it to return 2
    fn dispatch_classes() -> Vec<ClassFileData> {
        let mut base_pool = ConstantPool::new();
        let object_init = base_pool.method_ref("java/lang/Object", "<init>", "()V").unwrap();
        let [oi_hi, oi_lo] = index_bytes(object_init);
        let base = ClassFileData::new("Base", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
            .with_constant_pool(base_pool.clone())
            // aload_0; invokespecial Object.<init>; return
            .with_method(testing::instance_method(&base_pool, "<init>", "()V", 1, 1, &[0x2a, 0xb7, oi_hi, oi_lo, 0xb1]))
            .with_method(testing::instance_method(&base_pool, "value", "()I", 1, 1, &[0x04, 0xac]));

        let mut derived_pool = ConstantPool::new();
        let base_init = derived_pool.method_ref("Base", "<init>", "()V").unwrap();
        let base_value = derived_pool.method_ref("Base", "value", "()I").unwrap();
        let [bi_hi, bi_lo] = index_bytes(base_init);
        let [bv_hi, bv_lo] = index_bytes(base_value);
        let derived = ClassFileData::new("Derived", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("Base"))
            .with_constant_pool(derived_pool.clone())
            .with_method(testing::instance_method(&derived_pool, "<init>", "()V", 1, 1, &[0x2a, 0xb7, bi_hi, bi_lo, 0xb1]))
            .with_method(testing::instance_method(&derived_pool, "value", "()I", 1, 1, &[0x05, 0xac]))
            // aload_0; invokespecial Base.value; ireturn
            .with_method(testing::instance_method(&derived_pool, "superValue", "()I", 1, 1, &[0x2a, 0xb7, bv_hi, bv_lo, 0xac]));

        vec![base, derived]
    }

    #[test]
    fn test_virtual_dispatch() {
        let mut pool = ConstantPool::new();
        let derived_class = pool.class("Derived").unwrap();
        let derived_init = pool.method_ref("Derived", "<init>", "()V").unwrap();
        let base_value = pool.method_ref("Base", "value", "()I").unwrap();
        let super_value = pool.method_ref("Derived", "superValue", "()I").unwrap();
        let [dc_hi, dc_lo] = index_bytes(derived_class);
        let [di_hi, di_lo] = index_bytes(derived_init);
        let [bv_hi, bv_lo] = index_bytes(base_value);
        let [sv_hi, sv_lo] = index_bytes(super_value);

        // new Derived; dup; invokespecial <init>; astore_0;
        // aload_0; invokevirtual Base.value; bipush 10; imul;
        // aload_0; invokevirtual Derived.superValue; iadd; ireturn
        let code = [
            0xbb, dc_hi, dc_lo, 0x59, 0xb7, di_hi, di_lo, 0x4b, 0x2a, 0xb6, bv_hi, bv_lo, 0x10,
            10, 0x68, 0x2a, 0xb6, sv_hi, sv_lo, 0x60, 0xac,
        ];
        let mut classes = dispatch_classes();
        classes.push(
            ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
                .with_constant_pool(pool.clone())
                .with_method(testing::static_method(&pool, "run", "()I", 2, 1, &code)),
        );
        let runtime = testing::runtime(classes);
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static("T", "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(21)));
    }

    #[test]
    fn test_null_receiver() {
        let mut pool = ConstantPool::new();
        let base_value = pool.method_ref("Base", "value", "()I").unwrap();
        let [hi, lo] = index_bytes(base_value);
        // aconst_null; invokevirtual Base.value; ireturn
        let code = [0x01, 0xb6, hi, lo, 0xac];
        let mut classes = dispatch_classes();
        classes.push(
            ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
                .with_constant_pool(pool.clone())
                .with_method(testing::static_method(&pool, "run", "()I", 1, 0, &code)),
        );
        let runtime = testing::runtime(classes);
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static("T", "run", "()I", &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
    }

    #[test]
    fn test_synchronized_method() {
        // A synchronized static method that checks it holds the class monitor by waiting on it
        // with a zero timeout, which would fail if it did not own it
        let mut pool = ConstantPool::new();
        let this_class = pool.class("T").unwrap();
        let wait = pool.method_ref("java/lang/Object", "wait", "(J)V").unwrap();
        let [tc_hi, tc_lo] = index_bytes(this_class);
        let [w_hi, w_lo] = index_bytes(wait);
        // ldc_w T; lconst_1; invokevirtual Object.wait(J)V; iconst_1; ireturn
        let code = [0x13, tc_hi, tc_lo, 0x0a, 0xb6, w_hi, w_lo, 0x04, 0xac];

        let mut info = testing::static_method(&pool, "run", "()I", 3, 0, &code);
        info.access_flags |= MethodAccessFlags::SYNCHRONIZED;
        let data = ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
            .with_constant_pool(pool.clone())
            .with_method(info);
        let runtime = testing::runtime(vec![data]);
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static("T", "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));

        // The monitor was released on return
        let class = runtime.loader().load_class("T").unwrap();
        let mirror = runtime.class_mirror(&class).unwrap();
        assert!(mirror.monitor().try_lock(thread.id()));
    }

    fn leave_monitor(call: NativeCall<'_>) -> NativeResult {
        let mirror = call.runtime().class_mirror(call.method().class())?;
        assert!(mirror.monitor().unlock(call.thread.id()).is_ok());
        call.ret(7_i32)
    }

    #[test]
    fn test_synchronized_native_left_monitor() {
        let run = MethodInfo::new(
            "run",
            "()I",
            MethodAccessFlags::PUBLIC
                | MethodAccessFlags::STATIC
                | MethodAccessFlags::NATIVE
                | MethodAccessFlags::SYNCHRONIZED,
            None,
        )
        .unwrap();
        let data = ClassFileData::new(
            "T",
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            Some("java/lang/Object"),
        )
        .with_method(run);
        let runtime = testing::runtime(vec![data]);
        runtime.natives().register("T.run()I", leave_monitor);
        let mut thread = runtime.new_thread("main");

        // Releasing the already released monitor is logged rather than failing the call
        for _ in 0..2 {
            let result = thread.invoke_static("T", "run", "()I", &[]);
            assert_eq!(testing::returned(result), Some(RuntimeValue::Int(7)));
            assert!(!thread.is_halted());
        }

        let class = runtime.loader().load_class("T").unwrap();
        let mirror = runtime.class_mirror(&class).unwrap();
        assert_eq!(mirror.monitor().owner(), None);
    }

    #[test]
    fn test_class_init() {
        // static int COUNT; <clinit> sets COUNT = 7, run returns COUNT
        let mut pool = ConstantPool::new();
        let count = pool.field_ref("T", "COUNT", "I").unwrap();
        let [hi, lo] = index_bytes(count);
        let clinit = [0x10, 7, 0xb3, hi, lo, 0xb1];
        let run = [0xb2, hi, lo, 0xac];

        let data = ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
            .with_constant_pool(pool.clone())
            .with_field(FieldInfo::new("COUNT", "I", FieldAccessFlags::STATIC).unwrap())
            .with_method(testing::static_method(&pool, "<clinit>", "()V", 1, 0, &clinit))
            .with_method(testing::static_method(&pool, "run", "()I", 1, 0, &run));
        let runtime = testing::runtime(vec![data]);
        let mut thread = runtime.new_thread("main");
        let result = thread.invoke_static("T", "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(7)));
    }

    #[test]
    fn test_failed_class_init() {
        // <clinit> divides by zero, and later uses see the same error
        let pool = ConstantPool::new();
        let clinit = [0x04, 0x03, 0x6c, 0x57, 0xb1];
        let data = ClassFileData::new("T", ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, Some("java/lang/Object"))
            .with_constant_pool(pool.clone())
            .with_method(testing::static_method(&pool, "<clinit>", "()V", 2, 0, &clinit))
            .with_method(testing::static_method(&pool, "run", "()V", 0, 0, &[0xb1]));
        let runtime = testing::runtime(vec![data]);
        let mut thread = runtime.new_thread("main");

        let first = match thread.invoke_static("T", "run", "()V", &[]) {
            Ok(InvokeOutcome::Thrown(exc)) => exc,
            other => panic!("expected an exception, got {:?}", other),
        };
        assert_eq!(first.class().name(), "java/lang/ExceptionInInitializerError");

        let second = match thread.invoke_static("T", "run", "()V", &[]) {
            Ok(InvokeOutcome::Thrown(exc)) => exc,
            other => panic!("expected an exception, got {:?}", other),
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_invoke_dynamic_halts() {
        let mut pool = ConstantPool::new();
        let name_and_type_index = pool.name_and_type("call", "()V").unwrap();
        let call_site = pool
            .push(ConstantInfo::InvokeDynamic(DynamicConstant {
                bootstrap_method_attr_index: 0,
                name_and_type_index,
            }))
            .unwrap();
        let [hi, lo] = index_bytes(call_site);
        // invokedynamic call()V; return
        let code = [0xba, hi, lo, 0, 0, 0xb1];
        let (runtime, class) = testing::runtime_with_static(pool, "()V", 1, 0, &code, &[]);
        let mut thread = runtime.new_thread("main");

        let result = thread.invoke_static(class.name(), "run", "()V", &[]);
        assert!(matches!(
            result,
            Err(GeneralError::Link(LinkError::BootstrapMethod { class })) if class == "T"
        ));
        assert!(thread.is_halted());
        assert_eq!(thread.depth(), 0);
    }
}
