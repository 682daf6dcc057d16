//! Helpers for running hand-assembled bytecode in tests

use std::sync::Arc;

use jade_base::{
    class::{ClassFileData, MethodInfo},
    code::{CodeInfo, RawExceptionEntry},
    constant_pool::ConstantPool,
    descriptor::MethodDescriptor,
    ClassAccessFlags, MethodAccessFlags,
};
use jade_class_loaders::{BootstrapClassSource, MemoryClassSource, MultiClassSource};

use crate::{
    class::{Class, ClassMethod},
    loader::SyncedClassLoader,
    rv::RuntimeValue,
    GeneralError, Runtime, StateConfig,
};

use super::InvokeOutcome;

pub(crate) fn code(
    pool: &ConstantPool,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
    handlers: &[RawExceptionEntry],
) -> CodeInfo {
    CodeInfo::from_bytecode(max_stack, max_locals, bytecode, handlers, pool).unwrap()
}

pub(crate) fn static_method(
    pool: &ConstantPool,
    name: &str,
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
) -> MethodInfo {
    let code = code(pool, max_stack, max_locals, bytecode, &[]);
    MethodInfo::new(
        name,
        descriptor,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        Some(code),
    )
    .unwrap()
}

pub(crate) fn instance_method(
    pool: &ConstantPool,
    name: &str,
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
) -> MethodInfo {
    let code = code(pool, max_stack, max_locals, bytecode, &[]);
    MethodInfo::new(name, descriptor, MethodAccessFlags::PUBLIC, Some(code)).unwrap()
}

/// Look up a method on the class or its supertypes
pub(crate) fn method(class: &Arc<Class>, name: &str, descriptor: &str) -> ClassMethod {
    let descriptor = MethodDescriptor::parse(descriptor).unwrap();
    class.find_method_in_chain(name, &descriptor).unwrap()
}

/// A runtime whose loader knows the given classes and the bootstrap classes
pub(crate) fn runtime(classes: Vec<ClassFileData>) -> Arc<Runtime> {
    let mut conf = StateConfig::new();
    conf.log_instructions = true;
    runtime_with_conf(classes, conf)
}

pub(crate) fn runtime_with_conf(classes: Vec<ClassFileData>, conf: StateConfig) -> Arc<Runtime> {
    let memory = MemoryClassSource::from_classes(classes);
    let source = MultiClassSource::new()
        .with_source(memory)
        .with_source(BootstrapClassSource::new());
    Runtime::new(conf, Arc::new(SyncedClassLoader::new(source)))
}

/// A class `T` that has a single static method `run`
pub(crate) fn static_class(
    pool: ConstantPool,
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
    handlers: &[RawExceptionEntry],
) -> ClassFileData {
    let code = code(&pool, max_stack, max_locals, bytecode, handlers);
    let method = MethodInfo::new(
        "run",
        descriptor,
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        Some(code),
    )
    .unwrap();
    ClassFileData::new(
        "T",
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        Some("java/lang/Object"),
    )
    .with_constant_pool(pool)
    .with_method(method)
}

/// A runtime with the class from [`static_class`]
pub(crate) fn runtime_with_static(
    pool: ConstantPool,
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
    handlers: &[RawExceptionEntry],
) -> (Arc<Runtime>, Arc<Class>) {
    let data = static_class(pool, descriptor, max_stack, max_locals, bytecode, handlers);
    let runtime = runtime(vec![data]);
    let class = runtime.loader().load_class("T").unwrap();
    (runtime, class)
}

/// Run `T.run` on a fresh thread
pub(crate) fn run_static(
    pool: ConstantPool,
    descriptor: &str,
    max_stack: u16,
    max_locals: u16,
    bytecode: &[u8],
    handlers: &[RawExceptionEntry],
    args: &[RuntimeValue],
) -> Result<InvokeOutcome, GeneralError> {
    let (runtime, _) =
        runtime_with_static(pool, descriptor, max_stack, max_locals, bytecode, handlers);
    let mut thread = runtime.new_thread("test");
    let result = thread.invoke_static("T", "run", descriptor, args);
    assert_eq!(thread.depth(), 0, "frames were left behind");
    result
}

/// The value a run returned, failing the test if it threw
pub(crate) fn returned(result: Result<InvokeOutcome, GeneralError>) -> Option<RuntimeValue> {
    match result {
        Ok(InvokeOutcome::Returned(value)) => value,
        Ok(InvokeOutcome::Thrown(exc)) => panic!("unexpected exception {}", exc.class().name()),
        Err(err) => panic!("unexpected error {}", err),
    }
}

/// The class name of the exception a run threw, failing the test if it returned
pub(crate) fn thrown_class(result: Result<InvokeOutcome, GeneralError>) -> String {
    match result {
        Ok(InvokeOutcome::Thrown(exc)) => exc.class().name().to_owned(),
        Ok(InvokeOutcome::Returned(value)) => panic!("expected an exception, got {:?}", value),
        Err(err) => panic!("unexpected error {}", err),
    }
}
