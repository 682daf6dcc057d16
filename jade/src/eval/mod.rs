use std::sync::Arc;

use jade_base::{
    code::{
        graph::InstNode,
        inst::{ArithOp, Inst},
        op::Opcode,
        ExceptionHandler,
    },
    descriptor::{MethodDescriptor, ValueKind},
    id::{ConstantPoolIndex, LocalVariableIndex, NodeIndex},
};

use crate::{
    class::{Class, ClassMethod, InitState},
    link::LinkError,
    native::NativeCall,
    object::{ElementKind, Ref},
    rv::RuntimeValue,
    thread::{ThreadHandle, ThreadId},
    GeneralError, Runtime, ValueException,
};

use self::frame::{Frame, Locals, Stack};

pub mod control_flow;
pub mod frame;
pub mod func;
pub mod instances;
pub mod operation;
pub mod store_load;
#[cfg(test)]
pub(crate) mod testing;

pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const ARITHMETIC_EXCEPTION: &str = "java/lang/ArithmeticException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str =
    "java/lang/ArrayIndexOutOfBoundsException";
pub const ARRAY_STORE_EXCEPTION: &str = "java/lang/ArrayStoreException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";
pub const ILLEGAL_MONITOR_STATE_EXCEPTION: &str = "java/lang/IllegalMonitorStateException";
pub const INTERRUPTED_EXCEPTION: &str = "java/lang/InterruptedException";
pub const INSTANTIATION_ERROR: &str = "java/lang/InstantiationError";
pub const NO_CLASS_DEF_FOUND_ERROR: &str = "java/lang/NoClassDefFoundError";
pub const EXCEPTION_IN_INITIALIZER_ERROR: &str = "java/lang/ExceptionInInitializerError";
pub const ERROR_CLASS_NAME: &str = "java/lang/Error";

#[derive(Debug, Clone)]
pub enum EvalError {
    /// Expected a value on the operand stack but it was empty
    StackUnderflow,
    /// Pushing would exceed the method's max stack
    OperandStackFull,
    /// The value on top of the stack was not of the kind the instruction works with
    StackKindMismatch { expected: ValueKind },
    /// The operation would separate the two halves of a long or double
    SplitWideValue,
    /// The local variable index is past the frame's max locals
    MissingLocal(LocalVariableIndex),
    /// The local variable did not hold a value of the expected kind
    LocalKindMismatch {
        index: LocalVariableIndex,
        expected: ValueKind,
    },
    /// The program counter pointed at a node that is not in the graph
    MissingInstruction(NodeIndex),
    /// Execution continued past the last instruction of the method
    FellOffEnd,
    /// An operation that works on the current frame ran without one
    NoFrame,
    /// A method that is neither native nor abstract had no code
    MissingCode(String),
    /// `jsr`, `jsr_w` and `ret` are not supported
    UnsupportedInstruction(Opcode),
    /// Expected a reference to an array
    ExpectedArray,
    /// The array's element storage does not fit the instruction
    ArrayKindMismatch {
        expected: ElementKind,
        found: ElementKind,
    },
    /// `athrow` was given something that is not a `Throwable`
    ExpectedThrowable,
    /// The constant pool entry can't be loaded by `ldc`
    InvalidConstant(ConstantPoolIndex),
    /// A non-void method executed a void return
    MissingReturnValue,
    /// The arguments given to an invocation from outside do not fit the method's descriptor
    ArgumentMismatch { method: String },
}

/// How an invocation started from the host finished
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    /// `None` for void methods
    Returned(Option<RuntimeValue>),
    /// An exception propagated out of every frame
    Thrown(Ref),
}

#[derive(Debug, Clone)]
pub enum RunInstValue {
    /// We returned nothing
    ReturnVoid,
    /// We returned with a value
    Return(RuntimeValue),
    /// There was an exception
    Exception(Ref),
    /// Continue executing to the next instruction
    Continue,
    /// Continue executing at a specific instruction
    /// (such as, due to a goto)
    ContinueAt(NodeIndex),
    /// A frame was pushed for a call, which starts running on the next step
    Invoked,
}

/// What [`Thread::begin_invoke`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    /// Pushed a frame for the bytecode of the method
    Frame,
    /// Ran a native to completion on the current frame
    Native,
}

pub struct RunInstArgs<'t> {
    pub thread: &'t mut Thread,
    /// The class of the executing method, whose constant pool the instruction refers to
    pub class: Arc<Class>,
    /// The node being executed
    pub node: NodeIndex,
}

/// Unwrap a [`ValueException`], returning the exception from the instruction
macro_rules! exc_value {
    ($e:expr) => {
        match $e {
            $crate::ValueException::Value(v) => v,
            $crate::ValueException::Exception(exc) => {
                return Ok($crate::eval::RunInstValue::Exception(exc))
            }
        }
    };
}
pub(crate) use exc_value;

/// One interpreter instance.
/// Owns its frames. Everything it shares with other instances is reached through the
/// [`Runtime`].
pub struct Thread {
    runtime: Arc<Runtime>,
    handle: Arc<ThreadHandle>,
    frames: Vec<Frame>,
    /// Sum of the slot costs of the live frames
    used_slots: usize,
    /// Set when an invocation failed with a host error
    halted: bool,
}
impl Thread {
    pub(crate) fn new(runtime: Arc<Runtime>, name: &str) -> Thread {
        Thread {
            runtime,
            handle: Arc::new(ThreadHandle::new(name)),
            frames: Vec::new(),
            used_slots: 0,
            halted: false,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The handle other threads can use to interrupt this one
    #[must_use]
    pub fn handle(&self) -> &Arc<ThreadHandle> {
        &self.handle
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.handle.id()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Number of live frames, including the root frames of invocations in progress
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self) -> Result<&Frame, EvalError> {
        self.frames.last().ok_or(EvalError::NoFrame)
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame, EvalError> {
        self.frames.last_mut().ok_or(EvalError::NoFrame)
    }

    /// The operand stack of the current frame
    pub fn stack(&mut self) -> Result<&mut Stack, EvalError> {
        self.frame_mut().map(|frame| &mut frame.stack)
    }

    pub fn locals(&mut self) -> Result<&mut Locals, EvalError> {
        self.frame_mut().map(|frame| &mut frame.locals)
    }

    /// Run a method to completion.
    /// Static methods have their class initialized first. Instance methods take the receiver
    /// as the first argument.
    /// Host errors halt the thread: every later invocation fails with
    /// [`GeneralError::Halted`].
    pub fn invoke(
        &mut self,
        method: &ClassMethod,
        args: &[RuntimeValue],
    ) -> Result<InvokeOutcome, GeneralError> {
        if self.halted {
            return Err(GeneralError::Halted);
        }

        let result = self.invoke_entry(method, args);
        if let Err(err) = &result {
            tracing::warn!("halting {} after error in {}: {}", self.id(), method, err);
            self.halted = true;
        }
        result
    }

    fn invoke_entry(
        &mut self,
        method: &ClassMethod,
        args: &[RuntimeValue],
    ) -> Result<InvokeOutcome, GeneralError> {
        if method.method().is_static() {
            if let Some(exc) = self.initialize_class(method.class())? {
                return Ok(InvokeOutcome::Thrown(exc));
            }
        }
        self.run_nested(method, args)
    }

    /// Find a static method by name and invoke it
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[RuntimeValue],
    ) -> Result<InvokeOutcome, GeneralError> {
        let class = self.runtime.loader().load_class(class_name)?;
        let no_such_method = || LinkError::NoSuchMethod {
            class: class_name.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        };
        let desc = MethodDescriptor::parse(descriptor)?;
        let method = class
            .find_method(name, &desc)
            .and_then(|index| ClassMethod::new(Arc::clone(&class), index))
            .ok_or_else(no_such_method)?;
        self.invoke(&method, args)
    }

    /// Run a method on top of whatever is already executing, such as a class initializer
    /// triggered by an instruction. Leaves the frames as they were.
    pub(crate) fn run_nested(
        &mut self,
        method: &ClassMethod,
        args: &[RuntimeValue],
    ) -> Result<InvokeOutcome, GeneralError> {
        let base = self.frames.len();
        let result = self.run_from_root(method, args);
        self.unwind_to(base);
        result
    }

    fn run_from_root(
        &mut self,
        method: &ClassMethod,
        args: &[RuntimeValue],
    ) -> Result<InvokeOutcome, GeneralError> {
        let info = method.method();
        let descriptor = info.descriptor();

        let receiver = (!info.is_static()).then(|| ValueKind::Reference);
        let expected = receiver
            .into_iter()
            .chain(descriptor.parameters().iter().map(|x| x.value_kind()));
        if args.len() != descriptor.parameters().len() + receiver.iter().count()
            || !args.iter().zip(expected).all(|(arg, kind)| arg.kind() == kind)
        {
            return Err(EvalError::ArgumentMismatch {
                method: method.to_string(),
            }
            .into());
        }

        // Room for the arguments, and for the return value once they are popped
        let arg_slots = args.iter().map(|x| x.kind().slot_count()).sum::<usize>();
        let mut root = Frame::root(arg_slots.max(2));
        for arg in args {
            root.stack.push_value(arg.clone())?;
        }
        self.used_slots += root.slot_cost();
        self.frames.push(root);
        let root_depth = self.frames.len();

        match self.begin_invoke(method)? {
            ValueException::Value(_) => {}
            ValueException::Exception(exc) => return Ok(InvokeOutcome::Thrown(exc)),
        }

        while self.frames.len() > root_depth {
            if let Some(exc) = self.step()? {
                return Ok(InvokeOutcome::Thrown(exc));
            }
        }

        let value = match descriptor.return_type() {
            Some(ret) => Some(self.stack()?.pop_value(ret.value_kind())?),
            None => None,
        };
        Ok(InvokeOutcome::Returned(value))
    }

    fn pop_frame(&mut self) -> Result<Frame, EvalError> {
        let frame = self.frames.pop().ok_or(EvalError::NoFrame)?;
        self.used_slots = self.used_slots.saturating_sub(frame.slot_cost());
        if let Some(sync) = &frame.sync {
            self.release_sync(sync);
        }
        Ok(frame)
    }

    fn unwind_to(&mut self, base: usize) {
        while self.frames.len() > base {
            if self.pop_frame().is_err() {
                break;
            }
        }
    }

    /// Execute the instruction at the current frame's program counter.
    /// Returns the exception if one propagated out to the nearest root frame.
    fn step(&mut self) -> Result<Option<Ref>, GeneralError> {
        let frame = self.frame()?;
        let method = frame.method().ok_or(EvalError::NoFrame)?;
        let class = Arc::clone(method.class());
        let code = Arc::clone(frame.code().ok_or(EvalError::NoFrame)?);
        let pc = frame.pc();
        let node = code.node(pc).ok_or(EvalError::MissingInstruction(pc))?;

        if self.runtime.conf().log_instructions {
            tracing::trace!("{} @{} {:?}", method, node.offset(), node.inst());
        }

        let args = RunInstArgs {
            thread: self,
            class,
            node: pc,
        };
        match run_inst(node, args)? {
            RunInstValue::Continue => {
                let next = node.next().ok_or(EvalError::FellOffEnd)?;
                self.frame_mut()?.pc = next;
            }
            RunInstValue::ContinueAt(target) => self.frame_mut()?.pc = target,
            RunInstValue::ReturnVoid => self.return_from_frame(None)?,
            RunInstValue::Return(value) => self.return_from_frame(Some(value))?,
            RunInstValue::Exception(exc) => return self.throw(exc),
            RunInstValue::Invoked => {}
        }
        Ok(None)
    }

    fn return_from_frame(&mut self, value: Option<RuntimeValue>) -> Result<(), GeneralError> {
        let frame = self.pop_frame()?;
        let ret = frame
            .method()
            .and_then(|method| method.method().descriptor().return_type().cloned());
        let value = match (value, ret) {
            (Some(value), Some(ret)) => Some(match ret.as_primitive() {
                Some(prim) => value.narrow_to(prim),
                None => value,
            }),
            (None, None) => None,
            (Some(_), None) => {
                if let Some(method) = frame.method() {
                    tracing::warn!("void method {} returned a value, dropping it", method);
                }
                None
            }
            (None, Some(_)) => return Err(EvalError::MissingReturnValue.into()),
        };

        let caller = self.frame_mut()?;
        if let Some(value) = value {
            caller.stack.push_value(value)?;
        }
        // Resume after the invoke instruction
        if let Some(code) = caller.code() {
            let next = code
                .node(caller.pc)
                .and_then(|node| node.next())
                .ok_or(EvalError::FellOffEnd)?;
            caller.pc = next;
        }
        Ok(())
    }

    /// Unwind to the innermost handler for the exception.
    /// Returns it back if it reached a root frame.
    fn throw(&mut self, exc: Ref) -> Result<Option<Ref>, GeneralError> {
        loop {
            if self.frame()?.is_root() {
                return Ok(Some(exc));
            }

            if let Some(handler) = self.find_handler(&exc)? {
                let frame = self.frame_mut()?;
                frame.stack.clear();
                frame.stack.push_ref(Some(exc))?;
                frame.pc = handler;
                return Ok(None);
            }

            let frame = self.pop_frame()?;
            if let Some(method) = frame.method() {
                tracing::debug!("{} unwound from {}", exc.class().name(), method);
            }
        }
    }

    /// The handler of the current frame for an exception thrown at its program counter.
    /// Of the handlers that cover it and catch the exception, the one with the narrowest range
    /// wins, earlier entries winning ties.
    fn find_handler(&self, exc: &Ref) -> Result<Option<NodeIndex>, GeneralError> {
        let frame = self.frame()?;
        let code = match frame.code() {
            Some(code) => code,
            None => return Ok(None),
        };
        let pc = frame.pc();
        let count = code.graph().len();

        let mut best: Option<&ExceptionHandler> = None;
        for handler in code.exception_table() {
            if !handler.covers(pc) {
                continue;
            }

            let catches = match &handler.catch_type {
                None => true,
                Some(name) => match self.runtime.loader().load_class(name) {
                    Ok(catch) => catch.is_assignable_from(exc.class()),
                    Err(err) => {
                        tracing::warn!("could not load catch type {}: {}", name, err);
                        false
                    }
                },
            };
            if catches && best.map_or(true, |best| handler.span(count) < best.span(count)) {
                best = Some(handler);
            }
        }

        Ok(best.map(|handler| handler.handler))
    }

    /// Start a call to the method, whose arguments are on the current frame's stack.
    /// Bytecode methods get a new frame which the caller then steps through, natives are run
    /// right away.
    pub(crate) fn begin_invoke(
        &mut self,
        method: &ClassMethod,
    ) -> Result<ValueException<Invocation>, GeneralError> {
        let info = method.method();
        if info.is_abstract() {
            let err = LinkError::AbstractMethod {
                class: method.class().name().to_owned(),
                name: info.name().to_owned(),
                descriptor: info.descriptor().to_string(),
            };
            return self.link_exception(err).map(ValueException::Exception);
        }

        let arg_slots = info.argument_slot_count();
        let sync = if info.is_synchronized() {
            Some(self.sync_target(method, arg_slots)?)
        } else {
            None
        };

        if info.is_native() {
            return self.invoke_native(method, sync);
        }

        let code = Arc::clone(
            info.code()
                .ok_or_else(|| EvalError::MissingCode(method.to_string()))?,
        );
        let locals_count = usize::from(code.max_locals()).max(arg_slots);
        let cost = locals_count + usize::from(code.max_stack());
        if let Some(max) = &self.runtime.conf().max_stack_size {
            if self.used_slots + cost > max.count().get() {
                return Err(GeneralError::StackOverflow);
            }
        }

        let (raw, refs) = self.stack()?.pop_slots(arg_slots)?;
        let locals = Locals::with_initial(locals_count, raw, refs);
        let mut frame = Frame::new(method.clone(), code, locals);
        if let Some(sync) = sync {
            sync.monitor().lock(self.id());
            frame.sync = Some(sync);
        }

        tracing::info!("invoking {}", method);
        self.used_slots += frame.slot_cost();
        self.frames.push(frame);
        Ok(ValueException::Value(Invocation::Frame))
    }

    /// The object whose monitor a synchronized method holds: the receiver, or the class
    /// mirror for static methods
    fn sync_target(&mut self, method: &ClassMethod, arg_slots: usize) -> Result<Ref, GeneralError> {
        if method.method().is_static() {
            return self.runtime.class_mirror(method.class());
        }

        let receiver = self.stack()?.peek_ref(arg_slots.saturating_sub(1))?;
        receiver.ok_or_else(|| EvalError::StackKindMismatch {
            expected: ValueKind::Reference,
        }
        .into())
    }

    fn invoke_native(
        &mut self,
        method: &ClassMethod,
        sync: Option<Ref>,
    ) -> Result<ValueException<Invocation>, GeneralError> {
        let key = method.native_key();
        let native = self
            .runtime
            .natives()
            .get(&key)
            .ok_or(GeneralError::UnregisteredNative(key))?;

        tracing::info!("invoking native {}", method);
        if let Some(sync) = &sync {
            sync.monitor().lock(self.id());
        }
        let result = NativeCall::new(self, method).and_then(native);
        if let Some(sync) = &sync {
            self.release_sync(sync);
        }

        Ok(result?.map(|_| Invocation::Native))
    }

    /// Leave the monitor entered for a synchronized method
    fn release_sync(&self, sync: &Ref) {
        if sync.monitor().unlock(self.id()).is_err() {
            tracing::warn!(
                "{} no longer held the monitor of its synchronized method",
                self.id()
            );
        }
    }

    /// Run the class initializer if that hasn't been done yet, superclasses first.
    /// Returns the exception if initialization failed now or before.
    pub fn initialize_class(&mut self, class: &Arc<Class>) -> Result<Option<Ref>, GeneralError> {
        let me = self.id();
        {
            let mut state = class.init.lock();
            loop {
                let current = state.clone();
                match current {
                    InitState::Initialized => return Ok(None),
                    // Recursive request while running the initializer
                    InitState::InProgress(owner) if owner == me => return Ok(None),
                    InitState::InProgress(_) => class.init_done.wait(&mut state),
                    InitState::Erroneous(exc) => {
                        drop(state);
                        return match exc {
                            Some(exc) => Ok(Some(exc)),
                            None => {
                                let message = format!("Could not initialize class {}", class.name());
                                self.new_exception(NO_CLASS_DEF_FOUND_ERROR, Some(&message))
                                    .map(Some)
                            }
                        };
                    }
                    InitState::Uninitialized => break,
                }
            }
            *state = InitState::InProgress(me);
        }

        let result = self.run_initializer(class);
        let state = match &result {
            Ok(None) => InitState::Initialized,
            Ok(Some(exc)) => InitState::Erroneous(Some(exc.clone())),
            Err(_) => InitState::Erroneous(None),
        };
        *class.init.lock() = state;
        class.init_done.notify_all();
        result
    }

    fn run_initializer(&mut self, class: &Arc<Class>) -> Result<Option<Ref>, GeneralError> {
        if !class.is_interface() {
            if let Some(super_class) = class.super_class() {
                if let Some(exc) = self.initialize_class(super_class)? {
                    return Ok(Some(exc));
                }
            }
        }

        let clinit = class
            .find_method("<clinit>", &MethodDescriptor::new_empty())
            .and_then(|index| ClassMethod::new(Arc::clone(class), index));
        let clinit = match clinit {
            Some(clinit) => clinit,
            None => return Ok(None),
        };

        tracing::debug!("initializing {}", class.name());
        match self.run_nested(&clinit, &[])? {
            InvokeOutcome::Returned(_) => Ok(None),
            InvokeOutcome::Thrown(exc) => self.wrap_initializer_exception(exc).map(Some),
        }
    }

    /// Exceptions that are not errors escaping an initializer become
    /// `ExceptionInInitializerError`, with the original as the cause
    fn wrap_initializer_exception(&mut self, exc: Ref) -> Result<Ref, GeneralError> {
        let loader = Arc::clone(self.runtime.loader());
        let is_error = loader
            .load_class(ERROR_CLASS_NAME)
            .map_or(false, |error| error.is_assignable_from(exc.class()));
        if is_error || loader.load_class(EXCEPTION_IN_INITIALIZER_ERROR).is_err() {
            return Ok(exc);
        }

        let wrapper = self.new_exception(EXCEPTION_IN_INITIALIZER_ERROR, None)?;
        if let Some(cause) = wrapper
            .class()
            .find_field_in_chain("cause", "Ljava/lang/Throwable;")
        {
            wrapper.set_field(cause.field(), RuntimeValue::Reference(Some(exc)))?;
        }
        Ok(wrapper)
    }

    /// Allocate a guest exception and set its message.
    /// No constructor is run.
    pub fn new_exception(&mut self, class_name: &str, message: Option<&str>) -> Result<Ref, GeneralError> {
        let class = self.runtime.loader().load_class(class_name)?;
        let exc = Ref::new_instance(Arc::clone(&class));
        if let Some(message) = message {
            if let Some(field) = class.find_field_in_chain("detailMessage", "Ljava/lang/String;") {
                let text = self.runtime.new_string(message)?;
                exc.set_field(field.field(), RuntimeValue::Reference(Some(text)))?;
            }
        }
        Ok(exc)
    }

    /// Make the exception an instruction raises, in the form [`RunInstValue`] takes
    pub(crate) fn throw_new(
        &mut self,
        class_name: &str,
        message: Option<&str>,
    ) -> Result<RunInstValue, GeneralError> {
        self.new_exception(class_name, message)
            .map(RunInstValue::Exception)
    }

    /// Turn a link error into the guest error it stands for.
    /// Errors without a guest form, or whose guest class can't be loaded, stay host errors.
    pub(crate) fn link_exception(&mut self, err: LinkError) -> Result<Ref, GeneralError> {
        let class_name = match err.guest_exception_class() {
            Some(class_name) => class_name,
            None => return Err(err.into()),
        };
        if self.runtime.loader().load_class(class_name).is_err() {
            return Err(err.into());
        }

        tracing::debug!("raising {} for {}", class_name, err);
        self.new_exception(class_name, Some(&err.to_string()))
    }

    /// Lift a resolution result, turning link errors into guest exceptions where possible
    pub(crate) fn resolved<T>(
        &mut self,
        result: Result<T, LinkError>,
    ) -> Result<ValueException<T>, GeneralError> {
        match result {
            Ok(value) => Ok(ValueException::Value(value)),
            Err(err) => self.link_exception(err).map(ValueException::Exception),
        }
    }
}

fn run_inst(node: &InstNode, args: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    match node.inst() {
        Inst::Nop => Ok(RunInstValue::Continue),
        Inst::AConstNull => store_load::push_const(RuntimeValue::Reference(None), args),
        Inst::IConst(v) => store_load::push_const(RuntimeValue::Int(*v), args),
        Inst::LConst(v) => store_load::push_const(RuntimeValue::Long(*v), args),
        Inst::FConst(v) => store_load::push_const(RuntimeValue::Float(*v), args),
        Inst::DConst(v) => store_load::push_const(RuntimeValue::Double(*v), args),
        Inst::Ldc(index) => store_load::ldc(*index, args),
        Inst::Ldc2(index) => store_load::ldc2(*index, args),
        Inst::Load(kind, index) => store_load::load(*kind, *index, args),
        Inst::Store(kind, index) => store_load::store(*kind, *index, args),
        Inst::IInc { index, amount } => operation::iinc(*index, *amount, args),
        Inst::ArrayLoad(kind) => store_load::array_load(*kind, args),
        Inst::ArrayStore(kind) => store_load::array_store(*kind, args),
        Inst::GetStatic(index) => store_load::get_static(*index, args),
        Inst::PutStatic(index) => store_load::put_static(*index, args),
        Inst::GetField(index) => store_load::get_field(*index, args),
        Inst::PutField(index) => store_load::put_field(*index, args),

        Inst::Pop => operation::discard(1, args),
        Inst::Pop2 => operation::discard(2, args),
        Inst::Dup => operation::dup(1, 0, args),
        Inst::DupX1 => operation::dup(1, 1, args),
        Inst::DupX2 => operation::dup(1, 2, args),
        Inst::Dup2 => operation::dup(2, 0, args),
        Inst::Dup2X1 => operation::dup(2, 1, args),
        Inst::Dup2X2 => operation::dup(2, 2, args),
        Inst::Swap => operation::swap(args),
        Inst::Arith(kind, op) => match (kind, op) {
            (ValueKind::Int, _) => operation::int_arith(*op, args),
            (ValueKind::Long, _) => operation::long_arith(*op, args),
            (ValueKind::Float, ArithOp::Add | ArithOp::Sub | ArithOp::Mul | ArithOp::Div | ArithOp::Rem) => {
                operation::float_arith(*op, args)
            }
            (ValueKind::Double, ArithOp::Add | ArithOp::Sub | ArithOp::Mul | ArithOp::Div | ArithOp::Rem) => {
                operation::double_arith(*op, args)
            }
            _ => Err(EvalError::StackKindMismatch { expected: *kind }.into()),
        },
        Inst::Neg(kind) => operation::neg(*kind, args),
        Inst::Convert { from, to } => operation::convert(*from, *to, args),
        Inst::LCmp => operation::lcmp(args),
        Inst::FCmp { nan_greater } => operation::fcmp(*nan_greater, args),
        Inst::DCmp { nan_greater } => operation::dcmp(*nan_greater, args),

        Inst::If(cond, target) => control_flow::if_zero(*cond, *target, args),
        Inst::IfICmp(cond, target) => control_flow::if_icmp(*cond, *target, args),
        Inst::IfACmp { equal, target } => control_flow::if_acmp(*equal, *target, args),
        Inst::IfNull(target) => control_flow::if_null(true, *target, args),
        Inst::IfNonNull(target) => control_flow::if_null(false, *target, args),
        Inst::Goto(target) => Ok(RunInstValue::ContinueAt(*target)),
        Inst::Jsr(_) | Inst::Ret(_) => Err(EvalError::UnsupportedInstruction(node.opcode()).into()),
        Inst::TableSwitch(table) => control_flow::table_switch(table, args),
        Inst::LookupSwitch(lookup) => control_flow::lookup_switch(lookup, args),
        Inst::Return(kind) => control_flow::ret(*kind, args),
        Inst::AThrow => control_flow::athrow(args),

        Inst::InvokeVirtual(index) => func::invoke_virtual(*index, args),
        Inst::InvokeSpecial(index) => func::invoke_special(*index, args),
        Inst::InvokeStatic(index) => func::invoke_static(*index, args),
        Inst::InvokeInterface { index, .. } => func::invoke_interface(*index, args),
        Inst::InvokeDynamic(_) => func::invoke_dynamic(args),

        Inst::New(index) => instances::new(*index, args),
        Inst::NewArray(prim) => instances::new_array(*prim, args),
        Inst::ANewArray(index) => instances::a_new_array(*index, args),
        Inst::MultiANewArray { index, dimensions } => {
            instances::multi_a_new_array(*index, *dimensions, args)
        }
        Inst::ArrayLength => instances::array_length(args),
        Inst::CheckCast(index) => instances::check_cast(*index, args),
        Inst::InstanceOf(index) => instances::instance_of(*index, args),
        Inst::MonitorEnter => instances::monitor_enter(args),
        Inst::MonitorExit => instances::monitor_exit(args),
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use jade_base::{
        class::ClassFileData, code::RawExceptionEntry, constant_pool::ConstantPool,
        ClassAccessFlags,
    };

    use crate::{rv::RuntimeValue, GeneralError, MaxStackSize, StateConfig};

    use super::{testing, EvalError, NULL_POINTER_EXCEPTION};

    fn index_bytes(index: jade_base::id::ConstantPoolIndex) -> [u8; 2] {
        index.get().to_be_bytes()
    }

    fn handler(start_pc: u32, end_pc: u32, handler_pc: u32, catch_type: u16) -> RawExceptionEntry {
        RawExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        }
    }

    /// Throws a null pointer exception at 1, with a handler returning 1 at 2 and one returning
    /// 2 at 4
    fn handler_code() -> Vec<u8> {
        // aconst_null; athrow; iconst_1; ireturn; iconst_2; ireturn; nop...; iconst_0; ireturn
        let mut code = vec![0x01, 0xbf, 0x04, 0xac, 0x05, 0xac];
        code.resize(20, 0x00);
        code.extend([0x03, 0xac]);
        code
    }

    #[test]
    fn test_narrowest_handler() {
        let mut pool = ConstantPool::new();
        let npe = pool.class(NULL_POINTER_EXCEPTION).unwrap().get();
        let arith = pool.class(super::ARITHMETIC_EXCEPTION).unwrap().get();
        let code = handler_code();

        let handlers = [handler(0, 10, 2, npe), handler(0, 20, 4, 0)];
        let result = testing::run_static(pool.clone(), "()I", 2, 0, &code, &handlers, &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));

        // Order in the table doesn't matter
        let handlers = [handler(0, 20, 4, 0), handler(0, 10, 2, npe)];
        let result = testing::run_static(pool.clone(), "()I", 2, 0, &code, &handlers, &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));

        // The narrow handler doesn't catch it
        let handlers = [handler(0, 10, 2, arith), handler(0, 20, 4, 0)];
        let result = testing::run_static(pool.clone(), "()I", 2, 0, &code, &handlers, &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(2)));

        let handlers = [handler(0, 10, 2, arith)];
        let result = testing::run_static(pool, "()I", 2, 0, &code, &handlers, &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
    }

    #[test]
    fn test_throw_outside_narrow_span() {
        let mut pool = ConstantPool::new();
        let npe = pool.class(NULL_POINTER_EXCEPTION).unwrap().get();
        // goto 14; iconst_1; ireturn; iconst_2; ireturn; nop...; aconst_null; athrow;
        // nop...; iconst_0; ireturn
        let mut code = vec![0xa7, 0x00, 0x0e, 0x04, 0xac, 0x05, 0xac];
        code.resize(14, 0x00);
        code.extend([0x01, 0xbf]);
        code.resize(20, 0x00);
        code.extend([0x03, 0xac]);

        // The athrow at 15 is only inside the second span
        for narrow_type in [npe, 0] {
            let handlers = [handler(0, 10, 3, narrow_type), handler(0, 20, 5, 0)];
            let result = testing::run_static(pool.clone(), "()I", 2, 0, &code, &handlers, &[]);
            assert_eq!(testing::returned(result), Some(RuntimeValue::Int(2)));
        }

        let handlers = [handler(0, 10, 3, 0)];
        let result = testing::run_static(pool, "()I", 2, 0, &code, &handlers, &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
    }

    #[test]
    fn test_exception_unwinds_frames() {
        let mut pool = ConstantPool::new();
        let [hi, lo] = index_bytes(pool.method_ref("T", "fail", "()V").unwrap());
        // invokestatic fail; iconst_0; ireturn; pop; iconst_5; ireturn
        let run = [0xb8, hi, lo, 0x03, 0xac, 0x57, 0x08, 0xac];
        // aconst_null; athrow
        let fail = [0x01, 0xbf];
        let data = ClassFileData::new(
            "T",
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            Some("java/lang/Object"),
        )
        .with_constant_pool(pool.clone())
        .with_method(testing::static_method(&pool, "fail", "()V", 1, 0, &fail));
        let code = testing::code(&pool, 1, 0, &run, &[handler(0, 3, 5, 0)]);
        let run = jade_base::class::MethodInfo::new(
            "run",
            "()I",
            jade_base::MethodAccessFlags::PUBLIC | jade_base::MethodAccessFlags::STATIC,
            Some(code),
        )
        .unwrap();
        let runtime = testing::runtime(vec![data.with_method(run)]);
        let mut thread = runtime.new_thread("main");

        let result = thread.invoke_static("T", "run", "()I", &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(5)));
        assert_eq!(thread.depth(), 0);

        let result = thread.invoke_static("T", "fail", "()V", &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_unsupported_instruction_halts() {
        // jsr +4; return; return
        let code = [0xa8, 0x00, 0x04, 0xb1, 0xb1];
        let (runtime, class) =
            testing::runtime_with_static(ConstantPool::new(), "()V", 1, 0, &code, &[]);
        let mut thread = runtime.new_thread("main");

        let result = thread.invoke_static(class.name(), "run", "()V", &[]);
        assert!(matches!(
            result,
            Err(GeneralError::Eval(EvalError::UnsupportedInstruction(_)))
        ));
        assert!(thread.is_halted());
        assert_eq!(thread.depth(), 0);

        let result = thread.invoke_static(class.name(), "run", "()V", &[]);
        assert!(matches!(result, Err(GeneralError::Halted)));

        // Other threads are unaffected
        let mut other = runtime.new_thread("other");
        assert!(!other.is_halted());
        let object = runtime.loader().load_class("java/lang/Object").unwrap();
        let hash_code = testing::method(&object, "hashCode", "()I");
        let instance = crate::object::Ref::new_instance(object);
        let result = other.invoke(&hash_code, &[RuntimeValue::from(instance.clone())]);
        assert_eq!(
            testing::returned(result),
            Some(RuntimeValue::Int(instance.identity_hash()))
        );
    }

    #[test]
    fn test_stack_overflow() {
        let mut pool = ConstantPool::new();
        let [hi, lo] = index_bytes(pool.method_ref("T", "run", "()V").unwrap());
        // invokestatic run; return
        let code = [0xb8, hi, lo, 0xb1];
        let data = ClassFileData::new(
            "T",
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            Some("java/lang/Object"),
        )
        .with_constant_pool(pool.clone())
        .with_method(testing::static_method(&pool, "run", "()V", 1, 0, &code));

        let mut conf = StateConfig::new();
        conf.max_stack_size = NonZeroUsize::new(256).map(MaxStackSize::new);
        let runtime = testing::runtime_with_conf(vec![data], conf);
        let mut thread = runtime.new_thread("main");

        let result = thread.invoke_static("T", "run", "()V", &[]);
        assert!(matches!(result, Err(GeneralError::StackOverflow)));
        assert!(thread.is_halted());
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_argument_mismatch() {
        // iload_0; ireturn
        let code = [0x1a, 0xac];
        let (runtime, class) =
            testing::runtime_with_static(ConstantPool::new(), "(I)I", 1, 1, &code, &[]);
        let mut thread = runtime.new_thread("main");

        let result = thread.invoke_static(class.name(), "run", "(I)I", &[RuntimeValue::Long(1)]);
        assert!(matches!(
            result,
            Err(GeneralError::Eval(EvalError::ArgumentMismatch { .. }))
        ));
    }
}
