#![warn(clippy::pedantic)]
// The interpreter passes a lot of state around. Grouping it together would be nice for
// readability, but it makes borrowing the frame and the thread at the same time harder.
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]
// Unfortunately, Clippy isn't smart enough to notice if a function call is trivial and so likely
// does not have an issue in being used in this position.
#![allow(clippy::or_fun_call)]
#![allow(clippy::module_name_repetitions)]
// TODO: Re-enabling these (or at least panic docs) would be nice, but they make active development
// harder since they highlight the entire function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Too error prone
#![allow(clippy::similar_names)]
// Annoying. Really shouldn't highlight the entire thing.
#![allow(clippy::unnecessary_wraps)]

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use class::{Class, ClassVariant};
use eval::{EvalError, Thread};
use jade_base::{descriptor::{DescriptorError, PrimitiveType}, ClassAccessFlags};
use link::LinkError;
use loader::ClassLoader;
use memblock::{MemoryAccessError, MemoryAllocError, MemoryBlocks, PinnedBlock};
use native::NativeMethods;
use object::{FieldAccessError, Ref};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

pub mod class;
pub mod eval;
mod formatter;
pub mod link;
pub mod loader;
pub mod memblock;
pub mod monitor;
pub mod native;
pub mod object;
pub mod rv;
pub mod thread;

pub const ENV_TRACING_LEVEL: &str = "JADE_LOG_LEVEL";
pub const DEFAULT_TRACING_LEVEL: tracing::Level = tracing::Level::WARN;
/// 1 GiB
pub const DEFAULT_MAX_ARRAY_BYTES: u64 = 1 << 30;

pub const STRING_CLASS_NAME: &str = "java/lang/String";
pub const CLASS_CLASS_NAME: &str = "java/lang/Class";
pub const THROWABLE_CLASS_NAME: &str = "java/lang/Throwable";

/// The maximum amount of 4 bytes that a stack can occupy.
/// This stores the amount of 4 bytes that can be used since not having
/// a multiple of four is odd, and can be merely rounded.
#[derive(Debug, Clone)]
pub struct MaxStackSize(NonZeroUsize);
impl MaxStackSize {
    #[must_use]
    /// Construct a max stack size with the number of 4 bytes that a stack can occupy
    /// Note: If receiving bytes, then likely dividing by 4 and rounding down will work well.
    pub fn new(entries: NonZeroUsize) -> MaxStackSize {
        MaxStackSize(entries)
    }

    #[must_use]
    /// The maximum amount of 4 bytes that a stack can occupy
    pub fn count(&self) -> NonZeroUsize {
        self.0
    }

    /// Returns the number of bytes that this means
    /// Returns `None` if the resulting multiplication would overflow.
    #[must_use]
    pub fn byte_count(&self) -> Option<NonZeroUsize> {
        self.0.get().checked_mul(4).and_then(NonZeroUsize::new)
    }
}
impl Default for MaxStackSize {
    fn default() -> Self {
        // 1024 * 1024 slots, 4 MiB
        MaxStackSize(NonZeroUsize::new(1024 * 1024).unwrap_or(NonZeroUsize::MIN))
    }
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub tracing_level: tracing::Level,
    /// The maximum amount of 4 bytes that the frames of one thread can occupy
    /// `None`: No limit on stack size. Though, limits caused by implementation
    /// mean that this may not result in all available memory being used.
    /// It is advised to have some form of limit, though.
    pub max_stack_size: Option<MaxStackSize>,
    /// Emit a trace event for every instruction executed
    pub log_instructions: bool,
    /// The most memory that one array creating instruction may reserve, counting every
    /// nested array of a `multianewarray`.
    /// `None`: Only limited by what the allocator can provide.
    pub max_array_bytes: Option<u64>,
}
impl StateConfig {
    #[must_use]
    pub fn new() -> StateConfig {
        let tracing_level = StateConfig::compute_tracing_level();
        StateConfig {
            tracing_level,
            max_stack_size: Some(MaxStackSize::default()),
            log_instructions: false,
            max_array_bytes: Some(DEFAULT_MAX_ARRAY_BYTES),
        }
    }

    #[must_use]
    pub fn compute_tracing_level() -> tracing::Level {
        match std::env::var(ENV_TRACING_LEVEL) {
            Ok(env_log) => StateConfig::parse_tracing_level(&env_log),
            Err(_) => DEFAULT_TRACING_LEVEL,
        }
    }

    fn parse_tracing_level(env_log: &str) -> tracing::Level {
        if env_log.eq_ignore_ascii_case("trace") || env_log == "*" {
            tracing::Level::TRACE
        } else if env_log.eq_ignore_ascii_case("debug") {
            tracing::Level::DEBUG
        } else if env_log.eq_ignore_ascii_case("info") {
            tracing::Level::INFO
        } else if env_log.eq_ignore_ascii_case("warn") {
            tracing::Level::WARN
        } else if env_log.eq_ignore_ascii_case("error") {
            tracing::Level::ERROR
        } else {
            DEFAULT_TRACING_LEVEL
        }
    }
}
impl Default for StateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global subscriber for the runtime's log output.
/// Returns false if one was already installed, which is left alone.
pub fn init_logging(conf: &StateConfig) -> bool {
    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(conf.tracing_level)
        .without_time()
        .event_format(formatter::Formatter)
        .try_init()
        .is_ok()
}

/// Either a value or a thrown guest exception
#[derive(Debug, Clone)]
pub enum ValueException<V> {
    Value(V),
    Exception(Ref),
}
impl<V> ValueException<V> {
    pub fn map<A, F: FnOnce(V) -> A>(self, op: F) -> ValueException<A> {
        match self {
            ValueException::Value(v) => ValueException::Value((op)(v)),
            ValueException::Exception(exc) => ValueException::Exception(exc),
        }
    }

    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self, ValueException::Exception(_))
    }
}

/// State shared by every thread of one runtime
pub struct Runtime {
    conf: StateConfig,
    loader: Arc<dyn ClassLoader>,
    natives: NativeMethods,
    memory: Arc<MemoryBlocks>,
    /// Interned string constants, one instance per distinct text
    strings: Mutex<HashMap<String, Ref>>,
    primitive_classes: [OnceCell<Arc<Class>>; 8],
}
impl Runtime {
    /// Create a runtime with the default natives registered
    #[must_use]
    pub fn new(conf: StateConfig, loader: Arc<dyn ClassLoader>) -> Arc<Runtime> {
        let natives = NativeMethods::default();
        native::register_defaults(&natives);

        Arc::new(Runtime {
            conf,
            loader,
            natives,
            memory: Arc::new(MemoryBlocks::default()),
            strings: Mutex::new(HashMap::new()),
            primitive_classes: Default::default(),
        })
    }

    #[must_use]
    pub fn conf(&self) -> &StateConfig {
        &self.conf
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<dyn ClassLoader> {
        &self.loader
    }

    #[must_use]
    pub fn natives(&self) -> &NativeMethods {
        &self.natives
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryBlocks> {
        &self.memory
    }

    /// Start a new interpreter instance
    #[must_use]
    pub fn new_thread(self: &Arc<Self>, name: &str) -> Thread {
        Thread::new(Arc::clone(self), name)
    }

    /// The pseudo-class for a primitive type, `int.class`.
    /// These are not known to any loader and are shared by the whole runtime.
    #[must_use]
    pub fn primitive_class(&self, prim: PrimitiveType) -> Arc<Class> {
        let index = PrimitiveType::ALL
            .iter()
            .position(|x| *x == prim)
            .unwrap_or_default();
        self.primitive_classes[index]
            .get_or_init(|| {
                Arc::new(Class::new_special(
                    prim.name().to_owned(),
                    ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT,
                    None,
                    Vec::new(),
                    ClassVariant::Primitive(prim),
                ))
            })
            .clone()
    }

    /// The `java/lang/Class` instance standing for the class, made on first request
    pub fn class_mirror(&self, class: &Arc<Class>) -> Result<Ref, GeneralError> {
        class
            .mirror
            .get_or_try_init(|| {
                let class_class = self.loader.load_class(CLASS_CLASS_NAME)?;
                Ok::<_, GeneralError>(Ref::new_mirror(class_class, class))
            })
            .cloned()
    }

    /// Get the interned `java/lang/String` for some text
    pub fn intern_string(&self, text: &str) -> Result<Ref, GeneralError> {
        if let Some(existing) = self.strings.lock().get(text) {
            return Ok(existing.clone());
        }

        let created = self.new_string(text)?;
        // Another thread may have interned it while we were building ours
        let mut strings = self.strings.lock();
        Ok(strings
            .entry(text.to_owned())
            .or_insert(created)
            .clone())
    }

    /// Create a fresh, non-interned, `java/lang/String`
    pub fn new_string(&self, text: &str) -> Result<Ref, GeneralError> {
        let string_class = self.loader.load_class(STRING_CLASS_NAME)?;
        let char_array_class = self.loader.load_class("[C")?;

        let chars = text.encode_utf16().map(|c| c as i16).collect::<Vec<_>>();
        let value = Ref::new_array(char_array_class, object::ArrayElements::Short(chars));

        let string = Ref::new_instance(string_class.clone());
        let field = string_class
            .find_field_in_chain("value", "[C")
            .ok_or_else(|| LinkError::NoSuchField {
                class: STRING_CLASS_NAME.to_owned(),
                name: "value".to_owned(),
                descriptor: "[C".to_owned(),
            })?;
        string.set_field(field.field(), rv::RuntimeValue::Reference(Some(value)))?;
        Ok(string)
    }

    /// Read back the text of a `java/lang/String`
    #[must_use]
    pub fn string_text(&self, string: &Ref) -> Option<String> {
        let field = string.class().find_field_in_chain("value", "[C")?;
        let value = string.get_field(field.field()).ok()?.into_reference()??;
        let chars = value.with_array(|elements| match elements {
            object::ArrayElements::Short(chars) => {
                Some(chars.iter().map(|c| *c as u16).collect::<Vec<_>>())
            }
            _ => None,
        })??;
        String::from_utf16(&chars).ok()
    }

    /// Allocate an off-heap block owned by an object, freed when the object is dropped.
    /// Returns the address of the block.
    pub fn pin_block(&self, owner: &Ref, size: u64) -> Result<i64, GeneralError> {
        let block = PinnedBlock::allocate(Arc::clone(&self.memory), size)?;
        let address = block.address();
        owner.attach_pinned(block);
        Ok(address)
    }
}

#[derive(Debug)]
pub enum GeneralError {
    Eval(EvalError),
    Link(LinkError),
    MemoryAccess(MemoryAccessError),
    MemoryAlloc(MemoryAllocError),
    FieldAccess(FieldAccessError),
    InvalidDescriptor(DescriptorError),
    /// The frames of the thread exceeded the configured maximum stack size
    StackOverflow,
    /// An allocation asked for more memory than the budget or allocator allows
    ResourceExhausted { bytes: u64 },
    /// The thread previously failed in a way that can't be recovered from
    Halted,
    /// A native method was invoked that has no registered implementation
    UnregisteredNative(String),
}
impl From<EvalError> for GeneralError {
    fn from(err: EvalError) -> Self {
        Self::Eval(err)
    }
}
impl From<LinkError> for GeneralError {
    fn from(err: LinkError) -> Self {
        Self::Link(err)
    }
}
impl From<MemoryAccessError> for GeneralError {
    fn from(err: MemoryAccessError) -> Self {
        Self::MemoryAccess(err)
    }
}
impl From<MemoryAllocError> for GeneralError {
    fn from(err: MemoryAllocError) -> Self {
        Self::MemoryAlloc(err)
    }
}
impl From<FieldAccessError> for GeneralError {
    fn from(err: FieldAccessError) -> Self {
        Self::FieldAccess(err)
    }
}
impl From<DescriptorError> for GeneralError {
    fn from(err: DescriptorError) -> Self {
        Self::InvalidDescriptor(err)
    }
}
impl std::fmt::Display for GeneralError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneralError::Eval(err) => write!(f, "{:?}", err),
            GeneralError::Link(err) => write!(f, "{}", err),
            GeneralError::MemoryAccess(err) => write!(f, "{:?}", err),
            GeneralError::MemoryAlloc(err) => write!(f, "{:?}", err),
            GeneralError::FieldAccess(err) => write!(f, "{:?}", err),
            GeneralError::InvalidDescriptor(err) => write!(f, "{}", err),
            GeneralError::StackOverflow => f.write_str("stack overflow"),
            GeneralError::ResourceExhausted { bytes } => {
                write!(f, "could not reserve {} bytes", bytes)
            }
            GeneralError::Halted => f.write_str("thread was halted by an earlier error"),
            GeneralError::UnregisteredNative(name) => {
                write!(f, "no native registered for {}", name)
            }
        }
    }
}
impl std::error::Error for GeneralError {}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::{MaxStackSize, StateConfig, DEFAULT_TRACING_LEVEL};

    #[test]
    fn test_tracing_level() {
        assert_eq!(StateConfig::parse_tracing_level("TRACE"), tracing::Level::TRACE);
        assert_eq!(StateConfig::parse_tracing_level("*"), tracing::Level::TRACE);
        assert_eq!(StateConfig::parse_tracing_level("Info"), tracing::Level::INFO);
        assert_eq!(StateConfig::parse_tracing_level("debug"), tracing::Level::DEBUG);
        assert_eq!(StateConfig::parse_tracing_level("error"), tracing::Level::ERROR);
        assert_eq!(StateConfig::parse_tracing_level("loud"), DEFAULT_TRACING_LEVEL);
    }

    #[test]
    fn test_max_stack_size() {
        let size = MaxStackSize::default();
        assert_eq!(size.count().get(), 1024 * 1024);
        assert_eq!(size.byte_count().map(NonZeroUsize::get), Some(4 * 1024 * 1024));

        let huge = MaxStackSize::new(NonZeroUsize::new(usize::MAX).unwrap());
        assert_eq!(huge.byte_count(), None);
    }
}
