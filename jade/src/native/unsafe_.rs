//! The subset of `jdk/internal/misc/Unsafe` that the core library leans on.
//! Addresses are handles into the runtime's [`MemoryBlocks`]. Offsets into objects are field
//! offsets for instances and byte offsets into the elements for arrays, with arrays starting
//! at offset zero.

use jade_base::descriptor::PrimitiveType;

use crate::{
    eval::{EvalError, NULL_POINTER_EXCEPTION},
    link::LinkError,
    memblock::{MemoryAccessError, MemoryBlocks},
    object::{ArrayElements, ElementKind, Ref, StorageKind},
    rv::RuntimeValue,
    GeneralError,
};

use super::{NativeCall, NativeMethods, NativeResult, ILLEGAL_ARGUMENT_EXCEPTION};

const UNSAFE: &str = "jdk/internal/misc/Unsafe";

/// A type that Unsafe can read and write
trait Access {
    /// As it appears in the method names, `getInt`
    const NAME: &'static str;
    const DESCRIPTOR: &'static str;
    const KIND: StorageKind;

    /// Off-heap access. References can only be stored in objects.
    fn read(memory: &MemoryBlocks, address: i64) -> Option<Result<RuntimeValue, MemoryAccessError>>;

    fn write(
        memory: &MemoryBlocks,
        address: i64,
        value: RuntimeValue,
    ) -> Option<Result<(), MemoryAccessError>>;
}

macro_rules! primitive_access {
    ($access:ident, $name:literal, $desc:literal, $prim:ident, $get:ident, $set:ident, $from:expr, $to:expr) => {
        struct $access;
        impl Access for $access {
            const NAME: &'static str = $name;
            const DESCRIPTOR: &'static str = $desc;
            const KIND: StorageKind = StorageKind::Primitive(PrimitiveType::$prim);

            fn read(
                memory: &MemoryBlocks,
                address: i64,
            ) -> Option<Result<RuntimeValue, MemoryAccessError>> {
                Some(memory.$get(address).map($from))
            }

            fn write(
                memory: &MemoryBlocks,
                address: i64,
                value: RuntimeValue,
            ) -> Option<Result<(), MemoryAccessError>> {
                let raw = ($to)(value.narrow_to(PrimitiveType::$prim))?;
                Some(memory.$set(address, raw))
            }
        }
    };
}

primitive_access!(
    ByteAccess, "Byte", "B", Byte, get_i8_ne, set_i8_ne,
    |v| RuntimeValue::Int(i32::from(v)),
    |v: RuntimeValue| v.into_int().map(|v| v as i8)
);
primitive_access!(
    BooleanAccess, "Boolean", "Z", Boolean, get_i8_ne, set_i8_ne,
    |v: i8| RuntimeValue::Int(i32::from(v != 0)),
    |v: RuntimeValue| v.into_int().map(|v| v as i8)
);
primitive_access!(
    ShortAccess, "Short", "S", Short, get_i16_ne, set_i16_ne,
    |v| RuntimeValue::Int(i32::from(v)),
    |v: RuntimeValue| v.into_int().map(|v| v as i16)
);
primitive_access!(
    CharAccess, "Char", "C", Char, get_u16_ne, set_u16_ne,
    |v| RuntimeValue::Int(i32::from(v)),
    |v: RuntimeValue| v.into_int().map(|v| v as u16)
);
primitive_access!(
    IntAccess, "Int", "I", Int, get_i32_ne, set_i32_ne,
    RuntimeValue::Int,
    RuntimeValue::into_int
);
primitive_access!(
    LongAccess, "Long", "J", Long, get_i64_ne, set_i64_ne,
    RuntimeValue::Long,
    RuntimeValue::into_long
);
primitive_access!(
    FloatAccess, "Float", "F", Float, get_f32_ne, set_f32_ne,
    RuntimeValue::Float,
    RuntimeValue::into_float
);
primitive_access!(
    DoubleAccess, "Double", "D", Double, get_f64_ne, set_f64_ne,
    RuntimeValue::Double,
    RuntimeValue::into_double
);

struct ReferenceAccess;
impl Access for ReferenceAccess {
    const NAME: &'static str = "Reference";
    const DESCRIPTOR: &'static str = "Ljava/lang/Object;";
    const KIND: StorageKind = StorageKind::Reference;

    fn read(_: &MemoryBlocks, _: i64) -> Option<Result<RuntimeValue, MemoryAccessError>> {
        None
    }

    fn write(_: &MemoryBlocks, _: i64, _: RuntimeValue) -> Option<Result<(), MemoryAccessError>> {
        None
    }
}

pub(super) fn register(natives: &NativeMethods) {
    let key = |rest: &str| format!("{}.{}", UNSAFE, rest);

    natives.register(key("registerNatives()V"), unsafe_register_natives);
    natives.register(key("allocateMemory0(J)J"), unsafe_allocate_memory);
    natives.register(key("reallocateMemory0(JJ)J"), unsafe_reallocate_memory);
    natives.register(key("freeMemory0(J)V"), unsafe_free_memory);
    natives.register(key("setMemory0(Ljava/lang/Object;JJB)V"), unsafe_set_memory);
    natives.register(
        key("copyMemory0(Ljava/lang/Object;JLjava/lang/Object;JJ)V"),
        unsafe_copy_memory,
    );
    natives.register(
        key("objectFieldOffset1(Ljava/lang/Class;Ljava/lang/String;)J"),
        unsafe_object_field_offset,
    );
    natives.register(key("arrayBaseOffset0(Ljava/lang/Class;)I"), unsafe_array_base_offset);
    natives.register(key("arrayIndexScale0(Ljava/lang/Class;)I"), unsafe_array_index_scale);
    natives.register(key("compareAndSetInt(Ljava/lang/Object;JII)Z"), unsafe_cas_int);
    natives.register(key("compareAndSetLong(Ljava/lang/Object;JJJ)Z"), unsafe_cas_long);
    natives.register(
        key("compareAndSetReference(Ljava/lang/Object;JLjava/lang/Object;Ljava/lang/Object;)Z"),
        unsafe_cas_reference,
    );

    register_access::<ByteAccess>(natives);
    register_access::<BooleanAccess>(natives);
    register_access::<ShortAccess>(natives);
    register_access::<CharAccess>(natives);
    register_access::<IntAccess>(natives);
    register_access::<LongAccess>(natives);
    register_access::<FloatAccess>(natives);
    register_access::<DoubleAccess>(natives);
    register_access::<ReferenceAccess>(natives);
}

/// The getters and setters for one type, by object and offset (plain and volatile) and by
/// address
fn register_access<A: Access>(natives: &NativeMethods) {
    let (name, desc) = (A::NAME, A::DESCRIPTOR);
    for suffix in ["", "Volatile"] {
        natives.register(
            format!("{}.get{}{}(Ljava/lang/Object;J){}", UNSAFE, name, suffix, desc),
            unsafe_get::<A>,
        );
        natives.register(
            format!("{}.put{}{}(Ljava/lang/Object;J{})V", UNSAFE, name, suffix, desc),
            unsafe_put::<A>,
        );
    }

    if A::KIND != StorageKind::Reference {
        natives.register(
            format!("{}.get{}(J){}", UNSAFE, name, desc),
            unsafe_get_address::<A>,
        );
        natives.register(
            format!("{}.put{}(J{})V", UNSAFE, name, desc),
            unsafe_put_address::<A>,
        );
    }
}

fn unsafe_register_natives(call: NativeCall<'_>) -> NativeResult {
    call.ret_void()
}

fn unsafe_allocate_memory(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let size = call.long_arg()?;
    let size = match u64::try_from(size) {
        Ok(size) => size,
        Err(_) => return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("negative size")),
    };

    let address = call.thread.runtime().memory().allocate(size)?;
    call.ret(address)
}

fn unsafe_reallocate_memory(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let address = call.long_arg()?;
    let size = call.long_arg()?;
    let size = match u64::try_from(size) {
        Ok(size) => size,
        Err(_) => return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("negative size")),
    };

    let memory = call.thread.runtime().memory();
    let address = if address == 0 {
        memory.allocate(size)?
    } else {
        memory.reallocate(address, size)?
    };
    call.ret(address)
}

fn unsafe_free_memory(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let address = call.long_arg()?;
    // Freeing null is allowed
    if address != 0 {
        call.thread.runtime().memory().free(address)?;
    }
    call.ret_void()
}

/// The bytes of a `byte[]`/`boolean[]`, for the memory operations that accept an array base
fn byte_array_range(
    array: &Ref,
    offset: i64,
    count: u64,
) -> Result<std::ops::Range<usize>, GeneralError> {
    let kind = array.with_array(ArrayElements::kind).ok_or(EvalError::ExpectedArray)?;
    if kind != ElementKind::Byte {
        return Err(EvalError::ArrayKindMismatch {
            expected: ElementKind::Byte,
            found: kind,
        }
        .into());
    }

    let len = array.array_len().unwrap_or(0);
    let out_of_bounds = || MemoryAccessError::OutOfBounds {
        address: offset,
        len: count,
    };
    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let count = usize::try_from(count).map_err(|_| out_of_bounds())?;
    match start.checked_add(count) {
        Some(end) if end <= len => Ok(start..end),
        _ => Err(out_of_bounds().into()),
    }
}

fn read_bytes(
    memory: &MemoryBlocks,
    base: Option<&Ref>,
    offset: i64,
    count: u64,
) -> Result<Vec<u8>, GeneralError> {
    match base {
        None => Ok(memory.read_slice(offset, count)?),
        Some(array) => {
            let range = byte_array_range(array, offset, count)?;
            array
                .with_array(|elements| match elements {
                    ArrayElements::Byte(v) => Some(v[range].iter().map(|b| *b as u8).collect::<Vec<u8>>()),
                    _ => None,
                })
                .flatten()
                .ok_or_else(|| EvalError::ExpectedArray.into())
        }
    }
}

fn write_bytes(
    memory: &MemoryBlocks,
    base: Option<&Ref>,
    offset: i64,
    bytes: &[u8],
) -> Result<(), GeneralError> {
    match base {
        None => Ok(memory.write_slice(offset, bytes)?),
        Some(array) => {
            let range = byte_array_range(array, offset, bytes.len() as u64)?;
            array.with_array_mut(|elements| {
                if let ArrayElements::Byte(v) = elements {
                    for (dst, src) in v[range].iter_mut().zip(bytes) {
                        *dst = *src as i8;
                    }
                }
            });
            Ok(())
        }
    }
}

fn unsafe_set_memory(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;
    let count = call.long_arg()?;
    let value = call.int_arg()? as u8;
    let count = match u64::try_from(count) {
        Ok(count) => count,
        Err(_) => return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("negative size")),
    };

    match base {
        None => call.thread.runtime().memory().write_repeat(offset, count, value)?,
        Some(array) => {
            let range = byte_array_range(&array, offset, count)?;
            array.with_array_mut(|elements| {
                if let ArrayElements::Byte(v) = elements {
                    v[range].fill(value as i8);
                }
            });
        }
    }
    call.ret_void()
}

fn unsafe_copy_memory(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let source = call.ref_arg()?;
    let source_offset = call.long_arg()?;
    let destination = call.ref_arg()?;
    let destination_offset = call.long_arg()?;
    let count = call.long_arg()?;
    let count = match u64::try_from(count) {
        Ok(count) => count,
        Err(_) => return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("negative size")),
    };

    let runtime = call.runtime();
    let memory = runtime.memory();
    if source.is_none() && destination.is_none() {
        memory.copy(source_offset, destination_offset, count)?;
    } else {
        let bytes = read_bytes(memory, source.as_ref(), source_offset, count)?;
        write_bytes(memory, destination.as_ref(), destination_offset, &bytes)?;
    }
    call.ret_void()
}

/// The offset of an instance field, found by name on the class or its superclasses
fn unsafe_object_field_offset(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let class = call.ref_arg()?;
    let name = call.ref_arg()?;
    let (class, name) = match (class, name) {
        (Some(class), Some(name)) => (class, name),
        _ => return call.throw(NULL_POINTER_EXCEPTION, None),
    };

    let class = match class.mirror_of() {
        Some(class) => class,
        None => return call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("not a class mirror")),
    };
    let name = call.thread.runtime().string_text(&name).unwrap_or_default();

    let mut current = Some(&class);
    while let Some(search) = current {
        if let Some(field) = search
            .fields()
            .iter()
            .find(|field| field.name() == name && !field.is_static())
        {
            let offset = i64::from(field.offset());
            return call.ret(offset);
        }
        current = search.super_class();
    }

    let err = LinkError::NoSuchField {
        class: class.name().to_owned(),
        name,
        descriptor: String::new(),
    };
    let exc = call.thread.link_exception(err)?;
    Ok(crate::ValueException::Exception(exc))
}

/// The element storage of the array class a mirror stands for
fn mirrored_element_kind(call: &mut NativeCall<'_>) -> Result<Option<ElementKind>, GeneralError> {
    let _this = call.this()?;
    let class = call.ref_arg()?;
    Ok(class
        .and_then(|class| class.mirror_of())
        .and_then(|class| class.array_info().map(|(_, kind)| kind)))
}

fn unsafe_array_base_offset(mut call: NativeCall<'_>) -> NativeResult {
    match mirrored_element_kind(&mut call)? {
        Some(_) => call.ret(0_i32),
        None => call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("not an array class")),
    }
}

fn unsafe_array_index_scale(mut call: NativeCall<'_>) -> NativeResult {
    match mirrored_element_kind(&mut call)? {
        Some(kind) => call.ret(kind.byte_width() as i32),
        None => call.throw(ILLEGAL_ARGUMENT_EXCEPTION, Some("not an array class")),
    }
}

fn unsafe_get<A: Access>(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;

    let value = match base {
        Some(base) => base.get_at(offset, A::KIND)?,
        None => match A::read(call.thread.runtime().memory(), offset) {
            Some(value) => value?,
            None => return call.throw(NULL_POINTER_EXCEPTION, None),
        },
    };
    call.ret(value)
}

fn unsafe_put<A: Access>(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;
    let value = call.next_arg()?;

    match base {
        Some(base) => base.set_at(offset, A::KIND, value)?,
        None => match A::write(call.thread.runtime().memory(), offset, value) {
            Some(result) => result?,
            None => return call.throw(NULL_POINTER_EXCEPTION, None),
        },
    }
    call.ret_void()
}

fn unsafe_get_address<A: Access>(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let address = call.long_arg()?;
    match A::read(call.thread.runtime().memory(), address) {
        Some(value) => call.ret(value?),
        None => call.throw(NULL_POINTER_EXCEPTION, None),
    }
}

fn unsafe_put_address<A: Access>(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let address = call.long_arg()?;
    let value = call.next_arg()?;
    match A::write(call.thread.runtime().memory(), address, value) {
        Some(result) => {
            result?;
            call.ret_void()
        }
        None => call.throw(NULL_POINTER_EXCEPTION, None),
    }
}

fn unsafe_cas_int(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;
    let expected = call.int_arg()?;
    let new = call.int_arg()?;

    let swapped = match base {
        Some(base) => base.compare_and_set_at(
            offset,
            IntAccess::KIND,
            &RuntimeValue::Int(expected),
            RuntimeValue::Int(new),
        )?,
        None => call
            .thread
            .runtime()
            .memory()
            .compare_and_set_i32(offset, expected, new)?,
    };
    call.ret(swapped)
}

fn unsafe_cas_long(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;
    let expected = call.long_arg()?;
    let new = call.long_arg()?;

    let swapped = match base {
        Some(base) => base.compare_and_set_at(
            offset,
            LongAccess::KIND,
            &RuntimeValue::Long(expected),
            RuntimeValue::Long(new),
        )?,
        None => call
            .thread
            .runtime()
            .memory()
            .compare_and_set_i64(offset, expected, new)?,
    };
    call.ret(swapped)
}

fn unsafe_cas_reference(mut call: NativeCall<'_>) -> NativeResult {
    let _this = call.this()?;
    let base = call.ref_arg()?;
    let offset = call.long_arg()?;
    let expected = call.ref_arg()?;
    let new = call.ref_arg()?;

    let base = match base {
        Some(base) => base,
        None => return call.throw(NULL_POINTER_EXCEPTION, None),
    };
    let swapped = base.compare_and_set_at(
        offset,
        StorageKind::Reference,
        &RuntimeValue::Reference(expected),
        RuntimeValue::Reference(new),
    )?;
    call.ret(swapped)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jade_base::{
        class::{ClassFileData, FieldInfo},
        ClassAccessFlags, FieldAccessFlags,
    };

    use crate::{
        class::{Class, ClassMethod},
        eval::{testing, Thread},
        object::{ArrayElements, Ref},
        rv::RuntimeValue,
        Runtime,
    };

    const UNSAFE: &str = "jdk/internal/misc/Unsafe";

    struct Fixture {
        runtime: Arc<Runtime>,
        thread: Thread,
        class: Arc<Class>,
        this: Ref,
    }
    impl Fixture {
        fn new(classes: Vec<ClassFileData>) -> Fixture {
            let runtime = testing::runtime(classes);
            let class = runtime.loader().load_class(UNSAFE).unwrap();
            let this = Ref::new_instance(Arc::clone(&class));
            let thread = runtime.new_thread("main");
            Fixture {
                runtime,
                thread,
                class,
                this,
            }
        }

        fn method(&self, name: &str, descriptor: &str) -> ClassMethod {
            testing::method(&self.class, name, descriptor)
        }

        fn call(&mut self, name: &str, descriptor: &str, args: &[RuntimeValue]) -> Option<RuntimeValue> {
            let method = self.method(name, descriptor);
            let mut all = vec![RuntimeValue::from(self.this.clone())];
            all.extend_from_slice(args);
            testing::returned(self.thread.invoke(&method, &all))
        }
    }

    #[test]
    fn test_off_heap() {
        let mut fixture = Fixture::new(Vec::new());
        let address = fixture
            .call("allocateMemory0", "(J)J", &[RuntimeValue::Long(16)])
            .and_then(RuntimeValue::into_long)
            .unwrap();

        fixture.call("putInt", "(JI)V", &[RuntimeValue::Long(address), RuntimeValue::Int(-5)]);
        assert_eq!(
            fixture.call("getInt", "(J)I", &[RuntimeValue::Long(address)]),
            Some(RuntimeValue::Int(-5))
        );
        assert_eq!(fixture.runtime.memory().get_i32_ne(address).unwrap(), -5);

        let swapped = fixture.call(
            "compareAndSetLong",
            "(Ljava/lang/Object;JJJ)Z",
            &[
                RuntimeValue::NULL,
                RuntimeValue::Long(address + 8),
                RuntimeValue::Long(0),
                RuntimeValue::Long(77),
            ],
        );
        assert_eq!(swapped, Some(RuntimeValue::Int(1)));
        assert_eq!(
            fixture.call(
                "getLongVolatile",
                "(Ljava/lang/Object;J)J",
                &[RuntimeValue::NULL, RuntimeValue::Long(address + 8)]
            ),
            Some(RuntimeValue::Long(77))
        );

        fixture.call(
            "setMemory0",
            "(Ljava/lang/Object;JJB)V",
            &[
                RuntimeValue::NULL,
                RuntimeValue::Long(address),
                RuntimeValue::Long(4),
                RuntimeValue::Int(0),
            ],
        );
        assert_eq!(fixture.runtime.memory().get_i32_ne(address).unwrap(), 0);

        fixture.call("freeMemory0", "(J)V", &[RuntimeValue::Long(address)]);
        assert!(!fixture.runtime.memory().is_live(address));
    }

    #[test]
    fn test_object_offsets() {
        let data = ClassFileData::new(
            "Counter",
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            Some("java/lang/Object"),
        )
        .with_field(FieldInfo::new("count", "I", FieldAccessFlags::PRIVATE).unwrap())
        .with_field(FieldInfo::new("next", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE).unwrap());
        let mut fixture = Fixture::new(vec![data]);

        let counter_class = fixture.runtime.loader().load_class("Counter").unwrap();
        let mirror = fixture.runtime.class_mirror(&counter_class).unwrap();
        let name = fixture.runtime.intern_string("count").unwrap();
        let offset = fixture
            .call(
                "objectFieldOffset1",
                "(Ljava/lang/Class;Ljava/lang/String;)J",
                &[RuntimeValue::from(mirror), RuntimeValue::from(name)],
            )
            .and_then(RuntimeValue::into_long)
            .unwrap();

        let counter = Ref::new_instance(Arc::clone(&counter_class));
        let swapped = fixture.call(
            "compareAndSetInt",
            "(Ljava/lang/Object;JII)Z",
            &[
                RuntimeValue::from(counter.clone()),
                RuntimeValue::Long(offset),
                RuntimeValue::Int(0),
                RuntimeValue::Int(3),
            ],
        );
        assert_eq!(swapped, Some(RuntimeValue::Int(1)));

        let count = counter_class.find_field_in_chain("count", "I").unwrap();
        assert_eq!(counter.get_field(count.field()).unwrap(), RuntimeValue::Int(3));
    }

    #[test]
    fn test_array_access() {
        let mut fixture = Fixture::new(Vec::new());
        let long_array = fixture.runtime.loader().load_class("[J").unwrap();
        let mirror = fixture.runtime.class_mirror(&long_array).unwrap();
        assert_eq!(
            fixture.call(
                "arrayIndexScale0",
                "(Ljava/lang/Class;)I",
                &[RuntimeValue::from(mirror.clone())]
            ),
            Some(RuntimeValue::Int(8))
        );
        assert_eq!(
            fixture.call("arrayBaseOffset0", "(Ljava/lang/Class;)I", &[RuntimeValue::from(mirror)]),
            Some(RuntimeValue::Int(0))
        );

        let array = Ref::new_array(long_array, ArrayElements::Long(vec![1, 2, 3]));
        fixture.call(
            "putLong",
            "(Ljava/lang/Object;JJ)V",
            &[
                RuntimeValue::from(array.clone()),
                RuntimeValue::Long(16),
                RuntimeValue::Long(30),
            ],
        );
        assert_eq!(
            fixture.call(
                "getLong",
                "(Ljava/lang/Object;J)J",
                &[RuntimeValue::from(array), RuntimeValue::Long(16)]
            ),
            Some(RuntimeValue::Long(30))
        );
    }
}
