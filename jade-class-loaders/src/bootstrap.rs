//! The core classes that the runtime itself depends on, built in memory.
//!
//! These are minimal: they carry the fields the runtime reads and writes directly, the native
//! methods it implements, and small constructors. Anything else must come from another source
//! placed before this one.

use jade_base::{
    class::{ClassFileData, FieldInfo, MethodInfo},
    code::CodeInfo,
    constant_pool::{ConstantPool, ConstantPoolError},
    id::ConstantPoolIndex,
    loader::ClassSource,
    package::Packages,
    ClassAccessFlags, FieldAccessFlags, LoadClassFileError, MethodAccessFlags, OBJECT_CLASS_NAME,
};

/// Where bootstrap packages say they come from
pub const BOOTSTRAP_LOCATION: &str = "jade:bootstrap";

const THROWABLE: &str = "java/lang/Throwable";
const STRING: &str = "java/lang/String";
const UNSAFE: &str = "jdk/internal/misc/Unsafe";

/// Throwable classes and their superclass, parents before children
const THROWABLES: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/CloneNotSupportedException", "java/lang/Exception"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    (
        "java/lang/ArrayIndexOutOfBoundsException",
        "java/lang/IndexOutOfBoundsException",
    ),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/ExceptionInInitializerError", "java/lang/LinkageError"),
    ("java/lang/ClassCircularityError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/InstantiationError", "java/lang/IncompatibleClassChangeError"),
];

const OTHER_CLASSES: &[&str] = &[
    OBJECT_CLASS_NAME,
    STRING,
    "java/lang/Class",
    "java/lang/Cloneable",
    "java/io/Serializable",
    "java/lang/System",
    "java/lang/Thread",
    THROWABLE,
    UNSAFE,
];

/// The types that `Unsafe` has getters and setters for, by the name used in its methods
const UNSAFE_ACCESS: &[(&str, &str)] = &[
    ("Byte", "B"),
    ("Boolean", "Z"),
    ("Short", "S"),
    ("Char", "C"),
    ("Int", "I"),
    ("Long", "J"),
    ("Float", "F"),
    ("Double", "D"),
    ("Reference", "Ljava/lang/Object;"),
];

mod op {
    pub const LCONST_0: u8 = 0x09;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ALOAD_1: u8 = 0x2b;
    pub const IF_ACMPNE: u8 = 0xa6;
    pub const IRETURN: u8 = 0xac;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const ARRAYLENGTH: u8 = 0xbe;
}

/// Provides the core classes without reading anything from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct BootstrapClassSource;
impl BootstrapClassSource {
    #[must_use]
    pub fn new() -> BootstrapClassSource {
        BootstrapClassSource
    }

    /// Names of all the classes this source provides
    pub fn class_names() -> impl Iterator<Item = &'static str> {
        OTHER_CLASSES
            .iter()
            .copied()
            .chain(THROWABLES.iter().map(|(name, _)| *name))
    }
}
impl ClassSource for BootstrapClassSource {
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
        if name.is_empty() {
            return Err(LoadClassFileError::EmptyName);
        }

        let data = match name {
            "java/lang/Object" => object_class(),
            "java/lang/String" => string_class(),
            "java/lang/Class" => ClassBuilder::new(name, final_class(), Some(OBJECT_CLASS_NAME))
                .init()?
                .native(
                    "getPrimitiveClass",
                    "(Ljava/lang/String;)Ljava/lang/Class;",
                    MethodAccessFlags::STATIC,
                )?
                .finish(),
            "java/lang/Cloneable" | "java/io/Serializable" => {
                ClassBuilder::new(name, interface(), Some(OBJECT_CLASS_NAME)).finish()
            }
            "java/lang/System" => ClassBuilder::new(name, final_class(), Some(OBJECT_CLASS_NAME))
                .native(
                    "identityHashCode",
                    "(Ljava/lang/Object;)I",
                    MethodAccessFlags::STATIC,
                )?
                .native(
                    "arraycopy",
                    "(Ljava/lang/Object;ILjava/lang/Object;II)V",
                    MethodAccessFlags::STATIC,
                )?
                .finish(),
            "java/lang/Thread" => ClassBuilder::new(name, public_class(), Some(OBJECT_CLASS_NAME))
                .init()?
                .native("sleep", "(J)V", MethodAccessFlags::STATIC)?
                .native("interrupted", "()Z", MethodAccessFlags::STATIC)?
                .native("yield", "()V", MethodAccessFlags::STATIC)?
                .finish(),
            THROWABLE => throwable_class(),
            UNSAFE => unsafe_class(),
            _ => match THROWABLES.iter().find(|(class, _)| *class == name) {
                Some((_, super_class)) => exception_class(name, super_class),
                None => Err(LoadClassFileError::Nonexistent(name.to_owned())),
            },
        }?;

        tracing::trace!("built bootstrap class {}", name);
        Ok(data)
    }

    fn available_packages(&self) -> Packages {
        let mut packages = Packages::new();
        for name in BootstrapClassSource::class_names() {
            packages.add_for_class(name, Some(BOOTSTRAP_LOCATION));
        }
        packages
    }
}

fn public_class() -> ClassAccessFlags {
    ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
}

fn final_class() -> ClassAccessFlags {
    public_class() | ClassAccessFlags::FINAL
}

fn interface() -> ClassAccessFlags {
    ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
}

/// Assembles a class and its constant pool together
struct ClassBuilder {
    data: ClassFileData,
    pool: ConstantPool,
}
impl ClassBuilder {
    fn new(name: &str, access_flags: ClassAccessFlags, super_class: Option<&str>) -> ClassBuilder {
        ClassBuilder {
            data: ClassFileData::new(name, access_flags, super_class),
            pool: ConstantPool::new(),
        }
    }

    fn malformed(&self, reason: impl ToString) -> LoadClassFileError {
        LoadClassFileError::Malformed {
            name: self.data.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn interface(mut self, name: &str) -> ClassBuilder {
        self.data.interfaces.push(name.to_owned());
        self
    }

    fn field(
        mut self,
        name: &str,
        descriptor: &str,
        flags: FieldAccessFlags,
    ) -> Result<ClassBuilder, LoadClassFileError> {
        let field = FieldInfo::new(name, descriptor, flags).map_err(|err| self.malformed(err))?;
        self.data.fields.push(field);
        Ok(self)
    }

    fn native(
        mut self,
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
    ) -> Result<ClassBuilder, LoadClassFileError> {
        let flags = flags | MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE;
        let method =
            MethodInfo::new(name, descriptor, flags, None).map_err(|err| self.malformed(err))?;
        self.data.methods.push(method);
        Ok(self)
    }

    /// Add an instance method with the given code. `code` gets the constant pool to add the
    /// entries it refers to.
    fn method(
        mut self,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: impl FnOnce(&mut ConstantPool) -> Result<Vec<u8>, ConstantPoolError>,
    ) -> Result<ClassBuilder, LoadClassFileError> {
        let bytecode = code(&mut self.pool).map_err(|err| self.malformed(err))?;
        let code = CodeInfo::from_bytecode(max_stack, max_locals, &bytecode, &[], &self.pool)
            .map_err(|err| self.malformed(err))?;
        let method = MethodInfo::new(name, descriptor, MethodAccessFlags::PUBLIC, Some(code))
            .map_err(|err| self.malformed(err))?;
        self.data.methods.push(method);
        Ok(self)
    }

    /// A no-argument constructor that runs the superclass's
    fn init(self) -> Result<ClassBuilder, LoadClassFileError> {
        match self.data.super_class.clone() {
            Some(super_class) => self.method("<init>", "()V", 1, 1, |pool| {
                let [hi, lo] = index_bytes(pool.method_ref(&super_class, "<init>", "()V")?);
                Ok(vec![op::ALOAD_0, op::INVOKESPECIAL, hi, lo, op::RETURN])
            }),
            None => self.method("<init>", "()V", 0, 1, |_| Ok(vec![op::RETURN])),
        }
    }

    fn finish(mut self) -> Result<ClassFileData, LoadClassFileError> {
        self.data.constant_pool = self.pool;
        Ok(self.data)
    }
}

fn index_bytes(index: ConstantPoolIndex) -> [u8; 2] {
    index.get().to_be_bytes()
}

fn object_class() -> Result<ClassFileData, LoadClassFileError> {
    let final_method = MethodAccessFlags::FINAL;
    ClassBuilder::new(OBJECT_CLASS_NAME, public_class(), None)
        .init()?
        .native("hashCode", "()I", MethodAccessFlags::empty())?
        .native("getClass", "()Ljava/lang/Class;", final_method)?
        .native("notify", "()V", final_method)?
        .native("notifyAll", "()V", final_method)?
        .native("wait", "(J)V", final_method)?
        .native("clone", "()Ljava/lang/Object;", MethodAccessFlags::empty())?
        .method("wait", "()V", 3, 1, |pool| {
            let [hi, lo] = index_bytes(pool.method_ref(OBJECT_CLASS_NAME, "wait", "(J)V")?);
            Ok(vec![op::ALOAD_0, op::LCONST_0, op::INVOKEVIRTUAL, hi, lo, op::RETURN])
        })?
        .method("equals", "(Ljava/lang/Object;)Z", 2, 2, |_| {
            Ok(vec![
                op::ALOAD_0,
                op::ALOAD_1,
                // to the `iconst_0` at 7
                op::IF_ACMPNE,
                0x00,
                0x05,
                op::ICONST_1,
                op::IRETURN,
                op::ICONST_0,
                op::IRETURN,
            ])
        })?
        .finish()
}

fn string_class() -> Result<ClassFileData, LoadClassFileError> {
    ClassBuilder::new(STRING, final_class(), Some(OBJECT_CLASS_NAME))
        .interface("java/io/Serializable")
        .field(
            "value",
            "[C",
            FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL,
        )?
        .init()?
        .method("length", "()I", 1, 1, |pool| {
            let [hi, lo] = index_bytes(pool.field_ref(STRING, "value", "[C")?);
            Ok(vec![op::ALOAD_0, op::GETFIELD, hi, lo, op::ARRAYLENGTH, op::IRETURN])
        })?
        .finish()
}

fn throwable_class() -> Result<ClassFileData, LoadClassFileError> {
    ClassBuilder::new(THROWABLE, public_class(), Some(OBJECT_CLASS_NAME))
        .interface("java/io/Serializable")
        .field("detailMessage", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)?
        .field("cause", "Ljava/lang/Throwable;", FieldAccessFlags::PRIVATE)?
        .init()?
        .method("<init>", "(Ljava/lang/String;)V", 2, 2, |pool| {
            let [init_hi, init_lo] =
                index_bytes(pool.method_ref(OBJECT_CLASS_NAME, "<init>", "()V")?);
            let [hi, lo] =
                index_bytes(pool.field_ref(THROWABLE, "detailMessage", "Ljava/lang/String;")?);
            Ok(vec![
                op::ALOAD_0,
                op::INVOKESPECIAL,
                init_hi,
                init_lo,
                op::ALOAD_0,
                op::ALOAD_1,
                op::PUTFIELD,
                hi,
                lo,
                op::RETURN,
            ])
        })?
        .method("getMessage", "()Ljava/lang/String;", 1, 1, |pool| {
            let [hi, lo] =
                index_bytes(pool.field_ref(THROWABLE, "detailMessage", "Ljava/lang/String;")?);
            Ok(vec![op::ALOAD_0, op::GETFIELD, hi, lo, op::ARETURN])
        })?
        .method("getCause", "()Ljava/lang/Throwable;", 1, 1, |pool| {
            let [hi, lo] = index_bytes(pool.field_ref(THROWABLE, "cause", "Ljava/lang/Throwable;")?);
            Ok(vec![op::ALOAD_0, op::GETFIELD, hi, lo, op::ARETURN])
        })?
        .finish()
}

/// A throwable with the usual two constructors, each deferring to its superclass
fn exception_class(name: &str, super_class: &str) -> Result<ClassFileData, LoadClassFileError> {
    ClassBuilder::new(name, public_class(), Some(super_class))
        .init()?
        .method("<init>", "(Ljava/lang/String;)V", 2, 2, |pool| {
            let [hi, lo] =
                index_bytes(pool.method_ref(super_class, "<init>", "(Ljava/lang/String;)V")?);
            Ok(vec![op::ALOAD_0, op::ALOAD_1, op::INVOKESPECIAL, hi, lo, op::RETURN])
        })?
        .finish()
}

fn unsafe_class() -> Result<ClassFileData, LoadClassFileError> {
    let mut builder = ClassBuilder::new(UNSAFE, final_class(), Some(OBJECT_CLASS_NAME))
        .native("registerNatives", "()V", MethodAccessFlags::STATIC)?;

    let none = MethodAccessFlags::empty();
    let methods = [
        ("allocateMemory0", "(J)J"),
        ("reallocateMemory0", "(JJ)J"),
        ("freeMemory0", "(J)V"),
        ("setMemory0", "(Ljava/lang/Object;JJB)V"),
        ("copyMemory0", "(Ljava/lang/Object;JLjava/lang/Object;JJ)V"),
        ("objectFieldOffset1", "(Ljava/lang/Class;Ljava/lang/String;)J"),
        ("arrayBaseOffset0", "(Ljava/lang/Class;)I"),
        ("arrayIndexScale0", "(Ljava/lang/Class;)I"),
        ("compareAndSetInt", "(Ljava/lang/Object;JII)Z"),
        ("compareAndSetLong", "(Ljava/lang/Object;JJJ)Z"),
        (
            "compareAndSetReference",
            "(Ljava/lang/Object;JLjava/lang/Object;Ljava/lang/Object;)Z",
        ),
    ];
    for (name, descriptor) in methods {
        builder = builder.native(name, descriptor, none)?;
    }

    for (name, desc) in UNSAFE_ACCESS {
        for suffix in ["", "Volatile"] {
            builder = builder
                .native(
                    &format!("get{}{}", name, suffix),
                    &format!("(Ljava/lang/Object;J){}", desc),
                    none,
                )?
                .native(
                    &format!("put{}{}", name, suffix),
                    &format!("(Ljava/lang/Object;J{})V", desc),
                    none,
                )?;
        }

        if *name != "Reference" {
            builder = builder
                .native(&format!("get{}", name), &format!("(J){}", desc), none)?
                .native(&format!("put{}", name), &format!("(J{})V", desc), none)?;
        }
    }

    builder.init()?.finish()
}
