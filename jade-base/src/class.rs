//! The structured form of a class, as handed to the runtime by a class source.

use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    code::CodeInfo,
    constant_pool::ConstantPool,
    descriptor::{DescriptorError, DescriptorType, MethodDescriptor},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        /// Treat superclass methods specially when invoked by `invokespecial`
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: DescriptorType,
    pub access_flags: FieldAccessFlags,
}
impl FieldInfo {
    pub fn new(
        name: impl Into<String>,
        descriptor: &str,
        access_flags: FieldAccessFlags,
    ) -> Result<FieldInfo, DescriptorError> {
        Ok(FieldInfo {
            name: name.into(),
            descriptor: DescriptorType::parse(descriptor)?,
            access_flags,
        })
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    /// Present for methods that are neither native nor abstract
    pub code: Option<Arc<CodeInfo>>,
}
impl MethodInfo {
    pub fn new(
        name: impl Into<String>,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        code: Option<CodeInfo>,
    ) -> Result<MethodInfo, DescriptorError> {
        Ok(MethodInfo {
            name: name.into(),
            descriptor: MethodDescriptor::parse(descriptor)?,
            access_flags,
            code: code.map(Arc::new),
        })
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    #[must_use]
    /// Whether the method should have code or not.
    /// Note that this does not determine if there actually is code, there could be a malformed
    /// class, but it does tell us if there _should_ be.
    pub fn should_have_code(&self) -> bool {
        // native and abstract methods do not have code
        !self.access_flags.contains(MethodAccessFlags::NATIVE)
            && !self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }
}

/// A class as produced by a class source, before it has been linked
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFileData {
    pub name: String,
    pub access_flags: ClassAccessFlags,
    /// `None` only for `java/lang/Object`
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub constant_pool: ConstantPool,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}
impl ClassFileData {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        access_flags: ClassAccessFlags,
        super_class: Option<&str>,
    ) -> ClassFileData {
        ClassFileData {
            name: name.into(),
            access_flags,
            super_class: super_class.map(str::to_owned),
            interfaces: Vec::new(),
            constant_pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_interface(mut self, name: impl Into<String>) -> ClassFileData {
        self.interfaces.push(name.into());
        self
    }

    #[must_use]
    pub fn with_constant_pool(mut self, constant_pool: ConstantPool) -> ClassFileData {
        self.constant_pool = constant_pool;
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldInfo) -> ClassFileData {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: MethodInfo) -> ClassFileData {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// The package the class is in, `java/lang` for `java/lang/Object`
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        crate::util::access_path_initial_part(&self.name)
    }
}
