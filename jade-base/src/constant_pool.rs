use std::fmt;

use crate::id::ConstantPoolIndex;

pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefConstant {
    pub class_index: ConstantPoolIndex,
    pub name_and_type_index: ConstantPoolIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: ConstantPoolIndex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantInfo {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: ConstantPoolIndex,
    },
    String {
        string_index: ConstantPoolIndex,
    },
    FieldRef(RefConstant),
    MethodRef(RefConstant),
    InterfaceMethodRef(RefConstant),
    NameAndType {
        name_index: ConstantPoolIndex,
        descriptor_index: ConstantPoolIndex,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: ConstantPoolIndex,
    },
    MethodType {
        descriptor_index: ConstantPoolIndex,
    },
    Dynamic(DynamicConstant),
    InvokeDynamic(DynamicConstant),
    Module {
        name_index: ConstantPoolIndex,
    },
    Package {
        name_index: ConstantPoolIndex,
    },
    /// The slot after a long or double entry
    Unusable,
}
impl ConstantInfo {
    /// The tag byte used for this entry in a class file.
    /// `Unusable` has no tag and gets `0`.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            ConstantInfo::Utf8(_) => tag::UTF8,
            ConstantInfo::Integer(_) => tag::INTEGER,
            ConstantInfo::Float(_) => tag::FLOAT,
            ConstantInfo::Long(_) => tag::LONG,
            ConstantInfo::Double(_) => tag::DOUBLE,
            ConstantInfo::Class { .. } => tag::CLASS,
            ConstantInfo::String { .. } => tag::STRING,
            ConstantInfo::FieldRef(_) => tag::FIELD_REF,
            ConstantInfo::MethodRef(_) => tag::METHOD_REF,
            ConstantInfo::InterfaceMethodRef(_) => tag::INTERFACE_METHOD_REF,
            ConstantInfo::NameAndType { .. } => tag::NAME_AND_TYPE,
            ConstantInfo::MethodHandle { .. } => tag::METHOD_HANDLE,
            ConstantInfo::MethodType { .. } => tag::METHOD_TYPE,
            ConstantInfo::Dynamic(_) => tag::DYNAMIC,
            ConstantInfo::InvokeDynamic(_) => tag::INVOKE_DYNAMIC,
            ConstantInfo::Module { .. } => tag::MODULE,
            ConstantInfo::Package { .. } => tag::PACKAGE,
            ConstantInfo::Unusable => 0,
        }
    }

    /// Whether this takes up two indices in the pool
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantInfo::Long(_) | ConstantInfo::Double(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConstantPoolError {
    /// Index zero, past the end, or the unusable slot of a long/double
    InvalidIndex(ConstantPoolIndex),
    /// The entry existed but was not of the kind the caller needed
    UnexpectedTag {
        index: ConstantPoolIndex,
        expected: &'static str,
        found: u8,
    },
    /// The pool can't hold more than `u16::MAX` entries
    Full,
}
impl fmt::Display for ConstantPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantPoolError::InvalidIndex(idx) => write!(f, "invalid constant pool index {}", idx),
            ConstantPoolError::UnexpectedTag {
                index,
                expected,
                found,
            } => write!(
                f,
                "constant pool entry {} was expected to be {} but had tag {}",
                index, expected, found
            ),
            ConstantPoolError::Full => f.write_str("constant pool is full"),
        }
    }
}
impl std::error::Error for ConstantPoolError {}

/// What a field/method reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A field or method reference with its names already looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// A class's constant pool.
/// Entries are indexed from 1, and long/double entries are followed by an unusable slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    /// Index 0 is always [`ConstantInfo::Unusable`]
    entries: Vec<ConstantInfo>,
}
impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}
impl ConstantPool {
    #[must_use]
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![ConstantInfo::Unusable],
        }
    }

    /// Construct the pool from entries that start at index 1.
    /// Long and double entries must already be followed by [`ConstantInfo::Unusable`].
    pub fn from_entries(entries: Vec<ConstantInfo>) -> Result<ConstantPool, ConstantPoolError> {
        if entries.len() >= usize::from(u16::MAX) {
            return Err(ConstantPoolError::Full);
        }

        let mut pool = ConstantPool::new();
        pool.entries.extend(entries);
        Ok(pool)
    }

    /// The number of slots, including the unused zero slot.
    /// This is the `constant_pool_count` of a class file.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantPoolIndex, &ConstantInfo)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, x)| !matches!(x, ConstantInfo::Unusable))
            .filter_map(|(i, x)| Some((ConstantPoolIndex::new(u16::try_from(i).ok()?), x)))
    }

    pub fn get(&self, index: ConstantPoolIndex) -> Result<&ConstantInfo, ConstantPoolError> {
        match self.entries.get(index.as_usize()) {
            None | Some(ConstantInfo::Unusable) => Err(ConstantPoolError::InvalidIndex(index)),
            Some(info) => Ok(info),
        }
    }

    pub fn get_text(&self, index: ConstantPoolIndex) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            ConstantInfo::Utf8(text) => Ok(text.as_str()),
            info => Err(ConstantPoolError::UnexpectedTag {
                index,
                expected: "utf8",
                found: info.tag(),
            }),
        }
    }

    /// Get the name of a `Class` entry
    pub fn get_class_name(&self, index: ConstantPoolIndex) -> Result<&str, ConstantPoolError> {
        match self.get(index)? {
            ConstantInfo::Class { name_index } => self.get_text(*name_index),
            info => Err(ConstantPoolError::UnexpectedTag {
                index,
                expected: "class",
                found: info.tag(),
            }),
        }
    }

    /// Get the (name, descriptor) of a `NameAndType` entry
    pub fn get_name_and_type(
        &self,
        index: ConstantPoolIndex,
    ) -> Result<(&str, &str), ConstantPoolError> {
        match self.get(index)? {
            ConstantInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((
                self.get_text(*name_index)?,
                self.get_text(*descriptor_index)?,
            )),
            info => Err(ConstantPoolError::UnexpectedTag {
                index,
                expected: "name and type",
                found: info.tag(),
            }),
        }
    }

    /// Get a field, method, or interface method reference
    pub fn get_member_ref(&self, index: ConstantPoolIndex) -> Result<MemberRef<'_>, ConstantPoolError> {
        let (kind, r) = match self.get(index)? {
            ConstantInfo::FieldRef(r) => (MemberKind::Field, r),
            ConstantInfo::MethodRef(r) => (MemberKind::Method, r),
            ConstantInfo::InterfaceMethodRef(r) => (MemberKind::InterfaceMethod, r),
            info => {
                return Err(ConstantPoolError::UnexpectedTag {
                    index,
                    expected: "member reference",
                    found: info.tag(),
                })
            }
        };

        let class_name = self.get_class_name(r.class_index)?;
        let (name, descriptor) = self.get_name_and_type(r.name_and_type_index)?;
        Ok(MemberRef {
            kind,
            class_name,
            name,
            descriptor,
        })
    }

    /// Append an entry, returning its index.
    /// Long and double entries get their unusable slot added automatically.
    pub fn push(&mut self, info: ConstantInfo) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let needed = if info.is_wide() { 2 } else { 1 };
        if self.entries.len() + needed > usize::from(u16::MAX) {
            return Err(ConstantPoolError::Full);
        }

        let index = u16::try_from(self.entries.len()).map_err(|_| ConstantPoolError::Full)?;
        let wide = info.is_wide();
        self.entries.push(info);
        if wide {
            self.entries.push(ConstantInfo::Unusable);
        }

        Ok(ConstantPoolIndex::new(index))
    }

    fn find(&self, info: &ConstantInfo) -> Option<ConstantPoolIndex> {
        self.iter().find(|(_, x)| *x == info).map(|(i, _)| i)
    }

    /// Push the entry only if an equal one does not exist already
    pub fn intern(&mut self, info: ConstantInfo) -> Result<ConstantPoolIndex, ConstantPoolError> {
        if let Some(idx) = self.find(&info) {
            Ok(idx)
        } else {
            self.push(info)
        }
    }

    pub fn utf8(&mut self, text: &str) -> Result<ConstantPoolIndex, ConstantPoolError> {
        self.intern(ConstantInfo::Utf8(text.to_owned()))
    }

    pub fn class(&mut self, name: &str) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let name_index = self.utf8(name)?;
        self.intern(ConstantInfo::Class { name_index })
    }

    pub fn string(&mut self, text: &str) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let string_index = self.utf8(text)?;
        self.intern(ConstantInfo::String { string_index })
    }

    pub fn name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(ConstantInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    fn ref_constant(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<RefConstant, ConstantPoolError> {
        Ok(RefConstant {
            class_index: self.class(class)?,
            name_and_type_index: self.name_and_type(name, descriptor)?,
        })
    }

    pub fn field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let r = self.ref_constant(class, name, descriptor)?;
        self.intern(ConstantInfo::FieldRef(r))
    }

    pub fn method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let r = self.ref_constant(class, name, descriptor)?;
        self.intern(ConstantInfo::MethodRef(r))
    }

    pub fn interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<ConstantPoolIndex, ConstantPoolError> {
        let r = self.ref_constant(class, name, descriptor)?;
        self.intern(ConstantInfo::InterfaceMethodRef(r))
    }
}
