use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// An index into the nodes of a method's instruction graph.
/// This is not meaningful without the graph it came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeIndex(u32);
impl NodeIndex {
    #[must_use]
    pub fn new(index: u32) -> NodeIndex {
        NodeIndex(index)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        usize_from_u32(self.0)
    }
}
impl Hash for NodeIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl nohash_hasher::IsEnabled for NodeIndex {}
impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 1-based index into a class's constant pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConstantPoolIndex(u16);
impl ConstantPoolIndex {
    #[must_use]
    pub fn new(index: u16) -> ConstantPoolIndex {
        ConstantPoolIndex(index)
    }

    #[must_use]
    pub fn get(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }
}
impl Hash for ConstantPoolIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u16(self.0)
    }
}
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl nohash_hasher::IsEnabled for ConstantPoolIndex {}
impl fmt::Display for ConstantPoolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cp#{}", self.0)
    }
}

pub type LocalVariableIndex = u16;

/// This is an index into the methods of a class
/// This is not meaningful without a class
pub type MethodIndex = u16;

/// This is an index into the fields of a class
pub type FieldIndex = u16;

/// Position of an instruction in the method's raw bytecode
pub type BytecodeOffset = u32;

pub(crate) fn usize_from_u32(v: u32) -> usize {
    v as usize
}
