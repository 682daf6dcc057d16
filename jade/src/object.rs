//! Heap objects and arrays.
//! Instance fields live in a byte buffer at offsets computed when the class was linked, with a
//! parallel track holding references. Array elements are stored by width, so `int[]` and
//! `float[]` share a representation, as do `char[]`/`short[]` and `long[]`/`double[]`.

use std::{
    collections::TryReserveError,
    fmt,
    mem::size_of,
    ops::{Deref, Range},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Weak,
    },
};

use jade_base::descriptor::{DescriptorType, PrimitiveType, ValueKind};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use usize_cast::{FromUsize, IntoUsize};

use crate::{
    class::{Class, Field},
    memblock::PinnedBlock,
    monitor::Monitor,
    rv::RuntimeValue,
};

static NEXT_IDENTITY_HASH: AtomicU32 = AtomicU32::new(1);

fn next_identity_hash() -> i32 {
    // Scrambled so that consecutive allocations don't get consecutive hashes
    let count = NEXT_IDENTITY_HASH.fetch_add(1, Ordering::Relaxed);
    (count.wrapping_mul(0x9e37_79b9) >> 1) as i32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAccessError {
    /// The access would read past the end of the storage
    OutOfBounds { offset: i64, width: usize },
    /// References must be at a multiple of their width
    Misaligned { offset: i64 },
    /// The value was not of the kind the slot stores
    KindMismatch { expected: ValueKind, found: ValueKind },
    /// Tried to access fields of an array, or elements of an instance
    WrongBody,
}

/// How a value is laid out in field or element storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Primitive(PrimitiveType),
    Reference,
}
impl StorageKind {
    #[must_use]
    pub fn from_descriptor(desc: &DescriptorType) -> StorageKind {
        desc.as_primitive()
            .map_or(StorageKind::Reference, StorageKind::Primitive)
    }

    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            StorageKind::Primitive(prim) => prim.byte_width(),
            StorageKind::Reference => 4,
        }
    }

    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            StorageKind::Primitive(prim) => prim.value_kind(),
            StorageKind::Reference => ValueKind::Reference,
        }
    }
}

/// Turn the sign-extended raw bits of a primitive slot into a value
fn decode_bits(prim: PrimitiveType, raw: i64) -> RuntimeValue {
    match prim {
        PrimitiveType::Boolean | PrimitiveType::Byte => RuntimeValue::Int(i32::from(raw as i8)),
        PrimitiveType::Char => RuntimeValue::Int(i32::from(raw as u16)),
        PrimitiveType::Short => RuntimeValue::Int(i32::from(raw as i16)),
        PrimitiveType::Int => RuntimeValue::Int(raw as i32),
        PrimitiveType::Float => RuntimeValue::Float(f32::from_bits(raw as u32)),
        PrimitiveType::Long => RuntimeValue::Long(raw),
        PrimitiveType::Double => RuntimeValue::Double(f64::from_bits(raw as u64)),
    }
}

/// Turn a value into the raw bits stored for a primitive slot
fn encode_bits(prim: PrimitiveType, value: &RuntimeValue) -> Result<i64, FieldAccessError> {
    let mismatch = || FieldAccessError::KindMismatch {
        expected: prim.value_kind(),
        found: value.kind(),
    };
    Ok(match (prim.value_kind(), value.clone().narrow_to(prim)) {
        (ValueKind::Int, RuntimeValue::Int(v)) => i64::from(v),
        (ValueKind::Float, RuntimeValue::Float(v)) => i64::from(v.to_bits()),
        (ValueKind::Long, RuntimeValue::Long(v)) => v,
        (ValueKind::Double, RuntimeValue::Double(v)) => v.to_bits() as i64,
        _ => return Err(mismatch()),
    })
}

fn read_raw(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => i64::from(i8::from_ne_bytes([bytes[0]])),
        2 => i64::from(i16::from_ne_bytes([bytes[0], bytes[1]])),
        4 => i64::from(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            i64::from_ne_bytes(buf)
        }
    }
}

fn write_raw(bytes: &mut [u8], raw: i64) {
    match bytes.len() {
        1 => bytes.copy_from_slice(&(raw as i8).to_ne_bytes()),
        2 => bytes.copy_from_slice(&(raw as i16).to_ne_bytes()),
        4 => bytes.copy_from_slice(&(raw as i32).to_ne_bytes()),
        _ => bytes[..8].copy_from_slice(&raw.to_ne_bytes()),
    }
}

fn same_reference(a: &Option<Ref>, b: &Option<Ref>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Ref::ptr_eq(a, b),
        _ => false,
    }
}

/// Storage for the fields of an instance, or the static fields of a class
#[derive(Debug, Clone)]
pub struct FieldData {
    bytes: Box<[u8]>,
    /// Indexed by `offset / 4` of reference fields
    refs: Box<[Option<Ref>]>,
}
impl FieldData {
    #[must_use]
    pub fn new(size: u32) -> FieldData {
        let size = size.into_usize();
        FieldData {
            bytes: vec![0; size].into_boxed_slice(),
            refs: vec![None; (size + 3) / 4].into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, offset: i64, width: usize) -> Result<Range<usize>, FieldAccessError> {
        let oob = FieldAccessError::OutOfBounds { offset, width };
        let start = usize::try_from(offset).map_err(|_| oob.clone())?;
        let end = start.checked_add(width).ok_or(oob.clone())?;
        if end > self.bytes.len() {
            return Err(oob);
        }
        Ok(start..end)
    }

    fn ref_index(&self, offset: i64) -> Result<usize, FieldAccessError> {
        let range = self.range(offset, 4)?;
        if range.start % 4 != 0 {
            return Err(FieldAccessError::Misaligned { offset });
        }
        Ok(range.start / 4)
    }

    pub fn get(&self, offset: i64, kind: StorageKind) -> Result<RuntimeValue, FieldAccessError> {
        match kind {
            StorageKind::Reference => {
                let index = self.ref_index(offset)?;
                Ok(RuntimeValue::Reference(self.refs[index].clone()))
            }
            StorageKind::Primitive(prim) => {
                let range = self.range(offset, prim.byte_width())?;
                Ok(decode_bits(prim, read_raw(&self.bytes[range])))
            }
        }
    }

    pub fn set(
        &mut self,
        offset: i64,
        kind: StorageKind,
        value: RuntimeValue,
    ) -> Result<(), FieldAccessError> {
        match kind {
            StorageKind::Reference => {
                let index = self.ref_index(offset)?;
                let found = value.kind();
                let value = value
                    .into_reference()
                    .ok_or(FieldAccessError::KindMismatch {
                        expected: ValueKind::Reference,
                        found,
                    })?;
                self.refs[index] = value;
            }
            StorageKind::Primitive(prim) => {
                let range = self.range(offset, prim.byte_width())?;
                let raw = encode_bits(prim, &value)?;
                write_raw(&mut self.bytes[range], raw);
            }
        }
        Ok(())
    }

    /// Replace the value if the slot currently holds `expected`.
    /// References are compared by identity.
    pub fn compare_and_set(
        &mut self,
        offset: i64,
        kind: StorageKind,
        expected: &RuntimeValue,
        new: RuntimeValue,
    ) -> Result<bool, FieldAccessError> {
        let current = self.get(offset, kind)?;
        let equal = match (&current, expected) {
            (RuntimeValue::Reference(a), RuntimeValue::Reference(b)) => same_reference(a, b),
            (RuntimeValue::Int(a), RuntimeValue::Int(b)) => a == b,
            (RuntimeValue::Long(a), RuntimeValue::Long(b)) => a == b,
            (RuntimeValue::Float(a), RuntimeValue::Float(b)) => a.to_bits() == b.to_bits(),
            (RuntimeValue::Double(a), RuntimeValue::Double(b)) => a.to_bits() == b.to_bits(),
            _ => {
                return Err(FieldAccessError::KindMismatch {
                    expected: current.kind(),
                    found: expected.kind(),
                })
            }
        };

        if equal {
            self.set(offset, kind, new)?;
        }
        Ok(equal)
    }
}

/// The width class of an array's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// `boolean[]` and `byte[]`
    Byte,
    /// `char[]` and `short[]`
    Short,
    /// `int[]` and `float[]`
    Int,
    /// `long[]` and `double[]`
    Long,
    Reference,
}
impl ElementKind {
    #[must_use]
    pub fn from_primitive(prim: PrimitiveType) -> ElementKind {
        match prim {
            PrimitiveType::Boolean | PrimitiveType::Byte => ElementKind::Byte,
            PrimitiveType::Char | PrimitiveType::Short => ElementKind::Short,
            PrimitiveType::Int | PrimitiveType::Float => ElementKind::Int,
            PrimitiveType::Long | PrimitiveType::Double => ElementKind::Long,
        }
    }

    /// The kind of the stack values that are stored in it
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            ElementKind::Byte | ElementKind::Short | ElementKind::Int => ValueKind::Int,
            ElementKind::Long => ValueKind::Long,
            ElementKind::Reference => ValueKind::Reference,
        }
    }

    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            ElementKind::Byte => 1,
            ElementKind::Short => 2,
            ElementKind::Int | ElementKind::Reference => 4,
            ElementKind::Long => 8,
        }
    }
}

fn zeroed<T: Clone>(value: T, len: usize) -> Result<Vec<T>, TryReserveError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, value);
    Ok(data)
}

#[derive(Debug, Clone)]
pub enum ArrayElements {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Reference(Vec<Option<Ref>>),
}
impl ArrayElements {
    /// Zeroed elements. Fails instead of aborting if the allocator can't provide them.
    pub fn new(kind: ElementKind, len: usize) -> Result<ArrayElements, TryReserveError> {
        Ok(match kind {
            ElementKind::Byte => ArrayElements::Byte(zeroed(0, len)?),
            ElementKind::Short => ArrayElements::Short(zeroed(0, len)?),
            ElementKind::Int => ArrayElements::Int(zeroed(0, len)?),
            ElementKind::Long => ArrayElements::Long(zeroed(0, len)?),
            ElementKind::Reference => ArrayElements::Reference(zeroed(None, len)?),
        })
    }

    /// Host memory that `len` elements of the kind take up
    #[must_use]
    pub fn reserved_bytes(kind: ElementKind, len: usize) -> u64 {
        let width = match kind {
            ElementKind::Reference => size_of::<Option<Ref>>(),
            _ => kind.byte_width(),
        };
        u64::from_usize(len).saturating_mul(u64::from_usize(width))
    }

    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayElements::Byte(_) => ElementKind::Byte,
            ArrayElements::Short(_) => ElementKind::Short,
            ArrayElements::Int(_) => ElementKind::Int,
            ArrayElements::Long(_) => ElementKind::Long,
            ArrayElements::Reference(_) => ElementKind::Reference,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ArrayElements::Byte(v) => v.len(),
            ArrayElements::Short(v) => v.len(),
            ArrayElements::Int(v) => v.len(),
            ArrayElements::Long(v) => v.len(),
            ArrayElements::Reference(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out a range of the elements. `None` if it is out of bounds.
    #[must_use]
    pub fn sub_array(&self, range: Range<usize>) -> Option<ArrayElements> {
        Some(match self {
            ArrayElements::Byte(v) => ArrayElements::Byte(v.get(range)?.to_vec()),
            ArrayElements::Short(v) => ArrayElements::Short(v.get(range)?.to_vec()),
            ArrayElements::Int(v) => ArrayElements::Int(v.get(range)?.to_vec()),
            ArrayElements::Long(v) => ArrayElements::Long(v.get(range)?.to_vec()),
            ArrayElements::Reference(v) => ArrayElements::Reference(v.get(range)?.to_vec()),
        })
    }

    /// Overwrite the elements starting at `start` with those of `source`.
    /// Returns false, changing nothing, if the kinds differ or it does not fit.
    pub fn splice_from(&mut self, start: usize, source: &ArrayElements) -> bool {
        let end = start + source.len();
        match (self, source) {
            (ArrayElements::Byte(dst), ArrayElements::Byte(src)) => {
                dst.get_mut(start..end).map(|d| d.copy_from_slice(src))
            }
            (ArrayElements::Short(dst), ArrayElements::Short(src)) => {
                dst.get_mut(start..end).map(|d| d.copy_from_slice(src))
            }
            (ArrayElements::Int(dst), ArrayElements::Int(src)) => {
                dst.get_mut(start..end).map(|d| d.copy_from_slice(src))
            }
            (ArrayElements::Long(dst), ArrayElements::Long(src)) => {
                dst.get_mut(start..end).map(|d| d.copy_from_slice(src))
            }
            (ArrayElements::Reference(dst), ArrayElements::Reference(src)) => {
                dst.get_mut(start..end).map(|d| d.clone_from_slice(src))
            }
            _ => None,
        }
        .is_some()
    }

    /// Move a range of elements within the array, which may overlap its destination.
    /// Returns false if either range is out of bounds.
    pub fn copy_within(&mut self, src: Range<usize>, dest: usize) -> bool {
        let len = self.len();
        if src.start > src.end || src.end > len || dest + (src.end - src.start) > len {
            return false;
        }
        match self {
            ArrayElements::Byte(v) => v.copy_within(src, dest),
            ArrayElements::Short(v) => v.copy_within(src, dest),
            ArrayElements::Int(v) => v.copy_within(src, dest),
            ArrayElements::Long(v) => v.copy_within(src, dest),
            ArrayElements::Reference(v) => {
                let moved = v[src].to_vec();
                v[dest..dest + moved.len()].clone_from_slice(&moved);
            }
        }
        true
    }

    /// Translate a byte offset from the start of the elements into an index
    fn index_of_offset(&self, offset: i64, kind: StorageKind) -> Result<usize, FieldAccessError> {
        let width = self.kind().byte_width();
        if kind.byte_width() != width {
            return Err(FieldAccessError::KindMismatch {
                expected: self.kind().value_kind(),
                found: kind.value_kind(),
            });
        }

        let start = usize::try_from(offset)
            .map_err(|_| FieldAccessError::OutOfBounds { offset, width })?;
        if start % width != 0 {
            return Err(FieldAccessError::Misaligned { offset });
        }
        let index = start / width;
        if index >= self.len() {
            return Err(FieldAccessError::OutOfBounds { offset, width });
        }
        Ok(index)
    }

    /// Read the element at a byte offset, as Unsafe does
    pub fn get_at(&self, offset: i64, kind: StorageKind) -> Result<RuntimeValue, FieldAccessError> {
        let index = self.index_of_offset(offset, kind)?;
        Ok(match (self, kind) {
            (ArrayElements::Reference(v), StorageKind::Reference) => {
                RuntimeValue::Reference(v[index].clone())
            }
            (ArrayElements::Byte(v), StorageKind::Primitive(prim)) => {
                decode_bits(prim, i64::from(v[index]))
            }
            (ArrayElements::Short(v), StorageKind::Primitive(prim)) => {
                decode_bits(prim, i64::from(v[index]))
            }
            (ArrayElements::Int(v), StorageKind::Primitive(prim)) => {
                decode_bits(prim, i64::from(v[index]))
            }
            (ArrayElements::Long(v), StorageKind::Primitive(prim)) => decode_bits(prim, v[index]),
            _ => {
                return Err(FieldAccessError::KindMismatch {
                    expected: ValueKind::Reference,
                    found: kind.value_kind(),
                })
            }
        })
    }

    /// Write the element at a byte offset, as Unsafe does
    pub fn set_at(
        &mut self,
        offset: i64,
        kind: StorageKind,
        value: RuntimeValue,
    ) -> Result<(), FieldAccessError> {
        let index = self.index_of_offset(offset, kind)?;
        let mismatch = FieldAccessError::KindMismatch {
            expected: kind.value_kind(),
            found: value.kind(),
        };
        match (self, kind) {
            (ArrayElements::Reference(v), StorageKind::Reference) => {
                v[index] = value.into_reference().ok_or(mismatch)?;
            }
            (ArrayElements::Byte(v), StorageKind::Primitive(prim)) => {
                v[index] = encode_bits(prim, &value)? as i8;
            }
            (ArrayElements::Short(v), StorageKind::Primitive(prim)) => {
                v[index] = encode_bits(prim, &value)? as i16;
            }
            (ArrayElements::Int(v), StorageKind::Primitive(prim)) => {
                v[index] = encode_bits(prim, &value)? as i32;
            }
            (ArrayElements::Long(v), StorageKind::Primitive(prim)) => {
                v[index] = encode_bits(prim, &value)?;
            }
            _ => return Err(mismatch),
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ObjectBody {
    Instance(RwLock<FieldData>),
    Array(RwLock<ArrayElements>),
}

pub struct Object {
    class: Arc<Class>,
    hash: i32,
    /// Made the first time the object is locked
    monitor: OnceCell<Arc<Monitor>>,
    body: ObjectBody,
    /// For instances of `java/lang/Class`, the class they stand for
    mirror_of: Option<Weak<Class>>,
    /// Off-heap blocks whose lifetime is tied to this object
    pinned: Mutex<Vec<PinnedBlock>>,
}
impl Object {
    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Allocation based hash, what `Object.hashCode` returns if not overridden
    #[must_use]
    pub fn identity_hash(&self) -> i32 {
        self.hash
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<Monitor> {
        self.monitor.get_or_init(|| Arc::new(Monitor::new()))
    }

    #[must_use]
    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.body, ObjectBody::Array(_))
    }

    #[must_use]
    pub fn array_len(&self) -> Option<usize> {
        self.with_array(ArrayElements::len)
    }

    pub fn with_array<R>(&self, f: impl FnOnce(&ArrayElements) -> R) -> Option<R> {
        match &self.body {
            ObjectBody::Array(elements) => Some(f(&elements.read())),
            ObjectBody::Instance(_) => None,
        }
    }

    pub fn with_array_mut<R>(&self, f: impl FnOnce(&mut ArrayElements) -> R) -> Option<R> {
        match &self.body {
            ObjectBody::Array(elements) => Some(f(&mut elements.write())),
            ObjectBody::Instance(_) => None,
        }
    }

    fn fields(&self) -> Result<&RwLock<FieldData>, FieldAccessError> {
        match &self.body {
            ObjectBody::Instance(fields) => Ok(fields),
            ObjectBody::Array(_) => Err(FieldAccessError::WrongBody),
        }
    }

    /// Read an instance field through its precomputed offset
    pub fn get_field(&self, field: &Field) -> Result<RuntimeValue, FieldAccessError> {
        self.fields()?
            .read()
            .get(i64::from(field.offset()), field.storage_kind())
    }

    pub fn set_field(&self, field: &Field, value: RuntimeValue) -> Result<(), FieldAccessError> {
        self.fields()?
            .write()
            .set(i64::from(field.offset()), field.storage_kind(), value)
    }

    /// Read at a raw offset into the object, which is a field offset for instances and a byte
    /// offset into the elements for arrays
    pub fn get_at(&self, offset: i64, kind: StorageKind) -> Result<RuntimeValue, FieldAccessError> {
        match &self.body {
            ObjectBody::Instance(fields) => fields.read().get(offset, kind),
            ObjectBody::Array(elements) => elements.read().get_at(offset, kind),
        }
    }

    pub fn set_at(
        &self,
        offset: i64,
        kind: StorageKind,
        value: RuntimeValue,
    ) -> Result<(), FieldAccessError> {
        match &self.body {
            ObjectBody::Instance(fields) => fields.write().set(offset, kind, value),
            ObjectBody::Array(elements) => elements.write().set_at(offset, kind, value),
        }
    }

    /// Atomic compare-and-set at a raw offset. The write lock is held for the whole operation.
    pub fn compare_and_set_at(
        &self,
        offset: i64,
        kind: StorageKind,
        expected: &RuntimeValue,
        new: RuntimeValue,
    ) -> Result<bool, FieldAccessError> {
        match &self.body {
            ObjectBody::Instance(fields) => {
                fields.write().compare_and_set(offset, kind, expected, new)
            }
            ObjectBody::Array(elements) => {
                let mut elements = elements.write();
                let current = elements.get_at(offset, kind)?;
                let equal = match (&current, expected) {
                    (RuntimeValue::Reference(a), RuntimeValue::Reference(b)) => {
                        same_reference(a, b)
                    }
                    (RuntimeValue::Int(a), RuntimeValue::Int(b)) => a == b,
                    (RuntimeValue::Long(a), RuntimeValue::Long(b)) => a == b,
                    _ => false,
                };
                if equal {
                    elements.set_at(offset, kind, new)?;
                }
                Ok(equal)
            }
        }
    }

    /// The class that this `java/lang/Class` instance stands for
    #[must_use]
    pub fn mirror_of(&self) -> Option<Arc<Class>> {
        self.mirror_of.as_ref().and_then(Weak::upgrade)
    }

    pub fn attach_pinned(&self, block: PinnedBlock) {
        self.pinned.lock().push(block);
    }

    /// Free the pinned blocks now rather than when the object is dropped.
    /// Returns how many were released.
    pub fn release_pinned(&self) -> usize {
        let blocks = std::mem::take(&mut *self.pinned.lock());
        blocks.len()
    }
}

/// A reference to a heap object or array.
/// Equality is identity: two refs are equal exactly when they point at the same allocation.
#[derive(Clone)]
pub struct Ref(Arc<Object>);
impl Ref {
    fn new(class: Arc<Class>, body: ObjectBody, mirror_of: Option<Weak<Class>>) -> Ref {
        Ref(Arc::new(Object {
            class,
            hash: next_identity_hash(),
            monitor: OnceCell::new(),
            body,
            mirror_of,
            pinned: Mutex::new(Vec::new()),
        }))
    }

    /// Allocate a zeroed instance sized by the class's layout
    #[must_use]
    pub fn new_instance(class: Arc<Class>) -> Ref {
        let data = FieldData::new(class.instance_size());
        Ref::new(class, ObjectBody::Instance(RwLock::new(data)), None)
    }

    #[must_use]
    pub fn new_array(class: Arc<Class>, elements: ArrayElements) -> Ref {
        Ref::new(class, ObjectBody::Array(RwLock::new(elements)), None)
    }

    /// Create the `java/lang/Class` instance for a class
    #[must_use]
    pub fn new_mirror(class_class: Arc<Class>, of: &Arc<Class>) -> Ref {
        let data = FieldData::new(class_class.instance_size());
        Ref::new(
            class_class,
            ObjectBody::Instance(RwLock::new(data)),
            Some(Arc::downgrade(of)),
        )
    }

    #[must_use]
    pub fn ptr_eq(a: &Ref, b: &Ref) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// A new object of the same class with a copy of the contents.
    /// The copy gets its own identity and monitor, and does not share pinned blocks.
    #[must_use]
    pub fn shallow_clone(&self) -> Ref {
        let body = match &self.body {
            ObjectBody::Instance(fields) => ObjectBody::Instance(RwLock::new(fields.read().clone())),
            ObjectBody::Array(elements) => ObjectBody::Array(RwLock::new(elements.read().clone())),
        };
        Ref::new(Arc::clone(&self.class), body, self.mirror_of.clone())
    }
}
impl Deref for Ref {
    type Target = Object;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        Ref::ptr_eq(self, other)
    }
}
impl Eq for Ref {}
impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({}@{:x})", self.class.name(), self.hash)
    }
}

#[cfg(test)]
mod tests {
    use jade_base::descriptor::PrimitiveType;

    use crate::rv::RuntimeValue;

    use super::{ArrayElements, ElementKind, FieldAccessError, FieldData, StorageKind};

    #[test]
    fn test_field_data() {
        let mut data = FieldData::new(16);
        let int = StorageKind::Primitive(PrimitiveType::Int);
        let long = StorageKind::Primitive(PrimitiveType::Long);
        let chr = StorageKind::Primitive(PrimitiveType::Char);

        data.set(0, int, RuntimeValue::Int(-7)).unwrap();
        data.set(8, long, RuntimeValue::Long(i64::MIN)).unwrap();
        data.set(4, chr, RuntimeValue::Int(-1)).unwrap();
        assert_eq!(data.get(0, int).unwrap().into_int(), Some(-7));
        assert_eq!(data.get(8, long).unwrap().into_long(), Some(i64::MIN));
        assert_eq!(data.get(4, chr).unwrap().into_int(), Some(0xffff));

        assert_eq!(
            data.get(12, long).unwrap_err(),
            FieldAccessError::OutOfBounds {
                offset: 12,
                width: 8
            }
        );
        assert!(matches!(
            data.set(0, int, RuntimeValue::Long(1)),
            Err(FieldAccessError::KindMismatch { .. })
        ));
        assert_eq!(
            data.get(2, StorageKind::Reference).unwrap_err(),
            FieldAccessError::Misaligned { offset: 2 }
        );
    }

    #[test]
    fn test_compare_and_set() {
        let mut data = FieldData::new(8);
        let int = StorageKind::Primitive(PrimitiveType::Int);
        assert!(data
            .compare_and_set(0, int, &RuntimeValue::Int(0), RuntimeValue::Int(5))
            .unwrap());
        assert!(!data
            .compare_and_set(0, int, &RuntimeValue::Int(0), RuntimeValue::Int(6))
            .unwrap());
        assert_eq!(data.get(0, int).unwrap().into_int(), Some(5));
    }

    #[test]
    fn test_array_offsets() {
        let mut elements = ArrayElements::new(ElementKind::Int, 4).unwrap();
        let float = StorageKind::Primitive(PrimitiveType::Float);
        elements.set_at(8, float, RuntimeValue::Float(2.5)).unwrap();
        assert_eq!(elements.get_at(8, float).unwrap().into_float(), Some(2.5));
        match &elements {
            ArrayElements::Int(v) => assert_eq!(v[2], 2.5f32.to_bits() as i32),
            _ => panic!("wrong storage"),
        }

        assert!(elements.get_at(16, float).is_err());
        assert_eq!(
            elements.get_at(2, float).unwrap_err(),
            FieldAccessError::Misaligned { offset: 2 }
        );
        assert!(elements
            .get_at(0, StorageKind::Primitive(PrimitiveType::Long))
            .is_err());
    }

    #[test]
    fn test_element_copies() {
        let mut elements = ArrayElements::Int(vec![1, 2, 3, 4, 5]);
        assert!(elements.copy_within(0..3, 2));
        match &elements {
            ArrayElements::Int(v) => assert_eq!(v, &[1, 2, 1, 2, 3]),
            _ => panic!("wrong storage"),
        }
        assert!(!elements.copy_within(3..5, 4));

        let part = elements.sub_array(1..3).unwrap();
        assert_eq!(part.len(), 2);
        assert!(elements.sub_array(4..6).is_none());

        let mut other = ArrayElements::new(ElementKind::Int, 3).unwrap();
        assert!(other.splice_from(1, &part));
        match &other {
            ArrayElements::Int(v) => assert_eq!(v, &[0, 2, 1]),
            _ => panic!("wrong storage"),
        }
        assert!(!other.splice_from(2, &part));
        assert!(!other.splice_from(0, &ArrayElements::new(ElementKind::Long, 1).unwrap()));
    }
}
