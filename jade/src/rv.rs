use jade_base::descriptor::{DescriptorType, PrimitiveType, ValueKind};

use crate::object::Ref;

/// A value as seen by the interpreter.
/// Booleans, bytes, chars and shorts are all represented as ints, as they are on the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Option<Ref>),
}
impl RuntimeValue {
    pub const NULL: RuntimeValue = RuntimeValue::Reference(None);

    /// The zero value that a field or array element of this type starts as
    #[must_use]
    pub fn default_for(desc: &DescriptorType) -> RuntimeValue {
        RuntimeValue::default_for_kind(desc.value_kind())
    }

    #[must_use]
    pub fn default_for_kind(kind: ValueKind) -> RuntimeValue {
        match kind {
            ValueKind::Int => RuntimeValue::Int(0),
            ValueKind::Long => RuntimeValue::Long(0),
            ValueKind::Float => RuntimeValue::Float(0.0),
            ValueKind::Double => RuntimeValue::Double(0.0),
            ValueKind::Reference => RuntimeValue::NULL,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            RuntimeValue::Int(_) => ValueKind::Int,
            RuntimeValue::Long(_) => ValueKind::Long,
            RuntimeValue::Float(_) => ValueKind::Float,
            RuntimeValue::Double(_) => ValueKind::Double,
            RuntimeValue::Reference(_) => ValueKind::Reference,
        }
    }

    #[must_use]
    pub fn into_int(self) -> Option<i32> {
        match self {
            RuntimeValue::Int(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_long(self) -> Option<i64> {
        match self {
            RuntimeValue::Long(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_float(self) -> Option<f32> {
        match self {
            RuntimeValue::Float(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_double(self) -> Option<f64> {
        match self {
            RuntimeValue::Double(v) => Some(v),
            _ => None,
        }
    }

    /// `Some(None)` is a null reference
    #[must_use]
    pub fn into_reference(self) -> Option<Option<Ref>> {
        match self {
            RuntimeValue::Reference(v) => Some(v),
            _ => None,
        }
    }

    /// Narrow an int the way storing it into a field or array of the type would.
    /// Values that are not ints are left alone.
    #[must_use]
    pub fn narrow_to(self, prim: PrimitiveType) -> RuntimeValue {
        match (self, prim) {
            (RuntimeValue::Int(v), PrimitiveType::Boolean) => RuntimeValue::Int(v & 1),
            (RuntimeValue::Int(v), PrimitiveType::Byte) => RuntimeValue::Int(i32::from(v as i8)),
            (RuntimeValue::Int(v), PrimitiveType::Char) => RuntimeValue::Int(i32::from(v as u16)),
            (RuntimeValue::Int(v), PrimitiveType::Short) => {
                RuntimeValue::Int(i32::from(v as i16))
            }
            (v, _) => v,
        }
    }
}
impl From<i32> for RuntimeValue {
    fn from(v: i32) -> Self {
        RuntimeValue::Int(v)
    }
}
impl From<bool> for RuntimeValue {
    fn from(v: bool) -> Self {
        RuntimeValue::Int(i32::from(v))
    }
}
impl From<i64> for RuntimeValue {
    fn from(v: i64) -> Self {
        RuntimeValue::Long(v)
    }
}
impl From<f32> for RuntimeValue {
    fn from(v: f32) -> Self {
        RuntimeValue::Float(v)
    }
}
impl From<f64> for RuntimeValue {
    fn from(v: f64) -> Self {
        RuntimeValue::Double(v)
    }
}
impl From<Option<Ref>> for RuntimeValue {
    fn from(v: Option<Ref>) -> Self {
        RuntimeValue::Reference(v)
    }
}
impl From<Ref> for RuntimeValue {
    fn from(v: Ref) -> Self {
        RuntimeValue::Reference(Some(v))
    }
}

#[cfg(test)]
mod tests {
    use jade_base::descriptor::PrimitiveType;

    use super::RuntimeValue;

    #[test]
    fn test_narrowing() {
        let narrow = |v: i32, prim| RuntimeValue::Int(v).narrow_to(prim).into_int();
        assert_eq!(narrow(3, PrimitiveType::Boolean), Some(1));
        assert_eq!(narrow(0x1ff, PrimitiveType::Byte), Some(-1));
        assert_eq!(narrow(-1, PrimitiveType::Char), Some(0xffff));
        assert_eq!(narrow(0x18000, PrimitiveType::Short), Some(-0x8000));
        assert_eq!(narrow(7, PrimitiveType::Int), Some(7));
    }
}
