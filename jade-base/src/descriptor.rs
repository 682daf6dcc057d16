use std::{fmt, num::NonZeroUsize};

use itertools::Itertools;

/// The maximum number of array dimensions a descriptor may have
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DescriptorError {
    /// There was no input where a type was expected
    EndTooEarly,
    /// There was data left after the descriptor was fully parsed
    EndTooLate { remaining: String },
    /// A character that does not start any type
    InvalidTypeCharacter(char),
    /// `L` without a terminating `;`
    MissingClassTerminator,
    /// `L;`
    EmptyClassName,
    /// Void was used somewhere other than a method's return type
    VoidNotAllowed,
    /// Method descriptor did not start with `(`
    MissingOpenParen,
    /// Method descriptor did not have a closing `)`
    MissingCloseParen,
    TooManyArrayDimensions,
}
impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::EndTooEarly => f.write_str("descriptor ended too early"),
            DescriptorError::EndTooLate { remaining } => {
                write!(f, "trailing data in descriptor: '{}'", remaining)
            }
            DescriptorError::InvalidTypeCharacter(c) => {
                write!(f, "invalid type character '{}' in descriptor", c)
            }
            DescriptorError::MissingClassTerminator => f.write_str("class name missing ';'"),
            DescriptorError::EmptyClassName => f.write_str("empty class name in descriptor"),
            DescriptorError::VoidNotAllowed => f.write_str("void used as a value type"),
            DescriptorError::MissingOpenParen => f.write_str("method descriptor missing '('"),
            DescriptorError::MissingCloseParen => f.write_str("method descriptor missing ')'"),
            DescriptorError::TooManyArrayDimensions => {
                write!(f, "more than {} array dimensions", MAX_ARRAY_DIMENSIONS)
            }
        }
    }
}
impl std::error::Error for DescriptorError {}

/// The primitive types of the virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}
impl PrimitiveType {
    pub const ALL: [PrimitiveType; 8] = [
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::Char,
        PrimitiveType::Short,
        PrimitiveType::Int,
        PrimitiveType::Long,
        PrimitiveType::Float,
        PrimitiveType::Double,
    ];

    #[must_use]
    pub fn from_descriptor_char(c: char) -> Option<PrimitiveType> {
        Some(match c {
            'Z' => PrimitiveType::Boolean,
            'B' => PrimitiveType::Byte,
            'C' => PrimitiveType::Char,
            'S' => PrimitiveType::Short,
            'I' => PrimitiveType::Int,
            'J' => PrimitiveType::Long,
            'F' => PrimitiveType::Float,
            'D' => PrimitiveType::Double,
            _ => return None,
        })
    }

    /// Get the primitive type from the `atype` operand of `newarray`
    #[must_use]
    pub fn from_array_type_code(atype: u8) -> Option<PrimitiveType> {
        Some(match atype {
            4 => PrimitiveType::Boolean,
            5 => PrimitiveType::Char,
            6 => PrimitiveType::Float,
            7 => PrimitiveType::Double,
            8 => PrimitiveType::Byte,
            9 => PrimitiveType::Short,
            10 => PrimitiveType::Int,
            11 => PrimitiveType::Long,
            _ => return None,
        })
    }

    #[must_use]
    pub fn descriptor_char(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
        }
    }

    /// The name as written in java source code
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
        }
    }

    /// Size in bytes of the type when stored in a field or array
    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            PrimitiveType::Boolean | PrimitiveType::Byte => 1,
            PrimitiveType::Char | PrimitiveType::Short => 2,
            PrimitiveType::Int | PrimitiveType::Float => 4,
            PrimitiveType::Long | PrimitiveType::Double => 8,
        }
    }

    /// The kind of value this becomes once it is on the operand stack
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            PrimitiveType::Boolean
            | PrimitiveType::Byte
            | PrimitiveType::Char
            | PrimitiveType::Short
            | PrimitiveType::Int => ValueKind::Int,
            PrimitiveType::Long => ValueKind::Long,
            PrimitiveType::Float => ValueKind::Float,
            PrimitiveType::Double => ValueKind::Double,
        }
    }
}

/// The computational type of a value on the operand stack or in a local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
}
impl ValueKind {
    /// The number of 32-bit slots that this occupies
    #[must_use]
    pub fn slot_count(self) -> usize {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            ValueKind::Int | ValueKind::Float | ValueKind::Reference => 1,
        }
    }

    #[must_use]
    pub fn is_category_2(self) -> bool {
        self.slot_count() == 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorTypeBasic {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    /// `java/lang/String`, without the `L` and `;`
    Class(String),
    Short,
    Boolean,
}
impl DescriptorTypeBasic {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            DescriptorTypeBasic::Class(_) => None,
            _ => self.as_primitive().map(PrimitiveType::name),
        }
    }

    #[must_use]
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        Some(match self {
            DescriptorTypeBasic::Byte => PrimitiveType::Byte,
            DescriptorTypeBasic::Char => PrimitiveType::Char,
            DescriptorTypeBasic::Double => PrimitiveType::Double,
            DescriptorTypeBasic::Float => PrimitiveType::Float,
            DescriptorTypeBasic::Int => PrimitiveType::Int,
            DescriptorTypeBasic::Long => PrimitiveType::Long,
            DescriptorTypeBasic::Short => PrimitiveType::Short,
            DescriptorTypeBasic::Boolean => PrimitiveType::Boolean,
            DescriptorTypeBasic::Class(_) => return None,
        })
    }

    #[must_use]
    pub fn from_primitive(prim: PrimitiveType) -> DescriptorTypeBasic {
        match prim {
            PrimitiveType::Boolean => DescriptorTypeBasic::Boolean,
            PrimitiveType::Byte => DescriptorTypeBasic::Byte,
            PrimitiveType::Char => DescriptorTypeBasic::Char,
            PrimitiveType::Short => DescriptorTypeBasic::Short,
            PrimitiveType::Int => DescriptorTypeBasic::Int,
            PrimitiveType::Long => DescriptorTypeBasic::Long,
            PrimitiveType::Float => DescriptorTypeBasic::Float,
            PrimitiveType::Double => DescriptorTypeBasic::Double,
        }
    }
}
impl fmt::Display for DescriptorTypeBasic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorTypeBasic::Class(name) => write!(f, "L{};", name),
            _ => match self.as_primitive() {
                Some(prim) => write!(f, "{}", prim.descriptor_char()),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Basic(DescriptorTypeBasic),
    Array {
        level: NonZeroUsize,
        component: DescriptorTypeBasic,
    },
}
impl DescriptorType {
    #[must_use]
    /// Helper to construct a single level array of the type.
    /// type[]
    pub fn single_array(component: DescriptorTypeBasic) -> Self {
        Self::Array {
            level: NonZeroUsize::MIN,
            component,
        }
    }

    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        Self::Basic(DescriptorTypeBasic::Class(name.into()))
    }

    /// Parse a single field descriptor, requiring that all of the input is consumed
    pub fn parse(text: &str) -> Result<DescriptorType, DescriptorError> {
        let (desc, rest) = DescriptorType::parse_prefix(text)?;
        if rest.is_empty() {
            Ok(desc)
        } else {
            Err(DescriptorError::EndTooLate {
                remaining: rest.to_owned(),
            })
        }
    }

    /// Parse a descriptor from the start of the text, returning the remaining text
    pub fn parse_prefix(text: &str) -> Result<(DescriptorType, &str), DescriptorError> {
        let level = text.bytes().take_while(|x| *x == b'[').count();
        if level > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::TooManyArrayDimensions);
        }
        let text = &text[level..];

        let mut chars = text.chars();
        let first = chars.next().ok_or(DescriptorError::EndTooEarly)?;
        let (component, rest) = if first == 'L' {
            let body = &text[1..];
            let end = body
                .find(';')
                .ok_or(DescriptorError::MissingClassTerminator)?;
            if end == 0 {
                return Err(DescriptorError::EmptyClassName);
            }
            (
                DescriptorTypeBasic::Class(body[..end].to_owned()),
                &body[end + 1..],
            )
        } else if first == 'V' {
            return Err(DescriptorError::VoidNotAllowed);
        } else {
            let prim = PrimitiveType::from_descriptor_char(first)
                .ok_or(DescriptorError::InvalidTypeCharacter(first))?;
            (
                DescriptorTypeBasic::from_primitive(prim),
                &text[first.len_utf8()..],
            )
        };

        let desc = match NonZeroUsize::new(level) {
            Some(level) => DescriptorType::Array { level, component },
            None => DescriptorType::Basic(component),
        };

        Ok((desc, rest))
    }

    /// Get the descriptor type for a class name as it would be given to a class loader.
    /// Array class names (`[I`, `[Ljava/lang/String;`) are parsed as descriptors and anything
    /// else is treated as a plain class name.
    pub fn from_class_name(name: &str) -> Result<DescriptorType, DescriptorError> {
        if name.starts_with('[') {
            DescriptorType::parse(name)
        } else if name.is_empty() {
            Err(DescriptorError::EmptyClassName)
        } else {
            Ok(DescriptorType::class(name))
        }
    }

    /// The type of a single element, if this is an array.
    /// `[[I` -> `[I`
    #[must_use]
    pub fn array_component(&self) -> Option<DescriptorType> {
        match self {
            DescriptorType::Basic(_) => None,
            DescriptorType::Array { level, component } => {
                Some(match NonZeroUsize::new(level.get() - 1) {
                    Some(level) => DescriptorType::Array {
                        level,
                        component: component.clone(),
                    },
                    None => DescriptorType::Basic(component.clone()),
                })
            }
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, DescriptorType::Array { .. })
    }

    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        match self {
            DescriptorType::Basic(DescriptorTypeBasic::Class(_)) | DescriptorType::Array { .. } => {
                ValueKind::Reference
            }
            DescriptorType::Basic(basic) => basic
                .as_primitive()
                .map_or(ValueKind::Reference, PrimitiveType::value_kind),
        }
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.value_kind().slot_count()
    }

    /// The primitive type, if this is not a reference type
    #[must_use]
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            DescriptorType::Basic(basic) => basic.as_primitive(),
            DescriptorType::Array { .. } => None,
        }
    }

    /// The name that a class loader would use for this type, if it is a reference type.
    /// `Ljava/lang/Object;` -> `java/lang/Object`, `[I` -> `[I`
    #[must_use]
    pub fn class_name(&self) -> Option<String> {
        match self {
            DescriptorType::Basic(DescriptorTypeBasic::Class(name)) => Some(name.clone()),
            DescriptorType::Basic(_) => None,
            DescriptorType::Array { .. } => Some(self.to_string()),
        }
    }
}
impl fmt::Display for DescriptorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorType::Basic(basic) => write!(f, "{}", basic),
            DescriptorType::Array { level, component } => {
                for _ in 0..level.get() {
                    f.write_str("[")?;
                }
                write!(f, "{}", component)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    parameters: Vec<DescriptorType>,
    /// None represents void
    return_type: Option<DescriptorType>,
}
impl MethodDescriptor {
    #[must_use]
    /// Construct a method descriptor that takes in the given parameters and potentially returns
    /// some type
    pub fn new(parameters: Vec<DescriptorType>, return_type: Option<DescriptorType>) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    #[must_use]
    /// Construct a [`MethodDescriptor`] that returns void
    pub fn new_void(parameters: Vec<DescriptorType>) -> Self {
        Self::new(parameters, None)
    }

    #[must_use]
    /// Construct a [`MethodDescriptor`] that takes no parameters and returns void
    pub fn new_empty() -> Self {
        Self::new(Vec::new(), None)
    }

    #[must_use]
    /// Construct a [`MethodDescriptor`] that takes no parameters and returns some type
    pub fn new_ret(return_type: DescriptorType) -> Self {
        Self::new(Vec::new(), Some(return_type))
    }

    pub fn parse(text: &str) -> Result<MethodDescriptor, DescriptorError> {
        let mut rest = text
            .strip_prefix('(')
            .ok_or(DescriptorError::MissingOpenParen)?;

        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(DescriptorError::MissingCloseParen);
            }

            let (param, after) = DescriptorType::parse_prefix(rest)?;
            parameters.push(param);
            rest = after;
        }

        let return_type = if rest == "V" {
            None
        } else if rest.is_empty() {
            return Err(DescriptorError::EndTooEarly);
        } else {
            Some(DescriptorType::parse(rest)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    #[must_use]
    pub fn parameters(&self) -> &[DescriptorType] {
        self.parameters.as_slice()
    }

    #[must_use]
    pub fn return_type(&self) -> Option<&DescriptorType> {
        self.return_type.as_ref()
    }

    /// The number of local variable slots the parameters take, not including any receiver
    #[must_use]
    pub fn parameter_slot_count(&self) -> usize {
        self.parameters.iter().map(DescriptorType::slot_count).sum()
    }
}
impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.parameters.iter().join(""))?;
        match &self.return_type {
            Some(ret) => write!(f, "{}", ret),
            None => f.write_str("V"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::{
        DescriptorError, DescriptorType, DescriptorTypeBasic, MethodDescriptor, ValueKind,
    };

    #[test]
    fn test_field_descriptors() {
        assert_eq!(
            DescriptorType::parse("I"),
            Ok(DescriptorType::Basic(DescriptorTypeBasic::Int))
        );
        assert_eq!(
            DescriptorType::parse("Ljava/lang/String;"),
            Ok(DescriptorType::class("java/lang/String"))
        );
        assert_eq!(
            DescriptorType::parse("[[J"),
            Ok(DescriptorType::Array {
                level: NonZeroUsize::new(2).unwrap(),
                component: DescriptorTypeBasic::Long,
            })
        );

        assert_eq!(DescriptorType::parse(""), Err(DescriptorError::EndTooEarly));
        assert_eq!(DescriptorType::parse("["), Err(DescriptorError::EndTooEarly));
        assert_eq!(
            DescriptorType::parse("V"),
            Err(DescriptorError::VoidNotAllowed)
        );
        assert_eq!(
            DescriptorType::parse("Ljava/lang/String"),
            Err(DescriptorError::MissingClassTerminator)
        );
        assert_eq!(
            DescriptorType::parse("L;"),
            Err(DescriptorError::EmptyClassName)
        );
        assert_eq!(
            DescriptorType::parse("Q"),
            Err(DescriptorError::InvalidTypeCharacter('Q'))
        );
        assert!(matches!(
            DescriptorType::parse("II"),
            Err(DescriptorError::EndTooLate { .. })
        ));

        let deep = "[".repeat(256) + "I";
        assert_eq!(
            DescriptorType::parse(&deep),
            Err(DescriptorError::TooManyArrayDimensions)
        );
    }

    #[test]
    fn test_method_descriptors() {
        let desc = MethodDescriptor::parse("(IJLjava/lang/Object;[D)V").unwrap();
        assert_eq!(desc.parameters().len(), 4);
        assert_eq!(desc.return_type(), None);
        assert_eq!(desc.parameter_slot_count(), 1 + 2 + 1 + 1);
        assert_eq!(desc.to_string(), "(IJLjava/lang/Object;[D)V");

        let desc = MethodDescriptor::parse("()Ljava/lang/String;").unwrap();
        assert!(desc.parameters().is_empty());
        assert_eq!(
            desc.return_type(),
            Some(&DescriptorType::class("java/lang/String"))
        );

        assert_eq!(
            MethodDescriptor::parse("I)V"),
            Err(DescriptorError::MissingOpenParen)
        );
        assert_eq!(
            MethodDescriptor::parse("(I"),
            Err(DescriptorError::MissingCloseParen)
        );
        assert_eq!(
            MethodDescriptor::parse("(V)V"),
            Err(DescriptorError::VoidNotAllowed)
        );
        assert_eq!(
            MethodDescriptor::parse("()"),
            Err(DescriptorError::EndTooEarly)
        );
        assert!(matches!(
            MethodDescriptor::parse("()VI"),
            Err(DescriptorError::EndTooLate { .. })
        ));
    }

    #[test]
    fn test_array_components() {
        let desc = DescriptorType::from_class_name("[[I").unwrap();
        let component = desc.array_component().unwrap();
        assert_eq!(component.to_string(), "[I");
        let component = component.array_component().unwrap();
        assert_eq!(component, DescriptorType::Basic(DescriptorTypeBasic::Int));
        assert_eq!(component.array_component(), None);

        let desc = DescriptorType::from_class_name("[Ljava/lang/String;").unwrap();
        assert_eq!(
            desc.array_component().and_then(|x| x.class_name()),
            Some("java/lang/String".to_owned())
        );
        assert_eq!(desc.value_kind(), ValueKind::Reference);
        assert_eq!(
            DescriptorType::from_class_name("java/lang/Object").unwrap(),
            DescriptorType::class("java/lang/Object")
        );
    }
}
