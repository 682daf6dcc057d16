//! Turning class metadata into runtime classes, and resolving constant pool references on
//! first use.

use std::{fmt, sync::Arc};

use jade_base::{
    class::{FieldInfo, MethodInfo},
    code::inst::Inst,
    constant_pool::{ConstantInfo, ConstantPoolError, MemberKind},
    descriptor::{DescriptorType, MethodDescriptor},
    id::ConstantPoolIndex,
    ClassAccessFlags, ClassFileData, OBJECT_CLASS_NAME,
};

use crate::{
    class::{ArrayComponent, Class, ClassField, ClassMethod, ClassVariant, Field, Method, Resolved},
    loader::ClassLoader,
    object::{ElementKind, StorageKind},
};

pub const CLONEABLE_CLASS_NAME: &str = "java/lang/Cloneable";
pub const SERIALIZABLE_CLASS_NAME: &str = "java/io/Serializable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No source had a class by that name
    NotFound(String),
    /// The class metadata was unusable
    ClassFormat { class: String, reason: String },
    NoSuchField {
        class: String,
        name: String,
        descriptor: String,
    },
    NoSuchMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    /// A class or member was not the kind that its use requires, such as a final superclass or
    /// `getstatic` on an instance field
    IncompatibleClassChange { class: String, reason: String },
    /// The class is (indirectly) its own superclass
    ClassCircularity(String),
    /// `invokedynamic` call sites are not supported
    BootstrapMethod { class: String },
    /// Virtual dispatch selected a method without a body
    AbstractMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    /// `define_class` for a name that is already loaded or being loaded
    DuplicateClass(String),
    /// The class source failed in a way other than not having the class
    Source { class: String, message: String },
}
impl LinkError {
    /// The guest error class that this becomes when raised while running bytecode.
    /// `None` for errors that abort the interpreter instead.
    #[must_use]
    pub fn guest_exception_class(&self) -> Option<&'static str> {
        Some(match self {
            LinkError::NotFound(_) => "java/lang/NoClassDefFoundError",
            LinkError::NoSuchField { .. } => "java/lang/NoSuchFieldError",
            LinkError::NoSuchMethod { .. } => "java/lang/NoSuchMethodError",
            LinkError::IncompatibleClassChange { .. } => "java/lang/IncompatibleClassChangeError",
            LinkError::ClassCircularity(_) => "java/lang/ClassCircularityError",
            LinkError::AbstractMethod { .. } => "java/lang/AbstractMethodError",
            LinkError::DuplicateClass(_) => "java/lang/LinkageError",
            LinkError::ClassFormat { .. }
            | LinkError::BootstrapMethod { .. }
            | LinkError::Source { .. } => return None,
        })
    }

    fn class_format(class: &str, reason: impl Into<String>) -> LinkError {
        LinkError::ClassFormat {
            class: class.to_owned(),
            reason: reason.into(),
        }
    }

    fn incompatible(class: &str, reason: impl Into<String>) -> LinkError {
        LinkError::IncompatibleClassChange {
            class: class.to_owned(),
            reason: reason.into(),
        }
    }

    fn pool(class: &str, err: &ConstantPoolError) -> LinkError {
        LinkError::class_format(class, err.to_string())
    }
}
impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotFound(name) => f.write_str(name),
            LinkError::ClassFormat { class, reason } => write!(f, "{}: {}", class, reason),
            LinkError::NoSuchField {
                class,
                name,
                descriptor,
            } => write!(f, "{}.{} {}", class, name, descriptor),
            LinkError::NoSuchMethod {
                class,
                name,
                descriptor,
            }
            | LinkError::AbstractMethod {
                class,
                name,
                descriptor,
            } => write!(f, "{}.{}{}", class, name, descriptor),
            LinkError::IncompatibleClassChange { class, reason } => {
                write!(f, "{}: {}", class, reason)
            }
            LinkError::ClassCircularity(name) => f.write_str(name),
            LinkError::BootstrapMethod { class } => {
                write!(f, "invokedynamic is not supported (in {})", class)
            }
            LinkError::DuplicateClass(name) => {
                write!(f, "attempted duplicate class definition for {}", name)
            }
            LinkError::Source { class, message } => write!(f, "{}: {}", class, message),
        }
    }
}
impl std::error::Error for LinkError {}

/// How a method is being invoked, which decides what resolution accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Special,
    Virtual,
    Interface,
}

fn align_to(offset: u32, width: u32) -> u32 {
    let rem = offset % width;
    if rem == 0 {
        offset
    } else {
        offset + (width - rem)
    }
}

/// Assign offsets in declaration order, each aligned to its own width.
/// Instance fields continue after the superclass's storage, statics get their own block.
/// Returns the fields, the instance size, and the static size.
pub(crate) fn layout_fields(
    class_name: &str,
    fields: &[FieldInfo],
    super_size: u32,
) -> Result<(Vec<Field>, u32, u32), LinkError> {
    let mut instance_size = super_size;
    let mut static_size = 0u32;
    let mut laid = Vec::with_capacity(fields.len());

    for (i, info) in fields.iter().enumerate() {
        if fields[..i]
            .iter()
            .any(|x| x.name == info.name && x.descriptor == info.descriptor)
        {
            return Err(LinkError::class_format(
                class_name,
                format!("duplicate field {} {}", info.name, info.descriptor),
            ));
        }

        let width = StorageKind::from_descriptor(&info.descriptor).byte_width();
        let width = u32::try_from(width).unwrap_or(8);
        let cursor = if info.is_static() {
            &mut static_size
        } else {
            &mut instance_size
        };
        let offset = align_to(*cursor, width);
        *cursor = offset
            .checked_add(width)
            .ok_or_else(|| LinkError::class_format(class_name, "field storage too large"))?;

        laid.push(Field::new(
            info.name.clone(),
            info.descriptor.clone(),
            info.access_flags,
            offset,
        ));
    }

    Ok((laid, instance_size, static_size))
}

/// Check that every instruction's constant pool operand has the tag the instruction needs, so
/// that a malformed reference is reported when the class is linked rather than when the
/// instruction is first run.
fn check_code_references(data: &ClassFileData, method: &MethodInfo) -> Result<(), LinkError> {
    let code = match &method.code {
        Some(code) => code,
        None => return Ok(()),
    };

    for (_, node) in code.graph().iter() {
        let inst = node.inst();
        let index = match inst.constant_pool_index() {
            Some(index) => index,
            None => continue,
        };

        let info = data
            .constant_pool
            .get(index)
            .map_err(|err| LinkError::pool(&data.name, &err))?;
        let valid = match inst {
            Inst::Ldc(_) => matches!(
                info,
                ConstantInfo::Integer(_)
                    | ConstantInfo::Float(_)
                    | ConstantInfo::String { .. }
                    | ConstantInfo::Class { .. }
                    | ConstantInfo::MethodType { .. }
                    | ConstantInfo::MethodHandle { .. }
                    | ConstantInfo::Dynamic(_)
            ),
            Inst::Ldc2(_) => matches!(
                info,
                ConstantInfo::Long(_) | ConstantInfo::Double(_) | ConstantInfo::Dynamic(_)
            ),
            Inst::GetStatic(_) | Inst::PutStatic(_) | Inst::GetField(_) | Inst::PutField(_) => {
                matches!(info, ConstantInfo::FieldRef(_))
            }
            Inst::InvokeVirtual(_) => matches!(info, ConstantInfo::MethodRef(_)),
            Inst::InvokeSpecial(_) | Inst::InvokeStatic(_) => matches!(
                info,
                ConstantInfo::MethodRef(_) | ConstantInfo::InterfaceMethodRef(_)
            ),
            Inst::InvokeInterface { .. } => matches!(info, ConstantInfo::InterfaceMethodRef(_)),
            Inst::InvokeDynamic(_) => matches!(info, ConstantInfo::InvokeDynamic(_)),
            Inst::New(_)
            | Inst::ANewArray(_)
            | Inst::CheckCast(_)
            | Inst::InstanceOf(_)
            | Inst::MultiANewArray { .. } => matches!(info, ConstantInfo::Class { .. }),
            _ => true,
        };

        if !valid {
            return Err(LinkError::class_format(
                &data.name,
                format!(
                    "{} at offset {} in {}{} refers to constant pool entry {} with tag {}",
                    node.opcode().name(),
                    node.offset(),
                    method.name,
                    method.descriptor,
                    index,
                    info.tag()
                ),
            ));
        }
    }

    Ok(())
}

/// Build the runtime class from its metadata, loading the superclass and interfaces through
/// the loader
pub(crate) fn link_class(data: ClassFileData, loader: &dyn ClassLoader) -> Result<Class, LinkError> {
    let name = data.name.clone();

    let super_class = match data.super_class.as_deref() {
        Some(super_name) => {
            let super_class = loader.load_class(super_name)?;
            if super_class.is_interface() {
                return Err(LinkError::incompatible(
                    &name,
                    format!("superclass {} is an interface", super_name),
                ));
            }
            if super_class.is_final() {
                return Err(LinkError::incompatible(
                    &name,
                    format!("cannot inherit from final class {}", super_name),
                ));
            }
            Some(super_class)
        }
        None if name == OBJECT_CLASS_NAME => None,
        None => return Err(LinkError::class_format(&name, "missing superclass")),
    };

    let mut interfaces = Vec::with_capacity(data.interfaces.len());
    for iface_name in &data.interfaces {
        let iface = loader.load_class(iface_name)?;
        if !iface.is_interface() {
            return Err(LinkError::incompatible(
                &name,
                format!("{} is not an interface", iface_name),
            ));
        }
        interfaces.push(iface);
    }

    let super_size = super_class.as_ref().map_or(0, |x| x.instance_size());
    let (fields, instance_size, static_size) = layout_fields(&name, &data.fields, super_size)?;

    let mut methods = Vec::with_capacity(data.methods.len());
    for info in &data.methods {
        if info.should_have_code() != info.code.is_some() {
            return Err(LinkError::class_format(
                &name,
                format!(
                    "method {}{} {} code",
                    info.name,
                    info.descriptor,
                    if info.code.is_some() {
                        "has unexpected"
                    } else {
                        "is missing"
                    }
                ),
            ));
        }
        check_code_references(&data, info)?;
        methods.push(Method::new(
            info.name.clone(),
            info.descriptor.clone(),
            info.access_flags,
            info.code.clone(),
        ));
    }

    tracing::debug!(
        "linked {} (instance size {}, static size {})",
        name,
        instance_size,
        static_size
    );

    Ok(Class::new(
        name,
        data.access_flags,
        super_class,
        interfaces,
        data.constant_pool,
        fields,
        methods,
        instance_size,
        static_size,
    ))
}

/// Build the class for an array type name, like `[I` or `[[Ljava/lang/String;`.
/// The component class is loaded through the loader, so nested arrays share their components.
pub(crate) fn link_array_class(name: &str, loader: &dyn ClassLoader) -> Result<Class, LinkError> {
    let desc = DescriptorType::parse(name).map_err(|_| LinkError::NotFound(name.to_owned()))?;
    let component = desc
        .array_component()
        .ok_or_else(|| LinkError::NotFound(name.to_owned()))?;

    let (component, element_kind) = if let Some(prim) = component.as_primitive() {
        (ArrayComponent::Primitive(prim), ElementKind::from_primitive(prim))
    } else {
        let component_name = component
            .class_name()
            .ok_or_else(|| LinkError::NotFound(name.to_owned()))?;
        let component_class = loader.load_class(&component_name)?;
        (
            ArrayComponent::Class(component_class),
            ElementKind::Reference,
        )
    };

    let object = loader.load_class(OBJECT_CLASS_NAME)?;
    let interfaces = vec![
        loader.load_class(CLONEABLE_CLASS_NAME)?,
        loader.load_class(SERIALIZABLE_CLASS_NAME)?,
    ];

    Ok(Class::new_special(
        name.to_owned(),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT,
        Some(object),
        interfaces,
        ClassVariant::Array {
            component,
            element_kind,
        },
    ))
}

/// Look up the cache cell, computing and storing the entry if it is empty.
/// Racing threads compute the same thing, and whichever stores first is what everyone sees.
fn cached(
    class: &Class,
    index: ConstantPoolIndex,
    compute: impl FnOnce() -> Result<Resolved, LinkError>,
) -> Result<Resolved, LinkError> {
    let cell = class
        .resolved_cell(index)
        .ok_or_else(|| LinkError::pool(class.name(), &ConstantPoolError::InvalidIndex(index)))?;
    if let Some(resolved) = cell.get() {
        return Ok(resolved.clone());
    }

    let resolved = compute()?;
    let _ = cell.set(resolved);
    cell.get()
        .cloned()
        .ok_or_else(|| LinkError::pool(class.name(), &ConstantPoolError::InvalidIndex(index)))
}

/// Resolve a `Class` constant of `class`
pub fn resolve_class(
    class: &Arc<Class>,
    index: ConstantPoolIndex,
    loader: &dyn ClassLoader,
) -> Result<Arc<Class>, LinkError> {
    let resolved = cached(class, index, || {
        let name = class
            .constant_pool()
            .get_class_name(index)
            .map_err(|err| LinkError::pool(class.name(), &err))?;
        loader.load_class(name).map(Resolved::Class)
    })?;

    match resolved {
        Resolved::Class(target) => Ok(target),
        _ => Err(LinkError::class_format(
            class.name(),
            format!("constant pool entry {} is not a class", index),
        )),
    }
}

/// Resolve a field reference of `class`, checking that it is static exactly when the
/// instruction expects it to be
pub fn resolve_field(
    class: &Arc<Class>,
    index: ConstantPoolIndex,
    loader: &dyn ClassLoader,
    expect_static: bool,
) -> Result<ClassField, LinkError> {
    let resolved = cached(class, index, || {
        let member = class
            .constant_pool()
            .get_member_ref(index)
            .map_err(|err| LinkError::pool(class.name(), &err))?;
        if member.kind != MemberKind::Field {
            return Err(LinkError::class_format(
                class.name(),
                format!("constant pool entry {} is not a field reference", index),
            ));
        }

        let target = loader.load_class(member.class_name)?;
        let no_such_field = || LinkError::NoSuchField {
            class: member.class_name.to_owned(),
            name: member.name.to_owned(),
            descriptor: member.descriptor.to_owned(),
        };
        let descriptor = DescriptorType::parse(member.descriptor).map_err(|_| no_such_field())?;
        target
            .find_field_by_descriptor(member.name, &descriptor)
            .map(Resolved::Field)
            .ok_or_else(no_such_field)
    })?;

    let field = match resolved {
        Resolved::Field(field) => field,
        _ => {
            return Err(LinkError::class_format(
                class.name(),
                format!("constant pool entry {} is not a field", index),
            ))
        }
    };

    if field.field().is_static() != expect_static {
        return Err(LinkError::incompatible(
            field.class().name(),
            format!(
                "expected {} field {}",
                if expect_static { "static" } else { "non-static" },
                field.field().name()
            ),
        ));
    }

    Ok(field)
}

/// Resolve a method reference of `class` for the kind of invoke that uses it
pub fn resolve_method(
    class: &Arc<Class>,
    index: ConstantPoolIndex,
    loader: &dyn ClassLoader,
    kind: InvokeKind,
) -> Result<ClassMethod, LinkError> {
    let resolved = cached(class, index, || {
        let member = class
            .constant_pool()
            .get_member_ref(index)
            .map_err(|err| LinkError::pool(class.name(), &err))?;
        if member.kind == MemberKind::Field {
            return Err(LinkError::class_format(
                class.name(),
                format!("constant pool entry {} is not a method reference", index),
            ));
        }

        let target = loader.load_class(member.class_name)?;
        let is_interface_ref = member.kind == MemberKind::InterfaceMethod;
        if is_interface_ref != target.is_interface() {
            return Err(LinkError::incompatible(
                member.class_name,
                if is_interface_ref {
                    "interface method reference to a class"
                } else {
                    "method reference to an interface"
                },
            ));
        }

        let no_such_method = || LinkError::NoSuchMethod {
            class: member.class_name.to_owned(),
            name: member.name.to_owned(),
            descriptor: member.descriptor.to_owned(),
        };
        let descriptor = MethodDescriptor::parse(member.descriptor)
            .map_err(|_| no_such_method())?;
        target
            .find_method_in_chain(member.name, &descriptor)
            .map(Resolved::Method)
            .ok_or_else(no_such_method)
    })?;

    let method = match resolved {
        Resolved::Method(method) => method,
        _ => {
            return Err(LinkError::class_format(
                class.name(),
                format!("constant pool entry {} is not a method", index),
            ))
        }
    };

    if (kind == InvokeKind::Static) != method.method().is_static() {
        let expected = if kind == InvokeKind::Static {
            "static"
        } else {
            "non-static"
        };
        return Err(LinkError::incompatible(
            method.class().name(),
            format!(
                "expected {} method {}{}",
                expected,
                method.method().name(),
                method.method().descriptor()
            ),
        ));
    }

    Ok(method)
}

#[cfg(test)]
mod tests {
    use jade_base::{
        class::{ClassFileData, FieldInfo},
        ClassAccessFlags, FieldAccessFlags,
    };

    use crate::{eval::testing, object::Ref, rv::RuntimeValue};

    use super::{align_to, layout_fields, LinkError};

    #[test]
    fn test_layout() {
        let fields = [
            FieldInfo::new("a", "B", FieldAccessFlags::empty()).unwrap(),
            FieldInfo::new("b", "J", FieldAccessFlags::empty()).unwrap(),
            FieldInfo::new("c", "Ljava/lang/Object;", FieldAccessFlags::empty()).unwrap(),
            FieldInfo::new("s", "I", FieldAccessFlags::STATIC).unwrap(),
            FieldInfo::new("d", "S", FieldAccessFlags::empty()).unwrap(),
        ];
        let (laid, instance_size, static_size) = layout_fields("T", &fields, 4).unwrap();
        let offsets = laid.iter().map(|f| f.offset()).collect::<Vec<_>>();
        // After the superclass's 4 bytes; the long is aligned to 8
        assert_eq!(offsets, [4, 8, 16, 0, 20]);
        assert_eq!(instance_size, 22);
        assert_eq!(static_size, 4);

        let dup = [
            FieldInfo::new("a", "I", FieldAccessFlags::empty()).unwrap(),
            FieldInfo::new("a", "I", FieldAccessFlags::STATIC).unwrap(),
        ];
        assert!(matches!(
            layout_fields("T", &dup, 0),
            Err(LinkError::ClassFormat { .. })
        ));
    }

    #[test]
    fn test_subclass_layout() {
        let field = |name: &str, descriptor: &str| {
            FieldInfo::new(name, descriptor, FieldAccessFlags::PUBLIC).unwrap()
        };
        let base = ClassFileData::new("Base", ClassAccessFlags::PUBLIC, Some("java/lang/Object"))
            .with_field(field("tag", "B"))
            .with_field(field("count", "I"))
            .with_field(field("next", "LBase;"));
        let derived = ClassFileData::new("Derived", ClassAccessFlags::PUBLIC, Some("Base"))
            .with_field(field("flag", "Z"))
            .with_field(field("total", "J"));
        let runtime = testing::runtime(vec![base, derived]);
        let base = runtime.loader().load_class("Base").unwrap();
        let derived = runtime.loader().load_class("Derived").unwrap();

        assert!(derived.instance_size() >= base.instance_size());
        for own in derived.fields() {
            assert!(own.offset() >= base.instance_size());
        }

        let base_count = base.find_field_in_chain("count", "I").unwrap();
        let derived_count = derived.find_field_in_chain("count", "I").unwrap();
        assert_eq!(base_count.field().offset(), derived_count.field().offset());
        let total = derived.find_field_in_chain("total", "J").unwrap();
        let next = derived.find_field_in_chain("next", "LBase;").unwrap();

        let object = Ref::new_instance(derived);
        object.set_field(base_count.field(), RuntimeValue::Int(41)).unwrap();
        assert_eq!(
            object.get_field(derived_count.field()).unwrap().into_int(),
            Some(41)
        );
        object.set_field(derived_count.field(), RuntimeValue::Int(-2)).unwrap();
        object.set_field(total.field(), RuntimeValue::Long(-1)).unwrap();
        assert_eq!(object.get_field(base_count.field()).unwrap().into_int(), Some(-2));

        object
            .set_field(next.field(), RuntimeValue::from(object.clone()))
            .unwrap();
        let base_next = base.find_field_in_chain("next", "LBase;").unwrap();
        let stored = object.get_field(base_next.field()).unwrap().into_reference();
        assert_eq!(stored, Some(Some(object.clone())));
        assert_eq!(object.get_field(total.field()).unwrap().into_long(), Some(-1));
    }

    #[test]
    fn test_align() {
        assert_eq!(align_to(0, 8), 0);
        assert_eq!(align_to(1, 4), 4);
        assert_eq!(align_to(9, 2), 10);
        assert_eq!(align_to(9, 1), 9);
    }

    #[test]
    fn test_guest_classes() {
        assert_eq!(
            LinkError::NotFound("a/B".to_owned()).guest_exception_class(),
            Some("java/lang/NoClassDefFoundError")
        );
        assert_eq!(
            LinkError::BootstrapMethod {
                class: "a/B".to_owned()
            }
            .guest_exception_class(),
            None
        );
        assert_eq!(
            LinkError::NoSuchMethod {
                class: "a/B".to_owned(),
                name: "run".to_owned(),
                descriptor: "()V".to_owned(),
            }
            .to_string(),
            "a/B.run()V"
        );
    }
}
