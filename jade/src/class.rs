//! Runtime classes, as produced by linking.

use std::{fmt, sync::Arc};

use jade_base::{
    code::CodeInfo,
    constant_pool::ConstantPool,
    descriptor::{DescriptorType, MethodDescriptor, PrimitiveType},
    id::ConstantPoolIndex,
    ClassAccessFlags, FieldAccessFlags, MethodAccessFlags,
};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::{
    object::{ElementKind, FieldAccessError, FieldData, Ref, StorageKind},
    rv::RuntimeValue,
    thread::ThreadId,
};

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    descriptor: DescriptorType,
    access_flags: FieldAccessFlags,
    storage_kind: StorageKind,
    /// Byte offset into the instance storage, or into the class's static storage for static
    /// fields
    offset: u32,
}
impl Field {
    #[must_use]
    pub(crate) fn new(
        name: String,
        descriptor: DescriptorType,
        access_flags: FieldAccessFlags,
        offset: u32,
    ) -> Field {
        let storage_kind = StorageKind::from_descriptor(&descriptor);
        Field {
            name,
            descriptor,
            access_flags,
            storage_kind,
            offset,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &DescriptorType {
        &self.descriptor
    }

    #[must_use]
    pub fn access_flags(&self) -> FieldAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    #[must_use]
    pub fn storage_kind(&self) -> StorageKind {
        self.storage_kind
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    name: String,
    descriptor: MethodDescriptor,
    access_flags: MethodAccessFlags,
    code: Option<Arc<CodeInfo>>,
}
impl Method {
    #[must_use]
    pub(crate) fn new(
        name: String,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
        code: Option<Arc<CodeInfo>>,
    ) -> Method {
        Method {
            name,
            descriptor,
            access_flags,
            code,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn access_flags(&self) -> MethodAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn code(&self) -> Option<&Arc<CodeInfo>> {
        self.code.as_ref()
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    /// The number of local slots the arguments take, including the receiver
    #[must_use]
    pub fn argument_slot_count(&self) -> usize {
        self.descriptor.parameter_slot_count() + usize::from(!self.is_static())
    }
}

/// The element type of an array class
#[derive(Debug, Clone)]
pub enum ArrayComponent {
    Primitive(PrimitiveType),
    Class(Arc<Class>),
}

#[derive(Debug, Clone)]
pub enum ClassVariant {
    /// A class or interface from class metadata
    Normal,
    Array {
        component: ArrayComponent,
        element_kind: ElementKind,
    },
    /// `int.class` and friends
    Primitive(PrimitiveType),
}

/// A field together with the class that declares it
#[derive(Debug, Clone)]
pub struct ClassField {
    class: Arc<Class>,
    index: usize,
}
impl ClassField {
    #[must_use]
    pub fn new(class: Arc<Class>, index: usize) -> Option<ClassField> {
        (index < class.fields.len()).then(|| ClassField { class, index })
    }

    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    #[must_use]
    pub fn field(&self) -> &Field {
        &self.class.fields[self.index]
    }

    /// Value of a static field
    pub fn get_static(&self) -> Result<RuntimeValue, FieldAccessError> {
        let field = self.field();
        self.class
            .statics
            .read()
            .get(i64::from(field.offset), field.storage_kind)
    }

    pub fn set_static(&self, value: RuntimeValue) -> Result<(), FieldAccessError> {
        let field = self.field();
        self.class
            .statics
            .write()
            .set(i64::from(field.offset), field.storage_kind, value)
    }
}

/// A method together with the class that declares it
#[derive(Debug, Clone)]
pub struct ClassMethod {
    class: Arc<Class>,
    index: usize,
}
impl ClassMethod {
    #[must_use]
    pub fn new(class: Arc<Class>, index: usize) -> Option<ClassMethod> {
        (index < class.methods.len()).then(|| ClassMethod { class, index })
    }

    #[must_use]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.class.methods[self.index]
    }

    /// The key that natives are registered under, `java/lang/Object.hashCode()I`
    #[must_use]
    pub fn native_key(&self) -> String {
        let method = self.method();
        format!("{}.{}{}", self.class.name, method.name, method.descriptor)
    }

    #[must_use]
    pub fn same_as(&self, other: &ClassMethod) -> bool {
        Arc::ptr_eq(&self.class, &other.class) && self.index == other.index
    }
}
impl fmt::Display for ClassMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.method();
        write!(f, "{}.{}{}", self.class.name, method.name, method.descriptor)
    }
}

/// What a constant pool entry resolved to
#[derive(Debug, Clone)]
pub enum Resolved {
    Class(Arc<Class>),
    Field(ClassField),
    Method(ClassMethod),
    String(Ref),
}

/// Progress of running the class initializer
#[derive(Debug, Clone)]
pub(crate) enum InitState {
    Uninitialized,
    InProgress(ThreadId),
    Initialized,
    /// The initializer threw. The exception is kept to be rethrown on later uses.
    Erroneous(Option<Ref>),
}

pub struct Class {
    name: String,
    access_flags: ClassAccessFlags,
    super_class: Option<Arc<Class>>,
    interfaces: Vec<Arc<Class>>,
    variant: ClassVariant,
    constant_pool: ConstantPool,
    fields: Vec<Field>,
    methods: Vec<Method>,
    /// Bytes of instance storage, including that of the superclasses
    instance_size: u32,
    statics: RwLock<FieldData>,
    /// Lazily filled, parallel to the constant pool
    resolved: Box<[OnceCell<Resolved>]>,
    pub(crate) init: Mutex<InitState>,
    pub(crate) init_done: Condvar,
    pub(crate) mirror: OnceCell<Ref>,
}
impl Class {
    #[must_use]
    pub(crate) fn new(
        name: String,
        access_flags: ClassAccessFlags,
        super_class: Option<Arc<Class>>,
        interfaces: Vec<Arc<Class>>,
        constant_pool: ConstantPool,
        fields: Vec<Field>,
        methods: Vec<Method>,
        instance_size: u32,
        static_size: u32,
    ) -> Class {
        let resolved = (0..constant_pool.slot_count())
            .map(|_| OnceCell::new())
            .collect();
        Class {
            name,
            access_flags,
            super_class,
            interfaces,
            variant: ClassVariant::Normal,
            constant_pool,
            fields,
            methods,
            instance_size,
            statics: RwLock::new(FieldData::new(static_size)),
            resolved,
            init: Mutex::new(InitState::Uninitialized),
            init_done: Condvar::new(),
            mirror: OnceCell::new(),
        }
    }

    /// Array and primitive classes, which have no members of their own and need no
    /// initialization
    #[must_use]
    pub(crate) fn new_special(
        name: String,
        access_flags: ClassAccessFlags,
        super_class: Option<Arc<Class>>,
        interfaces: Vec<Arc<Class>>,
        variant: ClassVariant,
    ) -> Class {
        let instance_size = super_class.as_ref().map_or(0, |x| x.instance_size);
        Class {
            name,
            access_flags,
            super_class,
            interfaces,
            variant,
            constant_pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            instance_size,
            statics: RwLock::new(FieldData::new(0)),
            resolved: Box::new([]),
            init: Mutex::new(InitState::Initialized),
            init_done: Condvar::new(),
            mirror: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn access_flags(&self) -> ClassAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn super_class(&self) -> Option<&Arc<Class>> {
        self.super_class.as_ref()
    }

    #[must_use]
    pub fn interfaces(&self) -> &[Arc<Class>] {
        &self.interfaces
    }

    #[must_use]
    pub fn variant(&self) -> &ClassVariant {
        &self.variant
    }

    #[must_use]
    pub fn constant_pool(&self) -> &ConstantPool {
        &self.constant_pool
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    #[must_use]
    pub fn static_size(&self) -> usize {
        self.statics.read().size()
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::FINAL)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.variant, ClassVariant::Array { .. })
    }

    /// The component and storage kind, for array classes
    #[must_use]
    pub fn array_info(&self) -> Option<(&ArrayComponent, ElementKind)> {
        match &self.variant {
            ClassVariant::Array {
                component,
                element_kind,
            } => Some((component, *element_kind)),
            _ => None,
        }
    }

    /// The cache cell for a constant pool slot
    #[must_use]
    pub(crate) fn resolved_cell(&self, index: ConstantPoolIndex) -> Option<&OnceCell<Resolved>> {
        self.resolved.get(index.as_usize())
    }

    /// Find a field declared directly on this class
    #[must_use]
    pub fn find_field(&self, name: &str, descriptor: &DescriptorType) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name && f.descriptor == *descriptor)
    }

    /// Find a method declared directly on this class
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &MethodDescriptor) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == *descriptor)
    }

    /// Field lookup as resolution does it: this class, then its superinterfaces, then its
    /// superclass
    #[must_use]
    pub fn find_field_in_chain(self: &Arc<Self>, name: &str, descriptor: &str) -> Option<ClassField> {
        let descriptor = DescriptorType::parse(descriptor).ok()?;
        self.find_field_by_descriptor(name, &descriptor)
    }

    #[must_use]
    pub fn find_field_by_descriptor(
        self: &Arc<Self>,
        name: &str,
        descriptor: &DescriptorType,
    ) -> Option<ClassField> {
        if let Some(index) = self.find_field(name, descriptor) {
            return ClassField::new(Arc::clone(self), index);
        }

        for iface in &self.interfaces {
            if let Some(found) = iface.find_field_by_descriptor(name, descriptor) {
                return Some(found);
            }
        }

        self.super_class
            .as_ref()
            .and_then(|sup| sup.find_field_by_descriptor(name, descriptor))
    }

    /// Method lookup as resolution does it: this class and its superclasses, then the
    /// superinterfaces, preferring a method with a body.
    #[must_use]
    pub fn find_method_in_chain(
        self: &Arc<Self>,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Option<ClassMethod> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(index) = class.find_method(name, descriptor) {
                return ClassMethod::new(Arc::clone(class), index);
            }
            current = class.super_class.as_ref();
        }

        self.find_interface_method(name, descriptor)
    }

    /// Search every superinterface, of this class and of its superclasses.
    /// A default method wins over an abstract one.
    #[must_use]
    pub fn find_interface_method(
        self: &Arc<Self>,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Option<ClassMethod> {
        let mut fallback = None;
        let mut current = Some(self);
        while let Some(class) = current {
            for iface in &class.interfaces {
                if let Some(found) = iface.find_method_in_interfaces(name, descriptor) {
                    if !found.method().is_abstract() {
                        return Some(found);
                    }
                    fallback.get_or_insert(found);
                }
            }
            current = class.super_class.as_ref();
        }
        fallback
    }

    fn find_method_in_interfaces(
        self: &Arc<Self>,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Option<ClassMethod> {
        if let Some(index) = self.find_method(name, descriptor) {
            return ClassMethod::new(Arc::clone(self), index);
        }

        let mut fallback = None;
        for iface in &self.interfaces {
            if let Some(found) = iface.find_method_in_interfaces(name, descriptor) {
                if !found.method().is_abstract() {
                    return Some(found);
                }
                fallback.get_or_insert(found);
            }
        }
        fallback
    }

    /// Whether `other` is this class or one of its superclasses
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if std::ptr::eq(class, other) {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    /// Whether this class, or one of its superclasses, implements the interface, possibly
    /// through a superinterface
    #[must_use]
    pub fn implements(&self, iface: &Class) -> bool {
        fn interface_extends(class: &Class, iface: &Class) -> bool {
            std::ptr::eq(class, iface)
                || class
                    .interfaces
                    .iter()
                    .any(|sup| interface_extends(sup, iface))
        }

        let mut current = Some(self);
        while let Some(class) = current {
            if class
                .interfaces
                .iter()
                .any(|sup| interface_extends(sup, iface))
            {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    /// Whether a value of class `source` can be stored where this class is expected.
    /// This is what `instanceof`, `checkcast`, and array stores check.
    #[must_use]
    pub fn is_assignable_from(&self, source: &Class) -> bool {
        if std::ptr::eq(self, source) {
            return true;
        }

        if let (Some((target_comp, _)), Some((source_comp, _))) =
            (self.array_info(), source.array_info())
        {
            return match (target_comp, source_comp) {
                (ArrayComponent::Primitive(a), ArrayComponent::Primitive(b)) => a == b,
                (ArrayComponent::Class(a), ArrayComponent::Class(b)) => a.is_assignable_from(b),
                _ => false,
            };
        }

        if self.is_interface() {
            // An interface extending another is found through its declared interfaces
            source.implements(self)
        } else if self.is_final() {
            false
        } else {
            source.is_subclass_of(self)
        }
    }
}
impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("access_flags", &self.access_flags)
            .field("super_class", &self.super_class.as_ref().map(|x| x.name()))
            .field("instance_size", &self.instance_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jade_base::{
        constant_pool::ConstantPool,
        descriptor::{DescriptorType, MethodDescriptor, PrimitiveType},
        ClassAccessFlags, FieldAccessFlags, MethodAccessFlags,
    };

    use crate::object::{ElementKind, Ref};

    use super::{ArrayComponent, Class, ClassVariant, Field, Method};

    fn class(
        name: &str,
        flags: ClassAccessFlags,
        sup: Option<&Arc<Class>>,
        interfaces: &[&Arc<Class>],
    ) -> Arc<Class> {
        Arc::new(Class::new(
            name.to_owned(),
            flags,
            sup.cloned(),
            interfaces.iter().map(|x| Arc::clone(x)).collect(),
            ConstantPool::new(),
            Vec::new(),
            Vec::new(),
            sup.map_or(0, |x| x.instance_size()),
            0,
        ))
    }

    #[test]
    fn test_assignability() {
        let public = ClassAccessFlags::PUBLIC;
        let iface = ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        let object = class("java/lang/Object", public, None, &[]);
        let base_iface = class("Base", iface, Some(&object), &[]);
        let derived_iface = class("Derived", iface, Some(&object), &[&base_iface]);
        let a = class("A", public, Some(&object), &[&derived_iface]);
        let b = class("B", public, Some(&a), &[]);
        let c = class("C", public | ClassAccessFlags::FINAL, Some(&object), &[]);

        assert!(object.is_assignable_from(&b));
        assert!(a.is_assignable_from(&b));
        assert!(b.is_assignable_from(&b));
        assert!(!b.is_assignable_from(&a));
        assert!(!c.is_assignable_from(&b));
        assert!(c.is_assignable_from(&c));
        // Inherited, through an interface's superinterface
        assert!(base_iface.is_assignable_from(&b));
        assert!(derived_iface.is_assignable_from(&b));
        assert!(!derived_iface.is_assignable_from(&c));
        assert!(base_iface.is_assignable_from(&derived_iface));

        let array = |component| {
            Arc::new(Class::new_special(
                "[x".to_owned(),
                public,
                Some(Arc::clone(&object)),
                Vec::new(),
                ClassVariant::Array {
                    component,
                    element_kind: ElementKind::Reference,
                },
            ))
        };
        let a_array = array(ArrayComponent::Class(Arc::clone(&a)));
        let b_array = array(ArrayComponent::Class(Arc::clone(&b)));
        let int_array = array(ArrayComponent::Primitive(PrimitiveType::Int));
        assert!(a_array.is_assignable_from(&b_array));
        assert!(!b_array.is_assignable_from(&a_array));
        assert!(!a_array.is_assignable_from(&int_array));
        assert!(object.is_assignable_from(&int_array));
    }

    #[test]
    fn test_member_lookup() {
        let object = Arc::new(Class::new(
            "java/lang/Object".to_owned(),
            ClassAccessFlags::PUBLIC,
            None,
            Vec::new(),
            ConstantPool::new(),
            Vec::new(),
            vec![Method::new(
                "hashCode".to_owned(),
                MethodDescriptor::parse("()I").unwrap(),
                MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE,
                None,
            )],
            0,
            0,
        ));
        let child = Arc::new(Class::new(
            "Child".to_owned(),
            ClassAccessFlags::PUBLIC,
            Some(Arc::clone(&object)),
            Vec::new(),
            ConstantPool::new(),
            vec![Field::new(
                "x".to_owned(),
                DescriptorType::parse("I").unwrap(),
                FieldAccessFlags::PRIVATE,
                0,
            )],
            Vec::new(),
            4,
            0,
        ));

        let found = child
            .find_method_in_chain("hashCode", &MethodDescriptor::parse("()I").unwrap())
            .unwrap();
        assert_eq!(found.to_string(), "java/lang/Object.hashCode()I");
        assert_eq!(found.native_key(), "java/lang/Object.hashCode()I");
        assert!(child.find_field_in_chain("x", "I").is_some());
        assert!(child.find_field_in_chain("x", "J").is_none());

        let instance = Ref::new_instance(Arc::clone(&child));
        let field = child.find_field_in_chain("x", "I").unwrap();
        instance
            .set_field(field.field(), crate::rv::RuntimeValue::Int(9))
            .unwrap();
        assert_eq!(instance.get_field(field.field()).unwrap().into_int(), Some(9));
    }
}
