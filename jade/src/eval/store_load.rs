use jade_base::{
    code::inst::ArrayKind,
    constant_pool::ConstantInfo,
    descriptor::{PrimitiveType, ValueKind},
    id::{ConstantPoolIndex, LocalVariableIndex},
};

use crate::{
    class::{ArrayComponent, ClassVariant, Field, Resolved},
    link,
    object::{ArrayElements, ElementKind, Ref},
    rv::RuntimeValue,
    GeneralError,
};

use super::{
    exc_value, EvalError, RunInstArgs, RunInstValue, Thread, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
    ARRAY_STORE_EXCEPTION, NULL_POINTER_EXCEPTION,
};

pub(crate) fn push_const(
    value: RuntimeValue,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn ldc(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let value = match class.constant_pool().get(index).map_err(|err| {
        GeneralError::from(link::LinkError::ClassFormat {
            class: class.name().to_owned(),
            reason: err.to_string(),
        })
    })? {
        ConstantInfo::Integer(v) => RuntimeValue::Int(*v),
        ConstantInfo::Float(v) => RuntimeValue::Float(*v),
        ConstantInfo::String { string_index } => {
            let cell = class
                .resolved_cell(index)
                .ok_or(EvalError::InvalidConstant(index))?;
            let resolved = cell.get_or_try_init(|| {
                let text = class
                    .constant_pool()
                    .get_text(*string_index)
                    .map_err(|_| EvalError::InvalidConstant(index))?;
                thread.runtime().intern_string(text).map(Resolved::String)
            })?;
            match resolved {
                Resolved::String(string) => RuntimeValue::Reference(Some(string.clone())),
                _ => return Err(EvalError::InvalidConstant(index).into()),
            }
        }
        ConstantInfo::Class { .. } => {
            let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
            let target = exc_value!(thread.resolved(result)?);
            RuntimeValue::Reference(Some(thread.runtime().class_mirror(&target)?))
        }
        // Method handles, method types and dynamic constants need bootstrap support
        _ => return Err(EvalError::InvalidConstant(index).into()),
    };

    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn ldc2(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let value = match class.constant_pool().get(index) {
        Ok(ConstantInfo::Long(v)) => RuntimeValue::Long(*v),
        Ok(ConstantInfo::Double(v)) => RuntimeValue::Double(*v),
        _ => return Err(EvalError::InvalidConstant(index).into()),
    };

    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn load(
    kind: ValueKind,
    index: LocalVariableIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let frame = thread.frame_mut()?;
    let value = frame.locals.get_value(index, kind)?;
    frame.stack.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn store(
    kind: ValueKind,
    index: LocalVariableIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let frame = thread.frame_mut()?;
    let value = frame.stack.pop_value(kind)?;
    frame.locals.set_value(index, value)?;
    Ok(RunInstValue::Continue)
}

fn element_kind(kind: ArrayKind) -> ElementKind {
    match kind {
        ArrayKind::Byte => ElementKind::Byte,
        ArrayKind::Char | ArrayKind::Short => ElementKind::Short,
        ArrayKind::Int | ArrayKind::Float => ElementKind::Int,
        ArrayKind::Long | ArrayKind::Double => ElementKind::Long,
        ArrayKind::Reference => ElementKind::Reference,
    }
}

fn read_element(
    elements: &ArrayElements,
    kind: ArrayKind,
    index: usize,
) -> Result<RuntimeValue, EvalError> {
    Ok(match (kind, elements) {
        (ArrayKind::Byte, ArrayElements::Byte(v)) => RuntimeValue::Int(i32::from(v[index])),
        (ArrayKind::Char, ArrayElements::Short(v)) => {
            RuntimeValue::Int(i32::from(v[index] as u16))
        }
        (ArrayKind::Short, ArrayElements::Short(v)) => RuntimeValue::Int(i32::from(v[index])),
        (ArrayKind::Int, ArrayElements::Int(v)) => RuntimeValue::Int(v[index]),
        (ArrayKind::Float, ArrayElements::Int(v)) => {
            RuntimeValue::Float(f32::from_bits(v[index] as u32))
        }
        (ArrayKind::Long, ArrayElements::Long(v)) => RuntimeValue::Long(v[index]),
        (ArrayKind::Double, ArrayElements::Long(v)) => {
            RuntimeValue::Double(f64::from_bits(v[index] as u64))
        }
        (ArrayKind::Reference, ArrayElements::Reference(v)) => {
            RuntimeValue::Reference(v[index].clone())
        }
        _ => {
            return Err(EvalError::ArrayKindMismatch {
                expected: element_kind(kind),
                found: elements.kind(),
            })
        }
    })
}

fn write_element(
    elements: &mut ArrayElements,
    kind: ArrayKind,
    index: usize,
    value: RuntimeValue,
) -> Result<(), EvalError> {
    let found = elements.kind();
    let mismatch = || EvalError::ArrayKindMismatch {
        expected: element_kind(kind),
        found,
    };
    match (elements, value) {
        (ArrayElements::Byte(v), RuntimeValue::Int(x)) if kind == ArrayKind::Byte => {
            v[index] = x as i8;
        }
        (ArrayElements::Short(v), RuntimeValue::Int(x))
            if matches!(kind, ArrayKind::Char | ArrayKind::Short) =>
        {
            v[index] = x as i16;
        }
        (ArrayElements::Int(v), RuntimeValue::Int(x)) => v[index] = x,
        (ArrayElements::Int(v), RuntimeValue::Float(x)) => v[index] = x.to_bits() as i32,
        (ArrayElements::Long(v), RuntimeValue::Long(x)) => v[index] = x,
        (ArrayElements::Long(v), RuntimeValue::Double(x)) => v[index] = x.to_bits() as i64,
        (ArrayElements::Reference(v), RuntimeValue::Reference(x)) => v[index] = x,
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Bounds check an array index, giving back the usable index or the exception
fn check_index(
    thread: &mut Thread,
    array: &Ref,
    index: i32,
) -> Result<Result<usize, Ref>, GeneralError> {
    let len = array.array_len().ok_or(EvalError::ExpectedArray)?;
    match usize::try_from(index) {
        Ok(i) if i < len => Ok(Ok(i)),
        _ => {
            let message = format!("Index {} out of bounds for length {}", index, len);
            thread
                .new_exception(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message))
                .map(Err)
        }
    }
}

pub(crate) fn array_load(
    kind: ArrayKind,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let index = stack.pop_int()?;
    let array = match stack.pop_ref()? {
        Some(array) => array,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot load from array because it is null"),
            )
        }
    };

    let index = match check_index(thread, &array, index)? {
        Ok(index) => index,
        Err(exc) => return Ok(RunInstValue::Exception(exc)),
    };
    let value = array
        .with_array(|elements| read_element(elements, kind, index))
        .ok_or(EvalError::ExpectedArray)??;

    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn array_store(
    kind: ArrayKind,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let value = stack.pop_value(kind.value_kind())?;
    let index = stack.pop_int()?;
    let array = match stack.pop_ref()? {
        Some(array) => array,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot store to array because it is null"),
            )
        }
    };

    let index = match check_index(thread, &array, index)? {
        Ok(index) => index,
        Err(exc) => return Ok(RunInstValue::Exception(exc)),
    };

    let value = match (array.class().variant(), value) {
        // bastore on a boolean array keeps only the low bit
        (
            ClassVariant::Array {
                component: ArrayComponent::Primitive(PrimitiveType::Boolean),
                ..
            },
            value,
        ) => value.narrow_to(PrimitiveType::Boolean),
        (
            ClassVariant::Array {
                component: ArrayComponent::Class(component),
                ..
            },
            RuntimeValue::Reference(Some(stored)),
        ) => {
            if !component.is_assignable_from(stored.class()) {
                let message = stored.class().name().replace('/', ".");
                return thread.throw_new(ARRAY_STORE_EXCEPTION, Some(&message));
            }
            RuntimeValue::Reference(Some(stored))
        }
        (_, value) => value,
    };

    array
        .with_array_mut(|elements| write_element(elements, kind, index, value))
        .ok_or(EvalError::ExpectedArray)??;
    Ok(RunInstValue::Continue)
}

/// Narrow an int being stored into a field of a smaller integral type
fn narrow_for_field(value: RuntimeValue, field: &Field) -> RuntimeValue {
    match field.descriptor().as_primitive() {
        Some(prim) => value.narrow_to(prim),
        None => value,
    }
}

pub(crate) fn get_static(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_field(&class, index, thread.runtime().loader().as_ref(), true);
    let field = exc_value!(thread.resolved(result)?);
    if let Some(exc) = thread.initialize_class(field.class())? {
        return Ok(RunInstValue::Exception(exc));
    }

    let value = field.get_static()?;
    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn put_static(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_field(&class, index, thread.runtime().loader().as_ref(), true);
    let field = exc_value!(thread.resolved(result)?);
    if let Some(exc) = thread.initialize_class(field.class())? {
        return Ok(RunInstValue::Exception(exc));
    }

    let kind = field.field().descriptor().value_kind();
    let value = thread.stack()?.pop_value(kind)?;
    field.set_static(narrow_for_field(value, field.field()))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn get_field(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_field(&class, index, thread.runtime().loader().as_ref(), false);
    let field = exc_value!(thread.resolved(result)?);

    let object = match thread.stack()?.pop_ref()? {
        Some(object) => object,
        None => {
            let message = format!(
                "Cannot read field \"{}\" because the object is null",
                field.field().name()
            );
            return thread.throw_new(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    let value = object.get_field(field.field())?;
    thread.stack()?.push_value(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn put_field(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_field(&class, index, thread.runtime().loader().as_ref(), false);
    let field = exc_value!(thread.resolved(result)?);

    let stack = thread.stack()?;
    let value = stack.pop_value(field.field().descriptor().value_kind())?;
    let object = match stack.pop_ref()? {
        Some(object) => object,
        None => {
            let message = format!(
                "Cannot assign field \"{}\" because the object is null",
                field.field().name()
            );
            return thread.throw_new(NULL_POINTER_EXCEPTION, Some(&message));
        }
    };

    object.set_field(field.field(), narrow_for_field(value, field.field()))?;
    Ok(RunInstValue::Continue)
}
