use std::sync::Arc;

use jade_base::{descriptor::PrimitiveType, id::ConstantPoolIndex};

use crate::{
    class::{ArrayComponent, Class, ClassVariant},
    link,
    object::{ArrayElements, ElementKind, Ref},
    GeneralError,
};

use super::{
    exc_value, EvalError, RunInstArgs, RunInstValue, Thread, CLASS_CAST_EXCEPTION,
    ILLEGAL_MONITOR_STATE_EXCEPTION, INSTANTIATION_ERROR, NEGATIVE_ARRAY_SIZE_EXCEPTION,
    NULL_POINTER_EXCEPTION,
};

/// The name of the class of arrays of `component`, `[Ljava/lang/String;` or `[[I`
#[must_use]
pub fn array_class_name(component: &Class) -> String {
    match component.variant() {
        ClassVariant::Array { .. } => format!("[{}", component.name()),
        ClassVariant::Primitive(prim) => format!("[{}", prim.descriptor_char()),
        ClassVariant::Normal => format!("[L{};", component.name()),
    }
}

/// The name as Java source writes it, `java.lang.String`
fn dotted(class: &Class) -> String {
    class.name().replace('/', ".")
}

fn negative_size(thread: &mut Thread, count: i32) -> Result<RunInstValue, GeneralError> {
    thread.throw_new(NEGATIVE_ARRAY_SIZE_EXCEPTION, Some(&count.to_string()))
}

pub(crate) fn new(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
    let target = exc_value!(thread.resolved(result)?);

    if target.is_interface() || target.is_abstract() || !matches!(target.variant(), ClassVariant::Normal) {
        return thread.throw_new(INSTANTIATION_ERROR, Some(&dotted(&target)));
    }

    if let Some(exc) = thread.initialize_class(&target)? {
        return Ok(RunInstValue::Exception(exc));
    }

    thread.stack()?.push_ref(Some(Ref::new_instance(target)))?;
    Ok(RunInstValue::Continue)
}

/// Memory charged for each array besides its elements
const ARRAY_OVERHEAD_BYTES: u64 = 64;

/// What an array instruction may still reserve. `None` is unlimited.
struct ArrayBudget(Option<u64>);
impl ArrayBudget {
    fn new(thread: &Thread) -> ArrayBudget {
        ArrayBudget(thread.runtime().conf().max_array_bytes)
    }

    /// Zeroed elements, charged against the budget
    fn allocate(&mut self, kind: ElementKind, len: usize) -> Result<ArrayElements, GeneralError> {
        let bytes = ArrayElements::reserved_bytes(kind, len).saturating_add(ARRAY_OVERHEAD_BYTES);
        if let Some(remaining) = &mut self.0 {
            *remaining = remaining
                .checked_sub(bytes)
                .ok_or(GeneralError::ResourceExhausted { bytes })?;
        }

        ArrayElements::new(kind, len).map_err(|err| {
            tracing::warn!("array of {} bytes could not be reserved: {}", bytes, err);
            GeneralError::ResourceExhausted { bytes }
        })
    }
}

pub(crate) fn new_array(
    prim: PrimitiveType,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let count = thread.stack()?.pop_int()?;
    let len = match usize::try_from(count) {
        Ok(len) => len,
        Err(_) => return negative_size(thread, count),
    };

    let array_class = thread
        .runtime()
        .loader()
        .load_class(&format!("[{}", prim.descriptor_char()))?;
    let elements =
        ArrayBudget::new(thread).allocate(ElementKind::from_primitive(prim), len)?;
    thread
        .stack()?
        .push_ref(Some(Ref::new_array(array_class, elements)))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn a_new_array(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
    let component = exc_value!(thread.resolved(result)?);

    let count = thread.stack()?.pop_int()?;
    let len = match usize::try_from(count) {
        Ok(len) => len,
        Err(_) => return negative_size(thread, count),
    };

    let array_class = thread
        .runtime()
        .loader()
        .load_class(&array_class_name(&component))?;
    let elements = ArrayBudget::new(thread).allocate(ElementKind::Reference, len)?;
    thread
        .stack()?
        .push_ref(Some(Ref::new_array(array_class, elements)))?;
    Ok(RunInstValue::Continue)
}

/// Allocate the nested arrays for `multianewarray`.
/// Dimensions after one of length zero are not allocated.
fn allocate_nested(
    budget: &mut ArrayBudget,
    class: &Arc<Class>,
    counts: &[usize],
) -> Result<Ref, GeneralError> {
    let (component, kind) = class.array_info().ok_or(EvalError::ExpectedArray)?;
    let len = counts.first().copied().unwrap_or(0);

    let mut elements = budget.allocate(kind, len)?;
    match (component, counts.get(1..), &mut elements) {
        (ArrayComponent::Class(inner), Some(rest), ArrayElements::Reference(refs))
            if !rest.is_empty() =>
        {
            for slot in refs.iter_mut() {
                *slot = Some(allocate_nested(budget, inner, rest)?);
            }
        }
        _ => {}
    }
    Ok(Ref::new_array(Arc::clone(class), elements))
}

pub(crate) fn multi_a_new_array(
    index: ConstantPoolIndex,
    dimensions: u8,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
    let array_class = exc_value!(thread.resolved(result)?);

    let stack = thread.stack()?;
    let mut counts = Vec::with_capacity(usize::from(dimensions));
    for _ in 0..dimensions {
        counts.push(stack.pop_int()?);
    }
    // The outermost dimension was pushed first
    counts.reverse();

    let mut sizes = Vec::with_capacity(counts.len());
    for count in counts {
        match usize::try_from(count) {
            Ok(size) => sizes.push(size),
            Err(_) => return negative_size(thread, count),
        }
    }

    let array = allocate_nested(&mut ArrayBudget::new(thread), &array_class, &sizes)?;
    thread.stack()?.push_ref(Some(array))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn array_length(
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let array = match thread.stack()?.pop_ref()? {
        Some(array) => array,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot read the array length because it is null"),
            )
        }
    };

    let len = array.array_len().ok_or(EvalError::ExpectedArray)?;
    // Lengths come from an i32 so always fit back
    thread.stack()?.push_int(len as i32)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn check_cast(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let object = match thread.stack()?.peek_ref(0)? {
        Some(object) => object,
        // null can be cast to anything
        None => return Ok(RunInstValue::Continue),
    };

    let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
    let target = exc_value!(thread.resolved(result)?);
    if target.is_assignable_from(object.class()) {
        Ok(RunInstValue::Continue)
    } else {
        let message = format!(
            "class {} cannot be cast to class {}",
            dotted(object.class()),
            dotted(&target)
        );
        thread.throw_new(CLASS_CAST_EXCEPTION, Some(&message))
    }
}

pub(crate) fn instance_of(
    index: ConstantPoolIndex,
    RunInstArgs { thread, class, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let object = match thread.stack()?.pop_ref()? {
        Some(object) => object,
        None => {
            thread.stack()?.push_int(0)?;
            return Ok(RunInstValue::Continue);
        }
    };

    let result = link::resolve_class(&class, index, thread.runtime().loader().as_ref());
    let target = exc_value!(thread.resolved(result)?);
    let is_instance = target.is_assignable_from(object.class());
    thread.stack()?.push_int(i32::from(is_instance))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn monitor_enter(
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let object = match thread.stack()?.pop_ref()? {
        Some(object) => object,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot enter synchronized block because the object is null"),
            )
        }
    };

    object.monitor().lock(thread.id());
    Ok(RunInstValue::Continue)
}

pub(crate) fn monitor_exit(
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let object = match thread.stack()?.pop_ref()? {
        Some(object) => object,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot exit synchronized block because the object is null"),
            )
        }
    };

    if object.monitor().unlock(thread.id()).is_err() {
        return thread.throw_new(ILLEGAL_MONITOR_STATE_EXCEPTION, Some("current thread is not owner"));
    }
    Ok(RunInstValue::Continue)
}

#[cfg(test)]
mod tests {
    use jade_base::constant_pool::ConstantPool;

    use crate::{
        eval::{
            testing, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION,
            CLASS_CAST_EXCEPTION, ILLEGAL_MONITOR_STATE_EXCEPTION, NEGATIVE_ARRAY_SIZE_EXCEPTION,
            NULL_POINTER_EXCEPTION,
        },
        rv::RuntimeValue,
        GeneralError, StateConfig,
    };

    fn index_bytes(index: jade_base::id::ConstantPoolIndex) -> [u8; 2] {
        index.get().to_be_bytes()
    }

    #[test]
    fn test_array_bounds() {
        // iload_0; newarray int; areturn
        let code = [0x1a, 0xbc, 10, 0xb0];
        let result = testing::run_static(
            ConstantPool::new(),
            "(I)[I",
            1,
            1,
            &code,
            &[],
            &[RuntimeValue::Int(-1)],
        );
        assert_eq!(testing::thrown_class(result), NEGATIVE_ARRAY_SIZE_EXCEPTION);

        // iconst_3; newarray int; iconst_3; iconst_1; iastore; return
        let code = [0x06, 0xbc, 10, 0x06, 0x04, 0x4f, 0xb1];
        let result = testing::run_static(ConstantPool::new(), "()V", 3, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION);

        // iconst_2; newarray int; dup; iconst_1; bipush 9; iastore; iconst_1; iaload; ireturn
        let code = [
            0x05, 0xbc, 10, 0x59, 0x04, 0x10, 9, 0x4f, 0x04, 0x2e, 0xac,
        ];
        let result = testing::run_static(ConstantPool::new(), "()I", 4, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(9)));

        // aconst_null; arraylength; ireturn
        let code = [0x01, 0xbe, 0xac];
        let result = testing::run_static(ConstantPool::new(), "()I", 1, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
    }

    #[test]
    fn test_boolean_and_char_arrays() {
        // iconst_1; newarray boolean; dup; iconst_0; iconst_2; bastore; iconst_0; baload; ireturn
        let code = [0x04, 0xbc, 4, 0x59, 0x03, 0x05, 0x54, 0x03, 0x33, 0xac];
        let result = testing::run_static(ConstantPool::new(), "()I", 4, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(0)));

        // iconst_1; newarray char; dup; iconst_0; iconst_m1; castore; iconst_0; caload; ireturn
        let code = [0x04, 0xbc, 5, 0x59, 0x03, 0x02, 0x55, 0x03, 0x34, 0xac];
        let result = testing::run_static(ConstantPool::new(), "()I", 4, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(0xffff)));
    }

    #[test]
    fn test_multi_array() {
        let mut pool = ConstantPool::new();
        let [hi, lo] = index_bytes(pool.class("[[I").unwrap());
        // iconst_2; iconst_3; multianewarray [[I 2; iconst_1; aaload; arraylength; ireturn
        let code = [0x05, 0x06, 0xc5, hi, lo, 2, 0x04, 0x32, 0xbe, 0xac];
        let result = testing::run_static(pool.clone(), "()I", 2, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(3)));

        // iconst_2; iconst_m1; multianewarray [[I 2; areturn
        let code = [0x05, 0x02, 0xc5, hi, lo, 2, 0xb0];
        let result = testing::run_static(pool, "()[[I", 2, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), NEGATIVE_ARRAY_SIZE_EXCEPTION);
    }

    #[test]
    fn test_huge_arrays_halt() {
        // iload_0; newarray long; areturn
        let code = [0x1a, 0xbc, 11, 0xb0];
        let (runtime, class) =
            testing::runtime_with_static(ConstantPool::new(), "(I)[J", 1, 1, &code, &[]);
        let mut thread = runtime.new_thread("main");

        let args = [RuntimeValue::Int(i32::MAX)];
        let result = thread.invoke_static(class.name(), "run", "(I)[J", &args);
        assert!(matches!(result, Err(GeneralError::ResourceExhausted { .. })));
        assert!(thread.is_halted());
        assert_eq!(thread.depth(), 0);

        let mut other = runtime.new_thread("other");
        let args = [RuntimeValue::Int(4)];
        let result = other.invoke_static(class.name(), "run", "(I)[J", &args);
        let array = testing::returned(result).and_then(RuntimeValue::into_reference).flatten();
        assert_eq!(array.and_then(|array| array.array_len()), Some(4));
    }

    #[test]
    fn test_multi_array_budget() {
        let mut pool = ConstantPool::new();
        let [hi, lo] = index_bytes(pool.class("[[I").unwrap());
        // iload_0; iload_1; multianewarray [[I 2; areturn
        let code = [0x1a, 0x1b, 0xc5, hi, lo, 2, 0xb0];
        let data = testing::static_class(pool, "(II)[[I", 2, 2, &code, &[]);
        let mut conf = StateConfig::new();
        conf.max_array_bytes = Some(1 << 20);
        let runtime = testing::runtime_with_conf(vec![data], conf);

        // The outer array alone is over the budget, so the inner ones are never made
        let mut thread = runtime.new_thread("outer");
        let args = [RuntimeValue::Int(i32::MAX), RuntimeValue::Int(0)];
        let result = thread.invoke_static("T", "run", "(II)[[I", &args);
        assert!(matches!(result, Err(GeneralError::ResourceExhausted { .. })));
        assert!(thread.is_halted());

        // Each inner array fits but all of them together don't
        let mut thread = runtime.new_thread("inner");
        let args = [RuntimeValue::Int(1000), RuntimeValue::Int(1000)];
        let result = thread.invoke_static("T", "run", "(II)[[I", &args);
        assert!(matches!(result, Err(GeneralError::ResourceExhausted { .. })));
        assert_eq!(thread.depth(), 0);

        let mut thread = runtime.new_thread("small");
        let args = [RuntimeValue::Int(10), RuntimeValue::Int(10)];
        let result = thread.invoke_static("T", "run", "(II)[[I", &args);
        let array = testing::returned(result).and_then(RuntimeValue::into_reference).flatten();
        assert_eq!(array.and_then(|array| array.array_len()), Some(10));
    }

    #[test]
    fn test_store_check_and_cast() {
        let mut pool = ConstantPool::new();
        let [s_hi, s_lo] = index_bytes(pool.class("java/lang/String").unwrap());
        let [o_hi, o_lo] = index_bytes(pool.class("java/lang/Object").unwrap());

        // iconst_1; anewarray String; iconst_0; new Object; aastore; return
        let code = [0x04, 0xbd, s_hi, s_lo, 0x03, 0xbb, o_hi, o_lo, 0x53, 0xb1];
        let result = testing::run_static(pool.clone(), "()V", 3, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), ARRAY_STORE_EXCEPTION);

        // new Object; checkcast String; areturn
        let code = [0xbb, o_hi, o_lo, 0xc0, s_hi, s_lo, 0xb0];
        let result = testing::run_static(pool.clone(), "()Ljava/lang/Object;", 1, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), CLASS_CAST_EXCEPTION);

        // new Object; instanceof Object; ireturn
        let code = [0xbb, o_hi, o_lo, 0xc1, o_hi, o_lo, 0xac];
        let result = testing::run_static(pool.clone(), "()I", 1, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));

        // aconst_null; checkcast String; instanceof String; ireturn
        let code = [0x01, 0xc0, s_hi, s_lo, 0xc1, s_hi, s_lo, 0xac];
        let result = testing::run_static(pool, "()I", 1, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(0)));
    }

    #[test]
    fn test_monitors() {
        let mut pool = ConstantPool::new();
        let [o_hi, o_lo] = index_bytes(pool.class("java/lang/Object").unwrap());

        // new Object; monitorexit; return
        let code = [0xbb, o_hi, o_lo, 0xc3, 0xb1];
        let result = testing::run_static(pool.clone(), "()V", 1, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), ILLEGAL_MONITOR_STATE_EXCEPTION);

        // new Object; dup; dup; monitorenter; monitorenter; dup; monitorexit; monitorexit; return
        let code = [0xbb, o_hi, o_lo, 0x59, 0x59, 0xc2, 0xc2, 0x59, 0xc3, 0xc3, 0xb1];
        let result = testing::run_static(pool, "()V", 3, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), None);

        // aconst_null; monitorenter; return
        let code = [0x01, 0xc2, 0xb1];
        let result = testing::run_static(ConstantPool::new(), "()V", 1, 0, &code, &[], &[]);
        assert_eq!(testing::thrown_class(result), NULL_POINTER_EXCEPTION);
    }
}
