use std::sync::Arc;

use usize_cast::IntoUsize;

use crate::{
    class::ArrayComponent,
    eval::{ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION, NULL_POINTER_EXCEPTION},
    object::{ArrayElements, Ref},
    rv::RuntimeValue,
};

use super::{NativeCall, NativeMethods, NativeResult};

pub(super) fn register(natives: &NativeMethods) {
    natives.register(
        "java/lang/System.identityHashCode(Ljava/lang/Object;)I",
        system_identity_hash_code,
    );
    natives.register(
        "java/lang/System.arraycopy(Ljava/lang/Object;ILjava/lang/Object;II)V",
        system_arraycopy,
    );
}

fn system_identity_hash_code(mut call: NativeCall<'_>) -> NativeResult {
    let hash = call.ref_arg()?.map_or(0, |object| object.identity_hash());
    call.ret(hash)
}

fn type_name(array: &Ref) -> String {
    array.class().name().replace('/', ".")
}

fn system_arraycopy(mut call: NativeCall<'_>) -> NativeResult {
    let source = call.ref_arg()?;
    let source_start = call.int_arg()?;
    let destination = call.ref_arg()?;
    let destination_start = call.int_arg()?;
    let count = call.int_arg()?;

    let (source, destination) = match (source, destination) {
        (Some(source), Some(destination)) => (source, destination),
        _ => return call.throw(NULL_POINTER_EXCEPTION, None),
    };

    let source_component = source.class().array_info().map(|(c, _)| c.clone());
    let destination_component = destination.class().array_info().map(|(c, _)| c.clone());
    let (source_component, destination_component) =
        match (source_component, destination_component) {
            (Some(s), Some(d)) => (s, d),
            (None, _) => {
                let message = format!(
                    "arraycopy: source type {} is not an array",
                    type_name(&source)
                );
                return call.throw(ARRAY_STORE_EXCEPTION, Some(&message));
            }
            (_, None) => {
                let message = format!(
                    "arraycopy: destination type {} is not an array",
                    type_name(&destination)
                );
                return call.throw(ARRAY_STORE_EXCEPTION, Some(&message));
            }
        };

    // References that need checking one by one, because the source's element type isn't
    // always storable in the destination
    let element_check = match (&source_component, &destination_component) {
        (ArrayComponent::Primitive(s), ArrayComponent::Primitive(d)) if s == d => None,
        (ArrayComponent::Class(s), ArrayComponent::Class(d)) => {
            (!d.is_assignable_from(s)).then(|| Arc::clone(d))
        }
        _ => {
            let message = format!(
                "arraycopy: type mismatch: can not copy {} into {}",
                type_name(&source),
                type_name(&destination)
            );
            return call.throw(ARRAY_STORE_EXCEPTION, Some(&message));
        }
    };

    let source_len = source.array_len().unwrap_or(0);
    let destination_len = destination.array_len().unwrap_or(0);
    let out_of_bounds = if source_start < 0 {
        Some(format!(
            "arraycopy: source index {} out of bounds for length {}",
            source_start, source_len
        ))
    } else if destination_start < 0 {
        Some(format!(
            "arraycopy: destination index {} out of bounds for length {}",
            destination_start, destination_len
        ))
    } else if count < 0 {
        Some(format!("arraycopy: length {} is negative", count))
    } else if i64::from(source_start) + i64::from(count) > source_len as i64 {
        Some(format!(
            "arraycopy: last source index {} out of bounds for length {}",
            i64::from(source_start) + i64::from(count),
            source_len
        ))
    } else if i64::from(destination_start) + i64::from(count) > destination_len as i64 {
        Some(format!(
            "arraycopy: last destination index {} out of bounds for length {}",
            i64::from(destination_start) + i64::from(count),
            destination_len
        ))
    } else {
        None
    };
    if let Some(message) = out_of_bounds {
        return call.throw(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message));
    }

    let source_start = source_start.unsigned_abs().into_usize();
    let destination_start = destination_start.unsigned_abs().into_usize();
    let count = count.unsigned_abs().into_usize();

    if source == destination {
        source.with_array_mut(|elements| {
            elements.copy_within(source_start..source_start + count, destination_start)
        });
        return call.ret_void();
    }

    let mut copied = match source.with_array(|e| e.sub_array(source_start..source_start + count)) {
        Some(Some(copied)) => copied,
        _ => return call.ret_void(),
    };

    // Elements before the first one that can't be stored are still copied
    let mut store_failure = None;
    if let (Some(check), ArrayElements::Reference(elements)) = (&element_check, &mut copied) {
        let bad = elements.iter().position(|element| {
            element
                .as_ref()
                .map_or(false, |element| !check.is_assignable_from(element.class()))
        });
        if let Some(bad) = bad {
            store_failure = elements[bad].as_ref().map(type_name);
            elements.truncate(bad);
        }
    }

    destination.with_array_mut(|elements| elements.splice_from(destination_start, &copied));

    match store_failure {
        Some(element_type) => {
            let message = format!(
                "arraycopy: element type {} can not be stored into {}",
                element_type,
                type_name(&destination)
            );
            call.throw(ARRAY_STORE_EXCEPTION, Some(&message))
        }
        None => call.ret_void(),
    }
}
