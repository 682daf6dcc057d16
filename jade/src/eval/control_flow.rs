use jade_base::{
    code::inst::{Condition, LookupSwitch, TableSwitch},
    descriptor::ValueKind,
    id::NodeIndex,
};

use crate::{GeneralError, THROWABLE_CLASS_NAME};

use super::{EvalError, RunInstArgs, RunInstValue, NULL_POINTER_EXCEPTION};

fn branch(taken: bool, target: NodeIndex) -> RunInstValue {
    if taken {
        RunInstValue::ContinueAt(target)
    } else {
        RunInstValue::Continue
    }
}

pub(crate) fn if_zero(
    cond: Condition,
    target: NodeIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let value = thread.stack()?.pop_int()?;
    Ok(branch(cond.check(value, 0), target))
}

pub(crate) fn if_icmp(
    cond: Condition,
    target: NodeIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_int()?;
    let v1 = stack.pop_int()?;
    Ok(branch(cond.check(v1, v2), target))
}

/// Reference comparison is by identity
pub(crate) fn if_acmp(
    equal: bool,
    target: NodeIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_ref()?;
    let v1 = stack.pop_ref()?;
    Ok(branch((v1 == v2) == equal, target))
}

pub(crate) fn if_null(
    is_null: bool,
    target: NodeIndex,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let value = thread.stack()?.pop_ref()?;
    Ok(branch(value.is_none() == is_null, target))
}

pub(crate) fn table_switch(
    table: &TableSwitch<NodeIndex>,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let key = thread.stack()?.pop_int()?;
    Ok(RunInstValue::ContinueAt(*table.target(key)))
}

pub(crate) fn lookup_switch(
    lookup: &LookupSwitch<NodeIndex>,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let key = thread.stack()?.pop_int()?;
    Ok(RunInstValue::ContinueAt(*lookup.target(key)))
}

pub(crate) fn ret(
    kind: Option<ValueKind>,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    Ok(match kind {
        Some(kind) => RunInstValue::Return(thread.stack()?.pop_value(kind)?),
        None => RunInstValue::ReturnVoid,
    })
}

pub(crate) fn athrow(RunInstArgs { thread, .. }: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let exc = match thread.stack()?.pop_ref()? {
        Some(exc) => exc,
        None => {
            return thread.throw_new(
                NULL_POINTER_EXCEPTION,
                Some("Cannot throw exception because it is null"),
            )
        }
    };

    let throwable = thread.runtime().loader().load_class(THROWABLE_CLASS_NAME)?;
    if !throwable.is_assignable_from(exc.class()) {
        return Err(EvalError::ExpectedThrowable.into());
    }

    Ok(RunInstValue::Exception(exc))
}
