use std::cmp::Ordering;

use jade_base::{
    code::inst::ArithOp,
    descriptor::{PrimitiveType, ValueKind},
    id::LocalVariableIndex,
};

use crate::{rv::RuntimeValue, GeneralError};

use super::{EvalError, RunInstArgs, RunInstValue, ARITHMETIC_EXCEPTION};

pub(crate) fn iinc(
    index: LocalVariableIndex,
    amount: i16,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let locals = thread.locals()?;
    let value = locals.get_int(index)?;
    // Java has overflow/underflow
    locals.set_int(index, value.wrapping_add(i32::from(amount)))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn discard(
    count: usize,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    thread.stack()?.discard(count)?;
    Ok(RunInstValue::Continue)
}

/// The whole `dup` family, by how many slots are copied and how far down the copy goes
pub(crate) fn dup(
    count: usize,
    skip: usize,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    thread.stack()?.dup_slots(count, skip)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn swap(RunInstArgs { thread, .. }: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    thread.stack()?.swap()?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn int_arith(
    op: ArithOp,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_int()?;
    let v1 = stack.pop_int()?;

    let value = match op {
        ArithOp::Add => v1.wrapping_add(v2),
        ArithOp::Sub => v1.wrapping_sub(v2),
        ArithOp::Mul => v1.wrapping_mul(v2),
        ArithOp::Div | ArithOp::Rem if v2 == 0 => {
            return thread.throw_new(ARITHMETIC_EXCEPTION, Some("/ by zero"))
        }
        // MIN / -1 overflows back to MIN
        ArithOp::Div => v1.wrapping_div(v2),
        ArithOp::Rem => v1.wrapping_rem(v2),
        ArithOp::Shl => v1.wrapping_shl((v2 & 0x1f) as u32),
        ArithOp::Shr => v1.wrapping_shr((v2 & 0x1f) as u32),
        ArithOp::UShr => ((v1 as u32) >> (v2 & 0x1f)) as i32,
        ArithOp::And => v1 & v2,
        ArithOp::Or => v1 | v2,
        ArithOp::Xor => v1 ^ v2,
    };

    thread.stack()?.push_int(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn long_arith(
    op: ArithOp,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let value = match op {
        // The shift distance is an int
        ArithOp::Shl | ArithOp::Shr | ArithOp::UShr => {
            let shift = (stack.pop_int()? & 0x3f) as u32;
            let v1 = stack.pop_long()?;
            match op {
                ArithOp::Shl => v1.wrapping_shl(shift),
                ArithOp::Shr => v1.wrapping_shr(shift),
                _ => ((v1 as u64) >> shift) as i64,
            }
        }
        _ => {
            let v2 = stack.pop_long()?;
            let v1 = stack.pop_long()?;
            match op {
                ArithOp::Add => v1.wrapping_add(v2),
                ArithOp::Sub => v1.wrapping_sub(v2),
                ArithOp::Mul => v1.wrapping_mul(v2),
                ArithOp::Div | ArithOp::Rem if v2 == 0 => {
                    return thread.throw_new(ARITHMETIC_EXCEPTION, Some("/ by zero"))
                }
                ArithOp::Div => v1.wrapping_div(v2),
                ArithOp::Rem => v1.wrapping_rem(v2),
                ArithOp::And => v1 & v2,
                ArithOp::Or => v1 | v2,
                _ => v1 ^ v2,
            }
        }
    };

    thread.stack()?.push_long(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn float_arith(
    op: ArithOp,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_float()?;
    let v1 = stack.pop_float()?;
    // Rust's float `%` is fmod, the same as `frem`
    let value = match op {
        ArithOp::Add => v1 + v2,
        ArithOp::Sub => v1 - v2,
        ArithOp::Mul => v1 * v2,
        ArithOp::Div => v1 / v2,
        ArithOp::Rem => v1 % v2,
        _ => {
            return Err(EvalError::StackKindMismatch {
                expected: ValueKind::Int,
            }
            .into())
        }
    };
    stack.push_float(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn double_arith(
    op: ArithOp,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_double()?;
    let v1 = stack.pop_double()?;
    let value = match op {
        ArithOp::Add => v1 + v2,
        ArithOp::Sub => v1 - v2,
        ArithOp::Mul => v1 * v2,
        ArithOp::Div => v1 / v2,
        ArithOp::Rem => v1 % v2,
        _ => {
            return Err(EvalError::StackKindMismatch {
                expected: ValueKind::Long,
            }
            .into())
        }
    };
    stack.push_double(value)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn neg(
    kind: ValueKind,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    match kind {
        ValueKind::Int => {
            let v = stack.pop_int()?;
            stack.push_int(v.wrapping_neg())?;
        }
        ValueKind::Long => {
            let v = stack.pop_long()?;
            stack.push_long(v.wrapping_neg())?;
        }
        ValueKind::Float => {
            let v = stack.pop_float()?;
            stack.push_float(-v)?;
        }
        ValueKind::Double => {
            let v = stack.pop_double()?;
            stack.push_double(-v)?;
        }
        ValueKind::Reference => return Err(EvalError::StackKindMismatch { expected: kind }.into()),
    }
    Ok(RunInstValue::Continue)
}

/// Primitive conversions.
/// Float to integer casts in Rust saturate and send NaN to zero, which is what the JVM does.
pub(crate) fn convert(
    from: ValueKind,
    to: PrimitiveType,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let value = stack.pop_value(from)?;
    let converted = match (value, to) {
        (RuntimeValue::Int(v), PrimitiveType::Long) => RuntimeValue::Long(i64::from(v)),
        (RuntimeValue::Int(v), PrimitiveType::Float) => RuntimeValue::Float(v as f32),
        (RuntimeValue::Int(v), PrimitiveType::Double) => RuntimeValue::Double(f64::from(v)),
        (v @ RuntimeValue::Int(_), narrow) => v.narrow_to(narrow),

        (RuntimeValue::Long(v), PrimitiveType::Int) => RuntimeValue::Int(v as i32),
        (RuntimeValue::Long(v), PrimitiveType::Float) => RuntimeValue::Float(v as f32),
        (RuntimeValue::Long(v), PrimitiveType::Double) => RuntimeValue::Double(v as f64),

        (RuntimeValue::Float(v), PrimitiveType::Int) => RuntimeValue::Int(v as i32),
        (RuntimeValue::Float(v), PrimitiveType::Long) => RuntimeValue::Long(v as i64),
        (RuntimeValue::Float(v), PrimitiveType::Double) => RuntimeValue::Double(f64::from(v)),

        (RuntimeValue::Double(v), PrimitiveType::Int) => RuntimeValue::Int(v as i32),
        (RuntimeValue::Double(v), PrimitiveType::Long) => RuntimeValue::Long(v as i64),
        (RuntimeValue::Double(v), PrimitiveType::Float) => RuntimeValue::Float(v as f32),

        _ => {
            return Err(EvalError::StackKindMismatch {
                expected: to.value_kind(),
            }
            .into())
        }
    };
    stack.push_value(converted)?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn lcmp(RunInstArgs { thread, .. }: RunInstArgs) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_long()?;
    let v1 = stack.pop_long()?;
    stack.push_int(ordering_value(v1.cmp(&v2)))?;
    Ok(RunInstValue::Continue)
}

fn ordering_value(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// `NaN` compares as greater for the `g` variants and as less for the `l` variants
fn float_compare(ordering: Option<Ordering>, nan_greater: bool) -> i32 {
    match ordering {
        Some(ordering) => ordering_value(ordering),
        None if nan_greater => 1,
        None => -1,
    }
}

pub(crate) fn fcmp(
    nan_greater: bool,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_float()?;
    let v1 = stack.pop_float()?;
    stack.push_int(float_compare(v1.partial_cmp(&v2), nan_greater))?;
    Ok(RunInstValue::Continue)
}

pub(crate) fn dcmp(
    nan_greater: bool,
    RunInstArgs { thread, .. }: RunInstArgs,
) -> Result<RunInstValue, GeneralError> {
    let stack = thread.stack()?;
    let v2 = stack.pop_double()?;
    let v1 = stack.pop_double()?;
    stack.push_int(float_compare(v1.partial_cmp(&v2), nan_greater))?;
    Ok(RunInstValue::Continue)
}

#[cfg(test)]
mod tests {
    use jade_base::constant_pool::ConstantPool;

    use crate::{
        eval::{testing, ARITHMETIC_EXCEPTION},
        rv::RuntimeValue,
    };

    #[test]
    fn test_int_arith() {
        // iload_0 iload_1 idiv ireturn
        let div = [0x1a, 0x1b, 0x6c, 0xac];
        let run = |a: i32, b: i32| {
            testing::run_static(
                ConstantPool::new(),
                "(II)I",
                2,
                2,
                &div,
                &[],
                &[RuntimeValue::Int(a), RuntimeValue::Int(b)],
            )
        };
        assert_eq!(testing::returned(run(7, 2)), Some(RuntimeValue::Int(3)));
        assert_eq!(testing::returned(run(-7, 2)), Some(RuntimeValue::Int(-3)));
        assert_eq!(
            testing::returned(run(i32::MIN, -1)),
            Some(RuntimeValue::Int(i32::MIN))
        );
        assert_eq!(testing::thrown_class(run(1, 0)), ARITHMETIC_EXCEPTION);

        // iload_0 iload_1 ishl ireturn, the distance is masked to 5 bits
        let shl = [0x1a, 0x1b, 0x78, 0xac];
        let result = testing::run_static(
            ConstantPool::new(),
            "(II)I",
            2,
            2,
            &shl,
            &[],
            &[RuntimeValue::Int(1), RuntimeValue::Int(33)],
        );
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(2)));

        // iload_0 iload_1 iushr ireturn
        let ushr = [0x1a, 0x1b, 0x7c, 0xac];
        let result = testing::run_static(
            ConstantPool::new(),
            "(II)I",
            2,
            2,
            &ushr,
            &[],
            &[RuntimeValue::Int(-1), RuntimeValue::Int(28)],
        );
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(0xf)));
    }

    #[test]
    fn test_long_arith() {
        // lload_0 iload_2 lshl lreturn
        let shl = [0x1e, 0x1c, 0x79, 0xad];
        let result = testing::run_static(
            ConstantPool::new(),
            "(JI)J",
            3,
            3,
            &shl,
            &[],
            &[RuntimeValue::Long(3), RuntimeValue::Int(64 + 4)],
        );
        assert_eq!(testing::returned(result), Some(RuntimeValue::Long(48)));

        // lload_0 lload_2 lrem lreturn
        let rem = [0x1e, 0x20, 0x71, 0xad];
        let result = testing::run_static(
            ConstantPool::new(),
            "(JJ)J",
            4,
            4,
            &rem,
            &[],
            &[RuntimeValue::Long(5), RuntimeValue::Long(0)],
        );
        assert_eq!(testing::thrown_class(result), ARITHMETIC_EXCEPTION);
    }

    #[test]
    fn test_conversions_and_compare() {
        // fload_0 f2i ireturn
        let f2i = [0x22, 0x8b, 0xac];
        let run = |v: f32| {
            testing::run_static(
                ConstantPool::new(),
                "(F)I",
                1,
                1,
                &f2i,
                &[],
                &[RuntimeValue::Float(v)],
            )
        };
        assert_eq!(testing::returned(run(f32::NAN)), Some(RuntimeValue::Int(0)));
        assert_eq!(
            testing::returned(run(1e20)),
            Some(RuntimeValue::Int(i32::MAX))
        );
        assert_eq!(testing::returned(run(-2.7)), Some(RuntimeValue::Int(-2)));

        // iload_0 i2b ireturn
        let i2b = [0x1a, 0x91, 0xac];
        let result = testing::run_static(
            ConstantPool::new(),
            "(I)I",
            1,
            1,
            &i2b,
            &[],
            &[RuntimeValue::Int(0x1ff)],
        );
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(-1)));

        // fload_0 fload_1 fcmpg ireturn, and the same with fcmpl
        for (op, expected) in [(0x96, 1), (0x95, -1)] {
            let code = [0x22, 0x23, op, 0xac];
            let result = testing::run_static(
                ConstantPool::new(),
                "(FF)I",
                2,
                2,
                &code,
                &[],
                &[RuntimeValue::Float(f32::NAN), RuntimeValue::Float(1.0)],
            );
            assert_eq!(testing::returned(result), Some(RuntimeValue::Int(expected)));
        }
    }

    #[test]
    fn test_stack_ops() {
        // iconst_1 iconst_2 swap isub ireturn
        let code = [0x04, 0x05, 0x5f, 0x64, 0xac];
        let result = testing::run_static(ConstantPool::new(), "()I", 2, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(1)));

        // lconst_1 dup2 ladd lreturn
        let code = [0x0a, 0x5c, 0x61, 0xad];
        let result = testing::run_static(ConstantPool::new(), "()J", 4, 0, &code, &[], &[]);
        assert_eq!(testing::returned(result), Some(RuntimeValue::Long(2)));

        // iinc 0 -3; iload_0 ireturn
        let code = [0x84, 0x00, 0xfd, 0x1a, 0xac];
        let result = testing::run_static(
            ConstantPool::new(),
            "(I)I",
            1,
            1,
            &code,
            &[],
            &[RuntimeValue::Int(10)],
        );
        assert_eq!(testing::returned(result), Some(RuntimeValue::Int(7)));
    }
}
