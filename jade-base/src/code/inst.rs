//! The instruction set.
//! Every opcode decodes into one variant of [`Inst`], with families of opcodes (`iload_0`,
//! `iload`, `aload`, ...) folded together by their operand kind.
//! `Inst` is generic over how branch targets are represented: the decoder produces relative
//! byte offsets (`Inst<i32>`) and the graph builder turns those into node indices.

use smallvec::SmallVec;

use crate::{
    descriptor::{PrimitiveType, ValueKind},
    id::{ConstantPoolIndex, LocalVariableIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
}

/// Comparison against zero (`ifeq`..) or between two ints (`if_icmpeq`..)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}
impl Condition {
    #[must_use]
    pub fn check<T: Ord>(self, left: T, right: T) -> bool {
        match self {
            Condition::Eq => left == right,
            Condition::Ne => left != right,
            Condition::Lt => left < right,
            Condition::Ge => left >= right,
            Condition::Gt => left > right,
            Condition::Le => left <= right,
        }
    }
}

/// The element type an array load/store instruction works with.
/// `Byte` is used for both boolean and byte arrays, as `baload`/`bastore` are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}
impl ArrayKind {
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short | ArrayKind::Int => ValueKind::Int,
            ArrayKind::Long => ValueKind::Long,
            ArrayKind::Float => ValueKind::Float,
            ArrayKind::Double => ValueKind::Double,
            ArrayKind::Reference => ValueKind::Reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTableSwitch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSwitchKey(pub i32);

/// Dense jump table over `[low, high]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSwitch<L> {
    default: L,
    low: i32,
    high: i32,
    targets: Vec<L>,
}
impl<L> TableSwitch<L> {
    pub fn new(
        default: L,
        low: i32,
        high: i32,
        targets: Vec<L>,
    ) -> Result<TableSwitch<L>, InvalidTableSwitch> {
        if low > high {
            return Err(InvalidTableSwitch);
        }

        let count = i64::from(high) - i64::from(low) + 1;
        if usize::try_from(count).ok() != Some(targets.len()) {
            return Err(InvalidTableSwitch);
        }

        Ok(TableSwitch {
            default,
            low,
            high,
            targets,
        })
    }

    #[must_use]
    pub fn low(&self) -> i32 {
        self.low
    }

    #[must_use]
    pub fn high(&self) -> i32 {
        self.high
    }

    #[must_use]
    pub fn default(&self) -> &L {
        &self.default
    }

    #[must_use]
    pub fn targets(&self) -> &[L] {
        &self.targets
    }

    /// Get the target for the key, `key - low` if it is within `[low, high]` and the default
    /// otherwise
    #[must_use]
    pub fn target(&self, key: i32) -> &L {
        if key < self.low || key > self.high {
            return &self.default;
        }

        let index = i64::from(key) - i64::from(self.low);
        usize::try_from(index)
            .ok()
            .and_then(|i| self.targets.get(i))
            .unwrap_or(&self.default)
    }

    pub fn try_map<M, E>(
        self,
        mut f: impl FnMut(L) -> Result<M, E>,
    ) -> Result<TableSwitch<M>, E> {
        Ok(TableSwitch {
            default: f(self.default)?,
            low: self.low,
            high: self.high,
            targets: self.targets.into_iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

/// Sparse jump table, with the pairs kept in ascending key order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSwitch<L> {
    default: L,
    pairs: Vec<(i32, L)>,
}
impl<L> LookupSwitch<L> {
    /// Construct the switch, sorting the pairs.
    /// Keys must be unique.
    pub fn new(
        default: L,
        mut pairs: Vec<(i32, L)>,
    ) -> Result<LookupSwitch<L>, DuplicateSwitchKey> {
        pairs.sort_by_key(|(key, _)| *key);
        for window in pairs.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(DuplicateSwitchKey(window[0].0));
            }
        }

        Ok(LookupSwitch { default, pairs })
    }

    #[must_use]
    pub fn default(&self) -> &L {
        &self.default
    }

    #[must_use]
    pub fn pairs(&self) -> &[(i32, L)] {
        &self.pairs
    }

    /// Binary search for the key, falling back to the default
    #[must_use]
    pub fn target(&self, key: i32) -> &L {
        match self.pairs.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(index) => &self.pairs[index].1,
            Err(_) => &self.default,
        }
    }

    pub fn try_map<M, E>(
        self,
        mut f: impl FnMut(L) -> Result<M, E>,
    ) -> Result<LookupSwitch<M>, E> {
        let default = f(self.default)?;
        let pairs = self
            .pairs
            .into_iter()
            .map(|(key, target)| Ok((key, f(target)?)))
            .collect::<Result<_, E>>()?;
        Ok(LookupSwitch { default, pairs })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst<L> {
    Nop,
    AConstNull,
    /// `iconst_*`, `bipush`, `sipush`
    IConst(i32),
    LConst(i64),
    FConst(f32),
    DConst(f64),
    /// `ldc` and `ldc_w`
    Ldc(ConstantPoolIndex),
    /// `ldc2_w`
    Ldc2(ConstantPoolIndex),
    Load(ValueKind, LocalVariableIndex),
    Store(ValueKind, LocalVariableIndex),
    IInc {
        index: LocalVariableIndex,
        amount: i16,
    },
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    /// Binary operation on two values of the kind.
    /// Only `Int` and `Long` have the shift and bitwise operations.
    Arith(ValueKind, ArithOp),
    Neg(ValueKind),
    /// `i2l`, `f2d`, `i2b`, ...
    Convert {
        from: ValueKind,
        to: PrimitiveType,
    },
    LCmp,
    /// `fcmpl`/`fcmpg`, `nan_greater` is set for the `g` variant
    FCmp {
        nan_greater: bool,
    },
    DCmp {
        nan_greater: bool,
    },
    /// Compare an int against zero
    If(Condition, L),
    IfICmp(Condition, L),
    /// `if_acmpeq` when `equal` is true, else `if_acmpne`
    IfACmp {
        equal: bool,
        target: L,
    },
    IfNull(L),
    IfNonNull(L),
    /// `goto` and `goto_w`
    Goto(L),
    /// `jsr` and `jsr_w`
    Jsr(L),
    Ret(LocalVariableIndex),
    TableSwitch(Box<TableSwitch<L>>),
    LookupSwitch(Box<LookupSwitch<L>>),
    /// `None` for a void return
    Return(Option<ValueKind>),
    GetStatic(ConstantPoolIndex),
    PutStatic(ConstantPoolIndex),
    GetField(ConstantPoolIndex),
    PutField(ConstantPoolIndex),
    InvokeVirtual(ConstantPoolIndex),
    InvokeSpecial(ConstantPoolIndex),
    InvokeStatic(ConstantPoolIndex),
    InvokeInterface {
        index: ConstantPoolIndex,
        count: u8,
    },
    InvokeDynamic(ConstantPoolIndex),
    New(ConstantPoolIndex),
    NewArray(PrimitiveType),
    ANewArray(ConstantPoolIndex),
    ArrayLength,
    AThrow,
    CheckCast(ConstantPoolIndex),
    InstanceOf(ConstantPoolIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray {
        index: ConstantPoolIndex,
        dimensions: u8,
    },
}
impl<L> Inst<L> {
    /// Whether execution can continue to the next instruction in the code
    #[must_use]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Inst::Goto(_)
                | Inst::Jsr(_)
                | Inst::Ret(_)
                | Inst::TableSwitch(_)
                | Inst::LookupSwitch(_)
                | Inst::Return(_)
                | Inst::AThrow
        )
    }

    /// The constant pool entry this instruction refers to, if any
    #[must_use]
    pub fn constant_pool_index(&self) -> Option<ConstantPoolIndex> {
        match self {
            Inst::Ldc(i)
            | Inst::Ldc2(i)
            | Inst::GetStatic(i)
            | Inst::PutStatic(i)
            | Inst::GetField(i)
            | Inst::PutField(i)
            | Inst::InvokeVirtual(i)
            | Inst::InvokeSpecial(i)
            | Inst::InvokeStatic(i)
            | Inst::InvokeInterface { index: i, .. }
            | Inst::InvokeDynamic(i)
            | Inst::New(i)
            | Inst::ANewArray(i)
            | Inst::CheckCast(i)
            | Inst::InstanceOf(i)
            | Inst::MultiANewArray { index: i, .. } => Some(*i),
            _ => None,
        }
    }

    /// Every branch target of the instruction, not including fall-through
    #[must_use]
    pub fn targets(&self) -> SmallVec<[&L; 2]> {
        let mut res = SmallVec::new();
        match self {
            Inst::If(_, target)
            | Inst::IfICmp(_, target)
            | Inst::IfACmp { target, .. }
            | Inst::IfNull(target)
            | Inst::IfNonNull(target)
            | Inst::Goto(target)
            | Inst::Jsr(target) => res.push(target),
            Inst::TableSwitch(table) => {
                res.push(table.default());
                res.extend(table.targets().iter());
            }
            Inst::LookupSwitch(lookup) => {
                res.push(lookup.default());
                res.extend(lookup.pairs().iter().map(|(_, target)| target));
            }
            _ => {}
        }
        res
    }

    /// Convert the branch targets into a different representation
    pub fn try_map_targets<M, E>(
        self,
        mut f: impl FnMut(L) -> Result<M, E>,
    ) -> Result<Inst<M>, E> {
        Ok(match self {
            Inst::If(cond, target) => Inst::If(cond, f(target)?),
            Inst::IfICmp(cond, target) => Inst::IfICmp(cond, f(target)?),
            Inst::IfACmp { equal, target } => Inst::IfACmp {
                equal,
                target: f(target)?,
            },
            Inst::IfNull(target) => Inst::IfNull(f(target)?),
            Inst::IfNonNull(target) => Inst::IfNonNull(f(target)?),
            Inst::Goto(target) => Inst::Goto(f(target)?),
            Inst::Jsr(target) => Inst::Jsr(f(target)?),
            Inst::TableSwitch(table) => Inst::TableSwitch(Box::new(table.try_map(f)?)),
            Inst::LookupSwitch(lookup) => Inst::LookupSwitch(Box::new(lookup.try_map(f)?)),

            Inst::Nop => Inst::Nop,
            Inst::AConstNull => Inst::AConstNull,
            Inst::IConst(v) => Inst::IConst(v),
            Inst::LConst(v) => Inst::LConst(v),
            Inst::FConst(v) => Inst::FConst(v),
            Inst::DConst(v) => Inst::DConst(v),
            Inst::Ldc(i) => Inst::Ldc(i),
            Inst::Ldc2(i) => Inst::Ldc2(i),
            Inst::Load(kind, i) => Inst::Load(kind, i),
            Inst::Store(kind, i) => Inst::Store(kind, i),
            Inst::IInc { index, amount } => Inst::IInc { index, amount },
            Inst::ArrayLoad(kind) => Inst::ArrayLoad(kind),
            Inst::ArrayStore(kind) => Inst::ArrayStore(kind),
            Inst::Pop => Inst::Pop,
            Inst::Pop2 => Inst::Pop2,
            Inst::Dup => Inst::Dup,
            Inst::DupX1 => Inst::DupX1,
            Inst::DupX2 => Inst::DupX2,
            Inst::Dup2 => Inst::Dup2,
            Inst::Dup2X1 => Inst::Dup2X1,
            Inst::Dup2X2 => Inst::Dup2X2,
            Inst::Swap => Inst::Swap,
            Inst::Arith(kind, op) => Inst::Arith(kind, op),
            Inst::Neg(kind) => Inst::Neg(kind),
            Inst::Convert { from, to } => Inst::Convert { from, to },
            Inst::LCmp => Inst::LCmp,
            Inst::FCmp { nan_greater } => Inst::FCmp { nan_greater },
            Inst::DCmp { nan_greater } => Inst::DCmp { nan_greater },
            Inst::Ret(i) => Inst::Ret(i),
            Inst::Return(kind) => Inst::Return(kind),
            Inst::GetStatic(i) => Inst::GetStatic(i),
            Inst::PutStatic(i) => Inst::PutStatic(i),
            Inst::GetField(i) => Inst::GetField(i),
            Inst::PutField(i) => Inst::PutField(i),
            Inst::InvokeVirtual(i) => Inst::InvokeVirtual(i),
            Inst::InvokeSpecial(i) => Inst::InvokeSpecial(i),
            Inst::InvokeStatic(i) => Inst::InvokeStatic(i),
            Inst::InvokeInterface { index, count } => Inst::InvokeInterface { index, count },
            Inst::InvokeDynamic(i) => Inst::InvokeDynamic(i),
            Inst::New(i) => Inst::New(i),
            Inst::NewArray(prim) => Inst::NewArray(prim),
            Inst::ANewArray(i) => Inst::ANewArray(i),
            Inst::ArrayLength => Inst::ArrayLength,
            Inst::AThrow => Inst::AThrow,
            Inst::CheckCast(i) => Inst::CheckCast(i),
            Inst::InstanceOf(i) => Inst::InstanceOf(i),
            Inst::MonitorEnter => Inst::MonitorEnter,
            Inst::MonitorExit => Inst::MonitorExit,
            Inst::MultiANewArray { index, dimensions } => {
                Inst::MultiANewArray { index, dimensions }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Condition, DuplicateSwitchKey, InvalidTableSwitch, LookupSwitch, TableSwitch};

    #[test]
    fn test_lookup_switch() {
        let lookup = LookupSwitch::new('D', vec![(7, 'C'), (-5, 'A'), (0, 'B')]).unwrap();
        assert_eq!(lookup.pairs().iter().map(|x| x.0).collect::<Vec<_>>(), [-5, 0, 7]);
        assert_eq!(*lookup.target(0), 'B');
        assert_eq!(*lookup.target(3), 'D');
        assert_eq!(*lookup.target(7), 'C');
        assert_eq!(*lookup.target(-5), 'A');

        // Binary search agrees with a linear scan
        for key in -10..10 {
            let linear = lookup
                .pairs()
                .iter()
                .find(|(k, _)| *k == key)
                .map_or(lookup.default(), |(_, t)| t);
            assert_eq!(lookup.target(key), linear);
        }

        assert_eq!(
            LookupSwitch::new('D', vec![(1, 'A'), (1, 'B')]),
            Err(DuplicateSwitchKey(1))
        );
    }

    #[test]
    fn test_table_switch() {
        let table = TableSwitch::new("D", 2, 4, vec!["T2", "T3", "T4"]).unwrap();
        assert_eq!(*table.target(3), "T3");
        assert_eq!(*table.target(10), "D");
        assert_eq!(*table.target(1), "D");
        assert_eq!(*table.target(2), "T2");
        assert_eq!(*table.target(4), "T4");
        assert_eq!(*table.target(i32::MIN), "D");

        assert_eq!(
            TableSwitch::new("D", 4, 2, Vec::new()),
            Err(InvalidTableSwitch)
        );
        assert_eq!(
            TableSwitch::new("D", 2, 4, vec!["T2"]),
            Err(InvalidTableSwitch)
        );
    }

    #[test]
    fn test_conditions() {
        assert!(Condition::Lt.check(-1, 0));
        assert!(!Condition::Gt.check(0, 0));
        assert!(Condition::Ge.check(0, 0));
        assert!(Condition::Ne.check(1, 0));
    }
}
