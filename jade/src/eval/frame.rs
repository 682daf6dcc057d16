//! Activation records.
//! The operand stack and the locals both keep two parallel tracks: the raw 32-bit halves of
//! every value, and a tag per slot saying what occupies it (holding the reference itself for
//! reference slots). Instructions like `dup2` and `swap` only need the tags to know whether they
//! would tear a long or double apart.

use std::sync::Arc;

use jade_base::{
    code::CodeInfo,
    descriptor::ValueKind,
    id::{LocalVariableIndex, NodeIndex},
};

use crate::{class::ClassMethod, object::Ref, rv::RuntimeValue};

use super::EvalError;

#[derive(Debug, Clone)]
pub enum Slot {
    /// A local that has never been written, or whose value was partially overwritten
    Empty,
    /// An int or float
    Narrow,
    /// The high half of a long or double, which comes first
    WideHigh,
    /// The low half of a long or double
    WideLow,
    Reference(Option<Ref>),
}
impl Slot {
    fn is_category_1(&self) -> bool {
        matches!(self, Slot::Narrow | Slot::Reference(_))
    }
}

fn split_wide(value: u64) -> [u32; 2] {
    [(value >> 32) as u32, value as u32]
}

fn join_wide(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

#[derive(Debug, Clone)]
pub struct Stack {
    raw: Vec<u32>,
    refs: Vec<Slot>,
    max: usize,
}
impl Stack {
    #[must_use]
    pub fn new(max: usize) -> Stack {
        Stack {
            raw: Vec::with_capacity(max),
            refs: Vec::with_capacity(max),
            max,
        }
    }

    /// Number of slots in use
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.refs.clear();
    }

    fn reserve(&mut self, count: usize) -> Result<(), EvalError> {
        if self.raw.len() + count > self.max {
            Err(EvalError::OperandStackFull)
        } else {
            Ok(())
        }
    }

    fn push_slot(&mut self, raw: u32, slot: Slot) -> Result<(), EvalError> {
        self.reserve(1)?;
        self.raw.push(raw);
        self.refs.push(slot);
        Ok(())
    }

    fn push_wide(&mut self, value: u64) -> Result<(), EvalError> {
        self.reserve(2)?;
        let [high, low] = split_wide(value);
        self.raw.push(high);
        self.refs.push(Slot::WideHigh);
        self.raw.push(low);
        self.refs.push(Slot::WideLow);
        Ok(())
    }

    pub fn push_int(&mut self, value: i32) -> Result<(), EvalError> {
        self.push_slot(value as u32, Slot::Narrow)
    }

    pub fn push_float(&mut self, value: f32) -> Result<(), EvalError> {
        self.push_slot(value.to_bits(), Slot::Narrow)
    }

    pub fn push_long(&mut self, value: i64) -> Result<(), EvalError> {
        self.push_wide(value as u64)
    }

    pub fn push_double(&mut self, value: f64) -> Result<(), EvalError> {
        self.push_wide(value.to_bits())
    }

    pub fn push_ref(&mut self, value: Option<Ref>) -> Result<(), EvalError> {
        self.push_slot(0, Slot::Reference(value))
    }

    pub fn push_value(&mut self, value: RuntimeValue) -> Result<(), EvalError> {
        match value {
            RuntimeValue::Int(v) => self.push_int(v),
            RuntimeValue::Long(v) => self.push_long(v),
            RuntimeValue::Float(v) => self.push_float(v),
            RuntimeValue::Double(v) => self.push_double(v),
            RuntimeValue::Reference(v) => self.push_ref(v),
        }
    }

    fn pop_narrow(&mut self, expected: ValueKind) -> Result<u32, EvalError> {
        match self.refs.last() {
            Some(Slot::Narrow) => {}
            Some(_) => return Err(EvalError::StackKindMismatch { expected }),
            None => return Err(EvalError::StackUnderflow),
        }
        self.refs.pop();
        self.raw.pop().ok_or(EvalError::StackUnderflow)
    }

    fn pop_wide(&mut self, expected: ValueKind) -> Result<u64, EvalError> {
        let len = self.refs.len();
        if len < 2 {
            return Err(EvalError::StackUnderflow);
        }
        if !matches!(
            (&self.refs[len - 2], &self.refs[len - 1]),
            (Slot::WideHigh, Slot::WideLow)
        ) {
            return Err(EvalError::StackKindMismatch { expected });
        }

        self.refs.truncate(len - 2);
        let low = self.raw.pop().ok_or(EvalError::StackUnderflow)?;
        let high = self.raw.pop().ok_or(EvalError::StackUnderflow)?;
        Ok(join_wide(high, low))
    }

    pub fn pop_int(&mut self) -> Result<i32, EvalError> {
        self.pop_narrow(ValueKind::Int).map(|x| x as i32)
    }

    pub fn pop_float(&mut self) -> Result<f32, EvalError> {
        self.pop_narrow(ValueKind::Float).map(f32::from_bits)
    }

    pub fn pop_long(&mut self) -> Result<i64, EvalError> {
        self.pop_wide(ValueKind::Long).map(|x| x as i64)
    }

    pub fn pop_double(&mut self) -> Result<f64, EvalError> {
        self.pop_wide(ValueKind::Double).map(f64::from_bits)
    }

    pub fn pop_ref(&mut self) -> Result<Option<Ref>, EvalError> {
        match self.refs.last() {
            Some(Slot::Reference(_)) => {}
            Some(_) => {
                return Err(EvalError::StackKindMismatch {
                    expected: ValueKind::Reference,
                })
            }
            None => return Err(EvalError::StackUnderflow),
        }
        self.raw.pop();
        match self.refs.pop() {
            Some(Slot::Reference(value)) => Ok(value),
            _ => Err(EvalError::StackUnderflow),
        }
    }

    pub fn pop_value(&mut self, kind: ValueKind) -> Result<RuntimeValue, EvalError> {
        Ok(match kind {
            ValueKind::Int => RuntimeValue::Int(self.pop_int()?),
            ValueKind::Long => RuntimeValue::Long(self.pop_long()?),
            ValueKind::Float => RuntimeValue::Float(self.pop_float()?),
            ValueKind::Double => RuntimeValue::Double(self.pop_double()?),
            ValueKind::Reference => RuntimeValue::Reference(self.pop_ref()?),
        })
    }

    /// Get the reference `depth` slots below the top, where 0 is the top slot
    pub fn peek_ref(&self, depth: usize) -> Result<Option<Ref>, EvalError> {
        let index = self
            .refs
            .len()
            .checked_sub(depth + 1)
            .ok_or(EvalError::StackUnderflow)?;
        match &self.refs[index] {
            Slot::Reference(value) => Ok(value.clone()),
            _ => Err(EvalError::StackKindMismatch {
                expected: ValueKind::Reference,
            }),
        }
    }

    /// Check that the top `depth` slots can be separated from the rest without tearing a wide
    /// value
    fn check_boundary(&self, depth: usize) -> Result<(), EvalError> {
        let index = self
            .refs
            .len()
            .checked_sub(depth)
            .ok_or(EvalError::StackUnderflow)?;
        match self.refs.get(index) {
            Some(Slot::WideLow) => Err(EvalError::SplitWideValue),
            _ => Ok(()),
        }
    }

    /// Remove the top `count` slots, returning them bottom first
    pub fn pop_slots(&mut self, count: usize) -> Result<(Vec<u32>, Vec<Slot>), EvalError> {
        self.check_boundary(count)?;
        let at = self.raw.len() - count;
        Ok((self.raw.split_off(at), self.refs.split_off(at)))
    }

    /// Push slots taken off another stack, bottom first
    pub fn push_slots(&mut self, raw: Vec<u32>, refs: Vec<Slot>) -> Result<(), EvalError> {
        self.reserve(raw.len())?;
        self.raw.extend(raw);
        self.refs.extend(refs);
        Ok(())
    }

    /// `pop` and `pop2`
    pub fn discard(&mut self, count: usize) -> Result<(), EvalError> {
        self.pop_slots(count).map(|_| ())
    }

    /// Copy the top `count` slots and insert the copy `skip` slots further down.
    /// `dup` is `(1, 0)`, `dup_x1` is `(1, 1)`, `dup2_x2` is `(2, 2)` and so on.
    pub fn dup_slots(&mut self, count: usize, skip: usize) -> Result<(), EvalError> {
        self.check_boundary(count)?;
        self.check_boundary(count + skip)?;
        self.reserve(count)?;

        let len = self.raw.len();
        let raw = self.raw[len - count..].to_vec();
        let refs = self.refs[len - count..].to_vec();
        let at = len - count - skip;
        self.raw.splice(at..at, raw);
        self.refs.splice(at..at, refs);
        Ok(())
    }

    /// Swap the top two category 1 values
    pub fn swap(&mut self) -> Result<(), EvalError> {
        let len = self.refs.len();
        if len < 2 {
            return Err(EvalError::StackUnderflow);
        }
        if !self.refs[len - 1].is_category_1() || !self.refs[len - 2].is_category_1() {
            return Err(EvalError::SplitWideValue);
        }

        self.raw.swap(len - 1, len - 2);
        self.refs.swap(len - 1, len - 2);
        Ok(())
    }

    /// Whether the slot `depth` below the top holds a reference
    #[must_use]
    pub fn is_reference(&self, depth: usize) -> bool {
        self.refs
            .len()
            .checked_sub(depth + 1)
            .map_or(false, |i| matches!(self.refs[i], Slot::Reference(_)))
    }
}

#[derive(Debug, Clone)]
pub struct Locals {
    raw: Vec<u32>,
    refs: Vec<Slot>,
}
impl Locals {
    #[must_use]
    pub fn new(count: usize) -> Locals {
        Locals {
            raw: vec![0; count],
            refs: vec![Slot::Empty; count],
        }
    }

    /// Locals starting with the given slots, such as the arguments of an invocation
    #[must_use]
    pub fn with_initial(count: usize, raw: Vec<u32>, refs: Vec<Slot>) -> Locals {
        let mut locals = Locals { raw, refs };
        let count = count.max(locals.raw.len());
        locals.raw.resize(count, 0);
        locals.refs.resize(count, Slot::Empty);
        locals
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn slot(&self, index: LocalVariableIndex) -> Result<&Slot, EvalError> {
        self.refs
            .get(usize::from(index))
            .ok_or(EvalError::MissingLocal(index))
    }

    fn get_narrow(&self, index: LocalVariableIndex, expected: ValueKind) -> Result<u32, EvalError> {
        match self.slot(index)? {
            Slot::Narrow => Ok(self.raw[usize::from(index)]),
            _ => Err(EvalError::LocalKindMismatch { index, expected }),
        }
    }

    fn get_wide(&self, index: LocalVariableIndex, expected: ValueKind) -> Result<u64, EvalError> {
        let i = usize::from(index);
        match (self.slot(index)?, self.refs.get(i + 1)) {
            (Slot::WideHigh, Some(Slot::WideLow)) => Ok(join_wide(self.raw[i], self.raw[i + 1])),
            _ => Err(EvalError::LocalKindMismatch { index, expected }),
        }
    }

    pub fn get_int(&self, index: LocalVariableIndex) -> Result<i32, EvalError> {
        self.get_narrow(index, ValueKind::Int).map(|x| x as i32)
    }

    pub fn get_float(&self, index: LocalVariableIndex) -> Result<f32, EvalError> {
        self.get_narrow(index, ValueKind::Float).map(f32::from_bits)
    }

    pub fn get_long(&self, index: LocalVariableIndex) -> Result<i64, EvalError> {
        self.get_wide(index, ValueKind::Long).map(|x| x as i64)
    }

    pub fn get_double(&self, index: LocalVariableIndex) -> Result<f64, EvalError> {
        self.get_wide(index, ValueKind::Double).map(f64::from_bits)
    }

    pub fn get_ref(&self, index: LocalVariableIndex) -> Result<Option<Ref>, EvalError> {
        match self.slot(index)? {
            Slot::Reference(value) => Ok(value.clone()),
            _ => Err(EvalError::LocalKindMismatch {
                index,
                expected: ValueKind::Reference,
            }),
        }
    }

    pub fn get_value(
        &self,
        index: LocalVariableIndex,
        kind: ValueKind,
    ) -> Result<RuntimeValue, EvalError> {
        Ok(match kind {
            ValueKind::Int => RuntimeValue::Int(self.get_int(index)?),
            ValueKind::Long => RuntimeValue::Long(self.get_long(index)?),
            ValueKind::Float => RuntimeValue::Float(self.get_float(index)?),
            ValueKind::Double => RuntimeValue::Double(self.get_double(index)?),
            ValueKind::Reference => RuntimeValue::Reference(self.get_ref(index)?),
        })
    }

    /// Overwriting half of a wide value leaves the other half unusable
    fn invalidate_partner(&mut self, i: usize) {
        match self.refs[i] {
            Slot::WideHigh => {
                if let Some(low) = self.refs.get_mut(i + 1) {
                    *low = Slot::Empty;
                }
            }
            Slot::WideLow => {
                if let Some(high) = i.checked_sub(1).and_then(|j| self.refs.get_mut(j)) {
                    *high = Slot::Empty;
                }
            }
            _ => {}
        }
    }

    fn set_slot(&mut self, index: LocalVariableIndex, raw: u32, slot: Slot) -> Result<(), EvalError> {
        let i = usize::from(index);
        if i >= self.refs.len() {
            return Err(EvalError::MissingLocal(index));
        }

        self.invalidate_partner(i);
        self.raw[i] = raw;
        self.refs[i] = slot;
        Ok(())
    }

    fn set_wide(&mut self, index: LocalVariableIndex, value: u64) -> Result<(), EvalError> {
        let i = usize::from(index);
        if i + 1 >= self.refs.len() {
            return Err(EvalError::MissingLocal(index));
        }

        self.invalidate_partner(i);
        self.invalidate_partner(i + 1);
        let [high, low] = split_wide(value);
        self.raw[i] = high;
        self.refs[i] = Slot::WideHigh;
        self.raw[i + 1] = low;
        self.refs[i + 1] = Slot::WideLow;
        Ok(())
    }

    pub fn set_int(&mut self, index: LocalVariableIndex, value: i32) -> Result<(), EvalError> {
        self.set_slot(index, value as u32, Slot::Narrow)
    }

    pub fn set_float(&mut self, index: LocalVariableIndex, value: f32) -> Result<(), EvalError> {
        self.set_slot(index, value.to_bits(), Slot::Narrow)
    }

    pub fn set_long(&mut self, index: LocalVariableIndex, value: i64) -> Result<(), EvalError> {
        self.set_wide(index, value as u64)
    }

    pub fn set_double(&mut self, index: LocalVariableIndex, value: f64) -> Result<(), EvalError> {
        self.set_wide(index, value.to_bits())
    }

    pub fn set_ref(&mut self, index: LocalVariableIndex, value: Option<Ref>) -> Result<(), EvalError> {
        self.set_slot(index, 0, Slot::Reference(value))
    }

    pub fn set_value(
        &mut self,
        index: LocalVariableIndex,
        value: RuntimeValue,
    ) -> Result<(), EvalError> {
        match value {
            RuntimeValue::Int(v) => self.set_int(index, v),
            RuntimeValue::Long(v) => self.set_long(index, v),
            RuntimeValue::Float(v) => self.set_float(index, v),
            RuntimeValue::Double(v) => self.set_double(index, v),
            RuntimeValue::Reference(v) => self.set_ref(index, v),
        }
    }
}

/// One activation of a method
#[derive(Debug)]
pub struct Frame {
    /// `None` for the root frame that an invocation from the host starts in
    method: Option<ClassMethod>,
    code: Option<Arc<CodeInfo>>,
    pub(crate) pc: NodeIndex,
    pub locals: Locals,
    pub stack: Stack,
    /// The monitor held for a synchronized method, released when the frame is popped
    pub(crate) sync: Option<Ref>,
}
impl Frame {
    /// The frame that host arguments are pushed onto and the final result is returned to
    #[must_use]
    pub(crate) fn root(stack_size: usize) -> Frame {
        Frame {
            method: None,
            code: None,
            pc: NodeIndex::new(0),
            locals: Locals::new(0),
            stack: Stack::new(stack_size),
            sync: None,
        }
    }

    #[must_use]
    pub(crate) fn new(method: ClassMethod, code: Arc<CodeInfo>, locals: Locals) -> Frame {
        let pc = code.graph().entry();
        let stack = Stack::new(usize::from(code.max_stack()));
        Frame {
            method: Some(method),
            code: Some(code),
            pc,
            locals,
            stack,
            sync: None,
        }
    }

    #[must_use]
    pub fn method(&self) -> Option<&ClassMethod> {
        self.method.as_ref()
    }

    #[must_use]
    pub fn code(&self) -> Option<&Arc<CodeInfo>> {
        self.code.as_ref()
    }

    #[must_use]
    pub fn pc(&self) -> NodeIndex {
        self.pc
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.method.is_none()
    }

    /// Slots counted against the thread's stack limit
    #[must_use]
    pub(crate) fn slot_cost(&self) -> usize {
        self.locals.len() + self.stack.max
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jade_base::{
        class::ClassAccessFlags, constant_pool::ConstantPool, descriptor::ValueKind,
    };

    use crate::{class::Class, eval::EvalError, object::Ref};

    use super::{Locals, Stack};

    fn dummy_ref() -> Ref {
        let class = Arc::new(Class::new(
            "Dummy".to_owned(),
            ClassAccessFlags::PUBLIC,
            None,
            Vec::new(),
            ConstantPool::new(),
            Vec::new(),
            Vec::new(),
            0,
            0,
        ));
        Ref::new_instance(class)
    }

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new(8);
        stack.push_int(-4).unwrap();
        stack.push_long(i64::MIN + 7).unwrap();
        stack.push_double(2.5).unwrap();
        stack.push_ref(None).unwrap();
        assert_eq!(stack.len(), 6);

        assert!(matches!(
            stack.pop_int(),
            Err(EvalError::StackKindMismatch {
                expected: ValueKind::Int
            })
        ));
        assert_eq!(stack.pop_ref().unwrap(), None);
        // Both halves of a wide value are needed, which one int can't provide
        stack.push_int(3).unwrap();
        assert!(matches!(
            stack.pop_long(),
            Err(EvalError::StackKindMismatch {
                expected: ValueKind::Long
            })
        ));
        assert_eq!(stack.pop_int().unwrap(), 3);
        assert_eq!(stack.pop_double().unwrap(), 2.5);
        assert_eq!(stack.pop_long().unwrap(), i64::MIN + 7);
        assert!(matches!(
            stack.pop_ref(),
            Err(EvalError::StackKindMismatch { .. })
        ));
        assert_eq!(stack.pop_int().unwrap(), -4);
        assert!(matches!(stack.pop_int(), Err(EvalError::StackUnderflow)));

        let mut small = Stack::new(1);
        assert!(matches!(
            small.push_long(1),
            Err(EvalError::OperandStackFull)
        ));
    }

    #[test]
    fn test_dup_family() {
        let obj = dummy_ref();

        // dup_x1: ..., a, b -> ..., b, a, b
        let mut stack = Stack::new(8);
        stack.push_int(1).unwrap();
        stack.push_ref(Some(obj.clone())).unwrap();
        stack.dup_slots(1, 1).unwrap();
        assert!(stack.is_reference(0));
        assert!(!stack.is_reference(1));
        assert!(stack.is_reference(2));
        assert_eq!(stack.pop_ref().unwrap(), Some(obj.clone()));
        assert_eq!(stack.pop_int().unwrap(), 1);
        assert_eq!(stack.pop_ref().unwrap(), Some(obj.clone()));

        // dup2 on a long copies it whole, dup on it would tear it
        let mut stack = Stack::new(8);
        stack.push_long(0x1234_5678_9abc).unwrap();
        assert!(matches!(
            stack.dup_slots(1, 0),
            Err(EvalError::SplitWideValue)
        ));
        stack.dup_slots(2, 0).unwrap();
        assert_eq!(stack.pop_long().unwrap(), 0x1234_5678_9abc);
        assert_eq!(stack.pop_long().unwrap(), 0x1234_5678_9abc);

        // dup2_x1 with a long over an int: ..., i, l -> ..., l, i, l
        let mut stack = Stack::new(8);
        stack.push_int(3).unwrap();
        stack.push_long(-9).unwrap();
        stack.dup_slots(2, 1).unwrap();
        assert_eq!(stack.pop_long().unwrap(), -9);
        assert_eq!(stack.pop_int().unwrap(), 3);
        assert_eq!(stack.pop_long().unwrap(), -9);

        // dup_x2 where the skipped part would cut a long in half
        let mut stack = Stack::new(8);
        stack.push_int(1).unwrap();
        stack.push_long(2).unwrap();
        stack.push_int(3).unwrap();
        assert!(stack.dup_slots(1, 1).is_err());
        stack.dup_slots(1, 2).unwrap();
        assert_eq!(stack.pop_int().unwrap(), 3);
        assert_eq!(stack.pop_long().unwrap(), 2);
        assert_eq!(stack.pop_int().unwrap(), 3);
        assert_eq!(stack.pop_int().unwrap(), 1);

        // swap and pop respect categories too
        let mut stack = Stack::new(8);
        stack.push_double(1.0).unwrap();
        assert!(matches!(stack.swap(), Err(EvalError::SplitWideValue)));
        assert!(matches!(stack.discard(1), Err(EvalError::SplitWideValue)));
        stack.discard(2).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn test_locals() {
        let mut locals = Locals::new(4);
        assert!(matches!(
            locals.get_int(0),
            Err(EvalError::LocalKindMismatch { index: 0, .. })
        ));
        assert!(matches!(locals.get_int(9), Err(EvalError::MissingLocal(9))));

        locals.set_long(1, 77).unwrap();
        assert_eq!(locals.get_long(1).unwrap(), 77);
        assert!(matches!(locals.set_long(3, 1), Err(EvalError::MissingLocal(3))));

        // Overwriting the low half invalidates the high half
        locals.set_int(2, 5).unwrap();
        assert!(locals.get_long(1).is_err());
        assert_eq!(locals.get_int(2).unwrap(), 5);

        locals.set_ref(0, Some(dummy_ref())).unwrap();
        assert!(locals.get_ref(0).unwrap().is_some());
        locals.set_float(0, 1.5).unwrap();
        assert_eq!(locals.get_float(0).unwrap(), 1.5);
        assert!(locals.get_ref(0).is_err());
    }
}
