//! Decoding of raw bytecode into positioned instructions.
//! Branch targets are left as offsets relative to the instruction, the graph builder resolves
//! them.

use std::fmt;

use crate::{
    descriptor::{PrimitiveType, ValueKind},
    id::{BytecodeOffset, ConstantPoolIndex},
};

use super::{
    inst::{
        ArithOp, ArrayKind, Condition, DuplicateSwitchKey, Inst, InvalidTableSwitch,
        LookupSwitch, TableSwitch,
    },
    op::Opcode,
};

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    UnknownOpcode {
        offset: BytecodeOffset,
        opcode: u8,
    },
    /// An instruction's operands ran past the end of the code
    UnexpectedEnd { offset: BytecodeOffset },
    /// `wide` followed by an opcode it can't modify
    InvalidWideOpcode {
        offset: BytecodeOffset,
        opcode: u8,
    },
    InvalidNewArrayType {
        offset: BytecodeOffset,
        atype: u8,
    },
    InvalidTableSwitch { offset: BytecodeOffset },
    DuplicateSwitchKey {
        offset: BytecodeOffset,
        key: i32,
    },
    /// The code is larger than offsets can represent
    CodeTooLarge,
}
impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode {:#x} at {}", opcode, offset)
            }
            DecodeError::UnexpectedEnd { offset } => {
                write!(f, "instruction at {} runs past the end of the code", offset)
            }
            DecodeError::InvalidWideOpcode { offset, opcode } => {
                write!(f, "opcode {:#x} can't be made wide at {}", opcode, offset)
            }
            DecodeError::InvalidNewArrayType { offset, atype } => {
                write!(f, "invalid newarray type {} at {}", atype, offset)
            }
            DecodeError::InvalidTableSwitch { offset } => {
                write!(f, "tableswitch at {} has invalid bounds", offset)
            }
            DecodeError::DuplicateSwitchKey { offset, key } => {
                write!(f, "lookupswitch at {} has duplicate key {}", offset, key)
            }
            DecodeError::CodeTooLarge => f.write_str("code is too large"),
        }
    }
}
impl std::error::Error for DecodeError {}

/// An instruction along with where it was in the code
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInst {
    pub offset: BytecodeOffset,
    pub opcode: Opcode,
    /// Branch targets are relative to `offset`
    pub inst: Inst<i32>,
}

struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
    /// Start of the instruction being read, for errors
    start: BytecodeOffset,
}
impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or(DecodeError::UnexpectedEnd { offset: self.start })?;
        self.pos += N;

        let mut res = [0; N];
        res.copy_from_slice(bytes);
        Ok(res)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(i8::from_be_bytes(self.take()?))
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn cp(&mut self) -> Result<ConstantPoolIndex, DecodeError> {
        Ok(ConstantPoolIndex::new(self.u16()?))
    }

    /// Skip the padding that aligns switch operands to 4 bytes from the start of the code
    fn align(&mut self) -> Result<(), DecodeError> {
        let padding = (4 - (self.pos % 4)) % 4;
        if self.pos + padding > self.code.len() {
            return Err(DecodeError::UnexpectedEnd { offset: self.start });
        }
        self.pos += padding;
        Ok(())
    }
}

/// Decode the entire code array of a method
pub fn decode(code: &[u8]) -> Result<Vec<DecodedInst>, DecodeError> {
    if u32::try_from(code.len()).is_err() {
        return Err(DecodeError::CodeTooLarge);
    }

    let mut reader = Reader {
        code,
        pos: 0,
        start: 0,
    };
    let mut res = Vec::new();
    while reader.pos < code.len() {
        let offset = u32::try_from(reader.pos).map_err(|_| DecodeError::CodeTooLarge)?;
        reader.start = offset;

        let raw = reader.u8()?;
        let opcode = Opcode::from_u8(raw).ok_or(DecodeError::UnknownOpcode {
            offset,
            opcode: raw,
        })?;

        let (opcode, inst) = if opcode == Opcode::Wide {
            decode_wide(&mut reader)?
        } else {
            (opcode, decode_inst(&mut reader, opcode)?)
        };

        res.push(DecodedInst {
            offset,
            opcode,
            inst,
        });
    }

    Ok(res)
}

fn decode_wide(reader: &mut Reader<'_>) -> Result<(Opcode, Inst<i32>), DecodeError> {
    let raw = reader.u8()?;
    let invalid = DecodeError::InvalidWideOpcode {
        offset: reader.start,
        opcode: raw,
    };
    let opcode = Opcode::from_u8(raw).ok_or_else(|| invalid.clone())?;

    let inst = match opcode {
        Opcode::ILoad => Inst::Load(ValueKind::Int, reader.u16()?),
        Opcode::LLoad => Inst::Load(ValueKind::Long, reader.u16()?),
        Opcode::FLoad => Inst::Load(ValueKind::Float, reader.u16()?),
        Opcode::DLoad => Inst::Load(ValueKind::Double, reader.u16()?),
        Opcode::ALoad => Inst::Load(ValueKind::Reference, reader.u16()?),
        Opcode::IStore => Inst::Store(ValueKind::Int, reader.u16()?),
        Opcode::LStore => Inst::Store(ValueKind::Long, reader.u16()?),
        Opcode::FStore => Inst::Store(ValueKind::Float, reader.u16()?),
        Opcode::DStore => Inst::Store(ValueKind::Double, reader.u16()?),
        Opcode::AStore => Inst::Store(ValueKind::Reference, reader.u16()?),
        Opcode::Ret => Inst::Ret(reader.u16()?),
        Opcode::IInc => Inst::IInc {
            index: reader.u16()?,
            amount: reader.i16()?,
        },
        _ => return Err(invalid),
    };

    Ok((opcode, inst))
}

#[allow(clippy::too_many_lines)]
fn decode_inst(reader: &mut Reader<'_>, opcode: Opcode) -> Result<Inst<i32>, DecodeError> {
    use ValueKind::{Double as D, Float as F, Int as I, Long as L, Reference as A};

    Ok(match opcode {
        Opcode::Nop => Inst::Nop,
        Opcode::AConstNull => Inst::AConstNull,
        Opcode::IConstM1 => Inst::IConst(-1),
        Opcode::IConst0 => Inst::IConst(0),
        Opcode::IConst1 => Inst::IConst(1),
        Opcode::IConst2 => Inst::IConst(2),
        Opcode::IConst3 => Inst::IConst(3),
        Opcode::IConst4 => Inst::IConst(4),
        Opcode::IConst5 => Inst::IConst(5),
        Opcode::LConst0 => Inst::LConst(0),
        Opcode::LConst1 => Inst::LConst(1),
        Opcode::FConst0 => Inst::FConst(0.0),
        Opcode::FConst1 => Inst::FConst(1.0),
        Opcode::FConst2 => Inst::FConst(2.0),
        Opcode::DConst0 => Inst::DConst(0.0),
        Opcode::DConst1 => Inst::DConst(1.0),
        Opcode::BiPush => Inst::IConst(i32::from(reader.i8()?)),
        Opcode::SiPush => Inst::IConst(i32::from(reader.i16()?)),
        Opcode::Ldc => Inst::Ldc(ConstantPoolIndex::new(u16::from(reader.u8()?))),
        Opcode::LdcW => Inst::Ldc(reader.cp()?),
        Opcode::Ldc2W => Inst::Ldc2(reader.cp()?),

        Opcode::ILoad => Inst::Load(I, u16::from(reader.u8()?)),
        Opcode::LLoad => Inst::Load(L, u16::from(reader.u8()?)),
        Opcode::FLoad => Inst::Load(F, u16::from(reader.u8()?)),
        Opcode::DLoad => Inst::Load(D, u16::from(reader.u8()?)),
        Opcode::ALoad => Inst::Load(A, u16::from(reader.u8()?)),
        Opcode::ILoad0 => Inst::Load(I, 0),
        Opcode::ILoad1 => Inst::Load(I, 1),
        Opcode::ILoad2 => Inst::Load(I, 2),
        Opcode::ILoad3 => Inst::Load(I, 3),
        Opcode::LLoad0 => Inst::Load(L, 0),
        Opcode::LLoad1 => Inst::Load(L, 1),
        Opcode::LLoad2 => Inst::Load(L, 2),
        Opcode::LLoad3 => Inst::Load(L, 3),
        Opcode::FLoad0 => Inst::Load(F, 0),
        Opcode::FLoad1 => Inst::Load(F, 1),
        Opcode::FLoad2 => Inst::Load(F, 2),
        Opcode::FLoad3 => Inst::Load(F, 3),
        Opcode::DLoad0 => Inst::Load(D, 0),
        Opcode::DLoad1 => Inst::Load(D, 1),
        Opcode::DLoad2 => Inst::Load(D, 2),
        Opcode::DLoad3 => Inst::Load(D, 3),
        Opcode::ALoad0 => Inst::Load(A, 0),
        Opcode::ALoad1 => Inst::Load(A, 1),
        Opcode::ALoad2 => Inst::Load(A, 2),
        Opcode::ALoad3 => Inst::Load(A, 3),

        Opcode::IALoad => Inst::ArrayLoad(ArrayKind::Int),
        Opcode::LALoad => Inst::ArrayLoad(ArrayKind::Long),
        Opcode::FALoad => Inst::ArrayLoad(ArrayKind::Float),
        Opcode::DALoad => Inst::ArrayLoad(ArrayKind::Double),
        Opcode::AALoad => Inst::ArrayLoad(ArrayKind::Reference),
        Opcode::BALoad => Inst::ArrayLoad(ArrayKind::Byte),
        Opcode::CALoad => Inst::ArrayLoad(ArrayKind::Char),
        Opcode::SALoad => Inst::ArrayLoad(ArrayKind::Short),

        Opcode::IStore => Inst::Store(I, u16::from(reader.u8()?)),
        Opcode::LStore => Inst::Store(L, u16::from(reader.u8()?)),
        Opcode::FStore => Inst::Store(F, u16::from(reader.u8()?)),
        Opcode::DStore => Inst::Store(D, u16::from(reader.u8()?)),
        Opcode::AStore => Inst::Store(A, u16::from(reader.u8()?)),
        Opcode::IStore0 => Inst::Store(I, 0),
        Opcode::IStore1 => Inst::Store(I, 1),
        Opcode::IStore2 => Inst::Store(I, 2),
        Opcode::IStore3 => Inst::Store(I, 3),
        Opcode::LStore0 => Inst::Store(L, 0),
        Opcode::LStore1 => Inst::Store(L, 1),
        Opcode::LStore2 => Inst::Store(L, 2),
        Opcode::LStore3 => Inst::Store(L, 3),
        Opcode::FStore0 => Inst::Store(F, 0),
        Opcode::FStore1 => Inst::Store(F, 1),
        Opcode::FStore2 => Inst::Store(F, 2),
        Opcode::FStore3 => Inst::Store(F, 3),
        Opcode::DStore0 => Inst::Store(D, 0),
        Opcode::DStore1 => Inst::Store(D, 1),
        Opcode::DStore2 => Inst::Store(D, 2),
        Opcode::DStore3 => Inst::Store(D, 3),
        Opcode::AStore0 => Inst::Store(A, 0),
        Opcode::AStore1 => Inst::Store(A, 1),
        Opcode::AStore2 => Inst::Store(A, 2),
        Opcode::AStore3 => Inst::Store(A, 3),

        Opcode::IAStore => Inst::ArrayStore(ArrayKind::Int),
        Opcode::LAStore => Inst::ArrayStore(ArrayKind::Long),
        Opcode::FAStore => Inst::ArrayStore(ArrayKind::Float),
        Opcode::DAStore => Inst::ArrayStore(ArrayKind::Double),
        Opcode::AAStore => Inst::ArrayStore(ArrayKind::Reference),
        Opcode::BAStore => Inst::ArrayStore(ArrayKind::Byte),
        Opcode::CAStore => Inst::ArrayStore(ArrayKind::Char),
        Opcode::SAStore => Inst::ArrayStore(ArrayKind::Short),

        Opcode::Pop => Inst::Pop,
        Opcode::Pop2 => Inst::Pop2,
        Opcode::Dup => Inst::Dup,
        Opcode::DupX1 => Inst::DupX1,
        Opcode::DupX2 => Inst::DupX2,
        Opcode::Dup2 => Inst::Dup2,
        Opcode::Dup2X1 => Inst::Dup2X1,
        Opcode::Dup2X2 => Inst::Dup2X2,
        Opcode::Swap => Inst::Swap,

        Opcode::IAdd => Inst::Arith(I, ArithOp::Add),
        Opcode::LAdd => Inst::Arith(L, ArithOp::Add),
        Opcode::FAdd => Inst::Arith(F, ArithOp::Add),
        Opcode::DAdd => Inst::Arith(D, ArithOp::Add),
        Opcode::ISub => Inst::Arith(I, ArithOp::Sub),
        Opcode::LSub => Inst::Arith(L, ArithOp::Sub),
        Opcode::FSub => Inst::Arith(F, ArithOp::Sub),
        Opcode::DSub => Inst::Arith(D, ArithOp::Sub),
        Opcode::IMul => Inst::Arith(I, ArithOp::Mul),
        Opcode::LMul => Inst::Arith(L, ArithOp::Mul),
        Opcode::FMul => Inst::Arith(F, ArithOp::Mul),
        Opcode::DMul => Inst::Arith(D, ArithOp::Mul),
        Opcode::IDiv => Inst::Arith(I, ArithOp::Div),
        Opcode::LDiv => Inst::Arith(L, ArithOp::Div),
        Opcode::FDiv => Inst::Arith(F, ArithOp::Div),
        Opcode::DDiv => Inst::Arith(D, ArithOp::Div),
        Opcode::IRem => Inst::Arith(I, ArithOp::Rem),
        Opcode::LRem => Inst::Arith(L, ArithOp::Rem),
        Opcode::FRem => Inst::Arith(F, ArithOp::Rem),
        Opcode::DRem => Inst::Arith(D, ArithOp::Rem),
        Opcode::INeg => Inst::Neg(I),
        Opcode::LNeg => Inst::Neg(L),
        Opcode::FNeg => Inst::Neg(F),
        Opcode::DNeg => Inst::Neg(D),
        Opcode::IShl => Inst::Arith(I, ArithOp::Shl),
        Opcode::LShl => Inst::Arith(L, ArithOp::Shl),
        Opcode::IShr => Inst::Arith(I, ArithOp::Shr),
        Opcode::LShr => Inst::Arith(L, ArithOp::Shr),
        Opcode::IUShr => Inst::Arith(I, ArithOp::UShr),
        Opcode::LUShr => Inst::Arith(L, ArithOp::UShr),
        Opcode::IAnd => Inst::Arith(I, ArithOp::And),
        Opcode::LAnd => Inst::Arith(L, ArithOp::And),
        Opcode::IOr => Inst::Arith(I, ArithOp::Or),
        Opcode::LOr => Inst::Arith(L, ArithOp::Or),
        Opcode::IXor => Inst::Arith(I, ArithOp::Xor),
        Opcode::LXor => Inst::Arith(L, ArithOp::Xor),
        Opcode::IInc => Inst::IInc {
            index: u16::from(reader.u8()?),
            amount: i16::from(reader.i8()?),
        },

        Opcode::I2L => convert(I, PrimitiveType::Long),
        Opcode::I2F => convert(I, PrimitiveType::Float),
        Opcode::I2D => convert(I, PrimitiveType::Double),
        Opcode::L2I => convert(L, PrimitiveType::Int),
        Opcode::L2F => convert(L, PrimitiveType::Float),
        Opcode::L2D => convert(L, PrimitiveType::Double),
        Opcode::F2I => convert(F, PrimitiveType::Int),
        Opcode::F2L => convert(F, PrimitiveType::Long),
        Opcode::F2D => convert(F, PrimitiveType::Double),
        Opcode::D2I => convert(D, PrimitiveType::Int),
        Opcode::D2L => convert(D, PrimitiveType::Long),
        Opcode::D2F => convert(D, PrimitiveType::Float),
        Opcode::I2B => convert(I, PrimitiveType::Byte),
        Opcode::I2C => convert(I, PrimitiveType::Char),
        Opcode::I2S => convert(I, PrimitiveType::Short),

        Opcode::LCmp => Inst::LCmp,
        Opcode::FCmpL => Inst::FCmp { nan_greater: false },
        Opcode::FCmpG => Inst::FCmp { nan_greater: true },
        Opcode::DCmpL => Inst::DCmp { nan_greater: false },
        Opcode::DCmpG => Inst::DCmp { nan_greater: true },

        Opcode::IfEq => Inst::If(Condition::Eq, branch16(reader)?),
        Opcode::IfNe => Inst::If(Condition::Ne, branch16(reader)?),
        Opcode::IfLt => Inst::If(Condition::Lt, branch16(reader)?),
        Opcode::IfGe => Inst::If(Condition::Ge, branch16(reader)?),
        Opcode::IfGt => Inst::If(Condition::Gt, branch16(reader)?),
        Opcode::IfLe => Inst::If(Condition::Le, branch16(reader)?),
        Opcode::IfICmpEq => Inst::IfICmp(Condition::Eq, branch16(reader)?),
        Opcode::IfICmpNe => Inst::IfICmp(Condition::Ne, branch16(reader)?),
        Opcode::IfICmpLt => Inst::IfICmp(Condition::Lt, branch16(reader)?),
        Opcode::IfICmpGe => Inst::IfICmp(Condition::Ge, branch16(reader)?),
        Opcode::IfICmpGt => Inst::IfICmp(Condition::Gt, branch16(reader)?),
        Opcode::IfICmpLe => Inst::IfICmp(Condition::Le, branch16(reader)?),
        Opcode::IfACmpEq => Inst::IfACmp {
            equal: true,
            target: branch16(reader)?,
        },
        Opcode::IfACmpNe => Inst::IfACmp {
            equal: false,
            target: branch16(reader)?,
        },
        Opcode::Goto => Inst::Goto(branch16(reader)?),
        Opcode::Jsr => Inst::Jsr(branch16(reader)?),
        Opcode::Ret => Inst::Ret(u16::from(reader.u8()?)),
        Opcode::TableSwitch => decode_table_switch(reader)?,
        Opcode::LookupSwitch => decode_lookup_switch(reader)?,

        Opcode::IReturn => Inst::Return(Some(I)),
        Opcode::LReturn => Inst::Return(Some(L)),
        Opcode::FReturn => Inst::Return(Some(F)),
        Opcode::DReturn => Inst::Return(Some(D)),
        Opcode::AReturn => Inst::Return(Some(A)),
        Opcode::Return => Inst::Return(None),

        Opcode::GetStatic => Inst::GetStatic(reader.cp()?),
        Opcode::PutStatic => Inst::PutStatic(reader.cp()?),
        Opcode::GetField => Inst::GetField(reader.cp()?),
        Opcode::PutField => Inst::PutField(reader.cp()?),
        Opcode::InvokeVirtual => Inst::InvokeVirtual(reader.cp()?),
        Opcode::InvokeSpecial => Inst::InvokeSpecial(reader.cp()?),
        Opcode::InvokeStatic => Inst::InvokeStatic(reader.cp()?),
        Opcode::InvokeInterface => {
            let index = reader.cp()?;
            let count = reader.u8()?;
            // Always zero
            let _ = reader.u8()?;
            Inst::InvokeInterface { index, count }
        }
        Opcode::InvokeDynamic => {
            let index = reader.cp()?;
            let _ = reader.u16()?;
            Inst::InvokeDynamic(index)
        }
        Opcode::New => Inst::New(reader.cp()?),
        Opcode::NewArray => {
            let atype = reader.u8()?;
            let prim = PrimitiveType::from_array_type_code(atype).ok_or(
                DecodeError::InvalidNewArrayType {
                    offset: reader.start,
                    atype,
                },
            )?;
            Inst::NewArray(prim)
        }
        Opcode::ANewArray => Inst::ANewArray(reader.cp()?),
        Opcode::ArrayLength => Inst::ArrayLength,
        Opcode::AThrow => Inst::AThrow,
        Opcode::CheckCast => Inst::CheckCast(reader.cp()?),
        Opcode::InstanceOf => Inst::InstanceOf(reader.cp()?),
        Opcode::MonitorEnter => Inst::MonitorEnter,
        Opcode::MonitorExit => Inst::MonitorExit,
        Opcode::MultiANewArray => Inst::MultiANewArray {
            index: reader.cp()?,
            dimensions: reader.u8()?,
        },
        Opcode::IfNull => Inst::IfNull(branch16(reader)?),
        Opcode::IfNonNull => Inst::IfNonNull(branch16(reader)?),
        Opcode::GotoW => Inst::Goto(reader.i32()?),
        Opcode::JsrW => Inst::Jsr(reader.i32()?),
        Opcode::Wide => {
            return Err(DecodeError::InvalidWideOpcode {
                offset: reader.start,
                opcode: Opcode::Wide.as_u8(),
            })
        }
    })
}

fn convert(from: ValueKind, to: PrimitiveType) -> Inst<i32> {
    Inst::Convert { from, to }
}

fn branch16(reader: &mut Reader<'_>) -> Result<i32, DecodeError> {
    Ok(i32::from(reader.i16()?))
}

fn decode_table_switch(reader: &mut Reader<'_>) -> Result<Inst<i32>, DecodeError> {
    reader.align()?;
    let default = reader.i32()?;
    let low = reader.i32()?;
    let high = reader.i32()?;
    if low > high {
        return Err(DecodeError::InvalidTableSwitch {
            offset: reader.start,
        });
    }

    let count = i64::from(high) - i64::from(low) + 1;
    // Each entry takes four bytes, so this also guards against absurd counts
    let remaining = (reader.code.len() - reader.pos) / 4;
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c <= remaining)
        .ok_or(DecodeError::UnexpectedEnd {
            offset: reader.start,
        })?;

    let mut targets = Vec::with_capacity(count);
    for _ in 0..count {
        targets.push(reader.i32()?);
    }

    let table = TableSwitch::new(default, low, high, targets).map_err(|InvalidTableSwitch| {
        DecodeError::InvalidTableSwitch {
            offset: reader.start,
        }
    })?;
    Ok(Inst::TableSwitch(Box::new(table)))
}

fn decode_lookup_switch(reader: &mut Reader<'_>) -> Result<Inst<i32>, DecodeError> {
    reader.align()?;
    let default = reader.i32()?;
    let count = reader.i32()?;
    let remaining = (reader.code.len() - reader.pos) / 8;
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c <= remaining)
        .ok_or(DecodeError::UnexpectedEnd {
            offset: reader.start,
        })?;

    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let key = reader.i32()?;
        let target = reader.i32()?;
        pairs.push((key, target));
    }

    let lookup = LookupSwitch::new(default, pairs).map_err(|DuplicateSwitchKey(key)| {
        DecodeError::DuplicateSwitchKey {
            offset: reader.start,
            key,
        }
    })?;
    Ok(Inst::LookupSwitch(Box::new(lookup)))
}

#[cfg(test)]
mod tests {
    use crate::{
        code::{
            inst::{ArithOp, Condition, Inst},
            op::Opcode,
        },
        descriptor::ValueKind,
    };

    use super::{decode, DecodeError};

    #[test]
    fn test_simple() {
        // iconst_1; iconst_2; iadd; ireturn
        let insts = decode(&[0x04, 0x05, 0x60, 0xac]).unwrap();
        assert_eq!(insts.len(), 4);
        assert_eq!(insts[0].inst, Inst::IConst(1));
        assert_eq!(insts[2].inst, Inst::Arith(ValueKind::Int, ArithOp::Add));
        assert_eq!(insts[3].opcode, Opcode::IReturn);
        assert_eq!(insts[3].offset, 3);
    }

    #[test]
    fn test_operands() {
        // sipush -2; ifeq -3; wide iinc 300 -1
        let code = [0x11, 0xff, 0xfe, 0x99, 0xff, 0xfd, 0xc4, 0x84, 0x01, 0x2c, 0xff, 0xff];
        let insts = decode(&code).unwrap();
        assert_eq!(insts[0].inst, Inst::IConst(-2));
        assert_eq!(insts[1].inst, Inst::If(Condition::Eq, -3));
        assert_eq!(insts[1].offset, 3);
        assert_eq!(
            insts[2].inst,
            Inst::IInc {
                index: 300,
                amount: -1
            }
        );
        assert_eq!(insts[2].opcode, Opcode::IInc);
    }

    #[test]
    fn test_switch_padding() {
        // nop; tableswitch (pad 2) default=20 low=1 high=2 [8, 12]
        let mut code = vec![0x00, 0xaa, 0x00, 0x00];
        for v in [20_i32, 1, 2, 8, 12] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        let insts = decode(&code).unwrap();
        assert_eq!(insts.len(), 2);
        match &insts[1].inst {
            Inst::TableSwitch(table) => {
                assert_eq!(*table.target(1), 8);
                assert_eq!(*table.target(2), 12);
                assert_eq!(*table.target(3), 20);
            }
            inst => panic!("Expected tableswitch, got {:?}", inst),
        }

        // lookupswitch at offset 0 (pad 3) default=4 with a duplicate key
        let mut code = vec![0xab, 0x00, 0x00, 0x00];
        for v in [4_i32, 2, 5, 1, 5, 2] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(
            decode(&code),
            Err(DecodeError::DuplicateSwitchKey { offset: 0, key: 5 })
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            decode(&[0xca]),
            Err(DecodeError::UnknownOpcode {
                offset: 0,
                opcode: 0xca
            })
        );
        assert_eq!(
            decode(&[0x00, 0x11, 0x01]),
            Err(DecodeError::UnexpectedEnd { offset: 1 })
        );
        assert_eq!(
            decode(&[0xc4, 0x60]),
            Err(DecodeError::InvalidWideOpcode {
                offset: 0,
                opcode: 0x60
            })
        );
        assert_eq!(
            decode(&[0xbc, 0x02]),
            Err(DecodeError::InvalidNewArrayType { offset: 0, atype: 2 })
        );
    }
}
