use super::{
    BranchInstruction, CompareMode, EqComparison, Instruction, InvokeType, OrdComparison,
    SerializableInstruction, ShiftType,
};
use crate::jvm::class_file::Deserialize;
use crate::jvm::{
    BaseType, ClassConstantIndex, ConstantIndex, Error, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex,
};
use std::io::Cursor;

/// Instruction read out of a code array, with jump targets as absolute byte offsets
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedInstruction {
    Straight(SerializableInstruction),
    Branch(BranchInstruction<usize, usize, ()>),
}

/// Decode a code array into its sequence of instructions, each tagged with its byte offset
///
/// Jump targets are resolved to absolute offsets and checked to be inside the code array (but not
/// that they land on instruction boundaries, since the boundaries aren't all known yet).
pub fn decode_instructions(code: &[u8]) -> Result<Vec<(usize, DecodedInstruction)>, Error> {
    let mut decoded = vec![];
    let mut reader = Cursor::new(code);
    while (reader.position() as usize) < code.len() {
        let offset = reader.position() as usize;
        let insn = decode_instruction(offset, code.len(), &mut reader).map_err(|err| match err {
            Error::IoError(io) => Error::Malformed(format!(
                "truncated instruction at offset {}: {}",
                offset, io
            )),
            other => other,
        })?;
        decoded.push((offset, insn));
    }
    Ok(decoded)
}

fn decode_instruction(
    offset: usize,
    code_len: usize,
    reader: &mut Cursor<&[u8]>,
) -> Result<DecodedInstruction, Error> {
    use DecodedInstruction::{Branch, Straight};
    use Instruction::*;

    let target = |relative: i64| -> Result<usize, Error> {
        let absolute = offset as i64 + relative;
        if absolute < 0 || absolute >= code_len as i64 {
            Err(Error::Malformed(format!(
                "jump at offset {} targets {} (outside of code)",
                offset, absolute
            )))
        } else {
            Ok(absolute as usize)
        }
    };
    let short_target = |reader: &mut Cursor<&[u8]>| -> Result<usize, Error> {
        target(i16::deserialize(reader)? as i64)
    };
    let wide_target = |reader: &mut Cursor<&[u8]>| -> Result<usize, Error> {
        target(i32::deserialize(reader)? as i64)
    };

    let opcode = u8::deserialize(reader)?;
    let insn = match opcode {
        0x00 => Straight(Nop),
        0x01 => Straight(AConstNull),
        0x02 => Straight(IConstM1),
        0x03 => Straight(IConst0),
        0x04 => Straight(IConst1),
        0x05 => Straight(IConst2),
        0x06 => Straight(IConst3),
        0x07 => Straight(IConst4),
        0x08 => Straight(IConst5),
        0x09 => Straight(LConst0),
        0x0a => Straight(LConst1),
        0x0b => Straight(FConst0),
        0x0c => Straight(FConst1),
        0x0d => Straight(FConst2),
        0x0e => Straight(DConst0),
        0x0f => Straight(DConst1),
        0x10 => Straight(BiPush(i8::deserialize(reader)?)),
        0x11 => Straight(SiPush(i16::deserialize(reader)?)),
        0x12 => Straight(Ldc(ConstantIndex(u8::deserialize(reader)? as u16))),
        0x13 => Straight(Ldc(ConstantIndex::deserialize(reader)?)),
        0x14 => Straight(Ldc2(ConstantIndex::deserialize(reader)?)),

        0x15 => Straight(ILoad(u8::deserialize(reader)? as u16)),
        0x16 => Straight(LLoad(u8::deserialize(reader)? as u16)),
        0x17 => Straight(FLoad(u8::deserialize(reader)? as u16)),
        0x18 => Straight(DLoad(u8::deserialize(reader)? as u16)),
        0x19 => Straight(ALoad(u8::deserialize(reader)? as u16)),
        0x1a..=0x1d => Straight(ILoad((opcode - 0x1a) as u16)),
        0x1e..=0x21 => Straight(LLoad((opcode - 0x1e) as u16)),
        0x22..=0x25 => Straight(FLoad((opcode - 0x22) as u16)),
        0x26..=0x29 => Straight(DLoad((opcode - 0x26) as u16)),
        0x2a..=0x2d => Straight(ALoad((opcode - 0x2a) as u16)),
        0x2e => Straight(IALoad),
        0x2f => Straight(LALoad),
        0x30 => Straight(FALoad),
        0x31 => Straight(DALoad),
        0x32 => Straight(AALoad),
        0x33 => Straight(BALoad),
        0x34 => Straight(CALoad),
        0x35 => Straight(SALoad),

        0x36 => Straight(IStore(u8::deserialize(reader)? as u16)),
        0x37 => Straight(LStore(u8::deserialize(reader)? as u16)),
        0x38 => Straight(FStore(u8::deserialize(reader)? as u16)),
        0x39 => Straight(DStore(u8::deserialize(reader)? as u16)),
        0x3a => Straight(AStore(u8::deserialize(reader)? as u16)),
        0x3b..=0x3e => Straight(IStore((opcode - 0x3b) as u16)),
        0x3f..=0x42 => Straight(LStore((opcode - 0x3f) as u16)),
        0x43..=0x46 => Straight(FStore((opcode - 0x43) as u16)),
        0x47..=0x4a => Straight(DStore((opcode - 0x47) as u16)),
        0x4b..=0x4e => Straight(AStore((opcode - 0x4b) as u16)),
        0x4f => Straight(IAStore),
        0x50 => Straight(LAStore),
        0x51 => Straight(FAStore),
        0x52 => Straight(DAStore),
        0x53 => Straight(AAStore),
        0x54 => Straight(BAStore),
        0x55 => Straight(CAStore),
        0x56 => Straight(SAStore),

        0x57 => Straight(Pop),
        0x58 => Straight(Pop2),
        0x59 => Straight(Dup),
        0x5a => Straight(DupX1),
        0x5b => Straight(DupX2),
        0x5c => Straight(Dup2),
        0x5d => Straight(Dup2X1),
        0x5e => Straight(Dup2X2),
        0x5f => Straight(Swap),

        0x60 => Straight(IAdd),
        0x61 => Straight(LAdd),
        0x62 => Straight(FAdd),
        0x63 => Straight(DAdd),
        0x64 => Straight(ISub),
        0x65 => Straight(LSub),
        0x66 => Straight(FSub),
        0x67 => Straight(DSub),
        0x68 => Straight(IMul),
        0x69 => Straight(LMul),
        0x6a => Straight(FMul),
        0x6b => Straight(DMul),
        0x6c => Straight(IDiv),
        0x6d => Straight(LDiv),
        0x6e => Straight(FDiv),
        0x6f => Straight(DDiv),
        0x70 => Straight(IRem),
        0x71 => Straight(LRem),
        0x72 => Straight(FRem),
        0x73 => Straight(DRem),
        0x74 => Straight(INeg),
        0x75 => Straight(LNeg),
        0x76 => Straight(FNeg),
        0x77 => Straight(DNeg),
        0x78 => Straight(ISh(ShiftType::Left)),
        0x79 => Straight(LSh(ShiftType::Left)),
        0x7a => Straight(ISh(ShiftType::ArithmeticRight)),
        0x7b => Straight(LSh(ShiftType::ArithmeticRight)),
        0x7c => Straight(ISh(ShiftType::LogicalRight)),
        0x7d => Straight(LSh(ShiftType::LogicalRight)),
        0x7e => Straight(IAnd),
        0x7f => Straight(LAnd),
        0x80 => Straight(IOr),
        0x81 => Straight(LOr),
        0x82 => Straight(IXor),
        0x83 => Straight(LXor),
        0x84 => {
            let index = u8::deserialize(reader)? as u16;
            let increment = i8::deserialize(reader)? as i16;
            Straight(IInc(index, increment))
        }

        0x85 => Straight(I2L),
        0x86 => Straight(I2F),
        0x87 => Straight(I2D),
        0x88 => Straight(L2I),
        0x89 => Straight(L2F),
        0x8a => Straight(L2D),
        0x8b => Straight(F2I),
        0x8c => Straight(F2L),
        0x8d => Straight(F2D),
        0x8e => Straight(D2I),
        0x8f => Straight(D2L),
        0x90 => Straight(D2F),
        0x91 => Straight(I2B),
        0x92 => Straight(I2C),
        0x93 => Straight(I2S),
        0x94 => Straight(LCmp),
        0x95 => Straight(FCmp(CompareMode::L)),
        0x96 => Straight(FCmp(CompareMode::G)),
        0x97 => Straight(DCmp(CompareMode::L)),
        0x98 => Straight(DCmp(CompareMode::G)),

        0x99..=0x9e => Branch(BranchInstruction::If(
            ord_comparison(opcode - 0x99),
            short_target(reader)?,
            (),
        )),
        0x9f..=0xa4 => Branch(BranchInstruction::IfICmp(
            ord_comparison(opcode - 0x9f),
            short_target(reader)?,
            (),
        )),
        0xa5 => Branch(BranchInstruction::IfACmp(
            EqComparison::EQ,
            short_target(reader)?,
            (),
        )),
        0xa6 => Branch(BranchInstruction::IfACmp(
            EqComparison::NE,
            short_target(reader)?,
            (),
        )),
        0xa7 => Branch(BranchInstruction::Goto(short_target(reader)?)),
        0xa8 => Branch(BranchInstruction::Jsr(short_target(reader)?, ())),
        0xa9 => Branch(BranchInstruction::Ret(u8::deserialize(reader)? as u16)),
        0xaa => {
            let padding = skip_switch_padding(offset, reader)?;
            let default = wide_target(reader)?;
            let low = i32::deserialize(reader)?;
            let high = i32::deserialize(reader)?;
            if high < low {
                return Err(Error::Malformed(format!(
                    "tableswitch at offset {} has low {} above high {}",
                    offset, low, high
                )));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > code_len {
                return Err(Error::Malformed(format!(
                    "tableswitch at offset {} has too many targets",
                    offset
                )));
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(wide_target(reader)?);
            }
            Branch(BranchInstruction::TableSwitch {
                padding,
                default,
                low,
                targets,
            })
        }
        0xab => {
            let padding = skip_switch_padding(offset, reader)?;
            let default = wide_target(reader)?;
            let npairs = i32::deserialize(reader)?;
            if npairs < 0 || npairs as usize > code_len {
                return Err(Error::Malformed(format!(
                    "lookupswitch at offset {} has {} pairs",
                    offset, npairs
                )));
            }
            let mut targets = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = i32::deserialize(reader)?;
                targets.push((key, wide_target(reader)?));
            }
            Branch(BranchInstruction::LookupSwitch {
                padding,
                default,
                targets,
            })
        }
        0xac => Branch(BranchInstruction::IReturn),
        0xad => Branch(BranchInstruction::LReturn),
        0xae => Branch(BranchInstruction::FReturn),
        0xaf => Branch(BranchInstruction::DReturn),
        0xb0 => Branch(BranchInstruction::AReturn),
        0xb1 => Branch(BranchInstruction::Return),

        0xb2 => Straight(GetStatic(FieldRefConstantIndex::deserialize(reader)?)),
        0xb3 => Straight(PutStatic(FieldRefConstantIndex::deserialize(reader)?)),
        0xb4 => Straight(GetField(FieldRefConstantIndex::deserialize(reader)?)),
        0xb5 => Straight(PutField(FieldRefConstantIndex::deserialize(reader)?)),
        0xb6 => Straight(Invoke(
            InvokeType::Virtual,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb7 => Straight(Invoke(
            InvokeType::Special,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb8 => Straight(Invoke(
            InvokeType::Static,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb9 => {
            let method = MethodRefConstantIndex::deserialize(reader)?;
            let count = u8::deserialize(reader)?;
            let _zero = u8::deserialize(reader)?;
            Straight(Invoke(InvokeType::Interface(count), method))
        }
        0xba => {
            let method = InvokeDynamicConstantIndex::deserialize(reader)?;
            let _zero = u16::deserialize(reader)?;
            Straight(InvokeDynamic(method))
        }
        0xbb => Straight(New(ClassConstantIndex::deserialize(reader)?)),
        0xbc => Straight(NewArray(array_base_type(offset, u8::deserialize(reader)?)?)),
        0xbd => Straight(ANewArray(ClassConstantIndex::deserialize(reader)?)),
        0xbe => Straight(ArrayLength),
        0xbf => Branch(BranchInstruction::AThrow),
        0xc0 => Straight(CheckCast(ClassConstantIndex::deserialize(reader)?)),
        0xc1 => Straight(InstanceOf(ClassConstantIndex::deserialize(reader)?)),
        0xc2 => Straight(MonitorEnter),
        0xc3 => Straight(MonitorExit),
        0xc4 => decode_wide(offset, reader)?,
        0xc5 => {
            let class = ClassConstantIndex::deserialize(reader)?;
            let dimensions = u8::deserialize(reader)?;
            Straight(MultiANewArray(class, dimensions))
        }
        0xc6 => Branch(BranchInstruction::IfNull(
            EqComparison::EQ,
            short_target(reader)?,
            (),
        )),
        0xc7 => Branch(BranchInstruction::IfNull(
            EqComparison::NE,
            short_target(reader)?,
            (),
        )),
        0xc8 => Branch(BranchInstruction::GotoW(wide_target(reader)?)),
        0xc9 => Branch(BranchInstruction::JsrW(wide_target(reader)?, ())),

        other => {
            return Err(Error::Malformed(format!(
                "unknown opcode 0x{:02x} at offset {}",
                other, offset
            )))
        }
    };
    Ok(insn)
}

/// Decode the instruction following a `wide` prefix
fn decode_wide(offset: usize, reader: &mut Cursor<&[u8]>) -> Result<DecodedInstruction, Error> {
    use DecodedInstruction::{Branch, Straight};
    use Instruction::*;

    let opcode = u8::deserialize(reader)?;
    let index = u16::deserialize(reader)?;
    let insn = match opcode {
        0x15 => Straight(ILoad(index)),
        0x16 => Straight(LLoad(index)),
        0x17 => Straight(FLoad(index)),
        0x18 => Straight(DLoad(index)),
        0x19 => Straight(ALoad(index)),
        0x36 => Straight(IStore(index)),
        0x37 => Straight(LStore(index)),
        0x38 => Straight(FStore(index)),
        0x39 => Straight(DStore(index)),
        0x3a => Straight(AStore(index)),
        0x84 => Straight(IInc(index, i16::deserialize(reader)?)),
        0xa9 => Branch(BranchInstruction::Ret(index)),
        other => {
            return Err(Error::Malformed(format!(
                "opcode 0x{:02x} cannot follow `wide` at offset {}",
                other, offset
            )))
        }
    };
    Ok(insn)
}

/// Skip the 0-3 bytes that align switch operands to a multiple of four
fn skip_switch_padding(offset: usize, reader: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    let padding = match (offset + 1) % 4 {
        0 => 0,
        x => 4 - x,
    };
    for _ in 0..padding {
        u8::deserialize(reader)?;
    }
    Ok(padding as u8)
}

fn ord_comparison(index: u8) -> OrdComparison {
    match index {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    }
}

fn array_base_type(offset: usize, atype: u8) -> Result<BaseType, Error> {
    Ok(match atype {
        4 => BaseType::Boolean,
        5 => BaseType::Char,
        6 => BaseType::Float,
        7 => BaseType::Double,
        8 => BaseType::Byte,
        9 => BaseType::Short,
        10 => BaseType::Int,
        11 => BaseType::Long,
        other => {
            return Err(Error::Malformed(format!(
                "newarray at offset {} has unknown element type {}",
                offset, other
            )))
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Serialize;
    use crate::util::Width;

    #[test]
    fn decodes_branches_with_absolute_targets() {
        // iload_0; ifle +5; iconst_1; ireturn; iconst_0; ireturn
        let code = [0x1a, 0x9e, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
        let decoded = decode_instructions(&code).unwrap();
        assert_eq!(
            decoded,
            vec![
                (0, DecodedInstruction::Straight(Instruction::ILoad(0))),
                (
                    1,
                    DecodedInstruction::Branch(BranchInstruction::If(OrdComparison::LE, 6, ()))
                ),
                (4, DecodedInstruction::Straight(Instruction::IConst1)),
                (5, DecodedInstruction::Branch(BranchInstruction::IReturn)),
                (6, DecodedInstruction::Straight(Instruction::IConst0)),
                (7, DecodedInstruction::Branch(BranchInstruction::IReturn)),
            ]
        );
    }

    #[test]
    fn decodes_wide_forms() {
        // wide iinc 300 -2; wide aload 256; wide ret 1000
        let code = [
            0xc4, 0x84, 0x01, 0x2c, 0xff, 0xfe, 0xc4, 0x19, 0x01, 0x00, 0xc4, 0xa9, 0x03, 0xe8,
        ];
        let decoded = decode_instructions(&code).unwrap();
        assert_eq!(
            decoded,
            vec![
                (0, DecodedInstruction::Straight(Instruction::IInc(300, -2))),
                (6, DecodedInstruction::Straight(Instruction::ALoad(256))),
                (10, DecodedInstruction::Branch(BranchInstruction::Ret(1000))),
            ]
        );
    }

    #[test]
    fn decodes_switch_padding() {
        // iconst_0; lookupswitch (2 bytes padding) default: +11, 0 pairs; return
        let code = [0x03, 0xab, 0, 0, 0, 0, 0, 0x0b, 0, 0, 0, 0, 0xb1];
        let decoded = decode_instructions(&code).unwrap();
        assert_eq!(
            decoded[1],
            (
                1,
                DecodedInstruction::Branch(BranchInstruction::LookupSwitch {
                    padding: 2,
                    default: 12,
                    targets: vec![],
                })
            )
        );
        assert_eq!(decoded[2].0, 12);
    }

    #[test]
    fn rejects_bad_input() {
        // unknown opcode
        assert!(matches!(
            decode_instructions(&[0xca]),
            Err(Error::Malformed(_))
        ));
        // truncated sipush
        assert!(matches!(
            decode_instructions(&[0x11, 0x00]),
            Err(Error::Malformed(_))
        ));
        // jump past the end
        assert!(matches!(
            decode_instructions(&[0xa7, 0x00, 0x09]),
            Err(Error::Malformed(_))
        ));
        // wide nop
        assert!(matches!(
            decode_instructions(&[0xc4, 0x00, 0x00, 0x00]),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn reencoding_matches_width() {
        let code = [0x10, 0xfb, 0x84, 0x02, 0x07, 0x12, 0x03, 0x13, 0x01, 0x2c];
        for (_, insn) in decode_instructions(&code).unwrap() {
            if let DecodedInstruction::Straight(insn) = insn {
                let mut buffer = vec![];
                insn.serialize(&mut buffer).unwrap();
                assert_eq!(buffer.len(), insn.width(), "width of {:?}", insn);
            }
        }
    }
}
