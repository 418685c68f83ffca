/* JVM opcodes and a linear instruction walker */

use crate::class::constant_pool::{Constant, ConstantPool};
use crate::class::error::ClassError;
use crate::class::{read_u1, read_u2, read_u4};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;
pub const DUP: u8 = 0x59;
pub const SWAP: u8 = 0x5f;
pub const IADD: u8 = 0x60;
pub const LADD: u8 = 0x61;
pub const ISUB: u8 = 0x64;
pub const IINC: u8 = 0x84;
pub const I2L: u8 = 0x85;
pub const I2F: u8 = 0x86;
pub const I2D: u8 = 0x87;
pub const L2F: u8 = 0x89;
pub const L2D: u8 = 0x8a;
pub const F2D: u8 = 0x8d;
pub const LCMP: u8 = 0x94;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const MONITORENTER: u8 = 0xc2;
pub const MONITOREXIT: u8 = 0xc3;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// One decoded instruction position in a code array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    pub length: usize,
}

impl Instruction {
    /// The constant pool index this instruction refers to, if any.
    pub fn constant_operand(&self, code: &[u8]) -> Result<Option<u16>, ClassError> {
        let mut ix = self.offset + 1;
        Ok(match self.opcode {
            LDC => Some(read_u1(code, &mut ix)? as u16),
            LDC_W | LDC2_W | GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD | INVOKEVIRTUAL | INVOKESPECIAL
            | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF
            | MULTIANEWARRAY => Some(read_u2(code, &mut ix)?),
            _ => None,
        })
    }

    /// Branch targets of a two-byte-offset jump, as absolute code offsets.
    pub fn branch_target(&self, code: &[u8]) -> Result<Option<usize>, ClassError> {
        let mut ix = self.offset + 1;
        Ok(match self.opcode {
            IFEQ..=JSR | IFNULL | IFNONNULL => {
                let delta = read_u2(code, &mut ix)? as i16 as isize;
                Some((self.offset as isize + delta) as usize)
            }
            GOTO_W | JSR_W => {
                let delta = read_u4(code, &mut ix)? as i32 as isize;
                Some((self.offset as isize + delta) as usize)
            }
            _ => None,
        })
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn instruction_length(code: &[u8], offset: usize) -> Result<usize, ClassError> {
    let opcode = code[offset];
    let length = match opcode {
        BIPUSH | LDC | ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => 2,
        SIPUSH | LDC_W | LDC2_W | IINC | IFEQ..=JSR | GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST
        | INSTANCEOF | IFNULL | IFNONNULL => 3,
        MULTIANEWARRAY => 4,
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => 5,
        WIDE => {
            let mut ix = offset + 1;
            if read_u1(code, &mut ix)? == IINC {
                6
            } else {
                4
            }
        }
        TABLESWITCH => {
            let mut ix = offset + 1 + switch_padding(offset);
            let _default = read_u4(code, &mut ix)?;
            let low = read_u4(code, &mut ix)? as i32;
            let high = read_u4(code, &mut ix)? as i32;
            if high < low {
                fail!("tableswitch at {} has high {} below low {}", offset, high, low);
            }
            let entries = (high as i64 - low as i64 + 1) as usize;
            1 + switch_padding(offset) + 12 + entries * 4
        }
        LOOKUPSWITCH => {
            let mut ix = offset + 1 + switch_padding(offset);
            let _default = read_u4(code, &mut ix)?;
            let pairs = read_u4(code, &mut ix)? as i32;
            if pairs < 0 {
                fail!("lookupswitch at {} has negative pair count", offset);
            }
            1 + switch_padding(offset) + 8 + pairs as usize * 8
        }
        0xcb..=0xff => fail!("unknown opcode 0x{:02x} at {}", opcode, offset),
        _ => 1,
    };
    Ok(length)
}

/// Splits a code array into instructions.
///
/// Fails on unknown opcodes and on an instruction that runs past the end of the array.
pub fn walk(code: &[u8]) -> Result<Vec<Instruction>, ClassError> {
    let mut instructions = vec![];
    let mut offset = 0;
    while offset < code.len() {
        let length = instruction_length(code, offset)?;
        if offset + length > code.len() {
            fail!("instruction at {} overruns the code array", offset);
        }
        instructions.push(Instruction { offset, opcode: code[offset], length });
        offset += length;
    }
    Ok(instructions)
}

static CONSTANT_OPCODE_NAMES: Lazy<HashMap<u8, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (LDC, "ldc"),
        (LDC_W, "ldc_w"),
        (LDC2_W, "ldc2_w"),
        (GETSTATIC, "getstatic"),
        (PUTSTATIC, "putstatic"),
        (GETFIELD, "getfield"),
        (PUTFIELD, "putfield"),
        (INVOKEVIRTUAL, "invokevirtual"),
        (INVOKESPECIAL, "invokespecial"),
        (INVOKESTATIC, "invokestatic"),
        (INVOKEINTERFACE, "invokeinterface"),
        (INVOKEDYNAMIC, "invokedynamic"),
        (NEW, "new"),
        (ANEWARRAY, "anewarray"),
        (CHECKCAST, "checkcast"),
        (INSTANCEOF, "instanceof"),
        (MULTIANEWARRAY, "multianewarray"),
    ])
});

/// Mnemonic of an opcode that takes a constant pool operand.
pub fn constant_opcode_name(opcode: u8) -> Option<&'static str> {
    CONSTANT_OPCODE_NAMES.get(&opcode).copied()
}

/// Checks that every constant referenced by `code` exists and has a kind the instruction accepts.
pub fn check_constant_operands(code: &[u8], pool: &ConstantPool) -> Result<(), ClassError> {
    for insn in walk(code)? {
        let index = match insn.constant_operand(code)? {
            Some(index) => index,
            None => continue,
        };
        let constant = pool.get(index).map_err(|e| err!(e, "instruction at {}", insn.offset))?;
        let ok = match insn.opcode {
            LDC | LDC_W => matches!(
                constant,
                Constant::Integer(_)
                    | Constant::Float(_)
                    | Constant::String { .. }
                    | Constant::Class { .. }
                    | Constant::MethodType { .. }
                    | Constant::MethodHandle { .. }
                    | Constant::Dynamic { .. }
            ),
            LDC2_W => matches!(constant, Constant::Long(_) | Constant::Double(_) | Constant::Dynamic { .. }),
            GETSTATIC | PUTSTATIC | GETFIELD | PUTFIELD => matches!(constant, Constant::FieldRef { .. }),
            INVOKEVIRTUAL => matches!(constant, Constant::MethodRef { .. }),
            INVOKESPECIAL | INVOKESTATIC => {
                matches!(constant, Constant::MethodRef { .. } | Constant::InterfaceMethodRef { .. })
            }
            INVOKEINTERFACE => matches!(constant, Constant::InterfaceMethodRef { .. }),
            INVOKEDYNAMIC => matches!(constant, Constant::InvokeDynamic { .. }),
            _ => matches!(constant, Constant::Class { .. }),
        };
        if !ok {
            fail!(
                "{} at {} references constant #{} of tag {}",
                constant_opcode_name(insn.opcode).unwrap_or("?"),
                insn.offset,
                index,
                constant.tag()
            );
        }
    }
    Ok(())
}

/// Lists the methods invoked by `code` as (owner, name, descriptor).
pub fn invoked_methods(code: &[u8], pool: &ConstantPool) -> Result<Vec<(String, String, String)>, ClassError> {
    let mut calls = vec![];
    for insn in walk(code)? {
        if !matches!(insn.opcode, INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE) {
            continue;
        }
        if let Some(index) = insn.constant_operand(code)? {
            let m = pool.member_ref(index)?;
            calls.push((m.class.to_string(), m.name.to_string(), m.descriptor.to_string()));
        }
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_switches_and_wide() {
        // 0: iconst_0
        // 1: tableswitch pad 2, default, low 0, high 1, two offsets (24 bytes total)
        // 24: wide iinc (6)
        // 30: wide iload (4)
        // 34: return
        let mut code = vec![ICONST_0, TABLESWITCH, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 23]);
        code.extend_from_slice(&[0, 0, 0, 0]);
        code.extend_from_slice(&[0, 0, 0, 1]);
        code.extend_from_slice(&[0, 0, 0, 23]);
        code.extend_from_slice(&[0, 0, 0, 23]);
        code.extend_from_slice(&[WIDE, IINC, 0, 1, 0, 1]);
        code.extend_from_slice(&[WIDE, ILOAD, 0, 1]);
        code.push(RETURN);

        let insns = walk(&code).unwrap();
        let offsets: Vec<usize> = insns.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 1, 24, 30, 34]);
    }

    #[test]
    fn lookupswitch_padding() {
        // lookupswitch at offset 0 pads 3 bytes
        let mut code = vec![LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&[0, 0, 0, 20]);
        code.extend_from_slice(&[0, 0, 0, 1]);
        code.extend_from_slice(&[0, 0, 0, 5, 0, 0, 0, 20]);
        code.push(RETURN);
        let insns = walk(&code).unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[0].length, 20);
    }

    #[test]
    fn branch_targets() {
        let code = vec![ICONST_0, IFEQ, 0xff, 0xff, RETURN];
        let insns = walk(&code).unwrap();
        assert_eq!(insns[1].branch_target(&code).unwrap(), Some(0));
    }

    #[test]
    fn rejects_overrun_and_unknown() {
        assert!(walk(&[SIPUSH, 0]).is_err());
        assert!(walk(&[0xfe]).is_err());
    }

    #[test]
    fn operand_kinds_checked() {
        let mut pool = ConstantPool::new();
        let s = pool.string_index("x").unwrap();
        let m = pool.method_ref_index("a/B", "c", "()V", false).unwrap();
        let good = vec![LDC, s as u8, INVOKESTATIC, (m >> 8) as u8, m as u8, RETURN];
        check_constant_operands(&good, &pool).unwrap();
        let bad = vec![INVOKEVIRTUAL, (s >> 8) as u8, s as u8, RETURN];
        let e = check_constant_operands(&bad, &pool).unwrap_err();
        assert!(e.to_string().contains("invokevirtual at 0 references constant"), "{}", e);
        assert_eq!(invoked_methods(&good, &pool).unwrap(), vec![("a/B".into(), "c".into(), "()V".into())]);
    }
}
