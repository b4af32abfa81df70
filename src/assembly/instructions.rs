//! The CIL opcode table.
//!
//! One entry per supported opcode, single-byte and `0xFE`-prefixed, carrying mnemonic,
//! operand type, category, flow behavior and static stack effect. Calls, `newobj` and `ret`
//! have signature-dependent stack effects; their table entries record zero and the encoder
//! and interpreter compute the real effect from the resolved signature.
//!
//! Opcodes missing from the table are rejected by the decoder.

use std::{collections::HashMap, sync::OnceLock};

use crate::assembly::instruction::{FlowType, InstructionCategory, OperandType};

/// Static description of one opcode
#[derive(Debug)]
pub struct CilInstruction {
    /// Prefix byte, `0xFE` for two-byte opcodes and 0 otherwise
    pub prefix: u8,
    /// Opcode byte
    pub opcode: u8,
    /// Mnemonic, e.g. `ldarg.0`
    pub instr: &'static str,
    /// Operand encoding
    pub op_type: OperandType,
    /// Functional group
    pub category: InstructionCategory,
    /// Control flow behavior
    pub flow: FlowType,
    /// Values popped
    pub stack_pops: u8,
    /// Values pushed
    pub stack_pushes: u8,
}

macro_rules! opcodes {
    ($($prefix:literal $opcode:literal $instr:literal $op:ident $cat:ident $flow:ident $pops:literal $pushes:literal;)*) => {
        &[
            $(
                CilInstruction {
                    prefix: $prefix,
                    opcode: $opcode,
                    instr: $instr,
                    op_type: OperandType::$op,
                    category: InstructionCategory::$cat,
                    flow: FlowType::$flow,
                    stack_pops: $pops,
                    stack_pushes: $pushes,
                },
            )*
        ]
    };
}

/// Every supported opcode
pub static INSTRUCTIONS: &[CilInstruction] = opcodes! {
    0x00 0x00 "nop" None Misc Sequential 0 0;
    0x00 0x01 "break" None Misc Sequential 0 0;
    0x00 0x02 "ldarg.0" None LoadStore Sequential 0 1;
    0x00 0x03 "ldarg.1" None LoadStore Sequential 0 1;
    0x00 0x04 "ldarg.2" None LoadStore Sequential 0 1;
    0x00 0x05 "ldarg.3" None LoadStore Sequential 0 1;
    0x00 0x06 "ldloc.0" None LoadStore Sequential 0 1;
    0x00 0x07 "ldloc.1" None LoadStore Sequential 0 1;
    0x00 0x08 "ldloc.2" None LoadStore Sequential 0 1;
    0x00 0x09 "ldloc.3" None LoadStore Sequential 0 1;
    0x00 0x0A "stloc.0" None LoadStore Sequential 1 0;
    0x00 0x0B "stloc.1" None LoadStore Sequential 1 0;
    0x00 0x0C "stloc.2" None LoadStore Sequential 1 0;
    0x00 0x0D "stloc.3" None LoadStore Sequential 1 0;
    0x00 0x0E "ldarg.s" UInt8 LoadStore Sequential 0 1;
    0x00 0x0F "ldarga.s" UInt8 LoadStore Sequential 0 1;
    0x00 0x10 "starg.s" UInt8 LoadStore Sequential 1 0;
    0x00 0x11 "ldloc.s" UInt8 LoadStore Sequential 0 1;
    0x00 0x12 "ldloca.s" UInt8 LoadStore Sequential 0 1;
    0x00 0x13 "stloc.s" UInt8 LoadStore Sequential 1 0;
    0x00 0x14 "ldnull" None LoadStore Sequential 0 1;
    0x00 0x15 "ldc.i4.m1" None LoadStore Sequential 0 1;
    0x00 0x16 "ldc.i4.0" None LoadStore Sequential 0 1;
    0x00 0x17 "ldc.i4.1" None LoadStore Sequential 0 1;
    0x00 0x18 "ldc.i4.2" None LoadStore Sequential 0 1;
    0x00 0x19 "ldc.i4.3" None LoadStore Sequential 0 1;
    0x00 0x1A "ldc.i4.4" None LoadStore Sequential 0 1;
    0x00 0x1B "ldc.i4.5" None LoadStore Sequential 0 1;
    0x00 0x1C "ldc.i4.6" None LoadStore Sequential 0 1;
    0x00 0x1D "ldc.i4.7" None LoadStore Sequential 0 1;
    0x00 0x1E "ldc.i4.8" None LoadStore Sequential 0 1;
    0x00 0x1F "ldc.i4.s" Int8 LoadStore Sequential 0 1;
    0x00 0x20 "ldc.i4" Int32 LoadStore Sequential 0 1;
    0x00 0x21 "ldc.i8" Int64 LoadStore Sequential 0 1;
    0x00 0x22 "ldc.r4" Float32 LoadStore Sequential 0 1;
    0x00 0x23 "ldc.r8" Float64 LoadStore Sequential 0 1;
    0x00 0x25 "dup" None Misc Sequential 1 2;
    0x00 0x26 "pop" None Misc Sequential 1 0;
    0x00 0x28 "call" Token ControlFlow Call 0 0;
    0x00 0x2A "ret" None ControlFlow Return 0 0;
    0x00 0x2B "br.s" Int8 ControlFlow UnconditionalBranch 0 0;
    0x00 0x2C "brfalse.s" Int8 ControlFlow ConditionalBranch 1 0;
    0x00 0x2D "brtrue.s" Int8 ControlFlow ConditionalBranch 1 0;
    0x00 0x2E "beq.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x2F "bge.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x30 "bgt.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x31 "ble.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x32 "blt.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x33 "bne.un.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x34 "bge.un.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x35 "bgt.un.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x36 "ble.un.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x37 "blt.un.s" Int8 ControlFlow ConditionalBranch 2 0;
    0x00 0x38 "br" Int32 ControlFlow UnconditionalBranch 0 0;
    0x00 0x39 "brfalse" Int32 ControlFlow ConditionalBranch 1 0;
    0x00 0x3A "brtrue" Int32 ControlFlow ConditionalBranch 1 0;
    0x00 0x3B "beq" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x3C "bge" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x3D "bgt" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x3E "ble" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x3F "blt" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x40 "bne.un" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x41 "bge.un" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x42 "bgt.un" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x43 "ble.un" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x44 "blt.un" Int32 ControlFlow ConditionalBranch 2 0;
    0x00 0x45 "switch" Switch ControlFlow Switch 1 0;
    0x00 0x46 "ldind.i1" None LoadStore Sequential 1 1;
    0x00 0x47 "ldind.u1" None LoadStore Sequential 1 1;
    0x00 0x48 "ldind.i2" None LoadStore Sequential 1 1;
    0x00 0x49 "ldind.u2" None LoadStore Sequential 1 1;
    0x00 0x4A "ldind.i4" None LoadStore Sequential 1 1;
    0x00 0x4B "ldind.u4" None LoadStore Sequential 1 1;
    0x00 0x4C "ldind.i8" None LoadStore Sequential 1 1;
    0x00 0x4D "ldind.i" None LoadStore Sequential 1 1;
    0x00 0x4E "ldind.r4" None LoadStore Sequential 1 1;
    0x00 0x4F "ldind.r8" None LoadStore Sequential 1 1;
    0x00 0x50 "ldind.ref" None LoadStore Sequential 1 1;
    0x00 0x51 "stind.ref" None LoadStore Sequential 2 0;
    0x00 0x52 "stind.i1" None LoadStore Sequential 2 0;
    0x00 0x53 "stind.i2" None LoadStore Sequential 2 0;
    0x00 0x54 "stind.i4" None LoadStore Sequential 2 0;
    0x00 0x55 "stind.i8" None LoadStore Sequential 2 0;
    0x00 0x56 "stind.r4" None LoadStore Sequential 2 0;
    0x00 0x57 "stind.r8" None LoadStore Sequential 2 0;
    0x00 0x58 "add" None Arithmetic Sequential 2 1;
    0x00 0x59 "sub" None Arithmetic Sequential 2 1;
    0x00 0x5A "mul" None Arithmetic Sequential 2 1;
    0x00 0x5B "div" None Arithmetic Sequential 2 1;
    0x00 0x5C "div.un" None Arithmetic Sequential 2 1;
    0x00 0x5D "rem" None Arithmetic Sequential 2 1;
    0x00 0x5E "rem.un" None Arithmetic Sequential 2 1;
    0x00 0x5F "and" None BitwiseLogical Sequential 2 1;
    0x00 0x60 "or" None BitwiseLogical Sequential 2 1;
    0x00 0x61 "xor" None BitwiseLogical Sequential 2 1;
    0x00 0x62 "shl" None BitwiseLogical Sequential 2 1;
    0x00 0x63 "shr" None BitwiseLogical Sequential 2 1;
    0x00 0x64 "shr.un" None BitwiseLogical Sequential 2 1;
    0x00 0x65 "neg" None Arithmetic Sequential 1 1;
    0x00 0x66 "not" None BitwiseLogical Sequential 1 1;
    0x00 0x67 "conv.i1" None Conversion Sequential 1 1;
    0x00 0x68 "conv.i2" None Conversion Sequential 1 1;
    0x00 0x69 "conv.i4" None Conversion Sequential 1 1;
    0x00 0x6A "conv.i8" None Conversion Sequential 1 1;
    0x00 0x6B "conv.r4" None Conversion Sequential 1 1;
    0x00 0x6C "conv.r8" None Conversion Sequential 1 1;
    0x00 0x6D "conv.u4" None Conversion Sequential 1 1;
    0x00 0x6E "conv.u8" None Conversion Sequential 1 1;
    0x00 0x6F "callvirt" Token ObjectModel Call 0 0;
    0x00 0x71 "ldobj" Token ObjectModel Sequential 1 1;
    0x00 0x72 "ldstr" Token ObjectModel Sequential 0 1;
    0x00 0x73 "newobj" Token ObjectModel Call 0 0;
    0x00 0x74 "castclass" Token ObjectModel Sequential 1 1;
    0x00 0x75 "isinst" Token ObjectModel Sequential 1 1;
    0x00 0x79 "unbox" Token ObjectModel Sequential 1 1;
    0x00 0x7A "throw" None ObjectModel Throw 1 0;
    0x00 0x7B "ldfld" Token ObjectModel Sequential 1 1;
    0x00 0x7C "ldflda" Token ObjectModel Sequential 1 1;
    0x00 0x7D "stfld" Token ObjectModel Sequential 2 0;
    0x00 0x7E "ldsfld" Token ObjectModel Sequential 0 1;
    0x00 0x7F "ldsflda" Token ObjectModel Sequential 0 1;
    0x00 0x80 "stsfld" Token ObjectModel Sequential 1 0;
    0x00 0x81 "stobj" Token ObjectModel Sequential 2 0;
    0x00 0x8C "box" Token ObjectModel Sequential 1 1;
    0x00 0x8D "newarr" Token ObjectModel Sequential 1 1;
    0x00 0x8E "ldlen" None ObjectModel Sequential 1 1;
    0x00 0x8F "ldelema" Token ObjectModel Sequential 2 1;
    0x00 0x90 "ldelem.i1" None ObjectModel Sequential 2 1;
    0x00 0x91 "ldelem.u1" None ObjectModel Sequential 2 1;
    0x00 0x92 "ldelem.i2" None ObjectModel Sequential 2 1;
    0x00 0x93 "ldelem.u2" None ObjectModel Sequential 2 1;
    0x00 0x94 "ldelem.i4" None ObjectModel Sequential 2 1;
    0x00 0x95 "ldelem.u4" None ObjectModel Sequential 2 1;
    0x00 0x96 "ldelem.i8" None ObjectModel Sequential 2 1;
    0x00 0x97 "ldelem.i" None ObjectModel Sequential 2 1;
    0x00 0x98 "ldelem.r4" None ObjectModel Sequential 2 1;
    0x00 0x99 "ldelem.r8" None ObjectModel Sequential 2 1;
    0x00 0x9A "ldelem.ref" None ObjectModel Sequential 2 1;
    0x00 0x9B "stelem.i" None ObjectModel Sequential 3 0;
    0x00 0x9C "stelem.i1" None ObjectModel Sequential 3 0;
    0x00 0x9D "stelem.i2" None ObjectModel Sequential 3 0;
    0x00 0x9E "stelem.i4" None ObjectModel Sequential 3 0;
    0x00 0x9F "stelem.i8" None ObjectModel Sequential 3 0;
    0x00 0xA0 "stelem.r4" None ObjectModel Sequential 3 0;
    0x00 0xA1 "stelem.r8" None ObjectModel Sequential 3 0;
    0x00 0xA2 "stelem.ref" None ObjectModel Sequential 3 0;
    0x00 0xA3 "ldelem" Token ObjectModel Sequential 2 1;
    0x00 0xA4 "stelem" Token ObjectModel Sequential 3 0;
    0x00 0xA5 "unbox.any" Token ObjectModel Sequential 1 1;
    0x00 0xD0 "ldtoken" Token ObjectModel Sequential 0 1;
    0x00 0xD1 "conv.u2" None Conversion Sequential 1 1;
    0x00 0xD2 "conv.u1" None Conversion Sequential 1 1;
    0x00 0xD3 "conv.i" None Conversion Sequential 1 1;
    0x00 0xDC "endfinally" None ControlFlow EndFinally 0 0;
    0x00 0xDD "leave" Int32 ControlFlow Leave 0 0;
    0x00 0xDE "leave.s" Int8 ControlFlow Leave 0 0;
    0x00 0xE0 "conv.u" None Conversion Sequential 1 1;
    0xFE 0x01 "ceq" None Comparison Sequential 2 1;
    0xFE 0x02 "cgt" None Comparison Sequential 2 1;
    0xFE 0x03 "cgt.un" None Comparison Sequential 2 1;
    0xFE 0x04 "clt" None Comparison Sequential 2 1;
    0xFE 0x05 "clt.un" None Comparison Sequential 2 1;
    0xFE 0x06 "ldftn" Token ObjectModel Sequential 0 1;
    0xFE 0x07 "ldvirtftn" Token ObjectModel Sequential 1 1;
    0xFE 0x09 "ldarg" UInt16 LoadStore Sequential 0 1;
    0xFE 0x0A "ldarga" UInt16 LoadStore Sequential 0 1;
    0xFE 0x0B "starg" UInt16 LoadStore Sequential 1 0;
    0xFE 0x0C "ldloc" UInt16 LoadStore Sequential 0 1;
    0xFE 0x0D "ldloca" UInt16 LoadStore Sequential 0 1;
    0xFE 0x0E "stloc" UInt16 LoadStore Sequential 1 0;
    0xFE 0x15 "initobj" Token ObjectModel Sequential 1 0;
    0xFE 0x16 "constrained." Token Prefix Sequential 0 0;
    0xFE 0x1A "rethrow" None ObjectModel Throw 0 0;
    0xFE 0x1C "sizeof" Token ObjectModel Sequential 0 1;
};

type OpcodeLookup = HashMap<(u8, u8), &'static CilInstruction>;
type MnemonicLookup = HashMap<&'static str, &'static CilInstruction>;

static OPCODE_LOOKUP: OnceLock<OpcodeLookup> = OnceLock::new();
static MNEMONIC_LOOKUP: OnceLock<MnemonicLookup> = OnceLock::new();

/// Opcode entry by prefix and opcode byte
#[must_use]
pub fn lookup_opcode(prefix: u8, opcode: u8) -> Option<&'static CilInstruction> {
    OPCODE_LOOKUP
        .get_or_init(|| {
            INSTRUCTIONS
                .iter()
                .map(|instr| ((instr.prefix, instr.opcode), instr))
                .collect()
        })
        .get(&(prefix, opcode))
        .copied()
}

/// Opcode entry by mnemonic
#[must_use]
pub fn lookup_mnemonic(mnemonic: &str) -> Option<&'static CilInstruction> {
    MNEMONIC_LOOKUP
        .get_or_init(|| INSTRUCTIONS.iter().map(|instr| (instr.instr, instr)).collect())
        .get(mnemonic)
        .copied()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        let mut opcodes = HashSet::new();
        let mut mnemonics = HashSet::new();
        for instr in INSTRUCTIONS {
            assert!(opcodes.insert((instr.prefix, instr.opcode)), "{}", instr.instr);
            assert!(mnemonics.insert(instr.instr), "{}", instr.instr);
        }
    }

    #[test]
    fn lookups_agree() {
        let add = lookup_opcode(0, 0x58).unwrap();
        assert_eq!(add.instr, "add");
        assert_eq!(lookup_mnemonic("rethrow").unwrap().opcode, 0x1A);
        assert_eq!(lookup_mnemonic("rethrow").unwrap().prefix, 0xFE);
        assert!(lookup_opcode(0, 0x24).is_none());
        assert!(lookup_mnemonic("frobnicate").is_none());
    }

    #[test]
    fn branch_operands() {
        for instr in INSTRUCTIONS {
            if matches!(
                instr.flow,
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
            ) {
                assert!(matches!(instr.op_type, OperandType::Int8 | OperandType::Int32));
            }
        }
    }
}
