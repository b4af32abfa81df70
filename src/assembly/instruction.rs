//! Decoded CIL instructions and their operand, flow and stack metadata.
//!
//! [`Instruction`] is what the decoder yields and what the rewriter and the in-process host
//! consume. Branch operands are carried as absolute target offsets in [`Operand::Target`]
//! and [`Instruction::branch_targets`], never as the raw relative encoding, so an
//! instruction can be re-emitted at a different position without reinterpreting bytes.
//!
//! Token operands additionally carry their resolution ([`Resolved`]): the field, method,
//! type or string they name, with generic parameters substituted where a generic context
//! was supplied.

use std::fmt::{self, UpperHex};

use crate::{
    assembly::decoder::Resolved,
    metadata::token::Token,
};

/// Encoding of an instruction operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer
    UInt8,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 16-bit integer
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    UInt32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference
    Token,
    /// Switch table operand
    Switch,
}

impl OperandType {
    /// Size in bytes of the operand, `None` for the variable-size switch table
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 => Some(1),
            OperandType::Int16 | OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::UInt32
            | OperandType::Float32
            | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::UInt64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// A constant embedded in the instruction stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Signed 16-bit immediate value
    Int16(i16),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Unsigned 32-bit immediate value
    UInt32(u32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// Unsigned 64-bit immediate value
    UInt64(u64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value:02X}"),
            Immediate::UInt8(value) => write!(f, "{value:02X}"),
            Immediate::Int16(value) => write!(f, "{value:04X}"),
            Immediate::UInt16(value) => write!(f, "{value:04X}"),
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::UInt32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
            Immediate::UInt64(value) => write!(f, "{value:016X}"),
            Immediate::Float32(value) => write!(f, "{:08X}", value.to_bits()),
            Immediate::Float64(value) => write!(f, "{:016X}", value.to_bits()),
        }
    }
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            Immediate::UInt8(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int16(value) => value as u64,
            Immediate::UInt16(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            Immediate::UInt32(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::UInt64(value) => value,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

/// A decoded operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Constant embedded in the instruction
    Immediate(Immediate),
    /// Absolute branch target offset
    Target(u64),
    /// Metadata token reference
    Token(Token),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Switch table with relative branch offsets
    Switch(Vec<i32>),
}

/// How an instruction affects control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region
    Leave,
}

/// Stack effect of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

/// Categorization of instructions by their primary function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCategory {
    /// Arithmetic operations (add, sub, mul, div, rem, neg)
    Arithmetic,
    /// Bitwise and logical operations (and, or, xor, not, shl, shr)
    BitwiseLogical,
    /// Comparison operations (ceq, cgt, clt)
    Comparison,
    /// Control flow operations (br, switch, ret, call)
    ControlFlow,
    /// Type conversion operations (conv.*)
    Conversion,
    /// Load and store operations (ldloc, ldarg, ldc)
    LoadStore,
    /// Object model operations (newobj, ldfld, box)
    ObjectModel,
    /// Prefix instructions (constrained.)
    Prefix,
    /// Miscellaneous operations (nop, break, dup)
    Misc,
}

/// A decoded CIL instruction.
#[derive(Clone)]
pub struct Instruction {
    /// Offset of the instruction within the method's code
    pub offset: u64,
    /// Size of this instruction in bytes
    pub size: u64,
    /// Primary opcode byte
    pub opcode: u8,
    /// Prefix byte (0 if no prefix)
    pub prefix: u8,
    /// Mnemonic (e.g. "add", "ldloc.s", "ret")
    pub mnemonic: &'static str,
    /// Functional categorization
    pub category: InstructionCategory,
    /// How this instruction affects control flow
    pub flow_type: FlowType,
    /// The operand data
    pub operand: Operand,
    /// What a token operand names
    pub resolved: Option<Resolved>,
    /// How this instruction affects the evaluation stack
    pub stack_behavior: StackBehavior,
    /// Absolute branch targets, if any
    pub branch_targets: Vec<u64>,
}

impl Instruction {
    /// True for conditional, unconditional and switch branches
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch
        )
    }

    /// True if execution never falls through to the next instruction
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::Leave
                | FlowType::EndFinally
        )
    }

    /// Offset of the next instruction
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.offset + self.size
    }

    /// First branch target
    #[must_use]
    pub fn get_branch_target(&self) -> Option<u64> {
        match &self.operand {
            Operand::Target(target) => Some(*target),
            _ => self.branch_targets.first().copied(),
        }
    }

    /// Token operand
    #[must_use]
    pub fn get_token_operand(&self) -> Option<Token> {
        match &self.operand {
            Operand::Token(token) => Some(*token),
            _ => None,
        }
    }

    /// Immediate operand widened to `i32`
    #[must_use]
    pub fn get_i32_operand(&self) -> Option<i32> {
        match &self.operand {
            Operand::Immediate(Immediate::Int32(v)) => Some(*v),
            Operand::Immediate(Immediate::UInt32(v)) => Some(i32::from_ne_bytes(v.to_ne_bytes())),
            Operand::Immediate(Immediate::Int16(v)) => Some(i32::from(*v)),
            Operand::Immediate(Immediate::UInt16(v)) => Some(i32::from(*v)),
            Operand::Immediate(Immediate::Int8(v)) => Some(i32::from(*v)),
            Operand::Immediate(Immediate::UInt8(v)) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// Immediate operand widened to `i64`
    #[must_use]
    pub fn get_i64_operand(&self) -> Option<i64> {
        match &self.operand {
            Operand::Immediate(Immediate::Int64(v)) => Some(*v),
            Operand::Immediate(Immediate::UInt64(v)) => Some(i64::from_ne_bytes(v.to_ne_bytes())),
            _ => self.get_i32_operand().map(i64::from),
        }
    }

    /// Floating point operand widened to `f64`
    #[must_use]
    pub fn get_f64_operand(&self) -> Option<f64> {
        match &self.operand {
            Operand::Immediate(Immediate::Float64(v)) => Some(*v),
            Operand::Immediate(Immediate::Float32(v)) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Argument slot touched by `ldarg*`, `ldarga*` and `starg*`, including the macro forms
    #[must_use]
    pub fn argument_index(&self) -> Option<u16> {
        match self.mnemonic {
            "ldarg.0" => Some(0),
            "ldarg.1" => Some(1),
            "ldarg.2" => Some(2),
            "ldarg.3" => Some(3),
            _ => match self.operand {
                Operand::Argument(index) => Some(index),
                _ => None,
            },
        }
    }

    /// Local slot touched by `ldloc*`, `ldloca*` and `stloc*`, including the macro forms
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        match self.mnemonic {
            "ldloc.0" | "stloc.0" => Some(0),
            "ldloc.1" | "stloc.1" => Some(1),
            "ldloc.2" | "stloc.2" => Some(2),
            "ldloc.3" | "stloc.3" => Some(3),
            _ => match self.operand {
                Operand::Local(index) => Some(index),
                _ => None,
            },
        }
    }

    /// Constant pushed by the `ldc.i4` family
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        match self.mnemonic {
            "ldc.i4.m1" => Some(-1),
            "ldc.i4.0" => Some(0),
            "ldc.i4.1" => Some(1),
            "ldc.i4.2" => Some(2),
            "ldc.i4.3" => Some(3),
            "ldc.i4.4" => Some(4),
            "ldc.i4.5" => Some(5),
            "ldc.i4.6" => Some(6),
            "ldc.i4.7" => Some(7),
            "ldc.i4.8" => Some(8),
            "ldc.i4" | "ldc.i4.s" => self.get_i32_operand(),
            _ => None,
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: ", self.offset)?;
        if self.prefix != 0 {
            write!(f, "{:02X}:", self.prefix)?;
        }
        write!(f, "{:02X} {:<12}", self.opcode, self.mnemonic)?;

        match &self.operand {
            Operand::None => {}
            Operand::Immediate(imm) => write!(f, " 0x{imm:X}")?,
            Operand::Target(target) => write!(f, " IL_{target:04X}")?,
            Operand::Token(token) => write!(f, " {token}")?,
            Operand::Local(local) => write!(f, " V_{local}")?,
            Operand::Argument(arg) => write!(f, " A_{arg}")?,
            Operand::Switch(items) => write!(f, " switch[{}]", items.len())?,
        }

        if let Some(resolved) = &self.resolved {
            write!(f, " // {resolved}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(mnemonic: &'static str, operand: Operand) -> Instruction {
        Instruction {
            offset: 0,
            size: 1,
            opcode: 0,
            prefix: 0,
            mnemonic,
            category: InstructionCategory::LoadStore,
            flow_type: FlowType::Sequential,
            operand,
            resolved: None,
            stack_behavior: StackBehavior {
                pops: 0,
                pushes: 1,
                net_effect: 1,
            },
            branch_targets: Vec::new(),
        }
    }

    #[test]
    fn macro_forms_expose_indices() {
        assert_eq!(instruction("ldarg.2", Operand::None).argument_index(), Some(2));
        assert_eq!(instruction("ldarg.s", Operand::Argument(7)).argument_index(), Some(7));
        assert_eq!(instruction("stloc.3", Operand::None).local_index(), Some(3));
        assert_eq!(instruction("ldloca", Operand::Local(300)).local_index(), Some(300));
        assert_eq!(instruction("nop", Operand::None).local_index(), None);
    }

    #[test]
    fn ldc_values() {
        assert_eq!(instruction("ldc.i4.m1", Operand::None).ldc_i4_value(), Some(-1));
        assert_eq!(
            instruction("ldc.i4.s", Operand::Immediate(Immediate::Int8(-5))).ldc_i4_value(),
            Some(-5)
        );
        assert_eq!(
            instruction("ldc.i4", Operand::Immediate(Immediate::Int32(1000))).ldc_i4_value(),
            Some(1000)
        );
    }

    #[test]
    fn immediate_bit_patterns() {
        assert_eq!(u64::from(Immediate::Int8(-1)), u64::MAX);
        assert_eq!(u64::from(Immediate::UInt16(0xBEEF)), 0xBEEF);
        assert_eq!(OperandType::Token.size(), Some(4));
        assert_eq!(OperandType::Switch.size(), None);
    }
}
