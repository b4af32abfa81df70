//! Label-based CIL encoder.
//!
//! [`InstructionEncoder`] turns mnemonics and operands into bytes. Branches name labels that
//! may be defined later; their offsets are patched in [`InstructionEncoder::finalize`]. The
//! encoder tracks evaluation stack depth as it goes, validates that every path reaching a
//! label agrees on the depth, and reports the maximum depth for the method header.
//!
//! Branches are emitted in the form requested. The helpers used by the weaver always request
//! the 4-byte forms, so a body's layout never depends on the distance to a label.
//!
//! # Example
//!
//! ```rust
//! use dotweave::assembly::InstructionEncoder;
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_ldarg(0)?;
//! encoder.emit_branch("brtrue", "done")?;
//! encoder.emit_instruction("nop", None)?;
//! encoder.define_label("done")?;
//! encoder.emit_instruction("ret", None)?;
//!
//! let (code, max_stack, labels) = encoder.finalize()?;
//! assert_eq!(code, vec![0x02, 0x3A, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A]);
//! assert_eq!(max_stack, 1);
//! assert_eq!(labels["done"], 7);
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Operand, OperandType},
        instructions::{lookup_mnemonic, CilInstruction},
    },
    Error, Result,
};

/// A branch operand waiting for its label to be placed
#[derive(Debug, Clone)]
struct LabelFixup {
    label: String,
    fixup_position: usize,
    offset_size: u8,
}

/// A switch table waiting for its labels to be placed
#[derive(Debug, Clone)]
struct SwitchFixup {
    labels: Vec<String>,
    fixup_position: usize,
    instruction_end_position: usize,
}

/// Encoder for one method body.
pub struct InstructionEncoder {
    bytecode: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
    switch_fixups: Vec<SwitchFixup>,
    current_stack_depth: i16,
    max_stack_depth: u16,
    label_stack_depths: HashMap<String, i16>,
    unreachable: bool,
}

impl InstructionEncoder {
    /// Empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            switch_fixups: Vec::new(),
            current_stack_depth: 0,
            max_stack_depth: 0,
            label_stack_depths: HashMap::new(),
            unreachable: false,
        }
    }

    fn opcode(mnemonic: &str) -> Result<&'static CilInstruction> {
        lookup_mnemonic(mnemonic).ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
    }

    fn push_opcode(&mut self, metadata: &CilInstruction) {
        if metadata.prefix != 0 {
            self.bytecode.push(metadata.prefix);
        }
        self.bytecode.push(metadata.opcode);
    }

    /// Emit an instruction with a fixed stack effect.
    ///
    /// Branches, switches and calls have dedicated methods.
    ///
    /// # Errors
    /// Returns an error for unknown mnemonics, mismatching operands and stack underflow.
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        let metadata = Self::opcode(mnemonic)?;
        if matches!(
            metadata.flow,
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Leave
                | FlowType::Switch
        ) {
            return Err(Error::InvalidBranch(format!(
                "'{mnemonic}' must be emitted against a label"
            )));
        }

        self.push_opcode(metadata);
        self.emit_operand(operand, metadata.op_type)?;
        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| malformed_error!("Stack error at instruction '{}': {}", mnemonic, e))?;

        if matches!(
            metadata.flow,
            FlowType::Return | FlowType::Throw | FlowType::EndFinally
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a branch or `leave` to `label`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] if `mnemonic` is not a branch, or a stack error if the
    /// depth disagrees with another branch to the same label.
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<()> {
        let metadata = Self::opcode(mnemonic)?;
        if !matches!(
            metadata.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            return Err(Error::InvalidBranch(format!(
                "instruction '{mnemonic}' is not a branch instruction"
            )));
        }

        self.push_opcode(metadata);
        let offset_size = match metadata.op_type {
            OperandType::Int8 => 1,
            OperandType::Int32 => 4,
            _ => {
                return Err(Error::InvalidBranch(
                    "operand type must be Int8 or Int32".to_string(),
                ))
            }
        };
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            offset_size,
        });
        self.bytecode.extend(std::iter::repeat(0).take(offset_size as usize));

        if metadata.flow == FlowType::Leave {
            self.current_stack_depth = 0;
        }
        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| {
                malformed_error!("Stack error at branch '{}' to '{}': {}", mnemonic, label, e)
            })?;
        self.record_label_stack_depth(label)?;

        if matches!(
            metadata.flow,
            FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emit a `switch` over `labels`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] for an empty table.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<()> {
        if labels.is_empty() {
            return Err(Error::InvalidBranch(
                "switch must have at least one target".to_string(),
            ));
        }

        self.bytecode.push(0x45);
        let num_targets =
            u32::try_from(labels.len()).map_err(|_| malformed_error!("Too many switch targets"))?;
        self.bytecode.extend_from_slice(&num_targets.to_le_bytes());

        let fixup_position = self.bytecode.len();
        for _ in 0..labels.len() {
            self.bytecode.extend_from_slice(&[0, 0, 0, 0]);
        }
        self.switch_fixups.push(SwitchFixup {
            labels: labels.iter().map(|s| (*s).to_string()).collect(),
            fixup_position,
            instruction_end_position: self.bytecode.len(),
        });

        self.update_stack_depth(1, 0)
            .map_err(|e| malformed_error!("Stack error at 'switch': {}", e))?;
        for label in labels {
            self.record_label_stack_depth(label)?;
        }

        Ok(())
    }

    /// Emit a call-like instruction whose stack effect depends on the callee.
    ///
    /// `num_args` includes `this`. `newobj` passes the constructor's parameter count and
    /// `has_result = true`.
    ///
    /// # Errors
    /// Returns an error for unknown mnemonics, a non-token operand or stack underflow.
    pub fn emit_call(
        &mut self,
        mnemonic: &str,
        operand: Option<Operand>,
        num_args: u8,
        has_result: bool,
    ) -> Result<()> {
        let metadata = Self::opcode(mnemonic)?;
        self.push_opcode(metadata);
        self.emit_operand(operand, metadata.op_type)?;

        let pushes = u8::from(has_result);
        self.update_stack_depth(num_args, pushes)
            .map_err(|e| malformed_error!("Stack error at call '{}': {}", mnemonic, e))?;

        Ok(())
    }

    /// Load an argument using the shortest form
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_ldarg(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldarg.0", None),
            1 => self.emit_instruction("ldarg.1", None),
            2 => self.emit_instruction("ldarg.2", None),
            3 => self.emit_instruction("ldarg.3", None),
            x if x <= 255 => self.emit_instruction("ldarg.s", Some(Operand::Argument(x))),
            x => self.emit_instruction("ldarg", Some(Operand::Argument(x))),
        }
    }

    /// Store into an argument
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_starg(&mut self, index: u16) -> Result<()> {
        if index <= 255 {
            self.emit_instruction("starg.s", Some(Operand::Argument(index)))
        } else {
            self.emit_instruction("starg", Some(Operand::Argument(index)))
        }
    }

    /// Load the address of an argument
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_ldarga(&mut self, index: u16) -> Result<()> {
        if index <= 255 {
            self.emit_instruction("ldarga.s", Some(Operand::Argument(index)))
        } else {
            self.emit_instruction("ldarga", Some(Operand::Argument(index)))
        }
    }

    /// Load a local using the shortest form
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_ldloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("ldloc.0", None),
            1 => self.emit_instruction("ldloc.1", None),
            2 => self.emit_instruction("ldloc.2", None),
            3 => self.emit_instruction("ldloc.3", None),
            x if x <= 255 => self.emit_instruction("ldloc.s", Some(Operand::Local(x))),
            x => self.emit_instruction("ldloc", Some(Operand::Local(x))),
        }
    }

    /// Store into a local using the shortest form
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_stloc(&mut self, index: u16) -> Result<()> {
        match index {
            0 => self.emit_instruction("stloc.0", None),
            1 => self.emit_instruction("stloc.1", None),
            2 => self.emit_instruction("stloc.2", None),
            3 => self.emit_instruction("stloc.3", None),
            x if x <= 255 => self.emit_instruction("stloc.s", Some(Operand::Local(x))),
            x => self.emit_instruction("stloc", Some(Operand::Local(x))),
        }
    }

    /// Load the address of a local
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_ldloca(&mut self, index: u16) -> Result<()> {
        if index <= 255 {
            self.emit_instruction("ldloca.s", Some(Operand::Local(index)))
        } else {
            self.emit_instruction("ldloca", Some(Operand::Local(index)))
        }
    }

    /// Push an `int32` constant using the shortest form
    ///
    /// # Errors
    /// Propagates encoding errors.
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<()> {
        match value {
            -1 => self.emit_instruction("ldc.i4.m1", None),
            0 => self.emit_instruction("ldc.i4.0", None),
            1 => self.emit_instruction("ldc.i4.1", None),
            2 => self.emit_instruction("ldc.i4.2", None),
            3 => self.emit_instruction("ldc.i4.3", None),
            4 => self.emit_instruction("ldc.i4.4", None),
            5 => self.emit_instruction("ldc.i4.5", None),
            6 => self.emit_instruction("ldc.i4.6", None),
            7 => self.emit_instruction("ldc.i4.7", None),
            8 => self.emit_instruction("ldc.i4.8", None),
            x => match i8::try_from(x) {
                Ok(small) => self.emit_instruction(
                    "ldc.i4.s",
                    Some(Operand::Immediate(Immediate::Int8(small))),
                ),
                Err(_) => self.emit_instruction(
                    "ldc.i4",
                    Some(Operand::Immediate(Immediate::Int32(x))),
                ),
            },
        }
    }

    /// Place `name` at the current position.
    ///
    /// A label reached only by branches takes the depth those branches recorded.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if the label exists, or a stack error if fall-through
    /// and branches disagree on the depth.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }

        if let Some(&expected) = self.label_stack_depths.get(name) {
            if self.unreachable {
                self.current_stack_depth = expected;
            } else if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch at label '{}': expected {} (from branch), got {} (current)",
                    name,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else if !self.unreachable {
            self.label_stack_depths
                .insert(name.to_string(), self.current_stack_depth);
        } else {
            self.current_stack_depth = 0;
        }
        self.unreachable = false;

        let depth = u16::try_from(self.current_stack_depth.max(0)).unwrap_or(0);
        self.max_stack_depth = self.max_stack_depth.max(depth);

        let position = self.current_position()?;
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Declare the stack depth at a label that is entered without a branch, such as the
    /// start of a catch handler (depth 1, the exception object).
    pub fn set_label_stack_depth(&mut self, label: &str, depth: i16) {
        self.label_stack_depths.insert(label.to_string(), depth);
    }

    /// Current write position
    ///
    /// # Errors
    /// Returns an error if the code exceeds the `u32` range.
    pub fn current_position(&self) -> Result<u32> {
        u32::try_from(self.bytecode.len())
            .map_err(|_| malformed_error!("Bytecode length exceeds u32 range"))
    }

    /// Offset of a placed label
    #[must_use]
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// Current tracked stack depth
    #[must_use]
    pub fn current_stack_depth(&self) -> i16 {
        self.current_stack_depth
    }

    /// Maximum stack depth seen so far
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// True if the last emitted instruction cannot fall through
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    /// Patch all branch offsets and return the code, the maximum stack depth and the label
    /// positions.
    ///
    /// # Errors
    /// Returns [`Error::UndefinedLabel`] for a branch to a label that was never placed and
    /// [`Error::InvalidBranch`] for a short branch whose target is out of range.
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let label_position = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            let next_instruction_pos = fixup.fixup_position + fixup.offset_size as usize;
            let label_pos_i32 = i32::try_from(*label_position)
                .map_err(|_| malformed_error!("Label position exceeds i32 range"))?;
            let next_instr_pos_i32 = i32::try_from(next_instruction_pos)
                .map_err(|_| malformed_error!("Instruction position exceeds i32 range"))?;

            self.write_branch_offset(label_pos_i32 - next_instr_pos_i32, fixup)?;
        }

        let switch_fixups = std::mem::take(&mut self.switch_fixups);
        for switch_fixup in &switch_fixups {
            let instruction_end_i32 = i32::try_from(switch_fixup.instruction_end_position)
                .map_err(|_| malformed_error!("Switch instruction end exceeds i32 range"))?;

            for (i, label) in switch_fixup.labels.iter().enumerate() {
                let label_position = self
                    .labels
                    .get(label)
                    .ok_or_else(|| Error::UndefinedLabel(label.clone()))?;
                let label_pos_i32 = i32::try_from(*label_position)
                    .map_err(|_| malformed_error!("Label position exceeds i32 range"))?;

                let target_pos = switch_fixup.fixup_position + i * 4;
                self.bytecode[target_pos..target_pos + 4]
                    .copy_from_slice(&(label_pos_i32 - instruction_end_i32).to_le_bytes());
            }
        }

        Ok((self.bytecode, self.max_stack_depth, self.labels))
    }

    fn emit_operand(&mut self, operand: Option<Operand>, expected: OperandType) -> Result<()> {
        let wrong = |name: &str| Error::WrongOperandType {
            expected: name.to_string(),
        };

        match (expected, operand) {
            (OperandType::None, None) => {}
            (OperandType::None, Some(_)) => return Err(Error::UnexpectedOperand),
            (OperandType::Int8, Some(Operand::Immediate(Immediate::Int8(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt8, Some(Operand::Immediate(Immediate::UInt8(val)))) => {
                self.bytecode.push(val);
            }
            (OperandType::UInt8, Some(Operand::Local(index) | Operand::Argument(index))) => {
                let byte = u8::try_from(index).map_err(|_| wrong("UInt8"))?;
                self.bytecode.push(byte);
            }
            (OperandType::Int16, Some(Operand::Immediate(Immediate::Int16(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt16, Some(Operand::Immediate(Immediate::UInt16(val))))
            | (OperandType::UInt16, Some(Operand::Local(val) | Operand::Argument(val))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int32, Some(Operand::Immediate(Immediate::Int32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt32, Some(Operand::Immediate(Immediate::UInt32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Int64, Some(Operand::Immediate(Immediate::Int64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::UInt64, Some(Operand::Immediate(Immediate::UInt64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float32, Some(Operand::Immediate(Immediate::Float32(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Float64, Some(Operand::Immediate(Immediate::Float64(val)))) => {
                self.bytecode.extend_from_slice(&val.to_le_bytes());
            }
            (OperandType::Token, Some(Operand::Token(token))) => {
                self.bytecode.extend_from_slice(&token.value().to_le_bytes());
            }
            (OperandType::Int8, _) => return Err(wrong("Int8")),
            (OperandType::UInt8, _) => return Err(wrong("UInt8")),
            (OperandType::Int16, _) => return Err(wrong("Int16")),
            (OperandType::UInt16, _) => return Err(wrong("UInt16")),
            (OperandType::Int32, _) => return Err(wrong("Int32")),
            (OperandType::UInt32, _) => return Err(wrong("UInt32")),
            (OperandType::Int64, _) => return Err(wrong("Int64")),
            (OperandType::UInt64, _) => return Err(wrong("UInt64")),
            (OperandType::Float32, _) => return Err(wrong("Float32")),
            (OperandType::Float64, _) => return Err(wrong("Float64")),
            (OperandType::Token, _) => return Err(wrong("Token")),
            (OperandType::Switch, _) => return Err(wrong("label list")),
        }
        Ok(())
    }

    fn write_branch_offset(&mut self, offset: i32, fixup: &LabelFixup) -> Result<()> {
        match fixup.offset_size {
            1 => {
                let offset_i8 = i8::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!(
                        "offset {offset} to '{}' out of range for 1-byte instruction",
                        fixup.label
                    ))
                })?;
                self.bytecode[fixup.fixup_position] = offset_i8.to_le_bytes()[0];
            }
            4 => {
                self.bytecode[fixup.fixup_position..fixup.fixup_position + 4]
                    .copy_from_slice(&offset.to_le_bytes());
            }
            size => {
                return Err(Error::InvalidBranch(format!(
                    "invalid offset size: {size} bytes"
                )))
            }
        }
        Ok(())
    }

    fn update_stack_depth(&mut self, pops: u8, pushes: u8) -> Result<()> {
        self.current_stack_depth -= i16::from(pops);
        if self.current_stack_depth < 0 {
            if !self.unreachable {
                return Err(malformed_error!(
                    "Stack underflow: depth became {} after instruction with {} pops",
                    self.current_stack_depth,
                    pops
                ));
            }
            self.current_stack_depth = 0;
        }
        self.current_stack_depth += i16::from(pushes);

        let current_depth_u16 = u16::try_from(self.current_stack_depth)
            .map_err(|_| malformed_error!("Stack depth exceeds u16 range"))?;
        self.max_stack_depth = self.max_stack_depth.max(current_depth_u16);

        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: &str) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        if let Some(&expected) = self.label_stack_depths.get(label) {
            if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch for branch to '{}': expected {}, but branch has {}",
                    label,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else {
            self.label_stack_depths
                .insert(label.to_string(), self.current_stack_depth);
        }
        Ok(())
    }
}

impl Default for InstructionEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn simple_instruction_encoding() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_instruction("nop", None)?;
        encoder.emit_instruction("ret", None)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x00, 0x2A]);
        assert_eq!(max_stack, 0);
        Ok(())
    }

    #[test]
    fn index_operands_choose_short_forms() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldarg(5)?;
        encoder.emit_stloc(300)?;
        encoder.emit_ldc_i4(-100)?;
        encoder.emit_ldc_i4(1000)?;

        let (bytecode, max_stack, _) = encoder.finalize()?;
        assert_eq!(
            bytecode,
            vec![0x0E, 0x05, 0xFE, 0x0E, 0x2C, 0x01, 0x1F, 0x9C, 0x20, 0xE8, 0x03, 0x00, 0x00]
        );
        assert_eq!(max_stack, 2);
        Ok(())
    }

    #[test]
    fn backward_branch() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.define_label("top")?;
        encoder.emit_instruction("nop", None)?;
        encoder.emit_branch("br", "top")?;

        let (bytecode, _, _) = encoder.finalize()?;
        assert_eq!(bytecode, vec![0x00, 0x38, 0xFA, 0xFF, 0xFF, 0xFF]);
        Ok(())
    }

    #[test]
    fn short_branch_out_of_range() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_branch("br.s", "far")?;
        for _ in 0..200 {
            encoder.emit_instruction("nop", None)?;
        }
        encoder.define_label("far")?;
        assert!(matches!(encoder.finalize(), Err(Error::InvalidBranch(_))));
        Ok(())
    }

    #[test]
    fn switch_offsets_are_relative_to_table_end() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldc_i4(0)?;
        encoder.emit_switch(&["a", "b"])?;
        encoder.define_label("a")?;
        encoder.emit_instruction("nop", None)?;
        encoder.define_label("b")?;
        encoder.emit_instruction("ret", None)?;

        let (bytecode, _, labels) = encoder.finalize()?;
        assert_eq!(&bytecode[1..6], &[0x45, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&bytecode[6..10], &0_i32.to_le_bytes());
        assert_eq!(&bytecode[10..14], &1_i32.to_le_bytes());
        assert_eq!(labels["b"], 15);
        Ok(())
    }

    #[test]
    fn leave_empties_stack_and_catch_starts_with_exception() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldc_i4(1)?;
        encoder.emit_branch("leave", "end")?;
        encoder.set_label_stack_depth("handler", 1);
        encoder.define_label("handler")?;
        assert_eq!(encoder.current_stack_depth(), 1);
        encoder.emit_instruction("pop", None)?;
        encoder.emit_branch("leave", "end")?;
        encoder.define_label("end")?;
        assert_eq!(encoder.current_stack_depth(), 0);
        encoder.emit_instruction("ret", None)?;
        encoder.finalize()?;
        Ok(())
    }

    #[test]
    fn call_stack_effect_from_caller() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldarg(0)?;
        encoder.emit_ldarg(1)?;
        encoder.emit_call("call", Some(Operand::Token(Token::new(0x0600_0001))), 2, true)?;
        assert_eq!(encoder.current_stack_depth(), 1);
        assert_eq!(encoder.max_stack_depth(), 2);
        Ok(())
    }

    #[test]
    fn stack_mismatch_detected() -> Result<()> {
        let mut encoder = InstructionEncoder::new();
        encoder.emit_ldc_i4(0)?;
        encoder.emit_branch("brtrue", "join")?;
        encoder.emit_ldc_i4(1)?;
        assert!(encoder.define_label("join").is_err());
        Ok(())
    }

    #[test]
    fn errors() {
        let mut encoder = InstructionEncoder::new();
        assert!(matches!(
            encoder.emit_instruction("frobnicate", None),
            Err(Error::InvalidMnemonic(_))
        ));
        assert!(matches!(
            encoder.emit_instruction("ldstr", Some(Operand::Immediate(Immediate::Int32(1)))),
            Err(Error::WrongOperandType { .. })
        ));
        assert!(matches!(
            encoder.emit_instruction("nop", Some(Operand::Local(0))),
            Err(Error::UnexpectedOperand)
        ));
        assert!(matches!(
            encoder.emit_instruction("br", None),
            Err(Error::InvalidBranch(_))
        ));

        let mut encoder = InstructionEncoder::new();
        encoder.emit_branch("br", "nowhere").unwrap();
        assert!(matches!(encoder.finalize(), Err(Error::UndefinedLabel(_))));

        let mut encoder = InstructionEncoder::new();
        encoder.define_label("twice").unwrap();
        assert!(matches!(
            encoder.define_label("twice"),
            Err(Error::DuplicateLabel(_))
        ));
    }
}
