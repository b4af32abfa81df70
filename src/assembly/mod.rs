//! CIL instruction model, decoding and encoding.
//!
//! This module covers everything between raw method body bytes and a symbolic
//! instruction stream:
//!
//! - [`instructions`] - The opcode table with operand types, flow types and stack effects
//! - [`Instruction`] - One decoded instruction with its resolved operand
//! - [`InstructionDecoder`] - Lazy, restartable decoding with token resolution and generic
//!   substitution, over any [`BodySource`]
//! - [`InstructionEncoder`] - Label-based encoding with branch fixups and stack tracking
//! - [`InstructionAssembler`] - Fluent method body construction on top of the encoder
//!
//! The weaver decodes original bodies, re-emits them through the assembler with labels at
//! every branch target and exception boundary, and splices in its own instructions. The
//! in-process host decodes the same bodies for execution.

mod assembler;
mod decoder;
mod encoder;
mod instruction;
pub mod instructions;

pub use assembler::{long_form, InstructionAssembler};
pub use decoder::{
    decode_instruction, decode_method, resolve_token, BodySource, GenericContext,
    InstructionDecoder, RawBody, Resolved, ResolvedField, ResolvedMethod,
};
pub use encoder::InstructionEncoder;
pub use instruction::{
    FlowType, Immediate, Instruction, InstructionCategory, Operand, OperandType, StackBehavior,
};
