//! Fluent instruction assembler.
//!
//! [`InstructionAssembler`] sits on top of [`InstructionEncoder`] and adds what a method body
//! needs beyond raw bytes: local variable declaration, fresh label allocation and exception
//! clauses expressed with labels. [`InstructionAssembler::finish`] resolves everything into
//! a [`MethodBody`].
//!
//! Every emitting method returns `Result<&mut Self>`, so sequences chain with `?`:
//!
//! ```rust
//! use dotweave::{assembly::InstructionAssembler, metadata::signature::TypeSig};
//!
//! let mut asm = InstructionAssembler::new();
//! let sum = asm.declare_local(TypeSig::I4);
//! asm.ldarg(0)?.ldarg(1)?.add()?.stloc(sum)?.ldloc(sum)?.ret()?;
//!
//! let body = asm.finish()?;
//! assert_eq!(body.max_stack, 2);
//! assert_eq!(body.locals, vec![TypeSig::I4]);
//! # Ok::<(), dotweave::Error>(())
//! ```

use crate::{
    assembly::{
        encoder::InstructionEncoder,
        instruction::{FlowType, Immediate, Instruction, Operand},
    },
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        signature::{MethodSig, TypeSig},
        token::Token,
    },
    Error, Result,
};

/// Exception clause in label form
#[derive(Debug, Clone)]
struct PendingHandler {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    class: Token,
}

/// Long (4-byte offset) form of a branch mnemonic
#[must_use]
pub fn long_form(mnemonic: &str) -> &str {
    mnemonic.strip_suffix(".s").unwrap_or(mnemonic)
}

/// Builder of one method body.
pub struct InstructionAssembler {
    encoder: InstructionEncoder,
    locals: Vec<TypeSig>,
    handlers: Vec<PendingHandler>,
    next_label: usize,
}

impl InstructionAssembler {
    /// Empty assembler
    #[must_use]
    pub fn new() -> Self {
        InstructionAssembler {
            encoder: InstructionEncoder::new(),
            locals: Vec::new(),
            handlers: Vec::new(),
            next_label: 0,
        }
    }

    /// Assembler continuing after existing locals, used when re-emitting a body that keeps
    /// its original local slots
    #[must_use]
    pub fn with_locals(locals: Vec<TypeSig>) -> Self {
        InstructionAssembler {
            locals,
            ..InstructionAssembler::new()
        }
    }

    /// Declare a local and return its slot
    pub fn declare_local(&mut self, local_type: TypeSig) -> u16 {
        self.locals.push(local_type);
        u16::try_from(self.locals.len() - 1).unwrap_or(u16::MAX)
    }

    /// Allocate a fresh label name
    pub fn label(&mut self) -> String {
        self.next_label += 1;
        format!("L{}", self.next_label)
    }

    /// Place a label at the current position
    ///
    /// # Errors
    /// Returns an error if the label was already placed or the stack depth disagrees.
    pub fn mark(&mut self, label: &str) -> Result<&mut Self> {
        self.encoder.define_label(label)?;
        Ok(self)
    }

    /// Place the first label of a catch handler; the exception object is on the stack
    ///
    /// # Errors
    /// Returns an error if the label was already placed.
    pub fn mark_catch(&mut self, label: &str) -> Result<&mut Self> {
        self.encoder.set_label_stack_depth(label, 1);
        self.encoder.define_label(label)?;
        Ok(self)
    }

    /// Register a catch clause; `class` names the caught type
    pub fn add_catch(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
        class: Token,
    ) {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class,
        });
    }

    /// Register a finally clause
    pub fn add_finally(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class: Token::new(0),
        });
    }

    /// Register a clause copied from another body, with bounds already turned into labels
    pub fn add_clause(&mut self, flags: ExceptionHandlerFlags, labels: [&str; 4], class: Token) {
        let [try_start, try_end, handler_start, handler_end] = labels;
        self.handlers.push(PendingHandler {
            flags,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            class,
        });
    }

    /// True if the last instruction cannot fall through
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.encoder.is_unreachable()
    }

    /// Emit any fixed-effect instruction by mnemonic
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn emit(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, operand)?;
        Ok(self)
    }

    /// Emit a branch to `label`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn branch(&mut self, mnemonic: &str, label: &str) -> Result<&mut Self> {
        self.encoder.emit_branch(mnemonic, label)?;
        Ok(self)
    }

    /// Emit a switch table
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn switch(&mut self, labels: &[&str]) -> Result<&mut Self> {
        self.encoder.emit_switch(labels)?;
        Ok(self)
    }

    /// Re-emit a decoded non-branch instruction with its original operand.
    ///
    /// Calls take their stack effect from the resolved signature.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] for a call whose target is unresolved, and
    /// [`Error::InvalidBranch`] for branches, which need label mapping.
    pub fn emit_decoded(&mut self, instruction: &Instruction) -> Result<&mut Self> {
        if instruction.is_branch() || instruction.flow_type == FlowType::Leave {
            return Err(Error::InvalidBranch(format!(
                "'{}' at IL_{:04X} needs a label",
                instruction.mnemonic, instruction.offset
            )));
        }

        if matches!(instruction.mnemonic, "call" | "callvirt" | "newobj") {
            let method = instruction
                .resolved
                .as_ref()
                .and_then(|r| r.as_method())
                .ok_or_else(|| {
                    decode_error!("Unresolved call target at IL_{:04X}", instruction.offset)
                })?;
            let token = Operand::Token(method.token);
            let sig = &method.signature;
            if instruction.mnemonic == "newobj" {
                let params = u8::try_from(sig.params.len()).unwrap_or(u8::MAX);
                self.encoder.emit_call("newobj", Some(token), params, true)?;
            } else {
                self.encoder.emit_call(
                    instruction.mnemonic,
                    Some(token),
                    sig.call_pops(),
                    sig.call_pushes() > 0,
                )?;
            }
            return Ok(self);
        }

        let operand = match &instruction.operand {
            Operand::None => None,
            other => Some(other.clone()),
        };
        self.emit(instruction.mnemonic, operand)
    }

    /// `nop`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.emit("nop", None)
    }

    /// `ret`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.emit("ret", None)
    }

    /// `pop`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.emit("pop", None)
    }

    /// `dup`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.emit("dup", None)
    }

    /// `ldnull`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldnull(&mut self) -> Result<&mut Self> {
        self.emit("ldnull", None)
    }

    /// Load argument `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldarg(index)?;
        Ok(self)
    }

    /// Load the address of argument `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldarga(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldarga(index)?;
        Ok(self)
    }

    /// Store into argument `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn starg(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_starg(index)?;
        Ok(self)
    }

    /// Load local `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldloc(index)?;
        Ok(self)
    }

    /// Load the address of local `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldloca(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_ldloca(index)?;
        Ok(self)
    }

    /// Store into local `index`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        self.encoder.emit_stloc(index)?;
        Ok(self)
    }

    /// Push an `int32` constant
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.encoder.emit_ldc_i4(value)?;
        Ok(self)
    }

    /// Push an `int64` constant
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit("ldc.i8", Some(Operand::Immediate(Immediate::Int64(value))))
    }

    /// Push a `float64` constant
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.emit("ldc.r8", Some(Operand::Immediate(Immediate::Float64(value))))
    }

    /// Push a user string
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldstr(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("ldstr", Some(Operand::Token(token)))
    }

    /// Load an instance field
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldfld(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("ldfld", Some(Operand::Token(token)))
    }

    /// Store an instance field
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stfld(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("stfld", Some(Operand::Token(token)))
    }

    /// Load a static field
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldsfld(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("ldsfld", Some(Operand::Token(token)))
    }

    /// Store a static field
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stsfld(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("stsfld", Some(Operand::Token(token)))
    }

    /// Call a method with signature `sig`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn call(&mut self, token: Token, sig: &MethodSig) -> Result<&mut Self> {
        self.encoder.emit_call(
            "call",
            Some(Operand::Token(token)),
            sig.call_pops(),
            sig.call_pushes() > 0,
        )?;
        Ok(self)
    }

    /// Virtual call of a method with signature `sig`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn callvirt(&mut self, token: Token, sig: &MethodSig) -> Result<&mut Self> {
        self.encoder.emit_call(
            "callvirt",
            Some(Operand::Token(token)),
            sig.call_pops(),
            sig.call_pushes() > 0,
        )?;
        Ok(self)
    }

    /// Allocate an object through the constructor with signature `sig`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn newobj(&mut self, token: Token, sig: &MethodSig) -> Result<&mut Self> {
        let params = u8::try_from(sig.params.len()).unwrap_or(u8::MAX);
        self.encoder
            .emit_call("newobj", Some(Operand::Token(token)), params, true)?;
        Ok(self)
    }

    /// Push a function pointer
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldftn(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("ldftn", Some(Operand::Token(token)))
    }

    /// Box a value of the type named by `token`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn box_value(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("box", Some(Operand::Token(token)))
    }

    /// Unbox or cast to the type named by `token`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn unbox_any(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("unbox.any", Some(Operand::Token(token)))
    }

    /// Cast to the type named by `token`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn castclass(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("castclass", Some(Operand::Token(token)))
    }

    /// Allocate a zero-based array of the element type named by `token`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn newarr(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("newarr", Some(Operand::Token(token)))
    }

    /// `ldelem.ref`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldelem_ref(&mut self) -> Result<&mut Self> {
        self.emit("ldelem.ref", None)
    }

    /// `stelem.ref`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stelem_ref(&mut self) -> Result<&mut Self> {
        self.emit("stelem.ref", None)
    }

    /// Zero the value at the address on the stack
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn initobj(&mut self, token: Token) -> Result<&mut Self> {
        self.emit("initobj", Some(Operand::Token(token)))
    }

    /// `add`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn add(&mut self) -> Result<&mut Self> {
        self.emit("add", None)
    }

    /// `sub`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn sub(&mut self) -> Result<&mut Self> {
        self.emit("sub", None)
    }

    /// `mul`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn mul(&mut self) -> Result<&mut Self> {
        self.emit("mul", None)
    }

    /// `div`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn div(&mut self) -> Result<&mut Self> {
        self.emit("div", None)
    }

    /// `ceq`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ceq(&mut self) -> Result<&mut Self> {
        self.emit("ceq", None)
    }

    /// `cgt`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn cgt(&mut self) -> Result<&mut Self> {
        self.emit("cgt", None)
    }

    /// `clt`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn clt(&mut self) -> Result<&mut Self> {
        self.emit("clt", None)
    }

    /// `throw`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.emit("throw", None)
    }

    /// `rethrow`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn rethrow(&mut self) -> Result<&mut Self> {
        self.emit("rethrow", None)
    }

    /// `endfinally`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn endfinally(&mut self) -> Result<&mut Self> {
        self.emit("endfinally", None)
    }

    /// Unconditional branch
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn br(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("br", label)
    }

    /// Branch if true / non-null / non-zero
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn brtrue(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("brtrue", label)
    }

    /// Branch if false / null / zero
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn brfalse(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("brfalse", label)
    }

    /// Branch if less than
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn blt(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("blt", label)
    }

    /// Leave a protected region
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn leave(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("leave", label)
    }

    /// Resolve labels and exception clauses into a method body.
    ///
    /// Clauses are ordered innermost first, in registration order among disjoint ones.
    ///
    /// # Errors
    /// Returns [`Error::UndefinedLabel`] if a branch or clause names a label that was never
    /// placed.
    pub fn finish(self) -> Result<MethodBody> {
        let InstructionAssembler {
            encoder,
            locals,
            handlers,
            ..
        } = self;
        let (code, max_stack, labels) = encoder.finalize()?;

        let position = |label: &str| {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
        };

        let mut exception_handlers = Vec::with_capacity(handlers.len());
        for pending in &handlers {
            let try_offset = position(&pending.try_start)?;
            let try_end = position(&pending.try_end)?;
            let handler_offset = position(&pending.handler_start)?;
            let handler_end = position(&pending.handler_end)?;
            if try_end < try_offset || handler_end < handler_offset {
                return Err(malformed_error!(
                    "Exception clause bounds inverted: {}..{} / {}..{}",
                    try_offset,
                    try_end,
                    handler_offset,
                    handler_end
                ));
            }
            exception_handlers.push(ExceptionHandler {
                flags: pending.flags,
                try_offset,
                try_length: try_end - try_offset,
                handler_offset,
                handler_length: handler_end - handler_offset,
                filter_offset: pending.class.value(),
            });
        }
        exception_handlers.sort_by_key(|h| h.try_length);

        Ok(MethodBody {
            max_stack,
            init_locals: !locals.is_empty(),
            locals,
            code,
            exception_handlers,
        })
    }
}

impl Default for InstructionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_finally_layout() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        let (try_start, try_end, finally_end, done) =
            (asm.label(), asm.label(), asm.label(), asm.label());

        asm.mark(&try_start)?.nop()?.leave(&done)?;
        asm.mark(&try_end)?.nop()?.endfinally()?;
        asm.mark(&finally_end)?.mark(&done)?.ret()?;
        asm.add_finally(&try_start, &try_end, &try_end, &finally_end);

        let body = asm.finish()?;
        assert_eq!(body.exception_handlers.len(), 1);
        let clause = &body.exception_handlers[0];
        assert!(clause.is_finally());
        assert_eq!((clause.try_offset, clause.try_length), (0, 6));
        assert_eq!((clause.handler_offset, clause.handler_length), (6, 2));
        Ok(())
    }

    #[test]
    fn nested_clauses_innermost_first() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        let labels: Vec<String> = (0..6).map(|_| asm.label()).collect();
        let [outer, inner, inner_end, catch_end, finally_end, done] =
            [0, 1, 2, 3, 4, 5].map(|i| labels[i].as_str());

        asm.mark(outer)?.mark(inner)?.nop()?.leave(done)?;
        asm.mark_catch(inner_end)?.pop()?.rethrow()?;
        asm.mark(catch_end)?.nop()?.endfinally()?;
        asm.mark(finally_end)?.mark(done)?.ret()?;
        asm.add_finally(outer, catch_end, catch_end, finally_end);
        asm.add_catch(inner, inner_end, inner_end, catch_end, Token::new(0x0100_0001));

        let body = asm.finish()?;
        assert!(body.exception_handlers[0].is_catch());
        assert_eq!(body.exception_handlers[0].catch_type(), Some(Token::new(0x0100_0001)));
        assert!(body.exception_handlers[1].is_finally());
        Ok(())
    }

    #[test]
    fn long_forms() {
        assert_eq!(long_form("br.s"), "br");
        assert_eq!(long_form("bne.un.s"), "bne.un");
        assert_eq!(long_form("leave"), "leave");
    }

    #[test]
    fn unplaced_clause_label_fails() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ret()?;
        asm.add_finally("a", "b", "c", "d");
        assert!(matches!(asm.finish(), Err(Error::UndefinedLabel(_))));
        Ok(())
    }
}
