//! Re-emission of decoded method bodies.
//!
//! Rewriting a member moves its original code into another method, and redirecting field
//! accesses changes instruction sizes. Both are done by decoding the body and emitting it
//! again through an [`InstructionAssembler`]: every branch target and exception clause
//! boundary becomes a label, so offsets are recomputed by the encoder.
//!
//! While emitting, accesses to intercepted fields are replaced by calls to their access
//! helpers and event raise sites by calls to the raise helper.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use crate::{
    assembly::{
        decode_method, long_form, FlowType, GenericContext, Instruction, InstructionAssembler,
        Resolved,
    },
    metadata::{
        member::{FieldId, MethodId},
        method::{ExceptionHandler, ExceptionHandlerFlags},
        module::Module,
        signature::{MethodSig, TypeSig, OBJECT_TYPE},
        token::Token,
    },
    weaver::{emit, events},
    Error, Result,
};

/// A static helper replacing an instruction
#[derive(Debug, Clone)]
pub(crate) struct Redirect {
    pub(crate) token: Token,
    pub(crate) signature: MethodSig,
}

/// Replacements applied to every re-emitted body
#[derive(Debug, Default)]
pub(crate) struct Redirects {
    /// `ldfld` / `ldsfld` of intercepted fields
    pub(crate) reads: HashMap<FieldId, Redirect>,
    /// `stfld` / `stsfld` of intercepted fields
    pub(crate) writes: HashMap<FieldId, Redirect>,
    /// Raise helpers by the backing field of the event
    pub(crate) raises: HashMap<FieldId, Redirect>,
}

impl Redirects {
    pub(crate) fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty() && self.raises.is_empty()
    }
}

/// A method body in decoded form
pub(crate) struct DecodedBody {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) handlers: Vec<ExceptionHandler>,
    pub(crate) locals: Vec<TypeSig>,
    code_size: u64,
}

impl DecodedBody {
    pub(crate) fn decode(module: &Module, method: MethodId) -> Result<Self> {
        let def = module.method(method)?;
        let body = def
            .body
            .as_ref()
            .ok_or_else(|| decode_error!("Method {} has no body", def.name))?;
        let instructions = decode_method(module, method, GenericContext::default())?;
        Ok(DecodedBody {
            instructions,
            handlers: body.exception_handlers.clone(),
            locals: body.locals.clone(),
            code_size: body.code.len() as u64,
        })
    }

    /// Index of the call that chains constructor `ctor` to a constructor of its own type or
    /// of its base type, made on `this`.
    ///
    /// Constructor calls on other receivers, such as a value-type local initialized in
    /// place, do not chain.
    pub(crate) fn chaining_call(&self, module: &Module, ctor: MethodId) -> Result<Option<usize>> {
        let owner = module.type_def(module.method(ctor)?.declaring)?;
        let own = owner.fullname();
        let base = owner.base.as_ref().and_then(TypeSig::type_name).unwrap_or(OBJECT_TYPE);

        Ok(self.instructions.iter().enumerate().position(|(index, instruction)| {
            let Some(method) = instruction.resolved.as_ref().and_then(Resolved::as_method) else {
                return false;
            };
            if instruction.mnemonic != "call" || method.name != ".ctor" {
                return false;
            }
            let parent = method.parent.type_name();
            if parent != Some(own.as_str()) && parent != Some(base) {
                return false;
            }
            events::producer(self, index, method.signature.params.len()).is_some_and(|producer| {
                let receiver = &self.instructions[producer];
                receiver.mnemonic.starts_with("ldarg")
                    && !receiver.mnemonic.starts_with("ldarga")
                    && receiver.argument_index() == Some(0)
            })
        }))
    }

    /// Offset where instruction `index` starts, the code size past the last one
    pub(crate) fn offset_of(&self, index: usize) -> u64 {
        self.instructions
            .get(index)
            .map_or(self.code_size, |instruction| instruction.offset)
    }

    /// Index of the instruction at `offset`
    pub(crate) fn index_of(&self, offset: u64) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }
}

fn label(offset: u64) -> String {
    format!("IL_{offset:04X}")
}

/// Emits (parts of) a decoded body into new assemblers
pub(crate) struct BodyCloner<'b> {
    body: &'b DecodedBody,
    targets: HashSet<u64>,
    catch_starts: HashSet<u64>,
    raise_sites: HashMap<usize, FieldId>,
}

impl<'b> BodyCloner<'b> {
    pub(crate) fn new(body: &'b DecodedBody, raise_sites: HashMap<usize, FieldId>) -> Self {
        let mut targets: HashSet<u64> = body
            .instructions
            .iter()
            .flat_map(|instruction| instruction.branch_targets.iter().copied())
            .collect();
        let mut catch_starts = HashSet::new();
        for handler in &body.handlers {
            targets.extend([
                u64::from(handler.try_offset),
                u64::from(handler.try_end()),
                u64::from(handler.handler_offset),
                u64::from(handler.handler_end()),
            ]);
            if handler.is_catch() {
                catch_starts.insert(u64::from(handler.handler_offset));
            }
        }

        BodyCloner {
            body,
            targets,
            catch_starts,
            raise_sites,
        }
    }

    /// True if re-emitting changes any instruction
    pub(crate) fn redirects_anything(&self, redirects: &Redirects) -> bool {
        !self.raise_sites.is_empty()
            || self.body.instructions.iter().any(|instruction| {
                field_of(instruction).is_some_and(|field| {
                    redirects.reads.contains_key(&field) || redirects.writes.contains_key(&field)
                })
            })
    }

    /// Emit the instructions in `range`
    pub(crate) fn emit(
        &self,
        asm: &mut InstructionAssembler,
        module: &mut Module,
        redirects: &Redirects,
        range: Range<usize>,
        has_this: bool,
    ) -> Result<()> {
        let runs_to_end = range.end >= self.body.instructions.len();
        for index in range {
            let instruction = &self.body.instructions[index];
            self.place_label(asm, instruction.offset)?;
            self.emit_one(asm, module, redirects, index, has_this)?;
        }
        if runs_to_end {
            self.place_label(asm, self.body.code_size)?;
        }
        Ok(())
    }

    /// Copy the exception clauses that lie inside `range`
    pub(crate) fn emit_handlers(
        &self,
        asm: &mut InstructionAssembler,
        range: Range<usize>,
    ) -> Result<()> {
        let start = self.body.offset_of(range.start);
        let end = self.body.offset_of(range.end);

        for handler in &self.body.handlers {
            let first = u64::from(handler.try_offset.min(handler.handler_offset));
            let last = u64::from(handler.try_end().max(handler.handler_end()));
            if last <= start || first >= end {
                continue;
            }
            if first < start || last > end {
                return Err(Error::Unsupported(format!(
                    "exception clause at IL_{first:04X} spans the constructor chaining call"
                )));
            }
            if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
                return Err(Error::Unsupported(format!("filter clause at IL_{first:04X}")));
            }

            let bounds = [
                label(u64::from(handler.try_offset)),
                label(u64::from(handler.try_end())),
                label(u64::from(handler.handler_offset)),
                label(u64::from(handler.handler_end())),
            ];
            let class = handler.catch_type().unwrap_or_else(|| Token::new(0));
            asm.add_clause(
                handler.flags,
                [&bounds[0], &bounds[1], &bounds[2], &bounds[3]],
                class,
            );
        }
        Ok(())
    }

    fn place_label(&self, asm: &mut InstructionAssembler, offset: u64) -> Result<()> {
        if !self.targets.contains(&offset) {
            return Ok(());
        }
        if self.catch_starts.contains(&offset) {
            asm.mark_catch(&label(offset))?;
        } else {
            asm.mark(&label(offset))?;
        }
        Ok(())
    }

    fn emit_one(
        &self,
        asm: &mut InstructionAssembler,
        module: &mut Module,
        redirects: &Redirects,
        index: usize,
        has_this: bool,
    ) -> Result<()> {
        let instruction = &self.body.instructions[index];

        if instruction.flow_type == FlowType::Switch {
            let labels: Vec<String> =
                instruction.branch_targets.iter().map(|t| label(*t)).collect();
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            asm.switch(&labels)?;
            return Ok(());
        }
        if instruction.is_branch() || instruction.flow_type == FlowType::Leave {
            let target = instruction
                .get_branch_target()
                .ok_or_else(|| {
                    decode_error!("Branch without target at IL_{:04X}", instruction.offset)
                })?;
            asm.branch(long_form(instruction.mnemonic), &label(target))?;
            return Ok(());
        }

        if let Some(field) = field_of(instruction) {
            let redirect = match instruction.mnemonic {
                "ldfld" | "ldsfld" => redirects.reads.get(&field),
                "stfld" | "stsfld" => redirects.writes.get(&field),
                "ldflda" | "ldsflda" if redirects.reads.contains_key(&field) => {
                    return Err(Error::Unsupported(format!(
                        "address of an intercepted field taken at IL_{:04X}",
                        instruction.offset
                    )));
                }
                _ => None,
            };
            if let Some(redirect) = redirect {
                asm.call(redirect.token, &redirect.signature)?;
                return Ok(());
            }
        }

        if let Some(raise) = self
            .raise_sites
            .get(&index)
            .and_then(|backing| redirects.raises.get(backing))
        {
            emit::load_instance(asm, has_this)?;
            asm.call(raise.token, &raise.signature)?;
            return Ok(());
        }

        asm.emit_decoded(instruction)?;
        Ok(())
    }
}

/// Field defined in the module that an instruction accesses
pub(crate) fn field_of(instruction: &Instruction) -> Option<FieldId> {
    instruction
        .resolved
        .as_ref()
        .and_then(Resolved::as_field)
        .and_then(|field| field.def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionDecoder,
        metadata::{
            builders::{ClassBuilder, MethodBuilder},
            member::{FieldDef, FieldFlags, Visibility},
        },
    };

    fn counter_module() -> Result<(Module, MethodId, FieldId)> {
        let mut module = Module::new("Test");
        let counter = ClassBuilder::new("Demo", "Counter").build(&mut module)?;
        let count = module.add_field(FieldDef {
            name: "count".to_string(),
            declaring: counter,
            field_type: TypeSig::I4,
            visibility: Visibility::Private,
            flags: FieldFlags::empty(),
            markers: Vec::new(),
        })?;
        let token = module.field_access_token(count)?;
        let exception = module.intern_type(&TypeSig::Object);

        let method = MethodBuilder::new("Bump")
            .returns(TypeSig::I4)
            .implementation(move |asm, _| {
                let result = asm.declare_local(TypeSig::I4);
                let (try_start, handler, done, skip) =
                    (asm.label(), asm.label(), asm.label(), asm.label());
                asm.mark(&try_start)?;
                asm.ldarg(0)?.ldfld(token)?.brtrue(&skip)?;
                asm.ldarg(0)?.ldc_i4(1)?.stfld(token)?;
                asm.mark(&skip)?.leave(&done)?;
                asm.mark_catch(&handler)?.pop()?.leave(&done)?;
                asm.mark(&done)?.ldarg(0)?.ldfld(token)?.stloc(result)?.ldloc(result)?.ret()?;
                asm.add_catch(&try_start, &handler, &handler, &done, exception);
                Ok(())
            })
            .build(&mut module, counter)?;
        Ok((module, method, count))
    }

    #[test]
    fn clone_preserves_control_flow() -> Result<()> {
        let (mut module, method, _) = counter_module()?;
        let body = DecodedBody::decode(&module, method)?;
        let cloner = BodyCloner::new(&body, HashMap::new());
        assert!(!cloner.redirects_anything(&Redirects::default()));

        let mut asm = InstructionAssembler::with_locals(body.locals.clone());
        let all = 0..body.instructions.len();
        cloner.emit(&mut asm, &mut module, &Redirects::default(), all.clone(), true)?;
        cloner.emit_handlers(&mut asm, all)?;
        let copy = asm.finish()?;

        let original = module.method(method)?.body.clone().ok_or_else(|| decode_error!("no body"))?;
        assert_eq!(copy.code, original.code);
        assert_eq!(copy.exception_handlers, original.exception_handlers);
        Ok(())
    }

    #[test]
    fn field_accesses_are_redirected() -> Result<()> {
        let (mut module, method, count) = counter_module()?;
        let counter = module.method(method)?.declaring;
        let read = MethodBuilder::new("ReadCount")
            .param("instance", TypeSig::class("Demo.Counter"))
            .returns(TypeSig::I4)
            .static_method()
            .implementation(|asm, _| {
                asm.ldc_i4(0)?.ret()?;
                Ok(())
            })
            .build(&mut module, counter)?;
        let write = MethodBuilder::new("WriteCount")
            .param("instance", TypeSig::class("Demo.Counter"))
            .param("value", TypeSig::I4)
            .static_method()
            .implementation(|asm, _| {
                asm.ret()?;
                Ok(())
            })
            .build(&mut module, counter)?;

        let mut redirects = Redirects::default();
        for (id, map) in [(read, &mut redirects.reads), (write, &mut redirects.writes)] {
            let signature = module.method(id)?.signature.clone();
            map.insert(
                count,
                Redirect {
                    token: module.method_call_token(id)?,
                    signature,
                },
            );
        }

        let body = DecodedBody::decode(&module, method)?;
        let cloner = BodyCloner::new(&body, HashMap::new());
        assert!(cloner.redirects_anything(&redirects));
        let mut asm = InstructionAssembler::with_locals(body.locals.clone());
        let all = 0..body.instructions.len();
        cloner.emit(&mut asm, &mut module, &redirects, all.clone(), true)?;
        cloner.emit_handlers(&mut asm, all)?;
        let copy = asm.finish()?;

        let instructions =
            InstructionDecoder::new(&module, &copy.code, GenericContext::default()).decode_all()?;
        let calls = instructions.iter().filter(|i| i.mnemonic == "call").count();
        assert_eq!(calls, 3);
        assert!(!instructions.iter().any(|i| matches!(i.mnemonic, "ldfld" | "stfld")));
        assert_eq!(copy.exception_handlers.len(), 1);
        Ok(())
    }

    #[test]
    fn chaining_call_and_offsets() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let ctor = crate::metadata::builders::default_constructor(&mut module, service)?;
        let body = DecodedBody::decode(&module, ctor)?;
        assert_eq!(body.chaining_call(&module, ctor)?, Some(1));
        assert_eq!(body.index_of(body.offset_of(2)), Some(2));
        assert_eq!(body.index_of(body.offset_of(3)), None);
        Ok(())
    }

    #[test]
    fn value_type_constructor_calls_do_not_chain() -> Result<()> {
        let mut module = Module::new("Test");
        let point = ClassBuilder::new("Demo", "Point").build(&mut module)?;
        let point_ctor = crate::metadata::builders::default_constructor(&mut module, point)?;
        let point_ctor = module.method_call_token(point_ctor)?;
        let object_ctor = crate::runtime::intrinsics::Intrinsic::ObjectCtor.token(&mut module);
        let chain = MethodSig::new_instance(Vec::new(), TypeSig::Void);

        let shape = ClassBuilder::new("Demo", "Shape").build(&mut module)?;
        let ctor = MethodBuilder::constructor()
            .implementation(move |asm, _| {
                let origin = asm.declare_local(TypeSig::value_type("Demo.Point"));
                asm.ldloca(origin)?.call(point_ctor, &chain)?;
                asm.ldarg(0)?.call(object_ctor, &chain)?.ret()?;
                Ok(())
            })
            .build(&mut module, shape)?;

        let body = DecodedBody::decode(&module, ctor)?;
        assert_eq!(body.chaining_call(&module, ctor)?, Some(3));
        Ok(())
    }
}
