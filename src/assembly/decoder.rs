//! CIL instruction decoding with operand resolution.
//!
//! [`decode_instruction`] turns the bytes at a parser position into one [`Instruction`].
//! [`InstructionDecoder`] walks a whole method body lazily, resolving every token operand
//! against the owning [`Module`] and substituting generic parameters from a
//! [`GenericContext`]. The decoder is restartable: [`InstructionDecoder::restart`] rewinds to
//! the first instruction without re-reading the body.
//!
//! Method bodies come from two places, unified by [`BodySource`]: the on-disk header-encoded
//! form ([`RawBody`]) and a body already loaded into the model ([`MethodBody`]). Both feed
//! the same decoder.
//!
//! Any operand that cannot be resolved is reported as [`crate::Error::Decode`]; callers
//! treat that as "member not rewritable" rather than aborting.
//!
//! # Example
//!
//! ```rust
//! use dotweave::{assembly::{GenericContext, InstructionDecoder}, metadata::module::Module};
//!
//! let module = Module::new("Demo");
//! let code = [0x02, 0x03, 0x58, 0x2A]; // ldarg.0 ldarg.1 add ret
//! let decoded = InstructionDecoder::new(&module, &code, GenericContext::default()).decode_all()?;
//! assert_eq!(decoded.len(), 4);
//! assert_eq!(decoded[2].mnemonic, "add");
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::{collections::HashSet, fmt};

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior},
        instructions::lookup_opcode,
    },
    file::parser::Parser,
    metadata::{
        member::{FieldId, MethodId},
        method::{ExceptionHandler, MethodBody, MethodHeader},
        module::{MemberRefSig, Module},
        signature::{MethodSig, TypeSig},
        token::{
            Token, TABLE_FIELD, TABLE_MEMBERREF, TABLE_METHODDEF, TABLE_METHODSPEC,
            TABLE_STRING, TABLE_TYPEDEF, TABLE_TYPESPEC,
        },
    },
    Result,
};

/// Generic arguments in effect while decoding a body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericContext {
    /// Arguments for the declaring type's parameters (`!n`)
    pub type_args: Vec<TypeSig>,
    /// Arguments for the method's own parameters (`!!n`)
    pub method_args: Vec<TypeSig>,
}

impl GenericContext {
    /// Context for an instantiation
    #[must_use]
    pub fn new(type_args: Vec<TypeSig>, method_args: Vec<TypeSig>) -> Self {
        GenericContext {
            type_args,
            method_args,
        }
    }

    fn apply(&self, sig: &TypeSig) -> TypeSig {
        sig.substitute(&self.type_args, &self.method_args)
    }
}

/// A method named by a token operand
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMethod {
    /// Operand token
    pub token: Token,
    /// Definition in the module, if the method is declared there
    pub def: Option<MethodId>,
    /// Declaring type, instantiated
    pub parent: TypeSig,
    /// Method name
    pub name: String,
    /// Signature with generic parameters substituted
    pub signature: MethodSig,
    /// Method generic arguments of a `MethodSpec`
    pub method_args: Vec<TypeSig>,
}

/// A field named by a token operand
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Operand token
    pub token: Token,
    /// Definition in the module, if the field is declared there
    pub def: Option<FieldId>,
    /// Declaring type, instantiated
    pub parent: TypeSig,
    /// Field name
    pub name: String,
    /// Field type with generic parameters substituted
    pub field_type: TypeSig,
}

/// Symbolic meaning of a token operand
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// `call`, `callvirt`, `newobj`, `ldftn`, ...
    Method(ResolvedMethod),
    /// `ldfld`, `stsfld`, ...
    Field(ResolvedField),
    /// `box`, `newarr`, `castclass`, ...
    Type(TypeSig),
    /// `ldstr`
    String(String),
}

impl Resolved {
    /// The method, if this names one
    #[must_use]
    pub fn as_method(&self) -> Option<&ResolvedMethod> {
        match self {
            Resolved::Method(method) => Some(method),
            _ => None,
        }
    }

    /// The field, if this names one
    #[must_use]
    pub fn as_field(&self) -> Option<&ResolvedField> {
        match self {
            Resolved::Field(field) => Some(field),
            _ => None,
        }
    }

    /// The type, if this names one
    #[must_use]
    pub fn as_type(&self) -> Option<&TypeSig> {
        match self {
            Resolved::Type(sig) => Some(sig),
            _ => None,
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Method(m) => write!(
                f,
                "{} {}::{}({})",
                m.signature.ret,
                m.parent,
                m.name,
                m.signature.param_list()
            ),
            Resolved::Field(field) => {
                write!(f, "{} {}::{}", field.field_type, field.parent, field.name)
            }
            Resolved::Type(sig) => write!(f, "{sig}"),
            Resolved::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Where the bytes and frame layout of a method body come from.
pub trait BodySource {
    /// Raw instruction stream
    fn code(&self) -> &[u8];
    /// Local variable types
    fn locals(&self) -> &[TypeSig];
    /// Exception handling clauses, offsets relative to the code
    fn exception_handlers(&self) -> &[ExceptionHandler];
    /// Declared maximum evaluation stack depth
    fn max_stack(&self) -> u16;
    /// True if locals are zero-initialized
    fn init_locals(&self) -> bool;
}

impl BodySource for MethodBody {
    fn code(&self) -> &[u8] {
        &self.code
    }

    fn locals(&self) -> &[TypeSig] {
        &self.locals
    }

    fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.exception_handlers
    }

    fn max_stack(&self) -> u16 {
        self.max_stack
    }

    fn init_locals(&self) -> bool {
        self.init_locals
    }
}

/// A method body in its on-disk form: header, code and exception sections.
#[derive(Debug, Clone)]
pub struct RawBody {
    header: MethodHeader,
    code: Vec<u8>,
    locals: Vec<TypeSig>,
}

impl RawBody {
    /// Parse a header-encoded body, resolving its local signature token against `module`.
    ///
    /// # Errors
    /// Returns an error if the header is malformed or the local signature token is unknown.
    pub fn parse(data: &[u8], module: &Module) -> Result<Self> {
        let header = MethodHeader::from(data)?;
        let end = header.size_header + header.size_code;
        let Some(code) = data.get(header.size_header..end) else {
            return Err(out_of_bounds_error!());
        };

        let locals = if header.local_var_sig_token == 0 {
            Vec::new()
        } else {
            let token = Token::new(header.local_var_sig_token);
            module
                .local_sig(token)
                .map(<[TypeSig]>::to_vec)
                .ok_or_else(|| decode_error!("Unknown local signature {}", token))?
        };

        Ok(RawBody {
            code: code.to_vec(),
            header,
            locals,
        })
    }
}

impl BodySource for RawBody {
    fn code(&self) -> &[u8] {
        &self.code
    }

    fn locals(&self) -> &[TypeSig] {
        &self.locals
    }

    fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.header.exception_handlers
    }

    fn max_stack(&self) -> u16 {
        u16::try_from(self.header.max_stack).unwrap_or(u16::MAX)
    }

    fn init_locals(&self) -> bool {
        self.header.is_init_local
    }
}

/// Decode the instruction at the parser's position, without token resolution.
///
/// Branch operands are converted to absolute targets relative to the start of the parser's
/// data.
///
/// # Errors
/// Returns [`crate::Error::Decode`] for unknown opcodes and [`crate::Error::OutOfBounds`] for
/// truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos() as u64;
    let first_byte = parser.read_le::<u8>()?;

    let (prefix, opcode) = match first_byte {
        0xFE => (0xFE, parser.read_le::<u8>()?),
        _ => (0, first_byte),
    };
    let Some(cil_instruction) = lookup_opcode(prefix, opcode) else {
        return Err(decode_error!(
            "Invalid opcode {:02X}{:02X} at IL_{:04X}",
            prefix,
            opcode,
            offset
        ));
    };

    let is_argument = cil_instruction.instr.contains("arg");
    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => {
            let index = u16::from(parser.read_le::<u8>()?);
            if is_argument {
                Operand::Argument(index)
            } else {
                Operand::Local(index)
            }
        }
        OperandType::Int16 => Operand::Immediate(Immediate::Int16(parser.read_le::<i16>()?)),
        OperandType::UInt16 => {
            let index = parser.read_le::<u16>()?;
            if is_argument {
                Operand::Argument(index)
            } else {
                Operand::Local(index)
            }
        }
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::UInt32 => Operand::Immediate(Immediate::UInt32(parser.read_le::<u32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::UInt64 => Operand::Immediate(Immediate::UInt64(parser.read_le::<u64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }
            Operand::Switch(targets)
        }
    };
    let size = parser.pos() as u64 - offset;
    let next = offset + size;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: cil_instruction.instr,
        category: cil_instruction.category,
        flow_type: cil_instruction.flow,
        operand,
        resolved: None,
        stack_behavior: StackBehavior {
            pops: cil_instruction.stack_pops,
            pushes: cil_instruction.stack_pushes,
            #[allow(clippy::cast_possible_wrap)]
            net_effect: cil_instruction.stack_pushes as i8 - cil_instruction.stack_pops as i8,
        },
        branch_targets: Vec::new(),
    };

    match instruction.flow_type {
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave => {
            if let Some(relative) = instruction.get_i32_operand() {
                let target = branch_target(next, relative, offset)?;
                instruction.branch_targets.push(target);
                instruction.operand = Operand::Target(target);
            }
        }
        FlowType::Switch => {
            if let Operand::Switch(relatives) = &instruction.operand {
                for &relative in relatives {
                    let target = branch_target(next, relative, offset)?;
                    instruction.branch_targets.push(target);
                }
            }
        }
        _ => {}
    }

    Ok(instruction)
}

fn branch_target(next: u64, relative: i32, offset: u64) -> Result<u64> {
    let target = i64::try_from(next).unwrap_or(i64::MAX) + i64::from(relative);
    u64::try_from(target).map_err(|_| {
        decode_error!(
            "Branch at IL_{:04X} targets negative offset {}",
            offset,
            target
        )
    })
}

/// Resolve a token operand against `module`.
///
/// # Errors
/// Returns [`crate::Error::Decode`] if the token names nothing in the module.
pub fn resolve_token(module: &Module, token: Token, context: &GenericContext) -> Result<Resolved> {
    match token.table() {
        TABLE_METHODDEF => {
            let id = token
                .index()
                .map(MethodId)
                .ok_or_else(|| decode_error!("Null method token"))?;
            let method = module
                .method(id)
                .map_err(|_| decode_error!("Unknown method {}", token))?;
            let owner = module
                .type_def(method.declaring)
                .map_err(|_| decode_error!("Method {} has no declaring type", token))?;
            Ok(Resolved::Method(ResolvedMethod {
                token,
                def: Some(id),
                parent: owner.self_sig(),
                name: method.name.clone(),
                signature: method.signature.clone(),
                method_args: Vec::new(),
            }))
        }
        TABLE_FIELD => {
            let id = token
                .index()
                .map(FieldId)
                .ok_or_else(|| decode_error!("Null field token"))?;
            let field = module
                .field(id)
                .map_err(|_| decode_error!("Unknown field {}", token))?;
            let owner = module
                .type_def(field.declaring)
                .map_err(|_| decode_error!("Field {} has no declaring type", token))?;
            Ok(Resolved::Field(ResolvedField {
                token,
                def: Some(id),
                parent: owner.self_sig(),
                name: field.name.clone(),
                field_type: field.field_type.clone(),
            }))
        }
        TABLE_MEMBERREF => {
            let reference = module
                .member_ref(token)
                .ok_or_else(|| decode_error!("Unknown member reference {}", token))?;
            let parent = context.apply(&reference.parent);
            let instantiation = match &parent {
                TypeSig::GenericInst(_, args) => args.clone(),
                _ => Vec::new(),
            };
            let owner = module.type_of_sig(&parent);

            match &reference.signature {
                MemberRefSig::Method(sig) => Ok(Resolved::Method(ResolvedMethod {
                    token,
                    def: owner
                        .and_then(|owner| module.find_method_by_sig(owner, &reference.name, sig)),
                    signature: sig.substitute(&instantiation, &[]),
                    parent,
                    name: reference.name.clone(),
                    method_args: Vec::new(),
                })),
                MemberRefSig::Field(field_type) => Ok(Resolved::Field(ResolvedField {
                    token,
                    def: owner.and_then(|owner| module.find_field(owner, &reference.name)),
                    field_type: field_type.substitute(&instantiation, &[]),
                    parent,
                    name: reference.name.clone(),
                })),
            }
        }
        TABLE_METHODSPEC => {
            let spec = module
                .method_spec(token)
                .ok_or_else(|| decode_error!("Unknown method instantiation {}", token))?;
            let Resolved::Method(mut method) = resolve_token(module, spec.method, context)? else {
                return Err(decode_error!("Method instantiation {} does not name a method", token));
            };
            let method_args: Vec<TypeSig> =
                spec.args.iter().map(|arg| context.apply(arg)).collect();
            method.signature = method.signature.substitute(&[], &method_args);
            method.method_args = method_args;
            method.token = token;
            Ok(Resolved::Method(method))
        }
        TABLE_TYPEDEF | TABLE_TYPESPEC => module
            .resolve_type(token)
            .map(|sig| Resolved::Type(context.apply(&sig)))
            .map_err(|_| decode_error!("Unknown type {}", token)),
        TABLE_STRING => module
            .user_string(token)
            .map(|s| Resolved::String(s.to_string()))
            .ok_or_else(|| decode_error!("Unknown string {}", token)),
        table => Err(decode_error!("Unsupported operand table {:02X} in {}", table, token)),
    }
}

/// Lazy, restartable decoder over one method body.
pub struct InstructionDecoder<'a> {
    module: &'a Module,
    code: &'a [u8],
    parser: Parser<'a>,
    context: GenericContext,
    failed: bool,
}

impl<'a> InstructionDecoder<'a> {
    /// Decoder over raw code bytes
    #[must_use]
    pub fn new(module: &'a Module, code: &'a [u8], context: GenericContext) -> Self {
        InstructionDecoder {
            module,
            code,
            parser: Parser::new(code),
            context,
            failed: false,
        }
    }

    /// Decoder over any [`BodySource`]
    pub fn for_body(module: &'a Module, body: &'a dyn BodySource, context: GenericContext) -> Self {
        InstructionDecoder::new(module, body.code(), context)
    }

    /// Rewind to the first instruction
    pub fn restart(&mut self) {
        self.parser = Parser::new(self.code);
        self.failed = false;
    }

    /// Decode every instruction and check that branch targets land on instruction
    /// boundaries.
    ///
    /// # Errors
    /// Returns the first decode error, or [`crate::Error::Decode`] for a branch into the
    /// middle of an instruction.
    pub fn decode_all(mut self) -> Result<Vec<Instruction>> {
        let instructions = self.by_ref().collect::<Result<Vec<_>>>()?;

        let mut boundaries: HashSet<u64> = instructions.iter().map(|i| i.offset).collect();
        boundaries.insert(self.code.len() as u64);
        for instruction in &instructions {
            for target in &instruction.branch_targets {
                if !boundaries.contains(target) {
                    return Err(decode_error!(
                        "Branch at IL_{:04X} targets IL_{:04X}, which is not an instruction",
                        instruction.offset,
                        target
                    ));
                }
            }
        }
        Ok(instructions)
    }

    fn next_instruction(&mut self) -> Result<Instruction> {
        let mut instruction = decode_instruction(&mut self.parser)?;
        if let Some(token) = instruction.get_token_operand() {
            instruction.resolved = Some(resolve_token(self.module, token, &self.context)?);
        }
        Ok(instruction)
    }
}

impl Iterator for InstructionDecoder<'_> {
    type Item = Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.parser.has_more_data() {
            return None;
        }
        let result = self.next_instruction();
        self.failed = result.is_err();
        Some(result)
    }
}

/// Decode the body of a method defined in `module`.
///
/// # Errors
/// Returns [`crate::Error::Decode`] if the method has no body or the body does not decode.
pub fn decode_method(
    module: &Module,
    method: MethodId,
    context: GenericContext,
) -> Result<Vec<Instruction>> {
    let def = module.method(method)?;
    let body = def
        .body
        .as_ref()
        .ok_or_else(|| decode_error!("Method {} has no body", def.name))?;
    InstructionDecoder::for_body(module, body, context).decode_all()
}
