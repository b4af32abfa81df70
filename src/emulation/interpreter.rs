//! Core CIL instruction interpreter.
//!
//! [`Runtime::execute`] runs one method body to completion on a fresh evaluation stack.
//! Calls recurse into `execute` with a new [`Frame`]; managed pointers address frames by
//! call depth, so a frame stays addressable for as long as its callee runs.
//!
//! Exception handling is single-pass: a thrown object walks the clauses protecting the
//! throw site innermost first, running finally and fault handlers on its way to the first
//! matching catch. `leave` runs the finally handlers it exits before reaching its target.

use std::{cmp::Ordering, collections::HashMap};

use crate::{
    assembly::{decode_method, GenericContext, Instruction, Resolved, ResolvedField, ResolvedMethod},
    emulation::{
        heap::{HeapObject, ManagedHeap},
        Runtime,
    },
    metadata::{
        member::{MethodId, TypeId},
        method::ExceptionHandler,
        signature::{TypeSig, EXCEPTION_TYPE, MULTICAST_DELEGATE_TYPE},
    },
    runtime::{
        intrinsics::{DELEGATE_TYPE, INVALID_CAST_TYPE, NULL_REFERENCE_TYPE},
        ObjectRef, Pointer, Value,
    },
    Error, Result,
};

const DIVIDE_BY_ZERO_TYPE: &str = "System.DivideByZeroException";
const INDEX_OUT_OF_RANGE_TYPE: &str = "System.IndexOutOfRangeException";
pub(super) const NULL_REFERENCE_MESSAGE: &str =
    "Object reference not set to an instance of an object.";

/// Arguments and locals of one active call.
#[derive(Debug, Default)]
pub(super) struct Frame {
    pub(super) args: Vec<Value>,
    pub(super) locals: Vec<Value>,
}

/// Call stack and instruction budget of one top-level invocation.
#[derive(Debug, Default)]
pub(super) struct ExecState {
    pub(super) frames: Vec<Frame>,
    pub(super) executed: u64,
}

impl ExecState {
    fn frame(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::Emulation("No active frame".to_string()))
    }

    fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }
}

/// A method body decoded once and shared by every invocation.
#[derive(Debug)]
pub(super) struct DecodedBody {
    instructions: Vec<Instruction>,
    index: HashMap<u64, usize>,
    handlers: Vec<ExceptionHandler>,
    pub(super) locals: Vec<TypeSig>,
}

impl DecodedBody {
    pub(super) fn decode(runtime: &Runtime, method: MethodId) -> Result<Self> {
        let def = runtime.module.method(method)?;
        let body = def
            .body
            .as_ref()
            .ok_or_else(|| Error::Emulation(format!("Method {} has no body", def.name)))?;
        let instructions = decode_method(&runtime.module, method, GenericContext::default())?;
        let index = instructions
            .iter()
            .enumerate()
            .map(|(position, instruction)| (instruction.offset, position))
            .collect();

        let mut handlers = body.exception_handlers.clone();
        handlers.sort_by_key(|handler| handler.try_length);

        Ok(DecodedBody {
            instructions,
            index,
            handlers,
            locals: body.locals.clone(),
        })
    }

    fn position(&self, offset: u64) -> Result<usize> {
        self.index
            .get(&offset)
            .copied()
            .ok_or_else(|| Error::Emulation(format!("No instruction at IL_{offset:04X}")))
    }

    fn handler_start(&self, clause: usize) -> Result<usize> {
        self.position(u64::from(self.handlers[clause].handler_offset))
    }
}

/// Outcome of a single instruction.
#[derive(Debug)]
pub(super) enum StepResult {
    Continue,
    Branch(u64),
    Return(Value),
    Leave(u64),
    EndFinally,
    Throw(ObjectRef),
    Rethrow,
}

/// A finally or fault handler in progress and what resumes after it.
#[derive(Debug)]
enum Pending {
    Leave {
        target: u64,
        remaining: Vec<usize>,
        clause: usize,
    },
    Unwind {
        exception: ObjectRef,
        offset: u64,
        next: usize,
        clause: usize,
    },
}

impl Pending {
    fn clause(&self) -> usize {
        match self {
            Pending::Leave { clause, .. } | Pending::Unwind { clause, .. } => *clause,
        }
    }
}

#[derive(Debug, Default)]
struct Regions {
    pending: Vec<Pending>,
    caught: HashMap<usize, ObjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

impl BinaryOp {
    fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Some(match mnemonic {
            "add" => BinaryOp::Add,
            "sub" => BinaryOp::Sub,
            "mul" => BinaryOp::Mul,
            "div" => BinaryOp::Div,
            "div.un" => BinaryOp::DivUn,
            "rem" => BinaryOp::Rem,
            "rem.un" => BinaryOp::RemUn,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "xor" => BinaryOp::Xor,
            "shl" => BinaryOp::Shl,
            "shr" => BinaryOp::Shr,
            "shr.un" => BinaryOp::ShrUn,
            _ => return None,
        })
    }

    fn is_division(self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::DivUn | BinaryOp::Rem | BinaryOp::RemUn)
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn int32(op: BinaryOp, a: i32, b: i32) -> i32 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::DivUn => ((a as u32) / (b as u32)) as i32,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::RemUn => ((a as u32) % (b as u32)) as i32,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::ShrUn => (a as u32).wrapping_shr(b as u32) as i32,
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn int64(op: BinaryOp, a: i64, b: i64) -> i64 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::DivUn => ((a as u64) / (b as u64)) as i64,
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::RemUn => ((a as u64) % (b as u64)) as i64,
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::Shr => a.wrapping_shr(b as u32),
        BinaryOp::ShrUn => (a as u64).wrapping_shr(b as u32) as i64,
    }
}

fn float(op: BinaryOp, a: f64, b: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(a + b),
        BinaryOp::Sub => Some(a - b),
        BinaryOp::Mul => Some(a * b),
        BinaryOp::Div | BinaryOp::DivUn => Some(a / b),
        BinaryOp::Rem | BinaryOp::RemUn => Some(a % b),
        _ => None,
    }
}

/// Apply an arithmetic or bitwise operation; `None` for operand kinds it does not accept
pub(super) fn binary(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    match (left, right) {
        (Value::I4(a), Value::I4(b)) => Some(Value::I4(int32(op, *a, *b))),
        (Value::R8(_), _) | (_, Value::R8(_)) => {
            float(op, left.as_f64()?, right.as_f64()?).map(Value::R8)
        }
        _ => Some(Value::I8(int64(op, left.as_i64()?, right.as_i64()?))),
    }
}

fn is_zero(value: &Value) -> bool {
    matches!(value, Value::I4(0) | Value::I8(0))
}

/// Numeric view used by comparisons: null is 0, any other reference is 1
fn ordinal(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::I4(0)),
        Value::I4(_) | Value::I8(_) | Value::R8(_) => Some(value.clone()),
        Value::Ref(_) | Value::Str(_) | Value::Method(_) | Value::Ptr(_) => Some(Value::I4(1)),
    }
}

/// Order two values, `None` if either is NaN
#[allow(clippy::cast_sign_loss)]
pub(super) fn compare(left: &Value, right: &Value, unsigned: bool) -> Option<Ordering> {
    let (left, right) = (ordinal(left)?, ordinal(right)?);
    match (&left, &right) {
        (Value::I4(a), Value::I4(b)) if unsigned => Some((*a as u32).cmp(&(*b as u32))),
        (Value::I4(a), Value::I4(b)) => Some(a.cmp(b)),
        (Value::R8(_), _) | (_, Value::R8(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        _ if unsigned => Some((left.as_i64()? as u64).cmp(&(right.as_i64()? as u64))),
        _ => Some(left.as_i64()?.cmp(&right.as_i64()?)),
    }
}

/// Equality as tested by `ceq` and `beq`. Null only equals null, boxed zeros included.
pub(super) fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Ref(a), Value::Ref(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Method(a), Value::Method(b)) => a == b,
        (Value::Ptr(a), Value::Ptr(b)) => a == b,
        (Value::Null, other) | (other, Value::Null) => other.is_null(),
        _ => compare(left, right, false) == Some(Ordering::Equal),
    }
}

/// Numeric conversion by `conv.*` mnemonic
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]
pub(super) fn convert(mnemonic: &str, value: &Value) -> Option<Value> {
    if let Value::R8(f) = value {
        let f = *f;
        return match mnemonic {
            "conv.r4" => Some(Value::R8(f64::from(f as f32))),
            "conv.r8" => Some(Value::R8(f)),
            "conv.u8" | "conv.u" => Some(Value::I8(f as u64 as i64)),
            _ => convert(mnemonic, &Value::I8(f as i64)),
        };
    }

    let v = value.as_i64()?;
    Some(match mnemonic {
        "conv.i1" => Value::I4(i32::from(v as i8)),
        "conv.u1" => Value::I4(i32::from(v as u8)),
        "conv.i2" => Value::I4(i32::from(v as i16)),
        "conv.u2" => Value::I4(i32::from(v as u16)),
        "conv.i4" => Value::I4(v as i32),
        "conv.u4" => Value::I4(v as u32 as i32),
        "conv.i8" | "conv.i" => Value::I8(v),
        "conv.u8" | "conv.u" => match value {
            Value::I4(narrow) => Value::I8(i64::from(*narrow as u32)),
            _ => Value::I8(v),
        },
        "conv.r4" => Value::R8(f64::from(v as f32)),
        "conv.r8" => Value::R8(v as f64),
        _ => return None,
    })
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack
        .pop()
        .ok_or_else(|| Error::Emulation("Evaluation stack underflow".to_string()))
}

pub(super) fn pop_n(stack: &mut Vec<Value>, count: usize) -> Result<Vec<Value>> {
    if stack.len() < count {
        return Err(Error::Emulation(format!(
            "Evaluation stack holds {} values, {count} needed",
            stack.len()
        )));
    }
    Ok(stack.split_off(stack.len() - count))
}

fn slot<'a>(values: &'a mut [Value], index: u16, what: &str) -> Result<&'a mut Value> {
    values
        .get_mut(usize::from(index))
        .ok_or_else(|| Error::Emulation(format!("No {what} slot {index}")))
}

fn invalid_operand(instruction: &Instruction, expected: &str) -> Error {
    Error::Emulation(format!(
        "{} at IL_{:04X} needs a {expected} operand",
        instruction.mnemonic, instruction.offset
    ))
}

pub(super) fn resolved_method(instruction: &Instruction) -> Result<&ResolvedMethod> {
    instruction
        .resolved
        .as_ref()
        .and_then(Resolved::as_method)
        .ok_or_else(|| invalid_operand(instruction, "method"))
}

fn resolved_field(instruction: &Instruction) -> Result<&ResolvedField> {
    instruction
        .resolved
        .as_ref()
        .and_then(Resolved::as_field)
        .ok_or_else(|| invalid_operand(instruction, "field"))
}

fn resolved_type(instruction: &Instruction) -> Result<&TypeSig> {
    instruction
        .resolved
        .as_ref()
        .and_then(Resolved::as_type)
        .ok_or_else(|| invalid_operand(instruction, "type"))
}

fn index_of(value: &Value) -> Result<usize> {
    value
        .as_i64()
        .and_then(|index| usize::try_from(index).ok())
        .ok_or_else(|| Error::Emulation(format!("{value} is not an array index")))
}

impl Runtime {
    /// Run `method` with `args` (including `this`) on the call stack of `state`.
    ///
    /// # Errors
    /// Returns [`Error::ManagedException`] for an exception no clause of the method catches,
    /// [`Error::RecursionLimit`] past the configured call depth and [`Error::Emulation`] for
    /// malformed code or an exhausted instruction budget.
    pub(super) fn execute(
        &self,
        state: &mut ExecState,
        method: MethodId,
        args: Vec<Value>,
    ) -> Result<Value> {
        if state.frames.len() >= self.limits.max_call_depth {
            return Err(Error::RecursionLimit(self.limits.max_call_depth));
        }

        let body = self.body(method)?;
        let locals = body.locals.iter().map(Value::default_for).collect();
        state.frames.push(Frame { args, locals });
        let result = self.run(state, &body);
        state.frames.pop();
        result
    }

    fn count(&self, state: &mut ExecState) -> Result<()> {
        state.executed += 1;
        let limit = self.limits.max_instructions;
        if limit > 0 && state.executed > limit {
            return Err(Error::Emulation(format!("Instruction limit of {limit} exceeded")));
        }
        Ok(())
    }

    fn run(&self, state: &mut ExecState, body: &DecodedBody) -> Result<Value> {
        let mut stack = Vec::with_capacity(8);
        let mut regions = Regions::default();
        let mut pc = 0;

        loop {
            let instruction = body.instructions.get(pc).ok_or_else(|| {
                Error::Emulation("Execution ran past the end of the body".to_string())
            })?;
            self.count(state)?;
            let offset = instruction.offset;

            let result = match self.step(state, instruction, &mut stack) {
                Err(Error::ManagedException { object, .. }) => StepResult::Throw(object),
                other => other?,
            };

            pc = match result {
                StepResult::Continue => pc + 1,
                StepResult::Branch(target) => body.position(target)?,
                StepResult::Return(value) => return Ok(value),
                StepResult::Leave(target) => {
                    stack.clear();
                    Self::leave(body, &mut regions, offset, target)?
                }
                StepResult::EndFinally => {
                    stack.clear();
                    match regions.pending.pop() {
                        Some(Pending::Leave { target, mut remaining, .. }) => {
                            if remaining.is_empty() {
                                body.position(target)?
                            } else {
                                let clause = remaining.remove(0);
                                regions.pending.push(Pending::Leave {
                                    target,
                                    remaining,
                                    clause,
                                });
                                body.handler_start(clause)?
                            }
                        }
                        Some(Pending::Unwind {
                            exception,
                            offset,
                            next,
                            ..
                        }) => self.unwind(body, &mut regions, &mut stack, exception, offset, next)?,
                        None => {
                            return Err(Error::Emulation(format!(
                                "endfinally at IL_{offset:04X} outside a finally handler"
                            )))
                        }
                    }
                }
                StepResult::Throw(exception) => {
                    self.unwind(body, &mut regions, &mut stack, exception, offset, 0)?
                }
                StepResult::Rethrow => {
                    let exception = body
                        .handlers
                        .iter()
                        .enumerate()
                        .filter(|(_, handler)| handler.is_catch() && handler.handles(offset as u32))
                        .find_map(|(clause, _)| regions.caught.get(&clause).copied())
                        .ok_or_else(|| {
                            Error::Emulation(format!(
                                "rethrow at IL_{offset:04X} outside a catch handler"
                            ))
                        })?;
                    self.unwind(body, &mut regions, &mut stack, exception, offset, 0)?
                }
            };
        }
    }

    fn leave(body: &DecodedBody, regions: &mut Regions, offset: u64, target: u64) -> Result<usize> {
        let (from, to) = (offset as u32, target as u32);
        let mut finallies: Vec<usize> = body
            .handlers
            .iter()
            .enumerate()
            .filter(|(_, handler)| {
                handler.is_finally() && handler.protects(from) && !handler.protects(to)
            })
            .map(|(clause, _)| clause)
            .collect();

        if finallies.is_empty() {
            return body.position(target);
        }
        let clause = finallies.remove(0);
        regions.pending.push(Pending::Leave {
            target,
            remaining: finallies,
            clause,
        });
        body.handler_start(clause)
    }

    /// Find the clause that handles `exception` thrown at `offset`, starting the search at
    /// clause `start`, and return the instruction to continue at.
    fn unwind(
        &self,
        body: &DecodedBody,
        regions: &mut Regions,
        stack: &mut Vec<Value>,
        exception: ObjectRef,
        offset: u64,
        start: usize,
    ) -> Result<usize> {
        let at = offset as u32;
        for (clause, handler) in body.handlers.iter().enumerate().skip(start) {
            if !handler.protects(at) {
                continue;
            }
            let runs = if handler.is_catch() {
                self.catches(handler, exception)?
            } else {
                handler.is_finally() || handler.is_fault()
            };
            if !runs {
                continue;
            }

            // Finally handlers the exception escapes from are abandoned.
            regions.pending.retain(|pending| {
                let running = &body.handlers[pending.clause()];
                !running.handles(at) || running.handles(handler.try_offset)
            });
            stack.clear();

            if handler.is_catch() {
                stack.push(Value::Ref(exception));
                regions.caught.insert(clause, exception);
            } else {
                regions.pending.push(Pending::Unwind {
                    exception,
                    offset,
                    next: clause + 1,
                    clause,
                });
            }
            return body.handler_start(clause);
        }
        Err(self.exception_error(exception))
    }

    fn catches(&self, handler: &ExceptionHandler, exception: ObjectRef) -> Result<bool> {
        let Some(token) = handler.catch_type() else {
            return Ok(false);
        };
        let caught = self.module.resolve_type(token)?;
        Ok(self.is_instance_of(&Value::Ref(exception), &caught))
    }

    /// Type test used by `castclass`, `isinst` and catch clauses. Null is an instance of
    /// every reference type.
    pub(super) fn is_instance_of(&self, value: &Value, sig: &TypeSig) -> bool {
        let target = match sig {
            TypeSig::Object => return true,
            TypeSig::SzArray(_) => "System.Array",
            other => match other.type_name() {
                Some(name) => name,
                None => {
                    return sig.is_value_type() && !matches!(value, Value::Ref(_) | Value::Str(_))
                }
            },
        };
        if target == "System.Object" {
            return true;
        }

        match value {
            Value::Null => !sig.is_value_type(),
            Value::Str(_) => target == "System.String",
            Value::I4(_) | Value::I8(_) | Value::R8(_) => {
                sig.is_value_type() || target == "System.ValueType" || target == "System.Enum"
            }
            Value::Ptr(_) | Value::Method(_) => false,
            Value::Ref(object) => with_heap!(self, |heap: &mut ManagedHeap| {
                match heap.get(*object) {
                    Ok(HeapObject::Instance { type_id, type_name, .. }) => {
                        type_name == target || self.module.derives_from(*type_id, target)
                    }
                    Ok(HeapObject::Exception { type_name, .. }) => {
                        type_name == target || target == EXCEPTION_TYPE
                    }
                    Ok(HeapObject::Delegate { type_name, .. }) => {
                        type_name == target
                            || target == DELEGATE_TYPE
                            || target == MULTICAST_DELEGATE_TYPE
                    }
                    Ok(HeapObject::Array { .. }) => target == "System.Array",
                    Ok(other) => other.type_name() == target,
                    Err(_) => false,
                }
            }),
        }
    }

    pub(super) fn load(&self, state: &mut ExecState, value: &Value) -> Result<Value> {
        let Value::Ptr(pointer) = value else {
            return Ok(value.clone());
        };
        match *pointer {
            Pointer::Local { frame, index } => state
                .frames
                .get_mut(frame)
                .ok_or_else(|| Error::Emulation(format!("Dangling pointer to frame {frame}")))
                .and_then(|frame| slot(&mut frame.locals, index, "local").map(|v| v.clone())),
            Pointer::Argument { frame, index } => state
                .frames
                .get_mut(frame)
                .ok_or_else(|| Error::Emulation(format!("Dangling pointer to frame {frame}")))
                .and_then(|frame| slot(&mut frame.args, index, "argument").map(|v| v.clone())),
            Pointer::Field { object, field } => self.instance_field(object, field),
            Pointer::Static(field) => Ok(self.static_value(field)),
            Pointer::Element { array, index } => self.element(array, index),
        }
    }

    fn store(&self, state: &mut ExecState, target: &Value, value: Value) -> Result<()> {
        let Value::Ptr(pointer) = target else {
            return Err(Error::Emulation(format!("Cannot store through {target}")));
        };
        match *pointer {
            Pointer::Local { frame, index } => {
                let frame = state
                    .frames
                    .get_mut(frame)
                    .ok_or_else(|| Error::Emulation(format!("Dangling pointer to frame {frame}")))?;
                *slot(&mut frame.locals, index, "local")? = value;
            }
            Pointer::Argument { frame, index } => {
                let frame = state
                    .frames
                    .get_mut(frame)
                    .ok_or_else(|| Error::Emulation(format!("Dangling pointer to frame {frame}")))?;
                *slot(&mut frame.args, index, "argument")? = value;
            }
            Pointer::Field { object, field } => self.set_instance_field(object, field, value)?,
            Pointer::Static(field) => {
                lock!(self.statics).insert(field, value);
            }
            Pointer::Element { array, index } => self.set_element(array, index, value)?,
        }
        Ok(())
    }

    fn receiver(&self, state: &mut ExecState, value: Value) -> Result<ObjectRef> {
        match self.load(state, &value)? {
            Value::Ref(object) => Ok(object),
            Value::Null => Err(self.raise(NULL_REFERENCE_TYPE, NULL_REFERENCE_MESSAGE)),
            other => Err(Error::Emulation(format!("{other} is not an object"))),
        }
    }

    fn element(&self, array: ObjectRef, index: usize) -> Result<Value> {
        let item = with_heap!(self, |heap: &mut ManagedHeap| {
            heap.array(array).map(|items| items.get(index).cloned())
        })?;
        item.ok_or_else(|| {
            self.raise(
                INDEX_OUT_OF_RANGE_TYPE,
                "Index was outside the bounds of the array.",
            )
        })
    }

    fn set_element(&self, array: ObjectRef, index: usize, value: Value) -> Result<()> {
        let stored = with_heap!(self, |heap: &mut ManagedHeap| {
            heap.array(array).map(|items| match items.get_mut(index) {
                Some(item) => {
                    *item = value;
                    true
                }
                None => false,
            })
        })?;
        if stored {
            Ok(())
        } else {
            Err(self.raise(INDEX_OUT_OF_RANGE_TYPE, "Index was outside the bounds of the array."))
        }
    }

    #[allow(clippy::too_many_lines)]
    fn step(
        &self,
        state: &mut ExecState,
        instruction: &Instruction,
        stack: &mut Vec<Value>,
    ) -> Result<StepResult> {
        let mnemonic = instruction.mnemonic;
        let op = mnemonic.strip_suffix(".s").unwrap_or(mnemonic);

        match op {
            "nop" | "break" | "constrained." => {}

            "ldarg" | "ldarg.0" | "ldarg.1" | "ldarg.2" | "ldarg.3" => {
                let index = instruction
                    .argument_index()
                    .ok_or_else(|| invalid_operand(instruction, "argument"))?;
                let value = slot(&mut state.frame()?.args, index, "argument")?.clone();
                stack.push(value);
            }
            "ldarga" => {
                let index = instruction
                    .argument_index()
                    .ok_or_else(|| invalid_operand(instruction, "argument"))?;
                stack.push(Value::Ptr(Pointer::Argument {
                    frame: state.depth(),
                    index,
                }));
            }
            "starg" => {
                let index = instruction
                    .argument_index()
                    .ok_or_else(|| invalid_operand(instruction, "argument"))?;
                let value = pop(stack)?;
                *slot(&mut state.frame()?.args, index, "argument")? = value;
            }
            "ldloc" | "ldloc.0" | "ldloc.1" | "ldloc.2" | "ldloc.3" => {
                let index = instruction
                    .local_index()
                    .ok_or_else(|| invalid_operand(instruction, "local"))?;
                let value = slot(&mut state.frame()?.locals, index, "local")?.clone();
                stack.push(value);
            }
            "ldloca" => {
                let index = instruction
                    .local_index()
                    .ok_or_else(|| invalid_operand(instruction, "local"))?;
                stack.push(Value::Ptr(Pointer::Local {
                    frame: state.depth(),
                    index,
                }));
            }
            "stloc" | "stloc.0" | "stloc.1" | "stloc.2" | "stloc.3" => {
                let index = instruction
                    .local_index()
                    .ok_or_else(|| invalid_operand(instruction, "local"))?;
                let value = pop(stack)?;
                *slot(&mut state.frame()?.locals, index, "local")? = value;
            }

            "ldnull" => stack.push(Value::Null),
            "ldc.i8" => stack.push(Value::I8(
                instruction
                    .get_i64_operand()
                    .ok_or_else(|| invalid_operand(instruction, "int64"))?,
            )),
            "ldc.r4" | "ldc.r8" => stack.push(Value::R8(
                instruction
                    .get_f64_operand()
                    .ok_or_else(|| invalid_operand(instruction, "float"))?,
            )),
            _ if op.starts_with("ldc.i4") => stack.push(Value::I4(
                instruction
                    .ldc_i4_value()
                    .ok_or_else(|| invalid_operand(instruction, "int32"))?,
            )),
            "ldstr" => match &instruction.resolved {
                Some(Resolved::String(value)) => stack.push(Value::from(value.as_str())),
                _ => return Err(invalid_operand(instruction, "string")),
            },

            "dup" => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| Error::Emulation("Evaluation stack underflow".to_string()))?;
                stack.push(top);
            }
            "pop" => {
                pop(stack)?;
            }
            "ret" => return Ok(StepResult::Return(stack.pop().unwrap_or(Value::Null))),

            "br" => {
                return instruction
                    .get_branch_target()
                    .map(StepResult::Branch)
                    .ok_or_else(|| invalid_operand(instruction, "branch"))
            }
            "brtrue" | "brfalse" => {
                let taken = pop(stack)?.is_truthy() == (op == "brtrue");
                return self.branch_if(instruction, taken);
            }
            "beq" | "bne.un" | "bge" | "bgt" | "ble" | "blt" | "bge.un" | "bgt.un" | "ble.un"
            | "blt.un" => {
                let right = pop(stack)?;
                let left = pop(stack)?;
                let unsigned = op.ends_with(".un");
                let taken = match op {
                    "beq" => equals(&left, &right),
                    "bne.un" => !equals(&left, &right),
                    _ => match compare(&left, &right, unsigned) {
                        Some(ordering) => match op.trim_end_matches(".un") {
                            "bge" => ordering != Ordering::Less,
                            "bgt" => ordering == Ordering::Greater,
                            "ble" => ordering != Ordering::Greater,
                            _ => ordering == Ordering::Less,
                        },
                        None => unsigned,
                    },
                };
                return self.branch_if(instruction, taken);
            }
            "switch" => {
                let selector = pop(stack)?;
                let target = selector
                    .as_i64()
                    .and_then(|index| usize::try_from(index).ok())
                    .and_then(|index| instruction.branch_targets.get(index).copied());
                if let Some(target) = target {
                    return Ok(StepResult::Branch(target));
                }
            }

            "neg" | "not" => {
                let value = pop(stack)?;
                let result = match (op, &value) {
                    ("neg", Value::I4(v)) => Value::I4(v.wrapping_neg()),
                    ("neg", Value::I8(v)) => Value::I8(v.wrapping_neg()),
                    ("neg", Value::R8(v)) => Value::R8(-v),
                    ("not", Value::I4(v)) => Value::I4(!v),
                    ("not", Value::I8(v)) => Value::I8(!v),
                    _ => return Err(Error::Emulation(format!("{op} cannot be applied to {value}"))),
                };
                stack.push(result);
            }
            "ceq" | "cgt" | "cgt.un" | "clt" | "clt.un" => {
                let right = pop(stack)?;
                let left = pop(stack)?;
                let result = match op {
                    "ceq" => equals(&left, &right),
                    "cgt" | "cgt.un" => match compare(&left, &right, op == "cgt.un") {
                        Some(ordering) => ordering == Ordering::Greater,
                        None => op == "cgt.un",
                    },
                    _ => match compare(&left, &right, op == "clt.un") {
                        Some(ordering) => ordering == Ordering::Less,
                        None => op == "clt.un",
                    },
                };
                stack.push(Value::from(result));
            }
            _ if op.starts_with("conv.") => {
                let value = pop(stack)?;
                let converted = convert(op, &value)
                    .ok_or_else(|| Error::Emulation(format!("{op} cannot convert {value}")))?;
                stack.push(converted);
            }

            "call" | "callvirt" => return self.call(state, instruction, stack, op == "callvirt"),
            "newobj" => return self.new_object(state, instruction, stack),
            "ldftn" => {
                let method = resolved_method(instruction)?;
                let id = method.def.ok_or_else(|| {
                    Error::Emulation(format!("ldftn of external method {}", method.name))
                })?;
                stack.push(Value::Method(id));
            }
            "ldvirtftn" => {
                let method = resolved_method(instruction)?;
                let id = method.def.ok_or_else(|| {
                    Error::Emulation(format!("ldvirtftn of external method {}", method.name))
                })?;
                let receiver = pop(stack)?;
                let receiver = self.receiver(state, receiver)?;
                stack.push(Value::Method(self.dispatch_virtual(receiver, id)));
            }

            "ldfld" => {
                let field = resolved_field(instruction)?;
                let id = self.field_def(field)?;
                let receiver = pop(stack)?;
                let object = self.receiver(state, receiver)?;
                stack.push(self.instance_field(object, id)?);
            }
            "ldflda" => {
                let field = resolved_field(instruction)?;
                let id = self.field_def(field)?;
                let receiver = pop(stack)?;
                let object = self.receiver(state, receiver)?;
                stack.push(Value::Ptr(Pointer::Field { object, field: id }));
            }
            "stfld" => {
                let field = resolved_field(instruction)?;
                let id = self.field_def(field)?;
                let value = pop(stack)?;
                let receiver = pop(stack)?;
                let object = self.receiver(state, receiver)?;
                self.set_instance_field(object, id, value)?;
            }
            "ldsfld" | "ldsflda" | "stsfld" => {
                let field = resolved_field(instruction)?;
                let id = self.field_def(field)?;
                let declaring = self.module.field(id)?.declaring;
                self.ensure_initialized(state, declaring)?;
                match op {
                    "ldsfld" => stack.push(self.static_value(id)),
                    "ldsflda" => stack.push(Value::Ptr(Pointer::Static(id))),
                    _ => {
                        let value = pop(stack)?;
                        lock!(self.statics).insert(id, value);
                    }
                }
            }

            "box" => {
                // Boxing is transparent; only the address form needs a load.
                let value = pop(stack)?;
                stack.push(self.load(state, &value)?);
            }
            "unbox" | "unbox.any" => {
                let target = resolved_type(instruction)?.clone();
                let value = pop(stack)?;
                if value.is_null() && target.is_value_type() {
                    return Err(self.raise(NULL_REFERENCE_TYPE, NULL_REFERENCE_MESSAGE));
                }
                if !self.is_instance_of(&value, &target) {
                    return Err(self.invalid_cast(&value, &target));
                }
                stack.push(value);
            }
            "castclass" | "isinst" => {
                let target = resolved_type(instruction)?.clone();
                let value = pop(stack)?;
                if value.is_null() || self.is_instance_of(&value, &target) {
                    stack.push(value);
                } else if op == "isinst" {
                    stack.push(Value::Null);
                } else {
                    return Err(self.invalid_cast(&value, &target));
                }
            }

            "newarr" => {
                let element = resolved_type(instruction)?.clone();
                let length = index_of(&pop(stack)?)?;
                let items = vec![Value::default_for(&element); length];
                let array = with_heap!(self, |heap: &mut ManagedHeap| heap
                    .alloc(HeapObject::Array { element, items }));
                stack.push(Value::Ref(array));
            }
            "ldlen" => {
                let array = pop(stack)?;
                let array = self.receiver(state, array)?;
                let length = with_heap!(self, |heap: &mut ManagedHeap| heap
                    .array(array)
                    .map(|items| items.len()))?;
                stack.push(Value::I4(i32::try_from(length).unwrap_or(i32::MAX)));
            }
            "ldelema" => {
                let index = index_of(&pop(stack)?)?;
                let array = pop(stack)?;
                let array = self.receiver(state, array)?;
                stack.push(Value::Ptr(Pointer::Element { array, index }));
            }
            _ if op.starts_with("ldelem") => {
                let index = index_of(&pop(stack)?)?;
                let array = pop(stack)?;
                let array = self.receiver(state, array)?;
                stack.push(self.element(array, index)?);
            }
            _ if op.starts_with("stelem") => {
                let value = pop(stack)?;
                let index = index_of(&pop(stack)?)?;
                let array = pop(stack)?;
                let array = self.receiver(state, array)?;
                self.set_element(array, index, value)?;
            }

            _ if op == "ldobj" || op.starts_with("ldind.") => {
                let address = pop(stack)?;
                stack.push(self.load(state, &address)?);
            }
            _ if op == "stobj" || op.starts_with("stind.") => {
                let value = pop(stack)?;
                let address = pop(stack)?;
                self.store(state, &address, value)?;
            }
            "initobj" => {
                let target = resolved_type(instruction)?.clone();
                let address = pop(stack)?;
                self.store(state, &address, Value::default_for(&target))?;
            }

            "throw" => {
                return match pop(stack)? {
                    Value::Ref(object) => Ok(StepResult::Throw(object)),
                    Value::Null => Err(self.raise(NULL_REFERENCE_TYPE, NULL_REFERENCE_MESSAGE)),
                    other => Err(Error::Emulation(format!("Cannot throw {other}"))),
                }
            }
            "rethrow" => return Ok(StepResult::Rethrow),
            "leave" => {
                return instruction
                    .get_branch_target()
                    .map(StepResult::Leave)
                    .ok_or_else(|| invalid_operand(instruction, "branch"))
            }
            "endfinally" => return Ok(StepResult::EndFinally),

            _ => {
                if let Some(operation) = BinaryOp::from_mnemonic(op) {
                    let right = pop(stack)?;
                    let left = pop(stack)?;
                    if operation.is_division() && is_zero(&right) && !matches!(left, Value::R8(_)) {
                        return Err(self.raise(DIVIDE_BY_ZERO_TYPE, "Attempted to divide by zero."));
                    }
                    let result = binary(operation, &left, &right).ok_or_else(|| {
                        Error::Emulation(format!("{op} cannot be applied to {left} and {right}"))
                    })?;
                    stack.push(result);
                } else {
                    return Err(Error::Unsupported(format!(
                        "{mnemonic} at IL_{:04X}",
                        instruction.offset
                    )));
                }
            }
        }

        Ok(StepResult::Continue)
    }

    fn branch_if(&self, instruction: &Instruction, taken: bool) -> Result<StepResult> {
        if !taken {
            return Ok(StepResult::Continue);
        }
        instruction
            .get_branch_target()
            .map(StepResult::Branch)
            .ok_or_else(|| invalid_operand(instruction, "branch"))
    }

    fn invalid_cast(&self, value: &Value, target: &TypeSig) -> Error {
        let from = with_heap!(self, |heap: &mut ManagedHeap| heap.type_name_of(value));
        self.raise(
            INVALID_CAST_TYPE,
            format!("Unable to cast object of type '{from}' to type '{target}'."),
        )
    }

    pub(super) fn dispatch_virtual(&self, receiver: ObjectRef, declared: MethodId) -> MethodId {
        let runtime_type: Option<TypeId> = with_heap!(self, |heap: &mut ManagedHeap| {
            match heap.get(receiver) {
                Ok(HeapObject::Instance { type_id, .. }) => Some(*type_id),
                _ => None,
            }
        });
        runtime_type.map_or(declared, |type_id| self.module.resolve_virtual(type_id, declared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_arithmetic_wraps() {
        assert_eq!(binary(BinaryOp::Add, &Value::I4(2), &Value::I4(3)), Some(Value::I4(5)));
        assert_eq!(
            binary(BinaryOp::Add, &Value::I4(i32::MAX), &Value::I4(1)),
            Some(Value::I4(i32::MIN))
        );
        assert_eq!(
            binary(BinaryOp::DivUn, &Value::I4(-2), &Value::I4(2)),
            Some(Value::I4(i32::MAX))
        );
        assert_eq!(binary(BinaryOp::ShrUn, &Value::I4(-1), &Value::I4(28)), Some(Value::I4(15)));
    }

    #[test]
    fn mixed_operands_widen() {
        assert_eq!(binary(BinaryOp::Mul, &Value::I8(3), &Value::I4(4)), Some(Value::I8(12)));
        assert_eq!(binary(BinaryOp::Add, &Value::R8(0.5), &Value::I4(1)), Some(Value::R8(1.5)));
        assert_eq!(binary(BinaryOp::And, &Value::R8(1.0), &Value::R8(1.0)), None);
        assert_eq!(binary(BinaryOp::Add, &Value::from("a"), &Value::I4(1)), None);
    }

    #[test]
    fn comparisons_treat_null_as_zero() {
        let object = Value::Ref(ObjectRef(4));
        assert_eq!(compare(&object, &Value::Null, true), Some(Ordering::Greater));
        assert!(!equals(&Value::Null, &Value::I4(0)));
        assert!(equals(&Value::Null, &Value::Null));
        assert!(!equals(&Value::Null, &object));
        assert!(equals(&Value::from("x"), &Value::from("x")));
        assert_eq!(compare(&Value::I4(-1), &Value::I4(1), true), Some(Ordering::Greater));
        assert_eq!(compare(&Value::I4(-1), &Value::I4(1), false), Some(Ordering::Less));
        assert_eq!(compare(&Value::R8(f64::NAN), &Value::I4(1), false), None);
    }

    #[test]
    fn conversions_truncate_and_extend() {
        assert_eq!(convert("conv.u1", &Value::I4(300)), Some(Value::I4(44)));
        assert_eq!(convert("conv.i1", &Value::I4(255)), Some(Value::I4(-1)));
        assert_eq!(convert("conv.u8", &Value::I4(-1)), Some(Value::I8(i64::from(u32::MAX))));
        assert_eq!(convert("conv.i8", &Value::I4(-1)), Some(Value::I8(-1)));
        assert_eq!(convert("conv.i4", &Value::R8(2.9)), Some(Value::I4(2)));
        assert_eq!(convert("conv.r8", &Value::I4(2)), Some(Value::R8(2.0)));
        assert_eq!(convert("conv.i4", &Value::Null), None);
    }

    #[test]
    fn pop_n_keeps_order() {
        let mut stack = vec![Value::I4(1), Value::I4(2), Value::I4(3)];
        assert_eq!(pop_n(&mut stack, 2).unwrap(), vec![Value::I4(2), Value::I4(3)]);
        assert_eq!(stack, vec![Value::I4(1)]);
        assert!(pop_n(&mut stack, 2).is_err());
    }
}
