//! Call dispatch of the in-process host.
//!
//! Calls into module members run their bodies. Calls to the runtime library are served
//! here through [`Intrinsic`]. This includes the interceptor hooks: the context object is
//! moved off the heap for the duration of the hook, so hooks run with no host lock held.

use std::{collections::HashMap, iter, sync::Arc};

use crate::{
    assembly::{Instruction, ResolvedField, ResolvedMethod},
    emulation::{
        heap::{HeapObject, ManagedHeap},
        interpreter::{
            pop_n, resolved_method, DecodedBody, ExecState, StepResult, NULL_REFERENCE_MESSAGE,
        },
        Runtime,
    },
    metadata::member::{FieldId, MethodId, TypeId},
    runtime::{
        intrinsics::{
            Intrinsic, GETTER_TYPE, INVALID_OPERATION_TYPE, NULL_REFERENCE_TYPE, SETTER_TYPE,
        },
        Argument, EventContext, Fault, Host, MemberContext, MemberHandle, MethodContext, ObjectRef,
        Value,
    },
    weaver::{EventHook, InterceptorDescriptor, MemberHook, MethodHook},
    Error, Result,
};

fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| Error::Emulation(format!("Missing argument {index}")))
}

fn string_arg(args: &[Value], index: usize) -> Result<String> {
    match arg(args, index)? {
        Value::Str(value) => Ok(value.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(Error::Emulation(format!("Argument {index} is {other}, not a string"))),
    }
}

impl Runtime {
    /// Decoded body of a module method, cached across invocations
    pub(super) fn body(&self, method: MethodId) -> Result<Arc<DecodedBody>> {
        if let Some(body) = self.bodies.get(&method) {
            return Ok(Arc::clone(body.value()));
        }
        let body = Arc::new(DecodedBody::decode(self, method)?);
        self.bodies.insert(method, Arc::clone(&body));
        Ok(body)
    }

    /// Allocate an exception and return the error that throws it
    pub(super) fn raise(&self, type_name: &str, message: impl Into<String>) -> Error {
        let message = message.into();
        let object = with_heap!(self, |heap: &mut ManagedHeap| heap
            .alloc_exception(type_name, message.clone()));
        Error::ManagedException {
            object,
            type_name: type_name.to_string(),
            message,
        }
    }

    /// The error that throws an existing object
    pub(super) fn exception_error(&self, object: ObjectRef) -> Error {
        let value = Value::Ref(object);
        let (type_name, message) = with_heap!(self, |heap: &mut ManagedHeap| (
            heap.type_name_of(&value),
            heap.exception_message(&value).unwrap_or_default()
        ));
        Error::ManagedException {
            object,
            type_name,
            message,
        }
    }

    fn fault(&self, fault: Fault) -> Error {
        self.raise(&fault.type_name, fault.message)
    }

    pub(super) fn object_of(&self, value: &Value) -> Result<ObjectRef> {
        match value {
            Value::Ref(object) => Ok(*object),
            Value::Null => Err(self.raise(NULL_REFERENCE_TYPE, NULL_REFERENCE_MESSAGE)),
            other => Err(Error::Emulation(format!("{other} is not an object"))),
        }
    }

    pub(super) fn field_def(&self, field: &ResolvedField) -> Result<FieldId> {
        field.def.ok_or_else(|| {
            Error::Emulation(format!(
                "Field {}::{} is not defined in the module",
                field.parent, field.name
            ))
        })
    }

    pub(super) fn instance_field(&self, object: ObjectRef, field: FieldId) -> Result<Value> {
        with_heap!(self, |heap: &mut ManagedHeap| -> Result<Value> {
            match heap.get(object)? {
                HeapObject::Instance { fields, .. } => {
                    Ok(fields.get(&field).cloned().unwrap_or(Value::Null))
                }
                other => Err(Error::Emulation(format!(
                    "{object} is a {}, which has no fields",
                    other.type_name()
                ))),
            }
        })
    }

    pub(super) fn set_instance_field(
        &self,
        object: ObjectRef,
        field: FieldId,
        value: Value,
    ) -> Result<()> {
        with_heap!(self, |heap: &mut ManagedHeap| -> Result<()> {
            match heap.get_mut(object)? {
                HeapObject::Instance { fields, .. } => {
                    fields.insert(field, value);
                    Ok(())
                }
                other => Err(Error::Emulation(format!(
                    "{object} is a {}, which has no fields",
                    other.type_name()
                ))),
            }
        })
    }

    pub(super) fn static_value(&self, field: FieldId) -> Value {
        if let Some(value) = lock!(self.statics).get(&field) {
            return value.clone();
        }
        self.module
            .field(field)
            .map_or(Value::Null, |def| Value::default_for(&def.field_type))
    }

    /// Run the type initializer of `type_id` on first use
    pub(super) fn ensure_initialized(&self, state: &mut ExecState, type_id: TypeId) -> Result<()> {
        if !lock!(self.initialized).insert(type_id) {
            return Ok(());
        }
        if let Some(cctor) = self.module.find_method(type_id, ".cctor", 0) {
            self.execute(state, cctor, Vec::new())?;
        }
        Ok(())
    }

    /// Allocate an instance of a module type with every instance field, inherited ones
    /// included, at its default
    pub(super) fn allocate_instance(&self, type_id: TypeId) -> Result<ObjectRef> {
        let mut fields = HashMap::new();
        let mut current = Some(type_id);
        while let Some(id) = current {
            for field in &self.module.type_def(id)?.fields {
                let def = self.module.field(*field)?;
                if !def.is_static() {
                    fields.insert(*field, Value::default_for(&def.field_type));
                }
            }
            current = self.module.base_type(id);
        }

        let type_name = self.module.type_def(type_id)?.fullname();
        Ok(with_heap!(self, |heap: &mut ManagedHeap| heap.alloc(HeapObject::Instance {
            type_id,
            type_name,
            fields,
        })))
    }

    pub(super) fn call(
        &self,
        state: &mut ExecState,
        instruction: &Instruction,
        stack: &mut Vec<Value>,
        is_virtual: bool,
    ) -> Result<StepResult> {
        let method = resolved_method(instruction)?;
        let arity = method.signature.params.len() + usize::from(method.signature.has_this);
        let args = pop_n(stack, arity)?;
        let result = self.call_method(state, method, args, is_virtual)?;
        if !method.signature.ret.is_void() {
            stack.push(result);
        }
        Ok(StepResult::Continue)
    }

    fn call_method(
        &self,
        state: &mut ExecState,
        method: &ResolvedMethod,
        mut args: Vec<Value>,
        is_virtual: bool,
    ) -> Result<Value> {
        let Some(id) = method.def else {
            let declaring = method.parent.type_name().unwrap_or_default();
            return match Intrinsic::lookup(declaring, &method.name, method.signature.params.len()) {
                Some(intrinsic) => self.intrinsic(state, intrinsic, args),
                None => Err(Error::Emulation(format!(
                    "No implementation of {}::{}",
                    method.parent, method.name
                ))),
            };
        };

        let def = self.module.method(id)?;
        if def.name == "Invoke" && self.module.type_def(def.declaring)?.is_delegate() {
            let delegate = if args.is_empty() { Value::Null } else { args.remove(0) };
            return self.invoke_delegate(state, &delegate, args);
        }

        let mut target = id;
        if method.signature.has_this {
            let receiver = match args.first() {
                Some(value) => self.load(state, value)?,
                None => Value::Null,
            };
            if is_virtual {
                let object = self.object_of(&receiver)?;
                target = self.dispatch_virtual(object, id);
            }
            if let Some(first) = args.first_mut() {
                *first = receiver;
            }
        } else {
            self.ensure_initialized(state, def.declaring)?;
        }
        self.execute(state, target, args)
    }

    pub(super) fn new_object(
        &self,
        state: &mut ExecState,
        instruction: &Instruction,
        stack: &mut Vec<Value>,
    ) -> Result<StepResult> {
        let method = resolved_method(instruction)?;
        let args = pop_n(stack, method.signature.params.len())?;
        let object = self.construct_with(state, method, args)?;
        stack.push(object);
        Ok(StepResult::Continue)
    }

    pub(super) fn construct_with(
        &self,
        state: &mut ExecState,
        ctor: &ResolvedMethod,
        args: Vec<Value>,
    ) -> Result<Value> {
        if let Some(id) = ctor.def {
            let declaring = self.module.method(id)?.declaring;
            let def = self.module.type_def(declaring)?;
            if def.is_delegate() {
                return self.alloc_delegate(def.fullname(), &args);
            }

            self.ensure_initialized(state, declaring)?;
            let object = self.allocate_instance(declaring)?;
            let args = iter::once(Value::Ref(object)).chain(args).collect();
            self.execute(state, id, args)?;
            return Ok(Value::Ref(object));
        }

        let type_name = ctor.parent.type_name().unwrap_or_default().to_string();
        if let Some(intrinsic) = Intrinsic::lookup(&type_name, ".ctor", args.len()) {
            return self.construct_intrinsic(intrinsic, args);
        }
        if type_name.ends_with("Exception") {
            let message = args.first().map(|value| self.display(value)).unwrap_or_default();
            let object = with_heap!(self, |heap: &mut ManagedHeap| heap
                .alloc_exception(type_name, message));
            return Ok(Value::Ref(object));
        }
        Err(Error::Emulation(format!("Cannot construct {}", ctor.parent)))
    }

    pub(super) fn alloc_delegate(&self, type_name: String, args: &[Value]) -> Result<Value> {
        let target = arg(args, 0)?.clone();
        let Value::Method(method) = arg(args, 1)? else {
            return Err(Error::Emulation(format!("{type_name} needs a function pointer")));
        };
        let targets = vec![(target, *method)];
        Ok(Value::Ref(with_heap!(self, |heap: &mut ManagedHeap| heap
            .alloc(HeapObject::Delegate { type_name, targets }))))
    }

    fn delegate_parts(&self, delegate: &Value) -> Result<(String, Vec<(Value, MethodId)>)> {
        let object = self.object_of(delegate)?;
        with_heap!(self, |heap: &mut ManagedHeap| -> Result<(String, Vec<(Value, MethodId)>)> {
            match heap.get(object)? {
                HeapObject::Delegate { type_name, targets } => {
                    Ok((type_name.clone(), targets.clone()))
                }
                other => Err(Error::Emulation(format!(
                    "{object} is a {}, not a delegate",
                    other.type_name()
                ))),
            }
        })
    }

    /// Call every target of a delegate in order and return the last result
    pub(super) fn invoke_delegate(
        &self,
        state: &mut ExecState,
        delegate: &Value,
        args: Vec<Value>,
    ) -> Result<Value> {
        let (_, targets) = self.delegate_parts(delegate)?;
        let mut result = Value::Null;
        for (target, method) in targets {
            let def = self.module.method(method)?;
            if def.is_static() {
                result = self.execute(state, method, args.clone())?;
            } else {
                let resolved = match &target {
                    Value::Ref(object) if def.is_virtual() => {
                        self.dispatch_virtual(*object, method)
                    }
                    _ => method,
                };
                let call_args = iter::once(target).chain(args.iter().cloned()).collect();
                result = self.execute(state, resolved, call_args)?;
            }
        }
        Ok(result)
    }

    fn combine(&self, first: &Value, second: &Value) -> Result<Value> {
        if first.is_null() {
            return Ok(second.clone());
        }
        if second.is_null() {
            return Ok(first.clone());
        }
        let (type_name, mut targets) = self.delegate_parts(first)?;
        let (_, appended) = self.delegate_parts(second)?;
        targets.extend(appended);
        Ok(Value::Ref(with_heap!(self, |heap: &mut ManagedHeap| heap
            .alloc(HeapObject::Delegate { type_name, targets }))))
    }

    /// Remove the last occurrence of `removed`'s invocation list from `source`
    fn remove(&self, source: &Value, removed: &Value) -> Result<Value> {
        if source.is_null() || removed.is_null() {
            return Ok(source.clone());
        }
        let (type_name, mut targets) = self.delegate_parts(source)?;
        let (_, removed) = self.delegate_parts(removed)?;
        if removed.is_empty() || removed.len() > targets.len() {
            return Ok(source.clone());
        }

        let found = (0..=targets.len() - removed.len())
            .rev()
            .find(|&start| targets[start..start + removed.len()] == removed[..]);
        let Some(start) = found else {
            return Ok(source.clone());
        };
        targets.drain(start..start + removed.len());
        if targets.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::Ref(with_heap!(self, |heap: &mut ManagedHeap| heap
            .alloc(HeapObject::Delegate { type_name, targets }))))
    }

    fn construct_intrinsic(&self, intrinsic: Intrinsic, args: Vec<Value>) -> Result<Value> {
        use Intrinsic as I;

        let object = match intrinsic {
            I::MethodContextCtor => HeapObject::MethodContext(Box::default()),
            I::MemberContextCtor => HeapObject::MemberContext(MemberContext::new(
                arg(&args, 0)?.clone(),
                string_arg(&args, 1)?,
                arg(&args, 2)?.clone(),
                arg(&args, 3)?.is_truthy(),
            )),
            I::EventContextCtor => HeapObject::EventContext(EventContext::new(
                arg(&args, 0)?.clone(),
                arg(&args, 1)?.clone(),
            )),
            I::EventContextInvokeCtor => {
                let arguments = match arg(&args, 2)? {
                    Value::Null => Vec::new(),
                    array => {
                        let array = self.object_of(array)?;
                        with_heap!(self, |heap: &mut ManagedHeap| heap
                            .array(array)
                            .map(|items| items.clone()))?
                    }
                };
                let mut ctx = EventContext::new(arg(&args, 0)?.clone(), arg(&args, 1)?.clone());
                ctx.arguments = arguments;
                HeapObject::EventContext(ctx)
            }
            I::GetterCtor => return self.alloc_delegate(GETTER_TYPE.to_string(), &args),
            I::SetterCtor => return self.alloc_delegate(SETTER_TYPE.to_string(), &args),
            I::ExceptionCtor | I::InvalidOperationCtor => HeapObject::Exception {
                type_name: intrinsic.declaring().to_string(),
                message: string_arg(&args, 0)?,
            },
            other => return Err(Error::Emulation(format!("{other} is not a constructor"))),
        };
        Ok(Value::Ref(with_heap!(self, |heap: &mut ManagedHeap| heap.alloc(object))))
    }

    fn with_method_context<R>(
        &self,
        ctx: &Value,
        f: impl FnOnce(&mut MethodContext) -> R,
    ) -> Result<R> {
        let object = self.object_of(ctx)?;
        with_heap!(self, |heap: &mut ManagedHeap| heap.method_context(object).map(f))
    }

    fn with_member_context<R>(
        &self,
        ctx: &Value,
        f: impl FnOnce(&mut MemberContext) -> R,
    ) -> Result<R> {
        let object = self.object_of(ctx)?;
        with_heap!(self, |heap: &mut ManagedHeap| heap.member_context(object).map(f))
    }

    fn with_event_context<R>(
        &self,
        ctx: &Value,
        f: impl FnOnce(&mut EventContext) -> R,
    ) -> Result<R> {
        let object = self.object_of(ctx)?;
        with_heap!(self, |heap: &mut ManagedHeap| heap.event_context(object).map(f))
    }

    fn descriptor(&self, class: &str) -> Result<Arc<InterceptorDescriptor>> {
        self.registry.get(class).ok_or_else(|| {
            self.raise(
                INVALID_OPERATION_TYPE,
                format!("Interceptor {class} is not registered"),
            )
        })
    }

    /// Interceptor class and descriptor behind an interceptor instance
    fn aspect(&self, aspect: &Value) -> Result<(String, Arc<InterceptorDescriptor>)> {
        let object = self.object_of(aspect)?;
        let class = with_heap!(self, |heap: &mut ManagedHeap| -> Result<String> {
            match heap.get(object)? {
                HeapObject::Interceptor(class) => Ok(class.clone()),
                other => Err(Error::Emulation(format!(
                    "{object} is a {}, not an interceptor",
                    other.type_name()
                ))),
            }
        })?;
        let descriptor = self.descriptor(&class)?;
        Ok((class, descriptor))
    }

    fn run_method_hook(&self, class: &str, hook: &MethodHook, ctx: &Value) -> Result<()> {
        let object = self.object_of(ctx)?;
        let mut context = with_heap!(self, |heap: &mut ManagedHeap| heap
            .method_context(object)
            .map(std::mem::take))?;
        context.enter(class);
        let outcome = hook(self, &mut context);
        with_heap!(self, |heap: &mut ManagedHeap| heap
            .method_context(object)
            .map(|slot| *slot = context))?;
        outcome.map_err(|fault| self.fault(fault))
    }

    fn run_member_hook(&self, hook: &MemberHook, ctx: &Value) -> Result<()> {
        let object = self.object_of(ctx)?;
        let mut context = with_heap!(self, |heap: &mut ManagedHeap| heap
            .member_context(object)
            .map(|slot| slot.clone()))?;
        let outcome = hook(self, &mut context);
        with_heap!(self, |heap: &mut ManagedHeap| heap
            .member_context(object)
            .map(|slot| *slot = context))?;
        outcome.map_err(|fault| self.fault(fault))
    }

    fn run_event_hook(&self, hook: &EventHook, ctx: &Value) -> Result<()> {
        let object = self.object_of(ctx)?;
        let mut context = with_heap!(self, |heap: &mut ManagedHeap| heap
            .event_context(object)
            .map(|slot| slot.clone()))?;
        let outcome = hook(self, &mut context);
        with_heap!(self, |heap: &mut ManagedHeap| heap
            .event_context(object)
            .map(|slot| *slot = context))?;
        outcome.map_err(|fault| self.fault(fault))
    }

    fn aspect_instance(&self, class: String) -> Result<Value> {
        self.descriptor(&class)?;
        let object = *self
            .aspects
            .entry(class.clone())
            .or_insert_with(|| {
                with_heap!(self, |heap: &mut ManagedHeap| heap
                    .alloc(HeapObject::Interceptor(class)))
            });
        Ok(Value::Ref(object))
    }

    /// Identity of a woven member: the method's markers, then those of the property or
    /// event owning it, then those of its type and of the module
    pub(super) fn member_handle(&self, key: &str) -> Result<MemberHandle> {
        let id = self
            .module
            .method_by_key(key)
            .ok_or_else(|| Error::MemberNotFound(key.to_string()))?;
        let method = self.module.method(id)?;
        let declaring = self.module.type_def(method.declaring)?;

        let mut markers = method.markers.clone();
        if let Some(property) = self.module.property_of_accessor(id) {
            markers.extend(self.module.property(property)?.markers.iter().cloned());
        }
        if let Some(event) = self.module.event_of_accessor(id) {
            markers.extend(self.module.event(event)?.markers.iter().cloned());
        }
        markers.extend(declaring.markers.iter().cloned());
        markers.extend(self.module.markers.iter().cloned());

        Ok(MemberHandle {
            key: key.to_string(),
            name: method.name.clone(),
            declaring: declaring.fullname(),
            markers,
        })
    }

    fn resolve_member(&self, key: String) -> Result<Value> {
        if let Some(existing) = self.members.get(&key) {
            return Ok(Value::Ref(*existing.value()));
        }
        let handle = Arc::new(self.member_handle(&key)?);
        let object = *self
            .members
            .entry(key)
            .or_insert_with(|| {
                with_heap!(self, |heap: &mut ManagedHeap| heap
                    .alloc(HeapObject::Member(handle)))
            });
        Ok(Value::Ref(object))
    }

    #[allow(clippy::too_many_lines)]
    fn intrinsic(
        &self,
        state: &mut ExecState,
        intrinsic: Intrinsic,
        args: Vec<Value>,
    ) -> Result<Value> {
        use Intrinsic as I;

        match intrinsic {
            // Base constructor chaining; the object already exists.
            I::ObjectCtor | I::ExceptionCtor | I::InvalidOperationCtor => Ok(Value::Null),
            I::DelegateCombine => self.combine(arg(&args, 0)?, arg(&args, 1)?),
            I::DelegateRemove => self.remove(arg(&args, 0)?, arg(&args, 1)?),
            I::ExceptionGetMessage => {
                let exception = arg(&args, 0)?;
                self.object_of(exception)?;
                Ok(self.exception_message(exception).map_or(Value::Null, Value::from))
            }
            I::StringConcat => {
                let render = |value: &Value| {
                    if value.is_null() {
                        String::new()
                    } else {
                        self.display(value)
                    }
                };
                Ok(Value::from(format!(
                    "{}{}",
                    render(arg(&args, 0)?),
                    render(arg(&args, 1)?)
                )))
            }

            I::MethodContextSetMethod => {
                let member = self.object_of(arg(&args, 1)?)?;
                let handle = with_heap!(self, |heap: &mut ManagedHeap| -> Result<MemberHandle> {
                    match heap.get(member)? {
                        HeapObject::Member(handle) => Ok((**handle).clone()),
                        other => Err(Error::Emulation(format!(
                            "{member} is a {}, not a member",
                            other.type_name()
                        ))),
                    }
                })?;
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.method = Some(handle))?;
                Ok(Value::Null)
            }
            I::MethodContextSetInstance => {
                let instance = arg(&args, 1)?.clone();
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.instance = instance)?;
                Ok(Value::Null)
            }
            I::MethodContextAddArgument => {
                let argument = Argument {
                    name: string_arg(&args, 1)?,
                    is_by_ref: arg(&args, 2)?.is_truthy(),
                    value: arg(&args, 3)?.clone(),
                };
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.arguments.push(argument))?;
                Ok(Value::Null)
            }
            I::MethodContextGetProceed => {
                self.with_method_context(arg(&args, 0)?, |ctx| Value::from(ctx.proceed))
            }
            I::MethodContextGetReturns => {
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.returns.clone())
            }
            I::MethodContextSetReturns => {
                let value = arg(&args, 1)?.clone();
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.returns = value)?;
                Ok(Value::Null)
            }
            I::MethodContextSetException => {
                let exception = arg(&args, 1)?.clone();
                self.with_method_context(arg(&args, 0)?, |ctx| ctx.exception = Some(exception))?;
                Ok(Value::Null)
            }

            I::AspectsGet => self.aspect_instance(string_arg(&args, 0)?),
            I::AspectOnEntry | I::AspectOnExit | I::AspectOnSuccess | I::AspectOnException => {
                let (class, descriptor) = self.aspect(arg(&args, 0)?)?;
                let hook = match intrinsic {
                    I::AspectOnEntry => descriptor.on_entry.as_ref(),
                    I::AspectOnExit => descriptor.on_exit.as_ref(),
                    I::AspectOnSuccess => descriptor.on_success.as_ref(),
                    _ => descriptor.on_exception.as_ref(),
                };
                if let Some(hook) = hook {
                    self.run_method_hook(&class, hook, arg(&args, 1)?)?;
                }
                Ok(Value::Null)
            }
            I::AspectOnGetValue | I::AspectOnSetValue => {
                let (_, descriptor) = self.aspect(arg(&args, 0)?)?;
                let hook = if intrinsic == I::AspectOnGetValue {
                    descriptor.on_get_value.as_ref()
                } else {
                    descriptor.on_set_value.as_ref()
                };
                if let Some(hook) = hook {
                    self.run_member_hook(hook, arg(&args, 1)?)?;
                }
                Ok(Value::Null)
            }
            I::AspectOnAddHandler | I::AspectOnRemoveHandler | I::AspectOnInvokeEvent => {
                let (_, descriptor) = self.aspect(arg(&args, 0)?)?;
                let hook = match intrinsic {
                    I::AspectOnAddHandler => descriptor.on_add_handler.as_ref(),
                    I::AspectOnRemoveHandler => descriptor.on_remove_handler.as_ref(),
                    _ => descriptor.on_invoke_event.as_ref(),
                };
                if let Some(hook) = hook {
                    self.run_event_hook(hook, arg(&args, 1)?)?;
                }
                Ok(Value::Null)
            }

            I::MembersResolve => self.resolve_member(string_arg(&args, 0)?),
            I::MemberContextAddIndex => {
                let index = arg(&args, 1)?.clone();
                self.with_member_context(arg(&args, 0)?, |ctx| ctx.index.push(index))?;
                Ok(Value::Null)
            }
            I::MemberContextGetValue => {
                self.with_member_context(arg(&args, 0)?, |ctx| ctx.value.clone())
            }
            I::MemberContextGetContinue => {
                self.with_member_context(arg(&args, 0)?, |ctx| Value::from(ctx.proceed))
            }
            I::EventContextGetHandler => {
                self.with_event_context(arg(&args, 0)?, |ctx| ctx.handler.clone())
            }
            I::EventContextGetProceed => {
                self.with_event_context(arg(&args, 0)?, |ctx| Value::from(ctx.proceed))
            }
            I::EventContextGetArguments => {
                let items = self.with_event_context(arg(&args, 0)?, |ctx| ctx.arguments.clone())?;
                Ok(Value::Ref(with_heap!(self, |heap: &mut ManagedHeap| heap.alloc_array(items))))
            }

            I::ValidatorsValidate => {
                let value = arg(&args, 0)?;
                let name = string_arg(&args, 1)?;
                let descriptor = self.descriptor(&string_arg(&args, 2)?)?;
                if let Some(validate) = &descriptor.validate {
                    validate(self, value, &name).map_err(|fault| self.fault(fault))?;
                }
                Ok(Value::Null)
            }

            I::GetterInvoke | I::SetterInvoke => {
                let mut args = args;
                let delegate = if args.is_empty() { Value::Null } else { args.remove(0) };
                self.invoke_delegate(state, &delegate, args)
            }

            I::MethodContextCtor
            | I::MemberContextCtor
            | I::EventContextCtor
            | I::EventContextInvokeCtor
            | I::GetterCtor
            | I::SetterCtor => Err(Error::Emulation(format!(
                "{intrinsic} must be called through newobj"
            ))),
        }
    }
}
