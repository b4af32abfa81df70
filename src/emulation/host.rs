use std::{
    collections::{HashMap, HashSet},
    panic,
    sync::{Arc, Mutex},
    thread,
};

use dashmap::DashMap;

use crate::{
    assembly::ResolvedMethod,
    emulation::{
        config::EmulationLimits,
        heap::{HeapObject, ManagedHeap},
        interpreter::{DecodedBody, ExecState},
    },
    metadata::{
        member::{FieldId, MethodId, TypeId},
        module::Module,
    },
    runtime::{Host, ObjectRef, Value},
    weaver::InterceptorRegistry,
    Error, Result,
};

/// An in-process host that executes a woven module.
///
/// The host owns the module and shares the [`InterceptorRegistry`] with the weaver that
/// produced it. Hooks of woven members are dispatched to the registered descriptors and
/// receive the host as their [`Host`].
///
/// A `Runtime` is `Sync`: independent calls may run on separate threads and share the heap,
/// the static fields and the interceptor and member caches. Each top-level call gets its
/// own call stack and instruction budget.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use dotweave::emulation::Runtime;
/// use dotweave::metadata::{
///     builders::{ClassBuilder, MethodBuilder},
///     module::Module,
///     signature::TypeSig,
/// };
/// use dotweave::runtime::Value;
/// use dotweave::weaver::InterceptorRegistry;
///
/// # fn main() -> dotweave::Result<()> {
/// let mut module = Module::new("Demo");
/// let calculator = ClassBuilder::new("Demo", "Calculator").build(&mut module)?;
/// MethodBuilder::new("Add")
///     .static_method()
///     .param("a", TypeSig::I4)
///     .param("b", TypeSig::I4)
///     .returns(TypeSig::I4)
///     .implementation(|asm, _| {
///         asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
///         Ok(())
///     })
///     .build(&mut module, calculator)?;
///
/// let runtime = Runtime::new(module, Arc::new(InterceptorRegistry::new()));
/// let sum = runtime.invoke("Demo.Calculator", "Add", None, &[Value::I4(2), Value::I4(3)])?;
/// assert_eq!(sum, Value::I4(5));
/// # Ok(())
/// # }
/// ```
pub struct Runtime {
    pub(super) module: Module,
    pub(super) registry: Arc<InterceptorRegistry>,
    pub(super) limits: EmulationLimits,
    pub(super) heap: Mutex<ManagedHeap>,
    pub(super) statics: Mutex<HashMap<FieldId, Value>>,
    pub(super) initialized: Mutex<HashSet<TypeId>>,
    pub(super) bodies: DashMap<MethodId, Arc<DecodedBody>>,
    pub(super) aspects: DashMap<String, ObjectRef>,
    pub(super) members: DashMap<String, ObjectRef>,
}

impl Runtime {
    /// Host for `module` dispatching hooks to `registry`, with default limits
    #[must_use]
    pub fn new(module: Module, registry: Arc<InterceptorRegistry>) -> Self {
        Runtime {
            module,
            registry,
            limits: EmulationLimits::default(),
            heap: Mutex::new(ManagedHeap::new()),
            statics: Mutex::new(HashMap::new()),
            initialized: Mutex::new(HashSet::new()),
            bodies: DashMap::new(),
            aspects: DashMap::new(),
            members: DashMap::new(),
        }
    }

    /// Replace the execution limits
    #[must_use]
    pub fn with_limits(mut self, limits: EmulationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The executed module
    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The registry hooks are dispatched to
    #[must_use]
    pub fn registry(&self) -> &Arc<InterceptorRegistry> {
        &self.registry
    }

    /// Active execution limits
    #[must_use]
    pub fn limits(&self) -> &EmulationLimits {
        &self.limits
    }

    /// Call `Namespace.Type::method` with `args`.
    ///
    /// The overload is chosen by parameter count. Instance methods take their receiver in
    /// `this` and are dispatched on its runtime type.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MemberNotFound`] for an unknown method,
    /// [`Error::ManagedException`] if the call throws, and [`Error::Emulation`] or
    /// [`Error::RecursionLimit`] if execution fails.
    pub fn invoke(
        &self,
        type_name: &str,
        method: &str,
        this: Option<Value>,
        args: &[Value],
    ) -> Result<Value> {
        let id = self.module.method_by_name(type_name, method, args.len())?;
        let mut full = Vec::with_capacity(args.len() + 1);
        let mut target = id;
        if let Some(receiver) = this {
            if let (Value::Ref(object), true) = (&receiver, self.module.method(id)?.is_virtual()) {
                target = self.dispatch_virtual(*object, id);
            }
            full.push(receiver);
        }
        full.extend_from_slice(args);
        self.invoke_method(target, full)
    }

    /// Call a method by id; `args` includes the receiver of instance methods
    ///
    /// # Errors
    /// See [`Runtime::invoke`].
    pub fn invoke_method(&self, method: MethodId, args: Vec<Value>) -> Result<Value> {
        let def = self.module.method(method)?;
        if def.arg_count() != args.len() {
            return Err(Error::Emulation(format!(
                "{} takes {} arguments, {} given",
                def.name,
                def.arg_count(),
                args.len()
            )));
        }

        self.on_call_thread(|state| {
            if def.is_static() {
                self.ensure_initialized(state, def.declaring)?;
            }
            let result = self.execute(state, method, args);
            log::trace!("{} returned after {} instructions", def.name, state.executed);
            result
        })
    }

    /// Create an instance of `type_name` through the constructor taking `args`
    ///
    /// # Errors
    /// See [`Runtime::invoke`].
    pub fn construct(&self, type_name: &str, args: &[Value]) -> Result<Value> {
        let ctor = self.module.method_by_name(type_name, ".ctor", args.len())?;
        let def = self.module.method(ctor)?;
        let owner = self.module.type_def(def.declaring)?;
        let resolved = ResolvedMethod {
            token: self.module.method_token(ctor),
            def: Some(ctor),
            parent: owner.self_sig(),
            name: def.name.clone(),
            signature: def.signature.clone(),
            method_args: Vec::new(),
        };
        let args = args.to_vec();
        self.on_call_thread(|state| self.construct_with(state, &resolved, args))
    }

    /// Run one top-level call on a fresh call stack.
    ///
    /// Managed calls nest on the native stack, so the call runs on a scoped worker thread
    /// sized from [`EmulationLimits::native_stack_size`]. A panic inside a hook is resumed
    /// on the calling thread.
    fn on_call_thread<F>(&self, call: F) -> Result<Value>
    where
        F: FnOnce(&mut ExecState) -> Result<Value> + Send,
    {
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("dotweave-call".to_string())
                .stack_size(self.limits.native_stack_size())
                .spawn_scoped(scope, || call(&mut ExecState::default()))
                .map_err(|error| {
                    Error::Emulation(format!("Failed to start the call thread: {error}"))
                })?;
            match worker.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            }
        })
    }

    /// Wrap `method` bound to `target` in a delegate of type `delegate_type`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the delegate type is not defined in the module.
    pub fn delegate(&self, delegate_type: &str, target: Value, method: MethodId) -> Result<Value> {
        let id = self
            .module
            .type_by_name(delegate_type)
            .ok_or_else(|| Error::TypeNotFound(delegate_type.to_string()))?;
        let type_name = self.module.type_def(id)?.fullname();
        self.alloc_delegate(type_name, &[target, Value::Method(method)])
    }

    fn find_instance_field(&self, object: &Value, name: &str) -> Result<(ObjectRef, FieldId)> {
        let object = self.object_of(object)?;
        let type_id = with_heap!(self, |heap: &mut ManagedHeap| -> Result<TypeId> {
            match heap.get(object)? {
                HeapObject::Instance { type_id, .. } => Ok(*type_id),
                other => Err(Error::Emulation(format!(
                    "{object} is a {}, which has no fields",
                    other.type_name()
                ))),
            }
        })?;

        let mut current = Some(type_id);
        while let Some(id) = current {
            if let Some(field) = self.module.find_field(id, name) {
                return Ok((object, field));
            }
            current = self.module.base_type(id);
        }
        Err(Error::MemberNotFound(format!("field {name} of {object}")))
    }

    /// Read an instance field by name, searching base types
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no such field exists.
    pub fn field(&self, object: &Value, name: &str) -> Result<Value> {
        let (object, field) = self.find_instance_field(object, name)?;
        self.instance_field(object, field)
    }

    /// Write an instance field by name, bypassing any interception
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if no such field exists.
    pub fn set_field(&self, object: &Value, name: &str, value: Value) -> Result<()> {
        let (object, field) = self.find_instance_field(object, name)?;
        self.set_instance_field(object, field, value)
    }

    /// Read a static field
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MemberNotFound`] if the field does not exist.
    pub fn static_field(&self, type_name: &str, name: &str) -> Result<Value> {
        let owner = self
            .module
            .type_by_name(type_name)
            .ok_or_else(|| Error::TypeNotFound(type_name.to_string()))?;
        let field = self
            .module
            .find_field(owner, name)
            .ok_or_else(|| Error::MemberNotFound(format!("{type_name}::{name}")))?;
        Ok(self.static_value(field))
    }

    /// Run `f` against the heap
    pub fn inspect<R>(&self, f: impl FnOnce(&ManagedHeap) -> R) -> R {
        with_heap!(self, |heap: &mut ManagedHeap| f(heap))
    }
}

impl Host for Runtime {
    fn type_name(&self, value: &Value) -> String {
        with_heap!(self, |heap: &mut ManagedHeap| heap.type_name_of(value))
    }

    fn display(&self, value: &Value) -> String {
        with_heap!(self, |heap: &mut ManagedHeap| heap.display(value))
    }

    fn exception_message(&self, value: &Value) -> Option<String> {
        with_heap!(self, |heap: &mut ManagedHeap| heap.exception_message(value))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("module", &self.module.name())
            .field("limits", &self.limits)
            .field("objects", &lock!(self.heap).len())
            .field("bodies", &self.bodies.len())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        metadata::{
            builders::{default_constructor, ClassBuilder, MethodBuilder},
            member::{FieldDef, FieldFlags, Visibility},
            signature::TypeSig,
        },
        runtime::intrinsics::{Intrinsic, INVALID_OPERATION_TYPE},
        weaver::InterceptorDescriptor,
    };

    fn runtime(module: Module) -> Runtime {
        Runtime::new(module, Arc::new(InterceptorRegistry::new()))
            .with_limits(EmulationLimits::strict())
    }

    #[test]
    fn loops_and_locals() {
        let mut module = Module::new("Test");
        let owner = ClassBuilder::new("Demo", "Math").build(&mut module).unwrap();
        MethodBuilder::new("Sum")
            .static_method()
            .param("n", TypeSig::I4)
            .returns(TypeSig::I4)
            .implementation(|asm, _| {
                let total = asm.declare_local(TypeSig::I4);
                let i = asm.declare_local(TypeSig::I4);
                let (check, body, done) = (asm.label(), asm.label(), asm.label());
                asm.mark(&check)?.ldloc(i)?.ldarg(0)?.blt(&body)?.br(&done)?;
                asm.mark(&body)?.ldloc(total)?.ldloc(i)?.add()?.stloc(total)?;
                asm.ldloc(i)?.ldc_i4(1)?.add()?.stloc(i)?.br(&check)?;
                asm.mark(&done)?.ldloc(total)?.ret()?;
                Ok(())
            })
            .build(&mut module, owner)
            .unwrap();

        let runtime = runtime(module);
        assert_eq!(
            runtime.invoke("Demo.Math", "Sum", None, &[Value::I4(5)]).unwrap(),
            Value::I4(10)
        );
        assert_eq!(
            runtime.invoke("Demo.Math", "Sum", None, &[Value::I4(0)]).unwrap(),
            Value::I4(0)
        );
    }

    #[test]
    fn finally_runs_on_leave_and_on_throw() {
        let mut module = Module::new("Test");
        let owner = ClassBuilder::new("Demo", "Flow").build(&mut module).unwrap();
        let counter = module
            .add_field(FieldDef {
                name: "count".to_string(),
                declaring: owner,
                field_type: TypeSig::I4,
                visibility: Visibility::Public,
                flags: FieldFlags::STATIC,
                markers: Vec::new(),
            })
            .unwrap();
        let counter = module.field_token(counter);
        let exception = module.intern_type(&TypeSig::class("System.Exception"));
        let ctor = Intrinsic::InvalidOperationCtor.token(&mut module);
        let ctor_sig = Intrinsic::InvalidOperationCtor.signature();
        let message = module.intern_string("boom");

        let run = MethodBuilder::new("Run")
            .static_method()
            .param("fail", TypeSig::Boolean)
            .returns(TypeSig::I4)
            .implementation(move |asm, _| {
                let (start, quiet, finally, after) =
                    (asm.label(), asm.label(), asm.label(), asm.label());
                asm.mark(&start)?.ldarg(0)?.brfalse(&quiet)?;
                asm.ldstr(message)?.newobj(ctor, &ctor_sig)?.throw()?;
                asm.mark(&quiet)?.leave(&after)?;
                asm.mark(&finally)?
                    .ldsfld(counter)?
                    .ldc_i4(1)?
                    .add()?
                    .stsfld(counter)?
                    .endfinally()?;
                asm.mark(&after)?.ldsfld(counter)?.ret()?;
                asm.add_finally(&start, &finally, &finally, &after);
                Ok(())
            })
            .build(&mut module, owner)
            .unwrap();

        let outer = ClassBuilder::new("Demo", "Outer").build(&mut module).unwrap();
        let run_token = module.method_token(run);
        let run_sig = module.method(run).unwrap().signature.clone();
        MethodBuilder::new("Guarded")
            .static_method()
            .returns(TypeSig::I4)
            .implementation(move |asm, _| {
                let result = asm.declare_local(TypeSig::I4);
                let (start, handler, after) = (asm.label(), asm.label(), asm.label());
                asm.mark(&start)?
                    .ldc_i4(1)?
                    .call(run_token, &run_sig)?
                    .stloc(result)?
                    .leave(&after)?;
                asm.mark_catch(&handler)?.pop()?.ldc_i4(-1)?.stloc(result)?.leave(&after)?;
                asm.mark(&after)?.ldloc(result)?.ret()?;
                asm.add_catch(&start, &handler, &handler, &after, exception);
                Ok(())
            })
            .build(&mut module, outer)
            .unwrap();

        let runtime = runtime(module);
        assert_eq!(
            runtime.invoke("Demo.Flow", "Run", None, &[Value::from(false)]).unwrap(),
            Value::I4(1)
        );
        assert_eq!(runtime.invoke("Demo.Outer", "Guarded", None, &[]).unwrap(), Value::I4(-1));
        assert_eq!(runtime.static_field("Demo.Flow", "count").unwrap(), Value::I4(2));

        match runtime.invoke("Demo.Flow", "Run", None, &[Value::from(true)]) {
            Err(Error::ManagedException { type_name, message, .. }) => {
                assert_eq!(type_name, INVALID_OPERATION_TYPE);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(runtime.static_field("Demo.Flow", "count").unwrap(), Value::I4(3));
    }

    #[test]
    fn recursion_is_bounded() {
        let mut module = Module::new("Test");
        let owner = ClassBuilder::new("Demo", "Loop").build(&mut module).unwrap();
        let forever = MethodBuilder::new("Forever")
            .static_method()
            .build(&mut module, owner)
            .unwrap();
        let token = module.method_token(forever);
        let sig = module.method(forever).unwrap().signature.clone();
        let mut asm = crate::assembly::InstructionAssembler::new();
        asm.call(token, &sig).unwrap().ret().unwrap();
        module.replace_body(forever, asm.finish().unwrap()).unwrap();

        let runtime = runtime(module);
        assert!(matches!(
            runtime.invoke("Demo.Loop", "Forever", None, &[]),
            Err(Error::RecursionLimit(64))
        ));
    }

    /// `static int Down(int n) => n == 0 ? 0 : Down(n - 1) + 1`
    fn countdown() -> Module {
        let mut module = Module::new("Test");
        let owner = ClassBuilder::new("Demo", "Countdown").build(&mut module).unwrap();
        let down = MethodBuilder::new("Down")
            .static_method()
            .param("n", TypeSig::I4)
            .returns(TypeSig::I4)
            .build(&mut module, owner)
            .unwrap();
        let token = module.method_token(down);
        let sig = module.method(down).unwrap().signature.clone();
        let mut asm = crate::assembly::InstructionAssembler::new();
        let recurse = asm.label();
        asm.ldarg(0).unwrap().brtrue(&recurse).unwrap();
        asm.ldc_i4(0).unwrap().ret().unwrap();
        asm.mark(&recurse).unwrap().ldarg(0).unwrap().ldc_i4(1).unwrap().sub().unwrap();
        asm.call(token, &sig).unwrap().ldc_i4(1).unwrap().add().unwrap().ret().unwrap();
        module.replace_body(down, asm.finish().unwrap()).unwrap();
        module
    }

    #[test]
    fn deep_recursion_within_the_default_depth() {
        let runtime = Runtime::new(countdown(), Arc::new(InterceptorRegistry::new()));
        assert_eq!(
            runtime.invoke("Demo.Countdown", "Down", None, &[Value::I4(200)]).unwrap(),
            Value::I4(200)
        );
        assert!(matches!(
            runtime.invoke("Demo.Countdown", "Down", None, &[Value::I4(1_000)]),
            Err(Error::RecursionLimit(256))
        ));
    }

    #[test]
    fn instances_dispatch_on_runtime_type() {
        let mut module = Module::new("Test");
        let base = ClassBuilder::new("Demo", "Animal").build(&mut module).unwrap();
        default_constructor(&mut module, base).unwrap();
        MethodBuilder::new("Legs")
            .virtual_method()
            .returns(TypeSig::I4)
            .implementation(|asm, _| {
                asm.ldc_i4(4)?.ret()?;
                Ok(())
            })
            .build(&mut module, base)
            .unwrap();
        let bird = ClassBuilder::new("Demo", "Bird")
            .base(TypeSig::class("Demo.Animal"))
            .build(&mut module)
            .unwrap();
        default_constructor(&mut module, bird).unwrap();
        MethodBuilder::new("Legs")
            .virtual_method()
            .returns(TypeSig::I4)
            .implementation(|asm, _| {
                asm.ldc_i4(2)?.ret()?;
                Ok(())
            })
            .build(&mut module, bird)
            .unwrap();

        let runtime = runtime(module);
        let animal = runtime.construct("Demo.Bird", &[]).unwrap();
        assert_eq!(runtime.type_name(&animal), "Demo.Bird");
        assert_eq!(runtime.invoke("Demo.Animal", "Legs", Some(animal), &[]).unwrap(), Value::I4(2));
        assert!(runtime.invoke("Demo.Animal", "Legs", None, &[Value::Null]).is_err());
    }

    #[test]
    fn unregistered_interceptor_throws() {
        let registry = Arc::new(InterceptorRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        registry.register(InterceptorDescriptor::wrapping("Demo.Known").on_entry(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let mut module = Module::new("Test");
        let owner = ClassBuilder::new("Demo", "Lookups").build(&mut module).unwrap();
        let get = Intrinsic::AspectsGet.token(&mut module);
        let get_sig = Intrinsic::AspectsGet.signature();
        let name = module.intern_string("Demo.Missing");
        MethodBuilder::new("Lookup")
            .static_method()
            .returns(TypeSig::Object)
            .implementation(move |asm, _| {
                asm.ldstr(name)?.call(get, &get_sig)?.ret()?;
                Ok(())
            })
            .build(&mut module, owner)
            .unwrap();

        let runtime = Runtime::new(module, registry);
        let err = runtime.invoke("Demo.Lookups", "Lookup", None, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::ManagedException { ref type_name, .. } if type_name == INVALID_OPERATION_TYPE
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
