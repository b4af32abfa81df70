//! Shared fixtures for the weaving integration tests.
//!
//! Modules are assembled in memory with the builders, woven, and then executed through
//! the in-process host so the hooks can be observed.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use dotweave::{
    emulation::{EmulationLimits, Runtime},
    metadata::{
        builders::{default_constructor, ClassBuilder, MethodBuilder},
        marker::Marker,
        member::{MethodId, TypeId},
        module::Module,
        signature::TypeSig,
    },
    runtime::intrinsics::Intrinsic,
    weaver::{InterceptorRegistry, WeaveReport, Weaver},
    Result,
};

/// Append-only log shared between hooks and assertions
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Journal::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal poisoned").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal poisoned").clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// `Demo.Calculator` with a default constructor and `int32 Add(int32 x, int32 y)`
pub fn calculator(markers: Vec<Marker>) -> Result<(Module, TypeId, MethodId)> {
    let mut module = Module::new("Calculator");
    let mut class = ClassBuilder::new("Demo", "Calculator");
    for marker in markers {
        class = class.marker(marker);
    }
    let calculator = class.build(&mut module)?;
    default_constructor(&mut module, calculator)?;
    let add = MethodBuilder::new("Add")
        .param("x", TypeSig::I4)
        .param("y", TypeSig::I4)
        .returns(TypeSig::I4)
        .implementation(|asm, _| {
            asm.ldarg(1)?.ldarg(2)?.add()?.ret()?;
            Ok(())
        })
        .build(&mut module, calculator)?;
    Ok((module, calculator, add))
}

/// Add an instance method that throws `InvalidOperationException(message)`
pub fn throwing_method(
    module: &mut Module,
    owner: TypeId,
    name: &str,
    message: &str,
) -> Result<MethodId> {
    let ctor = Intrinsic::InvalidOperationCtor.token(module);
    let ctor_sig = Intrinsic::InvalidOperationCtor.signature();
    let message = module.intern_string(message);
    MethodBuilder::new(name)
        .returns(TypeSig::I4)
        .implementation(move |asm, _| {
            asm.ldstr(message)?.newobj(ctor, &ctor_sig)?.throw()?;
            Ok(())
        })
        .build(module, owner)
}

/// Weave `module` and load the result into a host with strict limits
pub fn weave(module: Module, registry: InterceptorRegistry) -> Result<(Runtime, WeaveReport)> {
    let registry = Arc::new(registry);
    let woven = Weaver::new(Arc::clone(&registry)).weave(module)?;
    let runtime = Runtime::new(woven.module, registry).with_limits(EmulationLimits::strict());
    Ok((runtime, woven.report))
}
