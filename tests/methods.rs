//! Method interception scenarios: hooks around ordinary methods, executed in-process.

mod common;

use std::sync::{Arc, Mutex};

use common::{calculator, throwing_method, weave, Journal};
use dotweave::{
    metadata::{
        builders::{default_constructor, ClassBuilder, MethodBuilder},
        marker::{Marker, ARG_MEMBER_PATTERN, ARG_TYPE_PATTERN},
        member::{FieldDef, FieldFlags, Visibility},
        method::MethodBody,
        module::Module,
        signature::{MethodSig, TypeSig},
    },
    runtime::{
        intrinsics::{Intrinsic, INVALID_OPERATION_TYPE},
        Value,
    },
    weaver::{InterceptorDescriptor, InterceptorRegistry, SkipReason},
    Error, Result,
};

fn tracing(class: &str, journal: &Journal) -> InterceptorDescriptor {
    let (entry, success, exit) = (journal.clone(), journal.clone(), journal.clone());
    let (on_entry, on_success, on_exit) = (class.to_string(), class.to_string(), class.to_string());
    InterceptorDescriptor::wrapping(class)
        .on_entry(move |_, ctx| {
            entry.push(format!("{on_entry} entry {}", ctx.method_name()));
            Ok(())
        })
        .on_success(move |_, ctx| {
            success.push(format!("{on_success} success {:?}", ctx.returns));
            Ok(())
        })
        .on_exit(move |_, _| {
            exit.push(format!("{on_exit} exit"));
            Ok(())
        })
}

#[test]
fn entry_and_success_see_arguments_and_result() -> Result<()> {
    let journal = Journal::new();
    let (entries, successes) = (journal.clone(), journal.clone());
    let registry = InterceptorRegistry::new().with(
        InterceptorDescriptor::wrapping("Log")
            .on_entry(move |host, ctx| {
                let arguments: Vec<String> = ctx
                    .arguments
                    .iter()
                    .map(|argument| format!("{}={}", argument.name, host.display(&argument.value)))
                    .collect();
                entries.push(format!("entering {}({})", ctx.method_name(), arguments.join(",")));
                Ok(())
            })
            .on_success(move |host, ctx| {
                let returns = host.display(&ctx.returns);
                successes.push(format!("completed {} -> {returns}", ctx.method_name()));
                Ok(())
            }),
    );

    let (mut module, _, add) = calculator(Vec::new())?;
    module.method_mut(add)?.markers.push(Marker::new("Log"));

    let (runtime, report) = weave(module, registry)?;
    assert_eq!(report.rewritten, vec!["Demo.Calculator::Add(int32,int32)".to_string()]);

    let instance = runtime.construct("Demo.Calculator", &[])?;
    let args = [Value::I4(2), Value::I4(3)];
    let sum = runtime.invoke("Demo.Calculator", "Add", Some(instance), &args)?;
    assert_eq!(sum, Value::I4(5));
    assert_eq!(
        journal.entries(),
        vec!["entering Add(x=2,y=3)".to_string(), "completed Add -> 5".to_string()]
    );

    let wrapper = runtime.module().method(add)?;
    assert!(wrapper.body.as_ref().is_some_and(|body| body.exception_handlers.is_empty()));
    Ok(())
}

#[test]
fn type_markers_cover_every_method() -> Result<()> {
    let journal = Journal::new();
    let registry = InterceptorRegistry::new().with(tracing("Log", &journal));
    let (module, _, _) = calculator(vec![Marker::new("Log")])?;

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_rewritten("Demo.Calculator::Add(int32,int32)"));
    assert!(report.is_rewritten("Demo.Calculator::.ctor()"));

    let instance = runtime.construct("Demo.Calculator", &[])?;
    let args = [Value::I4(2), Value::I4(3)];
    let sum = runtime.invoke("Demo.Calculator", "Add", Some(instance), &args)?;
    assert_eq!(sum, Value::I4(5));
    assert_eq!(journal.count("Log entry Add"), 1);
    assert_eq!(journal.count("Log success I4(5)"), 1);
    assert_eq!(journal.count("Log entry .ctor"), 1);
    Ok(())
}

#[test]
fn broader_scopes_run_first() -> Result<()> {
    let journal = Journal::new();
    let registry = InterceptorRegistry::new()
        .with(tracing("Outer", &journal))
        .with(tracing("Inner", &journal));

    let mut module = Module::new("Ordering");
    module.markers.push(Marker::new("Outer").with_str(ARG_MEMBER_PATTERN, "Run"));
    let owner = ClassBuilder::new("Demo", "Job").build(&mut module)?;
    MethodBuilder::new("Run")
        .static_method()
        .marker(Marker::new("Inner"))
        .implementation(|asm, _| {
            asm.ret()?;
            Ok(())
        })
        .build(&mut module, owner)?;

    let (runtime, _) = weave(module, registry)?;
    runtime.invoke("Demo.Job", "Run", None, &[])?;

    let entries = journal.entries();
    let outer = entries.iter().position(|e| e == "Outer entry Run");
    let inner = entries.iter().position(|e| e == "Inner entry Run");
    assert!(outer.is_some() && inner.is_some());
    assert!(outer < inner);
    Ok(())
}

#[test]
fn cleared_proceed_skips_the_body() -> Result<()> {
    let journal = Journal::new();
    let exits = journal.clone();
    let successes = journal.clone();
    let registry = InterceptorRegistry::new().with(
        InterceptorDescriptor::wrapping("Cache")
            .on_entry(|_, ctx| {
                ctx.proceed = false;
                ctx.returns = Value::I4(42);
                Ok(())
            })
            .on_success(move |_, _| {
                successes.push("success");
                Ok(())
            })
            .on_exit(move |_, _| {
                exits.push("exit");
                Ok(())
            }),
    );

    let (mut module, calc, _) = calculator(Vec::new())?;
    throwing_method(&mut module, calc, "Compute", "never runs")?;
    let compute = module
        .find_method(calc, "Compute", 0)
        .ok_or_else(|| Error::MemberNotFound("Compute".to_string()))?;
    module.method_mut(compute)?.markers.push(Marker::new("Cache"));

    let (runtime, _) = weave(module, registry)?;
    let instance = runtime.construct("Demo.Calculator", &[])?;
    assert_eq!(runtime.invoke("Demo.Calculator", "Compute", Some(instance), &[])?, Value::I4(42));
    assert_eq!(journal.entries(), vec!["exit".to_string()]);
    Ok(())
}

#[test]
fn exceptions_keep_their_identity() -> Result<()> {
    let journal = Journal::new();
    let observed = Arc::new(Mutex::new(None));
    let record = Arc::clone(&observed);
    let exits = journal.clone();
    let registry = InterceptorRegistry::new().with(
        InterceptorDescriptor::wrapping("Guard")
            .on_exception(move |_, ctx| {
                *record.lock().expect("poisoned") = ctx.exception.clone();
                Ok(())
            })
            .on_exit(move |_, _| {
                exits.push("exit");
                Ok(())
            }),
    );

    let (mut module, calc, _) = calculator(Vec::new())?;
    let fail = throwing_method(&mut module, calc, "Fail", "boom")?;
    module.method_mut(fail)?.markers.push(Marker::new("Guard"));

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_rewritten("Demo.Calculator::Fail()"));

    let instance = runtime.construct("Demo.Calculator", &[])?;
    match runtime.invoke("Demo.Calculator", "Fail", Some(instance), &[]) {
        Err(Error::ManagedException {
            object,
            type_name,
            message,
        }) => {
            assert_eq!(type_name, INVALID_OPERATION_TYPE);
            assert_eq!(message, "boom");
            assert_eq!(*observed.lock().expect("poisoned"), Some(Value::Ref(object)));
        }
        other => panic!("expected the original exception, got {other:?}"),
    }
    assert_eq!(journal.count("exit"), 1);
    Ok(())
}

#[test]
fn patterns_limit_the_selection() -> Result<()> {
    let journal = Journal::new();
    let registry = InterceptorRegistry::new().with(tracing("Log", &journal));

    let mut module = Module::new("Patterns");
    module.markers.push(
        Marker::new("Log")
            .with_str(ARG_TYPE_PATTERN, "Demo.ClassA")
            .with_str(ARG_MEMBER_PATTERN, "Get*"),
    );
    for name in ["ClassA", "ClassB"] {
        let owner = ClassBuilder::new("Demo", name).build(&mut module)?;
        default_constructor(&mut module, owner)?;
        for method in ["GetValue", "SetValue"] {
            MethodBuilder::new(method)
                .returns(TypeSig::I4)
                .implementation(|asm, _| {
                    asm.ldc_i4(1)?.ret()?;
                    Ok(())
                })
                .build(&mut module, owner)?;
        }
    }

    let (runtime, report) = weave(module, registry)?;
    assert_eq!(report.rewritten, vec!["Demo.ClassA::GetValue()".to_string()]);

    let a = runtime.construct("Demo.ClassA", &[])?;
    let b = runtime.construct("Demo.ClassB", &[])?;
    runtime.invoke("Demo.ClassA", "GetValue", Some(a.clone()), &[])?;
    runtime.invoke("Demo.ClassA", "SetValue", Some(a), &[])?;
    runtime.invoke("Demo.ClassB", "GetValue", Some(b), &[])?;
    assert_eq!(journal.entries(), vec![
        "Log entry GetValue".to_string(),
        "Log success I4(1)".to_string(),
        "Log exit".to_string()
    ]);
    Ok(())
}

#[test]
fn unmatched_type_pattern_leaves_the_module_alone() -> Result<()> {
    let journal = Journal::new();
    let registry =
        InterceptorRegistry::new().with(tracing("Log", &journal).type_pattern("Other.*"));
    let (module, _, _) = calculator(vec![Marker::new("Log")])?;

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_empty());
    assert!(report.helpers.is_empty());

    let instance = runtime.construct("Demo.Calculator", &[])?;
    runtime.invoke("Demo.Calculator", "Add", Some(instance), &[Value::I4(1), Value::I4(1)])?;
    assert!(journal.entries().is_empty());
    Ok(())
}

#[test]
fn malformed_patterns_abort_the_pass() -> Result<()> {
    let registry = InterceptorRegistry::new().with(tracing("Log", &Journal::new()));
    let broken = Marker::new("Log").with_str(ARG_MEMBER_PATTERN, "regex:(");
    let (module, _, _) = calculator(vec![broken])?;

    assert!(matches!(weave(module, registry), Err(Error::Selection { .. })));
    Ok(())
}

#[test]
fn cleared_proceed_without_a_value_returns_the_default() -> Result<()> {
    let registry = InterceptorRegistry::new().with(
        InterceptorDescriptor::wrapping("Skip").on_entry(|_, ctx| {
            ctx.proceed = false;
            Ok(())
        }),
    );
    let (module, _, _) = calculator(vec![Marker::new("Skip")])?;

    let (runtime, _) = weave(module, registry)?;
    let instance = runtime.construct("Demo.Calculator", &[])?;
    let args = [Value::I4(2), Value::I4(3)];
    let sum = runtime.invoke("Demo.Calculator", "Add", Some(instance), &args)?;
    assert_eq!(sum, Value::I4(0));
    Ok(())
}

#[test]
fn success_hooks_can_replace_the_result() -> Result<()> {
    let registry = InterceptorRegistry::new().with(
        InterceptorDescriptor::wrapping("Override").on_success(|_, ctx| {
            assert_eq!(ctx.returns, Value::I4(5));
            ctx.returns = Value::I4(100);
            Ok(())
        }),
    );
    let (mut module, _, add) = calculator(Vec::new())?;
    module.method_mut(add)?.markers.push(Marker::new("Override"));

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_rewritten("Demo.Calculator::Add(int32,int32)"));
    let instance = runtime.construct("Demo.Calculator", &[])?;
    let args = [Value::I4(2), Value::I4(3)];
    let sum = runtime.invoke("Demo.Calculator", "Add", Some(instance), &args)?;
    assert_eq!(sum, Value::I4(100));
    Ok(())
}

#[test]
fn undecodable_bodies_are_skipped() -> Result<()> {
    let journal = Journal::new();
    let registry = InterceptorRegistry::new().with(tracing("Log", &journal));
    let (mut module, calc, _) = calculator(vec![Marker::new("Log")])?;
    let broken = MethodBuilder::new("Broken")
        .implementation(|asm, _| {
            asm.ret()?;
            Ok(())
        })
        .build(&mut module, calc)?;
    module.replace_body(broken, MethodBody::new(vec![0x24, 0x2A], 1))?;

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_rewritten("Demo.Calculator::Add(int32,int32)"));
    assert!(!report.is_rewritten("Demo.Calculator::Broken()"));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].member, "Demo.Calculator::Broken()");
    assert_eq!(report.skipped[0].reason, SkipReason::Decode);

    let instance = runtime.construct("Demo.Calculator", &[])?;
    let args = [Value::I4(2), Value::I4(3)];
    let sum = runtime.invoke("Demo.Calculator", "Add", Some(instance), &args)?;
    assert_eq!(sum, Value::I4(5));
    assert_eq!(journal.count("Log entry Add"), 1);
    Ok(())
}

#[test]
fn constructors_chain_once_around_the_hooks() -> Result<()> {
    let journal = Journal::new();
    let registry = InterceptorRegistry::new().with(tracing("Log", &journal));

    let mut module = Module::new("Shapes");
    let base = ClassBuilder::new("Demo", "Base").build(&mut module)?;
    let built = module.add_field(FieldDef {
        name: "built".to_string(),
        declaring: base,
        field_type: TypeSig::I4,
        visibility: Visibility::Public,
        flags: FieldFlags::STATIC,
        markers: Vec::new(),
    })?;
    let built = module.field_access_token(built)?;
    let object_ctor = Intrinsic::ObjectCtor.token(&mut module);
    let object_sig = Intrinsic::ObjectCtor.signature();
    let base_ctor = MethodBuilder::constructor()
        .implementation(move |asm, _| {
            asm.ldsfld(built)?.ldc_i4(1)?.add()?.stsfld(built)?;
            asm.ldarg(0)?.call(object_ctor, &object_sig)?.ret()?;
            Ok(())
        })
        .build(&mut module, base)?;
    let base_ctor = module.method_call_token(base_ctor)?;

    let derived = ClassBuilder::new("Demo", "Derived")
        .base(TypeSig::class("Demo.Base"))
        .marker(Marker::new("Log"))
        .build(&mut module)?;
    let mut field = |name: &str, flags: FieldFlags| {
        module.add_field(FieldDef {
            name: name.to_string(),
            declaring: derived,
            field_type: TypeSig::I4,
            visibility: Visibility::Public,
            flags,
            markers: Vec::new(),
        })
    };
    let before = field("before", FieldFlags::STATIC)?;
    let after = field("after", FieldFlags::empty())?;
    let (before, after) = (module.field_access_token(before)?, module.field_access_token(after)?);
    let chain = MethodSig::new_instance(Vec::new(), TypeSig::Void);
    MethodBuilder::constructor()
        .implementation(move |asm, _| {
            asm.ldsfld(before)?.ldc_i4(1)?.add()?.stsfld(before)?;
            asm.ldarg(0)?.call(base_ctor, &chain)?;
            asm.ldarg(0)?.ldc_i4(7)?.stfld(after)?.ret()?;
            Ok(())
        })
        .build(&mut module, derived)?;

    let (runtime, report) = weave(module, registry)?;
    assert!(report.is_rewritten("Demo.Derived::.ctor()"));
    assert!(!report.is_rewritten("Demo.Base::.ctor()"));

    let instance = runtime.construct("Demo.Derived", &[])?;
    assert_eq!(runtime.static_field("Demo.Base", "built")?, Value::I4(1));
    assert_eq!(runtime.static_field("Demo.Derived", "before")?, Value::I4(1));
    assert_eq!(runtime.field(&instance, "after")?, Value::I4(7));
    assert_eq!(journal.count("Log entry .ctor"), 1);
    assert_eq!(journal.count("Log exit"), 1);
    Ok(())
}
