//! Event raise interception.
//!
//! Subscription and unsubscription are intercepted by rewriting the `add_`/`remove_`
//! accessors like any other member. Raising a field-like event has no accessor: the
//! declaring type loads the backing delegate field and calls `Invoke` on it. Such call
//! sites are located in every rewritten body and replaced by a call to a raise helper:
//!
//! ```text
//! void <Owner::Name>raise(Handler handler, T1 a1, .., Tn an, object instance)
//! ```
//!
//! The helper packs the arguments into an `object[]`, lets the `OnInvokeEvent` hooks see
//! and rewrite them through an [`EventContext`](crate::runtime::EventContext), then invokes
//! the handler left in the context with the unpacked arguments, unless a hook cleared
//! `proceed`.

use std::collections::HashMap;

use crate::{
    assembly::{Instruction, Resolved},
    metadata::{
        builders::MethodBuilder,
        member::FieldId,
        module::Module,
        signature::{MethodSig, TypeSig},
    },
    runtime::intrinsics::{Intrinsic, EVENT_CONTEXT_TYPE},
    weaver::{
        body::{field_of, DecodedBody, Redirect},
        emit,
        helper::HelperType,
        selection::EventPlan,
    },
    Error, Result,
};

/// Longest backward walk when tracing the receiver of an `Invoke`
const MAX_TRACE_STEPS: usize = 256;

/// Generate the raise helper of `plan`.
///
/// Returns the backing field the raise sites load, with the helper replacing them.
///
/// # Errors
/// Returns [`Error::Unsupported`] for events without a backing field, with a delegate type
/// outside the module, or whose delegate returns a value.
pub(crate) fn build_raise(
    module: &mut Module,
    helper: &mut HelperType,
    plan: &EventPlan,
) -> Result<(FieldId, Redirect)> {
    let event = module.event(plan.event)?.clone();
    let owner_name = module.type_def(event.declaring)?.fullname();
    let backing = event
        .backing_field
        .ok_or_else(|| Error::Unsupported(format!("event {} has no backing field", event.name)))?;

    let delegate_name = event
        .delegate_type
        .type_name()
        .ok_or_else(|| {
            Error::Unsupported(format!("event {} has no named delegate type", event.name))
        })?;
    let delegate = module
        .type_by_name(delegate_name)
        .ok_or_else(|| {
            Error::Unsupported(format!("delegate type {delegate_name} is not part of the module"))
        })?;
    let invoke = module
        .type_def(delegate)?
        .methods
        .iter()
        .copied()
        .find(|id| module.method(*id).is_ok_and(|m| m.name == "Invoke"))
        .ok_or_else(|| Error::Unsupported(format!("delegate type {delegate_name} has no Invoke")))?;
    let invoke_sig = module.method(invoke)?.signature.clone();
    if !invoke_sig.ret.is_void() {
        return Err(Error::Unsupported(format!(
            "event {} returns {}, only void handlers are raised through hooks",
            event.name, invoke_sig.ret
        )));
    }
    let invoke_token = module.method_call_token(invoke)?;

    let mut params = vec![event.delegate_type.clone()];
    params.extend(invoke_sig.params.iter().cloned());
    params.push(TypeSig::Object);
    let signature = MethodSig::new_static(params, TypeSig::Void);

    let mut builder = MethodBuilder::new(format!("<{owner_name}::{}>raise", event.name))
        .param("handler", event.delegate_type.clone());
    for (i, param) in invoke_sig.params.iter().enumerate() {
        builder = builder.param(format!("arg{i}"), param.clone());
    }
    let applications = plan.applications.clone();
    let delegate_sig = event.delegate_type.clone();
    let arg_count = invoke_sig.params.len();
    let builder = builder.param("instance", TypeSig::Object).implementation(move |asm, module| {
        let count = i32::try_from(arg_count)
            .map_err(|_| Error::Unsupported("too many event arguments".to_string()))?;
        let object_token = module.intern_type(&TypeSig::Object);
        let packed = asm.declare_local(TypeSig::object_array());
        let context = asm.declare_local(TypeSig::class(EVENT_CONTEXT_TYPE));

        asm.ldc_i4(count)?.newarr(object_token)?.stloc(packed)?;
        for (i, param) in invoke_sig.params.iter().enumerate() {
            let slot = u16::try_from(i + 1).unwrap_or(u16::MAX);
            asm.ldloc(packed)?.ldc_i4(i32::try_from(i).unwrap_or(i32::MAX))?;
            emit::load_argument(asm, module, slot, param)?;
            asm.stelem_ref()?;
        }

        asm.ldarg(u16::try_from(arg_count + 1).unwrap_or(u16::MAX))?.ldarg(0)?.ldloc(packed)?;
        emit::new_intrinsic(asm, module, Intrinsic::EventContextInvokeCtor)?;
        asm.stloc(context)?;
        for application in applications.iter().filter(|app| app.usage.invoke_event) {
            emit::call_hook(
                asm,
                module,
                application.class(),
                Intrinsic::AspectOnInvokeEvent,
                context,
            )?;
        }

        let done = asm.label();
        asm.ldloc(context)?;
        emit::call_intrinsic(asm, module, Intrinsic::EventContextGetProceed)?;
        asm.brfalse(&done)?;

        asm.ldloc(context)?;
        emit::call_intrinsic(asm, module, Intrinsic::EventContextGetHandler)?;
        emit::unbox_to(asm, module, &delegate_sig)?;
        asm.ldloc(context)?;
        emit::call_intrinsic(asm, module, Intrinsic::EventContextGetArguments)?;
        asm.stloc(packed)?;
        for (i, param) in invoke_sig.params.iter().enumerate() {
            asm.ldloc(packed)?.ldc_i4(i32::try_from(i).unwrap_or(i32::MAX))?.ldelem_ref()?;
            emit::unbox_to(asm, module, param.strip_by_ref())?;
        }
        asm.callvirt(invoke_token, &invoke_sig)?;
        asm.mark(&done)?.ret()?;
        Ok(())
    });

    let method = helper.add_method(module, builder)?;
    let redirect = Redirect {
        token: module.method_call_token(method)?,
        signature,
    };
    log::trace!("raise helper for {owner_name}::{}", event.name);
    Ok((backing, redirect))
}

/// Calls in `body` that invoke a delegate loaded from one of the `backing` fields.
///
/// Maps the index of each `Invoke` call to the field its receiver was loaded from. The
/// receiver is traced backwards through the stack, across `dup`, through locals and along
/// the single branch into a join point. Receivers that cannot be traced are left alone.
pub(crate) fn raise_sites<V>(
    module: &Module,
    body: &DecodedBody,
    backing: &HashMap<FieldId, V>,
) -> HashMap<usize, FieldId> {
    let mut sites = HashMap::new();
    if backing.is_empty() {
        return sites;
    }

    for (index, instruction) in body.instructions.iter().enumerate() {
        let Some(params) = delegate_invoke(module, instruction) else {
            continue;
        };
        let Some(producer) = producer(body, index, params) else {
            continue;
        };
        let loaded = &body.instructions[producer];
        if matches!(loaded.mnemonic, "ldfld" | "ldsfld") {
            if let Some(field) = field_of(loaded).filter(|field| backing.contains_key(field)) {
                sites.insert(index, field);
            }
        }
    }
    sites
}

/// Parameter count of a call to `Invoke` on a delegate type of the module
fn delegate_invoke(module: &Module, instruction: &Instruction) -> Option<usize> {
    if !matches!(instruction.mnemonic, "call" | "callvirt") {
        return None;
    }
    let method = instruction.resolved.as_ref().and_then(Resolved::as_method)?;
    if method.name != "Invoke" {
        return None;
    }
    let def = module.method(method.def?).ok()?;
    module
        .type_def(def.declaring)
        .ok()?
        .is_delegate()
        .then_some(method.signature.params.len())
}

/// Values popped and pushed by an instruction
fn stack_effect(instruction: &Instruction) -> (usize, usize) {
    let method = instruction.resolved.as_ref().and_then(Resolved::as_method);
    match (instruction.mnemonic, method) {
        ("call" | "callvirt", Some(method)) => (
            usize::from(method.signature.call_pops()),
            usize::from(method.signature.call_pushes()),
        ),
        ("newobj", Some(method)) => (method.signature.params.len(), 1),
        _ => (
            usize::from(instruction.stack_behavior.pops),
            usize::from(instruction.stack_behavior.pushes),
        ),
    }
}

/// Instruction control reaches `index` from when walking backwards
fn predecessor(body: &DecodedBody, index: usize) -> Option<usize> {
    let previous = index.checked_sub(1)?;
    if !body.instructions[previous].is_terminal() {
        return Some(previous);
    }

    let offset = body.instructions[index].offset;
    let mut sources = body
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, instruction)| instruction.branch_targets.contains(&offset))
        .map(|(source, _)| source);
    match (sources.next(), sources.next()) {
        (Some(source), None) => Some(source),
        _ => None,
    }
}

/// Instruction that pushed the value `depth` slots below the top of the stack as it is
/// right before `index`
pub(crate) fn producer(body: &DecodedBody, mut index: usize, mut depth: usize) -> Option<usize> {
    for _ in 0..MAX_TRACE_STEPS {
        let previous = predecessor(body, index)?;
        let instruction = &body.instructions[previous];
        let (pops, pushes) = stack_effect(instruction);

        if depth >= pushes {
            depth = depth - pushes + pops;
            index = previous;
            continue;
        }

        if instruction.mnemonic == "dup" {
            index = previous;
            depth = 0;
            continue;
        }
        let mnemonic = instruction.mnemonic;
        let loads_local = mnemonic.starts_with("ldloc") && !mnemonic.starts_with("ldloca");
        if let Some(local) = instruction.local_index().filter(|_| loads_local) {
            index = body.instructions[..previous]
                .iter()
                .rposition(|i| i.mnemonic.starts_with("stloc") && i.local_index() == Some(local))?;
            depth = 0;
            continue;
        }
        return Some(previous);
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::{
            builders::{delegate_type, event_field, ClassBuilder},
            marker::{Marker, MarkerScope},
            member::{EventId, MethodId, TypeId},
        },
        weaver::{
            config::WeaveConfig, descriptor::InterceptorDescriptor, selection::Application,
            usage::HookUsage,
        },
    };

    struct Fixture {
        module: Module,
        publisher: TypeId,
        event: EventId,
        backing: FieldId,
    }

    fn fixture() -> Result<Fixture> {
        let mut module = Module::new("Test");
        delegate_type(
            &mut module,
            "Demo",
            "Notify",
            MethodSig::new_instance(vec![TypeSig::String], TypeSig::Void),
        )?;
        let publisher = ClassBuilder::new("Demo", "Publisher").build(&mut module)?;
        let event = event_field(
            &mut module,
            publisher,
            "Changed",
            TypeSig::class("Demo.Notify"),
            Vec::new(),
        )?;
        let backing = module
            .event(event)?
            .backing_field
            .ok_or_else(|| Error::Error("no backing field".to_string()))?;
        Ok(Fixture {
            module,
            publisher,
            event,
            backing,
        })
    }

    fn invoke_token(module: &mut Module) -> Result<(crate::metadata::token::Token, MethodSig)> {
        let notify = module
            .method_by_key("Demo.Notify::Invoke(string)")
            .ok_or_else(|| Error::Error("no Invoke".to_string()))?;
        let sig = module.method(notify)?.signature.clone();
        Ok((module.method_call_token(notify)?, sig))
    }

    /// `var h = Changed; if (h != null) h(message);`
    fn raise_through_local(fixture: &mut Fixture) -> Result<MethodId> {
        let field = fixture.module.field_access_token(fixture.backing)?;
        let (invoke, sig) = invoke_token(&mut fixture.module)?;
        MethodBuilder::new("Raise")
            .param("message", TypeSig::String)
            .implementation(move |asm, _| {
                let handler = asm.declare_local(TypeSig::class("Demo.Notify"));
                let done = asm.label();
                asm.ldarg(0)?.ldfld(field)?.stloc(handler)?;
                asm.ldloc(handler)?.brfalse(&done)?;
                asm.ldloc(handler)?.ldarg(1)?.callvirt(invoke, &sig)?;
                asm.mark(&done)?.ret()?;
                Ok(())
            })
            .build(&mut fixture.module, fixture.publisher)
    }

    /// `Changed?.Invoke(message);`
    fn raise_through_dup(fixture: &mut Fixture) -> Result<MethodId> {
        let field = fixture.module.field_access_token(fixture.backing)?;
        let (invoke, sig) = invoke_token(&mut fixture.module)?;
        MethodBuilder::new("RaiseShort")
            .param("message", TypeSig::String)
            .implementation(move |asm, _| {
                let present = asm.label();
                asm.ldarg(0)?.ldfld(field)?.dup()?.brtrue(&present)?;
                asm.pop()?.ret()?;
                asm.mark(&present)?.ldarg(1)?.callvirt(invoke, &sig)?.ret()?;
                Ok(())
            })
            .build(&mut fixture.module, fixture.publisher)
    }

    #[test]
    fn raise_sites_are_traced_to_the_backing_field() -> Result<()> {
        let mut fixture = fixture()?;
        let through_local = raise_through_local(&mut fixture)?;
        let through_dup = raise_through_dup(&mut fixture)?;
        let backing = HashMap::from([(fixture.backing, ())]);

        for method in [through_local, through_dup] {
            let body = DecodedBody::decode(&fixture.module, method)?;
            let sites = raise_sites(&fixture.module, &body, &backing);
            assert_eq!(sites.len(), 1);
            let (&index, &field) = sites
                .iter()
                .next()
                .ok_or_else(|| Error::Error("no raise site".to_string()))?;
            assert_eq!(body.instructions[index].mnemonic, "callvirt");
            assert_eq!(field, fixture.backing);
        }
        Ok(())
    }

    #[test]
    fn unrelated_invokes_are_ignored() -> Result<()> {
        let mut fixture = fixture()?;
        let method = raise_through_local(&mut fixture)?;
        let body = DecodedBody::decode(&fixture.module, method)?;
        let other: HashMap<FieldId, ()> = HashMap::from([(FieldId(usize::MAX), ())]);
        assert!(raise_sites(&fixture.module, &body, &other).is_empty());
        Ok(())
    }

    #[test]
    fn raise_helper_signature() -> Result<()> {
        let mut fixture = fixture()?;
        let descriptor = InterceptorDescriptor::wrapping("Trace").on_invoke_event(|_, _| Ok(()));
        let plan = EventPlan {
            event: fixture.event,
            applications: vec![Application {
                usage: HookUsage::of(&descriptor),
                descriptor: Arc::new(descriptor),
                marker: Marker::new("Trace"),
                scope: MarkerScope::Member,
                param: None,
            }],
        };

        let mut helper = HelperType::new(&WeaveConfig::default());
        let (backing, redirect) = build_raise(&mut fixture.module, &mut helper, &plan)?;
        assert_eq!(backing, fixture.backing);
        assert_eq!(
            redirect.signature.params,
            vec![TypeSig::class("Demo.Notify"), TypeSig::String, TypeSig::Object]
        );
        assert_eq!(helper.finish(&mut fixture.module)?, vec!["<Demo.Publisher::Changed>raise"]);
        Ok(())
    }
}
