//! Field access interception.
//!
//! Each intercepted field gets a read helper and/or a write helper in the helper type. The
//! body cloner replaces `ldfld`/`ldsfld` and `stfld`/`stsfld` of the field by calls to
//! them, in every rewritten body. The helpers keep the stack shape of the instruction they
//! replace:
//!
//! ```text
//! instance field:  T    <Owner::name>get(Owner instance)
//!                  void <Owner::name>set(Owner instance, T value)
//! static field:    T    <Owner::name>get()
//!                  void <Owner::name>set(T value)
//! ```
//!
//! A helper builds a [`MemberContext`](crate::runtime::MemberContext) around the value,
//! runs the interceptors' `OnGetValue` / `OnSetValue` hooks and continues with whatever
//! value the hooks left in the context. Fields the helper type cannot see are accessed
//! through trampolines.

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        builders::MethodBuilder,
        member::{FieldId, Visibility},
        module::Module,
        signature::{MethodSig, TypeSig},
        token::Token,
    },
    runtime::intrinsics::{Intrinsic, MEMBER_CONTEXT_TYPE},
    weaver::{
        body::Redirect,
        emit,
        helper::HelperType,
        selection::{Application, FieldPlan},
        trampoline::{Direction, Trampoline, Trampolines},
    },
    Error, Result,
};

/// Construct a member context and store it in a new local.
///
/// `load_value` must push the value as `object`.
pub(crate) fn new_member_context<F>(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    has_instance: bool,
    name: &str,
    is_property: bool,
    load_value: F,
) -> Result<u16>
where
    F: FnOnce(&mut InstructionAssembler, &mut Module) -> Result<()>,
{
    let context = asm.declare_local(TypeSig::class(MEMBER_CONTEXT_TYPE));
    emit::load_instance(asm, has_instance)?;
    emit::load_string(asm, module, name)?;
    load_value(asm, module)?;
    asm.ldc_i4(i32::from(is_property))?;
    emit::new_intrinsic(asm, module, Intrinsic::MemberContextCtor)?;
    asm.stloc(context)?;
    Ok(context)
}

/// Call `hook` of every application for which `selects` holds
pub(crate) fn call_member_hooks(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    applications: &[Application],
    selects: impl Fn(&Application) -> bool,
    hook: Intrinsic,
    context: u16,
) -> Result<()> {
    for application in applications.iter().filter(|app| selects(app)) {
        emit::call_hook(asm, module, application.class(), hook, context)?;
    }
    Ok(())
}

/// How a helper reaches the field
#[derive(Clone, Copy)]
enum Access {
    Direct(Token),
    Trampoline(Trampoline),
}

/// The redirections generated for one field
#[derive(Debug, Default)]
pub(crate) struct FieldHelpers {
    pub(crate) read: Option<Redirect>,
    pub(crate) write: Option<Redirect>,
}

/// Generate the access helpers of `plan`.
///
/// # Errors
/// Returns [`Error::Unsupported`] for fields of generic types and of value types, whose
/// accesses cannot be forwarded by a helper taking the owner by value.
pub(crate) fn build(
    module: &mut Module,
    helper: &mut HelperType,
    trampolines: &mut Trampolines,
    plan: &FieldPlan,
) -> Result<FieldHelpers> {
    let field = module.field(plan.field)?.clone();
    let owner = module.type_def(field.declaring)?;
    if owner.is_generic() {
        return Err(Error::Unsupported(format!("field {} of generic type", field.name)));
    }
    if owner.is_value_type() {
        return Err(Error::Unsupported(format!("field {} of value type", field.name)));
    }
    let owner_sig = owner.self_sig();
    let owner_name = owner.fullname();
    let has_instance = !field.is_static();

    let reads = plan.applications.iter().any(|app| app.usage.get_value);
    let writes = plan.applications.iter().any(|app| app.usage.set_value);
    let direct = !matches!(field.visibility, Visibility::Private | Visibility::Family);

    let mut helpers = FieldHelpers::default();
    if reads {
        let access = access(module, helper, trampolines, plan.field, direct, Direction::Get)?;
        let mut params = Vec::new();
        if has_instance {
            params.push(owner_sig.clone());
        }
        let signature = MethodSig::new_static(params, field.field_type.clone());

        let name = field.name.clone();
        let field_type = field.field_type.clone();
        let applications = plan.applications.clone();
        let mut builder = MethodBuilder::new(format!("<{owner_name}::{}>get", field.name))
            .returns(field_type.clone());
        if has_instance {
            builder = builder.param("instance", owner_sig.clone());
        }
        let builder = builder.implementation(move |asm, module| {
            let current = asm.declare_local(TypeSig::Object);
            read_field(asm, module, access, has_instance, &field_type)?;
            asm.stloc(current)?;

            let context = new_member_context(asm, module, has_instance, &name, false, |asm, _| {
                asm.ldloc(current)?;
                Ok(())
            })?;
            call_member_hooks(
                asm,
                module,
                &applications,
                |app| app.usage.get_value,
                Intrinsic::AspectOnGetValue,
                context,
            )?;
            asm.ldloc(context)?;
            emit::call_intrinsic(asm, module, Intrinsic::MemberContextGetValue)?;
            emit::unbox_to(asm, module, &field_type)?;
            asm.ret()?;
            Ok(())
        });
        let method = helper.add_method(module, builder)?;
        helpers.read = Some(Redirect {
            token: module.method_call_token(method)?,
            signature,
        });
    }

    if writes {
        let access = access(module, helper, trampolines, plan.field, direct, Direction::Set)?;
        let mut params = Vec::new();
        if has_instance {
            params.push(owner_sig.clone());
        }
        params.push(field.field_type.clone());
        let signature = MethodSig::new_static(params, TypeSig::Void);

        let name = field.name.clone();
        let field_type = field.field_type.clone();
        let applications = plan.applications.clone();
        let value_slot = u16::from(has_instance);
        let mut builder = MethodBuilder::new(format!("<{owner_name}::{}>set", field.name));
        if has_instance {
            builder = builder.param("instance", owner_sig.clone());
        }
        let builder = builder
            .param("value", field.field_type.clone())
            .implementation(move |asm, module| {
                let context =
                    new_member_context(asm, module, has_instance, &name, false, |asm, module| {
                        asm.ldarg(value_slot)?;
                        emit::box_if_needed(asm, module, &field_type)
                    })?;
                call_member_hooks(
                    asm,
                    module,
                    &applications,
                    |app| app.usage.set_value,
                    Intrinsic::AspectOnSetValue,
                    context,
                )?;

                let done = asm.label();
                asm.ldloc(context)?;
                emit::call_intrinsic(asm, module, Intrinsic::MemberContextGetContinue)?;
                asm.brfalse(&done)?;
                write_field(asm, module, access, has_instance, &field_type, context)?;
                asm.mark(&done)?.ret()?;
                Ok(())
            });
        let method = helper.add_method(module, builder)?;
        helpers.write = Some(Redirect {
            token: module.method_call_token(method)?,
            signature,
        });
    }

    log::trace!(
        "field helpers for {owner_name}::{} (read: {reads}, write: {writes}, direct: {direct})",
        field.name
    );
    Ok(helpers)
}

fn access(
    module: &mut Module,
    helper: &mut HelperType,
    trampolines: &mut Trampolines,
    field: FieldId,
    direct: bool,
    direction: Direction,
) -> Result<Access> {
    if direct {
        Ok(Access::Direct(module.field_access_token(field)?))
    } else {
        Ok(Access::Trampoline(trampolines.field(module, helper, field, direction)?))
    }
}

/// Push the current value of the field as `object`
fn read_field(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    access: Access,
    has_instance: bool,
    field_type: &TypeSig,
) -> Result<()> {
    match access {
        Access::Direct(token) => {
            if has_instance {
                asm.ldarg(0)?.ldfld(token)?;
            } else {
                asm.ldsfld(token)?;
            }
            emit::box_if_needed(asm, module, field_type)
        }
        Access::Trampoline(trampoline) => {
            trampoline.load_delegate(asm, module)?;
            emit::load_instance(asm, has_instance)?;
            trampoline.invoke(asm, module)
        }
    }
}

/// Store the value held by the member context into the field
fn write_field(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    access: Access,
    has_instance: bool,
    field_type: &TypeSig,
    context: u16,
) -> Result<()> {
    match access {
        Access::Direct(token) => {
            if has_instance {
                asm.ldarg(0)?;
            }
            asm.ldloc(context)?;
            emit::call_intrinsic(asm, module, Intrinsic::MemberContextGetValue)?;
            emit::unbox_to(asm, module, field_type)?;
            if has_instance {
                asm.stfld(token)?;
            } else {
                asm.stsfld(token)?;
            }
        }
        Access::Trampoline(trampoline) => {
            trampoline.load_delegate(asm, module)?;
            emit::load_instance(asm, has_instance)?;
            asm.ldloc(context)?;
            emit::call_intrinsic(asm, module, Intrinsic::MemberContextGetValue)?;
            trampoline.invoke(asm, module)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::{
            builders::ClassBuilder,
            marker::{Marker, MarkerScope},
            member::{FieldDef, FieldFlags},
        },
        weaver::{config::WeaveConfig, descriptor::InterceptorDescriptor, usage::HookUsage},
    };

    fn plan(field: FieldId, descriptor: InterceptorDescriptor) -> FieldPlan {
        let usage = HookUsage::of(&descriptor);
        let class = descriptor.class.clone();
        FieldPlan {
            field,
            applications: vec![Application {
                descriptor: Arc::new(descriptor),
                usage,
                marker: Marker::new(class),
                scope: MarkerScope::Member,
                param: None,
            }],
        }
    }

    fn add_field(
        module: &mut Module,
        declaring: crate::metadata::member::TypeId,
        name: &str,
        visibility: Visibility,
    ) -> Result<FieldId> {
        module.add_field(FieldDef {
            name: name.to_string(),
            declaring,
            field_type: TypeSig::I4,
            visibility,
            flags: FieldFlags::empty(),
            markers: Vec::new(),
        })
    }

    #[test]
    fn helpers_follow_the_hooks_present() -> Result<()> {
        let mut module = Module::new("Test");
        let account = ClassBuilder::new("Demo", "Account").build(&mut module)?;
        let balance = add_field(&mut module, account, "Balance", Visibility::Public)?;

        let mut helper = HelperType::new(&WeaveConfig::default());
        let mut trampolines = Trampolines::new();
        let reads_only = InterceptorDescriptor::wrapping("Audit").on_get_value(|_, _| Ok(()));
        let helpers = build(
            &mut module,
            &mut helper,
            &mut trampolines,
            &plan(balance, reads_only),
        )?;

        assert!(helpers.write.is_none());
        let read = helpers.read.as_ref().map(|r| r.signature.clone());
        assert_eq!(
            read,
            Some(MethodSig::new_static(vec![TypeSig::class("Demo.Account")], TypeSig::I4))
        );
        assert_eq!(trampolines.len(), 0);
        assert_eq!(helper.finish(&mut module)?, vec!["<Demo.Account::Balance>get"]);
        Ok(())
    }

    #[test]
    fn private_fields_go_through_trampolines() -> Result<()> {
        let mut module = Module::new("Test");
        let account = ClassBuilder::new("Demo", "Account").build(&mut module)?;
        let secret = add_field(&mut module, account, "secret", Visibility::Private)?;

        let mut helper = HelperType::new(&WeaveConfig::default());
        let mut trampolines = Trampolines::new();
        let both = InterceptorDescriptor::wrapping("Audit")
            .on_get_value(|_, _| Ok(()))
            .on_set_value(|_, _| Ok(()));
        let helpers = build(&mut module, &mut helper, &mut trampolines, &plan(secret, both))?;

        assert!(helpers.read.is_some() && helpers.write.is_some());
        assert_eq!(trampolines.len(), 2);
        assert!(module.find_method(account, "<secret>get$trampoline", 1).is_some());
        assert!(module.find_method(account, "<secret>set$trampoline", 2).is_some());
        Ok(())
    }

    #[test]
    fn value_type_owners_are_unsupported() -> Result<()> {
        let mut module = Module::new("Test");
        let point = ClassBuilder::new("Demo", "Point")
            .flags(crate::metadata::typedef::TypeFlags::VALUE_TYPE)
            .build(&mut module)?;
        let x = add_field(&mut module, point, "X", Visibility::Public)?;

        let mut helper = HelperType::new(&WeaveConfig::default());
        let descriptor = InterceptorDescriptor::wrapping("Audit").on_get_value(|_, _| Ok(()));
        let result = build(&mut module, &mut helper, &mut Trampolines::new(), &plan(x, descriptor));
        assert!(matches!(result, Err(Error::Unsupported(_))));
        Ok(())
    }
}
