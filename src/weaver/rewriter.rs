//! The method body rewriter.
//!
//! A selected member keeps its slot, name and signature, but its body is replaced. The
//! original instructions move into a *shadow* member next to it, and the new body calls
//! the shadow between the interceptor hooks:
//!
//! ```text
//! <chaining call>                     constructors only, stays first
//! <begin fragments>                   inline interceptors, raw arguments
//! ctx = new MethodContext             only if a wrapping interceptor applies
//! <entry hooks>
//! if (!ctx.Proceed) { result = ctx.Returns ?? default; <exit hooks>; goto end; }
//! try {
//!     result = <accessor hooks around> shadow(args)
//!     ctx.Returns = result; <success hooks>; result = ctx.Returns ?? result
//! } catch (object e) {
//!     ctx.Exception = e; <exception hooks>; rethrow;
//! } finally {
//!     <exit hooks>
//! }
//! end:
//! <end fragments>
//! return result;
//! ```
//!
//! Only the parts some applied interceptor needs are emitted: the context slots follow the
//! union of the interceptors' [`ContextUsage`], and the exception region exists only if an
//! exit or exception hook does.
//!
//! Bodies of unmarked members are re-emitted as well when they access intercepted fields
//! or raise intercepted events (see [`redirect_only`]).

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        member::{MethodDef, MethodFlags, MethodId, ParamDef},
        module::Module,
        signature::TypeSig,
        token::Token,
    },
    runtime::intrinsics::{Intrinsic, EVENT_CONTEXT_TYPE, METHOD_CONTEXT_TYPE},
    weaver::{
        body::{BodyCloner, DecodedBody, Redirects},
        config::WeaveConfig,
        descriptor::{ContextUsage, Fragment, FragmentFn},
        emit, events,
        fields::{call_member_hooks, new_member_context},
        helper::HelperType,
        selection::{AccessorRole, Application, MethodPlan},
        usage::HookUsage,
    },
    Error, Result,
};

/// Rewrite the member of `plan` and return its shadow.
///
/// # Errors
/// Returns [`Error::Unsupported`] for generic methods and constructs the cloner cannot
/// re-emit, and decode errors for bodies that cannot be read. The module is unchanged
/// unless the shadow was already added when emission of the new body failed.
pub(crate) fn rewrite(
    module: &mut Module,
    helper: &mut HelperType,
    config: &WeaveConfig,
    redirects: &Redirects,
    plan: &MethodPlan,
) -> Result<MethodId> {
    let def = module.method(plan.method)?.clone();
    if def.is_generic() {
        return Err(Error::Unsupported(format!("generic method {}", def.name)));
    }
    let has_this = def.signature.has_this;

    let body = DecodedBody::decode(module, plan.method)?;
    let sites = events::raise_sites(module, &body, &redirects.raises);
    let cloner = BodyCloner::new(&body, sites);
    let split = if def.is_constructor() {
        body.chaining_call(module, plan.method)?.map_or(0, |index| index + 1)
    } else {
        0
    };
    let all = 0..body.instructions.len();

    let mut shadow_asm = InstructionAssembler::with_locals(body.locals.clone());
    cloner.emit(&mut shadow_asm, module, redirects, split..all.end, has_this)?;
    cloner.emit_handlers(&mut shadow_asm, split..all.end)?;
    let shadow_body = shadow_asm.finish()?;

    // The chaining call and what precedes it stay in the member itself.
    let mut asm = if split > 0 {
        InstructionAssembler::with_locals(body.locals.clone())
    } else {
        InstructionAssembler::new()
    };
    cloner.emit(&mut asm, module, redirects, 0..split, has_this)?;
    cloner.emit_handlers(&mut asm, 0..split)?;

    let shadow = module.add_method(MethodDef {
        name: config.shadow_name(&def.name),
        declaring: def.declaring,
        visibility: def.visibility.raised(),
        flags: def.flags.difference(
            MethodFlags::VIRTUAL
                | MethodFlags::ABSTRACT
                | MethodFlags::SPECIAL_NAME
                | MethodFlags::RT_SPECIAL_NAME,
        ) | MethodFlags::COMPILER_GENERATED,
        signature: def.signature.clone(),
        params: def
            .params
            .iter()
            .map(|param| ParamDef {
                markers: Vec::new(),
                ..param.clone()
            })
            .collect(),
        generic_params: Vec::new(),
        body: Some(shadow_body),
        markers: Vec::new(),
    })?;
    let shadow_token = module.method_call_token(shadow)?;

    let wrapper = Wrapper {
        asm,
        module: &mut *module,
        helper: &mut *helper,
        plan,
        def,
        shadow: shadow_token,
        result: None,
        context: None,
    };
    let new_body = wrapper.emit()?;
    module.replace_body(plan.method, new_body)?;
    Ok(shadow)
}

/// Re-emit the body of an unmarked member with field and event redirections applied.
///
/// Returns `false`, leaving the member untouched, if nothing in it is redirected.
///
/// # Errors
/// Returns decode errors for unreadable bodies and [`Error::Unsupported`] for constructs
/// the cloner cannot re-emit.
pub(crate) fn redirect_only(
    module: &mut Module,
    redirects: &Redirects,
    method: MethodId,
) -> Result<bool> {
    let has_this = module.method(method)?.signature.has_this;
    let body = DecodedBody::decode(module, method)?;
    let sites = events::raise_sites(module, &body, &redirects.raises);
    let cloner = BodyCloner::new(&body, sites);
    if !cloner.redirects_anything(redirects) {
        return Ok(false);
    }

    let all = 0..body.instructions.len();
    let mut asm = InstructionAssembler::with_locals(body.locals.clone());
    cloner.emit(&mut asm, module, redirects, all.clone(), has_this)?;
    cloner.emit_handlers(&mut asm, all)?;
    module.replace_body(method, asm.finish()?)?;
    Ok(true)
}

/// Emission state of one new member body
struct Wrapper<'a> {
    asm: InstructionAssembler,
    module: &'a mut Module,
    helper: &'a mut HelperType,
    plan: &'a MethodPlan,
    def: MethodDef,
    shadow: Token,
    result: Option<u16>,
    context: Option<u16>,
}

impl Wrapper<'_> {
    fn emit(mut self) -> Result<crate::metadata::method::MethodBody> {
        let returns = self.def.signature.ret.clone();
        if !returns.is_void() {
            self.result = Some(self.asm.declare_local(returns.clone()));
        }

        self.fragments(|usage| usage.begin, |app| app.descriptor.begin.clone())?;

        let plan = self.plan;
        let wrapping: Vec<&Application> =
            plan.applications.iter().filter(|app| app.usage.wraps()).collect();
        let usage = wrapping
            .iter()
            .fold(ContextUsage::empty(), |usage, app| usage | app.usage.context);
        let any = |f: fn(&HookUsage) -> bool| wrapping.iter().any(|app| f(&app.usage));
        let (exits, exceptions, successes) =
            (any(|u| u.exit), any(|u| u.exception), any(|u| u.success));

        let end = self.asm.label();
        if !wrapping.is_empty() {
            self.create_context(usage)?;
            self.method_hooks(|u| u.entry, Intrinsic::AspectOnEntry)?;
        }

        if usage.contains(ContextUsage::PROCEED) {
            let run = self.asm.label();
            let context = self.context_local()?;
            self.asm.ldloc(context)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextGetProceed)?;
            self.asm.brtrue(&run)?;
            if let Some(result) = self.result {
                self.returns_or_default(context, result, &returns)?;
            }
            self.method_hooks(|u| u.exit, Intrinsic::AspectOnExit)?;
            self.asm.br(&end)?;
            self.asm.mark(&run)?;
        }

        if exits || exceptions {
            let object = self.module.intern_type(&TypeSig::Object);
            let try_start = self.asm.label();
            let catch_start = self.asm.label();
            let finally_start = self.asm.label();
            let handlers_end = self.asm.label();

            self.asm.mark(&try_start)?;
            self.invoke_core()?;
            self.success(usage, successes, &returns)?;
            self.asm.leave(&end)?;

            if exceptions {
                let context = self.context_local()?;
                let exception = self.asm.declare_local(TypeSig::Object);
                self.asm.mark_catch(&catch_start)?.stloc(exception)?;
                self.asm.ldloc(context)?.ldloc(exception)?;
                emit::call_intrinsic(
                    &mut self.asm,
                    self.module,
                    Intrinsic::MethodContextSetException,
                )?;
                self.method_hooks(|u| u.exception, Intrinsic::AspectOnException)?;
                self.asm.rethrow()?;
                let catch_end = if exits { &finally_start } else { &handlers_end };
                self.asm.add_catch(&try_start, &catch_start, &catch_start, catch_end, object);
            }
            if exits {
                self.asm.mark(&finally_start)?;
                self.method_hooks(|u| u.exit, Intrinsic::AspectOnExit)?;
                self.asm.endfinally()?;
                // The protected range includes the catch handler.
                self.asm.add_finally(&try_start, &finally_start, &finally_start, &handlers_end);
            }
            self.asm.mark(&handlers_end)?;
        } else {
            self.invoke_core()?;
            self.success(usage, successes, &returns)?;
        }

        self.asm.mark(&end)?;
        self.fragments(|usage| usage.end, |app| app.descriptor.end.clone())?;
        if let Some(result) = self.result {
            self.asm.ldloc(result)?;
        }
        self.asm.ret()?;
        self.asm.finish()
    }

    fn context_local(&self) -> Result<u16> {
        self.context
            .ok_or_else(|| Error::Error("method context used before it was created".to_string()))
    }

    /// Run the begin or end fragments in application order
    fn fragments(
        &mut self,
        present: fn(&HookUsage) -> bool,
        fragment_of: fn(&Application) -> Option<FragmentFn>,
    ) -> Result<()> {
        let plan = self.plan;
        for app in plan.applications.iter().filter(|app| present(&app.usage)) {
            let Some(fragment) = fragment_of(app) else {
                continue;
            };
            fragment(&mut Fragment {
                asm: &mut self.asm,
                module: &mut *self.module,
                method: self.plan.method,
                param: app.param,
                marker: &app.marker,
                class: app.class(),
            })?;
        }
        Ok(())
    }

    fn create_context(&mut self, usage: ContextUsage) -> Result<()> {
        let context = self.asm.declare_local(TypeSig::class(METHOD_CONTEXT_TYPE));
        emit::new_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextCtor)?;
        self.asm.stloc(context)?;
        self.context = Some(context);

        if usage.contains(ContextUsage::METHOD) {
            let key = self.module.method_key(self.plan.method)?;
            let identity = self.helper.identity(self.module, &key)?;
            self.asm.ldloc(context)?.ldsfld(identity)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextSetMethod)?;
        }
        if usage.contains(ContextUsage::INSTANCE) && self.def.signature.has_this {
            self.asm.ldloc(context)?.ldarg(0)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextSetInstance)?;
        }
        if usage.contains(ContextUsage::ARGUMENTS) {
            for (index, param_type) in self.def.signature.params.iter().enumerate() {
                let param = self.def.params.get(index);
                if param.is_some_and(|param| param.is_out) {
                    continue;
                }
                let name = param.map_or_else(|| format!("arg{index}"), |param| param.name.clone());
                self.asm.ldloc(context)?;
                emit::load_string(&mut self.asm, self.module, &name)?;
                self.asm.ldc_i4(i32::from(param_type.is_by_ref()))?;
                let slot = self.def.arg_slot(index);
                emit::load_argument(&mut self.asm, self.module, slot, param_type)?;
                emit::call_intrinsic(
                    &mut self.asm,
                    self.module,
                    Intrinsic::MethodContextAddArgument,
                )?;
            }
        }
        Ok(())
    }

    fn method_hooks(&mut self, present: fn(&HookUsage) -> bool, hook: Intrinsic) -> Result<()> {
        let Some(context) = self.context else {
            return Ok(());
        };
        let plan = self.plan;
        for app in plan.applications.iter().filter(|app| app.usage.wraps() && present(&app.usage)) {
            emit::call_hook(&mut self.asm, self.module, app.class(), hook, context)?;
        }
        Ok(())
    }

    /// `result = ctx.Returns` if a hook set it, the default of the return type otherwise
    fn returns_or_default(&mut self, context: u16, result: u16, returns: &TypeSig) -> Result<()> {
        let use_default = self.asm.label();
        let assigned = self.asm.label();
        self.asm.ldloc(context)?;
        emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextGetReturns)?;
        self.asm.brfalse(&use_default)?;
        self.asm.ldloc(context)?;
        emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextGetReturns)?;
        emit::unbox_to(&mut self.asm, self.module, returns)?;
        self.asm.stloc(result)?.br(&assigned)?;
        self.asm.mark(&use_default)?;
        emit::load_default(&mut self.asm, self.module, returns)?;
        self.asm.stloc(result)?;
        self.asm.mark(&assigned)?;
        Ok(())
    }

    /// Capture the result, run the success hooks and pick up an override of the result
    fn success(&mut self, usage: ContextUsage, successes: bool, returns: &TypeSig) -> Result<()> {
        let capture = usage.contains(ContextUsage::RETURNS);
        if let (true, Some(result), Some(context)) = (capture, self.result, self.context) {
            self.asm.ldloc(context)?.ldloc(result)?;
            emit::box_if_needed(&mut self.asm, self.module, returns)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextSetReturns)?;
        }
        self.method_hooks(|u| u.success, Intrinsic::AspectOnSuccess)?;
        if let (true, true, Some(result), Some(context)) =
            (capture, successes, self.result, self.context)
        {
            let keep = self.asm.label();
            self.asm.ldloc(context)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextGetReturns)?;
            self.asm.brfalse(&keep)?;
            self.asm.ldloc(context)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MethodContextGetReturns)?;
            emit::unbox_to(&mut self.asm, self.module, returns)?;
            self.asm.stloc(result)?;
            self.asm.mark(&keep)?;
        }
        Ok(())
    }

    /// Call the shadow, wrapped in the accessor hooks of the member's role
    fn invoke_core(&mut self) -> Result<()> {
        let plan = self.plan;
        let applications = plan.applications.as_slice();
        let has = |f: fn(&HookUsage) -> bool| applications.iter().any(|app| f(&app.usage));
        let has_this = self.def.signature.has_this;

        let event_hook = match self.plan.role {
            AccessorRole::Add(_) if has(|u| u.add_handler) => {
                Some((Intrinsic::AspectOnAddHandler, adds_handlers as fn(&Application) -> bool))
            }
            AccessorRole::Remove(_) if has(|u| u.remove_handler) => {
                Some((
                    Intrinsic::AspectOnRemoveHandler,
                    removes_handlers as fn(&Application) -> bool,
                ))
            }
            _ => None,
        };
        if let Some((hook, selects)) = event_hook {
            let (slot, handler_type) = self.last_param()?;
            let context = self.asm.declare_local(TypeSig::class(EVENT_CONTEXT_TYPE));
            emit::load_instance(&mut self.asm, has_this)?;
            self.asm.ldarg(slot)?;
            emit::new_intrinsic(&mut self.asm, self.module, Intrinsic::EventContextCtor)?;
            self.asm.stloc(context)?;
            call_member_hooks(&mut self.asm, self.module, applications, selects, hook, context)?;

            let skip = self.asm.label();
            self.asm.ldloc(context)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::EventContextGetProceed)?;
            self.asm.brfalse(&skip)?;
            self.asm.ldloc(context)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::EventContextGetHandler)?;
            emit::unbox_to(&mut self.asm, self.module, &handler_type)?;
            self.asm.starg(slot)?;
            self.call_shadow()?;
            self.asm.mark(&skip)?;
            return Ok(());
        }

        match self.plan.role {
            AccessorRole::Setter(property) if has(|u| u.set_value) => {
                let name = self.module.property(property)?.name.clone();
                let (slot, value_type) = self.last_param()?;
                let context = new_member_context(
                    &mut self.asm,
                    self.module,
                    has_this,
                    &name,
                    true,
                    |asm, module| emit::load_argument(asm, module, slot, &value_type),
                )?;
                let indices = self.def.signature.params.len() - 1;
                self.add_index(context, indices)?;
                call_member_hooks(
                    &mut self.asm,
                    self.module,
                    applications,
                    |app| app.usage.set_value,
                    Intrinsic::AspectOnSetValue,
                    context,
                )?;
                let skip = self.asm.label();
                self.asm.ldloc(context)?;
                emit::call_intrinsic(
                    &mut self.asm,
                    self.module,
                    Intrinsic::MemberContextGetContinue,
                )?;
                self.asm.brfalse(&skip)?;
                self.asm.ldloc(context)?;
                emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MemberContextGetValue)?;
                emit::unbox_to(&mut self.asm, self.module, &value_type)?;
                self.asm.starg(slot)?;
                self.call_shadow()?;
                self.asm.mark(&skip)?;
            }
            AccessorRole::Getter(property) if has(|u| u.get_value) => {
                let name = self.module.property(property)?.name.clone();
                self.call_shadow()?;
                let Some(result) = self.result else {
                    return Err(Error::Unsupported(format!("getter {name} returns void")));
                };
                let returns = self.def.signature.ret.clone();
                let boxed = returns.clone();
                let context = new_member_context(
                    &mut self.asm,
                    self.module,
                    has_this,
                    &name,
                    true,
                    |asm, module| {
                        asm.ldloc(result)?;
                        emit::box_if_needed(asm, module, &boxed)
                    },
                )?;
                let indices = self.def.signature.params.len();
                self.add_index(context, indices)?;
                call_member_hooks(
                    &mut self.asm,
                    self.module,
                    applications,
                    |app| app.usage.get_value,
                    Intrinsic::AspectOnGetValue,
                    context,
                )?;
                self.asm.ldloc(context)?;
                emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MemberContextGetValue)?;
                emit::unbox_to(&mut self.asm, self.module, &returns)?;
                self.asm.stloc(result)?;
            }
            _ => self.call_shadow()?,
        }
        Ok(())
    }

    /// Hand the leading `count` arguments of an indexer accessor to its member context
    fn add_index(&mut self, context: u16, count: usize) -> Result<()> {
        for index in 0..count {
            let param_type = self.def.signature.params[index].clone();
            self.asm.ldloc(context)?;
            emit::load_argument(&mut self.asm, self.module, self.def.arg_slot(index), &param_type)?;
            emit::call_intrinsic(&mut self.asm, self.module, Intrinsic::MemberContextAddIndex)?;
        }
        Ok(())
    }

    /// Slot and type of the accessor's value parameter
    fn last_param(&self) -> Result<(u16, TypeSig)> {
        let index = self
            .def
            .signature
            .params
            .len()
            .checked_sub(1)
            .ok_or_else(|| {
                Error::Unsupported(format!("accessor {} has no value parameter", self.def.name))
            })?;
        Ok((self.def.arg_slot(index), self.def.signature.params[index].clone()))
    }

    fn call_shadow(&mut self) -> Result<()> {
        if self.def.signature.has_this {
            self.asm.ldarg(0)?;
        }
        for index in 0..self.def.signature.params.len() {
            self.asm.ldarg(self.def.arg_slot(index))?;
        }
        self.asm.call(self.shadow, &self.def.signature)?;
        if let Some(result) = self.result {
            self.asm.stloc(result)?;
        }
        Ok(())
    }
}

fn adds_handlers(app: &Application) -> bool {
    app.usage.add_handler
}

fn removes_handlers(app: &Application) -> bool {
    app.usage.remove_handler
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        assembly::{decode_method, GenericContext},
        metadata::{
            builders::{ClassBuilder, MethodBuilder},
            marker::{Marker, MarkerScope},
            member::MemberKind,
        },
        weaver::descriptor::InterceptorDescriptor,
    };

    fn calculator() -> Result<(Module, MethodId)> {
        let mut module = Module::new("Test");
        let calculator = ClassBuilder::new("Demo", "Calculator").build(&mut module)?;
        let add = MethodBuilder::new("Add")
            .param("x", TypeSig::I4)
            .param("y", TypeSig::I4)
            .returns(TypeSig::I4)
            .implementation(|asm, _| {
                asm.ldarg(1)?.ldarg(2)?.add()?.ret()?;
                Ok(())
            })
            .build(&mut module, calculator)?;
        Ok((module, add))
    }

    fn plan(method: MethodId, descriptor: InterceptorDescriptor) -> MethodPlan {
        MethodPlan {
            method,
            kind: MemberKind::Method,
            role: AccessorRole::None,
            applications: vec![Application {
                usage: HookUsage::of(&descriptor),
                marker: Marker::new(descriptor.class.clone()),
                descriptor: Arc::new(descriptor),
                scope: MarkerScope::Member,
                param: None,
            }],
        }
    }

    fn mnemonics(module: &Module, method: MethodId) -> Result<Vec<&'static str>> {
        Ok(decode_method(module, method, GenericContext::default())?
            .iter()
            .map(|i| i.mnemonic)
            .collect())
    }

    #[test]
    fn shadow_keeps_the_original_body() -> Result<()> {
        let (mut module, add) = calculator()?;
        let original = mnemonics(&module, add)?;
        let config = WeaveConfig::default();
        let mut helper = HelperType::new(&config);

        let descriptor = InterceptorDescriptor::wrapping("Log").on_entry(|_, _| Ok(()));
        let shadow = rewrite(
            &mut module,
            &mut helper,
            &config,
            &Redirects::default(),
            &plan(add, descriptor),
        )?;

        let shadow_def = module.method(shadow)?;
        assert_eq!(shadow_def.name, "Add$Woven");
        assert!(shadow_def.is_compiler_generated());
        assert_eq!(mnemonics(&module, shadow)?, original);

        let wrapper = mnemonics(&module, add)?;
        assert!(wrapper.iter().filter(|m| **m == "call").count() >= 3);
        assert_eq!(wrapper.last(), Some(&"ret"));
        assert!(module.method(add)?.body.as_ref().is_some_and(|b| b.exception_handlers.is_empty()));
        Ok(())
    }

    #[test]
    fn exit_and_exception_hooks_open_a_region() -> Result<()> {
        let (mut module, add) = calculator()?;
        let config = WeaveConfig::default();
        let mut helper = HelperType::new(&config);

        let descriptor = InterceptorDescriptor::wrapping("Guard")
            .on_exit(|_, _| Ok(()))
            .on_exception(|_, _| Ok(()));
        rewrite(&mut module, &mut helper, &config, &Redirects::default(), &plan(add, descriptor))?;

        let handlers = module
            .method(add)?
            .body
            .as_ref()
            .map(|body| body.exception_handlers.clone())
            .unwrap_or_default();
        assert_eq!(handlers.len(), 2);
        assert!(handlers[0].is_catch());
        assert!(handlers[1].is_finally());
        assert!(handlers[0].try_length < handlers[1].try_length);
        assert!(mnemonics(&module, add)?.contains(&"rethrow"));
        Ok(())
    }

    #[test]
    fn generic_methods_are_unsupported() -> Result<()> {
        let mut module = Module::new("Test");
        let holder = ClassBuilder::new("Demo", "Holder").build(&mut module)?;
        let identity = MethodBuilder::new("Identity")
            .generic_param("T")
            .param("value", TypeSig::MethodGenericParam(0))
            .returns(TypeSig::MethodGenericParam(0))
            .implementation(|asm, _| {
                asm.ldarg(1)?.ret()?;
                Ok(())
            })
            .build(&mut module, holder)?;

        let config = WeaveConfig::default();
        let descriptor = InterceptorDescriptor::wrapping("Log").on_entry(|_, _| Ok(()));
        let result = rewrite(
            &mut module,
            &mut HelperType::new(&config),
            &config,
            &Redirects::default(),
            &plan(identity, descriptor),
        );
        assert!(matches!(result, Err(Error::Unsupported(_))));
        assert_eq!(module.type_def(holder)?.methods.len(), 1);
        Ok(())
    }

    #[test]
    fn unmarked_bodies_without_redirections_are_left_alone() -> Result<()> {
        let (mut module, add) = calculator()?;
        let before = module.method(add)?.body.clone().map(|body| body.code);
        assert!(!redirect_only(&mut module, &Redirects::default(), add)?);
        assert_eq!(module.method(add)?.body.clone().map(|body| body.code), before);
        Ok(())
    }
}
