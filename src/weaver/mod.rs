//! The weaving engine.
//!
//! A [`Weaver`] takes a loaded [`Module`] and rewrites every member that an interceptor in
//! its [`InterceptorRegistry`] applies to. A pass runs in four phases:
//!
//! 1. **Selection** - markers on the assembly, types, members and parameters are resolved
//!    against the registry and filtered by target kind, visibility and name patterns
//!    (see [`Selector`]). Runs in parallel per type.
//! 2. **Structural rules** - interceptors may reject a type outright. Such types are
//!    reported in [`WeaveReport::failed_types`] and left untouched, or abort the pass when
//!    [`WeaveConfig::strict_validation`] is set.
//! 3. **Helpers** - field and event interception synthesize access and raise helpers on a
//!    hidden helper type. Every access to an intercepted field and every raise of an
//!    intercepted event is later redirected to them.
//! 4. **Rewriting** - each selected member is split into a shadow, holding the original
//!    body, and a wrapper that runs the hooks around a call to the shadow.
//!
//! Members that cannot be rewritten are skipped individually and listed in
//! [`WeaveReport::skipped`]; they keep their original behavior.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dotweave::{
//!     metadata::{
//!         builders::{ClassBuilder, MethodBuilder},
//!         marker::Marker,
//!         module::Module,
//!         signature::TypeSig,
//!     },
//!     weaver::{InterceptorDescriptor, InterceptorRegistry, Weaver},
//! };
//!
//! let registry = InterceptorRegistry::new()
//!     .with(InterceptorDescriptor::wrapping("Demo.Trace").on_entry(|_, _| Ok(())));
//!
//! let mut module = Module::new("Demo");
//! let service = ClassBuilder::new("Demo", "Service")
//!     .marker(Marker::new("Demo.Trace"))
//!     .build(&mut module)?;
//! MethodBuilder::new("Run")
//!     .returns(TypeSig::Void)
//!     .implementation(|asm, _| { asm.ret()?; Ok(()) })
//!     .build(&mut module, service)?;
//!
//! let woven = Weaver::new(Arc::new(registry)).weave(module)?;
//! assert!(woven.report.is_rewritten("Demo.Service::Run()"));
//! # Ok::<(), dotweave::Error>(())
//! ```

mod body;
mod cache;
mod config;
mod descriptor;
mod emit;
mod events;
mod fields;
mod helper;
mod pattern;
mod registry;
mod report;
mod rewriter;
mod rules;
mod selection;
mod trampoline;
mod usage;

use std::{collections::HashSet, fmt, sync::Arc, time::Instant};

pub use cache::WeaveCache;
pub use config::WeaveConfig;
pub use descriptor::{
    BlockKind, ContextUsage, EventHook, Fragment, FragmentFn, HookResult, InterceptorDescriptor,
    MemberHook, MethodHook, Modifiers, Targets, TypeRule, ValidateFn,
};
pub use emit::validation_fragment;
pub use pattern::{Pattern, PatternCache};
pub use registry::InterceptorRegistry;
pub use report::{FailedType, SkipReason, SkippedMember, WeaveReport};
pub use selection::{
    AccessorRole, Application, EventPlan, FieldPlan, MethodPlan, Selection, Selector, TypePlan,
};
pub use usage::{HookUsage, UsageCache};

use crate::{
    metadata::{
        member::{EventId, MethodId},
        module::Module,
    },
    weaver::{body::Redirects, helper::HelperType, trampoline::Trampolines},
    Error, Result,
};

/// A woven module together with the outcome of the pass
#[derive(Debug)]
pub struct Woven {
    /// The rewritten module
    pub module: Module,
    /// What was rewritten, redirected and skipped
    pub report: WeaveReport,
}

/// A weaving session over one interceptor registry.
///
/// The session itself is immutable; pattern and hook-usage caches are shared through
/// [`WeaveCache`] and may be reused across sessions and threads.
pub struct Weaver {
    registry: Arc<InterceptorRegistry>,
    config: WeaveConfig,
    cache: Arc<WeaveCache>,
}

impl Weaver {
    /// Weaver with the default configuration and a fresh cache
    #[must_use]
    pub fn new(registry: Arc<InterceptorRegistry>) -> Self {
        Weaver {
            registry,
            config: WeaveConfig::default(),
            cache: Arc::new(WeaveCache::new()),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: WeaveConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cache with other sessions
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<WeaveCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The interceptors this session weaves
    #[must_use]
    pub fn registry(&self) -> &Arc<InterceptorRegistry> {
        &self.registry
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    /// Shared caches
    #[must_use]
    pub fn cache(&self) -> &Arc<WeaveCache> {
        &self.cache
    }

    /// Interceptors that apply to `method` of `module`, in execution order.
    ///
    /// # Errors
    /// Returns [`Error::Selection`] for a malformed pattern on any applicable marker.
    pub fn applicable(&self, module: &Module, method: MethodId) -> Result<Vec<Application>> {
        Selector::new(module, &self.registry, &self.cache, &self.config).for_method(method)
    }

    /// Run one weave pass over `module`.
    ///
    /// # Errors
    /// - [`Error::Selection`] if a marker carries a malformed pattern
    /// - [`Error::StructuralValidation`] for a rule violation in strict mode
    /// - [`Error::Error`] if `module` already carries the helper type of an earlier pass
    ///
    /// Failures confined to one member are reported in [`WeaveReport::skipped`] instead.
    pub fn weave(&self, mut module: Module) -> Result<Woven> {
        let started = Instant::now();

        let helper_name = self.config.helper_fullname();
        if module.type_by_name(&helper_name).is_some() {
            return Err(Error::Error(format!(
                "module {} is already woven ({helper_name} exists)",
                module.name()
            )));
        }

        let existing: Vec<MethodId> = module
            .types()
            .flat_map(|(_, def)| def.methods.iter().copied())
            .collect();

        let selection = Selector::new(&module, &self.registry, &self.cache, &self.config).select()?;
        log::debug!(
            "selected {} members in {} types of {}",
            selection.method_count(),
            selection.types.len(),
            module.name()
        );

        let mut report = WeaveReport::default();
        let mut plans = Vec::with_capacity(selection.types.len());
        for plan in selection.types {
            match rules::check(&module, &plan) {
                Ok(()) => plans.push(plan),
                Err(failed) if self.config.strict_validation => return Err(failed.into()),
                Err(failed) => {
                    log::warn!(
                        "skipping {}: rule of {} failed: {}",
                        failed.type_name,
                        failed.interceptor,
                        failed.message
                    );
                    report.failed_types.push(failed);
                }
            }
        }

        let mut helper = HelperType::new(&self.config);
        let mut trampolines = Trampolines::new();
        let mut redirects = Redirects::default();

        for plan in plans.iter().flat_map(|plan| &plan.fields) {
            let key = module.field_key(plan.field)?;
            match fields::build(&mut module, &mut helper, &mut trampolines, plan) {
                Ok(helpers) => {
                    if let Some(read) = helpers.read {
                        redirects.reads.insert(plan.field, read);
                    }
                    if let Some(write) = helpers.write {
                        redirects.writes.insert(plan.field, write);
                    }
                    log::debug!("intercepting accesses to {key}");
                    report.fields.push(key);
                }
                Err(error) => skip(&mut report, key, SkipReason::of(&error), error),
            }
        }

        for plan in plans.iter().flat_map(|plan| &plan.events) {
            let key = event_key(&module, plan.event)?;
            match events::build_raise(&mut module, &mut helper, plan) {
                Ok((backing, raise)) => {
                    redirects.raises.insert(backing, raise);
                    log::debug!("intercepting raises of {key}");
                    report.events.push(key);
                }
                Err(error) => skip(&mut report, key, SkipReason::of(&error), error),
            }
        }

        let mut rewritten = HashSet::new();
        for plan in plans.iter().flat_map(|plan| &plan.methods) {
            let key = module.method_key(plan.method)?;
            if module.method(plan.method)?.is_generic() {
                skip(
                    &mut report,
                    key,
                    SkipReason::Generic,
                    "generic method definitions are not rewritten",
                );
                continue;
            }
            match rewriter::rewrite(&mut module, &mut helper, &self.config, &redirects, plan) {
                Ok(_) => {
                    log::debug!("rewrote {key} ({} interceptors)", plan.applications.len());
                    rewritten.insert(plan.method);
                    report.rewritten.push(key);
                }
                Err(error) => skip(&mut report, key, SkipReason::of(&error), error),
            }
        }

        if !redirects.is_empty() {
            for method in existing {
                if rewritten.contains(&method) || module.method(method)?.body.is_none() {
                    continue;
                }
                let key = module.method_key(method)?;
                match rewriter::redirect_only(&mut module, &redirects, method) {
                    Ok(true) => {
                        log::debug!("redirected accesses in {key}");
                        report.redirected.push(key);
                    }
                    Ok(false) => {}
                    Err(error) if report.skip_of(&key).is_none() => {
                        skip(&mut report, key, SkipReason::of(&error), error);
                    }
                    Err(_) => {}
                }
            }
        }

        log::debug!("generated {} field trampolines", trampolines.len());
        report.helpers = helper.finish(&mut module)?;
        report.elapsed = started.elapsed();
        log::info!("wove {}: {report}", module.name());

        Ok(Woven { module, report })
    }
}

fn event_key(module: &Module, id: EventId) -> Result<String> {
    let event = module.event(id)?;
    let owner = module.type_def(event.declaring)?;
    Ok(format!("{}::{}", owner.fullname(), event.name))
}

fn skip(report: &mut WeaveReport, member: String, reason: SkipReason, message: impl fmt::Display) {
    log::warn!("left {member} unchanged ({reason}): {message}");
    report.skipped.push(SkippedMember {
        member,
        reason,
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builders::{ClassBuilder, MethodBuilder},
        marker::Marker,
        signature::TypeSig,
    };

    fn service(module: &mut Module, marker: Marker) -> Result<MethodId> {
        let service = ClassBuilder::new("Demo", "Service").marker(marker).build(module)?;
        MethodBuilder::new("Run")
            .param("count", TypeSig::I4)
            .returns(TypeSig::I4)
            .implementation(|asm, _| {
                asm.ldarg(1)?.ret()?;
                Ok(())
            })
            .build(module, service)
    }

    fn registry() -> Arc<InterceptorRegistry> {
        Arc::new(
            InterceptorRegistry::new()
                .with(InterceptorDescriptor::wrapping("Trace").on_entry(|_, _| Ok(())))
                .with(
                    InterceptorDescriptor::wrapping("Strict")
                        .rule(|_, _| Err("not allowed".to_string())),
                ),
        )
    }

    #[test]
    fn rewrites_marked_members() -> Result<()> {
        let mut module = Module::new("Test");
        service(&mut module, Marker::new("Trace"))?;

        let woven = Weaver::new(registry()).weave(module)?;
        assert!(woven.report.is_rewritten("Demo.Service::Run(int32)"));
        assert!(woven.report.skipped.is_empty());
        assert!(!woven.report.helpers.is_empty());
        Ok(())
    }

    #[test]
    fn second_pass_is_rejected() -> Result<()> {
        let mut module = Module::new("Test");
        service(&mut module, Marker::new("Trace"))?;

        let weaver = Weaver::new(registry());
        let woven = weaver.weave(module)?;
        assert!(matches!(weaver.weave(woven.module), Err(Error::Error(_))));
        Ok(())
    }

    #[test]
    fn failed_rules_skip_the_type() -> Result<()> {
        let mut module = Module::new("Test");
        service(&mut module, Marker::new("Strict"))?;

        let woven = Weaver::new(registry()).weave(module)?;
        assert_eq!(woven.report.failed_types.len(), 1);
        assert_eq!(woven.report.failed_types[0].message, "not allowed");
        assert!(woven.report.rewritten.is_empty());
        Ok(())
    }

    #[test]
    fn strict_rules_abort_the_pass() -> Result<()> {
        let mut module = Module::new("Test");
        service(&mut module, Marker::new("Strict"))?;

        let config = WeaveConfig::default().with_strict_validation(true);
        let weaver = Weaver::new(registry()).with_config(config);
        assert!(matches!(
            weaver.weave(module),
            Err(Error::StructuralValidation { .. })
        ));
        Ok(())
    }

    #[test]
    fn generic_methods_are_skipped() -> Result<()> {
        let mut module = Module::new("Test");
        let run = service(&mut module, Marker::new("Trace"))?;
        let owner = module.method(run)?.declaring;
        MethodBuilder::new("Echo")
            .generic_param("T")
            .param("value", TypeSig::MethodGenericParam(0))
            .returns(TypeSig::MethodGenericParam(0))
            .implementation(|asm, _| {
                asm.ldarg(1)?.ret()?;
                Ok(())
            })
            .build(&mut module, owner)?;

        let woven = Weaver::new(registry()).weave(module)?;
        assert!(woven.report.is_rewritten("Demo.Service::Run(int32)"));
        assert_eq!(woven.report.skipped.len(), 1);
        assert_eq!(woven.report.skipped[0].reason, SkipReason::Generic);
        Ok(())
    }

    #[test]
    fn applicable_lists_the_interceptors() -> Result<()> {
        let mut module = Module::new("Test");
        let run = service(&mut module, Marker::new("Trace"))?;

        let weaver = Weaver::new(registry());
        let applications = weaver.applicable(&module, run)?;
        assert_eq!(applications.len(), 1);
        assert_eq!(applications[0].class(), "Trace");
        Ok(())
    }
}
