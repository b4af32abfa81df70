//! Interceptor selection.
//!
//! For every member the selector collects the markers that may apply to it, broadest scope
//! first: the module, the declaring type, the member itself (including the property or
//! event owning an accessor) and finally its parameters. Each marker is resolved against
//! the [`InterceptorRegistry`] and filtered by the interceptor's target kinds, visibility
//! modifiers and name patterns, with marker arguments taking precedence over the
//! descriptor's defaults.
//!
//! # Resolution Rules
//!
//! - A marker whose class is not registered is ignored
//! - An `exclude` marker at any scope removes its class from the members it matches
//! - One application per class and parameter position; the narrowest declaration wins
//! - Applications run in scope order, then in declaration order
//!
//! Types are planned in parallel and merged back in declaration order, so the outcome does
//! not depend on scheduling.

use std::{collections::HashSet, sync::Arc};

use rayon::prelude::*;

use crate::{
    metadata::{
        marker::{
            Marker, MarkerScope, ARG_EXCLUDE, ARG_MEMBER_PATTERN, ARG_MODIFIERS, ARG_TARGETS,
            ARG_TYPE_PATTERN,
        },
        member::{EventId, FieldId, MemberKind, MethodId, PropertyId, TypeId, Visibility},
        module::Module,
        typedef::TypeFlags,
    },
    weaver::{
        cache::WeaveCache,
        config::WeaveConfig,
        descriptor::{BlockKind, InterceptorDescriptor, Modifiers, Targets},
        registry::InterceptorRegistry,
        usage::HookUsage,
    },
    Result,
};

/// One interceptor applied to one member
#[derive(Debug, Clone)]
pub struct Application {
    /// The interceptor
    pub descriptor: Arc<InterceptorDescriptor>,
    /// Hooks and context slots it needs
    pub usage: HookUsage,
    /// The marker that selected it
    pub marker: Marker,
    /// Where the marker is declared
    pub scope: MarkerScope,
    /// Parameter position for parameter-level and setter applications
    pub param: Option<usize>,
}

impl Application {
    /// Interceptor class
    #[must_use]
    pub fn class(&self) -> &str {
        &self.descriptor.class
    }
}

/// Role of a method that belongs to a property or an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorRole {
    /// Not an accessor
    None,
    /// `get_` accessor
    Getter(PropertyId),
    /// `set_` accessor
    Setter(PropertyId),
    /// `add_` accessor
    Add(EventId),
    /// `remove_` accessor
    Remove(EventId),
}

/// A method, constructor or accessor to rewrite
#[derive(Debug, Clone)]
pub struct MethodPlan {
    /// The member
    pub method: MethodId,
    /// Kind used for target filtering
    pub kind: MemberKind,
    /// Property or event role
    pub role: AccessorRole,
    /// Applications with something to emit, in execution order
    pub applications: Vec<Application>,
}

/// A field whose accesses are redirected
#[derive(Debug, Clone)]
pub struct FieldPlan {
    /// The field
    pub field: FieldId,
    /// Applications with an access hook
    pub applications: Vec<Application>,
}

/// An event whose raise sites are redirected
#[derive(Debug, Clone)]
pub struct EventPlan {
    /// The event
    pub event: EventId,
    /// Applications with a raise hook
    pub applications: Vec<Application>,
}

/// Everything selected in one type
#[derive(Debug, Clone)]
pub struct TypePlan {
    /// The type
    pub type_id: TypeId,
    /// Its fully-qualified name
    pub type_name: String,
    /// Interceptors applied anywhere in the type that carry structural rules
    pub rules: Vec<Arc<InterceptorDescriptor>>,
    /// Members to rewrite
    pub methods: Vec<MethodPlan>,
    /// Fields to redirect
    pub fields: Vec<FieldPlan>,
    /// Events to redirect
    pub events: Vec<EventPlan>,
}

impl TypePlan {
    fn is_empty(&self) -> bool {
        self.rules.is_empty()
            && self.methods.is_empty()
            && self.fields.is_empty()
            && self.events.is_empty()
    }
}

/// Selection result of a whole module, in type declaration order
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Types with at least one selected member or rule
    pub types: Vec<TypePlan>,
}

impl Selection {
    /// Number of members to rewrite
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|plan| plan.methods.len()).sum()
    }

    /// True if nothing was selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

struct Candidate<'m> {
    scope: MarkerScope,
    marker: &'m Marker,
    param: Option<usize>,
}

/// What the filters see of a member
struct Site<'s> {
    target: Targets,
    visibility: Visibility,
    type_name: &'s str,
    names: Vec<String>,
}

/// Resolves markers to interceptor applications
pub struct Selector<'a> {
    module: &'a Module,
    registry: &'a InterceptorRegistry,
    cache: &'a WeaveCache,
    config: &'a WeaveConfig,
}

impl<'a> Selector<'a> {
    /// Selector over `module`
    #[must_use]
    pub fn new(
        module: &'a Module,
        registry: &'a InterceptorRegistry,
        cache: &'a WeaveCache,
        config: &'a WeaveConfig,
    ) -> Self {
        Selector {
            module,
            registry,
            cache,
            config,
        }
    }

    /// Plan the whole module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Selection`] for a malformed pattern and a lookup error for
    /// dangling member references.
    pub fn select(&self) -> Result<Selection> {
        let ids: Vec<TypeId> = self.module.types().map(|(id, _)| id).collect();
        let plans = ids
            .par_iter()
            .map(|&id| self.plan_type(id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Selection {
            types: plans.into_iter().flatten().collect(),
        })
    }

    /// Interceptors that apply to a method, constructor or accessor, in execution order.
    ///
    /// Applications without anything to emit for this member are included.
    ///
    /// # Errors
    /// Returns [`crate::Error::Selection`] for a malformed pattern.
    pub fn for_method(&self, method: MethodId) -> Result<Vec<Application>> {
        let def = self.module.method(method)?;
        let owner = self.module.type_def(def.declaring)?;
        let (kind, role) = self.kind_of(method)?;
        let type_name = owner.fullname();

        let mut candidates = self.outer_candidates(def.declaring)?;
        for marker in &def.markers {
            candidates.push(Candidate {
                scope: MarkerScope::Member,
                marker,
                param: None,
            });
        }
        let owner_markers = match role {
            AccessorRole::Getter(property) | AccessorRole::Setter(property) => {
                self.module.property(property)?.markers.as_slice()
            }
            AccessorRole::Add(event) | AccessorRole::Remove(event) => {
                self.module.event(event)?.markers.as_slice()
            }
            AccessorRole::None => &[],
        };
        for marker in owner_markers {
            candidates.push(Candidate {
                scope: MarkerScope::Member,
                marker,
                param: None,
            });
        }
        for (index, param) in def.params.iter().enumerate() {
            for marker in &param.markers {
                candidates.push(Candidate {
                    scope: MarkerScope::Parameter,
                    marker,
                    param: Some(index),
                });
            }
        }

        let owner_name = match role {
            AccessorRole::Getter(property) | AccessorRole::Setter(property) => {
                Some(self.module.property(property)?.name.clone())
            }
            AccessorRole::Add(event) | AccessorRole::Remove(event) => {
                Some(self.module.event(event)?.name.clone())
            }
            AccessorRole::None => None,
        };
        let mut names = vec![def.name.clone(), format!("{type_name}::{}", def.name)];
        if let Some(owner_name) = owner_name {
            names.push(format!("{type_name}::{owner_name}"));
            names.push(owner_name);
        }
        let site = Site {
            target: target_of(kind),
            visibility: def.visibility,
            type_name: &type_name,
            names,
        };

        let setter_value = match role {
            AccessorRole::Setter(_) => def.signature.params.len().checked_sub(1),
            _ => None,
        };
        let applications = self.resolve(&candidates, &site, |application| {
            if matches!(role, AccessorRole::Setter(_))
                && application.scope != MarkerScope::Parameter
                && application.descriptor.block_kind == BlockKind::Inline
            {
                application.param = setter_value;
            }
            // A validator needs a value to check.
            application.descriptor.validate.is_none() || application.param.is_some()
        })?;
        Ok(applications)
    }

    /// Interceptors that apply to a field, in execution order
    ///
    /// # Errors
    /// Returns [`crate::Error::Selection`] for a malformed pattern.
    pub fn for_field(&self, field: FieldId) -> Result<Vec<Application>> {
        let def = self.module.field(field)?;
        let type_name = self.module.type_def(def.declaring)?.fullname();

        let mut candidates = self.outer_candidates(def.declaring)?;
        for marker in &def.markers {
            candidates.push(Candidate {
                scope: MarkerScope::Member,
                marker,
                param: None,
            });
        }
        let site = Site {
            target: Targets::FIELD,
            visibility: def.visibility,
            names: vec![def.name.clone(), format!("{type_name}::{}", def.name)],
            type_name: &type_name,
        };
        self.resolve(&candidates, &site, |_| true)
    }

    /// Interceptors that apply to an event, in execution order
    ///
    /// # Errors
    /// Returns [`crate::Error::Selection`] for a malformed pattern.
    pub fn for_event(&self, event: EventId) -> Result<Vec<Application>> {
        let def = self.module.event(event)?;
        let type_name = self.module.type_def(def.declaring)?.fullname();
        let visibility = match def.add {
            Some(add) => self.module.method(add)?.visibility,
            None => Visibility::Public,
        };

        let mut candidates = self.outer_candidates(def.declaring)?;
        for marker in &def.markers {
            candidates.push(Candidate {
                scope: MarkerScope::Member,
                marker,
                param: None,
            });
        }
        let site = Site {
            target: Targets::EVENT,
            visibility,
            names: vec![def.name.clone(), format!("{type_name}::{}", def.name)],
            type_name: &type_name,
        };
        self.resolve(&candidates, &site, |_| true)
    }

    /// Member kind and accessor role of a method
    ///
    /// # Errors
    /// Returns an error if the method does not exist.
    pub fn kind_of(&self, method: MethodId) -> Result<(MemberKind, AccessorRole)> {
        let def = self.module.method(method)?;
        if def.is_constructor() {
            return Ok((MemberKind::Constructor, AccessorRole::None));
        }
        if let Some(property) = self.module.property_of_accessor(method) {
            let role = if self.module.property(property)?.getter == Some(method) {
                AccessorRole::Getter(property)
            } else {
                AccessorRole::Setter(property)
            };
            return Ok((MemberKind::Property, role));
        }
        if let Some(event) = self.module.event_of_accessor(method) {
            let role = if self.module.event(event)?.add == Some(method) {
                AccessorRole::Add(event)
            } else {
                AccessorRole::Remove(event)
            };
            return Ok((MemberKind::Event, role));
        }
        Ok((MemberKind::Method, AccessorRole::None))
    }

    fn outer_candidates(&self, declaring: TypeId) -> Result<Vec<Candidate<'a>>> {
        let owner = self.module.type_def(declaring)?;
        let assembly = self.module.markers.iter().map(|marker| Candidate {
            scope: MarkerScope::Assembly,
            marker,
            param: None,
        });
        let declared = owner.markers.iter().map(|marker| Candidate {
            scope: MarkerScope::Type,
            marker,
            param: None,
        });
        Ok(assembly.chain(declared).collect())
    }

    fn resolve<F>(
        &self,
        candidates: &[Candidate<'_>],
        site: &Site<'_>,
        mut adjust: F,
    ) -> Result<Vec<Application>>
    where
        F: FnMut(&mut Application) -> bool,
    {
        let mut excluded: HashSet<&str> = HashSet::new();
        let mut applications: Vec<Application> = Vec::new();

        for candidate in candidates {
            let Some(descriptor) = self.registry.get(&candidate.marker.class) else {
                log::trace!("marker {} names no registered interceptor", candidate.marker);
                continue;
            };
            let target = if candidate.scope == MarkerScope::Parameter {
                Targets::PARAMETER
            } else {
                site.target
            };
            if !self.admits(candidate.marker, &descriptor, target, site)? {
                continue;
            }
            if candidate.marker.get_bool(ARG_EXCLUDE).unwrap_or(descriptor.exclude) {
                excluded.insert(&candidate.marker.class);
                continue;
            }

            let mut application = Application {
                usage: self.cache.usage().get(&descriptor),
                descriptor,
                marker: candidate.marker.clone(),
                scope: candidate.scope,
                param: candidate.param,
            };
            if !adjust(&mut application) {
                continue;
            }

            applications.retain(|existing| {
                existing.class() != application.class() || existing.param != application.param
            });
            applications.push(application);
        }

        applications.retain(|application| !excluded.contains(application.class()));
        Ok(applications)
    }

    fn admits(
        &self,
        marker: &Marker,
        descriptor: &InterceptorDescriptor,
        target: Targets,
        site: &Site<'_>,
    ) -> Result<bool> {
        let targets = marker
            .get_int(ARG_TARGETS)
            .map_or(descriptor.targets, |bits| {
                Targets::from_bits_truncate(u16::try_from(bits).unwrap_or(0))
            });
        if !targets.contains(target) {
            return Ok(false);
        }

        let modifiers = marker
            .get_int(ARG_MODIFIERS)
            .map_or(descriptor.modifiers, |bits| {
                Modifiers::from_bits_truncate(u8::try_from(bits).unwrap_or(0))
            });
        let modifier = if site.visibility.is_public() {
            Modifiers::PUBLIC
        } else {
            Modifiers::NON_PUBLIC
        };
        if !modifiers.contains(modifier) {
            return Ok(false);
        }

        let patterns = self.cache.patterns();
        let type_pattern = marker
            .get_str(ARG_TYPE_PATTERN)
            .or(descriptor.type_pattern.as_deref());
        if let Some(pattern) = type_pattern {
            if !patterns.matches_any(pattern, &[site.type_name])? {
                return Ok(false);
            }
        }

        let member_pattern = marker
            .get_str(ARG_MEMBER_PATTERN)
            .or(descriptor.member_pattern.as_deref());
        if let Some(pattern) = member_pattern {
            let names: Vec<&str> = site.names.iter().map(String::as_str).collect();
            if !patterns.matches_any(pattern, &names)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn plan_type(&self, type_id: TypeId) -> Result<Option<TypePlan>> {
        let def = self.module.type_def(type_id)?;
        let type_name = def.fullname();
        if type_name == self.config.helper_fullname()
            || def.flags.intersects(TypeFlags::COMPILER_GENERATED | TypeFlags::INTERFACE)
            || def.is_delegate()
        {
            return Ok(None);
        }

        let mut plan = TypePlan {
            type_id,
            type_name,
            rules: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            events: Vec::new(),
        };

        for &method in &def.methods {
            let method_def = self.module.method(method)?;
            if method_def.is_type_initializer()
                || method_def.is_compiler_generated()
                || method_def.body.is_none()
            {
                continue;
            }
            let (kind, role) = self.kind_of(method)?;
            let applications = self.for_method(method)?;
            self.collect_rules(&mut plan.rules, &applications);

            let applications: Vec<Application> = applications
                .into_iter()
                .filter(|application| self.emits_for(application, role))
                .collect();
            if !applications.is_empty() {
                plan.methods.push(MethodPlan {
                    method,
                    kind,
                    role,
                    applications,
                });
            }
        }

        if self.config.field_interception {
            for &field in &def.fields {
                if self.module.field(field)?.is_compiler_generated() {
                    continue;
                }
                let applications = self.for_field(field)?;
                self.collect_rules(&mut plan.rules, &applications);
                let applications: Vec<Application> = applications
                    .into_iter()
                    .filter(|application| application.usage.intercepts_access())
                    .collect();
                if !applications.is_empty() {
                    plan.fields.push(FieldPlan { field, applications });
                }
            }
        }

        if self.config.event_interception {
            for &event in &def.events {
                let applications = self.for_event(event)?;
                self.collect_rules(&mut plan.rules, &applications);
                let applications: Vec<Application> = applications
                    .into_iter()
                    .filter(|application| application.usage.invoke_event)
                    .collect();
                if !applications.is_empty() {
                    plan.events.push(EventPlan { event, applications });
                }
            }
        }

        for marker in &def.markers {
            if let Some(descriptor) = self.registry.get(&marker.class) {
                if !marker.get_bool(ARG_EXCLUDE).unwrap_or(descriptor.exclude) {
                    push_rules(&mut plan.rules, descriptor);
                }
            }
        }

        Ok(if plan.is_empty() { None } else { Some(plan) })
    }

    /// True if `application` has something to emit in a member with `role`
    fn emits_for(&self, application: &Application, role: AccessorRole) -> bool {
        let usage = &application.usage;
        if usage.wraps() || usage.has_fragments() {
            return true;
        }
        match role {
            AccessorRole::Getter(_) => usage.get_value,
            AccessorRole::Setter(_) => usage.set_value,
            AccessorRole::Add(_) => self.config.event_interception && usage.add_handler,
            AccessorRole::Remove(_) => self.config.event_interception && usage.remove_handler,
            AccessorRole::None => false,
        }
    }

    fn collect_rules(
        &self,
        rules: &mut Vec<Arc<InterceptorDescriptor>>,
        applications: &[Application],
    ) {
        for application in applications {
            push_rules(rules, Arc::clone(&application.descriptor));
        }
    }
}

fn push_rules(rules: &mut Vec<Arc<InterceptorDescriptor>>, descriptor: Arc<InterceptorDescriptor>) {
    if !descriptor.rules.is_empty()
        && !rules.iter().any(|existing| existing.class == descriptor.class)
    {
        rules.push(descriptor);
    }
}

fn target_of(kind: MemberKind) -> Targets {
    match kind {
        MemberKind::Constructor => Targets::CONSTRUCTOR,
        MemberKind::Method => Targets::METHOD,
        MemberKind::Property => Targets::PROPERTY,
        MemberKind::Field => Targets::FIELD,
        MemberKind::Event => Targets::EVENT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builders::{auto_property, default_constructor, ClassBuilder, MethodBuilder},
        signature::TypeSig,
    };

    fn noop_method(
        module: &mut Module,
        owner: TypeId,
        name: &str,
        marker: Option<Marker>,
    ) -> Result<MethodId> {
        let mut builder = MethodBuilder::new(name).implementation(|asm, _| {
            asm.ret()?;
            Ok(())
        });
        if let Some(marker) = marker {
            builder = builder.marker(marker);
        }
        builder.build(module, owner)
    }

    fn registry() -> InterceptorRegistry {
        InterceptorRegistry::new()
            .with(InterceptorDescriptor::wrapping("Log").on_entry(|_, _| Ok(())))
            .with(InterceptorDescriptor::wrapping("Audit").on_exit(|_, _| Ok(())))
    }

    fn classes(applications: &[Application]) -> Vec<(&str, MarkerScope)> {
        applications.iter().map(|a| (a.class(), a.scope)).collect()
    }

    #[test]
    fn scopes_run_broadest_first() -> Result<()> {
        let mut module = Module::new("Test");
        module.markers.push(Marker::new("Audit"));
        let service = ClassBuilder::new("Demo", "Service")
            .marker(Marker::new("Log"))
            .build(&mut module)?;
        let run = noop_method(&mut module, service, "Run", Some(Marker::new("Unknown")))?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);

        let applications = selector.for_method(run)?;
        assert_eq!(
            classes(&applications),
            vec![("Audit", MarkerScope::Assembly), ("Log", MarkerScope::Type)]
        );
        Ok(())
    }

    #[test]
    fn narrowest_declaration_wins() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service")
            .marker(Marker::new("Log"))
            .marker(Marker::new("Audit"))
            .build(&mut module)?;
        let tagged = Marker::new("Log").with_str("tag", "run");
        let run = noop_method(&mut module, service, "Run", Some(tagged))?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let applications = Selector::new(&module, &registry, &cache, &config).for_method(run)?;

        assert_eq!(
            classes(&applications),
            vec![("Audit", MarkerScope::Type), ("Log", MarkerScope::Member)]
        );
        assert_eq!(applications[1].marker.get_str("tag"), Some("run"));
        Ok(())
    }

    #[test]
    fn exclusion_at_any_scope_removes_the_class() -> Result<()> {
        let mut module = Module::new("Test");
        module.markers.push(Marker::new("Log"));
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let run = noop_method(
            &mut module,
            service,
            "Run",
            Some(Marker::new("Log").with_bool(ARG_EXCLUDE, true)),
        )?;
        let stop = noop_method(&mut module, service, "Stop", None)?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);
        assert!(selector.for_method(run)?.is_empty());
        assert_eq!(selector.for_method(stop)?.len(), 1);
        Ok(())
    }

    #[test]
    fn exclusion_only_applies_where_it_matches() -> Result<()> {
        let mut module = Module::new("Test");
        module.markers.push(Marker::new("Log"));
        module.markers.push(
            Marker::new("Log")
                .with_bool(ARG_EXCLUDE, true)
                .with_str(ARG_TYPE_PATTERN, "Demo.Legacy*"),
        );
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let legacy = ClassBuilder::new("Demo", "LegacyService").build(&mut module)?;
        let run = noop_method(&mut module, service, "Run", None)?;
        let old_run = noop_method(&mut module, legacy, "Run", None)?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);
        assert_eq!(classes(&selector.for_method(run)?), vec![("Log", MarkerScope::Assembly)]);
        assert!(selector.for_method(old_run)?.is_empty());

        let selection = selector.select()?;
        assert_eq!(selection.types.len(), 1);
        assert_eq!(selection.types[0].type_name, "Demo.Service");
        Ok(())
    }

    #[test]
    fn filters_and_marker_overrides() -> Result<()> {
        let mut module = Module::new("Test");
        module
            .markers
            .push(Marker::new("Log").with_str(ARG_MEMBER_PATTERN, "*ClassA::*"));
        let a = ClassBuilder::new("Demo", "ClassA").build(&mut module)?;
        let b = ClassBuilder::new("Demo", "ClassB").build(&mut module)?;
        let run_a = noop_method(&mut module, a, "Run", None)?;
        let run_b = noop_method(&mut module, b, "Run", None)?;
        let ctor_a = default_constructor(&mut module, a)?;

        let registry = InterceptorRegistry::new().with(
            InterceptorDescriptor::wrapping("Log")
                .targets(Targets::METHOD)
                .on_entry(|_, _| Ok(())),
        );
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);

        assert_eq!(selector.for_method(run_a)?.len(), 1);
        assert!(selector.for_method(run_b)?.is_empty());
        assert!(selector.for_method(ctor_a)?.is_empty());

        let selection = selector.select()?;
        assert_eq!(selection.types.len(), 1);
        assert_eq!(selection.types[0].type_name, "Demo.ClassA");
        assert_eq!(selection.method_count(), 1);
        Ok(())
    }

    #[test]
    fn visibility_modifiers() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service")
            .marker(Marker::new("Log").with_int(ARG_MODIFIERS, i64::from(Modifiers::PUBLIC.bits())))
            .build(&mut module)?;
        let public = noop_method(&mut module, service, "Run", None)?;
        let private = MethodBuilder::new("Helper")
            .visibility(Visibility::Private)
            .implementation(|asm, _| {
                asm.ret()?;
                Ok(())
            })
            .build(&mut module, service)?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);
        assert_eq!(selector.for_method(public)?.len(), 1);
        assert!(selector.for_method(private)?.is_empty());
        Ok(())
    }

    #[test]
    fn setter_validators_bind_the_value_parameter() -> Result<()> {
        let mut module = Module::new("Test");
        let person = ClassBuilder::new("Demo", "Person").build(&mut module)?;
        let name = auto_property(
            &mut module,
            person,
            "Name",
            TypeSig::String,
            vec![Marker::new("Required")],
        )?;
        let property = module.property(name)?.clone();

        let required = InterceptorDescriptor::validator("Required", |_, _, _| Ok(()));
        let registry = InterceptorRegistry::new().with(required);
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);

        let setter = property.setter.ok_or_else(|| crate::Error::Error("no setter".to_string()))?;
        let getter = property.getter.ok_or_else(|| crate::Error::Error("no getter".to_string()))?;
        let applications = selector.for_method(setter)?;
        assert_eq!(applications.len(), 1);
        assert_eq!(applications[0].param, Some(0));
        assert!(selector.for_method(getter)?.is_empty());
        assert_eq!(selector.kind_of(setter)?, (MemberKind::Property, AccessorRole::Setter(name)));
        Ok(())
    }

    #[test]
    fn type_scoped_validators_bind_setters_only() -> Result<()> {
        let mut module = Module::new("Test");
        let person = ClassBuilder::new("Demo", "Person")
            .marker(Marker::new("Required"))
            .build(&mut module)?;
        let name = auto_property(&mut module, person, "Name", TypeSig::String, Vec::new())?;
        let rename = noop_method(&mut module, person, "Rename", None)?;
        let property = module.property(name)?.clone();

        let registry = InterceptorRegistry::new().with(
            InterceptorDescriptor::validator("Required", |_, _, _| Ok(()))
                .targets(Targets::METHOD | Targets::PROPERTY),
        );
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let selector = Selector::new(&module, &registry, &cache, &config);

        let setter = property.setter.ok_or_else(|| crate::Error::Error("no setter".to_string()))?;
        let applications = selector.for_method(setter)?;
        assert_eq!(applications.len(), 1);
        assert_eq!(applications[0].scope, MarkerScope::Type);
        assert_eq!(applications[0].param, Some(0));
        assert!(selector.for_method(rename)?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_patterns_fail_the_selection() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service")
            .marker(Marker::new("Log").with_str(ARG_TYPE_PATTERN, "regex:("))
            .build(&mut module)?;
        noop_method(&mut module, service, "Run", None)?;

        let registry = registry();
        let cache = WeaveCache::new();
        let config = WeaveConfig::default();
        let result = Selector::new(&module, &registry, &cache, &config).select();
        assert!(matches!(result, Err(crate::Error::Selection { .. })));
        Ok(())
    }
}
