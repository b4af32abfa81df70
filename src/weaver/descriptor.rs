//! Interceptor descriptors.
//!
//! An [`InterceptorDescriptor`] is a flat capability record: selection filters, the block
//! kind, and an optional function for every hook the interceptor implements. The weaver
//! only emits calls for hooks that are present, and the host only dispatches to them.
//!
//! Hooks receive the [`Host`] they run in and the per-invocation context. Returning a
//! [`Fault`] throws a managed exception at the hook's call site.
//!
//! # Example
//!
//! ```rust
//! use dotweave::weaver::{ContextUsage, InterceptorDescriptor, Targets};
//!
//! let timing = InterceptorDescriptor::wrapping("Demo.Timing")
//!     .targets(Targets::METHOD)
//!     .uses(ContextUsage::empty())
//!     .on_entry(|_, ctx| {
//!         ctx.set_token(std::time::Instant::now());
//!         Ok(())
//!     })
//!     .on_exit(|_, ctx| {
//!         if let Some(start) = ctx.token::<std::time::Instant>() {
//!             log::debug!("{} took {:?}", ctx.method_name(), start.elapsed());
//!         }
//!         Ok(())
//!     });
//! assert!(timing.on_exit.is_some());
//! ```

use std::{fmt, sync::Arc};

use bitflags::bitflags;
use strum::Display;

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        marker::Marker,
        member::{MethodId, TypeId},
        module::Module,
    },
    runtime::{EventContext, Fault, Host, MemberContext, MethodContext, Value},
    Result,
};

bitflags! {
    /// Member kinds an interceptor may apply to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Targets: u16 {
        /// Instance constructors
        const CONSTRUCTOR = 0x0001;
        /// Ordinary methods
        const METHOD = 0x0002;
        /// Property accessors
        const PROPERTY = 0x0004;
        /// Field accesses
        const FIELD = 0x0008;
        /// Event accessors and raises
        const EVENT = 0x0010;
        /// Parameters
        const PARAMETER = 0x0020;
        /// Types, for structural rules
        const CLASS = 0x0040;
    }
}

impl Default for Targets {
    fn default() -> Self {
        Targets::all()
    }
}

bitflags! {
    /// Visibilities an interceptor may apply to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        /// Public members
        const PUBLIC = 0x01;
        /// Private, protected and internal members
        const NON_PUBLIC = 0x02;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Modifiers::all()
    }
}

bitflags! {
    /// Method context slots an interceptor's hooks read
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextUsage: u8 {
        /// `proceed` is read or cleared
        const PROCEED = 0x01;
        /// `arguments` is read
        const ARGUMENTS = 0x02;
        /// `instance` is read
        const INSTANCE = 0x04;
        /// `method` is read
        const METHOD = 0x08;
        /// `returns` is read or overridden
        const RETURNS = 0x10;
    }
}

impl Default for ContextUsage {
    fn default() -> Self {
        ContextUsage::all()
    }
}

/// Shape of the code an interceptor needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BlockKind {
    /// Entry, exit, success and exception hooks around a full invocation
    Wrapping,
    /// Code fragments injected at the start and end of the body, without a context
    Inline,
}

/// Outcome of a hook; a [`Fault`] becomes a managed exception
pub type HookResult = std::result::Result<(), Fault>;
/// Hook over a method invocation
pub type MethodHook = Arc<dyn Fn(&dyn Host, &mut MethodContext) -> HookResult + Send + Sync>;
/// Hook over a field or property access
pub type MemberHook = Arc<dyn Fn(&dyn Host, &mut MemberContext) -> HookResult + Send + Sync>;
/// Hook over an event operation
pub type EventHook = Arc<dyn Fn(&dyn Host, &mut EventContext) -> HookResult + Send + Sync>;
/// Contract check of one value, given the parameter or property name
pub type ValidateFn = Arc<dyn Fn(&dyn Host, &Value, &str) -> HookResult + Send + Sync>;
/// Emits an inline code fragment
pub type FragmentFn = Arc<dyn Fn(&mut Fragment<'_>) -> Result<()> + Send + Sync>;
/// Structural rule over a type, returning the violation message
pub type TypeRule = Arc<dyn Fn(&Module, TypeId) -> std::result::Result<(), String> + Send + Sync>;

/// Emission site handed to inline fragment functions.
///
/// The fragment runs against raw arguments: no context object exists yet (begin) or any
/// more (end). At the end site the result, if any, is stored in a local and the evaluation
/// stack is empty.
pub struct Fragment<'a> {
    /// Assembler of the new body
    pub asm: &'a mut InstructionAssembler,
    /// Module being woven, for interning tokens
    pub module: &'a mut Module,
    /// Member whose body is built
    pub method: MethodId,
    /// Parameter the marker is declared on
    pub param: Option<usize>,
    /// The marker that selected the interceptor
    pub marker: &'a Marker,
    /// Interceptor class
    pub class: &'a str,
}

/// One cross-cutting behavior.
///
/// Identity is by `class`: two descriptors with the same class are the same interceptor.
#[derive(Clone)]
pub struct InterceptorDescriptor {
    /// Interceptor class, matched against marker classes
    pub class: String,
    /// Code shape
    pub block_kind: BlockKind,
    /// Member kinds the interceptor may apply to
    pub targets: Targets,
    /// Visibilities the interceptor may apply to
    pub modifiers: Modifiers,
    /// Filter on the fully-qualified declaring type name
    pub type_pattern: Option<String>,
    /// Filter on the member name
    pub member_pattern: Option<String>,
    /// Never applied
    pub exclude: bool,
    /// Method context slots the hooks read
    pub usage: ContextUsage,
    /// Runs before the original body
    pub on_entry: Option<MethodHook>,
    /// Runs once after the original body on every path
    pub on_exit: Option<MethodHook>,
    /// Runs after the original body returned normally
    pub on_success: Option<MethodHook>,
    /// Runs when the original body threw; the exception is rethrown afterwards
    pub on_exception: Option<MethodHook>,
    /// Runs after a field or property read
    pub on_get_value: Option<MemberHook>,
    /// Runs before a field or property write
    pub on_set_value: Option<MemberHook>,
    /// Runs before an event handler is added
    pub on_add_handler: Option<EventHook>,
    /// Runs before an event handler is removed
    pub on_remove_handler: Option<EventHook>,
    /// Runs before an event is raised
    pub on_invoke_event: Option<EventHook>,
    /// Contract check
    pub validate: Option<ValidateFn>,
    /// Inline fragment emitted before the original body
    pub begin: Option<FragmentFn>,
    /// Inline fragment emitted after the original body
    pub end: Option<FragmentFn>,
    /// Structural rules checked once per type before rewriting
    pub rules: Vec<TypeRule>,
}

impl InterceptorDescriptor {
    fn new(class: impl Into<String>, block_kind: BlockKind) -> Self {
        InterceptorDescriptor {
            class: class.into(),
            block_kind,
            targets: Targets::default(),
            modifiers: Modifiers::default(),
            type_pattern: None,
            member_pattern: None,
            exclude: false,
            usage: ContextUsage::default(),
            on_entry: None,
            on_exit: None,
            on_success: None,
            on_exception: None,
            on_get_value: None,
            on_set_value: None,
            on_add_handler: None,
            on_remove_handler: None,
            on_invoke_event: None,
            validate: None,
            begin: None,
            end: None,
            rules: Vec::new(),
        }
    }

    /// Wrapping interceptor with no hooks yet
    #[must_use]
    pub fn wrapping(class: impl Into<String>) -> Self {
        Self::new(class, BlockKind::Wrapping)
    }

    /// Inline interceptor with no fragments yet
    #[must_use]
    pub fn inline(class: impl Into<String>) -> Self {
        let mut descriptor = Self::new(class, BlockKind::Inline);
        descriptor.usage = ContextUsage::empty();
        descriptor
    }

    /// Contract validator for parameters and property setters.
    ///
    /// The emitted fragment passes the raw argument, its name and the class to `validate`
    /// before any original code runs.
    #[must_use]
    pub fn validator<F>(class: impl Into<String>, validate: F) -> Self
    where
        F: Fn(&dyn Host, &Value, &str) -> HookResult + Send + Sync + 'static,
    {
        let mut descriptor = Self::inline(class);
        descriptor.targets = Targets::PARAMETER | Targets::PROPERTY;
        descriptor.validate = Some(Arc::new(validate));
        descriptor.begin = Some(Arc::new(crate::weaver::emit::validation_fragment));
        descriptor
    }

    /// Restrict the member kinds
    #[must_use]
    pub fn targets(mut self, targets: Targets) -> Self {
        self.targets = targets;
        self
    }

    /// Restrict the visibilities
    #[must_use]
    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Filter on the declaring type name
    #[must_use]
    pub fn type_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.type_pattern = Some(pattern.into());
        self
    }

    /// Filter on the member name
    #[must_use]
    pub fn member_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.member_pattern = Some(pattern.into());
        self
    }

    /// Never apply this interceptor
    #[must_use]
    pub fn excluded(mut self) -> Self {
        self.exclude = true;
        self
    }

    /// Declare the context slots the hooks read; all of them unless stated
    #[must_use]
    pub fn uses(mut self, usage: ContextUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the entry hook
    #[must_use]
    pub fn on_entry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MethodContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_entry = Some(Arc::new(hook));
        self
    }

    /// Set the exit hook
    #[must_use]
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MethodContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// Set the success hook
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MethodContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Set the exception hook
    #[must_use]
    pub fn on_exception<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MethodContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_exception = Some(Arc::new(hook));
        self
    }

    /// Set the read hook of fields and properties
    #[must_use]
    pub fn on_get_value<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MemberContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_get_value = Some(Arc::new(hook));
        self
    }

    /// Set the write hook of fields and properties
    #[must_use]
    pub fn on_set_value<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut MemberContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_set_value = Some(Arc::new(hook));
        self
    }

    /// Set the subscription hook of events
    #[must_use]
    pub fn on_add_handler<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut EventContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_add_handler = Some(Arc::new(hook));
        self
    }

    /// Set the unsubscription hook of events
    #[must_use]
    pub fn on_remove_handler<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut EventContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_remove_handler = Some(Arc::new(hook));
        self
    }

    /// Set the raise hook of events
    #[must_use]
    pub fn on_invoke_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Host, &mut EventContext) -> HookResult + Send + Sync + 'static,
    {
        self.on_invoke_event = Some(Arc::new(hook));
        self
    }

    /// Set the fragment emitted before the original body
    #[must_use]
    pub fn begin<F>(mut self, fragment: F) -> Self
    where
        F: Fn(&mut Fragment<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.begin = Some(Arc::new(fragment));
        self
    }

    /// Set the fragment emitted after the original body
    #[must_use]
    pub fn end<F>(mut self, fragment: F) -> Self
    where
        F: Fn(&mut Fragment<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.end = Some(Arc::new(fragment));
        self
    }

    /// Add a structural rule
    #[must_use]
    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Module, TypeId) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.rules.push(Arc::new(rule));
        self
    }
}

impl fmt::Debug for InterceptorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<&str> = [
            ("entry", self.on_entry.is_some()),
            ("exit", self.on_exit.is_some()),
            ("success", self.on_success.is_some()),
            ("exception", self.on_exception.is_some()),
            ("get", self.on_get_value.is_some()),
            ("set", self.on_set_value.is_some()),
            ("add", self.on_add_handler.is_some()),
            ("remove", self.on_remove_handler.is_some()),
            ("invoke", self.on_invoke_event.is_some()),
            ("validate", self.validate.is_some()),
            ("begin", self.begin.is_some()),
            ("end", self.end.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect();

        f.debug_struct("InterceptorDescriptor")
            .field("class", &self.class)
            .field("block_kind", &self.block_kind)
            .field("targets", &self.targets)
            .field("modifiers", &self.modifiers)
            .field("type_pattern", &self.type_pattern)
            .field("member_pattern", &self.member_pattern)
            .field("exclude", &self.exclude)
            .field("usage", &self.usage)
            .field("hooks", &hooks)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl PartialEq for InterceptorDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
    }
}

impl Eq for InterceptorDescriptor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_everywhere() {
        let descriptor = InterceptorDescriptor::wrapping("Demo.Log");
        assert_eq!(descriptor.targets, Targets::all());
        assert_eq!(descriptor.modifiers, Modifiers::all());
        assert_eq!(descriptor.usage, ContextUsage::all());
        assert_eq!(descriptor.block_kind, BlockKind::Wrapping);
        assert!(!descriptor.exclude);
    }

    #[test]
    fn identity_is_by_class() {
        let a = InterceptorDescriptor::wrapping("Demo.Log").on_entry(|_, _| Ok(()));
        let b = InterceptorDescriptor::wrapping("Demo.Log").targets(Targets::FIELD);
        assert_eq!(a, b);
        assert_ne!(a, InterceptorDescriptor::wrapping("Demo.Other"));
    }

    #[test]
    fn validator_shape() {
        let required = InterceptorDescriptor::validator("Demo.Required", |_, value, name| {
            if value.is_null() {
                Err(Fault::validation(format!("{name} is required")))
            } else {
                Ok(())
            }
        });
        assert_eq!(required.block_kind, BlockKind::Inline);
        assert!(required.usage.is_empty());
        assert!(required.begin.is_some());
        assert!(required.targets.contains(Targets::PARAMETER));
        assert!(format!("{required:?}").contains("validate"));
    }
}
