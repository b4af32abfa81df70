//! Hook presence and context usage per interceptor class.
//!
//! The weaver emits a call only for hooks an interceptor has, and populates only the
//! method context slots its hooks read. Both facts are derived once per class and cached.

use dashmap::DashMap;

use crate::weaver::descriptor::{BlockKind, ContextUsage, InterceptorDescriptor};

/// What one interceptor needs from woven code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookUsage {
    /// Method context slots to populate
    pub context: ContextUsage,
    /// `OnEntry` is present
    pub entry: bool,
    /// `OnExit` is present
    pub exit: bool,
    /// `OnSuccess` is present
    pub success: bool,
    /// `OnException` is present
    pub exception: bool,
    /// `OnGetValue` is present
    pub get_value: bool,
    /// `OnSetValue` is present
    pub set_value: bool,
    /// `OnAddHandler` is present
    pub add_handler: bool,
    /// `OnRemoveHandler` is present
    pub remove_handler: bool,
    /// `OnInvokeEvent` is present
    pub invoke_event: bool,
    /// A begin fragment is present
    pub begin: bool,
    /// An end fragment is present
    pub end: bool,
}

impl HookUsage {
    /// Derive the usage of `descriptor`.
    ///
    /// Method hooks of inline interceptors are ignored, and an interceptor without method
    /// hooks reads no context slot.
    #[must_use]
    pub fn of(descriptor: &InterceptorDescriptor) -> Self {
        let wrapping = descriptor.block_kind == BlockKind::Wrapping;
        let mut usage = HookUsage {
            context: ContextUsage::empty(),
            entry: wrapping && descriptor.on_entry.is_some(),
            exit: wrapping && descriptor.on_exit.is_some(),
            success: wrapping && descriptor.on_success.is_some(),
            exception: wrapping && descriptor.on_exception.is_some(),
            get_value: descriptor.on_get_value.is_some(),
            set_value: descriptor.on_set_value.is_some(),
            add_handler: descriptor.on_add_handler.is_some(),
            remove_handler: descriptor.on_remove_handler.is_some(),
            invoke_event: descriptor.on_invoke_event.is_some(),
            begin: descriptor.begin.is_some(),
            end: descriptor.end.is_some(),
        };
        if usage.wraps() {
            usage.context = descriptor.usage;
        }
        usage
    }

    /// True if any method hook is present
    #[must_use]
    pub fn wraps(&self) -> bool {
        self.entry || self.exit || self.success || self.exception
    }

    /// True if the original body must run inside a protected region
    #[must_use]
    pub fn needs_region(&self) -> bool {
        self.exit || self.exception
    }

    /// True if a field or property access hook is present
    #[must_use]
    pub fn intercepts_access(&self) -> bool {
        self.get_value || self.set_value
    }

    /// True if an event hook is present
    #[must_use]
    pub fn intercepts_events(&self) -> bool {
        self.add_handler || self.remove_handler || self.invoke_event
    }

    /// True if an inline fragment is present
    #[must_use]
    pub fn has_fragments(&self) -> bool {
        self.begin || self.end
    }

    /// True if nothing would be emitted for this interceptor
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        !(self.wraps()
            || self.intercepts_access()
            || self.intercepts_events()
            || self.has_fragments())
    }
}

/// Concurrent cache of [`HookUsage`] keyed by interceptor class
#[derive(Debug, Default)]
pub struct UsageCache {
    entries: DashMap<String, HookUsage>,
}

impl UsageCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage of `descriptor`, derived on first request
    #[must_use]
    pub fn get(&self, descriptor: &InterceptorDescriptor) -> HookUsage {
        *self
            .entries
            .entry(descriptor.class.clone())
            .or_insert_with(|| HookUsage::of(descriptor))
            .value()
    }

    /// Number of classes analyzed
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no class was analyzed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_follows_method_hooks() {
        let logging = InterceptorDescriptor::wrapping("Log")
            .uses(ContextUsage::ARGUMENTS)
            .on_entry(|_, _| Ok(()));
        let usage = HookUsage::of(&logging);
        assert!(usage.entry && usage.wraps());
        assert!(!usage.needs_region());
        assert_eq!(usage.context, ContextUsage::ARGUMENTS);

        let freeze = InterceptorDescriptor::wrapping("Freeze").on_set_value(|_, _| Ok(()));
        let usage = HookUsage::of(&freeze);
        assert!(!usage.wraps());
        assert!(usage.intercepts_access());
        assert!(usage.context.is_empty());
    }

    #[test]
    fn inline_ignores_method_hooks() {
        let inline = InterceptorDescriptor::inline("Trace").on_exit(|_, _| Ok(()));
        let usage = HookUsage::of(&inline);
        assert!(!usage.exit);
        assert!(usage.is_trivial());

        let required = InterceptorDescriptor::validator("Required", |_, _, _| Ok(()));
        let usage = HookUsage::of(&required);
        assert!(usage.begin && !usage.is_trivial());
    }

    #[test]
    fn cache_keys_by_class() {
        let cache = UsageCache::new();
        let descriptor = InterceptorDescriptor::wrapping("Log").on_exception(|_, _| Ok(()));
        assert!(cache.get(&descriptor).exception);
        assert!(cache.get(&descriptor).needs_region());
        assert_eq!(cache.len(), 1);
    }
}
