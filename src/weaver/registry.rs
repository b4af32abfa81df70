//! Process-wide interceptor registry.
//!
//! Markers name interceptor classes; the registry maps those names to descriptors. The
//! weaver reads it during selection and the host reads it when woven code dispatches a hook,
//! so one registry is shared between both through an `Arc`.

use std::sync::Arc;

use dashmap::DashMap;

use crate::weaver::InterceptorDescriptor;

/// Concurrent map from interceptor class to descriptor.
#[derive(Debug, Default)]
pub struct InterceptorRegistry {
    descriptors: DashMap<String, Arc<InterceptorDescriptor>>,
}

impl InterceptorRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any earlier one of the same class
    pub fn register(&self, descriptor: InterceptorDescriptor) -> Arc<InterceptorDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(descriptor.class.clone(), Arc::clone(&descriptor));
        descriptor
    }

    /// Builder-style [`InterceptorRegistry::register`]
    #[must_use]
    pub fn with(self, descriptor: InterceptorDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Descriptor of a class
    #[must_use]
    pub fn get(&self, class: &str) -> Option<Arc<InterceptorDescriptor>> {
        self.descriptors.get(class).map(|entry| Arc::clone(entry.value()))
    }

    /// True if the class is registered
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.descriptors.contains_key(class)
    }

    /// Registered classes, sorted
    #[must_use]
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.descriptors.iter().map(|e| e.key().clone()).collect();
        classes.sort();
        classes
    }

    /// Number of registered classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_replaces_same_class() {
        let registry = InterceptorRegistry::new()
            .with(InterceptorDescriptor::wrapping("Demo.B"))
            .with(InterceptorDescriptor::wrapping("Demo.A"));
        registry.register(InterceptorDescriptor::wrapping("Demo.A").excluded());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.classes(), ["Demo.A", "Demo.B"]);
        assert!(registry.get("Demo.A").unwrap().exclude);
        assert!(registry.get("Demo.C").is_none());
    }
}
