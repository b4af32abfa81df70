//! Caches shared between weave passes.

use crate::weaver::{pattern::PatternCache, usage::UsageCache};

/// Compiled patterns and per-class hook usage.
///
/// A cache lives as long as its owner keeps it: share one `Arc<WeaveCache>` between
/// [`crate::weaver::Weaver`]s to reuse analysis across passes, or let every weaver create
/// its own. Entries are keyed by pattern text and interceptor class, so the cache must not
/// be shared between registries that reuse a class name for a different descriptor.
#[derive(Debug, Default)]
pub struct WeaveCache {
    patterns: PatternCache,
    usage: UsageCache,
}

impl WeaveCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled selection patterns
    #[must_use]
    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Hook usage per interceptor class
    #[must_use]
    pub fn usage(&self) -> &UsageCache {
        &self.usage
    }
}
