//! Name patterns of the selection filters.
//!
//! A pattern is a glob by default: `*` matches any run of characters, `?` matches one
//! character and everything else matches itself. The whole name must match. A pattern
//! starting with `regex:` is a regular expression searched anywhere in the name.
//!
//! Compiled patterns are shared through [`PatternCache`], which stays valid for as long as
//! the owning [`crate::weaver::WeaveCache`] lives.

use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use crate::{Error, Result};

const REGEX_PREFIX: &str = "regex:";

/// A compiled name pattern
#[derive(Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `source`
    ///
    /// # Errors
    /// Returns [`Error::Selection`] if the pattern is not a valid expression.
    pub fn compile(source: &str) -> Result<Pattern> {
        let expression = match source.strip_prefix(REGEX_PREFIX) {
            Some(raw) => raw.to_string(),
            None => glob_to_regex(source),
        };

        let regex = Regex::new(&expression).map_err(|e| Error::Selection {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Pattern {
            source: source.to_string(),
            regex,
        })
    }

    /// True if `name` matches
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut expression = String::with_capacity(glob.len() + 8);
    expression.push('^');
    for c in glob.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expression.push('$');
    expression
}

/// Concurrent cache of compiled patterns keyed by source text
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: DashMap<String, Arc<Pattern>>,
}

impl PatternCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled form of `source`, compiling it on first use
    ///
    /// # Errors
    /// Returns [`Error::Selection`] for a malformed pattern. Failures are not cached.
    pub fn get(&self, source: &str) -> Result<Arc<Pattern>> {
        if let Some(pattern) = self.compiled.get(source) {
            return Ok(Arc::clone(pattern.value()));
        }

        let pattern = Arc::new(Pattern::compile(source)?);
        Ok(Arc::clone(
            self.compiled
                .entry(source.to_string())
                .or_insert(pattern)
                .value(),
        ))
    }

    /// True if any of `names` matches `source`
    ///
    /// # Errors
    /// Returns [`Error::Selection`] for a malformed pattern.
    pub fn matches_any(&self, source: &str, names: &[&str]) -> Result<bool> {
        let pattern = self.get(source)?;
        Ok(names.iter().any(|name| pattern.is_match(name)))
    }

    /// Number of compiled patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    /// True if nothing was compiled yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globs_match_whole_names() -> Result<()> {
        let pattern = Pattern::compile("Get*")?;
        assert!(pattern.is_match("GetName"));
        assert!(pattern.is_match("Get"));
        assert!(!pattern.is_match("TryGetName"));

        let pattern = Pattern::compile("Demo.Class?")?;
        assert!(pattern.is_match("Demo.ClassA"));
        assert!(!pattern.is_match("DemoXClassA"));
        assert!(!pattern.is_match("Demo.ClassAB"));
        Ok(())
    }

    #[test]
    fn regex_prefix_searches() -> Result<()> {
        let pattern = Pattern::compile("regex:Class[AB]")?;
        assert!(pattern.is_match("Demo.ClassB::Run"));
        assert!(!pattern.is_match("Demo.ClassC::Run"));
        assert_eq!(pattern.as_str(), "regex:Class[AB]");
        Ok(())
    }

    #[test]
    fn malformed_regex_is_a_selection_error() {
        match Pattern::compile("regex:(") {
            Err(Error::Selection { pattern, .. }) => assert_eq!(pattern, "regex:("),
            other => panic!("expected a selection error, got {other:?}"),
        }
    }

    #[test]
    fn cache_reuses_compiled_patterns() -> Result<()> {
        let cache = PatternCache::new();
        let first = cache.get("*Service")?;
        let second = cache.get("*Service")?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        assert!(cache.matches_any("*::Run", &["Run", "Demo.A::Run"])?);
        assert!(cache.get("regex:[").is_err());
        assert_eq!(cache.len(), 2);
        Ok(())
    }
}
