//! Per-invocation records handed to interceptor hooks.
//!
//! Woven code creates one [`MethodContext`] per instrumented call, one [`MemberContext`] per
//! intercepted field or property access and one [`EventContext`] per intercepted event
//! operation. Only the slots some applicable interceptor reads are populated; the others keep
//! their defaults.

use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use crate::{metadata::marker::Marker, runtime::Value};

/// Identity of a woven member, registered once and shared by all its invocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHandle {
    /// Stable key, `Namespace.Type::Name(param,types)`
    pub key: String,
    /// Simple member name
    pub name: String,
    /// Fully-qualified declaring type name
    pub declaring: String,
    /// Declarative markers visible to hooks
    pub markers: Vec<Marker>,
}

impl MemberHandle {
    /// First marker of the given interceptor class
    #[must_use]
    pub fn marker(&self, class: &str) -> Option<&Marker> {
        self.markers.iter().find(|marker| marker.class == class)
    }
}

/// One captured argument
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Declared parameter name
    pub name: String,
    /// Passed by reference
    pub is_by_ref: bool,
    /// Value at entry, boxed if it is a value type
    pub value: Value,
}

type StateToken = Arc<dyn Any + Send + Sync>;

/// Context of one instrumented method invocation.
pub struct MethodContext {
    /// The member being invoked
    pub method: Option<MemberHandle>,
    /// Arguments in declaration order, excluding output parameters
    pub arguments: Vec<Argument>,
    /// Result of the call; an entry hook may set it together with `proceed = false`, a
    /// success hook may replace it
    pub returns: Value,
    /// Receiver, null for static members
    pub instance: Value,
    /// Cleared by an entry hook to skip the original body
    pub proceed: bool,
    /// The thrown object, set while exception hooks run
    pub exception: Option<Value>,
    tokens: HashMap<String, StateToken>,
    current: String,
}

impl MethodContext {
    /// Empty context with `proceed = true`
    #[must_use]
    pub fn new() -> Self {
        MethodContext {
            method: None,
            arguments: Vec::new(),
            returns: Value::Null,
            instance: Value::Null,
            proceed: true,
            exception: None,
            tokens: HashMap::new(),
            current: String::new(),
        }
    }

    /// Captured argument by name
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|argument| argument.name == name)
    }

    /// Name of the invoked member, empty if the member identity was not captured
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method.as_ref().map_or("", |handle| handle.name.as_str())
    }

    /// Interceptor class whose hook is running
    #[must_use]
    pub fn interceptor(&self) -> &str {
        &self.current
    }

    /// Select the interceptor whose token subsequent calls read and write
    pub fn enter(&mut self, class: &str) {
        if self.current != class {
            self.current = class.to_string();
        }
    }

    /// State stored by an earlier hook of the running interceptor during this invocation
    #[must_use]
    pub fn token<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.tokens
            .get(&self.current)
            .and_then(|token| token.downcast_ref::<T>())
    }

    /// Store state for the later hooks of the running interceptor
    pub fn set_token<T: Any + Send + Sync>(&mut self, value: T) {
        self.tokens.insert(self.current.clone(), Arc::new(value));
    }
}

impl Default for MethodContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodContext")
            .field("method", &self.method.as_ref().map(|handle| &handle.key))
            .field("arguments", &self.arguments)
            .field("returns", &self.returns)
            .field("instance", &self.instance)
            .field("proceed", &self.proceed)
            .field("exception", &self.exception)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

/// Context of one intercepted field or property access.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberContext {
    /// Object owning the location, null for static members
    pub instance: Value,
    /// Field or property name
    pub location_name: String,
    /// Value read, or value about to be written; hooks may replace it
    pub value: Value,
    /// Cleared by a set hook to drop the write
    pub proceed: bool,
    /// True when the location is a property rather than a field
    pub is_property: bool,
    /// Indexer arguments in declaration order, empty for fields and plain properties
    pub index: Vec<Value>,
}

impl MemberContext {
    /// Context for an access of `location_name`
    #[must_use]
    pub fn new(
        instance: Value,
        location_name: impl Into<String>,
        value: Value,
        is_property: bool,
    ) -> Self {
        MemberContext {
            instance,
            location_name: location_name.into(),
            value,
            proceed: true,
            is_property,
            index: Vec::new(),
        }
    }
}

/// Context of one intercepted event subscription, unsubscription or raise.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    /// Object owning the event, null for static events
    pub instance: Value,
    /// Delegate being added or removed, or the combined delegate being invoked
    pub handler: Value,
    /// Cleared by a hook to skip the operation
    pub proceed: bool,
    /// Positional arguments of a raise; hooks may rewrite them
    pub arguments: Vec<Value>,
    /// Result of the raise, unused for `void` delegates
    pub value: Value,
}

impl EventContext {
    /// Context for adding or removing `handler`
    #[must_use]
    pub fn new(instance: Value, handler: Value) -> Self {
        EventContext {
            instance,
            handler,
            proceed: true,
            arguments: Vec::new(),
            value: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_scoped_per_interceptor() {
        let mut ctx = MethodContext::new();
        ctx.enter("Timing");
        ctx.set_token(42_u64);
        ctx.enter("Log");
        assert!(ctx.token::<u64>().is_none());
        ctx.set_token("log state".to_string());

        ctx.enter("Timing");
        assert_eq!(ctx.token::<u64>(), Some(&42));
        assert!(ctx.token::<String>().is_none());
        assert_eq!(ctx.interceptor(), "Timing");
    }

    #[test]
    fn argument_lookup() {
        let mut ctx = MethodContext::new();
        ctx.arguments.push(Argument {
            name: "x".to_string(),
            is_by_ref: false,
            value: Value::I4(2),
        });
        assert_eq!(ctx.argument("x").map(|a| &a.value), Some(&Value::I4(2)));
        assert!(ctx.argument("y").is_none());
        assert!(ctx.proceed);
        assert_eq!(ctx.method_name(), "");
    }
}
