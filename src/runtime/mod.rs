//! The runtime contract between woven code and interceptors.
//!
//! Woven members call into a small runtime library (see [`intrinsics`]) that creates context
//! records and dispatches to interceptor hooks. This module defines what those hooks see:
//!
//! - [`Value`] and [`ObjectRef`] - Values flowing through contexts, with transparent boxing
//! - [`MethodContext`], [`MemberContext`], [`EventContext`] - Per-invocation records
//! - [`Host`] - Read access to the executing process for hooks that render or inspect values
//! - [`Fault`] - An exception raised by a hook, delivered to the caller of the woven member
//! - [`InstanceLocks`] - Per-instance reader/writer sections for locking interceptors

mod context;
pub mod intrinsics;
mod sync;
mod value;

use std::fmt;

pub use context::{Argument, EventContext, MemberContext, MemberHandle, MethodContext};
pub use sync::{InstanceLocks, LockKey, SectionLock};
pub use value::{ObjectRef, Pointer, Value};

use crate::runtime::intrinsics::{ARGUMENT_EXCEPTION_TYPE, INVALID_OPERATION_TYPE};

/// The process a hook runs in.
///
/// Hooks are called with no host lock held, so they may query the host freely.
pub trait Host {
    /// Runtime type name of a value, `null` for null
    fn type_name(&self, value: &Value) -> String;

    /// Human-readable rendering of a value: numbers and strings as is, objects by type
    /// name, exceptions with their message
    fn display(&self, value: &Value) -> String;

    /// Message of an exception object
    fn exception_message(&self, value: &Value) -> Option<String>;
}

/// An exception raised by a hook.
///
/// The host turns it into a managed exception object of type `type_name` and throws it at
/// the hook's call site, so it propagates through the woven member exactly like an
/// exception of the original body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Fully-qualified exception type
    pub type_name: String,
    /// Exception message
    pub message: String,
}

impl Fault {
    /// Fault of an arbitrary exception type
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Fault {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Contract violation on an argument
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Fault::new(ARGUMENT_EXCEPTION_TYPE, message)
    }

    /// Operation not allowed in the object's current state
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Fault::new(INVALID_OPERATION_TYPE, message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}
