//! Managed heap of the in-process host.
//!
//! [`ManagedHeap`] stores every object created while executing woven code:
//!
//! - **Instances** - Objects of module types with field storage by [`FieldId`]
//! - **Arrays** - Single-dimensional arrays of [`Value`]s
//! - **Delegates** - Invocation lists of `(target, method)` pairs
//! - **Exceptions** - Runtime-library exceptions with a message
//! - **Contexts** - The records handed to interceptor hooks
//! - **Interceptors and member handles** - Cached singletons resolved by woven code
//!
//! Objects are referenced via [`ObjectRef`]. References remain valid for the lifetime of the
//! heap; no garbage collection is simulated.

use std::{collections::HashMap, sync::Arc};

use crate::{
    metadata::member::{FieldId, MethodId, TypeId},
    metadata::signature::TypeSig,
    runtime::{
        intrinsics::{EVENT_CONTEXT_TYPE, MEMBER_CONTEXT_TYPE, METHOD_CONTEXT_TYPE, ASPECT_TYPE},
        EventContext, MemberContext, MemberHandle, MethodContext, ObjectRef, Value,
    },
    Error, Result,
};

/// Object stored on the managed heap.
#[derive(Debug)]
pub enum HeapObject {
    /// Instance of a module type
    Instance {
        /// Runtime type
        type_id: TypeId,
        /// Fully-qualified runtime type name
        type_name: String,
        /// Instance field values
        fields: HashMap<FieldId, Value>,
    },
    /// Single-dimensional array
    Array {
        /// Element type
        element: TypeSig,
        /// Elements
        items: Vec<Value>,
    },
    /// Delegate with its invocation list
    Delegate {
        /// Fully-qualified delegate type name
        type_name: String,
        /// `(target, method)` pairs in invocation order; the target is null for static methods
        targets: Vec<(Value, MethodId)>,
    },
    /// Runtime-library exception
    Exception {
        /// Fully-qualified exception type name
        type_name: String,
        /// Exception message
        message: String,
    },
    /// Method invocation context
    MethodContext(Box<MethodContext>),
    /// Field or property access context
    MemberContext(MemberContext),
    /// Event context
    EventContext(EventContext),
    /// Interceptor instance of the named class
    Interceptor(String),
    /// Registered member identity
    Member(Arc<MemberHandle>),
}

impl HeapObject {
    /// Fully-qualified runtime type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            HeapObject::Instance { type_name, .. }
            | HeapObject::Delegate { type_name, .. }
            | HeapObject::Exception { type_name, .. } => type_name,
            HeapObject::Array { .. } => "System.Object[]",
            HeapObject::MethodContext(_) => METHOD_CONTEXT_TYPE,
            HeapObject::MemberContext(_) => MEMBER_CONTEXT_TYPE,
            HeapObject::EventContext(_) => EVENT_CONTEXT_TYPE,
            HeapObject::Interceptor(_) => ASPECT_TYPE,
            HeapObject::Member(_) => "System.Reflection.MemberInfo",
        }
    }
}

/// Append-only object store.
#[derive(Debug, Default)]
pub struct ManagedHeap {
    objects: Vec<HeapObject>,
}

impl ManagedHeap {
    /// Empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its reference
    pub fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        self.objects.push(object);
        ObjectRef(self.objects.len() - 1)
    }

    /// Object behind a reference
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for a dangling reference.
    pub fn get(&self, object: ObjectRef) -> Result<&HeapObject> {
        self.objects
            .get(object.0)
            .ok_or_else(|| Error::Emulation(format!("Dangling object reference {object}")))
    }

    /// Mutable object behind a reference
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] for a dangling reference.
    pub fn get_mut(&mut self, object: ObjectRef) -> Result<&mut HeapObject> {
        self.objects
            .get_mut(object.0)
            .ok_or_else(|| Error::Emulation(format!("Dangling object reference {object}")))
    }

    /// Number of objects allocated so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing was allocated yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Allocate a runtime-library exception
    pub fn alloc_exception(
        &mut self,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> ObjectRef {
        self.alloc(HeapObject::Exception {
            type_name: type_name.into(),
            message: message.into(),
        })
    }

    /// Allocate an `object[]` holding `items`
    pub fn alloc_array(&mut self, items: Vec<Value>) -> ObjectRef {
        self.alloc(HeapObject::Array {
            element: TypeSig::Object,
            items,
        })
    }

    /// Method context behind a reference
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the object is not a method context.
    pub fn method_context(&mut self, object: ObjectRef) -> Result<&mut MethodContext> {
        match self.get_mut(object)? {
            HeapObject::MethodContext(ctx) => Ok(&mut **ctx),
            other => Err(Error::Emulation(format!(
                "{object} is a {}, not a method context",
                other.type_name()
            ))),
        }
    }

    /// Member context behind a reference
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the object is not a member context.
    pub fn member_context(&mut self, object: ObjectRef) -> Result<&mut MemberContext> {
        match self.get_mut(object)? {
            HeapObject::MemberContext(ctx) => Ok(ctx),
            other => Err(Error::Emulation(format!(
                "{object} is a {}, not a member context",
                other.type_name()
            ))),
        }
    }

    /// Event context behind a reference
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the object is not an event context.
    pub fn event_context(&mut self, object: ObjectRef) -> Result<&mut EventContext> {
        match self.get_mut(object)? {
            HeapObject::EventContext(ctx) => Ok(ctx),
            other => Err(Error::Emulation(format!(
                "{object} is a {}, not an event context",
                other.type_name()
            ))),
        }
    }

    /// Elements of an array
    ///
    /// # Errors
    /// Returns [`Error::Emulation`] if the object is not an array.
    pub fn array(&mut self, object: ObjectRef) -> Result<&mut Vec<Value>> {
        match self.get_mut(object)? {
            HeapObject::Array { items, .. } => Ok(items),
            other => Err(Error::Emulation(format!(
                "{object} is a {}, not an array",
                other.type_name()
            ))),
        }
    }

    /// Runtime type name of a value
    #[must_use]
    pub fn type_name_of(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::I4(_) => "System.Int32".to_string(),
            Value::I8(_) => "System.Int64".to_string(),
            Value::R8(_) => "System.Double".to_string(),
            Value::Str(_) => "System.String".to_string(),
            Value::Ptr(_) | Value::Method(_) => "System.IntPtr".to_string(),
            Value::Ref(object) => self
                .get(*object)
                .map_or_else(|_| "<dangling>".to_string(), |o| o.type_name().to_string()),
        }
    }

    /// Message of an exception object; the type name for module-defined throwables
    #[must_use]
    pub fn exception_message(&self, value: &Value) -> Option<String> {
        let object = value.as_object()?;
        match self.get(object).ok()? {
            HeapObject::Exception { message, .. } => Some(message.clone()),
            HeapObject::Instance { type_name, .. } => Some(type_name.clone()),
            _ => None,
        }
    }

    /// Human-readable rendering of a value
    #[must_use]
    pub fn display(&self, value: &Value) -> String {
        match value {
            Value::Ref(object) => match self.get(*object) {
                Ok(HeapObject::Exception { type_name, message }) => {
                    format!("{type_name}: {message}")
                }
                Ok(HeapObject::Array { items, .. }) => {
                    let rendered: Vec<String> =
                        items.iter().map(|item| self.display(item)).collect();
                    format!("[{}]", rendered.join(", "))
                }
                Ok(HeapObject::Member(handle)) => handle.key.clone(),
                Ok(other) => other.type_name().to_string(),
                Err(_) => "<dangling>".to_string(),
            },
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_stable() {
        let mut heap = ManagedHeap::new();
        let first = heap.alloc_exception("System.Exception", "boom");
        let second = heap.alloc_array(vec![Value::I4(1), Value::from("a")]);
        assert_ne!(first, second);
        assert_eq!(heap.len(), 2);

        assert_eq!(heap.type_name_of(&Value::Ref(first)), "System.Exception");
        assert_eq!(heap.display(&Value::Ref(first)), "System.Exception: boom");
        assert_eq!(heap.display(&Value::Ref(second)), "[1, a]");
        assert_eq!(heap.exception_message(&Value::Ref(first)).as_deref(), Some("boom"));
        assert!(heap.get(ObjectRef(9)).is_err());
    }

    #[test]
    fn contexts_are_typed() {
        let mut heap = ManagedHeap::new();
        let ctx = heap.alloc(HeapObject::MethodContext(Box::default()));
        heap.method_context(ctx).unwrap().proceed = false;
        assert!(!heap.method_context(ctx).unwrap().proceed);
        assert!(heap.member_context(ctx).is_err());
        assert_eq!(heap.type_name_of(&Value::Ref(ctx)), METHOD_CONTEXT_TYPE);
    }
}
