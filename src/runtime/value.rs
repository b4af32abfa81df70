//! Values exchanged between woven code and interceptor hooks.
//!
//! Boxing is transparent: a boxed `int32` is the same [`Value::I4`] as the unboxed one, so
//! hooks read argument and return values without unwrapping. Heap objects are referenced
//! through [`ObjectRef`], whose identity is stable for the lifetime of the host.

use std::{fmt, sync::Arc};

use crate::metadata::{
    member::{FieldId, MethodId},
    signature::TypeSig,
};

/// Identity of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef(pub usize);

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A managed pointer produced by `ldarga`, `ldloca`, `ldflda`, `ldsflda` or `ldelema`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pointer {
    /// Local slot of the frame at the given call depth
    Local {
        /// Call depth of the owning frame
        frame: usize,
        /// Local slot
        index: u16,
    },
    /// Argument slot of the frame at the given call depth
    Argument {
        /// Call depth of the owning frame
        frame: usize,
        /// Argument slot
        index: u16,
    },
    /// Instance field of a heap object
    Field {
        /// Owning object
        object: ObjectRef,
        /// Field definition
        field: FieldId,
    },
    /// Static field
    Static(FieldId),
    /// Array element
    Element {
        /// Owning array
        array: ObjectRef,
        /// Element index
        index: usize,
    },
}

/// A value on the evaluation stack, in a local, an argument, a field or a context.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null reference, also the unset state of context slots
    Null,
    /// `int32`, `bool` and `char`
    I4(i32),
    /// `int64`
    I8(i64),
    /// `float64`
    R8(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Heap object
    Ref(ObjectRef),
    /// Managed pointer
    Ptr(Pointer),
    /// Function pointer pushed by `ldftn`
    Method(MethodId),
}

impl Value {
    /// Zero value of a type: `0` for numbers, null for references
    #[must_use]
    pub fn default_for(sig: &TypeSig) -> Value {
        match sig {
            TypeSig::Boolean | TypeSig::Char | TypeSig::I4 => Value::I4(0),
            TypeSig::I8 | TypeSig::I => Value::I8(0),
            TypeSig::R8 => Value::R8(0.0),
            _ => Value::Null,
        }
    }

    /// True for [`Value::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of `int32` and `int64` values
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I4(v) => Some(i64::from(*v)),
            Value::I8(v) => Some(*v),
            _ => None,
        }
    }

    /// `int32` view, truncating `int64`
    #[must_use]
    pub fn as_i4(&self) -> Option<i32> {
        match self {
            Value::I4(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Value::I8(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Float view of numeric values
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Value::I8(v) => Some(*v as f64),
            Value::I4(v) => Some(f64::from(*v)),
            Value::R8(v) => Some(*v),
            _ => None,
        }
    }

    /// String contents
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Heap identity
    #[must_use]
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Ref(object) => Some(*object),
            _ => None,
        }
    }

    /// Truth value as tested by `brtrue`: non-zero numbers and non-null references
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::I4(v) => *v != 0,
            Value::I8(v) => *v != 0,
            Value::R8(v) => *v != 0.0,
            _ => true,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I4(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I8(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::R8(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::I4(i32::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Ref(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::I4(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::R8(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Ref(object) => write!(f, "{object}"),
            Value::Ptr(pointer) => write!(f, "&{pointer:?}"),
            Value::Method(method) => write!(f, "fn#{}", method.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(Value::default_for(&TypeSig::I4), Value::I4(0));
        assert_eq!(Value::default_for(&TypeSig::Boolean), Value::I4(0));
        assert_eq!(Value::default_for(&TypeSig::R8), Value::R8(0.0));
        assert!(Value::default_for(&TypeSig::String).is_null());
        assert!(Value::default_for(&TypeSig::GenericParam(0)).is_null());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(Value::from(true).is_truthy());
        assert!(Value::from("").is_truthy());
        assert!(Value::Ref(ObjectRef(0)).is_truthy());
    }

    #[test]
    fn display() {
        assert_eq!(Value::from(5).to_string(), "5");
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Ref(ObjectRef(3)).to_string(), "#3");
    }
}
