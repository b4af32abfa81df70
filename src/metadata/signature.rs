//! Type and method signatures of the module model.
//!
//! Types are referenced by fully-qualified name rather than by table row, so a
//! signature can point at a definition of the module being woven as well as at a type
//! the host runtime provides (`System.Object`, `Weave.Runtime.MethodContext`, ...).
//!
//! Signatures of members on generic types use [`TypeSig::GenericParam`] /
//! [`TypeSig::MethodGenericParam`] placeholders; [`TypeSig::substitute`] replaces them with
//! the arguments of a concrete instantiation.

use std::fmt;

/// Fully-qualified name of the root object type
pub const OBJECT_TYPE: &str = "System.Object";
/// Fully-qualified name of the root exception type
pub const EXCEPTION_TYPE: &str = "System.Exception";
/// Fully-qualified name of the base type of all delegates
pub const MULTICAST_DELEGATE_TYPE: &str = "System.MulticastDelegate";

/// A type as it appears in a field, local, parameter or operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// No value
    Void,
    /// `bool`, an `int32` on the evaluation stack
    Boolean,
    /// UTF-16 code unit
    Char,
    /// Signed 32-bit integer
    I4,
    /// Signed 64-bit integer
    I8,
    /// 64-bit float
    R8,
    /// Native integer, used for function pointers
    I,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// A reference type by fully-qualified name
    Class(String),
    /// A value type by fully-qualified name
    ValueType(String),
    /// Generic parameter of the declaring type (`!n`)
    GenericParam(u16),
    /// Generic parameter of the method (`!!n`)
    MethodGenericParam(u16),
    /// Instantiation of a generic type definition
    GenericInst(Box<TypeSig>, Vec<TypeSig>),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
    /// Managed reference (`T&`), used for `ref`/`out` parameters
    ByRef(Box<TypeSig>),
}

impl TypeSig {
    /// Reference type by name
    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        TypeSig::Class(name.into())
    }

    /// Value type by name
    #[must_use]
    pub fn value_type(name: impl Into<String>) -> Self {
        TypeSig::ValueType(name.into())
    }

    /// `object[]`
    #[must_use]
    pub fn object_array() -> Self {
        TypeSig::SzArray(Box::new(TypeSig::Object))
    }

    /// True for [`TypeSig::Void`]
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// True if values of this type live on the stack unboxed.
    ///
    /// Generic parameters return `false`; callers that need to box a value of unknown
    /// kind should check [`TypeSig::needs_box`] instead.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I4
            | TypeSig::I8
            | TypeSig::R8
            | TypeSig::I
            | TypeSig::ValueType(_) => true,
            TypeSig::GenericInst(base, _) => base.is_value_type(),
            _ => false,
        }
    }

    /// True if converting a value of this type to `object` requires a `box` instruction
    #[must_use]
    pub fn needs_box(&self) -> bool {
        self.is_value_type()
            || matches!(
                self,
                TypeSig::GenericParam(_) | TypeSig::MethodGenericParam(_)
            )
    }

    /// True for managed references
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeSig::ByRef(_))
    }

    /// The referenced type of a managed reference, the type itself otherwise
    #[must_use]
    pub fn strip_by_ref(&self) -> &TypeSig {
        match self {
            TypeSig::ByRef(inner) => inner,
            other => other,
        }
    }

    /// Fully-qualified name of a named type, or of the definition of a generic instantiation
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        match self {
            TypeSig::Class(name) | TypeSig::ValueType(name) => Some(name),
            TypeSig::GenericInst(base, _) => base.type_name(),
            TypeSig::String => Some("System.String"),
            TypeSig::Object => Some(OBJECT_TYPE),
            _ => None,
        }
    }

    /// True if the signature mentions a generic parameter anywhere
    #[must_use]
    pub fn has_generic_params(&self) -> bool {
        match self {
            TypeSig::GenericParam(_) | TypeSig::MethodGenericParam(_) => true,
            TypeSig::GenericInst(base, args) => {
                base.has_generic_params() || args.iter().any(TypeSig::has_generic_params)
            }
            TypeSig::SzArray(inner) | TypeSig::ByRef(inner) => inner.has_generic_params(),
            _ => false,
        }
    }

    /// Replace generic parameters with the provided instantiation arguments.
    ///
    /// Parameters without a matching argument are left as they are, so an empty argument
    /// list yields the signature unchanged.
    #[must_use]
    pub fn substitute(&self, type_args: &[TypeSig], method_args: &[TypeSig]) -> TypeSig {
        match self {
            TypeSig::GenericParam(index) => type_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeSig::MethodGenericParam(index) => method_args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeSig::GenericInst(base, args) => TypeSig::GenericInst(
                Box::new(base.substitute(type_args, method_args)),
                args.iter()
                    .map(|arg| arg.substitute(type_args, method_args))
                    .collect(),
            ),
            TypeSig::SzArray(inner) => {
                TypeSig::SzArray(Box::new(inner.substitute(type_args, method_args)))
            }
            TypeSig::ByRef(inner) => {
                TypeSig::ByRef(Box::new(inner.substitute(type_args, method_args)))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => write!(f, "void"),
            TypeSig::Boolean => write!(f, "bool"),
            TypeSig::Char => write!(f, "char"),
            TypeSig::I4 => write!(f, "int32"),
            TypeSig::I8 => write!(f, "int64"),
            TypeSig::R8 => write!(f, "float64"),
            TypeSig::I => write!(f, "native int"),
            TypeSig::String => write!(f, "string"),
            TypeSig::Object => write!(f, "object"),
            TypeSig::Class(name) | TypeSig::ValueType(name) => write!(f, "{name}"),
            TypeSig::GenericParam(index) => write!(f, "!{index}"),
            TypeSig::MethodGenericParam(index) => write!(f, "!!{index}"),
            TypeSig::GenericInst(base, args) => {
                write!(f, "{base}<")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            TypeSig::SzArray(inner) => write!(f, "{inner}[]"),
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}

/// Calling convention, parameters and return type of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method, receives `this` as argument 0
    pub has_this: bool,
    /// Declared parameter types, excluding `this`
    pub params: Vec<TypeSig>,
    /// Return type
    pub ret: TypeSig,
    /// Number of generic parameters of the method itself
    pub generic_params: u16,
}

impl MethodSig {
    /// Static method signature
    #[must_use]
    pub fn new_static(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        MethodSig {
            has_this: false,
            params,
            ret,
            generic_params: 0,
        }
    }

    /// Instance method signature
    #[must_use]
    pub fn new_instance(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        MethodSig {
            has_this: true,
            params,
            ret,
            generic_params: 0,
        }
    }

    /// Number of values a call pops from the evaluation stack
    #[must_use]
    pub fn call_pops(&self) -> u8 {
        let count = self.params.len() + usize::from(self.has_this);
        u8::try_from(count).unwrap_or(u8::MAX)
    }

    /// Number of values a call pushes onto the evaluation stack
    #[must_use]
    pub fn call_pushes(&self) -> u8 {
        u8::from(!self.ret.is_void())
    }

    /// Signature with generic parameters replaced
    #[must_use]
    pub fn substitute(&self, type_args: &[TypeSig], method_args: &[TypeSig]) -> MethodSig {
        MethodSig {
            has_this: self.has_this,
            params: self
                .params
                .iter()
                .map(|p| p.substitute(type_args, method_args))
                .collect(),
            ret: self.ret.substitute(type_args, method_args),
            generic_params: self.generic_params,
        }
    }

    /// Parameter list rendered for member keys, e.g. `int32,string`
    #[must_use]
    pub fn param_list(&self) -> String {
        self.params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_nested_instantiation() {
        let sig = TypeSig::GenericInst(
            Box::new(TypeSig::class("Demo.Pair`2")),
            vec![TypeSig::GenericParam(0), TypeSig::MethodGenericParam(0)],
        );
        let resolved = sig.substitute(&[TypeSig::I4], &[TypeSig::String]);
        assert_eq!(
            resolved,
            TypeSig::GenericInst(
                Box::new(TypeSig::class("Demo.Pair`2")),
                vec![TypeSig::I4, TypeSig::String]
            )
        );
        assert!(!resolved.has_generic_params());
        assert_eq!(resolved.to_string(), "Demo.Pair`2<int32,string>");
    }

    #[test]
    fn substitute_without_arguments_is_identity() {
        let sig = TypeSig::SzArray(Box::new(TypeSig::GenericParam(1)));
        assert_eq!(sig.substitute(&[], &[]), sig);
    }

    #[test]
    fn boxing_rules() {
        assert!(TypeSig::I4.needs_box());
        assert!(TypeSig::GenericParam(0).needs_box());
        assert!(!TypeSig::GenericParam(0).is_value_type());
        assert!(!TypeSig::String.needs_box());
        assert!(TypeSig::value_type("Demo.Point").is_value_type());
    }

    #[test]
    fn call_stack_effect() {
        let sig = MethodSig::new_instance(vec![TypeSig::I4, TypeSig::I4], TypeSig::I4);
        assert_eq!(sig.call_pops(), 3);
        assert_eq!(sig.call_pushes(), 1);
        assert_eq!(sig.param_list(), "int32,int32");
    }
}
