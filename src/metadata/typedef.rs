//! Type definitions of the module model.

use bitflags::bitflags;

use crate::metadata::{
    marker::Marker,
    member::{EventId, FieldId, MethodId, PropertyId, Visibility},
    signature::{TypeSig, MULTICAST_DELEGATE_TYPE},
};

bitflags! {
    /// Attributes of a type definition
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// Interface
        const INTERFACE = 0x0020;
        /// Cannot be instantiated
        const ABSTRACT = 0x0080;
        /// Cannot be derived from
        const SEALED = 0x0100;
        /// Struct, values are copied
        const VALUE_TYPE = 0x1000_0000;
        /// Synthesized by a compiler or by the weaver
        const COMPILER_GENERATED = 0x2000_0000;
    }
}

/// A class or struct declared in the module.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    /// Namespace, empty for the global namespace
    pub namespace: String,
    /// Simple name, including the generic arity suffix (`` Box`1 ``)
    pub name: String,
    /// Accessibility
    pub visibility: Visibility,
    /// Attributes
    pub flags: TypeFlags,
    /// Base type, `None` only for `System.Object` itself
    pub base: Option<TypeSig>,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
    /// Methods in declaration order
    pub methods: Vec<MethodId>,
    /// Fields in declaration order
    pub fields: Vec<FieldId>,
    /// Properties in declaration order
    pub properties: Vec<PropertyId>,
    /// Events in declaration order
    pub events: Vec<EventId>,
    /// Markers declared on the type
    pub markers: Vec<Marker>,
}

impl TypeDefinition {
    /// Empty public class deriving from `System.Object`
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDefinition {
            namespace: namespace.into(),
            name: name.into(),
            visibility: Visibility::Public,
            flags: TypeFlags::empty(),
            base: Some(TypeSig::Object),
            generic_params: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            markers: Vec::new(),
        }
    }

    /// Fully-qualified name, `Namespace.Name`
    #[must_use]
    pub fn fullname(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// True for structs
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    /// True if the type declares generic parameters
    #[must_use]
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// True for delegate types
    #[must_use]
    pub fn is_delegate(&self) -> bool {
        self.base
            .as_ref()
            .and_then(TypeSig::type_name)
            .is_some_and(|base| base == MULTICAST_DELEGATE_TYPE)
    }

    /// Signature naming this type. Generic definitions are instantiated over their own
    /// parameters, which is how members of the type refer to it.
    #[must_use]
    pub fn self_sig(&self) -> TypeSig {
        let base = if self.is_value_type() {
            TypeSig::ValueType(self.fullname())
        } else {
            TypeSig::Class(self.fullname())
        };

        if self.is_generic() {
            let args = (0..self.generic_params.len())
                .map(|i| TypeSig::GenericParam(u16::try_from(i).unwrap_or(u16::MAX)))
                .collect();
            TypeSig::GenericInst(Box::new(base), args)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullname_and_self_sig() {
        let mut def = TypeDefinition::new("Demo", "Box`1");
        def.generic_params.push("T".to_string());

        assert_eq!(def.fullname(), "Demo.Box`1");
        assert_eq!(
            def.self_sig(),
            TypeSig::GenericInst(
                Box::new(TypeSig::class("Demo.Box`1")),
                vec![TypeSig::GenericParam(0)]
            )
        );

        let global = TypeDefinition::new("", "Program");
        assert_eq!(global.fullname(), "Program");
        assert_eq!(global.self_sig(), TypeSig::class("Program"));
    }

    #[test]
    fn delegate_detection() {
        let mut def = TypeDefinition::new("Demo", "Handler");
        assert!(!def.is_delegate());
        def.base = Some(TypeSig::class(MULTICAST_DELEGATE_TYPE));
        assert!(def.is_delegate());
    }
}
