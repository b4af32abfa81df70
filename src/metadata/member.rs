//! Member definitions: methods, parameters, fields, properties and events.
//!
//! Members live in the arenas of [`crate::metadata::module::Module`] and are addressed by the
//! id newtypes defined here. Back-references to the declaring type are plain [`TypeId`]s,
//! never owning pointers.

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::metadata::{
    marker::Marker,
    method::MethodBody,
    signature::{MethodSig, TypeSig},
};

macro_rules! arena_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub usize);

            impl $name {
                /// 1-based metadata row of this entry
                #[must_use]
                pub fn row(self) -> u32 {
                    u32::try_from(self.0 + 1).unwrap_or(u32::MAX)
                }
            }
        )*
    };
}

arena_id!(
    /// Index of a type definition
    TypeId,
    /// Index of a method definition
    MethodId,
    /// Index of a field definition
    FieldId,
    /// Index of a property definition
    PropertyId,
    /// Index of an event definition
    EventId,
);

/// Accessibility of a type or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Visibility {
    /// Only the declaring type
    #[strum(serialize = "private")]
    Private,
    /// Derived types
    #[strum(serialize = "protected")]
    Family,
    /// The defining module
    #[strum(serialize = "internal")]
    Assembly,
    /// Derived types or the defining module
    #[strum(serialize = "protected internal")]
    FamilyOrAssembly,
    /// Everyone
    #[strum(serialize = "public")]
    Public,
}

impl Visibility {
    /// True for [`Visibility::Public`]
    #[must_use]
    pub fn is_public(self) -> bool {
        self == Visibility::Public
    }

    /// Visibility that lets any type of the module reach the member
    #[must_use]
    pub fn raised(self) -> Visibility {
        match self {
            Visibility::Private | Visibility::Family => Visibility::Assembly,
            other => other,
        }
    }
}

/// Kind of member as seen by the selection engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum MemberKind {
    /// Instance or static constructor
    Constructor,
    /// Ordinary method
    Method,
    /// Property accessor, or the property itself
    Property,
    /// Field
    Field,
    /// Event accessor, or the event itself
    Event,
}

bitflags! {
    /// Attributes of a method definition
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        /// No `this` argument
        const STATIC = 0x0010;
        /// Dispatched through the runtime type of `this`
        const VIRTUAL = 0x0040;
        /// No implementation in this type
        const ABSTRACT = 0x0400;
        /// Accessor or operator
        const SPECIAL_NAME = 0x0800;
        /// Constructor
        const RT_SPECIAL_NAME = 0x1000;
        /// Synthesized by a compiler or by the weaver
        const COMPILER_GENERATED = 0x8000;
    }
}

bitflags! {
    /// Attributes of a field definition
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u16 {
        /// Shared by all instances
        const STATIC = 0x0010;
        /// Only assigned in constructors
        const INIT_ONLY = 0x0020;
        /// Synthesized by a compiler, e.g. the backing store of an auto-property
        const COMPILER_GENERATED = 0x8000;
    }
}

/// A parameter of a method definition. Its type lives in the method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    /// Declared name
    pub name: String,
    /// Output-only parameter; not captured into contexts
    pub is_out: bool,
    /// Markers declared on the parameter
    pub markers: Vec<Marker>,
}

impl ParamDef {
    /// Plain input parameter
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ParamDef {
            name: name.into(),
            is_out: false,
            markers: Vec::new(),
        }
    }
}

/// A method or constructor definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Simple name, `.ctor`/`.cctor` for constructors
    pub name: String,
    /// Owning type
    pub declaring: TypeId,
    /// Accessibility
    pub visibility: Visibility,
    /// Attributes
    pub flags: MethodFlags,
    /// Calling convention, parameter and return types
    pub signature: MethodSig,
    /// Parameter names and markers, parallel to `signature.params`
    pub params: Vec<ParamDef>,
    /// Names of the method's own generic parameters
    pub generic_params: Vec<String>,
    /// Implementation, `None` for abstract and runtime-provided methods
    pub body: Option<MethodBody>,
    /// Markers declared on the method
    pub markers: Vec<Marker>,
}

impl MethodDef {
    /// True for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// True for the type initializer
    #[must_use]
    pub fn is_type_initializer(&self) -> bool {
        self.name == ".cctor"
    }

    /// True if the method has no `this` argument
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// True for methods dispatched on the runtime type
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    /// True if the method declares its own generic parameters
    #[must_use]
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty() || self.signature.generic_params > 0
    }

    /// True for members synthesized by a compiler or the weaver
    #[must_use]
    pub fn is_compiler_generated(&self) -> bool {
        self.flags.contains(MethodFlags::COMPILER_GENERATED)
    }

    /// Number of arguments including `this`
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.signature.params.len() + usize::from(self.signature.has_this)
    }

    /// Argument slot of the `index`th declared parameter
    #[must_use]
    pub fn arg_slot(&self, index: usize) -> u16 {
        u16::try_from(index + usize::from(self.signature.has_this)).unwrap_or(u16::MAX)
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Simple name
    pub name: String,
    /// Owning type
    pub declaring: TypeId,
    /// Declared type
    pub field_type: TypeSig,
    /// Accessibility
    pub visibility: Visibility,
    /// Attributes
    pub flags: FieldFlags,
    /// Markers declared on the field
    pub markers: Vec<Marker>,
}

impl FieldDef {
    /// True for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    /// True for compiler-synthesized fields
    #[must_use]
    pub fn is_compiler_generated(&self) -> bool {
        self.flags.contains(FieldFlags::COMPILER_GENERATED)
    }
}

/// A property definition binding accessor methods.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    /// Simple name
    pub name: String,
    /// Owning type
    pub declaring: TypeId,
    /// Declared type
    pub property_type: TypeSig,
    /// `get_` accessor
    pub getter: Option<MethodId>,
    /// `set_` accessor
    pub setter: Option<MethodId>,
    /// Backing store of an auto-property
    pub backing_field: Option<FieldId>,
    /// Markers declared on the property
    pub markers: Vec<Marker>,
}

/// An event definition binding add/remove accessors to a delegate-typed store.
#[derive(Debug, Clone)]
pub struct EventDef {
    /// Simple name
    pub name: String,
    /// Owning type
    pub declaring: TypeId,
    /// Delegate type of the handlers
    pub delegate_type: TypeSig,
    /// `add_` accessor
    pub add: Option<MethodId>,
    /// `remove_` accessor
    pub remove: Option<MethodId>,
    /// Field holding the combined delegate of a field-like event
    pub backing_field: Option<FieldId>,
    /// Markers declared on the event
    pub markers: Vec<Marker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_visibility() {
        assert_eq!(Visibility::Private.raised(), Visibility::Assembly);
        assert_eq!(Visibility::Family.raised(), Visibility::Assembly);
        assert_eq!(Visibility::Public.raised(), Visibility::Public);
        assert_eq!(Visibility::FamilyOrAssembly.to_string(), "protected internal");
    }

    #[test]
    fn arg_slots() {
        let method = MethodDef {
            name: "Add".to_string(),
            declaring: TypeId(0),
            visibility: Visibility::Public,
            flags: MethodFlags::empty(),
            signature: MethodSig::new_instance(vec![TypeSig::I4, TypeSig::I4], TypeSig::I4),
            params: vec![ParamDef::new("x"), ParamDef::new("y")],
            generic_params: Vec::new(),
            body: None,
            markers: Vec::new(),
        };
        assert_eq!(method.arg_count(), 3);
        assert_eq!(method.arg_slot(0), 1);
        assert_eq!(method.arg_slot(1), 2);
        assert_eq!(TypeId(4).row(), 5);
    }
}
