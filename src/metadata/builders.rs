//! Fluent construction of types and members.
//!
//! [`ClassBuilder`] and [`MethodBuilder`] add definitions to a [`Module`]. Method bodies are
//! written with an [`InstructionAssembler`] inside an implementation closure, which also
//! receives the module so it can intern the tokens its instructions need.
//!
//! The free functions cover the shapes a C# compiler synthesizes: default constructors,
//! auto-properties with a `<Name>k__BackingField`, delegate types and field-like events.
//!
//! # Example
//!
//! ```rust
//! use dotweave::metadata::{
//!     builders::{ClassBuilder, MethodBuilder},
//!     module::Module,
//!     signature::TypeSig,
//! };
//!
//! let mut module = Module::new("Demo");
//! let calc = ClassBuilder::new("Demo", "Calculator").build(&mut module)?;
//! let add = MethodBuilder::new("Add")
//!     .param("x", TypeSig::I4)
//!     .param("y", TypeSig::I4)
//!     .returns(TypeSig::I4)
//!     .implementation(|asm, _module| {
//!         asm.ldarg(1)?.ldarg(2)?.add()?.ret()?;
//!         Ok(())
//!     })
//!     .build(&mut module, calc)?;
//!
//! assert_eq!(module.method_key(add)?, "Demo.Calculator::Add(int32,int32)");
//! # Ok::<(), dotweave::Error>(())
//! ```

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        marker::Marker,
        member::{
            EventDef, EventId, FieldDef, FieldFlags, MethodDef, MethodFlags, MethodId, ParamDef,
            PropertyDef, PropertyId, TypeId, Visibility,
        },
        module::Module,
        signature::{MethodSig, TypeSig, MULTICAST_DELEGATE_TYPE},
        typedef::{TypeDefinition, TypeFlags},
    },
    runtime::intrinsics::Intrinsic,
    Error, Result,
};

/// Type alias for method body implementation closures
type ImplementationFn<'a> =
    Box<dyn FnOnce(&mut InstructionAssembler, &mut Module) -> Result<()> + 'a>;

/// Builder of a type definition.
pub struct ClassBuilder {
    definition: TypeDefinition,
}

impl ClassBuilder {
    /// Public class deriving from `System.Object`
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ClassBuilder {
            definition: TypeDefinition::new(namespace, name),
        }
    }

    /// Set the base type
    #[must_use]
    pub fn base(mut self, base: TypeSig) -> Self {
        self.definition.base = Some(base);
        self
    }

    /// Set the accessibility
    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.definition.visibility = visibility;
        self
    }

    /// Add type attributes
    #[must_use]
    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.definition.flags |= flags;
        self
    }

    /// Declare a generic parameter
    #[must_use]
    pub fn generic_param(mut self, name: impl Into<String>) -> Self {
        self.definition.generic_params.push(name.into());
        self
    }

    /// Attach a marker to the type
    #[must_use]
    pub fn marker(mut self, marker: Marker) -> Self {
        self.definition.markers.push(marker);
        self
    }

    /// Add the type to `module`
    ///
    /// # Errors
    /// Returns an error if a type with the same name exists.
    pub fn build(self, module: &mut Module) -> Result<TypeId> {
        module.add_type(self.definition)
    }
}

/// Builder of a method or constructor.
pub struct MethodBuilder<'a> {
    name: String,
    visibility: Visibility,
    flags: MethodFlags,
    params: Vec<(ParamDef, TypeSig)>,
    ret: TypeSig,
    generic_params: Vec<String>,
    markers: Vec<Marker>,
    implementation: Option<ImplementationFn<'a>>,
}

impl<'a> MethodBuilder<'a> {
    /// Public instance method returning `void`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        MethodBuilder {
            name: name.into(),
            visibility: Visibility::Public,
            flags: MethodFlags::empty(),
            params: Vec::new(),
            ret: TypeSig::Void,
            generic_params: Vec::new(),
            markers: Vec::new(),
            implementation: None,
        }
    }

    /// Public instance constructor
    #[must_use]
    pub fn constructor() -> Self {
        let mut builder = MethodBuilder::new(".ctor");
        builder.flags |= MethodFlags::SPECIAL_NAME | MethodFlags::RT_SPECIAL_NAME;
        builder
    }

    /// Append an input parameter
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, param_type: TypeSig) -> Self {
        self.params.push((ParamDef::new(name), param_type));
        self
    }

    /// Append an output parameter, passed as a managed reference
    #[must_use]
    pub fn out_param(mut self, name: impl Into<String>, param_type: TypeSig) -> Self {
        let mut param = ParamDef::new(name);
        param.is_out = true;
        self.params.push((param, TypeSig::ByRef(Box::new(param_type))));
        self
    }

    /// Attach a marker to the most recently added parameter
    #[must_use]
    pub fn param_marker(mut self, marker: Marker) -> Self {
        if let Some((param, _)) = self.params.last_mut() {
            param.markers.push(marker);
        }
        self
    }

    /// Set the return type
    #[must_use]
    pub fn returns(mut self, ret: TypeSig) -> Self {
        self.ret = ret;
        self
    }

    /// Make the method static
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.flags |= MethodFlags::STATIC;
        self
    }

    /// Make the method virtual
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.flags |= MethodFlags::VIRTUAL;
        self
    }

    /// Add method attributes
    #[must_use]
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the accessibility
    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Declare a method generic parameter
    #[must_use]
    pub fn generic_param(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Attach a marker to the method
    #[must_use]
    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Provide the body. Without an implementation the method has no body, as abstract and
    /// runtime-provided methods do.
    #[must_use]
    pub fn implementation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut InstructionAssembler, &mut Module) -> Result<()> + 'a,
    {
        self.implementation = Some(Box::new(f));
        self
    }

    /// Assemble the body and add the method to `declaring`
    ///
    /// # Errors
    /// Returns an error if the declaring type does not exist or the body fails to assemble.
    pub fn build(self, module: &mut Module, declaring: TypeId) -> Result<MethodId> {
        let is_static = self.flags.contains(MethodFlags::STATIC);
        let param_types: Vec<TypeSig> = self.params.iter().map(|(_, sig)| sig.clone()).collect();
        let mut signature = if is_static {
            MethodSig::new_static(param_types, self.ret)
        } else {
            MethodSig::new_instance(param_types, self.ret)
        };
        signature.generic_params = u16::try_from(self.generic_params.len())
            .map_err(|_| malformed_error!("Too many generic parameters on {}", self.name))?;

        let body = match self.implementation {
            Some(implementation) => {
                let mut asm = InstructionAssembler::new();
                implementation(&mut asm, module)?;
                Some(asm.finish()?)
            }
            None => None,
        };

        module.add_method(MethodDef {
            name: self.name,
            declaring,
            visibility: self.visibility,
            flags: self.flags,
            signature,
            params: self.params.into_iter().map(|(param, _)| param).collect(),
            generic_params: self.generic_params,
            body,
            markers: self.markers,
        })
    }
}

/// Token of the parameterless constructor of `declaring`'s base type
fn base_constructor(
    module: &mut Module,
    declaring: TypeId,
) -> Result<crate::metadata::token::Token> {
    match module.base_type(declaring) {
        Some(base) => {
            let ctor = module.find_method(base, ".ctor", 0).ok_or_else(|| {
                Error::MemberNotFound(format!(
                    "parameterless constructor of base of #{}",
                    declaring.0
                ))
            })?;
            module.method_call_token(ctor)
        }
        None => Ok(Intrinsic::ObjectCtor.token(module)),
    }
}

/// Add a public parameterless constructor that only chains to the base constructor
///
/// # Errors
/// Returns an error if the type does not exist or a base type in the module has no
/// parameterless constructor.
pub fn default_constructor(module: &mut Module, declaring: TypeId) -> Result<MethodId> {
    let base_ctor = base_constructor(module, declaring)?;
    let chain = MethodSig::new_instance(Vec::new(), TypeSig::Void);
    MethodBuilder::constructor()
        .implementation(move |asm, _| {
            asm.ldarg(0)?.call(base_ctor, &chain)?.ret()?;
            Ok(())
        })
        .build(module, declaring)
}

/// Add an instance auto-property: a private backing field `<Name>k__BackingField` and
/// public `get_Name` / `set_Name` accessors
///
/// # Errors
/// Returns an error if the type does not exist.
pub fn auto_property(
    module: &mut Module,
    declaring: TypeId,
    name: &str,
    property_type: TypeSig,
    markers: Vec<Marker>,
) -> Result<PropertyId> {
    let field = module.add_field(FieldDef {
        name: format!("<{name}>k__BackingField"),
        declaring,
        field_type: property_type.clone(),
        visibility: Visibility::Private,
        flags: FieldFlags::COMPILER_GENERATED,
        markers: Vec::new(),
    })?;
    let field_token = module.field_access_token(field)?;

    let getter = MethodBuilder::new(format!("get_{name}"))
        .flags(MethodFlags::SPECIAL_NAME)
        .returns(property_type.clone())
        .implementation(move |asm, _| {
            asm.ldarg(0)?.ldfld(field_token)?.ret()?;
            Ok(())
        })
        .build(module, declaring)?;

    let setter = MethodBuilder::new(format!("set_{name}"))
        .flags(MethodFlags::SPECIAL_NAME)
        .param("value", property_type.clone())
        .implementation(move |asm, _| {
            asm.ldarg(0)?.ldarg(1)?.stfld(field_token)?.ret()?;
            Ok(())
        })
        .build(module, declaring)?;

    module.add_property(PropertyDef {
        name: name.to_string(),
        declaring,
        property_type,
        getter: Some(getter),
        setter: Some(setter),
        backing_field: Some(field),
        markers,
    })
}

/// Add a sealed delegate type with the runtime-provided `.ctor(object, native int)` and
/// `Invoke` members
///
/// # Errors
/// Returns an error if a type with the same name exists.
pub fn delegate_type(
    module: &mut Module,
    namespace: &str,
    name: &str,
    invoke: MethodSig,
) -> Result<TypeId> {
    let delegate = ClassBuilder::new(namespace, name)
        .base(TypeSig::class(MULTICAST_DELEGATE_TYPE))
        .flags(TypeFlags::SEALED)
        .build(module)?;

    MethodBuilder::constructor()
        .param("object", TypeSig::Object)
        .param("method", TypeSig::I)
        .build(module, delegate)?;

    let mut invoke_builder = MethodBuilder::new("Invoke").virtual_method().returns(invoke.ret);
    for (i, param) in invoke.params.into_iter().enumerate() {
        invoke_builder = invoke_builder.param(format!("arg{i}"), param);
    }
    invoke_builder.build(module, delegate)?;

    Ok(delegate)
}

fn event_accessor(
    module: &mut Module,
    declaring: TypeId,
    name: String,
    field: crate::metadata::member::FieldId,
    delegate: &TypeSig,
    combine: Intrinsic,
) -> Result<MethodId> {
    let field_token = module.field_access_token(field)?;
    let combine_token = combine.token(module);
    let cast_token = module.intern_type(delegate);
    let combine_sig = combine.signature();

    MethodBuilder::new(name)
        .flags(MethodFlags::SPECIAL_NAME)
        .param("value", delegate.clone())
        .implementation(move |asm, _| {
            asm.ldarg(0)?
                .ldarg(0)?
                .ldfld(field_token)?
                .ldarg(1)?
                .call(combine_token, &combine_sig)?
                .castclass(cast_token)?
                .stfld(field_token)?
                .ret()?;
            Ok(())
        })
        .build(module, declaring)
}

/// Add an instance field-like event: a private delegate field of the same name and
/// `add_Name` / `remove_Name` accessors that combine into it
///
/// # Errors
/// Returns an error if the type does not exist.
pub fn event_field(
    module: &mut Module,
    declaring: TypeId,
    name: &str,
    delegate: TypeSig,
    markers: Vec<Marker>,
) -> Result<EventId> {
    let field = module.add_field(FieldDef {
        name: name.to_string(),
        declaring,
        field_type: delegate.clone(),
        visibility: Visibility::Private,
        flags: FieldFlags::COMPILER_GENERATED,
        markers: Vec::new(),
    })?;

    let add = event_accessor(
        module,
        declaring,
        format!("add_{name}"),
        field,
        &delegate,
        Intrinsic::DelegateCombine,
    )?;
    let remove = event_accessor(
        module,
        declaring,
        format!("remove_{name}"),
        field,
        &delegate,
        Intrinsic::DelegateRemove,
    )?;

    module.add_event(EventDef {
        name: name.to_string(),
        declaring,
        delegate_type: delegate,
        add: Some(add),
        remove: Some(remove),
        backing_field: Some(field),
        markers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{GenericContext, InstructionDecoder},
        metadata::token::TABLE_MEMBERREF,
    };

    #[test]
    fn auto_property_shape() -> Result<()> {
        let mut module = Module::new("Test");
        let person = ClassBuilder::new("Demo", "Person").build(&mut module)?;
        let property = auto_property(&mut module, person, "Name", TypeSig::String, Vec::new())?;

        let def = module.property(property)?.clone();
        let field = module.field(def.backing_field.unwrap())?;
        assert_eq!(field.name, "<Name>k__BackingField");
        assert!(field.is_compiler_generated());

        let getter = module.method(def.getter.unwrap())?;
        assert_eq!(getter.name, "get_Name");
        assert_eq!(getter.signature.ret, TypeSig::String);
        assert_eq!(module.property_of_accessor(def.setter.unwrap()), Some(property));
        assert_eq!(module.property_of_backing_field(def.backing_field.unwrap()), Some(property));
        Ok(())
    }

    #[test]
    fn default_constructor_chains_to_object() -> Result<()> {
        let mut module = Module::new("Test");
        let person = ClassBuilder::new("Demo", "Person").build(&mut module)?;
        let ctor = default_constructor(&mut module, person)?;

        let decoded = InstructionDecoder::new(
            &module,
            &module.method(ctor)?.body.as_ref().unwrap().code,
            GenericContext::default(),
        )
        .decode_all()?;
        let mnemonics: Vec<_> = decoded.iter().map(|i| i.mnemonic).collect();
        assert_eq!(mnemonics, ["ldarg.0", "call", "ret"]);
        assert_eq!(decoded[1].get_token_operand().unwrap().table(), TABLE_MEMBERREF);
        assert!(module.method(ctor)?.is_constructor());
        Ok(())
    }

    #[test]
    fn derived_constructor_chains_to_base() -> Result<()> {
        let mut module = Module::new("Test");
        let base = ClassBuilder::new("Demo", "Base").build(&mut module)?;
        let base_ctor = default_constructor(&mut module, base)?;
        let derived = ClassBuilder::new("Demo", "Derived")
            .base(TypeSig::class("Demo.Base"))
            .build(&mut module)?;
        let ctor = default_constructor(&mut module, derived)?;

        let body = module.method(ctor)?.body.clone().unwrap();
        let decoded =
            InstructionDecoder::new(&module, &body.code, GenericContext::default()).decode_all()?;
        let target = decoded[1].resolved.as_ref().and_then(|r| r.as_method()).unwrap();
        assert_eq!(target.def, Some(base_ctor));
        Ok(())
    }

    #[test]
    fn event_field_shape() -> Result<()> {
        let mut module = Module::new("Test");
        let handler = delegate_type(
            &mut module,
            "Demo",
            "Handler",
            MethodSig::new_instance(vec![TypeSig::String], TypeSig::Void),
        )?;
        assert!(module.type_def(handler)?.is_delegate());

        let button = ClassBuilder::new("Demo", "Button").build(&mut module)?;
        let event = event_field(
            &mut module,
            button,
            "Clicked",
            TypeSig::class("Demo.Handler"),
            Vec::new(),
        )?;
        let def = module.event(event)?;
        assert_eq!(module.field(def.backing_field.unwrap())?.name, "Clicked");
        assert_eq!(module.method(def.add.unwrap())?.name, "add_Clicked");
        assert_eq!(module.event_of_accessor(def.remove.unwrap()), Some(event));
        Ok(())
    }
}
