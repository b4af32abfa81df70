//! The in-memory module: an arena of types and members with token tables.
//!
//! [`Module`] owns every [`TypeDefinition`] and member of one compiled unit. Entities are
//! addressed by stable ids (arena indices) and, for instruction operands, by metadata tokens
//! whose rows are the ids plus one. Types are additionally indexed by fully-qualified name.
//!
//! Beside the definition tables the module carries the reference tables an instruction
//! stream needs: user strings, type specifications, member references, generic method
//! instantiations and local variable signatures. All `intern_*` operations are idempotent,
//! so interning the same reference twice yields the same token.
//!
//! # Example
//!
//! ```rust
//! use dotweave::metadata::{module::Module, typedef::TypeDefinition};
//!
//! let mut module = Module::new("Demo");
//! let calc = module.add_type(TypeDefinition::new("Demo", "Calc"))?;
//! assert_eq!(module.type_by_name("Demo.Calc"), Some(calc));
//! assert_eq!(module.intern_string("hi"), module.intern_string("hi"));
//! # Ok::<(), dotweave::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    metadata::{
        marker::Marker,
        member::{
            EventDef, EventId, FieldDef, FieldId, MethodDef, MethodId, PropertyDef, PropertyId,
            TypeId,
        },
        method::MethodBody,
        signature::{MethodSig, TypeSig},
        token::{
            Token, TABLE_FIELD, TABLE_MEMBERREF, TABLE_METHODDEF, TABLE_METHODSPEC,
            TABLE_STANDALONESIG, TABLE_STRING, TABLE_TYPEDEF, TABLE_TYPESPEC,
        },
        typedef::TypeDefinition,
    },
    Error, Result,
};

/// Signature part of a member reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRefSig {
    /// Reference to a method
    Method(MethodSig),
    /// Reference to a field of the given type
    Field(TypeSig),
}

/// Reference to a member by parent type, name and signature.
///
/// Used for members the module imports and for members of generic instantiations. The
/// signature is in the open form of the definition; the parent carries the instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Declaring type, possibly a generic instantiation
    pub parent: TypeSig,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberRefSig,
}

impl MemberRef {
    /// Reference to a method
    #[must_use]
    pub fn method(parent: TypeSig, name: impl Into<String>, signature: MethodSig) -> Self {
        MemberRef {
            parent,
            name: name.into(),
            signature: MemberRefSig::Method(signature),
        }
    }

    /// Reference to a field
    #[must_use]
    pub fn field(parent: TypeSig, name: impl Into<String>, field_type: TypeSig) -> Self {
        MemberRef {
            parent,
            name: name.into(),
            signature: MemberRefSig::Field(field_type),
        }
    }
}

/// Instantiation of a generic method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSpec {
    /// MethodDef or MemberRef token of the generic method
    pub method: Token,
    /// Method generic arguments
    pub args: Vec<TypeSig>,
}

/// An append-only table with value-to-row deduplication
#[derive(Debug, Clone)]
struct InternTable<T: Clone + Eq + std::hash::Hash> {
    rows: Vec<T>,
    index: HashMap<T, u32>,
}

impl<T: Clone + Eq + std::hash::Hash> Default for InternTable<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + std::hash::Hash> InternTable<T> {
    fn intern(&mut self, value: T) -> u32 {
        if let Some(row) = self.index.get(&value) {
            return *row;
        }
        self.rows.push(value.clone());
        let row = u32::try_from(self.rows.len()).unwrap_or(u32::MAX);
        self.index.insert(value, row);
        row
    }

    fn get(&self, row: u32) -> Option<&T> {
        (row as usize).checked_sub(1).and_then(|i| self.rows.get(i))
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// One compiled program unit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    /// Markers declared at assembly scope
    pub markers: Vec<Marker>,
    types: Vec<TypeDefinition>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    properties: Vec<PropertyDef>,
    events: Vec<EventDef>,
    type_index: HashMap<String, TypeId>,
    strings: InternTable<String>,
    type_specs: InternTable<TypeSig>,
    member_refs: InternTable<MemberRef>,
    method_specs: InternTable<MethodSpec>,
    local_sigs: InternTable<Vec<TypeSig>>,
}

impl Module {
    /// Empty module
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Module::default()
        }
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- definitions ------------------------------------------------------------------

    /// Add a type definition.
    ///
    /// # Errors
    /// Returns an error if a type with the same fully-qualified name exists.
    pub fn add_type(&mut self, mut definition: TypeDefinition) -> Result<TypeId> {
        let fullname = definition.fullname();
        if self.type_index.contains_key(&fullname) {
            return Err(Error::Error(format!("Duplicate type - {fullname}")));
        }

        definition.methods.clear();
        definition.fields.clear();
        definition.properties.clear();
        definition.events.clear();

        let id = TypeId(self.types.len());
        self.types.push(definition);
        self.type_index.insert(fullname, id);
        Ok(id)
    }

    /// Add a method to the type named by `method.declaring`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the declaring type does not exist.
    pub fn add_method(&mut self, method: MethodDef) -> Result<MethodId> {
        let id = MethodId(self.methods.len());
        self.type_def_mut(method.declaring)?.methods.push(id);
        self.methods.push(method);
        Ok(id)
    }

    /// Add a field to the type named by `field.declaring`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the declaring type does not exist.
    pub fn add_field(&mut self, field: FieldDef) -> Result<FieldId> {
        let id = FieldId(self.fields.len());
        self.type_def_mut(field.declaring)?.fields.push(id);
        self.fields.push(field);
        Ok(id)
    }

    /// Add a property to the type named by `property.declaring`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the declaring type does not exist.
    pub fn add_property(&mut self, property: PropertyDef) -> Result<PropertyId> {
        let id = PropertyId(self.properties.len());
        self.type_def_mut(property.declaring)?.properties.push(id);
        self.properties.push(property);
        Ok(id)
    }

    /// Add an event to the type named by `event.declaring`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the declaring type does not exist.
    pub fn add_event(&mut self, event: EventDef) -> Result<EventId> {
        let id = EventId(self.events.len());
        self.type_def_mut(event.declaring)?.events.push(id);
        self.events.push(event);
        Ok(id)
    }

    /// Replace the implementation of a method
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] if the method does not exist.
    pub fn replace_body(&mut self, method: MethodId, body: MethodBody) -> Result<()> {
        self.method_mut(method)?.body = Some(body);
        Ok(())
    }

    /// Type definitions with their ids, in declaration order
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDefinition)> {
        self.types.iter().enumerate().map(|(i, t)| (TypeId(i), t))
    }

    /// Number of type definitions
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Number of method definitions
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Type definition by id
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for an unknown id.
    pub fn type_def(&self, id: TypeId) -> Result<&TypeDefinition> {
        self.types
            .get(id.0)
            .ok_or_else(|| Error::TypeNotFound(format!("#{}", id.0)))
    }

    /// Mutable type definition by id
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for an unknown id.
    pub fn type_def_mut(&mut self, id: TypeId) -> Result<&mut TypeDefinition> {
        self.types
            .get_mut(id.0)
            .ok_or_else(|| Error::TypeNotFound(format!("#{}", id.0)))
    }

    /// Method definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn method(&self, id: MethodId) -> Result<&MethodDef> {
        self.methods
            .get(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("method #{}", id.0)))
    }

    /// Mutable method definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn method_mut(&mut self, id: MethodId) -> Result<&mut MethodDef> {
        self.methods
            .get_mut(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("method #{}", id.0)))
    }

    /// Field definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn field(&self, id: FieldId) -> Result<&FieldDef> {
        self.fields
            .get(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("field #{}", id.0)))
    }

    /// Mutable field definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn field_mut(&mut self, id: FieldId) -> Result<&mut FieldDef> {
        self.fields
            .get_mut(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("field #{}", id.0)))
    }

    /// Property definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn property(&self, id: PropertyId) -> Result<&PropertyDef> {
        self.properties
            .get(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("property #{}", id.0)))
    }

    /// Event definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn event(&self, id: EventId) -> Result<&EventDef> {
        self.events
            .get(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("event #{}", id.0)))
    }

    /// Mutable event definition by id
    ///
    /// # Errors
    /// Returns [`Error::MemberNotFound`] for an unknown id.
    pub fn event_mut(&mut self, id: EventId) -> Result<&mut EventDef> {
        self.events
            .get_mut(id.0)
            .ok_or_else(|| Error::MemberNotFound(format!("event #{}", id.0)))
    }

    // ---- lookups ----------------------------------------------------------------------

    /// Type by fully-qualified name
    #[must_use]
    pub fn type_by_name(&self, fullname: &str) -> Option<TypeId> {
        self.type_index.get(fullname).copied()
    }

    /// Type definition named by a signature, if it is declared in this module
    #[must_use]
    pub fn type_of_sig(&self, sig: &TypeSig) -> Option<TypeId> {
        sig.type_name().and_then(|name| self.type_by_name(name))
    }

    /// First method of `owner` with the given name and parameter count
    #[must_use]
    pub fn find_method(&self, owner: TypeId, name: &str, param_count: usize) -> Option<MethodId> {
        let def = self.types.get(owner.0)?;
        def.methods.iter().copied().find(|id| {
            let method = &self.methods[id.0];
            method.name == name && method.signature.params.len() == param_count
        })
    }

    /// Method of `owner` matching a reference signature.
    ///
    /// An exact parameter-type match wins over a match on name, instance-ness and arity.
    #[must_use]
    pub fn find_method_by_sig(
        &self,
        owner: TypeId,
        name: &str,
        sig: &MethodSig,
    ) -> Option<MethodId> {
        let def = self.types.get(owner.0)?;
        let mut loose = None;
        for id in &def.methods {
            let method = &self.methods[id.0];
            if method.name != name
                || method.signature.has_this != sig.has_this
                || method.signature.params.len() != sig.params.len()
            {
                continue;
            }
            if method.signature.params == sig.params {
                return Some(*id);
            }
            loose.get_or_insert(*id);
        }
        loose
    }

    /// Field of `owner` by name
    #[must_use]
    pub fn find_field(&self, owner: TypeId, name: &str) -> Option<FieldId> {
        let def = self.types.get(owner.0)?;
        def.fields
            .iter()
            .copied()
            .find(|id| self.fields[id.0].name == name)
    }

    /// Method by `Namespace.Type::Name` and parameter count
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MemberNotFound`] if either part is missing.
    pub fn method_by_name(
        &self,
        type_name: &str,
        name: &str,
        param_count: usize,
    ) -> Result<MethodId> {
        let owner = self
            .type_by_name(type_name)
            .ok_or_else(|| Error::TypeNotFound(type_name.to_string()))?;
        self.find_method(owner, name, param_count)
            .ok_or_else(|| Error::MemberNotFound(format!("{type_name}::{name}/{param_count}")))
    }

    /// Base type definition, if declared in this module
    #[must_use]
    pub fn base_type(&self, id: TypeId) -> Option<TypeId> {
        self.types
            .get(id.0)
            .and_then(|def| def.base.as_ref())
            .and_then(|base| self.type_of_sig(base))
    }

    /// True if `id` is, or derives from, the type named `target`
    #[must_use]
    pub fn derives_from(&self, id: TypeId, target: &str) -> bool {
        let mut current = Some(id);
        while let Some(type_id) = current {
            let Some(def) = self.types.get(type_id.0) else {
                return false;
            };
            if def.fullname() == target {
                return true;
            }
            if let Some(base) = def.base.as_ref().and_then(TypeSig::type_name) {
                if base == target {
                    return true;
                }
            }
            current = self.base_type(type_id);
        }
        false
    }

    /// Most derived implementation of a virtual method for an object of runtime type `runtime`
    #[must_use]
    pub fn resolve_virtual(&self, runtime: TypeId, declared: MethodId) -> MethodId {
        let Some(method) = self.methods.get(declared.0) else {
            return declared;
        };
        if !method.is_virtual() {
            return declared;
        }

        let mut current = Some(runtime);
        while let Some(type_id) = current {
            if type_id == method.declaring {
                break;
            }
            if let Some(found) = self.find_method_by_sig(type_id, &method.name, &method.signature) {
                if self.methods[found.0].is_virtual() {
                    return found;
                }
            }
            current = self.base_type(type_id);
        }
        declared
    }

    /// Property owning an accessor
    #[must_use]
    pub fn property_of_accessor(&self, method: MethodId) -> Option<PropertyId> {
        let declaring = self.methods.get(method.0)?.declaring;
        self.types[declaring.0].properties.iter().copied().find(|id| {
            let property = &self.properties[id.0];
            property.getter == Some(method) || property.setter == Some(method)
        })
    }

    /// Event owning an accessor
    #[must_use]
    pub fn event_of_accessor(&self, method: MethodId) -> Option<EventId> {
        let declaring = self.methods.get(method.0)?.declaring;
        self.types[declaring.0].events.iter().copied().find(|id| {
            let event = &self.events[id.0];
            event.add == Some(method) || event.remove == Some(method)
        })
    }

    /// Auto-property whose backing store is `field`
    #[must_use]
    pub fn property_of_backing_field(&self, field: FieldId) -> Option<PropertyId> {
        let declaring = self.fields.get(field.0)?.declaring;
        self.types[declaring.0]
            .properties
            .iter()
            .copied()
            .find(|id| self.properties[id.0].backing_field == Some(field))
    }

    /// Field-like event whose delegate store is `field`
    #[must_use]
    pub fn event_of_backing_field(&self, field: FieldId) -> Option<EventId> {
        let declaring = self.fields.get(field.0)?.declaring;
        self.types[declaring.0]
            .events
            .iter()
            .copied()
            .find(|id| self.events[id.0].backing_field == Some(field))
    }

    /// Stable key of a method, `Namespace.Type::Name(param,types)`
    ///
    /// # Errors
    /// Returns an error if the method or its type does not exist.
    pub fn method_key(&self, id: MethodId) -> Result<String> {
        let method = self.method(id)?;
        let owner = self.type_def(method.declaring)?;
        Ok(format!(
            "{}::{}({})",
            owner.fullname(),
            method.name,
            method.signature.param_list()
        ))
    }

    /// Stable key of a field, `Namespace.Type::Name`
    ///
    /// # Errors
    /// Returns an error if the field or its type does not exist.
    pub fn field_key(&self, id: FieldId) -> Result<String> {
        let field = self.field(id)?;
        let owner = self.type_def(field.declaring)?;
        Ok(format!("{}::{}", owner.fullname(), field.name))
    }

    /// Method whose [`Module::method_key`] equals `key`
    #[must_use]
    pub fn method_by_key(&self, key: &str) -> Option<MethodId> {
        let (type_name, rest) = key.split_once("::")?;
        let owner = self.type_by_name(type_name)?;
        self.types[owner.0]
            .methods
            .iter()
            .copied()
            .find(|id| {
                let method = &self.methods[id.0];
                rest.strip_prefix(method.name.as_str())
                    .is_some_and(|params| params == format!("({})", method.signature.param_list()))
            })
    }

    // ---- tokens -----------------------------------------------------------------------

    /// TypeDef token of a type
    #[must_use]
    pub fn type_token(&self, id: TypeId) -> Token {
        Token::from_parts(TABLE_TYPEDEF, id.row())
    }

    /// MethodDef token of a method
    #[must_use]
    pub fn method_token(&self, id: MethodId) -> Token {
        Token::from_parts(TABLE_METHODDEF, id.row())
    }

    /// Field token of a field
    #[must_use]
    pub fn field_token(&self, id: FieldId) -> Token {
        Token::from_parts(TABLE_FIELD, id.row())
    }

    /// Token through which code inside the module calls `id`.
    ///
    /// Members of generic types are reached through a member reference on the type
    /// instantiated over its own parameters.
    ///
    /// # Errors
    /// Returns an error if the method or its type does not exist.
    pub fn method_call_token(&mut self, id: MethodId) -> Result<Token> {
        let method = self.method(id)?;
        let owner = self.type_def(method.declaring)?;
        if !owner.is_generic() {
            return Ok(self.method_token(id));
        }
        let reference = MemberRef::method(
            owner.self_sig(),
            method.name.clone(),
            method.signature.clone(),
        );
        Ok(self.intern_member_ref(reference))
    }

    /// Token through which code inside the module accesses field `id`
    ///
    /// # Errors
    /// Returns an error if the field or its type does not exist.
    pub fn field_access_token(&mut self, id: FieldId) -> Result<Token> {
        let field = self.field(id)?;
        let owner = self.type_def(field.declaring)?;
        if !owner.is_generic() {
            return Ok(self.field_token(id));
        }
        let reference =
            MemberRef::field(owner.self_sig(), field.name.clone(), field.field_type.clone());
        Ok(self.intern_member_ref(reference))
    }

    /// Token of a user string
    pub fn intern_string(&mut self, value: &str) -> Token {
        let row = self.strings.intern(value.to_string());
        Token::from_parts(TABLE_STRING, row)
    }

    /// Token naming a type in an operand.
    ///
    /// Non-generic types defined in the module use their TypeDef token, everything else
    /// goes through a type specification.
    pub fn intern_type(&mut self, sig: &TypeSig) -> Token {
        if let TypeSig::Class(name) | TypeSig::ValueType(name) = sig {
            if let Some(id) = self.type_by_name(name) {
                if !self.types[id.0].is_generic() {
                    return self.type_token(id);
                }
            }
        }
        let row = self.type_specs.intern(sig.clone());
        Token::from_parts(TABLE_TYPESPEC, row)
    }

    /// Token of a member reference
    pub fn intern_member_ref(&mut self, reference: MemberRef) -> Token {
        let row = self.member_refs.intern(reference);
        Token::from_parts(TABLE_MEMBERREF, row)
    }

    /// Token of a generic method instantiation
    pub fn intern_method_spec(&mut self, spec: MethodSpec) -> Token {
        let row = self.method_specs.intern(spec);
        Token::from_parts(TABLE_METHODSPEC, row)
    }

    /// Token of a local variable signature, the null token for no locals
    pub fn intern_local_sig(&mut self, locals: &[TypeSig]) -> Token {
        if locals.is_empty() {
            return Token::new(0);
        }
        let row = self.local_sigs.intern(locals.to_vec());
        Token::from_parts(TABLE_STANDALONESIG, row)
    }

    /// User string behind a token
    #[must_use]
    pub fn user_string(&self, token: Token) -> Option<&str> {
        if token.table() != TABLE_STRING {
            return None;
        }
        self.strings.get(token.row()).map(String::as_str)
    }

    /// Type specification behind a token
    #[must_use]
    pub fn type_spec(&self, token: Token) -> Option<&TypeSig> {
        if token.table() != TABLE_TYPESPEC {
            return None;
        }
        self.type_specs.get(token.row())
    }

    /// Member reference behind a token
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRef> {
        if token.table() != TABLE_MEMBERREF {
            return None;
        }
        self.member_refs.get(token.row())
    }

    /// Generic method instantiation behind a token
    #[must_use]
    pub fn method_spec(&self, token: Token) -> Option<&MethodSpec> {
        if token.table() != TABLE_METHODSPEC {
            return None;
        }
        self.method_specs.get(token.row())
    }

    /// Local variable types behind a signature token
    #[must_use]
    pub fn local_sig(&self, token: Token) -> Option<&[TypeSig]> {
        if token.table() != TABLE_STANDALONESIG {
            return None;
        }
        self.local_sigs.get(token.row()).map(Vec::as_slice)
    }

    /// Type named by a TypeDef or TypeSpec token
    ///
    /// # Errors
    /// Returns [`Error::TokenNotFound`] if the token names no type.
    pub fn resolve_type(&self, token: Token) -> Result<TypeSig> {
        match token.table() {
            TABLE_TYPEDEF => token
                .index()
                .and_then(|i| self.types.get(i))
                .map(TypeDefinition::self_sig)
                .ok_or(Error::TokenNotFound(token)),
            TABLE_TYPESPEC => self.type_spec(token).cloned().ok_or(Error::TokenNotFound(token)),
            _ => Err(Error::TokenNotFound(token)),
        }
    }

    /// Sizes of the reference tables: strings, type specs, member refs, method specs
    #[must_use]
    pub fn reference_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.strings.len(),
            self.type_specs.len(),
            self.member_refs.len(),
            self.method_specs.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::member::{MethodFlags, ParamDef, Visibility};

    fn method(declaring: TypeId, name: &str, params: Vec<TypeSig>) -> MethodDef {
        let names = (0..params.len()).map(|i| ParamDef::new(format!("p{i}"))).collect();
        MethodDef {
            name: name.to_string(),
            declaring,
            visibility: Visibility::Public,
            flags: MethodFlags::VIRTUAL,
            signature: MethodSig::new_instance(params, TypeSig::Void),
            params: names,
            generic_params: Vec::new(),
            body: None,
            markers: Vec::new(),
        }
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut module = Module::new("Test");
        module.add_type(TypeDefinition::new("Demo", "A")).unwrap();
        assert!(module.add_type(TypeDefinition::new("Demo", "A")).is_err());
    }

    #[test]
    fn interning_is_idempotent() {
        let mut module = Module::new("Test");
        let a = module.intern_type(&TypeSig::Object);
        let b = module.intern_type(&TypeSig::Object);
        assert_eq!(a, b);
        assert_eq!(a.table(), TABLE_TYPESPEC);

        let r1 = module.intern_member_ref(MemberRef::method(
            TypeSig::Object,
            ".ctor",
            MethodSig::new_instance(vec![], TypeSig::Void),
        ));
        let r2 = module.intern_member_ref(MemberRef::method(
            TypeSig::Object,
            ".ctor",
            MethodSig::new_instance(vec![], TypeSig::Void),
        ));
        assert_eq!(r1, r2);
        assert_eq!(module.reference_counts(), (0, 1, 1, 0));
        assert!(module.intern_local_sig(&[]).is_null());
    }

    #[test]
    fn keys_and_lookup() {
        let mut module = Module::new("Test");
        let calc = module.add_type(TypeDefinition::new("Demo", "Calc")).unwrap();
        let add = module
            .add_method(method(calc, "Add", vec![TypeSig::I4, TypeSig::I4]))
            .unwrap();

        assert_eq!(module.method_key(add).unwrap(), "Demo.Calc::Add(int32,int32)");
        assert_eq!(module.method_by_key("Demo.Calc::Add(int32,int32)"), Some(add));
        assert_eq!(module.method_by_key("Demo.Calc::Add(int32)"), None);
        assert_eq!(module.method_by_name("Demo.Calc", "Add", 2).unwrap(), add);
        assert_eq!(module.type_token(calc), Token::new(0x0200_0001));
        assert_eq!(
            module.resolve_type(module.type_token(calc)).unwrap(),
            TypeSig::class("Demo.Calc")
        );
    }

    #[test]
    fn virtual_resolution_walks_bases() {
        let mut module = Module::new("Test");
        let base = module.add_type(TypeDefinition::new("Demo", "Shape")).unwrap();
        let mut derived_def = TypeDefinition::new("Demo", "Circle");
        derived_def.base = Some(TypeSig::class("Demo.Shape"));
        let derived = module.add_type(derived_def).unwrap();

        let area = module.add_method(method(base, "Area", vec![])).unwrap();
        let area_override = module.add_method(method(derived, "Area", vec![])).unwrap();

        assert_eq!(module.resolve_virtual(derived, area), area_override);
        assert_eq!(module.resolve_virtual(base, area), area);
        assert!(module.derives_from(derived, "Demo.Shape"));
        assert!(module.derives_from(derived, "System.Object"));
        assert!(!module.derives_from(base, "Demo.Circle"));
    }

    #[test]
    fn generic_members_use_member_refs() {
        let mut module = Module::new("Test");
        let mut def = TypeDefinition::new("Demo", "Box`1");
        def.generic_params.push("T".to_string());
        let boxed = module.add_type(def).unwrap();
        let get = module.add_method(method(boxed, "Get", vec![])).unwrap();

        let token = module.method_call_token(get).unwrap();
        assert_eq!(token.table(), TABLE_MEMBERREF);
        let reference = module.member_ref(token).unwrap();
        assert_eq!(reference.name, "Get");
        assert!(matches!(reference.parent, TypeSig::GenericInst(_, _)));
    }
}
