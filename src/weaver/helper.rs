//! The generated helper type.
//!
//! Woven code needs a place for members that belong to no user type: field access helpers,
//! event raise helpers, cached trampoline delegates and member identities. They all live
//! in one sealed, internal, compiler-generated class that is created on first use.
//!
//! Member identities are static fields assigned by the helper's type initializer, so they
//! are resolved once, before any woven member first reads them.

use std::collections::HashMap;

use crate::{
    metadata::{
        builders::{ClassBuilder, MethodBuilder},
        member::{FieldDef, FieldFlags, FieldId, MethodFlags, MethodId, TypeId, Visibility},
        module::Module,
        signature::TypeSig,
        token::Token,
        typedef::TypeFlags,
    },
    runtime::intrinsics::Intrinsic,
    weaver::{config::WeaveConfig, emit},
    Result,
};

/// Lazily created helper class of one weave pass
pub(crate) struct HelperType {
    namespace: String,
    name: String,
    id: Option<TypeId>,
    identities: Vec<(FieldId, String)>,
    identity_fields: HashMap<String, Token>,
    members: Vec<String>,
}

impl HelperType {
    pub(crate) fn new(config: &WeaveConfig) -> Self {
        HelperType {
            namespace: config.helper_namespace.clone(),
            name: config.helper_name.clone(),
            id: None,
            identities: Vec::new(),
            identity_fields: HashMap::new(),
            members: Vec::new(),
        }
    }

    /// The helper type, created on first request
    pub(crate) fn type_id(&mut self, module: &mut Module) -> Result<TypeId> {
        if let Some(id) = self.id {
            return Ok(id);
        }
        let id = ClassBuilder::new(self.namespace.clone(), self.name.clone())
            .visibility(Visibility::Assembly)
            .flags(TypeFlags::SEALED | TypeFlags::ABSTRACT | TypeFlags::COMPILER_GENERATED)
            .build(module)?;
        log::debug!("created helper type {}", module.type_def(id)?.fullname());
        self.id = Some(id);
        Ok(id)
    }

    /// Add a static field
    pub(crate) fn add_field(
        &mut self,
        module: &mut Module,
        name: String,
        field_type: TypeSig,
    ) -> Result<FieldId> {
        let declaring = self.type_id(module)?;
        self.members.push(name.clone());
        module.add_field(FieldDef {
            name,
            declaring,
            field_type,
            visibility: Visibility::Assembly,
            flags: FieldFlags::STATIC | FieldFlags::COMPILER_GENERATED,
            markers: Vec::new(),
        })
    }

    /// Add a static method built by `builder`
    pub(crate) fn add_method(
        &mut self,
        module: &mut Module,
        builder: MethodBuilder<'_>,
    ) -> Result<MethodId> {
        let declaring = self.type_id(module)?;
        let method = builder
            .static_method()
            .visibility(Visibility::Assembly)
            .flags(MethodFlags::COMPILER_GENERATED)
            .build(module, declaring)?;
        self.members.push(module.method(method)?.name.clone());
        Ok(method)
    }

    /// Token of the static field holding the identity of the member with `key`
    pub(crate) fn identity(&mut self, module: &mut Module, key: &str) -> Result<Token> {
        if let Some(token) = self.identity_fields.get(key) {
            return Ok(*token);
        }
        let name = format!("<member>{}", self.identities.len());
        let field = self.add_field(module, name, TypeSig::Object)?;
        let token = module.field_access_token(field)?;
        self.identities.push((field, key.to_string()));
        self.identity_fields.insert(key.to_string(), token);
        Ok(token)
    }

    /// Emit the type initializer and return the names of all generated members
    pub(crate) fn finish(mut self, module: &mut Module) -> Result<Vec<String>> {
        if !self.identities.is_empty() {
            let declaring = self.type_id(module)?;
            let mut resolutions = Vec::with_capacity(self.identities.len());
            for (field, key) in &self.identities {
                resolutions.push((module.field_access_token(*field)?, key.clone()));
            }

            MethodBuilder::new(".cctor")
                .static_method()
                .visibility(Visibility::Private)
                .flags(MethodFlags::SPECIAL_NAME | MethodFlags::RT_SPECIAL_NAME)
                .implementation(move |asm, module| {
                    for (field, key) in &resolutions {
                        emit::load_string(asm, module, key)?;
                        emit::call_intrinsic(asm, module, Intrinsic::MembersResolve)?;
                        asm.stsfld(*field)?;
                    }
                    asm.ret()?;
                    Ok(())
                })
                .build(module, declaring)?;
            self.members.push(".cctor".to_string());
        }
        Ok(self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_shared_per_key() -> Result<()> {
        let mut module = Module::new("Test");
        let mut helper = HelperType::new(&WeaveConfig::default());
        let first = helper.identity(&mut module, "Demo.A::Run()")?;
        let again = helper.identity(&mut module, "Demo.A::Run()")?;
        let other = helper.identity(&mut module, "Demo.A::Stop()")?;
        assert_eq!(first, again);
        assert_ne!(first, other);

        let members = helper.finish(&mut module)?;
        assert_eq!(members, vec!["<member>0", "<member>1", ".cctor"]);

        let helper_type = module.type_by_name("<Weave>Helpers");
        assert!(helper_type.is_some_and(|id| module.find_method(id, ".cctor", 0).is_some()));
        Ok(())
    }

    #[test]
    fn unused_helper_is_not_created() -> Result<()> {
        let mut module = Module::new("Test");
        let helper = HelperType::new(&WeaveConfig::default());
        assert!(helper.finish(&mut module)?.is_empty());
        assert_eq!(module.type_count(), 0);
        Ok(())
    }
}
