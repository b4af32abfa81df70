//! Trampolines to members the helper type cannot reach directly.
//!
//! A private field is only visible to code of its declaring type. To read or write it from
//! the helper type, the weaver adds an internal static stub to the declaring type that
//! performs the access on an `object` instance, and binds the stub into a runtime-library
//! delegate (`Getter` or `Setter`). The delegate is created on first use and cached in a
//! static field of the helper type.
//!
//! Trampolines are created once per member name, declaring type and direction and shared
//! by every access helper that needs them.

use std::collections::HashMap;

use strum::Display;

use crate::{
    assembly::InstructionAssembler,
    metadata::{
        builders::MethodBuilder,
        member::{FieldId, MethodFlags, TypeId, Visibility},
        module::Module,
        signature::TypeSig,
        token::Token,
    },
    runtime::intrinsics::{Intrinsic, GETTER_TYPE, SETTER_TYPE},
    weaver::{emit, helper::HelperType},
    Result,
};

/// Access performed by a trampoline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub(crate) enum Direction {
    /// `object (object instance)`
    #[strum(serialize = "get")]
    Get,
    /// `void (object instance, object value)`
    #[strum(serialize = "set")]
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TrampolineKey {
    name: String,
    declaring: TypeId,
    direction: Direction,
}

/// A stub bound into a cached delegate
#[derive(Debug, Clone, Copy)]
pub(crate) struct Trampoline {
    stub: Token,
    cache: Token,
    direction: Direction,
}

impl Trampoline {
    /// Push the bound delegate, creating and caching it on first use
    pub(crate) fn load_delegate(
        &self,
        asm: &mut InstructionAssembler,
        module: &mut Module,
    ) -> Result<()> {
        let ready = asm.label();
        asm.ldsfld(self.cache)?.brtrue(&ready)?;
        asm.ldnull()?.ldftn(self.stub)?;
        let ctor = match self.direction {
            Direction::Get => Intrinsic::GetterCtor,
            Direction::Set => Intrinsic::SetterCtor,
        };
        emit::new_intrinsic(asm, module, ctor)?;
        asm.stsfld(self.cache)?;
        asm.mark(&ready)?.ldsfld(self.cache)?;
        Ok(())
    }

    /// Invoke the delegate on the stack.
    ///
    /// Expects the delegate and the instance, plus the value for setters, on the stack;
    /// getters leave the value as `object`.
    pub(crate) fn invoke(&self, asm: &mut InstructionAssembler, module: &mut Module) -> Result<()> {
        let invoke = match self.direction {
            Direction::Get => Intrinsic::GetterInvoke,
            Direction::Set => Intrinsic::SetterInvoke,
        };
        let token = invoke.token(module);
        asm.callvirt(token, &invoke.signature())?;
        Ok(())
    }
}

/// Trampolines of one weave pass
#[derive(Default)]
pub(crate) struct Trampolines {
    entries: HashMap<TrampolineKey, Trampoline>,
}

impl Trampolines {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of trampolines created
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Trampoline performing `direction` on `field`
    pub(crate) fn field(
        &mut self,
        module: &mut Module,
        helper: &mut HelperType,
        field: FieldId,
        direction: Direction,
    ) -> Result<Trampoline> {
        let def = module.field(field)?.clone();
        let key = TrampolineKey {
            name: def.name.clone(),
            declaring: def.declaring,
            direction,
        };
        if let Some(trampoline) = self.entries.get(&key) {
            return Ok(*trampoline);
        }

        let owner = module.type_def(def.declaring)?;
        let owner_sig = owner.self_sig();
        let owner_name = owner.fullname();
        let field_token = module.field_access_token(field)?;
        let is_static = def.is_static();
        let field_type = def.field_type.clone();

        let stub_name = format!("<{}>{direction}$trampoline", def.name);
        let stub = match direction {
            Direction::Get => MethodBuilder::new(stub_name)
                .param("instance", TypeSig::Object)
                .returns(TypeSig::Object)
                .implementation(move |asm, module| {
                    if is_static {
                        asm.ldsfld(field_token)?;
                    } else {
                        let cast = module.intern_type(&owner_sig);
                        asm.ldarg(0)?.castclass(cast)?.ldfld(field_token)?;
                    }
                    emit::box_if_needed(asm, module, &field_type)?;
                    asm.ret()?;
                    Ok(())
                }),
            Direction::Set => MethodBuilder::new(stub_name)
                .param("instance", TypeSig::Object)
                .param("value", TypeSig::Object)
                .implementation(move |asm, module| {
                    if !is_static {
                        let cast = module.intern_type(&owner_sig);
                        asm.ldarg(0)?.castclass(cast)?;
                    }
                    asm.ldarg(1)?;
                    emit::unbox_to(asm, module, &field_type)?;
                    if is_static {
                        asm.stsfld(field_token)?;
                    } else {
                        asm.stfld(field_token)?;
                    }
                    asm.ret()?;
                    Ok(())
                }),
        }
        .static_method()
        .visibility(Visibility::Assembly)
        .flags(MethodFlags::COMPILER_GENERATED)
        .build(module, def.declaring)?;
        let stub = module.method_call_token(stub)?;

        let delegate_type = match direction {
            Direction::Get => TypeSig::class(GETTER_TYPE),
            Direction::Set => TypeSig::class(SETTER_TYPE),
        };
        let cache_name = format!("<{direction}>{owner_name}::{}", def.name);
        let cache = helper.add_field(module, cache_name, delegate_type)?;
        let cache = module.field_access_token(cache)?;

        let trampoline = Trampoline { stub, cache, direction };
        log::trace!("trampoline {direction} for {owner_name}::{}", def.name);
        self.entries.insert(key, trampoline);
        Ok(trampoline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            builders::ClassBuilder,
            member::{FieldDef, FieldFlags},
        },
        weaver::config::WeaveConfig,
    };

    #[test]
    fn trampolines_are_cached_per_direction() -> Result<()> {
        let mut module = Module::new("Test");
        let account = ClassBuilder::new("Demo", "Account").build(&mut module)?;
        let balance = module.add_field(FieldDef {
            name: "balance".to_string(),
            declaring: account,
            field_type: TypeSig::I4,
            visibility: Visibility::Private,
            flags: FieldFlags::empty(),
            markers: Vec::new(),
        })?;

        let mut helper = HelperType::new(&WeaveConfig::default());
        let mut trampolines = Trampolines::new();
        let get = trampolines.field(&mut module, &mut helper, balance, Direction::Get)?;
        let again = trampolines.field(&mut module, &mut helper, balance, Direction::Get)?;
        let set = trampolines.field(&mut module, &mut helper, balance, Direction::Set)?;
        assert_eq!(get.stub, again.stub);
        assert_ne!(get.stub, set.stub);
        assert_eq!(trampolines.len(), 2);

        let stub = module.find_method(account, "<balance>get$trampoline", 1);
        let stub = stub.map(|id| module.method(id)).transpose()?;
        assert!(stub.is_some_and(|m| m.is_static() && m.is_compiler_generated()));

        let mut asm = InstructionAssembler::new();
        get.load_delegate(&mut asm, &mut module)?;
        asm.ldnull()?;
        get.invoke(&mut asm, &mut module)?;
        asm.ret()?;
        assert!(asm.finish().is_ok());
        Ok(())
    }
}
