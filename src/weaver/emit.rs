//! Emission helpers shared by the rewriters.
//!
//! Every helper appends to an [`InstructionAssembler`] and interns what it references in
//! the module being woven. Values cross into the runtime library as `object`, so most
//! helpers deal with boxing a typed value or recovering it from an `object`.

use crate::{
    assembly::{InstructionAssembler, Operand},
    metadata::{module::Module, signature::TypeSig},
    runtime::intrinsics::Intrinsic,
    weaver::descriptor::Fragment,
    Error, Result,
};

/// `call` an intrinsic
pub(crate) fn call_intrinsic(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    intrinsic: Intrinsic,
) -> Result<()> {
    let token = intrinsic.token(module);
    asm.call(token, &intrinsic.signature())?;
    Ok(())
}

/// `newobj` through an intrinsic constructor
pub(crate) fn new_intrinsic(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    intrinsic: Intrinsic,
) -> Result<()> {
    let token = intrinsic.token(module);
    asm.newobj(token, &intrinsic.signature())?;
    Ok(())
}

/// `ldstr`
pub(crate) fn load_string(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    value: &str,
) -> Result<()> {
    let token = module.intern_string(value);
    asm.ldstr(token)?;
    Ok(())
}

/// Call `hook` on the interceptor instance of `class`, passing the context in `context`
pub(crate) fn call_hook(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    class: &str,
    hook: Intrinsic,
    context: u16,
) -> Result<()> {
    load_string(asm, module, class)?;
    call_intrinsic(asm, module, Intrinsic::AspectsGet)?;
    asm.ldloc(context)?;
    call_intrinsic(asm, module, hook)
}

/// Push `this`, or null in a static member
pub(crate) fn load_instance(asm: &mut InstructionAssembler, has_this: bool) -> Result<()> {
    if has_this {
        asm.ldarg(0)?;
    } else {
        asm.ldnull()?;
    }
    Ok(())
}

/// Box the value on the stack if `sig` is not a reference type
pub(crate) fn box_if_needed(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    sig: &TypeSig,
) -> Result<()> {
    if sig.needs_box() {
        let token = module.intern_type(sig);
        asm.box_value(token)?;
    }
    Ok(())
}

/// Recover a value of `sig` from the `object` on the stack
pub(crate) fn unbox_to(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    sig: &TypeSig,
) -> Result<()> {
    match sig {
        TypeSig::Object => {}
        sig if sig.needs_box() => {
            let token = module.intern_type(sig);
            asm.unbox_any(token)?;
        }
        sig => {
            let token = module.intern_type(sig);
            asm.castclass(token)?;
        }
    }
    Ok(())
}

/// Push the zero value of `sig`
pub(crate) fn load_default(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    sig: &TypeSig,
) -> Result<()> {
    match sig {
        TypeSig::Void => return Err(Error::Unsupported("default of void".to_string())),
        TypeSig::Boolean | TypeSig::Char | TypeSig::I4 => {
            asm.ldc_i4(0)?;
        }
        TypeSig::I8 | TypeSig::I => {
            asm.ldc_i8(0)?;
        }
        TypeSig::R8 => {
            asm.ldc_r8(0.0)?;
        }
        sig if sig.needs_box() => {
            let local = asm.declare_local(sig.clone());
            let token = module.intern_type(sig);
            asm.ldloca(local)?.initobj(token)?.ldloc(local)?;
        }
        _ => {
            asm.ldnull()?;
        }
    }
    Ok(())
}

/// Push argument `slot` of type `sig` as an `object`, dereferencing managed references
pub(crate) fn load_argument(
    asm: &mut InstructionAssembler,
    module: &mut Module,
    slot: u16,
    sig: &TypeSig,
) -> Result<()> {
    asm.ldarg(slot)?;
    let value_type = sig.strip_by_ref().clone();
    if sig.is_by_ref() {
        let token = module.intern_type(&value_type);
        asm.emit("ldobj", Some(Operand::Token(token)))?;
    }
    box_if_needed(asm, module, &value_type)
}

/// Begin fragment of validators.
///
/// Passes the raw value of the marked parameter, or of the `value` parameter of a property
/// setter, to `Validators.Validate` together with its name and the validator class. Members
/// without a parameter position and `out` parameters are left alone.
///
/// # Errors
/// Returns an error if the parameter does not exist.
pub fn validation_fragment(fragment: &mut Fragment<'_>) -> Result<()> {
    let Some(index) = fragment.param else {
        return Ok(());
    };

    let method = fragment.module.method(fragment.method)?;
    let param_type = method
        .signature
        .params
        .get(index)
        .cloned()
        .ok_or_else(|| Error::MemberNotFound(format!("parameter {index} of {}", method.name)))?;
    if method.params.get(index).is_some_and(|param| param.is_out) {
        return Ok(());
    }
    let slot = method.arg_slot(index);
    let param_name = method
        .params
        .get(index)
        .map_or_else(|| format!("arg{index}"), |param| param.name.clone());

    let name = match fragment.module.property_of_accessor(fragment.method) {
        Some(property) => fragment.module.property(property)?.name.clone(),
        None => param_name,
    };

    load_argument(fragment.asm, fragment.module, slot, &param_type)?;
    load_string(fragment.asm, fragment.module, &name)?;
    load_string(fragment.asm, fragment.module, fragment.class)?;
    call_intrinsic(fragment.asm, fragment.module, Intrinsic::ValidatorsValidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{GenericContext, InstructionDecoder},
        metadata::{
            builders::{ClassBuilder, MethodBuilder},
            marker::Marker,
        },
    };

    fn mnemonics(
        module: &Module,
        body: &crate::metadata::method::MethodBody,
    ) -> Result<Vec<&'static str>> {
        Ok(InstructionDecoder::for_body(module, body, GenericContext::default())
            .decode_all()?
            .iter()
            .map(|i| i.mnemonic)
            .collect())
    }

    #[test]
    fn defaults_and_conversions() -> Result<()> {
        let mut module = Module::new("Test");
        let mut asm = InstructionAssembler::new();
        load_default(&mut asm, &mut module, &TypeSig::I4)?;
        box_if_needed(&mut asm, &mut module, &TypeSig::I4)?;
        unbox_to(&mut asm, &mut module, &TypeSig::I4)?;
        asm.pop()?;
        load_default(&mut asm, &mut module, &TypeSig::String)?;
        box_if_needed(&mut asm, &mut module, &TypeSig::String)?;
        unbox_to(&mut asm, &mut module, &TypeSig::String)?;
        asm.pop()?.ret()?;
        let body = asm.finish()?;

        assert_eq!(
            mnemonics(&module, &body)?,
            vec!["ldc.i4.0", "box", "unbox.any", "pop", "ldnull", "castclass", "pop", "ret"]
        );
        let mut scratch = InstructionAssembler::new();
        assert!(load_default(&mut scratch, &mut module, &TypeSig::Void).is_err());
        Ok(())
    }

    #[test]
    fn validation_fragment_loads_the_marked_parameter() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let method = MethodBuilder::new("Greet")
            .param("count", TypeSig::I4)
            .param("name", TypeSig::String)
            .implementation(|asm, _| {
                asm.ret()?;
                Ok(())
            })
            .build(&mut module, service)?;

        let marker = Marker::new("Required");
        let mut asm = InstructionAssembler::new();
        validation_fragment(&mut Fragment {
            asm: &mut asm,
            module: &mut module,
            method,
            param: Some(1),
            marker: &marker,
            class: "Required",
        })?;
        asm.ret()?;
        let body = asm.finish()?;

        let instructions =
            InstructionDecoder::for_body(&module, &body, GenericContext::default()).decode_all()?;
        let names: Vec<_> = instructions.iter().map(|i| i.mnemonic).collect();
        assert_eq!(names, vec!["ldarg.2", "ldstr", "ldstr", "call", "ret"]);
        assert_eq!(
            instructions[1].resolved.as_ref(),
            Some(&crate::assembly::Resolved::String("name".to_string()))
        );
        let call = instructions[3].resolved.as_ref().and_then(|r| r.as_method());
        assert_eq!(call.map(|m| m.name.as_str()), Some("Validate"));
        Ok(())
    }

    #[test]
    fn validation_fragment_without_parameter_is_empty() -> Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let method = MethodBuilder::new("Run").build(&mut module, service)?;
        let marker = Marker::new("Required");
        let mut asm = InstructionAssembler::new();
        validation_fragment(&mut Fragment {
            asm: &mut asm,
            module: &mut module,
            method,
            param: None,
            marker: &marker,
            class: "Required",
        })?;
        assert_eq!(asm.finish()?.code.len(), 0);
        Ok(())
    }
}
