//! Structural rules checked before a type is rewritten.

use crate::{
    metadata::module::Module,
    weaver::{report::FailedType, selection::TypePlan},
    Error,
};

/// Run the rules of every interceptor applied in `plan`; the first violation wins
pub(crate) fn check(module: &Module, plan: &TypePlan) -> Result<(), FailedType> {
    for descriptor in &plan.rules {
        for rule in &descriptor.rules {
            if let Err(message) = rule(module, plan.type_id) {
                return Err(FailedType {
                    type_name: plan.type_name.clone(),
                    interceptor: descriptor.class.clone(),
                    message,
                });
            }
        }
    }
    Ok(())
}

impl From<FailedType> for Error {
    fn from(failed: FailedType) -> Self {
        Error::StructuralValidation {
            type_name: failed.type_name,
            interceptor: failed.interceptor,
            message: failed.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metadata::{builders::ClassBuilder, member::TypeId},
        weaver::descriptor::InterceptorDescriptor,
    };

    fn plan(type_id: TypeId, descriptor: InterceptorDescriptor) -> TypePlan {
        TypePlan {
            type_id,
            type_name: "Demo.Service".to_string(),
            rules: vec![Arc::new(descriptor)],
            methods: Vec::new(),
            fields: Vec::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn first_violation_is_reported() -> crate::Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;

        let descriptor = InterceptorDescriptor::wrapping("Disposable")
            .rule(|module, id| {
                if module.find_method(id, "Dispose", 0).is_some() {
                    Ok(())
                } else {
                    Err("type must declare Dispose()".to_string())
                }
            })
            .rule(|_, _| Err("unreachable".to_string()));

        let failed = check(&module, &plan(service, descriptor)).err();
        assert_eq!(
            failed.as_ref().map(|f| f.message.as_str()),
            Some("type must declare Dispose()")
        );
        assert_eq!(failed.as_ref().map(|f| f.interceptor.as_str()), Some("Disposable"));

        let error: Error = failed
            .map(Error::from)
            .ok_or_else(|| Error::Error("no violation".to_string()))?;
        assert!(matches!(error, Error::StructuralValidation { .. }));
        Ok(())
    }

    #[test]
    fn passing_rules() -> crate::Result<()> {
        let mut module = Module::new("Test");
        let service = ClassBuilder::new("Demo", "Service").build(&mut module)?;
        let descriptor = InterceptorDescriptor::wrapping("Any").rule(|_, _| Ok(()));
        assert!(check(&module, &plan(service, descriptor)).is_ok());
        Ok(())
    }
}
