//! Runtime library members referenced by woven code.
//!
//! Emitted instructions reach contexts, interceptor instances and a handful of `System`
//! members through member references. [`Intrinsic`] is the single description of those
//! members: the weaver interns [`Intrinsic::member_ref`] to obtain call tokens, and the host
//! maps a called reference back with [`Intrinsic::lookup`] to dispatch it.

use std::{collections::HashMap, sync::OnceLock};

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::metadata::{
    module::{MemberRef, Module},
    signature::{MethodSig, TypeSig},
    token::Token,
};

/// Namespace of the runtime library types
pub const RUNTIME_NAMESPACE: &str = "Weave.Runtime";
/// Per-invocation context type
pub const METHOD_CONTEXT_TYPE: &str = "Weave.Runtime.MethodContext";
/// Field and property access context type
pub const MEMBER_CONTEXT_TYPE: &str = "Weave.Runtime.MemberContext";
/// Event context type
pub const EVENT_CONTEXT_TYPE: &str = "Weave.Runtime.EventContext";
/// Interceptor instance type
pub const ASPECT_TYPE: &str = "Weave.Runtime.Aspect";
/// Interceptor instance cache
pub const ASPECTS_TYPE: &str = "Weave.Runtime.Aspects";
/// Member identity cache
pub const MEMBERS_TYPE: &str = "Weave.Runtime.Members";
/// Contract validator entry point
pub const VALIDATORS_TYPE: &str = "Weave.Runtime.Validators";
/// Delegate type binding read trampolines, `object Getter(object instance)`
pub const GETTER_TYPE: &str = "Weave.Runtime.Getter";
/// Delegate type binding write trampolines, `void Setter(object instance, object value)`
pub const SETTER_TYPE: &str = "Weave.Runtime.Setter";
/// Base type of all delegates
pub const DELEGATE_TYPE: &str = "System.Delegate";
/// General exception type raised by faults
pub const INVALID_OPERATION_TYPE: &str = "System.InvalidOperationException";
/// Exception type raised by validators
pub const ARGUMENT_EXCEPTION_TYPE: &str = "System.ArgumentException";
/// Exception type raised for null value types and null receivers
pub const NULL_REFERENCE_TYPE: &str = "System.NullReferenceException";
/// Exception type raised by failed casts
pub const INVALID_CAST_TYPE: &str = "System.InvalidCastException";

/// A runtime library member callable from woven code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Intrinsic {
    /// `System.Object::.ctor()`
    ObjectCtor,
    /// `System.Delegate System.Delegate::Combine(System.Delegate, System.Delegate)`
    DelegateCombine,
    /// `System.Delegate System.Delegate::Remove(System.Delegate, System.Delegate)`
    DelegateRemove,
    /// `System.Exception::.ctor(string)`
    ExceptionCtor,
    /// `string System.Exception::get_Message()`
    ExceptionGetMessage,
    /// `System.InvalidOperationException::.ctor(string)`
    InvalidOperationCtor,
    /// `string System.String::Concat(object, object)`
    StringConcat,
    /// `MethodContext::.ctor()`
    MethodContextCtor,
    /// `void MethodContext::set_Method(object)`
    MethodContextSetMethod,
    /// `void MethodContext::set_Instance(object)`
    MethodContextSetInstance,
    /// `void MethodContext::AddArgument(string, bool, object)`
    MethodContextAddArgument,
    /// `bool MethodContext::get_Proceed()`
    MethodContextGetProceed,
    /// `object MethodContext::get_Returns()`
    MethodContextGetReturns,
    /// `void MethodContext::set_Returns(object)`
    MethodContextSetReturns,
    /// `void MethodContext::set_Exception(object)`
    MethodContextSetException,
    /// `Aspect Aspects::Get(string)`
    AspectsGet,
    /// `void Aspect::OnEntry(MethodContext)`
    AspectOnEntry,
    /// `void Aspect::OnExit(MethodContext)`
    AspectOnExit,
    /// `void Aspect::OnSuccess(MethodContext)`
    AspectOnSuccess,
    /// `void Aspect::OnException(MethodContext)`
    AspectOnException,
    /// `void Aspect::OnGetValue(MemberContext)`
    AspectOnGetValue,
    /// `void Aspect::OnSetValue(MemberContext)`
    AspectOnSetValue,
    /// `void Aspect::OnAddHandler(EventContext)`
    AspectOnAddHandler,
    /// `void Aspect::OnRemoveHandler(EventContext)`
    AspectOnRemoveHandler,
    /// `void Aspect::OnInvokeEvent(EventContext)`
    AspectOnInvokeEvent,
    /// `object Members::Resolve(string)`
    MembersResolve,
    /// `MemberContext::.ctor(object instance, string location, object value, bool isProperty)`
    MemberContextCtor,
    /// `void MemberContext::AddIndex(object)`
    MemberContextAddIndex,
    /// `object MemberContext::get_Value()`
    MemberContextGetValue,
    /// `bool MemberContext::get_Continue()`
    MemberContextGetContinue,
    /// `EventContext::.ctor(object instance, object handler)`
    EventContextCtor,
    /// `EventContext::.ctor(object instance, object handler, object[] arguments)`
    EventContextInvokeCtor,
    /// `object EventContext::get_Handler()`
    EventContextGetHandler,
    /// `bool EventContext::get_Proceed()`
    EventContextGetProceed,
    /// `object[] EventContext::get_Arguments()`
    EventContextGetArguments,
    /// `void Validators::Validate(object value, string name, string validator)`
    ValidatorsValidate,
    /// `Getter::.ctor(object, native int)`
    GetterCtor,
    /// `object Getter::Invoke(object)`
    GetterInvoke,
    /// `Setter::.ctor(object, native int)`
    SetterCtor,
    /// `void Setter::Invoke(object, object)`
    SetterInvoke,
}

struct Shape {
    declaring: &'static str,
    name: &'static str,
    has_this: bool,
    params: Vec<TypeSig>,
    ret: TypeSig,
}

fn class(name: &str) -> TypeSig {
    TypeSig::class(name)
}

impl Intrinsic {
    fn shape(self) -> Shape {
        use Intrinsic as I;
        use TypeSig as T;

        let (declaring, name, has_this, params, ret) = match self {
            I::ObjectCtor => ("System.Object", ".ctor", true, vec![], T::Void),
            I::DelegateCombine => (
                DELEGATE_TYPE,
                "Combine",
                false,
                vec![class(DELEGATE_TYPE), class(DELEGATE_TYPE)],
                class(DELEGATE_TYPE),
            ),
            I::DelegateRemove => (
                DELEGATE_TYPE,
                "Remove",
                false,
                vec![class(DELEGATE_TYPE), class(DELEGATE_TYPE)],
                class(DELEGATE_TYPE),
            ),
            I::ExceptionCtor => ("System.Exception", ".ctor", true, vec![T::String], T::Void),
            I::ExceptionGetMessage => ("System.Exception", "get_Message", true, vec![], T::String),
            I::InvalidOperationCtor => (
                INVALID_OPERATION_TYPE,
                ".ctor",
                true,
                vec![T::String],
                T::Void,
            ),
            I::StringConcat => (
                "System.String",
                "Concat",
                false,
                vec![T::Object, T::Object],
                T::String,
            ),
            I::MethodContextCtor => (METHOD_CONTEXT_TYPE, ".ctor", true, vec![], T::Void),
            I::MethodContextSetMethod => (
                METHOD_CONTEXT_TYPE,
                "set_Method",
                true,
                vec![T::Object],
                T::Void,
            ),
            I::MethodContextSetInstance => (
                METHOD_CONTEXT_TYPE,
                "set_Instance",
                true,
                vec![T::Object],
                T::Void,
            ),
            I::MethodContextAddArgument => (
                METHOD_CONTEXT_TYPE,
                "AddArgument",
                true,
                vec![T::String, T::Boolean, T::Object],
                T::Void,
            ),
            I::MethodContextGetProceed => (
                METHOD_CONTEXT_TYPE,
                "get_Proceed",
                true,
                vec![],
                T::Boolean,
            ),
            I::MethodContextGetReturns => (
                METHOD_CONTEXT_TYPE,
                "get_Returns",
                true,
                vec![],
                T::Object,
            ),
            I::MethodContextSetReturns => (
                METHOD_CONTEXT_TYPE,
                "set_Returns",
                true,
                vec![T::Object],
                T::Void,
            ),
            I::MethodContextSetException => {
                (METHOD_CONTEXT_TYPE, "set_Exception", true, vec![T::Object], T::Void)
            }
            I::AspectsGet => (ASPECTS_TYPE, "Get", false, vec![T::String], class(ASPECT_TYPE)),
            I::AspectOnEntry => (
                ASPECT_TYPE,
                "OnEntry",
                true,
                vec![class(METHOD_CONTEXT_TYPE)],
                T::Void,
            ),
            I::AspectOnExit => (
                ASPECT_TYPE,
                "OnExit",
                true,
                vec![class(METHOD_CONTEXT_TYPE)],
                T::Void,
            ),
            I::AspectOnSuccess => (
                ASPECT_TYPE,
                "OnSuccess",
                true,
                vec![class(METHOD_CONTEXT_TYPE)],
                T::Void,
            ),
            I::AspectOnException => {
                (ASPECT_TYPE, "OnException", true, vec![class(METHOD_CONTEXT_TYPE)], T::Void)
            }
            I::AspectOnGetValue => (
                ASPECT_TYPE,
                "OnGetValue",
                true,
                vec![class(MEMBER_CONTEXT_TYPE)],
                T::Void,
            ),
            I::AspectOnSetValue => (
                ASPECT_TYPE,
                "OnSetValue",
                true,
                vec![class(MEMBER_CONTEXT_TYPE)],
                T::Void,
            ),
            I::AspectOnAddHandler => {
                (ASPECT_TYPE, "OnAddHandler", true, vec![class(EVENT_CONTEXT_TYPE)], T::Void)
            }
            I::AspectOnRemoveHandler => {
                (ASPECT_TYPE, "OnRemoveHandler", true, vec![class(EVENT_CONTEXT_TYPE)], T::Void)
            }
            I::AspectOnInvokeEvent => {
                (ASPECT_TYPE, "OnInvokeEvent", true, vec![class(EVENT_CONTEXT_TYPE)], T::Void)
            }
            I::MembersResolve => (MEMBERS_TYPE, "Resolve", false, vec![T::String], T::Object),
            I::MemberContextCtor => (
                MEMBER_CONTEXT_TYPE,
                ".ctor",
                true,
                vec![T::Object, T::String, T::Object, T::Boolean],
                T::Void,
            ),
            I::MemberContextAddIndex => (
                MEMBER_CONTEXT_TYPE,
                "AddIndex",
                true,
                vec![T::Object],
                T::Void,
            ),
            I::MemberContextGetValue => (MEMBER_CONTEXT_TYPE, "get_Value", true, vec![], T::Object),
            I::MemberContextGetContinue => (
                MEMBER_CONTEXT_TYPE,
                "get_Continue",
                true,
                vec![],
                T::Boolean,
            ),
            I::EventContextCtor => (
                EVENT_CONTEXT_TYPE,
                ".ctor",
                true,
                vec![T::Object, T::Object],
                T::Void,
            ),
            I::EventContextInvokeCtor => (
                EVENT_CONTEXT_TYPE,
                ".ctor",
                true,
                vec![T::Object, T::Object, TypeSig::object_array()],
                T::Void,
            ),
            I::EventContextGetHandler => (
                EVENT_CONTEXT_TYPE,
                "get_Handler",
                true,
                vec![],
                T::Object,
            ),
            I::EventContextGetProceed => (
                EVENT_CONTEXT_TYPE,
                "get_Proceed",
                true,
                vec![],
                T::Boolean,
            ),
            I::EventContextGetArguments => {
                (EVENT_CONTEXT_TYPE, "get_Arguments", true, vec![], TypeSig::object_array())
            }
            I::ValidatorsValidate => (
                VALIDATORS_TYPE,
                "Validate",
                false,
                vec![T::Object, T::String, T::String],
                T::Void,
            ),
            I::GetterCtor => (GETTER_TYPE, ".ctor", true, vec![T::Object, T::I], T::Void),
            I::GetterInvoke => (GETTER_TYPE, "Invoke", true, vec![T::Object], T::Object),
            I::SetterCtor => (SETTER_TYPE, ".ctor", true, vec![T::Object, T::I], T::Void),
            I::SetterInvoke => (SETTER_TYPE, "Invoke", true, vec![T::Object, T::Object], T::Void),
        };

        Shape {
            declaring,
            name,
            has_this,
            params,
            ret,
        }
    }

    /// Fully-qualified declaring type
    #[must_use]
    pub fn declaring(self) -> &'static str {
        self.shape().declaring
    }

    /// Member name
    #[must_use]
    pub fn name(self) -> &'static str {
        self.shape().name
    }

    /// Call signature
    #[must_use]
    pub fn signature(self) -> MethodSig {
        let shape = self.shape();
        if shape.has_this {
            MethodSig::new_instance(shape.params, shape.ret)
        } else {
            MethodSig::new_static(shape.params, shape.ret)
        }
    }

    /// Member reference naming this intrinsic
    #[must_use]
    pub fn member_ref(self) -> MemberRef {
        let shape = self.shape();
        MemberRef::method(class(shape.declaring), shape.name, self.signature())
    }

    /// Call token of this intrinsic in `module`, interned on first use
    pub fn token(self, module: &mut Module) -> Token {
        module.intern_member_ref(self.member_ref())
    }

    /// Intrinsic behind a called member, by declaring type, name and parameter count
    #[must_use]
    pub fn lookup(declaring: &str, name: &str, param_count: usize) -> Option<Intrinsic> {
        static TABLE: OnceLock<HashMap<(&'static str, &'static str, usize), Intrinsic>> =
            OnceLock::new();
        TABLE
            .get_or_init(|| {
                Intrinsic::iter()
                    .map(|intrinsic| {
                        let shape = intrinsic.shape();
                        ((shape.declaring, shape.name, shape.params.len()), intrinsic)
                    })
                    .collect()
            })
            .get(&(declaring, name, param_count))
            .copied()
    }
}

/// True if `name` is one of the runtime library's delegate types
#[must_use]
pub fn is_runtime_delegate(name: &str) -> bool {
    name == GETTER_TYPE || name == SETTER_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_round_trips_every_member() {
        for intrinsic in Intrinsic::iter() {
            let sig = intrinsic.signature();
            assert_eq!(
                Intrinsic::lookup(intrinsic.declaring(), intrinsic.name(), sig.params.len()),
                Some(intrinsic),
                "{intrinsic}"
            );
        }
    }

    #[test]
    fn overloads_differ_by_arity() {
        assert_eq!(
            Intrinsic::lookup(EVENT_CONTEXT_TYPE, ".ctor", 2),
            Some(Intrinsic::EventContextCtor)
        );
        assert_eq!(
            Intrinsic::lookup(EVENT_CONTEXT_TYPE, ".ctor", 3),
            Some(Intrinsic::EventContextInvokeCtor)
        );
        assert_eq!(Intrinsic::lookup(ASPECT_TYPE, "OnEntry", 2), None);
    }

    #[test]
    fn tokens_are_interned_once() {
        let mut module = Module::new("Test");
        let first = Intrinsic::AspectOnEntry.token(&mut module);
        let second = Intrinsic::AspectOnEntry.token(&mut module);
        assert_eq!(first, second);
        assert_ne!(first, Intrinsic::AspectOnExit.token(&mut module));
        assert!(!Intrinsic::AspectsGet.signature().has_this);
    }
}
