//! # dotweave Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotweave library. Import this module to get quick access to everything needed
//! to declare interceptors, build or load a module, weave it and run the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotweave operations
pub use crate::Error;

/// The result type used throughout dotweave
pub use crate::Result;

// ================================================================================================
// Weaving
// ================================================================================================

/// Weaving session, its configuration and its outcome
pub use crate::weaver::{WeaveCache, WeaveConfig, WeaveReport, Weaver, Woven};

/// Interceptor declaration
pub use crate::weaver::{
    BlockKind, ContextUsage, InterceptorDescriptor, InterceptorRegistry, Modifiers, Targets,
};

/// Selection results
pub use crate::weaver::{Application, SkipReason};

// ================================================================================================
// Module Model
// ================================================================================================

/// The module arena and its member definitions
pub use crate::metadata::module::Module;

/// Member identifiers and attributes
pub use crate::metadata::member::{FieldId, MethodId, TypeId, Visibility};

/// Signatures
pub use crate::metadata::signature::{MethodSig, TypeSig};

/// Declarative markers
pub use crate::metadata::marker::{Marker, MarkerScope};

/// Fluent builders
pub use crate::metadata::builders::{
    auto_property, default_constructor, event_field, ClassBuilder, MethodBuilder,
};

/// Metadata token type
pub use crate::metadata::token::Token;

// ================================================================================================
// Runtime Contract
// ================================================================================================

/// What interceptor hooks receive
pub use crate::runtime::{EventContext, Fault, Host, MemberContext, MethodContext, Value};

// ================================================================================================
// Execution
// ================================================================================================

/// In-process host for woven modules
pub use crate::emulation::{EmulationLimits, Runtime};

// ================================================================================================
// Instruction Assembly
// ================================================================================================

/// Fluent instruction assembler used by method builders
pub use crate::assembly::InstructionAssembler;
