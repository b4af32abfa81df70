//! In-memory model of a compiled module.
//!
//! The model is an arena: [`module::Module`] owns every type and member, and entities refer
//! to each other through stable ids and fully-qualified names rather than pointers.
//!
//! # Key Components
//!
//! - [`module`] - The module arena, name lookup, token tables and reference interning
//! - [`typedef`] - Type definitions
//! - [`member`] - Methods, parameters, fields, properties and events
//! - [`signature`] - Type and method signatures with generic substitution
//! - [`method`] - Method bodies in their on-disk form, tiny and fat headers, exception clauses
//! - [`marker`] - Declarative markers naming interceptor classes
//! - [`token`] - Metadata tokens as used in instruction operands
//! - [`builders`] - Fluent construction of types and members

pub mod builders;
pub mod marker;
pub mod member;
pub mod method;
pub mod module;
pub mod signature;
pub mod token;
pub mod typedef;
