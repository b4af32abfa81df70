// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # dotweave
//!
//! A cross-cutting-concerns weaver for compiled .NET modules. Declarative markers on an
//! assembly, its types, members and parameters name interceptors; a weave pass rewrites
//! every marked member so the interceptor hooks run around its original body.
//!
//! ## Features
//!
//! - **Method interception** - `OnEntry`, `OnExit`, `OnSuccess` and `OnException` hooks
//!   around methods, constructors and property or event accessors
//! - **Field and event interception** - every read, write and raise of an intercepted field
//!   or event is redirected through generated helpers
//! - **Inline interceptors** - code fragments emitted directly into the rewritten member,
//!   used for parameter and return value validation
//! - **Selection** - target kinds, visibilities, regex and wildcard name patterns and
//!   exclusion, with a fixed ordering across marker scopes
//! - **Structural rules** - interceptors can reject types that do not meet their needs
//! - **In-process host** - woven modules can be executed directly to observe the hooks
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dotweave::prelude::*;
//!
//! let registry = InterceptorRegistry::new().with(
//!     InterceptorDescriptor::wrapping("Demo.Log")
//!         .on_entry(|_, ctx| {
//!             log::info!("entering {}", ctx.method_name());
//!             Ok(())
//!         }),
//! );
//! let registry = Arc::new(registry);
//!
//! let mut module = Module::new("Demo");
//! let calculator = ClassBuilder::new("Demo", "Calculator")
//!     .marker(Marker::new("Demo.Log"))
//!     .build(&mut module)?;
//! default_constructor(&mut module, calculator)?;
//! MethodBuilder::new("Add")
//!     .param("x", TypeSig::I4)
//!     .param("y", TypeSig::I4)
//!     .returns(TypeSig::I4)
//!     .implementation(|asm, _| {
//!         asm.ldarg(1)?.ldarg(2)?.add()?.ret()?;
//!         Ok(())
//!     })
//!     .build(&mut module, calculator)?;
//!
//! let woven = Weaver::new(Arc::clone(&registry)).weave(module)?;
//! println!("{}", woven.report);
//!
//! let runtime = Runtime::new(woven.module, registry);
//! let calc = runtime.construct("Demo.Calculator", &[])?;
//! let sum = runtime.invoke("Demo.Calculator", "Add", Some(calc), &[Value::I4(2), Value::I4(3)])?;
//! assert_eq!(sum, Value::I4(5));
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - The module model: types, members, signatures, tokens, method bodies and
//!   fluent builders
//! - [`assembly`] - CIL instruction table, decoder, encoder and the fluent assembler
//! - [`weaver`] - Selection, rules, helper synthesis and member rewriting
//! - [`runtime`] - The contract woven code and interceptors share: contexts, values, faults
//! - [`emulation`] - In-process host executing woven modules
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger. A weave pass logs one
//! `info` summary, a `debug` line per rewritten member and a `warn` line per skipped member
//! or rejected type.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dotweave::prelude::*;
///
/// let registry = InterceptorRegistry::new().with(InterceptorDescriptor::wrapping("Demo.Audit"));
/// assert!(registry.contains("Demo.Audit"));
/// ```
pub mod prelude;

/// CIL instructions: opcode table, decoding, encoding and assembly.
///
/// - [`assembly::InstructionDecoder`] - Decode a method body into [`assembly::Instruction`]s
/// - [`assembly::InstructionEncoder`] - Encode instructions with label fixups and stack tracking
/// - [`assembly::InstructionAssembler`] - Fluent per-opcode front end of the encoder
///
/// # Examples
///
/// ```rust
/// use dotweave::{assembly::decode_instruction, Parser};
///
/// let bytecode = &[0x00, 0x2A]; // nop, ret
/// let mut parser = Parser::new(bytecode);
/// let instruction = decode_instruction(&mut parser)?;
///
/// assert_eq!(instruction.mnemonic, "nop");
/// # Ok::<(), dotweave::Error>(())
/// ```
pub mod assembly;

/// The in-memory module model.
///
/// - [`metadata::module::Module`] - Arena of types and members with name and token lookup
/// - [`metadata::signature`] - Type and method signatures with generic substitution
/// - [`metadata::method`] - Method bodies and exception handler sections
/// - [`metadata::marker`] - Declarative markers naming interceptors
/// - [`metadata::builders`] - Fluent type and method builders
pub mod metadata;

/// The contract between woven code and interceptor hooks.
pub mod runtime;

/// In-process execution of woven modules.
pub mod emulation;

/// The weaving engine.
pub mod weaver;

/// `dotweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotweave` Error type
///
/// The main error type for all operations in this crate, covering the
/// taxonomy of weave-time and runtime failures.
pub use error::Error;

/// Bounds-checked reader over raw CIL byte streams.
///
/// # Example
///
/// ```rust
/// use dotweave::{Parser, assembly::decode_instruction};
/// let code = [0x2A]; // ret
/// let mut parser = Parser::new(&code);
/// let instr = decode_instruction(&mut parser)?;
/// assert_eq!(instr.mnemonic, "ret");
/// # Ok::<(), dotweave::Error>(())
/// ```
pub use file::parser::Parser;
