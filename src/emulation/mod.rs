//! In-process host for woven modules.
//!
//! This module executes CIL method bodies of a [`crate::metadata::module::Module`] directly,
//! so woven code can be run and observed without leaving the process. Calls into the
//! runtime library (see [`crate::runtime::intrinsics`]) are served natively: context records
//! are allocated on the heap and hook calls are dispatched to the descriptors of an
//! [`crate::weaver::InterceptorRegistry`].
//!
//! # Architecture
//!
//! - Managed heap holding instances, arrays, delegates, exceptions and context records
//! - Stack-based interpreter with protected regions, `leave` and `endfinally`
//! - Call dispatch covering module methods, virtual dispatch, delegates and intrinsics
//!
//! # Key Components
//!
//! - [`crate::emulation::Runtime`] - The host: owns the module, the heap and the static state
//! - [`crate::emulation::ManagedHeap`] - Append-only object store
//! - [`crate::emulation::EmulationLimits`] - Call depth and instruction budget
//!
//! # Exception Model
//!
//! Exceptions are heap objects. When one is thrown, the interpreter searches the protected
//! regions of the current method innermost first, runs `finally` and `fault` handlers on
//! the way out and transfers control to the first matching catch. An exception no clause
//! handles unwinds to the caller; at the top level it surfaces as
//! [`crate::Error::ManagedException`].
//!
//! Faults returned by interceptor hooks are allocated as exceptions of the fault's type and
//! thrown at the hook's call site.
//!
//! # Thread Safety
//!
//! [`Runtime`] is `Send + Sync`. The heap and the static fields sit behind mutexes that are
//! released while a hook runs, so hooks may call back into the host.

mod config;
mod dispatch;
mod heap;
mod host;
mod interpreter;

pub use config::EmulationLimits;
pub use heap::{HeapObject, ManagedHeap};
pub use host::Runtime;
