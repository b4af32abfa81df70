use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! decode_error {
    ($fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::Decode(format!($fmt $(, $arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the weaving error taxonomy:
///
/// ## Pass-level errors
/// - [`Error::Selection`] - A marker carries a malformed type or member pattern. The whole
///   weave pass is aborted, because later members may share cached pattern state.
/// - [`Error::StructuralValidation`] - A type violates a structural rule declared by one of its
///   interceptors. Weaving of that type is aborted (or the whole pass in strict mode).
///
/// ## Member-level errors
/// - [`Error::Decode`] - The instruction stream of a member contains an unknown opcode or an
///   operand that cannot be resolved. The member is left unrewritten.
/// - [`Error::Unsupported`] - The member uses a construct the rewriter does not handle
///   (generic method definitions, address-taken intercepted fields, ...). The member is left
///   unrewritten and the limitation is reported.
///
/// ## Byte level and model errors
/// - [`Error::Malformed`], [`Error::OutOfBounds`] - Corrupted method bodies
/// - [`Error::TypeNotFound`], [`Error::MemberNotFound`], [`Error::TokenNotFound`] - Lookups into
///   the module model that failed
///
/// ## Runtime errors
/// - [`Error::ManagedException`] - A managed exception escaped a call into the in-process host.
///   Validation errors raised by contract interceptors surface here, exactly like any other
///   exception thrown by the original member.
/// - [`Error::Emulation`] - The host could not execute the instruction stream
///
/// # Examples
///
/// ```rust,no_run
/// use dotweave::{Error, metadata::module::Module, weaver::{InterceptorRegistry, Weaver}};
/// use std::sync::Arc;
///
/// let weaver = Weaver::new(Arc::new(InterceptorRegistry::new()));
/// match weaver.weave(Module::new("Demo")) {
///     Ok(woven) => println!("{} members rewritten", woven.report.rewritten.len()),
///     Err(Error::Selection { pattern, message }) => eprintln!("bad pattern {pattern}: {message}"),
///     Err(e) => eprintln!("weave failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a byte stream.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// A type or member pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {message}")]
    Selection {
        /// The pattern as written on the marker
        pattern: String,
        /// Why compilation failed
        message: String,
    },

    /// A type failed a structural rule declared by one of its interceptors.
    #[error("Type '{type_name}' violates rule of '{interceptor}': {message}")]
    StructuralValidation {
        /// Fully-qualified name of the offending type
        type_name: String,
        /// The interceptor class that declared the rule
        interceptor: String,
        /// Rule message
        message: String,
    },

    /// The instruction stream could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The member uses a construct that is not rewritten.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    /// The requested type is not part of the module.
    #[error("Type not found - {0}")]
    TypeNotFound(String),

    /// The requested member is not part of the module.
    #[error("Member not found - {0}")]
    MemberNotFound(String),

    /// A token does not resolve to an entry of its table.
    #[error("Token not found - {0}")]
    TokenNotFound(Token),

    /// An unknown mnemonic was passed to the encoder.
    #[error("Invalid mnemonic - {0}")]
    InvalidMnemonic(String),

    /// A branch instruction could not be encoded.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// An operand was supplied to an instruction that takes none.
    #[error("Unexpected operand")]
    UnexpectedOperand,

    /// The supplied operand does not match the operand type of the instruction.
    #[error("Wrong operand type - expected {expected}")]
    WrongOperandType {
        /// The operand type the instruction requires
        expected: String,
    },

    /// A branch references a label that was never defined.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// A managed exception escaped a call into the in-process host.
    #[error("{type_name}: {message}")]
    ManagedException {
        /// Heap identity of the thrown object
        object: crate::runtime::ObjectRef,
        /// Runtime type of the thrown object
        type_name: String,
        /// Exception message, empty for non-exception objects
        message: String,
    },

    /// The in-process host failed to execute the instruction stream.
    #[error("Emulation error: {0}")]
    Emulation(String),

    /// Reach the maximum recursion level allowed.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),
}
