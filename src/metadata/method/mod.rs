//! Method bodies and their exception handling clauses.

mod body;
mod exceptions;

pub use body::{
    encode_exception_handlers, encode_method_body_header, MethodBody, MethodBodyFlags,
    MethodHeader, SectionFlags,
};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
