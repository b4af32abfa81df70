//! Exception handling clauses of CIL method bodies.
//!
//! Each clause protects a byte range of the code (the try block) and names a handler range
//! that runs when the protected code throws (catch, filter) or leaves (finally, fault).

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause, the class token names the caught type
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a try/catch/finally region within a method.
///
/// # Layout in IL
///
/// ```text
/// try {
///     // try_offset -> try_offset + try_length
/// }
/// catch (ExceptionType) {
///     // handler_offset -> handler_offset + handler_length
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Class token for typed clauses, filter offset for filter clauses, 0 otherwise
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// Typed catch clause
    #[must_use]
    pub fn catch(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class: Token,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            filter_offset: class.value(),
        }
    }

    /// Finally clause
    #[must_use]
    pub fn finally(
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
    ) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            filter_offset: 0,
        }
    }

    /// True for catch clauses with a class token
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// True for clauses that run when the protected block is left, with or without exception
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// True for clauses that run only while unwinding an exception
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// The type caught by a typed clause
    #[must_use]
    pub fn catch_type(&self) -> Option<Token> {
        if self.is_catch() {
            Some(Token::new(self.filter_offset))
        } else {
            None
        }
    }

    /// First offset past the try block
    #[must_use]
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    /// First offset past the handler block
    #[must_use]
    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    /// True if `offset` lies inside the try block
    #[must_use]
    pub fn protects(&self, offset: u32) -> bool {
        offset >= self.try_offset && offset < self.try_end()
    }

    /// True if `offset` lies inside the handler block
    #[must_use]
    pub fn handles(&self, offset: u32) -> bool {
        offset >= self.handler_offset && offset < self.handler_end()
    }
}
