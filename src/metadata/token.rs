//! Metadata tokens as they appear in CIL instruction operands.
//!
//! A token is a 32-bit value: the high byte names the table, the low 24 bits are the
//! 1-based row within it. Rewritten method bodies keep the tokens of every instruction
//! they copy, so references that were already resolved in the original body stay
//! byte-identical in the clone.

use std::fmt;

/// Table id of type definitions
pub const TABLE_TYPEDEF: u8 = 0x02;
/// Table id of field definitions
pub const TABLE_FIELD: u8 = 0x04;
/// Table id of method definitions
pub const TABLE_METHODDEF: u8 = 0x06;
/// Table id of member references (imports and references through generic instantiations)
pub const TABLE_MEMBERREF: u8 = 0x0A;
/// Table id of stand-alone signatures (local variable lists)
pub const TABLE_STANDALONESIG: u8 = 0x11;
/// Table id of type specifications
pub const TABLE_TYPESPEC: u8 = 0x1B;
/// Table id of generic method instantiations
pub const TABLE_METHODSPEC: u8 = 0x2B;
/// Pseudo-table id of the user string heap
pub const TABLE_STRING: u8 = 0x70;

/// A metadata token representing a reference to a metadata table entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a 1-based row
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero-based arena index for the row, `None` for the null row
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.row() as usize).checked_sub(1)
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(TABLE_METHODDEF, 5);
        assert_eq!(token.value(), 0x0600_0005);
        assert_eq!(token.table(), TABLE_METHODDEF);
        assert_eq!(token.row(), 5);
        assert_eq!(token.index(), Some(4));
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert_eq!(Token(0).index(), None);
        assert!(!Token(0x0200_0001).is_null());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x7000_0001)), "0x70000001");
        assert_eq!(
            format!("{:?}", Token(0x0A00_0002)),
            "Token(0x0a000002, table: 0x0a, row: 2)"
        );
    }
}
