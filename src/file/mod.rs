//! Low-level byte access shared by the instruction decoder and the method body codec.

pub mod io;
pub mod parser;
