//! Method bodies: header parsing and encoding, code bytes and exception sections.
//!
//! A compiled body is stored as a header (tiny: one byte, fat: twelve bytes), followed by the
//! instruction stream and, 4-byte aligned, optional extra data sections holding the exception
//! handling clauses.
//!
//! [`MethodHeader`] is the parsed on-disk form and still refers to its locals through a
//! signature token. [`MethodBody`] is the loaded form the weaver works with: code bytes,
//! resolved local types and owned exception clauses.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use bitflags::bitflags;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags},
        signature::TypeSig,
        token::Token,
    },
    Result,
};

bitflags! {
    /// Flags of the first header bytes
    #[derive(PartialEq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header, code size in the upper six bits
        const TINY_FORMAT = 0x2;
        /// Fat header
        const FAT_FORMAT = 0x3;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize locals
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of an extra data section
    #[derive(PartialEq)]
    pub struct SectionFlags: u8 {
        /// Exception handling table
        const EHTABLE = 0x1;
        /// Reserved
        const OPT_ILTABLE = 0x2;
        /// Fat clauses (24 bytes each)
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

/// Parsed method header of an on-disk body.
#[derive(Debug, Clone)]
pub struct MethodHeader {
    /// Size of the method (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// Token of the signature describing the locals, 0 == no local variables
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to call default constructor on all local variables
    pub is_init_local: bool,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodHeader {
    /// Parse a header and its exception sections from a sequence of bytes.
    ///
    /// # Arguments
    /// * `data` - The bytes of the complete body, header first
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodHeader> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(out_of_bounds_error!());
                }

                Ok(MethodHeader {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: 8,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(out_of_bounds_error!());
                }

                let first_duo = read_le::<u16>(data)?;

                let size_header = (first_duo >> 12) * 4;
                let size_code = read_le::<u32>(&data[4..])?;
                if data.len() < (size_code as usize + size_header as usize) {
                    return Err(out_of_bounds_error!());
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])? as usize;

                let exception_handlers = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    let cursor = (size_header as usize + size_code as usize + 3) & !3;
                    parse_sections(data, cursor)?
                } else {
                    Vec::new()
                };

                Ok(MethodHeader {
                    size_code: size_code as usize,
                    size_header: size_header as usize,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Size of header and code together
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }
}

/// Exception handling sections start 4-byte aligned after the code (II.25.4.5)
fn parse_sections(data: &[u8], mut cursor: usize) -> Result<Vec<ExceptionHandler>> {
    let mut exception_handlers = Vec::new();

    while data.len() > (cursor + 4) {
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = read_le::<u32>(&data[cursor + 1..])? & 0x00FF_FFFF;
            if section_size < 4 || data.len() < (cursor + section_size as usize) {
                break;
            }

            cursor += 4;
            for _ in 0..(section_size - 4) / 24 {
                // Clause flags are stored as u32 in fat sections but only the low bits are defined
                #[allow(clippy::cast_possible_truncation)]
                let flags = ExceptionHandlerFlags::from_bits_truncate(
                    read_le_at::<u32>(data, &mut cursor)? as u16,
                );
                exception_handlers.push(ExceptionHandler {
                    flags,
                    try_offset: read_le_at::<u32>(data, &mut cursor)?,
                    try_length: read_le_at::<u32>(data, &mut cursor)?,
                    handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                    handler_length: read_le_at::<u32>(data, &mut cursor)?,
                    filter_offset: read_le_at::<u32>(data, &mut cursor)?,
                });
            }
        } else {
            let section_size = u32::from(read_le::<u8>(&data[cursor + 1..])?);
            if section_size < 4 || data.len() < (cursor + section_size as usize) {
                break;
            }

            cursor += 4;
            for _ in 0..(section_size - 4) / 12 {
                exception_handlers.push(ExceptionHandler {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut cursor,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                    filter_offset: read_le_at::<u32>(data, &mut cursor)?,
                });
            }
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(exception_handlers)
}

/// Encode a method header.
///
/// A tiny header is produced when the body qualifies for it: code shorter than 64 bytes,
/// a stack of at most 8, no locals, no exception sections and no zero-initialization.
///
/// # Errors
/// Returns an error if the code size does not fit the header.
pub fn encode_method_body_header(
    code_size: u32,
    max_stack: u16,
    local_var_sig_token: u32,
    has_exceptions: bool,
    init_locals: bool,
) -> Result<Vec<u8>> {
    if code_size < 64
        && max_stack <= 8
        && local_var_sig_token == 0
        && !has_exceptions
        && !init_locals
    {
        #[allow(clippy::cast_possible_truncation)]
        return Ok(vec![((code_size as u8) << 2) | 0x02]);
    }

    let mut flags = MethodBodyFlags::FAT_FORMAT.bits();
    if has_exceptions {
        flags |= MethodBodyFlags::MORE_SECTS.bits();
    }
    if init_locals {
        flags |= MethodBodyFlags::INIT_LOCALS.bits();
    }
    // Header size in 4-byte units lives in the upper nibble
    let first_duo = flags | (3 << 12);

    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(&first_duo.to_le_bytes());
    header.extend_from_slice(&max_stack.to_le_bytes());
    header.extend_from_slice(&code_size.to_le_bytes());
    header.extend_from_slice(&local_var_sig_token.to_le_bytes());
    Ok(header)
}

/// Encode exception clauses as one extra data section.
///
/// The small format is used when every clause fits it, the fat format otherwise.
///
/// # Errors
/// Returns an error if the section would exceed its maximum size.
pub fn encode_exception_handlers(handlers: &[ExceptionHandler]) -> Result<Vec<u8>> {
    let fits_small = handlers.len() * 12 + 4 <= 0xFF
        && handlers.iter().all(|h| {
            h.try_offset <= 0xFFFF
                && h.try_length <= 0xFF
                && h.handler_offset <= 0xFFFF
                && h.handler_length <= 0xFF
        });

    let mut section = Vec::new();
    if fits_small {
        #[allow(clippy::cast_possible_truncation)]
        let size = (handlers.len() * 12 + 4) as u8;
        section.extend_from_slice(&[SectionFlags::EHTABLE.bits(), size, 0, 0]);
        for handler in handlers {
            #[allow(clippy::cast_possible_truncation)]
            {
                section.extend_from_slice(&handler.flags.bits().to_le_bytes());
                section.extend_from_slice(&(handler.try_offset as u16).to_le_bytes());
                section.push(handler.try_length as u8);
                section.extend_from_slice(&(handler.handler_offset as u16).to_le_bytes());
                section.push(handler.handler_length as u8);
            }
            section.extend_from_slice(&handler.filter_offset.to_le_bytes());
        }
    } else {
        let size = u32::try_from(handlers.len() * 24 + 4)
            .map_err(|_| malformed_error!("Too many exception handlers - {}", handlers.len()))?;
        if size > 0x00FF_FFFF {
            return Err(malformed_error!("Exception section too large - {}", size));
        }
        let flags = SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT;
        section.push(flags.bits());
        section.extend_from_slice(&size.to_le_bytes()[..3]);
        for handler in handlers {
            section.extend_from_slice(&u32::from(handler.flags.bits()).to_le_bytes());
            section.extend_from_slice(&handler.try_offset.to_le_bytes());
            section.extend_from_slice(&handler.try_length.to_le_bytes());
            section.extend_from_slice(&handler.handler_offset.to_le_bytes());
            section.extend_from_slice(&handler.handler_length.to_le_bytes());
            section.extend_from_slice(&handler.filter_offset.to_le_bytes());
        }
    }

    Ok(section)
}

/// A loaded method body.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Zero-initialize locals on entry
    pub init_locals: bool,
    /// Types of the local variables, in slot order
    pub locals: Vec<TypeSig>,
    /// The instruction stream
    pub code: Vec<u8>,
    /// Exception clauses, innermost first
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Body from raw code without locals or exception clauses
    #[must_use]
    pub fn new(code: Vec<u8>, max_stack: u16) -> Self {
        MethodBody {
            max_stack,
            init_locals: false,
            locals: Vec::new(),
            code,
            exception_handlers: Vec::new(),
        }
    }

    /// Build a body from its on-disk form.
    ///
    /// `locals` are the already-resolved types behind the header's signature token.
    ///
    /// # Errors
    /// Returns an error if the header or its sections are malformed.
    pub fn from_bytes(data: &[u8], locals: Vec<TypeSig>) -> Result<MethodBody> {
        let header = MethodHeader::from(data)?;
        let code = data[header.size_header..header.size()].to_vec();

        Ok(MethodBody {
            max_stack: u16::try_from(header.max_stack).unwrap_or(u16::MAX),
            init_locals: header.is_init_local,
            locals,
            code,
            exception_handlers: header.exception_handlers,
        })
    }

    /// Encode the body in its on-disk form, with `local_sig` naming the locals signature.
    ///
    /// # Errors
    /// Returns an error if the code or the exception section cannot be encoded.
    pub fn to_bytes(&self, local_sig: Token) -> Result<Vec<u8>> {
        let code_size = u32::try_from(self.code.len())
            .map_err(|_| malformed_error!("Method body size exceeds u32 range"))?;
        let has_exceptions = !self.exception_handlers.is_empty();

        let mut body = encode_method_body_header(
            code_size,
            self.max_stack,
            local_sig.value(),
            has_exceptions,
            self.init_locals,
        )?;
        body.extend_from_slice(&self.code);

        if has_exceptions {
            while body.len() % 4 != 0 {
                body.push(0x00);
            }
            body.extend_from_slice(&encode_exception_handlers(&self.exception_handlers)?);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        // ldarg.0, ldarg.1, add, ret
        let data = [0x12, 0x02, 0x03, 0x58, 0x2A];

        let header = MethodHeader::from(&data).unwrap();

        assert!(!header.is_fat);
        assert!(!header.is_init_local);
        assert_eq!(header.size_code, 4);
        assert_eq!(header.size_header, 1);
        assert_eq!(header.size(), 5);
        assert_eq!(header.local_var_sig_token, 0);
    }

    #[test]
    fn tiny_truncated() {
        assert!(MethodHeader::from(&[0x12, 0x02]).is_err());
        assert!(MethodHeader::from(&[]).is_err());
    }

    #[test]
    fn fat_with_small_exception_section() {
        #[rustfmt::skip]
        let data = [
            // fat, more sects, init locals, header size 3
            0x1B, 0x30, 0x02, 0x00,
            // code size 6
            0x06, 0x00, 0x00, 0x00,
            // local sig
            0x01, 0x00, 0x00, 0x11,
            // nop; leave.s +1 ; nop ; endfinally ; ret
            0x00, 0xDE, 0x01, 0x00, 0xDC, 0x2A,
            // align
            0x00, 0x00,
            // small EH section, 16 bytes
            0x01, 0x10, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
        ];

        let header = MethodHeader::from(&data).unwrap();
        assert!(header.is_fat);
        assert!(header.is_init_local);
        assert_eq!(header.max_stack, 2);
        assert_eq!(header.size_code, 6);
        assert_eq!(header.size_header, 12);
        assert_eq!(header.local_var_sig_token, 0x1100_0001);
        assert_eq!(header.exception_handlers.len(), 1);

        let handler = &header.exception_handlers[0];
        assert!(handler.flags.contains(ExceptionHandlerFlags::FINALLY));
        assert_eq!(handler.try_offset, 0);
        assert_eq!(handler.try_length, 3);
        assert_eq!(handler.handler_offset, 3);
        assert_eq!(handler.handler_length, 2);
    }

    #[test]
    fn encode_picks_tiny_header() {
        let body = MethodBody::new(vec![0x17, 0x2A], 1);
        let bytes = body.to_bytes(Token::new(0)).unwrap();
        assert_eq!(bytes, vec![0x0A, 0x17, 0x2A]);
    }

    #[test]
    fn encode_fat_body_with_handlers() {
        let mut body = MethodBody::new(vec![0x00, 0xDE, 0x01, 0x00, 0xDC, 0x2A], 2);
        body.init_locals = true;
        body.locals.push(TypeSig::I4);
        body.exception_handlers
            .push(ExceptionHandler::finally(0, 3, 3, 2));

        let bytes = body.to_bytes(Token::new(0x1100_0001)).unwrap();
        assert_eq!(bytes.len() % 4, 0);

        let parsed = MethodBody::from_bytes(&bytes, vec![TypeSig::I4]).unwrap();
        assert_eq!(parsed.code, body.code);
        assert_eq!(parsed.max_stack, 2);
        assert!(parsed.init_locals);
        assert_eq!(parsed.exception_handlers, body.exception_handlers);
    }

    #[test]
    fn large_offsets_use_fat_clauses() {
        let handlers = vec![ExceptionHandler::finally(0, 0x300, 0x300, 4)];
        let section = encode_exception_handlers(&handlers).unwrap();
        assert_eq!(section.len(), 28);
        assert_eq!(section[0], 0x41);
    }
}
