//! Little-endian reading and writing of primitive values in CIL byte streams.
//!
//! Method headers, exception handler sections and instruction operands are all stored
//! little-endian. The [`CilIO`] trait gives every primitive a uniform, bounds-checked
//! path in and out of such buffers.
//!
//! # Example
//!
//! ```rust,ignore
//! use dotweave::file::io::{read_le_at, write_le_at};
//!
//! let mut data = vec![0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x0201_u16)?;
//! write_le_at(&mut data, &mut offset, 7_u32)?;
//!
//! offset = 0;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 0x0201);
//! assert_eq!(read_le_at::<u32>(&data, &mut offset)?, 7);
//! # Ok::<(), dotweave::Error>(())
//! ```

use crate::Result;

/// Trait for primitives that can be read from and written to little-endian byte buffers.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte representation of the type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build the value from its little-endian representation
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Produce the little-endian representation of the value
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $size:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
);

/// Read a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a value at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Write a value at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit at `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequential_values() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 3);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_past_end_fails() {
        let data = [0x01, 0x02];
        let mut offset = 1;
        assert!(read_le_at::<u32>(&data, &mut offset).is_err());
        assert_eq!(offset, 1);
    }

    #[test]
    fn write_then_read_signed() {
        let mut data = [0u8; 4];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, -2_i32).unwrap();
        assert_eq!(read_le::<i32>(&data).unwrap(), -2);
        assert!(write_le_at(&mut data, &mut offset, 1_u8).is_err());
    }
}
