//! Big-endian reading and writing utilities for class-file parsing and generation.
//!
//! Every multi-byte quantity in a JVM class file is stored big-endian. This module provides
//! the [`crate::file::io::ClassIO`] trait together with bounds-checked helpers built on it:
//!
//! - [`crate::file::io::read_be_at`] - Read a value at an offset and advance the offset
//! - [`crate::file::io::write_be`] - Append a value to a growable buffer
//!
//! All reading functions return [`crate::Error::OutOfBounds`] instead of panicking when the
//! buffer is too short, which is what makes truncated class files a recoverable error.
//!
//! # Examples
//!
//! ```rust,ignore
//! use shadowbox::file::io::{read_be_at, write_be};
//!
//! let mut out = Vec::new();
//! write_be(&mut out, 0xCAFE_BABEu32);
//! write_be(&mut out, 52u16);
//!
//! let mut offset = 0;
//! let magic: u32 = read_be_at(&out, &mut offset)?;
//! let major: u16 = read_be_at(&out, &mut offset)?;
//! assert_eq!((magic, major, offset), (0xCAFE_BABE, 52, 6));
//! # Ok::<(), shadowbox::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for type-specific big-endian binary conversions.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
///
/// Implemented for `u8`, `i8`, `u16`, `i16`, `u32`, `i32`, `u64`, `i64`, `f32` and `f64`,
/// which covers every fixed-width field and constant kind in the class-file format.
pub trait ClassIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $len];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io!(
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

/// Reads a value of type `T` at `offset` in big-endian byte order and advances the offset.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain after
/// `offset`. The offset is left untouched on failure.
///
/// # Thread Safety
///
/// This function is thread-safe and can be called concurrently from multiple threads.
/// Note that the offset parameter is modified, so each thread should use its own offset variable.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Appends `value` to `out` in big-endian byte order.
pub fn write_be<T: ClassIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_be_bytes().as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_be_at_sequence() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        let mut offset = 0;

        let magic: u32 = read_be_at(&data, &mut offset).unwrap();
        let minor: u16 = read_be_at(&data, &mut offset).unwrap();
        let major: u16 = read_be_at(&data, &mut offset).unwrap();

        assert_eq!(magic, 0xCAFE_BABE);
        assert_eq!(minor, 0);
        assert_eq!(major, 52);
        assert_eq!(offset, 8);
    }

    #[test]
    fn test_read_be_out_of_bounds_keeps_offset() {
        let data = [0x01, 0x02, 0x03];
        let mut offset = 1;

        let result = read_be_at::<u32>(&data, &mut offset);
        assert!(matches!(result, Err(OutOfBounds)));
        assert_eq!(offset, 1);
    }

    #[test]
    fn test_signed_and_float_values() {
        let mut out = Vec::new();
        write_be(&mut out, -2_i16);
        write_be(&mut out, 1.5_f32);
        write_be(&mut out, -7_i64);

        let mut offset = 0;
        assert_eq!(read_be_at::<i16>(&out, &mut offset).unwrap(), -2);
        assert_eq!(read_be_at::<f32>(&out, &mut offset).unwrap(), 1.5);
        assert_eq!(read_be_at::<i64>(&out, &mut offset).unwrap(), -7);
        assert_eq!(offset, 14);
    }
}
