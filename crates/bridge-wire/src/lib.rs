//! Byte-level payload utilities shared by the Fortius USB codec and the
//! ANT+ FE-C page codec.
//!
//! Both wire formats are little-endian with fixed layouts, so this crate
//! offers two complementary views:
//!
//! - offset accessors ([`u16_le_at`] and friends) for decoding frames whose
//!   interesting fields sit at fixed, non-contiguous offsets;
//! - a cursor-style [`PayloadBuilder`] for encoding frames front to back.
//!
//! All integer widths and endianness are part of the protocol contracts;
//! nothing here relies on struct layout.

#![deny(static_mut_refs)]
#![deny(clippy::unwrap_used)]

use thiserror::Error;

/// Error returned when a payload is too short for the requested field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload truncated: need {need} byte(s) at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        need: usize,
        len: usize,
    },
}

/// Convenience result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

fn check(buf: &[u8], offset: usize, need: usize) -> WireResult<()> {
    if offset + need > buf.len() {
        return Err(WireError::Truncated {
            offset,
            need,
            len: buf.len(),
        });
    }
    Ok(())
}

/// Read a single byte at `offset`.
pub fn u8_at(buf: &[u8], offset: usize) -> WireResult<u8> {
    check(buf, offset, 1)?;
    Ok(buf[offset])
}

/// Read a little-endian `u16` at `offset`.
pub fn u16_le_at(buf: &[u8], offset: usize) -> WireResult<u16> {
    check(buf, offset, 2)?;
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

/// Read a little-endian `i16` at `offset`.
pub fn i16_le_at(buf: &[u8], offset: usize) -> WireResult<i16> {
    Ok(u16_le_at(buf, offset)? as i16)
}

/// Read a little-endian `u32` at `offset`.
pub fn u32_le_at(buf: &[u8], offset: usize) -> WireResult<u32> {
    check(buf, offset, 4)?;
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

/// Write a little-endian `u16` at `offset`.
pub fn put_u16_le_at(buf: &mut [u8], offset: usize, value: u16) -> WireResult<()> {
    check(buf, offset, 2)?;
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Write a little-endian `i16` at `offset`.
pub fn put_i16_le_at(buf: &mut [u8], offset: usize, value: i16) -> WireResult<()> {
    put_u16_le_at(buf, offset, value as u16)
}

/// Cursor-style builder for fixed-size outbound frames.
pub struct PayloadBuilder {
    buffer: Vec<u8>,
}

impl PayloadBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.buffer.push(value as u8);
        self
    }

    pub fn write_u16_le(&mut self, value: u16) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i16_le(&mut self, value: i16) -> &mut Self {
        self.write_u16_le(value as u16)
    }

    pub fn write_u32_le(&mut self, value: u32) -> &mut Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_reads() {
        let buf = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(u8_at(&buf, 0).expect("u8"), 0x34);
        assert_eq!(u16_le_at(&buf, 0).expect("u16"), 0x1234);
        assert_eq!(u32_le_at(&buf, 2).expect("u32"), 0x12345678);
    }

    #[test]
    fn test_signed_read() {
        let buf = (-1234i16).to_le_bytes();
        assert_eq!(i16_le_at(&buf, 0).expect("i16"), -1234);
    }

    #[test]
    fn test_truncated_read_is_error() {
        let buf = [0x01, 0x02];
        assert_eq!(
            u32_le_at(&buf, 0),
            Err(WireError::Truncated {
                offset: 0,
                need: 4,
                len: 2
            })
        );
        assert!(u8_at(&buf, 2).is_err());
    }

    #[test]
    fn test_offset_writes() {
        let mut buf = [0u8; 4];
        put_u16_le_at(&mut buf, 1, 0xBEEF).expect("in range");
        assert_eq!(buf, [0x00, 0xEF, 0xBE, 0x00]);
        assert!(put_u16_le_at(&mut buf, 3, 0).is_err());
    }

    #[test]
    fn test_builder() {
        let mut builder = PayloadBuilder::with_capacity(9);
        builder
            .write_u8(0x01)
            .write_u16_le(0x1234)
            .write_u32_le(0x12345678)
            .write_bytes(&[0xAA, 0xBB]);
        assert_eq!(
            builder.into_inner(),
            vec![0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xAA, 0xBB]
        );
    }
}
