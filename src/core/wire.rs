//! Little-endian field primitives shared by every message encoding.
//!
//! Strings are a `u32` byte length followed by UTF-8 bytes. Vectors are three
//! consecutive `f32`s. The reader never panics: every read checks the
//! remaining length first and reports [`ProtocolError::Malformed`].

use bytes::{Buf, BufMut, BytesMut};
use glam::Vec3;

use crate::error::{constants, ProtocolError, Result};

/// Append-only payload builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(tag: u8) -> Self {
        let mut writer = Self {
            buf: BytesMut::with_capacity(64),
        };
        writer.put_u8(tag);
        writer
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(u8::from(value))
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32_le(value);
        self
    }

    pub fn put_vec3(&mut self, value: Vec3) -> &mut Self {
        self.put_f32(value.x).put_f32(value.y).put_f32(value.z)
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.buf.put_u32_le(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Bounds-checked cursor over a decrypted payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            Err(ProtocolError::Malformed(constants::ERR_TRUNCATED))
        } else {
            Ok(())
        }
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        let value = std::str::from_utf8(head)
            .map_err(|_| ProtocolError::Malformed(constants::ERR_BAD_UTF8))?
            .to_owned();
        self.buf = tail;
        Ok(value)
    }

    /// Fails when unread bytes remain.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            Err(ProtocolError::Malformed(constants::ERR_TRAILING_BYTES))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian() {
        let mut w = WireWriter::with_tag(7);
        w.put_u32(0x0102_0304).put_str("ab");
        assert_eq!(w.into_vec(), vec![7, 4, 3, 2, 1, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_reader_reports_truncation() {
        let mut r = WireReader::new(&[5, 0, 0, 0, b'a']);
        assert!(matches!(r.string(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_reader_rejects_bad_utf8() {
        let mut r = WireReader::new(&[2, 0, 0, 0, 0xFF, 0xFE]);
        assert!(matches!(r.string(), Err(ProtocolError::Malformed(m)) if m == constants::ERR_BAD_UTF8));
    }

    #[test]
    fn test_finish_rejects_trailing_bytes() {
        let mut r = WireReader::new(&[1, 2]);
        r.u8().unwrap();
        assert!(r.finish().is_err());
    }

    #[test]
    fn test_vec3_order() {
        let mut w = WireWriter::new();
        w.put_vec3(Vec3::new(1.0, 2.0, 3.0));
        let bytes = w.into_vec();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.vec3().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        r.finish().unwrap();
    }
}
