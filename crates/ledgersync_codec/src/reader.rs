//! Bounds-checked cursor over untrusted input.

use crate::error::{CodecError, CodecResult};
use bytes::Buf;

/// Reads big-endian fields, turning every short read into
/// [`CodecError::MalformedMessage`] instead of a panic.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &str) -> CodecResult<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::malformed(format!(
                "truncated {what}: need {needed} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, what: &str) -> CodecResult<u8> {
        self.ensure(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self, what: &str) -> CodecResult<u16> {
        self.ensure(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub(crate) fn u32(&mut self, what: &str) -> CodecResult<u32> {
        self.ensure(4, what)?;
        Ok(self.buf.get_u32())
    }

    pub(crate) fn u64(&mut self, what: &str) -> CodecResult<u64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_u64())
    }

    pub(crate) fn i64(&mut self, what: &str) -> CodecResult<i64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn f64(&mut self, what: &str) -> CodecResult<f64> {
        self.ensure(8, what)?;
        Ok(self.buf.get_f64())
    }

    pub(crate) fn bytes(&mut self, len: usize, what: &str) -> CodecResult<&'a [u8]> {
        self.ensure(len, what)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn array<const N: usize>(&mut self, what: &str) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N, what)?);
        Ok(out)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    pub(crate) fn finish(self, what: &str) -> CodecResult<()> {
        if self.buf.has_remaining() {
            return Err(CodecError::malformed(format!(
                "{} trailing bytes after {what}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
