//! Sequential big-endian reader over blob data.
//!
//! Every multi-byte field read from a blob goes through [`Reader`], which
//! converts from the wire's big-endian order to host order. Reads are
//! byte-wise, so no alignment is required of the input slice.

use core::ffi::CStr;

use crate::{FdtError, Token};

pub(crate) const U32_SIZE: usize = 4;

/// Bounds-checked cursor over a byte slice.
///
/// Returned slices and strings borrow from the underlying data, not from
/// the reader, so they stay valid for the blob's lifetime.
#[derive(Clone)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position in bytes from the start of the data.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Reads `size` bytes, advancing the position.
    ///
    /// Returns `None` if insufficient bytes remain.
    pub fn read_bytes(&mut self, size: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(size)?;
        if end > self.data.len() {
            return None;
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Some(out)
    }

    /// Reads a big-endian u32 value.
    pub fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.read_bytes(U32_SIZE)?;
        Some(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a big-endian u64 value (two cells, most significant first).
    pub fn read_u64(&mut self) -> Option<u64> {
        let high = self.read_u32()? as u64;
        let low = self.read_u32()? as u64;
        Some((high << 32) | low)
    }

    /// Reads a token from the structure block.
    pub fn read_token(&mut self) -> Result<Token, FdtError> {
        let pos = self.pos;
        let raw = self.read_u32().ok_or(FdtError::BufferTooSmall { pos })?;
        Ok(raw.into())
    }

    /// Reads a null-terminated string, advancing past the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a str, FdtError> {
        let remain = &self.data[self.pos.min(self.data.len())..];
        let s = CStr::from_bytes_until_nul(remain)?.to_str()?;
        self.pos += s.len() + 1;
        Ok(s)
    }

    /// Skips forward to the next 4-byte boundary.
    ///
    /// The structure block keeps all tokens 32-bit aligned, so
    /// variable-length data (names, payloads) is followed by padding.
    pub fn align4(&mut self) {
        self.pos = (self.pos + U32_SIZE - 1) & !(U32_SIZE - 1);
    }
}
