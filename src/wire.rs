use thiserror::Error;

/// Errors raised while decoding a kernel event. Per-event: the event is
/// logged and dropped, never fatal to the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated event: {0}")]
    Truncated(&'static str),

    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("snapshot declares {declared} bytes but only {remaining} remain")]
    SnapshotOverrun { declared: usize, remaining: usize },

    #[error("unexpected IOAM option type {0}, expected direct export (4)")]
    NotDirectExport(u8),

    #[error("invalid node length {0}")]
    InvalidNodeLength(u8),
}

pub const MASK_24: u32 = 0x00FF_FFFF;
pub const MASK_56: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// Checked big-endian reader over a borrowed buffer. Every read consumes
/// exactly its width; running past the end is a `Truncated` error, so a
/// malformed chunk can never yield a partial record.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(DecodeError::Truncated("node data"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u16_be(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32_be(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64_be(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn prefix<const N: usize>(data: &[u8], what: &'static str) -> Result<[u8; N], DecodeError> {
    data.get(..N)
        .and_then(|p| p.try_into().ok())
        .ok_or(DecodeError::Truncated(what))
}

pub fn read_u16_le(data: &[u8], what: &'static str) -> Result<u16, DecodeError> {
    Ok(u16::from_le_bytes(prefix(data, what)?))
}

pub fn read_u32_le(data: &[u8], what: &'static str) -> Result<u32, DecodeError> {
    Ok(u32::from_le_bytes(prefix(data, what)?))
}

pub fn read_u32_be(data: &[u8], what: &'static str) -> Result<u32, DecodeError> {
    Ok(u32::from_be_bytes(prefix(data, what)?))
}

pub fn read_u64_be(data: &[u8], what: &'static str) -> Result<u64, DecodeError> {
    Ok(u64::from_be_bytes(prefix(data, what)?))
}

pub fn read_u16_ne(data: &[u8], what: &'static str) -> Result<u16, DecodeError> {
    Ok(u16::from_ne_bytes(prefix(data, what)?))
}

pub fn read_u32_ne(data: &[u8], what: &'static str) -> Result<u32, DecodeError> {
    Ok(u32::from_ne_bytes(prefix(data, what)?))
}
