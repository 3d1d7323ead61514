//! Binary helpers shared by the WAL, segment, manifest and backup formats.

use crate::error::{CoreError, CoreResult};
use crate::types::Partition;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// IEEE CRC-32.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0u32, |crc, &b| {
        CRC32_TABLE[((crc ^ u32::from(b)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

/// Cursor over a byte slice. Every short read is reported as corruption of
/// `context`.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], context: &'static str) -> Self {
        Self {
            bytes,
            pos: 0,
            context,
        }
    }

    pub(crate) fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CoreError::corrupted(format!("{}: unexpected end of data", self.context)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a `u32` length followed by that many bytes.
    pub(crate) fn prefixed(&mut self) -> CoreResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }

    /// Fails if unread bytes remain.
    pub(crate) fn finish(self) -> CoreResult<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(CoreError::corrupted(format!(
                "{}: {} trailing bytes",
                self.context,
                self.bytes.len() - self.pos
            )))
        }
    }
}

pub(crate) fn put_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Encodes `partition | key_len | key | value_len | value`.
pub(crate) fn encode_entry(partition: Partition, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + key.len() + value.len());
    buf.push(partition.as_byte());
    put_prefixed(&mut buf, key);
    put_prefixed(&mut buf, value);
    buf
}

/// Inverse of [`encode_entry`].
pub(crate) fn decode_entry(
    bytes: &[u8],
    context: &'static str,
) -> CoreResult<(Partition, Vec<u8>, Vec<u8>)> {
    let mut r = ByteReader::new(bytes, context);
    let tag = r.u8()?;
    let partition = Partition::from_byte(tag)
        .ok_or_else(|| CoreError::corrupted(format!("{context}: unknown partition {tag}")))?;
    let key = r.prefixed()?.to_vec();
    let value = r.prefixed()?.to_vec();
    r.finish()?;
    Ok((partition, key, value))
}
