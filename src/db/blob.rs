//! Conversion between byte buffers and backend large objects.

use crate::error::{CourierError, Result};

/// A fixed-size binary object stored by the backend.
pub trait LargeObject {
    /// Size in bytes.
    fn size(&self) -> usize;

    /// Fill `buf` with bytes starting at `offset`.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Overwrite bytes starting at `offset`. Cannot grow the object.
    fn write_at(&mut self, data: &[u8], offset: usize) -> Result<()>;
}

impl LargeObject for rusqlite::blob::Blob<'_> {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        Ok(self.read_at_exact(buf, offset)?)
    }

    fn write_at(&mut self, data: &[u8], offset: usize) -> Result<()> {
        Ok(rusqlite::blob::Blob::write_at(self, data, offset)?)
    }
}

/// Copy a large object into memory. An empty object is never read.
pub fn blob_to_bytes<B: LargeObject + ?Sized>(blob: &B) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; blob.size()];
    if !bytes.is_empty() {
        blob.read_at(&mut bytes, 0)?;
    }
    Ok(bytes)
}

/// Copy a large object into a string, replacing invalid UTF-8.
pub fn blob_to_string<B: LargeObject + ?Sized>(blob: &B) -> Result<String> {
    let bytes = blob_to_bytes(blob)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `bytes` at the start of a large object. An empty buffer is never
/// written.
pub fn bytes_to_blob<B: LargeObject + ?Sized>(bytes: &[u8], blob: &mut B) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    if bytes.len() > blob.size() {
        return Err(CourierError::Backend(format!(
            "blob holds {} bytes, cannot write {}",
            blob.size(),
            bytes.len()
        )));
    }
    blob.write_at(bytes, 0)
}
