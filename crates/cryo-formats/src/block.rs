//! Output buffer with a shift cursor
//!
//! Decompressors write block after block into one preallocated buffer. The
//! cursor (the "shift") marks where the next write lands, so partial appends
//! never reallocate and the finished buffer is handed out without copying.

use thiserror::Error;

/// A write past the end of a fixed-size [`ShiftBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer overflow: {requested} bytes requested, {available} available")]
pub struct BufferOverflow {
    /// Bytes the caller tried to write or skip
    pub requested: usize,
    /// Bytes left between the cursor and the end of the buffer
    pub available: usize,
}

/// Byte buffer with a movable write cursor
///
/// A fixed buffer rejects writes beyond its length; a growable buffer extends
/// itself with zeroes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShiftBuffer {
    data: Vec<u8>,
    shift: usize,
    growable: bool,
}

impl ShiftBuffer {
    /// Create a zeroed fixed-size buffer
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
            shift: 0,
            growable: false,
        }
    }

    /// Create an empty buffer that grows on demand
    pub fn growable() -> Self {
        Self {
            data: Vec::new(),
            shift: 0,
            growable: true,
        }
    }

    /// Wrap existing bytes as a fixed buffer with the cursor at the start
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            shift: 0,
            growable: false,
        }
    }

    /// Total length of the buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has zero length
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position
    pub fn shift_amount(&self) -> usize {
        self.shift
    }

    /// Bytes between the cursor and the end
    pub fn remaining(&self) -> usize {
        self.data.len() - self.shift
    }

    fn ensure(&mut self, count: usize) -> Result<(), BufferOverflow> {
        let available = self.remaining();
        if count <= available {
            return Ok(());
        }
        if self.growable {
            self.data.resize(self.shift + count, 0);
            Ok(())
        } else {
            Err(BufferOverflow {
                requested: count,
                available,
            })
        }
    }

    /// Advance the cursor by `count` bytes
    pub fn shift(&mut self, count: usize) -> Result<(), BufferOverflow> {
        self.ensure(count)?;
        self.shift += count;
        Ok(())
    }

    /// Move the cursor back to the start
    pub fn reset_shift(&mut self) {
        self.shift = 0;
    }

    /// Mutable window of `count` bytes at the cursor, without advancing
    pub fn window_mut(&mut self, count: usize) -> Result<&mut [u8], BufferOverflow> {
        self.ensure(count)?;
        Ok(&mut self.data[self.shift..self.shift + count])
    }

    /// Bytes from the cursor to the end
    pub fn tail(&self) -> &[u8] {
        &self.data[self.shift..]
    }

    /// Copy `bytes` at the cursor and advance past them
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferOverflow> {
        self.window_mut(bytes.len())?.copy_from_slice(bytes);
        self.shift += bytes.len();
        Ok(())
    }

    /// Copy `count` bytes from this buffer's cursor into `out`, advancing both
    pub fn transfer(&mut self, out: &mut Self, count: usize) -> Result<(), BufferOverflow> {
        let available = self.remaining();
        if count > available {
            return Err(BufferOverflow {
                requested: count,
                available,
            });
        }
        out.append(&self.data[self.shift..self.shift + count])?;
        self.shift += count;
        Ok(())
    }

    /// Drop everything past the cursor
    pub fn crop(&mut self) {
        self.data.truncate(self.shift);
    }

    /// Whole buffer as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning its bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for ShiftBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
