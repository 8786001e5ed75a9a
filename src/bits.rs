use std::fmt::Display;

use crate::dibit::Dibit;

/// Fixed capacity bit buffer with a fill pointer and a count of bits corrected by error
/// correction while building it.
///
/// Bits are stored packed, most significant bit first, so [CorrectedBits::as_bytes] gives
/// the on-air byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedBits {
    data: Vec<u8>,
    capacity: usize,
    len: usize,
    corrected: u32,
}

impl CorrectedBits {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        CorrectedBits {
            data: vec![0u8; capacity.div_ceil(8)],
            capacity,
            len: 0,
            corrected: 0,
        }
    }

    /// Maximum number of bits this buffer holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bits written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Bits of capacity not yet written.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    #[must_use]
    pub fn corrected(&self) -> u32 {
        self.corrected
    }

    pub fn set_corrected(&mut self, corrected: u32) {
        self.corrected = corrected;
    }

    /// Append a bit. Returns false, leaving the buffer untouched, if it is full.
    pub fn push(&mut self, bit: bool) -> bool {
        if self.is_full() {
            return false;
        }
        if bit {
            self.data[self.len / 8] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
        true
    }

    /// Append both bits of `dibit`. Returns false if there is not room for both.
    pub fn push_dibit(&mut self, dibit: Dibit) -> bool {
        if self.remaining() < 2 {
            return false;
        }
        self.push(dibit.bit1());
        self.push(dibit.bit2());
        true
    }

    /// The bit at `idx`, or `None` if it has not been written.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<bool> {
        if idx >= self.len {
            return None;
        }
        Some(self.data[idx / 8] & (0x80 >> (idx % 8)) != 0)
    }

    /// Read up to 64 written bits starting at `start` as an integer, first bit most
    /// significant. Returns `None` if the range is not fully written.
    #[must_use]
    pub fn get_u64(&self, start: usize, num_bits: usize) -> Option<u64> {
        if num_bits > 64 || start + num_bits > self.len {
            return None;
        }
        let mut zult = 0u64;
        for idx in start..start + num_bits {
            zult = (zult << 1) | u64::from(self.get(idx)?);
        }
        Some(zult)
    }

    /// Change the capacity, keeping already written bits. Bits beyond the new capacity are
    /// dropped and their count returned.
    pub fn resize(&mut self, capacity: usize) -> usize {
        let dropped = self.len.saturating_sub(capacity);
        if dropped > 0 {
            self.len = capacity;
            // clear the dropped bits so a later push starts from zeros
            for idx in capacity..capacity + dropped {
                self.data[idx / 8] &= !(0x80 >> (idx % 8));
            }
        }
        self.capacity = capacity;
        self.data.resize(capacity.div_ceil(8), 0);
        dropped
    }

    /// Packed bytes; a partially written last byte is zero padded.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len.div_ceil(8)]
    }
}

impl Display for CorrectedBits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for idx in 0..self.len {
            let bit = self.data[idx / 8] & (0x80 >> (idx % 8)) != 0;
            write!(f, "{}", u8::from(bit))?;
        }
        Ok(())
    }
}
