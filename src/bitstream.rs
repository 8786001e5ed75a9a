//! Raw dibit stream side channel.
use std::mem;

use crate::dibit::Dibit;

pub type BitstreamListener = Box<dyn FnMut(Vec<u8>) + Send>;

/// Packs decoded dibits into bytes, most significant dibit first, and hands fixed size
/// buffers to a listener.
///
/// The stream is the one seen by the framer, i.e., with sync patterns rewritten to their
/// canonical value. Without a listener dibits are dropped.
pub struct BitstreamAssembler {
    capacity: usize,
    buffer: Vec<u8>,
    current: u8,
    dibits: u8,
    listener: Option<BitstreamListener>,
}

impl BitstreamAssembler {
    /// Create an assembler producing buffers of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        BitstreamAssembler {
            capacity: capacity.max(1),
            buffer: Vec::new(),
            current: 0,
            dibits: 0,
            listener: None,
        }
    }

    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self.buffer = Vec::with_capacity(self.capacity);
    }

    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn receive(&mut self, dibit: Dibit) {
        if self.listener.is_none() {
            return;
        }
        self.current = (self.current << 2) | dibit.value();
        self.dibits += 1;
        if self.dibits == 4 {
            self.buffer.push(self.current);
            self.current = 0;
            self.dibits = 0;
            if self.buffer.len() >= self.capacity {
                self.flush();
            }
        }
    }

    /// Push buffered whole bytes to the listener. A partially filled byte is kept.
    pub fn flush(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        if !self.buffer.is_empty() {
            listener(mem::replace(
                &mut self.buffer,
                Vec::with_capacity(self.capacity),
            ));
        }
    }
}
