use std::{
    panic,
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, span, Level};

use crate::{
    bitstream::BitstreamAssembler,
    config::Config,
    dibit::Dibit,
    framing::{FramerDispatcher, FramingStats, Message, PayloadParser},
    nid::Nid,
    timing::{DibitSink, TimingRecovery},
    Result,
};

/// Everything downstream of timing recovery.
struct Outputs {
    framer: FramerDispatcher,
    bitstream: BitstreamAssembler,
}

impl DibitSink for Outputs {
    fn receive(&mut self, dibit: Dibit) {
        self.bitstream.receive(dibit);
        self.framer.receive(dibit);
    }

    fn sync_detected(&mut self, nid: &Nid) {
        self.framer.sync_detected(nid);
    }

    fn sync_detected_uncertain(&mut self, nac: u16) {
        self.framer.sync_detected_uncertain(nac);
    }
}

/// Decodes demodulated P25 Phase 1 phase samples into framed [Message]s.
///
/// Samples are pushed with [Decoder::receive] and messages are pushed to the listener as
/// they complete. Alternatively, [Decoder::decode] runs the decoder in a background thread
/// and returns the messages as an iterator.
///
/// # Examples
/// ```no_run
/// use p25::{Config, Decoder};
///
/// let config = Config::builder().samples_per_symbol(10.0).build();
/// let chunks: Vec<Vec<f32>> = vec![vec![0.0; 4800]];
/// let messages = Decoder::new(config)
///     .unwrap()
///     .decode(chunks.into_iter())
///     .unwrap();
/// for message in messages {
///     println!("{message:?}");
/// }
/// ```
pub struct Decoder {
    timing: TimingRecovery,
    outputs: Outputs,
}

impl Decoder {
    const DEFAULT_BUFFER_SIZE: usize = 1024;

    /// # Errors
    /// Any [Config::validate] error.
    pub fn new(config: Config) -> Result<Self> {
        let timing = TimingRecovery::new(&config)?;
        Ok(Decoder {
            timing,
            outputs: Outputs {
                framer: FramerDispatcher::new(config.reclassification),
                bitstream: BitstreamAssembler::new(config.bitstream_buffer_bytes),
            },
        })
    }

    /// Use `parser` to validate frame payloads and size multi-block frames.
    #[must_use]
    pub fn with_parser(mut self, parser: Box<dyn PayloadParser>) -> Self {
        self.outputs.framer.set_parser(parser);
        self
    }

    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.outputs.framer.set_listener(listener);
    }

    /// Receive the decoded dibit stream packed into byte buffers.
    pub fn set_bitstream_listener<F>(&mut self, listener: F)
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        self.outputs.bitstream.set_listener(listener);
    }

    /// # Errors
    /// [crate::Error::InvalidSamplesPerSymbol] if `sps` is unusable, in which case the
    /// decoder is unchanged.
    pub fn set_samples_per_symbol(&mut self, sps: f32) -> Result<()> {
        self.timing.set_samples_per_symbol(sps)
    }

    /// Set the time of the next decoded dibit.
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.outputs.framer.set_timestamp(timestamp);
    }

    pub fn receive(&mut self, samples: &[f32]) {
        self.timing.receive(samples, &mut self.outputs);
    }

    /// Push any buffered bitstream bytes to the bitstream listener.
    pub fn flush(&mut self) {
        self.outputs.bitstream.flush();
    }

    #[must_use]
    pub fn stats(&self) -> &FramingStats {
        self.outputs.framer.stats()
    }

    /// Bits received but not yet reported in [Decoder::stats].
    #[must_use]
    pub fn pending_bits(&self) -> usize {
        self.outputs.framer.pending_bits()
    }

    /// True while symbol timing is locked to a recently decoded sync.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.timing.is_locked()
    }

    /// The network access code of the monitored system, once it has been seen enough times.
    #[must_use]
    pub fn nac(&self) -> Option<u16> {
        self.timing.nac()
    }

    /// Current samples per symbol estimate, adjusted from the nominal value while locked.
    #[must_use]
    pub fn samples_per_symbol(&self) -> f32 {
        self.timing.samples_per_symbol()
    }

    /// Forget the tracked network access code.
    pub fn reset_nac(&mut self) {
        self.timing.reset_nac();
    }

    /// Returns an iterator of the messages decoded from `chunks` of samples.
    ///
    /// Decoding is done in a background thread. Any listener set with
    /// [Decoder::set_listener] is replaced; a bitstream listener is kept and flushed once
    /// `chunks` is exhausted.
    ///
    /// # Errors
    /// [crate::Error::Io] if the decode thread cannot be started.
    pub fn decode<C>(mut self, chunks: C) -> Result<impl Iterator<Item = Message>>
    where
        C: Iterator<Item = Vec<f32>> + Send + 'static,
    {
        let (tx, rx) = bounded(Self::DEFAULT_BUFFER_SIZE);

        let handle = thread::Builder::new()
            .name("p25_decoder".into())
            .spawn(move || {
                self.set_listener(move |message| {
                    if let Err(err) = tx.send(message) {
                        debug!("failed to send message: {err}");
                    }
                });
                for (idx, chunk) in chunks.enumerate() {
                    let span = span!(Level::TRACE, "chunk", idx, samples = chunk.len());
                    let _guard = span.enter();
                    self.receive(&chunk);
                }
                self.flush();
                debug!(stats = ?self.stats(), "decode finished");
            })?;

        Ok(MessageIter {
            messages: rx,
            handle: Some(handle),
        })
    }
}

/// Messages from a [Decoder] running in a background thread.
struct MessageIter {
    messages: Receiver<Message>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for MessageIter {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        match self.messages.recv() {
            Ok(message) => Some(message),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if let Err(err) = handle.join() {
                        panic::resume_unwind(err);
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_config() {
        let config = Config::builder().samples_per_symbol(0.5).build();
        assert!(Decoder::new(config).is_err());
    }

    #[test]
    fn silence_is_idle() {
        let mut decoder = Decoder::new(Config::default()).unwrap();
        decoder.receive(&vec![0.0; 48_000]);
        assert!(!decoder.is_locked());
        assert_eq!(decoder.nac(), None);
        assert!(decoder.stats().dibits > 4000);
        assert_eq!(decoder.stats().frames, 0);
    }

    #[test]
    fn bad_samples_per_symbol_keeps_decoder() {
        let mut decoder = Decoder::new(Config::default()).unwrap();
        assert!(decoder.set_samples_per_symbol(f32::INFINITY).is_err());
        assert_eq!(decoder.samples_per_symbol(), 10.0);
    }
}
