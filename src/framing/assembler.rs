use std::mem;

use tracing::debug;

use crate::{bits::CorrectedBits, config::Reclassification, dibit::Dibit};

use super::FrameType;

/// Collects the data dibits of a single frame into a buffer sized for its [FrameType].
///
/// Status dibits are removed by the caller; the assembler only counts bits.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    nac: u16,
    frame_type: FrameType,
    bits: CorrectedBits,
}

impl FrameAssembler {
    /// Start a frame, `corrected` being the number of bits repaired in its NID.
    #[must_use]
    pub fn new(nac: u16, frame_type: FrameType, corrected: u32) -> Self {
        let mut bits = CorrectedBits::with_capacity(frame_type.capacity());
        bits.set_corrected(corrected);
        FrameAssembler {
            nac,
            frame_type,
            bits,
        }
    }

    #[must_use]
    pub fn nac(&self) -> u16 {
        self.nac
    }

    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    #[must_use]
    pub fn bits(&self) -> &CorrectedBits {
        &self.bits
    }

    /// Append a dibit. Returns false if the buffer is already full, in which case the dibit
    /// is discarded.
    pub fn receive(&mut self, dibit: Dibit) -> bool {
        self.bits.push_dibit(dibit)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bits.is_full()
    }

    /// Bits still needed to complete the frame.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bits.remaining()
    }

    /// True once at least the data bits of the frame type have been collected; only the
    /// trailing status may be missing.
    #[must_use]
    pub fn is_constructible(&self) -> bool {
        self.bits.len() >= self.frame_type.bits()
    }

    /// Switch to the next block of a multi-block frame, returning the finished block's bits.
    pub fn reconfigure(&mut self, frame_type: FrameType) -> CorrectedBits {
        self.frame_type = frame_type;
        mem::replace(
            &mut self.bits,
            CorrectedBits::with_capacity(frame_type.capacity()),
        )
    }

    /// Append the trailing status dibit to a frame holding exactly its data bits.
    ///
    /// A placeholder cannot tell the trailing status of its eventual frame type from an
    /// interleaved status dibit, so it is put back once the frame type is known.
    pub fn restore_trailing_status(&mut self, dibit: Dibit) -> bool {
        self.frame_type.has_trailing_status()
            && self.bits.len() == self.frame_type.bits()
            && self.bits.push_dibit(dibit)
    }

    #[must_use]
    pub fn into_bits(self) -> CorrectedBits {
        self.bits
    }

    /// Close a frame before it filled, because the next sync arrived.
    ///
    /// A placeholder is first reclassified from how many bits it collected and which frame
    /// types surround it. The buffer is then cut to the frame type's capacity and the number
    /// of bits cut is returned.
    pub fn force_completion(
        &mut self,
        previous: FrameType,
        next: FrameType,
        thresholds: &Reclassification,
    ) -> usize {
        if self.frame_type == FrameType::Placeholder {
            let frame_type = reclassify(self.bits.len(), previous, next, thresholds);
            debug!(
                bits = self.bits.len(),
                %previous,
                %next,
                %frame_type,
                "reclassified placeholder"
            );
            self.frame_type = frame_type;
        }
        self.bits.resize(self.frame_type.capacity())
    }
}

/// Pick a frame type for a placeholder holding `len` bits.
fn reclassify(
    len: usize,
    previous: FrameType,
    next: FrameType,
    thresholds: &Reclassification,
) -> FrameType {
    let long = len >= thresholds.ldu_min_bits;
    match next {
        FrameType::LogicalLinkDataUnit1 if len <= thresholds.hdu_max_bits => {
            return FrameType::HeaderDataUnit;
        }
        FrameType::LogicalLinkDataUnit1 if long => return FrameType::LogicalLinkDataUnit2,
        FrameType::LogicalLinkDataUnit2 if long => return FrameType::LogicalLinkDataUnit1,
        _ => {}
    }
    match previous {
        FrameType::LogicalLinkDataUnit1 if long => FrameType::LogicalLinkDataUnit2,
        FrameType::LogicalLinkDataUnit2 if long => FrameType::LogicalLinkDataUnit1,
        _ => FrameType::TerminatorDataUnit,
    }
}
