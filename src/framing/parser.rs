use crate::bits::CorrectedBits;

use super::FrameType;

/// What the framer needs to know about a decoded trunking signaling block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingBlock {
    /// Set on the last block of a signaling frame.
    pub last_block: bool,
}

/// What the framer needs to know about a decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Number of packet data blocks that follow the header.
    pub blocks_to_follow: usize,
    /// Confirmed packets carry a CRC per block.
    pub confirmed: bool,
}

/// Payload decoding collaborator.
///
/// The framer only finds frame boundaries; deciding whether a buffer holds a valid payload,
/// and reading the few fields that change framing (block counts, last-block flags), is left
/// to an implementation of this trait. A rejected buffer is reported as sync loss.
pub trait PayloadParser: Send {
    /// Check a fixed length frame.
    fn validate(&mut self, frame_type: FrameType, bits: &CorrectedBits) -> bool;

    /// Decode a trunking signaling block, `None` if it cannot be decoded.
    fn signaling_block(&mut self, bits: &CorrectedBits) -> Option<SignalingBlock>;

    /// Decode a packet data header, `None` if it cannot be decoded.
    fn packet_header(&mut self, bits: &CorrectedBits) -> Option<PacketHeader>;

    /// Check a packet data block.
    fn packet_block(&mut self, bits: &CorrectedBits, confirmed: bool) -> bool;
}

/// Accepts everything without looking at it.
///
/// Every signaling block is treated as the last block and every packet header as a header
/// with no data blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unparsed;

impl PayloadParser for Unparsed {
    fn validate(&mut self, _frame_type: FrameType, _bits: &CorrectedBits) -> bool {
        true
    }

    fn signaling_block(&mut self, _bits: &CorrectedBits) -> Option<SignalingBlock> {
        Some(SignalingBlock { last_block: true })
    }

    fn packet_header(&mut self, _bits: &CorrectedBits) -> Option<PacketHeader> {
        Some(PacketHeader {
            blocks_to_follow: 0,
            confirmed: false,
        })
    }

    fn packet_block(&mut self, _bits: &CorrectedBits, _confirmed: bool) -> bool {
        true
    }
}
