//! P25 Phase 1 message framing.
//!
//! Frames are identified by the data unit ID (DUID) carried in the network identifier that
//! follows each sync pattern. The DUID fixes the frame length, so frames are assembled by
//! counting dibits after sync, dropping the status dibit interleaved every 36 dibits.
mod assembler;
mod dispatcher;
mod parser;

pub use assembler::*;
pub use dispatcher::*;
pub use parser::*;

use std::fmt::Display;

use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bits::CorrectedBits;

/// Symbols per second.
pub const SYMBOL_RATE: u32 = 4800;
/// Dibits of sync plus network identifier, including the NID status dibit.
pub const HEADER_DIBITS: usize = 57;
/// A status dibit is sent after every 35 data dibits.
pub const STATUS_INTERVAL: usize = 36;

/// Returns true if the frame relative dibit `position` carries a status symbol.
#[must_use]
pub fn is_status_position(position: usize) -> bool {
    position % STATUS_INTERVAL == STATUS_INTERVAL - 1
}

/// Frame classes, keyed by DUID.
///
/// Lengths are data bits only, excluding sync, NID and interleaved status dibits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameType {
    HeaderDataUnit,
    TerminatorDataUnit,
    LogicalLinkDataUnit1,
    TrunkingSignalingBlock1,
    TrunkingSignalingBlock2,
    TrunkingSignalingBlock3,
    LogicalLinkDataUnit2,
    PacketHeaderDataUnit,
    PacketDataUnit1,
    PacketDataUnit2,
    PacketDataUnit3,
    PacketDataUnit4,
    PacketDataUnit5,
    TerminatorDataUnitLinkControl,
    /// Stand-in for a frame whose NID could not be decoded. Sized to hold the longest frame
    /// and reclassified by length once the frame is closed.
    Placeholder,
}

/// Bits in a trellis coded block (signaling and packet data blocks).
const BLOCK_BITS: usize = 196;
const LDU_BITS: usize = 1568;

impl FrameType {
    /// Data bits in the longest frame type.
    pub const LONGEST_BITS: usize = LDU_BITS;
    /// Most packet data blocks a single packet header may announce.
    pub const MAX_PACKET_BLOCKS: usize = 5;

    /// Look up the frame type for a 4-bit DUID. Unassigned codes are `None`.
    #[must_use]
    pub fn from_duid(duid: u8) -> Option<Self> {
        match duid {
            0x0 => Some(FrameType::HeaderDataUnit),
            0x3 => Some(FrameType::TerminatorDataUnit),
            0x5 => Some(FrameType::LogicalLinkDataUnit1),
            0x7 => Some(FrameType::TrunkingSignalingBlock1),
            0xA => Some(FrameType::LogicalLinkDataUnit2),
            0xC => Some(FrameType::PacketHeaderDataUnit),
            0xF => Some(FrameType::TerminatorDataUnitLinkControl),
            _ => None,
        }
    }

    /// DUID carried in the NID for this type. Continuation blocks and the placeholder have
    /// none of their own.
    #[must_use]
    pub fn duid(self) -> Option<u8> {
        match self {
            FrameType::HeaderDataUnit => Some(0x0),
            FrameType::TerminatorDataUnit => Some(0x3),
            FrameType::LogicalLinkDataUnit1 => Some(0x5),
            FrameType::TrunkingSignalingBlock1 => Some(0x7),
            FrameType::LogicalLinkDataUnit2 => Some(0xA),
            FrameType::PacketHeaderDataUnit => Some(0xC),
            FrameType::TerminatorDataUnitLinkControl => Some(0xF),
            _ => None,
        }
    }

    /// Data bits in the frame.
    #[must_use]
    pub fn bits(self) -> usize {
        match self {
            FrameType::HeaderDataUnit => 658,
            FrameType::TerminatorDataUnit => 28,
            FrameType::LogicalLinkDataUnit1
            | FrameType::LogicalLinkDataUnit2
            | FrameType::Placeholder => LDU_BITS,
            FrameType::TerminatorDataUnitLinkControl => 288,
            FrameType::TrunkingSignalingBlock1
            | FrameType::TrunkingSignalingBlock2
            | FrameType::TrunkingSignalingBlock3
            | FrameType::PacketHeaderDataUnit
            | FrameType::PacketDataUnit1
            | FrameType::PacketDataUnit2
            | FrameType::PacketDataUnit3
            | FrameType::PacketDataUnit4
            | FrameType::PacketDataUnit5 => BLOCK_BITS,
        }
    }

    /// True when the status dibit following the last data dibit is kept as part of the
    /// frame.
    #[must_use]
    pub fn has_trailing_status(self) -> bool {
        matches!(
            self,
            FrameType::HeaderDataUnit
                | FrameType::TerminatorDataUnit
                | FrameType::LogicalLinkDataUnit1
                | FrameType::LogicalLinkDataUnit2
                | FrameType::Placeholder
        )
    }

    /// Assembly buffer size in bits.
    #[must_use]
    pub fn capacity(self) -> usize {
        if self.has_trailing_status() {
            self.bits() + 2
        } else {
            self.bits()
        }
    }

    /// Dibits of padding expected after the final block of this type.
    ///
    /// Packet data blocks depend on how many blocks were sent, see
    /// [FrameType::packet_suppression].
    #[must_use]
    pub fn trailing_suppression(self) -> usize {
        match self {
            FrameType::TrunkingSignalingBlock1
            | FrameType::TrunkingSignalingBlock2
            | FrameType::TrunkingSignalingBlock3 => 1,
            FrameType::PacketHeaderDataUnit => 22,
            FrameType::TerminatorDataUnitLinkControl => 11,
            _ => 0,
        }
    }

    /// Padding dibits following the last of `blocks` packet data blocks.
    #[must_use]
    pub fn packet_suppression(blocks: usize) -> Option<usize> {
        match blocks {
            1 => Some(29),
            2 => Some(1),
            3 => Some(8),
            4 => Some(15),
            5 => Some(22),
            _ => None,
        }
    }

    /// The 1-based packet data block type.
    #[must_use]
    pub fn packet_block(number: usize) -> Option<Self> {
        match number {
            1 => Some(FrameType::PacketDataUnit1),
            2 => Some(FrameType::PacketDataUnit2),
            3 => Some(FrameType::PacketDataUnit3),
            4 => Some(FrameType::PacketDataUnit4),
            5 => Some(FrameType::PacketDataUnit5),
            _ => None,
        }
    }

    /// The block following this signaling block, if there can be one.
    #[must_use]
    pub fn next_signaling_block(self) -> Option<Self> {
        match self {
            FrameType::TrunkingSignalingBlock1 => Some(FrameType::TrunkingSignalingBlock2),
            FrameType::TrunkingSignalingBlock2 => Some(FrameType::TrunkingSignalingBlock3),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_signaling_block(self) -> bool {
        matches!(
            self,
            FrameType::TrunkingSignalingBlock1
                | FrameType::TrunkingSignalingBlock2
                | FrameType::TrunkingSignalingBlock3
        )
    }

    /// The 1-based block number for packet data blocks.
    #[must_use]
    pub fn packet_block_number(self) -> Option<usize> {
        match self {
            FrameType::PacketDataUnit1 => Some(1),
            FrameType::PacketDataUnit2 => Some(2),
            FrameType::PacketDataUnit3 => Some(3),
            FrameType::PacketDataUnit4 => Some(4),
            FrameType::PacketDataUnit5 => Some(5),
            _ => None,
        }
    }

    /// Short protocol label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            FrameType::HeaderDataUnit => "HDU",
            FrameType::TerminatorDataUnit => "TDU",
            FrameType::LogicalLinkDataUnit1 => "LDU1",
            FrameType::TrunkingSignalingBlock1 => "TSBK1",
            FrameType::TrunkingSignalingBlock2 => "TSBK2",
            FrameType::TrunkingSignalingBlock3 => "TSBK3",
            FrameType::LogicalLinkDataUnit2 => "LDU2",
            FrameType::PacketHeaderDataUnit => "PDU",
            FrameType::PacketDataUnit1 => "PDU1",
            FrameType::PacketDataUnit2 => "PDU2",
            FrameType::PacketDataUnit3 => "PDU3",
            FrameType::PacketDataUnit4 => "PDU4",
            FrameType::PacketDataUnit5 => "PDU5",
            FrameType::TerminatorDataUnitLinkControl => "TDULC",
            FrameType::Placeholder => "PLACEHOLDER",
        }
    }
}

impl Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// An assembled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedMessage {
    pub frame_type: FrameType,
    /// Network access code from the frame's NID, or the tracked NAC when the NID could not
    /// be decoded.
    pub nac: u16,
    /// Frame data bits. The corrected count is the number of NID bits repaired.
    pub bits: CorrectedBits,
    pub timestamp: DateTime<Utc>,
}

/// Output of the framer.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Frame(FramedMessage),
    /// Bits received that did not end up in any frame.
    SyncLoss {
        bits: usize,
        timestamp: DateTime<Utc>,
    },
}

impl Message {
    /// Sync loss reports shorter than this are padding between frames.
    pub const STUFFING_BITS: usize = 64;

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Frame(frame) => frame.timestamp,
            Message::SyncLoss { timestamp, .. } => *timestamp,
        }
    }

    /// True for a sync loss report small enough to be inter-frame padding.
    #[must_use]
    pub fn is_stuffing(&self) -> bool {
        matches!(self, Message::SyncLoss { bits, .. } if *bits < Self::STUFFING_BITS)
    }

    #[must_use]
    pub fn frame(&self) -> Option<&FramedMessage> {
        match self {
            Message::Frame(frame) => Some(frame),
            Message::SyncLoss { .. } => None,
        }
    }
}
