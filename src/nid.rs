//! Network identifier (NID) decoding.
//!
//! The 64 bit NID follows the sync pattern and carries the 12 bit network access code (NAC)
//! and the 4 bit data unit ID (DUID), protected by BCH(63,16,23) plus a parity bit. On air
//! it occupies 33 dibits because a status dibit is inserted after the 11th.
use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::{
    bch::Bch63_16_23,
    dibit::Dibit,
    framing::FrameType,
    sync::SYNC_DIBITS,
};

/// On-air NID dibits, including the status dibit.
pub const NID_DIBITS: usize = 33;
/// Index of the status dibit within the on-air NID.
pub const NID_STATUS_INDEX: usize = 11;

const NAC_SHIFT: usize = 51;
const NAC_MASK: u64 = 0xfff << NAC_SHIFT;
const DUID_SHIFT: usize = 47;

/// A decoded NID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nid {
    pub nac: u16,
    pub duid: u8,
    /// Bits repaired by error correction.
    pub corrected: u32,
    /// Dibit offset of the NID from its nominal position, -1, 0 or +1.
    pub slip: i8,
}

impl Nid {
    /// The frame type for the DUID, `None` for an unassigned DUID.
    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_duid(self.duid)
    }

    fn from_codeword(word: u64, corrected: u32, slip: i8) -> Self {
        Nid {
            nac: ((word >> NAC_SHIFT) & 0xfff) as u16,
            duid: ((word >> DUID_SHIFT) & 0xf) as u8,
            corrected,
            slip,
        }
    }
}

/// Encode a NID as it is sent on air: 33 dibits with `status` at the status position.
#[must_use]
pub fn encode(nac: u16, duid: u8, status: Dibit) -> Vec<Dibit> {
    let data = ((nac & 0xfff) << 4) | u16::from(duid & 0xf);
    let word = Bch63_16_23::encode(data);
    let parity = u64::from(word.count_ones() % 2);
    let bits = (word << 1) | parity;

    let mut dibits: Vec<Dibit> = (0..32)
        .rev()
        .map(|i| Dibit::from_bits(((bits >> (i * 2)) & 0x3) as u8))
        .collect();
    dibits.insert(NID_STATUS_INDEX, status);
    dibits
}

/// Extract the 63 bit codeword from 33 on-air NID dibits, dropping the status dibit and
/// the trailing parity bit.
fn codeword(nid: &[Dibit]) -> u64 {
    let mut bits = 0u64;
    for (idx, dibit) in nid.iter().take(NID_DIBITS).enumerate() {
        if idx != NID_STATUS_INDEX {
            bits = (bits << 2) | u64::from(dibit.value());
        }
    }
    bits >> 1
}

/// Tracks how often each NAC is decoded to establish which one the monitored system uses.
///
/// Each observation of a NAC counts against all others, so one stray decode cannot displace
/// an established NAC.
#[derive(Debug, Clone)]
pub struct NacTracker {
    counts: BTreeMap<u16, u32>,
    min_observations: u32,
}

impl NacTracker {
    const MAX_COUNT: u32 = 16;

    #[must_use]
    pub fn new(min_observations: u32) -> Self {
        NacTracker {
            counts: BTreeMap::new(),
            min_observations,
        }
    }

    pub fn track(&mut self, nac: u16) {
        self.counts.retain(|other, count| {
            if *other != nac {
                *count -= 1;
            }
            *count > 0
        });
        let count = self.counts.entry(nac).or_default();
        *count = (*count + 1).min(Self::MAX_COUNT);
    }

    /// The established NAC, if any has been seen often enough.
    #[must_use]
    pub fn consensus(&self) -> Option<u16> {
        self.counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .filter(|(_, count)| **count >= self.min_observations)
            .map(|(nac, _)| *nac)
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

/// Decodes and validates the NID following a detected sync.
#[derive(Debug, Clone)]
pub struct NidValidator {
    bch: Bch63_16_23,
    tracker: NacTracker,
}

impl NidValidator {
    /// Dibits of header history needed by [NidValidator::validate]: sync, NID and one dibit
    /// of slip either way.
    pub const HISTORY_DIBITS: usize = SYNC_DIBITS + NID_DIBITS + 1;

    #[must_use]
    pub fn new(nac_observations: u32) -> Self {
        NidValidator {
            bch: Bch63_16_23,
            tracker: NacTracker::new(nac_observations),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &NacTracker {
        &self.tracker
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    /// Validate the NID in `history`, the most recent [NidValidator::HISTORY_DIBITS] dibits
    /// oldest first, beginning with the first sync dibit.
    ///
    /// The nominal position is tried first, then one dibit early and one dibit late. A
    /// decode is only accepted if it agrees with the NAC consensus, when there is one.
    /// Accepted NACs are tracked.
    pub fn validate(&mut self, history: &[Dibit]) -> Option<Nid> {
        if history.len() < Self::HISTORY_DIBITS {
            debug!(len = history.len(), "not enough history to validate nid");
            return None;
        }
        let consensus = self.tracker.consensus();

        for slip in [0i8, -1, 1] {
            let start = SYNC_DIBITS.saturating_add_signed(isize::from(slip));
            let word = codeword(&history[start..start + NID_DIBITS]);
            let Some((corrected_word, corrected)) = self.decode(word, consensus) else {
                trace!(slip, "nid uncorrectable");
                continue;
            };
            let nid = Nid::from_codeword(corrected_word, corrected, slip);
            if consensus.is_some_and(|nac| nac != nid.nac) {
                trace!(slip, nac = nid.nac, ?consensus, "nid disagrees with consensus");
                continue;
            }
            self.tracker.track(nid.nac);
            return Some(nid);
        }
        None
    }

    /// BCH decode. When the plain decode fails, or yields a NAC other than the consensus,
    /// it is retried with the consensus NAC substituted into the NAC field; bits changed by
    /// the substitution count as corrected.
    fn decode(&self, word: u64, consensus: Option<u16>) -> Option<(u64, u32)> {
        let (integrity, corrected) = self.bch.decode(word);
        let plain = integrity.corrected_bits().map(|num| (corrected, num));
        let Some(nac) = consensus else {
            return plain;
        };
        if let Some((corrected, _)) = plain {
            if Nid::from_codeword(corrected, 0, 0).nac == nac {
                return plain;
            }
        }

        let substituted = (word & !NAC_MASK) | (u64::from(nac) << NAC_SHIFT);
        let overwritten = ((word ^ substituted) & NAC_MASK).count_ones();
        let (integrity, corrected) = self.bch.decode(substituted);
        match integrity.corrected_bits() {
            Some(num) => Some((corrected, num + overwritten)),
            None => plain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::sync_dibits;

    fn history(nid: &[Dibit], slip: i8) -> Vec<Dibit> {
        let mut history = sync_dibits();
        if slip > 0 {
            history.push(Dibit::D00Plus1);
        }
        history.extend_from_slice(nid);
        history.resize(NidValidator::HISTORY_DIBITS + 1, Dibit::D10Minus1);
        if slip < 0 {
            history.remove(0);
        }
        history
    }

    fn flip(nid: &mut [Dibit], bit: usize) {
        // bit index over the 64 data bits, skipping the status dibit
        let mut idx = bit / 2;
        if idx >= NID_STATUS_INDEX {
            idx += 1;
        }
        let mask = if bit % 2 == 0 { 0x2 } else { 0x1 };
        nid[idx] = Dibit::from_bits(nid[idx].value() ^ mask);
    }

    #[test]
    fn encode_decode_nominal() {
        let nid = encode(0x293, 0x5, Dibit::D00Plus1);
        assert_eq!(nid.len(), NID_DIBITS);

        let mut validator = NidValidator::new(3);
        let zult = validator.validate(&history(&nid, 0)).unwrap();
        assert_eq!(zult.nac, 0x293);
        assert_eq!(zult.duid, 0x5);
        assert_eq!(zult.frame_type(), Some(FrameType::LogicalLinkDataUnit1));
        assert_eq!(zult.corrected, 0);
        assert_eq!(zult.slip, 0);
    }

    #[test]
    fn corrects_bit_errors() {
        let mut nid = encode(0x293, 0x3, Dibit::D00Plus1);
        flip(&mut nid, 3);
        flip(&mut nid, 40);

        let mut validator = NidValidator::new(3);
        let zult = validator.validate(&history(&nid, 0)).unwrap();
        assert_eq!(zult.nac, 0x293);
        assert_eq!(zult.duid, 0x3);
        assert_eq!(zult.corrected, 2);
    }

    #[test]
    fn parity_bit_and_status_are_ignored() {
        let mut nid = encode(0x293, 0x3, Dibit::D11Minus3);
        flip(&mut nid, 63);

        let zult = NidValidator::new(3).validate(&history(&nid, 0)).unwrap();
        assert_eq!(zult.corrected, 0);
    }

    #[test]
    fn finds_slipped_nid() {
        for slip in [-1i8, 1] {
            // Without a consensus a slipped NID can decode at the nominal position as a
            // different, valid codeword, so establish one first.
            let mut validator = NidValidator::new(3);
            let nominal = history(&encode(0x1a4, 0x3, Dibit::D00Plus1), 0);
            for _ in 0..3 {
                validator.validate(&nominal).unwrap();
            }

            let nid = encode(0x1a4, 0xA, Dibit::D00Plus1);
            let zult = validator.validate(&history(&nid, slip)).unwrap();
            assert_eq!(zult.slip, slip);
            assert_eq!(zult.nac, 0x1a4);
            assert_eq!(zult.frame_type(), Some(FrameType::LogicalLinkDataUnit2));
        }
    }

    #[test]
    fn rejects_nac_disagreeing_with_consensus() {
        let mut validator = NidValidator::new(3);
        let good = history(&encode(0x293, 0x5, Dibit::D00Plus1), 0);
        for _ in 0..4 {
            validator.validate(&good).unwrap();
        }
        assert_eq!(validator.tracker().consensus(), Some(0x293));

        let other = history(&encode(0x111, 0x5, Dibit::D00Plus1), 0);
        assert_eq!(validator.validate(&other), None);
        assert_eq!(validator.tracker().consensus(), Some(0x293));
    }

    #[test]
    fn consensus_nac_repairs_damaged_nac_field() {
        let mut validator = NidValidator::new(3);
        let good = history(&encode(0x293, 0x5, Dibit::D00Plus1), 0);
        for _ in 0..3 {
            validator.validate(&good).unwrap();
        }

        // 12 errors is beyond the code, 9 of them in the NAC field
        let mut nid = encode(0x293, 0x5, Dibit::D00Plus1);
        for bit in [0, 1, 2, 3, 4, 5, 6, 7, 8, 20, 30, 40] {
            flip(&mut nid, bit);
        }
        let zult = validator.validate(&history(&nid, 0)).unwrap();
        assert_eq!(zult.nac, 0x293);
        assert_eq!(zult.corrected, 12);
    }

    #[test]
    fn tracker_needs_observations() {
        let mut tracker = NacTracker::new(3);
        tracker.track(0x293);
        tracker.track(0x293);
        assert_eq!(tracker.consensus(), None);
        tracker.track(0x293);
        assert_eq!(tracker.consensus(), Some(0x293));
        tracker.track(0x293);

        tracker.track(0x111);
        assert_eq!(tracker.consensus(), Some(0x293), "one stray decode is not enough");

        tracker.reset();
        assert_eq!(tracker.consensus(), None);
    }
}
