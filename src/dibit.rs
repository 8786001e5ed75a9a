//! Symbol level primitives.
//!
//! P25 Phase 1 C4FM/CQPSK carries one dibit per symbol. After FM or differential
//! demodulation each symbol is a phase in radians sitting near one of four ideal points.
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

/// Ideal phase for the outer (±3) symbols.
pub const OUTER_PHASE: f32 = 3.0 * FRAC_PI_4;
/// Ideal phase for the inner (±1) symbols.
pub const INNER_PHASE: f32 = FRAC_PI_4;

/// A decoded 2-bit symbol.
///
/// Variants are named for their bit values and their symbol value, e.g., `D01Plus3` is bits
/// `01` transmitted as a +3 symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dibit {
    D00Plus1,
    D01Plus3,
    D10Minus1,
    D11Minus3,
}

impl Dibit {
    /// Construct from the low two bits of `value`.
    #[must_use]
    pub fn from_bits(value: u8) -> Self {
        match value & 0x3 {
            0 => Dibit::D00Plus1,
            1 => Dibit::D01Plus3,
            2 => Dibit::D10Minus1,
            _ => Dibit::D11Minus3,
        }
    }

    /// QPSK quadrant decision for a soft symbol.
    #[must_use]
    pub fn decide(soft: f32) -> Self {
        if soft > 0.0 {
            if soft > FRAC_PI_2 {
                Dibit::D01Plus3
            } else {
                Dibit::D00Plus1
            }
        } else if soft < -FRAC_PI_2 {
            Dibit::D11Minus3
        } else {
            Dibit::D10Minus1
        }
    }

    /// Both bits as the low two bits of a byte.
    #[must_use]
    pub fn value(self) -> u8 {
        match self {
            Dibit::D00Plus1 => 0,
            Dibit::D01Plus3 => 1,
            Dibit::D10Minus1 => 2,
            Dibit::D11Minus3 => 3,
        }
    }

    /// The first (most significant) bit.
    #[must_use]
    pub fn bit1(self) -> bool {
        self.value() & 0x2 != 0
    }

    /// The second (least significant) bit.
    #[must_use]
    pub fn bit2(self) -> bool {
        self.value() & 0x1 != 0
    }

    /// Ideal demodulated phase in radians.
    #[must_use]
    pub fn ideal_phase(self) -> f32 {
        match self {
            Dibit::D00Plus1 => INNER_PHASE,
            Dibit::D01Plus3 => OUTER_PHASE,
            Dibit::D10Minus1 => -INNER_PHASE,
            Dibit::D11Minus3 => -OUTER_PHASE,
        }
    }
}

/// Unpack `num_dibits` dibits from the low bits of `value`, most significant first.
#[must_use]
pub fn dibits_from_u64(value: u64, num_dibits: usize) -> Vec<Dibit> {
    (0..num_dibits)
        .rev()
        .map(|i| Dibit::from_bits(((value >> (i * 2)) & 0x3) as u8))
        .collect()
}
