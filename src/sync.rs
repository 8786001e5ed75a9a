//! Frame synchronization primitives.
//!
//! Every P25 Phase 1 frame starts with the same 48 bit sync pattern, transmitted as 24 outer
//! (±3) symbols. Sync is found by correlating demodulated soft symbols against the ideal
//! phases of that pattern rather than by comparing hard decisions, which tolerates symbols
//! sitting near a decision boundary.
use std::f32::consts::{PI, TAU};

use crate::dibit::{dibits_from_u64, Dibit, OUTER_PHASE};

/// The frame sync pattern.
pub const SYNC_PATTERN: u64 = 0x5575_F5FF_77FF;
/// Number of dibits in the sync pattern.
pub const SYNC_DIBITS: usize = 24;

/// Ideal phase of each sync symbol, first transmitted first.
const SYNC_PHASES: [f32; SYNC_DIBITS] = {
    let mut phases = [0.0f32; SYNC_DIBITS];
    let mut i = 0;
    while i < SYNC_DIBITS {
        // only 01 (+3) and 11 (-3) occur in the pattern
        phases[i] = if (SYNC_PATTERN >> ((SYNC_DIBITS - 1 - i) * 2)) & 0x3 == 0x1 {
            OUTER_PHASE
        } else {
            -OUTER_PHASE
        };
        i += 1;
    }
    phases
};

/// The sync pattern as dibits.
#[must_use]
pub fn sync_dibits() -> Vec<Dibit> {
    dibits_from_u64(SYNC_PATTERN, SYNC_DIBITS)
}

/// Score of a perfectly aligned, noise free sync pattern.
#[must_use]
pub fn perfect_score() -> f32 {
    SYNC_PHASES.iter().map(|p| p * p).sum()
}

/// Limit a soft symbol to the outer constellation points so a single wild phase sample
/// cannot dominate a correlation.
#[inline]
fn clamp(soft: f32) -> f32 {
    soft.clamp(-OUTER_PHASE, OUTER_PHASE)
}

/// Linear interpolation between two phase samples at fraction `mu` (0..1).
///
/// Phase wraps at ±π so `b` is first unwrapped to be within π of `a`, and the result is
/// wrapped back into ±π.
#[must_use]
pub fn interpolate(a: f32, b: f32, mu: f32) -> f32 {
    let mut b = b;
    if b - a > PI {
        b -= TAU;
    } else if a - b > PI {
        b += TAU;
    }
    let mut zult = a + (b - a) * mu;
    if zult > PI {
        zult -= TAU;
    } else if zult < -PI {
        zult += TAU;
    }
    zult
}

/// Correlation score of the sync pattern against `samples`, sampling the first sync symbol
/// at fractional index `offset` and each following symbol `sps` samples later.
///
/// Returns `None` if any sample point falls outside `samples`.
#[must_use]
pub fn score_at(samples: &[f32], offset: f32, sps: f32) -> Option<f32> {
    let mut score = 0.0;
    for (i, phase) in SYNC_PHASES.iter().enumerate() {
        let pos = offset + i as f32 * sps;
        if pos < 0.0 {
            return None;
        }
        let idx = pos.floor() as usize;
        let (a, b) = (samples.get(idx)?, samples.get(idx + 1)?);
        score += clamp(interpolate(*a, *b, pos - idx as f32)) * phase;
    }
    Some(score)
}

/// Sliding correlation of the most recent 24 soft symbols against the sync pattern.
///
/// Symbols are written twice into a double length ring so the current window is always a
/// contiguous slice.
#[derive(Debug, Clone)]
pub struct SyncCorrelator {
    symbols: [f32; SYNC_DIBITS * 2],
    pointer: usize,
}

impl Default for SyncCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCorrelator {
    #[must_use]
    pub fn new() -> Self {
        SyncCorrelator {
            symbols: [0.0; SYNC_DIBITS * 2],
            pointer: 0,
        }
    }

    /// Add the next soft symbol and return the correlation score of the window ending with
    /// it.
    pub fn process(&mut self, soft: f32) -> f32 {
        let soft = clamp(soft);
        self.symbols[self.pointer] = soft;
        self.symbols[self.pointer + SYNC_DIBITS] = soft;
        self.pointer = (self.pointer + 1) % SYNC_DIBITS;

        self.symbols[self.pointer..self.pointer + SYNC_DIBITS]
            .iter()
            .zip(SYNC_PHASES.iter())
            .map(|(s, p)| s * p)
            .sum()
    }

    pub fn reset(&mut self) {
        self.symbols = [0.0; SYNC_DIBITS * 2];
        self.pointer = 0;
    }
}
