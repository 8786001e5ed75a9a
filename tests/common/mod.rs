#![allow(dead_code)]

use p25::{
    dibit::Dibit,
    framing::{is_status_position, FrameType, HEADER_DIBITS},
    nid,
    sync::sync_dibits,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Builds a dibit stream and renders it as ideal phase samples.
///
/// Filler uses inner (±1) symbols only so it cannot correlate with the sync pattern.
#[derive(Debug, Default, Clone)]
pub struct Signal {
    pub dibits: Vec<Dibit>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idle(mut self, num: usize) -> Self {
        self.dibits.extend((0..num).map(|i| {
            if i % 3 == 0 {
                Dibit::D10Minus1
            } else {
                Dibit::D00Plus1
            }
        }));
        self
    }

    pub fn sync(mut self) -> Self {
        self.dibits.extend(sync_dibits());
        self
    }

    /// NID with `flips` bits inverted, bit 0 being the first transmitted bit.
    pub fn nid(mut self, nac: u16, duid: u8, flips: &[usize]) -> Self {
        let mut dibits = nid::encode(nac, duid, Dibit::D00Plus1);
        for bit in flips {
            let mut idx = bit / 2;
            if idx >= nid::NID_STATUS_INDEX {
                idx += 1;
            }
            let mask = if bit % 2 == 0 { 0x2 } else { 0x1 };
            dibits[idx] = Dibit::from_bits(dibits[idx].value() ^ mask);
        }
        self.dibits.extend(dibits);
        self
    }

    /// `data` zero data dibits with status dibits where they belong, plus the trailing
    /// status dibit if `trailing`.
    pub fn body(self, data: usize, trailing: bool) -> Self {
        self.body_with(&vec![Dibit::D00Plus1; data], trailing)
    }

    /// `data` with status dibits interleaved where they belong, plus the trailing status
    /// dibit if `trailing`.
    pub fn body_with(mut self, data: &[Dibit], trailing: bool) -> Self {
        let mut position = HEADER_DIBITS;
        let mut data = data.iter();
        let mut next = data.next();
        while let Some(dibit) = next {
            if is_status_position(position) {
                self.dibits.push(Dibit::D00Plus1);
            } else {
                self.dibits.push(*dibit);
                next = data.next();
            }
            position += 1;
        }
        if trailing {
            self.dibits.push(Dibit::D00Plus1);
        }
        self
    }

    /// Drop the dibit at `idx`, as a receiver missing a symbol would.
    pub fn remove(mut self, idx: usize) -> Self {
        self.dibits.remove(idx);
        self
    }

    /// A complete frame with a zero payload.
    pub fn frame(self, nac: u16, frame_type: FrameType) -> Self {
        self.frame_with_errors(nac, frame_type, &[])
    }

    pub fn frame_with_errors(self, nac: u16, frame_type: FrameType, flips: &[usize]) -> Self {
        let duid = frame_type.duid().expect("frame type must have a duid");
        self.sync()
            .nid(nac, duid, flips)
            .body(frame_type.bits() / 2, frame_type.has_trailing_status())
    }

    /// Rectangular pulses at `sps` samples per symbol, starting half a symbol early so
    /// symbol centers fall on whole symbol periods.
    pub fn samples(&self, sps: f64) -> Vec<f32> {
        let total = (self.dibits.len() as f64 * sps + sps / 2.0) as usize;
        (0..total)
            .map(|n| {
                let idx = ((n as f64 - sps / 2.0) / sps).floor();
                if idx < 0.0 {
                    Dibit::D00Plus1.ideal_phase()
                } else {
                    self.dibits[idx as usize].ideal_phase()
                }
            })
            .collect()
    }

    /// Like [Signal::samples] but with linear transitions between symbol centers, so the
    /// sync correlation peaks at the symbol center instead of being flat across the symbol.
    pub fn samples_linear(&self, sps: f64) -> Vec<f32> {
        let Some(last) = self.dibits.len().checked_sub(1) else {
            return Vec::new();
        };
        let phase = |idx: f64| self.dibits[(idx.max(0.0) as usize).min(last)].ideal_phase();
        let total = ((self.dibits.len() + 1) as f64 * sps) as usize;
        (0..total)
            .map(|n| {
                let pos = n as f64 / sps - 1.0;
                let idx = pos.floor();
                let frac = (pos - idx) as f32;
                let (a, b) = (phase(idx), phase(idx + 1.0));
                a + (b - a) * frac
            })
            .collect()
    }
}

/// Add uniform phase noise of at most `amplitude` radians.
pub fn add_noise(samples: &mut [f32], amplitude: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for sample in samples.iter_mut() {
        *sample += rng.gen_range(-amplitude..=amplitude);
    }
}
