//! Symbol timing recovery.
//!
//! Samples are demodulated phases at several samples per symbol. A fractional sample clock
//! picks one sample point per symbol; its phase is corrected whenever a sync pattern is
//! found, by searching for the sub-sample offset that maximizes the sync correlation.
//!
//! Three correlators watch the stream: one at the sample point and two lagging it by a
//! third and two thirds of a symbol, so a sync is still caught when the sample clock has
//! drifted close to a symbol boundary.
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::{
    config::Config,
    dibit::Dibit,
    nid::{Nid, NidValidator, NID_DIBITS},
    sync::{interpolate, score_at, sync_dibits, SyncCorrelator, SYNC_DIBITS},
    Error, Result,
};

/// Smallest supported samples per symbol.
pub const MIN_SAMPLES_PER_SYMBOL: f32 = 2.0;
/// Largest supported samples per symbol, a 4.8 MHz sample rate.
pub const MAX_SAMPLES_PER_SYMBOL: f32 = 1000.0;

/// # Errors
/// [Error::InvalidSamplesPerSymbol] unless `sps` is within [MIN_SAMPLES_PER_SYMBOL] and
/// [MAX_SAMPLES_PER_SYMBOL].
pub fn check_samples_per_symbol(sps: f32) -> Result<()> {
    if (MIN_SAMPLES_PER_SYMBOL..=MAX_SAMPLES_PER_SYMBOL).contains(&sps) {
        Ok(())
    } else {
        Err(Error::InvalidSamplesPerSymbol(sps))
    }
}

/// Symbols of history kept ahead of the workspace when the sample buffer is shifted; must
/// cover the sync pattern plus the timing search range.
const PROTECTED_SYMBOLS: f32 = 28.0;
/// Symbols of new samples loaded between shifts.
const WORKSPACE_SYMBOLS: f32 = 25.0;
/// Smallest step of the timing search, in samples.
const MIN_STEP: f32 = 0.03;
/// Largest timing correction applied while locked, in samples.
const LOCKED_MAX_ADJUSTMENT: f32 = 0.5;
/// Symbols after sync at which the NID, plus one dibit of slip, has been received.
const NID_TRIGGER: usize = NID_DIBITS + 1;

/// Receives the output of [TimingRecovery].
///
/// Dibits are delayed by the sync and NID length so sync events arrive before the dibits
/// they describe: after a sync event the next dibit received is the first sync dibit.
pub trait DibitSink {
    fn receive(&mut self, dibit: Dibit);

    /// A sync was found and its NID decoded.
    fn sync_detected(&mut self, nid: &Nid);

    /// A sync was found but its NID could not be used. `nac` is the tracked NAC, or 0.
    fn sync_detected_uncertain(&mut self, nac: u16);
}

/// Fixed length dibit delay line.
#[derive(Debug, Clone)]
struct DibitDelayLine {
    dibits: VecDeque<Dibit>,
    len: usize,
}

impl DibitDelayLine {
    fn new(len: usize) -> Self {
        DibitDelayLine {
            dibits: VecDeque::with_capacity(len + 1),
            len,
        }
    }

    /// Push a dibit, returning the dibit that falls out once the line is full.
    fn push(&mut self, dibit: Dibit) -> Option<Dibit> {
        self.dibits.push_back(dibit);
        if self.dibits.len() > self.len {
            self.dibits.pop_front()
        } else {
            None
        }
    }

    /// Replace the most recent dibits with `dibits`, oldest first.
    fn overwrite_newest(&mut self, dibits: &[Dibit]) {
        let start = self.dibits.len().saturating_sub(dibits.len());
        for (slot, dibit) in self.dibits.range_mut(start..).zip(dibits) {
            *slot = *dibit;
        }
    }

    /// Contents, oldest first.
    fn history(&mut self) -> &[Dibit] {
        self.dibits.make_contiguous()
    }
}

/// Fractional-clock symbol sampler with correlation based sync detection.
pub struct TimingRecovery {
    config: Config,
    samples: Vec<f32>,
    /// Index where the next received sample is stored.
    load: usize,
    /// Index of the sample at or just before the sample point.
    pointer: usize,
    /// Samples dropped from the front of the buffer when it is full.
    workspace: usize,
    /// Samples that must follow the pointer before a symbol can be processed.
    lookahead: usize,
    /// Samples until the next symbol decision, relative to `pointer`.
    sample_point: f32,
    samples_per_symbol: f32,
    lag1: f32,
    lag2: f32,
    locked: bool,
    symbols_since_sync: usize,
    correlators: [SyncCorrelator; 3],
    delay: DibitDelayLine,
    nid: NidValidator,
    sync: Vec<Dibit>,
}

impl TimingRecovery {
    /// # Errors
    /// Any [Config::validate] error.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let mut zult = TimingRecovery {
            config: config.clone(),
            samples: Vec::new(),
            load: 0,
            pointer: 0,
            workspace: 0,
            lookahead: 0,
            sample_point: 0.0,
            samples_per_symbol: 0.0,
            lag1: 0.0,
            lag2: 0.0,
            locked: false,
            symbols_since_sync: NID_TRIGGER + 1,
            correlators: Default::default(),
            delay: DibitDelayLine::new(NidValidator::HISTORY_DIBITS),
            nid: NidValidator::new(config.nac_observations),
            sync: sync_dibits(),
        };
        zult.set_samples_per_symbol(config.samples_per_symbol)?;
        Ok(zult)
    }

    /// Reset the sample clock for a new nominal samples per symbol. Buffered samples are
    /// discarded.
    ///
    /// # Errors
    /// See [check_samples_per_symbol].
    pub fn set_samples_per_symbol(&mut self, sps: f32) -> Result<()> {
        check_samples_per_symbol(sps)?;
        let protected = (PROTECTED_SYMBOLS * sps).ceil() as usize;
        self.workspace = (WORKSPACE_SYMBOLS * sps).ceil() as usize;
        self.samples = vec![0.0; protected + self.workspace];
        self.load = protected;
        self.pointer = protected;
        self.lookahead = (sps / 2.0).ceil() as usize + 3;
        self.sample_point = sps;
        self.samples_per_symbol = sps;
        self.lag1 = sps / 3.0;
        self.lag2 = sps * 2.0 / 3.0;
        self.locked = false;
        for correlator in &mut self.correlators {
            correlator.reset();
        }
        debug!(sps, buffer = self.samples.len(), "samples per symbol set");
        Ok(())
    }

    /// Current samples per symbol estimate.
    #[must_use]
    pub fn samples_per_symbol(&self) -> f32 {
        self.samples_per_symbol
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The tracked network access code.
    #[must_use]
    pub fn nac(&self) -> Option<u16> {
        self.nid.tracker().consensus()
    }

    /// Forget the tracked network access code, e.g., after retuning.
    pub fn reset_nac(&mut self) {
        self.nid.reset();
    }

    /// Process demodulated phase samples, pushing dibits and sync events to `sink`.
    pub fn receive<S>(&mut self, samples: &[f32], sink: &mut S)
    where
        S: DibitSink + ?Sized,
    {
        let mut offset = 0;
        while offset < samples.len() {
            if self.load == self.samples.len() {
                self.samples.copy_within(self.workspace.., 0);
                self.load -= self.workspace;
                self.pointer = self.pointer.saturating_sub(self.workspace);
            }

            let num = (self.samples.len() - self.load).min(samples.len() - offset);
            self.samples[self.load..self.load + num]
                .copy_from_slice(&samples[offset..offset + num]);
            self.load += num;
            offset += num;

            while self.pointer + self.lookahead < self.load {
                self.pointer += 1;
                self.sample_point -= 1.0;
                if self.sample_point < 1.0 {
                    self.process_symbol(sink);
                }
            }
        }
    }

    /// Interpolated phase at fractional buffer position `pos`.
    fn soft_symbol(&self, pos: f32) -> f32 {
        if pos < 0.0 {
            return 0.0;
        }
        let idx = pos.floor() as usize;
        match (self.samples.get(idx), self.samples.get(idx + 1)) {
            (Some(a), Some(b)) => interpolate(*a, *b, pos - idx as f32),
            _ => 0.0,
        }
    }

    fn score(&self, offset: f32) -> f32 {
        score_at(&self.samples, offset, self.samples_per_symbol).unwrap_or(f32::NEG_INFINITY)
    }

    fn process_symbol<S>(&mut self, sink: &mut S)
    where
        S: DibitSink + ?Sized,
    {
        self.symbols_since_sync = self.symbols_since_sync.saturating_add(1);
        if self.locked && self.symbols_since_sync > self.config.max_symbols_for_fine_sync {
            debug!(
                symbols = self.symbols_since_sync,
                "no sync; timing lock lost"
            );
            self.locked = false;
        }

        let position = self.pointer as f32 + self.sample_point;
        let soft = self.soft_symbol(position);
        if let Some(dibit) = self.delay.push(Dibit::decide(soft)) {
            sink.receive(dibit);
        }

        let lag1 = self.soft_symbol(position - self.lag1);
        let lag2 = self.soft_symbol(position - self.lag2);
        let scores = [
            self.correlators[0].process(soft),
            self.correlators[1].process(lag1),
            self.correlators[2].process(lag2),
        ];

        for lag in self.detect(scores).into_iter().flatten() {
            if self.optimize(position, -lag) {
                break;
            }
        }

        if self.symbols_since_sync == NID_TRIGGER {
            self.check_nid(sink);
        }

        self.sample_point += self.samples_per_symbol;
    }

    /// Lags, in samples, of the correlators that found a sync candidate, best score first.
    ///
    /// While locked only the primary correlator counts. Otherwise every correlator over the
    /// threshold is a candidate, so a sync rejected at one lag can still be found at another.
    fn detect(&self, scores: [f32; 3]) -> [Option<f32>; 3] {
        let threshold = self.config.sync_detection_threshold;
        let mut candidates = [(scores[0], 0.0), (scores[1], self.lag1), (scores[2], self.lag2)];
        // the lagging correlators see the same sync one symbol later
        let considered = if self.locked || self.symbols_since_sync <= 1 {
            1
        } else {
            3
        };
        // stable, so the primary wins ties
        candidates[..considered].sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut zult = [None; 3];
        for (slot, (score, lag)) in zult.iter_mut().zip(&candidates[..considered]) {
            if *score > threshold {
                *slot = Some(*lag);
            }
        }
        zult
    }

    /// Search for the timing offset that best fits the sync pattern ending at `position`,
    /// shifted by `offset` samples, and adopt it if the fit is good enough.
    fn optimize(&mut self, position: f32, offset: f32) -> bool {
        let sps = self.samples_per_symbol;
        let start = position - sps * (SYNC_DIBITS - 1) as f32 + offset;
        let max_adjustment = sps / 2.0;
        let mut step = if self.locked { sps / 40.0 } else { sps / 10.0 };
        let mut adjustment = 0.0f32;

        let mut center = self.score(start);
        let mut left = self.score(start - step);
        let mut right = self.score(start + step);

        while step > MIN_STEP && adjustment.abs() <= max_adjustment {
            if left > right && left > center {
                adjustment -= step;
                right = center;
                center = left;
                left = self.score(start + adjustment - step);
            } else if right > left && right > center {
                adjustment += step;
                left = center;
                center = right;
                right = self.score(start + adjustment + step);
            } else {
                step *= 0.5;
                if step > MIN_STEP {
                    left = self.score(start + adjustment - step);
                    right = self.score(start + adjustment + step);
                }
            }
        }

        if center < self.config.sync_acceptance_threshold {
            trace!(score = center, offset, adjustment, "sync candidate rejected");
            return false;
        }

        let mut correction = offset + adjustment;
        if self.locked {
            correction = correction.clamp(-LOCKED_MAX_ADJUSTMENT, LOCKED_MAX_ADJUSTMENT);
        }
        self.adjust_sample_point(correction);

        if self.locked
            && correction.abs() < LOCKED_MAX_ADJUSTMENT
            && self.symbols_since_sync >= self.config.min_symbols_for_timing_adjust
            && self.symbols_since_sync <= self.config.max_symbols_for_fine_sync
        {
            self.samples_per_symbol += correction / self.symbols_since_sync as f32
                * self.config.samples_per_symbol_gain;
        }

        debug!(
            score = center,
            correction,
            sps = self.samples_per_symbol,
            symbols = self.symbols_since_sync,
            locked = self.locked,
            "sync"
        );
        self.delay.overwrite_newest(&self.sync);
        self.symbols_since_sync = 0;
        true
    }

    /// Move the sample point, keeping it within one sample of the pointer.
    fn adjust_sample_point(&mut self, correction: f32) {
        self.sample_point += correction;
        while self.sample_point < 0.0 && self.pointer > 0 {
            self.sample_point += 1.0;
            self.pointer -= 1;
        }
        while self.sample_point > 1.0 {
            self.sample_point -= 1.0;
            self.pointer += 1;
        }
    }

    fn check_nid<S>(&mut self, sink: &mut S)
    where
        S: DibitSink + ?Sized,
    {
        match self.nid.validate(self.delay.history()) {
            Some(nid) => {
                self.locked = true;
                if nid.frame_type().is_some() {
                    sink.sync_detected(&nid);
                } else {
                    debug!(duid = nid.duid, nac = nid.nac, "unassigned duid");
                    sink.sync_detected_uncertain(nid.nac);
                }
            }
            None => {
                let nac = self.nid.tracker().consensus().unwrap_or(0);
                debug!(nac, "nid uncorrectable");
                sink.sync_detected_uncertain(nac);
            }
        }
    }
}
