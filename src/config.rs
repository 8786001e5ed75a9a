//! Decoder tuning.
//!
//! Defaults are the values the decoder was tuned with on live signals; most users only
//! change [Config::samples_per_symbol].
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{framing::FrameType, timing::check_samples_per_symbol, Error, Result};

/// Bit count thresholds used to classify a frame whose NID could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Reclassification {
    /// A placeholder followed by LDU1 with at most this many bits is taken as an HDU.
    pub hdu_max_bits: usize,
    /// A placeholder with at least this many bits is taken as an LDU.
    pub ldu_min_bits: usize,
}

impl Default for Reclassification {
    fn default() -> Self {
        Reclassification {
            hdu_max_bits: 770,
            ldu_min_bits: 1566,
        }
    }
}

impl Reclassification {
    /// # Errors
    /// [Error::InvalidConfig] if the thresholds cannot tell an HDU from an LDU.
    pub fn validate(&self) -> Result<()> {
        let hdu = FrameType::HeaderDataUnit.bits();
        let ldu = FrameType::LogicalLinkDataUnit1.bits();
        if self.hdu_max_bits < hdu {
            return Err(Error::InvalidConfig(format!(
                "hdu_max_bits={} is shorter than an HDU ({hdu} bits)",
                self.hdu_max_bits
            )));
        }
        if self.ldu_min_bits > ldu {
            return Err(Error::InvalidConfig(format!(
                "ldu_min_bits={} is longer than an LDU ({ldu} bits)",
                self.ldu_min_bits
            )));
        }
        if self.hdu_max_bits >= self.ldu_min_bits {
            return Err(Error::InvalidConfig(format!(
                "hdu_max_bits={} must be less than ldu_min_bits={}",
                self.hdu_max_bits, self.ldu_min_bits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Nominal sample rate divided by the 4800 symbol rate.
    #[builder(default = 10.0)]
    pub samples_per_symbol: f32,
    /// Correlation score that makes a sync candidate.
    #[builder(default = 65.0)]
    pub sync_detection_threshold: f32,
    /// Score a candidate must reach after timing optimization to be accepted.
    #[builder(default = 95.0)]
    pub sync_acceptance_threshold: f32,
    /// Symbols after the last sync before timing lock is given up.
    #[builder(default = 890)]
    pub max_symbols_for_fine_sync: usize,
    /// Fewest symbols between syncs for a timing error to adjust samples per symbol.
    #[builder(default = 72)]
    pub min_symbols_for_timing_adjust: usize,
    /// Fraction of the per-symbol timing error applied to samples per symbol.
    #[builder(default = 0.2)]
    pub samples_per_symbol_gain: f32,
    /// Observations needed before a NAC becomes the tracked consensus.
    #[builder(default = 3)]
    pub nac_observations: u32,
    #[builder(default)]
    pub reclassification: Reclassification,
    /// Size of each raw bitstream buffer.
    #[builder(default = 300)]
    pub bitstream_buffer_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// # Errors
    /// [Error::InvalidConfig] describing the first invalid value, or
    /// [Error::InvalidSamplesPerSymbol].
    pub fn validate(&self) -> Result<()> {
        check_samples_per_symbol(self.samples_per_symbol)?;
        if self.sync_detection_threshold.is_nan() || self.sync_detection_threshold <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "sync_detection_threshold={} must be positive",
                self.sync_detection_threshold
            )));
        }
        if self.sync_acceptance_threshold < self.sync_detection_threshold {
            return Err(Error::InvalidConfig(format!(
                "sync_acceptance_threshold={} is below sync_detection_threshold={}",
                self.sync_acceptance_threshold, self.sync_detection_threshold
            )));
        }
        if self.min_symbols_for_timing_adjust > self.max_symbols_for_fine_sync {
            return Err(Error::InvalidConfig(format!(
                "min_symbols_for_timing_adjust={} exceeds max_symbols_for_fine_sync={}",
                self.min_symbols_for_timing_adjust, self.max_symbols_for_fine_sync
            )));
        }
        if self.nac_observations == 0 {
            return Err(Error::InvalidConfig("nac_observations must be > 0".into()));
        }
        if self.bitstream_buffer_bytes == 0 {
            return Err(Error::InvalidConfig("bitstream_buffer_bytes must be > 0".into()));
        }
        self.reclassification.validate()
    }

    /// Read a JSON config; missing fields take their defaults.
    ///
    /// # Errors
    /// [Error::Json] if the document cannot be parsed, or any [Config::validate] error.
    #[cfg(feature = "serde")]
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}
