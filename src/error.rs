#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Samples-per-symbol outside what the timing search can work with.
    #[error(
        "invalid samples per symbol {0}; must be within {min}..={max}",
        min = crate::timing::MIN_SAMPLES_PER_SYMBOL,
        max = crate::timing::MAX_SAMPLES_PER_SYMBOL
    )]
    InvalidSamplesPerSymbol(f32),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serde")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
