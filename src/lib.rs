#![doc = include_str!("../README.md")]

mod decoder;
mod error;
mod logging;

pub mod bch;
pub mod bits;
pub mod bitstream;
pub mod config;
pub mod dibit;
pub mod framing;
pub mod nid;
pub mod sync;
pub mod timing;

pub use config::Config;
pub use decoder::Decoder;
pub use error::{Error, Result};
