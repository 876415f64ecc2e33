//! Format parsers for the retrack playback engine.

mod mod_format;

pub use mod_format::load_mod;

use thiserror::Error;

/// Error type for format parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The buffer is not a module this engine can play.
    #[error("unsupported module format: {0}")]
    UnsupportedFormat(&'static str),
}
