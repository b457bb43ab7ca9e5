//! Error type for the framed buffer codec.

/// Failure decoding or encoding a framed primitive.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    /// The buffer ended before the value being read was complete.
    #[error("unexpected end of buffer")]
    UnexpectedEof,

    /// A string's trailing CRC-8 byte did not match the recomputed hash.
    #[error("corrupted string hash")]
    InvalidHash,

    /// A string contained a code point above `U+FFFF`.
    ///
    /// The wire format's non-ASCII chunks carry 16-bit code units only; it
    /// has no representation for the supplementary planes.
    #[error("code point {0:?} lies outside the Basic Multilingual Plane")]
    AstralCodePoint(char),
}
