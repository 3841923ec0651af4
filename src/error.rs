use thiserror::Error;

use crate::pattern::PatternError;

/// Why a single feature patch could not be applied. The buffer is left as it
/// was whenever one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
  #[error("signature not found")]
  SignatureNotFound,
  #[error("no code cave of {length} bytes found after {after:#x}")]
  CaveNotFound { length: usize, after: usize },
  #[error("cave payload needs {needed} bytes but the cave holds {available}")]
  CaveTooSmall { needed: usize, available: usize },
  #[error("patch site must displace at least 5 bytes, got {0}")]
  SiteTooShort(usize),
  #[error("write of {len} bytes at {offset:#x} runs past the end of the buffer")]
  OutOfBounds { offset: usize, len: usize },
  #[error("jump from {from:#x} to {to:#x} does not fit a 32-bit displacement")]
  DisplacementOverflow { from: usize, to: usize },
  #[error("bad signature: {0}")]
  Pattern(#[from] PatternError),
}
