//! Forcing a buffer's CRC-32 by appending a collision suffix.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const ASCII_LEN: usize = 6;
pub const BINARY_LEN: usize = 4;

/// CRC-32 (IEEE) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
  crc32fast::hash(data)
}

/// CRC-32 of the data whose checksum was `start`, followed by `suffix`.
pub fn crc32_extend(start: u32, suffix: &[u8]) -> u32 {
  let mut hasher = crc32fast::Hasher::new_with_initial(start);
  hasher.update(suffix);
  hasher.finalize()
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixKind {
  /// Six printable characters.
  #[default]
  Ascii,
  /// Four arbitrary bytes.
  Binary,
}

impl SuffixKind {
  pub fn len(self) -> usize {
    match self {
      SuffixKind::Ascii => ASCII_LEN,
      SuffixKind::Binary => BINARY_LEN,
    }
  }
}

impl fmt::Display for SuffixKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SuffixKind::Ascii => write!(f, "ascii"),
      SuffixKind::Binary => write!(f, "binary"),
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("could not parse suffix kind \"{0}\"")]
pub struct UnknownSuffixKind(String);

impl FromStr for SuffixKind {
  type Err = UnknownSuffixKind;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "ascii" => Ok(SuffixKind::Ascii),
      "binary" => Ok(SuffixKind::Binary),
      _ => Err(UnknownSuffixKind(s.to_string())),
    }
  }
}

/// Produces suffixes that move a CRC-32 from one value to another.
///
/// An all-zero result means no suffix could be found.
pub trait CollisionGenerator {
  fn generate_ascii(&self, start: u32, wanted: u32) -> [u8; ASCII_LEN];
  fn generate_binary(&self, start: u32, wanted: u32) -> [u8; BINARY_LEN];
}

/// A suffix that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumPatch {
  kind: SuffixKind,
  bytes: Vec<u8>,
}

pub fn is_printable(byte: u8) -> bool {
  (0x20..=0x7E).contains(&byte)
}

impl ChecksumPatch {
  pub fn ascii(bytes: [u8; ASCII_LEN]) -> Option<Self> {
    bytes.iter().all(|&b| is_printable(b)).then(|| Self {
      kind: SuffixKind::Ascii,
      bytes: bytes.to_vec(),
    })
  }

  pub fn binary(bytes: [u8; BINARY_LEN]) -> Option<Self> {
    bytes.iter().any(|&b| b != 0).then(|| Self {
      kind: SuffixKind::Binary,
      bytes: bytes.to_vec(),
    })
  }

  pub fn kind(&self) -> SuffixKind {
    self.kind
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }
}

impl fmt::Display for ChecksumPatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      SuffixKind::Ascii => {
        for &b in &self.bytes {
          write!(f, "{}", b as char)?;
        }
        Ok(())
      },
      SuffixKind::Binary => {
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("0x{:02x}", b)).collect();
        f.write_str(&hex.join(" "))
      },
    }
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
  #[error("no {kind} suffix takes the checksum from {start:#010x} to {wanted:#010x}")]
  GeneratorFailure {
    kind: SuffixKind,
    start: u32,
    wanted: u32,
  },
}

/// Asks `generator` for a suffix and validates it.
pub fn request_patch<G: CollisionGenerator + ?Sized>(
  generator: &G,
  kind: SuffixKind,
  start: u32,
  wanted: u32,
) -> Result<ChecksumPatch, AssembleError> {
  let patch = match kind {
    SuffixKind::Ascii => ChecksumPatch::ascii(generator.generate_ascii(start, wanted)),
    SuffixKind::Binary => ChecksumPatch::binary(generator.generate_binary(start, wanted)),
  };
  patch.ok_or(AssembleError::GeneratorFailure {
    kind,
    start,
    wanted,
  })
}

/// Appends a suffix to `buffer` so its CRC-32 becomes `target`.
///
/// The resulting checksum is the generator's guarantee; it is logged but not
/// enforced here.
pub fn assemble<G: CollisionGenerator + ?Sized>(
  mut buffer: Vec<u8>,
  target: u32,
  kind: SuffixKind,
  generator: &G,
) -> Result<Vec<u8>, AssembleError> {
  let current = crc32(&buffer);
  debug!(
    current = format!("{:#010x}", current),
    target = format!("{:#010x}", target),
    %kind,
    "Requesting checksum suffix"
  );

  let patch = request_patch(generator, kind, current, target)?;
  buffer.extend_from_slice(patch.bytes());

  info!(suffix = %patch, len = buffer.len(), "Appended checksum suffix");
  Ok(buffer)
}
