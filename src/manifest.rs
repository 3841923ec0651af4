use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid checksum \"{0}\"")]
pub struct ChecksumParseError(String);

/// Parses a hex checksum such as `4a2ca8a1` or `0x4A2CA8A1`.
pub fn parse_checksum(text: &str) -> Result<u32, ChecksumParseError> {
  let trimmed = text.trim();
  let digits = trimmed
    .strip_prefix("0x")
    .or_else(|| trimmed.strip_prefix("0X"))
    .unwrap_or(trimmed);
  if digits.is_empty() || digits.len() > 8 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
    return Err(ChecksumParseError(text.to_string()));
  }
  u32::from_str_radix(digits, 16).map_err(|_| ChecksumParseError(text.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct BinaryEntry {
  pub checksum: String,
}

/// Server listing of expected checksums.
#[derive(Debug, Deserialize)]
pub struct Manifest {
  #[serde(default)]
  pub files: HashMap<String, String>,
  pub binary: BinaryEntry,
}

fn normalize(path: &str) -> String {
  path.replace('\\', "/").to_lowercase()
}

impl Manifest {
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  pub fn binary_checksum(&self) -> Result<u32, ChecksumParseError> {
    parse_checksum(&self.binary.checksum)
  }

  /// Checksum for an asset path. Exact keys win; otherwise separators and
  /// case are ignored.
  pub fn file_checksum(&self, path: &str) -> Option<Result<u32, ChecksumParseError>> {
    let value = self.files.get(path).or_else(|| {
      let wanted = normalize(path);
      self
        .files
        .iter()
        .find(|(key, _)| normalize(key) == wanted)
        .map(|(_, v)| v)
    })?;
    Some(parse_checksum(value))
  }
}
