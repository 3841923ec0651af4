//! Wildcard byte patterns and the scanner that finds them.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
  #[error("pattern is empty")]
  Empty,
  #[error("invalid pattern token \"{0}\"")]
  InvalidToken(String),
  #[error("pattern text contains non-printable character {0:?}")]
  NonPrintable(char),
}

/// A single position in a [`Pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
  Exact(u8),
  Any,
}

impl Matcher {
  #[inline]
  pub fn matches(self, byte: u8) -> bool {
    match self {
      Matcher::Exact(b) => b == byte,
      Matcher::Any => true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
  matchers: Vec<Matcher>,
}

impl Pattern {
  pub fn from_matchers(matchers: Vec<Matcher>) -> Result<Self, PatternError> {
    if matchers.is_empty() {
      return Err(PatternError::Empty);
    }
    Ok(Self { matchers })
  }

  /// Exact bytes only, no wildcards.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, PatternError> {
    Self::from_matchers(bytes.iter().copied().map(Matcher::Exact).collect())
  }

  /// Builds a pattern from printable text. Every character is an exact byte;
  /// there is no wildcard syntax in this form.
  pub fn from_text(text: &str) -> Result<Self, PatternError> {
    let mut matchers = Vec::with_capacity(text.len());
    for c in text.chars() {
      if !(' '..='~').contains(&c) {
        return Err(PatternError::NonPrintable(c));
      }
      matchers.push(Matcher::Exact(c as u8));
    }
    Self::from_matchers(matchers)
  }

  /// Parses space separated hex bytes, `?` or `??` for a wildcard.
  /// e.g. "D9 05 ?? ?? ?? ?? D9 5E 3C"
  pub fn parse(text: &str) -> Result<Self, PatternError> {
    let mut matchers = Vec::new();
    for token in text.split_whitespace() {
      if token == "?" || token == "??" {
        matchers.push(Matcher::Any);
        continue;
      }
      let byte = (token.len() == 2)
        .then(|| u8::from_str_radix(token, 16).ok())
        .flatten()
        .ok_or_else(|| PatternError::InvalidToken(token.to_string()))?;
      matchers.push(Matcher::Exact(byte));
    }
    Self::from_matchers(matchers)
  }

  /// `length` zero bytes, the shape of a code cave.
  pub fn zeros(length: usize) -> Result<Self, PatternError> {
    Self::from_matchers(vec![Matcher::Exact(0); length])
  }

  pub fn len(&self) -> usize {
    self.matchers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.matchers.is_empty()
  }

  pub fn matchers(&self) -> &[Matcher] {
    &self.matchers
  }

  /// Returns the offset of the first match at or after `start`.
  ///
  /// The scan is the plain automaton: the cursor advances on a match or a
  /// wildcard and drops back to zero on any mismatch, without re-testing the
  /// mismatching byte as a new start. Patterns that overlap a partial match of
  /// themselves can therefore be missed; catalog signatures never do.
  pub fn find(&self, buffer: &[u8], start: usize) -> Option<usize> {
    let len = self.matchers.len();
    let mut cursor = 0;

    for (i, &byte) in buffer.iter().enumerate().skip(start) {
      if self.matchers[cursor].matches(byte) {
        cursor += 1;
        if cursor == len {
          return Some(i + 1 - len);
        }
      } else {
        cursor = 0;
      }
    }

    None
  }
}

impl FromStr for Pattern {
  type Err = PatternError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl fmt::Display for Pattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, m) in self.matchers.iter().enumerate() {
      if i > 0 {
        f.write_str(" ")?;
      }
      match m {
        Matcher::Exact(b) => write!(f, "{:02X}", b)?,
        Matcher::Any => f.write_str("??")?,
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exact_match() {
    let p = Pattern::from_bytes(&[0x20]).unwrap();
    assert_eq!(p.find(&[0x10, 0x20, 0x30], 0), Some(1));
  }

  #[test]
  fn wildcard_match() {
    let p = Pattern::from_matchers(vec![Matcher::Exact(0x20), Matcher::Any]).unwrap();
    assert_eq!(p.find(&[0x10, 0x20, 0x30, 0x40], 0), Some(1));
  }

  #[test]
  fn not_found() {
    let p = Pattern::from_bytes(&[0x05]).unwrap();
    assert_eq!(p.find(&[0x01, 0x02], 0), None);
  }

  #[test]
  fn start_offset_is_honored() {
    let p = Pattern::from_bytes(&[0x00]).unwrap();
    assert_eq!(p.find(&[0, 0, 0, 0], 2), Some(2));
    assert_eq!(p.find(&[0, 0, 0, 0], 4), None);
    assert_eq!(p.find(&[0, 0, 0, 0], 100), None);
  }

  #[test]
  fn longer_than_buffer() {
    let p = Pattern::from_bytes(&[1, 2, 3]).unwrap();
    assert_eq!(p.find(&[1, 2], 0), None);
    assert_eq!(p.find(&[9, 1, 2, 3], 2), None);
  }

  #[test]
  fn match_at_end_of_buffer() {
    let p = Pattern::parse("AA BB").unwrap();
    assert_eq!(p.find(&[0, 0, 0xAA, 0xBB], 0), Some(2));
  }

  #[test]
  fn wildcards_only() {
    let p = Pattern::parse("?? ??").unwrap();
    assert_eq!(p.find(&[7, 8, 9], 1), Some(1));
    assert_eq!(p.find(&[7, 8, 9], 2), None);
  }

  #[test]
  fn mismatch_resets_cursor() {
    // The second 0xAA breaks the partial match and is not retried as a start.
    let p = Pattern::parse("AA BB").unwrap();
    assert_eq!(p.find(&[0xAA, 0xAA, 0xBB], 0), None);
    assert_eq!(p.find(&[0xAA, 0xAA, 0xAA, 0xBB], 0), Some(2));
  }

  #[test]
  fn search_is_repeatable() {
    let buf = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5];
    let p = Pattern::parse("05 ?? 02").unwrap();
    let first = p.find(&buf, 0);
    assert_eq!(first, Some(4));
    for _ in 0..3 {
      assert_eq!(p.find(&buf, 0), first);
    }
  }

  #[test]
  fn text_form_is_exact() {
    let p = Pattern::from_text("?a").unwrap();
    assert_eq!(p.matchers(), &[Matcher::Exact(b'?'), Matcher::Exact(b'a')]);
    assert_eq!(p.find(b"xx?a", 0), Some(2));
    assert_eq!(p.find(b"xxza", 0), None);
    assert_eq!(Pattern::from_text("a\tb"), Err(PatternError::NonPrintable('\t')));
  }

  #[test]
  fn rejects_empty_and_bad_tokens() {
    assert_eq!(Pattern::parse("  "), Err(PatternError::Empty));
    assert_eq!(Pattern::from_text(""), Err(PatternError::Empty));
    assert_eq!(Pattern::zeros(0), Err(PatternError::Empty));
    assert_eq!(
      Pattern::parse("D9 XY"),
      Err(PatternError::InvalidToken("XY".to_string()))
    );
    assert_eq!(
      Pattern::parse("D9 505"),
      Err(PatternError::InvalidToken("505".to_string()))
    );
  }

  #[test]
  fn display_round_trips() {
    let text = "D9 05 ?? ?? 3F";
    assert_eq!(text.parse::<Pattern>().unwrap().to_string(), text);
  }
}
