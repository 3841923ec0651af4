//! The default [`CollisionGenerator`]: table-driven CRC-32 reversal.
//!
//! Four suffix bytes select four table entries, and the register after them
//! depends only on which entries were picked. Each entry has a distinct top
//! byte, so the entries for any wanted register are recovered one byte at a
//! time from the top. The bytes that select them then follow from the start
//! register.

use crate::checksum::{
  ASCII_LEN, BINARY_LEN, CollisionGenerator, crc32_extend, is_printable,
};

const POLY: u32 = 0xEDB8_8320;

const TABLE: [u32; 256] = {
  let mut table = [0u32; 256];
  let mut i = 0;
  while i < 256 {
    let mut crc = i as u32;
    let mut bit = 0;
    while bit < 8 {
      crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
      bit += 1;
    }
    table[i] = crc;
    i += 1;
  }
  table
};

/// Table index keyed by the top byte of its entry.
const TOP_BYTE_INDEX: [u8; 256] = {
  let mut index = [0u8; 256];
  let mut i = 0;
  while i < 256 {
    index[(TABLE[i] >> 24) as usize] = i as u8;
    i += 1;
  }
  index
};

/// Leading characters tried by the ASCII search.
const ASCII_FIRST: u8 = 0x21;
const ASCII_LAST: u8 = 0x7E;

#[inline]
fn step(reg: u32, byte: u8) -> u32 {
  (reg >> 8) ^ TABLE[((reg ^ byte as u32) & 0xFF) as usize]
}

/// Four bytes that move the raw register `start` to `wanted`.
fn reverse_register(start: u32, wanted: u32) -> [u8; BINARY_LEN] {
  let mut indices = [0u8; BINARY_LEN];
  let mut reg = wanted;
  for slot in indices.iter_mut().rev() {
    let k = TOP_BYTE_INDEX[(reg >> 24) as usize];
    *slot = k;
    reg = (reg ^ TABLE[k as usize]) << 8;
  }

  let mut bytes = [0u8; BINARY_LEN];
  let mut reg = start;
  for (byte, &k) in bytes.iter_mut().zip(indices.iter()) {
    *byte = (reg as u8) ^ k;
    reg = (reg >> 8) ^ TABLE[k as usize];
  }
  bytes
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseCrc;

impl ReverseCrc {
  /// Four-byte suffix, or `None` if the result does not verify.
  pub fn binary(start: u32, wanted: u32) -> Option<[u8; BINARY_LEN]> {
    let bytes = reverse_register(!start, !wanted);
    (crc32_extend(start, &bytes) == wanted).then_some(bytes)
  }

  /// Six printable bytes: two chosen leading characters followed by the
  /// reversed four, accepted when those four are printable too.
  pub fn ascii(start: u32, wanted: u32) -> Option<[u8; ASCII_LEN]> {
    let reg = !start;
    for a in ASCII_FIRST..=ASCII_LAST {
      let reg_a = step(reg, a);
      for b in ASCII_FIRST..=ASCII_LAST {
        let tail = reverse_register(step(reg_a, b), !wanted);
        if !tail.iter().all(|&c| is_printable(c)) {
          continue;
        }
        let patch = [a, b, tail[0], tail[1], tail[2], tail[3]];
        if crc32_extend(start, &patch) == wanted {
          return Some(patch);
        }
      }
    }
    None
  }
}

impl CollisionGenerator for ReverseCrc {
  fn generate_ascii(&self, start: u32, wanted: u32) -> [u8; ASCII_LEN] {
    Self::ascii(start, wanted).unwrap_or([0; ASCII_LEN])
  }

  fn generate_binary(&self, start: u32, wanted: u32) -> [u8; BINARY_LEN] {
    Self::binary(start, wanted).unwrap_or([0; BINARY_LEN])
  }
}
