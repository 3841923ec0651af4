//! Near-jump trampolines into code caves.
//!
//! The patch site gets `jmp rel32` into the cave followed by a NOP slide over
//! the rest of the displaced bytes. The cave gets the replacement instructions
//! followed by `jmp rel32` back to the start of that slide.
//!
//! ```text
//! site:  E9 <diff_go>  90 90 ... 90          (consumed bytes)
//! cave:  <payload>     E9 <diff_back>        (payload.len() + 5 bytes)
//! ```

use tracing::debug;

use crate::{cave::find_cave, error::PatchError, pattern::Pattern};

pub const JMP_REL32: u8 = 0xE9;
pub const JMP_LEN: usize = 5;
pub const NOP: u8 = 0x90;
/// Cave size reserved by every trampoline in the catalog.
pub const CAVE_LEN: usize = 28;

/// Displacement of a `jmp rel32` placed at `from` that lands on `to`.
/// Measured from the end of the 5 byte instruction.
pub fn rel32(from: usize, to: usize) -> Result<i32, PatchError> {
  let disp = to as i64 - (from as i64 + JMP_LEN as i64);
  i32::try_from(disp).map_err(|_| PatchError::DisplacementOverflow { from, to })
}

/// Encodes `jmp rel32`.
pub fn jmp_rel32(displacement: i32) -> [u8; JMP_LEN] {
  let mut bytes = [JMP_REL32, 0, 0, 0, 0];
  bytes[1..].copy_from_slice(&displacement.to_le_bytes());
  bytes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trampoline<'a> {
  pub site: usize,
  pub cave: usize,
  pub consumed: usize,
  pub payload: &'a [u8],
}

impl<'a> Trampoline<'a> {
  pub fn new(site: usize, cave: usize, consumed: usize, payload: &'a [u8]) -> Self {
    Self {
      site,
      cave,
      consumed,
      payload,
    }
  }

  /// Bytes written into the cave, return jump included.
  pub fn cave_len(&self) -> usize {
    self.payload.len() + JMP_LEN
  }

  /// `cave - site - 5`
  pub fn diff_go(&self) -> Result<i32, PatchError> {
    rel32(self.site, self.cave)
  }

  /// Return jump from the end of the payload to `site + 5`, the first NOP.
  /// Equals `site - cave - cave_len + 5`.
  pub fn diff_back(&self) -> Result<i32, PatchError> {
    rel32(self.cave + self.payload.len(), self.site + JMP_LEN)
  }

  /// Writes both halves. Nothing is written unless every check passes.
  pub fn apply(&self, buffer: &mut [u8]) -> Result<(), PatchError> {
    if self.consumed < JMP_LEN {
      return Err(PatchError::SiteTooShort(self.consumed));
    }
    check_bounds(buffer, self.site, self.consumed)?;
    check_bounds(buffer, self.cave, self.cave_len())?;

    let go = jmp_rel32(self.diff_go()?);
    let back = jmp_rel32(self.diff_back()?);

    let site = &mut buffer[self.site..self.site + self.consumed];
    site[..JMP_LEN].copy_from_slice(&go);
    site[JMP_LEN..].fill(NOP);

    let payload_end = self.cave + self.payload.len();
    buffer[self.cave..payload_end].copy_from_slice(self.payload);
    buffer[payload_end..payload_end + JMP_LEN].copy_from_slice(&back);

    Ok(())
  }
}

fn check_bounds(buffer: &[u8], offset: usize, len: usize) -> Result<(), PatchError> {
  match offset.checked_add(len) {
    Some(end) if end <= buffer.len() => Ok(()),
    _ => Err(PatchError::OutOfBounds { offset, len }),
  }
}

/// Locates the signature and a cave after it, and returns the trampoline that
/// would join them. The buffer is not modified.
pub fn plan<'a>(
  buffer: &[u8],
  signature: &Pattern,
  consumed: usize,
  cave_len: usize,
  payload: &'a [u8],
) -> Result<Trampoline<'a>, PatchError> {
  if consumed < JMP_LEN {
    return Err(PatchError::SiteTooShort(consumed));
  }
  let needed = payload.len() + JMP_LEN;
  if needed > cave_len {
    return Err(PatchError::CaveTooSmall {
      needed,
      available: cave_len,
    });
  }

  let site = signature
    .find(buffer, 0)
    .ok_or(PatchError::SignatureNotFound)?;

  let mut cave = find_cave(buffer, cave_len, site);
  if let Some(c) = cave
    && c < site + consumed
  {
    // Zero bytes inside the displaced instructions are not free space.
    cave = find_cave(buffer, cave_len, site + consumed);
  }
  let cave = cave.ok_or(PatchError::CaveNotFound {
    length: cave_len,
    after: site,
  })?;

  debug!(site, cave, consumed, payload = payload.len(), "Planned trampoline");
  Ok(Trampoline::new(site, cave, consumed, payload))
}

/// Plans and applies a trampoline in one step.
pub fn build_trampoline<'a>(
  buffer: &mut [u8],
  signature: &Pattern,
  consumed: usize,
  cave_len: usize,
  payload: &'a [u8],
) -> Result<Trampoline<'a>, PatchError> {
  let trampoline = plan(buffer, signature, consumed, cave_len, payload)?;
  trampoline.apply(buffer)?;
  Ok(trampoline)
}
