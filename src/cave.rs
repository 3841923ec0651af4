use crate::pattern::Pattern;

/// Finds the first run of `length` zero bytes starting at or after `after`.
///
/// Callers pass the offset of the signature they are about to redirect so the
/// cave lands later in the image than the patch site.
pub fn find_cave(buffer: &[u8], length: usize, after: usize) -> Option<usize> {
  let pattern = Pattern::zeros(length).ok()?;
  pattern.find(buffer, after)
}
