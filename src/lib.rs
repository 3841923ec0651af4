//! Byte-level patching of client executables and assets.
//!
//! [`catalog`] rewrites known instruction signatures using the search and
//! trampoline engine in [`pattern`], [`cave`] and [`trampoline`].
//! [`checksum`] then appends a suffix that forces the file's CRC-32 to the
//! value the server expects, using a [`checksum::CollisionGenerator`] such as
//! [`reverse::ReverseCrc`].

pub mod catalog;
pub mod cave;
pub mod checksum;
pub mod error;
pub mod manifest;
pub mod pattern;
pub mod reverse;
pub mod trampoline;

pub use catalog::{Feature, PatchReport, apply_features};
pub use checksum::{AssembleError, CollisionGenerator, SuffixKind, assemble, crc32};
pub use error::PatchError;
pub use pattern::{Matcher, Pattern};
pub use reverse::ReverseCrc;
