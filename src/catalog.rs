//! Feature patches for the supported client build.
//!
//! Every entry is pinned to one build of the executable. When the client is
//! updated the signatures have to be found again; the engine in `pattern`,
//! `cave` and `trampoline` does not change.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  error::PatchError,
  pattern::Pattern,
  trampoline::{self, CAVE_LEN},
};

#[derive(
  PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Debug, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
  MultiClient,
  ZoomLimit,
  AmbientLight,
  SunLight,
  GroundOffset,
}

impl Feature {
  pub const ALL: [Feature; 5] = [
    Feature::MultiClient,
    Feature::ZoomLimit,
    Feature::AmbientLight,
    Feature::SunLight,
    Feature::GroundOffset,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Feature::MultiClient => "multi_client",
      Feature::ZoomLimit => "zoom_limit",
      Feature::AmbientLight => "ambient_light",
      Feature::SunLight => "sun_light",
      Feature::GroundOffset => "ground_offset",
    }
  }

  pub fn patch(self) -> &'static SignaturePatch {
    // CATALOG holds exactly one entry per feature, in declaration order.
    &CATALOG[self as usize]
  }
}

impl fmt::Display for Feature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("could not parse feature \"{0}\"")]
pub struct UnknownFeature(String);

impl FromStr for Feature {
  type Err = UnknownFeature;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let key = s.trim().to_lowercase().replace('-', "_");
    Feature::ALL
      .into_iter()
      .find(|f| f.name() == key)
      .ok_or_else(|| UnknownFeature(s.to_string()))
  }
}

/// Bytes written at `offset` from the start of the signature match.
#[derive(Debug)]
pub struct Edit {
  pub offset: usize,
  pub bytes: &'static [u8],
}

#[derive(Debug)]
pub enum PatchKind {
  Overwrite(&'static [Edit]),
  Trampoline {
    consumed: usize,
    cave_len: usize,
    payload: &'static [u8],
  },
}

#[derive(Debug)]
pub struct SignaturePatch {
  pub feature: Feature,
  pub signature: &'static str,
  pub kind: PatchKind,
}

/// Where a patch landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
  pub feature: Feature,
  pub site: usize,
  pub cave: Option<usize>,
}

impl SignaturePatch {
  pub fn pattern(&self) -> Result<Pattern, PatchError> {
    Ok(Pattern::parse(self.signature)?)
  }

  /// Applies this patch or leaves the buffer untouched.
  pub fn apply(&self, buffer: &mut [u8]) -> Result<Applied, PatchError> {
    let pattern = self.pattern()?;

    match &self.kind {
      PatchKind::Overwrite(edits) => {
        let site = pattern
          .find(buffer, 0)
          .ok_or(PatchError::SignatureNotFound)?;

        for edit in edits.iter() {
          let offset = site + edit.offset;
          if offset + edit.bytes.len() > buffer.len() {
            return Err(PatchError::OutOfBounds {
              offset,
              len: edit.bytes.len(),
            });
          }
        }
        for edit in edits.iter() {
          let offset = site + edit.offset;
          buffer[offset..offset + edit.bytes.len()].copy_from_slice(edit.bytes);
        }

        Ok(Applied {
          feature: self.feature,
          site,
          cave: None,
        })
      },
      PatchKind::Trampoline {
        consumed,
        cave_len,
        payload,
      } => {
        let t = trampoline::build_trampoline(buffer, &pattern, *consumed, *cave_len, payload)?;
        Ok(Applied {
          feature: self.feature,
          site: t.site,
          cave: Some(t.cave),
        })
      },
    }
  }
}

pub static CATALOG: [SignaturePatch; 5] = [
  // call [GetLastError]; cmp eax, ERROR_ALREADY_EXISTS; jne
  // jne -> jmp so the second instance takes the "first instance" path.
  SignaturePatch {
    feature: Feature::MultiClient,
    signature: "FF 15 ?? ?? ?? ?? 3D B7 00 00 00 75 ??",
    kind: PatchKind::Overwrite(&[Edit {
      offset: 11,
      bytes: &[0xEB],
    }]),
  },
  // fld [max_zoom]; fstp [esi+3C]; fld [min_zoom]; fstp [esi+40]
  // Replaced by immediate stores of 100.0f and 1.0f.
  SignaturePatch {
    feature: Feature::ZoomLimit,
    signature: "D9 05 ?? ?? ?? ?? D9 5E 3C D9 05 ?? ?? ?? ?? D9 5E 40",
    kind: PatchKind::Trampoline {
      consumed: 18,
      cave_len: CAVE_LEN,
      payload: &[
        0xC7, 0x46, 0x3C, 0x00, 0x00, 0xC8, 0x42, // mov dword ptr [esi+3C], 100.0f
        0xC7, 0x46, 0x40, 0x00, 0x00, 0x80, 0x3F, // mov dword ptr [esi+40], 1.0f
      ],
    },
  },
  // mov dword ptr [g_ambient], 0.5f
  SignaturePatch {
    feature: Feature::AmbientLight,
    signature: "C7 05 ?? ?? ?? ?? 00 00 00 3F",
    kind: PatchKind::Overwrite(&[Edit {
      offset: 6,
      bytes: &[0x00, 0x00, 0x80, 0x3F],
    }]),
  },
  // mov dword ptr [esi+1C], 0.35f; fld dword ptr [esi+1C]
  SignaturePatch {
    feature: Feature::SunLight,
    signature: "C7 46 1C 33 33 B3 3E D9 46 1C",
    kind: PatchKind::Overwrite(&[Edit {
      offset: 3,
      bytes: &[0x00, 0x00, 0x80, 0x3F],
    }]),
  },
  // lea ecx, [eax-8]; imul ecx, ecx, 20h
  SignaturePatch {
    feature: Feature::GroundOffset,
    signature: "8D 48 F8 6B C9 20",
    kind: PatchKind::Overwrite(&[Edit {
      offset: 2,
      bytes: &[0x00],
    }]),
  },
];

#[derive(Debug, Default)]
pub struct PatchReport {
  pub applied: Vec<Applied>,
  pub skipped: Vec<(Feature, PatchError)>,
}

impl PatchReport {
  pub fn is_complete(&self) -> bool {
    self.skipped.is_empty()
  }
}

/// Applies each requested feature in turn. A feature that fails is logged and
/// skipped; the others still run.
pub fn apply_features(buffer: &mut [u8], features: &[Feature]) -> PatchReport {
  let mut report = PatchReport::default();

  for &feature in features {
    match feature.patch().apply(buffer) {
      Ok(applied) => {
        info!(
          feature = %feature,
          site = applied.site,
          cave = ?applied.cave,
          "Applied patch"
        );
        report.applied.push(applied);
      },
      Err(error) => {
        warn!(feature = %feature, %error, "Skipping patch");
        report.skipped.push((feature, error));
      },
    }
  }

  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pattern::Matcher;

  /// Concrete bytes for a signature, wildcards filled with 0x11.
  fn materialize(signature: &str) -> Vec<u8> {
    Pattern::parse(signature)
      .unwrap()
      .matchers()
      .iter()
      .map(|m| match m {
        Matcher::Exact(b) => *b,
        Matcher::Any => 0x11,
      })
      .collect()
  }

  /// Every signature at a known offset, spaced by int3 filler, with a zero
  /// area after the zoom site for its cave.
  fn synthetic_image() -> (Vec<u8>, Vec<(Feature, usize)>) {
    let mut buf = vec![0xCC; 0x400];
    let mut sites = Vec::new();
    for (i, feature) in Feature::ALL.into_iter().enumerate() {
      let at = 0x40 + i * 0x40;
      let bytes = materialize(feature.patch().signature);
      buf[at..at + bytes.len()].copy_from_slice(&bytes);
      sites.push((feature, at));
    }
    buf[0x300..0x340].fill(0);
    (buf, sites)
  }

  fn site_of(sites: &[(Feature, usize)], feature: Feature) -> usize {
    sites.iter().find(|(f, _)| *f == feature).unwrap().1
  }

  #[test]
  fn catalog_is_indexed_by_feature() {
    for feature in Feature::ALL {
      assert_eq!(feature.patch().feature, feature);
      feature.patch().pattern().unwrap();
    }
  }

  #[test]
  fn payloads_fit_their_caves() {
    for entry in CATALOG.iter() {
      if let PatchKind::Trampoline {
        consumed,
        cave_len,
        payload,
      } = &entry.kind
      {
        assert!(payload.len() + 5 <= *cave_len, "{}", entry.feature);
        assert!(*consumed >= 5);
        assert!(*consumed <= entry.pattern().unwrap().len());
      }
    }
  }

  #[test]
  fn feature_names_parse() {
    for feature in Feature::ALL {
      assert_eq!(feature.to_string().parse::<Feature>().unwrap(), feature);
    }
    assert_eq!("Zoom-Limit".parse::<Feature>().unwrap(), Feature::ZoomLimit);
    assert!("fog".parse::<Feature>().is_err());
  }

  #[test]
  fn every_feature_applies() {
    let (mut buf, sites) = synthetic_image();
    let report = apply_features(&mut buf, &Feature::ALL);
    assert!(report.is_complete(), "{:?}", report.skipped);
    assert_eq!(report.applied.len(), 5);

    let multi = site_of(&sites, Feature::MultiClient);
    assert_eq!(buf[multi + 11], 0xEB);

    let ambient = site_of(&sites, Feature::AmbientLight);
    assert_eq!(&buf[ambient + 6..ambient + 10], &1.0f32.to_le_bytes());

    let sun = site_of(&sites, Feature::SunLight);
    assert_eq!(&buf[sun + 3..sun + 7], &1.0f32.to_le_bytes());

    let ground = site_of(&sites, Feature::GroundOffset);
    assert_eq!(buf[ground + 2], 0x00);

    let zoom = site_of(&sites, Feature::ZoomLimit);
    assert_eq!(buf[zoom], 0xE9);
    let go = i32::from_le_bytes(buf[zoom + 1..zoom + 5].try_into().unwrap());
    assert_eq!(zoom as i64 + 5 + go as i64, 0x300);
    assert_eq!(&buf[0x303..0x307], &100.0f32.to_le_bytes());
    assert_eq!(&buf[0x30A..0x30E], &1.0f32.to_le_bytes());
  }

  #[test]
  fn subsets_only_touch_their_own_bytes() {
    let subsets: [&[Feature]; 4] = [
      &[Feature::MultiClient],
      &[Feature::ZoomLimit, Feature::SunLight],
      &[Feature::GroundOffset, Feature::AmbientLight, Feature::MultiClient],
      &[Feature::SunLight, Feature::ZoomLimit, Feature::GroundOffset],
    ];

    for subset in subsets {
      let (original, sites) = synthetic_image();
      let mut buf = original.clone();
      let report = apply_features(&mut buf, subset);
      assert!(report.is_complete());

      let mut owned = Vec::new();
      for applied in &report.applied {
        let len = applied.feature.patch().pattern().unwrap().len();
        assert_eq!(applied.site, site_of(&sites, applied.feature));
        owned.push(applied.site..applied.site + len);
        if let Some(cave) = applied.cave {
          owned.push(cave..cave + CAVE_LEN);
        }
      }

      for (i, (a, b)) in original.iter().zip(buf.iter()).enumerate() {
        if a != b {
          assert!(
            owned.iter().any(|r| r.contains(&i)),
            "{subset:?} changed byte {i:#x}"
          );
        }
      }
    }
  }

  #[test]
  fn order_does_not_matter() {
    let (mut forward, _) = synthetic_image();
    let mut reverse = forward.clone();
    apply_features(&mut forward, &Feature::ALL);
    let mut features = Feature::ALL;
    features.reverse();
    apply_features(&mut reverse, &features);
    assert_eq!(forward, reverse);
  }

  #[test]
  fn missing_signatures_are_skipped() {
    let mut buf = vec![0xCC; 0x100];
    let ambient = materialize(Feature::AmbientLight.patch().signature);
    buf[0x10..0x10 + ambient.len()].copy_from_slice(&ambient);

    let report = apply_features(&mut buf, &[Feature::ZoomLimit, Feature::AmbientLight]);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].feature, Feature::AmbientLight);
    assert_eq!(
      report.skipped,
      vec![(Feature::ZoomLimit, PatchError::SignatureNotFound)]
    );
  }

  #[test]
  fn zoom_without_cave_is_untouched() {
    let (mut buf, _) = synthetic_image();
    buf[0x300..0x340].fill(0xCC);
    let before = buf.clone();
    let err = Feature::ZoomLimit.patch().apply(&mut buf).unwrap_err();
    assert!(matches!(err, PatchError::CaveNotFound { length: CAVE_LEN, .. }));
    assert_eq!(buf, before);
  }

  #[test]
  fn second_application_finds_nothing() {
    let (mut buf, _) = synthetic_image();
    Feature::MultiClient.patch().apply(&mut buf).unwrap();
    assert_eq!(
      Feature::MultiClient.patch().apply(&mut buf).unwrap_err(),
      PatchError::SignatureNotFound
    );
  }
}
