use std::{fs, io, path::Path};

use anyhow::{Context, Result};
use crc_patcher::{Feature, SuffixKind};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Prefix put in front of every remote URL.
  pub relay: String,
  pub binary_url: String,
  pub manifest_url: String,
  pub output_directory: String,
  pub features: Vec<Feature>,
  pub suffix: SuffixKind,
  /// Hex checksum used instead of the manifest value.
  pub target_checksum: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      relay: String::new(),
      binary_url: String::new(),
      manifest_url: String::new(),
      output_directory: "output".to_string(),
      features: Vec::new(),
      suffix: SuffixKind::Ascii,
      target_checksum: None,
    }
  }
}

pub fn parse(toml_str: &str) -> Result<Config> {
  toml::from_str(toml_str).context("Could not parse config")
}

pub fn load(path: impl AsRef<Path>) -> Result<Config> {
  let toml_str = match fs::read_to_string(path.as_ref()) {
    Ok(content) => content,
    Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
    Err(error) => {
      return Err(error).with_context(|| format!("Could not read {}", path.as_ref().display()));
    },
  };

  parse(&toml_str)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let cfg = load("definitely/not/here/config.toml").unwrap();
    assert_eq!(cfg.output_directory, "output");
    assert!(cfg.features.is_empty());
    assert_eq!(cfg.suffix, SuffixKind::Ascii);
  }

  #[test]
  fn parses_all_fields() {
    let cfg = parse(
      r#"
        relay = "https://relay.example/?url="
        binary_url = "https://cdn.example/client/Client.exe"
        manifest_url = "https://cdn.example/client/manifest.json"
        output_directory = "out"
        features = ["multi_client", "zoom_limit"]
        suffix = "binary"
        target_checksum = "0x44f2b129"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.relay, "https://relay.example/?url=");
    assert_eq!(cfg.features, vec![Feature::MultiClient, Feature::ZoomLimit]);
    assert_eq!(cfg.suffix, SuffixKind::Binary);
    assert_eq!(cfg.target_checksum.as_deref(), Some("0x44f2b129"));
  }

  #[test]
  fn partial_config_keeps_defaults() {
    let cfg = parse(r#"features = ["sun_light"]"#).unwrap();
    assert_eq!(cfg.output_directory, "output");
    assert_eq!(cfg.features, vec![Feature::SunLight]);
  }

  #[test]
  fn unknown_feature_is_rejected() {
    assert!(parse(r#"features = ["fog"]"#).is_err());
  }
}
