use anyhow::{Context, Result};
use crc_patcher::manifest::Manifest;
use reqwest::Client;
use tracing::info;

/// Fetches remote files, optionally through a relay prefix.
pub struct Relay {
  client: Client,
  prefix: String,
}

impl Relay {
  pub fn new(prefix: &str) -> Self {
    Self {
      client: Client::new(),
      prefix: prefix.to_string(),
    }
  }

  pub fn url(&self, url: &str) -> String {
    format!("{}{}", self.prefix, url)
  }

  pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
    let full = self.url(url);
    info!(url = full.as_str(), "Downloading");
    let bytes = self
      .client
      .get(&full)
      .send()
      .await?
      .error_for_status()?
      .bytes()
      .await
      .with_context(|| format!("Failed to read body of {}", full))?;
    info!(len = bytes.len(), "Downloaded");
    Ok(bytes.to_vec())
  }

  pub async fn fetch_manifest(&self, url: &str) -> Result<Manifest> {
    let full = self.url(url);
    info!(url = full.as_str(), "Fetching checksum manifest");
    let manifest = self
      .client
      .get(&full)
      .send()
      .await?
      .error_for_status()?
      .json::<Manifest>()
      .await
      .with_context(|| format!("Could not parse manifest from {}", full))?;
    Ok(manifest)
  }
}
