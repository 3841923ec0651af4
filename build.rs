// build.rs
use std::io::Result;

fn main() -> Result<()> {
  if std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() == "windows" {
    let res = winresource::WindowsResource::new();
    res.compile()?;
  }

  Ok(())
}
