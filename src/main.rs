use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use crc_patcher::{
  Feature, ReverseCrc, SuffixKind, apply_features, assemble,
  catalog::{CATALOG, PatchKind},
  checksum::{crc32, crc32_extend, request_patch},
  manifest::parse_checksum,
};
use time::{UtcOffset, macros::format_description};
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::time::OffsetTime;

mod config;
mod output;
mod relay;

use config::Config;
use relay::Relay;

#[derive(Parser, Debug)]
#[command(
  name = "crc-patcher",
  version,
  about = "Signature patcher and CRC-32 forcer for client files"
)]
struct Cli {
  /// Config file
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
  /// Log at debug level
  #[arg(short, long)]
  verbose: bool,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Patch the client executable and force its checksum to the manifest value
  Patch {
    /// Local executable; downloaded from `binary_url` when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Comma separated features, replaces the list from the config
    #[arg(short, long, value_delimiter = ',')]
    features: Vec<Feature>,
    #[arg(long)]
    suffix: Option<SuffixKind>,
    /// Hex checksum to force instead of the manifest value
    #[arg(long)]
    target: Option<String>,
  },
  /// Force a local asset's checksum to its manifest entry
  Asset {
    input: PathBuf,
    /// Asset path as listed in the manifest, defaults to the file name
    #[arg(long)]
    name: Option<String>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    suffix: Option<SuffixKind>,
    #[arg(long)]
    target: Option<String>,
  },
  /// Print the suffixes that move checksum `start` to `wanted`
  Generate { start: String, wanted: String },
  /// List the signature catalog
  Features,
}

/// Where the target checksum comes from when none is given explicitly.
enum Lookup<'a> {
  Binary,
  Asset(&'a str),
}

async fn resolve_target(
  cfg: &Config,
  relay: &Relay,
  explicit: Option<&str>,
  lookup: Lookup<'_>,
) -> Result<u32> {
  if let Some(text) = explicit.or(cfg.target_checksum.as_deref()) {
    return Ok(parse_checksum(text)?);
  }
  if cfg.manifest_url.is_empty() {
    return Err(anyhow!(
      "No target checksum: pass --target or set target_checksum or manifest_url"
    ));
  }

  let manifest = relay.fetch_manifest(&cfg.manifest_url).await?;
  let target = match lookup {
    Lookup::Binary => manifest.binary_checksum()?,
    Lookup::Asset(name) => manifest
      .file_checksum(name)
      .ok_or_else(|| anyhow!("{} is not listed in the manifest", name))??,
  };
  info!(checksum = format!("{:#010x}", target), "Target checksum");
  Ok(target)
}

fn file_name(path: &Path) -> Result<String> {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .map(str::to_string)
    .with_context(|| format!("{} has no file name", path.display()))
}

async fn read_local(path: &Path) -> Result<Vec<u8>> {
  info!(path = %path.display(), "Reading input");
  tokio::fs::read(path)
    .await
    .with_context(|| format!("Failed to read {}", path.display()))
}

async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .context("Failed to create output directory")?;
  }
  tokio::fs::write(path, data)
    .await
    .with_context(|| format!("Failed to write {}", path.display()))?;
  info!(
    path = %path.display(),
    checksum = format!("{:#010x}", crc32(data)),
    "Wrote patched file"
  );
  Ok(())
}

async fn run_patch(
  cfg: &Config,
  input: Option<PathBuf>,
  output_path: Option<PathBuf>,
  features: Vec<Feature>,
  suffix: Option<SuffixKind>,
  target: Option<String>,
) -> Result<()> {
  let relay = Relay::new(&cfg.relay);

  let (mut buffer, name) = match input {
    Some(path) => (read_local(&path).await?, file_name(&path)?),
    None => {
      if cfg.binary_url.is_empty() {
        return Err(anyhow!("No input: pass --input or set binary_url"));
      }
      let name = output::file_name_from_url(&cfg.binary_url)
        .unwrap_or("client.exe")
        .to_string();
      (relay.fetch_bytes(&cfg.binary_url).await?, name)
    },
  };

  let target = resolve_target(cfg, &relay, target.as_deref(), Lookup::Binary).await?;

  let features = if features.is_empty() {
    cfg.features.clone()
  } else {
    features
  };
  info!(?features, "Applying signature patches");
  let report = apply_features(&mut buffer, &features);
  if !report.is_complete() {
    warn!(
      applied = report.applied.len(),
      skipped = report.skipped.len(),
      "Some patches were skipped"
    );
  }

  let suffix = suffix.unwrap_or(cfg.suffix);
  let patched = assemble(buffer, target, suffix, &ReverseCrc).context("Could not force checksum")?;

  let path = output_path.unwrap_or_else(|| {
    Path::new(&cfg.output_directory).join(output::patched_file_name(&name))
  });
  write_output(&path, &patched).await
}

async fn run_asset(
  cfg: &Config,
  input: PathBuf,
  name: Option<String>,
  output_path: Option<PathBuf>,
  suffix: Option<SuffixKind>,
  target: Option<String>,
) -> Result<()> {
  let relay = Relay::new(&cfg.relay);
  let file = file_name(&input)?;
  let asset = name.unwrap_or_else(|| file.clone());

  let buffer = read_local(&input).await?;
  let target = resolve_target(cfg, &relay, target.as_deref(), Lookup::Asset(&asset)).await?;

  let suffix = suffix.unwrap_or(cfg.suffix);
  let patched = assemble(buffer, target, suffix, &ReverseCrc).context("Could not force checksum")?;

  let path = output_path.unwrap_or_else(|| {
    Path::new(&cfg.output_directory).join(output::patched_file_name(&file))
  });
  write_output(&path, &patched).await
}

fn run_generate(start: &str, wanted: &str) -> Result<()> {
  let start = parse_checksum(start)?;
  let wanted = parse_checksum(wanted)?;

  for kind in [SuffixKind::Binary, SuffixKind::Ascii] {
    match request_patch(&ReverseCrc, kind, start, wanted) {
      Ok(patch) => {
        let status = if crc32_extend(start, patch.bytes()) == wanted {
          "OK"
        } else {
          "FAIL"
        };
        info!(
          initial = format!("{:#010x}", start),
          target = format!("{:#010x}", wanted),
          status,
          %kind,
          suffix = %patch,
          "Generated suffix"
        );
      },
      Err(error) => warn!(%kind, %error, status = "FAIL", "No suffix"),
    }
  }

  Ok(())
}

fn run_features() {
  for entry in CATALOG.iter() {
    let kind = match entry.kind {
      PatchKind::Overwrite(_) => "overwrite",
      PatchKind::Trampoline { .. } => "trampoline",
    };
    info!(
      feature = %entry.feature,
      kind,
      signature = entry.signature,
      "Catalog entry"
    );
  }
}

async fn run(cli: Cli) -> Result<()> {
  let load = |path: &Path| -> Result<Config> {
    info!(path = %path.display(), "Loading config");
    config::load(path)
  };

  match cli.command {
    Command::Patch {
      input,
      output,
      features,
      suffix,
      target,
    } => {
      let cfg = load(&cli.config)?;
      run_patch(&cfg, input, output, features, suffix, target).await
    },
    Command::Asset {
      input,
      name,
      output,
      suffix,
      target,
    } => {
      let cfg = load(&cli.config)?;
      run_asset(&cfg, input, name, output, suffix, target).await
    },
    Command::Generate { start, wanted } => run_generate(&start, &wanted),
    Command::Features => {
      run_features();
      Ok(())
    },
  }
}

fn init_tracing(verbose: bool) {
  let timer_format = format_description!("[year]-[month]-[day] [hour]:[minute]");
  let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

  let timer = OffsetTime::new(local_offset, timer_format);

  tracing_subscriber::fmt()
    .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
    .with_writer(std::io::stdout) // forces flush after every write
    .with_target(false)
    .with_timer(timer)
    .compact()
    .init();
}

#[cfg(windows)]
pub fn enable_ansi_support() -> Result<()> {
  use windows::Win32::{
    Foundation::HANDLE,
    System::Console::{
      CONSOLE_MODE, ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle,
      STD_OUTPUT_HANDLE, SetConsoleMode,
    },
  };

  unsafe {
    let handle: HANDLE = GetStdHandle(STD_OUTPUT_HANDLE)?;

    let mut mode = CONSOLE_MODE::default();
    GetConsoleMode(handle, &mut mode)?;
    SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)?;

    Ok(())
  }
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();

  // Plain output is fine when the console refuses VT mode.
  #[cfg(windows)]
  let _ = enable_ansi_support();

  init_tracing(cli.verbose);

  match run(cli).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    },
  }
}
