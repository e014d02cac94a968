mod package;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use vod::PackagerConfig;
use vod::cenc::DrmInfo;

#[derive(Parser)]
#[command(name = "vod", about = "Offline VOD packager: MP4 in, HDS/HLS segments out")]
pub struct Cli {
	/// Source MP4 file; the moov box must be locatable in it.
	#[arg(long, short)]
	input: PathBuf,

	/// Directory the segments and manifests are written to.
	#[arg(long, short, default_value = "out")]
	output: PathBuf,

	/// Target segment duration in milliseconds.
	#[arg(long, default_value_t = 10_000)]
	segment_duration: u32,

	/// File name prefix for fragments.
	#[arg(long, default_value = "frag")]
	prefix: String,

	/// 16-byte AES key, hex encoded; enables CENC for fmp4 output.
	#[arg(long)]
	key: Option<String>,

	/// 16-byte base IV, hex encoded.
	#[arg(long)]
	iv: Option<String>,

	/// 16-byte key id, hex encoded.
	#[arg(long)]
	kid: Option<String>,

	#[command(subcommand)]
	format: Format,
}

#[derive(Subcommand, Clone, Copy)]
pub enum Format {
	/// HDS: F4F fragments, bootstrap and F4M manifest.
	Hds,
	/// HLS: the index playlist (TS segment muxing is external).
	Hls,
	/// Fragmented MP4 segments, CENC-encrypted when a key is given.
	Fmp4,
}

fn parse_hex16(value: &str, what: &str) -> anyhow::Result<[u8; 16]> {
	let bytes = hex::decode(value).with_context(|| format!("{what} is not valid hex"))?;
	bytes.as_slice().try_into().with_context(|| format!("{what} must be 16 bytes"))
}

fn drm_info(cli: &Cli) -> anyhow::Result<Option<DrmInfo>> {
	let Some(key) = &cli.key else {
		return Ok(None);
	};

	let iv = cli.iv.as_deref().context("--iv is required with --key")?;
	let kid = cli.kid.as_deref().context("--kid is required with --key")?;

	Ok(Some(DrmInfo {
		key: parse_hex16(key, "--key")?,
		iv: parse_hex16(iv, "--iv")?,
		kid: parse_hex16(kid, "--kid")?,
		pssh: bytes::Bytes::new(),
	}))
}

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let cli = Cli::parse();

	let config = PackagerConfig {
		segment_duration_ms: cli.segment_duration,
		fragment_file_name_prefix: cli.prefix.clone(),
		encryption: drm_info(&cli)?,
		..PackagerConfig::default()
	};

	std::fs::create_dir_all(&cli.output)
		.with_context(|| format!("creating output directory {}", cli.output.display()))?;

	let source = std::fs::read(&cli.input)
		.with_context(|| format!("reading {}", cli.input.display()))?;
	tracing::info!(input = %cli.input.display(), size = source.len(), "source loaded");

	match cli.format {
		Format::Hds => package::package_hds(&config, &cli.output, source),
		Format::Hls => package::package_hls(&config, &cli.output, source),
		Format::Fmp4 => package::package_fmp4(&config, &cli.output, source),
	}
}
