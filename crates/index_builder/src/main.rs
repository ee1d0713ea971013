//! Point cloud index builder.
//!
//! Reads a TOML build description, indexes the listed text point files with
//! `point_index`, and assembles distributed builds.
//!
//! ```text
//! index_builder build -c build.toml [--resume] [--max-files N]
//! index_builder merge -o /data/index
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use point_index::{merger, BuildConfig, Builder, Endpoint, LocalEndpoint, XyzExecutor};
use tracing_subscriber::EnvFilter;

/// Out-of-core point cloud indexer.
#[derive(Parser, Debug)]
#[command(name = "index_builder")]
#[command(about = "Builds and merges point cloud indexes")]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Insert the configured files and save the build.
	Build {
		/// Path to build configuration TOML file.
		#[arg(short, long)]
		config: PathBuf,

		/// Continue the build saved in the output directory.
		#[arg(long)]
		resume: bool,

		/// Stop after this many files (0 = all).
		#[arg(long, default_value_t = 0)]
		max_files: u64,
	},
	/// Combine every saved split and subset in an output directory.
	Merge {
		/// Output directory holding the build pieces.
		#[arg(short, long)]
		output: PathBuf,
	},
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	match Args::parse().command {
		Command::Build {
			config,
			resume,
			max_files,
		} => build(config, resume, max_files),
		Command::Merge { output } => merge(output),
	}
}

fn build(config_path: PathBuf, resume: bool, max_files: u64) -> Result<()> {
	println!("Loading config from: {}", config_path.display());
	let config = BuildConfig::load(&config_path)
		.with_context(|| format!("Failed to load config: {}", config_path.display()))?;
	let runtime = config
		.runtime(Arc::new(XyzExecutor))
		.with_context(|| format!("Failed to open output dir: {}", config.output.display()))?;

	tracing::info!(output = %config.output.display(), resume, max_files, "starting build");
	let builder = if resume {
		Builder::resume(runtime, config.subset.map(|s| s.id), 0).context("Failed to resume build")?
	} else {
		let params = config.params().context("Failed to list input files")?;
		println!("Indexing {} files", params.manifest.len());
		Builder::create(runtime, params).context("Failed to create build")?
	};

	let processed = builder.go(max_files).context("Insertion failed")?;
	builder.save().context("Failed to save build")?;

	let manifest = builder.manifest();
	let stats = manifest.point_stats();
	println!(
		"\nProcessed {} files: {} points inserted, {} out of bounds, {} duplicates",
		processed, stats.inserts, stats.out_of_bounds, stats.duplicates
	);
	if manifest.outstanding() > 0 {
		println!("{} files outstanding; rerun with --resume", manifest.outstanding());
	}
	for error in builder.errors() {
		tracing::warn!(%error, "file not inserted");
	}
	println!("Done! Output written to: {}", config.output.display());
	Ok(())
}

fn merge(output: PathBuf) -> Result<()> {
	let out: Arc<dyn Endpoint> = Arc::new(
		LocalEndpoint::new(output.clone())
			.with_context(|| format!("Failed to open output dir: {}", output.display()))?,
	);
	tracing::info!(output = %output.display(), "merging build pieces");
	let builder = merger::merge_all(out).context("Merge failed")?;
	println!(
		"Merged {} points from {} files",
		builder.registry().point_count(),
		builder.manifest().len()
	);
	println!("Done! Output written to: {}", output.display());
	Ok(())
}
