use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};

use imagecache::{build_hasher, find_duplicate_groups, similarity, Cancellation, ConfigOptions, DedupeEngine,
				 Fingerprint, GroupingPolicy, HasherKind, HashingStrategy, SurvivorPolicy};


#[derive(Parser)]
#[command(
	version,
	about = "Perceptual duplicate remover for folders of downloaded images",
	long_about = "Keeps a fingerprint cache inside a download folder and removes images that are visual duplicates of each other"
)]
struct Args {
	/// Log level (off, error, warn, info, debug, trace)
	#[arg(short, long, default_value = "info", global = true)]
	log_level: LevelFilter,

	/// Side length of the thumbnail fingerprints are made from. Must match any existing cache.
	#[arg(long, default_value_t = ConfigOptions::DEFAULT_THUMBNAIL_SIZE, global = true)]
	thumbnail_size: u32,

	/// Image hashing backend
	#[arg(long, value_enum, default_value_t = HasherArg::Resize, global = true)]
	hasher: HasherArg,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Fingerprint every image in a folder not already in its cache, then save the cache
	Populate {
		/// Destination folder
		dir: PathBuf,

		/// Number of images decoded at the same time
		#[arg(short, long, default_value_t = ConfigOptions::DEFAULT_GROUP_SIZE)]
		threads: usize,

		/// Also fingerprint images in subfolders
		#[arg(short, long)]
		recursive: bool,

		/// Drop cache entries whose file no longer exists
		#[arg(long)]
		prune: bool,
	},

	/// Delete all but the best copy of each group of duplicate images in a folder
	Dedupe {
		/// Destination folder
		dir: PathBuf,

		/// Similarity percentage at or above which images are duplicates (0 - 100)
		#[arg(short, long, default_value_t = ConfigOptions::DEFAULT_PERCENT_FOR_MATCH)]
		percent: f64,

		/// Number of images decoded at the same time when populating
		#[arg(short, long, default_value_t = ConfigOptions::DEFAULT_GROUP_SIZE)]
		threads: usize,

		/// Also fingerprint images in subfolders
		#[arg(short, long)]
		recursive: bool,

		/// Fingerprint uncached images before searching for duplicates
		#[arg(long)]
		populate: bool,

		/// List the duplicates without deleting anything
		#[arg(short = 'n', long)]
		dry_run: bool,

		/// How matching pairs are grouped
		#[arg(long, value_enum, default_value_t = GroupingArg::Transitive)]
		grouping: GroupingArg,

		/// Which image of a group is kept
		#[arg(long, value_enum, default_value_t = SurvivorArg::Largest)]
		survivor: SurvivorArg,
	},

	/// Compare two images and explain whether they are duplicates
	Compare {
		first: PathBuf,
		second: PathBuf,

		/// Similarity percentage at or above which images are duplicates (0 - 100)
		#[arg(short, long, default_value_t = ConfigOptions::DEFAULT_PERCENT_FOR_MATCH)]
		percent: f64,
	},
}

#[derive(Clone, Copy, ValueEnum)]
enum HasherArg {
	/// Gaussian resize, slower but smoother
	Resize,
	/// Box sampled thumbnail, faster on large images
	Thumbnail,
}

#[derive(Clone, Copy, ValueEnum)]
enum GroupingArg {
	Transitive,
	Representative,
}

#[derive(Clone, Copy, ValueEnum)]
enum SurvivorArg {
	/// Keep the largest file
	Largest,
	/// Keep the first file name
	Name,
}

fn main() -> anyhow::Result<()> {

	let args = Args::parse();

	env_logger::builder()
		.filter_level( args.log_level )
		.format_timestamp_secs()
		.init();

	let config = set_config_options( &args ).map_err(|e| anyhow!(e))?;

	let cancel = Cancellation::new();
	let handler_cancel = cancel.clone();
	ctrlc::set_handler( move || {
		handler_cancel.cancel();
		eprintln!("\nInterrupted by user, finishing current work...");
	})
	.context("Failed to set signal handler")?;

	match &args.command {
		Command::Populate { dir, prune, .. } => populate_mode( dir, *prune, &config, &cancel ),
		Command::Dedupe { dir, populate, dry_run, .. } => dedupe_mode( dir, *populate, *dry_run, &config, &cancel ),
		Command::Compare { first, second, .. } => compare_mode( first, second, &config ),
	}
}

//Map the command line onto the engine configuration
fn set_config_options( args: &Args ) -> Result<ConfigOptions, String> {

	let mut config = ConfigOptions {
		thumbnail_size: args.thumbnail_size,
		hasher: match args.hasher {
			HasherArg::Resize => HasherKind::Resize,
			HasherArg::Thumbnail => HasherKind::Thumbnail,
		},
		..ConfigOptions::default()
	};

	match &args.command {
		Command::Populate { threads, recursive, .. } => {
			config.group_size = *threads;
			config.recursive = *recursive;
		},
		Command::Dedupe { percent, threads, recursive, grouping, survivor, .. } => {
			config.percent_for_match = *percent;
			config.group_size = *threads;
			config.recursive = *recursive;
			config.grouping = match grouping {
				GroupingArg::Transitive => GroupingPolicy::Transitive,
				GroupingArg::Representative => GroupingPolicy::Representative,
			};
			config.survivor = match survivor {
				SurvivorArg::Largest => SurvivorPolicy::LargestFile,
				SurvivorArg::Name => SurvivorPolicy::SmallestKey,
			};
		},
		Command::Compare { percent, .. } => {
			config.percent_for_match = *percent;
		},
	}

	config.validate()?;
	Ok( config )
}

fn open_engine( dir: &Path, config: &ConfigOptions ) -> anyhow::Result<DedupeEngine> {
	let hasher = build_hasher( config.hasher, config.thumbnail_size );
	DedupeEngine::open( dir, hasher )
		.with_context(|| format!("Failed to load the fingerprint cache for {}", dir.display()))
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
	let progress = ProgressBar::new(0);
	progress.set_style(
		ProgressStyle::with_template("{bar:40.green/yellow} {pos:>7}/{len:7} {percent:>3}% {msg}")
			.context("Invalid progress bar template")?,
	);
	progress.set_message("Fingerprinting images...");
	Ok( progress )
}

fn run_populate( engine: &DedupeEngine, config: &ConfigOptions, cancel: &Cancellation ) -> anyhow::Result<()> {
	let progress = progress_bar()?;
	let report = engine.populate( &config.populate_options(), cancel, &progress )?;

	for skipped in &report.skipped {
		eprintln!("Skipped: {} ({})", skipped.path.display(), skipped.reason);
	}
	Ok(())
}

fn populate_mode( dir: &Path, prune: bool, config: &ConfigOptions, cancel: &Cancellation ) -> anyhow::Result<()> {
	let engine = open_engine( dir, config )?;

	if prune {
		let pruned = engine.store().prune_missing();
		info!("Pruned {} cache entries for missing files", pruned.len());
	}

	//Whatever was fingerprinted before an interrupt is still worth keeping
	let result = run_populate( &engine, config, cancel );
	engine.save()?;
	result?;

	eprintln!("Cached Images: {} Examined: {}", engine.store().stored_images(), engine.store().images_searched());
	Ok(())
}

fn dedupe_mode( dir: &Path, populate: bool, dry_run: bool, config: &ConfigOptions, cancel: &Cancellation ) -> anyhow::Result<()> {
	let engine = open_engine( dir, config )?;

	if populate {
		let result = run_populate( &engine, config, cancel );
		engine.save()?;
		result?;
	}

	if dry_run {
		match find_duplicate_groups( engine.store(), &config.resolve_options(), cancel )? {
			Some(groups) => {
				let mut num_dupe_images = 0;
				for group in &groups {
					println!("Best: {}", group[0]);
					for dupe in &group[1..] {
						println!("\tDuplicate: {}", dupe);
						num_dupe_images += 1;
					}
				}
				eprintln!("Duplicate Groups: {} Duplicates: {}", groups.len(), num_dupe_images);
			},
			None => eprintln!("Interrupted before the duplicate search finished"),
		}
		return Ok(());
	}

	let report = engine.delete_duplicates_with( &config.resolve_options(), cancel, |group| {
		println!("Kept: {}", group.survivor);
		for removed in &group.removed {
			println!("\tRemoved: {}", removed);
		}
		for (failed, reason) in &group.failed {
			println!("\tFailed to remove: {} ({})", failed, reason);
		}
	});
	//Deleted files are already gone, so the cache must be saved even if something failed
	engine.save()?;
	let report = report?;

	eprintln!("Duplicate Groups: {} Removed: {}", report.groups.len(), report.removed_count());
	Ok(())
}

fn hash_path( hasher: &dyn HashingStrategy, path: &Path ) -> anyhow::Result<Fingerprint> {
	let file = File::open( path ).with_context(|| format!("Failed to read image file: {}", path.display()))?;
	let fingerprint = hasher.hash( &mut BufReader::new( file ) )
		.with_context(|| format!("Failed to fingerprint {}", path.display()))?;
	Ok( fingerprint )
}

//Debug function to compare two images and print the similarity
fn compare_mode( first: &Path, second: &Path, config: &ConfigOptions ) -> anyhow::Result<()> {
	let hasher = build_hasher( config.hasher, config.thumbnail_size );
	let a = hash_path( hasher.as_ref(), first )?;
	let b = hash_path( hasher.as_ref(), second )?;

	let percent = similarity( &a, &b );
	eprintln!("Hasher: {} ({}x{})", hasher.name(), config.thumbnail_size, config.thumbnail_size);
	eprintln!("Similarity: {:.2}%", percent);
	eprintln!("Are both images duplicates?: {}", percent >= config.percent_for_match);
	Ok(())
}
