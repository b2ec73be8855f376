use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use threadpool::ThreadPool;
use walkdir::{DirEntry, WalkDir};

use crate::cancel::Cancellation;
use crate::error::DedupeError;
use crate::fingerprint::Fingerprint;
use crate::hasher::HashingStrategy;
use crate::store::FingerprintStore;


#[derive(Clone, Debug)]
pub struct PopulateOptions {
	//Maximum number of images decoded at the same time
	pub group_size: usize,
	pub recursive: bool,
}

impl Default for PopulateOptions {
	fn default() -> Self {
		PopulateOptions { group_size: 4, recursive: false }
	}
}

#[derive(Debug)]
pub struct SkippedFile {
	pub path: PathBuf,
	pub reason: String,
}

#[derive(Debug, Default)]
pub struct PopulateReport {
	pub examined: usize,
	pub inserted: usize,
	pub skipped: Vec<SkippedFile>,
	pub cancelled: bool,
}

//Filter out invisible files and directories, which includes the database itself
fn is_hidden( entry: &DirEntry ) -> bool {
	entry.depth() > 0 && entry.file_name()
		.to_str()
		.map(|s| s.starts_with("."))
		.unwrap_or(false)
}

/// Every file in the store's directory that has no entry yet, sorted by path.
pub fn list_uncached_files( store: &FingerprintStore, recursive: bool ) -> Result<Vec<PathBuf>, DedupeError> {
	let dir = store.directory();
	if !dir.is_dir() {
		return Err( DedupeError::io( dir, std::io::Error::new( std::io::ErrorKind::NotFound, "not a directory" ) ) );
	}

	let max_depth = if recursive { usize::MAX } else { 1 };
	let mut files = Vec::new();

	for entry in WalkDir::new( dir ).min_depth( 1 ).max_depth( max_depth ).into_iter().filter_entry(|e| !is_hidden(e)) {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				warn!("Error reading directory entry: {}", e);
				continue;
			}
		};

		if !entry.file_type().is_file() {
			continue;
		}

		if store.contains( &store.key_for( entry.path() ) ) {
			continue;
		}

		files.push( entry.into_path() );
	}

	files.sort();
	Ok( files )
}

fn hash_file( path: &Path, hasher: &dyn HashingStrategy ) -> Result<Fingerprint, DedupeError> {
	let file = File::open( path ).map_err(|e| DedupeError::io( path, e ))?;
	let mut reader = BufReader::new( file );
	hasher.hash( &mut reader )
}

/// Fingerprint every uncached file in the store's directory.
///
/// Files are hashed in sequential groups of `group_size`. Each group runs on
/// the worker pool and is awaited before the next is launched, so no more than
/// `group_size` images are ever decoded at once. Files that can't be read or
/// decoded are logged and skipped. Cancellation stops new work from being
/// launched; entries already inserted are kept.
pub fn cache_populate( store: &Arc<FingerprintStore>, hasher: &Arc<dyn HashingStrategy>, options: &PopulateOptions,
					   cancel: &Cancellation, progress: &ProgressBar ) -> Result<PopulateReport, DedupeError> {

	if options.group_size < 1 {
		return Err( DedupeError::InvalidConfig( "concurrency group size must be greater than 0".to_string() ) );
	}
	if hasher.thumbnail_size() != store.thumbnail_size() {
		return Err( DedupeError::InvalidConfig( format!("hasher thumbnail size {} does not match store thumbnail size {}",
			hasher.thumbnail_size(), store.thumbnail_size()) ) );
	}

	let files = list_uncached_files( store, options.recursive )?;
	let mut report = PopulateReport::default();

	if files.is_empty() {
		info!("No uncached images in {}", store.directory().display());
		return Ok( report );
	}

	info!("Fingerprinting {} files in {} using the {} hasher, {} at a time",
		files.len(), store.directory().display(), hasher.name(), options.group_size);

	progress.set_length( files.len() as u64 );
	let pool = ThreadPool::new( options.group_size.min( files.len() ) );

	for group in files.chunks( options.group_size ) {
		if cancel.is_cancelled() {
			report.cancelled = true;
			break;
		}

		let (tx, rx) = channel();
		for path in group {
			if cancel.is_cancelled() {
				report.cancelled = true;
				break;
			}

			let tx = tx.clone();
			let path = path.clone();
			let store = Arc::clone( store );
			let hasher = Arc::clone( hasher );
			pool.execute( move || {
				store.record_searched();
				//A decoder that panics on a hostile file is reported like any other decode failure
				let result = panic::catch_unwind( AssertUnwindSafe(|| {
					hash_file( &path, hasher.as_ref() )
						.and_then(|fp| store.try_insert( store.key_for( &path ), fp ))
				}))
				.unwrap_or_else(|_| Err( DedupeError::Decode( "decoder panicked".to_string() ) ));
				//The receiver outlives every job in the group
				let _ = tx.send( (path, result) );
			});
		}
		drop(tx);

		//Wait for the whole group before starting the next
		for (path, result) in rx.iter() {
			report.examined += 1;
			match result {
				Ok(true) => {
					debug!("Cached {}", path.display());
					report.inserted += 1;
				},
				Ok(false) => {
					debug!("Already cached {}", path.display());
				},
				Err(e) => {
					//Store the errors to log later, as printing them live disrupts the progress bar
					report.skipped.push( SkippedFile { path, reason: e.to_string() } );
				}
			}
			progress.inc(1);
		}
	}
	progress.finish();

	for skipped in &report.skipped {
		warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
	}

	if report.cancelled {
		warn!("Cache population cancelled after {} of {} files", report.examined, files.len());
	}
	info!("Cached {} new images, skipped {}", report.inserted, report.skipped.len());

	Ok( report )
}
