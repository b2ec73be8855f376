use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::ProgressBar;
use log::debug;

use crate::cancel::Cancellation;
use crate::compare::similarity;
use crate::error::DedupeError;
use crate::fingerprint::{sample_count, Fingerprint};
use crate::hasher::{HashingStrategy, ImageStream};
use crate::populate::{cache_populate, PopulateOptions, PopulateReport};
use crate::resolve::{delete_duplicates_with, DuplicateGroup, ResolveOptions, ResolveReport};
use crate::store::FingerprintStore;


/// Closest cached image found by [`DedupeEngine::find_similar`].
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarImage {
	pub key: String,
	pub similarity: f64,
}

/// A hashing strategy paired with the fingerprint store of one destination
/// directory. This is what the download pipeline talks to.
pub struct DedupeEngine {
	hasher: Arc<dyn HashingStrategy>,
	store: Arc<FingerprintStore>,
}

impl DedupeEngine {

	/// Load (or start) the store for `directory` sized for `hasher`.
	pub fn open( directory: impl Into<PathBuf>, hasher: Arc<dyn HashingStrategy> ) -> Result<DedupeEngine, DedupeError> {
		let store = FingerprintStore::open( directory, hasher.thumbnail_size() )?;
		DedupeEngine::with_store( Arc::new( store ), hasher )
	}

	pub fn with_store( store: Arc<FingerprintStore>, hasher: Arc<dyn HashingStrategy> ) -> Result<DedupeEngine, DedupeError> {
		if store.thumbnail_size() != hasher.thumbnail_size() {
			return Err( DedupeError::ThumbnailMismatch {
				expected: sample_count( store.thumbnail_size() ),
				found: sample_count( hasher.thumbnail_size() ),
			} );
		}
		Ok( DedupeEngine { hasher, store } )
	}

	pub fn hash( &self, stream: &mut dyn ImageStream ) -> Result<Fingerprint, DedupeError> {
		self.hasher.hash( stream )
	}

	/// Fingerprint a freshly retrieved image and cache it under its destination.
	///
	/// `Ok(false)` means the destination was already cached. A decode failure
	/// leaves the store untouched; its message is suitable for logging as is.
	pub fn try_insert_image( &self, stream: &mut dyn ImageStream, destination: &Path ) -> Result<bool, DedupeError> {
		self.store.record_searched();
		let fingerprint = self.hasher.hash( stream )?;
		let key = self.store.key_for( destination );
		let inserted = self.store.try_insert( key, fingerprint )?;
		debug!("{} {}", if inserted { "Cached" } else { "Already cached" }, destination.display());
		Ok( inserted )
	}

	/// Best cached match for an image at or above `percent_for_match`.
	pub fn find_similar( &self, stream: &mut dyn ImageStream, percent_for_match: f64 ) -> Result<Option<SimilarImage>, DedupeError> {
		self.store.record_searched();
		let fingerprint = self.hasher.hash( stream )?;
		Ok( self.find_similar_fingerprint( &fingerprint, percent_for_match ) )
	}

	pub fn find_similar_fingerprint( &self, fingerprint: &Fingerprint, percent_for_match: f64 ) -> Option<SimilarImage> {
		let mut best: Option<SimilarImage> = None;
		for (key, cached) in self.store.snapshot() {
			let score = similarity( fingerprint, &cached );
			if score < percent_for_match {
				continue;
			}
			//Snapshot is in key order, so the smallest key wins a tie
			if best.as_ref().map(|b| score > b.similarity).unwrap_or(true) {
				best = Some( SimilarImage { key, similarity: score } );
			}
		}
		best
	}

	pub fn populate( &self, options: &PopulateOptions, cancel: &Cancellation, progress: &ProgressBar ) -> Result<PopulateReport, DedupeError> {
		cache_populate( &self.store, &self.hasher, options, cancel, progress )
	}

	pub fn delete_duplicates( &self, options: &ResolveOptions, cancel: &Cancellation ) -> Result<ResolveReport, DedupeError> {
		delete_duplicates_with( &self.store, options, cancel, |_| {} )
	}

	//Reports each group as soon as its files are gone
	pub fn delete_duplicates_with<F>( &self, options: &ResolveOptions, cancel: &Cancellation, on_group: F ) -> Result<ResolveReport, DedupeError>
		where F: FnMut(&DuplicateGroup)
	{
		delete_duplicates_with( &self.store, options, cancel, on_group )
	}

	pub fn save( &self ) -> Result<(), DedupeError> {
		self.store.save()
	}

	pub fn store( &self ) -> &Arc<FingerprintStore> {
		&self.store
	}

	pub fn hasher( &self ) -> &Arc<dyn HashingStrategy> {
		&self.hasher
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hasher::{build_hasher, HasherKind};
	use crate::test_support::{solid_jpeg, solid_png, write_file, BLUE, RED, WHITE};
	use std::io::Cursor;
	use tempfile::tempdir;

	fn engine( dir: &Path ) -> DedupeEngine {
		DedupeEngine::open( dir, build_hasher( HasherKind::Resize, 16 ) ).unwrap()
	}

	#[test]
	fn test_try_insert_image() {
		let dir = tempdir().unwrap();
		let engine = engine( dir.path() );
		let png = solid_png( 64, 64, RED );
		let dest = dir.path().join( "red.png" );

		assert!( engine.try_insert_image( &mut Cursor::new( &png ), &dest ).unwrap() );
		assert!( !engine.try_insert_image( &mut Cursor::new( &png ), &dest ).unwrap() );
		assert!( engine.store().contains( "red.png" ) );
		assert_eq!( engine.store().stored_images(), 1 );
		assert_eq!( engine.store().images_searched(), 2 );
	}

	#[test]
	fn test_decode_failure_leaves_no_entry() {
		let dir = tempdir().unwrap();
		let engine = engine( dir.path() );
		let err = engine.try_insert_image( &mut Cursor::new( b"<html>not found</html>" ), &dir.path().join( "x.jpg" ) ).unwrap_err();

		assert!( matches!( err, DedupeError::Decode(_) ) );
		assert!( err.to_string().starts_with( "failed to decode image" ) );
		assert_eq!( engine.store().stored_images(), 0 );
	}

	#[test]
	fn test_find_similar() {
		let dir = tempdir().unwrap();
		let engine = engine( dir.path() );
		engine.try_insert_image( &mut Cursor::new( solid_png( 64, 64, RED ) ), &dir.path().join( "red.png" ) ).unwrap();
		engine.try_insert_image( &mut Cursor::new( solid_png( 64, 64, WHITE ) ), &dir.path().join( "white.png" ) ).unwrap();

		let found = engine.find_similar( &mut Cursor::new( solid_jpeg( 200, 100, RED, 90 ) ), 95.0 ).unwrap();
		assert_eq!( found.map(|m| m.key), Some( "red.png".to_string() ) );

		let found = engine.find_similar( &mut Cursor::new( solid_png( 64, 64, BLUE ) ), 90.0 ).unwrap();
		assert_eq!( found, None );
	}

	#[test]
	fn test_populate_resolve_and_reload() {
		let dir = tempdir().unwrap();
		write_file( dir.path(), "red_large.png", &solid_png( 128, 128, RED ) );
		write_file( dir.path(), "red_small.png", &solid_png( 32, 32, RED ) );
		write_file( dir.path(), "red.jpg", &solid_jpeg( 64, 64, RED, 90 ) );
		write_file( dir.path(), "blue.png", &solid_png( 64, 64, BLUE ) );

		let engine = engine( dir.path() );
		let report = engine.populate( &PopulateOptions::default(), &Cancellation::new(), &ProgressBar::hidden() ).unwrap();
		assert_eq!( report.inserted, 4 );

		let options = ResolveOptions { percent_for_match: 90.0, ..ResolveOptions::default() };
		let report = engine.delete_duplicates( &options, &Cancellation::new() ).unwrap();
		assert_eq!( report.removed_count(), 2, "Two of the three red images are deleted" );
		assert!( dir.path().join( "blue.png" ).exists() );
		assert_eq!( engine.store().stored_images(), 2 );
		engine.save().unwrap();

		let reopened = DedupeEngine::open( dir.path(), build_hasher( HasherKind::Resize, 16 ) ).unwrap();
		assert_eq!( reopened.store().snapshot(), engine.store().snapshot() );
	}

	#[test]
	fn test_mismatched_thumbnail_size() {
		let dir = tempdir().unwrap();
		let store = Arc::new( FingerprintStore::new( dir.path(), 32 ) );
		assert!( DedupeEngine::with_store( store, build_hasher( HasherKind::Thumbnail, 16 ) ).is_err() );
	}

	#[test]
	fn test_insert_then_populate_with_different_spellings() {
		let dir = tempdir().unwrap();
		std::fs::create_dir( dir.path().join( "dl" ) ).unwrap();
		let dest = write_file( &dir.path().join( "dl" ), "red.png", &solid_png( 64, 64, RED ) );

		//Engine opened through a dotted path, image reported by its plain path
		let engine = engine( &dir.path().join( "." ).join( "dl" ) );
		assert!( engine.try_insert_image( &mut Cursor::new( solid_png( 64, 64, RED ) ), &dest ).unwrap() );

		let report = engine.populate( &PopulateOptions::default(), &Cancellation::new(), &ProgressBar::hidden() ).unwrap();
		assert_eq!( report.examined, 0, "The file is already cached" );
		assert_eq!( engine.store().snapshot().into_iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![ "red.png".to_string() ] );

		let report = engine.delete_duplicates( &ResolveOptions::default(), &Cancellation::new() ).unwrap();
		assert_eq!( report.removed_count(), 0 );
		assert!( dest.exists() );
	}
}
