use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};
use tempfile::NamedTempFile;

use crate::error::DedupeError;
use crate::fingerprint::{sample_count, Fingerprint};


//Name of the database kept inside each destination directory
pub const DATABASE_FILE_NAME: &str = ".imagecache.db";

const DATABASE_MAGIC: &str = "imagecache";
const DATABASE_VERSION: u32 = 1;

/// Persisted index of fingerprints for one destination directory.
///
/// All methods take `&self`; the index sits behind a lock so hashing workers
/// can insert concurrently. Counters are per instance so several directories
/// can be handled in one process.
pub struct FingerprintStore {
	directory: PathBuf,
	database: PathBuf,
	thumbnail_size: u32,
	entries: RwLock<HashMap<String, Fingerprint>>,
	images_searched: AtomicUsize,
	dirty: AtomicBool,
}

impl FingerprintStore {

	pub fn new( directory: impl Into<PathBuf>, thumbnail_size: u32 ) -> FingerprintStore {
		let directory = directory.into();
		let database = directory.join( DATABASE_FILE_NAME );
		FingerprintStore::with_database( directory, database, thumbnail_size, HashMap::new() )
	}

	fn with_database( directory: PathBuf, database: PathBuf, thumbnail_size: u32, entries: HashMap<String, Fingerprint> ) -> FingerprintStore {
		FingerprintStore {
			directory: canonical_path( &directory ),
			database,
			thumbnail_size,
			entries: RwLock::new( entries ),
			images_searched: AtomicUsize::new( 0 ),
			dirty: AtomicBool::new( false ),
		}
	}

	/// Load the store for `directory` from its default database file.
	pub fn open( directory: impl Into<PathBuf>, thumbnail_size: u32 ) -> Result<FingerprintStore, DedupeError> {
		let directory = directory.into();
		let database = directory.join( DATABASE_FILE_NAME );
		FingerprintStore::load_from( directory, database, thumbnail_size )
	}

	/// Load the store for `directory` from an explicit database file.
	///
	/// A missing database gives an empty store. Anything malformed is a
	/// [`DedupeError::CorruptStore`]; no store is returned in that case, so a
	/// damaged index is never used half loaded.
	pub fn load_from( directory: impl Into<PathBuf>, database: impl Into<PathBuf>, thumbnail_size: u32 ) -> Result<FingerprintStore, DedupeError> {
		let directory = directory.into();
		let database = database.into();

		let contents = match fs::read_to_string( &database ) {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!("No fingerprint database at {}, starting empty", database.display());
				return Ok( FingerprintStore::with_database( directory, database, thumbnail_size, HashMap::new() ) );
			},
			Err(e) if e.kind() == io::ErrorKind::InvalidData => {
				return Err( corrupt( &database, 0, "file is not valid UTF-8" ) );
			},
			Err(e) => {
				return Err( DedupeError::io( &database, e ) );
			}
		};

		let entries = parse_database( &database, &contents, thumbnail_size )?;
		info!("Loaded {} fingerprints from {}", entries.len(), database.display());

		Ok( FingerprintStore::with_database( directory, database, thumbnail_size, entries ) )
	}

	/// Insert a fingerprint unless the key is already present.
	///
	/// Returns `Ok(false)` and leaves the stored value alone when the key exists.
	/// Never compares against other entries.
	pub fn try_insert( &self, key: impl Into<String>, fingerprint: Fingerprint ) -> Result<bool, DedupeError> {
		let key = key.into();
		if key.is_empty() || key.contains( ['\n', '\r'] ) {
			return Err( DedupeError::InvalidKey( key ) );
		}
		if !fingerprint.has_side( self.thumbnail_size ) {
			return Err( DedupeError::ThumbnailMismatch { expected: sample_count( self.thumbnail_size ), found: fingerprint.len() } );
		}

		let mut entries = self.write();
		if entries.contains_key( &key ) {
			return Ok( false );
		}
		entries.insert( key, fingerprint );
		self.dirty.store( true, Ordering::Relaxed );
		Ok( true )
	}

	pub fn remove( &self, key: &str ) -> Option<Fingerprint> {
		let removed = self.write().remove( key );
		if removed.is_some() {
			self.dirty.store( true, Ordering::SeqCst );
		}
		removed
	}

	pub fn contains( &self, key: &str ) -> bool {
		self.read().contains_key( key )
	}

	pub fn get( &self, key: &str ) -> Option<Fingerprint> {
		self.read().get( key ).cloned()
	}

	/// Consistent copy of every entry, sorted by key.
	pub fn snapshot( &self ) -> Vec<(String, Fingerprint)> {
		let mut entries: Vec<(String, Fingerprint)> = self.read()
			.iter()
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect();
		entries.sort_by(|a, b| a.0.cmp(&b.0));
		entries
	}

	/// Persist to the store's own database file.
	pub fn save( &self ) -> Result<(), DedupeError> {
		self.save_to( &self.database )
	}

	/// Atomically persist the full index to `path`.
	///
	/// Writes a temporary file next to `path` and renames it into place, so a
	/// crash part way through leaves the previous database untouched.
	pub fn save_to( &self, path: &Path ) -> Result<(), DedupeError> {
		let parent = match path.parent() {
			Some(p) if !p.as_os_str().is_empty() => p,
			_ => Path::new("."),
		};

		//Cleared first so an insert racing with the write leaves the store dirty
		self.dirty.store( false, Ordering::SeqCst );
		let snapshot = self.snapshot();

		let result = write_atomically( parent, path, self.thumbnail_size, &snapshot );
		if result.is_err() {
			self.dirty.store( true, Ordering::SeqCst );
		}
		result?;

		info!("Saved {} fingerprints to {}", snapshot.len(), path.display());
		Ok(())
	}

	/// Drop entries whose file no longer exists in the directory.
	pub fn prune_missing( &self ) -> Vec<String> {
		let missing: Vec<String> = self.snapshot()
			.into_iter()
			.map(|(key, _)| key)
			.filter(|key| !self.path_for( key ).exists())
			.collect();

		for key in &missing {
			debug!("Pruning cache entry for missing file {}", key);
			self.remove( key );
		}
		missing
	}

	/// Key for a file: its canonical path, made relative to the store
	/// directory when inside it. Different spellings of one file give one key.
	pub fn key_for( &self, path: &Path ) -> String {
		let path = canonical_path( path );
		match path.strip_prefix( &self.directory ) {
			Ok(relative) if !relative.as_os_str().is_empty() => relative.to_string_lossy().into_owned(),
			_ => path.to_string_lossy().into_owned(),
		}
	}

	//Absolute keys are left as they are by join
	pub fn path_for( &self, key: &str ) -> PathBuf {
		self.directory.join( key )
	}

	pub fn directory( &self ) -> &Path {
		&self.directory
	}

	pub fn database( &self ) -> &Path {
		&self.database
	}

	pub fn thumbnail_size( &self ) -> u32 {
		self.thumbnail_size
	}

	pub fn stored_images( &self ) -> usize {
		self.read().len()
	}

	pub fn images_searched( &self ) -> usize {
		self.images_searched.load( Ordering::Relaxed )
	}

	pub fn record_searched( &self ) {
		self.images_searched.fetch_add( 1, Ordering::Relaxed );
	}

	//True if there are changes not yet saved
	pub fn is_dirty( &self ) -> bool {
		self.dirty.load( Ordering::Relaxed )
	}

	//A panicking worker can't leave the map half updated, so poisoning is ignored
	fn read( &self ) -> RwLockReadGuard<'_, HashMap<String, Fingerprint>> {
		self.entries.read().unwrap_or_else( PoisonError::into_inner )
	}

	fn write( &self ) -> RwLockWriteGuard<'_, HashMap<String, Fingerprint>> {
		self.entries.write().unwrap_or_else( PoisonError::into_inner )
	}
}

//Resolve `.`, `..` and symlinks. A file that doesn't exist yet is resolved through its parent.
fn canonical_path( path: &Path ) -> PathBuf {
	if let Ok(canonical) = fs::canonicalize( path ) {
		return canonical;
	}

	if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
		let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
		if let Ok(canonical) = fs::canonicalize( parent ) {
			return canonical.join( name );
		}
	}

	if path.is_absolute() {
		return path.to_path_buf();
	}
	match env::current_dir() {
		Ok(cwd) => cwd.join( path ),
		Err(_) => path.to_path_buf(),
	}
}

fn write_atomically( parent: &Path, path: &Path, thumbnail_size: u32, entries: &[(String, Fingerprint)] ) -> Result<(), DedupeError> {
	let mut tmp = NamedTempFile::new_in( parent ).map_err(|e| DedupeError::io( parent, e ))?;
	write_database( tmp.as_file_mut(), thumbnail_size, entries ).map_err(|e| DedupeError::io( tmp.path(), e ))?;
	tmp.as_file().sync_all().map_err(|e| DedupeError::io( tmp.path(), e ))?;
	tmp.persist( path ).map_err(|e| DedupeError::io( path, e.error ))?;
	Ok(())
}

fn corrupt( path: &Path, line: usize, reason: impl Into<String> ) -> DedupeError {
	DedupeError::CorruptStore { path: path.to_path_buf(), line, reason: reason.into() }
}

fn parse_header( path: &Path, header: Option<&str>, thumbnail_size: u32 ) -> Result<(), DedupeError> {
	let header = match header {
		Some(header) => header,
		None => return Err( corrupt( path, 1, "missing header" ) ),
	};

	let fields: Vec<&str> = header.split_whitespace().collect();
	if fields.len() != 3 || fields[0] != DATABASE_MAGIC {
		return Err( corrupt( path, 1, format!("unrecognised header {:?}", header) ) );
	}

	match fields[1].parse::<u32>() {
		Ok( DATABASE_VERSION ) => {},
		_ => return Err( corrupt( path, 1, format!("unsupported version {:?}", fields[1]) ) ),
	}

	match fields[2].parse::<u32>() {
		Ok( size ) if size == thumbnail_size => Ok(()),
		Ok( size ) => Err( corrupt( path, 1, format!("thumbnail size {} does not match {}", size, thumbnail_size) ) ),
		Err(_) => Err( corrupt( path, 1, format!("invalid thumbnail size {:?}", fields[2]) ) ),
	}
}

fn parse_database( path: &Path, contents: &str, thumbnail_size: u32 ) -> Result<HashMap<String, Fingerprint>, DedupeError> {
	let mut lines = contents.lines();
	parse_header( path, lines.next(), thumbnail_size )?;

	let expected = sample_count( thumbnail_size );
	let mut entries = HashMap::new();

	for (i, line) in lines.enumerate() {
		let line_no = i + 2;
		if line.is_empty() {
			continue;
		}

		//Keys may contain tabs but samples never do
		let (key, record) = match line.rsplit_once( '\t' ) {
			Some((key, record)) if !key.is_empty() => (key, record),
			_ => return Err( corrupt( path, line_no, "record has no key" ) ),
		};

		let fingerprint: Fingerprint = match record.parse() {
			Ok(fp) => fp,
			Err(e) => return Err( corrupt( path, line_no, e.to_string() ) ),
		};

		if fingerprint.len() != expected {
			return Err( corrupt( path, line_no, format!("expected {} samples, found {}", expected, fingerprint.len()) ) );
		}

		if entries.insert( key.to_string(), fingerprint ).is_some() {
			return Err( corrupt( path, line_no, format!("duplicate key {:?}", key) ) );
		}
	}

	Ok( entries )
}

fn write_database( file: &mut fs::File, thumbnail_size: u32, entries: &[(String, Fingerprint)] ) -> io::Result<()> {
	let mut writer = BufWriter::new( file );
	writeln!( writer, "{} {} {}", DATABASE_MAGIC, DATABASE_VERSION, thumbnail_size )?;
	for (key, fingerprint) in entries {
		writeln!( writer, "{}\t{}", key, fingerprint.to_record() )?;
	}
	writer.flush()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;
	use tempfile::tempdir;

	fn fp( value: f32 ) -> Fingerprint {
		Fingerprint::new( vec![ value; 4 ] )
	}

	#[test]
	fn test_open_without_database() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::open( dir.path(), 2 ).unwrap();
		assert_eq!( store.stored_images(), 0 );
		assert_eq!( store.images_searched(), 0 );
		assert!( !store.is_dirty() );
	}

	#[test]
	fn test_try_insert_is_idempotent() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );

		assert!( store.try_insert( "a.png", fp( 0.1 ) ).unwrap() );
		assert!( !store.try_insert( "a.png", fp( 0.9 ) ).unwrap() );
		assert_eq!( store.stored_images(), 1 );
		assert_eq!( store.get( "a.png" ), Some( fp( 0.1 ) ), "Second insert leaves the value unchanged" );
	}

	#[test]
	fn test_try_insert_rejects_bad_input() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );

		assert!( matches!( store.try_insert( "a.png", Fingerprint::new( vec![ 0.0; 9 ] ) ),
			Err( DedupeError::ThumbnailMismatch { expected: 4, found: 9 } ) ) );
		assert!( matches!( store.try_insert( "a\nb.png", fp( 0.0 ) ), Err( DedupeError::InvalidKey(_) ) ) );
		assert!( matches!( store.try_insert( "", fp( 0.0 ) ), Err( DedupeError::InvalidKey(_) ) ) );
		assert_eq!( store.stored_images(), 0 );
	}

	#[test]
	fn test_remove() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		store.try_insert( "a.png", fp( 0.1 ) ).unwrap();

		assert_eq!( store.remove( "a.png" ), Some( fp( 0.1 ) ) );
		assert_eq!( store.remove( "a.png" ), None, "Removing an absent key is fine" );
		assert_eq!( store.stored_images(), 0 );
	}

	#[test]
	fn test_save_and_reload() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		store.try_insert( "b.png", Fingerprint::new( vec![ 0.1, 1.0 / 3.0, 0.0, 1.0 ] ) ).unwrap();
		store.try_insert( "with\ttab.jpg", fp( 0.25 ) ).unwrap();
		store.save().unwrap();
		assert!( !store.is_dirty() );

		let reloaded = FingerprintStore::open( dir.path(), 2 ).unwrap();
		assert_eq!( reloaded.snapshot(), store.snapshot() );

		//Only the database is left behind, no temp files
		let names: Vec<String> = fs::read_dir( dir.path() ).unwrap()
			.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
			.collect();
		assert_eq!( names, vec![ DATABASE_FILE_NAME.to_string() ] );
	}

	#[test]
	fn test_save_replaces_existing_database() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		store.try_insert( "a.png", fp( 0.1 ) ).unwrap();
		store.save().unwrap();
		store.remove( "a.png" );
		store.try_insert( "c.png", fp( 0.3 ) ).unwrap();
		store.save().unwrap();

		let reloaded = FingerprintStore::open( dir.path(), 2 ).unwrap();
		assert!( !reloaded.contains( "a.png" ) );
		assert!( reloaded.contains( "c.png" ) );
	}

	#[test]
	fn test_load_truncated_record() {
		let dir = tempdir().unwrap();
		let db = dir.path().join( DATABASE_FILE_NAME );
		fs::write( &db, "imagecache 1 2\na.png\t0,0,0,0\nb.png\t0.5,0.5\n" ).unwrap();

		match FingerprintStore::open( dir.path(), 2 ) {
			Err( DedupeError::CorruptStore { line, .. } ) => assert_eq!( line, 3 ),
			Err(e) => panic!( "unexpected error {}", e ),
			Ok(_) => panic!( "corrupt database loaded" ),
		}
	}

	#[test]
	fn test_load_rejects_malformed_files() {
		let dir = tempdir().unwrap();
		let db = dir.path().join( DATABASE_FILE_NAME );
		let cases = [
			"",
			"not a header\n",
			"imagecache 2 2\n",
			"imagecache 1 8\n",
			"imagecache 1 2\nno separator here\n",
			"imagecache 1 2\na.png\t0,0,x,0\n",
			"imagecache 1 2\na.png\t0,0,0,0\na.png\t1,1,1,1\n",
		];

		for contents in cases {
			fs::write( &db, contents ).unwrap();
			assert!( matches!( FingerprintStore::open( dir.path(), 2 ), Err( DedupeError::CorruptStore { .. } ) ),
				"{:?} should be rejected", contents );
		}
	}

	#[test]
	fn test_concurrent_inserts() {
		let dir = tempdir().unwrap();
		let store = Arc::new( FingerprintStore::new( dir.path(), 2 ) );

		thread::scope(|s| {
			for t in 0..8 {
				let store = Arc::clone( &store );
				s.spawn( move || {
					for i in 0..100 {
						store.try_insert( format!("{}-{}.png", t, i), fp( 0.5 ) ).unwrap();
						store.record_searched();
					}
				});
			}
		});

		assert_eq!( store.stored_images(), 800 );
		assert_eq!( store.images_searched(), 800 );
	}

	#[test]
	fn test_keys_and_prune() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		let kept = dir.path().join( "kept.png" );
		fs::write( &kept, b"x" ).unwrap();

		assert_eq!( store.key_for( &kept ), "kept.png" );
		assert_eq!( store.key_for( Path::new( "/elsewhere/a.png" ) ), "/elsewhere/a.png" );
		assert_eq!( store.path_for( "kept.png" ), fs::canonicalize( &kept ).unwrap() );

		store.try_insert( "kept.png", fp( 0.1 ) ).unwrap();
		store.try_insert( "gone.png", fp( 0.2 ) ).unwrap();
		assert_eq!( store.prune_missing(), vec![ "gone.png".to_string() ] );
		assert_eq!( store.stored_images(), 1 );
	}

	#[test]
	fn test_keys_ignore_path_spelling() {
		let dir = tempdir().unwrap();
		fs::create_dir( dir.path().join( "dl" ) ).unwrap();
		fs::create_dir( dir.path().join( "dl" ).join( "sub" ) ).unwrap();
		let image = dir.path().join( "dl" ).join( "red.png" );
		fs::write( &image, b"x" ).unwrap();

		//Store opened through a roundabout spelling of the directory
		let store = FingerprintStore::new( dir.path().join( "." ).join( "dl" ).join( "sub" ).join( ".." ), 2 );
		assert_eq!( store.directory(), fs::canonicalize( dir.path().join( "dl" ) ).unwrap() );

		assert_eq!( store.key_for( &image ), "red.png" );
		assert_eq!( store.key_for( &dir.path().join( "dl" ).join( "sub" ).join( ".." ).join( "red.png" ) ), "red.png" );
		assert_eq!( store.key_for( &store.directory().join( "red.png" ) ), "red.png" );

		//Not written yet, resolved through the parent
		assert_eq!( store.key_for( &dir.path().join( "dl" ).join( "." ).join( "new.png" ) ), "new.png" );

		assert!( store.try_insert( store.key_for( &image ), fp( 0.1 ) ).unwrap() );
		assert!( !store.try_insert( store.key_for( &dir.path().join( "dl" ).join( "." ).join( "red.png" ) ), fp( 0.9 ) ).unwrap() );
		assert_eq!( store.stored_images(), 1 );
	}

	#[test]
	fn test_insert_after_save_marks_dirty() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		store.try_insert( "a.png", fp( 0.1 ) ).unwrap();
		store.save().unwrap();
		assert!( !store.is_dirty() );

		store.try_insert( "b.png", fp( 0.2 ) ).unwrap();
		assert!( store.is_dirty() );
	}

	#[test]
	fn test_failed_save_stays_dirty() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		store.try_insert( "a.png", fp( 0.1 ) ).unwrap();

		let err = store.save_to( &dir.path().join( "missing" ).join( "cache.db" ) ).unwrap_err();
		assert!( matches!( err, DedupeError::Io { .. } ) );
		assert!( store.is_dirty() );
	}

	#[test]
	fn test_concurrent_insert_during_save_is_not_lost() {
		let dir = tempdir().unwrap();
		let store = FingerprintStore::new( dir.path(), 2 );
		for i in 0..200 {
			store.try_insert( format!("{:03}.png", i), fp( 0.5 ) ).unwrap();
		}

		thread::scope(|s| {
			s.spawn(|| store.save().unwrap() );
			s.spawn(|| { store.try_insert( "late.png", fp( 0.5 ) ).unwrap(); } );
		});

		//Either the save saw the late insert or the store is still dirty
		let saved = FingerprintStore::open( dir.path(), 2 ).unwrap();
		assert!( saved.contains( "late.png" ) || store.is_dirty() );
	}
}
