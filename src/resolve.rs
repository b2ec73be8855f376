use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::fs;
use std::io;

use log::{info, warn};

use crate::cancel::Cancellation;
use crate::compare::similarity;
use crate::error::DedupeError;
use crate::fingerprint::Fingerprint;
use crate::store::FingerprintStore;


/// How matching pairs are turned into duplicate groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupingPolicy {
	/// Every matching pair is joined, so if A~B and B~C then A, B and C are
	/// one group even when A~C falls short.
	#[default]
	Transitive,
	/// Each group is one representative plus the entries matching it directly.
	Representative,
}

/// Which member of a duplicate group is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurvivorPolicy {
	/// Largest file on disk, ties broken by the smallest key.
	#[default]
	LargestFile,
	SmallestKey,
}

impl fmt::Display for GroupingPolicy {
	fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
		match self {
			GroupingPolicy::Transitive => f.write_str("transitive"),
			GroupingPolicy::Representative => f.write_str("representative"),
		}
	}
}

impl fmt::Display for SurvivorPolicy {
	fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
		match self {
			SurvivorPolicy::LargestFile => f.write_str("largest"),
			SurvivorPolicy::SmallestKey => f.write_str("name"),
		}
	}
}

#[derive(Clone, Debug)]
pub struct ResolveOptions {
	pub percent_for_match: f64,
	pub grouping: GroupingPolicy,
	pub survivor: SurvivorPolicy,
}

impl Default for ResolveOptions {
	fn default() -> Self {
		ResolveOptions { percent_for_match: 90.0, grouping: GroupingPolicy::default(), survivor: SurvivorPolicy::default() }
	}
}

/// One resolved group: the survivor and what happened to the others.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DuplicateGroup {
	pub survivor: String,
	pub removed: Vec<String>,
	//Entries whose file couldn't be deleted, with the reason; they stay in the store
	pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct ResolveReport {
	pub groups: Vec<DuplicateGroup>,
	pub cancelled: bool,
}

impl ResolveReport {
	pub fn removed_count( &self ) -> usize {
		self.groups.iter().map(|g| g.removed.len()).sum()
	}
}

//Disjoint set over snapshot indices
struct DisjointSet {
	parent: Vec<usize>,
	rank: Vec<u8>,
}

impl DisjointSet {

	fn new( size: usize ) -> DisjointSet {
		DisjointSet { parent: (0..size).collect(), rank: vec![0; size] }
	}

	fn find( &mut self, mut x: usize ) -> usize {
		while self.parent[x] != x {
			self.parent[x] = self.parent[self.parent[x]];
			x = self.parent[x];
		}
		x
	}

	fn union( &mut self, a: usize, b: usize ) {
		let (ra, rb) = (self.find(a), self.find(b));
		if ra == rb {
			return;
		}
		match self.rank[ra].cmp( &self.rank[rb] ) {
			Ordering::Less => self.parent[ra] = rb,
			Ordering::Greater => self.parent[rb] = ra,
			Ordering::Equal => {
				self.parent[rb] = ra;
				self.rank[ra] += 1;
			}
		}
	}
}

//Check every unordered pair, joining matches. Quadratic, so run once per folder.
fn transitive_groups( entries: &[(String, Fingerprint)], percent_for_match: f64, cancel: &Cancellation ) -> Option<Vec<Vec<usize>>> {
	let mut sets = DisjointSet::new( entries.len() );

	for i in 0..entries.len() {
		if cancel.is_cancelled() {
			return None;
		}
		for j in (i+1)..entries.len() {
			if similarity( &entries[i].1, &entries[j].1 ) >= percent_for_match {
				sets.union( i, j );
			}
		}
	}

	let mut by_root: Vec<Vec<usize>> = vec![ Vec::new(); entries.len() ];
	for i in 0..entries.len() {
		let root = sets.find( i );
		by_root[root].push( i );
	}
	Some( by_root.into_iter().filter(|g| g.len() > 1).collect() )
}

//Entries are visited in key order; each unclaimed entry claims its direct matches
fn representative_groups( entries: &[(String, Fingerprint)], percent_for_match: f64, cancel: &Cancellation ) -> Option<Vec<Vec<usize>>> {
	let mut claimed = vec![ false; entries.len() ];
	let mut groups = Vec::new();

	for i in 0..entries.len() {
		if cancel.is_cancelled() {
			return None;
		}
		if claimed[i] {
			continue;
		}
		claimed[i] = true;

		let mut group = vec![ i ];
		for j in (i+1)..entries.len() {
			if !claimed[j] && similarity( &entries[i].1, &entries[j].1 ) >= percent_for_match {
				claimed[j] = true;
				group.push( j );
			}
		}
		if group.len() > 1 {
			groups.push( group );
		}
	}
	Some( groups )
}

fn file_size( store: &FingerprintStore, key: &str ) -> u64 {
	fs::metadata( store.path_for( key ) ).map(|m| m.len()).unwrap_or(0)
}

//Survivor first, then the rest in key order
fn order_group( store: &FingerprintStore, mut keys: Vec<String>, policy: SurvivorPolicy ) -> Vec<String> {
	match policy {
		SurvivorPolicy::LargestFile => {
			keys.sort_by_cached_key(|k| (Reverse( file_size( store, k ) ), k.clone()));
		},
		SurvivorPolicy::SmallestKey => keys.sort(),
	}
	let survivor = keys.remove(0);
	keys.sort();
	keys.insert( 0, survivor );
	keys
}

fn check_options( options: &ResolveOptions ) -> Result<(), DedupeError> {
	if !(0.0..=100.0).contains( &options.percent_for_match ) {
		return Err( DedupeError::InvalidConfig( format!("percent for match must be between 0 - 100 inclusive, got {}", options.percent_for_match) ) );
	}
	Ok(())
}

/// Partition a snapshot of the store into duplicate groups without touching
/// anything. Each group is returned with its survivor first.
///
/// Returns `Ok(None)` if cancelled during the pair scan.
pub fn find_duplicate_groups( store: &FingerprintStore, options: &ResolveOptions, cancel: &Cancellation ) -> Result<Option<Vec<Vec<String>>>, DedupeError> {
	check_options( options )?;

	let entries = store.snapshot();
	let groups = match options.grouping {
		GroupingPolicy::Transitive => transitive_groups( &entries, options.percent_for_match, cancel ),
		GroupingPolicy::Representative => representative_groups( &entries, options.percent_for_match, cancel ),
	};

	let groups = match groups {
		Some(groups) => groups,
		None => return Ok( None ),
	};

	let mut resolved: Vec<Vec<String>> = groups.into_iter()
		.map(|g| {
			let keys = g.into_iter().map(|i| entries[i].0.clone()).collect();
			order_group( store, keys, options.survivor )
		})
		.collect();
	resolved.sort();
	Ok( Some( resolved ) )
}

/// Delete every duplicate in the store except one survivor per group.
///
/// Files are removed from disk and their entries from the store together. A
/// file that is already gone counts as deleted; any other failure is logged,
/// recorded in the group and the entry kept. There is no undo.
pub fn delete_duplicates( store: &FingerprintStore, options: &ResolveOptions, cancel: &Cancellation ) -> Result<ResolveReport, DedupeError> {
	delete_duplicates_with( store, options, cancel, |_| {} )
}

/// [`delete_duplicates`], calling `on_group` as soon as each group is done.
///
/// Cancellation is checked before each group, so everything reported to
/// `on_group` so far stays deleted.
pub fn delete_duplicates_with<F>( store: &FingerprintStore, options: &ResolveOptions, cancel: &Cancellation, mut on_group: F ) -> Result<ResolveReport, DedupeError>
	where F: FnMut(&DuplicateGroup)
{
	let mut report = ResolveReport::default();

	let groups = match find_duplicate_groups( store, options, cancel )? {
		Some(groups) => groups,
		None => {
			warn!("Duplicate search cancelled, nothing deleted");
			report.cancelled = true;
			return Ok( report );
		}
	};

	info!("Found {} duplicate groups among {} images at {}% similarity",
		groups.len(), store.stored_images(), options.percent_for_match);

	for keys in groups {
		if cancel.is_cancelled() {
			report.cancelled = true;
			break;
		}

		let mut keys = keys.into_iter();
		let mut group = DuplicateGroup { survivor: keys.next().unwrap_or_default(), ..Default::default() };

		for key in keys {
			let path = store.path_for( &key );
			match fs::remove_file( &path ) {
				Ok(()) => {},
				Err(e) if e.kind() == io::ErrorKind::NotFound => {},
				Err(e) => {
					warn!("Failed to delete {}: {}", path.display(), e);
					group.failed.push( (key, e.to_string()) );
					continue;
				}
			}
			store.remove( &key );
			group.removed.push( key );
		}

		info!("Kept {}, removed {}", group.survivor, group.removed.join(", "));
		on_group( &group );
		report.groups.push( group );
	}

	if report.cancelled {
		warn!("Duplicate removal cancelled after {} groups", report.groups.len());
	}
	Ok( report )
}
