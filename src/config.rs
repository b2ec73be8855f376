use crate::hasher::HasherKind;
use crate::populate::PopulateOptions;
use crate::resolve::{GroupingPolicy, ResolveOptions, SurvivorPolicy};


#[derive(Clone, Debug, PartialEq)]
pub struct ConfigOptions {
	pub thumbnail_size: u32,
	pub percent_for_match: f64,
	pub group_size: usize,
	pub recursive: bool,
	pub hasher: HasherKind,
	pub grouping: GroupingPolicy,
	pub survivor: SurvivorPolicy,
}

impl ConfigOptions {

	pub const DEFAULT_THUMBNAIL_SIZE: u32 = 32;		//Side length of the square thumbnail every fingerprint is made from
	pub const DEFAULT_PERCENT_FOR_MATCH: f64 = 90.0;	//Similarity at or above which two images are declared dupes
	pub const DEFAULT_GROUP_SIZE: usize = 4;			//Number of images decoded at once while populating the cache
	pub const MAX_THUMBNAIL_SIZE: u32 = 256;

	/// Check the values are usable, returning a message describing the first problem.
	pub fn validate( &self ) -> Result<(), String> {
		if self.thumbnail_size < 1 || self.thumbnail_size > Self::MAX_THUMBNAIL_SIZE {
			return Err( format!("thumbnail size must be between 1 - {} inclusive.", Self::MAX_THUMBNAIL_SIZE) );
		}
		if !(0.0..=100.0).contains( &self.percent_for_match ) {
			return Err( "percent for match must be between 0 - 100 inclusive.".to_string() );
		}
		if self.group_size < 1 {
			return Err( "number of threads must be greater than 0".to_string() );
		}
		Ok(())
	}

	pub fn populate_options( &self ) -> PopulateOptions {
		PopulateOptions { group_size: self.group_size, recursive: self.recursive }
	}

	pub fn resolve_options( &self ) -> ResolveOptions {
		ResolveOptions { percent_for_match: self.percent_for_match, grouping: self.grouping, survivor: self.survivor }
	}
}

impl Default for ConfigOptions {
	fn default() -> Self {
		ConfigOptions {
			thumbnail_size: Self::DEFAULT_THUMBNAIL_SIZE,
			percent_for_match: Self::DEFAULT_PERCENT_FOR_MATCH,
			group_size: Self::DEFAULT_GROUP_SIZE,
			recursive: false,
			hasher: HasherKind::default(),
			grouping: GroupingPolicy::default(),
			survivor: SurvivorPolicy::default(),
		}
	}
}
