//! Perceptual fingerprint cache for a folder of downloaded images.
//!
//! Each image is reduced to a small brightness [`Fingerprint`] by a pluggable
//! [`HashingStrategy`]. Fingerprints live in a [`FingerprintStore`] persisted
//! inside the destination directory, are compared with [`similarity`], and
//! near duplicates are removed in bulk by [`delete_duplicates`].

pub mod cancel;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod populate;
pub mod resolve;
pub mod store;

#[cfg(test)]
mod test_support;

pub use cancel::Cancellation;
pub use compare::{is_match, similarity};
pub use config::ConfigOptions;
pub use engine::{DedupeEngine, SimilarImage};
pub use error::DedupeError;
pub use fingerprint::Fingerprint;
pub use hasher::{build_hasher, BrightnessWeights, HasherKind, HashingStrategy, ImageStream, ResizeHasher, ThumbnailHasher};
pub use populate::{cache_populate, PopulateOptions, PopulateReport};
pub use resolve::{delete_duplicates, delete_duplicates_with, find_duplicate_groups, DuplicateGroup, GroupingPolicy, ResolveOptions, ResolveReport, SurvivorPolicy};
pub use store::{FingerprintStore, DATABASE_FILE_NAME};
