use std::io;
use std::path::PathBuf;
use thiserror::Error;


/// DedupeError enumerates all possible errors returned by this library.
#[derive(Error, Debug)]
pub enum DedupeError {

	//The image library couldn't decode the stream as an image
	#[error("failed to decode image: {0}")]
	Decode(String),

	//The fingerprint database exists but can't be trusted
	#[error("corrupt fingerprint database {}: line {line}: {reason}", path.display())]
	CorruptStore {
		path: PathBuf,
		line: usize,
		reason: String,
	},

	//Probably reading, writing or deleting a file
	#[error("I/O error on {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	//A fingerprint was produced with a different thumbnail size to the store
	#[error("fingerprint has {found} samples but the store expects {expected}")]
	ThumbnailMismatch {
		expected: usize,
		found: usize,
	},

	#[error("invalid store key: {0:?}")]
	InvalidKey(String),

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
}

impl DedupeError {

	pub fn io( path: impl Into<PathBuf>, source: io::Error ) -> DedupeError {
		DedupeError::Io { path: path.into(), source }
	}
}

impl From<image::ImageError> for DedupeError {
	fn from( e: image::ImageError ) -> Self {
		DedupeError::Decode( e.to_string() )
	}
}
