use std::fmt;
use std::str::FromStr;


//Separator between samples in the serialized form
pub const SAMPLE_SEPARATOR: char = ',';

/// A fixed length summary of an image's visual content.
///
/// Holds one normalised brightness sample (0.0 - 1.0) per pixel of an N x N
/// thumbnail in raster order, so sample `i` of two fingerprints always refers
/// to the same region of the resized image.
#[derive(Clone, Debug, PartialEq)]
pub struct Fingerprint {
	samples: Vec<f32>,
}

impl Fingerprint {

	pub fn new( samples: Vec<f32> ) -> Fingerprint {
		Fingerprint { samples }
	}

	pub fn samples( &self ) -> &[f32] {
		&self.samples
	}

	pub fn len( &self ) -> usize {
		self.samples.len()
	}

	pub fn is_empty( &self ) -> bool {
		self.samples.is_empty()
	}

	//True if the fingerprint was made from an N x N thumbnail
	pub fn has_side( &self, thumbnail_size: u32 ) -> bool {
		self.samples.len() == sample_count( thumbnail_size )
	}

	/// Serialize to a single delimited string.
	///
	/// Uses the shortest decimal form of each sample that parses back to the
	/// identical `f32`, so repeated saves and loads never drift.
	pub fn to_record( &self ) -> String {
		let mut record = String::with_capacity( self.samples.len() * 10 );
		for (i, sample) in self.samples.iter().enumerate() {
			if i > 0 {
				record.push( SAMPLE_SEPARATOR );
			}
			record.push_str( &sample.to_string() );
		}
		record
	}
}

//Number of samples in a fingerprint for a given thumbnail side length
pub fn sample_count( thumbnail_size: u32 ) -> usize {
	(thumbnail_size as usize) * (thumbnail_size as usize)
}

#[derive(Debug, PartialEq)]
pub struct ParseFingerprintError(pub String);

impl fmt::Display for ParseFingerprintError {
	fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
		f.write_str( &self.0 )
	}
}

impl std::error::Error for ParseFingerprintError {}

impl FromStr for Fingerprint {
	type Err = ParseFingerprintError;

	fn from_str( record: &str ) -> Result<Self, Self::Err> {
		if record.trim().is_empty() {
			return Err( ParseFingerprintError( "empty fingerprint".to_string() ) );
		}

		let mut samples = Vec::new();
		for (i, field) in record.split( SAMPLE_SEPARATOR ).enumerate() {
			let sample = match field.trim().parse::<f32>() {
				Ok(sample) => sample,
				Err(_) => {
					return Err( ParseFingerprintError( format!("sample {} is not a number: {:?}", i, field) ) );
				}
			};
			if !sample.is_finite() {
				return Err( ParseFingerprintError( format!("sample {} is not finite", i) ) );
			}
			samples.push( sample );
		}

		Ok( Fingerprint::new( samples ) )
	}
}

impl fmt::Display for Fingerprint {
	fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
		f.write_str( &self.to_record() )
	}
}
