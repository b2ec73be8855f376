use std::fmt;
use std::io::{BufRead, Seek};
use std::sync::Arc;

use image::imageops::FilterType;
use image::io::{Limits, Reader};
use image::{DynamicImage, GenericImageView};

use crate::error::DedupeError;
use crate::fingerprint::Fingerprint;


/// Any readable, seekable stream positioned at the start of an encoded image.
pub trait ImageStream: BufRead + Seek {}

impl<T: BufRead + Seek> ImageStream for T {}

/// Reduces an encoded image to a [`Fingerprint`].
///
/// Implementations differ in speed and memory profile but must all produce
/// `thumbnail_size()^2` samples in raster order, normalised with
/// [`BrightnessWeights`], so their fingerprints can share one store.
pub trait HashingStrategy: Send + Sync {

	fn hash( &self, stream: &mut dyn ImageStream ) -> Result<Fingerprint, DedupeError>;

	fn thumbnail_size( &self ) -> u32;

	fn name( &self ) -> &'static str;
}

/// Channel weights used to turn one RGBA pixel into a brightness sample.
///
/// RGB is premultiplied by alpha and the alpha channel adds its own term, so a
/// transparent pixel never looks like an opaque pixel of the same hue. Red is
/// weighted far above the other channels so that pure hues stay well apart
/// once collapsed to a single value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrightnessWeights {
	pub alpha: f32,
	pub red: f32,
	pub green: f32,
	pub blue: f32,
}

impl Default for BrightnessWeights {
	fn default() -> Self {
		BrightnessWeights { alpha: 1.0, red: 96.0, green: 4.0, blue: 1.0 }
	}
}

impl BrightnessWeights {

	//Brightness of one pixel scaled into 0.0 - 1.0
	pub fn brightness( &self, rgba: [u8;4] ) -> f32 {
		let [r, g, b, a] = rgba;
		let alpha = a as f32 / 255.0;
		let colour = self.red * r as f32 + self.green * g as f32 + self.blue * b as f32;
		let value = alpha * colour + self.alpha * a as f32;
		value / self.max_value()
	}

	fn max_value( &self ) -> f32 {
		255.0 * (self.alpha + self.red + self.green + self.blue)
	}
}

//Guess the format from the content and decode the whole image.
//Without a cap the image crate's default allocation limit applies.
fn decode( stream: &mut dyn ImageStream, max_alloc: Option<u64> ) -> Result<DynamicImage, DedupeError> {
	let mut reader = match Reader::new( stream ).with_guessed_format() {
		Ok( reader ) => reader,
		Err(e) => {
			return Err( DedupeError::Decode( format!("failed to identify image format: {}", e) ) );
		}
	};

	if reader.format().is_none() {
		return Err( DedupeError::Decode( "unrecognised image format".to_string() ) );
	}

	if let Some(max_alloc) = max_alloc {
		let mut limits = Limits::default();
		limits.max_alloc = Some( max_alloc );
		reader.limits( limits );
	}

	Ok( reader.decode()? )
}

//Read back the thumbnail pixels row by row
fn thumbnail_to_fingerprint( thumb: &DynamicImage, side: u32, weights: &BrightnessWeights ) -> Result<Fingerprint, DedupeError> {
	let (width, height) = thumb.dimensions();
	if width != side || height != side {
		return Err( DedupeError::Decode( format!("failed to resize image to {}x{}", side, side) ) );
	}

	let rgba = thumb.to_rgba8();
	let samples = rgba.pixels().map(|p| weights.brightness( p.0 )).collect();
	Ok( Fingerprint::new( samples ) )
}

/// Decodes the full image then resizes with a deterministic resampling filter.
///
/// The slowest option, but the filter sees every source pixel.
pub struct ResizeHasher {
	thumbnail_size: u32,
	filter: FilterType,
	weights: BrightnessWeights,
	max_alloc: Option<u64>,
}

impl ResizeHasher {

	//Seems to work best with Gaussian, although it's the slowest
	pub const DEFAULT_FILTER: FilterType = FilterType::Gaussian;

	pub fn new( thumbnail_size: u32 ) -> ResizeHasher {
		ResizeHasher { thumbnail_size, filter: Self::DEFAULT_FILTER, weights: BrightnessWeights::default(), max_alloc: None }
	}

	//Refuse to decode images whose bitmap would need more than this many bytes
	pub fn with_max_alloc( mut self, bytes: u64 ) -> ResizeHasher {
		self.max_alloc = Some( bytes );
		self
	}

	pub fn with_filter( mut self, filter: FilterType ) -> ResizeHasher {
		self.filter = filter;
		self
	}

	pub fn with_weights( mut self, weights: BrightnessWeights ) -> ResizeHasher {
		self.weights = weights;
		self
	}
}

impl HashingStrategy for ResizeHasher {

	fn hash( &self, stream: &mut dyn ImageStream ) -> Result<Fingerprint, DedupeError> {
		//The full size bitmap is dropped at the end of this block so only the thumbnail is held afterwards
		let thumb = {
			let img = decode( stream, self.max_alloc )?;
			img.resize_exact( self.thumbnail_size, self.thumbnail_size, self.filter )
		};
		thumbnail_to_fingerprint( &thumb, self.thumbnail_size, &self.weights )
	}

	fn thumbnail_size( &self ) -> u32 {
		self.thumbnail_size
	}

	fn name( &self ) -> &'static str {
		"resize"
	}
}

/// Decodes the full image then shrinks it with integer box sampling.
///
/// Decoding is the same as [`ResizeHasher`], so peak memory is still the full
/// bitmap. Only the shrink step is cheaper, which makes it much faster on
/// multi-megapixel sources. Use [`ThumbnailHasher::with_max_alloc`] to bound
/// the decode.
pub struct ThumbnailHasher {
	thumbnail_size: u32,
	weights: BrightnessWeights,
	max_alloc: Option<u64>,
}

impl ThumbnailHasher {

	pub fn new( thumbnail_size: u32 ) -> ThumbnailHasher {
		ThumbnailHasher { thumbnail_size, weights: BrightnessWeights::default(), max_alloc: None }
	}

	pub fn with_max_alloc( mut self, bytes: u64 ) -> ThumbnailHasher {
		self.max_alloc = Some( bytes );
		self
	}

	pub fn with_weights( mut self, weights: BrightnessWeights ) -> ThumbnailHasher {
		self.weights = weights;
		self
	}
}

impl HashingStrategy for ThumbnailHasher {

	fn hash( &self, stream: &mut dyn ImageStream ) -> Result<Fingerprint, DedupeError> {
		let thumb = {
			let img = decode( stream, self.max_alloc )?;
			img.thumbnail_exact( self.thumbnail_size, self.thumbnail_size )
		};
		thumbnail_to_fingerprint( &thumb, self.thumbnail_size, &self.weights )
	}

	fn thumbnail_size( &self ) -> u32 {
		self.thumbnail_size
	}

	fn name( &self ) -> &'static str {
		"thumbnail"
	}
}

/// Which [`HashingStrategy`] to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HasherKind {
	#[default]
	Resize,
	Thumbnail,
}

impl fmt::Display for HasherKind {
	fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
		match self {
			HasherKind::Resize => f.write_str("resize"),
			HasherKind::Thumbnail => f.write_str("thumbnail"),
		}
	}
}

pub fn build_hasher( kind: HasherKind, thumbnail_size: u32 ) -> Arc<dyn HashingStrategy> {
	match kind {
		HasherKind::Resize => Arc::new( ResizeHasher::new( thumbnail_size ) ),
		HasherKind::Thumbnail => Arc::new( ThumbnailHasher::new( thumbnail_size ) ),
	}
}
