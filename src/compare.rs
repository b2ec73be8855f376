use crate::fingerprint::Fingerprint;


//Samples are normalised by the hasher so the widest possible gap between two samples is 1.0
const MAX_SAMPLE_RANGE: f64 = 1.0;

/// Percentage similarity of two fingerprints.
///
/// Averages the absolute difference of positionally corresponding samples,
/// relative to the full brightness range, and inverts it: 100.0 means the
/// thumbnails are identical and 0.0 means maximally different.
///
/// # Panics
///
/// Panics if the fingerprints have different lengths. That only happens when
/// they were made with different thumbnail sizes, which is a programming error.
pub fn similarity( a: &Fingerprint, b: &Fingerprint ) -> f64 {
	assert_eq!( a.len(), b.len(), "compared fingerprints made from different thumbnail sizes" );

	if a.is_empty() {
		return 100.0;
	}

	let mut total_diff: f64 = 0.0;
	for (x, y) in a.samples().iter().zip( b.samples() ) {
		total_diff += ( (*x as f64) - (*y as f64) ).abs();
	}

	let mean_diff = total_diff / (a.len() as f64) / MAX_SAMPLE_RANGE;
	( 100.0 * (1.0 - mean_diff) ).clamp( 0.0, 100.0 )
}

//Test if two fingerprints are at least percent_for_match similar
pub fn is_match( a: &Fingerprint, b: &Fingerprint, percent_for_match: f64 ) -> bool {
	similarity( a, b ) >= percent_for_match
}
