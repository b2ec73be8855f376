use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;


/// Shared flag checked between files and groups by the batch operations.
///
/// Cloning gives another handle to the same flag, so a Ctrl-C handler can
/// hold one while the populator or resolver checks another.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
	cancelled: Arc<AtomicBool>,
}

impl Cancellation {

	pub fn new() -> Cancellation {
		Cancellation::default()
	}

	pub fn cancel( &self ) {
		self.cancelled.store( true, Ordering::Relaxed );
	}

	pub fn is_cancelled( &self ) -> bool {
		self.cancelled.load( Ordering::Relaxed )
	}
}
