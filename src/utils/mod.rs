//! Utility modules.
//!
//! Stream plumbing shared by the provider converters, plus cancellation
//! handles for long-running runs.

pub mod cancel;
pub mod streaming;

pub use cancel::{CancelHandle, make_cancellable, new_cancel_handle};
pub use streaming::*;
