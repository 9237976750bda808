//! Collection state transitions.
//!
//! Every change a synchronized collection sees goes through
//! [`apply_event`], so ordering rules live in one place: inserts prepend,
//! updates replace in place, deletes remove, and misses are no-ops.

mod operations;

pub use operations::{apply_event, Applied, InsertPolicy};
