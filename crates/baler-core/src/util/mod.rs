//! Small shared primitives: the build-parallelism gate and the
//! collection types used by graph traversals.

pub mod queue;
pub mod semaphore;

pub use queue::{SortableSet, WorkQueue};
pub use semaphore::{Permit, Semaphore};
