/// Preference storage: the canonical in-memory store, its snapshots, and
/// the durable cache it writes behind to.
pub mod cache;
pub mod local;
pub mod snapshot;
pub mod writer;

pub use cache::*;
pub use local::*;
pub use snapshot::*;
pub use writer::*;
