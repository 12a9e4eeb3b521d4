//! Draft/published pair streams
//!
//! - [`local`]: buffered document events → local document views
//! - [`merge`]: draft + published views → complete pairs
//! - [`cache`]: one shared upstream per key
//! - [`accessor`]: the `get_pair` entry point wiring the three together

pub mod accessor;
pub mod cache;
pub mod local;
pub mod merge;

pub use accessor::PairAccessor;
pub use cache::{SharedStreamCache, SharedSubscription};
pub use local::{to_local_document, LocalDocument};
pub use merge::{merge_pair, LocalPair, PairUpdate, PartialPair};
