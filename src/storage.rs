//! Collaborator stores behind the rank engine.
//!
//! The engine never owns its data. Counters live in a [`traits::CounterStore`],
//! authoritative scores in an [`traits::ExactScoreStore`], and the last known
//! score of evicted members in a [`traits::ProfileStore`].
//!
//! # Backends
//!
//! - [`memory`]: lock-protected maps for embedding and tests
//! - [`file`]: a counter store persisted as a snapshot plus a journal
//!
//! # Example
//!
//! ```
//! use segrank::segment::partition::IntervalKey;
//! use segrank::storage::memory::MemoryCounterStore;
//! use segrank::storage::traits::CounterStore;
//!
//! let store = MemoryCounterStore::new();
//! let key = IntervalKey::new(0, 100);
//! store.apply_batch(&[(key, 2), (key, -1)]).unwrap();
//! assert_eq!(store.get(&key).unwrap(), 1);
//! ```

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::{FileCounterStore, FileCounterStoreConfig};
pub use memory::{MemoryCounterStore, MemoryProfileStore, MemoryScoreStore};
pub use traits::{CounterDelta, CounterStore, ExactScoreStore, ProfileStore};
