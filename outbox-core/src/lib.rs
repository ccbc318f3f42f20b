pub mod error;
pub mod clock;
pub mod retry;
pub mod store;
pub mod memory_store;
pub mod file_store;
pub mod snapshot;

pub use error::{Error, Result};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use retry::RetryPolicy;
pub use store::{PersistentStore, SharedStore, StoreExt};
pub use memory_store::MemoryStore;
pub use file_store::FileStore;
pub use snapshot::{CachedSnapshot, SnapshotCache};
