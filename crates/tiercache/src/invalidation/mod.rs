//! Cross-instance invalidation of local (L1) layers.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: cache.evict("key1")  (L2 and own L1 already updated)
//!   ↓
//! PUBLISH cache:invalidation:character {"type":"EVICT","key":"key1",...}
//!   ↓
//! Instance 1: receives own event → skipped
//! Instance 2: receives event     → removes key1 from its L1
//! Instance 3: receives event     → removes key1 from its L1
//! ```

mod publisher;
mod registry;
mod subscriber;

pub use publisher::InvalidationPublisher;
pub use registry::{LocalCacheRegistry, LocalInvalidation};
pub use subscriber::{Disposition, InvalidationSubscriber};
