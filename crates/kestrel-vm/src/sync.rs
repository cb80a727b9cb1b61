//! Unified synchronization types for state that host threads may touch.
//!
//! We use parking_lot because:
//! - It has no poisoning (more ergonomic).
//! - Better performance in cases without contention.
//! - API compatible with std (mostly).

pub use parking_lot::{Mutex, MutexGuard};
pub use std::sync::Arc;

/// Alias for the common pattern Arc<Mutex<T>>
pub type SharedQueue<T> = Arc<Mutex<T>>;

/// Helper to create SharedQueue<T> easily
pub fn shared_queue<T>(value: T) -> SharedQueue<T> {
    Arc::new(Mutex::new(value))
}
