//! Reusable fixed-size buffer pool for frame locals, argument arrays and
//! evaluation stacks.
//!
//! A `PoolHandle` is a scoped acquisition: it owns its buffer and returns it
//! from `Drop`, so release happens exactly once on every exit path,
//! including unwinding. Returned buffers are cleared to `Undefined` first so
//! embedded strings and objects can be collected. Oversized requests bypass
//! the pool and are discarded on return.

use crate::value::Value;
use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

struct PoolInner {
    free: Vec<Vec<Value>>,
    buffer_len: usize,
    max_pooled: usize,
    rented: u64,
    returned: u64,
    discarded: u64,
}

/// Rent/return counters for the instrumented-pool invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub rented: u64,
    pub returned: u64,
    pub discarded: u64,
    /// Buffers currently idle in the pool.
    pub pooled: usize,
}

/// Bounded pool of uniform `Vec<Value>` buffers.
#[derive(Clone)]
pub struct ArrayPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl ArrayPool {
    pub fn new(buffer_len: usize, max_pooled: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                free: Vec::new(),
                buffer_len,
                max_pooled,
                rented: 0,
                returned: 0,
                discarded: 0,
            })),
        }
    }

    /// Rent a buffer of at least `min_len` slots, all `Undefined`.
    pub fn rent(&self, min_len: usize) -> PoolHandle {
        let mut inner = self.inner.borrow_mut();
        inner.rented += 1;
        let buf = if min_len > inner.buffer_len {
            // Oversized: exact allocation, discarded on return.
            vec![Value::Undefined; min_len]
        } else {
            let len = inner.buffer_len;
            inner
                .free
                .pop()
                .unwrap_or_else(|| vec![Value::Undefined; len])
        };
        PoolHandle {
            buf,
            pool: Rc::downgrade(&self.inner),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.borrow();
        PoolStats {
            rented: inner.rented,
            returned: inner.returned,
            discarded: inner.discarded,
            pooled: inner.free.len(),
        }
    }
}

/// Owning handle to a rented buffer.
pub struct PoolHandle {
    buf: Vec<Value>,
    pool: Weak<RefCell<PoolInner>>,
}

impl Deref for PoolHandle {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.buf
    }
}

impl DerefMut for PoolHandle {
    fn deref_mut(&mut self) -> &mut [Value] {
        &mut self.buf
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolHandle({} slots)", self.buf.len())
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        let mut inner = inner.borrow_mut();
        inner.returned += 1;
        if buf.len() == inner.buffer_len && inner.free.len() < inner.max_pooled {
            for slot in buf.iter_mut() {
                *slot = Value::Undefined;
            }
            inner.free.push(buf);
        } else {
            inner.discarded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_and_return() {
        let pool = ArrayPool::new(8, 4);
        {
            let mut a = pool.rent(4);
            assert_eq!(a.len(), 8);
            a[0] = Value::Number(1.0);
        }
        let stats = pool.stats();
        assert_eq!(stats.rented, 1);
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.pooled, 1);

        // Recycled buffers come back cleared.
        let b = pool.rent(4);
        assert!(b.iter().all(|v| matches!(v, Value::Undefined)));
        assert_eq!(pool.stats().pooled, 0);
    }

    #[test]
    fn test_oversized_bypasses_pool() {
        let pool = ArrayPool::new(8, 4);
        {
            let big = pool.rent(100);
            assert_eq!(big.len(), 100);
        }
        let stats = pool.stats();
        assert_eq!(stats.rented, 1);
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.pooled, 0);
    }

    #[test]
    fn test_excess_returns_are_dropped() {
        let pool = ArrayPool::new(4, 2);
        let a = pool.rent(4);
        let b = pool.rent(4);
        let c = pool.rent(4);
        drop(a);
        drop(b);
        drop(c);
        let stats = pool.stats();
        assert_eq!(stats.returned, 3);
        assert_eq!(stats.pooled, 2);
        assert_eq!(stats.discarded, 1);
    }
}
