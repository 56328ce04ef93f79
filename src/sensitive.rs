//! Pooled buffers for secret-grade bytes. Released storage is wiped before
//! it becomes reusable, so thumbprint material and session secrets never
//! linger on the heap after their scope ends.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use zeroize::Zeroize;

const MIN_BUCKET: usize = 32;
const MAX_POOLED: usize = 64 * 1024;
const MAX_FREE_PER_BUCKET: usize = 32;

lazy_static! {
    static ref SHARED: SensitivePool = SensitivePool::new();
}

struct PoolInner {
    free: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
}

/// Allocator of [`SensitiveBuffer`]s. Buckets allocations by power-of-two
/// size class; a released buffer is zeroized in full (capacity included)
/// before it re-enters the free list.
#[derive(Clone)]
pub struct SensitivePool {
    inner: Arc<PoolInner>,
}

impl SensitivePool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Process-wide default pool.
    pub fn shared() -> &'static SensitivePool {
        &SHARED
    }

    fn bucket_for(len: usize) -> usize {
        len.max(MIN_BUCKET).next_power_of_two()
    }

    /// Rents a buffer of exactly `len` visible bytes, zero-initialized.
    /// Oversized requests bypass the pool but keep the wipe-on-drop
    /// guarantee.
    pub fn rent(&self, len: usize) -> SensitiveBuffer {
        let bucket = Self::bucket_for(len);
        let storage = if bucket <= MAX_POOLED {
            let mut free = self.inner.free.lock().unwrap();
            free.get_mut(&bucket).and_then(|list| list.pop())
        } else {
            None
        };
        let storage = storage.unwrap_or_else(|| vec![0u8; bucket]);
        debug_assert!(storage.iter().all(|&b| b == 0));
        SensitiveBuffer {
            storage: Some(storage),
            len,
            pool: Some(self.inner.clone()),
        }
    }

    /// Rents a buffer initialized with a copy of `bytes`.
    pub fn rent_copy(&self, bytes: &[u8]) -> SensitiveBuffer {
        let mut buf = self.rent(bytes.len());
        buf.copy_from_slice(bytes);
        buf
    }

    #[cfg(test)]
    fn free_count(&self, len: usize) -> usize {
        let bucket = Self::bucket_for(len);
        let free = self.inner.free.lock().unwrap();
        free.get(&bucket).map_or(0, |list| list.len())
    }
}

impl Default for SensitivePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to a pooled byte region. Derefs to exactly the
/// requested length even though the backing allocation may be larger.
pub struct SensitiveBuffer {
    storage: Option<Vec<u8>>,
    len: usize,
    pool: Option<Arc<PoolInner>>,
}

impl SensitiveBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the visible bytes into an ordinary heap vector. This is the
    /// only path that moves secret material out of pool custody; callers
    /// own the lifetime of the copy.
    pub fn into_vec(self) -> Vec<u8> {
        self.as_ref().to_vec()
    }
}

impl Deref for SensitiveBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage.as_ref().expect("storage present")[..self.len]
    }
}

impl DerefMut for SensitiveBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.storage.as_mut().expect("storage present")[..len]
    }
}

impl AsRef<[u8]> for SensitiveBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for SensitiveBuffer {
    fn drop(&mut self) {
        if let Some(mut storage) = self.storage.take() {
            // Wipe in place; zeroizing the Vec itself would also clear its
            // length and ruin the allocation for reuse.
            storage.as_mut_slice().zeroize();
            if storage.len() <= MAX_POOLED {
                if let Some(pool) = self.pool.take() {
                    let mut free = pool.free.lock().unwrap();
                    let list = free.entry(storage.len()).or_default();
                    if list.len() < MAX_FREE_PER_BUCKET {
                        list.push(storage);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SensitiveBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SensitiveBuffer({} bytes)", self.len)
    }
}
