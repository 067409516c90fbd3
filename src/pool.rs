use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{ErrorKind, Result};

/// How many returned buffers a pool keeps around for reuse.
const KEEP: usize = 8;

/// A shared pool of byte buffers.
///
/// Every reader and writer built from one [`Options`](crate::Options)
/// value rents its working storage here, so steady-state streaming does
/// not allocate. Renting and returning is safe from multiple threads; the
/// buffers themselves are owned exclusively by their guards.
#[derive(Debug)]
pub struct BufferPool {
    max_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool whose buffers may grow up to `max_size` bytes.
    pub fn new(max_size: usize) -> BufferPool {
        BufferPool { max_size, free: Mutex::new(vec![]) }
    }

    /// The largest buffer this pool will hand out.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Rent a buffer of at least `min` bytes.
    ///
    /// The buffer is returned to the pool when the guard is dropped. While
    /// the guard lives, the storage cannot be handed to anyone else.
    pub fn rent(self: &Arc<Self>, min: usize) -> Result<PooledBuf> {
        if min > self.max_size {
            return Err(ErrorKind::BufferTooSmall {
                requested: min,
                max: self.max_size,
            }
            .into());
        }
        let mut free = self.free.lock().unwrap();
        let mut buf = match free.iter().position(|b| b.len() >= min) {
            Some(i) => free.swap_remove(i),
            None => vec![],
        };
        drop(free);
        if buf.len() < min {
            buf.resize(min, 0);
        }
        Ok(PooledBuf { buf, pool: Arc::clone(self) })
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock().unwrap();
        if free.len() < KEEP {
            free.push(buf);
        }
    }
}

/// An exclusively owned buffer rented from a [`BufferPool`].
///
/// Dereferences to its `Vec<u8>` storage. Dropping the guard returns the
/// storage to the pool.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    /// Grow the buffer to at least `min` bytes, doubling from its current
    /// size. Fails with `BufferTooSmall` when `min` exceeds the pool
    /// maximum.
    pub fn grow(&mut self, min: usize) -> Result<()> {
        if min > self.pool.max_size {
            return Err(ErrorKind::BufferTooSmall {
                requested: min,
                max: self.pool.max_size,
            }
            .into());
        }
        let new_len = self
            .buf
            .len()
            .saturating_mul(2)
            .max(min)
            .max(4)
            .min(self.pool.max_size);
        debug!("growing pooled buffer from {} to {}", self.buf.len(), new_len);
        self.buf.resize(new_len, 0);
        Ok(())
    }
}

impl Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::BufferPool;
    use crate::error::ErrorKind;

    #[test]
    fn rent_and_reuse() {
        let pool = Arc::new(BufferPool::new(1024));
        let first = {
            let buf = pool.rent(16).unwrap();
            assert!(buf.len() >= 16);
            buf.as_ptr()
        };
        // The storage released above is handed back out.
        let buf = pool.rent(16).unwrap();
        assert_eq!(first, buf.as_ptr());
    }

    #[test]
    fn rent_too_large_fails() {
        let pool = Arc::new(BufferPool::new(8));
        let err = pool.rent(9).unwrap_err();
        match err.into_kind() {
            ErrorKind::BufferTooSmall { requested: 9, max: 8 } => {}
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[test]
    fn grow_doubles_and_respects_max() {
        let pool = Arc::new(BufferPool::new(64));
        let mut buf = pool.rent(16).unwrap();
        buf.grow(17).unwrap();
        assert!(buf.len() >= 32);
        let err = buf.grow(65).unwrap_err();
        match err.into_kind() {
            ErrorKind::BufferTooSmall { requested: 65, max: 64 } => {}
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[test]
    fn concurrent_rent_return() {
        let pool = Arc::new(BufferPool::new(1 << 20));
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let mut buf = pool.rent(64).unwrap();
                    buf[0] = 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
