use std::io;
use std::sync::Arc;

use crate::error::Result;
use crate::pool::{BufferPool, PooledBuf};

/// A pushback-capable input buffer.
///
/// The region `[pos, end)` of the underlying storage holds bytes that have
/// been read from the adapter but not yet consumed. Consumed bytes stay in
/// place until the next [`fill`](ReadBuffer::fill), which lets
/// [`push_back`](ReadBuffer::push_back) return the tail of what was just
/// consumed to the front of the stream.
#[derive(Debug)]
pub struct ReadBuffer {
    buf: PooledBuf,
    pos: usize,
    end: usize,
}

impl ReadBuffer {
    /// Create a buffer with storage rented from `pool`.
    pub fn new(pool: &Arc<BufferPool>, capacity: usize) -> Result<ReadBuffer> {
        Ok(ReadBuffer { buf: pool.rent(capacity.max(1))?, pos: 0, end: 0 })
    }

    /// The unconsumed bytes.
    pub fn contents(&self) -> &[u8] {
        &self.buf[self.pos..self.end]
    }

    /// Whether all buffered bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos == self.end
    }

    /// Mark `n` buffered bytes as consumed.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.end - self.pos, "consumed past end of buffer");
        self.pos += n;
    }

    /// Return the last `n` consumed bytes to the front of the stream, so
    /// they are seen again. Only bytes consumed since the last `fill` can
    /// be pushed back.
    pub fn push_back(&mut self, n: usize) {
        assert!(n <= self.pos, "pushed back more than was consumed");
        self.pos -= n;
    }

    /// Read more bytes from `rdr`, first discarding consumed bytes (which
    /// invalidates pushback) and growing the storage when the unconsumed
    /// region already fills it.
    ///
    /// Returns the number of bytes read; 0 means end of input.
    pub fn fill<R: io::Read>(&mut self, rdr: &mut R) -> Result<usize> {
        self.make_room()?;
        let n = rdr.read(&mut self.buf[self.end..])?;
        self.end += n;
        Ok(n)
    }

    /// Like [`fill`](ReadBuffer::fill), but for an async adapter.
    #[cfg(feature = "tokio")]
    pub async fn fill_async<R>(&mut self, rdr: &mut R) -> Result<usize>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;

        self.make_room()?;
        let n = rdr.read(&mut self.buf[self.end..]).await?;
        self.end += n;
        Ok(n)
    }

    fn make_room(&mut self) -> Result<()> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
        if self.end == self.buf.len() {
            let want = self.end + 1;
            self.buf.grow(want)?;
        }
        Ok(())
    }
}
