use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// Per-worker scratch allocator for invocation-lifetime buffers.
///
/// Stack and heap backings are checked out at invocation start and returned
/// automatically when the invocation's region table drops, on every exit
/// path including faults, so a failed invocation can never leak its scratch
/// memory. Returned buffers are pooled and re-zeroed on the next checkout.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    pool: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks out a zero-filled buffer of exactly `size` bytes.
    pub fn take(&self, size: usize) -> ScratchBuf {
        let mut buf = {
            let mut pool = self.pool.borrow_mut();
            // Best fit over a pool this small is not worth it; reuse the
            // first buffer with enough capacity.
            match pool.iter().position(|b| b.capacity() >= size) {
                Some(idx) => pool.swap_remove(idx),
                None => Vec::with_capacity(size),
            }
        };
        buf.clear();
        buf.resize(size, 0);
        ScratchBuf { buf, pool: Rc::clone(&self.pool) }
    }

    /// Buffers currently sitting in the pool.
    pub fn pooled(&self) -> usize {
        self.pool.borrow().len()
    }
}

/// A checked-out scratch buffer; returns itself to the arena on drop.
#[derive(Debug)]
pub struct ScratchBuf {
    buf: Vec<u8>,
    pool: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Deref for ScratchBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for ScratchBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for ScratchBuf {
    fn drop(&mut self) {
        self.pool.borrow_mut().push(std::mem::take(&mut self.buf));
    }
}
