//! # Block Store
//!
//! A capacity-capped pool of raw block buffers. Tables draw blocks as they
//! grow and hand them back when dropped; freed buffers are recycled instead
//! of returned to the allocator. The cap bounds how many blocks can be
//! outstanding at once, turning runaway growth into a typed error the owning
//! transaction can abort on.

use parking_lot::Mutex;

use super::layout::BLOCK_SIZE;
use crate::error::{StorageError, StorageResult};

pub struct BlockStore {
    capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    in_use: Mutex<usize>,
}

impl BlockStore {
    /// A store that will hand out at most `capacity` blocks at a time.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(Vec::new()),
            in_use: Mutex::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn blocks_in_use(&self) -> usize {
        *self.in_use.lock()
    }

    /// Acquires a zeroed block buffer, recycling a freed one when available.
    pub fn acquire(&self) -> StorageResult<Box<[u8]>> {
        {
            let mut in_use = self.in_use.lock();
            if *in_use >= self.capacity {
                return Err(StorageError::BlockStoreExhausted {
                    capacity: self.capacity,
                });
            }
            *in_use += 1;
        }
        let recycled = self.free.lock().pop();
        Ok(match recycled {
            Some(mut buffer) => {
                buffer.fill(0);
                buffer
            }
            None => vec![0u8; BLOCK_SIZE].into_boxed_slice(),
        })
    }

    /// Returns a buffer to the pool for reuse.
    pub fn release(&self, buffer: Box<[u8]>) {
        debug_assert_eq!(buffer.len(), BLOCK_SIZE);
        let mut in_use = self.in_use.lock();
        debug_assert!(*in_use > 0);
        *in_use -= 1;
        drop(in_use);
        self.free.lock().push(buffer);
    }
}
