/// Cursor Module
///
/// The indexer's resume point: the next height that has not been durably indexed.
/// Only the scheduler's coordinator advances it; anyone may read it.
use std::sync::{Mutex, PoisonError};

use crate::error::CursorError;

#[derive(Debug)]
pub struct Cursor {
    next_height: Mutex<u64>,
}

impl Cursor {
    pub fn new(next_height: u64) -> Self {
        Self { next_height: Mutex::new(next_height) }
    }

    /// Next height to process
    pub fn get(&self) -> u64 {
        *self.next_height.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the cursor forward to `to`. Moving to the current value is a no-op.
    pub fn advance(&self, to: u64) -> Result<(), CursorError> {
        let mut next_height = self.next_height.lock().unwrap_or_else(PoisonError::into_inner);
        if to < *next_height {
            return Err(CursorError::OutOfOrderAdvance { current: *next_height, requested: to });
        }
        *next_height = to;
        Ok(())
    }
}
