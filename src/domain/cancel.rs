//! Process-wide cooperative cancellation.
//!
//! A cloned token is threaded through planner, executor, reader, and
//! writer. It is checked at task dispatch (table, chunk, planning) and
//! again for every row pulled through a chunk cursor or pushed into an
//! artifact, so a canceled run interrupts in-flight reads at the next row
//! boundary instead of draining the chunk. A canceled chunk leaves its
//! checkpoint row untouched; the next resume run re-executes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
