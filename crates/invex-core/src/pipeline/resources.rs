//! Accounting for per-request temporary artifacts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts live request-scoped artifacts across the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    live: Arc<AtomicUsize>,
    bytes: Arc<AtomicUsize>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact of `bytes` size. Released when the lease drops.
    pub fn lease(&self, bytes: usize) -> Lease {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
        Lease {
            live: Arc::clone(&self.live),
            bytes: Arc::clone(&self.bytes),
            size: bytes,
        }
    }

    /// Artifacts currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Bytes held by live artifacts.
    pub fn live_bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Registration of one artifact in a [`ResourceLedger`].
#[derive(Debug)]
pub struct Lease {
    live: Arc<AtomicUsize>,
    bytes: Arc<AtomicUsize>,
    size: usize,
}

impl Lease {
    /// A lease not attached to any ledger.
    pub fn detached(size: usize) -> Self {
        ResourceLedger::new().lease(size)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.bytes.fetch_sub(self.size, Ordering::SeqCst);
    }
}
