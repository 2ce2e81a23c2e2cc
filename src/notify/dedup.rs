use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("dedup store unavailable: {0}")]
    Unavailable(String),
}

/// Result of trying to claim an event id for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the id and must `mark` or `release` it.
    Acquired,
    /// The id already produced its side effect.
    Seen,
    /// Another delivery of the id is being dispatched right now.
    InFlight,
}

impl Claim {
    #[inline]
    pub fn acquired(&self) -> bool {
        *self == Claim::Acquired
    }
}

/// Tracks which event ids have triggered their side effect.
///
/// `try_claim` is a single atomic check-and-set, so two concurrent
/// deliveries of one id can never both be told to dispatch. Implementations
/// backed by a shared store (with a TTL) can replace the in-memory one.
#[async_trait]
pub trait DedupGate: Send + Sync {
    async fn try_claim(&self, id: &str) -> Result<Claim, DedupError>;

    /// Record that the claimed id's side effect happened.
    async fn mark(&self, id: &str) -> Result<(), DedupError>;

    /// Drop an in-flight claim after a failed dispatch. Seen ids stay seen.
    async fn release(&self, id: &str) -> Result<(), DedupError>;

    async fn seen(&self, id: &str) -> Result<bool, DedupError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    InFlight,
    Seen,
}

/// Process-local dedup map.
///
/// Unbounded for the process lifetime, lost on restart and invisible to
/// other instances.
#[derive(Debug, Default)]
pub struct InMemoryDedupGate {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryDedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl DedupGate for InMemoryDedupGate {
    async fn try_claim(&self, id: &str) -> Result<Claim, DedupError> {
        let mut entries = self.entries.lock();
        let claim = match entries.get(id) {
            Some(Entry::Seen) => Claim::Seen,
            Some(Entry::InFlight) => Claim::InFlight,
            None => {
                entries.insert(id.to_string(), Entry::InFlight);
                Claim::Acquired
            }
        };
        Ok(claim)
    }

    async fn mark(&self, id: &str) -> Result<(), DedupError> {
        self.entries.lock().insert(id.to_string(), Entry::Seen);
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), DedupError> {
        let mut entries = self.entries.lock();
        if entries.get(id) == Some(&Entry::InFlight) {
            entries.remove(id);
        }
        Ok(())
    }

    async fn seen(&self, id: &str) -> Result<bool, DedupError> {
        Ok(self.entries.lock().get(id) == Some(&Entry::Seen))
    }
}
