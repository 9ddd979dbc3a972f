/// Lifecycle of a cache entry.
///
/// `Loading → Loaded`, one way. An entry that never finishes is destroyed
/// (cancellation, failure, eviction), never marked unloaded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Residency {
    /// Placeholder allocated, payload in flight. Must not be sampled.
    Loading,
    /// Payload uploaded; safe to bind.
    Loaded,
}

impl Residency {
    pub fn is_loaded(self) -> bool {
        self == Residency::Loaded
    }
}
