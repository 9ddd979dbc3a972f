/// Identifies one fetch of one tile.
///
/// A coordinate can be fetched many times over the cache's lifetime (after an
/// expiry or a failure). Completions carry the id they were issued with so a
/// late answer for a recycled entry is recognised and dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Request(pub u64);

impl Request {
    pub fn next(self) -> Request {
        Request(self.0.wrapping_add(1))
    }
}
