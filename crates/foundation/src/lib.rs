pub mod math;
pub mod tile;

// Foundation crate: small, well-tested primitives only.
pub use tile::*;
