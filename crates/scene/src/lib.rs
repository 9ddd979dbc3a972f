//! Camera, tile geometry and the per-frame visible tile set.

pub mod picking;
pub mod shape;
pub mod viewport;
pub mod visibility;

pub use picking::*;
pub use shape::*;
pub use viewport::*;
pub use visibility::*;
