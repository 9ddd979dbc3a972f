//! Tile residency: keyed LRU/TTL indexes, per-source caches that fetch in the
//! background, and level-of-detail fallback over them.

pub mod downsample;
pub mod elevation;
pub mod fetch;
pub mod index_cache;
pub mod request;
pub mod residency;
pub mod resource;
pub mod template;
pub mod tile_cache;

pub use downsample::*;
pub use elevation::*;
pub use fetch::{FetchError, HttpFetcher, TileFetcher, decode_rgba};
pub use index_cache::*;
pub use request::*;
pub use residency::*;
pub use resource::*;
pub use template::*;
pub use tile_cache::{TileCache, TileCacheConfig, TileSource};
