pub mod budget;
pub mod frame;
pub mod metrics;

pub use budget::*;
pub use frame::*;
pub use metrics::*;
