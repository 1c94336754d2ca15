pub mod caching;
pub mod queue;

pub use caching::{CachingMap, CachingSet};
pub use queue::LockedQueue;
