//! In-memory page caching for the keel storage engine.
//!
//! This crate provides a bounded LRU cache with:
//! - O(1) lookup with recency promotion
//! - Eviction gated by a caller-supplied predicate
//! - Capacity auto-sizing from available system memory

mod lru;

pub use lru::{auto_capacity, LruCache};
