//! In-process store implementations.
//!
//! Both are complete stores in their own right: the engine treats them exactly like remote ones. They serve local
//! deployments, development setups and the crate's own tests.

pub mod memory_cache;
pub mod memory_object;

pub use memory_cache::MemoryCacheStore;
pub use memory_object::MemoryObjectStore;
