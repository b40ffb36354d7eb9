//! keyhold storage — an in-process implementation of every repository
//! contract from `keyhold-core`.
//!
//! All tables live behind one async lock, which makes every documented
//! atomic operation (challenge superseding, attempt counting, device
//! upsert, refresh-token rotation, default-grant switching) a single
//! critical section.

pub mod memory;

pub use memory::MemoryStore;
