pub mod backend;
pub mod core;
pub mod file;
pub mod memory;


// Re-export the primary types so callers can use `crate::store::*`.
pub use backend::{KvBackend, WriteBatch, WriteOp};
pub use self::core::{GrantScan, GrantStore};
pub use file::FileBackend;
pub use memory::MemoryBackend;
