//! Generic persistent-object base
//!
//! Supplies the persistence substrate the Helio model builds on: UUID
//! identity plus dict-based read/write ([`PersistentObject`]), helpers for
//! working with property dicts, and a storage system with trash semantics so
//! a removed item can be restored by UUID ([`MemoryStorageSystem`]).

pub mod dict;
pub mod object;
pub mod storage;

pub use object::PersistentObject;
pub use storage::{MemoryStorageSystem, StorageError, StorageSystem};
