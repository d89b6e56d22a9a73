//! Error taxonomy
//!
//! Only expected runtime failures appear here. Unresolved references are not
//! errors at all (they surface as `is_resolved == false`), evaluation
//! failures are captured as `error_text` on the computation, and contract
//! violations (double bind, use after close, removing an absent item) panic
//! rather than returning a variant.

use thiserror::Error;
use uuid::Uuid;

pub use helio_persist::StorageError;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("project error: {0}")]
    Project(#[from] ProjectError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectError {
    #[error("no item with uuid {0}")]
    ItemNotFound(Uuid),
    #[error("no restorable snapshot for uuid {0}")]
    NothingToRestore(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("transform already registered for processing id '{0}'")]
    AlreadyRegistered(String),
    #[error("global transform registry already installed")]
    AlreadyInstalled,
}
