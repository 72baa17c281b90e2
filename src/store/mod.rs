//! The backing object store the reconciler drives toward the desired state.

mod memory;

use async_trait::async_trait;

pub use crate::store::memory::{Fault, MemoryStore, Operation, Verb};

use crate::error::StoreError;
use crate::object::{Kind, Object, ObjectKey};

/// Access to the cluster's objects.
///
/// Every write is guarded by the object's `resourceVersion`: an update whose
/// version does not match the stored one fails with [`StoreError::Conflict`].
/// This optimistic concurrency token is the only consistency mechanism the
/// reconciler relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: &Kind, key: &ObjectKey) -> Result<Object, StoreError>;

    async fn create(&self, object: Object) -> Result<Object, StoreError>;

    /// Replaces everything except `status`.
    async fn update(&self, object: Object) -> Result<Object, StoreError>;

    /// Replaces only `status`.
    async fn update_status(&self, object: Object) -> Result<Object, StoreError>;
}
