//! A desired object together with the two functions that know how to write
//! it and how to tell whether it is healthy.

pub mod check;
pub mod mutate;

use std::sync::Arc;

use tracing::debug;

use crate::error::{ApplyError, ApplyFailure, ReadinessError};
use crate::object::{Kind, Object, ObjectKey};
use crate::resource::mutate::Ownership;
use crate::store::ObjectStore;

/// Turns the live object (if any) and the desired one into the object to
/// persist.
pub type MutateFn = Arc<dyn Fn(Option<&Object>, &Object) -> anyhow::Result<Object> + Send + Sync>;

/// Tells whether a live object is ready.
pub type CheckFn = Arc<dyn Fn(&Object) -> anyhow::Result<bool> + Send + Sync>;

/// What a create-or-update call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Clone)]
pub struct Resource {
    desired: Object,
    mutate: MutateFn,
    check: CheckFn,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("desired", &self.desired.label())
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// Wraps `desired` with the default merge and the readiness predicate of
    /// its kind.
    pub fn new(desired: Object) -> Self {
        let check = check::for_kind(&desired.kind);
        Self {
            desired,
            mutate: Arc::new(
                |existing: Option<&Object>, desired: &Object| -> anyhow::Result<Object> {
                    Ok(mutate::merge(existing, desired))
                },
            ),
            check,
        }
    }

    pub fn with_mutate<F>(mut self, mutate: F) -> Self
    where
        F: Fn(Option<&Object>, &Object) -> anyhow::Result<Object> + Send + Sync + 'static,
    {
        self.mutate = Arc::new(mutate);
        self
    }

    /// Stamps `ownership` on whatever the current mutate function produces.
    pub fn owned_by(mut self, ownership: Ownership) -> Self {
        let inner = self.mutate;
        self.mutate = Arc::new(
            move |existing: Option<&Object>, desired: &Object| -> anyhow::Result<Object> {
                let mut object = inner(existing, desired)?;
                ownership.stamp(&mut object);
                Ok(object)
            },
        );
        self
    }

    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Object) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.check = Arc::new(check);
        self
    }

    pub fn kind(&self) -> &Kind {
        &self.desired.kind
    }

    pub fn key(&self) -> ObjectKey {
        self.desired.key()
    }

    pub fn desired(&self) -> &Object {
        &self.desired
    }

    pub fn label(&self) -> String {
        self.desired.label()
    }

    fn error(&self, source: ApplyFailure) -> ApplyError {
        ApplyError {
            kind: self.desired.kind.clone(),
            key: self.key(),
            source,
        }
    }

    /// Create-or-update: creates the mutated desired object when it does not
    /// exist, otherwise mutates the live object and writes it back. Nothing is
    /// written when the mutation leaves the live object untouched.
    pub async fn apply(&self, store: &dyn ObjectStore) -> Result<Outcome, ApplyError> {
        let key = self.key();

        let existing = match store.get(&self.desired.kind, &key).await {
            Ok(existing) => Some(existing),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(self.error(ApplyFailure::Get(err))),
        };

        let object = (self.mutate)(existing.as_ref(), &self.desired)
            .map_err(|err| self.error(ApplyFailure::Mutate(err)))?;

        match existing {
            None => {
                debug!(resource = %self.label(), "creating");
                store
                    .create(object)
                    .await
                    .map_err(|err| self.error(ApplyFailure::Create(err)))?;
                Ok(Outcome::Created)
            }
            Some(existing) if existing == object => Ok(Outcome::Unchanged),
            Some(_) => {
                debug!(resource = %self.label(), "updating");
                store
                    .update(object)
                    .await
                    .map_err(|err| self.error(ApplyFailure::Update(err)))?;
                Ok(Outcome::Updated)
            }
        }
    }

    /// Fetches the live object and evaluates the readiness predicate on it.
    /// A missing object is reported as not ready.
    pub async fn check(&self, store: &dyn ObjectStore) -> Result<bool, ReadinessError> {
        let key = self.key();

        let live = match store.get(&self.desired.kind, &key).await {
            Ok(live) => live,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(source) => {
                return Err(ReadinessError::Fetch {
                    kind: self.desired.kind.clone(),
                    key,
                    source,
                });
            }
        };

        (self.check)(&live).map_err(|source| ReadinessError::Predicate {
            kind: self.desired.kind.clone(),
            key,
            source,
        })
    }
}
