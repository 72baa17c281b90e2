use std::time::Duration;

use thiserror::Error;

use crate::object::{Kind, ObjectKey};
use crate::status::ConditionType;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{key}' not found")]
    NotFound { kind: Kind, key: ObjectKey },

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: Kind, key: ObjectKey },

    #[error(
        "{kind} '{key}' has been modified; please apply your changes to the latest version and try again"
    )]
    Conflict {
        kind: Kind,
        key: ObjectKey,
        retry_after: Option<Duration>,
    },

    #[error("Store unavailable: {message}")]
    Unavailable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Delay suggested by the store before the caller tries again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StoreError::Conflict { retry_after, .. } => *retry_after,
            StoreError::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Adding dependency {dependent} -> {dependency} would create a cycle")]
    Cycle {
        dependent: String,
        dependency: String,
    },

    #[error("Unknown resource handle #{0}")]
    UnknownHandle(usize),
}

#[derive(Debug, Error)]
pub enum ApplyFailure {
    #[error("Cannot get resource:\n{0}")]
    Get(StoreError),

    #[error("Cannot mutate resource:\n{0}")]
    Mutate(anyhow::Error),

    #[error("Cannot create resource:\n{0}")]
    Create(StoreError),

    #[error("Cannot update resource:\n{0}")]
    Update(StoreError),

    #[error("{0}")]
    Panicked(String),

    #[error("Task was cancelled")]
    Cancelled,
}

/// One node of the resource graph could not be applied.
#[derive(Debug, Error)]
#[error("{kind} '{key}': {source}")]
pub struct ApplyError {
    pub kind: Kind,
    pub key: ObjectKey,
    #[source]
    pub source: ApplyFailure,
}

/// A node that was never attempted because one of its dependencies did not
/// succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub kind: Kind,
    pub key: ObjectKey,
    pub waiting_on: String,
}

impl std::fmt::Display for Blocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' blocked by {}", self.kind, self.key, self.waiting_on)
    }
}

#[derive(Debug, Error)]
pub struct AggregateApplyError {
    pub failed: Vec<ApplyError>,
    pub blocked: Vec<Blocked>,
}

impl std::fmt::Display for AggregateApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} resource(s) failed, {} blocked",
            self.failed.len(),
            self.blocked.len()
        )?;

        for error in &self.failed {
            write!(f, "; {error}")?;
        }

        for blocked in &self.blocked {
            write!(f, "; {blocked}")?;
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("Cannot get {kind} '{key}':\n{source}")]
    Fetch {
        kind: Kind,
        key: ObjectKey,
        source: StoreError,
    },

    #[error("Cannot evaluate readiness of {kind} '{key}':\n{source}")]
    Predicate {
        kind: Kind,
        key: ObjectKey,
        source: anyhow::Error,
    },

    #[error("Readiness check of {kind} '{key}' did not finish:\n{message}")]
    Panicked {
        kind: Kind,
        key: ObjectKey,
        message: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Expecting reason and message, got {0} parameters")]
pub struct ArgumentError(pub usize);

/// Failure of one of the two status paths of a reconciliation.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Cannot build desired children:\n{0:#}")]
    Children(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Cannot get {kind} '{key}':\n{source}")]
    Fetch {
        kind: Kind,
        key: ObjectKey,
        source: StoreError,
    },

    #[error("Cannot convert {kind} '{key}':\n{source}")]
    Decode {
        kind: Kind,
        key: ObjectKey,
        source: serde_json::Error,
    },

    #[error("Cannot set status, type={condition}:\n{source}")]
    Condition {
        condition: ConditionType,
        source: ConditionError,
    },

    #[error("Cannot update status field:\n{0}")]
    Status(StoreError),

    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Asset '{0}' not found")]
    NotFound(String),

    #[error("Couldn't read asset {path}.\n{source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[cfg(feature = "templates")]
    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[cfg(feature = "templates")]
    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't load configuration.\n{0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Invalid value '{value}' for {variable}")]
    InvalidValue { variable: String, value: String },
}
