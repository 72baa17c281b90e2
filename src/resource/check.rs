//! Readiness predicates, one per child kind.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::Value;

use crate::object::{Kind, Object};
use crate::resource::CheckFn;

/// Predicate for the given kind; kinds without a specific one are always
/// ready.
pub fn for_kind(kind: &Kind) -> CheckFn {
    match kind.as_str() {
        "Deployment" => Arc::new(deployment),
        "Certificate" => Arc::new(certificate),
        "Ingress" => Arc::new(basic),
        _ => Arc::new(always),
    }
}

pub fn always(_: &Object) -> anyhow::Result<bool> {
    Ok(true)
}

fn condition_is_true(conditions: &Value, types: &[&str]) -> anyhow::Result<Option<bool>> {
    let conditions = conditions
        .as_array()
        .context("status.conditions is not a list")?;

    for condition in conditions {
        let kind = condition.get("type").and_then(Value::as_str);
        if kind.is_some_and(|kind| types.contains(&kind)) {
            return match condition.get("status").and_then(Value::as_str) {
                Some("True") => Ok(Some(true)),
                Some("False") | Some("Unknown") => Ok(Some(false)),
                other => bail!("condition {kind:?} has invalid status {other:?}"),
            };
        }
    }

    Ok(None)
}

/// Objects exposing `Ready` or `Available` conditions are ready when that
/// condition is `True`; objects without conditions are ready.
pub fn basic(object: &Object) -> anyhow::Result<bool> {
    match object.pointer("/status/conditions") {
        Some(conditions) => {
            Ok(condition_is_true(conditions, &["Ready", "Available"])?.unwrap_or(true))
        }
        None => Ok(true),
    }
}

pub fn certificate(object: &Object) -> anyhow::Result<bool> {
    match object.pointer("/status/conditions") {
        Some(conditions) => Ok(condition_is_true(conditions, &["Ready"])?.unwrap_or(false)),
        None => Ok(false),
    }
}

fn count(object: &Object, pointer: &str) -> anyhow::Result<Option<i64>> {
    match object.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .with_context(|| format!("{pointer} is not an integer")),
    }
}

/// The rollout of the current generation is complete and every desired
/// replica is updated and available.
pub fn deployment(object: &Object) -> anyhow::Result<bool> {
    let observed = count(object, "/status/observedGeneration")?.unwrap_or(0);
    if observed < object.metadata.generation {
        return Ok(false);
    }

    let desired = count(object, "/spec/replicas")?.unwrap_or(1);
    let updated = count(object, "/status/updatedReplicas")?.unwrap_or(0);
    let available = count(object, "/status/availableReplicas")?.unwrap_or(0);

    Ok(updated >= desired && available >= desired)
}
