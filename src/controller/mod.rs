//! The generic reconcile controller.
//!
//! One [`Controller`] exists per component kind. It is parameterized by an
//! [`Application`], which knows how to fetch the owning object and which
//! children it should have, and owns the collaborators doing the actual
//! work:
//!
//! * [`ApplyEngine`]: writes the children in dependency order.
//! * [`StatusTracker`]: records the `Applied` and `Ready` conditions.
//!
//! Each reconciliation runs the two condition paths concurrently, each on
//! its own slot of the condition list, and persists the owner status once.

mod runner;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, debug, info, info_span, warn};

pub use crate::controller::runner::{Runner, Trigger};

use crate::apply::ApplyEngine;
use crate::assets::AssetProvider;
use crate::component::Component;
use crate::config::Config;
use crate::error::{ConditionError, ReconcileError, StoreError};
use crate::object::{Kind, ObjectKey};
use crate::resource::Resource;
use crate::resource::mutate::Ownership;
use crate::status::{Clock, ConditionStatus, ConditionType, Conditions, StatusTracker};
use crate::store::ObjectStore;

/// What the caller should do once a reconciliation returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }

    /// Requeues if either side does, after the shorter of the two delays.
    pub fn merge(self, other: Self) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Self {
            requeue: self.requeue || other.requeue,
            requeue_after,
        }
    }
}

/// Everything a desired-state producer may read.
pub struct Context<'a> {
    pub config: &'a Config,
    pub assets: &'a dyn AssetProvider,
}

/// Desired-state producer for one kind of owner.
#[async_trait]
pub trait Application: Send + Sync + 'static {
    type Spec: Serialize + DeserializeOwned + Send + Sync;

    fn kind(&self) -> Kind;

    /// Fetches and decodes the owner; `None` when it does not exist.
    async fn fetch_owner(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
    ) -> Result<Option<Component<Self::Spec>>, ReconcileError> {
        let kind = self.kind();

        let object = match store.get(&kind, key).await {
            Ok(object) => object,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(source) => {
                return Err(ReconcileError::Fetch {
                    kind,
                    key: key.clone(),
                    source,
                });
            }
        };

        Component::from_object(&object)
            .map(Some)
            .map_err(|source| ReconcileError::Decode {
                kind,
                key: key.clone(),
                source,
            })
    }

    /// The children `owner` should have. Ownership metadata is added by the
    /// controller.
    async fn desired_children(
        &self,
        ctx: &Context<'_>,
        owner: &Component<Self::Spec>,
    ) -> anyhow::Result<Vec<Resource>>;
}

/// Result of one condition path, merged back into the owner status.
struct PathOutcome {
    conditions: Conditions,
    result: ReconcileResult,
    error: Option<ConditionError>,
}

/// Why the children could not all be applied.
enum ApplyPassError {
    Structural(ConditionError),
    Partial(String),
}

pub struct Controller<A: Application> {
    app: A,
    engine: ApplyEngine,
    tracker: StatusTracker,
    assets: Arc<dyn AssetProvider>,
    config: Config,
}

impl<A: Application> Controller<A> {
    pub fn new(
        app: A,
        store: Arc<dyn ObjectStore>,
        assets: Arc<dyn AssetProvider>,
        config: Config,
    ) -> Self {
        Self {
            app,
            engine: ApplyEngine::new(store, config.apply_workers),
            tracker: StatusTracker::default(),
            assets,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tracker = StatusTracker::new(clock);
        self
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.engine.store()
    }

    /// Drives the children of the owner at `key` toward their desired state
    /// and records the outcome on the owner status.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        let span = info_span!(
            "reconcile",
            kind = %self.app.kind(),
            namespace = %key.namespace,
            name = %key.name,
        );

        self.reconcile_owner(key).instrument(span).await
    }

    async fn reconcile_owner(&self, key: &ObjectKey) -> Result<ReconcileResult, ReconcileError> {
        let Some(mut owner) = self.app.fetch_owner(self.store().as_ref(), key).await? else {
            debug!("owner not found");
            return Ok(ReconcileResult::default());
        };

        if owner.is_deleting() {
            debug!("owner is being deleted");
            return Ok(ReconcileResult::default());
        }

        if owner.controller_class() != self.config.class_name {
            debug!(class = owner.controller_class(), "owner belongs to another controller class");
            return Ok(ReconcileResult::default());
        }

        let ctx = Context {
            config: &self.config,
            assets: self.assets.as_ref(),
        };

        let ownership = Ownership {
            owner: owner.owner_reference(),
            labels: owner.child_labels(&self.config.operator_name),
        };

        let children = self
            .app
            .desired_children(&ctx, &owner)
            .await
            .map(|children| {
                children
                    .into_iter()
                    .map(|child| child.owned_by(ownership.clone()))
                    .collect::<Vec<_>>()
            });

        let message = children.as_ref().err().map(|error| format!("{error:#}"));
        let children = match (&children, &message) {
            (Ok(children), _) => Ok(children.as_slice()),
            (Err(_), message) => Err(message.as_deref().unwrap_or_default()),
        };

        let status = &owner.status;
        let (applied, ready) = tokio::join!(
            self.update_applied(
                status.conditions.slot(ConditionType::Applied),
                owner.metadata.generation,
                status.observed_generation,
                children,
            ),
            self.update_ready(status.conditions.slot(ConditionType::Ready), children),
        );
        let (applied, observed_generation) = applied;

        owner.status.conditions.merge(applied.conditions);
        owner.status.conditions.merge(ready.conditions);
        owner.status.observed_generation = observed_generation;

        let mut result = applied.result.merge(ready.result);

        let mut errors = applied
            .error
            .map(|source| ReconcileError::Condition {
                condition: ConditionType::Applied,
                source,
            })
            .into_iter()
            .chain(ready.error.map(|source| ReconcileError::Condition {
                condition: ConditionType::Ready,
                source,
            }));

        let error = errors.next();
        for other in errors {
            warn!(error = %other, "condition update failed");
        }

        if error.is_some() {
            result.requeue = true;
        }

        match self.update_status(&owner).await {
            Ok(()) => {}
            Err(StoreError::Conflict { retry_after, .. }) => {
                info!("status update conflicted, requeueing");
                result.requeue = true;
                result.requeue_after = retry_after.or(result.requeue_after);
            }
            Err(status_error) => {
                result.requeue = true;
                result.requeue_after = status_error.retry_after().or(result.requeue_after);
                match error {
                    Some(_) => warn!(error = %status_error, "cannot update status field"),
                    None => return Err(ReconcileError::Status(status_error)),
                }
            }
        }

        match error {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }

    async fn update_status(&self, owner: &Component<A::Spec>) -> Result<(), StoreError> {
        let object = owner
            .to_object()
            .map_err(|error| StoreError::Other(error.into()))?;

        self.store().update_status(object).await?;
        Ok(())
    }

    /// The `Applied` condition:
    /// 1. a new generation resets it to `False("new")`;
    /// 2. when it is `True` the children are re-applied, and it only changes
    ///    if that fails;
    /// 3. otherwise it goes `False` while the children are applied, then
    ///    `True` or `False(<error>)`.
    async fn update_applied(
        &self,
        mut conditions: Conditions,
        generation: i64,
        mut observed_generation: i64,
        children: Result<&[Resource], &str>,
    ) -> (PathOutcome, i64) {
        let mut result = ReconcileResult::default();

        let error = self
            .run_applied(
                &mut conditions,
                generation,
                &mut observed_generation,
                children,
                &mut result,
            )
            .await
            .err();

        if error.is_some() {
            result.requeue = true;
        }

        let outcome = PathOutcome {
            conditions,
            result,
            error,
        };
        (outcome, observed_generation)
    }

    /// Every pass re-applies the children with create-or-update, so an
    /// edited child is reverted and a deleted one recreated even while
    /// `Applied` stays `True`.
    async fn run_applied(
        &self,
        conditions: &mut Conditions,
        generation: i64,
        observed_generation: &mut i64,
        children: Result<&[Resource], &str>,
        result: &mut ReconcileResult,
    ) -> Result<(), ConditionError> {
        let applied = ConditionType::Applied;

        if generation != *observed_generation {
            self.tracker.update_condition(
                conditions,
                applied,
                ConditionStatus::False,
                &["new", "new generation detected"],
            )?;
            *observed_generation = generation;
        }

        let current = self.tracker.get_condition_status(conditions, applied);
        if current != ConditionStatus::True {
            self.tracker
                .update_condition(conditions, applied, ConditionStatus::False, &[])?;
        }

        match self.apply(children).await {
            Ok(()) => {
                if current != ConditionStatus::True {
                    self.tracker
                        .update_condition(conditions, applied, ConditionStatus::True, &[])?;
                }
                Ok(())
            }
            Err(ApplyPassError::Partial(message)) => {
                warn!(%message, "cannot apply children");
                self.tracker
                    .update_condition(conditions, applied, ConditionStatus::False, &[&message])?;
                result.requeue = true;
                Ok(())
            }
            Err(ApplyPassError::Structural(error)) => {
                let message = error.to_string();
                self.tracker
                    .update_condition(conditions, applied, ConditionStatus::False, &[&message])?;
                Err(error)
            }
        }
    }

    async fn apply(&self, children: Result<&[Resource], &str>) -> Result<(), ApplyPassError> {
        let children = children.map_err(|message| {
            let error = anyhow::anyhow!(message.to_string());
            ApplyPassError::Structural(ConditionError::Children(error))
        })?;

        let graph = self
            .engine
            .plan(children.to_vec())
            .map_err(|error| ApplyPassError::Structural(error.into()))?;

        let applied = self
            .engine
            .apply(&graph)
            .await
            .into_result()
            .map_err(|error| ApplyPassError::Partial(error.to_string()))?;

        debug!(children = applied.len(), "children applied");
        Ok(())
    }

    /// The `Ready` condition: `True` once every child is ready, `False`
    /// while any is missing or pending, and `False("evaluation-failed")`
    /// when readiness cannot be evaluated.
    async fn update_ready(
        &self,
        mut conditions: Conditions,
        children: Result<&[Resource], &str>,
    ) -> PathOutcome {
        let ready = ConditionType::Ready;

        let (status, reasons): (ConditionStatus, Vec<String>) = match children {
            Err(message) => (
                ConditionStatus::False,
                vec!["evaluation-failed".into(), message.to_string()],
            ),
            Ok(children) => {
                let readiness = self.engine.readiness(children).await;

                if !readiness.errors.is_empty() {
                    for error in &readiness.errors {
                        warn!(%error, "cannot evaluate readiness");
                    }

                    let message = readiness
                        .errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    (ConditionStatus::False, vec!["evaluation-failed".into(), message])
                } else if !readiness.pending.is_empty() {
                    let message = format!("waiting for {}", readiness.pending.join(", "));
                    (ConditionStatus::False, vec!["not-ready".into(), message])
                } else {
                    (ConditionStatus::True, vec![])
                }
            }
        };

        let reasons: Vec<&str> = reasons.iter().map(String::as_str).collect();
        let error = self
            .tracker
            .update_condition(&mut conditions, ready, status, &reasons)
            .err()
            .map(ConditionError::from);

        let result = match status {
            ConditionStatus::True => ReconcileResult::default(),
            _ => ReconcileResult::requeue_after(self.config.requeue_wait),
        };

        PathOutcome {
            conditions,
            result,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::StaticAssets;
    use crate::component::{CLASS_ANNOTATION, ComponentSpec};
    use crate::object::Object;
    use crate::status::ManualClock;
    use crate::store::{Fault, MemoryStore, Verb};
    use chrono::{TimeDelta, TimeZone, Utc};
    use serde_json::json;

    type Children = fn(&Component<ComponentSpec>) -> anyhow::Result<Vec<Resource>>;

    struct TestApp {
        children: Children,
    }

    #[async_trait]
    impl Application for TestApp {
        type Spec = ComponentSpec;

        fn kind(&self) -> Kind {
            Kind::new("Registry")
        }

        async fn desired_children(
            &self,
            _: &Context<'_>,
            owner: &Component<ComponentSpec>,
        ) -> anyhow::Result<Vec<Resource>> {
            (self.children)(owner)
        }
    }

    fn config_map(owner: &Component<ComponentSpec>) -> anyhow::Result<Vec<Resource>> {
        Ok(vec![Resource::new(
            Object::new(Kind::CONFIG_MAP, &owner.key()).with("data", json!({ "a": "b" })),
        )])
    }

    fn with_deployment(owner: &Component<ComponentSpec>) -> anyhow::Result<Vec<Resource>> {
        let mut children = config_map(owner)?;
        children.push(Resource::new(
            Object::new(Kind::DEPLOYMENT, &owner.key()).with(
                "spec",
                json!({ "template": { "spec": { "volumes": [
                    { "name": "config", "configMap": { "name": owner.metadata.name } }
                ] } } }),
            ),
        ));
        Ok(children)
    }

    fn exploding_check(owner: &Component<ComponentSpec>) -> anyhow::Result<Vec<Resource>> {
        Ok(vec![Resource::new(
            Object::new(Kind::CONFIG_MAP, &owner.key()).with("data", json!({ "a": "b" })),
        )
        .with_check(|_| panic!("predicate exploded"))])
    }

    fn broken(_: &Component<ComponentSpec>) -> anyhow::Result<Vec<Resource>> {
        anyhow::bail!("missing template")
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        controller: Controller<TestApp>,
        key: ObjectKey,
    }

    fn fixture(children: Children) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let key = ObjectKey::new("ns", "reg");

        let owner = Component::new(Kind::new("Registry"), &key, ComponentSpec::default());
        store.insert(owner.to_object().unwrap());

        let controller = Controller::new(
            TestApp { children },
            store.clone(),
            Arc::new(StaticAssets::new()),
            Config::default(),
        )
        .with_clock(clock.clone());

        Fixture {
            store,
            clock,
            controller,
            key,
        }
    }

    impl Fixture {
        fn owner(&self) -> Component<ComponentSpec> {
            let object = self.store.peek(&Kind::new("Registry"), &self.key).unwrap();
            Component::from_object(&object).unwrap()
        }

        fn condition(&self, kind: ConditionType) -> crate::status::Condition {
            self.owner().status.conditions.get(kind).cloned().unwrap()
        }

        fn status_writes(&self) -> usize {
            self.store
                .operations()
                .iter()
                .filter(|op| op.verb == Verb::UpdateStatus)
                .count()
        }
    }

    #[tokio::test]
    async fn test_missing_owner_is_ignored() {
        let f = fixture(config_map);
        let result = f
            .controller
            .reconcile(&ObjectKey::new("ns", "other"))
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::default());
        assert_eq!(f.store.effective_writes(), 0);
    }

    #[tokio::test]
    async fn test_deleting_owner_is_not_touched() {
        let f = fixture(config_map);
        f.store.mark_deleted(&Kind::new("Registry"), &f.key);

        let result = f.controller.reconcile(&f.key).await.unwrap();

        assert_eq!(result, ReconcileResult::default());
        assert_eq!(f.status_writes(), 0);
        assert_eq!(f.store.effective_writes(), 0);
    }

    #[tokio::test]
    async fn test_other_class_is_ignored() {
        let f = fixture(config_map);
        let mut owner = f.store.peek(&Kind::new("Registry"), &f.key).unwrap();
        owner
            .metadata
            .annotations
            .insert(CLASS_ANNOTATION.into(), "blue".into());
        f.store.update(owner).await.unwrap();
        f.store.clear_operations();

        let result = f.controller.reconcile(&f.key).await.unwrap();

        assert_eq!(result, ReconcileResult::default());
        assert_eq!(f.store.effective_writes(), 0);
    }

    #[tokio::test]
    async fn test_first_pass_applies_and_waits_for_readiness() {
        let f = fixture(with_deployment);

        let result = f.controller.reconcile(&f.key).await.unwrap();
        assert!(result.requeue);
        assert_eq!(result.requeue_after, Some(Duration::from_secs(2)));

        let owner = f.owner();
        assert_eq!(owner.status.observed_generation, 1);

        let kinds: Vec<_> = owner.status.conditions.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ConditionType::Applied, ConditionType::Ready]);

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::True);

        let ready = f.condition(ConditionType::Ready);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "not-ready");

        let deployment = f
            .store
            .peek(&Kind::DEPLOYMENT, &f.key)
            .expect("deployment is created");
        assert_eq!(deployment.metadata.owner_references.len(), 1);
        assert_eq!(deployment.metadata.labels["app"], "registry");
        assert_eq!(deployment.metadata.labels["harbor"], "reg");
        assert_eq!(f.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_ready_once_children_are_ready() {
        let f = fixture(config_map);

        // Readiness is evaluated next to the apply, so the first pass still
        // finds the config map missing.
        let result = f.controller.reconcile(&f.key).await.unwrap();
        assert!(result.requeue);
        assert_eq!(f.condition(ConditionType::Ready).reason, "not-ready");

        let result = f.controller.reconcile(&f.key).await.unwrap();
        assert!(!result.requeue);

        assert_eq!(f.condition(ConditionType::Applied).status, ConditionStatus::True);
        assert_eq!(f.condition(ConditionType::Ready).status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_applied_pass_corrects_drift() {
        let f = fixture(config_map);
        f.controller.reconcile(&f.key).await.unwrap();
        f.controller.reconcile(&f.key).await.unwrap();
        let since = f.condition(ConditionType::Applied).last_transition_time;

        let mut live = f.store.peek(&Kind::CONFIG_MAP, &f.key).unwrap();
        live.body.insert("data".into(), json!({ "a": "edited" }));
        f.store.update(live).await.unwrap();

        f.controller.reconcile(&f.key).await.unwrap();
        let live = f.store.peek(&Kind::CONFIG_MAP, &f.key).unwrap();
        assert_eq!(live.pointer("/data/a"), Some(&json!("b")));

        f.store.remove(&Kind::CONFIG_MAP, &f.key);
        f.controller.reconcile(&f.key).await.unwrap();
        assert!(f.store.peek(&Kind::CONFIG_MAP, &f.key).is_some());

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::True);
        assert_eq!(applied.last_transition_time, since);
    }

    #[tokio::test]
    async fn test_panicking_readiness_check_is_not_ready() {
        let f = fixture(exploding_check);

        for _ in 0..2 {
            let result = f.controller.reconcile(&f.key).await.unwrap();
            assert!(result.requeue);
        }

        assert_eq!(f.condition(ConditionType::Applied).status, ConditionStatus::True);

        let ready = f.condition(ConditionType::Ready);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "evaluation-failed");
        assert!(ready.message.contains("predicate exploded"));
    }

    #[tokio::test]
    async fn test_status_conflict_requeues() {
        let f = fixture(config_map);
        f.store.inject(
            Verb::UpdateStatus,
            Kind::new("Registry"),
            None,
            Fault::Conflict {
                retry_after: Some(Duration::from_secs(5)),
            },
            Some(1),
        );

        let result = f.controller.reconcile(&f.key).await.unwrap();
        assert!(result.requeue);
        assert_eq!(result.requeue_after, Some(Duration::from_secs(5)));
        assert!(f.owner().status.conditions.is_empty());
    }

    #[tokio::test]
    async fn test_status_failure_is_returned() {
        let f = fixture(config_map);
        f.store.inject(
            Verb::UpdateStatus,
            Kind::new("Registry"),
            None,
            Fault::Fail("etcd is down".into()),
            Some(1),
        );

        let error = f.controller.reconcile(&f.key).await.unwrap_err();
        assert!(matches!(error, ReconcileError::Status(_)));
    }

    #[tokio::test]
    async fn test_apply_failure_sets_applied_false() {
        let f = fixture(config_map);
        f.store.inject(
            Verb::Create,
            Kind::CONFIG_MAP,
            None,
            Fault::Fail("quota exceeded".into()),
            Some(1),
        );

        let result = f.controller.reconcile(&f.key).await.unwrap();
        assert!(result.requeue);

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::False);
        assert!(applied.reason.contains("quota exceeded"));

        f.clock.advance(TimeDelta::seconds(10));
        f.controller.reconcile(&f.key).await.unwrap();

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::True);
        assert_eq!(applied.last_transition_time, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_new_generation_resets_applied() {
        let f = fixture(config_map);
        f.controller.reconcile(&f.key).await.unwrap();

        let first = f.condition(ConditionType::Applied);
        assert_eq!(first.status, ConditionStatus::True);

        let mut owner = f.store.peek(&Kind::new("Registry"), &f.key).unwrap();
        owner.body.insert("spec".into(), json!({ "replicas": 3 }));
        f.store.update(owner).await.unwrap();

        f.clock.advance(TimeDelta::seconds(30));
        f.store.remove(&Kind::CONFIG_MAP, &f.key);
        f.store.inject(
            Verb::Create,
            Kind::CONFIG_MAP,
            None,
            Fault::Unavailable { retry_after: None },
            Some(1),
        );
        f.controller.reconcile(&f.key).await.unwrap();

        let owner = f.owner();
        assert_eq!(owner.status.observed_generation, 2);
        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::False);
        assert_eq!(applied.last_transition_time, Some(f.clock.now()));

        f.clock.advance(TimeDelta::seconds(30));
        f.controller.reconcile(&f.key).await.unwrap();

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::True);
        assert_eq!(applied.last_transition_time, Some(f.clock.now()));
        assert_eq!(f.owner().status.observed_generation, 2);
    }

    #[tokio::test]
    async fn test_new_generation_reaches_true_in_one_pass() {
        let f = fixture(config_map);
        f.controller.reconcile(&f.key).await.unwrap();

        let mut owner = f.store.peek(&Kind::new("Registry"), &f.key).unwrap();
        owner.body.insert("spec".into(), json!({ "replicas": 2 }));
        f.store.update(owner).await.unwrap();

        f.clock.advance(TimeDelta::seconds(30));
        f.controller.reconcile(&f.key).await.unwrap();

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::True);
        assert!(applied.reason.is_empty());
        assert_eq!(applied.last_transition_time, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_children_error_is_structural() {
        let f = fixture(broken);

        let error = f.controller.reconcile(&f.key).await.unwrap_err();
        assert!(matches!(
            error,
            ReconcileError::Condition {
                condition: ConditionType::Applied,
                source: ConditionError::Children(_),
            }
        ));

        let applied = f.condition(ConditionType::Applied);
        assert_eq!(applied.status, ConditionStatus::False);
        assert!(applied.reason.contains("missing template"));

        let ready = f.condition(ConditionType::Ready);
        assert_eq!(ready.reason, "evaluation-failed");
    }
}
