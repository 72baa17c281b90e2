//! Work queue driving a [`Controller`].
//!
//! The queue works as follows:
//! 1. Keys arrive through a [`Trigger`] and are queued at most once.
//! 2. Up to `concurrent_reconciles` distinct keys are reconciled at a time,
//!    each bounded by `reconcile_timeout`.
//! 3. A key triggered while it is being reconciled is queued exactly once
//!    more, after the running reconciliation returns.
//! 4. A result asking for a requeue puts the key back after `requeue_after`,
//!    or after `requeue_wait` when no delay was given. Errors put it back
//!    with an exponential backoff.
//!
//! The runner stops once every [`Trigger`] is dropped and nothing is left
//! running or queued. Pending delayed requeues are discarded at that point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::controller::{Application, Controller, ReconcileResult};
use crate::error::ReconcileError;
use crate::object::ObjectKey;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Schedules reconciliations on a [`Runner`].
#[derive(Debug, Clone)]
pub struct Trigger(UnboundedSender<ObjectKey>);

impl Trigger {
    /// Returns `false` when the runner is gone.
    pub fn trigger(&self, key: ObjectKey) -> bool {
        self.0.send(key).is_ok()
    }
}

type Finished = (ObjectKey, Result<ReconcileResult, ReconcileError>);

pub struct Runner<A: Application> {
    controller: Arc<Controller<A>>,
    receiver: UnboundedReceiver<ObjectKey>,
    requeue: WeakUnboundedSender<ObjectKey>,
    queue: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    running: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

impl<A: Application> Runner<A> {
    pub fn new(controller: Arc<Controller<A>>) -> (Self, Trigger) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let runner = Self {
            controller,
            receiver,
            requeue: sender.downgrade(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            running: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
        };

        (runner, Trigger(sender))
    }

    fn enqueue(&mut self, key: ObjectKey) {
        if self.running.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.queue.push_back(key);
        }
    }

    fn requeue_after(&self, key: ObjectKey, delay: Duration) {
        debug!(%key, ?delay, "requeue");

        let sender = self.requeue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(key);
            }
        });
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.controller
            .config()
            .requeue_wait
            .saturating_mul(factor)
            .min(MAX_BACKOFF)
    }

    fn finish(&mut self, key: ObjectKey, outcome: Result<ReconcileResult, ReconcileError>) {
        self.running.remove(&key);

        match outcome {
            Ok(result) => {
                self.failures.remove(&key);

                if let Some(delay) = result.requeue_after {
                    self.requeue_after(key.clone(), delay);
                } else if result.requeue {
                    self.requeue_after(key.clone(), self.controller.config().requeue_wait);
                }
            }
            Err(error) => {
                let failures = self.failures.entry(key.clone()).or_default();
                *failures += 1;
                let failures = *failures;

                error!(%key, %error, failures, "reconciliation failed");
                self.requeue_after(key.clone(), self.backoff(failures));
            }
        }

        if self.dirty.remove(&key) {
            self.enqueue(key);
        }
    }

    /// Processes keys until every [`Trigger`] is dropped and the queue is
    /// drained.
    pub async fn run(mut self) {
        let limit = self.controller.config().concurrent_reconciles.max(1);
        let timeout = self.controller.config().reconcile_timeout;

        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut open = true;

        loop {
            while tasks.len() < limit
                && let Some(key) = self.queue.pop_front()
            {
                self.queued.remove(&key);
                self.running.insert(key.clone());

                let controller = self.controller.clone();
                tasks.spawn(async move {
                    let outcome = tokio::time::timeout(timeout, controller.reconcile(&key))
                        .await
                        .unwrap_or(Err(ReconcileError::Timeout(timeout)));
                    (key, outcome)
                });
            }

            tokio::select! {
                key = self.receiver.recv(), if open => match key {
                    Some(key) => self.enqueue(key),
                    None => open = false,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok((key, outcome)) => self.finish(key, outcome),
                    Err(error) => warn!(%error, "reconciliation task failed"),
                },
                else => break,
            }
        }
    }
}
