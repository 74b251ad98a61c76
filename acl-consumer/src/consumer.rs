//! Per-partition processing loop.
//!
//! One consumer owns one partition and processes it strictly in order: the
//! next event is not read until the current event's checkpoint decision is
//! final. The checkpoint advances only after translation succeeded and the
//! dispatch outcomes satisfy the configured policy, which is what makes
//! delivery at-least-once: anything that fails before the commit leaves the
//! checkpoint untouched, and the event is redelivered after a restart.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info};

use acl_common::checkpoint::{CheckpointStore, StoreError};
use acl_common::health::{ComponentStatus, HealthHandle};

use crate::dispatcher::{ChannelDispatcher, ChannelSender, CheckpointPolicy};
use crate::error::ConsumerError;
use crate::source::{EventSource, RawEvent};
use crate::translator::translate;

/// Lifecycle of a partition consumer.
///
/// `Faulted` is terminal: the coordinator never restarts a faulted partition,
/// so a permanently malformed payload stalls its partition until an operator
/// intervenes instead of being silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Faulted,
}

/// Shared view of a consumer's state, readable by the coordinator and tests.
pub type StateHandle = Arc<RwLock<ConsumerState>>;

const LIVENESS_TICK_SECONDS: u64 = 10;

pub struct PartitionConsumer<E, S> {
    partition_id: String,
    source: E,
    dispatcher: ChannelDispatcher<S>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    state: StateHandle,
    shutdown: watch::Receiver<bool>,
    liveness: HealthHandle,
}

impl<E, S> PartitionConsumer<E, S>
where
    E: EventSource,
    S: ChannelSender,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition_id: String,
        source: E,
        dispatcher: ChannelDispatcher<S>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        policy: CheckpointPolicy,
        shutdown: watch::Receiver<bool>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            partition_id,
            source,
            dispatcher,
            checkpoint_store,
            policy,
            state: Arc::new(RwLock::new(ConsumerState::Stopped)),
            shutdown,
            liveness,
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.write().expect("consumer state lock poisoned") = state;
        info!(partition = %self.partition_id, ?state, "partition consumer state");
    }

    /// Processes the partition until the source drains, the shutdown signal
    /// flips, or a processing error faults the partition.
    pub async fn run(mut self) -> Result<(), ConsumerError> {
        self.set_state(ConsumerState::Starting);

        match self.run_inner().await {
            Ok(()) => {
                self.set_state(ConsumerState::Stopped);
                Ok(())
            }
            Err(e) => {
                error!(partition = %self.partition_id, "partition consumer faulted: {e}");
                self.set_state(ConsumerState::Faulted);
                self.liveness.report_status(ComponentStatus::Unhealthy).await;
                metrics::counter!(
                    "acl_partitions_faulted_total",
                    &[("partition", self.partition_id.clone())]
                )
                .increment(1);
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), ConsumerError> {
        let resume_after = self.checkpoint_store.load(&self.partition_id).await?;
        self.source.seek(resume_after).await?;
        info!(
            partition = %self.partition_id,
            ?resume_after,
            "partition consumer resuming"
        );

        self.set_state(ConsumerState::Running);

        // Reported between events and on a timer, so an idle partition does
        // not trip the liveness deadline while next_event suspends.
        let mut liveness_interval =
            tokio::time::interval(std::time::Duration::from_secs(LIVENESS_TICK_SECONDS));

        loop {
            // Stop requests are honored only between events: an in-flight
            // event always finishes (or fails) before the stop takes effect.
            if *self.shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = liveness_interval.tick() => {
                    self.liveness.report_healthy().await;
                    continue;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = self.source.next_event() => next?,
            };

            let Some(event) = next else {
                // Finite source drained.
                break;
            };
            self.process_event(event).await?;
        }

        // Dropping the source releases the partition lease to the stream
        // infrastructure.
        self.set_state(ConsumerState::Stopping);
        Ok(())
    }

    async fn process_event(&self, event: RawEvent) -> Result<(), ConsumerError> {
        let started = Instant::now();
        let labels = [("partition", self.partition_id.clone())];
        metrics::counter!("acl_events_received_total", &labels).increment(1);

        for (key, value) in &event.properties {
            debug!(partition = %event.partition_id, "event property - {key}: {value}");
        }

        let notification = translate(&event.payload).map_err(|source| {
            metrics::counter!("acl_translation_failures_total", &labels).increment(1);
            ConsumerError::Translation {
                partition_id: event.partition_id.clone(),
                position: event.position,
                source,
            }
        })?;
        debug!(
            partition = %event.partition_id,
            subscriber = %notification.subscriber_id,
            "translated legacy notification"
        );

        let outcomes = self.dispatcher.dispatch(&notification).await;
        if !self.policy.satisfied_by(&outcomes) {
            let failed = outcomes.iter().filter(|o| !o.succeeded).count();
            return Err(ConsumerError::DispatchFailed {
                partition_id: event.partition_id.clone(),
                position: event.position,
                failed,
                total: outcomes.len(),
            });
        }

        self.checkpoint_store
            .commit(&event.partition_id, event.position)
            .await
            .map_err(|e| {
                if let StoreError::StaleCommit { .. } = &e {
                    // Two consumers writing the same partition: lease
                    // coordination is broken upstream.
                    error!(
                        partition = %event.partition_id,
                        "stale checkpoint commit, faulting partition: {e}"
                    );
                }
                e
            })?;

        metrics::counter!("acl_checkpoint_commits_total", &labels).increment(1);
        metrics::counter!("acl_events_processed_total", &labels).increment(1);
        metrics::histogram!("acl_event_processing_duration_seconds", &labels)
            .record(started.elapsed().as_secs_f64());
        info!(
            partition = %event.partition_id,
            position = event.position,
            subscriber = %notification.subscriber_id,
            "event processed, checkpoint advanced"
        );
        Ok(())
    }
}
