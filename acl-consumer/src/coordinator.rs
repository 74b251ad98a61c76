//! Ownership of the partition consumers for this process.
//!
//! Which partitions this process owns is decided by the external lease
//! balancing of the stream infrastructure and handed to the coordinator as
//! configuration; the coordinator only starts the workers, propagates
//! shutdown, and reports what it finds when they finish. A faulted partition
//! is deliberately not restarted here: auto-restarting would turn a poison
//! message into a silent redelivery loop.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::consumer::PartitionConsumer;
use crate::dispatcher::ChannelSender;
use crate::error::{ConsumerError, PartitionsFaulted};
use crate::source::EventSource;

pub struct ConsumerGroupCoordinator {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<Result<(), ConsumerError>>)>,
}

impl Default for ConsumerGroupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerGroupCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            workers: Vec::new(),
        }
    }

    /// The shutdown signal to hand to each consumer before spawning it.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Starts a partition consumer on its own task.
    pub fn spawn<E, S>(&mut self, consumer: PartitionConsumer<E, S>)
    where
        E: EventSource + Sync + 'static,
        S: ChannelSender + 'static,
    {
        let partition_id = consumer.partition_id().to_owned();
        info!(partition = %partition_id, "starting partition consumer");
        self.workers
            .push((partition_id, tokio::spawn(consumer.run())));
    }

    pub fn partition_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every consumer to stop at its next safe point and waits for
    /// all of them. Partitions that finished faulted (before or during the
    /// drain) are reported to the caller as a process-health signal.
    pub async fn shutdown(self) -> Result<(), PartitionsFaulted> {
        info!("draining {} partition consumers", self.workers.len());
        _ = self.shutdown_tx.send(true);

        let mut faulted = Vec::new();
        for (partition_id, handle) in self.workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(partition = %partition_id, "partition finished faulted: {e}");
                    faulted.push(partition_id);
                }
                Err(join_error) => {
                    error!(partition = %partition_id, "partition task panicked: {join_error}");
                    faulted.push(partition_id);
                }
            }
        }

        if faulted.is_empty() {
            info!("all partition consumers stopped cleanly");
            Ok(())
        } else {
            Err(PartitionsFaulted { partitions: faulted })
        }
    }
}
