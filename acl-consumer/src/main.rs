//! Consume legacy usage-overage notices from the event stream and fan them
//! out to the delivery channels.

use std::sync::Arc;

use envconfig::Envconfig;
use tracing::info;

use acl_common::checkpoint::BlobCheckpointStore;
use acl_common::health::HealthRegistry;
use acl_common::metrics::{serve, setup_probe_router};

use acl_consumer::config::Config;
use acl_consumer::consumer::PartitionConsumer;
use acl_consumer::coordinator::ConsumerGroupCoordinator;
use acl_consumer::dispatcher::{ChannelDispatcher, HttpChannelSender};
use acl_consumer::error::PartitionsFaulted;
use acl_consumer::source::KafkaEventSource;

#[tokio::main]
async fn main() -> Result<(), PartitionsFaulted> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");

    // Explicit construction order: store, sender, then one consumer per
    // owned partition, all wired before anything starts.
    let checkpoint_store = Arc::new(
        BlobCheckpointStore::open(&config.checkpoint_container)
            .expect("failed to open checkpoint container"),
    );
    let sender = HttpChannelSender::new(config.notification_endpoint.as_str(), config.send_timeout.0);

    let mut coordinator = ConsumerGroupCoordinator::new();
    for &partition in &config.partitions.0 {
        let source = KafkaEventSource::new(
            &config.kafka_hosts,
            config.kafka_topic.as_str(),
            config.kafka_consumer_group.as_str(),
            config.kafka_tls,
            partition,
        )
        .expect("failed to create kafka consumer");

        let handle = liveness
            .register(
                format!("partition-{partition}"),
                time::Duration::seconds(config.liveness_deadline_seconds),
            )
            .await;

        let consumer = PartitionConsumer::new(
            partition.to_string(),
            source,
            ChannelDispatcher::new(sender.clone(), config.channels.0.clone()),
            checkpoint_store.clone(),
            config.checkpoint_policy,
            coordinator.shutdown_signal(),
            handle,
        );
        coordinator.spawn(consumer);
    }
    info!(
        partitions = coordinator.partition_count(),
        "consumer group started"
    );

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_probe_router(liveness);
        serve(router, &bind)
            .await
            .expect("failed to start serving probes");
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    info!("shutdown signal received, draining partition consumers");

    coordinator.shutdown().await
}
