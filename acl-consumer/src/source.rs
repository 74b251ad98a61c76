//! The inbound stream boundary.
//!
//! The pipeline only needs two guarantees from the log it reads: in-order
//! delivery within a partition to a single active consumer, and a stable
//! per-record sequence position compatible with the checkpoint store.
//! `EventSource` captures exactly that; the production implementation sits on
//! a Kafka partition, tests feed events from memory.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Headers;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::info;

use crate::error::SourceError;

/// One unit read from the stream. Immutable once read; discarded after
/// translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub partition_id: String,
    pub position: i64,
    pub payload: Vec<u8>,
    /// Diagnostic metadata carried alongside the payload.
    pub properties: HashMap<String, String>,
}

/// An ordered reader over one partition of the event log.
#[async_trait]
pub trait EventSource: Send {
    /// Positions the source so the next event returned is the first one after
    /// `resume_after`; `None` means the beginning of the partition.
    async fn seek(&mut self, resume_after: Option<i64>) -> Result<(), SourceError>;

    /// Returns the next event in partition order. May suspend indefinitely
    /// waiting for new events; `Ok(None)` means the source is drained and is
    /// only produced by finite (test) sources.
    async fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError>;
}

/// Kafka-backed source for a single, statically assigned partition.
///
/// Offset storage and commit are fully disabled: the checkpoint store is the
/// only authority on read positions, and `seek` translates a loaded
/// checkpoint into a partition assignment.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
    partition: i32,
    partition_id: String,
}

impl KafkaEventSource {
    pub fn new(
        hosts: &str,
        topic: &str,
        consumer_group: &str,
        tls: bool,
        partition: i32,
    ) -> Result<Self, SourceError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", hosts)
            .set("group.id", consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest");

        if tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = config.create()?;

        Ok(Self {
            consumer,
            topic: topic.to_owned(),
            partition,
            partition_id: partition.to_string(),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn seek(&mut self, resume_after: Option<i64>) -> Result<(), SourceError> {
        let offset = match resume_after {
            Some(position) => Offset::Offset(position + 1),
            None => Offset::Beginning,
        };

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&self.topic, self.partition, offset)?;
        self.consumer.assign(&assignment)?;

        info!(
            topic = %self.topic,
            partition = self.partition,
            ?resume_after,
            "assigned kafka partition"
        );
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError> {
        let message = self.consumer.recv().await?;
        let position = message.offset();

        let payload = message
            .payload()
            .ok_or_else(|| SourceError::EmptyPayload {
                partition_id: self.partition_id.clone(),
                position,
            })?
            .to_vec();

        let mut properties = HashMap::new();
        if let Some(headers) = message.headers() {
            for header in headers.iter() {
                if let Some(value) = header.value {
                    if let Ok(value) = std::str::from_utf8(value) {
                        properties.insert(header.key.to_owned(), value.to_owned());
                    }
                }
            }
        }

        Ok(Some(RawEvent {
            partition_id: self.partition_id.clone(),
            position,
            payload,
            properties,
        }))
    }
}

/// Finite in-memory source for tests: yields its events in order, honoring
/// `seek` the way a real partition would on restart.
pub struct VecEventSource {
    events: Vec<RawEvent>,
    pending: VecDeque<RawEvent>,
}

impl VecEventSource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            pending: events.iter().cloned().collect(),
            events,
        }
    }
}

#[async_trait]
impl EventSource for VecEventSource {
    async fn seek(&mut self, resume_after: Option<i64>) -> Result<(), SourceError> {
        self.pending = self
            .events
            .iter()
            .filter(|event| resume_after.map_or(true, |position| event.position > position))
            .cloned()
            .collect();
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>, SourceError> {
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(position: i64) -> RawEvent {
        RawEvent {
            partition_id: "0".to_owned(),
            position,
            payload: Vec::new(),
            properties: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_vec_source_resumes_after_checkpoint() {
        let mut source = VecEventSource::new(vec![event(0), event(1), event(2)]);

        source.seek(Some(0)).await.unwrap();
        assert_eq!(source.next_event().await.unwrap().unwrap().position, 1);
        assert_eq!(source.next_event().await.unwrap().unwrap().position, 2);
        assert_eq!(source.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vec_source_without_checkpoint_starts_from_beginning() {
        let mut source = VecEventSource::new(vec![event(5), event(6)]);

        source.seek(None).await.unwrap();
        assert_eq!(source.next_event().await.unwrap().unwrap().position, 5);
    }
}
