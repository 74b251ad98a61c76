use acl_common::checkpoint::StoreError;
use thiserror::Error;

/// Ways a legacy payload can fail translation. Always local to one event and
/// never retried in-process: the consumer withholds the checkpoint so the
/// event comes back on restart.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("payload is not a well-formed notification envelope")]
    MalformedEnvelope,
    #[error("required field {0} is missing or unparsable")]
    MissingField(&'static str),
    #[error("unknown service type code: {0}")]
    UnknownServiceType(String),
    #[error("notifyDtm is not a yyyyMMddHHmmss timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A single channel send that did not result in a positive acknowledgment.
/// Recorded per-channel in the dispatch outcome; never aborts the remaining
/// channels.
#[derive(Debug, Error)]
pub enum ChannelSendError {
    #[error("delivery request could not be completed: {0}")]
    Transport(String),
    #[error("delivery timed out")]
    Timeout,
    #[error("delivery endpoint rejected the notification: {0}")]
    Rejected(String),
}

/// Errors reading from the event stream.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("kafka receive failed: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("received a record with no payload at {partition_id}:{position}")]
    EmptyPayload { partition_id: String, position: i64 },
}

/// Errors that stop a partition consumer. All of them leave the checkpoint
/// where it was, so the offending event is redelivered once the partition is
/// restarted.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to translate event at {partition_id}:{position}: {source}")]
    Translation {
        partition_id: String,
        position: i64,
        #[source]
        source: TranslationError,
    },
    #[error(
        "dispatch policy not satisfied at {partition_id}:{position}: \
         {failed} of {total} channels failed"
    )]
    DispatchFailed {
        partition_id: String,
        position: i64,
        failed: usize,
        total: usize,
    },
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),
    #[error("event source error: {0}")]
    Source(#[from] SourceError),
}

/// Raised by the coordinator when one or more partitions finished faulted.
#[derive(Debug, Error)]
#[error("partitions faulted: {}", partitions.join(", "))]
pub struct PartitionsFaulted {
    pub partitions: Vec<String>,
}
