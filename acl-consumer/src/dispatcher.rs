//! Fan-out of one domain notification to every configured delivery channel.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, error};

use acl_common::notification::{
    Channel, ChannelAck, ChannelDeliveryRequest, DispatchOutcome, OverageNotification,
};

use crate::error::ChannelSendError;

/// When the partition consumer may advance its checkpoint past an event.
///
/// The reference behavior is the strict `AllChannels` rule: any channel
/// failure surfaces as a processing error and the whole event is redelivered,
/// re-attempting channels that already succeeded. `AnyChannel` is the
/// documented alternative for deployments that prefer fewer duplicate
/// notifications over guaranteed fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    AllChannels,
    AnyChannel,
}

impl CheckpointPolicy {
    pub fn satisfied_by(self, outcomes: &[DispatchOutcome]) -> bool {
        match self {
            CheckpointPolicy::AllChannels => outcomes.iter().all(|o| o.succeeded),
            CheckpointPolicy::AnyChannel => outcomes.iter().any(|o| o.succeeded),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCheckpointPolicyError;

impl FromStr for CheckpointPolicy {
    type Err = ParseCheckpointPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "all" => Ok(CheckpointPolicy::AllChannels),
            "any" => Ok(CheckpointPolicy::AnyChannel),
            _ => Err(ParseCheckpointPolicyError),
        }
    }
}

/// A single outbound channel send. Implementations must be safe to share
/// across partition workers: no mutable state beyond what the HTTP client
/// already synchronizes internally.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, request: &ChannelDeliveryRequest) -> Result<(), ChannelSendError>;
}

/// Sends delivery requests to the channel delivery endpoint as JSON.
#[derive(Clone)]
pub struct HttpChannelSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChannelSender {
    /// The per-send timeout is baked into the client; expiry is a delivery
    /// failure for that channel, not a crash.
    pub fn new(base_url: &str, send_timeout: Duration) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("ACL Notification Consumer")
            .timeout(send_timeout)
            .build()
            .expect("failed to construct reqwest client for channel sends");

        Self {
            client,
            endpoint: format!(
                "{}/api/notifications/send",
                base_url.trim_end_matches('/')
            ),
        }
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, request: &ChannelDeliveryRequest) -> Result<(), ChannelSendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelSendError::Timeout
                } else {
                    ChannelSendError::Transport(e.to_string())
                }
            })?;

        let response = response
            .error_for_status()
            .map_err(|e| ChannelSendError::Transport(e.to_string()))?;

        let ack: ChannelAck = response
            .json()
            .await
            .map_err(|e| ChannelSendError::Transport(e.to_string()))?;

        if ack.success {
            Ok(())
        } else {
            Err(ChannelSendError::Rejected(ack.message))
        }
    }
}

/// Fans one notification out to the configured channels, in configured order,
/// and aggregates per-channel outcomes. One channel failing never prevents
/// attempting the others, and nothing is retried within a single dispatch;
/// redelivery policy belongs to the partition consumer.
pub struct ChannelDispatcher<S> {
    sender: S,
    channels: Vec<Channel>,
}

impl<S: ChannelSender> ChannelDispatcher<S> {
    pub fn new(sender: S, channels: Vec<Channel>) -> Self {
        Self { sender, channels }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub async fn dispatch(&self, notification: &OverageNotification) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(self.channels.len());

        for &channel in &self.channels {
            let request = ChannelDeliveryRequest::new(notification, channel);
            let labels = [("channel", channel.to_string())];

            match self.sender.send(&request).await {
                Ok(()) => {
                    debug!(
                        subscriber = %request.subscriber_id,
                        %channel,
                        "notification delivered"
                    );
                    metrics::counter!("acl_channel_sends_total", &labels).increment(1);
                    outcomes.push(DispatchOutcome::success(channel));
                }
                Err(e) => {
                    error!(
                        subscriber = %request.subscriber_id,
                        %channel,
                        "notification delivery failed: {e}"
                    );
                    metrics::counter!("acl_channel_send_failures_total", &labels).increment(1);
                    outcomes.push(DispatchOutcome::failure(channel, e.to_string()));
                }
            }
        }

        outcomes
    }
}
