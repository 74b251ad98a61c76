use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use acl_common::notification::Channel;

use crate::dispatcher::CheckpointPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "usage-overage-notices")]
    pub kafka_topic: NonEmptyString,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "acl-consumer")]
    pub kafka_consumer_group: NonEmptyString,

    /// Partitions owned by this process; assignment is decided by the
    /// external lease balancing, not negotiated here.
    #[envconfig(default = "0")]
    pub partitions: PartitionList,

    #[envconfig(default = "http://localhost:8083")]
    pub notification_endpoint: NonEmptyString,

    #[envconfig(default = "PUSH,SMS,KAKAO")]
    pub channels: ChannelList,

    #[envconfig(default = "5000")]
    pub send_timeout: EnvMsDuration,

    #[envconfig(default = "all")]
    pub checkpoint_policy: CheckpointPolicy,

    #[envconfig(default = "./checkpoints")]
    pub checkpoint_container: String,

    /// How long a partition worker may go without reporting before the
    /// liveness probe considers it stalled.
    #[envconfig(default = "60")]
    pub liveness_deadline_seconds: i64,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Comma-separated channel order, e.g. `PUSH,SMS,KAKAO`. Order is preserved
/// as configured; must not be empty.
#[derive(Debug, Clone)]
pub struct ChannelList(pub Vec<Channel>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseChannelListError(String);

impl FromStr for ChannelList {
    type Err = ParseChannelListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let channels = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<Channel>()
                    .map_err(|_| ParseChannelListError(part.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if channels.is_empty() {
            return Err(ParseChannelListError(s.to_owned()));
        }
        Ok(ChannelList(channels))
    }
}

/// Comma-separated kafka partition numbers, e.g. `0,1,2,3`.
#[derive(Debug, Clone)]
pub struct PartitionList(pub Vec<i32>);

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePartitionListError(String);

impl FromStr for PartitionList {
    type Err = ParsePartitionListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let partitions = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i32>()
                    .map_err(|_| ParsePartitionListError(part.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if partitions.is_empty() {
            return Err(ParsePartitionListError(s.to_owned()));
        }
        Ok(PartitionList(partitions))
    }
}
