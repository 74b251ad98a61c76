use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Layout of the legacy `notifyDtm` field.
pub const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Service classes carried by the legacy overage feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Voice,
    Data,
    Sms,
}

/// Everything derived from a legacy service-type code, in one place so the
/// unit and display-name lookups cannot drift apart.
struct ServiceTypeInfo {
    code: &'static str,
    display: &'static str,
    unit: &'static str,
}

impl ServiceType {
    fn info(self) -> &'static ServiceTypeInfo {
        const VOICE: ServiceTypeInfo = ServiceTypeInfo {
            code: "V",
            display: "VOICE",
            unit: "분",
        };
        const DATA: ServiceTypeInfo = ServiceTypeInfo {
            code: "D",
            display: "DATA",
            unit: "MB",
        };
        const SMS: ServiceTypeInfo = ServiceTypeInfo {
            code: "S",
            display: "SMS",
            unit: "건",
        };

        match self {
            ServiceType::Voice => &VOICE,
            ServiceType::Data => &DATA,
            ServiceType::Sms => &SMS,
        }
    }

    /// Maps a legacy `svcTypeCd` value. Anything outside {V, D, S} is unknown.
    pub fn from_legacy_code(code: &str) -> Option<ServiceType> {
        match code {
            "V" => Some(ServiceType::Voice),
            "D" => Some(ServiceType::Data),
            "S" => Some(ServiceType::Sms),
            _ => None,
        }
    }

    pub fn legacy_code(self) -> &'static str {
        self.info().code
    }

    pub fn display_name(self) -> &'static str {
        self.info().display
    }

    /// Unit suffix used when rendering quantities of this service class.
    pub fn unit(self) -> &'static str {
        self.info().unit
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A usage-overage notice, translated from the legacy wire format.
///
/// Construction is all-or-nothing: the translator refuses to produce a
/// partially populated notification. `excess_qty` is carried verbatim from
/// the legacy source, which is authoritative, and is never re-derived from
/// `used_qty - base_qty`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverageNotification {
    pub subscriber_id: String,
    pub service_type: ServiceType,
    pub used_qty: i64,
    pub base_qty: i64,
    pub excess_qty: i64,
    pub notified_at: NaiveDateTime,
}

impl OverageNotification {
    /// The user-facing notice text, shared by every delivery channel.
    pub fn rendered_message(&self) -> String {
        format!(
            "[{}] {} 기본 제공량을 {}{} 초과하였습니다.",
            self.service_type.display_name(),
            self.subscriber_id,
            self.excess_qty,
            self.service_type.unit(),
        )
    }

    /// `notified_at` back in the legacy `yyyyMMddHHmmss` layout.
    pub fn legacy_timestamp(&self) -> String {
        self.notified_at.format(LEGACY_TIMESTAMP_FORMAT).to_string()
    }
}

/// Delivery channels the dispatcher fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Push,
    Sms,
    Kakao,
}

impl Channel {
    /// The default fan-out order. Order carries no delivery semantics but is
    /// kept stable for reproducibility.
    pub fn default_order() -> Vec<Channel> {
        vec![Channel::Push, Channel::Sms, Channel::Kakao]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Push => "PUSH",
            Channel::Sms => "SMS",
            Channel::Kakao => "KAKAO",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} is not a known delivery channel")]
pub struct ParseChannelError(String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_ref() {
            "PUSH" => Ok(Channel::Push),
            "SMS" => Ok(Channel::Sms),
            "KAKAO" => Ok(Channel::Kakao),
            other => Err(ParseChannelError(other.to_owned())),
        }
    }
}

/// One outbound send, shaped for the channel delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDeliveryRequest {
    #[serde(rename = "userId")]
    pub subscriber_id: String,
    pub channel: Channel,
    #[serde(rename = "message")]
    pub rendered_message: String,
}

impl ChannelDeliveryRequest {
    pub fn new(notification: &OverageNotification, channel: Channel) -> Self {
        Self {
            subscriber_id: notification.subscriber_id.clone(),
            channel,
            rendered_message: notification.rendered_message(),
        }
    }
}

/// Acknowledgment returned by the channel delivery endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelAck {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Per-channel result of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub channel: Channel,
    pub succeeded: bool,
    pub error_detail: Option<String>,
}

impl DispatchOutcome {
    pub fn success(channel: Channel) -> Self {
        Self {
            channel,
            succeeded: true,
            error_detail: None,
        }
    }

    pub fn failure(channel: Channel, detail: String) -> Self {
        Self {
            channel,
            succeeded: false,
            error_detail: Some(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn notification(service_type: ServiceType) -> OverageNotification {
        OverageNotification {
            subscriber_id: "user1".to_owned(),
            service_type,
            used_qty: 10300,
            base_qty: 10240,
            excess_qty: 60,
            notified_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_service_type_table() {
        assert_eq!(ServiceType::from_legacy_code("V"), Some(ServiceType::Voice));
        assert_eq!(ServiceType::from_legacy_code("D"), Some(ServiceType::Data));
        assert_eq!(ServiceType::from_legacy_code("S"), Some(ServiceType::Sms));
        assert_eq!(ServiceType::from_legacy_code("X"), None);
        assert_eq!(ServiceType::from_legacy_code("v"), None);

        assert_eq!(ServiceType::Data.unit(), "MB");
        assert_eq!(ServiceType::Voice.unit(), "분");
        assert_eq!(ServiceType::Sms.unit(), "건");
        assert_eq!(ServiceType::Data.display_name(), "DATA");
        assert_eq!(ServiceType::Data.legacy_code(), "D");
    }

    #[test]
    fn test_rendered_message_contains_quantity_and_unit() {
        let message = notification(ServiceType::Data).rendered_message();
        assert!(message.contains("60MB"), "got: {message}");
        assert!(message.starts_with("[DATA] user1"));

        let message = notification(ServiceType::Voice).rendered_message();
        assert!(message.contains("60분"), "got: {message}");
    }

    #[test]
    fn test_legacy_timestamp_round_trip() {
        assert_eq!(
            notification(ServiceType::Sms).legacy_timestamp(),
            "20240101120000"
        );
    }

    #[test]
    fn test_channel_from_str() {
        assert_eq!("PUSH".parse::<Channel>().unwrap(), Channel::Push);
        assert_eq!("kakao".parse::<Channel>().unwrap(), Channel::Kakao);
        assert!("EMAIL".parse::<Channel>().is_err());
    }

    #[test]
    fn test_delivery_request_wire_shape() {
        let request = ChannelDeliveryRequest::new(&notification(ServiceType::Data), Channel::Push);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["userId"], "user1");
        assert_eq!(json["channel"], "PUSH");
        assert!(json["message"].as_str().unwrap().contains("60MB"));
    }
}
