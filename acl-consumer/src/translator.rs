//! Translation of the legacy SOAP wire format into the domain notification.
//!
//! The legacy back-office emits one SOAP envelope per overage notice, with an
//! `ExcessNotification` element in the body carrying six required fields.
//! Translation is a pure function of the payload bytes: no I/O, deterministic,
//! and all-or-nothing — a payload either yields a fully populated
//! `OverageNotification` or a `TranslationError`.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;

use acl_common::notification::{OverageNotification, ServiceType, LEGACY_TIMESTAMP_FORMAT};

use crate::error::TranslationError;

const BODY_ELEMENT: &str = "Body";
const NOTIFICATION_ELEMENT: &str = "ExcessNotification";

/// Parses a legacy SOAP payload into an `OverageNotification`.
///
/// Namespace prefixes vary between legacy emitters, so elements are matched
/// on local name. `exceedQty` is carried verbatim; it is not re-derived from
/// `usedQty - baseQty`.
pub fn translate(payload: &[u8]) -> Result<OverageNotification, TranslationError> {
    let fields = collect_notification_fields(payload)?;

    let subscriber_id = required(&fields, "userSequence")?.to_owned();

    let code = required(&fields, "svcTypeCd")?;
    let service_type = ServiceType::from_legacy_code(code)
        .ok_or_else(|| TranslationError::UnknownServiceType(code.to_owned()))?;

    let used_qty = required_quantity(&fields, "usedQty")?;
    let base_qty = required_quantity(&fields, "baseQty")?;
    let excess_qty = required(&fields, "exceedQty")?
        .parse::<i64>()
        .map_err(|_| TranslationError::MissingField("exceedQty"))?;

    let notified_at = parse_legacy_timestamp(required(&fields, "notifyDtm")?)?;

    Ok(OverageNotification {
        subscriber_id,
        service_type,
        used_qty,
        base_qty,
        excess_qty,
        notified_at,
    })
}

/// Walks the envelope and gathers the text content of every element directly
/// inside `Body/ExcessNotification`, keyed by local name. A payload without
/// that structure is a malformed envelope.
fn collect_notification_fields(
    payload: &[u8],
) -> Result<HashMap<String, String>, TranslationError> {
    let mut reader = Reader::from_reader(payload);
    let mut buf = Vec::new();

    let mut in_body = false;
    let mut in_notification = false;
    let mut saw_notification = false;
    let mut current_field: Option<String> = None;
    let mut fields = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(_) => return Err(TranslationError::MalformedEnvelope),
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                if in_notification {
                    current_field = Some(name);
                } else if in_body && name == NOTIFICATION_ELEMENT {
                    in_notification = true;
                    saw_notification = true;
                } else if name == BODY_ELEMENT {
                    in_body = true;
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(field) = &current_field {
                    let value = text
                        .unescape()
                        .map_err(|_| TranslationError::MalformedEnvelope)?;
                    let value = value.trim();
                    if !value.is_empty() {
                        fields.insert(field.clone(), value.to_owned());
                    }
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                if current_field.as_deref() == Some(name.as_str()) {
                    current_field = None;
                } else if in_notification && name == NOTIFICATION_ELEMENT {
                    in_notification = false;
                } else if in_body && name == BODY_ELEMENT {
                    in_body = false;
                }
            }
            Ok(_) => {}
        }
        buf.clear();
    }

    if !saw_notification {
        return Err(TranslationError::MalformedEnvelope);
    }
    Ok(fields)
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, TranslationError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(TranslationError::MissingField(name))
}

/// Usage quantities are non-negative by contract; a negative value is as
/// unusable as a missing one.
fn required_quantity(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> Result<i64, TranslationError> {
    let quantity = required(fields, name)?
        .parse::<i64>()
        .map_err(|_| TranslationError::MissingField(name))?;
    if quantity < 0 {
        return Err(TranslationError::MissingField(name));
    }
    Ok(quantity)
}

/// The legacy timestamp must be exactly 14 digits (`yyyyMMddHHmmss`); chrono
/// alone is too lenient about shorter inputs.
fn parse_legacy_timestamp(value: &str) -> Result<NaiveDateTime, TranslationError> {
    if value.len() != 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TranslationError::InvalidTimestamp(value.to_owned()));
    }
    NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT)
        .map_err(|_| TranslationError::InvalidTimestamp(value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
            <soapenv:Body>
                <kos:ExcessNotification xmlns:kos="http://kos.telecom.com/notifications">
                    <userSequence>user1</userSequence>
                    <svcTypeCd>D</svcTypeCd>
                    <usedQty>10300</usedQty>
                    <baseQty>10240</baseQty>
                    <exceedQty>60</exceedQty>
                    <notifyDtm>20240101120000</notifyDtm>
                </kos:ExcessNotification>
            </soapenv:Body>
        </soapenv:Envelope>"#;

    fn payload_with(service_code: &str, notify_dtm: &str) -> String {
        WELL_FORMED
            .replace("<svcTypeCd>D</svcTypeCd>", &format!("<svcTypeCd>{service_code}</svcTypeCd>"))
            .replace(
                "<notifyDtm>20240101120000</notifyDtm>",
                &format!("<notifyDtm>{notify_dtm}</notifyDtm>"),
            )
    }

    fn payload_without(field: &str) -> String {
        let mut out = String::new();
        for line in WELL_FORMED.lines() {
            if !line.contains(&format!("<{field}>")) {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    #[test]
    fn test_translates_well_formed_payload() {
        let notification = translate(WELL_FORMED.as_bytes()).unwrap();

        assert_eq!(notification.subscriber_id, "user1");
        assert_eq!(notification.service_type, ServiceType::Data);
        assert_eq!(notification.used_qty, 10300);
        assert_eq!(notification.base_qty, 10240);
        assert_eq!(notification.excess_qty, 60);
        assert_eq!(notification.legacy_timestamp(), "20240101120000");
    }

    #[test]
    fn test_translation_is_deterministic() {
        let first = translate(WELL_FORMED.as_bytes()).unwrap();
        let second = translate(WELL_FORMED.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_round_trips_structured_fields() {
        let notification = translate(WELL_FORMED.as_bytes()).unwrap();

        // Re-serializing the structured fields reproduces the original values.
        assert_eq!(notification.service_type.legacy_code(), "D");
        assert_eq!(notification.legacy_timestamp(), "20240101120000");
        assert_eq!(
            (
                notification.used_qty,
                notification.base_qty,
                notification.excess_qty
            ),
            (10300, 10240, 60)
        );
    }

    #[test]
    fn test_accepts_default_namespace_payload() {
        let payload = r#"
            <Envelope xmlns="http://schemas.xmlsoap.org/soap/envelope/">
              <Body>
                <ExcessNotification xmlns="http://kos.telecom.com/notifications">
                  <userSequence>sub-9</userSequence>
                  <svcTypeCd>V</svcTypeCd>
                  <usedQty>120</usedQty>
                  <baseQty>100</baseQty>
                  <exceedQty>20</exceedQty>
                  <notifyDtm>20240215083000</notifyDtm>
                </ExcessNotification>
              </Body>
            </Envelope>"#;

        let notification = translate(payload.as_bytes()).unwrap();
        assert_eq!(notification.service_type, ServiceType::Voice);
        assert_eq!(notification.subscriber_id, "sub-9");
    }

    #[test]
    fn test_missing_body_is_malformed_envelope() {
        let payload = r#"<soapenv:Envelope
            xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"></soapenv:Envelope>"#;
        assert_eq!(
            translate(payload.as_bytes()),
            Err(TranslationError::MalformedEnvelope)
        );
    }

    #[test]
    fn test_missing_notification_element_is_malformed_envelope() {
        let payload = r#"<soapenv:Envelope
            xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
            <soapenv:Body></soapenv:Body></soapenv:Envelope>"#;
        assert_eq!(
            translate(payload.as_bytes()),
            Err(TranslationError::MalformedEnvelope)
        );
    }

    #[test]
    fn test_invalid_xml_is_malformed_envelope() {
        assert_eq!(
            translate(b"not xml at all"),
            Err(TranslationError::MalformedEnvelope)
        );
        assert_eq!(
            translate(b"<Envelope><Body>"),
            Err(TranslationError::MalformedEnvelope)
        );
    }

    #[test]
    fn test_each_missing_field_is_named() {
        for field in [
            "userSequence",
            "svcTypeCd",
            "usedQty",
            "baseQty",
            "exceedQty",
            "notifyDtm",
        ] {
            let payload = payload_without(field);
            assert_eq!(
                translate(payload.as_bytes()),
                Err(TranslationError::MissingField(field)),
                "dropping {field} should name it"
            );
        }
    }

    #[test]
    fn test_unparsable_quantity_is_missing_field() {
        let payload = WELL_FORMED.replace("<usedQty>10300</usedQty>", "<usedQty>lots</usedQty>");
        assert_eq!(
            translate(payload.as_bytes()),
            Err(TranslationError::MissingField("usedQty"))
        );

        let payload = WELL_FORMED.replace("<baseQty>10240</baseQty>", "<baseQty>-1</baseQty>");
        assert_eq!(
            translate(payload.as_bytes()),
            Err(TranslationError::MissingField("baseQty"))
        );
    }

    #[test]
    fn test_unknown_service_type_is_rejected() {
        let payload = payload_with("X", "20240101120000");
        assert_eq!(
            translate(payload.as_bytes()),
            Err(TranslationError::UnknownServiceType("X".to_owned()))
        );
    }

    #[test]
    fn test_timestamp_must_be_exactly_fourteen_digits() {
        for bad in ["2024010112000", "202401011200000", "2024-01-01 12:00", "20241301120000"] {
            let payload = payload_with("D", bad);
            assert_eq!(
                translate(payload.as_bytes()),
                Err(TranslationError::InvalidTimestamp(bad.to_owned())),
                "timestamp {bad} should be rejected"
            );
        }
    }
}
