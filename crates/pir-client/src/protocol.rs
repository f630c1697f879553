//! Device wire protocol.
//!
//! The exchange over the device's control socket is two JSON shapes:
//!
//! - outbound `{"noMotionDelay": <ms>}`, sent whenever a connection opens and
//!   on every rediscovery of the device
//! - inbound `{"motion": <bool>}`, pushed by the device on every state change;
//!   any other fields are ignored

use pir_core::error::MessageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration pushed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurePayload {
    #[serde(rename = "noMotionDelay")]
    pub no_motion_delay_ms: u64,
}

impl ConfigurePayload {
    pub fn new(no_motion_delay_ms: u64) -> Self {
        Self { no_motion_delay_ms }
    }

    /// Encodes the payload as a JSON text frame body.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Status report received from the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceStatus {
    /// Current motion state, absent on reports that carry other fields only
    #[serde(default)]
    pub motion: Option<bool>,
}

/// Parses an inbound device payload.
///
/// # Examples
///
/// ```
/// use pir_client::protocol::parse_status;
///
/// let status = parse_status(r#"{"motion": true, "uptime": 42}"#).unwrap();
/// assert_eq!(status.motion, Some(true));
/// assert!(parse_status("not json").is_err());
/// ```
pub fn parse_status(text: &str) -> Result<DeviceStatus, MessageError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| MessageError::malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(MessageError::malformed("status report is not a JSON object"));
    }
    serde_json::from_value(value).map_err(|e| MessageError::malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_payload_wire_format() {
        assert_eq!(
            ConfigurePayload::new(30_000).to_json().unwrap(),
            r#"{"noMotionDelay":30000}"#
        );
    }

    #[test]
    fn test_parse_motion() {
        assert_eq!(parse_status(r#"{"motion":true}"#).unwrap().motion, Some(true));
        assert_eq!(parse_status(r#"{"motion":false}"#).unwrap().motion, Some(false));
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let status = parse_status(r#"{"rssi":-61,"motion":true}"#).unwrap();
        assert_eq!(status.motion, Some(true));

        let status = parse_status(r#"{"rssi":-61}"#).unwrap();
        assert_eq!(status.motion, None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_status("not json"),
            Err(MessageError::Malformed { .. })
        ));
        assert!(parse_status(r#"{"motion":"yes"}"#).is_err());
        assert!(parse_status("[true]").is_err());
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        for payload in ["[true]", "[false]", "true", "42", r#""motion""#, "null"] {
            assert!(
                matches!(parse_status(payload), Err(MessageError::Malformed { .. })),
                "accepted {payload}"
            );
        }
    }
}
