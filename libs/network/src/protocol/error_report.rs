//! Error reports carried inside command replies
//!
//! By convention the first value of a reply is either `null` (success) or
//! an error report map:
//!
//! ```text
//! {"Code":23,"Format":"Unsupported command","Time":1718000000000,"Service":"Locator"}
//! ```

use crate::error::ChannelError;
use codec::{Serializable, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub const KEY_CODE: &str = "Code";
pub const KEY_FORMAT: &str = "Format";
pub const KEY_TIME: &str = "Time";
pub const KEY_SERVICE: &str = "Service";

/// Standard error codes
pub mod codes {
    pub const OTHER: i64 = 1;
    pub const SYNTAX: i64 = 2;
    pub const PROTOCOL: i64 = 3;
    pub const CHANNEL_CLOSED: i64 = 5;
    pub const COMMAND_CANCELLED: i64 = 6;
    pub const UNKNOWN_PEER: i64 = 7;
    pub const UNSUPPORTED: i64 = 23;
    pub const INVALID_COMMAND: i64 = 25;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: i64,
    pub format: String,
    /// Milliseconds since the Unix epoch
    pub time_ms: u64,
    pub service: Option<String>,
}

impl ErrorReport {
    pub fn new(code: i64, format: impl Into<String>) -> Self {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            code,
            format: format.into(),
            time_ms,
            service: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let code = value.get(KEY_CODE)?.as_i64()?;
        Some(Self {
            code,
            format: value
                .get(KEY_FORMAT)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            time_ms: value
                .get(KEY_TIME)
                .and_then(Value::as_number)
                .and_then(|n| n.as_u64())
                .unwrap_or(0),
            service: value.get(KEY_SERVICE).and_then(Value::as_str).map(str::to_string),
        })
    }

    pub fn into_error(self) -> ChannelError {
        ChannelError::remote(self.code, self.format)
    }
}

impl Serializable for ErrorReport {
    fn to_value(&self) -> Value {
        let mut entries = vec![
            (KEY_CODE, Value::from(self.code)),
            (KEY_FORMAT, Value::from(self.format.as_str())),
            (KEY_TIME, Value::from(self.time_ms)),
        ];
        if let Some(service) = &self.service {
            entries.push((KEY_SERVICE, Value::from(service.as_str())));
        }
        Value::map(entries)
    }
}

impl From<&ChannelError> for ErrorReport {
    fn from(error: &ChannelError) -> Self {
        let code = match error {
            ChannelError::Remote { code, .. } => *code,
            ChannelError::Cancelled => codes::COMMAND_CANCELLED,
            ChannelError::Closed { .. } | ChannelError::NotConnected => codes::CHANNEL_CLOSED,
            ChannelError::Protocol { .. } => codes::PROTOCOL,
            ChannelError::Codec(_) => codes::SYNTAX,
            ChannelError::CommandNotRecognized { .. } => codes::INVALID_COMMAND,
            _ => codes::OTHER,
        };
        let format = match error {
            ChannelError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::new(code, format)
    }
}

/// Error report in the first position of a reply, if there is one
pub fn reply_error(data: &[Value]) -> Option<ErrorReport> {
    data.first().and_then(ErrorReport::from_value)
}

/// Split a reply into its error report and remaining values
pub fn check_reply(data: Vec<Value>) -> Result<Vec<Value>, ChannelError> {
    match reply_error(&data) {
        Some(report) => Err(report.into_error()),
        None => Ok(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_round_trips_through_value() {
        let report = ErrorReport::new(codes::UNSUPPORTED, "redirect is not supported")
            .with_service("Locator");
        let decoded = ErrorReport::from_value(&report.to_value()).unwrap();
        assert_eq!(decoded, report);
        assert!(decoded.time_ms > 0);
    }

    #[test]
    fn test_reply_error_detection() {
        assert!(reply_error(&[Value::Null, Value::from(1)]).is_none());
        assert!(reply_error(&[]).is_none());

        let data = vec![ErrorReport::new(codes::OTHER, "failed").to_value()];
        match check_reply(data) {
            Err(ChannelError::Remote { code, message }) => {
                assert_eq!(code, codes::OTHER);
                assert_eq!(message, "failed");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
