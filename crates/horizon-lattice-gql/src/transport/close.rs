//! Close codes carried by transport close events.

use std::fmt;

use serde_json::{Map, Value};

/// WebSocket close codes (RFC 6455 §7.4), plus application codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseCode {
    /// Normal closure.
    #[default]
    Normal,
    /// The endpoint is going away.
    Away,
    /// Protocol error.
    Protocol,
    /// No status code was present.
    NoStatus,
    /// Closed without a close frame.
    Abnormal,
    /// Policy violation.
    Policy,
    /// The server hit an unexpected condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded.
    Again,
    /// Any other code, including application codes in 4000-4999.
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1008 => Self::Policy,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            code => Self::Other(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Policy => 1008,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Other(code) => code,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

/// Why a transport closed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub reason: Option<String>,
}

impl CloseReason {
    pub fn new(code: CloseCode) -> Self {
        Self { code, reason: None }
    }

    pub fn with_reason(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    /// A normal close with no reason text.
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal)
    }

    /// Fields attached to the normalized error broadcast on close.
    pub(crate) fn to_details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        details.insert("code".into(), Value::from(u16::from(self.code)));
        if let Some(reason) = &self.reason {
            details.insert("reason".into(), Value::String(reason.clone()));
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_conversion() {
        for code in [1000u16, 1001, 1002, 1005, 1006, 1008, 1011, 1012, 1013, 4403] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(4403), CloseCode::Other(4403));
        assert_eq!(CloseCode::Abnormal.to_string(), "1006");
    }

    #[test]
    fn test_close_details() {
        let details = CloseReason::with_reason(CloseCode::Policy, "forbidden").to_details();
        assert_eq!(details["code"], 1008);
        assert_eq!(details["reason"], "forbidden");

        let details = CloseReason::normal().to_details();
        assert!(!details.contains_key("reason"));
    }
}
