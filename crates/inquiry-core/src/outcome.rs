use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::params::CallParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
    /// The call was never attempted because the run was cancelled.
    Cancelled,
}

/// Transport-level failure classes. All of them map to status code 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Timeout,
    ConnectionRefused,
    Dns,
    Certificate,
    Parse,
    Other,
    /// The transport blew up in a way it could not describe itself.
    Internal,
}

impl FaultKind {
    /// Best-effort classification from an error's rendered source chain.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            FaultKind::Timeout
        } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
            FaultKind::Certificate
        } else if lower.contains("dns")
            || lower.contains("failed to lookup")
            || lower.contains("name or service not known")
            || lower.contains("no such host")
        {
            FaultKind::Dns
        } else if lower.contains("connection refused") {
            FaultKind::ConnectionRefused
        } else if lower.contains("decod") || lower.contains("parse") || lower.contains("expected value") {
            FaultKind::Parse
        } else {
            FaultKind::Other
        }
    }

    fn label(self) -> &'static str {
        match self {
            FaultKind::Timeout => "request timed out",
            FaultKind::ConnectionRefused => "connection refused",
            FaultKind::Dns => "DNS resolution failed",
            FaultKind::Certificate => "certificate verification failed",
            FaultKind::Parse => "malformed response",
            FaultKind::Other => "transport error",
            FaultKind::Internal => "internal fault",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a reachable server (or the proxy in front of it) answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportReply {
    pub http_status: u16,
    pub ok: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Latency measured on the server side; 0 when it was not reported.
    pub server_elapsed_ms: u64,
}

/// The call never produced a usable reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportFault {
    pub kind: FaultKind,
    pub message: String,
}

impl TransportFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Data(serde_json::Value),
    Error(String),
    None,
}

/// Terminal record of one issued call. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// 1-based, assigned in issue order
    pub id: u64,
    pub params: CallParams,
    pub status: OutcomeStatus,
    /// HTTP status, or 0 for transport-level failures and cancellations
    pub status_code: u16,
    pub duration_ms: u64,
    pub payload: Payload,
    pub issued_at: DateTime<Utc>,
}

impl CallOutcome {
    pub fn from_reply(id: u64, params: CallParams, issued_at: DateTime<Utc>, reply: TransportReply) -> Self {
        let success = reply.ok && reply.error.is_none();
        let payload = match (reply.error, reply.data) {
            (Some(error), _) => Payload::Error(error),
            (None, Some(data)) => Payload::Data(data),
            (None, None) if !reply.ok => Payload::Error(format!("HTTP {}", reply.http_status)),
            (None, None) => Payload::None,
        };
        Self {
            id,
            params,
            status: if success {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Error
            },
            status_code: reply.http_status,
            duration_ms: reply.server_elapsed_ms,
            payload,
            issued_at,
        }
    }

    pub fn from_fault(id: u64, params: CallParams, issued_at: DateTime<Utc>, fault: &TransportFault) -> Self {
        Self {
            id,
            params,
            status: OutcomeStatus::Error,
            status_code: 0,
            duration_ms: 0,
            payload: Payload::Error(fault.describe()),
            issued_at,
        }
    }

    pub fn cancelled(id: u64, params: CallParams, issued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            params,
            status: OutcomeStatus::Cancelled,
            status_code: 0,
            duration_ms: 0,
            payload: Payload::None,
            issued_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OutcomeStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CallParams {
        CallParams::new("1403-05", "0012345678")
    }

    fn reply(ok: bool, error: Option<&str>) -> TransportReply {
        TransportReply {
            http_status: if ok { 200 } else { 404 },
            ok,
            data: Some(serde_json::json!({"name": "x"})),
            error: error.map(str::to_string),
            server_elapsed_ms: 42,
        }
    }

    #[test]
    fn test_success_requires_ok_and_no_error() {
        let outcome = CallOutcome::from_reply(1, params(), Utc::now(), reply(true, None));
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(outcome.duration_ms, 42);

        let outcome = CallOutcome::from_reply(2, params(), Utc::now(), reply(true, Some("no record")));
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.payload, Payload::Error("no record".into()));

        let outcome = CallOutcome::from_reply(3, params(), Utc::now(), reply(false, None));
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.status_code, 404);
    }

    #[test]
    fn test_fault_maps_to_status_zero() {
        let fault = TransportFault::new(FaultKind::Timeout, "after 5000ms");
        let outcome = CallOutcome::from_fault(4, params(), Utc::now(), &fault);
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.status_code, 0);
        assert_eq!(outcome.duration_ms, 0);
        assert_eq!(outcome.payload, Payload::Error("request timed out: after 5000ms".into()));
    }

    #[test]
    fn test_fault_kind_from_message() {
        assert_eq!(FaultKind::from_message("operation timed out"), FaultKind::Timeout);
        assert_eq!(
            FaultKind::from_message("tcp connect error: Connection refused (os error 111)"),
            FaultKind::ConnectionRefused
        );
        assert_eq!(
            FaultKind::from_message("dns error: failed to lookup address information"),
            FaultKind::Dns
        );
        assert_eq!(
            FaultKind::from_message("invalid peer certificate: UnknownIssuer"),
            FaultKind::Certificate
        );
        assert_eq!(FaultKind::from_message("error decoding response body"), FaultKind::Parse);
        assert_eq!(FaultKind::from_message("something odd"), FaultKind::Other);
    }
}
