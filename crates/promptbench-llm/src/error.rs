use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Failure classes a chat session can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorCode {
    ProviderAuthMissing,
    ProviderHttp,
    ProviderTransport,
    ProviderProtocol,
    FileUnavailable,
    SchemaInvalid,
    OutputInvalid,
    /// Only produced when an aborted session is forced into a `Result`.
    Aborted,
}

impl AdapterErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterErrorCode::ProviderAuthMissing => "provider_auth_missing",
            AdapterErrorCode::ProviderHttp => "provider_http",
            AdapterErrorCode::ProviderTransport => "provider_transport",
            AdapterErrorCode::ProviderProtocol => "provider_protocol",
            AdapterErrorCode::FileUnavailable => "file_unavailable",
            AdapterErrorCode::SchemaInvalid => "schema_invalid",
            AdapterErrorCode::OutputInvalid => "output_invalid",
            AdapterErrorCode::Aborted => "aborted",
        }
    }

    /// True for failures detected while preparing the request, before any network traffic.
    pub fn is_pre_request(self) -> bool {
        matches!(
            self,
            AdapterErrorCode::ProviderAuthMissing
                | AdapterErrorCode::FileUnavailable
                | AdapterErrorCode::SchemaInvalid
        )
    }
}

impl Display for AdapterErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterError {
    pub code: AdapterErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AdapterError {
    pub fn new(code: AdapterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Non-success response. `vendor_message` wins over the generic status text.
    pub fn http_status(status: u16, vendor_message: Option<String>, body: String) -> Self {
        let message =
            vendor_message.unwrap_or_else(|| format!("request failed with HTTP status {status}"));
        Self::new(AdapterErrorCode::ProviderHttp, message)
            .with_details(json!({ "status": status, "body": body }))
    }

    pub fn transport(context: &str, error: impl Display) -> Self {
        Self::new(AdapterErrorCode::ProviderTransport, format!("{context}: {error}"))
    }

    pub fn aborted() -> Self {
        Self::new(AdapterErrorCode::Aborted, "Chat session was aborted")
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.details
            .as_ref()?
            .get("status")?
            .as_u64()
            .and_then(|status| u16::try_from(status).ok())
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            json!({ "code": self.code.as_str(), "message": self.message }).to_string()
        })
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AdapterError {}
