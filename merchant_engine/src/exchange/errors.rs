use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A non-success reply from an exchange, kept verbatim so it can be relayed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRejection {
    pub http_status: u16,
    pub code: Option<u32>,
    pub hint: Option<String>,
    pub reply: Value,
}

impl ExchangeRejection {
    pub fn from_reply(http_status: u16, reply: Value) -> Self {
        let code = reply.get("code").and_then(Value::as_u64).and_then(|c| u32::try_from(c).ok());
        let hint = reply.get("hint").and_then(Value::as_str).map(String::from);
        Self { http_status, code, hint, reply }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Could not reach the exchange: {0}")]
    Unreachable(String),
    #[error("The exchange did not answer in time")]
    Timeout,
    #[error("The exchange reply could not be understood: {0}")]
    Protocol(String),
    #[error("The exchange rejected the request with HTTP status {}", .0.http_status)]
    Rejected(ExchangeRejection),
    #[error("Invalid exchange URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Timeout
        } else if e.is_decode() {
            ExchangeError::Protocol(e.to_string())
        } else {
            ExchangeError::Unreachable(e.to_string())
        }
    }
}
