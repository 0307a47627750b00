// Error taxonomy at the dispatcher boundary

use crate::protocol::JsonRpcError;
use crate::upstream::UpstreamError;
use fastnow_core::{AuthError, ResolveError};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unauthorized(AuthError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => -32700,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidRequest(_) => -32602,
            Self::Unauthorized(_) => -32001,
            Self::ToolNotFound(_) | Self::ResourceNotFound(_) => -32002,
            Self::Upstream(_) => -32003,
            Self::Internal(_) => -32603,
        }
    }

    /// HTTP status the transport should answer with. Client mistakes that the
    /// envelope already describes stay at 200.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Upstream(UpstreamError::Timeout(_)) => 504,
            Self::Upstream(_) => 502,
            Self::Internal(_) => 500,
            Self::MethodNotFound(_)
            | Self::InvalidRequest(_)
            | Self::ToolNotFound(_)
            | Self::ResourceNotFound(_) => 200,
        }
    }

    /// The auth failure behind a 401, for building the challenge header
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            Self::Unauthorized(err) => Some(err),
            _ => None,
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        let data = match self {
            Self::Upstream(UpstreamError::Status { status, body }) => {
                Some(json!({ "status": status, "body": body }))
            }
            Self::Unauthorized(err) => Some(json!({ "error": err.challenge_code() })),
            _ => None,
        };

        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(store) => {
                GatewayError::Internal(format!("token store unavailable: {}", store))
            }
            other => GatewayError::Unauthorized(other),
        }
    }
}

impl From<ResolveError> for GatewayError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::MissingPathParameter(name) => GatewayError::InvalidRequest(format!(
                "missing required argument '{}'",
                name
            )),
            err @ ResolveError::InvalidPathParameter { .. } => {
                GatewayError::InvalidRequest(err.to_string())
            }
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

/// Body text of an upstream error, decoded if it was JSON
pub(crate) fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
