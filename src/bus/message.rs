//! Messages exchanged over bus channels.

use std::collections::HashMap;

use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A request delivered to the service listening on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub channel: String,
    /// HTTP method for bridged calls, `SEND` for broker frames.
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl ServiceRequest {
    pub fn new(channel: impl Into<String>, body: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            method: "SEND".to_string(),
            uri: String::new(),
            path_params: HashMap::new(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Build from an HTTP request. The body becomes JSON when it parses as
    /// JSON, a JSON string otherwise, and `null` when empty.
    pub fn from_http(
        channel: &str,
        parts: &Parts,
        body: &[u8],
        path_params: HashMap<String, String>,
    ) -> Self {
        let query = axum::extract::Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|q| q.0)
            .unwrap_or_default();

        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            method: parts.method.to_string(),
            uri: parts.uri.path().to_string(),
            path_params,
            query,
            headers,
            body: body_to_value(body),
        }
    }
}

pub fn body_to_value(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// A successful service reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Id of the request this answers.
    pub id: Uuid,
    pub status: u16,
    pub payload: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ServiceResponse {
    pub fn ok(request: &ServiceRequest, payload: Value) -> Self {
        Self {
            id: request.id,
            status: StatusCode::OK.as_u16(),
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status.as_u16();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A service-level failure carried back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct ServiceError {
    pub code: u16,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// HTTP status for this error; anything that is not a 4xx/5xx maps to 500.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// A bus reply paired with an optional error; marshalled into the HTTP
/// response of a bridged request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub message: Option<ServiceResponse>,
    pub error: Option<ServiceError>,
}

impl ChannelResponse {
    pub fn from_result(result: Result<ServiceResponse, ServiceError>) -> Self {
        match result {
            Ok(message) => Self {
                message: Some(message),
                error: None,
            },
            Err(error) => Self {
                message: None,
                error: Some(error),
            },
        }
    }
}

impl IntoResponse for ChannelResponse {
    fn into_response(self) -> Response {
        if let Some(error) = self.error {
            let body = serde_json::json!({ "error": error.message });
            return (error.status(), Json(body)).into_response();
        }

        let Some(message) = self.message else {
            return StatusCode::NO_CONTENT.into_response();
        };

        let status = StatusCode::from_u16(message.status).unwrap_or(StatusCode::OK);
        let mut response = (status, Json(message.payload)).into_response();
        for (name, value) in &message.headers {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::try_from(name.as_str()),
                axum::http::HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
