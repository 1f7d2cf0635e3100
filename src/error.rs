use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::response::{self, Responder, Response};
use rocket::Request;
use serde::Serialize;

/// Uniform error body: `{error: "<kind>", message, field?}`.
/// The `error` kind names are part of the wire contract and never change.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Extra top-level keys merged into the body (e.g. name suggestions).
    #[serde(flatten)]
    pub extra: Option<serde_json::Value>,
    #[serde(skip)]
    pub status: Status,
    /// Extra response headers (e.g. `X-RateLimit-*` on 429s).
    #[serde(skip)]
    pub headers: Vec<(&'static str, String)>,
}

impl ApiError {
    fn new(error: &'static str, status: Status, message: impl Into<String>) -> Self {
        ApiError {
            error,
            message: message.into(),
            field: None,
            extra: None,
            status,
            headers: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", Status::Unauthorized, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            "missing_field",
            Status::BadRequest,
            format!("Missing required field: {field}"),
        )
        .with_field(field)
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::new("invalid_field", Status::BadRequest, message).with_field(field)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", Status::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("invalid_request", Status::Conflict, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", Status::NotFound, message)
    }

    pub fn name_taken(message: impl Into<String>) -> Self {
        Self::new("name_taken", Status::Conflict, message)
    }

    pub fn external_provider(message: impl Into<String>) -> Self {
        Self::new("external_provider", Status::BadRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("rate_limited", Status::TooManyRequests, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new("payload_too_large", Status::PayloadTooLarge, message)
    }

    pub fn duplicate_message(message: impl Into<String>) -> Self {
        Self::new("duplicate_message", Status::Conflict, message)
    }

    pub fn organization_not_set() -> Self {
        Self::new(
            "organization_not_set",
            Status::BadRequest,
            "No organization configured on this host. Run setup to choose one before registering agents.",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", Status::InternalServerError, message)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status;
        let headers = self.headers.clone();
        let body = serde_json::to_value(&self)
            .unwrap_or_else(|_| serde_json::json!({"error": "internal_error"}));
        let mut builder = Response::build_from(Json(body).respond_to(req)?);
        builder.status(status);
        for (name, value) in headers {
            builder.header(rocket::http::Header::new(name, value));
        }
        builder.ok()
    }
}
