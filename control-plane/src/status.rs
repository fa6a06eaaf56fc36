use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use std::convert::Infallible;
use std::fmt;

/// Outcome classes of a discovery call, following the RPC status codes the
/// discovery protocol is defined with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Ok,
    Cancelled,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
}

/// Non-standard status nginx and Envoy use for requests the client abandoned.
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl Code {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Code::Ok => StatusCode::OK,
            Code::Cancelled => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Code::Unimplemented => StatusCode::METHOD_NOT_ALLOWED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Classifies an HTTP response status. Success and `304 Not Modified`
    /// both count as OK.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status.as_u16() {
            CLIENT_CLOSED_REQUEST => Code::Cancelled,
            _ if status.is_success() || status == StatusCode::NOT_MODIFIED => Code::Ok,
            400 | 422 => Code::InvalidArgument,
            404 => Code::NotFound,
            412 => Code::FailedPrecondition,
            405 | 501 => Code::Unimplemented,
            502..=504 => Code::Unavailable,
            _ => Code::Internal,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a call, attached to the response extensions by whoever
/// produced the response so outer layers can inspect it.
#[derive(Clone, Debug, PartialEq)]
pub struct CallStatus {
    pub code: Code,
    pub description: Option<String>,
}

impl CallStatus {
    pub fn new(code: Code, description: impl Into<String>) -> Self {
        CallStatus {
            code,
            description: Some(description.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Renders the status as a JSON error response that still carries the
    /// status in its extensions.
    pub fn into_response(self) -> Response<BoxBody<Bytes, Infallible>> {
        let body = serde_json::json!({
            "code": self.code.as_str(),
            "message": self.description.as_deref().unwrap_or_default(),
        });

        let mut response = Response::new(Full::new(Bytes::from(body.to_string())).boxed());
        *response.status_mut() = self.code.http_status();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.extensions_mut().insert(self);
        response
    }

    pub fn from_response<B>(response: &Response<B>) -> Self {
        response
            .extensions()
            .get::<CallStatus>()
            .cloned()
            .unwrap_or_else(|| CallStatus {
                code: Code::from_http_status(response.status()),
                description: None,
            })
    }
}
