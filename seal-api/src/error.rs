//! Serializable api error types and error kinds returned by the seal
//! services.
//!
//! Every fallible provider / task / handler boundary speaks
//! [`ApiError`], which serializes to the single wire representation
//! [`ErrorResponse`] `{ code, msg, retryable }`. Kinds have stable numeric
//! codes; unknown codes deserialize to [`ApiErrorKind::Unknown`] for
//! backwards compatibility.

use std::fmt;

use axum::response::{IntoResponse, Response};
use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `ErrorCode` is the common serialized representation for all
/// [`ApiErrorKind`]s.
pub type ErrorCode = u16;

/// `ErrorResponse` is the common JSON-serialized representation for all
/// [`ApiError`]s. It is the only error struct actually sent across the wire.
/// Everything else is converted to / from it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub msg: String,
    /// Whether the caller can expect an identical retry to succeed later.
    #[serde(default)]
    pub retryable: bool,
}

/// All error kinds returned by seal services.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum ApiErrorKind {
    /// Unknown error
    #[default]
    Unknown,
    /// Internal server error
    Server,
    /// Invalid input; the request was rejected before any state mutation
    InvalidInput,
    /// The requested entity does not exist
    NotFound,
    /// Insufficient funds across all configured payment providers
    InsufficientFunds,
    /// The payment was declined by the provider
    PaymentDeclined,
    /// The payment requires user action (e.g. a 3DS interstitial)
    RequiresAction,
    /// A provider failed transiently (timeout, rate-limit, upstream 5xx)
    TransientProvider,
    /// A stored invariant was violated; operator attention required
    Consistency,
    /// Decryption of a persisted field failed
    Crypto,
    /// The remote service could not be reached
    Unreachable,
    /// The request timed out
    Timeout,
}

impl ApiErrorKind {
    /// An array of all known error kind variants, excluding `Unknown`.
    pub const KINDS: [Self; 11] = [
        Self::Server,
        Self::InvalidInput,
        Self::NotFound,
        Self::InsufficientFunds,
        Self::PaymentDeclined,
        Self::RequiresAction,
        Self::TransientProvider,
        Self::Consistency,
        Self::Crypto,
        Self::Unreachable,
        Self::Timeout,
    ];

    /// Returns the serializable [`ErrorCode`] for this error kind.
    pub fn to_code(self) -> ErrorCode {
        match self {
            Self::Unknown => 0,
            Self::Server => 1,
            Self::InvalidInput => 100,
            Self::NotFound => 101,
            Self::InsufficientFunds => 200,
            Self::PaymentDeclined => 201,
            Self::RequiresAction => 202,
            Self::TransientProvider => 203,
            Self::Consistency => 300,
            Self::Crypto => 301,
            Self::Unreachable => 400,
            Self::Timeout => 401,
        }
    }

    /// Returns the error kind for this raw [`ErrorCode`].
    ///
    /// This method is infallible as unrecognized codes map to `Unknown`.
    pub fn from_code(code: ErrorCode) -> Self {
        match code {
            1 => Self::Server,
            100 => Self::InvalidInput,
            101 => Self::NotFound,
            200 => Self::InsufficientFunds,
            201 => Self::PaymentDeclined,
            202 => Self::RequiresAction,
            203 => Self::TransientProvider,
            300 => Self::Consistency,
            301 => Self::Crypto,
            400 => Self::Unreachable,
            401 => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    /// Whether callers can expect an identical retry to succeed later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransientProvider | Self::Unreachable | Self::Timeout
        )
    }

    pub fn to_http_status(self) -> StatusCode {
        match self {
            Self::Unknown | Self::Server | Self::Consistency | Self::Crypto =>
                StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InsufficientFunds
            | Self::PaymentDeclined
            | Self::RequiresAction => StatusCode::PAYMENT_REQUIRED,
            Self::TransientProvider => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unreachable => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Unknown => "Unknown error",
            Self::Server => "Internal server error",
            Self::InvalidInput => "Invalid input",
            Self::NotFound => "Not found",
            Self::InsufficientFunds => "Insufficient funds",
            Self::PaymentDeclined => "Payment declined",
            Self::RequiresAction => "Payment requires user action",
            Self::TransientProvider => "Payment provider temporarily failed",
            Self::Consistency => "Internal consistency error",
            Self::Crypto => "Decryption failure",
            Self::Unreachable => "Service unreachable",
            Self::Timeout => "Request timed out",
        };
        f.write_str(msg)
    }
}

/// The service-level error type: a kind plus a human-readable message.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind}: {msg}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub msg: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidInput, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, msg)
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Server, msg)
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Consistency, msg)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<ApiError> for ErrorResponse {
    fn from(error: ApiError) -> Self {
        Self {
            code: error.kind.to_code(),
            msg: error.msg,
            retryable: error.kind.is_retryable(),
        }
    }
}

impl From<ErrorResponse> for ApiError {
    fn from(resp: ErrorResponse) -> Self {
        Self {
            kind: ApiErrorKind::from_code(resp.code),
            msg: resp.msg,
        }
    }
}

/// Invariant violations and storage poisoning surface as consistency errors;
/// everything anyhow-wrapped that reaches a handler boundary is a server
/// error with the full error chain in the message.
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::server(format!("{error:#}"))
    }
}

/// Amount arithmetic never fails on well-formed billing state.
impl From<seal_common::amount::Error> for ApiError {
    fn from(error: seal_common::amount::Error) -> Self {
        Self::consistency(format!("Amount arithmetic failed: {error}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.to_http_status();
        let body = axum::Json(ErrorResponse::from(self));
        (status, body).into_response()
    }
}
