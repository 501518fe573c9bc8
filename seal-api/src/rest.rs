//! A thin JSON REST client used for GM -> LM polling and API -> GM task
//! triggers.
//!
//! Non-2xx responses are decoded from the wire [`ErrorResponse`] into typed
//! [`ApiError`]s; transport failures map to the `Unreachable` / `Timeout`
//! kinds so callers can branch on retryability.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

use crate::error::{ApiError, ApiErrorKind, ErrorResponse};

#[derive(Clone, Debug)]
pub struct RestClient {
    client: reqwest::Client,
}

impl RestClient {
    /// Build a client with a per-request `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// `GET {url}` and deserialize the JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ApiError> {
        trace!(%url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_response(resp).await
    }

    /// `POST {url}` with a JSON body and deserialize the JSON response.
    pub async fn post<Req: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Req,
    ) -> Result<T, ApiError> {
        trace!(%url, "POST");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_response(resp).await
    }

    /// `POST {url}` with an empty body.
    pub async fn post_empty<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ApiError> {
        trace!(%url, "POST");
        let resp = self
            .client
            .post(url)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_response(resp).await
    }

    async fn read_response<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport_error)?;

        if status.is_success() {
            serde_json::from_slice::<T>(&bytes).map_err(|e| {
                ApiError::server(format!(
                    "Failed to deserialize success response: {e:#}"
                ))
            })
        } else {
            // Decode the wire error; tolerate non-conformant bodies from
            // proxies etc.
            let error = match serde_json::from_slice::<ErrorResponse>(&bytes) {
                Ok(err_resp) => ApiError::from(err_resp),
                Err(_) => ApiError::new(
                    ApiErrorKind::Unknown,
                    format!("HTTP {status}: non-conformant error body"),
                ),
            };
            Err(error)
        }
    }
}

fn transport_error(error: reqwest::Error) -> ApiError {
    let kind = if error.is_timeout() {
        ApiErrorKind::Timeout
    } else {
        ApiErrorKind::Unreachable
    };
    ApiError::new(kind, format!("{error:#}"))
}
