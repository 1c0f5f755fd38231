//! Origin server collaborator.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, header},
    response::Response,
};
use thiserror::Error;
use url::Url;

use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin unreachable: {message}")]
    Unreachable { message: String },
    #[error("failed to read body: {message}")]
    Body { message: String },
}

impl OriginError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self::Body {
            message: message.into(),
        }
    }
}

/// The application server behind the edge.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, OriginError>;
}

const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Forwards requests to an HTTP origin with `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestOrigin {
    client: reqwest::Client,
    base: Url,
    max_request_bytes: usize,
}

impl ReqwestOrigin {
    pub fn new(base: Url, timeout: Duration, max_request_bytes: usize) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            base,
            max_request_bytes,
        })
    }

    /// The request path is appended to the base path, so an origin mounted
    /// under a prefix keeps it.
    fn target_url(&self, request: &Request<Body>) -> Url {
        let mut url = self.base.clone();
        let mount = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{mount}{}", request.uri().path()));
        url.set_query(request.uri().query());
        url
    }
}

#[async_trait]
impl Origin for ReqwestOrigin {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, OriginError> {
        let url = self.target_url(&request);
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_request_bytes)
            .await
            .map_err(|err| OriginError::body(err.to_string()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| OriginError::unreachable(err.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
