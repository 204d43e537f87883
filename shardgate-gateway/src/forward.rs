use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use reqwest::Url;
use shardgate_routing::{DispatchError, Dispatcher};
use tracing::debug;

/// Methods forwarded without a request body.
pub const BODYLESS_METHODS: [Method; 4] =
    [Method::GET, Method::HEAD, Method::DELETE, Method::TRACE];

pub fn method_carries_body(method: &Method) -> bool {
    !BODYLESS_METHODS.contains(method)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn is_content_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("content-") || matches!(name, "allow" | "expires" | "last-modified")
}

/// Extra header names a `Connection` header marks as hop-by-hop.
fn connection_tokens(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// A buffered inbound request with the route prefix already stripped.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub remainder: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Translates inbound requests into requests against a replica and relays
/// the replica's response back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestForwarder;

impl RequestForwarder {
    /// `scheme://host:port` + base path + remainder + query.
    pub fn target_url(
        base: &Url,
        remainder: &str,
        query: Option<&str>,
    ) -> Result<Url, DispatchError> {
        let host = base.host_str().ok_or_else(|| {
            DispatchError::InvalidEndpoint(base.to_string(), "missing host".into())
        })?;
        let port = base.port_or_known_default().ok_or_else(|| {
            DispatchError::InvalidEndpoint(base.to_string(), "missing port".into())
        })?;
        let base_path = base.path().trim_end_matches('/');
        let mut target = format!("{}://{host}:{port}{base_path}{remainder}", base.scheme());
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        Url::parse(&target)
            .map_err(|e| DispatchError::InvalidRequest(format!("{target}: {e}")))
    }

    pub fn outbound_headers(&self, inbound: &HeaderMap, with_body: bool) -> HeaderMap {
        let listed = connection_tokens(inbound);
        let mut headers = HeaderMap::with_capacity(inbound.len());
        for (name, value) in inbound {
            if is_hop_by_hop(name)
                || listed.contains(name)
                || *name == header::HOST
                || *name == header::CONTENT_LENGTH
            {
                continue;
            }
            if is_content_header(name) && !with_body {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    pub fn build_request(
        &self,
        dispatcher: &Dispatcher,
        request: &InboundRequest,
    ) -> Result<reqwest::Request, DispatchError> {
        let base = dispatcher.base_address();
        let url = Self::target_url(base, &request.remainder, request.query.as_deref())?;
        let with_body = method_carries_body(&request.method);
        let mut headers = self.outbound_headers(&request.headers, with_body);
        if let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) {
            let value = HeaderValue::from_str(&format!("{host}:{port}"))
                .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
            headers.insert(header::HOST, value);
        }

        let mut builder = dispatcher
            .client()
            .request(request.method.clone(), url)
            .headers(headers);
        if with_body {
            builder = builder.body(request.body.clone());
        }
        builder
            .build()
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))
    }

    /// Sends one attempt. A 503 from the replica means it cannot serve the
    /// partition right now and is reported as a transient fault.
    pub async fn send(
        &self,
        dispatcher: Arc<Dispatcher>,
        request: &InboundRequest,
    ) -> Result<reqwest::Response, DispatchError> {
        let outbound = self.build_request(&dispatcher, request)?;
        debug!(
            method = %outbound.method(),
            url = %outbound.url(),
            "forwarding request"
        );
        let response = dispatcher.client().execute(outbound).await?;
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return Err(DispatchError::Unavailable(response.status().as_u16()));
        }
        Ok(response)
    }

    /// Copies status and headers and streams the body through.
    pub fn relay(&self, response: reqwest::Response) -> Response {
        let status = response.status();
        let listed = connection_tokens(response.headers());
        let mut headers = HeaderMap::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            if is_hop_by_hop(name) || listed.contains(name) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        let mut relayed = Response::new(Body::from_stream(response.bytes_stream()));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        relayed
    }
}
