//! Conversion between axum's HTTP types and the proxy's neutral types.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};

use rankrelay_core::{Error, Request, Response, Result};

/// Largest request body the dispatcher will buffer.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Buffer an incoming HTTP request into the neutral form handlers consume.
pub async fn into_core_request(req: axum::extract::Request) -> Result<Request> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::Http(format!("failed to read request body: {e}")))?;
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect::<HashMap<_, _>>();
    Ok(Request {
        method: parts.method.as_str().to_string(),
        path,
        headers,
        body: bytes.to_vec(),
    })
}

/// Render a neutral response as the HTTP response the client receives.
/// Hop-by-hop and length headers are dropped; hyper recomputes them.
pub fn into_axum_response(resp: Response) -> axum::response::Response {
    let mut out = axum::response::Response::new(Body::from(resp.body));
    *out.status_mut() =
        StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = out.headers_mut();
    for (name, value) in &resp.headers {
        if skip_header(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
    out
}

/// Headers that describe one hop rather than the payload.
pub(crate) fn skip_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "host"
            | "content-length"
            | "transfer-encoding"
            | "connection"
            | "keep-alive"
            | "upgrade"
            | "proxy-connection"
            | "accept-encoding"
    )
}
