//! HTTP request handlers.
//!
//! Two request forms are served below the configured subpath:
//!
//! - `POST <subpath>` with a JSON request envelope as body;
//! - `GET|POST <subpath><iface>/<ver>/<func>[/<sec>]` with the query string as
//!   parameters. A `POST` in this form carries a raw upload as its body.

use crate::channel::HttpChannel;
use crate::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, Request, State},
    http::{header::CONTENT_TYPE, request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ifexec::{ExecError, ExecutorConfig, RawRequest, RequestContext, Result, SourceAddress};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

/// Body sent when the request could not be turned into a call at all.
const MALFUNCTION_BODY: &str = r#"{"e":"InvalidRequest"}"#;

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Executor endpoint for everything below the subpath.
pub async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(rest) = strip_subpath(state.config.subpath(), &path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    debug!("{} {}", method, path);

    match execute(&state, request, &rest).await {
        Ok(response) => response,
        Err(e) => {
            error!("HTTP executor failure for {} {}: {}", method, path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, ExecutorConfig::ENVELOPE_CONTENT_TYPE)],
                MALFUNCTION_BODY,
            )
                .into_response()
        }
    }
}

/// Part of `path` below `subpath`, with a trailing `/`.
fn strip_subpath(subpath: &str, path: &str) -> Option<String> {
    let path = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    };
    path.strip_prefix(subpath).map(str::to_string)
}

async fn execute(state: &AppState, request: Request, rest: &str) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let secure = state.config.force_secure || forwarded_https(&parts.headers);

    let (mut req, upload) = if rest.is_empty() {
        if parts.method != Method::POST {
            return Err(ExecError::InvalidRequest(
                "Invalid request method".to_string(),
            ));
        }
        let envelope = read_body(body, state.config.json_limit).await?;
        (RequestContext::from_json(&envelope), None)
    } else {
        let raw = request_from_path(rest, &parts)?;
        let upload = match parts.method {
            Method::GET => None,
            Method::POST => Some(read_body(body, state.config.raw_upload_limit).await?),
            _ => {
                return Err(ExecError::InvalidRequest(
                    "Invalid request method".to_string(),
                ))
            }
        };
        (RequestContext::new(raw), upload)
    };

    let have_raw_upload = upload.is_some();
    let mut channel = HttpChannel::new(parts.headers, secure);
    if let Some(upload) = upload {
        channel = channel.with_body(upload);
    }
    let channel = Arc::new(channel);
    req = req.with_channel(channel.clone());

    let info = req.info_mut();
    info.secure_channel = secure;
    info.have_raw_upload = have_raw_upload;
    info.client_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| SourceAddress::from(*addr));

    state.executor.process(&mut req).await?;

    let raw_output_opened = req.raw_output_opened();
    let envelope = req.take_response_body();
    req.close_streams();

    let mut response = match envelope {
        Some(envelope) => (
            [(CONTENT_TYPE, ExecutorConfig::ENVELOPE_CONTENT_TYPE)],
            envelope,
        )
            .into_response(),
        None if raw_output_opened => Body::from(channel.take_raw_output()).into_response(),
        None => StatusCode::OK.into_response(),
    };

    let overrides = channel.take_overrides();
    if let Some(status) = overrides.status {
        *response.status_mut() = status;
    }
    for (name, value, replace) in overrides.headers {
        if replace {
            response.headers_mut().insert(name, value);
        } else {
            response.headers_mut().append(name, value);
        }
    }

    Ok(response)
}

/// Build the request envelope from `<iface>/<ver>/<func>[/<sec>]/` and the
/// query string.
fn request_from_path(rest: &str, parts: &Parts) -> Result<RawRequest> {
    let segments = rest
        .trim_end_matches('/')
        .split('/')
        .map(|s| {
            urlencoding::decode(s)
                .map(|s| s.into_owned())
                .map_err(|e| ExecError::InvalidRequest(format!("Invalid path segment: {}", e)))
        })
        .collect::<Result<Vec<String>>>()?;

    if !(3..=4).contains(&segments.len()) || segments.iter().any(String::is_empty) {
        return Err(ExecError::InvalidRequest(format!(
            "Invalid request path: {}",
            rest
        )));
    }

    let Query(query) = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map_err(|e| ExecError::InvalidRequest(format!("Invalid query string: {}", e)))?;
    let params: Map<String, Value> = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let mut raw = RawRequest::new(format!(
        "{}:{}:{}",
        segments[0], segments[1], segments[2]
    ));
    raw.p = Some(params);
    raw.sec = segments.get(3).cloned();
    Ok(raw)
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ExecError::InvalidRequest(format!("Failed to read request body: {}", e)))
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = axum::http::Request::builder()
            .uri(uri.parse::<Uri>().unwrap())
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_strip_subpath() {
        assert_eq!(strip_subpath("/", "/").as_deref(), Some(""));
        assert_eq!(strip_subpath("/api/", "/api").as_deref(), Some(""));
        assert_eq!(
            strip_subpath("/api/", "/api/a.b/1.0/f").as_deref(),
            Some("a.b/1.0/f/")
        );
        assert!(strip_subpath("/api/", "/other/a.b/1.0/f").is_none());
    }

    #[test]
    fn test_request_from_path() {
        let raw = request_from_path("a.b/1.0/f/", &parts("/a.b/1.0/f?x=1&y=two%20words")).unwrap();
        assert_eq!(raw.f.as_deref(), Some("a.b:1.0:f"));
        assert!(raw.sec.is_none());
        let p = raw.p.unwrap();
        assert_eq!(p["x"], json!("1"));
        assert_eq!(p["y"], json!("two words"));

        let raw = request_from_path("a.b/1.0/f/user:pass/", &parts("/a.b/1.0/f/user:pass")).unwrap();
        assert_eq!(raw.sec.as_deref(), Some("user:pass"));
        assert!(raw.p.unwrap().is_empty());
    }

    #[test]
    fn test_request_from_bad_path() {
        for rest in ["a.b/1.0/", "a.b/1.0/f/s/extra/", "a.b//f/"] {
            assert!(request_from_path(rest, &parts("/")).is_err(), "{}", rest);
        }
    }

    #[test]
    fn test_forwarded_https() {
        let mut headers = HeaderMap::new();
        assert!(!forwarded_https(&headers));
        headers.insert("x-forwarded-proto", "HTTPS".parse().unwrap());
        assert!(forwarded_https(&headers));
        headers.insert("x-forwarded-proto", "http".parse().unwrap());
        assert!(!forwarded_https(&headers));
    }
}
