//! HTTP channel context.

use axum::body::Bytes;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use ifexec::{
    ChannelContext, ChannelState, ChannelType, ExecError, RawInput, RawOutput, RequestContext,
    Result, SharedBuffer,
};
use std::any::Any;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

/// Options of [`HttpChannel::set_cookie`].
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub http_only: bool,
    /// Defaults to the channel's secure flag.
    pub secure: Option<bool>,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Mutually exclusive with `max_age`.
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<Duration>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: None,
            domain: None,
            path: None,
            expires: None,
            max_age: None,
        }
    }
}

/// Response changes requested by the implementation.
#[derive(Debug, Default)]
pub(crate) struct ResponseOverrides {
    pub status: Option<StatusCode>,
    /// Header, value and whether it replaces earlier values.
    pub headers: Vec<(HeaderName, HeaderValue, bool)>,
}

/// Channel of one HTTP request. Stateless.
#[derive(Debug)]
pub struct HttpChannel {
    state: ChannelState,
    secure: bool,
    headers: HeaderMap,
    input: Mutex<Option<Bytes>>,
    output: SharedBuffer,
    overrides: Mutex<ResponseOverrides>,
}

impl HttpChannel {
    pub fn new(headers: HeaderMap, secure: bool) -> Self {
        Self {
            state: ChannelState::new(),
            secure,
            headers,
            input: Mutex::new(None),
            output: SharedBuffer::new(),
            overrides: Mutex::new(ResponseOverrides::default()),
        }
    }

    /// Body served as the raw input stream.
    pub fn with_body(self, body: Bytes) -> Self {
        Self {
            input: Mutex::new(Some(body)),
            ..self
        }
    }

    /// The HTTP channel carrying `req`, if any.
    pub fn of(req: &RequestContext) -> Option<&HttpChannel> {
        req.channel()
            .and_then(|channel| channel.as_any().downcast_ref::<HttpChannel>())
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    /// Set a response header, replacing earlier values when `replace` is set.
    pub fn set_response_header(&self, name: &str, value: &str, replace: bool) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ExecError::InternalError(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ExecError::InternalError(format!("Invalid header value: {}", e)))?;
        self.overrides()?.headers.push((name, value, replace));
        Ok(())
    }

    pub fn set_status_code(&self, code: u16) -> Result<()> {
        let status = StatusCode::from_u16(code)
            .map_err(|_| ExecError::InternalError(format!("Invalid status code {}", code)))?;
        self.overrides()?.status = Some(status);
        Ok(())
    }

    pub fn set_cookie(&self, name: &str, value: &str, options: CookieOptions) -> Result<()> {
        if options.expires.is_some() && options.max_age.is_some() {
            return Err(ExecError::InternalError(
                "Invalid options for setCookie".to_string(),
            ));
        }

        let invalid_name = name.is_empty()
            || name
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || "=;,\"".contains(c));
        if invalid_name || value.contains(|c: char| matches!(c, ';' | ',' | '\r' | '\n')) {
            return Err(ExecError::InternalError(format!(
                "Invalid cookie '{}'",
                name
            )));
        }

        let mut cookie = format!("{}={}", name, value);
        if let Some(expires) = options.expires {
            cookie.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if let Some(max_age) = options.max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if let Some(domain) = &options.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }
        if let Some(path) = &options.path {
            cookie.push_str(&format!("; Path={}", path));
        }
        if options.secure.unwrap_or(self.secure) {
            cookie.push_str("; Secure");
        }
        if options.http_only {
            cookie.push_str("; HttpOnly");
        }

        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| ExecError::InternalError(format!("Invalid cookie: {}", e)))?;
        self.overrides()?.headers.push((SET_COOKIE, value, false));
        Ok(())
    }

    pub(crate) fn take_overrides(&self) -> ResponseOverrides {
        self.overrides
            .lock()
            .map(|mut o| std::mem::take(&mut *o))
            .unwrap_or_default()
    }

    pub(crate) fn take_raw_output(&self) -> Vec<u8> {
        self.output.take()
    }

    fn overrides(&self) -> Result<std::sync::MutexGuard<'_, ResponseOverrides>> {
        self.overrides
            .lock()
            .map_err(|_| ExecError::InternalError("Response overrides lock poisoned".into()))
    }
}

impl ChannelContext for HttpChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Http
    }

    fn is_stateful(&self) -> bool {
        false
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    fn open_raw_input(&self) -> Result<RawInput> {
        let body = self
            .input
            .lock()
            .map_err(|_| ExecError::InternalError("Raw input lock poisoned".into()))?
            .take()
            .unwrap_or_default();
        Ok(Box::new(Cursor::new(body)))
    }

    fn open_raw_output(&self) -> Result<RawOutput> {
        Ok(Box::new(self.output.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::{Read, Write};

    fn set_cookies(channel: &HttpChannel) -> Vec<String> {
        channel
            .take_overrides()
            .headers
            .into_iter()
            .filter(|(name, _, _)| *name == SET_COOKIE)
            .map(|(_, v, _)| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_request_headers_and_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("yes"));
        headers.insert(COOKIE, HeaderValue::from_static("a=1; sid=abc"));

        let channel = HttpChannel::new(headers, false);
        assert_eq!(channel.channel_type(), ChannelType::Http);
        assert!(!channel.is_stateful());
        assert_eq!(channel.request_header("X-Custom"), Some("yes"));
        assert_eq!(channel.cookie("sid").as_deref(), Some("abc"));
        assert!(channel.cookie("missing").is_none());
    }

    #[test]
    fn test_cookie_defaults_follow_channel() {
        let channel = HttpChannel::new(HeaderMap::new(), true);
        channel
            .set_cookie("sid", "abc", CookieOptions::default())
            .unwrap();
        assert_eq!(set_cookies(&channel), vec!["sid=abc; Secure; HttpOnly"]);

        let channel = HttpChannel::new(HeaderMap::new(), false);
        channel
            .set_cookie(
                "sid",
                "abc",
                CookieOptions {
                    http_only: false,
                    path: Some("/app".into()),
                    max_age: Some(Duration::from_secs(60)),
                    ..CookieOptions::default()
                },
            )
            .unwrap();
        assert_eq!(set_cookies(&channel), vec!["sid=abc; Max-Age=60; Path=/app"]);
    }

    #[test]
    fn test_cookie_expires() {
        let channel = HttpChannel::new(HeaderMap::new(), false);
        let expires = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        channel
            .set_cookie(
                "k",
                "v",
                CookieOptions {
                    expires: Some(expires),
                    ..CookieOptions::default()
                },
            )
            .unwrap();
        assert_eq!(
            set_cookies(&channel),
            vec!["k=v; Expires=Wed, 02 Jan 2030 03:04:05 GMT; HttpOnly"]
        );
    }

    #[test]
    fn test_cookie_option_conflict() {
        let channel = HttpChannel::new(HeaderMap::new(), false);
        let err = channel
            .set_cookie(
                "k",
                "v",
                CookieOptions {
                    expires: Some(Utc::now()),
                    max_age: Some(Duration::from_secs(1)),
                    ..CookieOptions::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.name(), "InternalError");
        assert_eq!(err.info(), "Invalid options for setCookie");

        assert!(channel
            .set_cookie("bad name", "v", CookieOptions::default())
            .is_err());
    }

    #[test]
    fn test_status_and_headers() {
        let channel = HttpChannel::new(HeaderMap::new(), false);
        channel.set_status_code(201).unwrap();
        channel.set_response_header("X-Result", "1", true).unwrap();
        assert!(channel.set_status_code(42).is_err());
        assert!(channel.set_response_header("bad header", "1", true).is_err());

        let overrides = channel.take_overrides();
        assert_eq!(overrides.status, Some(StatusCode::CREATED));
        assert_eq!(overrides.headers.len(), 1);
    }

    #[test]
    fn test_raw_streams() {
        let channel = HttpChannel::new(HeaderMap::new(), false).with_body(Bytes::from_static(b"up"));

        let mut input = channel.open_raw_input().unwrap();
        let mut data = Vec::new();
        input.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"up");

        let mut output = channel.open_raw_output().unwrap();
        output.write_all(b"down").unwrap();
        assert_eq!(channel.take_raw_output(), b"down");
    }
}
