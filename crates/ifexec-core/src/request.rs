//! Per-call request context.
//!
//! A [`RequestContext`] is created by the transport adapter for every inbound
//! call and consumed by the executor. It owns the raw request and response
//! envelopes, the side-band [`RequestInfo`] and the lazily opened raw streams.
//! It is not `Clone`: a context and its open streams exist exactly once.

use crate::address::SourceAddress;
use crate::cancel::{CallCancellation, CancelToken};
use crate::channel::{ChannelContext, RawInput, RawOutput};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Named parameters or result variables of a call.
pub type ResultBag = Map<String, Value>;

/// Wire request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRequest {
    /// Function selector `iface:major.minor:func`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub f: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, rename = "forcersp", skip_serializing_if = "std::ops::Not::not")]
    pub force_response: bool,
}

impl RawRequest {
    pub fn new(f: impl Into<String>) -> Self {
        Self {
            f: Some(f.into()),
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.p = Some(map);
        }
        self
    }

    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    pub fn with_force_response(mut self) -> Self {
        self.force_response = true;
        self
    }
}

/// Wire response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<ResultBag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
}

/// Security level of the authenticated caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[default]
    Anonymous,
    Info,
    SafeOps,
    PrivilegedOps,
    ExceptionalOps,
}

/// Authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub local_id: String,
    pub global_id: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Side-band information about a call.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub x509_cn: Option<String>,
    pub pubkey: Option<Vec<u8>>,
    pub client_addr: Option<SourceAddress>,
    pub secure_channel: bool,
    pub request_time: DateTime<Utc>,
    pub security_level: SecurityLevel,
    pub user_info: Option<UserInfo>,
    /// Session key for request/response signing.
    pub derived_key: Option<Vec<u8>>,
    pub have_raw_upload: bool,
    pub have_raw_result: bool,
    /// Transport-specific extras.
    pub extensions: HashMap<String, Value>,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            x509_cn: None,
            pubkey: None,
            client_addr: None,
            secure_channel: false,
            request_time: Utc::now(),
            security_level: SecurityLevel::Anonymous,
            user_info: None,
            derived_key: None,
            have_raw_upload: false,
            have_raw_result: false,
            extensions: HashMap::new(),
        }
    }
}

/// Mutable record of one inbound call.
pub struct RequestContext {
    raw_request: RawRequest,
    raw_response: RawResponse,
    info: RequestInfo,
    channel: Option<Arc<dyn ChannelContext>>,
    raw_input: Option<RawInput>,
    raw_output: Option<RawOutput>,
    response_body: Option<Vec<u8>>,
    cancellation: CallCancellation,
    malformed: Option<&'static str>,
    processed: bool,
}

impl RequestContext {
    pub fn new(raw_request: RawRequest) -> Self {
        let raw_response = RawResponse {
            r: Some(ResultBag::new()),
            e: None,
            rid: raw_request.rid.clone(),
        };

        Self {
            raw_request,
            raw_response,
            info: RequestInfo::default(),
            channel: None,
            raw_input: None,
            raw_output: None,
            response_body: None,
            cancellation: CallCancellation::new(),
            malformed: None,
            processed: false,
        }
    }

    /// Build from wire bytes.
    ///
    /// Malformed input is tolerated here. Fields are read one by one, so
    /// a bad field keeps the rest of the envelope (`rid` included) and the
    /// executor rejects the call as `InvalidRequest`.
    pub fn from_json(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                debug!("Unparsable request envelope: {}", e);
                Self::new(RawRequest::default()).with_malformed("Invalid request")
            }
        }
    }

    /// Build from an already parsed value, with the same tolerance as
    /// [`RequestContext::from_json`].
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut envelope) = value else {
            return Self::new(RawRequest::default()).with_malformed("Invalid request");
        };

        let mut malformed = None;
        let mut raw = RawRequest::default();

        match envelope.remove("rid") {
            None | Some(Value::Null) => {}
            Some(Value::String(rid)) => raw.rid = Some(rid),
            Some(_) => malformed = Some("Invalid req->rid"),
        }
        // A non-string selector fails resolution as "Invalid req->f".
        if let Some(Value::String(f)) = envelope.remove("f") {
            raw.f = Some(f);
        }
        match envelope.remove("p") {
            None | Some(Value::Null) => {}
            Some(Value::Object(p)) => raw.p = Some(p),
            Some(_) => malformed = malformed.or(Some("Invalid req->p")),
        }
        match envelope.remove("sec") {
            None | Some(Value::Null) => {}
            Some(Value::String(sec)) => raw.sec = Some(sec),
            Some(_) => malformed = malformed.or(Some("Invalid req->sec")),
        }
        raw.force_response = envelope.get("forcersp").map(is_truthy).unwrap_or(false);

        let req = Self::new(raw);
        match malformed {
            Some(reason) => req.with_malformed(reason),
            None => req,
        }
    }

    fn with_malformed(mut self, reason: &'static str) -> Self {
        self.malformed = Some(reason);
        self
    }

    /// Why the wire envelope was rejected while parsing, if it was.
    pub(crate) fn malformed(&self) -> Option<&'static str> {
        self.malformed
    }

    pub fn with_channel(mut self, channel: Arc<dyn ChannelContext>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_info(mut self, info: RequestInfo) -> Self {
        self.info = info;
        self
    }

    pub fn raw_request(&self) -> &RawRequest {
        &self.raw_request
    }

    pub fn raw_response(&self) -> &RawResponse {
        &self.raw_response
    }

    pub(crate) fn raw_request_mut(&mut self) -> &mut RawRequest {
        &mut self.raw_request
    }

    pub(crate) fn raw_response_mut(&mut self) -> &mut RawResponse {
        &mut self.raw_response
    }

    /// Parameter bag, if the request carried one.
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.raw_request.p.as_ref()
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.raw_request.p.as_ref().and_then(|p| p.get(name))
    }

    /// Result bag of the response being built.
    pub fn result(&self) -> Option<&ResultBag> {
        self.raw_response.r.as_ref()
    }

    pub fn result_mut(&mut self) -> &mut ResultBag {
        self.raw_response.r.get_or_insert_with(ResultBag::new)
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut RequestInfo {
        &mut self.info
    }

    pub fn channel(&self) -> Option<&Arc<dyn ChannelContext>> {
        self.channel.as_ref()
    }

    /// Raw input stream, opened on first use. `None` without a channel.
    pub fn raw_input(&mut self) -> Result<Option<&mut RawInput>> {
        if self.raw_input.is_none() {
            if let Some(channel) = &self.channel {
                self.raw_input = Some(channel.open_raw_input()?);
            }
        }
        Ok(self.raw_input.as_mut())
    }

    /// Raw output stream, opened on first use. `None` without a channel.
    pub fn raw_output(&mut self) -> Result<Option<&mut RawOutput>> {
        if self.raw_output.is_none() {
            if let Some(channel) = &self.channel {
                self.raw_output = Some(channel.open_raw_output()?);
            }
        }
        Ok(self.raw_output.as_mut())
    }

    /// Whether the raw output stream has been opened.
    pub fn raw_output_opened(&self) -> bool {
        self.raw_output.is_some()
    }

    /// Abort the call `timeout` from now. Zero disables the deadline.
    pub fn cancel_after(&mut self, timeout: Duration) {
        self.cancellation.cancel_after(timeout);
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancellation.token()
    }

    pub(crate) fn cancellation(&self) -> &CallCancellation {
        &self.cancellation
    }

    /// Serialized envelope to transmit, if any.
    pub fn response_body(&self) -> Option<&[u8]> {
        self.response_body.as_deref()
    }

    pub fn take_response_body(&mut self) -> Option<Vec<u8>> {
        self.response_body.take()
    }

    pub(crate) fn set_response_body(&mut self, body: Option<Vec<u8>>) {
        self.response_body = body;
    }

    pub(crate) fn mark_processed(&mut self) -> bool {
        std::mem::replace(&mut self.processed, true)
    }

    /// Close the raw streams. Called on drop; later calls are no-ops.
    pub fn close_streams(&mut self) {
        if let Some(mut output) = self.raw_output.take() {
            let _ = output.flush();
        }
        self.raw_input = None;
    }
}

/// Loose truthiness for flags that clients send as `1`, `"1"` or `true`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.close_streams();
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("raw_request", &self.raw_request)
            .field("raw_response", &self.raw_response)
            .field("info", &self.info)
            .field("channel", &self.channel.as_ref().map(|c| c.channel_type()))
            .field("processed", &self.processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalChannel;
    use serde_json::json;
    use std::io::Read;

    #[test]
    fn test_from_json_echoes_rid() {
        let req = RequestContext::from_json(
            br#"{"f":"exec.base:1.1:ping","p":{"ping":"x"},"rid":"C42","forcersp":true}"#,
        );

        assert_eq!(req.raw_request().f.as_deref(), Some("exec.base:1.1:ping"));
        assert_eq!(req.param("ping"), Some(&json!("x")));
        assert!(req.raw_request().force_response);
        assert_eq!(req.raw_response().rid.as_deref(), Some("C42"));
        assert!(req.result().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json_tolerated() {
        let req = RequestContext::from_json(b"{ not json");
        assert!(req.raw_request().f.is_none());
        assert!(req.params().is_none());
        assert_eq!(req.malformed(), Some("Invalid request"));

        let req = RequestContext::from_value(json!([1, 2]));
        assert_eq!(req.malformed(), Some("Invalid request"));
    }

    #[test]
    fn test_bad_field_keeps_rest_of_envelope() {
        let req = RequestContext::from_value(json!({"f": "a.b:1.0:f", "p": [1], "rid": "R1"}));
        assert_eq!(req.raw_request().f.as_deref(), Some("a.b:1.0:f"));
        assert_eq!(req.raw_response().rid.as_deref(), Some("R1"));
        assert!(req.params().is_none());
        assert_eq!(req.malformed(), Some("Invalid req->p"));

        let req = RequestContext::from_value(json!({"f": "a.b:1.0:f", "sec": 5, "rid": "R2"}));
        assert_eq!(req.raw_response().rid.as_deref(), Some("R2"));
        assert_eq!(req.malformed(), Some("Invalid req->sec"));

        let req = RequestContext::from_value(json!({"f": 7, "rid": "R3"}));
        assert!(req.raw_request().f.is_none());
        assert!(req.malformed().is_none());
    }

    #[test]
    fn test_forcersp_truthiness() {
        for (flag, expected) in [
            (json!(true), true),
            (json!(1), true),
            (json!("1"), true),
            (json!("yes"), true),
            (json!(false), false),
            (json!(0), false),
            (json!("0"), false),
            (json!(""), false),
            (json!(null), false),
        ] {
            let req = RequestContext::from_value(json!({"f": "a.b:1.0:f", "forcersp": flag}));
            assert_eq!(req.raw_request().force_response, expected, "{}", flag);
            assert!(req.malformed().is_none());
        }
    }

    #[test]
    fn test_raw_request_serialization() {
        let raw = RawRequest::new("a.b:1.0:f").with_params(json!({"x": 1}));
        let value = serde_json::to_value(&raw).unwrap();
        assert_eq!(value, json!({"f": "a.b:1.0:f", "p": {"x": 1}}));

        let forced = RawRequest::new("a.b:1.0:f").with_force_response();
        let value = serde_json::to_value(&forced).unwrap();
        assert_eq!(value["forcersp"], json!(true));
    }

    #[test]
    fn test_raw_streams_open_once() {
        let channel = Arc::new(LocalChannel::with_raw_input(b"data".to_vec()));
        let output = channel.raw_output();
        let mut req = RequestContext::new(RawRequest::new("a.b:1.0:f")).with_channel(channel);

        let mut buf = String::new();
        req.raw_input()
            .unwrap()
            .unwrap()
            .read_to_string(&mut buf)
            .unwrap();
        assert_eq!(buf, "data");

        // Second access returns the same, now exhausted, stream
        let mut rest = String::new();
        req.raw_input()
            .unwrap()
            .unwrap()
            .read_to_string(&mut rest)
            .unwrap();
        assert!(rest.is_empty());

        assert!(!req.raw_output_opened());
        req.raw_output().unwrap().unwrap().write_all(b"out").unwrap();
        assert!(req.raw_output_opened());

        drop(req);
        assert_eq!(output.contents(), b"out");
    }

    #[test]
    fn test_raw_streams_without_channel() {
        let mut req = RequestContext::new(RawRequest::new("a.b:1.0:f"));
        assert!(req.raw_input().unwrap().is_none());
        assert!(req.raw_output().unwrap().is_none());
    }

    #[test]
    fn test_default_info() {
        let req = RequestContext::new(RawRequest::default());
        let info = req.info();
        assert!(!info.secure_channel);
        assert_eq!(info.security_level, SecurityLevel::Anonymous);
        assert!(info.user_info.is_none());
        assert!(!info.have_raw_upload);
    }
}
