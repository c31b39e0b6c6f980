//! Communication channel context.
//!
//! A transport adapter supplies one [`ChannelContext`] per call. Channel
//! contexts are deliberately not `Clone`: their identity and the raw streams
//! they hand out must not be duplicated.

use crate::error::{ExecError, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

/// Raw input stream of a call.
pub type RawInput = Box<dyn Read + Send>;
/// Raw output stream of a call.
pub type RawOutput = Box<dyn Write + Send>;

/// Type of communication channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Http,
    Local,
    Tcp,
    Udp,
    /// Non-standard extension.
    Other(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::Http => "HTTP",
            ChannelType::Local => "LOCAL",
            ChannelType::Tcp => "TCP",
            ChannelType::Udp => "UDP",
            ChannelType::Other(name) => name,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel state variables.
///
/// Only persistent across calls for stateful channels.
#[derive(Debug, Default)]
pub struct ChannelState {
    vars: Mutex<HashMap<String, Value>>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(name).cloned())
    }

    pub fn set(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.lock()?.insert(name.into(), value);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.remove(name))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.vars.lock().map_err(|e| {
            ExecError::InternalError(format!("Failed to acquire channel state lock: {}", e))
        })
    }
}

/// Transport-specific session and channel state of a call.
pub trait ChannelContext: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn is_stateful(&self) -> bool;

    fn state(&self) -> &ChannelState;

    /// Open the raw input stream of the active call.
    fn open_raw_input(&self) -> Result<RawInput>;

    /// Open the raw output stream of the active call.
    fn open_raw_output(&self) -> Result<RawOutput>;

    /// Access to the concrete channel for transport-specific features.
    fn as_any(&self) -> &dyn Any;
}

/// Growable byte buffer shared between a writer and its owner.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    /// Take the contents, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        self.inner
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::other("buffer lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-process channel with in-memory raw streams.
#[derive(Debug, Default)]
pub struct LocalChannel {
    state: ChannelState,
    input: Mutex<Option<Vec<u8>>>,
    output: SharedBuffer,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel whose raw input stream yields `data`.
    pub fn with_raw_input(data: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Mutex::new(Some(data.into())),
            ..Self::default()
        }
    }

    /// Handle on whatever the call wrote to its raw output stream.
    pub fn raw_output(&self) -> SharedBuffer {
        self.output.clone()
    }
}

impl ChannelContext for LocalChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Local
    }

    fn is_stateful(&self) -> bool {
        false
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    fn open_raw_input(&self) -> Result<RawInput> {
        let data = self
            .input
            .lock()
            .map_err(|_| ExecError::InternalError("Raw input lock poisoned".into()))?
            .take()
            .unwrap_or_default();
        Ok(Box::new(Cursor::new(data)))
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
    use serde_json::json;

    #[test]
    fn test_channel_state() {
        let state = ChannelState::new();
        assert!(state.get("sid").unwrap().is_none());

        state.set("sid", json!("abc")).unwrap();
        assert_eq!(state.get("sid").unwrap(), Some(json!("abc")));
        assert_eq!(state.remove("sid").unwrap(), Some(json!("abc")));
        assert!(state.get("sid").unwrap().is_none());
    }

    #[test]
    fn test_poisoned_channel_state_reports_error() {
        let state = Arc::new(ChannelState::new());
        let holder = state.clone();
        let _ = std::thread::spawn(move || {
            let _vars = holder.vars.lock().unwrap();
            panic!("poison the state lock");
        })
        .join();

        let err = state.set("sid", json!("abc")).unwrap_err();
        assert_eq!(err.name(), "InternalError");
        assert!(state.get("sid").is_err());
        assert!(state.remove("sid").is_err());
    }

    #[test]
    fn test_local_channel_streams() {
        let channel = LocalChannel::with_raw_input(b"hello".to_vec());
        assert_eq!(channel.channel_type(), ChannelType::Local);
        assert!(!channel.is_stateful());

        let mut input = channel.open_raw_input().unwrap();
        let mut buf = String::new();
        input.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");

        let mut output = channel.open_raw_output().unwrap();
        output.write_all(b"world").unwrap();
        assert_eq!(channel.raw_output().contents(), b"world");
        assert_eq!(channel.raw_output().take(), b"world");
        assert!(channel.raw_output().contents().is_empty());
    }
}
