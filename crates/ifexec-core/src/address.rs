//! Transport-agnostic peer address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Kind of a [`SourceAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    IPv4,
    IPv6,
    /// Local socket path or in-process identifier.
    Local,
    /// Non-standard transport extension.
    Other(String),
}

impl AddressType {
    pub fn as_str(&self) -> &str {
        match self {
            AddressType::IPv4 => "IPv4",
            AddressType::IPv6 => "IPv6",
            AddressType::Local => "LOCAL",
            AddressType::Other(name) => name,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized peer endpoint: type, numeric host and port (or local path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceAddress {
    addr_type: AddressType,
    host: String,
    port: String,
}

impl SourceAddress {
    /// Create an address, auto-detecting the type when `addr_type` is `None`.
    ///
    /// A non-numeric port means a local endpoint; otherwise a host containing
    /// `:` is IPv6 and anything else IPv4.
    pub fn new(addr_type: Option<AddressType>, host: impl Into<String>, port: impl ToString) -> Self {
        let host = host.into();
        let port = port.to_string();

        let addr_type = addr_type.unwrap_or_else(|| {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                AddressType::Local
            } else if host.contains(':') {
                AddressType::IPv6
            } else {
                AddressType::IPv4
            }
        });

        Self {
            addr_type,
            host,
            port,
        }
    }

    /// Numeric host, no name lookup.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port or local path/identifier.
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn addr_type(&self) -> &AddressType {
        &self.addr_type
    }
}

impl From<SocketAddr> for SourceAddress {
    fn from(addr: SocketAddr) -> Self {
        let addr_type = match addr {
            SocketAddr::V4(_) => AddressType::IPv4,
            SocketAddr::V6(_) => AddressType::IPv6,
        };
        Self::new(Some(addr_type), addr.ip().to_string(), addr.port())
    }
}

/// `Type:Host:Port`, with the IPv6 host bracketed.
impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr_type == AddressType::IPv6 {
            write!(f, "{}:[{}]:{}", self.addr_type, self.host, self.port)
        } else {
            write!(f, "{}:{}:{}", self.addr_type, self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_detect() {
        let v4 = SourceAddress::new(None, "127.0.0.1", 8080);
        assert_eq!(v4.addr_type(), &AddressType::IPv4);
        assert_eq!(v4.to_string(), "IPv4:127.0.0.1:8080");

        let v6 = SourceAddress::new(None, "::1", "443");
        assert_eq!(v6.addr_type(), &AddressType::IPv6);
        assert_eq!(v6.to_string(), "IPv6:[::1]:443");

        let local = SourceAddress::new(None, "localhost", "/run/exec.sock");
        assert_eq!(local.addr_type(), &AddressType::Local);
        assert_eq!(local.to_string(), "LOCAL:localhost:/run/exec.sock");
    }

    #[test]
    fn test_explicit_type() {
        let addr = SourceAddress::new(Some(AddressType::Other("SCTP".into())), "10.0.0.1", 9);
        assert_eq!(addr.to_string(), "SCTP:10.0.0.1:9");
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: SocketAddr = "[::1]:1234".parse().unwrap();
        let saddr = SourceAddress::from(addr);
        assert_eq!(saddr.host(), "::1");
        assert_eq!(saddr.port(), "1234");
        assert_eq!(saddr.to_string(), "IPv6:[::1]:1234");
    }
}
