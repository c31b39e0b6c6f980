//! Request verification and response signing hooks.

use crate::error::Result;
use crate::request::{RawResponse, RequestContext};

/// Extension point for message-level security.
///
/// Both hooks default to pass-through. A failing `verify_request` is
/// reported to the caller as `SecurityError`.
pub trait SecurityProvider: Send + Sync {
    /// Verify request signature or credentials before validation.
    fn verify_request(&self, _req: &RequestContext) -> Result<()> {
        Ok(())
    }

    /// Sign a response envelope. Only called when the call carries a
    /// derived session key.
    fn sign_response(&self, _derived_key: &[u8], _rsp: &mut RawResponse) -> Result<()> {
        Ok(())
    }
}

/// No message-level security.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl SecurityProvider for NoSecurity {}
