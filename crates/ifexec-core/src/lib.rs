//! Ifexec - Executor side of an interface-contract RPC protocol.
//!
//! Implementations are registered against versioned interface contracts. Each
//! inbound call is resolved, checked against the contract, dispatched to the
//! implementation and answered with a success or error envelope. This crate is
//! transport-free; see `ifexec-http` for the HTTP adapter.
//!
//! # Example
//!
//! ```rust,ignore
//! use ifexec::{
//!     ContractModel, Executor, ExecutorOptions, FunctionSpec, FunctionTable, Implementation,
//!     ParamType, RawRequest, RequestContext, StaticContracts,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ifexec::Result<()> {
//!     let contract = ContractModel::new("demo.echo", "1.0")?
//!         .with_constraint("AllowAnonymous")
//!         .with_function(
//!             "echo",
//!             FunctionSpec::new()
//!                 .param("msg", ParamType::String)
//!                 .result_var("msg", ParamType::String),
//!         );
//!
//!     let executor = Executor::new(
//!         ExecutorOptions::default(),
//!         Arc::new(StaticContracts::new().with(contract)),
//!     );
//!     executor.register(
//!         "demo.echo:1.0",
//!         Implementation::instance(FunctionTable::new().sync("echo", |req| {
//!             Ok(ifexec::into_bag(json!({ "msg": req.param("msg").cloned() })))
//!         })),
//!     )?;
//!
//!     let mut req = RequestContext::new(
//!         RawRequest::new("demo.echo:1.0:echo").with_params(json!({ "msg": "hi" })),
//!     );
//!     executor.process(&mut req).await?;
//!     println!("{}", String::from_utf8_lossy(req.response_body().unwrap_or_default()));
//!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod implementation;
pub mod registry;
pub mod request;
pub mod security;

// Re-export commonly used types
pub use address::{AddressType, SourceAddress};
pub use cancel::{CallCancellation, CancelToken};
pub use channel::{
    ChannelContext, ChannelState, ChannelType, LocalChannel, RawInput, RawOutput, SharedBuffer,
};
pub use config::{ExecutorConfig, ExecutorOptions};
pub use contract::{
    parse_version, Constraint, ContractLoader, ContractModel, FunctionSpec, IfaceVersion,
    ParamSpec, ParamType, SpecDirLoader, StaticContracts,
};
pub use error::{ExecError, Result};
pub use executor::Executor;
pub use implementation::{into_bag, Completion, FunctionTable, InterfaceImplementation};
pub use registry::{
    FromRegistry, Implementation, InterfaceRegistry, RegistryEntry, TypeDescriptor,
};
pub use request::{
    RawRequest, RawResponse, RequestContext, RequestInfo, ResultBag, SecurityLevel, UserInfo,
};
pub use security::{NoSecurity, SecurityProvider};
