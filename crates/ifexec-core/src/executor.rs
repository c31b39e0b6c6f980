//! Executor and request-processing pipeline.
//!
//! [`Executor::process`] runs one call through a fixed sequence of steps:
//!
//! 1. resolve `f` against the registry,
//! 2. security hook,
//! 3. constraint and parameter validation,
//! 4. dispatch to the implementation,
//! 5. result validation and response assembly.
//!
//! A failure in any step skips the rest and goes to the error handler, which
//! still produces a well-formed error envelope. `process` itself only fails
//! on misuse or when the envelope cannot be produced at all.

use crate::cancel::{cancelled_error, expired};
use crate::config::ExecutorOptions;
use crate::contract::{parse_version, Constraint, ContractLoader, ContractModel, FunctionSpec};
use crate::error::{names, ExecError, Result};
use crate::registry::{Implementation, InterfaceRegistry};
use crate::request::{RequestContext, ResultBag};
use crate::security::{NoSecurity, SecurityProvider};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Call-scoped state established by the resolve step.
#[derive(Debug)]
struct CallScope {
    /// Interface name as addressed by the caller; an alias keeps its own.
    iface: String,
    major: u32,
    func: String,
    contract: Arc<ContractModel>,
    function: FunctionSpec,
}

/// Execution side of the protocol: owns the registry and runs calls.
pub struct Executor {
    options: ExecutorOptions,
    registry: InterfaceRegistry,
    security: Arc<dyn SecurityProvider>,
}

impl Executor {
    pub fn new(options: ExecutorOptions, loader: Arc<dyn ContractLoader>) -> Self {
        let registry = InterfaceRegistry::new(loader, options.spec_dirs.clone());
        Self {
            options,
            registry,
            security: Arc::new(NoSecurity),
        }
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityProvider>) -> Self {
        self.security = security;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn registry(&self) -> &InterfaceRegistry {
        &self.registry
    }

    /// Register an implementation of `iface_ver` (`name:major.minor`).
    pub fn register(&self, iface_ver: &str, implementation: Implementation) -> Result<()> {
        self.registry.register(iface_ver, implementation)
    }

    /// Process one call, leaving the envelope to transmit in
    /// [`RequestContext::response_body`].
    ///
    /// Call failures are reported in the envelope, not here. An error is
    /// returned only when `req` was already processed or no envelope could
    /// be produced.
    pub async fn process(&self, req: &mut RequestContext) -> Result<()> {
        if req.mark_processed() {
            return Err(ExecError::InternalError("Missing reqinfo".to_string()));
        }

        if let Some(timeout) = self.options.default_timeout {
            if req.cancellation().deadline().is_none() {
                req.cancel_after(timeout);
            }
        }

        debug!(
            "Processing {}",
            req.raw_request().f.as_deref().unwrap_or("<none>")
        );

        let mut scope = None;
        match self.run(req, &mut scope).await {
            Ok(()) => Ok(()),
            Err(err) => self.handle_error(req, scope.as_ref(), err),
        }
    }

    /// Check access through an access-control service.
    pub fn check_access(&self, _req: &RequestContext, _acd: &Value) -> Result<()> {
        Err(ExecError::NotImplemented("checkAccess".to_string()))
    }

    /// Initialize from a cached registry instead of registering interfaces.
    pub fn init_from_cache(&self) -> Result<()> {
        Err(ExecError::NotImplemented("initFromCache".to_string()))
    }

    /// Cache the registry once all registrations are done.
    pub fn cache_init(&self) -> Result<()> {
        Err(ExecError::NotImplemented("cacheInit".to_string()))
    }

    async fn run(&self, req: &mut RequestContext, scope: &mut Option<CallScope>) -> Result<()> {
        let call = scope.insert(self.resolve(req)?);
        req.info_mut().have_raw_result = call.function.raw_result;

        self.check_security(req)?;
        Self::check_constraints(req, call)?;
        Self::check_params(req, call)?;

        let result = self.dispatch(req, call).await?;
        self.build_response(req, call, result)
    }

    fn resolve(&self, req: &RequestContext) -> Result<CallScope> {
        if let Some(reason) = req.malformed() {
            return Err(ExecError::InvalidRequest(reason.to_string()));
        }

        let f = req
            .raw_request()
            .f
            .as_deref()
            .ok_or_else(|| ExecError::InvalidRequest("Invalid req->f".to_string()))?;

        let parts: Vec<&str> = f.split(':').collect();
        if parts.len() != 3 {
            return Err(ExecError::InvalidRequest("Invalid req->f".to_string()));
        }
        let (iface, version, func) = (parts[0], parts[1], parts[2]);

        let (major, minor) = parse_version(version)
            .ok_or_else(|| ExecError::InvalidRequest("Invalid req->f (version)".to_string()))?;

        let entry = self.registry.lookup(iface, major).ok_or_else(|| {
            ExecError::UnknownInterface(format!("Unknown interface {}:{}", iface, version))
        })?;

        if entry.minor_version() < minor {
            return Err(ExecError::NotSupportedVersion(
                "Iface version is too old".to_string(),
            ));
        }

        let contract = entry.contract().clone();
        let function = contract.function(func).cloned().ok_or_else(|| {
            ExecError::InvalidRequest(format!("Not defined interface function: {}", func))
        })?;

        Ok(CallScope {
            iface: entry.iface().to_string(),
            major,
            func: func.to_string(),
            contract,
            function,
        })
    }

    fn check_security(&self, req: &RequestContext) -> Result<()> {
        self.security.verify_request(req).map_err(|err| match err {
            ExecError::SecurityError(_) => err,
            other => ExecError::SecurityError(other.info()),
        })
    }

    fn check_constraints(req: &RequestContext, call: &CallScope) -> Result<()> {
        let info = req.info();

        if call.contract.has_constraint(&Constraint::SecureChannel) && !info.secure_channel {
            return Err(ExecError::SecurityError("Insecure channel".to_string()));
        }

        if !call.contract.has_constraint(&Constraint::AllowAnonymous) && info.user_info.is_none() {
            return Err(ExecError::SecurityError("Anonymous not allowed".to_string()));
        }

        if info.have_raw_upload && !call.function.allow_raw_upload {
            return Err(ExecError::InvalidRequest(
                "Raw upload is not allowed".to_string(),
            ));
        }

        Ok(())
    }

    fn check_params(req: &mut RequestContext, call: &CallScope) -> Result<()> {
        let declared = &call.function.params;

        let Some(params) = req.raw_request_mut().p.as_mut() else {
            if declared.is_empty() {
                return Ok(());
            }
            return Err(ExecError::InvalidRequest("Missing parameter".to_string()));
        };

        for (name, value) in params.iter() {
            let spec = declared.get(name).ok_or_else(|| {
                ExecError::InvalidRequest(format!("Unknown parameter: {}", name))
            })?;

            if !spec.param_type.check(value) {
                return Err(ExecError::InvalidRequest(format!(
                    "Type mismatch for parameter: {}",
                    name
                )));
            }
        }

        for (name, spec) in declared {
            if params.contains_key(name) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    params.insert(name.clone(), default.clone());
                }
                None => {
                    return Err(ExecError::InvalidRequest(format!(
                        "Missing parameter: {}",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&self, req: &mut RequestContext, call: &CallScope) -> Result<ResultBag> {
        req.cancellation().check()?;

        let implementation = self.registry.resolve_implementation(&call.iface, call.major)?;

        if !implementation.exposes(&call.func) {
            return Err(ExecError::InternalError(
                "Missing function implementation".to_string(),
            ));
        }

        let token = req.cancel_token();
        let deadline = req.cancellation().deadline();

        tokio::select! {
            result = implementation.invoke(&call.func, req) => result,
            _ = token.cancelled() => Err(cancelled_error()),
            _ = expired(deadline) => Err(cancelled_error()),
        }
    }

    fn build_response(
        &self,
        req: &mut RequestContext,
        call: &CallScope,
        result: ResultBag,
    ) -> Result<()> {
        let force_response = req.raw_request().force_response;
        req.result_mut().extend(result);

        let send = {
            let empty = ResultBag::new();
            let bag = req.raw_response().r.as_ref().unwrap_or(&empty);
            self.check_result(&call.function, bag, force_response)?;
            !call.function.raw_result && (!bag.is_empty() || force_response)
        };

        self.finish(req, send)
    }

    fn check_result(&self, function: &FunctionSpec, bag: &ResultBag, force_response: bool) -> Result<()> {
        if function.raw_result {
            if !bag.is_empty() {
                return Err(ExecError::InternalError(
                    "Raw result is expected".to_string(),
                ));
            }
            return Ok(());
        }

        match &function.result {
            Some(declared) if !declared.is_empty() => {
                for (name, value) in bag {
                    let spec = declared.get(name).ok_or_else(|| {
                        ExecError::InternalError(format!("Unknown result variable '{}'", name))
                    })?;

                    if !self.options.prod_mode && !spec.param_type.check(value) {
                        return Err(ExecError::InternalError(format!(
                            "Type mismatch for result variable '{}'",
                            name
                        )));
                    }
                }

                if declared.keys().any(|name| !bag.contains_key(name)) {
                    return Err(ExecError::InternalError(
                        "Missing result variables".to_string(),
                    ));
                }
            }
            _ => {
                if !bag.is_empty() && !force_response {
                    return Err(ExecError::InternalError(
                        "No result variables are expected".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn handle_error(
        &self,
        req: &mut RequestContext,
        call: Option<&CallScope>,
        err: ExecError,
    ) -> Result<()> {
        let declared = call
            .map(|c| c.function.declared_errors.contains(err.name()))
            .unwrap_or(false);

        let name = if err.is_standard() || declared {
            err.name().to_string()
        } else {
            warn!(
                "Undeclared error '{}' coerced to {}: {}",
                err.name(),
                names::INTERNAL_ERROR,
                err.info()
            );
            names::INTERNAL_ERROR.to_string()
        };

        debug!(
            "Call {} failed with {}: {}",
            req.raw_request().f.as_deref().unwrap_or("<none>"),
            name,
            err.info()
        );

        let rsp = req.raw_response_mut();
        rsp.e = Some(name);
        rsp.r = None;

        self.finish(req, true)
    }

    /// Sign and serialize the response envelope.
    fn finish(&self, req: &mut RequestContext, send: bool) -> Result<()> {
        if let Some(key) = req.info().derived_key.clone() {
            self.security.sign_response(&key, req.raw_response_mut())?;
        }

        let body = if send {
            Some(serde_json::to_vec(req.raw_response())?)
        } else {
            None
        };
        req.set_response_body(body);
        Ok(())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("options", &self.options)
            .field("interfaces", &self.registry.keys())
            .finish()
    }
}
