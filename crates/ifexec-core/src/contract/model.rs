//! Parsed interface contract model.

use crate::error::{ExecError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Named parameters or result variables of a function.
pub type ParamMap = BTreeMap<String, ParamSpec>;

/// Primitive type tag of a parameter or result variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Boolean,
    Integer,
    Number,
    String,
    Map,
    Array,
    Any,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Map => "map",
            ParamType::Array => "array",
            ParamType::Any => "any",
        }
    }

    /// Check a value against this type. Numeric strings are not coerced.
    pub fn check(&self, value: &Value) -> bool {
        match self {
            ParamType::Boolean => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Map => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one parameter or result variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            default: None,
        }
    }

    pub fn with_default(param_type: ParamType, default: Value) -> Self {
        Self {
            param_type,
            default: Some(default),
        }
    }
}

/// Declaration of one interface function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionSpec {
    pub params: ParamMap,
    /// `None` when the function declares no result variables.
    pub result: Option<ParamMap>,
    pub declared_errors: BTreeSet<String>,
    pub allow_raw_upload: bool,
    pub raw_result: bool,
}

impl FunctionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: &str, param_type: ParamType) -> Self {
        self.params.insert(name.to_string(), ParamSpec::new(param_type));
        self
    }

    pub fn param_with_default(mut self, name: &str, param_type: ParamType, default: Value) -> Self {
        self.params
            .insert(name.to_string(), ParamSpec::with_default(param_type, default));
        self
    }

    pub fn result_var(mut self, name: &str, param_type: ParamType) -> Self {
        self.result
            .get_or_insert_with(ParamMap::new)
            .insert(name.to_string(), ParamSpec::new(param_type));
        self
    }

    pub fn throws(mut self, error: &str) -> Self {
        self.declared_errors.insert(error.to_string());
        self
    }

    pub fn raw_upload(mut self) -> Self {
        self.allow_raw_upload = true;
        self
    }

    pub fn raw_result(mut self) -> Self {
        self.raw_result = true;
        self
    }

    /// Whether any result variable is declared.
    pub fn has_result_vars(&self) -> bool {
        self.result.as_ref().map(|r| !r.is_empty()).unwrap_or(false)
    }
}

/// Named access constraint of a contract.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
    SecureChannel,
    AllowAnonymous,
    Other(String),
}

impl Constraint {
    pub fn as_str(&self) -> &str {
        match self {
            Constraint::SecureChannel => "SecureChannel",
            Constraint::AllowAnonymous => "AllowAnonymous",
            Constraint::Other(name) => name,
        }
    }
}

impl From<&str> for Constraint {
    fn from(s: &str) -> Self {
        match s {
            "SecureChannel" => Constraint::SecureChannel,
            "AllowAnonymous" => Constraint::AllowAnonymous,
            other => Constraint::Other(other.to_string()),
        }
    }
}

/// Parsed `iface:major.minor` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceVersion {
    pub iface: String,
    pub major: u32,
    pub minor: u32,
}

impl IfaceVersion {
    /// Parse `name:major.minor`, without validating the interface name.
    pub fn parse(s: &str) -> Option<Self> {
        let (iface, version) = s.split_once(':')?;
        let (major, minor) = parse_version(version)?;
        if iface.is_empty() {
            return None;
        }
        Some(Self {
            iface: iface.to_string(),
            major,
            minor,
        })
    }

    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for IfaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.iface, self.major, self.minor)
    }
}

/// Parse `major.minor`, both purely numeric.
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.split_once('.')?;
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !numeric(major) || !numeric(minor) {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Immutable description of one interface version.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractModel {
    pub iface: String,
    pub version: String,
    pub major_version: u32,
    pub minor_version: u32,
    pub functions: HashMap<String, FunctionSpec>,
    pub constraints: BTreeSet<Constraint>,
    /// `iface:version` of every extended interface, direct parent first.
    pub inherited_versions: Vec<String>,
}

impl ContractModel {
    /// Create an empty contract for `iface` at `major.minor`.
    pub fn new(iface: &str, version: &str) -> Result<Self> {
        let (major_version, minor_version) = parse_version(version).ok_or_else(|| {
            ExecError::InternalError(format!("Invalid version '{}' of {}", version, iface))
        })?;

        Ok(Self {
            iface: iface.to_string(),
            version: version.to_string(),
            major_version,
            minor_version,
            functions: HashMap::new(),
            constraints: BTreeSet::new(),
            inherited_versions: Vec::new(),
        })
    }

    pub fn with_function(mut self, name: &str, spec: FunctionSpec) -> Self {
        self.functions.insert(name.to_string(), spec);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<Constraint>) -> Self {
        self.constraints.insert(constraint.into());
        self
    }

    pub fn inherits(mut self, iface_version: &str) -> Self {
        self.inherited_versions.push(iface_version.to_string());
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    pub fn has_constraint(&self, constraint: &Constraint) -> bool {
        self.constraints.contains(constraint)
    }

    /// `iface:major.minor` of this contract.
    pub fn iface_version(&self) -> String {
        format!("{}:{}", self.iface, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_checks() {
        assert!(ParamType::Boolean.check(&json!(true)));
        assert!(!ParamType::Boolean.check(&json!("true")));

        assert!(ParamType::Integer.check(&json!(42)));
        assert!(ParamType::Integer.check(&json!(-1)));
        assert!(!ParamType::Integer.check(&json!(1.5)));
        assert!(!ParamType::Integer.check(&json!("42")));

        assert!(ParamType::Number.check(&json!(1.5)));
        assert!(ParamType::Number.check(&json!(3)));
        assert!(!ParamType::Number.check(&json!("1.5")));

        assert!(ParamType::String.check(&json!("x")));
        assert!(ParamType::Map.check(&json!({"a": 1})));
        assert!(!ParamType::Map.check(&json!([1])));
        assert!(ParamType::Array.check(&json!([1])));
        assert!(ParamType::Any.check(&Value::Null));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.12"), Some((1, 12)));
        assert_eq!(parse_version("1"), None);
        assert_eq!(parse_version("1.x"), None);
        assert_eq!(parse_version("1.2.3"), None);
        assert_eq!(parse_version(".2"), None);
    }

    #[test]
    fn test_iface_version_parse() {
        let iv = IfaceVersion::parse("exec.base:1.1").unwrap();
        assert_eq!(iv.iface, "exec.base");
        assert_eq!((iv.major, iv.minor), (1, 1));
        assert_eq!(iv.to_string(), "exec.base:1.1");

        assert!(IfaceVersion::parse("exec.base").is_none());
        assert!(IfaceVersion::parse(":1.0").is_none());
    }

    #[test]
    fn test_contract_builder() {
        let contract = ContractModel::new("exec.base", "1.1")
            .unwrap()
            .with_constraint("AllowAnonymous")
            .with_function(
                "ping",
                FunctionSpec::new()
                    .param("ping", ParamType::String)
                    .result_var("pong", ParamType::String),
            );

        assert_eq!(contract.major_version, 1);
        assert_eq!(contract.minor_version, 1);
        assert!(contract.has_constraint(&Constraint::AllowAnonymous));
        assert!(!contract.has_constraint(&Constraint::SecureChannel));
        assert!(contract.function("ping").unwrap().has_result_vars());
        assert!(ContractModel::new("exec.base", "one").is_err());
    }
}
