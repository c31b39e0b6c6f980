//! Interface spec document schema.
//!
//! Defines the JSON structure of `<iface>-<ver>-iface.json` documents.

use super::model::{Constraint, ContractModel, FunctionSpec, ParamMap};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One interface spec document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecDocument {
    pub iface: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftn3rev: Option<String>,
    #[serde(default)]
    pub funcs: BTreeMap<String, FuncDocument>,
    /// Access constraints.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Parent interface as `iface:version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// Function entry of a spec document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuncDocument {
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ParamMap>,
    #[serde(default)]
    pub throws: Vec<String>,
    #[serde(default)]
    pub rawupload: bool,
    #[serde(default)]
    pub rawresult: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl From<FuncDocument> for FunctionSpec {
    fn from(doc: FuncDocument) -> Self {
        FunctionSpec {
            params: doc.params,
            result: doc.result,
            declared_errors: doc.throws.into_iter().collect(),
            allow_raw_upload: doc.rawupload,
            raw_result: doc.rawresult,
        }
    }
}

impl SpecDocument {
    /// Convert into a contract, ignoring inheritance.
    pub fn into_contract(self) -> Result<ContractModel> {
        let mut contract = ContractModel::new(&self.iface, &self.version)?;

        for (name, func) in self.funcs {
            contract.functions.insert(name, func.into());
        }

        for constraint in &self.requires {
            contract
                .constraints
                .insert(Constraint::from(constraint.as_str()));
        }

        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ParamType;

    #[test]
    fn test_parse_document() {
        let doc: SpecDocument = serde_json::from_str(
            r#"{
                "iface": "exec.base",
                "version": "1.1",
                "ftn3rev": "1.1",
                "funcs": {
                    "ping": {
                        "params": { "ping": { "type": "string" } },
                        "result": { "ping": { "type": "string" }, "pong": { "type": "string" } },
                        "throws": ["PingFailed"]
                    },
                    "data": { "rawupload": true, "rawresult": true }
                },
                "requires": ["AllowAnonymous"]
            }"#,
        )
        .unwrap();

        let contract = doc.into_contract().unwrap();
        let ping = contract.function("ping").unwrap();
        assert_eq!(ping.params["ping"].param_type, ParamType::String);
        assert_eq!(ping.result.as_ref().unwrap().len(), 2);
        assert!(ping.declared_errors.contains("PingFailed"));

        let data = contract.function("data").unwrap();
        assert!(data.allow_raw_upload);
        assert!(data.raw_result);
        assert!(data.result.is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let res = serde_json::from_str::<SpecDocument>(
            r#"{ "iface": "a.b", "version": "1.0",
                 "funcs": { "f": { "params": { "x": { "type": "blob" } } } } }"#,
        );
        assert!(res.is_err());
    }
}
