//! Contract loading collaborators.
//!
//! The registry only sees the [`ContractLoader`] trait. [`StaticContracts`]
//! serves prebuilt models; [`SpecDirLoader`] reads spec documents from disk.

use super::model::{ContractModel, IfaceVersion};
use super::schema::SpecDocument;
use crate::config::ExecutorConfig;
use crate::error::{ExecError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parent chains longer than this are treated as cyclic.
const MAX_INHERIT_DEPTH: usize = 32;

/// Loads and validates the contract for one `iface:version`.
pub trait ContractLoader: Send + Sync {
    fn load(&self, iface: &str, version: &str, search_paths: &[PathBuf]) -> Result<ContractModel>;
}

/// In-memory set of already-parsed contracts.
#[derive(Debug, Clone, Default)]
pub struct StaticContracts {
    contracts: HashMap<String, ContractModel>,
}

impl StaticContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, contract: ContractModel) -> Self {
        self.insert(contract);
        self
    }

    pub fn insert(&mut self, contract: ContractModel) {
        self.contracts.insert(contract.iface_version(), contract);
    }
}

impl ContractLoader for StaticContracts {
    fn load(&self, iface: &str, version: &str, _search_paths: &[PathBuf]) -> Result<ContractModel> {
        self.contracts
            .get(&format!("{}:{}", iface, version))
            .cloned()
            .ok_or_else(|| {
                ExecError::InternalError(format!("Failed to load valid spec for {}:{}", iface, version))
            })
    }
}

/// Reads `<iface>-<ver>-iface.json` documents from search directories.
///
/// The first directory containing the document wins. Parent interfaces are
/// loaded the same way and their functions merged into the derived contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecDirLoader;

impl SpecDirLoader {
    pub fn new() -> Self {
        Self
    }

    /// File name of the spec document for `iface:version`.
    pub fn file_name(iface: &str, version: &str) -> String {
        format!("{}-{}{}", iface, version, ExecutorConfig::SPEC_FILE_SUFFIX)
    }

    fn find(iface: &str, version: &str, search_paths: &[PathBuf]) -> Result<PathBuf> {
        let file_name = Self::file_name(iface, version);
        search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                ExecError::InternalError(format!("Failed to load valid spec for {}:{}", iface, version))
            })
    }

    fn read_document(path: &Path) -> Result<SpecDocument> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ExecError::io_with_path(e, path))?;

        serde_json::from_str(&content).map_err(|e| ExecError::Json {
            message: format!("Failed to parse spec from {}: {}", path.display(), e),
            source: Some(e),
        })
    }

    fn load_depth(
        &self,
        iface: &str,
        version: &str,
        search_paths: &[PathBuf],
        depth: usize,
    ) -> Result<ContractModel> {
        if depth > MAX_INHERIT_DEPTH {
            return Err(ExecError::InternalError(format!(
                "Inheritance chain too deep at {}:{}",
                iface, version
            )));
        }

        let path = Self::find(iface, version, search_paths)?;
        let doc = Self::read_document(&path)?;

        if doc.iface != iface || doc.version != version {
            return Err(ExecError::InternalError(format!(
                "Spec {} describes {}:{} instead of {}:{}",
                path.display(),
                doc.iface,
                doc.version,
                iface,
                version
            )));
        }

        let inherit = doc.inherit.clone();
        let mut contract = doc.into_contract()?;

        if let Some(parent) = inherit {
            let parent_iv = IfaceVersion::parse(&parent).ok_or_else(|| {
                ExecError::InternalError(format!("Invalid inherit '{}' in {}", parent, path.display()))
            })?;

            let parent_contract =
                self.load_depth(&parent_iv.iface, &parent_iv.version(), search_paths, depth + 1)?;

            for (name, func) in parent_contract.functions {
                contract.functions.entry(name).or_insert(func);
            }

            contract.inherited_versions.push(parent_iv.to_string());
            contract
                .inherited_versions
                .extend(parent_contract.inherited_versions);
        }

        debug!("Loaded spec {} from {}", contract.iface_version(), path.display());
        Ok(contract)
    }
}

impl ContractLoader for SpecDirLoader {
    fn load(&self, iface: &str, version: &str, search_paths: &[PathBuf]) -> Result<ContractModel> {
        self.load_depth(iface, version, search_paths, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Constraint, FunctionSpec};
    use tempfile::TempDir;

    fn write_spec(dir: &Path, iface: &str, version: &str, content: &str) {
        std::fs::write(dir.join(SpecDirLoader::file_name(iface, version)), content).unwrap();
    }

    #[test]
    fn test_static_contracts() {
        let loader = StaticContracts::new().with(
            ContractModel::new("a.b", "1.0")
                .unwrap()
                .with_function("f", FunctionSpec::new()),
        );

        assert!(loader.load("a.b", "1.0", &[]).is_ok());
        let err = loader.load("a.b", "1.1", &[]).unwrap_err();
        assert_eq!(err.name(), "InternalError");
    }

    #[test]
    fn test_spec_dir_first_match_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        write_spec(
            second.path(),
            "exec.base",
            "1.0",
            r#"{ "iface": "exec.base", "version": "1.0", "funcs": { "second": {} } }"#,
        );
        write_spec(
            first.path(),
            "exec.base",
            "1.0",
            r#"{ "iface": "exec.base", "version": "1.0", "funcs": { "first": {} } }"#,
        );

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let contract = SpecDirLoader::new().load("exec.base", "1.0", &dirs).unwrap();
        assert!(contract.function("first").is_some());
        assert!(contract.function("second").is_none());
    }

    #[test]
    fn test_spec_dir_inheritance_merge() {
        let dir = TempDir::new().unwrap();
        write_spec(
            dir.path(),
            "exec.root",
            "1.0",
            r#"{ "iface": "exec.root", "version": "1.0", "funcs": { "root": {} } }"#,
        );
        write_spec(
            dir.path(),
            "exec.base",
            "1.1",
            r#"{ "iface": "exec.base", "version": "1.1", "inherit": "exec.root:1.0",
                 "funcs": { "ping": {}, "root": { "rawresult": true } } }"#,
        );
        write_spec(
            dir.path(),
            "exec.derived",
            "1.3",
            r#"{ "iface": "exec.derived", "version": "1.3", "inherit": "exec.base:1.1",
                 "requires": ["SecureChannel"], "funcs": { "extra": {} } }"#,
        );

        let dirs = vec![dir.path().to_path_buf()];
        let contract = SpecDirLoader::new()
            .load("exec.derived", "1.3", &dirs)
            .unwrap();

        assert_eq!(
            contract.inherited_versions,
            vec!["exec.base:1.1".to_string(), "exec.root:1.0".to_string()]
        );
        assert!(contract.function("extra").is_some());
        assert!(contract.function("ping").is_some());
        // exec.base overrides exec.root's definition
        assert!(contract.function("root").unwrap().raw_result);
        assert!(contract.has_constraint(&Constraint::SecureChannel));
    }

    #[test]
    fn test_spec_dir_errors() {
        let dir = TempDir::new().unwrap();
        let dirs = vec![dir.path().to_path_buf()];

        let missing = SpecDirLoader::new().load("exec.none", "1.0", &dirs).unwrap_err();
        assert_eq!(missing.name(), "InternalError");

        write_spec(dir.path(), "exec.bad", "1.0", "{ not json }");
        let bad = SpecDirLoader::new().load("exec.bad", "1.0", &dirs).unwrap_err();
        assert!(matches!(bad, ExecError::Json { .. }));

        write_spec(
            dir.path(),
            "exec.other",
            "1.0",
            r#"{ "iface": "exec.mismatch", "version": "1.0" }"#,
        );
        let mismatch = SpecDirLoader::new().load("exec.other", "1.0", &dirs).unwrap_err();
        assert!(mismatch.info().contains("instead of"));
    }

    #[test]
    fn test_spec_dir_inheritance_cycle() {
        let dir = TempDir::new().unwrap();
        write_spec(
            dir.path(),
            "exec.a",
            "1.0",
            r#"{ "iface": "exec.a", "version": "1.0", "inherit": "exec.b:1.0" }"#,
        );
        write_spec(
            dir.path(),
            "exec.b",
            "1.0",
            r#"{ "iface": "exec.b", "version": "1.0", "inherit": "exec.a:1.0" }"#,
        );

        let dirs = vec![dir.path().to_path_buf()];
        let err = SpecDirLoader::new().load("exec.a", "1.0", &dirs).unwrap_err();
        assert!(err.info().contains("too deep"));
    }
}
