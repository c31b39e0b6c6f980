//! Interface contracts.
//!
//! A contract describes one interface version: its functions with their
//! parameters, result variables and declared errors, its access constraints
//! and the interfaces it extends.

pub mod loader;
pub mod model;
pub mod schema;

pub use loader::{ContractLoader, SpecDirLoader, StaticContracts};
pub use model::{
    parse_version, Constraint, ContractModel, FunctionSpec, IfaceVersion, ParamMap, ParamSpec,
    ParamType,
};
pub use schema::{FuncDocument, SpecDocument};
