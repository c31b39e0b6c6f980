//! Interface registry.
//!
//! Owns the contracts and implementation bindings keyed by
//! `(iface, major version)`. Registering a contract also creates an alias
//! entry for every interface it inherits from; an alias redirects function
//! lookup to the concrete contract but shares the concrete implementation
//! binding under its own key, so one implementation serves its interface and
//! all of its ancestors.
//!
//! # Thread Safety
//!
//! Lookups and implementation resolution may run concurrently from any number
//! of calls. Registration takes the write lock for the whole check-and-insert
//! so it is all-or-nothing; it is expected to happen at startup.

use crate::contract::{ContractLoader, ContractModel, IfaceVersion};
use crate::error::{ExecError, Result};
use crate::implementation::InterfaceImplementation;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, OnceLock, RwLock};
use std::thread::ThreadId;
use tracing::{debug, info, warn};

static IFACE_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z][a-z0-9]*)(\.[a-z][a-z0-9]*)+:[0-9]+\.[0-9]+$")
        .expect("iface version regex must compile")
});

static TYPE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("type name regex must compile")
});

/// Registry key: interface name and major version.
pub type InterfaceKey = (String, u32);

/// Constructor of an implementation type, given the registry.
pub type Constructor = fn(&InterfaceRegistry) -> Result<Arc<dyn InterfaceImplementation>>;

/// Factory producing an implementation, given the registry.
pub type ImplementationFactory =
    Box<dyn Fn(&InterfaceRegistry) -> Result<Arc<dyn InterfaceImplementation>> + Send + Sync>;

/// Implementation types constructible from the registry alone.
///
/// `from_registry` must not resolve the interface it is being constructed
/// for, nor any alias of it; such a resolution fails with `InternalError`.
pub trait FromRegistry: InterfaceImplementation + Sized + 'static {
    fn from_registry(registry: &InterfaceRegistry) -> Result<Self>;
}

/// Named reference to an implementation type.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    construct: Constructor,
}

impl TypeDescriptor {
    pub const fn new(name: &'static str, construct: Constructor) -> Self {
        Self { name, construct }
    }

    /// Descriptor of `T`, named after its Rust type path.
    pub fn of<T: FromRegistry>() -> Self {
        fn construct<T: FromRegistry>(
            registry: &InterfaceRegistry,
        ) -> Result<Arc<dyn InterfaceImplementation>> {
            Ok(Arc::new(T::from_registry(registry)?))
        }

        Self {
            name: std::any::type_name::<T>(),
            construct: construct::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TypeDescriptor").field(&self.name).finish()
    }
}

/// What was registered to serve an interface.
pub enum Implementation {
    /// Already constructed.
    Instance(Arc<dyn InterfaceImplementation>),
    /// Constructed on first use.
    Type(TypeDescriptor),
    /// Resolved on first use through the registry's type catalog.
    Named(String),
    /// Invoked on first use.
    Factory(ImplementationFactory),
}

impl Implementation {
    pub fn instance<T: InterfaceImplementation + 'static>(implementation: T) -> Self {
        Implementation::Instance(Arc::new(implementation))
    }

    pub fn of<T: FromRegistry>() -> Self {
        Implementation::Type(TypeDescriptor::of::<T>())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Implementation::Named(name.into())
    }

    /// Build the implementation on first use. The factory may resolve other
    /// interfaces but not its own binding.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&InterfaceRegistry) -> Result<Arc<dyn InterfaceImplementation>>
            + Send
            + Sync
            + 'static,
    {
        Implementation::Factory(Box::new(factory))
    }

    fn is_valid(&self) -> bool {
        match self {
            Implementation::Named(name) => TYPE_NAME_RE.is_match(name),
            _ => true,
        }
    }
}

impl std::fmt::Debug for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Implementation::Instance(_) => f.write_str("Instance"),
            Implementation::Type(desc) => write!(f, "Type({})", desc.name()),
            Implementation::Named(name) => write!(f, "Named({})", name),
            Implementation::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// Implementation binding, materialized once.
struct Binding {
    source: Implementation,
    resolved: OnceLock<Arc<dyn InterfaceImplementation>>,
    init: Mutex<()>,
    /// Thread currently running the constructor, if any.
    resolving: Mutex<Option<ThreadId>>,
}

impl Binding {
    fn new(source: Implementation) -> Self {
        let resolved = OnceLock::new();
        if let Implementation::Instance(instance) = &source {
            let _ = resolved.set(instance.clone());
        }
        Self {
            source,
            resolved,
            init: Mutex::new(()),
            resolving: Mutex::new(None),
        }
    }

    fn resolving(&self) -> Result<std::sync::MutexGuard<'_, Option<ThreadId>>> {
        self.resolving
            .lock()
            .map_err(|e| ExecError::InternalError(format!("Failed to acquire binding lock: {}", e)))
    }
}

/// Resolved registry entry.
#[derive(Debug, Clone)]
pub enum RegistryEntry {
    /// Contract registered directly.
    Concrete(Arc<ContractModel>),
    /// Inherited interface redirecting to the contract that extends it.
    Alias {
        iface: String,
        version: String,
        major_version: u32,
        minor_version: u32,
        derived_from: Arc<ContractModel>,
    },
}

impl RegistryEntry {
    pub fn iface(&self) -> &str {
        match self {
            RegistryEntry::Concrete(contract) => &contract.iface,
            RegistryEntry::Alias { iface, .. } => iface,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            RegistryEntry::Concrete(contract) => &contract.version,
            RegistryEntry::Alias { version, .. } => version,
        }
    }

    pub fn major_version(&self) -> u32 {
        match self {
            RegistryEntry::Concrete(contract) => contract.major_version,
            RegistryEntry::Alias { major_version, .. } => *major_version,
        }
    }

    /// The entry's own minor version; for an alias, the inherited one.
    pub fn minor_version(&self) -> u32 {
        match self {
            RegistryEntry::Concrete(contract) => contract.minor_version,
            RegistryEntry::Alias { minor_version, .. } => *minor_version,
        }
    }

    /// Contract used for function lookup.
    pub fn contract(&self) -> &Arc<ContractModel> {
        match self {
            RegistryEntry::Concrete(contract) => contract,
            RegistryEntry::Alias { derived_from, .. } => derived_from,
        }
    }

    pub fn derived_from(&self) -> Option<&Arc<ContractModel>> {
        match self {
            RegistryEntry::Concrete(_) => None,
            RegistryEntry::Alias { derived_from, .. } => Some(derived_from),
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(self, RegistryEntry::Alias { .. })
    }
}

struct Slot {
    entry: RegistryEntry,
    binding: Arc<Binding>,
}

/// Authoritative set of contracts and their implementation bindings.
pub struct InterfaceRegistry {
    loader: Arc<dyn ContractLoader>,
    spec_dirs: Vec<PathBuf>,
    slots: RwLock<HashMap<InterfaceKey, Slot>>,
    types: RwLock<HashMap<String, TypeDescriptor>>,
}

impl InterfaceRegistry {
    pub fn new(loader: Arc<dyn ContractLoader>, spec_dirs: Vec<PathBuf>) -> Self {
        Self {
            loader,
            spec_dirs,
            slots: RwLock::new(HashMap::new()),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Make a type resolvable by name for [`Implementation::Named`].
    pub fn register_type(&self, descriptor: TypeDescriptor) -> Result<()> {
        self.register_type_as(descriptor.name(), descriptor)
    }

    /// Make a type resolvable under an explicit name.
    pub fn register_type_as(&self, name: &str, descriptor: TypeDescriptor) -> Result<()> {
        let mut types = self
            .types
            .write()
            .map_err(|e| ExecError::InternalError(format!("Failed to acquire types lock: {}", e)))?;
        types.insert(name.to_string(), descriptor);
        Ok(())
    }

    /// Register `implementation` for `iface_ver` (`name:major.minor`).
    ///
    /// Either the contract and all of its inherited aliases become visible
    /// together, or nothing changes.
    pub fn register(&self, iface_ver: &str, implementation: Implementation) -> Result<()> {
        if !IFACE_VERSION_RE.is_match(iface_ver) {
            return Err(ExecError::InternalError(format!(
                "Invalid ifacever: {}",
                iface_ver
            )));
        }

        let iv = IfaceVersion::parse(iface_ver)
            .ok_or_else(|| ExecError::InternalError(format!("Invalid ifacever: {}", iface_ver)))?;
        let key: InterfaceKey = (iv.iface.clone(), iv.major);

        if self.read_slots()?.contains_key(&key) {
            return Err(ExecError::InternalError("Already registered".to_string()));
        }

        if !implementation.is_valid() {
            return Err(ExecError::InternalError(
                "Impl is not Object/String/Callable".to_string(),
            ));
        }

        let contract = Arc::new(self.loader.load(&iv.iface, &iv.version(), &self.spec_dirs)?);
        let binding = Arc::new(Binding::new(implementation));

        let mut staged: Vec<(InterfaceKey, RegistryEntry)> =
            vec![(key, RegistryEntry::Concrete(contract.clone()))];

        for super_iface in &contract.inherited_versions {
            let super_iv = IfaceVersion::parse(super_iface).ok_or_else(|| {
                ExecError::InternalError(format!(
                    "Invalid inherited interface '{}' of {}",
                    super_iface, iface_ver
                ))
            })?;

            staged.push((
                (super_iv.iface.clone(), super_iv.major),
                RegistryEntry::Alias {
                    iface: super_iv.iface.clone(),
                    version: super_iv.version(),
                    major_version: super_iv.major,
                    minor_version: super_iv.minor,
                    derived_from: contract.clone(),
                },
            ));
        }

        let mut slots = self
            .slots
            .write()
            .map_err(|e| ExecError::InternalError(format!("Failed to acquire registry lock: {}", e)))?;

        // Re-check under the write lock; the contract load ran unlocked.
        if slots.contains_key(&staged[0].0) {
            return Err(ExecError::InternalError("Already registered".to_string()));
        }

        for (i, (alias_key, _)) in staged.iter().enumerate().skip(1) {
            let clashes_staged = staged[..i].iter().any(|(k, _)| k == alias_key);
            if clashes_staged || slots.contains_key(alias_key) {
                warn!(
                    "Registration of {} conflicts with {}:{}",
                    iface_ver, alias_key.0, alias_key.1
                );
                return Err(ExecError::InternalError(
                    "Conflict with inherited interfaces".to_string(),
                ));
            }
        }

        let alias_count = staged.len() - 1;
        for (slot_key, entry) in staged {
            slots.insert(
                slot_key,
                Slot {
                    entry,
                    binding: binding.clone(),
                },
            );
        }

        info!(
            "Registered {} ({} inherited interface(s))",
            iface_ver, alias_count
        );
        Ok(())
    }

    /// Entry registered for `(iface, major)`.
    pub fn lookup(&self, iface: &str, major: u32) -> Option<RegistryEntry> {
        self.slots
            .read()
            .ok()?
            .get(&(iface.to_string(), major))
            .map(|slot| slot.entry.clone())
    }

    /// Whether anything is registered for `(iface, major)`.
    pub fn is_registered(&self, iface: &str, major: u32) -> bool {
        self.lookup(iface, major).is_some()
    }

    /// Implementation serving `(iface, major)`, materialized on first use and
    /// cached for the lifetime of the registry.
    pub fn resolve_implementation(
        &self,
        iface: &str,
        major: u32,
    ) -> Result<Arc<dyn InterfaceImplementation>> {
        let binding = self
            .read_slots()?
            .get(&(iface.to_string(), major))
            .map(|slot| slot.binding.clone())
            .ok_or_else(|| {
                ExecError::InternalError(format!("No implementation for {}:{}", iface, major))
            })?;

        if let Some(resolved) = binding.resolved.get() {
            return Ok(resolved.clone());
        }

        // The init lock is held while constructing; a constructor resolving
        // its own binding (directly or through an alias) would wait on itself.
        let current = std::thread::current().id();
        if *binding.resolving()? == Some(current) {
            return Err(ExecError::InternalError(format!(
                "Recursive implementation resolution for {}:{}",
                iface, major
            )));
        }

        let _guard = binding
            .init
            .lock()
            .map_err(|e| ExecError::InternalError(format!("Failed to acquire binding lock: {}", e)))?;

        if let Some(resolved) = binding.resolved.get() {
            return Ok(resolved.clone());
        }

        *binding.resolving()? = Some(current);
        let constructed = self.construct(&binding.source);
        *binding.resolving()? = None;
        let instance = constructed?;

        debug!(
            "Resolved implementation {:?} for {}:{}",
            binding.source, iface, major
        );
        let _ = binding.resolved.set(instance.clone());
        Ok(instance)
    }

    fn construct(&self, source: &Implementation) -> Result<Arc<dyn InterfaceImplementation>> {
        match source {
            Implementation::Instance(instance) => Ok(instance.clone()),
            Implementation::Type(descriptor) => (descriptor.construct)(self),
            Implementation::Factory(factory) => factory(self),
            Implementation::Named(name) => {
                let descriptor = self
                    .types
                    .read()
                    .map_err(|e| {
                        ExecError::InternalError(format!("Failed to acquire types lock: {}", e))
                    })?
                    .get(name)
                    .copied()
                    .ok_or_else(|| {
                        ExecError::InternalError(format!(
                            "Implementation type '{}' cannot be resolved",
                            name
                        ))
                    })?;
                (descriptor.construct)(self)
            }
        }
    }

    /// Registered `(iface, major)` keys, aliases included.
    pub fn keys(&self) -> Vec<InterfaceKey> {
        self.slots
            .read()
            .map(|slots| slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn spec_dirs(&self) -> &[PathBuf] {
        &self.spec_dirs
    }

    fn read_slots(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<InterfaceKey, Slot>>> {
        self.slots
            .read()
            .map_err(|e| ExecError::InternalError(format!("Failed to acquire registry lock: {}", e)))
    }
}
