//! Backend registry
//!
//! A backend is one fully independent environment: its own job tables and its
//! own artifact store. Backends are enumerated in a fixed priority order that
//! callers may rely on (production drains first). There are no cross-backend
//! transactions anywhere in the pool.

use crate::config::{ConfigError, WorkerConfig};
use crate::error::StoreError;
use crate::store::{JobStore, PgStore, SchemaGate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The recognized backend environments, in priority order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendName {
    Prod,
    Staging,
    Dev,
}

impl BackendName {
    /// Fixed enumeration order: production first
    pub const PRIORITY: [BackendName; 3] =
        [BackendName::Prod, BackendName::Staging, BackendName::Dev];

    pub const fn as_str(self) -> &'static str {
        match self {
            BackendName::Prod => "prod",
            BackendName::Staging => "staging",
            BackendName::Dev => "dev",
        }
    }

    /// Environment-variable prefix for this backend's settings
    pub const fn env_prefix(self) -> &'static str {
        match self {
            BackendName::Prod => "PROD",
            BackendName::Staging => "STAGING",
            BackendName::Dev => "DEV",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "prod" | "production" => Some(BackendName::Prod),
            "staging" => Some(BackendName::Staging),
            "dev" | "development" => Some(BackendName::Dev),
            _ => None,
        }
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle to one configured backend
///
/// Cheap to clone; the store and schema gate are shared.
#[derive(Clone)]
pub struct Backend {
    name: BackendName,
    ocr_enabled: bool,
    store: Arc<dyn JobStore>,
    schema_gate: Arc<SchemaGate>,
}

impl Backend {
    pub fn new(name: BackendName, ocr_enabled: bool, store: Arc<dyn JobStore>) -> Self {
        Self {
            name,
            ocr_enabled,
            store,
            schema_gate: Arc::new(SchemaGate::new()),
        }
    }

    pub fn name(&self) -> BackendName {
        self.name
    }

    /// Whether OCR workers may claim from this backend.
    ///
    /// Configuration gating only; schema-based gating is tracked separately
    /// on the schema gate.
    pub fn ocr_enabled(&self) -> bool {
        self.ocr_enabled
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn schema_gate(&self) -> &SchemaGate {
        &self.schema_gate
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("ocr_enabled", &self.ocr_enabled)
            .finish()
    }
}

/// The set of configured backends, in priority order
///
/// Immutable after startup; shared across every task in the process.
pub struct BackendSet {
    backends: Vec<Backend>,
}

impl BackendSet {
    /// Build Postgres-backed handles for every configured backend.
    ///
    /// Pools connect lazily, so this never blocks on the network.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, ConfigError> {
        let mut backends = Vec::new();
        for name in BackendName::PRIORITY {
            if let Some(settings) = config.backends.get(&name) {
                let store = PgStore::connect_lazy(settings, &config.timeouts)?;
                backends.push(Backend::new(name, settings.ocr_enabled, Arc::new(store)));
            }
        }
        Ok(Self { backends })
    }

    /// Build a set from pre-constructed handles (tests, alternate stores).
    /// The handles are re-sorted into priority order.
    pub fn from_backends(mut backends: Vec<Backend>) -> Self {
        backends.sort_by_key(|b| b.name());
        Self { backends }
    }

    /// Configured backends in the fixed priority order
    pub fn available(&self) -> &[Backend] {
        &self.backends
    }

    /// Resolve a backend by name
    pub fn client_for(&self, name: BackendName) -> Result<&Backend, StoreError> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| StoreError::UnknownBackend(name.to_string()))
    }

    /// The designated backend for process-global state (worker liveness):
    /// the first available in priority order.
    pub fn designated(&self) -> Option<&Backend> {
        self.backends.first()
    }

    /// Backends that OCR workers may claim from
    pub fn ocr_backends(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter().filter(|b| b.ocr_enabled())
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}
