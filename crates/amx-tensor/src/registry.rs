use crate::backend::{Backend, BufferType};
use crate::error::{Result, TensorError};

/// Factory the engine calls, with an optional parameter string, to create a
/// backend instance. Returns `None` when the backend cannot be brought up.
pub type BackendFactory = fn(Option<&str>) -> Option<Box<dyn Backend>>;

/// A registered backend: its name, factory and default buffer type.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub factory: BackendFactory,
    pub buffer_type: &'static dyn BufferType,
}

/// Name-indexed collection of available backends.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    entries: Vec<RegistryEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(
        &mut self,
        name: &str,
        factory: BackendFactory,
        buffer_type: &'static dyn BufferType,
    ) {
        self.entries.retain(|e| e.name != name);
        log::info!("registered backend {}", name);
        self.entries.push(RegistryEntry {
            name: name.to_string(),
            factory,
            buffer_type,
        });
    }

    pub fn find(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate the backend registered as `name`.
    ///
    /// # Errors
    /// Returns `UnknownBackend` for an unregistered name and `Other` when the
    /// factory declines to create an instance.
    pub fn init(&self, name: &str, params: Option<&str>) -> Result<Box<dyn Backend>> {
        let entry = self
            .find(name)
            .ok_or_else(|| TensorError::UnknownBackend(name.to_string()))?;
        (entry.factory)(params)
            .ok_or_else(|| TensorError::Other(format!("backend {} failed to initialize", name)))
    }
}
