//! Name to handler table used by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::{Handler, same_handler};

/// Concurrency-safe, case-insensitive handler table.
///
/// Registering a name that already exists replaces the previous handler.
/// One handler may sit under several names.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn Handler>) {
        let key = fold(name);
        let replaced = self.handlers.write().insert(key, handler).is_some();
        tracing::debug!(name, replaced, "registered handler");
    }

    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.handlers.write().remove(&fold(name)).is_some();
        tracing::debug!(name, removed, "deregistered handler by name");
        removed
    }

    /// Remove every name currently mapped to this exact handler instance.
    pub fn deregister_instance(&self, handler: &Arc<dyn Handler>) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|_, registered| !same_handler(registered, handler));
        let removed = before - handlers.len();
        tracing::debug!(handler = handler.name(), removed, "deregistered handler instance");
        removed > 0
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(&fold(name)).cloned()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Registered names (lowercased), sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}
