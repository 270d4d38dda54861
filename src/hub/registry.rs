//! Case-insensitive set of hubs attached to one connection.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use super::core::Hub;

// ============================================================================
// HubRegistry
// ============================================================================

/// Hubs keyed by lowercased name.
///
/// Inserting a hub whose name matches an existing one (ignoring case)
/// replaces it.
#[derive(Default, Clone)]
pub struct HubRegistry {
    hubs: FxHashMap<String, Hub>,
}

impl HubRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a hub, returning the one it replaced.
    pub fn insert(&mut self, hub: Hub) -> Option<Hub> {
        self.hubs.insert(key(hub.name()), hub)
    }

    /// Looks up a hub by name, ignoring case.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Hub> {
        self.hubs.get(&key(name))
    }

    /// Removes a hub by name, ignoring case.
    #[inline]
    pub fn remove(&mut self, name: &str) -> Option<Hub> {
        self.hubs.remove(&key(name))
    }

    /// Returns the number of hubs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    /// Returns `true` if no hub is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }

    /// Iterates over the registered hubs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Hub> {
        self.hubs.values()
    }

    /// Removes and returns every hub.
    pub fn drain(&mut self) -> Vec<Hub> {
        self.hubs.drain().map(|(_, hub)| hub).collect()
    }
}

/// Routing key for a hub name.
#[inline]
fn key(name: &str) -> String {
    name.to_lowercase()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut registry = HubRegistry::new();
        registry.insert(Hub::new("ChatHub"));

        assert!(registry.get("chathub").is_some());
        assert!(registry.get("CHATHUB").is_some());
        assert_eq!(registry.get("chathub").map(Hub::name), Some("ChatHub"));
    }

    #[test]
    fn test_insert_overwrites_same_name() {
        let mut registry = HubRegistry::new();
        assert!(registry.insert(Hub::new("chat")).is_none());

        let previous = registry.insert(Hub::new("Chat"));
        assert_eq!(previous.map(|h| h.name().to_string()), Some("chat".to_string()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("chat").map(Hub::name), Some("Chat"));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut registry = HubRegistry::new();
        registry.insert(Hub::new("a"));
        registry.insert(Hub::new("b"));

        assert!(registry.remove("A").is_some());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
