//! Registry of named, versioned machine definitions.

use crate::definition::MachineDefinition;
use crate::error::RegistryError;
use crate::instance::Instance;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Concurrent store of definitions indexed by (name, version).
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: DashMap<(String, u32), Arc<MachineDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. Returns `(checksum, created)`.
    ///
    /// Registering identical content for an existing version is a no-op;
    /// different content for it is an error.
    pub fn put(
        &self,
        name: &str,
        version: u32,
        definition_json: &Value,
    ) -> Result<(String, bool), RegistryError> {
        let definition = MachineDefinition::from_json(name, version, definition_json)?;
        self.insert(definition)
    }

    /// Registers an already parsed definition.
    pub fn insert(&self, definition: MachineDefinition) -> Result<(String, bool), RegistryError> {
        let key = (definition.name.clone(), definition.version);

        match self.definitions.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get().checksum == definition.checksum {
                    Ok((definition.checksum, false))
                } else {
                    tracing::warn!(
                        "Rejected conflicting definition for {} v{}",
                        definition.name,
                        definition.version
                    );
                    Err(RegistryError::VersionExists {
                        machine: definition.name,
                        version: definition.version,
                    })
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    "Registered machine {} v{} (checksum {})",
                    definition.name,
                    definition.version,
                    definition.checksum
                );
                let checksum = definition.checksum.clone();
                slot.insert(Arc::new(definition));
                Ok((checksum, true))
            }
        }
    }

    /// Gets a machine definition.
    pub fn get(&self, name: &str, version: u32) -> Result<Arc<MachineDefinition>, RegistryError> {
        self.definitions
            .get(&(name.to_string(), version))
            .map(|r| r.clone())
            .ok_or_else(|| RegistryError::VersionNotFound {
                machine: name.to_string(),
                version,
            })
    }

    /// Gets the highest registered version of a machine.
    pub fn latest(&self, name: &str) -> Result<Arc<MachineDefinition>, RegistryError> {
        self.definitions
            .iter()
            .filter(|entry| entry.key().0 == name)
            .max_by_key(|entry| entry.key().1)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::MachineNotFound {
                machine: name.to_string(),
            })
    }

    /// Lists all machines and their versions.
    pub fn list(&self) -> BTreeMap<String, Vec<u32>> {
        let mut result: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for entry in self.definitions.iter() {
            let (name, version) = entry.key();
            result.entry(name.clone()).or_default().push(*version);
        }
        for versions in result.values_mut() {
            versions.sort_unstable();
        }
        result
    }

    /// Creates a new instance of the given machine version.
    pub fn create_instance(&self, name: &str, version: u32) -> Result<Instance, RegistryError> {
        Ok(self.get(name, version)?.instantiate())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_definition() -> Value {
        json!({
            "states": ["draft", "review", "published"],
            "initial": "draft",
            "transitions": [
                {"from": "draft", "event": "submit", "to": "review"},
                {"from": "review", "event": "publish", "to": "published"},
                {"from": "review", "event": "reject", "to": "draft"}
            ]
        })
    }

    #[test]
    fn test_put_and_get() {
        let registry = DefinitionRegistry::new();

        let (checksum, created) = registry.put("article", 1, &sample_definition()).unwrap();
        assert!(created);
        assert!(!checksum.is_empty());

        let def = registry.get("article", 1).unwrap();
        assert_eq!(def.name, "article");
        assert_eq!(def.initial.as_str(), "draft");
    }

    #[test]
    fn test_put_idempotent() {
        let registry = DefinitionRegistry::new();

        let (checksum1, created1) = registry.put("article", 1, &sample_definition()).unwrap();
        let (checksum2, created2) = registry.put("article", 1, &sample_definition()).unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(checksum1, checksum2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_put_conflict() {
        let registry = DefinitionRegistry::new();
        registry.put("article", 1, &sample_definition()).unwrap();

        let changed = json!({
            "states": ["draft", "published"],
            "initial": "draft",
            "transitions": [{"from": "draft", "event": "publish", "to": "published"}]
        });
        let result = registry.put("article", 1, &changed);
        assert!(matches!(result, Err(RegistryError::VersionExists { .. })));

        registry.put("article", 2, &changed).unwrap();
        assert_eq!(registry.latest("article").unwrap().version, 2);
        assert_eq!(registry.list().get("article"), Some(&vec![1, 2]));
    }

    #[test]
    fn test_invalid_definition_not_stored() {
        let registry = DefinitionRegistry::new();
        let bad = json!({"states": [], "initial": "a", "transitions": []});

        let result = registry.put("broken", 1, &bad);
        assert!(matches!(result, Err(RegistryError::Definition(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_machine() {
        let registry = DefinitionRegistry::new();
        assert!(matches!(
            registry.get("article", 1),
            Err(RegistryError::VersionNotFound { .. })
        ));
        assert!(matches!(
            registry.latest("article"),
            Err(RegistryError::MachineNotFound { .. })
        ));
    }

    #[test]
    fn test_instances_share_table() {
        let registry = DefinitionRegistry::new();
        registry.put("article", 1, &sample_definition()).unwrap();

        let mut first = registry.create_instance("article", 1).unwrap();
        let second = registry.create_instance("article", 1).unwrap();
        first.transition("submit").unwrap();

        assert!(first.is("review"));
        assert!(second.is("draft"));
        assert!(Arc::ptr_eq(first.table(), second.table()));
    }
}
