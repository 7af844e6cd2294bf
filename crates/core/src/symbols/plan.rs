use std::collections::{BTreeMap, HashMap};

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::{ObfuscateError, ObfuscateResult};

/// A symbol: a name in one package namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct RenameKey {
    pub package: String,
    pub name: String,
}

impl RenameKey {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self { package: package.into(), name: name.into() }
    }
}

impl std::fmt::Display for RenameKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

/// Complete mapping from symbols to their new names.
///
/// Built in full before any token changes; a new name can be claimed by only
/// one key.
#[derive(Debug, Clone, Default)]
pub struct RenamePlan {
    entries: BTreeMap<RenameKey, String>,
    claimed: HashMap<String, RenameKey>,
}

impl RenamePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key -> new_name`, failing if another key already owns `new_name`.
    pub fn insert(&mut self, key: RenameKey, new_name: String) -> ObfuscateResult<()> {
        if let Some(owner) = self.claimed.get(&new_name) {
            if owner != &key {
                return Err(ObfuscateError::PlanCollision {
                    first: owner.to_string(),
                    second: key.to_string(),
                    name: new_name,
                });
            }
        }
        if let Some(previous) = self.entries.insert(key.clone(), new_name.clone()) {
            self.claimed.remove(&previous);
        }
        self.claimed.insert(new_name, key);
        Ok(())
    }

    pub fn get(&self, key: &RenameKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RenameKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(serde::Serialize)]
struct PlanEntry<'a> {
    package: &'a str,
    name: &'a str,
    new_name: &'a str,
}

impl Serialize for RenamePlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for (key, new_name) in &self.entries {
            seq.serialize_element(&PlanEntry { package: &key.package, name: &key.name, new_name })?;
        }
        seq.end()
    }
}
