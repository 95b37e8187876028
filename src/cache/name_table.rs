//! Global trigger name table.

use std::collections::HashMap;

use crate::error::DefinitionError;
use crate::ids::ObjectHandle;

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Case-insensitive name -> trigger association; names are globally unique.
#[derive(Debug, Default)]
pub struct NameTable {
    by_name: HashMap<String, ObjectHandle>,
}

impl NameTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name.
    ///
    /// # Errors
    /// `DuplicateName` if the name is already taken.
    pub fn insert(&mut self, name: &str, handle: ObjectHandle) -> Result<(), DefinitionError> {
        let key = normalize(name);
        if self.by_name.contains_key(&key) {
            return Err(DefinitionError::DuplicateName {
                name: name.trim().to_string(),
            });
        }
        self.by_name.insert(key, handle);
        Ok(())
    }

    /// Handle registered under `name`, case-insensitively.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ObjectHandle> {
        self.by_name.get(&normalize(name)).copied()
    }

    /// Whether present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(&normalize(name))
    }

    /// Remove a name, but only if it still maps to `handle`.
    pub fn remove(&mut self, name: &str, handle: ObjectHandle) -> bool {
        let key = normalize(name);
        if self.by_name.get(&key) == Some(&handle) {
            self.by_name.remove(&key);
            true
        } else {
            false
        }
    }

    /// Move `handle` from `old` to `new`.
    ///
    /// # Errors
    /// `DuplicateName` if `new` belongs to another trigger. Renaming to a
    /// different spelling of the same name is allowed.
    pub fn rename(&mut self, old: &str, new: &str, handle: ObjectHandle) -> Result<(), DefinitionError> {
        let new_key = normalize(new);
        match self.by_name.get(&new_key) {
            Some(h) if *h != handle => {
                return Err(DefinitionError::DuplicateName {
                    name: new.trim().to_string(),
                })
            }
            _ => {}
        }
        self.remove(old, handle);
        self.by_name.insert(new_key, handle);
        Ok(())
    }

    /// Every registered handle, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.by_name.values().copied()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Forget every name.
    pub fn clear(&mut self) {
        self.by_name.clear();
    }
}
