//! A thread-safe in-memory storage for the currently active modification map. The map is produced
//! by the targeting engine and replaced wholesale; readers get a snapshot that is not affected by
//! later writes.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

/// A flag value resolved by the targeting engine, along with the allocation it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    /// Flag key.
    pub key: String,
    /// Value of the flag for the visitor.
    pub value: serde_json::Value,
    /// Campaign the value comes from.
    pub campaign_id: String,
    /// Variation group the value comes from.
    pub variation_group_id: String,
    /// Variation the value belongs to.
    pub variation_id: String,
    /// Whether the variation is the experiment's control.
    pub is_reference: bool,
}

/// Modifications by key.
pub type Modifications = HashMap<String, Modification>;

/// Thread-safe holder of the current [`Modifications`].
#[derive(Default)]
pub struct ModificationStore {
    modifications: RwLock<Arc<Modifications>>,
}

impl ModificationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        ModificationStore::default()
    }

    /// Currently active modifications.
    pub fn get_modifications(&self) -> Arc<Modifications> {
        // The slot only ever holds a complete Arc, so a poisoned lock still guards a valid value.
        self.modifications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace all modifications, returning the previous map.
    pub fn set_modifications(&self, modifications: Modifications) -> Arc<Modifications> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(modifications);

        let mut slot = self
            .modifications
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, new_value)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use serde_json::json;

    use super::{Modification, ModificationStore};

    #[test]
    fn can_set_modifications_from_another_thread() {
        let store = Arc::new(ModificationStore::new());
        assert!(store.get_modifications().is_empty());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_modifications(HashMap::from([(
                    "color".to_owned(),
                    Modification {
                        key: "color".to_owned(),
                        value: json!("red"),
                        campaign_id: "c1".to_owned(),
                        variation_group_id: "g1".to_owned(),
                        variation_id: "var1".to_owned(),
                        is_reference: false,
                    },
                )]));
            })
            .join();
        }

        assert_eq!(store.get_modifications()["color"].value, json!("red"));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = ModificationStore::new();
        let snapshot = store.get_modifications();

        let previous = store.set_modifications(HashMap::new());

        assert!(Arc::ptr_eq(&snapshot, &previous));
    }
}
