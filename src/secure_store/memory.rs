use std::sync::{Mutex, PoisonError};

use super::{
    ItemAttributes, ItemClass, SecureItem, SecureStore, SecureStoreError, add_to, delete_from,
    search_in,
};

/// Process-local secure store for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    items: Mutex<Vec<SecureItem>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecureStore for MemorySecureStore {
    fn add_item(
        &self,
        secret: &str,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        add_to(&mut items, secret, class, attributes)
    }

    fn search_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<Option<SecureItem>, SecureStoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(search_in(&items, class, attributes))
    }

    fn delete_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        delete_from(&mut items, class, attributes)
    }
}
