//! Storage for secrets, keyed by service and account.
//!
//! Modelled on a platform keychain: items are grouped by [`ItemClass`] and
//! looked up by attribute query. An attribute left as `None` in a query
//! matches any value.

mod encrypted_file;
mod memory;

pub use encrypted_file::EncryptedFileSecureStore;
pub use memory::MemorySecureStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encryption::EncryptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    GenericPassword,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub service: Option<String>,
    pub account: Option<String>,
}

impl ItemAttributes {
    /// Query matching every account of `service`.
    pub fn service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            account: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    fn matches(&self, stored: &ItemAttributes) -> bool {
        let field_matches = |query: &Option<String>, stored: &Option<String>| match query {
            Some(wanted) => stored.as_deref() == Some(wanted.as_str()),
            None => true,
        };
        field_matches(&self.service, &stored.service) && field_matches(&self.account, &stored.account)
    }
}

/// A stored secret together with the attributes it was saved under.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureItem {
    pub class: ItemClass,
    pub attributes: ItemAttributes,
    pub secret: String,
}

impl std::fmt::Debug for SecureItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureItem")
            .field("class", &self.class)
            .field("attributes", &self.attributes)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum SecureStoreError {
    #[error("An item with the same attributes already exists")]
    DuplicateItem,
    #[error("No matching item")]
    ItemNotFound,
    #[error("Secure store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Secure store contents are malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Secure store file is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error("Secure store unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous secret storage.
pub trait SecureStore: Send + Sync {
    /// Stores `secret`. Fails with [`SecureStoreError::DuplicateItem`] when an
    /// item with the same class, service and account exists.
    fn add_item(
        &self,
        secret: &str,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError>;

    /// First item matching the query, if any.
    fn search_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<Option<SecureItem>, SecureStoreError>;

    /// Deletes every matching item. Fails with
    /// [`SecureStoreError::ItemNotFound`] when nothing matched.
    fn delete_item(&self, class: ItemClass, attributes: &ItemAttributes)
    -> Result<(), SecureStoreError>;
}

/// Shared item-list semantics for stores that keep all items in one list.
pub(crate) fn add_to(
    items: &mut Vec<SecureItem>,
    secret: &str,
    class: ItemClass,
    attributes: &ItemAttributes,
) -> Result<(), SecureStoreError> {
    if items
        .iter()
        .any(|item| item.class == class && item.attributes == *attributes)
    {
        return Err(SecureStoreError::DuplicateItem);
    }
    items.push(SecureItem {
        class,
        attributes: attributes.clone(),
        secret: secret.to_owned(),
    });
    Ok(())
}

pub(crate) fn search_in(
    items: &[SecureItem],
    class: ItemClass,
    attributes: &ItemAttributes,
) -> Option<SecureItem> {
    items
        .iter()
        .find(|item| item.class == class && attributes.matches(&item.attributes))
        .cloned()
}

pub(crate) fn delete_from(
    items: &mut Vec<SecureItem>,
    class: ItemClass,
    attributes: &ItemAttributes,
) -> Result<(), SecureStoreError> {
    let before = items.len();
    items.retain(|item| !(item.class == class && attributes.matches(&item.attributes)));
    if items.len() == before {
        return Err(SecureStoreError::ItemNotFound);
    }
    Ok(())
}
