use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::{
    ItemAttributes, ItemClass, SecureItem, SecureStore, SecureStoreError, add_to, delete_from,
    search_in,
};
use crate::encryption::EncryptionService;

/// Secure store persisted as one AES-256-GCM sealed JSON document.
///
/// The file holds the hex encoding of `nonce || ciphertext`. A missing file
/// is an empty store. Every change rewrites the whole file through a
/// temporary sibling and a rename.
pub struct EncryptedFileSecureStore {
    path: PathBuf,
    encryption: EncryptionService,
    io: Mutex<()>,
}

impl EncryptedFileSecureStore {
    pub fn new(path: impl Into<PathBuf>, encryption: EncryptionService) -> Self {
        Self {
            path: path.into(),
            encryption,
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<SecureItem>, SecureStoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let sealed = hex::decode(contents.trim())?;
        let plaintext = self.encryption.decrypt(&sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn store(&self, items: &[SecureItem]) -> Result<(), SecureStoreError> {
        let plaintext = serde_json::to_vec(items)?;
        let sealed = self.encryption.encrypt(&plaintext)?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, hex::encode(sealed))?;
        fs::rename(&staging, &self.path)?;
        debug!(path = ?self.path, items = items.len(), "Secure store written.");
        Ok(())
    }
}

impl SecureStore for EncryptedFileSecureStore {
    fn add_item(
        &self,
        secret: &str,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.load()?;
        add_to(&mut items, secret, class, attributes)?;
        self.store(&items)
    }

    fn search_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<Option<SecureItem>, SecureStoreError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let items = self.load()?;
        Ok(search_in(&items, class, attributes))
    }

    fn delete_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.load()?;
        delete_from(&mut items, class, attributes)?;
        self.store(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(key: u8) -> EncryptionService {
        EncryptionService::new(&[key; 32]).expect("valid key")
    }

    #[test]
    fn items_survive_reopening() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("credentials.enc");
        let attributes = ItemAttributes::service("app.hook").with_account("Ada");

        EncryptedFileSecureStore::new(&path, service(1))
            .add_item("ada.secret.identifier", ItemClass::GenericPassword, &attributes)
            .expect("add");

        let on_disk = fs::read_to_string(&path).expect("file written");
        assert!(!on_disk.contains("secret"));

        let reopened = EncryptedFileSecureStore::new(&path, service(1));
        let found = reopened
            .search_item(ItemClass::GenericPassword, &ItemAttributes::service("app.hook"))
            .expect("search")
            .expect("item should exist");
        assert_eq!(found.secret, "ada.secret.identifier");
    }

    #[test]
    fn missing_file_is_empty_and_wrong_key_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("credentials.enc");
        let store = EncryptedFileSecureStore::new(&path, service(1));
        assert!(
            store
                .search_item(ItemClass::GenericPassword, &ItemAttributes::default())
                .expect("search")
                .is_none()
        );

        store
            .add_item("secret", ItemClass::GenericPassword, &ItemAttributes::service("app.hook"))
            .expect("add");
        let wrong_key = EncryptedFileSecureStore::new(&path, service(2));
        assert!(matches!(
            wrong_key.search_item(ItemClass::GenericPassword, &ItemAttributes::default()),
            Err(SecureStoreError::Encryption(_))
        ));
    }
}
