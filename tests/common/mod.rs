#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hook_state::db::container::PersistentContainer;
use hook_state::db::StoreOptions;
use hook_state::identity::{AuthorityError, CredentialState, IdentityAuthority};
use hook_state::secure_store::{
    ItemAttributes, ItemClass, MemorySecureStore, SecureItem, SecureStore, SecureStoreError,
};
use tokio::sync::{Notify, broadcast};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn container() -> Arc<PersistentContainer> {
    Arc::new(
        PersistentContainer::open(&StoreOptions::in_memory())
            .await
            .expect("in-memory store should open"),
    )
}

/// Next broadcast value, failing the test if none arrives in time.
pub async fn next<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, receiver.recv())
        .await
        .expect("timed out waiting for broadcast")
        .expect("broadcast channel closed")
}

/// Authority answering from a script and counting its calls.
#[derive(Default)]
pub struct ScriptedAuthority {
    answers: Mutex<VecDeque<Result<CredentialState, String>>>,
    calls: AtomicUsize,
}

impl ScriptedAuthority {
    pub fn answering(answers: impl IntoIterator<Item = Result<CredentialState, String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityAuthority for ScriptedAuthority {
    async fn credential_state(&self, _user_id: &str) -> Result<CredentialState, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(Ok(CredentialState::Authorized));
        answer.map_err(AuthorityError::Unavailable)
    }
}

/// Authority that signals when it is asked and answers only once released.
pub struct GatedAuthority {
    answer: CredentialState,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedAuthority {
    pub fn answering(answer: CredentialState) -> Self {
        Self {
            answer,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl IdentityAuthority for GatedAuthority {
    async fn credential_state(&self, _user_id: &str) -> Result<CredentialState, AuthorityError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.answer)
    }
}

/// Secure store whose individual operations can be made to fail. `fail_add`
/// refuses only the next add; the other flags stay set until cleared.
#[derive(Default)]
pub struct FlakySecureStore {
    pub inner: MemorySecureStore,
    pub fail_add: AtomicBool,
    pub fail_search: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl SecureStore for FlakySecureStore {
    fn add_item(
        &self,
        secret: &str,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        if self.fail_add.swap(false, Ordering::SeqCst) {
            return Err(SecureStoreError::Unavailable("add refused".to_string()));
        }
        self.inner.add_item(secret, class, attributes)
    }

    fn search_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<Option<SecureItem>, SecureStoreError> {
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(SecureStoreError::Unavailable("search refused".to_string()));
        }
        self.inner.search_item(class, attributes)
    }

    fn delete_item(
        &self,
        class: ItemClass,
        attributes: &ItemAttributes,
    ) -> Result<(), SecureStoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(SecureStoreError::Unavailable("delete refused".to_string()));
        }
        self.inner.delete_item(class, attributes)
    }
}
