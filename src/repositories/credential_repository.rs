//! Owner of the login state.
//!
//! The credential lives only in the secure store. `verify` re-validates it
//! with the identity authority; anything short of an authorized answer
//! purges the stored item and publishes `LoggedOut`.
//!
//! `save` and `delete` bump a generation counter. A `verify` whose answer
//! arrives after either of them ran discards the answer, so a stale
//! verification never removes or overrides a newer credential.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::identity::{CredentialState, IdentityAuthority};
use crate::models::{Credential, LoginState};
use crate::secure_store::{ItemAttributes, ItemClass, SecureItem, SecureStore, SecureStoreError};
use crate::stream::{MutableStream, ReadOnlyStream};

const EVENT_CAPACITY: usize = 16;
const ITEM_CLASS: ItemClass = ItemClass::GenericPassword;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Secure store error: {0}")]
    SecureStore(#[from] SecureStoreError),
}

#[derive(Debug, Clone)]
pub enum CredentialEvent {
    ErrorDidOccur { error: Arc<CredentialError> },
}

pub struct CredentialRepository {
    secure_store: Arc<dyn SecureStore>,
    authority: Arc<dyn IdentityAuthority>,
    /// Secure-store service name the credential is filed under.
    service: String,
    login_state: MutableStream<LoginState>,
    events: broadcast::Sender<CredentialEvent>,
    /// Count of completed saves and deletes. Held while touching the secure
    /// store and publishing, never across an await.
    generation: Mutex<u64>,
}

impl CredentialRepository {
    pub fn new(
        secure_store: Arc<dyn SecureStore>,
        authority: Arc<dyn IdentityAuthority>,
        service: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            secure_store,
            authority,
            service: service.into(),
            login_state: MutableStream::new(LoginState::LoggedOut),
            events,
            generation: Mutex::new(0),
        }
    }

    pub fn login_state_stream(&self) -> ReadOnlyStream<LoginState> {
        self.login_state.read_only()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CredentialEvent> {
        self.events.subscribe()
    }

    /// Re-validates the stored credential and publishes the outcome.
    ///
    /// If a `save` or `delete` completes while the authority is being asked,
    /// the answer is dropped and the current login state is returned as is.
    pub async fn verify(&self) -> LoginState {
        let (started_at, credential) = {
            let generation = self.lock_generation();
            match self.stored_credential() {
                Ok(Some(credential)) => (*generation, credential),
                Ok(None) => {
                    debug!("No stored credential.");
                    return self.publish(LoginState::LoggedOut);
                }
                Err(err) => {
                    error!(error = %err, "Failed to read stored credential.");
                    self.purge(&ItemAttributes::service(&self.service));
                    self.report(err);
                    return self.publish(LoginState::LoggedOut);
                }
            }
        };

        let answer = self.authority.credential_state(&credential.identifier).await;

        let generation = self.lock_generation();
        if *generation != started_at {
            debug!("Credential changed during verification; answer discarded.");
            return self.login_state.value();
        }
        let state = match answer {
            Ok(CredentialState::Authorized) => {
                info!(name = %credential.name, "Stored credential is authorized.");
                LoginState::LoggedIn { credential }
            }
            Ok(state) => {
                info!(state = ?state, "Stored credential is no longer valid.");
                self.purge(&self.attributes_for(&credential));
                LoginState::LoggedOut
            }
            Err(err) => {
                warn!(error = %err, "Could not validate stored credential.");
                self.purge(&self.attributes_for(&credential));
                LoginState::LoggedOut
            }
        };
        self.publish(state)
    }

    /// Replaces any stored credential with `credential` and publishes
    /// `LoggedIn`. On failure the previous item is put back and the login
    /// state is left as it was.
    pub fn save(&self, credential: Credential) -> Result<(), CredentialError> {
        let mut generation = self.lock_generation();
        let service = ItemAttributes::service(&self.service);
        let previous = self.secure_store.search_item(ITEM_CLASS, &service)?;
        self.remove(&service)?;

        let attributes = self.attributes_for(&credential);
        if let Err(err) = self
            .secure_store
            .add_item(&credential.identifier, ITEM_CLASS, &attributes)
        {
            if let Some(previous) = previous {
                self.restore(previous);
            }
            return Err(err.into());
        }

        *generation += 1;
        info!(name = %credential.name, "Credential saved.");
        self.login_state.update(LoginState::LoggedIn { credential });
        Ok(())
    }

    /// Forgets the credential and publishes `LoggedOut`. Secure-store
    /// failures are logged only.
    pub fn delete(&self) {
        let mut generation = self.lock_generation();
        if let Err(err) = self.remove(&ItemAttributes::service(&self.service)) {
            warn!(error = %err, "Failed to delete stored credential.");
        }
        *generation += 1;
        info!("Logged out.");
        self.login_state.update(LoginState::LoggedOut);
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn attributes_for(&self, credential: &Credential) -> ItemAttributes {
        ItemAttributes::service(&self.service).with_account(&credential.name)
    }

    fn publish(&self, state: LoginState) -> LoginState {
        self.login_state.update(state.clone());
        state
    }

    fn report(&self, err: SecureStoreError) {
        let _ = self.events.send(CredentialEvent::ErrorDidOccur {
            error: Arc::new(CredentialError::SecureStore(err)),
        });
    }

    fn stored_credential(&self) -> Result<Option<Credential>, SecureStoreError> {
        let item = self
            .secure_store
            .search_item(ITEM_CLASS, &ItemAttributes::service(&self.service))?;
        Ok(item.and_then(|item| {
            let name = item.attributes.account?;
            Some(Credential::new(item.secret, name))
        }))
    }

    /// Deletes matching items. Nothing to delete counts as success.
    fn remove(&self, attributes: &ItemAttributes) -> Result<(), SecureStoreError> {
        match self.secure_store.delete_item(ITEM_CLASS, attributes) {
            Ok(()) | Err(SecureStoreError::ItemNotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Removes a credential that failed verification. A failure leaves the
    /// item behind, so it is reported as an event.
    fn purge(&self, attributes: &ItemAttributes) {
        if let Err(err) = self.remove(attributes) {
            error!(error = %err, "Failed to purge stored credential.");
            self.report(err);
        }
    }

    fn restore(&self, previous: SecureItem) {
        match self
            .secure_store
            .add_item(&previous.secret, previous.class, &previous.attributes)
        {
            Ok(()) => debug!("Previous credential restored."),
            Err(err) => error!(error = %err, "Failed to restore previous credential."),
        }
    }
}
