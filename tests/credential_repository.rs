mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{FlakySecureStore, GatedAuthority, ScriptedAuthority};
use hook_state::identity::CredentialState;
use hook_state::models::{Credential, LoginState};
use hook_state::repositories::{CredentialError, CredentialEvent, CredentialRepository};
use hook_state::secure_store::{ItemAttributes, ItemClass, MemorySecureStore, SecureStore};
use pretty_assertions::assert_eq;

const SERVICE: &str = "app.hook";

fn stored(store: &dyn SecureStore) -> bool {
    stored_secret(store).is_some()
}

fn stored_secret(store: &dyn SecureStore) -> Option<String> {
    store
        .search_item(ItemClass::GenericPassword, &ItemAttributes::service(SERVICE))
        .expect("search")
        .map(|item| item.secret)
}

#[tokio::test]
async fn verify_without_stored_credential_is_logged_out_and_skips_the_authority() {
    let authority = Arc::new(ScriptedAuthority::default());
    let repository = CredentialRepository::new(
        Arc::new(MemorySecureStore::new()),
        authority.clone(),
        SERVICE,
    );

    let state = repository.verify().await;

    assert_eq!(state, LoginState::LoggedOut);
    assert_eq!(authority.calls(), 0);
}

#[tokio::test]
async fn verify_with_authorized_credential_logs_in() {
    let store = Arc::new(MemorySecureStore::new());
    let authority = Arc::new(ScriptedAuthority::answering([Ok(CredentialState::Authorized)]));
    let repository = CredentialRepository::new(store.clone(), authority.clone(), SERVICE);
    let credential = Credential::new("001234.abcd", "Ada");
    repository.save(credential.clone()).expect("save");

    let state = repository.verify().await;

    assert_eq!(state, LoginState::LoggedIn { credential });
    assert_eq!(authority.calls(), 1);
    assert!(stored(store.as_ref()));
}

#[tokio::test]
async fn non_authorized_answers_purge_the_credential() {
    for answer in [
        Ok(CredentialState::Revoked),
        Ok(CredentialState::NotFound),
        Ok(CredentialState::Transferred),
        Err("offline".to_string()),
    ] {
        let store = Arc::new(MemorySecureStore::new());
        let authority = Arc::new(ScriptedAuthority::answering([answer]));
        let repository = CredentialRepository::new(store.clone(), authority, SERVICE);
        repository
            .save(Credential::new("001234.abcd", "Ada"))
            .expect("save");

        let state = repository.verify().await;

        assert_eq!(state, LoginState::LoggedOut);
        assert_eq!(repository.login_state_stream().value(), LoginState::LoggedOut);
        assert!(!stored(store.as_ref()));
    }
}

#[tokio::test]
async fn unreadable_secure_store_reports_an_error_and_logs_out() {
    let store = Arc::new(FlakySecureStore::default());
    let repository = CredentialRepository::new(
        store.clone(),
        Arc::new(ScriptedAuthority::default()),
        SERVICE,
    );
    repository
        .save(Credential::new("001234.abcd", "Ada"))
        .expect("save");
    let mut events = repository.subscribe_events();
    store.fail_search.store(true, Ordering::SeqCst);

    let state = repository.verify().await;

    assert_eq!(state, LoginState::LoggedOut);
    let CredentialEvent::ErrorDidOccur { error } = events.try_recv().expect("event");
    assert!(matches!(*error, CredentialError::SecureStore(_)));
    assert!(store.inner.is_empty());
}

#[test]
fn failed_save_leaves_the_login_state_untouched() {
    let store = Arc::new(FlakySecureStore::default());
    let repository = CredentialRepository::new(
        store.clone(),
        Arc::new(ScriptedAuthority::default()),
        SERVICE,
    );
    store.fail_add.store(true, Ordering::SeqCst);

    let result = repository.save(Credential::new("001234.abcd", "Ada"));

    assert!(matches!(result, Err(CredentialError::SecureStore(_))));
    assert_eq!(repository.login_state_stream().value(), LoginState::LoggedOut);
}

#[test]
fn delete_publishes_logged_out_to_subscribers() {
    let repository = CredentialRepository::new(
        Arc::new(MemorySecureStore::new()),
        Arc::new(ScriptedAuthority::default()),
        SERVICE,
    );
    repository
        .save(Credential::new("001234.abcd", "Ada"))
        .expect("save");
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = repository
        .login_state_stream()
        .subscribe(move |state: &LoginState| sink.lock().expect("lock").push(state.is_logged_in()));

    repository.delete();

    assert_eq!(*seen.lock().expect("lock"), vec![true, false]);
}

#[test]
fn failed_save_keeps_the_previous_credential() {
    let store = Arc::new(FlakySecureStore::default());
    let repository = CredentialRepository::new(
        store.clone(),
        Arc::new(ScriptedAuthority::default()),
        SERVICE,
    );
    let previous = Credential::new("001234.abcd", "Ada");
    repository.save(previous.clone()).expect("save");
    store.fail_add.store(true, Ordering::SeqCst);

    let result = repository.save(Credential::new("005678.efgh", "Grace"));

    assert!(matches!(result, Err(CredentialError::SecureStore(_))));
    assert_eq!(
        repository.login_state_stream().value(),
        LoginState::LoggedIn {
            credential: previous
        }
    );
    assert_eq!(stored_secret(store.as_ref()).as_deref(), Some("001234.abcd"));
    assert_eq!(store.inner.len(), 1);
}

#[tokio::test]
async fn save_during_verification_wins_over_the_stale_answer() {
    for answer in [CredentialState::Revoked, CredentialState::Authorized] {
        let store = Arc::new(MemorySecureStore::new());
        let authority = Arc::new(GatedAuthority::answering(answer));
        let repository = Arc::new(CredentialRepository::new(
            store.clone(),
            authority.clone(),
            SERVICE,
        ));
        repository
            .save(Credential::new("001234.abcd", "Ada"))
            .expect("save");

        let verifying = tokio::spawn({
            let repository = Arc::clone(&repository);
            async move { repository.verify().await }
        });
        authority.entered.notified().await;
        let newer = Credential::new("005678.efgh", "Grace");
        repository.save(newer.clone()).expect("save");
        authority.release.notify_one();
        let state = verifying.await.expect("verify task");

        let expected = LoginState::LoggedIn { credential: newer };
        assert_eq!(state, expected);
        assert_eq!(repository.login_state_stream().value(), expected);
        assert_eq!(stored_secret(store.as_ref()).as_deref(), Some("005678.efgh"));
    }
}

#[tokio::test]
async fn delete_during_verification_stays_logged_out() {
    let store = Arc::new(MemorySecureStore::new());
    let authority = Arc::new(GatedAuthority::answering(CredentialState::Authorized));
    let repository = Arc::new(CredentialRepository::new(
        store.clone(),
        authority.clone(),
        SERVICE,
    ));
    repository
        .save(Credential::new("001234.abcd", "Ada"))
        .expect("save");

    let verifying = tokio::spawn({
        let repository = Arc::clone(&repository);
        async move { repository.verify().await }
    });
    authority.entered.notified().await;
    repository.delete();
    authority.release.notify_one();

    assert_eq!(verifying.await.expect("verify task"), LoginState::LoggedOut);
    assert_eq!(repository.login_state_stream().value(), LoginState::LoggedOut);
    assert!(!stored(store.as_ref()));
}

#[tokio::test]
async fn failed_purge_after_revocation_is_reported() {
    let store = Arc::new(FlakySecureStore::default());
    let repository = CredentialRepository::new(
        store.clone(),
        Arc::new(ScriptedAuthority::answering([Ok(CredentialState::Revoked)])),
        SERVICE,
    );
    repository
        .save(Credential::new("001234.abcd", "Ada"))
        .expect("save");
    let mut events = repository.subscribe_events();
    store.fail_delete.store(true, Ordering::SeqCst);

    let state = repository.verify().await;

    assert_eq!(state, LoginState::LoggedOut);
    let CredentialEvent::ErrorDidOccur { error } = events.try_recv().expect("event");
    assert!(matches!(*error, CredentialError::SecureStore(_)));
    assert!(stored(&store.inner));
}

#[test]
fn failed_delete_logs_out_without_an_event() {
    let store = Arc::new(FlakySecureStore::default());
    let repository = CredentialRepository::new(
        store.clone(),
        Arc::new(ScriptedAuthority::default()),
        SERVICE,
    );
    repository
        .save(Credential::new("001234.abcd", "Ada"))
        .expect("save");
    let mut events = repository.subscribe_events();
    store.fail_delete.store(true, Ordering::SeqCst);

    repository.delete();

    assert_eq!(repository.login_state_stream().value(), LoginState::LoggedOut);
    assert!(events.try_recv().is_err());
}
