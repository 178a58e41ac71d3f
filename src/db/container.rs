//! The persistent store facade.
//!
//! Every write goes through [`PersistentContainer::perform_background_task`]:
//! the unit of work runs on a spawned task against its own transaction,
//! units are serialized by a write gate, and the transaction commits before
//! the caller resumes. Failures are returned as [`StoreError`] and also
//! published as [`StoreFailure`] for anyone presenting errors; the caller's
//! in-memory state is never touched by the facade.
//!
//! After each commit that touched data a [`StoreChange`] is broadcast. List
//! bridges use it as their change notification.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const CHANNEL_CAPACITY: usize = 64;

/// Names the unit of work that ran, so failures can be attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchTags,
    SetUpDefaultTag,
    AddTag,
    UpdateTag,
    UpdateTags,
    RemoveTag,
    CreateBookmark,
    UpdateBookmark,
    SetBookmarkTags,
    DeleteBookmark,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FetchTags => "fetch_tags",
            Operation::SetUpDefaultTag => "set_up_default_tag",
            Operation::AddTag => "add_tag",
            Operation::UpdateTag => "update_tag",
            Operation::UpdateTags => "update_tags",
            Operation::RemoveTag => "remove_tag",
            Operation::CreateBookmark => "create_bookmark",
            Operation::UpdateBookmark => "update_bookmark",
            Operation::SetBookmarkTags => "set_bookmark_tags",
            Operation::DeleteBookmark => "delete_bookmark",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tables a unit of work can modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreEntity {
    TagStorage,
    Bookmarks,
    BookmarkTags,
}

/// Broadcast after a unit of work commits changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub operation: Operation,
    pub entities: BTreeSet<StoreEntity>,
}

impl StoreChange {
    pub fn touches(&self, entity: StoreEntity) -> bool {
        self.entities.contains(&entity)
    }
}

/// Broadcast when a unit of work fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    pub operation: Operation,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(#[from] DbErr),
    #[error("Database error during {operation}: {source}")]
    Database {
        operation: Operation,
        #[source]
        source: DbErr,
    },
    #[error("{operation} was cancelled")]
    Cancelled { operation: Operation },
    #[error("Background task for {operation} failed: {message}")]
    Task { operation: Operation, message: String },
}

impl StoreError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled { .. })
    }
}

/// Writable context handed to a unit of work.
pub struct BackgroundContext {
    txn: DatabaseTransaction,
    touched: Mutex<BTreeSet<StoreEntity>>,
}

impl BackgroundContext {
    fn new(txn: DatabaseTransaction) -> Self {
        Self {
            txn,
            touched: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn txn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Records that `entity` was modified; reported in the [`StoreChange`].
    pub fn touch(&self, entity: StoreEntity) {
        self.touched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity);
    }

    async fn commit(self) -> Result<BTreeSet<StoreEntity>, DbErr> {
        let touched = self
            .touched
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        self.txn.commit().await?;
        Ok(touched)
    }
}

#[derive(Debug)]
pub struct PersistentContainer {
    db: DatabaseConnection,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
    changes: broadcast::Sender<StoreChange>,
    failures: broadcast::Sender<StoreFailure>,
}

impl PersistentContainer {
    pub fn new(db: DatabaseConnection) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (failures, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            db,
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: CancellationToken::new(),
            changes,
            failures,
        }
    }

    /// Connects and prepares the schema. See [`crate::db::open`].
    pub async fn open(options: &crate::db::StoreOptions) -> Result<Self, StoreError> {
        crate::db::open(options).await
    }

    /// Read handle for consumers that only query.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<StoreFailure> {
        self.failures.subscribe()
    }

    /// Token for an owner whose background work should stop when the owner
    /// goes away. Cancelled with the container as well.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Abandons all in-flight and future units of work.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn perform_background_task<T, F>(
        &self,
        operation: Operation,
        work: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c BackgroundContext) -> BoxFuture<'c, Result<T, DbErr>>
            + Send
            + 'static,
    {
        self.perform_background_task_with(&self.shutdown, operation, work)
            .await
    }

    /// Runs `work` against a fresh transaction on a background task.
    ///
    /// If `owner` is cancelled first, the transaction is dropped without
    /// committing and `StoreError::Cancelled` is returned.
    pub async fn perform_background_task_with<T, F>(
        &self,
        owner: &CancellationToken,
        operation: Operation,
        work: F,
    ) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c BackgroundContext) -> BoxFuture<'c, Result<T, DbErr>>
            + Send
            + 'static,
    {
        let db = self.db.clone();
        let write_gate = Arc::clone(&self.write_gate);
        let owner = owner.clone();

        let handle = tokio::spawn(async move {
            let run = async move {
                let _serialized = write_gate.lock().await;
                let txn = db.begin().await?;
                let context = BackgroundContext::new(txn);
                let output = work(&context).await?;
                let touched = context.commit().await?;
                Ok::<_, DbErr>((output, touched))
            };
            tokio::select! {
                biased;
                _ = owner.cancelled() => None,
                outcome = run => Some(outcome),
            }
        });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let err = StoreError::Task {
                    operation,
                    message: join_error.to_string(),
                };
                self.report_failure(operation, &err);
                return Err(err);
            }
        };

        match outcome {
            Some(Ok((output, touched))) => {
                debug!(operation = %operation, touched = ?touched, "Unit of work committed.");
                if !touched.is_empty() {
                    let _ = self.changes.send(StoreChange {
                        operation,
                        entities: touched,
                    });
                }
                Ok(output)
            }
            Some(Err(source)) => {
                let err = StoreError::Database { operation, source };
                self.report_failure(operation, &err);
                Err(err)
            }
            None => {
                debug!(operation = %operation, "Unit of work abandoned by its owner.");
                Err(StoreError::Cancelled { operation })
            }
        }
    }

    fn report_failure(&self, operation: Operation, err: &StoreError) {
        error!(operation = %operation, error = %err, "Unit of work failed; changes rolled back.");
        let _ = self.failures.send(StoreFailure {
            operation,
            message: err.to_string(),
        });
    }
}
