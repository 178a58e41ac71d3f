pub mod container;
pub mod entities;
pub mod services;

use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use self::container::{PersistentContainer, StoreError};
use self::entities::{bookmark, bookmark_tag, tag_storage};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// How to reach the on-device store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreOptions {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 4,
        }
    }

    /// A private store that disappears with the process.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// Connects, creates missing tables, and wraps the connection in a
/// [`PersistentContainer`].
pub async fn open(options: &StoreOptions) -> Result<PersistentContainer, StoreError> {
    let mut opt = ConnectOptions::new(options.database_url.to_owned());
    if options.is_in_memory() {
        // Every pooled connection to `:memory:` would be a separate database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(options.max_connections.max(1));
    }
    opt.connect_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_tables(&db).await?;
    info!(url = %options.database_url, "Store opened.");
    Ok(PersistentContainer::new(db))
}

/// Creates any table that does not exist yet, derived from the entities.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = [
        schema.create_table_from_entity(tag_storage::Entity),
        schema.create_table_from_entity(bookmark::Entity),
        schema.create_table_from_entity(bookmark_tag::Entity),
    ];
    for statement in statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{StoreOptions, open};
    use crate::db::container::PersistentContainer;

    pub async fn memory_container() -> PersistentContainer {
        open(&StoreOptions::in_memory())
            .await
            .expect("in-memory store should open")
    }
}
