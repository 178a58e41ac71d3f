//! Owner of the canonical tag list.
//!
//! Every mutation runs check, persist and publish while holding one
//! mutation lock, so duplicate checks and published values never race. The
//! value published is always the list exactly as it was persisted. When a
//! unit of work fails the stream keeps its previous value and a failure
//! event names the operation.

use std::collections::HashSet;
use std::sync::Arc;

use sea_orm::DbErr;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::container::{Operation, PersistentContainer, StoreError};
use crate::db::services::{
    detach_bookmark_tags, find_tag_storage, insert_tag_storage, rename_bookmark_tags,
    save_tag_list,
};
use crate::models::Tag;
use crate::stream::{MutableStream, ReadOnlyStream};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    DidFailToFetchTags { message: String },
    DidFailToAddTag { message: String },
    DidFailToUpdateTag { message: String },
    DidFailToUpdateTags { message: String },
    DidFailToSetUpDefaultTag { message: String },
    DidFailToRemoveTag { message: String },
    ExistingTag { tag: Tag },
    DidSucceedToAddTag { tag: Tag },
    /// The tag-list row was expected but missing.
    CorruptState { operation: Operation },
}

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Tag '{0}' already exists")]
    ExistingTag(Tag),
    #[error("Tag names must not be empty")]
    EmptyName,
    #[error("Tag '{0}' is reserved")]
    ReservedTag(Tag),
    #[error("Tag '{0}' not found")]
    NotFound(Tag),
    #[error("Stored tag list is missing during {0}")]
    CorruptState(Operation),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a list edit carries over to the bookmark associations.
enum AssociationChange {
    Keep,
    Rename { from: String, to: String },
    Detach(Vec<String>),
}

enum Persisted {
    Saved(Vec<Tag>),
    Rejected(TagError),
    Missing,
}

type Edit = Box<dyn FnOnce(&[Tag]) -> Result<(Vec<Tag>, AssociationChange), TagError> + Send>;

pub struct TagRepository {
    container: Arc<PersistentContainer>,
    tags: MutableStream<Vec<Tag>>,
    events: broadcast::Sender<TagEvent>,
    mutation: Mutex<()>,
    cancel: CancellationToken,
}

impl TagRepository {
    /// Creates the repository with an empty list. Call [`fetch`](Self::fetch)
    /// to load or seed the persisted list.
    pub fn new(container: Arc<PersistentContainer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = container.child_token();
        Self {
            container,
            tags: MutableStream::new(Vec::new()),
            events,
            mutation: Mutex::new(()),
            cancel,
        }
    }

    pub fn tags_stream(&self) -> ReadOnlyStream<Vec<Tag>> {
        self.tags.read_only()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    /// Loads the persisted list and publishes it, seeding `[all]` when no
    /// list has been stored yet.
    pub async fn fetch(&self) -> Result<Vec<Tag>, TagError> {
        let _mutation = self.mutation.lock().await;
        let stored = self
            .container
            .perform_background_task_with(&self.cancel, Operation::FetchTags, |ctx| {
                Box::pin(async move {
                    let storage = find_tag_storage(ctx.txn()).await?;
                    Ok::<_, DbErr>(storage.map(|storage| storage.tags.into_tags()))
                })
            })
            .await;

        match stored {
            Ok(Some(tags)) => {
                debug!(count = tags.len(), "Fetched tags.");
                self.tags.update(tags.clone());
                Ok(tags)
            }
            Ok(None) => self.set_up_default_tag().await,
            Err(err) => Err(self.fail(Operation::FetchTags, err)),
        }
    }

    pub async fn add(&self, tag: Tag) -> Result<Vec<Tag>, TagError> {
        validate_name(&tag)?;
        let _mutation = self.mutation.lock().await;
        if self.tags.value().contains(&tag) {
            return Err(self.reject(TagError::ExistingTag(tag)));
        }
        if tag.is_all() {
            return Err(self.reject(TagError::ReservedTag(tag)));
        }

        let added = tag.clone();
        let tags = self
            .persist(
                Operation::AddTag,
                Box::new(move |current| {
                    if current.contains(&added) {
                        return Err(TagError::ExistingTag(added));
                    }
                    let mut tags = current.to_vec();
                    tags.push(added);
                    Ok((tags, AssociationChange::Keep))
                }),
            )
            .await?;

        info!(tag = %tag, "Tag added.");
        let _ = self.events.send(TagEvent::DidSucceedToAddTag { tag });
        Ok(tags)
    }

    /// Renames `tag` to `new_tag` in place. Bookmarks tagged with the old
    /// name follow the rename.
    pub async fn update(&self, tag: Tag, new_tag: Tag) -> Result<Vec<Tag>, TagError> {
        let _mutation = self.mutation.lock().await;
        let current = self.tags.value();
        if tag.name == new_tag.name {
            return Ok(current);
        }
        validate_name(&new_tag)?;
        if current.contains(&new_tag) {
            return Err(self.reject(TagError::ExistingTag(new_tag)));
        }
        if tag.is_all() || new_tag.is_all() {
            return Err(self.reject(TagError::ReservedTag(Tag::all())));
        }
        if !current.contains(&tag) {
            return Err(self.reject(TagError::NotFound(tag)));
        }

        let (from, to) = (tag.clone(), new_tag.clone());
        let tags = self
            .persist(
                Operation::UpdateTag,
                Box::new(move |current| {
                    if current.contains(&to) {
                        return Err(TagError::ExistingTag(to));
                    }
                    let Some(index) = current.iter().position(|stored| *stored == from) else {
                        return Err(TagError::NotFound(from));
                    };
                    let mut tags = current.to_vec();
                    tags[index] = to.clone();
                    let change = AssociationChange::Rename {
                        from: from.name,
                        to: to.name,
                    };
                    Ok((tags, change))
                }),
            )
            .await?;

        info!(from = %tag, to = %new_tag, "Tag renamed.");
        Ok(tags)
    }

    /// Replaces the whole list, typically to reorder it. Names must be
    /// non-empty and unique, and `all` must stay first. Tags left out are
    /// detached from their bookmarks as if removed.
    pub async fn update_all(&self, tags: Vec<Tag>) -> Result<Vec<Tag>, TagError> {
        if !tags.first().is_some_and(Tag::is_all) {
            return Err(self.reject(TagError::ReservedTag(Tag::all())));
        }
        let mut seen = HashSet::new();
        for tag in &tags {
            validate_name(tag)?;
            if !seen.insert(tag.name.as_str()) {
                return Err(self.reject(TagError::ExistingTag(tag.clone())));
            }
        }

        let _mutation = self.mutation.lock().await;
        let count = tags.len();
        let tags = self
            .persist(
                Operation::UpdateTags,
                Box::new(move |current| {
                    let dropped = current
                        .iter()
                        .filter(|stored| !tags.contains(stored))
                        .map(|stored| stored.name.clone())
                        .collect::<Vec<_>>();
                    let change = if dropped.is_empty() {
                        AssociationChange::Keep
                    } else {
                        AssociationChange::Detach(dropped)
                    };
                    Ok((tags, change))
                }),
            )
            .await?;

        info!(count, "Tag list replaced.");
        Ok(tags)
    }

    /// Removes `tag` from the list and detaches it from every bookmark.
    pub async fn remove(&self, tag: Tag) -> Result<Vec<Tag>, TagError> {
        if tag.is_all() {
            return Err(self.reject(TagError::ReservedTag(tag)));
        }
        let _mutation = self.mutation.lock().await;
        if !self.tags.value().contains(&tag) {
            return Err(self.reject(TagError::NotFound(tag)));
        }

        let removed = tag.clone();
        let tags = self
            .persist(
                Operation::RemoveTag,
                Box::new(move |current| {
                    if !current.contains(&removed) {
                        return Err(TagError::NotFound(removed));
                    }
                    let tags = current
                        .iter()
                        .filter(|stored| **stored != removed)
                        .cloned()
                        .collect();
                    Ok((tags, AssociationChange::Detach(vec![removed.name])))
                }),
            )
            .await?;

        info!(tag = %tag, "Tag removed.");
        Ok(tags)
    }

    async fn set_up_default_tag(&self) -> Result<Vec<Tag>, TagError> {
        let seeded = self
            .container
            .perform_background_task_with(&self.cancel, Operation::SetUpDefaultTag, |ctx| {
                Box::pin(async move {
                    // Another writer may have seeded in the meantime.
                    if let Some(storage) = find_tag_storage(ctx.txn()).await? {
                        return Ok::<_, DbErr>(storage.tags.into_tags());
                    }
                    insert_tag_storage(ctx, &[Tag::all()]).await
                })
            })
            .await;

        match seeded {
            Ok(tags) => {
                info!("Seeded default tag list.");
                self.tags.update(tags.clone());
                Ok(tags)
            }
            Err(err) => Err(self.fail(Operation::SetUpDefaultTag, err)),
        }
    }

    /// Applies `edit` to the stored list in one unit of work and publishes the
    /// saved result. Must be called with the mutation lock held.
    async fn persist(&self, operation: Operation, edit: Edit) -> Result<Vec<Tag>, TagError> {
        let persisted = self
            .container
            .perform_background_task_with(&self.cancel, operation, move |ctx| {
                Box::pin(async move {
                    let Some(storage) = find_tag_storage(ctx.txn()).await? else {
                        return Ok::<_, DbErr>(Persisted::Missing);
                    };
                    let current = storage.tags.clone().into_tags();
                    let (tags, associations) = match edit(&current) {
                        Ok(edited) => edited,
                        Err(rejection) => return Ok(Persisted::Rejected(rejection)),
                    };
                    match associations {
                        AssociationChange::Keep => {}
                        AssociationChange::Rename { from, to } => {
                            rename_bookmark_tags(ctx, &from, &to).await?;
                        }
                        AssociationChange::Detach(names) => {
                            for name in &names {
                                detach_bookmark_tags(ctx, name).await?;
                            }
                        }
                    }
                    let saved = save_tag_list(ctx, storage, &tags).await?;
                    Ok(Persisted::Saved(saved))
                })
            })
            .await;

        match persisted {
            Ok(Persisted::Saved(tags)) => {
                self.tags.update(tags.clone());
                Ok(tags)
            }
            Ok(Persisted::Rejected(rejection)) => Err(self.reject(rejection)),
            Ok(Persisted::Missing) => {
                error!(operation = %operation, "Tag list record is missing; state left unchanged.");
                let _ = self.events.send(TagEvent::CorruptState { operation });
                Err(TagError::CorruptState(operation))
            }
            Err(err) => Err(self.fail(operation, err)),
        }
    }

    fn reject(&self, rejection: TagError) -> TagError {
        warn!(error = %rejection, "Tag change rejected.");
        if let TagError::ExistingTag(tag) = &rejection {
            let _ = self.events.send(TagEvent::ExistingTag { tag: tag.clone() });
        }
        rejection
    }

    fn fail(&self, operation: Operation, err: StoreError) -> TagError {
        if err.is_cancelled() {
            debug!(operation = %operation, "Tag operation abandoned.");
            return TagError::Store(err);
        }
        let message = err.to_string();
        let event = match operation {
            Operation::FetchTags => TagEvent::DidFailToFetchTags { message },
            Operation::AddTag => TagEvent::DidFailToAddTag { message },
            Operation::UpdateTag => TagEvent::DidFailToUpdateTag { message },
            Operation::UpdateTags => TagEvent::DidFailToUpdateTags { message },
            Operation::SetUpDefaultTag => TagEvent::DidFailToSetUpDefaultTag { message },
            Operation::RemoveTag => TagEvent::DidFailToRemoveTag { message },
            other => {
                error!(operation = %other, "Unexpected operation reported by tag repository.");
                return TagError::Store(err);
            }
        };
        let _ = self.events.send(event);
        TagError::Store(err)
    }
}

impl Drop for TagRepository {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn validate_name(tag: &Tag) -> Result<(), TagError> {
    if tag.name.trim().is_empty() {
        return Err(TagError::EmptyName);
    }
    Ok(())
}
