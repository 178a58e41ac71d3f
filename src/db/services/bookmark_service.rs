use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use sea_orm::sea_query::JoinType;
use thiserror::Error;
use url::Url;

use crate::db::container::{BackgroundContext, Operation, PersistentContainer, StoreEntity, StoreError};
use crate::db::entities::{bookmark, bookmark_tag};
use crate::models::{Bookmark, Tag};

#[derive(Error, Debug)]
pub enum BookmarkError {
    #[error("Invalid bookmark URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Bookmark URL has no host: {0}")]
    MissingHost(String),
    #[error("Bookmark not found: {0}")]
    NotFound(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input for [`create_bookmark`].
#[derive(Debug, Clone, Default)]
pub struct NewBookmark {
    pub url: String,
    pub title: String,
    pub note: Option<String>,
    pub is_favorite: bool,
    pub tags: Vec<Tag>,
}

/// Field edits for [`update_bookmark`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct BookmarkChanges {
    pub title: Option<String>,
    pub note: Option<Option<String>>,
    pub is_favorite: Option<bool>,
}

// --- Bookmark Service Functions ---

/// Stores a new bookmark and its tag associations.
pub async fn create_bookmark(
    container: &PersistentContainer,
    new_bookmark: NewBookmark,
) -> Result<Bookmark, BookmarkError> {
    let parsed = Url::parse(&new_bookmark.url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BookmarkError::MissingHost(new_bookmark.url.clone()))?
        .to_owned();

    let bookmark = container
        .perform_background_task(Operation::CreateBookmark, move |ctx| {
            Box::pin(async move {
                let saved = bookmark::ActiveModel {
                    url: Set(parsed.to_string()),
                    host: Set(host),
                    title: Set(new_bookmark.title),
                    note: Set(new_bookmark.note),
                    is_favorite: Set(new_bookmark.is_favorite),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                }
                .insert(ctx.txn())
                .await?;
                ctx.touch(StoreEntity::Bookmarks);
                let tags = attach_tags(ctx, saved.id, &new_bookmark.tags).await?;
                Ok::<_, DbErr>(to_bookmark(saved, tags))
            })
        })
        .await?;
    Ok(bookmark)
}

pub async fn update_bookmark(
    container: &PersistentContainer,
    bookmark_id: i32,
    changes: BookmarkChanges,
) -> Result<Bookmark, BookmarkError> {
    let updated = container
        .perform_background_task(Operation::UpdateBookmark, move |ctx| {
            Box::pin(async move {
                let Some(model) = bookmark::Entity::find_by_id(bookmark_id).one(ctx.txn()).await?
                else {
                    return Ok(None);
                };
                let mut active_model = model.into_active_model();
                if let Some(title) = changes.title {
                    active_model.title = Set(title);
                }
                if let Some(note) = changes.note {
                    active_model.note = Set(note);
                }
                if let Some(is_favorite) = changes.is_favorite {
                    active_model.is_favorite = Set(is_favorite);
                }
                let saved = active_model.update(ctx.txn()).await?;
                ctx.touch(StoreEntity::Bookmarks);
                let tags = tags_for_bookmark(ctx.txn(), saved.id).await?;
                Ok::<_, DbErr>(Some(to_bookmark(saved, tags)))
            })
        })
        .await?;
    updated.ok_or(BookmarkError::NotFound(bookmark_id))
}

/// Replaces the tag associations of a bookmark.
pub async fn set_bookmark_tags(
    container: &PersistentContainer,
    bookmark_id: i32,
    tags: Vec<Tag>,
) -> Result<Bookmark, BookmarkError> {
    let updated = container
        .perform_background_task(Operation::SetBookmarkTags, move |ctx| {
            Box::pin(async move {
                let Some(model) = bookmark::Entity::find_by_id(bookmark_id).one(ctx.txn()).await?
                else {
                    return Ok(None);
                };
                bookmark_tag::Entity::delete_many()
                    .filter(bookmark_tag::Column::BookmarkId.eq(bookmark_id))
                    .exec(ctx.txn())
                    .await?;
                ctx.touch(StoreEntity::BookmarkTags);
                let tags = attach_tags(ctx, bookmark_id, &tags).await?;
                Ok::<_, DbErr>(Some(to_bookmark(model, tags)))
            })
        })
        .await?;
    updated.ok_or(BookmarkError::NotFound(bookmark_id))
}

pub async fn delete_bookmark(
    container: &PersistentContainer,
    bookmark_id: i32,
) -> Result<(), BookmarkError> {
    let deleted = container
        .perform_background_task(Operation::DeleteBookmark, move |ctx| {
            Box::pin(async move {
                bookmark_tag::Entity::delete_many()
                    .filter(bookmark_tag::Column::BookmarkId.eq(bookmark_id))
                    .exec(ctx.txn())
                    .await?;
                let result = bookmark::Entity::delete_by_id(bookmark_id)
                    .exec(ctx.txn())
                    .await?;
                if result.rows_affected > 0 {
                    ctx.touch(StoreEntity::Bookmarks);
                    ctx.touch(StoreEntity::BookmarkTags);
                }
                Ok::<_, DbErr>(result.rows_affected)
            })
        })
        .await?;
    if deleted == 0 {
        return Err(BookmarkError::NotFound(bookmark_id));
    }
    Ok(())
}

/// Bookmarks visible under `tag`, newest first. The `all` tag selects every
/// bookmark.
pub async fn bookmarks_for_tag<C: ConnectionTrait>(
    db: &C,
    tag: &Tag,
) -> Result<Vec<Bookmark>, DbErr> {
    let mut query = bookmark::Entity::find();
    if !tag.is_all() {
        query = query
            .join(JoinType::InnerJoin, bookmark::Relation::BookmarkTag.def())
            .filter(bookmark_tag::Column::Name.eq(tag.name.as_str()))
            .distinct();
    }
    let models = query
        .order_by_desc(bookmark::Column::CreatedAt)
        .order_by_desc(bookmark::Column::Id)
        .all(db)
        .await?;

    let ids: Vec<i32> = models.iter().map(|model| model.id).collect();
    let mut tags_by_bookmark: HashMap<i32, Vec<Tag>> = HashMap::new();
    if !ids.is_empty() {
        let associations = bookmark_tag::Entity::find()
            .filter(bookmark_tag::Column::BookmarkId.is_in(ids))
            .order_by_asc(bookmark_tag::Column::Id)
            .all(db)
            .await?;
        for association in associations {
            tags_by_bookmark
                .entry(association.bookmark_id)
                .or_default()
                .push(Tag::new(association.name));
        }
    }

    Ok(models
        .into_iter()
        .map(|model| {
            let tags = tags_by_bookmark.remove(&model.id).unwrap_or_default();
            to_bookmark(model, tags)
        })
        .collect())
}

async fn tags_for_bookmark<C: ConnectionTrait>(db: &C, bookmark_id: i32) -> Result<Vec<Tag>, DbErr> {
    let associations = bookmark_tag::Entity::find()
        .filter(bookmark_tag::Column::BookmarkId.eq(bookmark_id))
        .order_by_asc(bookmark_tag::Column::Id)
        .all(db)
        .await?;
    Ok(associations
        .into_iter()
        .map(|association| Tag::new(association.name))
        .collect())
}

/// Inserts one association per distinct tag. `all` is implicit and never
/// stored.
async fn attach_tags(
    ctx: &BackgroundContext,
    bookmark_id: i32,
    tags: &[Tag],
) -> Result<Vec<Tag>, DbErr> {
    let mut seen = BTreeSet::new();
    let attached: Vec<Tag> = tags
        .iter()
        .filter(|tag| !tag.is_all() && !tag.name.is_empty())
        .filter(|tag| seen.insert(tag.name.clone()))
        .cloned()
        .collect();
    if attached.is_empty() {
        return Ok(attached);
    }

    let rows = attached.iter().map(|tag| bookmark_tag::ActiveModel {
        bookmark_id: Set(bookmark_id),
        name: Set(tag.name.clone()),
        ..Default::default()
    });
    bookmark_tag::Entity::insert_many(rows).exec(ctx.txn()).await?;
    ctx.touch(StoreEntity::BookmarkTags);
    Ok(attached)
}

fn to_bookmark(model: bookmark::Model, tags: Vec<Tag>) -> Bookmark {
    Bookmark {
        id: model.id,
        url: model.url,
        host: model.host,
        title: model.title,
        note: model.note,
        is_favorite: model.is_favorite,
        created_at: model.created_at,
        tags,
    }
}
