use chrono::Utc;
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};

use crate::db::container::{BackgroundContext, StoreEntity};
use crate::db::entities::tag_storage::TagList;
use crate::db::entities::{bookmark_tag, tag_storage};
use crate::models::Tag;

// --- Tag Storage Functions ---

/// The tag-list row. There is at most one; if several exist the oldest wins.
pub async fn find_tag_storage<C: ConnectionTrait>(
    db: &C,
) -> Result<Option<tag_storage::Model>, DbErr> {
    tag_storage::Entity::find()
        .order_by_asc(tag_storage::Column::Id)
        .one(db)
        .await
}

/// Creates the tag-list row holding `tags`.
pub async fn insert_tag_storage(ctx: &BackgroundContext, tags: &[Tag]) -> Result<Vec<Tag>, DbErr> {
    let saved = tag_storage::ActiveModel {
        tags: Set(TagList::from_tags(tags)),
        updated_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(ctx.txn())
    .await?;
    ctx.touch(StoreEntity::TagStorage);
    Ok(saved.tags.into_tags())
}

/// Overwrites the list held by `storage` and returns it as persisted.
pub async fn save_tag_list(
    ctx: &BackgroundContext,
    storage: tag_storage::Model,
    tags: &[Tag],
) -> Result<Vec<Tag>, DbErr> {
    let mut active_model = storage.into_active_model();
    active_model.tags = Set(TagList::from_tags(tags));
    active_model.updated_at = Set(Utc::now());
    let saved = active_model.update(ctx.txn()).await?;
    ctx.touch(StoreEntity::TagStorage);
    Ok(saved.tags.into_tags())
}

// --- Bookmark Association Functions ---

/// Points every association with tag `from` at tag `to`.
pub async fn rename_bookmark_tags(
    ctx: &BackgroundContext,
    from: &str,
    to: &str,
) -> Result<u64, DbErr> {
    let result = bookmark_tag::Entity::update_many()
        .col_expr(bookmark_tag::Column::Name, Expr::value(to.to_owned()))
        .filter(bookmark_tag::Column::Name.eq(from))
        .exec(ctx.txn())
        .await?;
    if result.rows_affected > 0 {
        ctx.touch(StoreEntity::BookmarkTags);
    }
    Ok(result.rows_affected)
}

/// Removes every association with the tag named `name`.
pub async fn detach_bookmark_tags(ctx: &BackgroundContext, name: &str) -> Result<u64, DbErr> {
    let result = bookmark_tag::Entity::delete_many()
        .filter(bookmark_tag::Column::Name.eq(name))
        .exec(ctx.txn())
        .await?;
    if result.rows_affected > 0 {
        ctx.touch(StoreEntity::BookmarkTags);
    }
    Ok(result.rows_affected)
}
