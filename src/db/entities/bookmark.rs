use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookmarks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub url: String,
    pub host: String,
    pub title: String,
    pub note: Option<String>,
    pub is_favorite: bool,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bookmark_tag::Entity")]
    BookmarkTag,
}

impl Related<super::bookmark_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BookmarkTag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
