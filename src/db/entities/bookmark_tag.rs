use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Join record between a bookmark and a tag. Tags are referenced by name
/// because the tag list itself lives in a single `tag_storages` row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookmark_tags")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub bookmark_id: i32,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bookmark::Entity",
        from = "Column::BookmarkId",
        to = "super::bookmark::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    Bookmark,
}

impl Related<super::bookmark::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookmark.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
