use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::Tag;

/// One entry of the persisted tag list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
}

/// Ordered tag list stored as a JSON array in a single row.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize, FromJsonQueryResult)]
pub struct TagList(pub Vec<TagRecord>);

impl TagList {
    pub fn from_tags(tags: &[Tag]) -> Self {
        Self(
            tags.iter()
                .map(|tag| TagRecord {
                    name: tag.name.clone(),
                })
                .collect(),
        )
    }

    pub fn into_tags(self) -> Vec<Tag> {
        self.0.into_iter().map(|record| Tag::new(record.name)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tag_storages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_type = "Json")]
    pub tags: TagList,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
