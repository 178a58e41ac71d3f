//! SeaORM entities for the on-device store.

pub mod bookmark;
pub mod bookmark_tag;
pub mod tag_storage;

pub mod prelude {
    pub use super::bookmark::ActiveModel as BookmarkActiveModel;
    pub use super::bookmark::Column as BookmarkColumn;
    pub use super::bookmark::Entity as Bookmark;
    pub use super::bookmark::Model as BookmarkModel;

    pub use super::bookmark_tag::ActiveModel as BookmarkTagActiveModel;
    pub use super::bookmark_tag::Column as BookmarkTagColumn;
    pub use super::bookmark_tag::Entity as BookmarkTag;
    pub use super::bookmark_tag::Model as BookmarkTagModel;

    pub use super::tag_storage::ActiveModel as TagStorageActiveModel;
    pub use super::tag_storage::Column as TagStorageColumn;
    pub use super::tag_storage::Entity as TagStorage;
    pub use super::tag_storage::Model as TagStorageModel;
}
