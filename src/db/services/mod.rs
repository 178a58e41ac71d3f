//! Data access used by the repositories and the bookmark editing flow.
//!
//! Functions taking a [`BackgroundContext`](crate::db::container::BackgroundContext)
//! run inside a unit of work; the rest are plain reads.

pub mod bookmark_service;
pub mod tag_service;

pub use bookmark_service::*;
pub use tag_service::*;
