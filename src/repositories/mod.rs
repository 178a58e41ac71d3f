//! Sole writers of the canonical streams.

pub mod credential_repository;
pub mod tag_repository;

pub use credential_repository::{CredentialError, CredentialEvent, CredentialRepository};
pub use tag_repository::{TagError, TagEvent, TagRepository};
