//! Reactive tag, bookmark and login state for the hook bookmark manager.
//!
//! Repositories own canonical values and publish them on [`stream`]s;
//! persistence goes through the [`db::container::PersistentContainer`]
//! facade, and list [`bridges`] follow the store directly.

pub mod bridges;
pub mod config;
pub mod db;
pub mod encryption;
pub mod identity;
pub mod models;
pub mod repositories;
pub mod secure_store;
pub mod stream;
