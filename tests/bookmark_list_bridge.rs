mod common;

use std::sync::Arc;

use hook_state::bridges::{BookmarkListBridge, RowChange};
use hook_state::db::services::{
    BookmarkChanges, NewBookmark, create_bookmark, delete_bookmark, set_bookmark_tags,
    update_bookmark,
};
use hook_state::models::{Bookmark, Tag};
use hook_state::repositories::TagRepository;
use hook_state::db::container::PersistentContainer;
use pretty_assertions::assert_eq;

async fn bookmark(container: &PersistentContainer, path: &str, tags: &[&str]) -> Bookmark {
    create_bookmark(
        container,
        NewBookmark {
            url: format!("https://example.com/{path}"),
            title: path.to_string(),
            tags: tags.iter().map(|name| Tag::new(*name)).collect(),
            ..Default::default()
        },
    )
    .await
    .expect("create bookmark")
}

fn ids(bridge: &BookmarkListBridge) -> Vec<i32> {
    (0..bridge.number_of_rows())
        .filter_map(|index| bridge.row(index))
        .map(|row| row.id)
        .collect()
}

#[tokio::test]
async fn all_lists_every_bookmark_newest_first() {
    let container = common::container().await;
    let older = bookmark(&container, "older", &["work"]).await;
    let newer = bookmark(&container, "newer", &[]).await;

    let bridge = BookmarkListBridge::new(Arc::clone(&container), Tag::all())
        .await
        .expect("bridge");

    assert_eq!(ids(&bridge), vec![newer.id, older.id]);
    let row = bridge.row(1).expect("row");
    assert_eq!(row.host, "example.com");
    assert_eq!(row.tags, vec!["work".to_string()]);
    assert!(bridge.row(2).is_none());
}

#[tokio::test]
async fn inserts_and_deletes_are_pushed_live() {
    let container = common::container().await;
    let first = bookmark(&container, "first", &["work"]).await;
    let bridge = BookmarkListBridge::new(Arc::clone(&container), Tag::new("work"))
        .await
        .expect("bridge");
    let mut changes = bridge.subscribe_changes();

    let second = bookmark(&container, "second", &["work"]).await;
    assert_eq!(
        common::next(&mut changes).await,
        vec![RowChange::Insert { index: 0 }]
    );
    assert_eq!(ids(&bridge), vec![second.id, first.id]);

    delete_bookmark(&container, first.id).await.expect("delete");
    assert_eq!(
        common::next(&mut changes).await,
        vec![RowChange::Delete { index: 1 }]
    );
    assert_eq!(ids(&bridge), vec![second.id]);
}

#[tokio::test]
async fn edits_and_retagging_are_pushed_as_updates_and_removals() {
    let container = common::container().await;
    let saved = bookmark(&container, "doc", &["work"]).await;
    let bridge = BookmarkListBridge::new(Arc::clone(&container), Tag::new("work"))
        .await
        .expect("bridge");
    let mut changes = bridge.subscribe_changes();

    update_bookmark(
        &container,
        saved.id,
        BookmarkChanges {
            title: Some("Design doc".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("update");
    assert_eq!(
        common::next(&mut changes).await,
        vec![RowChange::Update { index: 0 }]
    );
    assert_eq!(bridge.row(0).expect("row").title, "Design doc");

    set_bookmark_tags(&container, saved.id, vec![Tag::new("home")])
        .await
        .expect("retag");
    assert_eq!(
        common::next(&mut changes).await,
        vec![RowChange::Delete { index: 0 }]
    );
    assert_eq!(bridge.number_of_rows(), 0);
}

#[tokio::test]
async fn removing_a_tag_empties_its_list_without_the_repository_knowing_bridges() {
    let container = common::container().await;
    let tags = TagRepository::new(Arc::clone(&container));
    tags.fetch().await.expect("fetch");
    tags.add(Tag::new("work")).await.expect("add");
    bookmark(&container, "doc", &["work"]).await;
    let bridge = BookmarkListBridge::new(Arc::clone(&container), Tag::new("work"))
        .await
        .expect("bridge");
    let mut changes = bridge.subscribe_changes();
    assert_eq!(bridge.number_of_rows(), 1);

    tags.remove(Tag::new("work")).await.expect("remove");

    assert_eq!(
        common::next(&mut changes).await,
        vec![RowChange::Delete { index: 0 }]
    );
    assert_eq!(bridge.rows().value(), Vec::new());
}

#[tokio::test]
async fn tag_list_changes_alone_do_not_reload_bridges() {
    let container = common::container().await;
    bookmark(&container, "doc", &[]).await;
    let bridge = BookmarkListBridge::new(Arc::clone(&container), Tag::all())
        .await
        .expect("bridge");
    let mut changes = bridge.subscribe_changes();
    let tags = TagRepository::new(Arc::clone(&container));
    tags.fetch().await.expect("fetch");
    tags.add(Tag::new("work")).await.expect("add");

    let quiet = tokio::time::timeout(std::time::Duration::from_millis(200), changes.recv()).await;

    assert!(quiet.is_err());
    assert_eq!(bridge.number_of_rows(), 1);
}
