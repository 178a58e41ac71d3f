//! Live, read-only bookmark list for one tag.
//!
//! The bridge subscribes to the container's [`StoreChange`] broadcast before
//! its first query, so no commit can slip between the initial load and the
//! watcher. Each relevant change triggers a re-query; the difference to the
//! previous rows is published as one batch of [`RowChange`]s.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::db::container::{PersistentContainer, StoreChange, StoreEntity};
use crate::db::services::bookmarks_for_tag;
use crate::models::{Bookmark, Tag};
use crate::stream::{MutableStream, ReadOnlyStream};

const CHANGE_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to query bookmarks: {0}")]
    Query(#[from] DbErr),
}

/// What a list row shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookmarkViewData {
    pub id: i32,
    pub title: String,
    pub url: String,
    pub host: String,
    pub note: Option<String>,
    pub is_favorite: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Bookmark> for BookmarkViewData {
    fn from(bookmark: Bookmark) -> Self {
        Self {
            id: bookmark.id,
            title: bookmark.title,
            url: bookmark.url,
            host: bookmark.host,
            note: bookmark.note,
            is_favorite: bookmark.is_favorite,
            tags: bookmark.tags.into_iter().map(|tag| tag.name).collect(),
            created_at: bookmark.created_at,
        }
    }
}

/// One structural change between two row snapshots.
///
/// `Delete` and `Move::from` index the previous rows; `Insert`, `Update` and
/// `Move::to` index the new rows. A moved row is re-read at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Insert { index: usize },
    Delete { index: usize },
    Move { from: usize, to: usize },
    Update { index: usize },
}

pub struct BookmarkListBridge {
    tag: Tag,
    rows: Arc<MutableStream<Vec<BookmarkViewData>>>,
    changes: broadcast::Sender<Vec<RowChange>>,
    cancel: CancellationToken,
}

impl BookmarkListBridge {
    /// Loads the rows for `tag` and starts following store changes.
    pub async fn new(container: Arc<PersistentContainer>, tag: Tag) -> Result<Self, BridgeError> {
        let store_changes = container.subscribe_changes();
        let initial = load_rows(&container, &tag).await?;
        debug!(tag = %tag, rows = initial.len(), "Bookmark list loaded.");

        let rows = Arc::new(MutableStream::new(initial));
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let cancel = container.child_token();

        tokio::spawn(watch(
            container,
            tag.clone(),
            store_changes,
            Arc::clone(&rows),
            changes.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            tag,
            rows,
            changes,
            cancel,
        })
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn number_of_rows(&self) -> usize {
        self.rows.value().len()
    }

    pub fn row(&self, index: usize) -> Option<BookmarkViewData> {
        self.rows.value().get(index).cloned()
    }

    pub fn rows(&self) -> ReadOnlyStream<Vec<BookmarkViewData>> {
        self.rows.read_only()
    }

    /// Batches of row changes, one per store change that altered the list.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Vec<RowChange>> {
        self.changes.subscribe()
    }
}

impl Drop for BookmarkListBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn load_rows(
    container: &PersistentContainer,
    tag: &Tag,
) -> Result<Vec<BookmarkViewData>, DbErr> {
    let bookmarks = bookmarks_for_tag(container.connection(), tag).await?;
    Ok(bookmarks.into_iter().map(BookmarkViewData::from).collect())
}

fn is_relevant(change: &StoreChange) -> bool {
    change.touches(StoreEntity::Bookmarks) || change.touches(StoreEntity::BookmarkTags)
}

async fn watch(
    container: Arc<PersistentContainer>,
    tag: Tag,
    mut store_changes: broadcast::Receiver<StoreChange>,
    rows: Arc<MutableStream<Vec<BookmarkViewData>>>,
    changes: broadcast::Sender<Vec<RowChange>>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = store_changes.recv() => received,
        };
        match received {
            Ok(change) if !is_relevant(&change) => continue,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(tag = %tag, skipped, "Bookmark list fell behind store changes; reloading.");
            }
            Err(RecvError::Closed) => break,
        }

        let fresh = match load_rows(&container, &tag).await {
            Ok(fresh) => fresh,
            Err(err) => {
                error!(tag = %tag, error = %err, "Failed to reload bookmark list.");
                continue;
            }
        };
        let batch = diff_rows(&rows.value(), &fresh);
        if batch.is_empty() {
            continue;
        }
        debug!(tag = %tag, changes = batch.len(), "Bookmark list changed.");
        rows.update(fresh);
        let _ = changes.send(batch);
    }
    debug!(tag = %tag, "Bookmark list watcher stopped.");
}

/// Row changes turning `old` into `new`, matched by bookmark id.
pub fn diff_rows(old: &[BookmarkViewData], new: &[BookmarkViewData]) -> Vec<RowChange> {
    let old_index: HashMap<i32, usize> = old.iter().enumerate().map(|(i, row)| (row.id, i)).collect();
    let new_ids: HashSet<i32> = new.iter().map(|row| row.id).collect();

    let mut batch: Vec<RowChange> = old
        .iter()
        .enumerate()
        .filter(|(_, row)| !new_ids.contains(&row.id))
        .map(|(index, _)| RowChange::Delete { index })
        .collect();

    // Old positions of the kept rows in new order. The longest increasing
    // run stays put; every other kept row is moved.
    let kept_from: Vec<usize> = new
        .iter()
        .filter_map(|row| old_index.get(&row.id).copied())
        .collect();
    let stationary = longest_increasing(&kept_from);
    let mut kept_position = 0;

    for (index, row) in new.iter().enumerate() {
        let Some(&from) = old_index.get(&row.id) else {
            batch.push(RowChange::Insert { index });
            continue;
        };
        let in_place = stationary.contains(&kept_position);
        kept_position += 1;
        if !in_place {
            batch.push(RowChange::Move { from, to: index });
        } else if old[from] != *row {
            batch.push(RowChange::Update { index });
        }
    }
    batch
}

/// Positions in `sequence` forming one longest strictly increasing
/// subsequence. Ties go to the run ending latest.
fn longest_increasing(sequence: &[usize]) -> HashSet<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];
    for (position, &value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&tail| sequence[tail] < value);
        previous[position] = slot.checked_sub(1).map(|before| tails[before]);
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut run = HashSet::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        run.insert(position);
        cursor = previous[position];
    }
    run
}
