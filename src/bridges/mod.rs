pub mod bookmark_list;

pub use bookmark_list::{BookmarkListBridge, BookmarkViewData, BridgeError, RowChange};
