//! Durable, sharded, append-only log of turn records.
//!
//! Layout of a feed directory:
//!
//! ```text
//! feed_index.json       shard list and running total
//! feed-000001.jsonl     one TurnRecord per line
//! feed-000002.jsonl     ...
//! ```

use std::path::Path;

use crate::persist::PersistError;

mod index;
mod reader;
mod rebuild;
mod record;
mod writer;

pub use index::{
    count_lines, list_shard_files, parse_shard_file_name, rebuild_index, shard_file_name,
    FeedIndex, ShardEntry, ShardFile, INDEX_FILE_NAME,
};
pub use reader::FeedReader;
pub use rebuild::{rebuild_feed, RebuildReport};
pub use record::{TokenUsage, TurnAction, TurnRecord, RECORD_TEXT_LIMIT};
pub use writer::FeedWriter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("serde error at {path}: {message}")]
    Serde { path: String, message: String },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("feed directory {dir} already holds a log; open with resume to continue it")]
    ExistingLog { dir: String },
    #[error("invalid feed index: {message}")]
    InvalidIndex { message: String },
    #[error("max events per shard must be at least 1")]
    InvalidShardSize,
    #[error("refusing to append an empty line")]
    EmptyLine,
    #[error("feed writer is closed")]
    Closed,
}

impl FeedError {
    pub(crate) fn io(path: &Path, err: impl ToString) -> Self {
        FeedError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
