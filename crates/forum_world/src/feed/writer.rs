use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::index::{
    count_lines, list_shard_files, parse_shard_file_name, rebuild_index, FeedIndex, ShardEntry,
    INDEX_FILE_NAME,
};
use super::record::TurnRecord;
use super::FeedError;
use crate::persist::{read_json_if_exists, validate_version, write_json_atomic};

/// Append-only writer over a directory of feed shards.
///
/// Every append rewrites `feed_index.json` atomically, so a crash loses at
/// most the line being written and the index never claims more than the
/// shards hold.
#[derive(Debug)]
pub struct FeedWriter {
    dir: PathBuf,
    max_events_per_shard: u64,
    inner: Mutex<WriterInner>,
}

#[derive(Debug)]
struct WriterInner {
    index: FeedIndex,
    file: Option<File>,
    closed: bool,
}

impl FeedWriter {
    pub fn open(
        dir: impl Into<PathBuf>,
        max_events_per_shard: u64,
        resume: bool,
    ) -> Result<Self, FeedError> {
        let dir = dir.into();
        if max_events_per_shard == 0 {
            return Err(FeedError::InvalidShardSize);
        }
        fs::create_dir_all(&dir).map_err(|err| FeedError::io(&dir, err))?;
        let index_path = dir.join(INDEX_FILE_NAME);

        let index = match read_json_if_exists::<FeedIndex>(&index_path)? {
            Some(mut index) => {
                if !resume {
                    return Err(FeedError::ExistingLog {
                        dir: dir.display().to_string(),
                    });
                }
                validate_version("feed index", index.version)?;
                reconcile_open_shard(&dir, &mut index)?;
                adopt_unindexed_shards(&dir, &mut index)?;
                index.recompute_total();
                index.validate()?;
                write_json_atomic(&index, &index_path)?;
                tracing::info!(
                    dir = %dir.display(),
                    shards = index.shards.len(),
                    total = index.total,
                    "resumed feed"
                );
                index
            }
            None => {
                let files = list_shard_files(&dir)?;
                if files.is_empty() {
                    FeedIndex::default()
                } else {
                    if !resume {
                        return Err(FeedError::ExistingLog {
                            dir: dir.display().to_string(),
                        });
                    }
                    let index = rebuild_index(&files);
                    write_json_atomic(&index, &index_path)?;
                    tracing::warn!(
                        dir = %dir.display(),
                        shards = index.shards.len(),
                        total = index.total,
                        "feed index missing, rebuilt from shard files"
                    );
                    index
                }
            }
        };

        Ok(Self {
            dir,
            max_events_per_shard,
            inner: Mutex::new(WriterInner {
                index,
                file: None,
                closed: false,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> FeedIndex {
        self.inner.lock().index.clone()
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().index.total
    }

    pub fn append(&self, record: &TurnRecord) -> Result<(), FeedError> {
        let line = serde_json::to_string(record).map_err(|err| FeedError::Serde {
            path: self.dir.display().to_string(),
            message: err.to_string(),
        })?;
        self.append_line(&line)
    }

    pub fn append_line(&self, line: &str) -> Result<(), FeedError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(FeedError::EmptyLine);
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.closed {
            return Err(FeedError::Closed);
        }

        let needs_rotation = inner
            .index
            .open_shard()
            .map(|shard| shard.count >= self.max_events_per_shard)
            .unwrap_or(true);
        if needs_rotation {
            let next = inner
                .index
                .open_shard()
                .map(|shard| shard.sequence + 1)
                .unwrap_or(1);
            inner.file = None;
            inner.index.shards.push(ShardEntry::new(next));
            tracing::debug!(dir = %self.dir.display(), shard = next, "opened feed shard");
        }

        let shard = inner
            .index
            .shards
            .last_mut()
            .ok_or_else(|| FeedError::InvalidIndex {
                message: "no open shard".to_string(),
            })?;
        let shard_path = self.dir.join(&shard.file_name);
        if inner.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&shard_path)
                .map_err(|err| FeedError::io(&shard_path, err))?;
            inner.file = Some(file);
        }
        if let Some(file) = inner.file.as_mut() {
            file.write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .and_then(|_| file.flush())
                .map_err(|err| FeedError::io(&shard_path, err))?;
        }

        shard.count += 1;
        inner.index.total += 1;
        write_json_atomic(&inner.index, &self.dir.join(INDEX_FILE_NAME))?;
        Ok(())
    }

    /// Flushes, persists the index and refuses further appends.
    pub fn close(&self) -> Result<(), FeedError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        if let Some(mut file) = inner.file.take() {
            file.flush().map_err(|err| FeedError::io(&self.dir, err))?;
        }
        write_json_atomic(&inner.index, &self.dir.join(INDEX_FILE_NAME))?;
        inner.closed = true;
        Ok(())
    }
}

/// Trusts the newest shard's file over its recorded count.
fn reconcile_open_shard(dir: &Path, index: &mut FeedIndex) -> Result<(), FeedError> {
    let Some(shard) = index.shards.last_mut() else {
        return Ok(());
    };
    let actual = count_lines(&dir.join(&shard.file_name))?;
    if actual != shard.count {
        tracing::warn!(
            shard = shard.sequence,
            recorded = shard.count,
            actual,
            "feed shard count disagrees with file, using file"
        );
        shard.count = actual;
    }
    Ok(())
}

/// Folds in shard files newer than the index, left behind when a crash hit
/// between a rotated shard's first write and the index rename.
fn adopt_unindexed_shards(dir: &Path, index: &mut FeedIndex) -> Result<(), FeedError> {
    let last = index.open_shard().map(|shard| shard.sequence).unwrap_or(0);
    for file in list_shard_files(dir)? {
        let Some(sequence) = parse_shard_file_name(&file.name) else {
            continue;
        };
        if sequence <= last {
            continue;
        }
        tracing::warn!(
            shard = sequence,
            count = file.line_count,
            "adopting feed shard missing from index"
        );
        index.shards.push(ShardEntry {
            count: file.line_count,
            ..ShardEntry::new(sequence)
        });
    }
    Ok(())
}
