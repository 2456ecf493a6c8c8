use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use super::FeedError;
use crate::persist::{default_state_version, STATE_VERSION};

pub const INDEX_FILE_NAME: &str = "feed_index.json";
const SHARD_PREFIX: &str = "feed-";
const SHARD_SUFFIX: &str = ".jsonl";

pub fn shard_file_name(sequence: u64) -> String {
    format!("{SHARD_PREFIX}{sequence:06}{SHARD_SUFFIX}")
}

pub fn parse_shard_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SHARD_PREFIX)?.strip_suffix(SHARD_SUFFIX)?;
    if digits.len() < 6 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub sequence: u64,
    pub file_name: String,
    pub count: u64,
}

impl ShardEntry {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            file_name: shard_file_name(sequence),
            count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedIndex {
    #[serde(default = "default_state_version")]
    pub version: u32,
    #[serde(default)]
    pub shards: Vec<ShardEntry>,
    #[serde(default)]
    pub total: u64,
}

impl Default for FeedIndex {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            shards: Vec::new(),
            total: 0,
        }
    }
}

impl FeedIndex {
    /// The shard appends go to: always the highest sequence.
    pub fn open_shard(&self) -> Option<&ShardEntry> {
        self.shards.last()
    }

    pub fn recompute_total(&mut self) {
        self.total = self.shards.iter().map(|shard| shard.count).sum();
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        for pair in self.shards.windows(2) {
            if pair[1].sequence <= pair[0].sequence {
                return Err(FeedError::InvalidIndex {
                    message: format!(
                        "shard sequence {} follows {}",
                        pair[1].sequence, pair[0].sequence
                    ),
                });
            }
        }
        let sum: u64 = self.shards.iter().map(|shard| shard.count).sum();
        if sum != self.total {
            return Err(FeedError::InvalidIndex {
                message: format!("total {} does not match shard sum {sum}", self.total),
            });
        }
        Ok(())
    }
}

/// A shard file found on disk, with its non-empty line count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFile {
    pub name: String,
    pub line_count: u64,
}

/// Rebuilds an index from a directory listing.
///
/// Names that are not shard files are ignored; duplicate sequences keep the
/// first listing entry.
pub fn rebuild_index(files: &[ShardFile]) -> FeedIndex {
    let mut shards: Vec<ShardEntry> = files
        .iter()
        .filter_map(|file| {
            parse_shard_file_name(&file.name).map(|sequence| ShardEntry {
                sequence,
                file_name: shard_file_name(sequence),
                count: file.line_count,
            })
        })
        .collect();
    shards.sort_by_key(|shard| shard.sequence);
    shards.dedup_by_key(|shard| shard.sequence);
    let mut index = FeedIndex {
        shards,
        ..FeedIndex::default()
    };
    index.recompute_total();
    index
}

/// Counts non-empty lines; a missing file counts as empty.
pub fn count_lines(path: &Path) -> Result<u64, FeedError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(FeedError::io(path, err)),
    };
    let mut count = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| FeedError::io(path, err))?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

pub fn list_shard_files(dir: &Path) -> Result<Vec<ShardFile>, FeedError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(FeedError::io(dir, err)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| FeedError::io(dir, err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if parse_shard_file_name(&name).is_none() {
            continue;
        }
        let line_count = count_lines(&entry.path())?;
        files.push(ShardFile { name, line_count });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn shard_names_are_zero_padded() {
        assert_eq!(shard_file_name(1), "feed-000001.jsonl");
        assert_eq!(parse_shard_file_name("feed-000042.jsonl"), Some(42));
        assert_eq!(parse_shard_file_name("feed-42.jsonl"), None);
        assert_eq!(parse_shard_file_name("feed_index.json"), None);
    }

    #[test]
    fn rebuild_ignores_foreign_files_and_sorts() {
        let files = vec![
            ShardFile {
                name: "feed-000002.jsonl".to_string(),
                line_count: 4,
            },
            ShardFile {
                name: "notes.txt".to_string(),
                line_count: 9,
            },
            ShardFile {
                name: "feed-000001.jsonl".to_string(),
                line_count: 200,
            },
        ];
        let index = rebuild_index(&files);
        assert_eq!(index.total, 204);
        assert_eq!(index.shards.len(), 2);
        assert_eq!(index.open_shard().map(|shard| shard.sequence), Some(2));
        index.validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_order_shards() {
        let index = FeedIndex {
            shards: vec![ShardEntry::new(2), ShardEntry::new(1)],
            ..FeedIndex::default()
        };
        assert!(matches!(
            index.validate(),
            Err(FeedError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn count_lines_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed-000001.jsonl");
        fs::write(&path, "{}\n\n{}\n   \n{}").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);
        assert_eq!(count_lines(&dir.path().join("missing")).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn rebuilt_index_total_matches_shard_sum(
            counts in proptest::collection::btree_map(1u64..500, 0u64..1_000, 0..20)
        ) {
            let files: Vec<ShardFile> = counts
                .iter()
                .map(|(sequence, count)| ShardFile {
                    name: shard_file_name(*sequence),
                    line_count: *count,
                })
                .collect();
            let index = rebuild_index(&files);
            prop_assert_eq!(index.total, counts.values().sum::<u64>());
            prop_assert_eq!(index.shards.len(), counts.len());
            prop_assert!(index.validate().is_ok());
        }
    }
}
