use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::index::{list_shard_files, rebuild_index, FeedIndex, INDEX_FILE_NAME};
use super::record::TurnRecord;
use super::FeedError;
use crate::persist::{read_json_if_exists, validate_version};

/// Read-only replay of a feed directory in shard order.
#[derive(Debug, Clone)]
pub struct FeedReader {
    dir: PathBuf,
    index: FeedIndex,
}

impl FeedReader {
    /// Loads the index, or derives one from the shard listing without
    /// writing it back.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FeedError> {
        let dir = dir.into();
        let index = match read_json_if_exists::<FeedIndex>(&dir.join(INDEX_FILE_NAME))? {
            Some(index) => {
                validate_version("feed index", index.version)?;
                index
            }
            None => rebuild_index(&list_shard_files(&dir)?),
        };
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &FeedIndex {
        &self.index
    }

    /// Non-empty raw lines of every indexed shard.
    pub fn lines(&self) -> Result<Vec<String>, FeedError> {
        let mut lines = Vec::with_capacity(self.index.total as usize);
        for shard in &self.index.shards {
            let path = self.dir.join(&shard.file_name);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(FeedError::io(&path, err)),
            };
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|err| FeedError::io(&path, err))?;
                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            }
        }
        Ok(lines)
    }

    pub fn records(&self) -> Result<Vec<TurnRecord>, FeedError> {
        self.lines()?
            .iter()
            .enumerate()
            .map(|(line_no, line)| {
                serde_json::from_str(line).map_err(|err| FeedError::Serde {
                    path: self.dir.display().to_string(),
                    message: format!("record {}: {err}", line_no + 1),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::record::sample_record;
    use crate::feed::FeedWriter;

    #[test]
    fn replays_records_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FeedWriter::open(dir.path(), 3, false).unwrap();
        for tick in 0..7 {
            writer.append(&sample_record(tick, "a")).unwrap();
        }
        writer.close().unwrap();

        let reader = FeedReader::open(dir.path()).unwrap();
        let records = reader.records().unwrap();
        assert_eq!(records.len() as u64, reader.index().total);
        let ticks: Vec<u64> = records.iter().map(|record| record.tick).collect();
        assert_eq!(ticks, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn empty_directory_replays_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FeedReader::open(dir.path()).unwrap();
        assert!(reader.records().unwrap().is_empty());
    }
}
