use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::checkpoint::safe_file_stem;
use crate::digest::truncate_chars;
use crate::feed::TurnAction;
use crate::persist::PersistError;

const SUMMARY_CHARS: usize = 280;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLogEntry {
    pub real_time: DateTime<Utc>,
    pub sim_time: DateTime<Utc>,
    pub tick: u64,
    pub action: TurnAction,
    pub summary: String,
    #[serde(default)]
    pub tool_calls: Vec<String>,
}

impl DailyLogEntry {
    pub fn new(
        real_time: DateTime<Utc>,
        sim_time: DateTime<Utc>,
        tick: u64,
        action: TurnAction,
        response: &str,
        tool_calls: Vec<String>,
    ) -> Self {
        Self {
            real_time,
            sim_time,
            tick,
            action,
            summary: truncate_chars(response.trim(), SUMMARY_CHARS).0,
            tool_calls,
        }
    }
}

/// `<root>/<actor_id>/<YYYY-MM-DD>.jsonl`, keyed by simulated date.
#[derive(Debug, Clone)]
pub struct DailyLog {
    root: PathBuf,
}

impl DailyLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, actor_id: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(safe_file_stem(actor_id))
            .join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub fn append(&self, actor_id: &str, entry: &DailyLogEntry) -> Result<(), PersistError> {
        let path = self.path_for(actor_id, entry.sim_time.date_naive());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PersistError::io(parent, err))?;
        }
        let line = serde_json::to_string(entry).map_err(|err| PersistError::serde(&path, err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| PersistError::io(&path, err))?;
        writeln!(file, "{line}").map_err(|err| PersistError::io(&path, err))?;
        Ok(())
    }

    pub fn read(&self, actor_id: &str, date: NaiveDate) -> Result<Vec<DailyLogEntry>, PersistError> {
        read_entries(&self.path_for(actor_id, date))
    }
}

fn read_entries(path: &Path) -> Result<Vec<DailyLogEntry>, PersistError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(PersistError::io(path, err)),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| PersistError::io(path, err))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).map_err(|err| PersistError::serde(path, err))?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn entries_are_split_by_simulated_day() {
        let dir = tempfile::tempdir().unwrap();
        let log = DailyLog::new(dir.path());
        let evening = Utc.with_ymd_and_hms(2030, 1, 1, 23, 30, 0).unwrap();
        let morning = evening + Duration::hours(1);

        for (tick, sim_time) in [(1, evening), (2, morning)] {
            let entry = DailyLogEntry::new(
                Utc::now(),
                sim_time,
                tick,
                TurnAction::Post,
                "posted",
                vec!["create_post".to_string()],
            );
            log.append("actor-1", &entry).unwrap();
        }

        let first = log.read("actor-1", evening.date_naive()).unwrap();
        let second = log.read("actor-1", morning.date_naive()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tick, 2);
        assert!(log
            .path_for("actor-1", morning.date_naive())
            .ends_with("actor-1/2030-01-02.jsonl"));
    }
}
