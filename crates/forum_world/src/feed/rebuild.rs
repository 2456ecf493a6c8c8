use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::reader::FeedReader;
use super::record::TurnRecord;
use super::writer::FeedWriter;
use super::FeedError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub inputs: usize,
    pub records: u64,
    pub skipped: u64,
    pub shards: usize,
}

/// Merges turn logs into a fresh feed in `out_dir`.
///
/// Each input is either a flat JSONL file or an existing feed directory.
/// Records are ordered by simulated time, then real time; ties keep input
/// order. Inputs are only read.
pub fn rebuild_feed(
    inputs: &[PathBuf],
    out_dir: &Path,
    max_events_per_shard: u64,
) -> Result<RebuildReport, FeedError> {
    let mut report = RebuildReport {
        inputs: inputs.len(),
        ..RebuildReport::default()
    };
    let mut records = Vec::new();
    for input in inputs {
        let lines = read_input_lines(input)?;
        for line in lines {
            match serde_json::from_str::<TurnRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    report.skipped += 1;
                    tracing::debug!(input = %input.display(), error = %err, "skipping malformed record");
                }
            }
        }
    }
    records.sort_by_key(TurnRecord::order_key);

    let writer = FeedWriter::open(out_dir, max_events_per_shard, false)?;
    for record in &records {
        writer.append(record)?;
    }
    writer.close()?;

    let index = writer.index();
    report.records = index.total;
    report.shards = index.shards.len();
    tracing::info!(
        out_dir = %out_dir.display(),
        records = report.records,
        skipped = report.skipped,
        shards = report.shards,
        "feed rebuilt"
    );
    Ok(report)
}

fn read_input_lines(input: &Path) -> Result<Vec<String>, FeedError> {
    if input.is_dir() {
        return FeedReader::open(input)?.lines();
    }
    let file = File::open(input).map_err(|err| FeedError::io(input, err))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| FeedError::io(input, err))?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::record::sample_record;
    use chrono::Duration;
    use std::fs;

    fn write_log(path: &Path, records: &[TurnRecord], extra: &str) {
        let mut text = String::new();
        for record in records {
            text.push_str(&serde_json::to_string(record).unwrap());
            text.push('\n');
        }
        text.push_str(extra);
        fs::write(path, text).unwrap();
    }

    #[test]
    fn merges_inputs_in_simulated_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.jsonl");
        let second = dir.path().join("b.jsonl");
        write_log(&first, &[sample_record(5, "a"), sample_record(1, "a")], "");
        write_log(&second, &[sample_record(3, "b")], "not json\n");
        let out = dir.path().join("feed");

        let report = rebuild_feed(&[first.clone(), second], &out, 2).unwrap();

        assert_eq!(report.records, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.shards, 2);
        let ticks: Vec<u64> = FeedReader::open(&out)
            .unwrap()
            .records()
            .unwrap()
            .iter()
            .map(|record| record.tick)
            .collect();
        assert_eq!(ticks, vec![1, 3, 5]);
        assert!(first.exists());
    }

    #[test]
    fn equal_sim_times_order_by_real_time_then_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("log.jsonl");
        let mut late = sample_record(1, "late");
        late.real_time = late.real_time + Duration::seconds(10);
        let early = sample_record(1, "early");
        let tie = sample_record(1, "tie");
        write_log(&input, &[late, early, tie], "");
        let out = dir.path().join("out");

        rebuild_feed(&[input], &out, 10).unwrap();

        let actors: Vec<String> = FeedReader::open(&out)
            .unwrap()
            .records()
            .unwrap()
            .into_iter()
            .map(|record| record.actor_id)
            .collect();
        assert_eq!(actors, vec!["early", "tie", "late"]);
    }

    #[test]
    fn refuses_non_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("log.jsonl");
        write_log(&input, &[sample_record(1, "a")], "");
        let out = dir.path().join("out");
        rebuild_feed(&[input.clone()], &out, 10).unwrap();

        let err = rebuild_feed(&[input], &out, 10).expect_err("existing output");
        assert!(matches!(err, FeedError::ExistingLog { .. }));
    }
}
