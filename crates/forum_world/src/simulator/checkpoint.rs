//! Checkpoint layout under `<data_dir>/state`.
//!
//! Files are written one at a time with the clock last, so a crash mid-way
//! leaves the previous `sim_state.json` in place. There is no cross-file
//! transaction.

use std::path::{Path, PathBuf};

use super::actor::ActorSnapshot;
use super::clock::SimClock;
use crate::digest::{DigestLimits, SummaryCache};
use crate::persist::PersistError;
use crate::world::{ForumStore, JournalStore, ReviewPolicy};

pub const SIM_STATE_FILE: &str = "sim_state.json";
pub const FORUM_FILE: &str = "forum.json";
pub const JOURNAL_FILE: &str = "journal.json";
pub const DIGEST_CACHE_FILE: &str = "digest_cache.json";
const ACTORS_DIR: &str = "actors";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    root: PathBuf,
}

impl CheckpointPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sim_state(&self) -> PathBuf {
        self.root.join(SIM_STATE_FILE)
    }

    pub fn forum(&self) -> PathBuf {
        self.root.join(FORUM_FILE)
    }

    pub fn journal(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    pub fn digest_cache(&self) -> PathBuf {
        self.root.join(DIGEST_CACHE_FILE)
    }

    pub fn actor(&self, actor_id: &str) -> PathBuf {
        self.root
            .join(ACTORS_DIR)
            .join(format!("{}.json", safe_file_stem(actor_id)))
    }

    pub fn exists(&self) -> bool {
        self.sim_state().exists()
    }
}

/// Keeps ids usable as a single path component. Ids that needed rewriting
/// get a blake3 suffix so they cannot collide with an id that did not.
pub(crate) fn safe_file_stem(id: &str) -> String {
    let is_safe = |ch: char| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_';
    if !id.is_empty() && id.chars().all(is_safe) {
        return id.to_string();
    }
    let stem: String = id
        .chars()
        .map(|ch| if is_safe(ch) { ch } else { '_' })
        .collect();
    let digest = blake3::hash(id.as_bytes()).to_hex().to_string();
    format!("{stem}.{}", &digest[..12])
}

pub fn write_checkpoint(
    paths: &CheckpointPaths,
    actors: &[ActorSnapshot],
    forum: &ForumStore,
    journal: &JournalStore,
    digest: &SummaryCache,
    clock: &SimClock,
) -> Result<(), PersistError> {
    for snapshot in actors {
        snapshot.save_json(paths.actor(&snapshot.persona.id))?;
    }
    forum.save_json(paths.forum())?;
    journal.save_json(paths.journal())?;
    digest.save_json(paths.digest_cache())?;
    clock.save_json(paths.sim_state())?;
    Ok(())
}

/// Whatever a checkpoint directory holds; missing files are `None`.
#[derive(Debug, Default)]
pub struct LoadedCheckpoint {
    pub clock: Option<SimClock>,
    pub forum: Option<ForumStore>,
    pub journal: Option<JournalStore>,
    pub digest: Option<SummaryCache>,
}

pub fn load_checkpoint(
    paths: &CheckpointPaths,
    policy: ReviewPolicy,
    limits: DigestLimits,
) -> Result<LoadedCheckpoint, PersistError> {
    Ok(LoadedCheckpoint {
        clock: SimClock::load_json(paths.sim_state())?,
        forum: ForumStore::load_json(paths.forum())?,
        journal: JournalStore::load_json(paths.journal(), policy)?,
        digest: SummaryCache::load_json(paths.digest_cache(), limits)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn actor_file_names_are_sanitised() {
        let paths = CheckpointPaths::new("/tmp/state");
        assert_eq!(
            paths.actor("actor-001"),
            PathBuf::from("/tmp/state/actors/actor-001.json")
        );
        let escaped = paths.actor("../evil");
        assert_eq!(escaped.parent(), Some(Path::new("/tmp/state/actors")));
        let name = escaped.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("___evil."));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn rewritten_ids_do_not_collide_with_safe_ones() {
        let paths = CheckpointPaths::new("/tmp/state");
        assert_ne!(paths.actor("a/b"), paths.actor("a_b"));
        assert_ne!(paths.actor("a/b"), paths.actor("a:b"));
        assert_eq!(paths.actor("a/b"), paths.actor("a/b"));
        assert_ne!(safe_file_stem(""), "");
    }

    #[test]
    fn write_then_load_restores_world() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CheckpointPaths::new(dir.path());
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let forum = ForumStore::new();
        forum.create_post("a", "Title", "Body", now).unwrap();
        let journal = JournalStore::new(ReviewPolicy::default());
        journal.submit("a", "Paper", "Abstract", now).unwrap();
        let digest = SummaryCache::new(DigestLimits::default());
        let clock = SimClock::new(now, 60);

        assert!(!paths.exists());
        write_checkpoint(&paths, &[], &forum, &journal, &digest, &clock).unwrap();
        assert!(paths.exists());

        let loaded =
            load_checkpoint(&paths, ReviewPolicy::default(), DigestLimits::default()).unwrap();
        assert_eq!(loaded.clock, Some(clock));
        assert_eq!(loaded.forum.unwrap().snapshot(), forum.snapshot());
        assert_eq!(loaded.journal.unwrap().snapshot(), journal.snapshot());
        assert!(loaded.digest.unwrap().is_empty());
    }
}
