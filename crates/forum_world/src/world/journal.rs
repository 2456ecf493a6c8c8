//! Reviewed publication channel: submissions, peer reviews, decisions.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{ActorId, ContentId};
use crate::persist::{
    default_state_version, read_json_if_exists, validate_version, write_json_atomic, PersistError,
    STATE_VERSION,
};

pub const MIN_REVIEW_SCORE: u8 = 1;
pub const MAX_REVIEW_SCORE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    UnderReview,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: ActorId,
    pub score: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: ContentId,
    pub author: ActorId,
    pub title: String,
    pub abstract_text: String,
    pub created_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn mean_score(&self) -> Option<f64> {
        if self.reviews.is_empty() {
            return None;
        }
        let sum: u64 = self.reviews.iter().map(|review| review.score as u64).sum();
        Some(sum as f64 / self.reviews.len() as f64)
    }

    pub fn reviewed_by(&self, reviewer: &str) -> bool {
        self.reviews.iter().any(|review| review.reviewer == reviewer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    pub reviews_required: usize,
    pub accept_threshold: f64,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            reviews_required: 2,
            accept_threshold: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    #[error("submission not found: {id}")]
    NotFound { id: ContentId },
    #[error("author {author} cannot review own submission {id}")]
    SelfReview { id: ContentId, author: ActorId },
    #[error("{reviewer} already reviewed {id}")]
    DuplicateReview { id: ContentId, reviewer: ActorId },
    #[error("submission {id} is already decided")]
    AlreadyDecided { id: ContentId },
    #[error("review score {score} outside 1..=10")]
    InvalidScore { score: u8 },
    #[error("empty {field}")]
    Empty { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalState {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub submissions: BTreeMap<ContentId, Submission>,
    pub next_submission_id: u64,
}

impl Default for JournalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            submissions: BTreeMap::new(),
            next_submission_id: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub author: ActorId,
    /// Set when this review completed the panel.
    pub decision: Option<SubmissionStatus>,
}

#[derive(Debug, Default)]
pub struct JournalStore {
    state: RwLock<JournalState>,
    policy: ReviewPolicy,
}

impl JournalStore {
    pub fn new(policy: ReviewPolicy) -> Self {
        Self {
            state: RwLock::new(JournalState::default()),
            policy,
        }
    }

    pub fn from_state(state: JournalState, policy: ReviewPolicy) -> Self {
        Self {
            state: RwLock::new(state),
            policy,
        }
    }

    pub fn policy(&self) -> ReviewPolicy {
        self.policy
    }

    pub fn submit(
        &self,
        author: &str,
        title: &str,
        abstract_text: &str,
        now: DateTime<Utc>,
    ) -> Result<ContentId, JournalError> {
        if title.trim().is_empty() {
            return Err(JournalError::Empty { field: "title" });
        }
        if abstract_text.trim().is_empty() {
            return Err(JournalError::Empty { field: "abstract" });
        }
        let mut state = self.state.write();
        let id = format!("paper-{}", state.next_submission_id);
        state.next_submission_id += 1;
        state.submissions.insert(
            id.clone(),
            Submission {
                id: id.clone(),
                author: author.to_string(),
                title: title.trim().to_string(),
                abstract_text: abstract_text.to_string(),
                created_at: now,
                status: SubmissionStatus::UnderReview,
                reviews: Vec::new(),
                decided_at: None,
            },
        );
        Ok(id)
    }

    pub fn review(
        &self,
        reviewer: &str,
        submission_id: &str,
        score: u8,
        comment: &str,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome, JournalError> {
        if !(MIN_REVIEW_SCORE..=MAX_REVIEW_SCORE).contains(&score) {
            return Err(JournalError::InvalidScore { score });
        }
        let mut state = self.state.write();
        let submission =
            state
                .submissions
                .get_mut(submission_id)
                .ok_or_else(|| JournalError::NotFound {
                    id: submission_id.to_string(),
                })?;
        if submission.status != SubmissionStatus::UnderReview {
            return Err(JournalError::AlreadyDecided {
                id: submission_id.to_string(),
            });
        }
        if submission.author == reviewer {
            return Err(JournalError::SelfReview {
                id: submission_id.to_string(),
                author: reviewer.to_string(),
            });
        }
        if submission.reviewed_by(reviewer) {
            return Err(JournalError::DuplicateReview {
                id: submission_id.to_string(),
                reviewer: reviewer.to_string(),
            });
        }
        submission.reviews.push(Review {
            reviewer: reviewer.to_string(),
            score,
            comment: comment.to_string(),
            created_at: now,
        });

        let mut decision = None;
        if submission.reviews.len() >= self.policy.reviews_required.max(1) {
            let mean = submission.mean_score().unwrap_or(0.0);
            let status = if mean >= self.policy.accept_threshold {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::Rejected
            };
            submission.status = status;
            submission.decided_at = Some(now);
            decision = Some(status);
        }
        Ok(ReviewOutcome {
            author: submission.author.clone(),
            decision,
        })
    }

    pub fn get(&self, id: &str) -> Option<Submission> {
        self.state.read().submissions.get(id).cloned()
    }

    /// Open submissions `reviewer` may still review, oldest first.
    pub fn pending_for(&self, reviewer: &str) -> Vec<Submission> {
        let state = self.state.read();
        let mut pending: Vec<Submission> = state
            .submissions
            .values()
            .filter(|submission| submission.status == SubmissionStatus::UnderReview)
            .filter(|submission| submission.author != reviewer)
            .filter(|submission| !submission.reviewed_by(reviewer))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending
    }

    pub fn by_status(&self, status: SubmissionStatus) -> Vec<Submission> {
        self.state
            .read()
            .submissions
            .values()
            .filter(|submission| submission.status == status)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().submissions.is_empty()
    }

    pub fn snapshot(&self) -> JournalState {
        self.state.read().clone()
    }

    /// Replaces the contents wholesale.
    pub fn restore(&self, state: JournalState) {
        *self.state.write() = state;
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let state = self.state.read();
        write_json_atomic(&*state, path.as_ref())
    }

    pub fn load_json(
        path: impl AsRef<Path>,
        policy: ReviewPolicy,
    ) -> Result<Option<Self>, PersistError> {
        let Some(state) = read_json_if_exists::<JournalState>(path.as_ref())? else {
            return Ok(None);
        };
        validate_version("journal", state.version)?;
        Ok(Some(Self::from_state(state, policy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn panel_accepts_when_mean_meets_threshold() {
        let journal = JournalStore::new(ReviewPolicy::default());
        let id = journal.submit("a", "Paper", "Abstract", t0()).unwrap();

        let first = journal.review("b", &id, 7, "solid", t0()).unwrap();
        assert_eq!(first.decision, None);
        let second = journal.review("c", &id, 5, "ok", t0()).unwrap();

        assert_eq!(second.decision, Some(SubmissionStatus::Accepted));
        assert_eq!(second.author, "a");
        let paper = journal.get(&id).unwrap();
        assert_eq!(paper.status, SubmissionStatus::Accepted);
        assert_eq!(paper.decided_at, Some(t0()));
    }

    #[test]
    fn panel_rejects_below_threshold() {
        let journal = JournalStore::new(ReviewPolicy {
            reviews_required: 1,
            accept_threshold: 6.0,
        });
        let id = journal.submit("a", "Paper", "Abstract", t0()).unwrap();
        let outcome = journal.review("b", &id, 3, "weak", t0()).unwrap();
        assert_eq!(outcome.decision, Some(SubmissionStatus::Rejected));

        let err = journal
            .review("c", &id, 9, "late", t0())
            .expect_err("decided");
        assert!(matches!(err, JournalError::AlreadyDecided { .. }));
    }

    #[test]
    fn authors_and_repeat_reviewers_are_refused() {
        let journal = JournalStore::new(ReviewPolicy::default());
        let id = journal.submit("a", "Paper", "Abstract", t0()).unwrap();

        assert!(matches!(
            journal.review("a", &id, 9, "mine", t0()),
            Err(JournalError::SelfReview { .. })
        ));
        journal.review("b", &id, 6, "fine", t0()).unwrap();
        assert!(matches!(
            journal.review("b", &id, 6, "again", t0()),
            Err(JournalError::DuplicateReview { .. })
        ));
        assert!(matches!(
            journal.review("c", &id, 0, "zero", t0()),
            Err(JournalError::InvalidScore { score: 0 })
        ));
    }

    #[test]
    fn pending_for_skips_own_and_reviewed_papers() {
        let journal = JournalStore::new(ReviewPolicy {
            reviews_required: 3,
            accept_threshold: 6.0,
        });
        let own = journal.submit("b", "Own", "Abstract", t0()).unwrap();
        let other = journal.submit("a", "Other", "Abstract", t0()).unwrap();
        let reviewed = journal.submit("c", "Reviewed", "Abstract", t0()).unwrap();
        journal.review("b", &reviewed, 5, "meh", t0()).unwrap();

        let pending: Vec<String> = journal
            .pending_for("b")
            .into_iter()
            .map(|submission| submission.id)
            .collect();
        assert_eq!(pending, vec![other]);
        assert!(journal.get(&own).is_some());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        let journal = JournalStore::new(ReviewPolicy::default());
        let id = journal.submit("a", "Paper", "Abstract", t0()).unwrap();
        journal.review("b", &id, 8, "good", t0()).unwrap();

        journal.save_json(&path).unwrap();
        let loaded = JournalStore::load_json(&path, ReviewPolicy::default())
            .unwrap()
            .expect("present");
        assert_eq!(loaded.snapshot(), journal.snapshot());
    }
}
