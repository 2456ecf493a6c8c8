//! World store: the forum and the journal, each behind its own lock.

mod forum;
mod journal;

pub use forum::{
    resolve_root, ContentItem, ContentKind, ForumError, ForumState, ForumStore, ThreadView,
    VoteDirection, VoteOutcome,
};
pub use journal::{
    JournalError, JournalState, JournalStore, Review, ReviewOutcome, ReviewPolicy, Submission,
    SubmissionStatus, MAX_REVIEW_SCORE, MIN_REVIEW_SCORE,
};
