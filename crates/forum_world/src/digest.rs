//! Thread digests: a per-thread summary cache with a deterministic
//! staleness check, so an actor can catch up on a long discussion without
//! reading it in full.
//!
//! Short threads bypass the cache entirely. Long threads are checked against
//! the cached [`ThreadSummary`] in a fixed precedence order; the first reason
//! found is reported as primary, but every matching reason is listed.

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
use crate::world::{ContentItem, ForumError, ForumStore, ThreadView};

pub const DEFAULT_MAX_NEW_COMMENTS: usize = 20;
pub const TRUNCATION_MARKER: &str = "…[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestLimits {
    /// Root content longer than this makes a thread long.
    pub long_root_chars: usize,
    /// Root plus comment volume above this makes a thread long.
    pub long_total_chars: usize,
    /// More comments than this makes a thread long.
    pub long_comment_count: usize,
    pub default_max_new_comments: usize,
    pub comment_chars: usize,
    pub parent_excerpt_chars: usize,
}

impl Default for DigestLimits {
    fn default() -> Self {
        Self {
            long_root_chars: 4_000,
            long_total_chars: 12_000,
            long_comment_count: 40,
            default_max_new_comments: DEFAULT_MAX_NEW_COMMENTS,
            comment_chars: 2_000,
            parent_excerpt_chars: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestReason {
    #[serde(rename = "missing summary")]
    MissingSummary,
    #[serde(rename = "post content changed")]
    PostContentChanged,
    #[serde(rename = "too many new comments")]
    TooManyNewComments,
    #[serde(rename = "comment too long")]
    CommentTooLong,
    #[serde(rename = "reply to oversized parent")]
    ReplyToOversizedParent,
}

impl DigestReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestReason::MissingSummary => "missing summary",
            DigestReason::PostContentChanged => "post content changed",
            DigestReason::TooManyNewComments => "too many new comments",
            DigestReason::CommentTooLong => "comment too long",
            DigestReason::ReplyToOversizedParent => "reply to oversized parent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ContentId,
    pub summary: String,
    pub root_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_comment_id: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_comment_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_comment_seq: Option<u64>,
    pub comment_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestComment {
    pub id: ContentId,
    pub author: ActorId,
    pub parent_id: ContentId,
    /// Distance from the thread root; top-level comments are 1.
    pub depth: usize,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub content: String,
    pub content_truncated: bool,
    pub parent_oversize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_excerpt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDigest {
    pub thread_id: ContentId,
    pub title: String,
    pub is_long: bool,
    /// Root content; bounded to the comment budget on long threads.
    pub root_content: String,
    pub root_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ThreadSummary>,
    pub new_comments: Vec<DigestComment>,
    pub total_new_comments: usize,
    pub needs_summary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DigestReason>,
    #[serde(default)]
    pub reasons: Vec<DigestReason>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error(transparent)]
    Forum(#[from] ForumError),
    #[error("summary text for {thread_id} is empty")]
    EmptySummary { thread_id: ContentId },
}

/// blake3 over the root title and content.
pub fn root_fingerprint(root: &ContentItem) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(root.title().unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(root.content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Cuts `text` to at most `max_chars` characters, appending the marker when
/// anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        None => (text.to_string(), false),
        Some((byte_idx, _)) => (format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER), true),
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn is_long_thread(thread: &ThreadView, limits: &DigestLimits) -> bool {
    char_len(&thread.post.content) > limits.long_root_chars
        || thread.total_chars() > limits.long_total_chars
        || thread.comments.len() > limits.long_comment_count
}

fn is_after(comment: &ContentItem, cached: &ThreadSummary) -> bool {
    match cached.last_comment_at {
        None => true,
        Some(at) => {
            let last_seq = cached.last_comment_seq.unwrap_or_default();
            (comment.created_at, comment.seq) > (at, last_seq)
        }
    }
}

/// Builds the digest for one thread against an optional cached summary.
pub fn build_digest(
    thread: &ThreadView,
    cached: Option<&ThreadSummary>,
    max_new_comments: Option<usize>,
    limits: &DigestLimits,
) -> ThreadDigest {
    let title = thread.post.title().unwrap_or_default().to_string();

    if !is_long_thread(thread, limits) {
        let new_comments = thread
            .comments
            .iter()
            .map(|comment| DigestComment {
                id: comment.id.clone(),
                author: comment.author.clone(),
                parent_id: comment.parent_id().unwrap_or_default().to_string(),
                depth: thread.depth_of(&comment.id).unwrap_or(1),
                created_at: comment.created_at,
                score: comment.score,
                content: comment.content.clone(),
                content_truncated: false,
                parent_oversize: false,
                parent_excerpt: None,
            })
            .collect::<Vec<_>>();
        return ThreadDigest {
            thread_id: thread.post.id.clone(),
            title,
            is_long: false,
            root_content: thread.post.content.clone(),
            root_truncated: false,
            summary: None,
            total_new_comments: new_comments.len(),
            new_comments,
            needs_summary: false,
            reason: None,
            reasons: Vec::new(),
            truncated: false,
        };
    }

    let cap = match max_new_comments {
        Some(0) | None => limits.default_max_new_comments.max(1),
        Some(cap) => cap,
    };
    let mut reasons = Vec::new();
    match cached {
        None => reasons.push(DigestReason::MissingSummary),
        Some(summary) => {
            if summary.root_fingerprint != root_fingerprint(&thread.post) {
                reasons.push(DigestReason::PostContentChanged);
            }
        }
    }

    let mut new: Vec<&ContentItem> = thread
        .comments
        .iter()
        .filter(|comment| cached.map(|summary| is_after(comment, summary)).unwrap_or(true))
        .collect();
    let total_new_comments = new.len();
    let mut truncated = false;
    if new.len() > cap {
        new.drain(..new.len() - cap);
        truncated = true;
        reasons.push(DigestReason::TooManyNewComments);
    }

    let mut any_too_long = false;
    let mut any_oversized_parent = false;
    let new_comments = new
        .into_iter()
        .map(|comment| {
            let (content, content_truncated) = truncate_chars(&comment.content, limits.comment_chars);
            any_too_long |= content_truncated;

            let parent_id = comment.parent_id().unwrap_or_default().to_string();
            let parent = thread.comment(&parent_id);
            let (parent_oversize, parent_excerpt) = match parent {
                Some(parent) if char_len(&parent.content) > limits.parent_excerpt_chars => {
                    let (excerpt, _) = truncate_chars(&parent.content, limits.parent_excerpt_chars);
                    (true, Some(excerpt))
                }
                _ => (false, None),
            };
            any_oversized_parent |= parent_oversize;

            DigestComment {
                id: comment.id.clone(),
                author: comment.author.clone(),
                depth: thread.depth_of(&comment.id).unwrap_or(1),
                parent_id,
                created_at: comment.created_at,
                score: comment.score,
                content,
                content_truncated,
                parent_oversize,
                parent_excerpt,
            }
        })
        .collect::<Vec<_>>();
    if any_too_long {
        reasons.push(DigestReason::CommentTooLong);
    }
    if any_oversized_parent {
        reasons.push(DigestReason::ReplyToOversizedParent);
    }

    let (root_content, root_truncated) = truncate_chars(&thread.post.content, limits.comment_chars);
    ThreadDigest {
        thread_id: thread.post.id.clone(),
        title,
        is_long: true,
        root_content,
        root_truncated,
        summary: cached.cloned(),
        new_comments,
        total_new_comments,
        needs_summary: !reasons.is_empty(),
        reason: reasons.first().copied(),
        reasons,
        truncated,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCacheState {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub entries: BTreeMap<ContentId, ThreadSummary>,
}

impl Default for SummaryCacheState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SummaryCache {
    state: RwLock<SummaryCacheState>,
    limits: DigestLimits,
}

impl SummaryCache {
    pub fn new(limits: DigestLimits) -> Self {
        Self {
            state: RwLock::new(SummaryCacheState::default()),
            limits,
        }
    }

    pub fn limits(&self) -> &DigestLimits {
        &self.limits
    }

    pub fn digest(
        &self,
        forum: &ForumStore,
        thread_id: &str,
        max_new_comments: Option<usize>,
    ) -> Result<ThreadDigest, DigestError> {
        let thread = forum.thread(thread_id)?;
        let state = self.state.read();
        Ok(build_digest(
            &thread,
            state.entries.get(thread_id),
            max_new_comments,
            &self.limits,
        ))
    }

    /// Replaces the cached summary for `thread_id` wholesale.
    pub fn save_summary(
        &self,
        forum: &ForumStore,
        thread_id: &str,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<ThreadSummary, DigestError> {
        if summary.trim().is_empty() {
            return Err(DigestError::EmptySummary {
                thread_id: thread_id.to_string(),
            });
        }
        let thread = forum.thread(thread_id)?;
        let last = thread.comments.last();
        let entry = ThreadSummary {
            thread_id: thread_id.to_string(),
            summary: summary.trim().to_string(),
            root_fingerprint: root_fingerprint(&thread.post),
            last_comment_id: last.map(|comment| comment.id.clone()),
            last_comment_at: last.map(|comment| comment.created_at),
            last_comment_seq: last.map(|comment| comment.seq),
            comment_count: thread.comments.len(),
            updated_at: now,
        };
        self.state
            .write()
            .entries
            .insert(thread_id.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, thread_id: &str) -> Option<ThreadSummary> {
        self.state.read().entries.get(thread_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn snapshot(&self) -> SummaryCacheState {
        self.state.read().clone()
    }

    /// Replaces the contents wholesale.
    pub fn restore(&self, state: SummaryCacheState) {
        *self.state.write() = state;
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let state = self.state.read();
        write_json_atomic(&*state, path.as_ref())
    }

    pub fn load_json(
        path: impl AsRef<Path>,
        limits: DigestLimits,
    ) -> Result<Option<Self>, PersistError> {
        let Some(state) = read_json_if_exists::<SummaryCacheState>(path.as_ref())? else {
            return Ok(None);
        };
        validate_version("digest cache", state.version)?;
        Ok(Some(Self {
            state: RwLock::new(state),
            limits,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    fn long_thread(forum: &ForumStore) -> String {
        let body = "x".repeat(DigestLimits::default().long_root_chars + 100);
        forum.create_post("author", "Long", &body, t0()).unwrap()
    }

    #[test]
    fn short_thread_bypasses_cache() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = forum.create_post("a", "Short", "tiny", t0()).unwrap();
        forum.create_comment("b", &post, "reply", t0()).unwrap();

        let digest = cache.digest(&forum, &post, None).unwrap();

        assert!(!digest.is_long);
        assert!(!digest.needs_summary);
        assert_eq!(digest.root_content, "tiny");
        assert_eq!(digest.new_comments.len(), 1);
        assert!(digest.reason.is_none());
    }

    #[test]
    fn long_thread_without_summary_needs_one() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);

        let digest = cache.digest(&forum, &post, None).unwrap();

        assert!(digest.is_long);
        assert!(digest.needs_summary);
        assert_eq!(digest.reason, Some(DigestReason::MissingSummary));
        assert!(digest.root_truncated);
    }

    #[test]
    fn many_comments_make_a_thread_long() {
        let forum = ForumStore::new();
        let limits = DigestLimits::default();
        let post = forum.create_post("a", "Busy", "short root", t0()).unwrap();
        for idx in 0..=limits.long_comment_count {
            forum
                .create_comment("b", &post, "+1", t0() + Duration::seconds(idx as i64))
                .unwrap();
        }
        let thread = forum.thread(&post).unwrap();
        assert!(is_long_thread(&thread, &limits));
    }

    #[test]
    fn fresh_summary_is_not_stale() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        forum.create_comment("b", &post, "early", t0()).unwrap();
        cache
            .save_summary(&forum, &post, "a long post", t0())
            .unwrap();

        let digest = cache.digest(&forum, &post, None).unwrap();

        assert!(!digest.needs_summary);
        assert!(digest.new_comments.is_empty());
        assert_eq!(digest.summary.unwrap().comment_count, 1);
    }

    #[test]
    fn same_instant_comment_after_summary_is_new() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        for idx in 0..8 {
            forum
                .create_comment("b", &post, &format!("early {idx}"), t0())
                .unwrap();
        }
        let saved = cache.save_summary(&forum, &post, "summary", t0()).unwrap();
        assert_eq!(saved.last_comment_id.as_deref(), Some("c-9"));

        let late = forum.create_comment("c", &post, "late", t0()).unwrap();
        assert_eq!(late, "c-10");

        let digest = cache.digest(&forum, &post, None).unwrap();
        let returned: Vec<&str> = digest.new_comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(returned, vec!["c-10"]);
        assert_eq!(digest.total_new_comments, 1);
    }

    #[test]
    fn twelve_new_comments_capped_to_five_most_recent() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        cache.save_summary(&forum, &post, "summary", t0()).unwrap();

        let mut ids = Vec::new();
        for idx in 0..12 {
            let id = forum
                .create_comment(
                    "b",
                    &post,
                    &format!("comment {idx}"),
                    t0() + Duration::minutes(idx + 1),
                )
                .unwrap();
            ids.push(id);
        }

        let digest = cache.digest(&forum, &post, Some(5)).unwrap();

        assert!(digest.truncated);
        assert!(digest.needs_summary);
        assert_eq!(digest.reason, Some(DigestReason::TooManyNewComments));
        assert_eq!(digest.total_new_comments, 12);
        let returned: Vec<String> = digest.new_comments.iter().map(|c| c.id.clone()).collect();
        assert_eq!(returned, ids[7..].to_vec());
    }

    #[test]
    fn oversized_comment_is_truncated_with_marker() {
        let forum = ForumStore::new();
        let limits = DigestLimits::default();
        let cache = SummaryCache::new(limits);
        let post = long_thread(&forum);
        cache.save_summary(&forum, &post, "summary", t0()).unwrap();
        let big = "y".repeat(limits.comment_chars + 50);
        forum
            .create_comment("b", &post, &big, t0() + Duration::minutes(1))
            .unwrap();

        let digest = cache.digest(&forum, &post, None).unwrap();

        assert!(digest.needs_summary);
        assert_eq!(digest.reason, Some(DigestReason::CommentTooLong));
        let comment = &digest.new_comments[0];
        assert!(comment.content_truncated);
        assert!(comment.content.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            comment.content.chars().count(),
            limits.comment_chars + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn reply_to_oversized_parent_gets_bounded_excerpt() {
        let forum = ForumStore::new();
        let limits = DigestLimits::default();
        let cache = SummaryCache::new(limits);
        let post = long_thread(&forum);
        cache.save_summary(&forum, &post, "summary", t0()).unwrap();
        let parent_text = "z".repeat(limits.parent_excerpt_chars + 10);
        let parent = forum
            .create_comment("b", &post, &parent_text, t0() + Duration::minutes(1))
            .unwrap();
        let reply = forum
            .create_comment("c", &parent, "agreed", t0() + Duration::minutes(2))
            .unwrap();

        let digest = cache.digest(&forum, &post, None).unwrap();

        assert!(digest.needs_summary);
        assert!(digest
            .reasons
            .contains(&DigestReason::ReplyToOversizedParent));
        let entry = digest
            .new_comments
            .iter()
            .find(|comment| comment.id == reply)
            .expect("reply returned");
        assert!(entry.parent_oversize);
        let excerpt = entry.parent_excerpt.as_deref().expect("excerpt");
        assert!(!excerpt.is_empty());
        assert!(
            excerpt.chars().count()
                <= limits.parent_excerpt_chars + TRUNCATION_MARKER.chars().count()
        );
        assert!(entry.depth >= 2);
    }

    #[test]
    fn edited_root_is_reported_first() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        cache.save_summary(&forum, &post, "summary", t0()).unwrap();
        for idx in 0..3 {
            forum
                .create_comment("b", &post, "new", t0() + Duration::minutes(idx + 1))
                .unwrap();
        }
        let edited = "w".repeat(DigestLimits::default().long_root_chars + 1);
        forum.edit_content(&post, &edited, t0()).unwrap();

        let digest = cache.digest(&forum, &post, Some(2)).unwrap();

        assert_eq!(digest.reason, Some(DigestReason::PostContentChanged));
        assert_eq!(
            digest.reasons,
            vec![
                DigestReason::PostContentChanged,
                DigestReason::TooManyNewComments
            ]
        );
    }

    #[test]
    fn saving_again_overwrites_the_entry() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        cache.save_summary(&forum, &post, "first", t0()).unwrap();
        let comment = forum
            .create_comment("b", &post, "later", t0() + Duration::minutes(5))
            .unwrap();
        let second = cache
            .save_summary(&forum, &post, "second", t0() + Duration::minutes(6))
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(second.summary, "second");
        assert_eq!(second.last_comment_id.as_deref(), Some(comment.as_str()));
        assert_eq!(cache.get(&post), Some(second));
    }

    #[test]
    fn empty_summary_and_unknown_thread_are_errors() {
        let forum = ForumStore::new();
        let cache = SummaryCache::new(DigestLimits::default());
        let post = long_thread(&forum);
        assert!(matches!(
            cache.save_summary(&forum, &post, "  ", t0()),
            Err(DigestError::EmptySummary { .. })
        ));
        assert!(matches!(
            cache.digest(&forum, "p-404", None),
            Err(DigestError::Forum(ForumError::NotFound { .. }))
        ));
    }

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        let (text, cut) = truncate_chars("héllo wörld", 4);
        assert!(cut);
        assert_eq!(text, format!("héll{TRUNCATION_MARKER}"));
        let (text, cut) = truncate_chars("abc", 3);
        assert!(!cut);
        assert_eq!(text, "abc");
    }
}
