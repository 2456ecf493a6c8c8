//! Discussion forum: posts, comment trees and votes behind one lock.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::models::{ActorId, ContentId};
use crate::persist::{
    default_state_version, read_json_if_exists, validate_version, write_json_atomic, PersistError,
    STATE_VERSION,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentKind {
    Post { title: String },
    Comment { parent_id: ContentId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    /// Forum-wide creation order. Order by this, never by `id`.
    #[serde(default)]
    pub seq: u64,
    pub author: ActorId,
    pub kind: ContentKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub upvotes: u64,
    pub downvotes: u64,
    pub score: i64,
}

impl ContentItem {
    pub fn is_post(&self) -> bool {
        matches!(self.kind, ContentKind::Post { .. })
    }

    pub fn parent_id(&self) -> Option<&str> {
        match &self.kind {
            ContentKind::Comment { parent_id } => Some(parent_id.as_str()),
            ContentKind::Post { .. } => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match &self.kind {
            ContentKind::Post { title } => Some(title.as_str()),
            ContentKind::Comment { .. } => None,
        }
    }

    fn recompute_score(&mut self) {
        self.score = self.upvotes as i64 - self.downvotes as i64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" | "upvote" | "+1" => Some(VoteDirection::Up),
            "down" | "downvote" | "-1" => Some(VoteDirection::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Cast,
    Cancelled,
    Flipped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForumError {
    #[error("content not found: {id}")]
    NotFound { id: ContentId },
    #[error("content {id} is not a post")]
    NotAPost { id: ContentId },
    #[error("parent chain of {id} contains a cycle")]
    ParentCycle { id: ContentId },
    #[error("empty {field}")]
    Empty { field: &'static str },
}

/// Serializable forum contents; the unit of save/load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumState {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub items: BTreeMap<ContentId, ContentItem>,
    /// item id -> voter -> direction
    #[serde(default)]
    pub votes: BTreeMap<ContentId, BTreeMap<ActorId, VoteDirection>>,
    pub next_content_id: u64,
}

impl Default for ForumState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            items: BTreeMap::new(),
            votes: BTreeMap::new(),
            next_content_id: 1,
        }
    }
}

/// A root post with every comment that resolves to it, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    pub post: ContentItem,
    pub comments: Vec<ContentItem>,
}

impl ThreadView {
    pub fn comment(&self, id: &str) -> Option<&ContentItem> {
        self.comments.iter().find(|comment| comment.id == id)
    }

    /// Distance from the root post (top-level comment = 1), or `None` when
    /// the chain leaves the thread or loops.
    pub fn depth_of(&self, id: &str) -> Option<usize> {
        let mut visited = BTreeSet::new();
        let mut current = id;
        let mut depth = 0usize;
        loop {
            if current == self.post.id {
                return Some(depth);
            }
            if !visited.insert(current) {
                return None;
            }
            let comment = self.comment(current)?;
            current = comment.parent_id()?;
            depth += 1;
        }
    }

    pub fn total_chars(&self) -> usize {
        self.post.content.chars().count()
            + self
                .comments
                .iter()
                .map(|comment| comment.content.chars().count())
                .sum::<usize>()
    }
}

/// Walks parent links from `id` to the nearest post.
///
/// Returns the root post id and the walk length.
pub fn resolve_root(
    items: &BTreeMap<ContentId, ContentItem>,
    id: &str,
) -> Result<(ContentId, usize), ForumError> {
    let mut visited = BTreeSet::new();
    let mut current = items.get(id).ok_or_else(|| ForumError::NotFound {
        id: id.to_string(),
    })?;
    let mut depth = 0usize;
    loop {
        match &current.kind {
            ContentKind::Post { .. } => return Ok((current.id.clone(), depth)),
            ContentKind::Comment { parent_id } => {
                if !visited.insert(current.id.as_str()) {
                    return Err(ForumError::ParentCycle { id: id.to_string() });
                }
                current = items.get(parent_id).ok_or_else(|| ForumError::NotFound {
                    id: parent_id.clone(),
                })?;
                depth += 1;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ForumStore {
    state: RwLock<ForumState>,
}

impl ForumStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ForumState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn create_post(
        &self,
        author: &str,
        title: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ContentId, ForumError> {
        if title.trim().is_empty() {
            return Err(ForumError::Empty { field: "title" });
        }
        if content.trim().is_empty() {
            return Err(ForumError::Empty { field: "content" });
        }
        let mut state = self.state.write();
        let seq = state.next_content_id;
        let id = format!("p-{seq}");
        state.next_content_id += 1;
        state.items.insert(
            id.clone(),
            ContentItem {
                id: id.clone(),
                seq,
                author: author.to_string(),
                kind: ContentKind::Post {
                    title: title.trim().to_string(),
                },
                content: content.to_string(),
                created_at: now,
                edited_at: None,
                upvotes: 0,
                downvotes: 0,
                score: 0,
            },
        );
        Ok(id)
    }

    /// Adds a comment under `parent_id`, which may be a post or a comment.
    pub fn create_comment(
        &self,
        author: &str,
        parent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ContentId, ForumError> {
        if content.trim().is_empty() {
            return Err(ForumError::Empty { field: "content" });
        }
        let mut state = self.state.write();
        resolve_root(&state.items, parent_id)?;
        let seq = state.next_content_id;
        let id = format!("c-{seq}");
        state.next_content_id += 1;
        state.items.insert(
            id.clone(),
            ContentItem {
                id: id.clone(),
                seq,
                author: author.to_string(),
                kind: ContentKind::Comment {
                    parent_id: parent_id.to_string(),
                },
                content: content.to_string(),
                created_at: now,
                edited_at: None,
                upvotes: 0,
                downvotes: 0,
                score: 0,
            },
        );
        Ok(id)
    }

    pub fn edit_content(
        &self,
        id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ForumError> {
        if content.trim().is_empty() {
            return Err(ForumError::Empty { field: "content" });
        }
        let mut state = self.state.write();
        let item = state.items.get_mut(id).ok_or_else(|| ForumError::NotFound {
            id: id.to_string(),
        })?;
        item.content = content.to_string();
        item.edited_at = Some(now);
        Ok(())
    }

    /// Casts, cancels or flips `voter`'s single vote on `item_id`.
    pub fn vote(
        &self,
        voter: &str,
        item_id: &str,
        direction: VoteDirection,
    ) -> Result<VoteOutcome, ForumError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| ForumError::NotFound {
                id: item_id.to_string(),
            })?;
        let voters = state.votes.entry(item_id.to_string()).or_default();
        let outcome = match voters.get(voter).copied() {
            None => {
                voters.insert(voter.to_string(), direction);
                match direction {
                    VoteDirection::Up => item.upvotes += 1,
                    VoteDirection::Down => item.downvotes += 1,
                }
                VoteOutcome::Cast
            }
            Some(previous) if previous == direction => {
                voters.remove(voter);
                match direction {
                    VoteDirection::Up => item.upvotes = item.upvotes.saturating_sub(1),
                    VoteDirection::Down => item.downvotes = item.downvotes.saturating_sub(1),
                }
                VoteOutcome::Cancelled
            }
            Some(_) => {
                voters.insert(voter.to_string(), direction);
                match direction {
                    VoteDirection::Up => {
                        item.downvotes = item.downvotes.saturating_sub(1);
                        item.upvotes += 1;
                    }
                    VoteDirection::Down => {
                        item.upvotes = item.upvotes.saturating_sub(1);
                        item.downvotes += 1;
                    }
                }
                VoteOutcome::Flipped
            }
        };
        if voters.is_empty() {
            state.votes.remove(item_id);
        }
        item.recompute_score();
        Ok(outcome)
    }

    pub fn get(&self, id: &str) -> Option<ContentItem> {
        self.state.read().items.get(id).cloned()
    }

    pub fn root_post_of(&self, id: &str) -> Result<ContentId, ForumError> {
        resolve_root(&self.state.read().items, id).map(|(root, _)| root)
    }

    pub fn depth_of(&self, id: &str) -> Result<usize, ForumError> {
        resolve_root(&self.state.read().items, id).map(|(_, depth)| depth)
    }

    pub fn thread(&self, post_id: &str) -> Result<ThreadView, ForumError> {
        let state = self.state.read();
        let post = state
            .items
            .get(post_id)
            .ok_or_else(|| ForumError::NotFound {
                id: post_id.to_string(),
            })?;
        if !post.is_post() {
            return Err(ForumError::NotAPost {
                id: post_id.to_string(),
            });
        }
        let mut comments: Vec<ContentItem> = state
            .items
            .values()
            .filter(|item| !item.is_post())
            .filter(|item| {
                resolve_root(&state.items, &item.id)
                    .map(|(root, _)| root == post_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.seq));
        Ok(ThreadView {
            post: post.clone(),
            comments,
        })
    }

    /// Most recent posts first.
    pub fn recent_posts(&self, limit: usize) -> Vec<ContentItem> {
        let state = self.state.read();
        let mut posts: Vec<ContentItem> = state
            .items
            .values()
            .filter(|item| item.is_post())
            .cloned()
            .collect();
        posts.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        posts.truncate(limit);
        posts
    }

    pub fn vote_of(&self, voter: &str, item_id: &str) -> Option<VoteDirection> {
        self.state
            .read()
            .votes
            .get(item_id)
            .and_then(|voters| voters.get(voter).copied())
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    pub fn snapshot(&self) -> ForumState {
        self.state.read().clone()
    }

    /// Replaces the contents wholesale.
    pub fn restore(&self, state: ForumState) {
        *self.state.write() = state;
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let state = self.state.read();
        write_json_atomic(&*state, path.as_ref())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Option<Self>, PersistError> {
        let Some(state) = read_json_if_exists::<ForumState>(path.as_ref())? else {
            return Ok(None);
        };
        validate_version("forum", state.version)?;
        Ok(Some(Self::from_state(state)))
    }
}
