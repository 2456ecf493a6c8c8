//! World tools exposed to actor runtimes.
//!
//! A [`ToolSession`] is opened per turn. It executes calls against the world
//! on behalf of one actor at one simulated instant, and keeps what the
//! scheduler needs afterwards: call and response names, interactions with
//! other actors' content, and what the actor published.
//!
//! The first write in a session captures a [`WorldSnapshot`], so a turn that
//! fails partway can be rolled back with [`ToolSession::rollback`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::digest::{DigestError, SummaryCache, SummaryCacheState};
use crate::models::{ActorId, ContentId};
use crate::world::{
    ForumError, ForumState, ForumStore, JournalError, JournalState, JournalStore,
    SubmissionStatus, VoteDirection, VoteOutcome,
};

pub const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    CreatePost {
        title: String,
        content: String,
    },
    Comment {
        parent_id: ContentId,
        content: String,
    },
    Vote {
        item_id: ContentId,
        direction: VoteDirection,
    },
    SubmitPaper {
        title: String,
        #[serde(alias = "abstract")]
        abstract_text: String,
    },
    ReviewPaper {
        submission_id: ContentId,
        score: u8,
        #[serde(default)]
        comment: String,
    },
    ReadThreadDigest {
        thread_id: ContentId,
        #[serde(default)]
        max_new_comments: Option<usize>,
    },
    SaveThreadSummary {
        thread_id: ContentId,
        summary: String,
    },
    ListThreads {
        #[serde(default)]
        limit: Option<usize>,
    },
    ListPapers {
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::CreatePost { .. } => "create_post",
            ToolCall::Comment { .. } => "comment",
            ToolCall::Vote { .. } => "vote",
            ToolCall::SubmitPaper { .. } => "submit_paper",
            ToolCall::ReviewPaper { .. } => "review_paper",
            ToolCall::ReadThreadDigest { .. } => "read_thread_digest",
            ToolCall::SaveThreadSummary { .. } => "save_thread_summary",
            ToolCall::ListThreads { .. } => "list_threads",
            ToolCall::ListPapers { .. } => "list_papers",
        }
    }

    /// Whether the call changes the world.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            ToolCall::ReadThreadDigest { .. }
                | ToolCall::ListThreads { .. }
                | ToolCall::ListPapers { .. }
        )
    }

    /// Parses a named call with JSON arguments; missing arguments mean `{}`.
    pub fn from_parts(name: &str, arguments: Option<Value>) -> Result<Self, ToolError> {
        let arguments = arguments.unwrap_or_else(|| json!({}));
        serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(|err| {
            ToolError::BadArguments {
                tool: name.to_string(),
                message: err.to_string(),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Forum(#[from] ForumError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error("bad arguments for {tool}: {message}")]
    BadArguments { tool: String, message: String },
    #[error("failed to encode {tool} result: {message}")]
    Encode { tool: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractionKind {
    Upvote,
    Downvote,
    Comment,
    Review { score: u8 },
}

impl InteractionKind {
    pub fn affinity_delta(self) -> f64 {
        match self {
            InteractionKind::Upvote => 0.1,
            InteractionKind::Downvote => -0.1,
            InteractionKind::Comment => 0.05,
            InteractionKind::Review { score } if score >= 6 => 0.1,
            InteractionKind::Review { .. } => -0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub other: ActorId,
    pub kind: InteractionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationKind {
    Post,
    Paper,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub kind: PublicationKind,
    pub id: ContentId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub tool: String,
    pub ok: bool,
    pub body: Value,
    /// Author of the content this call touched, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched_author: Option<ActorId>,
}

impl ToolResponse {
    /// `create_post` on success, `create_post:error` on failure.
    pub fn label(&self) -> String {
        if self.ok {
            self.tool.clone()
        } else {
            format!("{}:error", self.tool)
        }
    }

    fn error(tool: &str, err: &ToolError) -> Self {
        Self {
            tool: tool.to_string(),
            ok: false,
            body: json!({ "error": err.to_string() }),
            touched_author: None,
        }
    }
}

/// Copy of every world store, taken before a turn's first write.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldSnapshot {
    pub forum: ForumState,
    pub journal: JournalState,
    pub digest: SummaryCacheState,
}

/// Shared handles to the world stores.
#[derive(Debug, Clone)]
pub struct WorldTools {
    forum: Arc<ForumStore>,
    journal: Arc<JournalStore>,
    digest: Arc<SummaryCache>,
}

impl WorldTools {
    pub fn new(
        forum: Arc<ForumStore>,
        journal: Arc<JournalStore>,
        digest: Arc<SummaryCache>,
    ) -> Self {
        Self {
            forum,
            journal,
            digest,
        }
    }

    pub fn forum(&self) -> &ForumStore {
        &self.forum
    }

    pub fn journal(&self) -> &JournalStore {
        &self.journal
    }

    pub fn digest(&self) -> &SummaryCache {
        &self.digest
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            forum: self.forum.snapshot(),
            journal: self.journal.snapshot(),
            digest: self.digest.snapshot(),
        }
    }

    pub fn restore(&self, snapshot: WorldSnapshot) {
        self.forum.restore(snapshot.forum);
        self.journal.restore(snapshot.journal);
        self.digest.restore(snapshot.digest);
    }

    pub fn session(&self, actor_id: &str, now: DateTime<Utc>) -> ToolSession<'_> {
        ToolSession {
            tools: self,
            actor_id: actor_id.to_string(),
            now,
            calls: Vec::new(),
            responses: Vec::new(),
            interactions: Vec::new(),
            publications: Vec::new(),
            undo: None,
        }
    }
}

#[derive(Debug)]
pub struct ToolSession<'a> {
    tools: &'a WorldTools,
    actor_id: ActorId,
    now: DateTime<Utc>,
    calls: Vec<String>,
    responses: Vec<ToolResponse>,
    interactions: Vec<Interaction>,
    publications: Vec<Publication>,
    undo: Option<WorldSnapshot>,
}

struct Executed {
    body: Value,
    touched_author: Option<ActorId>,
}

impl<'a> ToolSession<'a> {
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn world(&self) -> &'a WorldTools {
        self.tools
    }

    /// Executes a raw named call; unknown tools and malformed arguments come
    /// back as error responses.
    pub fn invoke_named(&mut self, name: &str, arguments: Option<Value>) -> ToolResponse {
        match ToolCall::from_parts(name, arguments) {
            Ok(call) => self.invoke(call),
            Err(err) => {
                self.calls.push(name.to_string());
                let response = ToolResponse::error(name, &err);
                self.responses.push(response.clone());
                response
            }
        }
    }

    pub fn invoke(&mut self, call: ToolCall) -> ToolResponse {
        let tool = call.name();
        self.calls.push(tool.to_string());
        if call.is_write() && self.undo.is_none() {
            self.undo = Some(self.tools.snapshot());
        }
        let response = match self.execute(call) {
            Ok(executed) => ToolResponse {
                tool: tool.to_string(),
                ok: true,
                body: executed.body,
                touched_author: executed.touched_author,
            },
            Err(err) => {
                tracing::debug!(actor_id = %self.actor_id, tool, error = %err, "tool call failed");
                ToolResponse::error(tool, &err)
            }
        };
        self.responses.push(response.clone());
        response
    }

    fn execute(&mut self, call: ToolCall) -> Result<Executed, ToolError> {
        let tools = self.tools;
        let forum = tools.forum();
        let journal = tools.journal();
        let actor = self.actor_id.as_str();
        match call {
            ToolCall::CreatePost { title, content } => {
                let id = forum.create_post(actor, &title, &content, self.now)?;
                self.publications.push(Publication {
                    kind: PublicationKind::Post,
                    id: id.clone(),
                    title: title.trim().to_string(),
                });
                Ok(Executed {
                    body: json!({ "id": id }),
                    touched_author: None,
                })
            }
            ToolCall::Comment { parent_id, content } => {
                let parent = forum.get(&parent_id).ok_or_else(|| ForumError::NotFound {
                    id: parent_id.clone(),
                })?;
                let id = forum.create_comment(actor, &parent_id, &content, self.now)?;
                let thread_id = forum.root_post_of(&id)?;
                self.interact(&parent.author, InteractionKind::Comment);
                Ok(Executed {
                    body: json!({ "id": id, "thread_id": thread_id }),
                    touched_author: Some(parent.author),
                })
            }
            ToolCall::Vote { item_id, direction } => {
                let outcome = forum.vote(actor, &item_id, direction)?;
                let item = forum.get(&item_id).ok_or_else(|| ForumError::NotFound {
                    id: item_id.clone(),
                })?;
                if outcome != VoteOutcome::Cancelled {
                    let kind = match direction {
                        VoteDirection::Up => InteractionKind::Upvote,
                        VoteDirection::Down => InteractionKind::Downvote,
                    };
                    self.interact(&item.author, kind);
                }
                let outcome = match outcome {
                    VoteOutcome::Cast => "cast",
                    VoteOutcome::Cancelled => "cancelled",
                    VoteOutcome::Flipped => "flipped",
                };
                Ok(Executed {
                    body: json!({ "outcome": outcome, "score": item.score }),
                    touched_author: Some(item.author),
                })
            }
            ToolCall::SubmitPaper {
                title,
                abstract_text,
            } => {
                let id = journal.submit(actor, &title, &abstract_text, self.now)?;
                self.publications.push(Publication {
                    kind: PublicationKind::Paper,
                    id: id.clone(),
                    title: title.trim().to_string(),
                });
                Ok(Executed {
                    body: json!({ "id": id, "status": SubmissionStatus::UnderReview }),
                    touched_author: None,
                })
            }
            ToolCall::ReviewPaper {
                submission_id,
                score,
                comment,
            } => {
                let outcome = journal.review(actor, &submission_id, score, &comment, self.now)?;
                self.interact(&outcome.author, InteractionKind::Review { score });
                Ok(Executed {
                    body: json!({ "submission_id": submission_id, "decision": outcome.decision }),
                    touched_author: Some(outcome.author),
                })
            }
            ToolCall::ReadThreadDigest {
                thread_id,
                max_new_comments,
            } => {
                let digest = tools.digest().digest(forum, &thread_id, max_new_comments)?;
                let author = forum.get(&thread_id).map(|post| post.author);
                let body = serde_json::to_value(&digest).map_err(|err| ToolError::Encode {
                    tool: "read_thread_digest".to_string(),
                    message: err.to_string(),
                })?;
                Ok(Executed {
                    body,
                    touched_author: author,
                })
            }
            ToolCall::SaveThreadSummary { thread_id, summary } => {
                let saved = tools
                    .digest()
                    .save_summary(forum, &thread_id, &summary, self.now)?;
                Ok(Executed {
                    body: json!({
                        "thread_id": saved.thread_id,
                        "comment_count": saved.comment_count,
                    }),
                    touched_author: None,
                })
            }
            ToolCall::ListThreads { limit } => {
                let posts = forum.recent_posts(limit.unwrap_or(DEFAULT_LIST_LIMIT));
                let threads: Vec<Value> = posts
                    .iter()
                    .map(|post| {
                        let comments = forum
                            .thread(&post.id)
                            .map(|thread| thread.comments.len())
                            .unwrap_or(0);
                        json!({
                            "id": post.id,
                            "title": post.title().unwrap_or_default(),
                            "author": post.author,
                            "score": post.score,
                            "comments": comments,
                        })
                    })
                    .collect();
                Ok(Executed {
                    body: json!({ "threads": threads }),
                    touched_author: None,
                })
            }
            ToolCall::ListPapers { limit } => {
                let papers: Vec<Value> = journal
                    .pending_for(actor)
                    .into_iter()
                    .take(limit.unwrap_or(DEFAULT_LIST_LIMIT))
                    .map(|paper| {
                        json!({
                            "id": paper.id,
                            "title": paper.title,
                            "author": paper.author,
                            "abstract": paper.abstract_text,
                            "reviews": paper.reviews.len(),
                        })
                    })
                    .collect();
                Ok(Executed {
                    body: json!({ "papers": papers }),
                    touched_author: None,
                })
            }
        }
    }

    fn interact(&mut self, other: &str, kind: InteractionKind) {
        if other != self.actor_id {
            self.interactions.push(Interaction {
                other: other.to_string(),
                kind,
            });
        }
    }

    /// Undoes every write made in this session and forgets its
    /// interactions and publications. Returns whether anything was written.
    pub fn rollback(&mut self) -> bool {
        let Some(snapshot) = self.undo.take() else {
            return false;
        };
        self.tools.restore(snapshot);
        self.interactions.clear();
        self.publications.clear();
        true
    }

    pub fn call_names(&self) -> &[String] {
        &self.calls
    }

    pub fn response_labels(&self) -> Vec<String> {
        self.responses.iter().map(ToolResponse::label).collect()
    }

    pub fn responses(&self) -> &[ToolResponse] {
        &self.responses
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn publications(&self) -> &[Publication] {
        &self.publications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestLimits;
    use crate::world::ReviewPolicy;
    use chrono::TimeZone;

    fn world() -> WorldTools {
        WorldTools::new(
            Arc::new(ForumStore::new()),
            Arc::new(JournalStore::new(ReviewPolicy::default())),
            Arc::new(SummaryCache::new(DigestLimits::default())),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn comment_on_other_actor_records_interaction() {
        let tools = world();
        let post = tools.forum().create_post("bob", "Hi", "hello", t0()).unwrap();
        let mut session = tools.session("alice", t0());

        let response = session.invoke(ToolCall::Comment {
            parent_id: post.clone(),
            content: "welcome".to_string(),
        });

        assert!(response.ok);
        assert_eq!(response.touched_author.as_deref(), Some("bob"));
        assert_eq!(
            session.interactions(),
            &[Interaction {
                other: "bob".to_string(),
                kind: InteractionKind::Comment,
            }]
        );
        assert_eq!(session.call_names(), &["comment".to_string()]);
    }

    #[test]
    fn cancelled_vote_is_not_an_interaction() {
        let tools = world();
        let post = tools.forum().create_post("bob", "Hi", "hello", t0()).unwrap();
        let mut session = tools.session("alice", t0());
        let up = ToolCall::Vote {
            item_id: post.clone(),
            direction: VoteDirection::Up,
        };
        session.invoke(up.clone());
        let second = session.invoke(up);

        assert_eq!(second.body["outcome"], "cancelled");
        assert_eq!(session.interactions().len(), 1);
    }

    #[test]
    fn named_calls_parse_json_arguments() {
        let tools = world();
        let mut session = tools.session("alice", t0());

        let response = session.invoke_named(
            "submit_paper",
            Some(json!({ "title": "On ticks", "abstract": "We study ticks." })),
        );
        assert!(response.ok);
        assert_eq!(session.publications()[0].kind, PublicationKind::Paper);

        let listed = session.invoke_named("list_threads", None);
        assert!(listed.ok);

        let bad = session.invoke_named("teleport", Some(json!({})));
        assert!(!bad.ok);
        assert_eq!(
            session.response_labels(),
            vec!["submit_paper", "list_threads", "teleport:error"]
        );
    }

    #[test]
    fn rollback_restores_world_before_first_write() {
        let tools = world();
        let post = tools.forum().create_post("bob", "Hi", "hello", t0()).unwrap();
        let before = tools.snapshot();
        let mut session = tools.session("alice", t0());

        session.invoke(ToolCall::ListThreads { limit: None });
        session.invoke(ToolCall::CreatePost {
            title: "Mine".to_string(),
            content: "text".to_string(),
        });
        session.invoke(ToolCall::Vote {
            item_id: post,
            direction: VoteDirection::Up,
        });
        session.invoke(ToolCall::SubmitPaper {
            title: "Paper".to_string(),
            abstract_text: "Abstract".to_string(),
        });
        assert_ne!(tools.snapshot(), before);

        assert!(session.rollback());
        assert_eq!(tools.snapshot(), before);
        assert!(session.interactions().is_empty());
        assert!(session.publications().is_empty());
        assert!(!session.rollback());
    }

    #[test]
    fn read_only_session_has_nothing_to_roll_back() {
        let tools = world();
        let post = tools.forum().create_post("bob", "Hi", "hello", t0()).unwrap();
        let mut session = tools.session("alice", t0());
        let digest = session.invoke(ToolCall::ReadThreadDigest {
            thread_id: post,
            max_new_comments: None,
        });
        assert!(digest.ok);
        assert_eq!(digest.body["is_long"], json!(false));
        assert!(!session.rollback());
    }

    #[test]
    fn failed_review_reports_error_body() {
        let tools = world();
        let mut session = tools.session("alice", t0());
        let id = tools.journal().submit("alice", "Mine", "Abstract", t0()).unwrap();

        let response = session.invoke(ToolCall::ReviewPaper {
            submission_id: id,
            score: 9,
            comment: String::new(),
        });

        assert!(!response.ok);
        assert!(response.body["error"]
            .as_str()
            .unwrap()
            .contains("cannot review own submission"));
        assert!(session.interactions().is_empty());
    }
}
