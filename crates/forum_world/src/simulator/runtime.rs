//! The boundary between the scheduler and whatever produces actor output.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::actor::ActionKind;
use super::llm_runtime::LlmClientError;
use super::tools::{ToolCall, ToolSession};
use crate::feed::TokenUsage;
use crate::models::ActorId;
use crate::world::VoteDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirective {
    Act {
        action: ActionKind,
        /// Last regular turn: the instruction carries the rest-bell notice.
        rings_bell: bool,
    },
    Rest {
        grace_remaining: u32,
    },
}

/// Everything a runtime needs to play one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub actor_id: ActorId,
    pub actor_name: String,
    pub persona: String,
    pub tick: u64,
    pub sim_time: DateTime<Utc>,
    pub directive: TurnDirective,
    pub instruction: String,
    pub memory: String,
    pub notes: String,
    pub relationships: String,
}

impl TurnRequest {
    /// Full user-facing prompt: persona, context, then the instruction.
    pub fn prompt(&self) -> String {
        format!(
            "You are {persona}.\nSimulated time: {time} (tick {tick}).\n\n\
             Recent memory:\n{memory}\n\nNotes:\n{notes}\n\nPeople you know:\n{relationships}\n\n\
             {instruction}",
            persona = self.persona,
            time = self.sim_time.format("%Y-%m-%d %H:%M UTC"),
            tick = self.tick,
            memory = self.memory,
            notes = self.notes,
            relationships = self.relationships,
            instruction = self.instruction,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Model output, verbatim.
    pub response_text: String,
    pub tool_calls: Vec<String>,
    pub tool_responses: Vec<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Client(#[from] LlmClientError),
    #[error("runtime unavailable: {message}")]
    Unavailable { message: String },
}

pub trait ActorRuntime {
    fn run_turn(
        &mut self,
        request: &TurnRequest,
        tools: &mut ToolSession<'_>,
    ) -> Result<TurnOutcome, RuntimeError>;
}

/// Deterministic runtime that performs the directed action with canned text.
/// Used for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRuntime {
    turns: u64,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn act(&self, action: ActionKind, request: &TurnRequest, tools: &mut ToolSession<'_>) -> String {
        let world = tools.world();
        let me = request.actor_id.as_str();
        let others_post = world
            .forum()
            .recent_posts(20)
            .into_iter()
            .find(|post| post.author != me);
        match action {
            ActionKind::Post => {
                tools.invoke(ToolCall::CreatePost {
                    title: format!("Field notes from {} (tick {})", request.actor_name, request.tick),
                    content: format!("{} shares an update.", request.actor_name),
                });
                "Posted an update.".to_string()
            }
            ActionKind::Comment => match others_post {
                Some(post) => {
                    tools.invoke(ToolCall::Comment {
                        parent_id: post.id.clone(),
                        content: format!("{} weighs in on {}.", request.actor_name, post.id),
                    });
                    format!("Commented on {}.", post.id)
                }
                None => "Nothing to comment on yet.".to_string(),
            },
            ActionKind::Vote => match others_post {
                Some(post) => {
                    let direction = if (self.turns + request.tick) % 4 == 0 {
                        VoteDirection::Down
                    } else {
                        VoteDirection::Up
                    };
                    tools.invoke(ToolCall::Vote {
                        item_id: post.id.clone(),
                        direction,
                    });
                    format!("Voted on {}.", post.id)
                }
                None => "Nothing to vote on yet.".to_string(),
            },
            ActionKind::Browse => {
                tools.invoke(ToolCall::ListThreads { limit: Some(5) });
                let Some(post) = world.forum().recent_posts(1).into_iter().next() else {
                    return "Browsed an empty forum.".to_string();
                };
                let response = tools.invoke(ToolCall::ReadThreadDigest {
                    thread_id: post.id.clone(),
                    max_new_comments: None,
                });
                if response.body["needs_summary"] == json!(true) {
                    tools.invoke(ToolCall::SaveThreadSummary {
                        thread_id: post.id.clone(),
                        summary: format!("Discussion around {}", post.title().unwrap_or("a post")),
                    });
                }
                format!("Read {}.", post.id)
            }
            ActionKind::SubmitPaper => {
                tools.invoke(ToolCall::SubmitPaper {
                    title: format!("Working paper by {} (tick {})", request.actor_name, request.tick),
                    abstract_text: "A short study of community dynamics.".to_string(),
                });
                "Submitted a paper.".to_string()
            }
            ActionKind::ReviewPaper => {
                let Some(paper) = world.journal().pending_for(me).into_iter().next() else {
                    return "No papers to review.".to_string();
                };
                let score = 3 + ((self.turns + request.tick) % 7) as u8;
                tools.invoke(ToolCall::ReviewPaper {
                    submission_id: paper.id.clone(),
                    score,
                    comment: "Reviewed.".to_string(),
                });
                format!("Reviewed {} with {score}.", paper.id)
            }
        }
    }
}

impl ActorRuntime for ScriptedRuntime {
    fn run_turn(
        &mut self,
        request: &TurnRequest,
        tools: &mut ToolSession<'_>,
    ) -> Result<TurnOutcome, RuntimeError> {
        self.turns += 1;
        let response_text = match request.directive {
            TurnDirective::Act { action, .. } => self.act(action, request, tools),
            TurnDirective::Rest { .. } => "Resting.".to_string(),
        };
        Ok(TurnOutcome {
            response_text,
            tool_calls: tools.call_names().to_vec(),
            tool_responses: tools.response_labels(),
            usage: None,
        })
    }
}
