//! LLM-backed actor runtime over an OpenAI-compatible completion client.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::config::{load_toml_table, parse_or, required_key, toml_value_to_string, ConfigError};
use super::runtime::{ActorRuntime, RuntimeError, TurnOutcome, TurnRequest};
use super::tools::ToolSession;
use crate::feed::TokenUsage;

pub const ENV_LLM_MODEL: &str = "FORUM_WORLD_LLM_MODEL";
pub const ENV_LLM_BASE_URL: &str = "FORUM_WORLD_LLM_BASE_URL";
pub const ENV_LLM_API_KEY: &str = "FORUM_WORLD_LLM_API_KEY";
pub const ENV_LLM_TIMEOUT_MS: &str = "FORUM_WORLD_LLM_TIMEOUT_MS";
pub const ENV_LLM_SYSTEM_PROMPT: &str = "FORUM_WORLD_LLM_SYSTEM_PROMPT";
pub const ENV_LLM_MAX_TOOL_ROUNDS: &str = "FORUM_WORLD_LLM_MAX_TOOL_ROUNDS";

pub const DEFAULT_LLM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LLM_MAX_TOOL_ROUNDS: u32 = 2;
pub const DEFAULT_LLM_SYSTEM_PROMPT: &str =
    "You are a member of a small online research community. Stay in character.";

const TOOL_GUIDANCE: &str = "Act on the community only through the provided tools. \
Reply with plain text and no tool calls once you are done for this turn.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRuntimeConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub system_prompt: String,
    pub max_tool_rounds: u32,
}

impl LlmRuntimeConfig {
    /// Reads `path` when it exists, otherwise the environment alone.
    pub fn from_default_sources(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_config_file(path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let table = load_toml_table(path)?;
        Self::from_env_with(|key| {
            table
                .get(key)
                .and_then(toml_value_to_string)
                .or_else(|| std::env::var(key).ok())
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let model = required_key(&mut getter, ENV_LLM_MODEL)?;
        let base_url = required_key(&mut getter, ENV_LLM_BASE_URL)?;
        let api_key = required_key(&mut getter, ENV_LLM_API_KEY)?;
        let timeout_ms = parse_or(&mut getter, ENV_LLM_TIMEOUT_MS, DEFAULT_LLM_TIMEOUT_MS)?;
        let max_tool_rounds = parse_or(
            &mut getter,
            ENV_LLM_MAX_TOOL_ROUNDS,
            DEFAULT_LLM_MAX_TOOL_ROUNDS,
        )?;
        let system_prompt = getter(ENV_LLM_SYSTEM_PROMPT)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LLM_SYSTEM_PROMPT.to_string());

        Ok(Self {
            model,
            base_url,
            api_key,
            timeout_ms,
            system_prompt,
            max_tool_rounds,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A forum tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: RequestedFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedFunction {
    pub name: String,
    /// JSON-encoded argument object, as sent by the endpoint.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RequestedToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.to_string()),
            ..Self::text(ChatRole::Tool, content)
        }
    }
}

/// One round of a turn's conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmCompletionResult {
    /// The assistant reply, including any tool calls it requests.
    pub message: ChatMessage,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

pub trait LlmCompletionClient {
    fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResult, LlmClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmClientError {
    #[error("cannot build http client: {message}")]
    Setup { message: String },
    #[error("completion request failed: {message}")]
    Transport { message: String },
    #[error("completion endpoint answered {code}: {body}")]
    Rejected { code: u16, body: String },
    #[error("malformed completion response: {message}")]
    Malformed { message: String },
    #[error("completion response has no choices")]
    NoChoices,
}

fn tool_definition(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Function schemas for every world tool, in chat-completions form.
pub fn forum_tool_definitions() -> Vec<Value> {
    let limit = json!({ "type": "integer", "minimum": 1, "maximum": 50 });
    vec![
        tool_definition(
            "create_post",
            "Start a new forum thread.",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["title", "content"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "comment",
            "Reply to a post or to another comment.",
            json!({
                "type": "object",
                "properties": {
                    "parent_id": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["parent_id", "content"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "vote",
            "Vote on a post or comment. Repeating a vote withdraws it.",
            json!({
                "type": "object",
                "properties": {
                    "item_id": { "type": "string" },
                    "direction": { "type": "string", "enum": ["up", "down"] }
                },
                "required": ["item_id", "direction"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "submit_paper",
            "Submit a paper to the journal for peer review.",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "abstract": { "type": "string" }
                },
                "required": ["title", "abstract"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "review_paper",
            "Review someone else's submission with a score from 1 to 10.",
            json!({
                "type": "object",
                "properties": {
                    "submission_id": { "type": "string" },
                    "score": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "comment": { "type": "string" }
                },
                "required": ["submission_id", "score"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "read_thread_digest",
            "Catch up on a thread: cached summary plus comments since it was written.",
            json!({
                "type": "object",
                "properties": {
                    "thread_id": { "type": "string" },
                    "max_new_comments": limit
                },
                "required": ["thread_id"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "save_thread_summary",
            "Store a summary of a thread you have read.",
            json!({
                "type": "object",
                "properties": {
                    "thread_id": { "type": "string" },
                    "summary": { "type": "string" }
                },
                "required": ["thread_id", "summary"],
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "list_threads",
            "List the most recent threads.",
            json!({
                "type": "object",
                "properties": { "limit": limit },
                "additionalProperties": false
            }),
        ),
        tool_definition(
            "list_papers",
            "List submissions you can still review.",
            json!({
                "type": "object",
                "properties": { "limit": limit },
                "additionalProperties": false
            }),
        ),
    ]
}

/// Empty argument strings mean `{}`; undecodable ones are kept raw so the
/// tool reports them as bad arguments.
fn decode_tool_arguments(arguments: &str) -> Value {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return json!({});
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| json!({ "_raw": trimmed }))
}

#[derive(Debug, Clone)]
pub struct OpenAiChatCompletionClient {
    endpoint: String,
    api_key: String,
    http: Client,
}

impl OpenAiChatCompletionClient {
    pub fn from_config(config: &LlmRuntimeConfig) -> Result<Self, LlmClientError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|err| LlmClientError::Setup {
                message: err.to_string(),
            })?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            http,
        })
    }
}

#[derive(Debug, Serialize)]
struct ToolChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct ToolChatReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    choices: Vec<ToolChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ToolChatChoice {
    message: ChatMessage,
}

impl LlmCompletionClient for OpenAiChatCompletionClient {
    fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResult, LlmClientError> {
        let payload = ToolChatPayload {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|err| LlmClientError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().unwrap_or_default();
            return Err(LlmClientError::Rejected {
                code: status.as_u16(),
                body,
            });
        }

        let reply: ToolChatReply = response.json().map_err(|err| LlmClientError::Malformed {
            message: err.to_string(),
        })?;
        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or(LlmClientError::NoChoices)?;

        Ok(LlmCompletionResult {
            message: choice.message,
            model: reply.model,
            usage: reply.usage.filter(|usage| !usage.is_empty()),
        })
    }
}

/// Plays a turn as a tool-calling conversation: every tool call the model
/// requests is executed and answered with a tool message, for up to
/// `max_tool_rounds` follow-ups.
#[derive(Debug)]
pub struct LlmActorRuntime<C: LlmCompletionClient> {
    config: LlmRuntimeConfig,
    client: C,
    tools: Vec<Value>,
}

impl LlmActorRuntime<OpenAiChatCompletionClient> {
    pub fn from_config(config: LlmRuntimeConfig) -> Result<Self, LlmClientError> {
        let client = OpenAiChatCompletionClient::from_config(&config)?;
        Ok(Self::new(config, client))
    }
}

impl<C: LlmCompletionClient> LlmActorRuntime<C> {
    pub fn new(config: LlmRuntimeConfig, client: C) -> Self {
        Self {
            config,
            client,
            tools: forum_tool_definitions(),
        }
    }

    fn opening_messages(&self, request: &TurnRequest) -> Vec<ChatMessage> {
        vec![
            ChatMessage::text(
                ChatRole::System,
                format!("{}\n\n{}", self.config.system_prompt, TOOL_GUIDANCE),
            ),
            ChatMessage::text(ChatRole::User, request.prompt()),
        ]
    }
}

impl<C: LlmCompletionClient> ActorRuntime for LlmActorRuntime<C> {
    fn run_turn(
        &mut self,
        request: &TurnRequest,
        tools: &mut ToolSession<'_>,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut messages = self.opening_messages(request);
        let mut replies = Vec::new();
        let mut usage = TokenUsage::default();

        for round in 0..=self.config.max_tool_rounds {
            let result = self.client.complete(&LlmCompletionRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: self.tools.clone(),
            })?;
            if let Some(round_usage) = result.usage {
                add_usage(&mut usage, round_usage);
            }
            let reply = result.message;
            if let Some(text) = reply.content.as_deref().filter(|text| !text.trim().is_empty()) {
                replies.push(text.to_string());
            }
            if reply.tool_calls.is_empty() || round == self.config.max_tool_rounds {
                break;
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                let arguments = decode_tool_arguments(&call.function.arguments);
                let response = tools.invoke_named(&call.function.name, Some(arguments));
                replies.push(format!("[{}]", response.label()));
                messages.push(ChatMessage::tool_result(&call.id, response.body.to_string()));
            }
        }

        Ok(TurnOutcome {
            response_text: replies.join("\n"),
            tool_calls: tools.call_names().to_vec(),
            tool_responses: tools.response_labels(),
            usage: (!usage.is_empty()).then_some(usage),
        })
    }
}

fn add_usage(total: &mut TokenUsage, round: TokenUsage) {
    fn add(slot: &mut Option<u64>, value: Option<u64>) {
        if let Some(value) = value {
            *slot = Some(slot.unwrap_or(0) + value);
        }
    }
    add(&mut total.prompt_tokens, round.prompt_tokens);
    add(&mut total.completion_tokens, round.completion_tokens);
    add(&mut total.total_tokens, round.total_tokens);
}
