//! Simulator: actors, turn budgets, runtimes and the tick engine.
//!
//! This module is organized into submodules:
//! - `actor`: action weights, relationships and per-actor state
//! - `turn_state`: the rest-bell turn budget
//! - `memory`: rolling memory and long-term notes
//! - `tools`: the tool surface actors use to touch the world
//! - `runtime` / `llm_runtime`: what produces actor output
//! - `scheduler`: the tick engine
//! - `clock`, `checkpoint`, `daily_log`, `population`, `config`: run plumbing

mod actor;
mod checkpoint;
mod clock;
mod config;
mod daily_log;
mod llm_runtime;
mod memory;
mod population;
mod runtime;
mod scheduler;
mod tools;
mod turn_state;

pub use actor::{
    ActionKind, ActionWeights, Actor, ActorSnapshot, Relationship, WEIGHT_JITTER_MAX,
    WEIGHT_JITTER_MIN,
};
pub use checkpoint::{
    load_checkpoint, write_checkpoint, CheckpointPaths, LoadedCheckpoint, DIGEST_CACHE_FILE,
    FORUM_FILE, JOURNAL_FILE, SIM_STATE_FILE,
};
pub use clock::SimClock;
pub use config::{
    ConfigError, SimConfig, DEFAULT_CONFIG_FILE_NAME, ENV_ACCEPT_THRESHOLD, ENV_ACTORS_PER_TICK,
    ENV_CHECKPOINT_INTERVAL, ENV_DATA_DIR, ENV_DIGEST_MAX_NEW_COMMENTS, ENV_GRACE_TURNS,
    ENV_MAX_EVENTS_PER_SHARD, ENV_MEMORY_CHARS, ENV_NOTE_CAPACITY, ENV_POPULATION, ENV_RESUME,
    ENV_REVIEWS_REQUIRED, ENV_SEED, ENV_STEP_SECONDS, ENV_TURN_LIMIT,
};
pub use daily_log::{DailyLog, DailyLogEntry};
pub use llm_runtime::{
    forum_tool_definitions, ChatMessage, ChatRole, LlmActorRuntime, LlmClientError,
    LlmCompletionClient, LlmCompletionRequest, RequestedFunction, RequestedToolCall,
    LlmCompletionResult, LlmRuntimeConfig, OpenAiChatCompletionClient, DEFAULT_LLM_MAX_TOOL_ROUNDS,
    DEFAULT_LLM_SYSTEM_PROMPT, DEFAULT_LLM_TIMEOUT_MS, ENV_LLM_API_KEY, ENV_LLM_BASE_URL,
    ENV_LLM_MAX_TOOL_ROUNDS, ENV_LLM_MODEL, ENV_LLM_SYSTEM_PROMPT, ENV_LLM_TIMEOUT_MS,
};
pub use memory::{LongTermMemory, LongTermNote, MemoryEntry, RollingMemory};
pub use population::{generate_population, load_or_generate};
pub use runtime::{
    ActorRuntime, RuntimeError, ScriptedRuntime, TurnDirective, TurnOutcome, TurnRequest,
};
pub use scheduler::{CancelToken, Engine, EngineError, RunReport, TickReport};
pub use tools::{
    Interaction, InteractionKind, Publication, PublicationKind, ToolCall, ToolError, ToolResponse,
    ToolSession, WorldSnapshot, WorldTools, DEFAULT_LIST_LIMIT,
};
pub use turn_state::{ActorTurnState, TurnBudget, TurnKind, TurnPhase};
