pub mod digest;
pub mod feed;
pub mod models;
pub mod persist;
pub mod simulator;
pub mod world;

pub use digest::{
    build_digest, is_long_thread, root_fingerprint, truncate_chars, DigestComment, DigestError,
    DigestLimits, DigestReason, SummaryCache, ThreadDigest, ThreadSummary, TRUNCATION_MARKER,
};
pub use feed::{
    rebuild_feed, FeedError, FeedIndex, FeedReader, FeedWriter, RebuildReport, TokenUsage,
    TurnAction, TurnRecord,
};
pub use models::{ActorId, ActorRole, CognitiveStyle, ContentId, Persona, PersonaTraits};
pub use persist::PersistError;
pub use world::{
    ContentItem, ContentKind, ForumError, ForumStore, JournalError, JournalStore, ReviewPolicy,
    Submission, SubmissionStatus, ThreadView, VoteDirection, VoteOutcome,
};

// Simulation engine
pub use simulator::{
    ActorRuntime, ActorTurnState, CancelToken, Engine, EngineError, LlmActorRuntime,
    LlmRuntimeConfig, RunReport, ScriptedRuntime, SimClock, SimConfig, TickReport, ToolCall,
    ToolSession, TurnBudget, WorldTools,
};
