use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::truncate_chars;
use crate::models::ActorId;

/// Prompt and response text are cut to this many characters before logging.
pub const RECORD_TEXT_LIMIT: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    Post,
    Comment,
    Vote,
    Browse,
    SubmitPaper,
    ReviewPaper,
    /// Rest-notice turn spent during the grace period.
    Rest,
}

impl TurnAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnAction::Post => "post",
            TurnAction::Comment => "comment",
            TurnAction::Vote => "vote",
            TurnAction::Browse => "browse",
            TurnAction::SubmitPaper => "submit_paper",
            TurnAction::ReviewPaper => "review_paper",
            TurnAction::Rest => "rest",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// One executed turn, as written to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub real_time: DateTime<Utc>,
    pub sim_time: DateTime<Utc>,
    pub tick: u64,
    pub actor_id: ActorId,
    pub actor_name: String,
    pub action: TurnAction,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    #[serde(default)]
    pub tool_responses: Vec<String>,
    pub turns_taken: u32,
    pub bell_rung: bool,
    pub grace_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl TurnRecord {
    /// Cuts prompt and response to [`RECORD_TEXT_LIMIT`].
    pub fn with_truncated_text(mut self) -> Self {
        self.prompt = truncate_chars(&self.prompt, RECORD_TEXT_LIMIT).0;
        self.response = truncate_chars(&self.response, RECORD_TEXT_LIMIT).0;
        self
    }

    /// Sort key used when merging logs: simulated time, then real time.
    pub fn order_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.sim_time, self.real_time)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(tick: u64, actor_id: &str) -> TurnRecord {
    use chrono::TimeZone;

    let base = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    TurnRecord {
        real_time: base,
        sim_time: base + chrono::Duration::minutes(tick as i64),
        tick,
        actor_id: actor_id.to_string(),
        actor_name: format!("{actor_id} name"),
        action: TurnAction::Browse,
        prompt: "look around".to_string(),
        response: "ok".to_string(),
        tool_calls: Vec::new(),
        tool_responses: Vec::new(),
        turns_taken: 1,
        bell_rung: false,
        grace_remaining: 0,
        usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_cut_before_logging() {
        let mut record = sample_record(1, "a");
        record.response = "r".repeat(RECORD_TEXT_LIMIT + 10);
        let record = record.with_truncated_text();
        assert!(record.response.ends_with(crate::digest::TRUNCATION_MARKER));
        assert_eq!(record.prompt, "look around");
    }

    #[test]
    fn record_without_usage_omits_the_field() {
        let record = sample_record(3, "a");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("usage"));
        assert!(json.contains("\"action\":\"browse\""));
    }
}
