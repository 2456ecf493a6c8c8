//! Simulation configuration.
//!
//! Values come from `forum_world.toml` when present, each key falling back
//! to the environment variable of the same name, then to the default.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::turn_state::TurnBudget;
use crate::digest::DigestLimits;
use crate::world::ReviewPolicy;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "forum_world.toml";

pub const ENV_DATA_DIR: &str = "FORUM_WORLD_DATA_DIR";
pub const ENV_POPULATION: &str = "FORUM_WORLD_POPULATION";
pub const ENV_ACTORS_PER_TICK: &str = "FORUM_WORLD_ACTORS_PER_TICK";
pub const ENV_TURN_LIMIT: &str = "FORUM_WORLD_TURN_LIMIT";
pub const ENV_GRACE_TURNS: &str = "FORUM_WORLD_GRACE_TURNS";
pub const ENV_STEP_SECONDS: &str = "FORUM_WORLD_STEP_SECONDS";
pub const ENV_CHECKPOINT_INTERVAL: &str = "FORUM_WORLD_CHECKPOINT_INTERVAL";
pub const ENV_MAX_EVENTS_PER_SHARD: &str = "FORUM_WORLD_MAX_EVENTS_PER_SHARD";
pub const ENV_MEMORY_CHARS: &str = "FORUM_WORLD_MEMORY_CHARS";
pub const ENV_NOTE_CAPACITY: &str = "FORUM_WORLD_NOTE_CAPACITY";
pub const ENV_SEED: &str = "FORUM_WORLD_SEED";
pub const ENV_RESUME: &str = "FORUM_WORLD_RESUME";
pub const ENV_REVIEWS_REQUIRED: &str = "FORUM_WORLD_REVIEWS_REQUIRED";
pub const ENV_ACCEPT_THRESHOLD: &str = "FORUM_WORLD_ACCEPT_THRESHOLD";
pub const ENV_DIGEST_MAX_NEW_COMMENTS: &str = "FORUM_WORLD_DIGEST_MAX_NEW_COMMENTS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file failed ({path}): {message}")]
    ReadConfigFile { path: String, message: String },
    #[error("parse config file failed ({path}): {message}")]
    ParseConfigFile { path: String, message: String },
    #[error("missing config key: {key}")]
    MissingKey { key: &'static str },
    #[error("empty config key: {key}")]
    EmptyKey { key: &'static str },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub data_dir: PathBuf,
    pub population: usize,
    pub actors_per_tick: usize,
    pub turn_limit: u32,
    pub grace_turns: u32,
    pub step_seconds: i64,
    pub checkpoint_interval: u64,
    pub max_events_per_shard: u64,
    pub memory_chars: usize,
    pub note_capacity: usize,
    pub seed: Option<u64>,
    /// Continue an existing run in `data_dir` instead of refusing it.
    pub resume: bool,
    pub review_policy: ReviewPolicy,
    pub digest_limits: DigestLimits,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            population: 12,
            actors_per_tick: 4,
            turn_limit: 10,
            grace_turns: 2,
            step_seconds: 900,
            checkpoint_interval: 5,
            max_events_per_shard: 200,
            memory_chars: 6_000,
            note_capacity: 32,
            seed: None,
            resume: true,
            review_policy: ReviewPolicy::default(),
            digest_limits: DigestLimits::default(),
        }
    }
}

impl SimConfig {
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
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

    pub(crate) fn from_env_with<F>(mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let data_dir = getter(ENV_DATA_DIR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let seed = match getter(ENV_SEED).filter(|value| !value.trim().is_empty()) {
            Some(value) => Some(parse_value(ENV_SEED, &value)?),
            None => None,
        };
        let config = Self {
            data_dir,
            population: parse_or(&mut getter, ENV_POPULATION, defaults.population)?,
            actors_per_tick: parse_or(&mut getter, ENV_ACTORS_PER_TICK, defaults.actors_per_tick)?,
            turn_limit: parse_or(&mut getter, ENV_TURN_LIMIT, defaults.turn_limit)?,
            grace_turns: parse_or(&mut getter, ENV_GRACE_TURNS, defaults.grace_turns)?,
            step_seconds: parse_or(&mut getter, ENV_STEP_SECONDS, defaults.step_seconds)?,
            checkpoint_interval: parse_or(
                &mut getter,
                ENV_CHECKPOINT_INTERVAL,
                defaults.checkpoint_interval,
            )?,
            max_events_per_shard: parse_or(
                &mut getter,
                ENV_MAX_EVENTS_PER_SHARD,
                defaults.max_events_per_shard,
            )?,
            memory_chars: parse_or(&mut getter, ENV_MEMORY_CHARS, defaults.memory_chars)?,
            note_capacity: parse_or(&mut getter, ENV_NOTE_CAPACITY, defaults.note_capacity)?,
            seed,
            resume: parse_or(&mut getter, ENV_RESUME, defaults.resume)?,
            review_policy: ReviewPolicy {
                reviews_required: parse_or(
                    &mut getter,
                    ENV_REVIEWS_REQUIRED,
                    defaults.review_policy.reviews_required,
                )?,
                accept_threshold: parse_or(
                    &mut getter,
                    ENV_ACCEPT_THRESHOLD,
                    defaults.review_policy.accept_threshold,
                )?,
            },
            digest_limits: DigestLimits {
                default_max_new_comments: parse_or(
                    &mut getter,
                    ENV_DIGEST_MAX_NEW_COMMENTS,
                    defaults.digest_limits.default_max_new_comments,
                )?,
                ..defaults.digest_limits
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, message: &str) -> ConfigError {
            ConfigError::Invalid {
                key,
                message: message.to_string(),
            }
        }
        if self.actors_per_tick == 0 {
            return Err(invalid(ENV_ACTORS_PER_TICK, "must be at least 1"));
        }
        if self.turn_limit == 0 {
            return Err(invalid(ENV_TURN_LIMIT, "must be at least 1"));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid(ENV_CHECKPOINT_INTERVAL, "must be at least 1"));
        }
        if self.max_events_per_shard == 0 {
            return Err(invalid(ENV_MAX_EVENTS_PER_SHARD, "must be at least 1"));
        }
        if self.step_seconds < 1 {
            return Err(invalid(ENV_STEP_SECONDS, "must be at least 1"));
        }
        if self.review_policy.reviews_required == 0 {
            return Err(invalid(ENV_REVIEWS_REQUIRED, "must be at least 1"));
        }
        if !(1.0..=10.0).contains(&self.review_policy.accept_threshold) {
            return Err(invalid(ENV_ACCEPT_THRESHOLD, "must be within 1..=10"));
        }
        if self.digest_limits.default_max_new_comments == 0 {
            return Err(invalid(ENV_DIGEST_MAX_NEW_COMMENTS, "must be at least 1"));
        }
        Ok(())
    }

    pub fn turn_budget(&self) -> TurnBudget {
        TurnBudget::new(self.turn_limit, self.grace_turns)
    }

    pub fn feed_dir(&self) -> PathBuf {
        self.data_dir.join("feed")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn personas_path(&self) -> PathBuf {
        self.data_dir.join("personas.json")
    }

    pub fn actor_logs_dir(&self) -> PathBuf {
        self.data_dir.join("actor_logs")
    }
}

pub(crate) fn load_toml_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|err| ConfigError::ReadConfigFile {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    let value: toml::Value =
        toml::from_str(&content).map_err(|err| ConfigError::ParseConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
    match value {
        toml::Value::Table(table) => Ok(table),
        _ => Err(ConfigError::ParseConfigFile {
            path: path.display().to_string(),
            message: "root is not a TOML table".to_string(),
        }),
    }
}

pub(crate) fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        _ => None,
    }
}

pub(crate) fn required_key<F>(getter: &mut F, key: &'static str) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = getter(key).ok_or(ConfigError::MissingKey { key })?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyKey { key });
    }
    Ok(value)
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

pub(crate) fn parse_or<F, T>(getter: &mut F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
{
    match getter(key).filter(|value| !value.trim().is_empty()) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}
