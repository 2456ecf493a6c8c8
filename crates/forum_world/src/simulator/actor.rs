use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::memory::{LongTermMemory, RollingMemory};
use super::tools::{Interaction, InteractionKind};
use super::turn_state::{ActorTurnState, TurnBudget};
use crate::feed::TurnAction;
use crate::models::{ActorId, ActorRole, Persona};
use crate::persist::{
    default_state_version, read_json_if_exists, validate_version, write_json_atomic, PersistError,
    STATE_VERSION,
};

pub const WEIGHT_JITTER_MIN: f64 = 0.8;
pub const WEIGHT_JITTER_MAX: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Post,
    Comment,
    Vote,
    Browse,
    SubmitPaper,
    ReviewPaper,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Post,
        ActionKind::Comment,
        ActionKind::Vote,
        ActionKind::Browse,
        ActionKind::SubmitPaper,
        ActionKind::ReviewPaper,
    ];

    fn slot(self) -> usize {
        match self {
            ActionKind::Post => 0,
            ActionKind::Comment => 1,
            ActionKind::Vote => 2,
            ActionKind::Browse => 3,
            ActionKind::SubmitPaper => 4,
            ActionKind::ReviewPaper => 5,
        }
    }
}

impl From<ActionKind> for TurnAction {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Post => TurnAction::Post,
            ActionKind::Comment => TurnAction::Comment,
            ActionKind::Vote => TurnAction::Vote,
            ActionKind::Browse => TurnAction::Browse,
            ActionKind::SubmitPaper => TurnAction::SubmitPaper,
            ActionKind::ReviewPaper => TurnAction::ReviewPaper,
        }
    }
}

/// Per-actor action preferences, fixed at actor creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionWeights {
    weights: [f64; 6],
}

impl ActionWeights {
    /// Weights implied by traits and role, before jitter.
    pub fn base_for(persona: &Persona) -> Self {
        let traits = persona.traits;
        let mut weights = [0.0; 6];
        weights[ActionKind::Post.slot()] =
            0.4 + traits.creativity + 0.5 * traits.influence + 0.3 * traits.risk_tolerance;
        weights[ActionKind::Comment.slot()] = 0.5 + 1.5 * traits.sociability;
        weights[ActionKind::Vote.slot()] = 0.5 + 0.5 * traits.sociability + 0.3 * traits.rigor;
        weights[ActionKind::Browse.slot()] = 1.0;
        weights[ActionKind::SubmitPaper.slot()] = 0.1 + 0.6 * traits.rigor * traits.creativity;
        weights[ActionKind::ReviewPaper.slot()] = 0.2 + 0.8 * traits.rigor;

        let boosts: &[(ActionKind, f64)] = match persona.role {
            ActorRole::Researcher => &[(ActionKind::SubmitPaper, 2.0), (ActionKind::Post, 1.2)],
            ActorRole::Engineer => &[(ActionKind::Post, 1.5), (ActionKind::Comment, 1.1)],
            ActorRole::Reviewer => &[(ActionKind::ReviewPaper, 2.5)],
            ActorRole::Skeptic => &[(ActionKind::Comment, 1.5), (ActionKind::Vote, 1.3)],
            ActorRole::Enthusiast => &[(ActionKind::Vote, 1.5), (ActionKind::Post, 1.2)],
            ActorRole::Moderator => &[(ActionKind::Browse, 1.5), (ActionKind::Comment, 1.2)],
        };
        for (kind, factor) in boosts {
            weights[kind.slot()] *= factor;
        }
        Self { weights }
    }

    /// Base weights with one uniform jitter in `[0.8, 1.2]` per action.
    pub fn from_persona<R: Rng + ?Sized>(persona: &Persona, rng: &mut R) -> Self {
        let mut weights = Self::base_for(persona).weights;
        for weight in &mut weights {
            *weight *= rng.gen_range(WEIGHT_JITTER_MIN..=WEIGHT_JITTER_MAX);
        }
        Self { weights }
    }

    pub fn weight(&self, kind: ActionKind) -> f64 {
        self.weights[kind.slot()]
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> ActionKind {
        match WeightedIndex::new(self.weights.iter().copied()) {
            Ok(dist) => ActionKind::ALL[dist.sample(rng)],
            Err(_) => ActionKind::Browse,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// In `[-1, 1]`.
    pub affinity: f64,
    pub interactions: u64,
}

impl Relationship {
    pub fn record(&mut self, kind: InteractionKind) {
        self.interactions += 1;
        self.affinity = (self.affinity + kind.affinity_delta()).clamp(-1.0, 1.0);
    }
}

/// Durable per-actor state. Turn budgets are deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    #[serde(default = "default_state_version")]
    pub version: u32,
    pub persona: Persona,
    pub memory: RollingMemory,
    pub notes: LongTermMemory,
    #[serde(default)]
    pub relationships: BTreeMap<ActorId, Relationship>,
}

impl ActorSnapshot {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        write_json_atomic(self, path.as_ref())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Option<Self>, PersistError> {
        let Some(snapshot) = read_json_if_exists::<ActorSnapshot>(path.as_ref())? else {
            return Ok(None);
        };
        validate_version("actor", snapshot.version)?;
        Ok(Some(snapshot))
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub persona: Persona,
    pub weights: ActionWeights,
    pub turn: ActorTurnState,
    pub memory: RollingMemory,
    pub notes: LongTermMemory,
    pub relationships: BTreeMap<ActorId, Relationship>,
}

impl Actor {
    pub fn new<R: Rng + ?Sized>(
        persona: Persona,
        budget: TurnBudget,
        memory_chars: usize,
        note_capacity: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            weights: ActionWeights::from_persona(&persona, rng),
            persona,
            turn: ActorTurnState::new(budget),
            memory: RollingMemory::new(memory_chars),
            notes: LongTermMemory::with_capacity(note_capacity),
            relationships: BTreeMap::new(),
        }
    }

    /// Restores durable state; the persona in the snapshot is ignored in
    /// favour of the registered one.
    pub fn restore(&mut self, snapshot: ActorSnapshot) {
        let memory_chars = self.memory.max_chars();
        self.memory = snapshot.memory;
        self.memory.set_max_chars(memory_chars);
        self.notes = snapshot.notes;
        self.relationships = snapshot.relationships;
    }

    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            version: STATE_VERSION,
            persona: self.persona.clone(),
            memory: self.memory.clone(),
            notes: self.notes.clone(),
            relationships: self.relationships.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.persona.id
    }

    /// Applies interactions with other actors' content; self-interactions
    /// are ignored.
    pub fn record_interactions(&mut self, interactions: &[Interaction]) {
        for interaction in interactions {
            if interaction.other == self.persona.id {
                continue;
            }
            self.relationships
                .entry(interaction.other.clone())
                .or_default()
                .record(interaction.kind);
        }
    }

    /// Strongest relationships by absolute affinity, for prompts.
    pub fn top_relationships(&self, n: usize) -> Vec<(&ActorId, &Relationship)> {
        let mut entries: Vec<_> = self.relationships.iter().collect();
        entries.sort_by(|a, b| {
            b.1.affinity
                .abs()
                .partial_cmp(&a.1.affinity.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.interactions.cmp(&a.1.interactions))
        });
        entries.truncate(n);
        entries
    }
}
