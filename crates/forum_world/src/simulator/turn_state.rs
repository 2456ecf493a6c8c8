//! Per-actor turn budget as a pure state machine.
//!
//! ```text
//! Active --(turn_limit-th turn, rings bell)--> BellRung --> Grace(k) --> ... --> Exhausted
//!                                     \-- grace_turns == 0 ------------------/
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnBudget {
    /// Regular turns per run; at least 1.
    pub turn_limit: u32,
    /// Rest-notice turns granted after the bell.
    pub grace_turns: u32,
}

impl TurnBudget {
    pub fn new(turn_limit: u32, grace_turns: u32) -> Self {
        Self {
            turn_limit: turn_limit.max(1),
            grace_turns,
        }
    }

    pub fn max_turns(&self) -> u32 {
        self.turn_limit + self.grace_turns
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    Active,
    /// Bell has rung; no grace turn spent yet.
    BellRung,
    Grace { remaining: u32 },
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// A regular action turn. `rings_bell` marks the last one.
    Act { rings_bell: bool },
    /// A grace turn carrying only a rest notice.
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorTurnState {
    pub budget: TurnBudget,
    pub turns_taken: u32,
    pub phase: TurnPhase,
}

impl ActorTurnState {
    pub fn new(budget: TurnBudget) -> Self {
        Self {
            budget,
            turns_taken: 0,
            phase: TurnPhase::Active,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.phase != TurnPhase::Exhausted
    }

    pub fn bell_rung(&self) -> bool {
        !matches!(self.phase, TurnPhase::Active)
    }

    pub fn grace_remaining(&self) -> u32 {
        match self.phase {
            TurnPhase::Active | TurnPhase::BellRung => self.budget.grace_turns,
            TurnPhase::Grace { remaining } => remaining,
            TurnPhase::Exhausted => 0,
        }
    }

    /// The kind of the next turn and the state after it, or `None` once the
    /// actor is exhausted.
    pub fn advance(&self) -> Option<(TurnKind, ActorTurnState)> {
        let turns_taken = self.turns_taken + 1;
        let after_grace = |remaining: u32| {
            if remaining == 0 {
                TurnPhase::Exhausted
            } else {
                TurnPhase::Grace { remaining }
            }
        };
        let (kind, phase) = match self.phase {
            TurnPhase::Exhausted => return None,
            TurnPhase::Active if turns_taken < self.budget.turn_limit => {
                (TurnKind::Act { rings_bell: false }, TurnPhase::Active)
            }
            TurnPhase::Active => {
                let phase = if self.budget.grace_turns == 0 {
                    TurnPhase::Exhausted
                } else {
                    TurnPhase::BellRung
                };
                (TurnKind::Act { rings_bell: true }, phase)
            }
            TurnPhase::BellRung => (
                TurnKind::Rest,
                after_grace(self.budget.grace_turns.saturating_sub(1)),
            ),
            TurnPhase::Grace { remaining } => {
                (TurnKind::Rest, after_grace(remaining.saturating_sub(1)))
            }
        };
        Some((
            kind,
            ActorTurnState {
                budget: self.budget,
                turns_taken,
                phase,
            },
        ))
    }
}
