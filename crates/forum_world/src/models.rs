//! Actor identity: personas, roles, cognitive styles and traits.

use serde::{Deserialize, Serialize};

pub type ActorId = String;
pub type ContentId = String;

/// Closed set of roles an actor can play in the community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Researcher,
    Engineer,
    Reviewer,
    Skeptic,
    Enthusiast,
    Moderator,
}

impl ActorRole {
    pub const ALL: [ActorRole; 6] = [
        ActorRole::Researcher,
        ActorRole::Engineer,
        ActorRole::Reviewer,
        ActorRole::Skeptic,
        ActorRole::Enthusiast,
        ActorRole::Moderator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Researcher => "researcher",
            ActorRole::Engineer => "engineer",
            ActorRole::Reviewer => "reviewer",
            ActorRole::Skeptic => "skeptic",
            ActorRole::Enthusiast => "enthusiast",
            ActorRole::Moderator => "moderator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveStyle {
    Analytical,
    Intuitive,
    Systematic,
    Exploratory,
}

impl CognitiveStyle {
    pub const ALL: [CognitiveStyle; 4] = [
        CognitiveStyle::Analytical,
        CognitiveStyle::Intuitive,
        CognitiveStyle::Systematic,
        CognitiveStyle::Exploratory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CognitiveStyle::Analytical => "analytical",
            CognitiveStyle::Intuitive => "intuitive",
            CognitiveStyle::Systematic => "systematic",
            CognitiveStyle::Exploratory => "exploratory",
        }
    }
}

/// Five continuous traits, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonaTraits {
    pub risk_tolerance: f64,
    pub creativity: f64,
    pub rigor: f64,
    pub sociability: f64,
    pub influence: f64,
}

impl PersonaTraits {
    pub fn new(
        risk_tolerance: f64,
        creativity: f64,
        rigor: f64,
        sociability: f64,
        influence: f64,
    ) -> Self {
        Self {
            risk_tolerance,
            creativity,
            rigor,
            sociability,
            influence,
        }
        .clamped()
    }

    /// Clamps every trait into `[0, 1]`; NaN becomes 0.5.
    pub fn clamped(self) -> Self {
        fn unit(value: f64) -> f64 {
            if value.is_nan() {
                0.5
            } else {
                value.clamp(0.0, 1.0)
            }
        }
        Self {
            risk_tolerance: unit(self.risk_tolerance),
            creativity: unit(self.creativity),
            rigor: unit(self.rigor),
            sociability: unit(self.sociability),
            influence: unit(self.influence),
        }
    }
}

impl Default for PersonaTraits {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.5, 0.5, 0.5)
    }
}

/// Immutable actor identity, created once when the population is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: ActorId,
    pub name: String,
    pub role: ActorRole,
    pub cognitive_style: CognitiveStyle,
    pub traits: PersonaTraits,
    #[serde(default)]
    pub interests: Vec<String>,
}

impl Persona {
    pub fn new(
        id: impl Into<ActorId>,
        name: impl Into<String>,
        role: ActorRole,
        cognitive_style: CognitiveStyle,
        traits: PersonaTraits,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            cognitive_style,
            traits: traits.clamped(),
            interests: Vec::new(),
        }
    }

    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    /// One-line description used when rendering instructions.
    pub fn describe(&self) -> String {
        let interests = if self.interests.is_empty() {
            "general topics".to_string()
        } else {
            self.interests.join(", ")
        };
        format!(
            "{} ({}; {} thinker; interested in {})",
            self.name,
            self.role.as_str(),
            self.cognitive_style.as_str(),
            interests
        )
    }
}
