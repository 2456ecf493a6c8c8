use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{ActorRole, CognitiveStyle, Persona, PersonaTraits};
use crate::persist::{
    default_state_version, read_json_if_exists, validate_version, write_json_atomic, PersistError,
    STATE_VERSION,
};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Bao", "Chidi", "Dara", "Elif", "Farid", "Greta", "Hana", "Ines", "Jonas", "Kofi",
    "Lena", "Mateo", "Nadia", "Omar", "Priya", "Quinn", "Rosa", "Sven", "Tariq", "Uma", "Viktor",
    "Wen", "Yara", "Zane",
];

const LAST_NAMES: &[&str] = &[
    "Abara", "Berg", "Castro", "Dubois", "Eze", "Fischer", "Gupta", "Haddad", "Ito", "Jensen",
    "Kim", "Larsen", "Moreau", "Novak", "Okafor", "Petrov", "Rossi", "Sato", "Tanaka", "Vargas",
];

const INTERESTS: &[&str] = &[
    "distributed systems",
    "compilers",
    "machine learning",
    "cryptography",
    "databases",
    "climate modelling",
    "neuroscience",
    "robotics",
    "programming languages",
    "economics",
    "open source governance",
    "scientific reproducibility",
    "human-computer interaction",
    "formal verification",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PopulationFile {
    #[serde(default = "default_state_version")]
    version: u32,
    personas: Vec<Persona>,
}

/// Random personas with ids `actor-001`, `actor-002`, ...
pub fn generate_population<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Persona> {
    (1..=count)
        .map(|idx| {
            let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Anon");
            let last = LAST_NAMES.choose(rng).copied().unwrap_or("Member");
            let role = ActorRole::ALL
                .choose(rng)
                .copied()
                .unwrap_or(ActorRole::Enthusiast);
            let style = CognitiveStyle::ALL
                .choose(rng)
                .copied()
                .unwrap_or(CognitiveStyle::Exploratory);
            let traits = PersonaTraits::new(rng.gen(), rng.gen(), rng.gen(), rng.gen(), rng.gen());
            let interest_count = rng.gen_range(1..=3);
            let interests = INTERESTS
                .choose_multiple(rng, interest_count)
                .copied()
                .collect::<Vec<_>>();
            Persona::new(
                format!("actor-{idx:03}"),
                format!("{first} {last}"),
                role,
                style,
                traits,
            )
            .with_interests(interests)
        })
        .collect()
}

/// Loads the population file, generating and persisting it on first run.
pub fn load_or_generate<R: Rng + ?Sized>(
    path: &Path,
    count: usize,
    rng: &mut R,
) -> Result<Vec<Persona>, PersistError> {
    if let Some(file) = read_json_if_exists::<PopulationFile>(path)? {
        validate_version("population", file.version)?;
        if file.personas.len() != count {
            tracing::info!(
                path = %path.display(),
                stored = file.personas.len(),
                requested = count,
                "using stored population"
            );
        }
        return Ok(file.personas);
    }
    let personas = generate_population(count, rng);
    write_json_atomic(
        &PopulationFile {
            version: STATE_VERSION,
            personas: personas.clone(),
        },
        path,
    )?;
    tracing::info!(path = %path.display(), count, "generated population");
    Ok(personas)
}
