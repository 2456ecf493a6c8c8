use std::path::Path;

use forum_world::simulator::generate_population;
use forum_world::{ActorRuntime, Engine, Persona, SimConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub fn test_config(data_dir: &Path) -> SimConfig {
    SimConfig {
        data_dir: data_dir.to_path_buf(),
        population: 5,
        actors_per_tick: 3,
        turn_limit: 3,
        grace_turns: 2,
        checkpoint_interval: 2,
        max_events_per_shard: 4,
        seed: Some(42),
        ..SimConfig::default()
    }
}

pub fn personas(count: usize) -> Vec<Persona> {
    generate_population(count, &mut StdRng::seed_from_u64(7))
}

pub fn open_engine<R: ActorRuntime>(config: SimConfig, runtime: R) -> Engine<R> {
    let count = config.population;
    let mut engine = Engine::open(config, runtime).expect("open engine");
    for persona in personas(count) {
        engine.add_actor(persona).expect("add actor");
    }
    engine
}
